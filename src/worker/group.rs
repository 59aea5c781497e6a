/*!
 * Worker Group
 *
 * A set of named worker threads driven by control messages. Each worker
 * owns a bounded inbox; all of them report into one bounded report
 * channel the host drains through `reports()`. Workers share a
 * `SharedRegion` for coordination outside the message flow.
 */

use super::message::ControlMessage;
use crate::core::errors::{CoordError, SchedulerError};
use crate::core::limits::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_QUEUE_CAPACITY, MAX_WORKERS};
use crate::core::types::{TaskId, WorkerId};
use crate::memory::SharedRegion;
use crate::scheduler::panic_message;
use flume::{Receiver, Sender};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn};

// How long a join waits on the report channel before rechecking its worker
const JOIN_POLL: Duration = Duration::from_millis(10);

type Body = dyn Fn(&WorkerContext, TaskId, Value) -> Result<Value, String> + Send + Sync;

/// What a worker thread sees of the outside world
pub struct WorkerContext {
    id: WorkerId,
    region: SharedRegion,
    inbox: Receiver<ControlMessage>,
    reporter: Sender<ControlMessage>,
}

impl WorkerContext {
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Region shared by every worker in the group
    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    /// Report progress on the current task; false once the host is gone
    pub fn progress(&self, percent: f64, message: impl Into<String>) -> bool {
        self.report(ControlMessage::progress(self.id, percent, message))
    }

    /// Send a report to the host; false once the host is gone
    pub fn report(&self, message: ControlMessage) -> bool {
        self.reporter.send(message).is_ok()
    }
}

fn run_task(ctx: &WorkerContext, body: &Body, task_id: TaskId, payload: Value) -> bool {
    let start = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| body(ctx, task_id, payload)))
        .unwrap_or_else(|p| Err(panic_message(p.as_ref())));
    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    let report = match outcome {
        Ok(payload) => {
            debug!(task_id, elapsed_ms, "Task completed");
            ControlMessage::Result {
                worker: ctx.id,
                task_id,
                payload,
                elapsed_ms,
            }
        }
        Err(message) => {
            warn!(task_id, error = %message, "Task failed");
            ControlMessage::Error {
                worker: ctx.id,
                task_id: Some(task_id),
                message,
            }
        }
    };
    ctx.report(report)
}

fn run_worker(ctx: WorkerContext, body: Arc<Body>) {
    let span = info_span!("worker", worker = ctx.id);
    let _entered = span.enter();

    // Tasks submitted before Start are held until then
    let mut held = Vec::new();
    loop {
        match ctx.inbox.recv() {
            Ok(ControlMessage::Start) => break,
            Ok(ControlMessage::SubmitTask { task_id, payload }) => held.push((task_id, payload)),
            Ok(ControlMessage::Stop) | Err(_) => {
                debug!("Worker stopped before start");
                return;
            }
            Ok(other) => warn!(message = ?other, "Unexpected control message"),
        }
    }

    info!(held = held.len(), "Worker started");
    for (task_id, payload) in held {
        if !run_task(&ctx, body.as_ref(), task_id, payload) {
            return;
        }
    }

    loop {
        match ctx.inbox.recv() {
            Ok(ControlMessage::SubmitTask { task_id, payload }) => {
                if !run_task(&ctx, body.as_ref(), task_id, payload) {
                    warn!("Report channel gone, worker exiting");
                    return;
                }
            }
            Ok(ControlMessage::Start) => debug!("Worker already started"),
            Ok(ControlMessage::Stop) | Err(_) => break,
            Ok(other) => warn!(message = ?other, "Unexpected control message"),
        }
    }
    info!("Worker stopped");
}

/// Host side of a group of message-driven workers
pub struct WorkerGroup {
    inboxes: Vec<Sender<ControlMessage>>,
    reports: Receiver<ControlMessage>,
    handles: Vec<(WorkerId, JoinHandle<()>)>,
    region: SharedRegion,
}

impl WorkerGroup {
    /// Spawn `workers` threads running `body` for each submitted task
    ///
    /// Workers idle until `start`. The body's `Ok` value becomes a `Result`
    /// report, its `Err` (or a panic) an `Error` report.
    pub fn spawn<F>(workers: usize, region: &SharedRegion, body: F) -> Result<Self, CoordError>
    where
        F: Fn(&WorkerContext, TaskId, Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        if workers == 0 || workers > MAX_WORKERS {
            return Err(SchedulerError::InvalidConfig(format!(
                "worker count {} outside 1..={}",
                workers, MAX_WORKERS
            ))
            .into());
        }

        let body: Arc<Body> = Arc::new(body);
        let (reporter, reports) = flume::bounded(DEFAULT_QUEUE_CAPACITY);
        let mut inboxes = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let id = index as WorkerId;
            let (tx, rx) = flume::bounded(DEFAULT_CHANNEL_CAPACITY);
            let ctx = WorkerContext {
                id,
                region: region.clone(),
                inbox: rx,
                reporter: reporter.clone(),
            };
            let body = body.clone();
            let handle = thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || run_worker(ctx, body))?;
            inboxes.push(tx);
            handles.push((id, handle));
        }

        info!(workers, region = %region.id(), "Worker group spawned");

        Ok(Self {
            inboxes,
            reports,
            handles,
            region: region.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.inboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inboxes.is_empty()
    }

    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    fn inbox(&self, worker: WorkerId) -> Result<&Sender<ControlMessage>, SchedulerError> {
        self.inboxes
            .get(worker as usize)
            .ok_or_else(|| SchedulerError::InvalidConfig(format!("no worker {}", worker)))
    }

    /// Release every worker from its initial wait
    pub fn start(&self) -> Result<(), SchedulerError> {
        for inbox in &self.inboxes {
            inbox
                .send(ControlMessage::Start)
                .map_err(|_| SchedulerError::ShutDown)?;
        }
        Ok(())
    }

    /// Queue a task on one worker; blocks while its inbox is full
    pub fn submit(
        &self,
        worker: WorkerId,
        task_id: TaskId,
        payload: Value,
    ) -> Result<(), SchedulerError> {
        self.inbox(worker)?
            .send(ControlMessage::SubmitTask { task_id, payload })
            .map_err(|_| SchedulerError::ShutDown)
    }

    /// Queue a task on the worker `task_id` maps to
    pub fn dispatch(&self, task_id: TaskId, payload: Value) -> Result<WorkerId, SchedulerError> {
        let worker = (task_id % self.inboxes.len() as u64) as WorkerId;
        self.submit(worker, task_id, payload)?;
        Ok(worker)
    }

    /// Ask every worker to exit once its queued tasks are done
    pub fn stop(&self) {
        for inbox in &self.inboxes {
            // A closed inbox means the worker already exited
            let _ = inbox.send(ControlMessage::Stop);
        }
    }

    /// Reports from all workers
    ///
    /// The channel disconnects once every worker has exited.
    pub fn reports(&self) -> &Receiver<ControlMessage> {
        &self.reports
    }

    /// Stop the workers and wait for them
    ///
    /// Reports keep draining while the workers wind down, so a worker
    /// blocked on a full report channel cannot stall the join. Returns every
    /// report not already taken through `reports()`.
    pub fn join(mut self) -> Result<Vec<ControlMessage>, SchedulerError> {
        self.stop();
        let mut pending = Vec::new();
        Self::join_draining(std::mem::take(&mut self.handles), &self.reports, |report| {
            pending.push(report)
        })?;
        Ok(pending)
    }

    fn join_draining(
        handles: Vec<(WorkerId, JoinHandle<()>)>,
        reports: &Receiver<ControlMessage>,
        mut sink: impl FnMut(ControlMessage),
    ) -> Result<(), SchedulerError> {
        let mut first_panic = None;
        for (id, handle) in handles {
            while !handle.is_finished() {
                if let Ok(report) = reports.recv_timeout(JOIN_POLL) {
                    sink(report);
                }
            }
            if handle.join().is_err() && first_panic.is_none() {
                first_panic = Some(format!("worker-{}", id));
            }
        }
        reports.try_iter().for_each(sink);

        match first_panic {
            Some(name) => Err(SchedulerError::WorkerPanicked(name)),
            None => Ok(()),
        }
    }
}

impl Drop for WorkerGroup {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        warn!("WorkerGroup dropped without join, stopping workers");
        self.stop();
        let mut discarded = 0usize;
        let handles = std::mem::take(&mut self.handles);
        if let Err(e) = Self::join_draining(handles, &self.reports, |_| discarded += 1) {
            warn!(error = %e, "Worker failed during drop");
        }
        if discarded > 0 {
            debug!(discarded, "Unread reports dropped with the group");
        }
    }
}
