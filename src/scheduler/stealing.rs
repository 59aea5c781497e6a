/*!
 * Work-Stealing Scheduler
 *
 * Each worker owns a LIFO deque; external submissions go through a global
 * injector and tasks spawned from a running task land on the spawning
 * worker's own deque. An idle worker drains the injector, then steals from
 * the tail of the peer with the most queued work.
 *
 * Idle workers park on an epoch slot in a shared region that every push
 * bumps, so a push between "found nothing" and "park" is never lost.
 */

use super::atomic_stats::AtomicSchedulerStats;
use super::idle::IdleTracker;
use super::task::{Task, TaskContext};
use super::types::{OverflowPolicy, SchedulerConfig, SchedulerStats};
use crate::core::errors::SchedulerError;
use crate::core::types::{SlotIndex, TaskId, WorkerId};
use crate::memory::SharedRegion;
use crossbeam_deque::{Injector, Steal, Stealer, Worker as Deque};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

// Region layout: epoch, shutdown flag, outstanding counter
const EPOCH: usize = 0;
const SHUTDOWN: usize = 1;
const REGION_SLOTS: usize = 3;

struct Shared {
    injector: Injector<Task>,
    stealers: Vec<Stealer<Task>>,
    region: SharedRegion,
    base: SlotIndex,
    idle: IdleTracker,
    stats: AtomicSchedulerStats,
    idle_timeout: Duration,
    overflow: OverflowPolicy,
}

impl Shared {
    /// Wake one parked worker after new work became visible
    fn signal_work(&self) -> Result<(), SchedulerError> {
        self.region.add(self.base + EPOCH, 1)?;
        self.region.notify(self.base + EPOCH, 1)?;
        Ok(())
    }

    /// Raise the shutdown flag and wake every parked worker
    fn signal_shutdown(&self) -> Result<(), SchedulerError> {
        self.region.store(self.base + SHUTDOWN, 1)?;
        self.region.add(self.base + EPOCH, 1)?;
        self.region.notify_all(self.base + EPOCH)?;
        Ok(())
    }

    fn is_shutdown(&self) -> bool {
        self.region.load(self.base + SHUTDOWN).map_or(true, |v| v != 0)
    }

    /// Steal from the peer with the most queued tasks first
    ///
    /// Returns the task and whether any steal lost a race.
    fn steal_from_peers(&self, me: usize, local: &Deque<Task>) -> (Option<Task>, bool) {
        let mut victims: Vec<usize> = (0..self.stealers.len()).filter(|&i| i != me).collect();
        victims.sort_by_key(|&i| std::cmp::Reverse(self.stealers[i].len()));

        let mut contended = false;
        for victim in victims {
            match self.stealers[victim].steal_batch_and_pop(local) {
                Steal::Success(task) => {
                    self.stats.inc_steals();
                    return (Some(task), contended);
                }
                Steal::Retry => {
                    // Lost to another thief, move on rather than spin here
                    self.stats.inc_steal_retries();
                    contended = true;
                }
                Steal::Empty => {}
            }
        }
        (None, contended)
    }

    fn find_task(&self, me: usize, local: &Deque<Task>) -> Option<Task> {
        if let Some(task) = local.pop() {
            return Some(task);
        }

        loop {
            loop {
                match self.injector.steal_batch_and_pop(local) {
                    Steal::Success(task) => return Some(task),
                    Steal::Retry => continue,
                    Steal::Empty => break,
                }
            }

            // Another pass only if some victim may still hold work
            match self.steal_from_peers(me, local) {
                (Some(task), _) => return Some(task),
                (None, true) => continue,
                (None, false) => return None,
            }
        }
    }

    fn run_worker(&self, me: usize, local: Deque<Task>) {
        let worker_id = me as WorkerId;
        let spawn = |task: Task| -> Result<(), SchedulerError> {
            self.idle.begin()?;
            local.push(task);
            self.stats.inc_local_spawns();
            self.signal_work()
        };

        loop {
            let epoch = self.region.load(self.base + EPOCH).unwrap_or(0);

            match self.find_task(me, &local) {
                Some(task) => {
                    let task_id = task.id();
                    let ctx = TaskContext::new(worker_id, task_id, &spawn);
                    let result = task.run(&ctx);
                    if let Err(reason) = &result {
                        warn!(worker = worker_id, task_id, %reason, "Task failed");
                    }
                    self.stats.record_finished(me, result.is_ok());
                    if let Err(e) = self.idle.finish() {
                        warn!(worker = worker_id, error = %e, "Failed to record task completion");
                    }
                }
                None => {
                    if self.is_shutdown() {
                        break;
                    }
                    // Parks only if no push happened since `epoch` was read
                    if let Err(e) = self.region.wait(self.base + EPOCH, epoch, Some(self.idle_timeout)) {
                        warn!(worker = worker_id, error = %e, "Idle wait failed");
                        thread::sleep(self.idle_timeout);
                    }
                }
            }
        }

        debug!(worker = worker_id, "Work-stealing worker exiting");
    }
}

/// Work-stealing task scheduler over a fixed set of worker threads
pub struct WorkStealingScheduler {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    // Submitters hold it shared from the shutdown check through the push
    accepting: RwLock<()>,
}

fn join_workers(handles: Vec<JoinHandle<()>>) -> Option<String> {
    let mut panicked = None;
    for (id, handle) in handles.into_iter().enumerate() {
        if handle.join().is_err() {
            panicked = Some(format!("steal-worker-{}", id));
        }
    }
    panicked
}

impl WorkStealingScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;

        let region = SharedRegion::new(REGION_SLOTS)?;
        let base = region.reserve(2)?;
        let idle = IdleTracker::new(&region, config.queue_capacity)?;

        let deques: Vec<Deque<Task>> = (0..config.workers).map(|_| Deque::new_lifo()).collect();
        let stealers = deques.iter().map(Deque::stealer).collect();

        let shared = Arc::new(Shared {
            injector: Injector::new(),
            stealers,
            region,
            base,
            idle,
            stats: AtomicSchedulerStats::new(config.workers),
            idle_timeout: config.idle_timeout,
            overflow: config.overflow,
        });

        let mut handles = Vec::with_capacity(config.workers);
        for (me, local) in deques.into_iter().enumerate() {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("steal-worker-{}", me))
                .spawn(move || worker_shared.run_worker(me, local));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    warn!(worker = me, error = %e, "Worker spawn failed, stopping started workers");
                    shared.signal_shutdown()?;
                    join_workers(handles);
                    return Err(SchedulerError::InvalidConfig(format!(
                        "failed to spawn worker: {}",
                        e
                    )));
                }
            }
        }

        info!(workers = config.workers, capacity = config.queue_capacity, "Work-stealing scheduler started");

        Ok(Self {
            shared,
            handles: Mutex::new(handles),
            accepting: RwLock::new(()),
        })
    }

    /// Queue a task on the global injector
    ///
    /// At capacity this blocks or fails with `QueueFull` per the configured
    /// overflow policy. Tasks spawned from running tasks never block.
    pub fn submit(&self, task: Task) -> Result<TaskId, SchedulerError> {
        // Workers only exit after shutdown is flagged, which waits for this guard
        let _accepting = self.accepting.read();
        if self.shared.is_shutdown() {
            return Err(SchedulerError::ShutDown);
        }
        match self.shared.overflow {
            OverflowPolicy::Block => self.shared.idle.begin_blocking()?,
            OverflowPolicy::Reject => self.shared.idle.begin()?,
        }

        let id = task.id();
        self.shared.injector.push(task);
        self.shared.stats.inc_submitted();
        self.shared.signal_work()?;
        Ok(id)
    }

    /// Convenience wrapper building the `Task` from a closure
    pub fn spawn<F>(&self, job: F) -> Result<TaskId, SchedulerError>
    where
        F: FnOnce(&TaskContext<'_>) -> super::task::TaskResult + Send + 'static,
    {
        self.submit(Task::new(job))
    }

    /// Block until every submitted and spawned task has finished
    pub fn wait_idle(&self, timeout: Option<Duration>) -> Result<(), SchedulerError> {
        self.shared.idle.wait_idle(timeout)
    }

    /// Stop accepting work, drain queued tasks and join the workers
    ///
    /// Idempotent; later calls return immediately.
    pub fn shutdown(&self) -> Result<(), SchedulerError> {
        let handles = std::mem::take(&mut *self.handles.lock());
        if handles.is_empty() {
            return Ok(());
        }

        {
            let _closing = self.accepting.write();
            self.shared.signal_shutdown()?;
        }
        let panicked = join_workers(handles);

        let stats = self.stats();
        info!(completed = stats.completed, failed = stats.failed, steals = stats.steals, "Work-stealing scheduler stopped");

        match panicked {
            Some(name) => Err(SchedulerError::WorkerPanicked(name)),
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats.snapshot(self.shared.idle.outstanding())
    }

    pub fn workers(&self) -> usize {
        self.shared.stealers.len()
    }
}

impl Drop for WorkStealingScheduler {
    fn drop(&mut self) {
        if !self.handles.lock().is_empty() {
            warn!("Work-stealing scheduler dropped without shutdown, shutting down");
            if let Err(e) = self.shutdown() {
                warn!(error = %e, "Shutdown on drop failed");
            }
        }
    }
}
