/*!
 * Channel Topologies
 *
 * Pipelines, fan-out and fan-in composed from channels and named worker
 * threads. Termination flows downstream: a worker closes its output once
 * its input reaches end-of-channel, so closing the head drains the graph.
 */

use super::channel::Channel;
use crate::core::errors::{CoordError, SchedulerError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, trace, warn};

type Workers = Vec<(String, JoinHandle<()>)>;

fn spawn_named<F>(name: String, body: F) -> Result<(String, JoinHandle<()>), CoordError>
where
    F: FnOnce() + Send + 'static,
{
    let handle = thread::Builder::new().name(name.clone()).spawn(body)?;
    Ok((name, handle))
}

fn join_workers(workers: Workers) -> Result<(), SchedulerError> {
    let mut first_panic = None;
    for (name, handle) in workers {
        if handle.join().is_err() && first_panic.is_none() {
            first_panic = Some(name);
        }
    }
    match first_panic {
        Some(name) => Err(SchedulerError::WorkerPanicked(name)),
        None => Ok(()),
    }
}

/// Join workers left behind by a failed construction after their channels closed
fn abandon(workers: Workers) {
    if let Err(e) = join_workers(workers) {
        warn!(error = %e, "Worker failed while tearing down a partial topology");
    }
}

/// Output end of a running fan-out or fan-in
pub struct Topology<R> {
    output: Channel<R>,
    workers: Workers,
}

impl<R> Topology<R> {
    pub fn output(&self) -> &Channel<R> {
        &self.output
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Wait for every worker to finish
    pub fn join(self) -> Result<(), SchedulerError> {
        join_workers(self.workers)
    }
}

/// Linear chain of stages, each on its own thread
///
/// Stages are spawned as they are added; `build` hands out both ends.
///
/// # Examples
///
/// ```
/// use coord_kernel::ipc::Pipeline;
///
/// let pipeline = Pipeline::<i32>::new(4)
///     .unwrap()
///     .stage("double", |x| x * 2)
///     .unwrap()
///     .stage("describe", |x| format!("#{}", x))
///     .unwrap()
///     .build();
///
/// pipeline.input().send(21).unwrap();
/// pipeline.input().close();
/// assert_eq!(pipeline.output().receive().as_deref(), Some("#42"));
/// pipeline.join().unwrap();
/// ```
pub struct Pipeline<I, O = I> {
    input: Channel<I>,
    output: Channel<O>,
    capacity: usize,
    workers: Workers,
}

impl<I: Send + 'static> Pipeline<I, I> {
    /// Start an empty pipeline whose channels buffer `capacity` messages
    pub fn new(capacity: usize) -> Result<Self, CoordError> {
        let input = Channel::new(capacity)?;
        Ok(Self {
            output: input.clone(),
            input,
            capacity,
            workers: Vec::new(),
        })
    }
}

impl<I: Send + 'static, O: Send + 'static> Pipeline<I, O> {
    /// Append a stage transforming every message with `f`
    pub fn stage<N, F>(self, name: &str, mut f: F) -> Result<Pipeline<I, N>, CoordError>
    where
        N: Send + 'static,
        F: FnMut(O) -> N + Send + 'static,
    {
        let source = self.output;
        let sink = Channel::new(self.capacity)?;
        let stage_sink = sink.clone();
        let stage_name = name.to_string();

        let stage_source = source.clone();
        let spawned = spawn_named(format!("pipeline-{}", name), move || {
            let mut forwarded = 0u64;
            for message in stage_source.iter() {
                if stage_sink.send(f(message)).is_err() {
                    // Downstream gone; stop accepting upstream work
                    stage_source.close();
                    break;
                }
                forwarded += 1;
            }
            stage_sink.close();
            debug!(stage = %stage_name, forwarded, "Pipeline stage finished");
        });
        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                // Earlier stages drain into a closed channel and exit
                self.input.close();
                source.close();
                abandon(self.workers);
                return Err(e);
            }
        };

        let mut workers = self.workers;
        workers.push(worker);

        Ok(Pipeline {
            input: self.input,
            output: sink,
            capacity: self.capacity,
            workers,
        })
    }

    pub fn build(self) -> PipelineHandle<I, O> {
        info!(stages = self.workers.len(), capacity = self.capacity, "Pipeline started");
        PipelineHandle {
            input: self.input,
            output: self.output,
            workers: self.workers,
        }
    }
}

/// Running pipeline
pub struct PipelineHandle<I, O> {
    input: Channel<I>,
    output: Channel<O>,
    workers: Workers,
}

impl<I, O> PipelineHandle<I, O> {
    pub fn input(&self) -> &Channel<I> {
        &self.input
    }

    pub fn output(&self) -> &Channel<O> {
        &self.output
    }

    pub fn stages(&self) -> usize {
        self.workers.len()
    }

    /// Wait for all stages; close the input first or this blocks
    pub fn join(self) -> Result<(), SchedulerError> {
        join_workers(self.workers)
    }
}

/// Spread `input` over `workers` threads applying `f`
///
/// Each message reaches exactly one worker. The output closes after the
/// last worker sees end-of-channel.
pub fn fan_out<T, R, F>(input: Channel<T>, workers: usize, f: F) -> Result<Topology<R>, CoordError>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    if workers == 0 {
        return Err(SchedulerError::InvalidConfig("fan-out needs at least one worker".into()).into());
    }

    let output = Channel::new(input.capacity())?;
    let f = Arc::new(f);
    let remaining = Arc::new(AtomicUsize::new(workers));
    let mut handles = Vec::with_capacity(workers);

    for id in 0..workers {
        let worker_input = input.clone();
        let worker_output = output.clone();
        let f = Arc::clone(&f);
        let remaining = Arc::clone(&remaining);

        let spawned = spawn_named(format!("fan-out-{}", id), move || {
            let mut handled = 0u64;
            for message in worker_input.iter() {
                if worker_output.send(f(message)).is_err() {
                    // Consumer gone; stop producers instead of leaving them blocked
                    worker_input.close();
                    break;
                }
                handled += 1;
            }
            trace!(worker = id, handled, "Fan-out worker finished");
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                worker_output.close();
            }
        });
        match spawned {
            Ok(worker) => handles.push(worker),
            Err(e) => {
                input.close();
                output.close();
                abandon(handles);
                return Err(e);
            }
        }
    }

    Ok(Topology {
        output,
        workers: handles,
    })
}

/// Merge `inputs` into one channel
///
/// Order within each input is preserved; interleaving across inputs is not
/// defined.
pub fn fan_in<T>(inputs: Vec<Channel<T>>, capacity: usize) -> Result<Topology<T>, CoordError>
where
    T: Send + 'static,
{
    let output = Channel::new(capacity)?;
    if inputs.is_empty() {
        output.close();
    }

    let remaining = Arc::new(AtomicUsize::new(inputs.len()));
    let mut handles = Vec::with_capacity(inputs.len());

    for (id, input) in inputs.iter().enumerate() {
        let input = input.clone();
        let worker_output = output.clone();
        let remaining = Arc::clone(&remaining);

        let spawned = spawn_named(format!("fan-in-{}", id), move || {
            for message in input.iter() {
                if worker_output.send(message).is_err() {
                    input.close();
                    break;
                }
            }
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                worker_output.close();
            }
        });
        match spawned {
            Ok(worker) => handles.push(worker),
            Err(e) => {
                output.close();
                inputs.iter().for_each(Channel::close);
                abandon(handles);
                return Err(e);
            }
        }
    }

    Ok(Topology {
        output,
        workers: handles,
    })
}

/// Bounce a counter between two workers over rendezvous channels
///
/// Returns the number of completed round trips.
pub fn ping_pong(rounds: u32) -> Result<u32, CoordError> {
    let ping: Channel<u32> = Channel::new(0)?;
    let pong: Channel<u32> = Channel::new(0)?;

    let (ping_rx, pong_tx) = (ping.clone(), pong.clone());
    let ponger = thread::Builder::new().name("ponger".into()).spawn(move || {
        for ball in ping_rx.iter() {
            if pong_tx.send(ball + 1).is_err() {
                break;
            }
        }
        pong_tx.close();
    })?;

    let mut completed = 0;
    for ball in 0..rounds {
        if ping.send(ball).is_err() {
            break;
        }
        match pong.receive() {
            Some(returned) if returned == ball + 1 => completed += 1,
            _ => break,
        }
    }
    ping.close();

    ponger
        .join()
        .map_err(|_| SchedulerError::WorkerPanicked("ponger".into()))?;
    debug!(rounds, completed, "Ping-pong finished");
    Ok(completed)
}
