/*!
 * Priority Scheduling
 *
 * `PriorityQueue` is a bounded queue ordered by priority, FIFO among equal
 * priorities via a submission sequence number. Without aging a steady
 * stream of high-priority work starves lower priorities; with an
 * `AgingPolicy` any entry that waited `max_age` is boosted to the top
 * priority, keeping its place among other boosted entries.
 *
 * `PriorityScheduler` drains one shared queue with a resizable worker pool.
 * Worker `n` retires once the target size drops to `n` or below.
 */

use super::atomic_stats::AtomicSchedulerStats;
use super::idle::IdleTracker;
use super::task::{Task, TaskContext, TaskResult};
use super::types::{AgingPolicy, OverflowPolicy, SchedulerConfig, SchedulerStats};
use crate::core::errors::SchedulerError;
use crate::core::limits::MAX_WORKERS;
use crate::core::types::{Priority, TaskId, WorkerId};
use crate::memory::SharedRegion;
use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Priority given to entries promoted by aging
pub const BOOSTED_PRIORITY: Priority = Priority::MAX;

// Highest priority first, then the earlier submission
type Key = (Reverse<Priority>, u64);

struct QueueState<T> {
    entries: BTreeMap<Key, T>,
    /// Push order, kept only while aging is enabled
    arrivals: VecDeque<(u64, Priority, Instant)>,
    next_seq: u64,
    closed: bool,
    boosted: u64,
}

/// Bounded priority queue shared between producers and consumers
pub struct PriorityQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
    aging: Option<AgingPolicy>,
}

impl<T> PriorityQueue<T> {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self::build(capacity, policy, None)
    }

    /// Queue whose entries are boosted after waiting `aging.max_age`
    pub fn with_aging(capacity: usize, policy: OverflowPolicy, aging: AgingPolicy) -> Self {
        Self::build(capacity, policy, Some(aging))
    }

    fn build(capacity: usize, policy: OverflowPolicy, aging: Option<AgingPolicy>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: BTreeMap::new(),
                arrivals: VecDeque::new(),
                next_seq: 0,
                closed: false,
                boosted: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
            policy,
            aging,
        }
    }

    /// Enqueue per the queue's overflow policy
    pub fn push(&self, item: T, priority: Priority) -> Result<(), SchedulerError> {
        self.push_with(item, priority, self.policy)
    }

    pub(crate) fn push_with(
        &self,
        item: T,
        priority: Priority,
        policy: OverflowPolicy,
    ) -> Result<(), SchedulerError> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Err(SchedulerError::Closed);
            }
            if state.entries.len() < self.capacity {
                break;
            }
            match policy {
                OverflowPolicy::Reject => return Err(SchedulerError::QueueFull(self.capacity)),
                OverflowPolicy::Block => self.not_full.wait(&mut state),
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert((Reverse(priority), seq), item);
        if self.aging.is_some() {
            state.arrivals.push_back((seq, priority, Instant::now()));
        }
        self.not_empty.notify_one();
        Ok(())
    }

    /// Re-key every entry that has waited past the aging limit
    fn promote_aged(&self, state: &mut QueueState<T>) {
        let aging = match self.aging {
            Some(aging) => aging,
            None => return,
        };
        while let Some(&(seq, priority, at)) = state.arrivals.front() {
            if at.elapsed() < aging.max_age {
                break;
            }
            state.arrivals.pop_front();
            if priority == BOOSTED_PRIORITY {
                continue;
            }
            if let Some(item) = state.entries.remove(&(Reverse(priority), seq)) {
                state.entries.insert((Reverse(BOOSTED_PRIORITY), seq), item);
                state.boosted += 1;
                trace!(seq, from = priority, "Aged entry boosted");
            }
        }
    }

    fn take(&self, state: &mut QueueState<T>) -> Option<(Priority, T)> {
        self.promote_aged(state);
        let ((Reverse(priority), _), item) = state.entries.pop_first()?;

        // Drop arrival records whose entries already left the queue
        while let Some(&(seq, queued_at, _)) = state.arrivals.front() {
            if state.entries.contains_key(&(Reverse(queued_at), seq)) {
                break;
            }
            state.arrivals.pop_front();
        }

        self.not_full.notify_one();
        Some((priority, item))
    }

    /// Highest-priority item, blocking while empty; `None` once closed and drained
    pub fn pop(&self) -> Option<T> {
        self.pop_with_priority().map(|(_, item)| item)
    }

    pub fn pop_with_priority(&self) -> Option<(Priority, T)> {
        let mut state = self.state.lock();
        loop {
            if let Some(found) = self.take(&mut state) {
                return Some(found);
            }
            if state.closed {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Result<T, SchedulerError> {
        self.pop_timeout_with_priority(timeout).map(|(_, item)| item)
    }

    pub(crate) fn pop_timeout_with_priority(
        &self,
        timeout: Duration,
    ) -> Result<(Priority, T), SchedulerError> {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(found) = self.take(&mut state) {
                return Ok(found);
            }
            if state.closed {
                return Err(SchedulerError::Closed);
            }
            if self.not_empty.wait_until(&mut state, deadline).timed_out() && state.entries.is_empty() {
                return Err(SchedulerError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                });
            }
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        self.take(&mut state).map(|(_, item)| item)
    }

    /// Priority of the next item to be popped
    pub fn peek_priority(&self) -> Option<Priority> {
        let mut state = self.state.lock();
        self.promote_aged(&mut state);
        state.entries.keys().next().map(|(Reverse(priority), _)| *priority)
    }

    /// Reject further pushes; queued items can still be popped
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries promoted by aging so far
    pub fn boosted(&self) -> u64 {
        self.state.lock().boosted
    }
}

struct WorkerSlot {
    handle: Option<JoinHandle<()>>,
    running: bool,
}

struct Roster {
    target: usize,
    slots: Vec<WorkerSlot>,
}

impl Roster {
    fn running(&self) -> usize {
        self.slots.iter().filter(|slot| slot.running).count()
    }

    fn take_handles(&mut self) -> Vec<(usize, JoinHandle<()>)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(id, slot)| slot.handle.take().map(|handle| (id, handle)))
            .collect()
    }
}

struct SchedulerShared {
    queue: PriorityQueue<Task>,
    idle: IdleTracker,
    stats: AtomicSchedulerStats,
    roster: Mutex<Roster>,
    idle_timeout: Duration,
}

impl SchedulerShared {
    /// Leave the pool if it shrank below this worker
    fn should_retire(&self, me: usize) -> bool {
        let mut roster = self.roster.lock();
        if me < roster.target {
            return false;
        }
        if let Some(slot) = roster.slots.get_mut(me) {
            slot.running = false;
        }
        true
    }

    fn run_worker(&self, me: usize) {
        let worker_id = me as WorkerId;

        loop {
            if self.should_retire(me) {
                debug!(worker = worker_id, "Priority worker retired by resize");
                return;
            }
            match self.queue.pop_timeout_with_priority(self.idle_timeout) {
                Ok((priority, task)) => self.run_task(me, priority, task),
                Err(SchedulerError::Closed) => break,
                Err(_) => {}
            }
        }

        debug!(worker = worker_id, "Priority worker exiting");
    }

    fn run_task(&self, me: usize, priority: Priority, task: Task) {
        let worker_id = me as WorkerId;
        // Children inherit the parent's priority and never block a worker
        let spawn = |child: Task| -> Result<(), SchedulerError> {
            self.idle.begin()?;
            if let Err(e) = self.queue.push_with(child, priority, OverflowPolicy::Reject) {
                self.idle.finish()?;
                return Err(e);
            }
            self.stats.inc_local_spawns();
            Ok(())
        };

        let task_id = task.id();
        let ctx = TaskContext::new(worker_id, task_id, &spawn);
        let result = task.run(&ctx);
        if let Err(reason) = &result {
            warn!(worker = worker_id, task_id, priority, %reason, "Task failed");
        }
        self.stats.record_finished(me, result.is_ok());
        if let Err(e) = self.idle.finish() {
            warn!(worker = worker_id, error = %e, "Failed to record task completion");
        }
    }
}

fn spawn_worker(shared: &Arc<SchedulerShared>, me: usize) -> Result<JoinHandle<()>, SchedulerError> {
    let worker_shared = Arc::clone(shared);
    thread::Builder::new()
        .name(format!("prio-worker-{}", me))
        .spawn(move || worker_shared.run_worker(me))
        .map_err(|e| SchedulerError::InvalidConfig(format!("failed to spawn worker: {}", e)))
}

fn join_workers(handles: Vec<(usize, JoinHandle<()>)>) -> Option<String> {
    let mut panicked = None;
    for (id, handle) in handles {
        if handle.join().is_err() {
            panicked = Some(format!("prio-worker-{}", id));
        }
    }
    panicked
}

fn check_worker_count(workers: usize) -> Result<(), SchedulerError> {
    if workers == 0 || workers > MAX_WORKERS {
        return Err(SchedulerError::InvalidConfig(format!(
            "workers must be in 1..={}, got {}",
            MAX_WORKERS, workers
        )));
    }
    Ok(())
}

/// Resizable worker pool draining a shared priority queue
pub struct PriorityScheduler {
    shared: Arc<SchedulerShared>,
}

impl PriorityScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;

        let region = SharedRegion::new(1)?;
        let queue = match config.aging {
            Some(aging) => PriorityQueue::with_aging(config.queue_capacity, config.overflow, aging),
            None => PriorityQueue::new(config.queue_capacity, config.overflow),
        };
        let shared = Arc::new(SchedulerShared {
            queue,
            // The queue enforces capacity; the tracker only counts
            idle: IdleTracker::new(&region, usize::MAX)?,
            stats: AtomicSchedulerStats::new(MAX_WORKERS),
            roster: Mutex::new(Roster {
                target: 0,
                slots: Vec::with_capacity(config.workers),
            }),
            idle_timeout: config.idle_timeout,
        });

        let scheduler = Self { shared };
        if let Err(e) = scheduler.resize(config.workers) {
            warn!(error = %e, "Priority scheduler failed to start, stopping started workers");
            scheduler.shutdown()?;
            return Err(e);
        }

        info!(
            workers = config.workers,
            capacity = config.queue_capacity,
            aging = config.aging.is_some(),
            "Priority scheduler started"
        );
        Ok(scheduler)
    }

    /// Grow or shrink the pool to `workers` threads
    ///
    /// Growing spawns immediately. Surplus workers finish their current task
    /// and retire within one idle timeout; queued work is never dropped.
    pub fn resize(&self, workers: usize) -> Result<(), SchedulerError> {
        check_worker_count(workers)?;

        let mut roster = self.shared.roster.lock();
        if self.shared.queue.is_closed() {
            return Err(SchedulerError::ShutDown);
        }
        let previous = roster.target;
        roster.target = workers;

        for me in 0..workers {
            if roster.slots.len() <= me {
                roster.slots.push(WorkerSlot {
                    handle: None,
                    running: false,
                });
            }
            if roster.slots[me].running {
                continue;
            }
            // A retired worker marked itself before returning; reap it
            if let Some(old) = roster.slots[me].handle.take() {
                if old.join().is_err() {
                    warn!(worker = me, "Retired priority worker had panicked");
                }
            }
            match spawn_worker(&self.shared, me) {
                Ok(handle) => {
                    roster.slots[me] = WorkerSlot {
                        handle: Some(handle),
                        running: true,
                    };
                }
                Err(e) => {
                    roster.target = me;
                    return Err(e);
                }
            }
        }

        if previous != 0 && previous != workers {
            info!(from = previous, to = workers, "Priority scheduler resized");
        }
        Ok(())
    }

    /// Target pool size
    pub fn workers(&self) -> usize {
        self.shared.roster.lock().target
    }

    pub fn submit(&self, task: Task, priority: Priority) -> Result<TaskId, SchedulerError> {
        let id = task.id();
        self.shared.idle.begin()?;
        if let Err(e) = self.shared.queue.push(task, priority) {
            self.shared.idle.finish()?;
            return Err(e);
        }
        self.shared.stats.inc_submitted();
        Ok(id)
    }

    pub fn spawn<F>(&self, priority: Priority, job: F) -> Result<TaskId, SchedulerError>
    where
        F: FnOnce(&TaskContext<'_>) -> TaskResult + Send + 'static,
    {
        self.submit(Task::new(job), priority)
    }

    pub fn wait_idle(&self, timeout: Option<Duration>) -> Result<(), SchedulerError> {
        self.shared.idle.wait_idle(timeout)
    }

    /// Tasks waiting in the queue (not counting running ones)
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Queued tasks promoted by aging so far
    pub fn boosted(&self) -> u64 {
        self.shared.queue.boosted()
    }

    /// Close the queue, let workers drain it and join them; idempotent
    pub fn shutdown(&self) -> Result<(), SchedulerError> {
        let handles = {
            let mut roster = self.shared.roster.lock();
            self.shared.queue.close();
            roster.take_handles()
        };
        if handles.is_empty() {
            return Ok(());
        }

        let panicked = join_workers(handles);
        self.shared.roster.lock().slots.iter_mut().for_each(|slot| slot.running = false);

        info!(completed = self.stats().completed, "Priority scheduler stopped");
        match panicked {
            Some(name) => Err(SchedulerError::WorkerPanicked(name)),
            None => Ok(()),
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.shared.stats.snapshot(self.shared.idle.outstanding());
        let roster = self.shared.roster.lock();
        stats.workers = roster.running();
        stats.per_worker.truncate(roster.slots.len());
        stats
    }
}

impl Drop for PriorityScheduler {
    fn drop(&mut self) {
        let live = self
            .shared
            .roster
            .lock()
            .slots
            .iter()
            .any(|slot| slot.handle.is_some());
        if live {
            warn!("Priority scheduler dropped without shutdown, shutting down");
            if let Err(e) = self.shutdown() {
                warn!(error = %e, "Shutdown on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_priority_then_fifo() {
        let queue = PriorityQueue::new(16, OverflowPolicy::Reject);
        queue.push("low-1", 1).unwrap();
        queue.push("high-1", 9).unwrap();
        queue.push("low-2", 1).unwrap();
        queue.push("high-2", 9).unwrap();
        queue.push("mid", 5).unwrap();

        assert_eq!(queue.peek_priority(), Some(9));
        let order: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(order, vec!["high-1", "high-2", "mid", "low-1", "low-2"]);
    }

    #[test]
    fn test_reject_when_full() {
        let queue = PriorityQueue::new(1, OverflowPolicy::Reject);
        queue.push(1, 0).unwrap();
        assert_eq!(queue.push(2, 0).unwrap_err(), SchedulerError::QueueFull(1));
    }

    #[test]
    fn test_block_when_full_until_pop() {
        let queue = Arc::new(PriorityQueue::new(1, OverflowPolicy::Block));
        queue.push(1, 0).unwrap();

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || queue.push(2, 0))
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!producer.is_finished());

        assert_eq!(queue.pop(), Some(1));
        producer.join().unwrap().unwrap();
        assert_eq!(queue.pop(), Some(2));
    }

    #[test]
    fn test_close_drains_then_ends() {
        let queue = PriorityQueue::new(4, OverflowPolicy::Block);
        queue.push('a', 1).unwrap();
        queue.close();
        assert_eq!(queue.push('b', 1).unwrap_err(), SchedulerError::Closed);
        assert_eq!(queue.pop(), Some('a'));
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop_timeout(Duration::from_millis(5)), Err(SchedulerError::Closed));
    }

    #[test]
    fn test_pop_timeout() {
        let queue: PriorityQueue<u8> = PriorityQueue::new(4, OverflowPolicy::Block);
        assert!(matches!(
            queue.pop_timeout(Duration::from_millis(10)),
            Err(SchedulerError::Timeout { .. })
        ));
    }

    #[test]
    fn test_scheduler_runs_high_priority_first() {
        let scheduler = PriorityScheduler::new(SchedulerConfig::with_workers(1)).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        // Occupy the only worker so the rest queue up
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock();
        let task_gate = gate.clone();
        scheduler
            .spawn(0, move |_| {
                drop(task_gate.lock());
                Ok(())
            })
            .unwrap();
        thread::sleep(Duration::from_millis(30));

        for (label, priority) in [("low", 1u8), ("high", 10), ("mid", 5)] {
            let order = order.clone();
            scheduler
                .spawn(priority, move |_| {
                    order.lock().push(label);
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(scheduler.queued(), 3);

        drop(held);
        scheduler.wait_idle(Some(Duration::from_secs(10))).unwrap();
        assert_eq!(*order.lock(), vec!["high", "mid", "low"]);

        scheduler.shutdown().unwrap();
        assert_eq!(scheduler.stats().completed, 4);
    }

    #[test]
    fn test_aging_boosts_long_waiting_entries() {
        let aging = AgingPolicy {
            max_age: Duration::from_millis(20),
        };
        let queue = PriorityQueue::with_aging(8, OverflowPolicy::Reject, aging);
        queue.push("old-low", 1).unwrap();
        thread::sleep(Duration::from_millis(30));
        queue.push("new-high", 200).unwrap();
        queue.push("new-low", 1).unwrap();

        assert_eq!(queue.peek_priority(), Some(BOOSTED_PRIORITY));
        let order: Vec<_> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(order, vec!["old-low", "new-high", "new-low"]);
        assert_eq!(queue.boosted(), 1);
    }

    #[test]
    fn test_without_aging_low_priority_waits() {
        let queue = PriorityQueue::new(8, OverflowPolicy::Reject);
        queue.push("old-low", 1).unwrap();
        thread::sleep(Duration::from_millis(30));
        queue.push("new-high", 200).unwrap();

        assert_eq!(queue.try_pop(), Some("new-high"));
        assert_eq!(queue.boosted(), 0);
    }

    #[test]
    fn test_resize_grows_and_shrinks_pool() {
        let scheduler = PriorityScheduler::new(SchedulerConfig::with_workers(1)).unwrap();
        scheduler.resize(4).unwrap();
        assert_eq!(scheduler.workers(), 4);
        assert_eq!(scheduler.stats().workers, 4);

        // Four tasks meet at a barrier only a pool of four can pass
        let barrier = Arc::new(std::sync::Barrier::new(4));
        for _ in 0..4 {
            let barrier = barrier.clone();
            scheduler
                .spawn(1, move |_| {
                    barrier.wait();
                    Ok(())
                })
                .unwrap();
        }
        scheduler.wait_idle(Some(Duration::from_secs(10))).unwrap();

        scheduler.resize(2).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while scheduler.stats().workers > 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(scheduler.stats().workers, 2);

        let ran = Arc::new(Mutex::new(0));
        for _ in 0..20 {
            let ran = ran.clone();
            scheduler
                .spawn(1, move |_| {
                    *ran.lock() += 1;
                    Ok(())
                })
                .unwrap();
        }
        scheduler.wait_idle(Some(Duration::from_secs(10))).unwrap();
        assert_eq!(*ran.lock(), 20);

        // Growing again reuses the retired slots
        scheduler.resize(3).unwrap();
        assert_eq!(scheduler.stats().workers, 3);
        scheduler.shutdown().unwrap();
        assert_eq!(scheduler.resize(2).unwrap_err(), SchedulerError::ShutDown);
    }

    #[test]
    fn test_resize_rejects_bad_sizes() {
        let scheduler = PriorityScheduler::new(SchedulerConfig::with_workers(1)).unwrap();
        assert!(matches!(scheduler.resize(0), Err(SchedulerError::InvalidConfig(_))));
        assert!(matches!(
            scheduler.resize(MAX_WORKERS + 1),
            Err(SchedulerError::InvalidConfig(_))
        ));
        assert_eq!(scheduler.workers(), 1);
    }
}
