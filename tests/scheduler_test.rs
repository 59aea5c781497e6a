/*!
 * Scheduler Integration Tests
 *
 * Exactly-once execution under work stealing, priority ordering
 * properties, overflow policies and shutdown behavior
 */

use coord_kernel::{
    AgingPolicy, OverflowPolicy, PriorityQueue, PriorityScheduler, SchedulerConfig, SchedulerError, Task,
    WorkStealingScheduler,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const TASKS: usize = 1_000;
const WORKERS: usize = 4;

fn counters(n: usize) -> Arc<Vec<AtomicU32>> {
    Arc::new((0..n).map(|_| AtomicU32::new(0)).collect())
}

#[test]
fn test_work_stealing_runs_each_task_exactly_once() {
    for _ in 0..5 {
        let scheduler = WorkStealingScheduler::new(SchedulerConfig::with_workers(WORKERS)).unwrap();
        let runs = counters(TASKS);

        for i in 0..TASKS {
            let runs = runs.clone();
            scheduler
                .spawn(move |_| {
                    runs[i].fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
        scheduler.wait_idle(Some(Duration::from_secs(30))).unwrap();

        assert!(runs.iter().all(|r| r.load(Ordering::SeqCst) == 1));
        let stats = scheduler.stats();
        assert_eq!(stats.completed, TASKS as u64);
        assert_eq!(stats.per_worker.iter().sum::<u64>(), TASKS as u64);
        assert_eq!(stats.outstanding, 0);
        scheduler.shutdown().unwrap();
    }
}

#[test]
fn test_spawned_children_are_stolen_and_counted_once() {
    let scheduler = WorkStealingScheduler::new(SchedulerConfig::with_workers(WORKERS)).unwrap();
    let runs = counters(100 * 11);

    for parent in 0..100 {
        let runs = runs.clone();
        scheduler
            .spawn(move |ctx| {
                runs[parent * 11].fetch_add(1, Ordering::SeqCst);
                for child in 1..=10 {
                    let runs = runs.clone();
                    ctx.spawn(Task::new(move |_| {
                        // Uneven work gives idle peers something to steal
                        let spin = rand::thread_rng().gen_range(0..2_000);
                        for _ in 0..spin {
                            std::hint::spin_loop();
                        }
                        runs[parent * 11 + child].fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }))
                    .map_err(|e| e.to_string())?;
                }
                Ok(())
            })
            .unwrap();
    }
    scheduler.wait_idle(Some(Duration::from_secs(30))).unwrap();

    assert!(runs.iter().all(|r| r.load(Ordering::SeqCst) == 1));
    let stats = scheduler.stats();
    assert_eq!(stats.completed, 1_100);
    assert_eq!(stats.local_spawns, 1_000);
    scheduler.shutdown().unwrap();
}

#[test]
fn test_failures_are_reported_not_fatal() {
    let scheduler = WorkStealingScheduler::new(SchedulerConfig::with_workers(2)).unwrap();
    for i in 0..20 {
        scheduler
            .spawn(move |_| match i % 4 {
                0 => Err(format!("task {} failed", i)),
                1 => panic!("task {} panicked", i),
                _ => Ok(()),
            })
            .unwrap();
    }
    scheduler.wait_idle(Some(Duration::from_secs(10))).unwrap();

    let stats = scheduler.stats();
    assert_eq!(stats.failed, 10);
    assert_eq!(stats.completed, 10);
    scheduler.shutdown().unwrap();
}

#[test]
fn test_submit_after_shutdown_fails() {
    let scheduler = WorkStealingScheduler::new(SchedulerConfig::with_workers(2)).unwrap();
    scheduler.shutdown().unwrap();
    scheduler.shutdown().unwrap();
    assert!(matches!(
        scheduler.spawn(|_| Ok(())),
        Err(SchedulerError::ShutDown)
    ));
}

#[test]
fn test_invalid_configs_rejected() {
    assert!(WorkStealingScheduler::new(SchedulerConfig::with_workers(0)).is_err());
    assert!(PriorityScheduler::new(SchedulerConfig {
        queue_capacity: 0,
        ..Default::default()
    })
    .is_err());
}

#[test]
fn test_priority_scheduler_orders_queued_work() {
    let scheduler = PriorityScheduler::new(SchedulerConfig::with_workers(1)).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    // Occupy the single worker until everything below is queued
    let gate = Arc::new(Mutex::new(()));
    let held = gate.lock().unwrap();
    {
        let gate = gate.clone();
        scheduler
            .spawn(255, move |_| {
                drop(gate.lock().unwrap());
                Ok(())
            })
            .unwrap();
    }
    while scheduler.queued() > 0 {
        thread::sleep(Duration::from_millis(1));
    }

    for (label, priority) in [("a", 1u8), ("b", 7), ("c", 3), ("d", 7), ("e", 1)] {
        let order = order.clone();
        scheduler
            .spawn(priority, move |_| {
                order.lock().unwrap().push(label);
                Ok(())
            })
            .unwrap();
    }
    drop(held);
    scheduler.wait_idle(Some(Duration::from_secs(10))).unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["b", "d", "c", "a", "e"]);
    scheduler.shutdown().unwrap();
}

#[test]
fn test_aged_low_priority_work_overtakes_fresh_high_priority() {
    let config = SchedulerConfig {
        aging: Some(AgingPolicy {
            max_age: Duration::from_millis(20),
        }),
        ..SchedulerConfig::with_workers(1)
    };
    let scheduler = PriorityScheduler::new(config).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let gate = Arc::new(Mutex::new(()));
    let held = gate.lock().unwrap();
    {
        let gate = gate.clone();
        scheduler
            .spawn(255, move |_| {
                drop(gate.lock().unwrap());
                Ok(())
            })
            .unwrap();
    }
    while scheduler.queued() > 0 {
        thread::sleep(Duration::from_millis(1));
    }

    let push = |label: &'static str, priority: u8| {
        let order = order.clone();
        scheduler
            .spawn(priority, move |_| {
                order.lock().unwrap().push(label);
                Ok(())
            })
            .unwrap();
    };
    push("old-low", 0);
    thread::sleep(Duration::from_millis(50));
    push("new-high", 200);
    drop(held);
    scheduler.wait_idle(Some(Duration::from_secs(10))).unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["old-low", "new-high"]);
    assert!(scheduler.boosted() >= 1);
    scheduler.shutdown().unwrap();
}

#[test]
fn test_resized_pool_keeps_running_every_task() {
    let scheduler = PriorityScheduler::new(SchedulerConfig::with_workers(2)).unwrap();
    let runs = counters(300);

    for (round, size) in [6, 1, 3].into_iter().enumerate() {
        scheduler.resize(size).unwrap();
        assert_eq!(scheduler.workers(), size);
        for i in 0..100 {
            let id = round * 100 + i;
            let runs = runs.clone();
            scheduler
                .spawn((id % 5) as u8, move |_| {
                    runs[id].fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
        }
    }
    scheduler.wait_idle(Some(Duration::from_secs(10))).unwrap();
    assert!(runs.iter().all(|r| r.load(Ordering::SeqCst) == 1));

    scheduler.shutdown().unwrap();
    assert_eq!(scheduler.resize(2), Err(SchedulerError::ShutDown));
}

#[test]
fn test_priority_queue_overflow_policies() {
    let rejecting = PriorityQueue::new(2, OverflowPolicy::Reject);
    rejecting.push(1, 0).unwrap();
    rejecting.push(2, 0).unwrap();
    assert_eq!(rejecting.push(3, 9), Err(SchedulerError::QueueFull(2)));

    let blocking = Arc::new(PriorityQueue::new(1, OverflowPolicy::Block));
    blocking.push("first", 0).unwrap();
    let pusher = {
        let blocking = blocking.clone();
        thread::spawn(move || blocking.push("second", 0))
    };
    thread::sleep(Duration::from_millis(30));
    assert_eq!(blocking.len(), 1);

    assert_eq!(blocking.pop(), Some("first"));
    pusher.join().unwrap().unwrap();
    assert_eq!(blocking.pop(), Some("second"));

    blocking.close();
    assert_eq!(blocking.pop(), None);
    assert_eq!(blocking.push("late", 0), Err(SchedulerError::Closed));
}

proptest! {
    #[test]
    fn prop_priority_queue_is_stable_by_priority(priorities in prop::collection::vec(any::<u8>(), 0..200)) {
        let queue = PriorityQueue::new(priorities.len().max(1), OverflowPolicy::Reject);
        for (index, &priority) in priorities.iter().enumerate() {
            queue.push(index, priority).unwrap();
        }
        queue.close();

        let popped: Vec<usize> = std::iter::from_fn(|| queue.pop()).collect();

        let mut expected: Vec<usize> = (0..priorities.len()).collect();
        expected.sort_by_key(|&i| std::cmp::Reverse(priorities[i]));
        prop_assert_eq!(popped, expected);
    }
}
