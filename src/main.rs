/*!
 * Coordination Kernel - Demo Entry Point
 *
 * Runs every primitive against a shared region and reports what happened:
 * - Atomic counter, spinlock and barrier across worker threads
 * - Exchanger, pipeline, fan-out/fan-in and ping-pong over channels
 * - Work-stealing and priority schedulers
 * - Circuit breaker, rate limiter, retry and bounded pool
 * - Message-driven worker group
 *
 * Configuration comes from COORD_CONFIG (JSON file) and COORD_WORKERS.
 */

use coord_kernel::{
    fan_in, fan_out, init_tracing, ping_pong, Barrier, BoundedPool, BreakerError, Channel,
    ChannelError, CircuitBreaker, ControlMessage, CoordError, CoordResult, Exchanger,
    KernelConfig, OperationSpan, Pipeline, PriorityScheduler, RateLimiter, SharedRegion,
    Spinlock, SyncError, Task, WorkStealingScheduler, WorkerGroup,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

const COUNTER_INCREMENTS: i32 = 10_000;
const BARRIER_ROUNDS: i32 = 5;
const STEALING_TASKS: u64 = 1_000;

fn main() -> miette::Result<()> {
    init_tracing();

    info!("Coordination kernel demo starting...");
    let config = KernelConfig::from_env()?;
    let workers = config.scheduler.workers;
    info!(
        workers,
        region_slots = config.region_slots,
        strategy = ?config.sync.select_strategy(),
        "Configuration loaded"
    );

    let region = SharedRegion::with_config(config.region_slots, config.sync.clone())
        .map_err(CoordError::from)?;
    info!(region = %region.id(), strategy = region.strategy_name(), "Shared region ready");

    run("counter", || counter(&region, workers))?;
    run("spinlock", || spinlock(&region, workers))?;
    run("barrier", || barrier(&region, workers))?;
    run("exchanger", || exchanger(&region))?;
    run("pipeline", pipeline)?;
    run("fan_out_fan_in", || fan_out_fan_in(&config, workers))?;
    run("ping_pong", || {
        let completed = ping_pong(100)?;
        info!(completed, "Ping-pong round trips");
        Ok(())
    })?;
    run("work_stealing", || work_stealing(&config))?;
    run("priority", || priority(&config))?;
    run("circuit_breaker", || circuit_breaker(&config))?;
    run("rate_limiter", || rate_limiter(&config))?;
    run("retry", || retry(&config))?;
    run("pool", || pool(&region, &config, workers))?;
    run("worker_group", || worker_group(&region, workers))?;

    info!(slots_used = region.len() - region.unreserved(), "All scenarios complete");
    Ok(())
}

fn run<F>(name: &str, scenario: F) -> CoordResult<()>
where
    F: FnOnce() -> CoordResult<()>,
{
    let span = OperationSpan::new(name);
    let _entered = span.enter();
    let result = scenario();
    match &result {
        Ok(()) => span.record_result(true),
        Err(e) => span.record_error(&e.to_string()),
    }
    result
}

fn join_all(handles: Vec<thread::JoinHandle<CoordResult<()>>>) -> CoordResult<()> {
    for handle in handles {
        handle
            .join()
            .map_err(|_| SyncError::InvalidArgument("demo thread panicked".into()))??;
    }
    Ok(())
}

fn counter(region: &SharedRegion, workers: usize) -> CoordResult<()> {
    let slot = region.reserve(1)?;
    let handles = (0..workers)
        .map(|_| {
            let region = region.clone();
            thread::spawn(move || -> CoordResult<()> {
                for _ in 0..COUNTER_INCREMENTS {
                    region.add(slot, 1)?;
                }
                Ok(())
            })
        })
        .collect();
    join_all(handles)?;

    let expected = COUNTER_INCREMENTS * workers as i32;
    let total = region.load(slot)?;
    info!(total, expected, lost = expected - total, "Atomic counter");
    Ok(())
}

fn spinlock(region: &SharedRegion, workers: usize) -> CoordResult<()> {
    let lock = Spinlock::new(region)?;
    let slot = region.reserve(1)?;
    let handles = (0..workers)
        .map(|_| {
            let (lock, region) = (lock.clone(), region.clone());
            thread::spawn(move || -> CoordResult<()> {
                for _ in 0..1_000 {
                    let _guard = lock.lock()?;
                    // Plain read-modify-write, correct only under the lock
                    let value = region.load(slot)?;
                    region.store(slot, value + 1)?;
                }
                Ok(())
            })
        })
        .collect();
    join_all(handles)?;

    let stats = lock.stats();
    info!(
        total = region.load(slot)?,
        acquisitions = stats.acquisitions,
        total_spins = stats.total_spins,
        "Spinlock counter"
    );
    Ok(())
}

fn barrier(region: &SharedRegion, workers: usize) -> CoordResult<()> {
    let parties = i32::try_from(workers)
        .map_err(|_| SyncError::InvalidArgument(format!("too many parties: {}", workers)))?;
    let barrier = Barrier::new(region, parties)?;
    let handles = (0..workers)
        .map(|_| {
            let barrier = barrier.clone();
            thread::spawn(move || -> CoordResult<()> {
                for _ in 0..BARRIER_ROUNDS {
                    barrier.arrive()?;
                }
                Ok(())
            })
        })
        .collect();
    join_all(handles)?;

    info!(parties, phase = barrier.phase(), rounds = BARRIER_ROUNDS, "Barrier phases");
    Ok(())
}

fn exchanger(region: &SharedRegion) -> CoordResult<()> {
    let exchanger: Exchanger<String> = Exchanger::new(region)?;
    let peer = exchanger.clone();
    let left = thread::spawn(move || peer.exchange("from left".to_string(), None));
    let right = exchanger.exchange("from right".to_string(), None)?;
    let left = left
        .join()
        .map_err(|_| SyncError::InvalidArgument("exchanger peer panicked".into()))??;
    info!(left = %left, right = %right, "Exchanger swapped values");
    Ok(())
}

fn pipeline() -> CoordResult<()> {
    let pipeline = Pipeline::<i64>::new(4)?
        .stage("square", |x| x * x)?
        .stage("offset", |x| x + 1)?
        .build();

    for x in 1..=10 {
        pipeline.input().send(x).map_err(ChannelError::from)?;
    }
    pipeline.input().close();

    let sum: i64 = pipeline.output().iter().sum();
    pipeline.join()?;
    info!(sum, stages = 2, "Pipeline drained");
    Ok(())
}

fn fan_out_fan_in(config: &KernelConfig, workers: usize) -> CoordResult<()> {
    let capacity = config.channel.capacity;
    let evens: Channel<u64> = Channel::new(capacity)?;
    let odds: Channel<u64> = Channel::new(capacity)?;

    let producers = [(evens.clone(), 0u64), (odds.clone(), 1u64)].map(|(channel, start)| {
        thread::spawn(move || {
            for n in (start..100).step_by(2) {
                if channel.send(n).is_err() {
                    break;
                }
            }
            channel.close();
        })
    });

    let merged = fan_in(vec![evens, odds], capacity)?;
    let doubled = fan_out(merged.output().clone(), workers, |n| n * 2)?;
    let total: u64 = doubled.output().iter().sum();

    for producer in producers {
        producer
            .join()
            .map_err(|_| SyncError::InvalidArgument("producer panicked".into()))?;
    }
    merged.join()?;
    doubled.join()?;
    info!(total, workers, "Fan-out/fan-in total");
    Ok(())
}

fn work_stealing(config: &KernelConfig) -> CoordResult<()> {
    let scheduler = WorkStealingScheduler::new(config.scheduler)?;
    let done = Arc::new(std::sync::atomic::AtomicU64::new(0));

    for i in 0..STEALING_TASKS {
        let done = done.clone();
        scheduler.spawn(move |ctx| {
            done.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            // Every tenth task fans out a child onto its own worker's deque
            if i % 10 == 0 {
                let done = done.clone();
                ctx.spawn(Task::new(move |_| {
                    done.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                    Ok(())
                }))
                .map_err(|e| e.to_string())?;
            }
            Ok(())
        })?;
    }
    scheduler.wait_idle(Some(Duration::from_secs(30)))?;

    let stats = scheduler.stats();
    info!(
        executed = done.load(std::sync::atomic::Ordering::Relaxed),
        completed = stats.completed,
        steals = stats.steals,
        per_worker = ?stats.per_worker,
        "Work-stealing run"
    );
    scheduler.shutdown()?;
    Ok(())
}

fn priority(config: &KernelConfig) -> CoordResult<()> {
    let mut single = config.scheduler;
    single.workers = 1;
    let scheduler = PriorityScheduler::new(single)?;
    let order = Arc::new(Mutex::new(Vec::new()));

    // Hold the only worker so the queue fills before anything runs
    let gate = Arc::new(Mutex::new(()));
    let held = gate.lock();
    {
        let gate = gate.clone();
        scheduler.spawn(u8::MAX, move |_| {
            drop(gate.lock());
            Ok(())
        })?;
    }
    thread::sleep(Duration::from_millis(10));

    for (name, prio) in [("low", 1u8), ("high", 9), ("medium", 5), ("high-2", 9)] {
        let order = order.clone();
        scheduler.spawn(prio, move |_| {
            order.lock().push(name);
            Ok(())
        })?;
    }
    drop(held);
    scheduler.wait_idle(Some(Duration::from_secs(10)))?;

    info!(order = ?order.lock(), "Priority execution order");
    scheduler.shutdown()?;
    Ok(())
}

fn circuit_breaker(config: &KernelConfig) -> CoordResult<()> {
    let breaker = CircuitBreaker::new(config.breaker);
    for _ in 0..config.breaker.threshold {
        let _ = breaker.call(|| Err::<(), _>("backend down"));
    }
    let rejected = matches!(breaker.call(|| Ok::<_, &str>(())), Err(BreakerError::Open));
    info!(
        state = ?breaker.state(),
        rejected_without_running = rejected,
        "Circuit breaker after failures"
    );
    Ok(())
}

fn rate_limiter(config: &KernelConfig) -> CoordResult<()> {
    let limiter = RateLimiter::from_config(config.rate_limit);
    let attempts = config.rate_limit.limit + config.rate_limit.limit / 2;
    let admitted = (0..attempts).filter(|_| limiter.allow()).count();
    info!(
        attempts,
        admitted,
        retry_after = ?limiter.retry_after(),
        "Rate limiter window"
    );
    Ok(())
}

fn retry(config: &KernelConfig) -> CoordResult<()> {
    let policy = config.retry;
    let result = policy.retry(|attempt| {
        if attempt < 3 {
            Err(format!("transient failure on attempt {}", attempt))
        } else {
            Ok(attempt)
        }
    });
    match result {
        Ok(attempt) => info!(attempt, "Retry succeeded"),
        Err(e) => warn!(attempts = e.attempts, last = %e.last, "Retry gave up"),
    }
    Ok(())
}

fn pool(region: &SharedRegion, config: &KernelConfig, workers: usize) -> CoordResult<()> {
    let connections = (0..2).map(|i| format!("conn-{}", i)).collect();
    let pool = Arc::new(BoundedPool::with_region(region, connections, config.pool)?);

    let handles = (0..workers)
        .map(|w| {
            let pool = pool.clone();
            thread::spawn(move || -> CoordResult<()> {
                let conn = pool.acquire()?;
                info!(worker = w, connection = conn.as_str(), "Checked out connection");
                thread::sleep(Duration::from_millis(5));
                Ok(())
            })
        })
        .collect();
    join_all(handles)?;

    info!(capacity = pool.capacity(), available = pool.available(), "Pool drained");
    Ok(())
}

fn worker_group(region: &SharedRegion, workers: usize) -> CoordResult<()> {
    let group = WorkerGroup::spawn(workers, region, |ctx, _task, payload| {
        let n = payload.as_u64().ok_or("payload must be a number")?;
        ctx.progress(0.5, "squaring");
        Ok(json!(n * n))
    })?;
    group.start()?;
    for task_id in 0..8u64 {
        group.dispatch(task_id, json!(task_id))?;
    }
    let reports = group.join()?;

    let mut total = 0;
    for report in reports {
        match report {
            ControlMessage::Result { payload, .. } => total += payload.as_u64().unwrap_or(0),
            ControlMessage::Error { message, .. } => warn!(error = %message, "Worker task failed"),
            _ => {}
        }
    }
    info!(total, "Worker group results");
    Ok(())
}
