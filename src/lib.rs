/*!
 * Coordination Kernel Library
 * Shared-memory synchronization, channels, schedulers and flow control
 * for programs made of many parallel workers
 */

pub mod core;
pub mod flow;
pub mod ipc;
pub mod memory;
pub mod monitoring;
pub mod scheduler;
pub mod worker;

// Re-exports
pub use crate::core::config::KernelConfig;
pub use crate::core::errors::*;
pub use crate::core::sync::{
    Barrier, Exchanger, RwLock, RwLockReadGuard, RwLockWriteGuard, Semaphore, SemaphorePermit,
    Spinlock, SpinlockGuard, StrategyType, SyncConfig, WaitLock, WaitLockGuard,
};
pub use crate::core::types::*;
pub use flow::{
    Backoff, BoundedPool, BreakerConfig, BreakerError, BreakerState, CircuitBreaker,
    ExhaustedPolicy, PoolConfig, PooledResource, RateLimitConfig, RateLimiter, RetryError,
    RetryPolicy,
};
pub use ipc::{
    fan_in, fan_out, ping_pong, Channel, ChannelConfig, ChannelError, ChannelStats, Pipeline,
    PipelineHandle, SendError, Topology,
};
pub use memory::{RegionId, SharedRegion, WaitOutcome};
pub use monitoring::{init_tracing, try_init_tracing, OperationSpan};
pub use scheduler::{
    AgingPolicy, OverflowPolicy, PriorityQueue, PriorityScheduler, SchedulerConfig,
    SchedulerStats, Task, TaskContext, TaskResult, WorkStealingScheduler,
};
pub use worker::{ControlMessage, WorkerContext, WorkerGroup};
