/*!
 * Scheduler Module
 * Task execution over worker pools: work stealing and priority with opt-in aging
 */

mod atomic_stats;
mod idle;
mod priority;
mod stealing;
mod task;
mod types;

pub use priority::{PriorityQueue, PriorityScheduler, BOOSTED_PRIORITY};
pub use stealing::WorkStealingScheduler;
pub(crate) use task::panic_message;
pub use task::{Task, TaskContext, TaskResult};
pub use types::{AgingPolicy, OverflowPolicy, SchedulerConfig, SchedulerStats};
