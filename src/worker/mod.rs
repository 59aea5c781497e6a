/*!
 * Worker Boundary
 * Message-driven worker threads and the control protocol they speak
 */

mod group;
mod message;

pub use group::{WorkerContext, WorkerGroup};
pub use message::ControlMessage;
