/*!
 * Shared Memory
 * The atomic memory cell every coordination primitive is built on
 */

mod region;

pub use crate::core::sync::wait::WaitOutcome;
pub use region::{RegionId, SharedRegion};
