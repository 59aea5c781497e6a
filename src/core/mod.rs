/*!
 * Core Module
 * Fundamental types, limits, configuration and synchronization primitives
 */

pub mod config;
pub mod errors;
pub mod limits;
pub mod sync;
pub mod types;

// Re-export for convenience
pub use errors::*;
pub use types::*;
