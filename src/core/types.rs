/*!
 * Core Types
 * Common types used across the coordination layer
 */

/// Worker identifier (stable for the lifetime of a worker)
pub type WorkerId = u32;

/// Task identifier, unique per scheduler
pub type TaskId = u64;

/// Priority level (0-255, higher is more important)
pub type Priority = u8;

/// Barrier phase number
pub type Phase = i32;

/// Index of a slot inside a shared region
pub type SlotIndex = usize;

/// Common result type for coordination operations
pub type CoordResult<T> = Result<T, super::errors::CoordError>;
