/*!
 * Channel Module
 * CSP-style bounded channels between workers
 */

mod channel;
mod types;

pub use channel::{Channel, Iter};
pub use types::{ChannelConfig, ChannelError, ChannelStats, SendError};
