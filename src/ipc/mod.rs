/*!
 * IPC Module
 * Message passing between workers: CSP channels and the topologies built from them
 */

pub mod channel;
pub mod topology;

pub use channel::{Channel, ChannelConfig, ChannelError, ChannelStats, SendError};
pub use topology::{fan_in, fan_out, ping_pong, Pipeline, PipelineHandle, Topology};
