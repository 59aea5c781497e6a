/*!
 * Rendezvous Primitives
 * Points where parties block until enough counterparts arrive
 */

mod barrier;
mod exchanger;

pub use barrier::Barrier;
pub use exchanger::Exchanger;
