//! Identity-addressed message channels
//!
//! This module provides the broker's view of the network:
//! - `Channels`: the seam between dispatch logic and transport
//! - `Reactor`: io_uring event loop serving both listeners
//! - Connection slab and io_uring operation helpers

pub mod channels;
pub mod connection;
pub mod connection_pool;
pub mod reactor;
pub mod uring_ops;

#[cfg(test)]
pub(crate) mod memory;

pub use channels::{Channels, Interest, Readiness, TransportError};
pub use reactor::Reactor;
