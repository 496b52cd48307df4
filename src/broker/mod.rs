//! Load-balancing broker
//!
//! This module provides the broker core:
//! - `WorkerQueue`: LRU queue of idle workers
//! - Endpoint adapters translating channel messages into broker events
//! - `DispatchLoop`: the routing state machine
//! - `Broker`: dispatch loop bound to the io_uring transport

pub mod config;
pub mod dispatch;
pub mod endpoints;
pub mod worker_queue;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tracing::info;

use crate::core::Side;
use crate::transport::{Reactor, TransportError};

pub use config::{BrokerConfig, ConfigError};
pub use dispatch::{DispatchError, DispatchLoop, DispatchOutcome, DispatchStats};
pub use endpoints::{ClientRequest, EndpointError, ProtocolViolation, WorkerEvent};
pub use worker_queue::{Enqueued, PoolError, WorkerQueue};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// A bound broker, ready to run on the current thread.
pub struct Broker {
    dispatch: DispatchLoop<Reactor>,
    shutdown: Arc<AtomicBool>,
    client_addr: SocketAddr,
    worker_addr: SocketAddr,
}

impl Broker {
    pub fn bind(config: BrokerConfig) -> Result<Self, BrokerError> {
        config.validate()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let reactor = Reactor::bind(&config, Arc::clone(&shutdown))?;
        let client_addr = reactor.local_addr(Side::Client).map_err(TransportError::from)?;
        let worker_addr = reactor.local_addr(Side::Worker).map_err(TransportError::from)?;

        Ok(Self {
            dispatch: DispatchLoop::new(reactor, config.worker_capacity, config.message_limit),
            shutdown,
            client_addr,
            worker_addr,
        })
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn worker_addr(&self) -> SocketAddr {
        self.worker_addr
    }

    /// Setting this flag makes `run` return `Interrupted` within one tick.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run until the message limit is reached or shutdown is requested.
    ///
    /// Every connection is closed when this returns.
    pub fn run(mut self) -> Result<(DispatchOutcome, DispatchStats), BrokerError> {
        info!(client = %self.client_addr, worker = %self.worker_addr, "broker running");
        let outcome = self.dispatch.run()?;
        let stats = self.dispatch.stats().clone();
        info!(?outcome, ?stats, "broker stopped");
        Ok((outcome, stats))
    }
}
