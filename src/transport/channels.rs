use std::io;

use crate::core::{Identity, Multipart, Side};
use crate::protocol::WireError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io_uring setup failed: {0}")]
    RingSetup(#[source] io::Error),

    #[error("failed to bind {side} listener on {addr}: {source}")]
    Bind {
        side: Side,
        addr: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("wait interrupted by shutdown")]
    Interrupted,

    #[error("no {side} connection for identity {identity}")]
    Unroutable { side: Side, identity: Identity },

    #[error("outbound message has no identity frame")]
    MissingIdentity,

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Which channels a wait should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub client: bool,
    pub worker: bool,
}

impl Interest {
    pub fn workers_only() -> Self {
        Self {
            client: false,
            worker: true,
        }
    }

    pub fn both() -> Self {
        Self {
            client: true,
            worker: true,
        }
    }
}

/// What a wait found. `departures` is reported regardless of interest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub client: bool,
    pub worker: bool,
    pub departures: bool,
}

impl Readiness {
    pub fn any(&self) -> bool {
        self.client || self.worker || self.departures
    }
}

/// The two identity-addressed channels the broker multiplexes.
///
/// Received messages start with the sender's identity frame; sent messages
/// start with the recipient's identity frame, which the transport consumes.
pub trait Channels {
    /// Block until a message is pending on a side in `interest` or a worker
    /// connection has gone away. `Interrupted` means stop.
    fn poll(&mut self, interest: Interest) -> Result<Readiness, TransportError>;

    /// Take the next pending message on `side`, if any.
    fn recv(&mut self, side: Side) -> Result<Option<Multipart>, TransportError>;

    fn send(&mut self, side: Side, message: Multipart) -> Result<(), TransportError>;

    /// Identities of worker connections closed since the last call.
    fn take_departed(&mut self) -> Vec<Identity>;

    /// Push queued outbound bytes to the wire before the broker exits.
    fn flush(&mut self) -> Result<(), TransportError>;
}
