//! Typed views over the two broker channels
//!
//! The adapters borrow the transport for the length of one operation and
//! translate between raw multi-part messages and broker events. They hold no
//! state of their own; the dispatch loop owns the transport.

use crate::core::constants::READY;
use crate::core::{ClientIdentity, Frame, Identity, Side, WorkerIdentity};
use crate::protocol::envelope::{self, Envelope, EnvelopeError};
use crate::transport::{Channels, TransportError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("protocol violation on {side} channel from {peer}: {reason}")]
pub struct ProtocolViolation {
    pub side: Side,
    pub peer: Identity,
    pub reason: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Malformed(#[from] EnvelopeError),

    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub client: ClientIdentity,
    pub payload: Frame,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Ready {
        worker: WorkerIdentity,
    },
    Reply {
        worker: WorkerIdentity,
        client: ClientIdentity,
        payload: Frame,
    },
}

// ============================================================================
// Client-facing channel
// ============================================================================

pub struct ClientEndpoint<'a, C: Channels + ?Sized> {
    channels: &'a mut C,
}

impl<'a, C: Channels + ?Sized> ClientEndpoint<'a, C> {
    pub fn new(channels: &'a mut C) -> Self {
        Self { channels }
    }

    /// Next `[client, "", request]`, if one is pending.
    pub fn recv_request(&mut self) -> Result<Option<ClientRequest>, EndpointError> {
        let Some(message) = self.channels.recv(Side::Client)? else {
            return Ok(None);
        };
        let env = envelope::decode(message)?;
        let (client, payload) = single_hop(Side::Client, env)?;
        Ok(Some(ClientRequest { client, payload }))
    }

    pub fn send_reply(
        &mut self,
        client: &ClientIdentity,
        payload: Frame,
    ) -> Result<(), TransportError> {
        let frames = envelope::encode(std::slice::from_ref(client), payload);
        self.channels.send(Side::Client, frames)
    }
}

// ============================================================================
// Worker-facing channel
// ============================================================================

pub struct WorkerEndpoint<'a, C: Channels + ?Sized> {
    channels: &'a mut C,
}

impl<'a, C: Channels + ?Sized> WorkerEndpoint<'a, C> {
    pub fn new(channels: &'a mut C) -> Self {
        Self { channels }
    }

    /// Next READY announcement or reply, if one is pending.
    ///
    /// Accepted shapes are `[worker, "", "READY"]` and
    /// `[worker, "", client, "", reply]`.
    pub fn recv(&mut self) -> Result<Option<WorkerEvent>, EndpointError> {
        let Some(message) = self.channels.recv(Side::Worker)? else {
            return Ok(None);
        };
        let env = envelope::decode(message)?;
        if env.route.len() != 1 {
            return Err(violation(env.origin(), "worker message with nested routing").into());
        }
        let worker = env.origin().clone();

        if env.payload() == Some(READY) {
            return Ok(Some(WorkerEvent::Ready { worker }));
        }

        let Ok(reply) = envelope::decode(env.body) else {
            return Err(violation(&worker, "expected READY or a reply envelope").into());
        };
        if reply.route.len() != 1 {
            return Err(violation(&worker, "reply addressed through more than one hop").into());
        }
        let client = reply.origin().clone();
        let Some(payload) = reply.into_payload() else {
            return Err(violation(&worker, "reply payload must be a single frame").into());
        };

        Ok(Some(WorkerEvent::Reply {
            worker,
            client,
            payload,
        }))
    }

    /// Send `["", client, "", request]` to `worker`.
    pub fn send_request(
        &mut self,
        worker: &WorkerIdentity,
        client: &ClientIdentity,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let inner = envelope::encode(std::slice::from_ref(client), payload.to_vec());
        let frames = envelope::encode_body(std::slice::from_ref(worker), inner);
        self.channels.send(Side::Worker, frames)
    }

    pub fn take_departed(&mut self) -> Vec<WorkerIdentity> {
        self.channels.take_departed()
    }
}

fn single_hop(side: Side, env: Envelope) -> Result<(Identity, Frame), ProtocolViolation> {
    if env.route.len() != 1 {
        return Err(violation_on(side, env.origin(), "expected exactly one identity frame"));
    }
    let peer = env.origin().clone();
    match env.into_payload() {
        Some(payload) => Ok((peer, payload)),
        None => Err(violation_on(side, &peer, "payload must be a single frame")),
    }
}

fn violation(peer: &Identity, reason: &'static str) -> ProtocolViolation {
    violation_on(Side::Worker, peer, reason)
}

fn violation_on(side: Side, peer: &Identity, reason: &'static str) -> ProtocolViolation {
    ProtocolViolation {
        side,
        peer: peer.clone(),
        reason,
    }
}
