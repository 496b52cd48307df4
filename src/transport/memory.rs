//! In-process `Channels` for exercising the broker without sockets.
//!
//! A wait with nothing pending returns `Interrupted`, so a dispatch loop
//! driven by this transport runs until it has consumed everything it is
//! allowed to read and then stops.

use std::collections::{HashSet, VecDeque};

use crate::core::{Identity, Multipart, Side};

use super::{Channels, Interest, Readiness, TransportError};

#[derive(Default)]
pub struct MemoryChannels {
    inbound: [VecDeque<Multipart>; 2],
    sent: [Vec<Multipart>; 2],
    departed: Vec<Identity>,
    unroutable: HashSet<Identity>,
    pub polls: Vec<Interest>,
}

impl MemoryChannels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_inbound(&mut self, side: Side, message: Multipart) {
        self.inbound[side.index()].push_back(message);
    }

    pub fn pending(&self, side: Side) -> usize {
        self.inbound[side.index()].len()
    }

    pub fn sent(&self, side: Side) -> &[Multipart] {
        &self.sent[side.index()]
    }

    pub fn take_sent(&mut self, side: Side) -> Vec<Multipart> {
        std::mem::take(&mut self.sent[side.index()])
    }

    /// Simulate a worker connection closing.
    pub fn depart(&mut self, worker: Identity) {
        self.unroutable.insert(worker.clone());
        self.departed.push(worker);
    }

    /// Make sends to `identity` fail without reporting a departure.
    pub fn vanish(&mut self, identity: Identity) {
        self.unroutable.insert(identity);
    }
}

impl Channels for MemoryChannels {
    fn poll(&mut self, interest: Interest) -> Result<Readiness, TransportError> {
        self.polls.push(interest);
        let readiness = Readiness {
            client: interest.client && self.pending(Side::Client) > 0,
            worker: interest.worker && self.pending(Side::Worker) > 0,
            departures: !self.departed.is_empty(),
        };
        if readiness.any() {
            Ok(readiness)
        } else {
            Err(TransportError::Interrupted)
        }
    }

    fn recv(&mut self, side: Side) -> Result<Option<Multipart>, TransportError> {
        Ok(self.inbound[side.index()].pop_front())
    }

    fn send(&mut self, side: Side, message: Multipart) -> Result<(), TransportError> {
        let Some(first) = message.first() else {
            return Err(TransportError::MissingIdentity);
        };
        let identity = Identity::from(first.as_slice());
        if self.unroutable.contains(&identity) {
            return Err(TransportError::Unroutable { side, identity });
        }
        self.sent[side.index()].push(message);
        Ok(())
    }

    fn take_departed(&mut self) -> Vec<Identity> {
        std::mem::take(&mut self.departed)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
