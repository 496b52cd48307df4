use std::collections::VecDeque;
use std::os::fd::RawFd;

use crate::core::{Identity, Multipart, Side};
use crate::protocol::FrameBuf;
use crate::protocol::wire::encode_message;

/// One accepted peer on either channel.
pub struct Connection {
    pub id: usize,
    pub fd: RawFd,
    pub side: Side,
    pub identity: Identity,

    /// Bytes received but not yet decoded.
    pub inbound: FrameBuf,
    /// Decoded messages the broker has not taken yet.
    pub inbox: VecDeque<Multipart>,

    /// Encoded bytes waiting for the next send.
    pub outbox: Vec<u8>,
    /// Bytes owned by the in-flight send; untouched until it completes.
    pub sending: Vec<u8>,
    pub sent: usize,

    /// True if a Recv SQE is outstanding.
    pub recv_in_flight: bool,
    /// True if a Send SQE is outstanding.
    pub send_in_flight: bool,
    /// Retired: unroutable, waiting for outstanding operations to finish.
    pub closing: bool,
}

impl Connection {
    pub fn new(fd: RawFd, side: Side, identity: Identity, inbound: FrameBuf) -> Self {
        Self {
            id: 0,
            fd,
            side,
            identity,
            inbound,
            inbox: VecDeque::new(),
            outbox: Vec::new(),
            sending: Vec::new(),
            sent: 0,
            recv_in_flight: false,
            send_in_flight: false,
            closing: false,
        }
    }

    pub fn queue_message(&mut self, frames: &Multipart) {
        encode_message(frames, &mut self.outbox);
    }

    /// Move queued bytes behind the next send once the previous one is done.
    ///
    /// Returns true when there is something to post.
    pub fn stage_send(&mut self) -> bool {
        if self.send_in_flight {
            return false;
        }
        if self.sent < self.sending.len() {
            return true;
        }
        self.sending.clear();
        self.sent = 0;
        if self.outbox.is_empty() {
            return false;
        }
        std::mem::swap(&mut self.sending, &mut self.outbox);
        true
    }

    /// Reading stays parked while an undelivered message is held, leaving
    /// further bytes in the socket buffer.
    pub fn wants_recv(&self) -> bool {
        !self.closing && !self.recv_in_flight && self.inbox.is_empty()
    }

    pub fn has_pending_output(&self) -> bool {
        self.send_in_flight || self.sent < self.sending.len() || !self.outbox.is_empty()
    }

    pub fn in_flight(&self) -> bool {
        self.recv_in_flight || self.send_in_flight
    }

    pub fn is_reapable(&self) -> bool {
        self.closing && !self.in_flight() && self.inbox.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        Connection::new(-1, Side::Worker, Identity::from_sequence(1), FrameBuf::with_capacity(64, 64))
    }

    #[test]
    fn test_stage_send_batches_outbox() {
        let mut c = conn();
        assert!(!c.stage_send());

        c.queue_message(&vec![b"a".to_vec()]);
        c.queue_message(&vec![b"b".to_vec()]);
        assert!(c.stage_send());
        assert_eq!(c.sending.len(), 12);
        assert!(c.outbox.is_empty());

        c.send_in_flight = true;
        c.queue_message(&vec![b"c".to_vec()]);
        assert!(!c.stage_send());

        // partial send keeps the same buffer
        c.send_in_flight = false;
        c.sent = 4;
        assert!(c.stage_send());
        assert_eq!(c.sending.len(), 12);

        c.sent = 12;
        assert!(c.stage_send());
        assert_eq!(c.sending.len(), 6);
        assert_eq!(c.sent, 0);
    }

    #[test]
    fn test_recv_parks_while_inbox_full() {
        let mut c = conn();
        assert!(c.wants_recv());
        c.inbox.push_back(vec![b"READY".to_vec()]);
        assert!(!c.wants_recv());
        c.inbox.clear();
        c.closing = true;
        assert!(!c.wants_recv());
        assert!(c.is_reapable());
        c.recv_in_flight = true;
        assert!(!c.is_reapable());
    }
}
