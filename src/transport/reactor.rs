use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use io_uring::{IoUring, types};
use tracing::{debug, info, trace, warn};

use crate::broker::config::BrokerConfig;
use crate::core::constants::FLUSH_MAX_TICKS;
use crate::core::operation::Operation;
use crate::core::socket::{make_listener, set_nodelay_raw};
use crate::core::user_data::unpack_user_data;
use crate::core::{Identity, Multipart, Side};
use crate::protocol::FrameBuf;
use crate::protocol::wire::{WireError, peek_message};
use crate::util::fd::{close_fd_quiet, shutdown_fd_quiet};

use super::channels::{Channels, Interest, Readiness, TransportError};
use super::connection::Connection;
use super::connection_pool::ConnectionPool;
use super::uring_ops::{post_accept, post_recv, post_send, post_tick};

/// io_uring event loop serving both broker channels
///
/// Owns the two listeners and every accepted connection. Each accepted peer
/// is assigned a fresh identity; inbound messages are surfaced with that
/// identity prepended and outbound messages are routed by it.
pub struct Reactor {
    // dropped first so the kernel releases connection buffers before they go
    ring: IoUring,
    connections: ConnectionPool,
    listeners: [TcpListener; 2],
    routes: [HashMap<Identity, usize>; 2],
    ready: [VecDeque<usize>; 2],
    departed: Vec<Identity>,
    next_identity: u32,
    tick: Box<types::Timespec>,
    tick_interval: Duration,
    tick_armed: bool,
    io_buffer_capacity: usize,
    max_frame_size: usize,
    shutdown: Arc<AtomicBool>,
    stopping: bool,
}

impl Reactor {
    /// Create the ring, bind both listeners and prime their accepts.
    pub fn bind(config: &BrokerConfig, shutdown: Arc<AtomicBool>) -> Result<Self, TransportError> {
        let ring = IoUring::new(config.ring_size).map_err(TransportError::RingSetup)?;

        let bind = |side: Side, addr: SocketAddr| {
            make_listener(addr).map_err(|source| TransportError::Bind { side, addr, source })
        };
        let client = bind(Side::Client, config.client_addr)?;
        let worker = bind(Side::Worker, config.worker_addr)?;

        let tick = types::Timespec::new()
            .sec(config.tick.as_secs())
            .nsec(config.tick.subsec_nanos());

        let mut reactor = Self {
            ring,
            connections: ConnectionPool::new(config.pool_capacity),
            listeners: [client, worker],
            routes: [HashMap::new(), HashMap::new()],
            ready: [VecDeque::new(), VecDeque::new()],
            departed: Vec::new(),
            next_identity: 1,
            tick: Box::new(tick),
            tick_interval: config.tick,
            tick_armed: false,
            io_buffer_capacity: config.io_buffer_capacity,
            max_frame_size: config.max_frame_size,
            shutdown,
            stopping: false,
        };

        // Prime the accept pipeline
        for side in Side::ALL {
            let fd = reactor.listener_fd(side);
            for _ in 0..config.initial_accepts {
                post_accept(&mut reactor.ring, fd, side)?;
            }
        }
        reactor.ring.submit()?;

        let client_addr = reactor.local_addr(Side::Client)?;
        let worker_addr = reactor.local_addr(Side::Worker)?;
        info!(client = %client_addr, worker = %worker_addr, "listening");
        Ok(reactor)
    }

    pub fn local_addr(&self, side: Side) -> io::Result<SocketAddr> {
        self.listeners[side.index()].local_addr()
    }

    fn listener_fd(&self, side: Side) -> RawFd {
        self.listeners[side.index()].as_raw_fd()
    }

    // ========================================================================
    // Event loop
    // ========================================================================

    /// Submit pending entries and block for at least one completion.
    fn wait(&mut self) -> Result<(), TransportError> {
        if !self.tick_armed {
            post_tick(&mut self.ring, &self.tick)?;
            self.tick_armed = true;
        }
        match self.ring.submit_and_wait(1) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            // completion queue backed up; draining below makes room
            Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {}
            Err(e) => return Err(e.into()),
        }
        self.drain_completions()
    }

    fn drain_completions(&mut self) -> Result<(), TransportError> {
        let events: Vec<(u64, i32)> = self
            .ring
            .completion()
            .map(|cqe| (cqe.user_data(), cqe.result()))
            .collect();

        for (tag, res) in events {
            let Some((id, op)) = unpack_user_data(tag) else {
                warn!(tag, "completion with unknown tag");
                continue;
            };
            trace!(id, ?op, res, "completion");

            match op {
                Operation::Accept(side) => self.handle_accept(side, res)?,
                Operation::Recv(_) => self.handle_recv(id, res)?,
                Operation::Send(_) => self.handle_send(id, res)?,
                Operation::Tick => self.tick_armed = false,
            }
        }
        Ok(())
    }

    fn submit_pending(&mut self) -> Result<(), TransportError> {
        if !self.ring.submission().is_empty() {
            self.ring.submit()?;
        }
        Ok(())
    }

    // ========================================================================
    // Event Handlers
    // ========================================================================

    fn handle_accept(&mut self, side: Side, res: i32) -> Result<(), TransportError> {
        if self.stopping {
            if res >= 0 {
                close_fd_quiet(res);
            }
            return Ok(());
        }
        let listen_fd = self.listener_fd(side);

        if res < 0 {
            let err = io::Error::from_raw_os_error(-res);
            warn!(%side, error = %err, "accept failed, re-arming");
            post_accept(&mut self.ring, listen_fd, side)?;
            return Ok(());
        }

        let fd = res;
        if let Err(e) = set_nodelay_raw(fd) {
            debug!(%side, fd, error = %e, "TCP_NODELAY not applied");
        }

        let identity = mint_identity(&mut self.next_identity, &self.routes[side.index()]);

        let inbound = FrameBuf::with_capacity(self.io_buffer_capacity, self.max_frame_size);
        let id = self
            .connections
            .insert(Connection::new(fd, side, identity.clone(), inbound));
        self.routes[side.index()].insert(identity.clone(), id);
        debug!(%side, %identity, fd, "connection accepted");

        self.arm_recv(id)?;

        // Keep accept pipeline full
        post_accept(&mut self.ring, listen_fd, side)?;
        Ok(())
    }

    fn handle_recv(&mut self, id: usize, res: i32) -> Result<(), TransportError> {
        let Some(conn) = self.connections.get_mut(id) else {
            return Ok(());
        };
        conn.recv_in_flight = false;

        if conn.closing {
            self.reap_if_done(id);
            return Ok(());
        }
        if res <= 0 {
            if res < 0 {
                let err = io::Error::from_raw_os_error(-res);
                debug!(side = %conn.side, identity = %conn.identity, error = %err, "recv failed");
            } else {
                debug!(side = %conn.side, identity = %conn.identity, "peer closed");
            }
            self.retire(id);
            return Ok(());
        }

        conn.inbound.wrote(res as usize);
        let was_idle = conn.inbox.is_empty();
        let mut failure = None;
        loop {
            match peek_message(conn.inbound.window(), self.max_frame_size) {
                Ok(Some((message, used))) => {
                    conn.inbound.consume(used);
                    conn.inbox.push_back(message);
                }
                Ok(None) => break,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let side = conn.side;
        let has_mail = !conn.inbox.is_empty();
        if was_idle && has_mail {
            self.ready[side.index()].push_back(id);
        }

        if let Some(e) = failure {
            self.drop_undecodable(id, e);
            return Ok(());
        }
        if !has_mail {
            self.arm_recv(id)?;
        }
        Ok(())
    }

    fn handle_send(&mut self, id: usize, res: i32) -> Result<(), TransportError> {
        let Some(conn) = self.connections.get_mut(id) else {
            return Ok(());
        };
        conn.send_in_flight = false;

        if conn.closing {
            self.reap_if_done(id);
            return Ok(());
        }
        if res < 0 {
            let err = io::Error::from_raw_os_error(-res);
            debug!(side = %conn.side, identity = %conn.identity, error = %err, "send failed");
            self.retire(id);
            return Ok(());
        }

        // partial sends resume from the recorded offset
        conn.sent += res as usize;
        self.arm_send(id)
    }

    // ========================================================================
    // Connection state
    // ========================================================================

    fn arm_recv(&mut self, id: usize) -> Result<(), TransportError> {
        let Some(conn) = self.connections.get_mut(id) else {
            return Ok(());
        };
        if !conn.wants_recv() {
            return Ok(());
        }
        if let Err(e) = conn.inbound.make_room() {
            self.drop_undecodable(id, e);
            return Ok(());
        }
        post_recv(&mut self.ring, conn)?;
        Ok(())
    }

    fn arm_send(&mut self, id: usize) -> Result<(), TransportError> {
        let Some(conn) = self.connections.get_mut(id) else {
            return Ok(());
        };
        if conn.closing || !conn.stage_send() {
            return Ok(());
        }
        post_send(&mut self.ring, conn)?;
        Ok(())
    }

    fn drop_undecodable(&mut self, id: usize, err: WireError) {
        if let Some(conn) = self.connections.get(id) {
            warn!(side = %conn.side, identity = %conn.identity, error = %err, "dropping connection");
        }
        self.retire(id);
    }

    /// Make the connection unroutable and start closing it.
    ///
    /// Messages already decoded stay deliverable; the slot is freed once
    /// they are taken and no operation references the connection.
    fn retire(&mut self, id: usize) {
        let Some(conn) = self.connections.get_mut(id) else {
            return;
        };
        if conn.closing {
            return;
        }
        conn.closing = true;
        conn.outbox.clear();
        self.routes[conn.side.index()].remove(&conn.identity);
        if conn.side == Side::Worker && !self.stopping {
            self.departed.push(conn.identity.clone());
        }
        debug!(side = %conn.side, identity = %conn.identity, "connection retired");

        if conn.in_flight() {
            shutdown_fd_quiet(conn.fd);
        }
        self.reap_if_done(id);
    }

    fn reap_if_done(&mut self, id: usize) {
        if self.connections.get(id).is_some_and(Connection::is_reapable) {
            self.connections.release(id);
        }
    }

    fn has_pending_output(&self) -> bool {
        self.connections
            .iter()
            .any(|c| !c.closing && c.has_pending_output())
    }

    fn has_operations_in_flight(&self) -> bool {
        self.connections.iter().any(Connection::in_flight)
    }

    fn readiness(&self, interest: Interest) -> Readiness {
        Readiness {
            client: interest.client && !self.ready[Side::Client.index()].is_empty(),
            worker: interest.worker && !self.ready[Side::Worker.index()].is_empty(),
            departures: !self.departed.is_empty(),
        }
    }
}

/// Next sequence identity not routed to a live connection.
///
/// The counter wraps, so a long-lived connection may still hold the value
/// the counter comes back around to.
fn mint_identity(next: &mut u32, routes: &HashMap<Identity, usize>) -> Identity {
    loop {
        let identity = Identity::from_sequence(*next);
        *next = next.wrapping_add(1);
        if !routes.contains_key(&identity) {
            return identity;
        }
    }
}

impl Channels for Reactor {
    fn poll(&mut self, interest: Interest) -> Result<Readiness, TransportError> {
        loop {
            // sends queued since the last wait go out now; completions that
            // already arrived are processed without blocking
            self.submit_pending()?;
            self.drain_completions()?;

            let readiness = self.readiness(interest);
            if readiness.any() {
                return Ok(readiness);
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(TransportError::Interrupted);
            }
            self.wait()?;
        }
    }

    fn recv(&mut self, side: Side) -> Result<Option<Multipart>, TransportError> {
        while let Some(id) = self.ready[side.index()].pop_front() {
            let Some(conn) = self.connections.get_mut(id) else {
                continue;
            };
            let Some(mut message) = conn.inbox.pop_front() else {
                continue;
            };
            message.insert(0, conn.identity.as_bytes().to_vec());

            if !conn.inbox.is_empty() {
                // back of the line so one chatty peer cannot starve the rest
                self.ready[side.index()].push_back(id);
            } else if conn.closing {
                self.reap_if_done(id);
            } else {
                self.arm_recv(id)?;
            }
            return Ok(Some(message));
        }
        Ok(None)
    }

    fn send(&mut self, side: Side, message: Multipart) -> Result<(), TransportError> {
        let mut frames = message.into_iter();
        let Some(first) = frames.next() else {
            return Err(TransportError::MissingIdentity);
        };
        let identity = Identity::new(first);
        let body: Multipart = frames.collect();
        if body.is_empty() {
            return Err(WireError::EmptyMessage.into());
        }

        let Some(&id) = self.routes[side.index()].get(&identity) else {
            return Err(TransportError::Unroutable { side, identity });
        };
        let Some(conn) = self.connections.get_mut(id) else {
            return Err(TransportError::Unroutable { side, identity });
        };
        conn.queue_message(&body);
        self.arm_send(id)
    }

    fn take_departed(&mut self) -> Vec<Identity> {
        std::mem::take(&mut self.departed)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let deadline = Instant::now() + self.tick_interval * FLUSH_MAX_TICKS as u32;
        while self.has_pending_output() {
            if Instant::now() >= deadline {
                warn!("giving up on unsent output");
                break;
            }
            self.wait()?;
        }
        Ok(())
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.stopping = true;
        for id in self.connections.ids() {
            self.retire(id);
        }

        // wait out operations that still point into connection buffers
        let deadline = Instant::now() + self.tick_interval * FLUSH_MAX_TICKS as u32;
        while self.has_operations_in_flight() && Instant::now() < deadline {
            if let Err(e) = self.wait() {
                warn!(error = %e, "ring drain failed during shutdown");
                break;
            }
        }
        debug!(remaining = self.connections.len(), "reactor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpStream;

    use crate::protocol::wire::encode_message;

    fn bind_reactor() -> Option<Reactor> {
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut config = BrokerConfig::get(any, any, 4);
        config.tick = Duration::from_millis(10);
        match Reactor::bind(&config, Arc::new(AtomicBool::new(false))) {
            Ok(reactor) => Some(reactor),
            Err(TransportError::RingSetup(e)) => {
                eprintln!("skipping: io_uring unavailable ({e})");
                None
            }
            Err(e) => panic!("bind failed: {e}"),
        }
    }

    fn drive_until(reactor: &mut Reactor, mut done: impl FnMut(&Reactor) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done(&*reactor) {
            assert!(Instant::now() < deadline, "reactor never reached the expected state");
            reactor.wait().unwrap();
        }
    }

    fn encoded(frames: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_message(frames, &mut out);
        out
    }

    #[test]
    fn test_mint_identity_skips_live_routes() {
        let mut routes = HashMap::new();
        routes.insert(Identity::from_sequence(7), 0);
        routes.insert(Identity::from_sequence(8), 1);

        let mut next = 7;
        assert_eq!(mint_identity(&mut next, &routes), Identity::from_sequence(9));
        assert_eq!(next, 10);

        // wrapped counter lands on a connection that is still open
        routes.insert(Identity::from_sequence(u32::MAX), 2);
        let mut next = u32::MAX;
        assert_eq!(mint_identity(&mut next, &routes), Identity::from_sequence(0));
        assert_eq!(next, 1);
    }

    #[test]
    fn test_pending_connections_served_in_turn() {
        let Some(mut reactor) = bind_reactor() else {
            return;
        };
        let addr = reactor.local_addr(Side::Worker).unwrap();
        let workers = Side::Worker.index();

        let mut chatty = TcpStream::connect(addr).unwrap();
        let mut batch = encoded(&[&b""[..], b"a1"]);
        batch.extend(encoded(&[&b""[..], b"a2"]));
        batch.extend(encoded(&[&b""[..], b"a3"]));
        chatty.write_all(&batch).unwrap();
        drive_until(&mut reactor, |r| r.ready[workers].len() == 1);

        let mut quiet = TcpStream::connect(addr).unwrap();
        quiet.write_all(&encoded(&[&b""[..], b"READY"])).unwrap();
        drive_until(&mut reactor, |r| r.ready[workers].len() == 2);

        let mut received = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while received.len() < 4 {
            assert!(Instant::now() < deadline, "messages went missing");
            match reactor.recv(Side::Worker).unwrap() {
                Some(message) => received.push(message),
                None => reactor.wait().unwrap(),
            }
        }

        let payloads: Vec<&[u8]> = received.iter().map(|m| m[2].as_slice()).collect();
        assert_eq!(
            payloads,
            vec![b"a1".as_slice(), b"READY".as_slice(), b"a2".as_slice(), b"a3".as_slice()]
        );
        assert_eq!(received[0][0], received[2][0]);
        assert_eq!(received[0][0], received[3][0]);
        assert_ne!(received[0][0], received[1][0]);
    }

    #[test]
    fn test_undecodable_worker_is_retired() {
        let Some(mut reactor) = bind_reactor() else {
            return;
        };
        let addr = reactor.local_addr(Side::Worker).unwrap();
        let workers = Side::Worker.index();

        let mut peer = TcpStream::connect(addr).unwrap();
        let mut bytes = encoded(&[&b""[..], b"READY"]);
        bytes.extend_from_slice(&[0x80, 0, 0, 0, 0]);
        peer.write_all(&bytes).unwrap();

        // the message ahead of the bad header is still delivered
        drive_until(&mut reactor, |r| !r.ready[workers].is_empty());
        let message = reactor.recv(Side::Worker).unwrap().unwrap();
        assert_eq!(message[2], b"READY".to_vec());
        let identity = Identity::new(message[0].clone());

        drive_until(&mut reactor, |r| !r.departed.is_empty());
        assert_eq!(reactor.take_departed(), vec![identity.clone()]);
        assert!(reactor.routes[workers].is_empty());

        let err = reactor
            .send(Side::Worker, vec![identity.as_bytes().to_vec(), Vec::new(), b"x".to_vec()])
            .unwrap_err();
        assert!(matches!(err, TransportError::Unroutable { side: Side::Worker, .. }));
    }
}
