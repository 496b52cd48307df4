use tracing::{debug, info, warn};

use crate::core::WorkerIdentity;
use crate::transport::{Channels, Interest, TransportError};

use super::endpoints::{ClientEndpoint, EndpointError, WorkerEndpoint, WorkerEvent};
use super::worker_queue::{Enqueued, PoolError, WorkerQueue};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("worker pool invariant broken: {0}")]
    Invariant(PoolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The configured number of replies has been relayed.
    Completed { replies: u64 },
    /// The wait was interrupted (shutdown requested).
    Interrupted,
}

/// Counters kept for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub requests_routed: u64,
    pub replies_relayed: u64,
    pub ready_announcements: u64,
    pub duplicate_ready: u64,
    pub capacity_rejections: u64,
    pub discarded: u64,
    pub dropped_requests: u64,
    pub dropped_replies: u64,
    pub departed_workers: u64,
}

/// Load-balancing state machine
///
/// Owns the idle-worker queue and the transport. Each cycle waits on the
/// worker channel, and on the client channel only while some worker is idle,
/// so unassignable requests stay in the transport instead of piling up here.
pub struct DispatchLoop<C: Channels> {
    channels: C,
    workers: WorkerQueue,
    remaining: Option<usize>,
    stats: DispatchStats,
}

impl<C: Channels> DispatchLoop<C> {
    pub fn new(channels: C, worker_capacity: usize, message_limit: Option<usize>) -> Self {
        Self {
            channels,
            workers: WorkerQueue::new(worker_capacity),
            remaining: message_limit,
            stats: DispatchStats::default(),
        }
    }

    /// Run cycles until the message limit is reached or the wait is interrupted.
    pub fn run(&mut self) -> Result<DispatchOutcome, DispatchError> {
        loop {
            if let Some(outcome) = self.step()? {
                if let DispatchOutcome::Completed { replies } = outcome {
                    info!(replies, "message limit reached, flushing");
                    self.channels.flush()?;
                }
                return Ok(outcome);
            }
        }
    }

    /// One scheduling cycle: purge departures, wait, handle what is ready.
    pub fn step(&mut self) -> Result<Option<DispatchOutcome>, DispatchError> {
        self.purge_departed();

        let interest = if self.workers.is_empty() {
            Interest::workers_only()
        } else {
            Interest::both()
        };

        let readiness = match self.channels.poll(interest) {
            Ok(readiness) => readiness,
            Err(TransportError::Interrupted) => return Ok(Some(DispatchOutcome::Interrupted)),
            Err(e) => return Err(e.into()),
        };

        if readiness.worker
            && let Some(outcome) = self.handle_worker()?
        {
            return Ok(Some(outcome));
        }

        if interest.client && readiness.client {
            self.handle_client()?;
        }

        Ok(None)
    }

    // ========================================================================
    // Event Handlers
    // ========================================================================

    fn handle_worker(&mut self) -> Result<Option<DispatchOutcome>, DispatchError> {
        let event = match WorkerEndpoint::new(&mut self.channels).recv() {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(None),
            Err(e) => return self.discard(e).map(|_| None),
        };

        match event {
            WorkerEvent::Ready { worker } => {
                self.stats.ready_announcements += 1;
                debug!(%worker, "worker ready");
                self.make_available(worker);
                Ok(None)
            }
            WorkerEvent::Reply {
                worker,
                client,
                payload,
            } => {
                // replying is an implicit READY
                self.make_available(worker);

                match ClientEndpoint::new(&mut self.channels).send_reply(&client, payload) {
                    Ok(()) => {
                        self.stats.replies_relayed += 1;
                        debug!(%client, "reply relayed");
                    }
                    Err(TransportError::Unroutable { .. }) => {
                        self.stats.dropped_replies += 1;
                        warn!(%client, "client gone, reply dropped");
                    }
                    Err(e) => return Err(e.into()),
                }

                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining = remaining.saturating_sub(1);
                    if *remaining == 0 {
                        return Ok(Some(DispatchOutcome::Completed {
                            replies: self.stats.replies_relayed,
                        }));
                    }
                }
                Ok(None)
            }
        }
    }

    fn handle_client(&mut self) -> Result<(), DispatchError> {
        let request = match ClientEndpoint::new(&mut self.channels).recv_request() {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(()),
            Err(e) => return self.discard(e),
        };

        loop {
            let worker = self.workers.dequeue_head().map_err(DispatchError::Invariant)?;

            match WorkerEndpoint::new(&mut self.channels).send_request(
                &worker,
                &request.client,
                &request.payload,
            ) {
                Ok(()) => {
                    self.stats.requests_routed += 1;
                    debug!(client = %request.client, %worker, "request routed");
                    return Ok(());
                }
                Err(TransportError::Unroutable { .. }) => {
                    // connection closed after the last purge
                    self.stats.departed_workers += 1;
                    warn!(%worker, "idle worker unreachable, trying next");
                    if self.workers.is_empty() {
                        self.stats.dropped_requests += 1;
                        warn!(client = %request.client, "no reachable worker, request dropped");
                        return Ok(());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn make_available(&mut self, worker: WorkerIdentity) {
        match self.workers.enqueue(worker.clone()) {
            Ok(Enqueued::Queued) => {}
            Ok(Enqueued::AlreadyQueued) => {
                self.stats.duplicate_ready += 1;
                debug!(%worker, "duplicate READY ignored");
            }
            Err(e) => {
                self.stats.capacity_rejections += 1;
                warn!(%worker, error = %e, "worker not queued");
            }
        }
    }

    fn purge_departed(&mut self) {
        for worker in WorkerEndpoint::new(&mut self.channels).take_departed() {
            if self.workers.remove(&worker) {
                self.stats.departed_workers += 1;
                info!(%worker, "idle worker disconnected, removed from pool");
            } else {
                debug!(%worker, "busy or unknown worker disconnected");
            }
        }
    }

    fn discard(&mut self, err: EndpointError) -> Result<(), DispatchError> {
        match err {
            EndpointError::Transport(e) => Err(e.into()),
            other => {
                self.stats.discarded += 1;
                warn!(error = %other, "message discarded");
                Ok(())
            }
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn idle_workers(&self) -> usize {
        self.workers.size()
    }

    #[cfg(test)]
    pub fn channels(&self) -> &C {
        &self.channels
    }

    #[cfg(test)]
    pub fn channels_mut(&mut self) -> &mut C {
        &mut self.channels
    }
}
