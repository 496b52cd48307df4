use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

pub const DEFAULT_CLIENT_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5672));
pub const DEFAULT_WORKER_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 5673));

pub const DEFAULT_WORKER_CAPACITY: usize = 128;
pub const DEFAULT_RING_SIZE: u32 = 256;
pub const INITIAL_ACCEPTS_PER_LISTENER: usize = 4;
pub const IO_BUFFER_CAPACITY: usize = 16 * 1024;
pub const CONNECTION_POOL_CAPACITY: usize = 1024;
pub const DEFAULT_TICK_MILLIS: u64 = 100;

/// Largest single frame accepted from the wire (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

pub const LISTEN_BACKLOG: i32 = 1024;

/// Body a worker sends to announce it can take work.
pub const READY: &[u8] = b"READY";

// flush gives up after this many idle ticks
pub const FLUSH_MAX_TICKS: usize = 20;
