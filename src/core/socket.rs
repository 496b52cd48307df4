use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::RawFd;

use crate::core::constants::LISTEN_BACKLOG;

/// Socket utility functions for the broker
///
/// This module provides low-level socket operations including:
/// - Listener setup for the client-facing and worker-facing channels
/// - Option tuning for accepted and outgoing connections

/// Create a listening socket with SO_REUSEADDR
///
/// Restarting the broker must not wait for TIME_WAIT sockets from the
/// previous run to expire.
pub fn make_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let sock = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    sock.set_reuse_address(true)?;
    sock.bind(&addr.into())?;
    sock.listen(LISTEN_BACKLOG)?;
    Ok(sock.into())
}

/// Disable Nagle on a freshly accepted connection.
///
/// Messages are small and latency bound; batching them behind delayed ACKs
/// stalls the request/reply cycle.
pub fn set_nodelay_raw(fd: RawFd) -> io::Result<()> {
    let one: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &one as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Connect a blocking stream for a peer (client or worker).
pub fn connect_peer(addr: SocketAddr) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
