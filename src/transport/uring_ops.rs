use std::os::fd::RawFd;
use std::{io, ptr};

use io_uring::{IoUring, opcode, squeue, types};

use crate::core::Side;
use crate::core::operation::Operation;
use crate::core::user_data::pack_user_data;

use super::connection::Connection;

// io_uring SQE submission helpers. Every entry is tagged with
// `pack_user_data` so the completion routes back to its connection.

/// Slot id used by entries that belong to no connection.
const NO_CONNECTION: usize = 0;

fn push_sqe(ring: &mut IoUring, sqe: &squeue::Entry) -> io::Result<()> {
    // SAFETY: every buffer referenced by an entry is owned by a pooled
    // connection (or the reactor) and outlives the operation.
    unsafe {
        if ring.submission().push(sqe).is_ok() {
            return Ok(());
        }
    }
    ring.submit()?;
    unsafe {
        ring.submission()
            .push(sqe)
            .map_err(|_| io::Error::other("submission queue full"))
    }
}

/// Post an accept on a listener.
pub fn post_accept(ring: &mut IoUring, listen_fd: RawFd, side: Side) -> io::Result<()> {
    let sqe = opcode::Accept::new(types::Fd(listen_fd), ptr::null_mut(), ptr::null_mut())
        .build()
        .user_data(pack_user_data(NO_CONNECTION, Operation::Accept(side)));
    push_sqe(ring, &sqe)
}

/// Post a recv into the free tail of the connection's frame buffer.
pub fn post_recv(ring: &mut IoUring, conn: &mut Connection) -> io::Result<()> {
    let (buf, len) = conn.inbound.write_ptr_len();
    let sqe = opcode::Recv::new(types::Fd(conn.fd), buf, len as u32)
        .build()
        .user_data(pack_user_data(conn.id, Operation::Recv(conn.side)));
    push_sqe(ring, &sqe)?;
    conn.recv_in_flight = true;
    Ok(())
}

/// Post a send for the unsent part of the staged buffer.
pub fn post_send(ring: &mut IoUring, conn: &mut Connection) -> io::Result<()> {
    let rest = &conn.sending[conn.sent..];
    let sqe = opcode::Send::new(types::Fd(conn.fd), rest.as_ptr(), rest.len() as u32)
        .flags(libc::MSG_NOSIGNAL)
        .build()
        .user_data(pack_user_data(conn.id, Operation::Send(conn.side)));
    push_sqe(ring, &sqe)?;
    conn.send_in_flight = true;
    Ok(())
}

/// Post a timeout that wakes a blocked wait.
pub fn post_tick(ring: &mut IoUring, ts: &types::Timespec) -> io::Result<()> {
    let sqe = opcode::Timeout::new(ts as *const types::Timespec)
        .build()
        .user_data(pack_user_data(NO_CONNECTION, Operation::Tick));
    push_sqe(ring, &sqe)
}
