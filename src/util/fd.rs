use std::{io, os::fd::RawFd};

use tracing::warn;

pub fn close_fd_quiet(fd: RawFd) {
    // After this call, consider fd dead in all code paths.
    let ret = unsafe { libc::close(fd) };
    if ret != 0 {
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EBADF) => {
                warn!(fd, "close -> EBADF (double close / invalid fd)");
            }
            Some(libc::EINTR) => {
                warn!(fd, "close interrupted by signal (EINTR); not retrying");
            }
            _ => {
                warn!(fd, error = %err, "close failed");
            }
        }
    }
}

/// Shut down both directions so that in-flight operations on `fd` complete.
///
/// The descriptor stays open; it is closed once the ring no longer
/// references it.
pub fn shutdown_fd_quiet(fd: RawFd) {
    let ret = unsafe { libc::shutdown(fd, libc::SHUT_RDWR) };
    if ret != 0 {
        let err = io::Error::last_os_error();
        // ENOTCONN: peer already gone, nothing left to wake
        if err.raw_os_error() != Some(libc::ENOTCONN) {
            warn!(fd, error = %err, "shutdown failed");
        }
    }
}
