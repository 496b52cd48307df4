use std::net::SocketAddr;

use tracing::{debug, info};

use crate::core::Frame;
use crate::core::constants::READY;

use super::requester::{PeerError, Requester};

pub const DEMO_REQUEST: &[u8] = b"HELLO";
pub const DEMO_REPLY: &[u8] = b"OK";

/// Send one request and wait for its reply.
pub fn run_demo_client(addr: SocketAddr, index: usize) -> Result<Frame, PeerError> {
    let mut req = Requester::connect(addr)?;
    req.send(&[DEMO_REQUEST])?;

    let mut reply = req.recv()?;
    if reply.len() != 1 {
        return Err(PeerError::UnexpectedShape {
            frames: reply.len(),
        });
    }
    let reply = reply.remove(0);
    info!(client = index, reply = %String::from_utf8_lossy(&reply), "client received reply");
    Ok(reply)
}

/// Announce READY, then answer every request until the broker hangs up.
///
/// Returns the number of requests answered.
pub fn run_demo_worker(addr: SocketAddr, index: usize) -> Result<u64, PeerError> {
    let mut req = Requester::connect(addr)?;
    req.send(&[READY])?;

    let mut handled = 0;
    loop {
        let message = match req.recv() {
            Ok(message) => message,
            Err(e) if e.is_disconnect() => {
                debug!(worker = index, handled, "broker closed connection");
                return Ok(handled);
            }
            Err(e) => return Err(e),
        };

        // [client, "", request]
        if message.len() != 3 || !message[1].is_empty() {
            return Err(PeerError::UnexpectedShape {
                frames: message.len(),
            });
        }
        info!(
            worker = index,
            request = %String::from_utf8_lossy(&message[2]),
            "worker received request"
        );

        req.send(&[message[0].as_slice(), &b""[..], DEMO_REPLY])?;
        handled += 1;
    }
}
