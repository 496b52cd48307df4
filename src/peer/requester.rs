use std::io;
use std::net::{SocketAddr, TcpStream};

use crate::core::Multipart;
use crate::core::constants::MAX_FRAME_SIZE;
use crate::core::socket::connect_peer;
use crate::protocol::wire::{WireError, read_message, write_message};

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("reply is missing the empty delimiter frame")]
    MissingDelimiter,

    #[error("{0} called out of request/reply order")]
    OutOfSequence(&'static str),

    #[error("unexpected message shape ({frames} frames)")]
    UnexpectedShape { frames: usize },
}

impl From<io::Error> for PeerError {
    fn from(e: io::Error) -> Self {
        Self::Wire(WireError::Io(e))
    }
}

impl PeerError {
    /// The broker closed the connection.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Wire(WireError::Closed) => true,
            Self::Wire(WireError::Io(e)) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

/// Blocking request socket with strict send/recv alternation
///
/// Every outgoing message gets an empty delimiter frame in front, and the
/// delimiter is stripped from every incoming one, so the broker sees
/// `[identity, "", frames...]` for what this side sends.
pub struct Requester {
    stream: TcpStream,
    max_frame_size: usize,
    awaiting_reply: bool,
}

impl Requester {
    pub fn connect(addr: SocketAddr) -> Result<Self, PeerError> {
        Ok(Self {
            stream: connect_peer(addr)?,
            max_frame_size: MAX_FRAME_SIZE,
            awaiting_reply: false,
        })
    }

    pub fn send<F: AsRef<[u8]>>(&mut self, frames: &[F]) -> Result<(), PeerError> {
        if self.awaiting_reply {
            return Err(PeerError::OutOfSequence("send"));
        }
        let mut parts: Vec<&[u8]> = Vec::with_capacity(frames.len() + 1);
        parts.push(&[]);
        parts.extend(frames.iter().map(AsRef::as_ref));
        write_message(&mut self.stream, &parts)?;
        self.awaiting_reply = true;
        Ok(())
    }

    pub fn recv(&mut self) -> Result<Multipart, PeerError> {
        if !self.awaiting_reply {
            return Err(PeerError::OutOfSequence("recv"));
        }
        let mut message = read_message(&mut self.stream, self.max_frame_size)?;
        if message.first().is_none_or(|f| !f.is_empty()) {
            return Err(PeerError::MissingDelimiter);
        }
        message.remove(0);
        self.awaiting_reply = false;
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_delimiter_added_and_stripped() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let got = read_message(&mut stream, MAX_FRAME_SIZE).unwrap();
            write_message(&mut stream, &[&b""[..], &b"OK"[..]]).unwrap();
            got
        });

        let mut req = Requester::connect(addr).unwrap();
        req.send(&[b"HELLO"]).unwrap();
        assert!(matches!(req.send(&[b"again"]), Err(PeerError::OutOfSequence("send"))));
        assert_eq!(req.recv().unwrap(), vec![b"OK".to_vec()]);

        assert_eq!(server.join().unwrap(), vec![Vec::new(), b"HELLO".to_vec()]);
    }

    #[test]
    fn test_reply_without_delimiter_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            read_message(&mut stream, MAX_FRAME_SIZE).unwrap();
            write_message(&mut stream, &[b"OK"]).unwrap();
        });

        let mut req = Requester::connect(addr).unwrap();
        assert!(matches!(req.recv(), Err(PeerError::OutOfSequence("recv"))));
        req.send(&[b"HELLO"]).unwrap();
        assert!(matches!(req.recv(), Err(PeerError::MissingDelimiter)));
        server.join().unwrap();
    }

    #[test]
    fn test_closed_connection_is_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            read_message(&mut stream, MAX_FRAME_SIZE).unwrap();
        });

        let mut req = Requester::connect(addr).unwrap();
        req.send(&[b"READY"]).unwrap();
        server.join().unwrap();
        assert!(req.recv().unwrap_err().is_disconnect());
    }
}
