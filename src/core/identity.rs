use std::fmt;

/// A single frame of a multi-part message.
pub type Frame = Vec<u8>;

/// An ordered sequence of frames delivered as one unit.
pub type Multipart = Vec<Frame>;

/// Opaque routing token assigned by the transport to one connection.
///
/// The broker never chooses identities; it only copies them between frames.
/// Identities minted by the reactor are five bytes: a zero byte followed by a
/// big-endian counter, so they never collide with printable tokens.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(Vec<u8>);

pub type ClientIdentity = Identity;
pub type WorkerIdentity = Identity;

impl Identity {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Identity for the `seq`-th connection accepted by a reactor.
    pub fn from_sequence(seq: u32) -> Self {
        let mut bytes = Vec::with_capacity(5);
        bytes.push(0);
        bytes.extend_from_slice(&seq.to_be_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for Identity {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let printable = !self.0.is_empty() && self.0.iter().all(|b| b.is_ascii_graphic());
        if printable {
            // printable identities are shown as-is, binary ones as hex
            for &b in &self.0 {
                write!(f, "{}", b as char)?;
            }
            Ok(())
        } else {
            for b in &self.0 {
                write!(f, "{b:02x}")?;
            }
            Ok(())
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({self})")
    }
}
