use std::fmt;

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OpCode {
    Accept = 1,
    Recv = 2,
    Send = 3,
    Tick = 4,
}

impl OpCode {
    #[inline]
    pub fn try_from_u8(v: u8) -> Option<Self> {
        use OpCode::*;
        Some(match v {
            1 => Accept,
            2 => Recv,
            3 => Send,
            4 => Tick,
            _ => return None,
        })
    }
}

/// Which of the two broker channels a connection or event belongs to.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Side {
    /// Client-facing channel (requests in, replies out).
    Client = 0,
    /// Worker-facing channel (READY/replies in, requests out).
    Worker = 1,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Client, Side::Worker];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn from_bit(bit: u8) -> Self {
        if bit == 0 { Side::Client } else { Side::Worker }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => f.write_str("client"),
            Side::Worker => f.write_str("worker"),
        }
    }
}

/// A completion kind as seen by the reactor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Operation {
    Accept(Side),
    Recv(Side),
    Send(Side),
    /// Periodic timeout keeping the wait responsive to shutdown.
    Tick,
}
