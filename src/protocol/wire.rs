use std::io::{self, Read, Write};

use crate::core::{Frame, Multipart};

/// Multi-part wire framing
///
/// This module provides the byte-level framing used on both broker channels:
/// - FrameBuf: receive buffer that io_uring recv operations write into
/// - Encoding and incremental decoding of multi-part messages
/// - Blocking read/write helpers for peers
///
/// Each frame is `[flags: u8][length: u32 BE][bytes]`. Bit 0 of `flags`
/// (MORE) says another frame of the same message follows.

pub const FLAG_MORE: u8 = 0x01;
pub const FRAME_HEADER_SIZE: usize = 5;

// receive buffers never grow past this many frames' worth of bytes
const MAX_BUFFERED_FRAMES: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("frame of {size} bytes exceeds limit {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("message does not fit in {limit} buffered bytes")]
    MessageTooLarge { limit: usize },

    #[error("unknown frame flags {flags:#04x}")]
    UnknownFlags { flags: u8 },

    #[error("message has no frames")]
    EmptyMessage,

    #[error("stream ended inside a message")]
    Truncated,

    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

// ============================================================================
// Receive Buffer
// ============================================================================

/// Growable receive window for framed messages
pub struct FrameBuf {
    buf: Vec<u8>,
    start: usize,
    end: usize,
    limit: usize,
}

impl FrameBuf {
    pub fn with_capacity(cap: usize, max_frame_size: usize) -> Self {
        let limit = (max_frame_size + FRAME_HEADER_SIZE) * MAX_BUFFERED_FRAMES;
        Self {
            buf: vec![0; cap.min(limit)],
            start: 0,
            end: 0,
            limit,
        }
    }

    /// Get pointer and length for the next recv operation
    ///
    /// The pointer stays valid until the buffer is compacted or grown, which
    /// only happens through `make_room` while no recv is in flight.
    pub fn write_ptr_len(&mut self) -> (*mut u8, usize) {
        let free = self.buf.len() - self.end;
        (unsafe { self.buf.as_mut_ptr().add(self.end) }, free)
    }

    /// Mark that n bytes were written to the buffer
    pub fn wrote(&mut self, n: usize) {
        debug_assert!(self.end + n <= self.buf.len());
        self.end += n;
    }

    /// Advance past n decoded bytes
    pub fn consume(&mut self, n: usize) {
        debug_assert!(self.start + n <= self.end);
        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Get the current readable window
    pub fn window(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Ensure the next recv has somewhere to write.
    ///
    /// Compacts first, then doubles the allocation up to the buffering limit.
    pub fn make_room(&mut self) -> Result<(), WireError> {
        if self.end < self.buf.len() {
            return Ok(());
        }
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
            return Ok(());
        }
        if self.buf.len() >= self.limit {
            return Err(WireError::MessageTooLarge { limit: self.limit });
        }
        let grown = (self.buf.len() * 2).clamp(FRAME_HEADER_SIZE, self.limit);
        self.buf.resize(grown, 0);
        Ok(())
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

// ============================================================================
// Encoding / Decoding
// ============================================================================

/// Append the wire form of `frames` to `out`.
pub fn encode_message<F: AsRef<[u8]>>(frames: &[F], out: &mut Vec<u8>) {
    let last = frames.len().saturating_sub(1);
    for (i, frame) in frames.iter().enumerate() {
        let frame = frame.as_ref();
        let flags = if i < last { FLAG_MORE } else { 0 };
        out.push(flags);
        out.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        out.extend_from_slice(frame);
    }
}

/// Try to decode one complete message from the front of `window`.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the message and
/// the number of bytes it occupied.
pub fn peek_message(
    window: &[u8],
    max_frame_size: usize,
) -> Result<Option<(Multipart, usize)>, WireError> {
    let mut frames: Multipart = Vec::new();
    let mut pos = 0;

    loop {
        let Some(header) = window.get(pos..pos + FRAME_HEADER_SIZE) else {
            return Ok(None);
        };
        let flags = header[0];
        if flags & !FLAG_MORE != 0 {
            return Err(WireError::UnknownFlags { flags });
        }
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if len > max_frame_size {
            return Err(WireError::FrameTooLarge {
                size: len,
                limit: max_frame_size,
            });
        }

        let body_start = pos + FRAME_HEADER_SIZE;
        let Some(body) = window.get(body_start..body_start + len) else {
            return Ok(None);
        };
        frames.push(body.to_vec());
        pos = body_start + len;

        if flags & FLAG_MORE == 0 {
            return Ok(Some((frames, pos)));
        }
    }
}

// ============================================================================
// Blocking Helpers
// ============================================================================

pub fn write_message<W: Write, F: AsRef<[u8]>>(w: &mut W, frames: &[F]) -> Result<(), WireError> {
    if frames.is_empty() {
        return Err(WireError::EmptyMessage);
    }
    let mut out = Vec::new();
    encode_message(frames, &mut out);
    w.write_all(&out)?;
    w.flush()?;
    Ok(())
}

/// Read one whole message.
///
/// A clean end of stream before the first byte is reported as `Closed`,
/// anywhere later as `Truncated`.
pub fn read_message<R: Read>(r: &mut R, max_frame_size: usize) -> Result<Multipart, WireError> {
    let mut frames: Multipart = Vec::new();
    loop {
        let mut header = [0u8; FRAME_HEADER_SIZE];
        let got = fill(r, &mut header)?;
        if got == 0 && frames.is_empty() {
            return Err(WireError::Closed);
        }
        if got < FRAME_HEADER_SIZE {
            return Err(WireError::Truncated);
        }

        let flags = header[0];
        if flags & !FLAG_MORE != 0 {
            return Err(WireError::UnknownFlags { flags });
        }
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if len > max_frame_size {
            return Err(WireError::FrameTooLarge {
                size: len,
                limit: max_frame_size,
            });
        }

        let mut frame: Frame = vec![0; len];
        r.read_exact(&mut frame).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => WireError::Truncated,
            _ => WireError::Io(e),
        })?;
        frames.push(frame);

        if flags & FLAG_MORE == 0 {
            return Ok(frames);
        }
    }
}

// read until `buf` is full or the stream ends; returns the byte count
fn fill<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match r.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(k) => n += k,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(frames: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_message(frames, &mut out);
        out
    }

    #[test]
    fn test_encode_layout() {
        let bytes = encoded(&[b"", b"hi"]);
        assert_eq!(bytes, vec![1, 0, 0, 0, 0, 0, 0, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn test_peek_needs_more_bytes() {
        let bytes = encoded(&[b"abc", b"defg"]);
        for cut in 0..bytes.len() {
            let res = peek_message(&bytes[..cut], 1024).expect("partial input is not an error");
            assert!(res.is_none(), "cut at {cut} decoded early");
        }
        let (msg, used) = peek_message(&bytes, 1024).unwrap().unwrap();
        assert_eq!(msg, vec![b"abc".to_vec(), b"defg".to_vec()]);
        assert_eq!(used, bytes.len());
    }

    #[test]
    fn test_peek_stops_at_message_boundary() {
        let mut bytes = encoded(&[b"one"]);
        let first_len = bytes.len();
        bytes.extend(encoded(&[b"", b"two"]));

        let (msg, used) = peek_message(&bytes, 1024).unwrap().unwrap();
        assert_eq!(msg, vec![b"one".to_vec()]);
        assert_eq!(used, first_len);

        let (msg, _) = peek_message(&bytes[used..], 1024).unwrap().unwrap();
        assert_eq!(msg, vec![Vec::new(), b"two".to_vec()]);
    }

    #[test]
    fn test_peek_rejects_oversized_frame() {
        let bytes = encoded(&[&[7u8; 64]]);
        match peek_message(&bytes, 16) {
            Err(WireError::FrameTooLarge { size: 64, limit: 16 }) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_peek_rejects_unknown_flags() {
        let bytes = vec![0x80, 0, 0, 0, 0];
        assert!(matches!(
            peek_message(&bytes, 16),
            Err(WireError::UnknownFlags { flags: 0x80 })
        ));
    }

    #[test]
    fn test_framebuf_grows_until_limit() {
        let mut buf = FrameBuf::with_capacity(8, 8);
        let (_, free) = buf.write_ptr_len();
        buf.wrote(free);
        buf.make_room().unwrap();
        assert_eq!(buf.capacity(), 16);

        let limit = (8 + FRAME_HEADER_SIZE) * MAX_BUFFERED_FRAMES;
        while buf.capacity() < limit {
            let (_, free) = buf.write_ptr_len();
            buf.wrote(free);
            buf.make_room().unwrap();
        }
        let (_, free) = buf.write_ptr_len();
        buf.wrote(free);
        assert!(matches!(
            buf.make_room(),
            Err(WireError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_framebuf_compacts_before_growing() {
        let mut buf = FrameBuf::with_capacity(8, 1024);
        let (_, free) = buf.write_ptr_len();
        buf.wrote(free);
        buf.consume(3);
        buf.make_room().unwrap();
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.window().len(), 5);
        let (_, free) = buf.write_ptr_len();
        assert_eq!(free, 3);
    }

    #[test]
    fn test_blocking_roundtrip_and_close() {
        let mut stream = Vec::new();
        write_message(&mut stream, &[b"".as_slice(), b"READY".as_slice()]).unwrap();

        let mut reader = io::Cursor::new(stream);
        let msg = read_message(&mut reader, 1024).unwrap();
        assert_eq!(msg, vec![Vec::new(), b"READY".to_vec()]);
        assert!(matches!(read_message(&mut reader, 1024), Err(WireError::Closed)));
    }

    #[test]
    fn test_blocking_read_truncated() {
        let bytes = encoded(&[b"abc", b"def"]);
        let mut reader = io::Cursor::new(bytes[..bytes.len() - 1].to_vec());
        assert!(matches!(read_message(&mut reader, 1024), Err(WireError::Truncated)));
    }

    #[test]
    fn test_write_rejects_empty_message() {
        let mut sink = Vec::new();
        let frames: [&[u8]; 0] = [];
        assert!(matches!(
            write_message(&mut sink, &frames),
            Err(WireError::EmptyMessage)
        ));
    }
}
