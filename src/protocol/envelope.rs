//! Routing envelopes
//!
//! An envelope is `[identity, identity, ..., "", body...]`: one or more
//! identity frames naming the return path, a single empty delimiter, and the
//! body. Hops push identities onto the front; replies pop them off.

use crate::core::{Frame, Identity, Multipart};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: no empty delimiter in {frames} frame(s)")]
    MissingDelimiter { frames: usize },

    #[error("malformed envelope: delimiter with no routing prefix")]
    EmptyRoute,
}

/// A decoded envelope: the routing prefix and everything after the delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub route: Vec<Identity>,
    pub body: Vec<Frame>,
}

impl Envelope {
    /// The payload when the body is exactly one frame.
    pub fn payload(&self) -> Option<&[u8]> {
        match self.body.as_slice() {
            [payload] => Some(payload),
            _ => None,
        }
    }

    pub fn into_payload(mut self) -> Option<Frame> {
        if self.body.len() == 1 { self.body.pop() } else { None }
    }

    /// The hop nearest to us, i.e. the sender on this channel.
    pub fn origin(&self) -> &Identity {
        // decode guarantees a non-empty route
        &self.route[0]
    }
}

/// Split `frames` at the first empty frame.
pub fn decode(frames: Multipart) -> Result<Envelope, EnvelopeError> {
    let Some(delim) = frames.iter().position(|f| f.is_empty()) else {
        return Err(EnvelopeError::MissingDelimiter {
            frames: frames.len(),
        });
    };
    if delim == 0 {
        return Err(EnvelopeError::EmptyRoute);
    }

    let mut frames = frames.into_iter();
    let route = frames.by_ref().take(delim).map(Identity::new).collect();
    frames.next(); // delimiter
    let body = frames.collect();

    Ok(Envelope { route, body })
}

/// Build `[route..., "", payload]`.
pub fn encode(route: &[Identity], payload: impl Into<Frame>) -> Multipart {
    encode_body(route, vec![payload.into()])
}

/// Build `[route..., "", body...]`.
pub fn encode_body(route: &[Identity], body: Vec<Frame>) -> Multipart {
    let mut frames = Vec::with_capacity(route.len() + 1 + body.len());
    frames.extend(route.iter().map(|id| id.as_bytes().to_vec()));
    frames.push(Frame::new());
    frames.extend(body);
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<Identity> {
        names.iter().map(|n| Identity::from(*n)).collect()
    }

    #[test]
    fn test_roundtrip_single_hop() {
        let route = ids(&["client-a"]);
        let env = decode(encode(&route, b"HELLO".to_vec())).unwrap();
        assert_eq!(env.route, route);
        assert_eq!(env.payload(), Some(b"HELLO".as_slice()));
    }

    #[test]
    fn test_roundtrip_multi_hop_and_binary_payload() {
        let route = vec![
            Identity::from_sequence(1),
            Identity::from_sequence(2),
            Identity::from("proxy"),
        ];
        let payload: Vec<u8> = (0..=255).collect();
        let env = decode(encode(&route, payload.clone())).unwrap();
        assert_eq!(env.route, route);
        assert_eq!(env.into_payload(), Some(payload));
    }

    #[test]
    fn test_roundtrip_empty_payload() {
        let route = ids(&["w"]);
        let env = decode(encode(&route, Vec::new())).unwrap();
        assert_eq!(env.route, route);
        assert_eq!(env.payload(), Some(b"".as_slice()));
    }

    #[test]
    fn test_encode_inserts_single_delimiter() {
        let frames = encode(&ids(&["a", "b"]), b"x".to_vec());
        assert_eq!(
            frames,
            vec![b"a".to_vec(), b"b".to_vec(), Vec::new(), b"x".to_vec()]
        );
    }

    #[test]
    fn test_decode_without_delimiter() {
        let err = decode(vec![b"a".to_vec(), b"READY".to_vec()]).unwrap_err();
        assert_eq!(err, EnvelopeError::MissingDelimiter { frames: 2 });
    }

    #[test]
    fn test_decode_leading_delimiter() {
        let err = decode(vec![Vec::new(), b"payload".to_vec()]).unwrap_err();
        assert_eq!(err, EnvelopeError::EmptyRoute);
    }

    #[test]
    fn test_nested_reply_envelope() {
        // [worker, "", client, "", reply] as seen on the worker channel
        let inner = encode(&ids(&["client-7"]), b"OK".to_vec());
        let outer = encode_body(&ids(&["worker-1"]), inner);

        let env = decode(outer).unwrap();
        assert_eq!(env.origin(), &Identity::from("worker-1"));
        assert_eq!(env.payload(), None);

        let reply = decode(env.body).unwrap();
        assert_eq!(reply.origin(), &Identity::from("client-7"));
        assert_eq!(reply.payload(), Some(b"OK".as_slice()));
    }
}
