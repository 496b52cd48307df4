pub mod envelope;
pub mod wire;

pub use envelope::{Envelope, EnvelopeError};
pub use wire::{FrameBuf, WireError};
