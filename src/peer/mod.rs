//! Blocking peers that talk to the broker
//!
//! - `Requester`: request socket used by clients and workers alike
//! - Demonstration client and worker loops

pub mod demo;
pub mod requester;

pub use demo::{run_demo_client, run_demo_worker};
pub use requester::{PeerError, Requester};
