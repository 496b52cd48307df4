pub mod broker;
pub mod core;
pub mod peer;
pub mod protocol;
pub mod transport;
pub mod util;

pub use broker::{Broker, BrokerConfig, BrokerError, DispatchOutcome, DispatchStats};
