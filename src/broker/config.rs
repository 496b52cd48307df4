use std::net::SocketAddr;
use std::time::Duration;

use crate::core::constants;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("worker capacity must be at least 1")]
    ZeroCapacity,

    #[error("ring size must be at least 1")]
    ZeroRingSize,

    #[error("at least one accept must be kept in flight per listener")]
    ZeroAccepts,

    #[error("client and worker channels cannot share address {0}")]
    SharedAddress(SocketAddr),

    #[error("message limit must be at least 1 when set")]
    ZeroMessageLimit,
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Client-facing listen address
    pub client_addr: SocketAddr,
    /// Worker-facing listen address
    pub worker_addr: SocketAddr,
    /// Upper bound on idle workers held in the pool
    pub worker_capacity: usize,
    /// Stop after relaying this many replies (bounded demonstration run)
    pub message_limit: Option<usize>,
    /// Size of the io_uring submission/completion queue
    pub ring_size: u32,
    /// Accept operations kept in flight per listener
    pub initial_accepts: usize,
    /// Initial receive buffer per connection
    pub io_buffer_capacity: usize,
    pub max_frame_size: usize,
    /// Initial capacity for the connection slab
    pub pool_capacity: usize,
    /// Longest a wait blocks before rechecking the shutdown flag
    pub tick: Duration,
    /// Pin the broker thread to this core
    pub pin_core: Option<usize>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            client_addr: constants::DEFAULT_CLIENT_ADDR,
            worker_addr: constants::DEFAULT_WORKER_ADDR,
            worker_capacity: constants::DEFAULT_WORKER_CAPACITY,
            message_limit: None,
            ring_size: constants::DEFAULT_RING_SIZE,
            initial_accepts: constants::INITIAL_ACCEPTS_PER_LISTENER,
            io_buffer_capacity: constants::IO_BUFFER_CAPACITY,
            max_frame_size: constants::MAX_FRAME_SIZE,
            pool_capacity: constants::CONNECTION_POOL_CAPACITY,
            tick: Duration::from_millis(constants::DEFAULT_TICK_MILLIS),
            pin_core: None,
        }
    }
}

impl BrokerConfig {
    pub fn get(client_addr: SocketAddr, worker_addr: SocketAddr, worker_capacity: usize) -> Self {
        Self {
            client_addr,
            worker_addr,
            worker_capacity,
            ..Self::default()
        }
    }

    pub fn with_message_limit(mut self, limit: usize) -> Self {
        self.message_limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.ring_size == 0 {
            return Err(ConfigError::ZeroRingSize);
        }
        if self.initial_accepts == 0 {
            return Err(ConfigError::ZeroAccepts);
        }
        if self.message_limit == Some(0) {
            return Err(ConfigError::ZeroMessageLimit);
        }
        // port 0 asks the kernel for distinct ephemeral ports
        if self.client_addr == self.worker_addr && self.client_addr.port() != 0 {
            return Err(ConfigError::SharedAddress(self.client_addr));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BrokerConfig::default();
        assert_eq!(config.client_addr.to_string(), "127.0.0.1:5672");
        assert_eq!(config.worker_addr.to_string(), "127.0.0.1:5673");
        assert_eq!(config.message_limit, None);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = BrokerConfig::default();
        config.worker_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroCapacity));

        let config = BrokerConfig::default().with_message_limit(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroMessageLimit));

        let addr: SocketAddr = "127.0.0.1:7000".parse().unwrap();
        let config = BrokerConfig::get(addr, addr, 4);
        assert_eq!(config.validate(), Err(ConfigError::SharedAddress(addr)));
    }

    #[test]
    fn test_ephemeral_ports_may_repeat() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        assert_eq!(BrokerConfig::get(addr, addr, 1).validate(), Ok(()));
    }
}
