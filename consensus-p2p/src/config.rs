//! Configuration for the reference P2P server and transport.

use std::net::SocketAddr;

/// Configuration for [`crate::server::P2pServer`] and the TCP transport.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    /// Local address to bind the listener on.
    /// Default: `0.0.0.0:30303`
    pub bind_addr: SocketAddr,

    /// Maximum number of connected peers.
    /// Trusted peers are admitted even when this limit is reached.
    pub max_peers: usize,

    /// Capacity of each peer's outbound message queue.
    /// Sends beyond this are dropped with `PeerError::QueueFull`.
    pub send_queue_capacity: usize,

    /// Maximum size of a single message payload in bytes.
    pub max_message_size: usize,

    /// Time allowed for the hello exchange (ms).
    pub handshake_timeout_ms: u64,

    /// Per-write deadline on the socket (ms). A peer that cannot absorb a
    /// frame within this window is disconnected.
    pub write_timeout_ms: u64,

    /// Size of the inbound message channel feeding the consensus engine.
    pub channel_buffer_size: usize,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 30303)),
            max_peers: 50,
            send_queue_capacity: 1_024,
            max_message_size: 10_485_760, // 10 MB
            handshake_timeout_ms: 5_000,
            write_timeout_ms: 10_000,
            channel_buffer_size: 10_000,
        }
    }
}

impl P2pConfig {
    /// Create a config suitable for local testing with shorter timeouts.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_peers: 10,
            send_queue_capacity: 16,
            max_message_size: 1_048_576,
            handshake_timeout_ms: 1_000,
            write_timeout_ms: 1_000,
            channel_buffer_size: 1_000,
        }
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::ZeroMessageSize);
        }
        if self.handshake_timeout_ms == 0 || self.write_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.channel_buffer_size == 0 {
            return Err(ConfigError::ZeroChannelBuffer);
        }
        Ok(())
    }
}

/// Errors in P2P configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("send_queue_capacity must be > 0")]
    ZeroQueueCapacity,
    #[error("max_message_size must be > 0")]
    ZeroMessageSize,
    #[error("handshake and write timeouts must be > 0")]
    ZeroTimeout,
    #[error("channel_buffer_size must be > 0")]
    ZeroChannelBuffer,
    #[error("at least one protocol must be advertised")]
    NoProtocols,
    #[error("protocol {0} is advertised more than once")]
    DuplicateProtocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = P2pConfig::default();
        assert_eq!(config.max_peers, 50);
        assert_eq!(config.bind_addr.port(), 30303);
        assert!(config.validate().is_ok());
        assert!(P2pConfig::dev_default().validate().is_ok());
    }

    #[test]
    fn test_zero_queue_capacity_rejected() {
        let mut config = P2pConfig::dev_default();
        config.send_queue_capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroQueueCapacity));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = P2pConfig::dev_default();
        config.write_timeout_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));
    }

    #[test]
    fn test_max_peers_zero_is_allowed() {
        // A node that only talks to trusted peers.
        let mut config = P2pConfig::dev_default();
        config.max_peers = 0;
        assert!(config.validate().is_ok());
    }
}
