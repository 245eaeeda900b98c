//! Centralized configuration constants for the log service.
//!
//! Runtime-tunable settings live next to the component that consumes them
//! (`StoreOptions`, `SessionConfig`); this module holds the defaults.

use std::time::Duration;

/// Network listener defaults.
pub struct ServerConfig;

impl ServerConfig {
    pub const BIND_HOST: &'static str = "0.0.0.0";
    pub const WEB_PORT: u16 = 80;
    pub const RPC_PORT: u16 = 5001;
}

/// Persistent-connection protocol limits.
pub struct RpcConfig;

impl RpcConfig {
    /// Maximum frame payload accepted from a peer (16 MB).
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Pause after a transient accept failure that is not a simple abort.
    pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);
    pub const JSONRPC_VERSION: &'static str = "2.0";
}

/// Process lifecycle timing.
pub struct LifecycleConfig;

impl LifecycleConfig {
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);
}

/// Document store defaults.
pub struct StoreDefaults;

impl StoreDefaults {
    pub const URL: &'static str = "sqlite://data/logs.db";
    pub const USERNAME: &'static str = "admin";
    pub const PASSWORD: &'static str = "password";
    pub const LOG_COLLECTION: &'static str = "logs";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ports_are_distinct() {
        assert_ne!(ServerConfig::WEB_PORT, ServerConfig::RPC_PORT);
    }

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(LifecycleConfig::SHUTDOWN_TIMEOUT > Duration::ZERO);
        assert!(RpcConfig::ACCEPT_ERROR_BACKOFF < LifecycleConfig::SHUTDOWN_TIMEOUT);
    }
}
