//! Runtime configuration for the gateway binary.

use clap::{Parser, ValueEnum};
use log_service_core::config::{LifecycleConfig, ServerConfig, StoreDefaults};
use log_service_core::{Credentials, LogServiceError, SessionConfig, StoreOptions};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Everything [`crate::Gateway`] needs to start.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub web_addr: SocketAddr,
    pub rpc_addr: SocketAddr,
    pub store: StoreOptions,
    pub session: SessionConfig,
    /// Budget for the whole shutdown sequence, store release included.
    pub shutdown_timeout: Duration,
}

impl GatewayConfig {
    /// Loopback listeners on ephemeral ports. Used by tests.
    pub fn ephemeral(store: StoreOptions) -> Self {
        let loopback = SocketAddr::from(([127, 0, 0, 1], 0));
        Self {
            web_addr: loopback,
            rpc_addr: loopback,
            store,
            ..Self::default()
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let host: IpAddr = [0, 0, 0, 0].into();
        Self {
            web_addr: SocketAddr::new(host, ServerConfig::WEB_PORT),
            rpc_addr: SocketAddr::new(host, ServerConfig::RPC_PORT),
            store: StoreOptions::default(),
            session: SessionConfig::default(),
            shutdown_timeout: LifecycleConfig::SHUTDOWN_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "log-service")]
#[command(about = "Log ingestion gateway: HTTP and persistent JSON-RPC front-ends over one store")]
pub struct Args {
    /// Host to bind both listeners to
    #[arg(long, env = "LOG_SERVICE_HOST", default_value = ServerConfig::BIND_HOST)]
    pub host: String,

    /// HTTP port (0 = auto-assign)
    #[arg(long, env = "LOG_SERVICE_WEB_PORT", default_value_t = ServerConfig::WEB_PORT)]
    pub web_port: u16,

    /// RPC port (0 = auto-assign)
    #[arg(long, env = "LOG_SERVICE_RPC_PORT", default_value_t = ServerConfig::RPC_PORT)]
    pub rpc_port: u16,

    /// Store location (`sqlite://path`, a bare path, or `sqlite::memory:`)
    #[arg(long, env = "LOG_SERVICE_STORE_URL", default_value = StoreDefaults::URL)]
    pub store_url: String,

    #[arg(long, env = "LOG_SERVICE_STORE_USER", default_value = StoreDefaults::USERNAME)]
    pub store_user: String,

    #[arg(
        long,
        env = "LOG_SERVICE_STORE_PASSWORD",
        default_value = StoreDefaults::PASSWORD,
        hide_env_values = true,
        hide_default_value = true
    )]
    pub store_password: String,

    /// Upper bound on the shutdown sequence, in seconds
    #[arg(
        long,
        env = "LOG_SERVICE_SHUTDOWN_TIMEOUT_SECS",
        default_value_t = LifecycleConfig::SHUTDOWN_TIMEOUT.as_secs()
    )]
    pub shutdown_timeout_secs: u64,

    /// Session lifetime, in seconds
    #[arg(
        long,
        env = "LOG_SERVICE_SESSION_LIFETIME_SECS",
        default_value_t = SessionConfig::DEFAULT_LIFETIME.as_secs()
    )]
    pub session_lifetime_secs: u64,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Log output format
    #[arg(long, env = "LOG_SERVICE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

impl Args {
    pub fn into_config(self) -> Result<GatewayConfig, LogServiceError> {
        let host: IpAddr = self.host.parse().map_err(|e| LogServiceError::Config {
            message: format!("Invalid host '{}': {}", self.host, e),
        })?;

        let credentials = Credentials::new(self.store_user, self.store_password);
        let store = StoreOptions::from_url(&self.store_url, credentials)?;

        let session = SessionConfig {
            lifetime: Duration::from_secs(self.session_lifetime_secs),
            ..SessionConfig::default()
        };

        Ok(GatewayConfig {
            web_addr: SocketAddr::new(host, self.web_port),
            rpc_addr: SocketAddr::new(host, self.rpc_port),
            store,
            session,
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        })
    }
}
