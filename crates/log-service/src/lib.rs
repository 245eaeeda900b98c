//! Log ingestion gateway.
//!
//! Serves the HTTP protocol and the persistent-connection RPC protocol side
//! by side over one shared [`log_service_core::AppContext`]. [`Gateway`]
//! owns startup and shutdown; the binary in `main.rs` only parses flags,
//! sets up logging and hands over.

pub mod config;
pub mod http;
pub mod lifecycle;

pub use config::{Args, GatewayConfig, LogFormat};
pub use lifecycle::{Gateway, GatewayBuilder, ShutdownError, StartupError};
