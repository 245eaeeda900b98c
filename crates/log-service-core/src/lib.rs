//! Core of the log ingestion gateway.
//!
//! Everything both protocol front-ends share lives here:
//!
//! - [`store`]: the document store client and its collections
//! - [`data`]: the log-entry facade built on top of the store
//! - [`session`]: server-side HTTP session state
//! - [`rpc`]: the persistent-connection protocol, server and client
//! - [`shutdown`]: the process-wide shutdown signal
//!
//! The HTTP front-end and process lifecycle live in the `log-service` crate.

pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod rpc;
pub mod session;
pub mod shutdown;
pub mod store;

pub use context::AppContext;
pub use data::{LogEntry, LogRepository, NewLogEntry, StoreLogRepository};
pub use error::{LogServiceError, Result};
pub use session::{SameSite, Session, SessionConfig, SessionManager};
pub use shutdown::{Shutdown, ShutdownListener};
pub use store::{Collection, Credentials, Document, StoreClient, StoreLocation, StoreOptions};
