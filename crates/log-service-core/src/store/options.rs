//! Store connection options.

use crate::config::StoreDefaults;
use crate::error::{LogServiceError, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// Where the document store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Private in-memory database, gone when the handle is released.
    Memory,
    /// SQLite database file.
    File(PathBuf),
}

impl StoreLocation {
    /// Parse a store URL.
    ///
    /// Accepts `sqlite::memory:`, `:memory:`, `sqlite://<path>` and bare paths.
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        if url.is_empty() {
            return Err(LogServiceError::Config {
                message: "Store URL is empty".to_string(),
            });
        }

        if url == ":memory:" || url == "sqlite::memory:" {
            return Ok(StoreLocation::Memory);
        }

        if let Some(path) = url.strip_prefix("sqlite://") {
            if path.is_empty() {
                return Err(LogServiceError::Config {
                    message: format!("Store URL has no path: {}", url),
                });
            }
            return Ok(StoreLocation::File(PathBuf::from(path)));
        }

        if let Some((scheme, _)) = url.split_once("://") {
            return Err(LogServiceError::Config {
                message: format!("Unsupported store scheme: {}", scheme),
            });
        }

        Ok(StoreLocation::File(PathBuf::from(url)))
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreLocation::Memory => write!(f, "sqlite::memory:"),
            StoreLocation::File(path) => write!(f, "sqlite://{}", path.display()),
        }
    }
}

/// Principal/secret pair presented to the store.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Hex SHA-256 of the secret, the only form that is persisted.
    pub(crate) fn secret_digest(&self) -> String {
        hex::encode(Sha256::digest(self.password.as_bytes()))
    }
}

// Keep the secret out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::new(StoreDefaults::USERNAME, StoreDefaults::PASSWORD)
    }
}

/// Everything needed to open the store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub location: StoreLocation,
    pub credentials: Credentials,
}

impl StoreOptions {
    pub fn new(location: StoreLocation, credentials: Credentials) -> Self {
        Self {
            location,
            credentials,
        }
    }

    /// In-memory store with default credentials. Handy for tests.
    pub fn in_memory() -> Self {
        Self::new(StoreLocation::Memory, Credentials::default())
    }

    pub fn from_url(url: &str, credentials: Credentials) -> Result<Self> {
        Ok(Self::new(StoreLocation::parse(url)?, credentials))
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            location: StoreLocation::File(PathBuf::from("data/logs.db")),
            credentials: Credentials::default(),
        }
    }
}
