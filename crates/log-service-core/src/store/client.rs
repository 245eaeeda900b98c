//! Shared store client handle.

use super::collection::Collection;
use super::options::{Credentials, StoreLocation, StoreOptions};
use crate::error::{LogServiceError, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Handle to the document store connection.
///
/// Cheap to clone; every clone talks to the same connection. The SQLite
/// connection is not `Sync`, so it sits behind a mutex and each call holds
/// the lock for exactly one statement or transaction on a blocking worker.
/// Concurrent callers are therefore serialized here, which is what keeps
/// facade writes atomic from the caller's point of view.
#[derive(Clone)]
pub struct StoreClient {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    conn: Mutex<Option<Connection>>,
    connected: AtomicBool,
    location: StoreLocation,
    principal: String,
}

impl StoreClient {
    /// Open the store, create the schema and authenticate.
    pub async fn connect(options: StoreOptions) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::connect_blocking(options))
            .await
            .map_err(|e| LogServiceError::Other(format!("Store connect task failed: {}", e)))?
    }

    fn connect_blocking(options: StoreOptions) -> Result<Self> {
        let location = options.location.clone();
        let unavailable = |message: String| LogServiceError::StoreUnavailable {
            location: location.to_string(),
            message,
        };

        let conn = match &options.location {
            StoreLocation::Memory => Connection::open_in_memory(),
            StoreLocation::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        unavailable(format!(
                            "Failed to create store directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
                Connection::open(path)
            }
        }
        .map_err(|e| unavailable(e.to_string()))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;",
        )
        .map_err(|e| unavailable(format!("Failed to set pragmas: {}", e)))?;

        init_schema(&conn)?;
        authenticate(&conn, &options.credentials)?;

        info!(
            "Connected to store at {} as {}",
            options.location, options.credentials.username
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(Some(conn)),
                connected: AtomicBool::new(true),
                location: options.location,
                principal: options.credentials.username,
            }),
        })
    }

    /// Get a handle to a named document collection.
    pub fn collection(&self, name: &str) -> Collection {
        Collection::new(self.clone(), name)
    }

    /// Round-trip a trivial query through the connection.
    pub async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }

    /// Whether the connection is still held by this handle.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn location(&self) -> &StoreLocation {
        &self.inner.location
    }

    pub fn principal(&self) -> &str {
        &self.inner.principal
    }

    /// Release the connection, waiting at most `timeout`.
    ///
    /// The release has to acquire the connection lock, so it waits for any
    /// call already holding it. If that does not finish in time this returns
    /// `Timeout`; the release itself still completes in the background once
    /// the lock frees up. Calling this again after a release is a no-op.
    pub async fn disconnect(&self, timeout: Duration) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let release = tokio::task::spawn_blocking(move || inner.release());

        match tokio::time::timeout(timeout, release).await {
            Ok(joined) => {
                joined.map_err(|e| {
                    LogServiceError::Other(format!("Store release task failed: {}", e))
                })??;
                Ok(())
            }
            Err(_) => Err(LogServiceError::Timeout(timeout)),
        }
    }

    /// Run `op` against the live connection on a blocking worker.
    pub(crate) async fn with_conn<F, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock()?;
            let conn = guard.as_mut().ok_or(LogServiceError::StoreDisconnected)?;
            op(conn)
        })
        .await
        .map_err(|e| LogServiceError::Other(format!("Store task failed: {}", e)))?
    }
}

impl std::fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClient")
            .field("location", &self.inner.location)
            .field("principal", &self.inner.principal)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl StoreInner {
    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn.lock().map_err(|e| LogServiceError::Database {
            message: format!("Failed to lock store connection: {}", e),
            source: None,
        })
    }

    /// Take the connection out and close it. Returns `false` if it was already gone.
    fn release(&self) -> Result<bool> {
        let conn = self.lock()?.take();
        self.connected.store(false, Ordering::SeqCst);

        match conn {
            Some(conn) => {
                conn.close().map_err(|(_, e)| LogServiceError::Database {
                    message: format!("Failed to close store connection: {}", e),
                    source: Some(e),
                })?;
                info!("Released store connection to {}", self.location);
                Ok(true)
            }
            None => {
                debug!("Store connection to {} already released", self.location);
                Ok(false)
            }
        }
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let conn = match self.conn.get_mut() {
            Ok(conn) => conn.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(conn) = conn {
            warn!(
                "Store handle for {} dropped without disconnect, closing connection",
                self.location
            );
            if let Err((_, e)) = conn.close() {
                warn!("Failed to close store connection on drop: {}", e);
            }
        }
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Documents of every collection
        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT NOT NULL,
            id TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (collection, id)
        );

        -- Newest-first listing
        CREATE INDEX IF NOT EXISTS idx_documents_created
            ON documents(collection, created_at);

        -- Store principals (secret kept as SHA-256 hex)
        CREATE TABLE IF NOT EXISTS store_principals (
            username TEXT PRIMARY KEY,
            secret_sha256 TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .map_err(|e| LogServiceError::Database {
        message: format!("Failed to initialize store schema: {}", e),
        source: Some(e),
    })
}

/// Check the credential pair; the first principal presented to an empty store is enrolled.
fn authenticate(conn: &Connection, credentials: &Credentials) -> Result<()> {
    let digest = credentials.secret_digest();

    let enrolled: i64 =
        conn.query_row("SELECT COUNT(*) FROM store_principals", [], |row| row.get(0))?;

    if enrolled == 0 {
        conn.execute(
            "INSERT INTO store_principals (username, secret_sha256, created_at) VALUES (?1, ?2, ?3)",
            params![credentials.username, digest, Utc::now().to_rfc3339()],
        )?;
        info!("Enrolled store principal {}", credentials.username);
        return Ok(());
    }

    let stored: Option<String> = conn
        .query_row(
            "SELECT secret_sha256 FROM store_principals WHERE username = ?1",
            params![credentials.username],
            |row| row.get(0),
        )
        .optional()?;

    match stored {
        Some(secret) if secret == digest => Ok(()),
        _ => Err(LogServiceError::StoreAuth {
            principal: credentials.username.clone(),
        }),
    }
}
