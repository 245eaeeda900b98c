//! Named collections of JSON documents.

use super::client::StoreClient;
use crate::error::{LogServiceError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::sync::Arc;

/// A stored document with its bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub body: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw row before the body and timestamps are decoded.
struct RawDocument {
    id: String,
    body: String,
    created_at: String,
    updated_at: String,
}

impl RawDocument {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            body: row.get(1)?,
            created_at: row.get(2)?,
            updated_at: row.get(3)?,
        })
    }

    fn decode(self) -> Result<Document> {
        Ok(Document {
            body: serde_json::from_str(&self.body)
                .map_err(|e| LogServiceError::corrupt_record(&self.id, e))?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            id: self.id,
        })
    }
}

/// Handle to one collection in the store.
#[derive(Debug, Clone)]
pub struct Collection {
    store: StoreClient,
    name: Arc<str>,
}

impl Collection {
    pub(crate) fn new(store: StoreClient, name: &str) -> Self {
        Self {
            store,
            name: Arc::from(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a new document. Fails with a validation error if the id is taken.
    pub async fn insert(&self, id: String, body: Value) -> Result<Document> {
        let name = Arc::clone(&self.name);
        let now = Utc::now();
        let encoded = serde_json::to_string(&body)?;
        let stamp = format_timestamp(&now);

        self.store
            .with_conn(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO documents (collection, id, body, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    params![&*name, id, encoded, stamp],
                )?;
                if inserted == 0 {
                    return Err(LogServiceError::Validation {
                        field: "id".to_string(),
                        message: format!("Document {} already exists in {}", id, name),
                    });
                }
                Ok(Document {
                    id,
                    body,
                    created_at: now,
                    updated_at: now,
                })
            })
            .await
    }

    pub async fn find_one(&self, id: &str) -> Result<Option<Document>> {
        let name = Arc::clone(&self.name);
        let id = id.to_string();

        self.store
            .with_conn(move |conn| find_raw(conn, &name, &id)?.map(RawDocument::decode).transpose())
            .await
    }

    /// All documents, newest first.
    pub async fn find_all(&self) -> Result<Vec<Document>> {
        let name = Arc::clone(&self.name);

        self.store
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, body, created_at, updated_at FROM documents
                     WHERE collection = ?1
                     ORDER BY created_at DESC, rowid DESC",
                )?;
                let rows = stmt
                    .query_map(params![&*name], RawDocument::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.into_iter().map(RawDocument::decode).collect()
            })
            .await
    }

    /// Replace a document's body. Returns `None` if no such document exists.
    pub async fn replace(&self, id: &str, body: Value) -> Result<Option<Document>> {
        let name = Arc::clone(&self.name);
        let id = id.to_string();
        let encoded = serde_json::to_string(&body)?;
        let stamp = format_timestamp(&Utc::now());

        self.store
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let updated = tx.execute(
                    "UPDATE documents SET body = ?3, updated_at = ?4
                     WHERE collection = ?1 AND id = ?2",
                    params![&*name, id, encoded, stamp],
                )?;
                if updated == 0 {
                    return Ok(None);
                }
                let raw = find_raw(&tx, &name, &id)?;
                tx.commit()?;
                raw.map(RawDocument::decode).transpose()
            })
            .await
    }

    /// Remove every document in the collection, returning how many were removed.
    pub async fn drop_collection(&self) -> Result<usize> {
        let name = Arc::clone(&self.name);

        self.store
            .with_conn(move |conn| {
                let removed =
                    conn.execute("DELETE FROM documents WHERE collection = ?1", params![&*name])?;
                Ok(removed)
            })
            .await
    }

    pub async fn count(&self) -> Result<usize> {
        let name = Arc::clone(&self.name);

        self.store
            .with_conn(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                    params![&*name],
                    |row| row.get(0),
                )?;
                Ok(count as usize)
            })
            .await
    }
}

fn find_raw(conn: &Connection, collection: &str, id: &str) -> Result<Option<RawDocument>> {
    Ok(conn
        .query_row(
            "SELECT id, body, created_at, updated_at FROM documents
             WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            RawDocument::from_row,
        )
        .optional()?)
}

// Fixed-width UTC stamps so lexical order matches time order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| LogServiceError::Database {
            message: format!("Invalid stored timestamp {:?}: {}", raw, e),
            source: None,
        })
}
