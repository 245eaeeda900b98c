//! Data-access facade over the log collection.

use super::entry::{LogEntry, NewLogEntry};
use crate::config::StoreDefaults;
use crate::error::{LogServiceError, Result};
use crate::store::{Collection, Document, StoreClient};
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

/// The only way handlers read or write log records.
///
/// Implementations must tolerate any number of concurrent callers; each call
/// is atomic from the caller's point of view.
#[async_trait]
pub trait LogRepository: Send + Sync {
    /// Persist a new record and return its id.
    async fn create(&self, entry: NewLogEntry) -> Result<String>;

    async fn get(&self, id: &str) -> Result<LogEntry>;

    /// All records, newest first.
    async fn all(&self) -> Result<Vec<LogEntry>>;

    /// Overwrite name and data of an existing record.
    async fn update(&self, id: &str, entry: NewLogEntry) -> Result<LogEntry>;

    /// Delete every record, returning how many were removed.
    async fn drop_collection(&self) -> Result<usize>;
}

/// [`LogRepository`] backed by a store collection.
///
/// Serialization of concurrent calls is provided by the store handle's
/// connection lock; this type holds no state of its own.
#[derive(Debug, Clone)]
pub struct StoreLogRepository {
    collection: Collection,
}

impl StoreLogRepository {
    pub fn new(store: &StoreClient) -> Self {
        Self::with_collection(store, StoreDefaults::LOG_COLLECTION)
    }

    pub fn with_collection(store: &StoreClient, name: &str) -> Self {
        Self {
            collection: store.collection(name),
        }
    }
}

#[async_trait]
impl LogRepository for StoreLogRepository {
    async fn create(&self, entry: NewLogEntry) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let body = serde_json::to_value(&entry)?;
        let doc = self.collection.insert(id, body).await?;
        debug!("Created log entry {} ({})", doc.id, entry.name);
        Ok(doc.id)
    }

    async fn get(&self, id: &str) -> Result<LogEntry> {
        match self.collection.find_one(id).await? {
            Some(doc) => to_entry(doc),
            None => Err(LogServiceError::EntryNotFound { id: id.to_string() }),
        }
    }

    async fn all(&self) -> Result<Vec<LogEntry>> {
        self.collection
            .find_all()
            .await?
            .into_iter()
            .map(to_entry)
            .collect()
    }

    async fn update(&self, id: &str, entry: NewLogEntry) -> Result<LogEntry> {
        let body = serde_json::to_value(&entry)?;
        match self.collection.replace(id, body).await? {
            Some(doc) => to_entry(doc),
            None => Err(LogServiceError::EntryNotFound { id: id.to_string() }),
        }
    }

    async fn drop_collection(&self) -> Result<usize> {
        let removed = self.collection.drop_collection().await?;
        debug!("Dropped {} log entries", removed);
        Ok(removed)
    }
}

fn to_entry(doc: Document) -> Result<LogEntry> {
    let fields: NewLogEntry = serde_json::from_value(doc.body)
        .map_err(|e| LogServiceError::corrupt_record(&doc.id, e))?;
    Ok(LogEntry {
        id: doc.id,
        name: fields.name,
        data: fields.data,
        created_at: doc.created_at,
        updated_at: doc.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreOptions;
    use std::collections::HashSet;
    use std::sync::Arc;

    async fn repository() -> StoreLogRepository {
        let store = StoreClient::connect(StoreOptions::in_memory()).await.unwrap();
        StoreLogRepository::new(&store)
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let repo = repository().await;
        let id = repo.create(NewLogEntry::new("auth", "login ok")).await.unwrap();

        let entry = repo.get(&id).await.unwrap();
        assert_eq!(entry.name, "auth");
        assert_eq!(entry.data, "login ok");
        assert_eq!(entry.created_at, entry.updated_at);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let repo = repository().await;
        let err = repo.get("nope").await.unwrap_err();
        assert!(matches!(err, LogServiceError::EntryNotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_and_drop() {
        let repo = repository().await;
        let id = repo.create(NewLogEntry::new("a", "1")).await.unwrap();
        repo.create(NewLogEntry::new("b", "2")).await.unwrap();

        let updated = repo.update(&id, NewLogEntry::new("a", "changed")).await.unwrap();
        assert_eq!(updated.data, "changed");
        assert!(matches!(
            repo.update("missing", NewLogEntry::new("x", "y")).await,
            Err(LogServiceError::EntryNotFound { .. })
        ));

        assert_eq!(repo.all().await.unwrap().len(), 2);
        assert_eq!(repo.drop_collection().await.unwrap(), 2);
        assert!(repo.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_missing_fields_is_database_error() {
        let store = StoreClient::connect(StoreOptions::in_memory()).await.unwrap();
        store
            .collection(StoreDefaults::LOG_COLLECTION)
            .insert("bad".to_string(), serde_json::json!({"oops": 1}))
            .await
            .unwrap();
        let repo = StoreLogRepository::new(&store);

        let err = repo.get("bad").await.unwrap_err();
        assert!(matches!(err, LogServiceError::Database { .. }));
        assert_eq!(err.to_rpc_error_code(), -32603);
        assert!(matches!(
            repo.all().await,
            Err(LogServiceError::Database { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_are_distinct_and_retrievable() {
        let repo = Arc::new(repository().await);

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let repo = Arc::clone(&repo);
                tokio::spawn(async move {
                    repo.create(NewLogEntry::new(format!("svc-{}", i), format!("payload-{}", i)))
                        .await
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap().unwrap());
        }
        assert_eq!(ids.len(), 64);

        for id in &ids {
            let entry = repo.get(id).await.unwrap();
            let suffix = entry.name.trim_start_matches("svc-");
            assert_eq!(entry.data, format!("payload-{}", suffix));
        }
        assert_eq!(repo.all().await.unwrap().len(), 64);
    }
}
