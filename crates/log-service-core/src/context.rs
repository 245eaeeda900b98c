//! Shared application context handed to every handler.

use crate::data::{LogRepository, StoreLogRepository};
use crate::session::SessionManager;
use crate::store::StoreClient;
use std::sync::Arc;

/// Dependencies shared by both protocol servers.
///
/// Built once after the store connects and never mutated afterwards; handlers
/// receive it as `Arc<AppContext>`. The store handle and the session manager
/// synchronize internally, so shared references are all any caller needs.
pub struct AppContext {
    store: StoreClient,
    sessions: Arc<SessionManager>,
    logs: Arc<dyn LogRepository>,
}

impl AppContext {
    /// Build a context whose facade is the store-backed log repository.
    pub fn new(store: StoreClient, sessions: SessionManager) -> Arc<Self> {
        let logs = Arc::new(StoreLogRepository::new(&store));
        Self::with_repository(store, sessions, logs)
    }

    /// Build a context around a caller-supplied facade.
    pub fn with_repository(
        store: StoreClient,
        sessions: SessionManager,
        logs: Arc<dyn LogRepository>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            sessions: Arc::new(sessions),
            logs,
        })
    }

    pub fn store(&self) -> &StoreClient {
        &self.store
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// The data-access facade.
    pub fn logs(&self) -> &dyn LogRepository {
        self.logs.as_ref()
    }
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("store", &self.store)
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::NewLogEntry;
    use crate::session::SessionConfig;
    use crate::store::StoreOptions;

    #[tokio::test]
    async fn test_context_facade_uses_shared_store() {
        let store = StoreClient::connect(StoreOptions::in_memory()).await.unwrap();
        let ctx = AppContext::new(store.clone(), SessionManager::new(SessionConfig::default()));

        let id = ctx.logs().create(NewLogEntry::new("ctx", "data")).await.unwrap();
        assert_eq!(ctx.logs().get(&id).await.unwrap().name, "ctx");
        assert_eq!(store.collection("logs").count().await.unwrap(), 1);
        assert!(ctx.store().is_connected());
    }
}
