//! Startup and shutdown of the whole gateway.
//!
//! Startup order, each step a precondition for the next:
//!
//! 1. connect the store (fatal on failure)
//! 2. build the shared [`AppContext`]
//! 3. register the RPC dispatch target and freeze it
//! 4. bind the HTTP listener, then the RPC listener
//!
//! If any step after the store connected fails, the store is released before
//! the error is returned.
//!
//! [`Gateway::run`] serves the HTTP protocol on a background task and runs the
//! RPC accept loop on the caller's task. Once the shutdown signal fires,
//! draining both servers and releasing the store share one time budget. If
//! the budget runs out, one [`ShutdownError`] is logged and returned; `run`
//! never waits past it.

use crate::config::GatewayConfig;
use crate::http::HttpServer;
use log_service_core::rpc::{DispatchTable, LogService, Registry, RpcServer};
use log_service_core::{
    AppContext, LogRepository, LogServiceError, SessionManager, Shutdown, ShutdownListener,
    StoreClient,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Failure before serving begins. The process cannot continue.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to connect to store: {0}")]
    Store(#[source] LogServiceError),

    #[error("Failed to register RPC methods: {0}")]
    Registration(#[source] LogServiceError),

    #[error("Failed to bind {protocol} listener on {addr}: {source}")]
    Bind {
        protocol: &'static str,
        addr: SocketAddr,
        #[source]
        source: LogServiceError,
    },
}

/// Failure while stopping. Logged; the process exits regardless.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("Shutdown did not complete within {0:?}")]
    Timeout(Duration),

    #[error("Failed to release store: {0}")]
    StoreRelease(#[source] LogServiceError),

    #[error("{protocol} server failed: {message}")]
    Server {
        protocol: &'static str,
        message: String,
    },
}

type RepositoryFactory = Box<dyn FnOnce(&StoreClient) -> Arc<dyn LogRepository> + Send>;

/// Configures and starts a [`Gateway`].
pub struct GatewayBuilder {
    config: GatewayConfig,
    repository: Option<RepositoryFactory>,
}

impl GatewayBuilder {
    /// Replace the store-backed facade with one built by `factory`.
    pub fn repository<F>(mut self, factory: F) -> Self
    where
        F: FnOnce(&StoreClient) -> Arc<dyn LogRepository> + Send + 'static,
    {
        self.repository = Some(Box::new(factory));
        self
    }

    pub async fn start(self) -> Result<Gateway, StartupError> {
        let GatewayBuilder { config, repository } = self;
        let shutdown_timeout = config.shutdown_timeout;

        info!("Connecting to store at {}", config.store.location);
        let store = StoreClient::connect(config.store.clone())
            .await
            .map_err(StartupError::Store)?;

        match Self::assemble(config, store.clone(), repository).await {
            Ok(gateway) => Ok(gateway),
            Err(e) => {
                if let Err(release) = store.disconnect(shutdown_timeout).await {
                    warn!("Failed to release store after startup error: {}", release);
                }
                Err(e)
            }
        }
    }

    async fn assemble(
        config: GatewayConfig,
        store: StoreClient,
        repository: Option<RepositoryFactory>,
    ) -> Result<Gateway, StartupError> {
        let sessions = SessionManager::new(config.session.clone());
        let context = match repository {
            Some(factory) => {
                let logs = factory(&store);
                AppContext::with_repository(store.clone(), sessions, logs)
            }
            None => AppContext::new(store.clone(), sessions),
        };

        let mut registry = Registry::new();
        LogService::register(&mut registry).map_err(StartupError::Registration)?;
        let table = Arc::new(registry.into_table(Arc::clone(&context)));

        let http = HttpServer::bind(config.web_addr, Arc::clone(&context))
            .await
            .map_err(|e| StartupError::Bind {
                protocol: "HTTP",
                addr: config.web_addr,
                source: e.into(),
            })?;

        let rpc = RpcServer::bind(config.rpc_addr, table)
            .await
            .map_err(|source| StartupError::Bind {
                protocol: "RPC",
                addr: config.rpc_addr,
                source,
            })?;
        let rpc_addr = rpc.local_addr().unwrap_or(config.rpc_addr);

        Ok(Gateway {
            store,
            context,
            http,
            rpc,
            rpc_addr,
            shutdown: Shutdown::new(),
            shutdown_timeout: config.shutdown_timeout,
        })
    }
}

/// A started gateway: store connected, both listeners bound, not yet serving.
pub struct Gateway {
    store: StoreClient,
    context: Arc<AppContext>,
    http: HttpServer,
    rpc: RpcServer<TcpListener, DispatchTable>,
    rpc_addr: SocketAddr,
    shutdown: Shutdown,
    shutdown_timeout: Duration,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder {
            config,
            repository: None,
        }
    }

    pub fn web_addr(&self) -> SocketAddr {
        self.http.local_addr()
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    /// Trigger that stops a running gateway.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Serve both protocols until shutdown is triggered, then stop within the budget.
    pub async fn run(self) -> Result<(), ShutdownError> {
        let Gateway {
            store,
            context,
            http,
            rpc,
            rpc_addr: _,
            shutdown,
            shutdown_timeout,
        } = self;

        let connections = rpc.connections();
        let cleanup = spawn_session_cleanup(context, shutdown.listener());
        let mut http_task = tokio::spawn(http.serve(shutdown.listener()));

        info!("Log service running");

        let rpc_result = rpc.serve(shutdown.listener()).await;

        // Also stops HTTP if the RPC listener died on its own.
        shutdown.trigger();
        let deadline = Instant::now() + shutdown_timeout;

        let mut failure = rpc_result.err().map(|e| ShutdownError::Server {
            protocol: "RPC",
            message: e.to_string(),
        });

        let drain = async {
            let http_result = (&mut http_task).await;
            connections.drained().await;
            http_result
        };
        let drained = tokio::time::timeout_at(deadline, drain).await;

        match drained {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                failure.get_or_insert(ShutdownError::Server {
                    protocol: "HTTP",
                    message: e.to_string(),
                });
            }
            Ok(Err(e)) => {
                failure.get_or_insert(ShutdownError::Server {
                    protocol: "HTTP",
                    message: e.to_string(),
                });
            }
            Err(_) => {
                http_task.abort();
                failure.get_or_insert(ShutdownError::Timeout(shutdown_timeout));
            }
        }

        cleanup.abort();

        let remaining = deadline.saturating_duration_since(Instant::now());
        match store.disconnect(remaining).await {
            Ok(()) => info!("Store connection released"),
            Err(LogServiceError::Timeout(_)) => {
                failure.get_or_insert(ShutdownError::Timeout(shutdown_timeout));
            }
            Err(e) => {
                failure.get_or_insert(ShutdownError::StoreRelease(e));
            }
        }

        match failure {
            Some(err) => {
                error!("Shutdown incomplete: {}", err);
                Err(err)
            }
            None => {
                info!("Shutdown complete");
                Ok(())
            }
        }
    }

    /// [`Gateway::run`] with Ctrl-C and SIGTERM wired to the shutdown trigger.
    pub async fn run_until_signal(self) -> Result<(), ShutdownError> {
        let shutdown = self.shutdown_handle();
        tokio::spawn(async move {
            wait_for_signal().await;
            info!("Shutdown signal received");
            shutdown.trigger();
        });

        self.run().await
    }
}

/// Sweep expired sessions on the configured interval until shutdown.
fn spawn_session_cleanup(context: Arc<AppContext>, mut shutdown: ShutdownListener) -> JoinHandle<()> {
    let period = context.sessions().config().cleanup_interval;
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticks.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticks.tick() => {
                    let purged = context.sessions().purge_expired();
                    if purged > 0 {
                        debug!("Session cleanup removed {} records", purged);
                    }
                }
            }
        }
    })
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log_service_core::{Credentials, StoreLocation, StoreLogRepository, StoreOptions};
    use tempfile::TempDir;

    fn config() -> GatewayConfig {
        GatewayConfig::ephemeral(StoreOptions::in_memory())
    }

    #[tokio::test]
    async fn test_start_binds_both_listeners() {
        let gateway = Gateway::builder(config()).start().await.unwrap();
        assert!(gateway.web_addr().port() > 0);
        assert!(gateway.rpc_addr().port() > 0);
        assert_ne!(gateway.web_addr(), gateway.rpc_addr());
        assert!(gateway.context().store().is_connected());
    }

    #[tokio::test]
    async fn test_bind_conflict_releases_store() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = config();
        config.rpc_addr = taken.local_addr().unwrap();

        let captured = Arc::new(std::sync::Mutex::new(None));
        let slot = Arc::clone(&captured);
        let err = Gateway::builder(config)
            .repository(move |store| {
                *slot.lock().unwrap() = Some(store.clone());
                Arc::new(StoreLogRepository::new(store))
            })
            .start()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StartupError::Bind { protocol: "RPC", .. }));

        let store = captured.lock().unwrap().take().unwrap();
        assert!(!store.is_connected());
    }

    #[tokio::test]
    async fn test_running_gateway_purges_expired_sessions() {
        let mut config = config();
        config.session.lifetime = Duration::from_millis(200);
        config.session.cleanup_interval = Duration::from_millis(50);

        let gateway = Gateway::builder(config).start().await.unwrap();
        let context = Arc::clone(gateway.context());
        for i in 0..20 {
            let mut session = context.sessions().load(None);
            session.put("last_entry_id", i).unwrap();
            context.sessions().commit(&session).unwrap();
        }
        assert_eq!(context.sessions().len(), 20);

        let shutdown = gateway.shutdown_handle();
        let task = tokio::spawn(gateway.run());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(context.sessions().is_empty());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_session_cleanup_stops_on_shutdown() {
        let store = StoreClient::connect(StoreOptions::in_memory()).await.unwrap();
        let context = AppContext::new(store, SessionManager::new(Default::default()));
        let shutdown = Shutdown::new();

        let task = spawn_session_cleanup(context, shutdown.listener());
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_store_auth_failure_is_startup_error() {
        let dir = TempDir::new().unwrap();
        let location = StoreLocation::File(dir.path().join("logs.db"));

        // First principal enrolls; a different secret is then rejected.
        let first = StoreOptions::new(location.clone(), Credentials::new("admin", "password"));
        StoreClient::connect(first)
            .await
            .unwrap()
            .disconnect(Duration::from_secs(1))
            .await
            .unwrap();

        let wrong = StoreOptions::new(location, Credentials::new("admin", "wrong"));
        let err = Gateway::builder(GatewayConfig::ephemeral(wrong))
            .start()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StartupError::Store(LogServiceError::StoreAuth { .. })));
    }

    #[tokio::test]
    async fn test_run_stops_on_trigger_and_releases_store() {
        let gateway = Gateway::builder(config()).start().await.unwrap();
        let store = gateway.context().store().clone();
        let shutdown = gateway.shutdown_handle();

        let task = tokio::spawn(gateway.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!store.is_connected());
    }
}
