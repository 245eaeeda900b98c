//! Client for the persistent-connection protocol.
//!
//! One client owns one TCP connection. Calls are serialized through a tokio
//! `Mutex`, so a shared client can be used from many tasks; for parallel calls
//! open one client per task.

use super::protocol::{read_frame, write_frame, RpcRequest, RpcResponse};
use crate::config::RpcConfig;
use crate::error::{LogServiceError, Result};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
pub struct RpcClient {
    stream: Mutex<TcpStream>,
    addr: SocketAddr,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Connect to an RPC server, giving up after `RpcConfig::CONNECT_TIMEOUT`.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = tokio::time::timeout(RpcConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| LogServiceError::Timeout(RpcConfig::CONNECT_TIMEOUT))??;

        debug!("RPC client connected to {}", addr);

        Ok(Self {
            stream: Mutex::new(stream),
            addr,
            next_id: AtomicU64::new(1),
        })
    }

    /// Call `method` and wait for its response.
    ///
    /// A JSON-RPC error from the server comes back as `LogServiceError::Remote`
    /// carrying the server's code and message.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request_bytes = serde_json::to_vec(&RpcRequest::new(method, params, id))?;

        let mut stream = self.stream.lock().await;
        let (mut reader, mut writer) = stream.split();

        write_frame(&mut writer, &request_bytes).await?;

        let response_bytes = read_frame(&mut reader, RpcConfig::MAX_MESSAGE_SIZE)
            .await?
            .ok_or_else(|| LogServiceError::Io {
                message: format!("RPC server at {} closed the connection", self.addr),
                source: None,
            })?;

        let response: RpcResponse = serde_json::from_slice(&response_bytes)?;

        if let Some(err) = response.error {
            return Err(LogServiceError::Remote {
                code: err.code,
                message: err.message,
            });
        }

        response
            .result
            .ok_or_else(|| LogServiceError::Other("RPC response missing result".to_string()))
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AppContext;
    use crate::rpc::dispatch::{Registry, HEALTH_CHECK};
    use crate::rpc::server::RpcServer;
    use crate::rpc::service::LogService;
    use crate::session::{SessionConfig, SessionManager};
    use crate::store::{StoreClient, StoreOptions};
    use serde_json::json;
    use std::sync::Arc;

    async fn start() -> crate::rpc::server::RpcServerHandle {
        let store = StoreClient::connect(StoreOptions::in_memory()).await.unwrap();
        let ctx = AppContext::new(store, SessionManager::new(SessionConfig::default()));
        let mut registry = Registry::new();
        LogService::register(&mut registry).unwrap();
        let table = Arc::new(registry.into_table(ctx));

        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        RpcServer::bind(addr, table).await.unwrap().spawn()
    }

    #[tokio::test]
    async fn test_client_log_info_and_get() {
        let handle = start().await;
        let client = RpcClient::connect(handle.addr().unwrap()).await.unwrap();

        let health = client.call(HEALTH_CHECK, json!({})).await.unwrap();
        assert_eq!(health["status"], "ok");

        let created = client
            .call(LogService::LOG_INFO, json!({"name": "auth", "data": "login"}))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap();

        let fetched = client
            .call(LogService::GET_LOG, json!({"id": id}))
            .await
            .unwrap();
        assert_eq!(fetched["name"], "auth");
        assert_eq!(fetched["data"], "login");
    }

    #[tokio::test]
    async fn test_client_surfaces_remote_errors() {
        let handle = start().await;
        let client = RpcClient::connect(handle.addr().unwrap()).await.unwrap();

        let err = client.call("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, LogServiceError::Remote { code: -32601, .. }));

        let err = client
            .call(LogService::GET_LOG, json!({"id": "missing"}))
            .await
            .unwrap_err();
        assert!(matches!(err, LogServiceError::Remote { code: -32002, .. }));

        // The connection survives failed calls.
        let listed = client.call(LogService::LIST_LOGS, json!({})).await.unwrap();
        assert_eq!(listed, json!([]));
    }

    #[tokio::test]
    async fn test_client_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(RpcClient::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_client_reports_closed_server() {
        let handle = start().await;
        let client = RpcClient::connect(handle.addr().unwrap()).await.unwrap();
        client.call(HEALTH_CHECK, json!({})).await.unwrap();

        handle.shutdown();
        handle.connections().drained().await;

        assert!(client.call(HEALTH_CHECK, json!({})).await.is_err());
    }
}
