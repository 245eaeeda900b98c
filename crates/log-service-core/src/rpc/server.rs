//! Persistent-connection RPC server.
//!
//! Accepts connections in an unbounded loop and serves each one in its own
//! spawned task. A connection carries any number of sequential calls; each
//! call is read, dispatched and answered before the next one is read.
//!
//! # Failure isolation
//!
//! - Transient accept failures are logged and the loop keeps accepting. Only
//!   a listener that reports itself unusable stops the loop.
//! - A call that fails (bad JSON, unknown method, facade error) gets an error
//!   response on its own connection, which stays open.
//! - A framing failure (oversized or truncated frame, invalid UTF-8) closes
//!   that one connection.
//!
//! # Shutdown
//!
//! The accept loop stops when the shutdown signal fires. Connection handlers
//! notice the signal at their next frame boundary, so a call that is already
//! being dispatched finishes and its response is written first. Callers that
//! need to wait for that use [`ConnectionTracker::drained`].

use super::dispatch::RpcDispatch;
use super::protocol::{read_frame, write_frame, RpcRequest, RpcResponse};
use crate::config::RpcConfig;
use crate::error::{LogServiceError, Result};
use crate::shutdown::{Shutdown, ShutdownListener};
use async_trait::async_trait;
use serde_json::Value;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Source of inbound connections.
#[async_trait]
pub trait Acceptor: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Wait for the next connection. Returns the stream and a peer description.
    async fn accept(&mut self) -> io::Result<(Self::Stream, String)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, String)> {
        let (stream, peer) = TcpListener::accept(self).await?;
        Ok((stream, peer.to_string()))
    }
}

/// What the accept loop does after a failed accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptFailure {
    /// The failed connection is gone; accept the next one right away.
    Retry,
    /// Transient resource trouble (descriptor or buffer exhaustion); pause, then accept again.
    Backoff,
    /// The listener itself is unusable; stop the loop.
    Closed,
}

/// Sort an accept error into a recoverable or terminal condition.
pub fn classify_accept_error(err: &io::Error) -> AcceptFailure {
    use io::ErrorKind::*;

    match err.kind() {
        ConnectionAborted | ConnectionReset | Interrupted | WouldBlock | TimedOut => {
            AcceptFailure::Retry
        }
        InvalidInput | NotConnected | Unsupported => AcceptFailure::Closed,
        _ => AcceptFailure::Backoff,
    }
}

/// Live-connection bookkeeping shared between the accept loop and its handlers.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Debug, Default)]
struct TrackerInner {
    active: AtomicUsize,
    accepted: AtomicU64,
    idle: Notify,
}

impl ConnectionTracker {
    /// Connections currently being served.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Connections accepted since the server started.
    pub fn total_accepted(&self) -> u64 {
        self.inner.accepted.load(Ordering::SeqCst)
    }

    /// Resolve once no connection is being served.
    pub async fn drained(&self) {
        loop {
            // Registered before the check so a concurrent close cannot be missed.
            let idle = self.inner.idle.notified();
            if self.active() == 0 {
                return;
            }
            idle.await;
        }
    }

    fn open(&self) -> ConnectionGuard {
        let id = self.inner.accepted.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            id,
            tracker: self.clone(),
        }
    }
}

/// Marks one connection as live until dropped, including on panic.
struct ConnectionGuard {
    id: u64,
    tracker: ConnectionTracker,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.tracker.inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.tracker.inner.idle.notify_waiters();
        }
    }
}

/// RPC server bound to one acceptor and one dispatch target.
pub struct RpcServer<A: Acceptor, D: RpcDispatch> {
    acceptor: A,
    dispatch: Arc<D>,
    local_addr: Option<SocketAddr>,
    max_message_size: usize,
    connections: ConnectionTracker,
}

impl<D: RpcDispatch> RpcServer<TcpListener, D> {
    /// Bind a TCP listener on `addr`.
    pub async fn bind(addr: SocketAddr, dispatch: Arc<D>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        info!("RPC server listening on {}", local_addr);

        let mut server = Self::new(listener, dispatch);
        server.local_addr = Some(local_addr);
        Ok(server)
    }
}

impl<A: Acceptor, D: RpcDispatch> RpcServer<A, D> {
    /// Build a server around an existing acceptor.
    pub fn new(acceptor: A, dispatch: Arc<D>) -> Self {
        Self {
            acceptor,
            dispatch,
            local_addr: None,
            max_message_size: RpcConfig::MAX_MESSAGE_SIZE,
            connections: ConnectionTracker::default(),
        }
    }

    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Bound address, for TCP servers.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn connections(&self) -> ConnectionTracker {
        self.connections.clone()
    }

    /// Run the accept loop on the current task until `shutdown` fires.
    ///
    /// Returns an error only if the listener reports itself closed.
    pub async fn serve(mut self, mut shutdown: ShutdownListener) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("RPC server shutting down");
                    return Ok(());
                }
                accepted = self.acceptor.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => self.spawn_connection(stream, peer, &shutdown),
                Err(e) => match classify_accept_error(&e) {
                    AcceptFailure::Retry => {
                        warn!("RPC accept error: {}", e);
                    }
                    AcceptFailure::Backoff => {
                        error!(
                            "RPC accept error, retrying in {:?}: {}",
                            RpcConfig::ACCEPT_ERROR_BACKOFF,
                            e
                        );
                        tokio::select! {
                            biased;
                            _ = shutdown.recv() => {
                                info!("RPC server shutting down");
                                return Ok(());
                            }
                            _ = tokio::time::sleep(RpcConfig::ACCEPT_ERROR_BACKOFF) => {}
                        }
                    }
                    AcceptFailure::Closed => {
                        error!("RPC listener closed: {}", e);
                        return Err(e.into());
                    }
                },
            }
        }
    }

    /// Run the accept loop on a background task with its own shutdown trigger.
    pub fn spawn(self) -> RpcServerHandle {
        let shutdown = Shutdown::new();
        let addr = self.local_addr;
        let connections = self.connections();
        let task = tokio::spawn(self.serve(shutdown.listener()));

        RpcServerHandle {
            addr,
            shutdown,
            connections,
            task: Some(task),
        }
    }

    fn spawn_connection(&self, stream: A::Stream, peer: String, shutdown: &ShutdownListener) {
        let guard = self.connections.open();
        let span = info_span!("rpc_conn", id = guard.id, peer = %peer);
        let dispatch = Arc::clone(&self.dispatch);
        let shutdown = shutdown.clone();
        let max_message_size = self.max_message_size;

        tokio::spawn(
            async move {
                let _guard = guard;
                debug!("RPC connection accepted");
                match handle_connection(stream, dispatch.as_ref(), shutdown, max_message_size).await
                {
                    Ok(calls) => debug!("RPC connection closed after {} calls", calls),
                    Err(e) => debug!("RPC connection ended: {}", e),
                }
            }
            .instrument(span),
        );
    }
}

/// Handle to a server started with [`RpcServer::spawn`]. Dropping it stops the server.
pub struct RpcServerHandle {
    addr: Option<SocketAddr>,
    shutdown: Shutdown,
    connections: ConnectionTracker,
    task: Option<JoinHandle<Result<()>>>,
}

impl RpcServerHandle {
    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub fn connections(&self) -> ConnectionTracker {
        self.connections.clone()
    }

    /// Stop accepting and signal every connection handler to close.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Wait for the accept loop to exit.
    pub async fn stopped(mut self) -> Result<()> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| LogServiceError::Other(format!("RPC server task failed: {}", e)))?,
            None => Ok(()),
        }
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Serve calls on one connection until it closes. Returns the number of calls answered.
async fn handle_connection<S, D>(
    stream: S,
    dispatch: &D,
    mut shutdown: ShutdownListener,
    max_message_size: usize,
) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
    D: RpcDispatch,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut calls = 0u64;

    loop {
        let frame = tokio::select! {
            result = read_frame(&mut reader, max_message_size) => {
                match result? {
                    Some(frame) => frame,
                    None => return Ok(calls),
                }
            }
            _ = shutdown.recv() => return Ok(calls),
        };

        let request = String::from_utf8(frame).map_err(|_| LogServiceError::Validation {
            field: "rpc_payload".to_string(),
            message: "Invalid UTF-8 in RPC frame".to_string(),
        })?;

        let response = process_request(&request, dispatch).await;
        let response_bytes = serde_json::to_vec(&response)?;
        write_frame(&mut writer, &response_bytes).await?;
        calls += 1;
    }
}

async fn process_request<D: RpcDispatch>(request_str: &str, dispatch: &D) -> RpcResponse {
    let raw: Value = match serde_json::from_str(request_str) {
        Ok(raw) => raw,
        Err(e) => return RpcResponse::error(None, -32700, format!("Parse error: {}", e)),
    };

    let id = raw.get("id").cloned();
    let request: RpcRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(e) => return RpcResponse::error(id, -32600, format!("Invalid Request: {}", e)),
    };

    if request.jsonrpc != RpcConfig::JSONRPC_VERSION {
        return RpcResponse::error(
            request.id,
            -32600,
            "Invalid Request: expected jsonrpc 2.0".to_string(),
        );
    }

    let params = request.params.unwrap_or(Value::Object(Default::default()));

    match dispatch.dispatch(&request.method, params).await {
        Ok(result) => RpcResponse::success(request.id, result),
        Err(e) => {
            warn!("RPC call {} failed: {}", request.method, e);
            RpcResponse::from_error(request.id, &e)
        }
    }
}
