//! Method registry and dispatch for the persistent-connection protocol.
//!
//! Methods are registered on a [`Registry`] during startup. The registry is
//! then consumed into an immutable [`DispatchTable`] that the server shares
//! between all connections, so nothing can be registered once serving starts.

use crate::context::AppContext;
use crate::error::{LogServiceError, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Built-in liveness method answered by every dispatch table.
pub const HEALTH_CHECK: &str = "health_check";

/// Boxed future returned by a registered method.
pub type MethodFuture = BoxFuture<'static, Result<Value>>;

type MethodHandler = Arc<dyn Fn(Arc<AppContext>, Value) -> MethodFuture + Send + Sync>;

/// Anything the RPC server can route a decoded call to.
#[async_trait]
pub trait RpcDispatch: Send + Sync + 'static {
    /// Dispatch a method call and return its result.
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value>;
}

/// Mutable method table used while the process starts up.
#[derive(Default)]
pub struct Registry {
    methods: HashMap<String, MethodHandler>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `method`. Names must be unique.
    pub fn register<F, Fut>(&mut self, method: &str, handler: F) -> Result<()>
    where
        F: Fn(Arc<AppContext>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if method == HEALTH_CHECK || self.methods.contains_key(method) {
            return Err(LogServiceError::DuplicateMethod {
                method: method.to_string(),
            });
        }

        let handler: MethodHandler = Arc::new(move |ctx, params| handler(ctx, params).boxed());
        self.methods.insert(method.to_string(), handler);
        Ok(())
    }

    /// Freeze the registry into a table bound to `ctx`.
    pub fn into_table(self, ctx: Arc<AppContext>) -> DispatchTable {
        DispatchTable {
            ctx,
            methods: self.methods,
        }
    }
}

/// Immutable method table shared by every connection.
pub struct DispatchTable {
    ctx: Arc<AppContext>,
    methods: HashMap<String, MethodHandler>,
}

impl DispatchTable {
    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[async_trait]
impl RpcDispatch for DispatchTable {
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
        if method == HEALTH_CHECK {
            return Ok(json!({"status": "ok"}));
        }

        let handler = self
            .methods
            .get(method)
            .ok_or_else(|| LogServiceError::MethodNotFound {
                method: method.to_string(),
            })?;

        handler(Arc::clone(&self.ctx), params).await
    }
}

/// Deserialize call params, reporting failures as invalid params.
pub fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| LogServiceError::InvalidParams {
        message: e.to_string(),
    })
}
