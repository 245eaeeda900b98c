//! Log operations exposed over the persistent-connection protocol.

use super::dispatch::{parse_params, Registry};
use crate::context::AppContext;
use crate::data::NewLogEntry;
use crate::error::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// The log service dispatch target.
pub struct LogService;

impl LogService {
    /// Append a log record. Params `{name, data}`, result `{id, message}`.
    pub const LOG_INFO: &'static str = "log_info";
    /// Fetch one record. Params `{id}`.
    pub const GET_LOG: &'static str = "get_log";
    /// All records, newest first.
    pub const LIST_LOGS: &'static str = "list_logs";

    /// Register every log operation on `registry`.
    pub fn register(registry: &mut Registry) -> Result<()> {
        registry.register(Self::LOG_INFO, log_info)?;
        registry.register(Self::GET_LOG, get_log)?;
        registry.register(Self::LIST_LOGS, list_logs)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct IdParams {
    id: String,
}

async fn log_info(ctx: Arc<AppContext>, params: Value) -> Result<Value> {
    let entry: NewLogEntry = parse_params(params)?;
    let name = entry.name.clone();
    let id = ctx.logs().create(entry).await?;
    debug!("RPC log_info stored {} as {}", name, id);

    Ok(json!({
        "id": id,
        "message": format!("Processed payload via RPC: {}", name),
    }))
}

async fn get_log(ctx: Arc<AppContext>, params: Value) -> Result<Value> {
    let IdParams { id } = parse_params(params)?;
    let entry = ctx.logs().get(&id).await?;
    Ok(serde_json::to_value(entry)?)
}

async fn list_logs(ctx: Arc<AppContext>, _params: Value) -> Result<Value> {
    let entries = ctx.logs().all().await?;
    Ok(serde_json::to_value(entries)?)
}
