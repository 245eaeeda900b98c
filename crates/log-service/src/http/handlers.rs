//! HTTP route handlers.
//!
//! Each handler performs exactly one facade operation; no lock is held
//! across the call.

use super::error::{ApiError, JsonResponse};
use super::session::SessionHandle;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use log_service_core::{AppContext, LogEntry, NewLogEntry};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Session key holding the id of the caller's most recent write.
pub const LAST_ENTRY_KEY: &str = "last_entry_id";

type Ctx = State<Arc<AppContext>>;

pub async fn health(State(ctx): Ctx) -> impl IntoResponse {
    let store = if ctx.store().is_connected() {
        "connected"
    } else {
        "disconnected"
    };
    Json(json!({"status": "ok", "store": store}))
}

pub async fn write_log(
    State(ctx): Ctx,
    Extension(session): Extension<SessionHandle>,
    payload: Result<Json<NewLogEntry>, JsonRejection>,
) -> Result<(StatusCode, Json<JsonResponse>), ApiError> {
    let Json(entry) = payload?;
    let name = entry.name.clone();
    let id = ctx.logs().create(entry).await?;
    debug!("HTTP write_log stored {} as {}", name, id);

    session.put(LAST_ENTRY_KEY, &id)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JsonResponse::ok("logged", json!({ "id": id }))),
    ))
}

pub async fn list_logs(State(ctx): Ctx) -> Result<Json<Vec<LogEntry>>, ApiError> {
    Ok(Json(ctx.logs().all().await?))
}

pub async fn get_log(State(ctx): Ctx, Path(id): Path<String>) -> Result<Json<LogEntry>, ApiError> {
    Ok(Json(ctx.logs().get(&id).await?))
}

pub async fn update_log(
    State(ctx): Ctx,
    Path(id): Path<String>,
    payload: Result<Json<NewLogEntry>, JsonRejection>,
) -> Result<Json<LogEntry>, ApiError> {
    let Json(entry) = payload?;
    Ok(Json(ctx.logs().update(&id, entry).await?))
}

pub async fn drop_logs(State(ctx): Ctx) -> Result<Json<Value>, ApiError> {
    let dropped = ctx.logs().drop_collection().await?;
    Ok(Json(json!({ "dropped": dropped })))
}

pub async fn session_info(Extension(session): Extension<SessionHandle>) -> Json<Value> {
    let last: Option<String> = session.get(LAST_ENTRY_KEY);
    Json(json!({ "last_entry_id": last }))
}

pub async fn end_session(Extension(session): Extension<SessionHandle>) -> StatusCode {
    session.destroy();
    StatusCode::NO_CONTENT
}
