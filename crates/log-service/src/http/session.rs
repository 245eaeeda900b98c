//! Session middleware.
//!
//! Loads the caller's session from its cookie before the handler runs and
//! commits it afterwards. Handlers reach the session through the
//! [`SessionHandle`] request extension.

use axum::extract::{Request, State};
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use log_service_core::{AppContext, Result, Session};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

/// The current request's session.
#[derive(Clone)]
pub struct SessionHandle {
    session: Arc<Mutex<Session>>,
}

impl SessionHandle {
    fn new(session: Session) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lock().get(key)
    }

    pub fn put(&self, key: &str, value: impl Serialize) -> Result<()> {
        self.lock().put(key, value)
    }

    pub fn destroy(&self) {
        self.lock().destroy();
    }

    fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Middleware body; install with `axum::middleware::from_fn_with_state`.
pub async fn load_session(
    State(ctx): State<Arc<AppContext>>,
    mut request: Request,
    next: Next,
) -> Response {
    let sessions = ctx.sessions();
    let token = session_token(request.headers(), sessions.cookie_name());
    let handle = SessionHandle::new(sessions.load(token.as_deref()));
    request.extensions_mut().insert(handle.clone());

    let mut response = next.run(request).await;

    if let Some(cookie) = sessions.commit(&handle.snapshot()) {
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => warn!("Dropping unencodable session cookie: {}", e),
        }
    }

    response
}

/// Extract the value of cookie `name` from the request headers.
fn session_token(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}
