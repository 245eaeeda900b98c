//! Cookie-keyed session state for the HTTP protocol.
//!
//! Sessions live in memory for the configured lifetime. A handler works on a
//! [`Session`] value loaded at the start of the request; the manager only
//! records it again (and emits a `Set-Cookie` value) when it was modified or
//! destroyed.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Cookie `SameSite` policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Session lifetime and cookie attributes.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub lifetime: Duration,
    /// Emit `Max-Age`/`Expires` so the cookie survives a browser restart.
    pub persist: bool,
    pub same_site: SameSite,
    pub secure: bool,
    pub http_only: bool,
    pub path: String,
    /// How often expired records are swept from memory.
    pub cleanup_interval: Duration,
}

impl SessionConfig {
    pub const DEFAULT_COOKIE_NAME: &'static str = "session";
    pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);
    pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: Self::DEFAULT_COOKIE_NAME.to_string(),
            lifetime: Self::DEFAULT_LIFETIME,
            persist: true,
            same_site: SameSite::Lax,
            secure: false,
            http_only: true,
            path: "/".to_string(),
            cleanup_interval: Self::DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStatus {
    Unmodified,
    Modified,
    Destroyed,
}

/// One request's view of a session.
#[derive(Debug, Clone)]
pub struct Session {
    token: Option<String>,
    values: Map<String, Value>,
    status: SessionStatus,
}

impl Session {
    fn fresh() -> Self {
        Self {
            token: None,
            values: Map::new(),
            status: SessionStatus::Unmodified,
        }
    }

    /// Token of a stored session; `None` until the first commit.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Typed read; `None` if missing or of a different shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        self.values.insert(key.into(), serde_json::to_value(value)?);
        self.status = SessionStatus::Modified;
        Ok(())
    }

    pub fn destroy(&mut self) {
        self.values.clear();
        self.status = SessionStatus::Destroyed;
    }

    pub fn is_modified(&self) -> bool {
        self.status != SessionStatus::Unmodified
    }
}

struct SessionRecord {
    values: Map<String, Value>,
    expires_at: DateTime<Utc>,
}

/// Shared session store.
pub struct SessionManager {
    config: SessionConfig,
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    /// Load the session for `token`, or a fresh one if unknown or expired.
    pub fn load(&self, token: Option<&str>) -> Session {
        let Some(token) = token else {
            return Session::fresh();
        };

        let now = Utc::now();
        match self.read().get(token) {
            Some(record) if record.expires_at > now => Session {
                token: Some(token.to_string()),
                values: record.values.clone(),
                status: SessionStatus::Unmodified,
            },
            _ => Session::fresh(),
        }
    }

    /// Persist a modified or destroyed session.
    ///
    /// Returns the `Set-Cookie` value to send back, or `None` when nothing changed.
    pub fn commit(&self, session: &Session) -> Option<String> {
        match session.status {
            SessionStatus::Unmodified => None,
            SessionStatus::Destroyed => {
                if let Some(token) = &session.token {
                    self.destroy(token);
                }
                Some(self.expired_cookie())
            }
            SessionStatus::Modified => {
                let token = session
                    .token
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
                let record = SessionRecord {
                    values: session.values.clone(),
                    expires_at: Utc::now() + self.lifetime(),
                };
                self.write().insert(token.clone(), record);
                Some(self.cookie_header(&token))
            }
        }
    }

    pub fn destroy(&self, token: &str) -> bool {
        self.write().remove(token).is_some()
    }

    /// Drop expired sessions, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, record| record.expires_at > now);
        let purged = before - sessions.len();
        if purged > 0 {
            debug!("Purged {} expired sessions", purged);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Set-Cookie` value carrying `token`.
    pub fn cookie_header(&self, token: &str) -> String {
        let mut cookie = format!(
            "{}={}; Path={}",
            self.config.cookie_name, token, self.config.path
        );
        if self.config.persist {
            let expires = Utc::now() + self.lifetime();
            cookie.push_str(&format!(
                "; Max-Age={}; Expires={}",
                self.config.lifetime.as_secs(),
                expires.format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
        self.push_attributes(&mut cookie);
        cookie
    }

    fn expired_cookie(&self) -> String {
        let mut cookie = format!(
            "{}=; Path={}; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
            self.config.cookie_name, self.config.path
        );
        self.push_attributes(&mut cookie);
        cookie
    }

    fn push_attributes(&self, cookie: &mut String) {
        if self.config.http_only {
            cookie.push_str("; HttpOnly");
        }
        if self.config.secure {
            cookie.push_str("; Secure");
        }
        cookie.push_str("; SameSite=");
        cookie.push_str(self.config.same_site.as_str());
    }

    fn lifetime(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.lifetime).unwrap_or_else(|_| chrono::Duration::days(1))
    }

    // Records are plain data, so a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SessionRecord>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SessionRecord>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .field("sessions", &self.len())
            .finish()
    }
}
