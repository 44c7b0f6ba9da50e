//! Session collaborator.
//!
//! The gate only reads the host's login marker and reads/writes one cached
//! attribute, so the `Session` trait is limited to attribute access.  Both
//! calls may fail once the session has been invalidated concurrently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::{header, HeaderMap};
use dashmap::DashMap;

use crate::error::GateError;
use crate::host::HostValue;

/// Attribute under which the host stores the logged-in user at login time.
pub const LOGGED_IN_KEY: &str = "seraph_defaultauthenticator_user";
/// Attribute caching the resolved display name for other collaborators.
pub const SESSION_REMOTE_USER: &str = "monitoring.remoteUser";

pub trait Session: Send + Sync {
    fn attribute(&self, key: &str) -> Result<Option<HostValue>, GateError>;
    fn set_attribute(&self, key: &str, value: HostValue) -> Result<(), GateError>;
}

pub trait SessionStore: Send + Sync {
    fn find(&self, id: &str) -> Option<Arc<dyn Session>>;
}

#[derive(Default)]
pub struct MemorySession {
    attributes: DashMap<String, HostValue>,
    invalidated: AtomicBool,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
        self.attributes.clear();
    }

    fn ensure_valid(&self) -> Result<(), GateError> {
        if self.invalidated.load(Ordering::SeqCst) {
            Err(GateError::SessionInvalidated)
        } else {
            Ok(())
        }
    }
}

impl Session for MemorySession {
    fn attribute(&self, key: &str) -> Result<Option<HostValue>, GateError> {
        self.ensure_valid()?;
        Ok(self.attributes.get(key).map(|v| v.value().clone()))
    }

    fn set_attribute(&self, key: &str, value: HostValue) -> Result<(), GateError> {
        self.ensure_valid()?;
        self.attributes.insert(key.to_string(), value);
        Ok(())
    }
}

/// In-process session store keyed by session id.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<DashMap<String, Arc<MemorySession>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session for `id`, creating it when missing.
    pub fn create(&self, id: &str) -> Arc<MemorySession> {
        self.sessions
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(MemorySession::new()))
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<Arc<MemorySession>> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    /// Mark the session invalid but keep it reachable, as a container does
    /// while a request still holds it.
    pub fn invalidate(&self, id: &str) {
        if let Some(session) = self.sessions.get(id) {
            session.invalidate();
        }
    }

    pub fn remove(&self, id: &str) {
        self.sessions.remove(id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn find(&self, id: &str) -> Option<Arc<dyn Session>> {
        self.get(id).map(|s| s as Arc<dyn Session>)
    }
}

/// Extract the value of cookie `name` from the request headers.
pub fn session_id(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn finds_named_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; JSESSIONID=abc123; lang=en"),
        );
        assert_eq!(session_id(&headers, "JSESSIONID").as_deref(), Some("abc123"));
        assert_eq!(session_id(&headers, "missing"), None);
    }

    #[test]
    fn empty_cookie_value_is_no_session() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("JSESSIONID="));
        assert_eq!(session_id(&headers, "JSESSIONID"), None);
    }

    #[test]
    fn invalidated_session_fails_on_access() {
        let store = MemorySessionStore::new();
        let session = store.create("s1");
        session
            .set_attribute(SESSION_REMOTE_USER, HostValue::str("alice"))
            .unwrap();
        store.invalidate("s1");
        assert_eq!(
            session.attribute(SESSION_REMOTE_USER),
            Err(GateError::SessionInvalidated)
        );
        assert!(store.find("s1").is_some());
        store.remove("s1");
        assert!(store.is_empty());
    }
}
