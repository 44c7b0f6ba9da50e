//! Resolution of the logged-in user from session state.
//!
//! Hosts store different things under the login marker depending on their
//! version: a user object, a principal, or a session-safe wrapper that has
//! to be looked up again.  `IdentityResolver` turns all of them into an
//! `Identity` carrying a display name and the handle permission checks
//! expect.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::GateError;
use crate::host::{call, HostError, HostKind, HostRuntime, HostValue, Locator, Operation, STRING};
use crate::permissions::confluence::CONFLUENCE_USER;
use crate::session::{Session, LOGGED_IN_KEY, SESSION_REMOTE_USER};

/// Confluence 4.1.4+ stores this wrapper instead of the user.
pub const CONFLUENCE_SESSION_SAFE_PRINCIPAL: &str =
    "com.atlassian.confluence.user.SessionSafePrincipal";
const CONFLUENCE_USER_ACCESSOR: &str = "userAccessor";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub handle: HostValue,
}

impl Identity {
    /// Build from a raw host value; `None` for values that are not users.
    pub fn from_handle(handle: HostValue) -> Option<Self> {
        let name = match &handle {
            HostValue::Null => return None,
            HostValue::User(user) => user.name.clone(),
            HostValue::Str { value } if !value.is_empty() => value.clone(),
            _ => return None,
        };
        Some(Self { name, handle })
    }
}

pub struct IdentityResolver {
    host: HostKind,
    runtime: Arc<dyn HostRuntime>,
    // getUserByName only exists from Confluence 5.2 on
    user_by_name_supported: OnceCell<bool>,
}

impl IdentityResolver {
    pub fn new(host: HostKind, runtime: Arc<dyn HostRuntime>) -> Self {
        Self {
            host,
            runtime,
            user_by_name_supported: OnceCell::new(),
        }
    }

    /// Resolve the caller, treating every recoverable failure as anonymous.
    pub fn resolve_or_anonymous(&self, session: Option<&dyn Session>) -> Option<Identity> {
        let session = session?;
        match self.resolve(session) {
            Ok(identity) => identity,
            Err(GateError::SessionInvalidated) => {
                tracing::debug!("session invalidated while resolving identity");
                None
            }
            Err(err) => {
                tracing::warn!(host = %self.host, error = %err, "treating caller as anonymous");
                None
            }
        }
    }

    pub fn resolve(&self, session: &dyn Session) -> Result<Option<Identity>, GateError> {
        let raw = match session.attribute(LOGGED_IN_KEY)? {
            Some(HostValue::Null) | None => return Ok(None),
            Some(raw) => raw,
        };
        let handle = if self.host == HostKind::Confluence {
            self.unwrap_confluence(raw)?
        } else {
            raw
        };
        Ok(Identity::from_handle(handle))
    }

    /// Store the caller's display name in the session unless already there.
    pub fn cache_remote_user(&self, session: &dyn Session) {
        if Self::has_remote_user(session) {
            return;
        }
        if let Some(identity) = self.resolve_or_anonymous(Some(session)) {
            Self::write_remote_user(session, &identity);
        }
    }

    /// Same as `cache_remote_user` for an identity resolved by the caller.
    pub fn remember(&self, session: &dyn Session, identity: &Identity) {
        if !Self::has_remote_user(session) {
            Self::write_remote_user(session, identity);
        }
    }

    // an unreadable session counts as cached: nothing can be written to it
    fn has_remote_user(session: &dyn Session) -> bool {
        !matches!(session.attribute(SESSION_REMOTE_USER), Ok(None))
    }

    fn write_remote_user(session: &dyn Session, identity: &Identity) {
        // last write wins if another request for this session raced us
        if let Err(err) = session.set_attribute(SESSION_REMOTE_USER, HostValue::str(identity.name.as_str())) {
            tracing::debug!(error = %err, "could not cache remote user");
        }
    }

    fn unwrap_confluence(&self, raw: HostValue) -> Result<HostValue, GateError> {
        if raw.type_name() == CONFLUENCE_SESSION_SAFE_PRINCIPAL {
            let name = raw.to_string();
            let op = Operation::new("getUser", &[STRING]);
            return match self.lookup(&op, &name) {
                Ok(user) => Ok(user),
                Err(err) if err.is_absent() => Self::usable_as_user(raw, &err),
                Err(err) => Err(GateError::IdentityUnresolvable(err.to_string())),
            };
        }
        let name = match raw.principal_name() {
            Some(name) => name.to_string(),
            None => return Ok(raw),
        };
        if !self.user_by_name_supported() {
            let absent = HostError::CapabilityAbsent("userAccessor.getUserByName(String)".to_string());
            return Self::usable_as_user(raw, &absent);
        }
        let op = Operation::new("getUserByName", &[STRING]);
        match self.lookup(&op, &name) {
            Ok(user) => Ok(user),
            Err(err) if err.is_absent() => Self::usable_as_user(raw, &err),
            Err(err) => Err(GateError::IdentityUnresolvable(err.to_string())),
        }
    }

    /// Keep the stored value only if the permission manager can take it as is.
    fn usable_as_user(raw: HostValue, cause: &HostError) -> Result<HostValue, GateError> {
        if raw.fits(CONFLUENCE_USER) {
            Ok(raw)
        } else {
            Err(GateError::IdentityUnresolvable(format!(
                "{} stored for {} and {}",
                raw.type_name(),
                raw,
                cause
            )))
        }
    }

    fn lookup(&self, op: &Operation, name: &str) -> Result<HostValue, HostError> {
        let accessor = self
            .runtime
            .component(&Locator::registry(CONFLUENCE_USER_ACCESSOR))?;
        call(accessor.as_ref(), op, &[HostValue::str(name)])
    }

    fn user_by_name_supported(&self) -> bool {
        *self.user_by_name_supported.get_or_init(|| {
            let supported = self
                .runtime
                .component(&Locator::registry(CONFLUENCE_USER_ACCESSOR))
                .map(|accessor| accessor.has_operation(&Operation::new("getUserByName", &[STRING])))
                .unwrap_or(false);
            if !supported {
                tracing::debug!("userAccessor.getUserByName unavailable, using session principal");
            }
            supported
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::manifest::{Behavior, ComponentSpec};
    use crate::host::{EmptyHost, ManifestHost, UserHandle};
    use crate::session::MemorySession;

    const PRINCIPAL: &str = "java.security.Principal";

    fn confluence_host(with_get_user_by_name: bool) -> Arc<ManifestHost> {
        let lookup = Behavior::UserLookup {
            user_type: CONFLUENCE_USER.into(),
            principal: true,
        };
        let mut accessor =
            ComponentSpec::new().operation(Operation::new("getUser", &[STRING]), lookup.clone());
        if with_get_user_by_name {
            accessor = accessor.operation(Operation::new("getUserByName", &[STRING]), lookup);
        }
        accessor_host(accessor)
    }

    fn accessor_host(accessor: ComponentSpec) -> Arc<ManifestHost> {
        Arc::new(
            ManifestHost::builder()
                .with_component("ua", accessor)
                .register(CONFLUENCE_USER_ACCESSOR, "ua")
                .build(),
        )
    }

    fn session_with(raw: HostValue) -> MemorySession {
        let session = MemorySession::new();
        session.set_attribute(LOGGED_IN_KEY, raw).unwrap();
        session
    }

    #[test]
    fn missing_marker_is_anonymous() {
        let resolver = IdentityResolver::new(HostKind::Jira, Arc::new(EmptyHost));
        let session = MemorySession::new();
        assert_eq!(resolver.resolve(&session).unwrap(), None);
        assert_eq!(resolver.resolve_or_anonymous(None), None);
    }

    #[test]
    fn jira_uses_stored_user_directly() {
        let resolver = IdentityResolver::new(HostKind::Jira, Arc::new(EmptyHost));
        let user = HostValue::User(UserHandle::new("com.opensymphony.user.User", "admin"));
        let session = session_with(user.clone());
        let identity = resolver.resolve(&session).unwrap().unwrap();
        assert_eq!(identity.name, "admin");
        assert_eq!(identity.handle, user);
    }

    #[test]
    fn confluence_session_safe_principal_is_looked_up() {
        let resolver = IdentityResolver::new(HostKind::Confluence, confluence_host(false));
        let wrapper = HostValue::User(UserHandle::new(CONFLUENCE_SESSION_SAFE_PRINCIPAL, "carol"));
        let identity = resolver.resolve(&session_with(wrapper)).unwrap().unwrap();
        assert_eq!(identity.name, "carol");
        assert_eq!(identity.handle.type_name(), CONFLUENCE_USER);
    }

    #[test]
    fn confluence_principal_materialised_by_name() {
        let host = confluence_host(true);
        let resolver = IdentityResolver::new(HostKind::Confluence, host);
        let principal = HostValue::User(UserHandle::principal(PRINCIPAL, "dave"));
        let identity = resolver.resolve(&session_with(principal)).unwrap().unwrap();
        assert_eq!(identity.handle.type_name(), CONFLUENCE_USER);
    }

    #[test]
    fn confluence_user_kept_when_get_user_by_name_missing() {
        // Confluence 3.5 stores the user object itself
        let host = confluence_host(false);
        let resolver = IdentityResolver::new(HostKind::Confluence, host.clone());
        let user = HostValue::User(UserHandle::principal(CONFLUENCE_USER, "erin"));
        let session = session_with(user.clone());
        let identity = resolver.resolve(&session).unwrap().unwrap();
        assert_eq!(identity.handle, user);
        let probes = host.probe_count();
        resolver.resolve(&session).unwrap();
        assert_eq!(host.probe_count(), probes);
    }

    #[test]
    fn bare_principal_without_lookup_is_unresolvable() {
        let resolver = IdentityResolver::new(HostKind::Confluence, confluence_host(false));
        let session = session_with(HostValue::User(UserHandle::principal(PRINCIPAL, "erin")));
        assert!(matches!(
            resolver.resolve(&session),
            Err(GateError::IdentityUnresolvable(_))
        ));
        assert_eq!(resolver.resolve_or_anonymous(Some(&session)), None);
    }

    #[test]
    fn session_safe_principal_without_get_user_is_unresolvable() {
        let resolver = IdentityResolver::new(HostKind::Confluence, accessor_host(ComponentSpec::new()));
        let wrapper = HostValue::User(UserHandle::new(CONFLUENCE_SESSION_SAFE_PRINCIPAL, "ivan"));
        let session = session_with(wrapper);
        assert!(matches!(
            resolver.resolve(&session),
            Err(GateError::IdentityUnresolvable(_))
        ));
        resolver.cache_remote_user(&session);
        assert_eq!(session.attribute(SESSION_REMOTE_USER).unwrap(), None);
    }

    #[test]
    fn failing_lookup_is_anonymous_and_not_cached() {
        let failing = |op: &str| {
            ComponentSpec::new().operation(
                Operation::new(op, &[STRING]),
                Behavior::Fail {
                    message: "directory unavailable".into(),
                },
            )
        };
        let cases = [
            (
                failing("getUser"),
                HostValue::User(UserHandle::new(CONFLUENCE_SESSION_SAFE_PRINCIPAL, "judy")),
            ),
            (
                failing("getUserByName"),
                HostValue::User(UserHandle::principal(PRINCIPAL, "judy")),
            ),
        ];
        for (accessor, raw) in cases {
            let resolver = IdentityResolver::new(HostKind::Confluence, accessor_host(accessor));
            let session = session_with(raw);
            assert_eq!(
                resolver.resolve(&session),
                Err(GateError::IdentityUnresolvable(
                    "operation failed: directory unavailable".into()
                ))
            );
            assert_eq!(resolver.resolve_or_anonymous(Some(&session)), None);
            resolver.cache_remote_user(&session);
            assert_eq!(session.attribute(SESSION_REMOTE_USER).unwrap(), None);
        }
    }

    #[test]
    fn remember_keeps_first_name() {
        let resolver = IdentityResolver::new(HostKind::Jira, Arc::new(EmptyHost));
        let session = MemorySession::new();
        let kate = Identity::from_handle(HostValue::str("kate")).unwrap();
        let liam = Identity::from_handle(HostValue::str("liam")).unwrap();
        resolver.remember(&session, &kate);
        resolver.remember(&session, &liam);
        assert_eq!(
            session.attribute(SESSION_REMOTE_USER).unwrap(),
            Some(HostValue::str("kate"))
        );
    }

    #[test]
    fn caches_remote_user_once() {
        let resolver = IdentityResolver::new(HostKind::Jira, Arc::new(EmptyHost));
        let session = session_with(HostValue::User(UserHandle::principal("p", "frank")));
        resolver.cache_remote_user(&session);
        assert_eq!(
            session.attribute(SESSION_REMOTE_USER).unwrap(),
            Some(HostValue::str("frank"))
        );
        session
            .set_attribute(LOGGED_IN_KEY, HostValue::User(UserHandle::principal("p", "grace")))
            .unwrap();
        resolver.cache_remote_user(&session);
        assert_eq!(
            session.attribute(SESSION_REMOTE_USER).unwrap(),
            Some(HostValue::str("frank"))
        );
    }

    #[test]
    fn invalidated_session_is_anonymous() {
        let resolver = IdentityResolver::new(HostKind::Jira, Arc::new(EmptyHost));
        let session = session_with(HostValue::User(UserHandle::principal("p", "henry")));
        session.invalidate();
        assert_eq!(resolver.resolve_or_anonymous(Some(&session)), None);
        resolver.cache_remote_user(&session);
    }
}
