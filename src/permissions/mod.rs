//! Administrator checks against the host's permission API.
//!
//! Each host product gets its own adapter.  Adapters probe which call shape
//! the running version exposes on first use and keep the binding for the
//! rest of the process.  A missing or broken permission API is reported as
//! `GateError::HostIncompatible`; "not an administrator" is `Ok(false)`.

use std::sync::Arc;

use crate::error::GateError;
use crate::host::{HostKind, HostRuntime};
use crate::identity::Identity;

pub mod bamboo;
pub mod bitbucket;
pub mod confluence;
pub mod jira;

use self::bamboo::BambooPermissions;
use self::bitbucket::BitbucketPermissions;
use self::confluence::ConfluencePermissions;
use self::jira::JiraPermissions;

pub trait PermissionAdapter: Send + Sync {
    fn host(&self) -> HostKind;
    fn is_administrator(&self, identity: &Identity) -> Result<bool, GateError>;
}

/// Adapter for the detected host.
pub fn for_host(kind: HostKind, runtime: Arc<dyn HostRuntime>) -> Arc<dyn PermissionAdapter> {
    match kind {
        HostKind::Jira => Arc::new(JiraPermissions::new(runtime)),
        HostKind::Confluence => Arc::new(ConfluencePermissions::new(runtime)),
        HostKind::Bamboo => Arc::new(BambooPermissions::new(runtime)),
        HostKind::Bitbucket => Arc::new(BitbucketPermissions::new(runtime)),
        HostKind::Unknown => Arc::new(NoHostPermissions),
    }
}

/// Nobody is an administrator of an unknown host.
#[derive(Debug, Default)]
pub struct NoHostPermissions;

impl PermissionAdapter for NoHostPermissions {
    fn host(&self) -> HostKind {
        HostKind::Unknown
    }

    fn is_administrator(&self, _identity: &Identity) -> Result<bool, GateError> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{EmptyHost, HostValue};

    #[test]
    fn unknown_host_never_grants() {
        let adapter = for_host(HostKind::Unknown, Arc::new(EmptyHost));
        let identity = Identity::from_handle(HostValue::str("admin")).unwrap();
        assert_eq!(adapter.host(), HostKind::Unknown);
        assert_eq!(adapter.is_administrator(&identity), Ok(false));
    }

    #[test]
    fn known_host_without_api_is_incompatible() {
        let identity = Identity::from_handle(HostValue::str("admin")).unwrap();
        for kind in [
            HostKind::Jira,
            HostKind::Confluence,
            HostKind::Bamboo,
            HostKind::Bitbucket,
        ] {
            let adapter = for_host(kind, Arc::new(EmptyHost));
            let err = adapter.is_administrator(&identity).unwrap_err();
            assert!(err.is_fatal(), "{kind} should be incompatible");
        }
    }
}
