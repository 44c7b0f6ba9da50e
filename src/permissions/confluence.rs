use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::PermissionAdapter;
use crate::error::GateError;
use crate::host::{call_bool, HostComponent, HostError, HostKind, HostRuntime, Locator, Operation};
use crate::identity::Identity;

pub const CONFLUENCE_USER: &str = "com.atlassian.user.User";

pub struct ConfluencePermissions {
    runtime: Arc<dyn HostRuntime>,
    manager: OnceCell<Arc<dyn HostComponent>>,
}

impl ConfluencePermissions {
    pub fn new(runtime: Arc<dyn HostRuntime>) -> Self {
        Self {
            runtime,
            manager: OnceCell::new(),
        }
    }

    fn operation() -> Operation {
        Operation::new("isConfluenceAdministrator", &[CONFLUENCE_USER])
    }

    fn bind(&self) -> Result<Arc<dyn HostComponent>, HostError> {
        if !self.runtime.has_type(CONFLUENCE_USER) {
            return Err(HostError::CapabilityAbsent(CONFLUENCE_USER.to_string()));
        }
        let manager = self
            .runtime
            .component(&Locator::registry("permissionManager"))?;
        if !manager.has_operation(&Self::operation()) {
            return Err(HostError::CapabilityAbsent(Self::operation().to_string()));
        }
        Ok(manager)
    }
}

impl PermissionAdapter for ConfluencePermissions {
    fn host(&self) -> HostKind {
        HostKind::Confluence
    }

    fn is_administrator(&self, identity: &Identity) -> Result<bool, GateError> {
        let manager = self
            .manager
            .get_or_try_init(|| self.bind())
            .map_err(|e| GateError::incompatible(HostKind::Confluence, e))?;
        call_bool(
            manager.as_ref(),
            &Self::operation(),
            std::slice::from_ref(&identity.handle),
        )
        .map_err(|e| GateError::incompatible(HostKind::Confluence, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::manifest::{Behavior, ComponentSpec};
    use crate::host::{HostValue, ManifestHost, UserHandle};

    fn host() -> Arc<ManifestHost> {
        Arc::new(
            ManifestHost::builder()
                .with_type(CONFLUENCE_USER)
                .with_component(
                    "pm",
                    ComponentSpec::new()
                        .operation(
                            ConfluencePermissions::operation(),
                            Behavior::AdminCheck { requires: vec![] },
                        )
                        .admin("admin"),
                )
                .register("permissionManager", "pm")
                .build(),
        )
    }

    fn user(name: &str) -> Identity {
        Identity::from_handle(HostValue::User(UserHandle::new(CONFLUENCE_USER, name))).unwrap()
    }

    #[test]
    fn checks_confluence_administrator() {
        let host = host();
        let adapter = ConfluencePermissions::new(host.clone());
        assert_eq!(adapter.is_administrator(&user("admin")), Ok(true));
        let probes = host.probe_count();
        assert_eq!(adapter.is_administrator(&user("viewer")), Ok(false));
        // bound once; later calls only re-check the operation before invoking
        assert_eq!(host.probe_count(), probes + 1);
    }

    #[test]
    fn missing_user_type_is_incompatible_and_not_bound() {
        let host = Arc::new(
            ManifestHost::builder()
                .register("permissionManager", "pm")
                .with_component("pm", ComponentSpec::new())
                .build(),
        );
        let adapter = ConfluencePermissions::new(host);
        let err = adapter.is_administrator(&user("admin")).unwrap_err();
        assert_eq!(
            err,
            GateError::incompatible(
                HostKind::Confluence,
                HostError::CapabilityAbsent(CONFLUENCE_USER.to_string())
            )
        );
        assert!(adapter.manager.get().is_none());
    }
}
