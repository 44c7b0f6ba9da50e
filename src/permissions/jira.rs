use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::PermissionAdapter;
use crate::error::GateError;
use crate::host::{
    call, call_bool, HostComponent, HostError, HostKind, HostRuntime, HostValue, Locator,
    Operation, INT, STRING,
};
use crate::identity::Identity;

/// `com.atlassian.jira.security.Permissions.SYSTEM_ADMIN`
pub const SYSTEM_ADMIN: i64 = 44;

const COMPONENT_ACCESSOR: &str = "com.atlassian.jira.component.ComponentAccessor";
pub const APPLICATION_USER: &str = "com.atlassian.jira.user.ApplicationUser";

/// User types accepted by `hasPermission`, newest first.
pub const USER_TYPES: [&str; 3] = [
    // Jira 6, present since 5.2
    APPLICATION_USER,
    // Jira 5
    "com.atlassian.crowd.embedded.api.User",
    // before Jira 5
    "com.opensymphony.user.User",
];

fn has_permission(user_type: &str) -> Operation {
    Operation::new("hasPermission", &[INT, user_type])
}

pub struct JiraPermissions {
    runtime: Arc<dyn HostRuntime>,
    application_user_support: OnceCell<bool>,
    // index into USER_TYPES of the last shape that worked
    bound: OnceCell<usize>,
}

impl JiraPermissions {
    pub fn new(runtime: Arc<dyn HostRuntime>) -> Self {
        Self {
            runtime,
            application_user_support: OnceCell::new(),
            bound: OnceCell::new(),
        }
    }

    fn permission_manager(&self) -> Result<Arc<dyn HostComponent>, GateError> {
        self.runtime
            .component(&Locator::accessor(COMPONENT_ACCESSOR, "getPermissionManager"))
            .map_err(|e| GateError::incompatible(HostKind::Jira, e))
    }

    /// Jira 6+: the permission manager takes an `ApplicationUser`.
    fn application_user_support(&self, manager: &dyn HostComponent) -> bool {
        *self.application_user_support.get_or_init(|| {
            self.runtime.has_type(APPLICATION_USER)
                && manager.has_operation(&has_permission(APPLICATION_USER))
        })
    }

    fn check_as_application_user(
        &self,
        manager: &dyn HostComponent,
        name: &str,
    ) -> Result<bool, HostError> {
        let users = self
            .runtime
            .component(&Locator::accessor(COMPONENT_ACCESSOR, "getUserManager"))?;
        let user = call(
            users.as_ref(),
            &Operation::new("getUserByName", &[STRING]),
            &[HostValue::str(name)],
        )?;
        call_bool(
            manager,
            &has_permission(APPLICATION_USER),
            &[HostValue::int(SYSTEM_ADMIN), user],
        )
    }

    fn check_shape(
        &self,
        manager: &dyn HostComponent,
        index: usize,
        handle: &HostValue,
    ) -> Result<bool, HostError> {
        let user_type = USER_TYPES[index];
        if !self.runtime.has_type(user_type) {
            return Err(HostError::CapabilityAbsent(user_type.to_string()));
        }
        call_bool(
            manager,
            &has_permission(user_type),
            &[HostValue::int(SYSTEM_ADMIN), handle.clone()],
        )
    }

    /// Try every known user type; keep the first error if none works.
    fn probe(&self, manager: &dyn HostComponent, handle: &HostValue) -> Result<bool, HostError> {
        let mut first_error = None;
        for index in 0..USER_TYPES.len() {
            match self.check_shape(manager, index, handle) {
                Ok(result) => {
                    if self.bound.set(index).is_ok() {
                        tracing::debug!(user_type = USER_TYPES[index], "bound Jira permission check");
                    }
                    return Ok(result);
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        Err(first_error
            .unwrap_or_else(|| HostError::CapabilityAbsent("hasPermission".to_string())))
    }
}

impl PermissionAdapter for JiraPermissions {
    fn host(&self) -> HostKind {
        HostKind::Jira
    }

    fn is_administrator(&self, identity: &Identity) -> Result<bool, GateError> {
        let manager = self.permission_manager()?;
        // a custom authenticator may store a principal that is not an ApplicationUser
        if let Some(name) = identity.handle.principal_name() {
            if self.application_user_support(manager.as_ref()) {
                return self
                    .check_as_application_user(manager.as_ref(), name)
                    .map_err(|e| GateError::incompatible(HostKind::Jira, e));
            }
        }
        if let Some(&index) = self.bound.get() {
            match self.check_shape(manager.as_ref(), index, &identity.handle) {
                Ok(result) => return Ok(result),
                // this identity has another type; the binding stays
                Err(HostError::ArgumentMismatch(_)) => {}
                Err(err) => return Err(GateError::incompatible(HostKind::Jira, err)),
            }
        }
        self.probe(manager.as_ref(), &identity.handle)
            .map_err(|e| GateError::incompatible(HostKind::Jira, e))
    }
}
