use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::PermissionAdapter;
use crate::error::GateError;
use crate::host::{
    call_bool, HostComponent, HostError, HostKind, HostRuntime, HostValue, Locator, Operation,
    STRING,
};
use crate::identity::Identity;

pub const BITBUCKET_USER: &str = "com.atlassian.bitbucket.user.ApplicationUser";
const SYS_ADMIN: &str = "SYS_ADMIN";

fn has_global_permission() -> Operation {
    Operation::new("hasGlobalPermission", &[BITBUCKET_USER, STRING])
}

fn is_system_admin() -> Operation {
    Operation::new("isSystemAdmin", &[STRING])
}

enum Shape {
    GlobalPermission(Arc<dyn HostComponent>),
    SystemAdminByName(Arc<dyn HostComponent>),
}

pub struct BitbucketPermissions {
    runtime: Arc<dyn HostRuntime>,
    shape: OnceCell<Shape>,
}

impl BitbucketPermissions {
    pub fn new(runtime: Arc<dyn HostRuntime>) -> Self {
        Self {
            runtime,
            shape: OnceCell::new(),
        }
    }

    fn bind(&self) -> Result<Shape, HostError> {
        let service = self
            .runtime
            .component(&Locator::registry("permissionService"))?;
        if self.runtime.has_type(BITBUCKET_USER) && service.has_operation(&has_global_permission()) {
            Ok(Shape::GlobalPermission(service))
        } else if service.has_operation(&is_system_admin()) {
            Ok(Shape::SystemAdminByName(service))
        } else {
            Err(HostError::CapabilityAbsent(has_global_permission().to_string()))
        }
    }
}

impl PermissionAdapter for BitbucketPermissions {
    fn host(&self) -> HostKind {
        HostKind::Bitbucket
    }

    fn is_administrator(&self, identity: &Identity) -> Result<bool, GateError> {
        let shape = self
            .shape
            .get_or_try_init(|| self.bind())
            .map_err(|e| GateError::incompatible(HostKind::Bitbucket, e))?;
        let result = match shape {
            Shape::GlobalPermission(service) => call_bool(
                service.as_ref(),
                &has_global_permission(),
                &[identity.handle.clone(), HostValue::str(SYS_ADMIN)],
            ),
            Shape::SystemAdminByName(service) => call_bool(
                service.as_ref(),
                &is_system_admin(),
                &[HostValue::str(identity.name.as_str())],
            ),
        };
        result.map_err(|e| GateError::incompatible(HostKind::Bitbucket, e))
    }
}
