use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::PermissionAdapter;
use crate::error::GateError;
use crate::host::{
    call_bool, HostComponent, HostError, HostKind, HostRuntime, HostValue, Locator, Operation,
    OBJECT, STRING,
};
use crate::identity::Identity;

pub const GLOBAL_SECURE_OBJECT: &str = "com.atlassian.bamboo.security.GlobalApplicationSecureObject";
const ADMIN_PERMISSION: &str = "ADMIN";

/// Which generation of the Bamboo permission manager is running.
enum Shape {
    /// Bamboo 3.1+: `isSystemAdmin(String)`.
    SystemAdmin(Arc<dyn HostComponent>),
    /// Older: `hasPermission(user, "ADMIN", GlobalApplicationSecureObject.INSTANCE)`.
    GlobalPermission {
        manager: Arc<dyn HostComponent>,
        secured_object: HostValue,
    },
}

pub struct BambooPermissions {
    runtime: Arc<dyn HostRuntime>,
    shape: OnceCell<Shape>,
}

fn is_system_admin() -> Operation {
    Operation::new("isSystemAdmin", &[STRING])
}

fn has_permission() -> Operation {
    Operation::new("hasPermission", &[STRING, STRING, OBJECT])
}

impl BambooPermissions {
    pub fn new(runtime: Arc<dyn HostRuntime>) -> Self {
        Self {
            runtime,
            shape: OnceCell::new(),
        }
    }

    fn bind(&self) -> Result<Shape, HostError> {
        let manager = self
            .runtime
            .component(&Locator::registry("bambooPermissionManager"))?;
        if manager.has_operation(&is_system_admin()) {
            return Ok(Shape::SystemAdmin(manager));
        }
        if !manager.has_operation(&has_permission()) {
            return Err(HostError::CapabilityAbsent(has_permission().to_string()));
        }
        let secured_object = self.runtime.static_field(GLOBAL_SECURE_OBJECT, "INSTANCE")?;
        tracing::debug!("Bamboo without isSystemAdmin, using global ADMIN permission");
        Ok(Shape::GlobalPermission {
            manager,
            secured_object,
        })
    }
}

impl PermissionAdapter for BambooPermissions {
    fn host(&self) -> HostKind {
        HostKind::Bamboo
    }

    fn is_administrator(&self, identity: &Identity) -> Result<bool, GateError> {
        let shape = self
            .shape
            .get_or_try_init(|| self.bind())
            .map_err(|e| GateError::incompatible(HostKind::Bamboo, e))?;
        let user_name = HostValue::str(identity.handle.to_string());
        let result = match shape {
            Shape::SystemAdmin(manager) => call_bool(manager.as_ref(), &is_system_admin(), &[user_name]),
            Shape::GlobalPermission {
                manager,
                secured_object,
            } => call_bool(
                manager.as_ref(),
                &has_permission(),
                &[user_name, HostValue::str(ADMIN_PERMISSION), secured_object.clone()],
            ),
        };
        result.map_err(|e| GateError::incompatible(HostKind::Bamboo, e))
    }
}
