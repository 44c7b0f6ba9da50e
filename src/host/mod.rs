//! Host runtime abstraction.
//!
//! The gate never links against a host product.  Everything it needs from
//! the host is reached through the `HostRuntime` trait: "does this type
//! exist", "give me the component registered under this name", and "does
//! this component expose this operation".  Each lookup returns a `HostError`
//! that keeps "capability absent" apart from "operation failed" so callers
//! can decide between a fallback and a fatal error.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod detect;
pub mod manifest;

pub use self::detect::{HostDetector, HostProvider, MarkerProvider};
pub use self::manifest::{HostManifest, ManifestHost};

/// Host products the gate knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostKind {
    Jira,
    Confluence,
    Bamboo,
    Bitbucket,
    Unknown,
}

impl HostKind {
    /// Product label reported alongside the monitoring report.
    pub fn application_type(&self) -> &'static str {
        match self {
            HostKind::Jira => "JIRA",
            HostKind::Confluence => "Confluence",
            HostKind::Bamboo => "Bamboo",
            HostKind::Bitbucket => "Bitbucket",
            HostKind::Unknown => "?",
        }
    }

    /// Relative login page of the host, used for anonymous redirects.
    pub fn login_path(&self) -> &'static str {
        match self {
            HostKind::Jira => "login.jsp",
            HostKind::Confluence => "login.action",
            HostKind::Bamboo => "userlogin!default.action",
            HostKind::Bitbucket | HostKind::Unknown => "login",
        }
    }
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.application_type())
    }
}

/// A user object as the host stored it.  `principal` is set when the value
/// exposes a display name on its own (the host's principal interface).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserHandle {
    pub type_name: String,
    pub name: String,
    #[serde(default)]
    pub principal: bool,
}

impl UserHandle {
    pub fn new(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
            principal: false,
        }
    }

    pub fn principal(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            name: name.into(),
            principal: true,
        }
    }
}

/// Dynamically typed value exchanged with the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HostValue {
    Null,
    Bool { value: bool },
    Int { value: i64 },
    Str { value: String },
    User(UserHandle),
    Object {
        #[serde(rename = "typeName")]
        type_name: String,
    },
}

impl HostValue {
    pub fn str(value: impl Into<String>) -> Self {
        HostValue::Str {
            value: value.into(),
        }
    }

    pub fn int(value: i64) -> Self {
        HostValue::Int { value }
    }

    pub fn bool(value: bool) -> Self {
        HostValue::Bool { value }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool { value } => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str { value } => Some(value),
            _ => None,
        }
    }

    pub fn as_user(&self) -> Option<&UserHandle> {
        match self {
            HostValue::User(user) => Some(user),
            _ => None,
        }
    }

    /// Name exposed through the principal capability, if any.
    pub fn principal_name(&self) -> Option<&str> {
        match self {
            HostValue::User(user) if user.principal => Some(&user.name),
            _ => None,
        }
    }

    /// Type name used when matching operation signatures.
    pub fn type_name(&self) -> &str {
        match self {
            HostValue::Null => "null",
            HostValue::Bool { .. } => BOOLEAN,
            HostValue::Int { .. } => INT,
            HostValue::Str { .. } => STRING,
            HostValue::User(user) => &user.type_name,
            HostValue::Object { type_name } => type_name,
        }
    }

    /// Whether this value can be passed where `param` is declared.
    pub fn fits(&self, param: &str) -> bool {
        match self {
            HostValue::Null => param != INT && param != BOOLEAN,
            _ => param == OBJECT || self.type_name() == param,
        }
    }
}

/// String form of a host value (what the host's `toString` would give).
impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Null => f.write_str("null"),
            HostValue::Bool { value } => write!(f, "{}", value),
            HostValue::Int { value } => write!(f, "{}", value),
            HostValue::Str { value } => f.write_str(value),
            HostValue::User(user) => f.write_str(&user.name),
            HostValue::Object { type_name } => f.write_str(type_name),
        }
    }
}

pub const INT: &str = "int";
pub const BOOLEAN: &str = "boolean";
pub const STRING: &str = "String";
pub const OBJECT: &str = "Object";

/// Name plus parameter types of a host operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
}

impl Operation {
    pub fn new(name: impl Into<String>, params: &[&str]) -> Self {
        Self {
            name: name.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.params.join(", "))
    }
}

/// How a component is located inside the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Named lookup in the host's component registry.
    Registry(String),
    /// Static accessor method on a host type.
    Accessor { type_name: String, method: String },
}

impl Locator {
    pub fn registry(name: impl Into<String>) -> Self {
        Locator::Registry(name.into())
    }

    pub fn accessor(type_name: impl Into<String>, method: impl Into<String>) -> Self {
        Locator::Accessor {
            type_name: type_name.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Registry(name) => write!(f, "registry:{}", name),
            Locator::Accessor { type_name, method } => write!(f, "{}.{}", type_name, method),
        }
    }
}

/// Outcome of a failed host interaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    /// The type, component or operation does not exist in this host version.
    #[error("capability absent: {0}")]
    CapabilityAbsent(String),
    /// The operation exists but the argument does not fit its signature.
    #[error("argument mismatch: {0}")]
    ArgumentMismatch(String),
    /// The operation exists and was called, but failed.
    #[error("operation failed: {0}")]
    OperationFailed(String),
}

impl HostError {
    pub fn is_absent(&self) -> bool {
        matches!(self, HostError::CapabilityAbsent(_))
    }
}

/// A component resolved from the host (permission manager, user accessor...).
pub trait HostComponent: Send + Sync {
    fn has_operation(&self, op: &Operation) -> bool;
    fn invoke(&self, op: &Operation, args: &[HostValue]) -> Result<HostValue, HostError>;
}

/// The running host product as seen from the gate.
pub trait HostRuntime: Send + Sync {
    fn has_type(&self, type_name: &str) -> bool;
    fn component(&self, locator: &Locator) -> Result<Arc<dyn HostComponent>, HostError>;
    fn static_field(&self, type_name: &str, field: &str) -> Result<HostValue, HostError>;
}

/// Runtime with nothing in it; detection yields `HostKind::Unknown`.
#[derive(Debug, Default)]
pub struct EmptyHost;

impl HostRuntime for EmptyHost {
    fn has_type(&self, _type_name: &str) -> bool {
        false
    }

    fn component(&self, locator: &Locator) -> Result<Arc<dyn HostComponent>, HostError> {
        Err(HostError::CapabilityAbsent(locator.to_string()))
    }

    fn static_field(&self, type_name: &str, field: &str) -> Result<HostValue, HostError> {
        Err(HostError::CapabilityAbsent(format!("{}.{}", type_name, field)))
    }
}

/// Invoke `op` only after checking the component exposes it, so a missing
/// operation always surfaces as `CapabilityAbsent`.
pub fn call(
    component: &dyn HostComponent,
    op: &Operation,
    args: &[HostValue],
) -> Result<HostValue, HostError> {
    if !component.has_operation(op) {
        return Err(HostError::CapabilityAbsent(op.to_string()));
    }
    component.invoke(op, args)
}

/// `call` for operations returning a boolean.
pub fn call_bool(
    component: &dyn HostComponent,
    op: &Operation,
    args: &[HostValue],
) -> Result<bool, HostError> {
    let value = call(component, op, args)?;
    value.as_bool().ok_or_else(|| {
        HostError::OperationFailed(format!("{} returned {} instead of boolean", op, value.type_name()))
    })
}
