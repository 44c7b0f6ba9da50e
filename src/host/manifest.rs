//! Host runtime described by a JSON manifest.
//!
//! A manifest lists the types the host exposes, its components with their
//! operations, how components are reached (registry names and static
//! accessors), static fields and optionally pre-seeded sessions.  The binary
//! loads one from `MONITOR_GATE_HOST_MANIFEST`; tests build them in code.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Deserialize;

use super::{HostComponent, HostError, HostRuntime, HostValue, Locator, Operation};

/// What an operation does when invoked.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Behavior {
    /// Returns whether the user (or user name) argument is in the component's
    /// admin set.  Every value in `requires` must appear among the arguments,
    /// otherwise the answer is `false`.
    AdminCheck {
        #[serde(default)]
        requires: Vec<HostValue>,
    },
    /// Looks a user up by the string argument.
    #[serde(rename_all = "camelCase")]
    UserLookup {
        user_type: String,
        #[serde(default)]
        principal: bool,
    },
    /// Always returns the given value.
    Constant { value: HostValue },
    /// Always fails.
    Fail { message: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationSpec {
    #[serde(flatten)]
    pub operation: Operation,
    pub behavior: Behavior,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComponentSpec {
    #[serde(default)]
    pub operations: Vec<OperationSpec>,
    #[serde(default)]
    pub admins: HashSet<String>,
}

impl ComponentSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation(mut self, operation: Operation, behavior: Behavior) -> Self {
        self.operations.push(OperationSpec {
            operation,
            behavior,
        });
        self
    }

    pub fn admin(mut self, name: &str) -> Self {
        self.admins.insert(name.to_string());
        self
    }
}

/// Raw session attributes keyed by session id, then attribute name.
pub type SessionSeed = HashMap<String, HashMap<String, HostValue>>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostManifest {
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub components: HashMap<String, ComponentSpec>,
    /// Registry name -> component id.
    #[serde(default)]
    pub registry: HashMap<String, String>,
    /// `Type.method` -> component id.
    #[serde(default)]
    pub accessors: HashMap<String, String>,
    /// `Type.FIELD` entries; each resolves to an object of that type.
    #[serde(default)]
    pub statics: Vec<String>,
    #[serde(default)]
    pub sessions: SessionSeed,
}

impl HostManifest {
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }
}

struct ManifestComponent {
    id: String,
    spec: ComponentSpec,
    probes: Arc<AtomicU64>,
}

impl ManifestComponent {
    fn find(&self, op: &Operation) -> Option<&OperationSpec> {
        self.spec.operations.iter().find(|o| o.operation == *op)
    }
}

impl HostComponent for ManifestComponent {
    fn has_operation(&self, op: &Operation) -> bool {
        self.probes.fetch_add(1, Ordering::Relaxed);
        self.find(op).is_some()
    }

    fn invoke(&self, op: &Operation, args: &[HostValue]) -> Result<HostValue, HostError> {
        let spec = self
            .find(op)
            .ok_or_else(|| HostError::CapabilityAbsent(format!("{}.{}", self.id, op)))?;
        if args.len() != op.params.len() {
            return Err(HostError::ArgumentMismatch(format!(
                "{} expects {} arguments, got {}",
                op,
                op.params.len(),
                args.len()
            )));
        }
        for (arg, param) in args.iter().zip(&op.params) {
            if !arg.fits(param) {
                return Err(HostError::ArgumentMismatch(format!(
                    "{} cannot take {} as {}",
                    op,
                    arg.type_name(),
                    param
                )));
            }
        }
        match &spec.behavior {
            Behavior::AdminCheck { requires } => {
                if !requires.iter().all(|r| args.contains(r)) {
                    return Ok(HostValue::bool(false));
                }
                let subject = args.iter().find_map(|a| match a {
                    HostValue::User(user) => Some(user.name.as_str()),
                    HostValue::Str { value } => Some(value.as_str()),
                    _ => None,
                });
                Ok(HostValue::bool(
                    subject.is_some_and(|name| self.spec.admins.contains(name)),
                ))
            }
            Behavior::UserLookup {
                user_type,
                principal,
            } => match args.iter().find_map(HostValue::as_str) {
                Some(name) => Ok(HostValue::User(super::UserHandle {
                    type_name: user_type.clone(),
                    name: name.to_string(),
                    principal: *principal,
                })),
                None => Ok(HostValue::Null),
            },
            Behavior::Constant { value } => Ok(value.clone()),
            Behavior::Fail { message } => Err(HostError::OperationFailed(message.clone())),
        }
    }
}

/// `HostRuntime` backed by a `HostManifest`.
pub struct ManifestHost {
    types: HashSet<String>,
    components: HashMap<String, Arc<ManifestComponent>>,
    registry: HashMap<String, String>,
    accessors: HashMap<String, String>,
    statics: HashSet<String>,
    probes: Arc<AtomicU64>,
}

impl ManifestHost {
    pub fn new(manifest: HostManifest) -> Self {
        let probes = Arc::new(AtomicU64::new(0));
        let components = manifest
            .components
            .into_iter()
            .map(|(id, spec)| {
                let component = ManifestComponent {
                    id: id.clone(),
                    spec,
                    probes: probes.clone(),
                };
                (id, Arc::new(component))
            })
            .collect();
        Self {
            types: manifest.types.into_iter().collect(),
            components,
            registry: manifest.registry,
            accessors: manifest.accessors,
            statics: manifest.statics.into_iter().collect(),
            probes,
        }
    }

    pub fn builder() -> ManifestHostBuilder {
        ManifestHostBuilder::default()
    }

    /// Number of `has_operation` probes answered so far.
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }

    fn component_by_id(&self, id: &str, locator: &Locator) -> Result<Arc<dyn HostComponent>, HostError> {
        self.components
            .get(id)
            .map(|c| c.clone() as Arc<dyn HostComponent>)
            .ok_or_else(|| {
                HostError::OperationFailed(format!("{} points at missing component {}", locator, id))
            })
    }
}

impl HostRuntime for ManifestHost {
    fn has_type(&self, type_name: &str) -> bool {
        self.types.contains(type_name)
    }

    fn component(&self, locator: &Locator) -> Result<Arc<dyn HostComponent>, HostError> {
        let id = match locator {
            Locator::Registry(name) => self.registry.get(name),
            Locator::Accessor { type_name, method } => {
                if !self.types.contains(type_name) {
                    return Err(HostError::CapabilityAbsent(type_name.clone()));
                }
                self.accessors.get(&format!("{}.{}", type_name, method))
            }
        };
        match id {
            Some(id) => self.component_by_id(id, locator),
            None => Err(HostError::CapabilityAbsent(locator.to_string())),
        }
    }

    fn static_field(&self, type_name: &str, field: &str) -> Result<HostValue, HostError> {
        if self.statics.contains(&format!("{}.{}", type_name, field)) {
            Ok(HostValue::Object {
                type_name: type_name.to_string(),
            })
        } else {
            Err(HostError::CapabilityAbsent(format!("{}.{}", type_name, field)))
        }
    }
}

#[derive(Default)]
pub struct ManifestHostBuilder {
    manifest: HostManifest,
}

impl ManifestHostBuilder {
    pub fn with_type(mut self, type_name: &str) -> Self {
        self.manifest.types.push(type_name.to_string());
        self
    }

    pub fn with_component(mut self, id: &str, spec: ComponentSpec) -> Self {
        self.manifest.components.insert(id.to_string(), spec);
        self
    }

    pub fn register(mut self, name: &str, component_id: &str) -> Self {
        self.manifest
            .registry
            .insert(name.to_string(), component_id.to_string());
        self
    }

    /// Expose `component_id` through `type_name.method`; also registers the type.
    pub fn accessor(mut self, type_name: &str, method: &str, component_id: &str) -> Self {
        if !self.manifest.types.iter().any(|t| t == type_name) {
            self.manifest.types.push(type_name.to_string());
        }
        self.manifest
            .accessors
            .insert(format!("{}.{}", type_name, method), component_id.to_string());
        self
    }

    pub fn with_static(mut self, type_name: &str, field: &str) -> Self {
        self.manifest.statics.push(format!("{}.{}", type_name, field));
        self
    }

    pub fn build(self) -> ManifestHost {
        ManifestHost::new(self.manifest)
    }
}
