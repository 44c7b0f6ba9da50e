//! Per-request access decision for the monitoring report.
//!
//! Only a request for exactly the monitoring URL is gated.  Such a request
//! is let through when authentication is disabled, redirected to the host
//! login page when anonymous, refused when the caller is not a system
//! administrator, and forwarded to the report otherwise.

use std::sync::Arc;

use crate::error::GateError;
use crate::host::{HostDetector, HostKind, HostRuntime};
use crate::identity::{Identity, IdentityResolver};
use crate::permissions::{self, PermissionAdapter};
use crate::session::Session;

pub const FORBIDDEN_MESSAGE: &str = "Forbidden access";
pub const DESTINATION_PARAM: &str = "os_destination";
const RUM_PART: &str = "rum";

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub context_path: String,
    pub monitoring_path: String,
    pub authentication_disabled: bool,
    pub rum_enabled: bool,
    pub allow_unknown_host: bool,
    pub login_path: Option<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            context_path: String::new(),
            monitoring_path: "/monitoring".to_string(),
            authentication_disabled: false,
            rum_enabled: false,
            allow_unknown_host: false,
            login_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// Send the caller to this location (login page plus return destination).
    Redirect(String),
    Forbidden,
    Proceed,
}

pub struct AccessGate {
    config: GateConfig,
    host: HostKind,
    identities: IdentityResolver,
    permissions: Arc<dyn PermissionAdapter>,
}

impl AccessGate {
    pub fn new(config: GateConfig, runtime: Arc<dyn HostRuntime>, detector: &HostDetector) -> Self {
        let host = detector.detect(runtime.as_ref());
        match host {
            HostKind::Unknown if config.allow_unknown_host => tracing::warn!(
                "monitoring unknown host, access to monitoring reports is not secured"
            ),
            HostKind::Unknown => tracing::warn!(
                "monitoring unknown host, only authentication-disabled access reaches reports"
            ),
            _ => tracing::debug!(host = %host, "monitoring {}", host.application_type()),
        }
        if config.authentication_disabled {
            tracing::debug!("authentication for monitoring reports has been disabled");
        }
        Self {
            identities: IdentityResolver::new(host, runtime.clone()),
            permissions: permissions::for_host(host, runtime),
            config,
            host,
        }
    }

    pub fn host(&self) -> HostKind {
        self.host
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Full path of the monitoring report, context path included.
    pub fn monitoring_url(&self) -> String {
        format!("{}{}", self.config.context_path, self.config.monitoring_path)
    }

    pub fn is_monitoring_request(&self, path: &str) -> bool {
        path == self.monitoring_url()
    }

    /// A real-user-monitoring beacon aimed at the monitoring URL.
    pub fn is_rum_request(&self, query: Option<&str>) -> bool {
        self.config.rum_enabled
            && query
                .into_iter()
                .flat_map(|q| q.split('&'))
                .any(|pair| pair == format!("part={}", RUM_PART))
    }

    /// Where anonymous callers are sent; the destination drops the context path.
    pub fn login_location(&self) -> String {
        let login = self
            .config
            .login_path
            .as_deref()
            .unwrap_or_else(|| self.host.login_path());
        let url = self.monitoring_url();
        let destination = url
            .strip_prefix(self.config.context_path.as_str())
            .unwrap_or(&url);
        format!("{}?{}={}", login, DESTINATION_PARAM, destination)
    }

    /// The caller behind `session`, or `None` when anonymous.
    pub fn identify(&self, session: Option<&dyn Session>) -> Option<Identity> {
        self.identities.resolve_or_anonymous(session)
    }

    pub fn decide(&self, session: Option<&dyn Session>) -> Result<AccessDecision, GateError> {
        if self.open_access() {
            return Ok(AccessDecision::Proceed);
        }
        self.decide_for(self.identify(session).as_ref())
    }

    /// Decision for a caller already resolved with `identify`.
    pub fn decide_for(&self, identity: Option<&Identity>) -> Result<AccessDecision, GateError> {
        if self.open_access() {
            return Ok(AccessDecision::Proceed);
        }
        let identity = match identity {
            Some(identity) => identity,
            None => return Ok(AccessDecision::Redirect(self.login_location())),
        };
        if self.permissions.is_administrator(identity)? {
            Ok(AccessDecision::Proceed)
        } else {
            tracing::info!(host = %self.host, user = %identity.name, "monitoring access forbidden");
            Ok(AccessDecision::Forbidden)
        }
    }

    fn open_access(&self) -> bool {
        self.config.authentication_disabled
            || (self.host == HostKind::Unknown && self.config.allow_unknown_host)
    }

    /// Make the caller's name available in the session for other collaborators.
    pub fn cache_identity(&self, session: Option<&dyn Session>) {
        if let Some(session) = session {
            self.identities.cache_remote_user(session);
        }
    }

    /// `cache_identity` for a caller already resolved with `identify`.
    pub fn remember_identity(&self, session: Option<&dyn Session>, identity: Option<&Identity>) {
        if let (Some(session), Some(identity)) = (session, identity) {
            self.identities.remember(session, identity);
        }
    }
}
