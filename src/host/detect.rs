//! Host product detection through a registry of providers.
//!
//! Providers are tried in registration order and the first one whose
//! marker is present wins.  The result is memoised for the life of the
//! detector.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::{HostKind, HostRuntime};

pub const JIRA_MARKER: &str = "com.atlassian.jira.ManagerFactory";
pub const CONFLUENCE_MARKER: &str = "com.atlassian.confluence.security.PermissionManager";
pub const BAMBOO_MARKER: &str = "com.atlassian.bamboo.security.BambooPermissionManager";
pub const BITBUCKET_MARKER: &str = "com.atlassian.bitbucket.permission.PermissionService";

/// One supported host product.
pub trait HostProvider: Send + Sync {
    fn kind(&self) -> HostKind;
    fn is_present(&self, runtime: &dyn HostRuntime) -> bool;
}

/// Provider that recognises its host by a single marker type.
#[derive(Debug, Clone)]
pub struct MarkerProvider {
    kind: HostKind,
    marker: &'static str,
}

impl MarkerProvider {
    pub const fn new(kind: HostKind, marker: &'static str) -> Self {
        Self { kind, marker }
    }
}

impl HostProvider for MarkerProvider {
    fn kind(&self) -> HostKind {
        self.kind
    }

    fn is_present(&self, runtime: &dyn HostRuntime) -> bool {
        runtime.has_type(self.marker)
    }
}

#[derive(Clone)]
pub struct HostDetector {
    providers: Vec<Arc<dyn HostProvider>>,
    detected: Arc<OnceCell<HostKind>>,
}

impl Default for HostDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl HostDetector {
    /// Detector for the built-in products in priority order.
    pub fn new() -> Self {
        let providers: Vec<Arc<dyn HostProvider>> = vec![
            Arc::new(MarkerProvider::new(HostKind::Jira, JIRA_MARKER)),
            Arc::new(MarkerProvider::new(HostKind::Confluence, CONFLUENCE_MARKER)),
            Arc::new(MarkerProvider::new(HostKind::Bamboo, BAMBOO_MARKER)),
            Arc::new(MarkerProvider::new(HostKind::Bitbucket, BITBUCKET_MARKER)),
        ];
        Self {
            providers,
            detected: Arc::new(OnceCell::new()),
        }
    }

    /// Append a provider after the built-in ones.  The result starts with
    /// no detection memoised, even when `self` was cloned from a detector
    /// that already ran.
    pub fn with_provider(mut self, provider: Arc<dyn HostProvider>) -> Self {
        self.providers.push(provider);
        self.detected = Arc::new(OnceCell::new());
        self
    }

    pub fn detect(&self, runtime: &dyn HostRuntime) -> HostKind {
        *self.detected.get_or_init(|| {
            let kind = self
                .providers
                .iter()
                .find(|p| p.is_present(runtime))
                .map(|p| p.kind())
                .unwrap_or(HostKind::Unknown);
            tracing::debug!(host = %kind, providers = self.providers.len(), "host product detected");
            kind
        })
    }
}
