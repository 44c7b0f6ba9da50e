use thiserror::Error;

use crate::host::{HostError, HostKind};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    /// No permission-check call shape could be bound for the running host.
    #[error("{host} permission API is incompatible: {source}")]
    HostIncompatible {
        host: HostKind,
        #[source]
        source: HostError,
    },

    #[error("logged-in user could not be resolved: {0}")]
    IdentityUnresolvable(String),

    #[error("session has been invalidated")]
    SessionInvalidated,
}

impl GateError {
    pub fn incompatible(host: HostKind, source: HostError) -> Self {
        GateError::HostIncompatible { host, source }
    }

    /// Whether the error must terminate the request instead of degrading to
    /// an anonymous caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GateError::HostIncompatible { .. })
    }
}
