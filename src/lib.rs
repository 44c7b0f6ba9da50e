//! Core library for monitor-gate.  This module wires the host detection,
//! identity resolution and permission adapters into an axum middleware that
//! guards the monitoring report, and builds the router around it.

mod config;
pub mod error;
pub mod gate;
pub mod host;
pub mod identity;
pub mod permissions;
pub mod report;
pub mod session;

pub use config::AppConfig;
pub use error::GateError;
pub use gate::{AccessDecision, AccessGate, GateConfig};
pub use host::{HostDetector, HostKind, HostRuntime};
pub use identity::{Identity, IdentityResolver};
pub use report::{Report, ReportRenderer, RumBeacon};

use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Router};

use crate::gate::FORBIDDEN_MESSAGE;
use crate::host::{EmptyHost, ManifestHost};
use crate::report::StaticReport;
use crate::session::{session_id, MemorySessionStore, Session, SessionStore};

/// Shared state of the gate middleware and the report route.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<AccessGate>,
    pub sessions: Arc<dyn SessionStore>,
    pub renderer: Arc<dyn ReportRenderer>,
    pub session_cookie: String,
}

impl AppState {
    pub fn new(
        config: GateConfig,
        runtime: Arc<dyn HostRuntime>,
        sessions: Arc<dyn SessionStore>,
        renderer: Arc<dyn ReportRenderer>,
    ) -> Self {
        let gate = AccessGate::new(config, runtime, &HostDetector::new());
        Self {
            gate: Arc::new(gate),
            sessions,
            renderer,
            session_cookie: "JSESSIONID".to_string(),
        }
    }

    pub fn with_session_cookie(mut self, name: &str) -> Self {
        self.session_cookie = name.to_string();
        self
    }
}

/// Build state from environment variables (see `AppConfig::from_env`).  The
/// host runtime comes from `MONITOR_GATE_HOST_MANIFEST`; without one the
/// host is unknown.  Sessions listed in the manifest are pre-seeded.
pub async fn build_state_from_env() -> Result<AppState, Box<dyn std::error::Error>> {
    let config = AppConfig::from_env().map_err(|e| -> Box<dyn std::error::Error> { e.into() })?;
    let AppConfig {
        gate,
        host_manifest,
        session_cookie,
    } = config;

    let sessions = MemorySessionStore::new();
    let runtime: Arc<dyn HostRuntime> = match host_manifest {
        Some(mut manifest) => {
            for (id, attributes) in std::mem::take(&mut manifest.sessions) {
                let session = sessions.create(&id);
                for (key, value) in attributes {
                    session.set_attribute(&key, value)?;
                }
            }
            Arc::new(ManifestHost::new(manifest))
        }
        None => {
            tracing::warn!("MONITOR_GATE_HOST_MANIFEST not set; no host product available");
            Arc::new(EmptyHost)
        }
    };

    let detector = HostDetector::new();
    let host = detector.detect(runtime.as_ref());
    let access = AccessGate::new(gate, runtime, &detector);
    Ok(AppState {
        gate: Arc::new(access),
        sessions: Arc::new(sessions),
        renderer: Arc::new(StaticReport::new(host)),
        session_cookie,
    })
}

/// Gate the monitoring report; unmatched paths get axum's default 404.
pub fn app(state: AppState) -> Router {
    app_with(state, Router::new())
}

/// Gate the monitoring report in front of `application`, which serves
/// every other path.
pub fn app_with(state: AppState, application: Router) -> Router {
    let monitoring_url = state.gate.monitoring_url();
    Router::new()
        .route(&monitoring_url, get(report_handler))
        .with_state(state.clone())
        .merge(application)
        .layer(middleware::from_fn_with_state(state, handle_request))
}

/// The filter: runs in front of every request.
pub async fn handle_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let session = session_id(request.headers(), &state.session_cookie)
        .and_then(|id| state.sessions.find(&id));
    let session = session.as_deref();

    if state.gate.is_monitoring_request(request.uri().path()) {
        if state.gate.is_rum_request(request.uri().query()) {
            let beacon = Query::<RumBeacon>::try_from_uri(request.uri())
                .map(|Query(b)| b)
                .unwrap_or_default();
            state.renderer.record_rum(&beacon);
            return StatusCode::NO_CONTENT.into_response();
        }

        let identity = state.gate.identify(session);
        let decision = state.gate.decide_for(identity.as_ref());
        state.gate.remember_identity(session, identity.as_ref());
        match decision {
            Ok(AccessDecision::Proceed) => {}
            Ok(AccessDecision::Redirect(location)) => {
                return (StatusCode::FOUND, [(header::LOCATION, location)]).into_response();
            }
            Ok(AccessDecision::Forbidden) => {
                return (
                    StatusCode::FORBIDDEN,
                    [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                    FORBIDDEN_MESSAGE,
                )
                    .into_response();
            }
            Err(err) => {
                tracing::error!(host = %state.gate.host(), error = %err, "permission check failed");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    } else {
        state.gate.cache_identity(session);
    }

    next.run(request).await
}

async fn report_handler(State(state): State<AppState>) -> Response {
    let report = state.renderer.render();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, report.content_type)],
        report.body,
    )
        .into_response()
}
