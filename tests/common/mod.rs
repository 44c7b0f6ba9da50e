#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use monitor_gate::host::detect::{BAMBOO_MARKER, BITBUCKET_MARKER, CONFLUENCE_MARKER, JIRA_MARKER};
use monitor_gate::host::manifest::{Behavior, ComponentSpec};
use monitor_gate::host::{HostValue, ManifestHost, Operation, UserHandle, INT, STRING};
use monitor_gate::permissions::bitbucket::BITBUCKET_USER;
use monitor_gate::permissions::confluence::CONFLUENCE_USER;
use monitor_gate::permissions::jira::{APPLICATION_USER, SYSTEM_ADMIN};
use monitor_gate::session::{MemorySession, MemorySessionStore, Session, LOGGED_IN_KEY};
use monitor_gate::{app_with, AppState, GateConfig, HostKind, Report, ReportRenderer, RumBeacon};

pub const ADMIN: &str = "admin";
pub const USER: &str = "user";
pub const CONTEXT_PATH: &str = "/test";
const PRINCIPAL: &str = "java.security.Principal";

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

pub const HOSTS: [HostKind; 4] = [
    HostKind::Jira,
    HostKind::Confluence,
    HostKind::Bamboo,
    HostKind::Bitbucket,
];

/// A current-generation host of `kind` where only `ADMIN` is an administrator.
pub fn host_for(kind: HostKind) -> ManifestHost {
    let builder = ManifestHost::builder();
    match kind {
        HostKind::Jira => builder
            .with_type(JIRA_MARKER)
            .with_type(APPLICATION_USER)
            .with_component(
                "pm",
                ComponentSpec::new()
                    .operation(
                        Operation::new("hasPermission", &[INT, APPLICATION_USER]),
                        Behavior::AdminCheck {
                            requires: vec![HostValue::int(SYSTEM_ADMIN)],
                        },
                    )
                    .admin(ADMIN),
            )
            .with_component("um", user_lookup("getUserByName", APPLICATION_USER))
            .accessor("com.atlassian.jira.component.ComponentAccessor", "getPermissionManager", "pm")
            .accessor("com.atlassian.jira.component.ComponentAccessor", "getUserManager", "um")
            .build(),
        HostKind::Confluence => builder
            .with_type(CONFLUENCE_MARKER)
            .with_type(CONFLUENCE_USER)
            .with_component(
                "pm",
                ComponentSpec::new()
                    .operation(
                        Operation::new("isConfluenceAdministrator", &[CONFLUENCE_USER]),
                        Behavior::AdminCheck { requires: vec![] },
                    )
                    .admin(ADMIN),
            )
            .with_component("ua", user_lookup("getUserByName", CONFLUENCE_USER))
            .register("permissionManager", "pm")
            .register("userAccessor", "ua")
            .build(),
        HostKind::Bamboo => builder
            .with_type(BAMBOO_MARKER)
            .with_component(
                "bpm",
                ComponentSpec::new()
                    .operation(
                        Operation::new("isSystemAdmin", &[STRING]),
                        Behavior::AdminCheck { requires: vec![] },
                    )
                    .admin(ADMIN),
            )
            .register("bambooPermissionManager", "bpm")
            .build(),
        HostKind::Bitbucket => builder
            .with_type(BITBUCKET_MARKER)
            .with_type(BITBUCKET_USER)
            .with_component(
                "ps",
                ComponentSpec::new()
                    .operation(
                        Operation::new("hasGlobalPermission", &[BITBUCKET_USER, STRING]),
                        Behavior::AdminCheck {
                            requires: vec![HostValue::str("SYS_ADMIN")],
                        },
                    )
                    .admin(ADMIN),
            )
            .register("permissionService", "ps")
            .build(),
        HostKind::Unknown => builder.build(),
    }
}

fn user_lookup(op: &str, user_type: &str) -> ComponentSpec {
    ComponentSpec::new().operation(
        Operation::new(op, &[STRING]),
        Behavior::UserLookup {
            user_type: user_type.to_string(),
            principal: true,
        },
    )
}

/// What the host stores under the login marker for `name`.
pub fn login_value(kind: HostKind, name: &str) -> HostValue {
    let type_name = match kind {
        HostKind::Bitbucket => BITBUCKET_USER,
        _ => PRINCIPAL,
    };
    HostValue::User(UserHandle::principal(type_name, name))
}

#[derive(Default)]
pub struct CountingRenderer {
    renders: AtomicUsize,
    beacons: Mutex<Vec<RumBeacon>>,
}

impl CountingRenderer {
    pub fn renders(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }

    pub fn beacons(&self) -> Vec<RumBeacon> {
        self.beacons.lock().unwrap().clone()
    }
}

impl ReportRenderer for CountingRenderer {
    fn render(&self) -> Report {
        self.renders.fetch_add(1, Ordering::SeqCst);
        Report {
            content_type: "text/html",
            body: "report".to_string(),
        }
    }

    fn record_rum(&self, beacon: &RumBeacon) {
        self.beacons.lock().unwrap().push(beacon.clone());
    }
}

pub struct Fixture {
    pub kind: HostKind,
    pub host: Arc<ManifestHost>,
    pub sessions: MemorySessionStore,
    pub renderer: Arc<CountingRenderer>,
    pub state: AppState,
    pub router: Router,
}

impl Fixture {
    pub fn new(kind: HostKind, config: GateConfig) -> Self {
        Self::with_host(kind, host_for(kind), config)
    }

    pub fn with_host(kind: HostKind, host: ManifestHost, config: GateConfig) -> Self {
        let host = Arc::new(host);
        let sessions = MemorySessionStore::new();
        let renderer = Arc::new(CountingRenderer::default());
        let state = AppState::new(
            config,
            host.clone(),
            Arc::new(sessions.clone()),
            renderer.clone(),
        );
        let application = Router::new().fallback(|| async { "app" });
        let router = app_with(state.clone(), application);
        Self {
            kind,
            host,
            sessions,
            renderer,
            state,
            router,
        }
    }

    /// Session `id` logged in as `name`.
    pub fn login(&self, id: &str, name: &str) -> Arc<MemorySession> {
        let session = self.sessions.create(id);
        session
            .set_attribute(LOGGED_IN_KEY, login_value(self.kind, name))
            .unwrap();
        session
    }
}

pub fn config() -> GateConfig {
    GateConfig {
        context_path: CONTEXT_PATH.to_string(),
        ..GateConfig::default()
    }
}

pub fn get(path: &str, session: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(id) = session {
        builder = builder.header("cookie", format!("JSESSIONID={}", id));
    }
    builder.body(Body::empty()).unwrap()
}

pub async fn body_string(resp: Response<Body>) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
