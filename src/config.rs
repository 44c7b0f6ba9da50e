use std::env;
use std::fs;

use anyhow::{anyhow, Context, Result};

use crate::gate::GateConfig;
use crate::host::HostManifest;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gate: GateConfig,
    pub host_manifest: Option<HostManifest>,
    pub session_cookie: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let host_manifest = match env::var("MONITOR_GATE_HOST_MANIFEST") {
            Ok(path) if !path.trim().is_empty() => {
                let content = fs::read_to_string(&path).with_context(|| {
                    format!(
                        "Failed to read MONITOR_GATE_HOST_MANIFEST '{}': file unreadable",
                        path
                    )
                })?;
                Some(HostManifest::from_json(&content).with_context(|| {
                    format!(
                        "Failed to parse MONITOR_GATE_HOST_MANIFEST '{}': invalid JSON manifest",
                        path
                    )
                })?)
            }
            _ => None,
        };

        let context_path = parse_path_env("MONITOR_GATE_CONTEXT_PATH")?.unwrap_or_default();
        let monitoring_path = parse_path_env("MONITOR_GATE_MONITORING_PATH")?
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/monitoring".to_string());
        let login_path = env::var("MONITOR_GATE_LOGIN_PATH")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let session_cookie = env::var("MONITOR_GATE_SESSION_COOKIE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "JSESSIONID".to_string());

        let gate = GateConfig {
            context_path,
            monitoring_path,
            authentication_disabled: parse_bool_env("MONITOR_GATE_AUTHENTICATION_DISABLED")?
                .unwrap_or(false),
            rum_enabled: parse_bool_env("MONITOR_GATE_RUM_ENABLED")?.unwrap_or(false),
            allow_unknown_host: parse_bool_env("MONITOR_GATE_ALLOW_UNKNOWN_HOST")?.unwrap_or(false),
            login_path,
        };

        Ok(Self {
            gate,
            host_manifest,
            session_cookie,
        })
    }
}

/// Paths must start with '/'; a trailing '/' is dropped.
fn parse_path_env(var: &str) -> Result<Option<String>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => {
            let value = value.trim();
            if !value.starts_with('/') {
                return Err(anyhow!("{} must start with '/'", var));
            }
            Ok(Some(value.trim_end_matches('/').to_string()))
        }
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
