//! Report collaborator.
//!
//! Rendering the monitoring report is not the gate's business; it only
//! needs something to hand approved requests to, and somewhere to drop
//! real-user-monitoring beacons.

use serde::{Deserialize, Serialize};

use crate::host::HostKind;

/// Rendered report handed back to the client with status 200.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub content_type: &'static str,
    pub body: String,
}

/// Timings sent by the browser-side RUM script.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RumBeacon {
    pub request_name: Option<String>,
    pub server_time: Option<u64>,
    pub time_to_first_byte: Option<u64>,
    pub dom_processing: Option<u64>,
    pub page_rendering: Option<u64>,
}

pub trait ReportRenderer: Send + Sync {
    fn render(&self) -> Report;

    fn record_rum(&self, beacon: &RumBeacon) {
        tracing::trace!(request = ?beacon.request_name, "rum beacon ignored");
    }
}

/// Minimal HTML page naming the monitored product.
pub struct StaticReport {
    host: HostKind,
    started: chrono::DateTime<chrono::Utc>,
}

impl StaticReport {
    pub fn new(host: HostKind) -> Self {
        Self {
            host,
            started: chrono::Utc::now(),
        }
    }
}

impl ReportRenderer for StaticReport {
    fn render(&self) -> Report {
        let body = format!(
            "<!DOCTYPE html>\n<html><head><title>Monitoring {app}</title></head>\
             <body><h1>Monitoring {app}</h1><p>Started {started}</p><p>Generated {now}</p></body></html>",
            app = self.host.application_type(),
            started = self.started.to_rfc3339(),
            now = chrono::Utc::now().to_rfc3339(),
        );
        Report {
            content_type: "text/html; charset=utf-8",
            body,
        }
    }

    fn record_rum(&self, beacon: &RumBeacon) {
        tracing::info!(
            target: "rum",
            request = ?beacon.request_name,
            server_ms = ?beacon.server_time,
            ttfb_ms = ?beacon.time_to_first_byte,
            dom_ms = ?beacon.dom_processing,
            render_ms = ?beacon.page_rendering,
            "rum beacon"
        );
    }
}
