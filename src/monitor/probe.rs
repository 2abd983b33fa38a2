//! A single monitor probe and the log it feeds.

use std::collections::{HashMap, VecDeque};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use dashmap::DashMap;
use serde::Serialize;

use crate::catalog::Monitor;
use crate::observability::metrics;
use crate::proxy::builder::{build_headers, build_url};
use crate::secrets::{render, render_pairs};

/// Entries kept per monitor.
pub const LOG_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorLog {
    /// HTTP status, or 0 when the endpoint could not be reached.
    pub status: u16,
    pub response_time_ms: u64,
    /// Unix seconds.
    pub checked_at: u64,
}

/// Bounded, newest-first probe history per monitor.
#[derive(Debug, Default)]
pub struct MonitorLogStore {
    logs: DashMap<String, VecDeque<MonitorLog>>,
}

impl MonitorLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, monitor_id: &str, log: MonitorLog) {
        let mut entries = self.logs.entry(monitor_id.to_string()).or_default();
        entries.push_front(log);
        entries.truncate(LOG_CAPACITY);
    }

    pub fn recent(&self, monitor_id: &str) -> Vec<MonitorLog> {
        self.logs
            .get(monitor_id)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self, monitor_id: &str) {
        self.logs.remove(monitor_id);
    }
}

/// Probe a monitored endpoint once with a GET.
pub async fn probe(
    client: &reqwest::Client,
    monitor: &Monitor,
    secrets: &HashMap<String, String>,
) -> MonitorLog {
    let checked_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let started = Instant::now();

    let request = build_url(
        &render(&monitor.api_url, secrets),
        "",
        &render_pairs(&monitor.query_params, secrets),
        &[],
    )
    .and_then(|url| {
        let headers = build_headers(
            &render_pairs(&monitor.headers, secrets),
            &HeaderMap::new(),
            false,
        )?;
        Ok((url, headers))
    });

    let status = match request {
        Ok((url, headers)) => match client.get(url).headers(headers).send().await {
            Ok(response) => response.status().as_u16(),
            Err(e) => {
                tracing::warn!(monitor = %monitor.id, error = %e.without_url(), "Monitor probe failed");
                0
            }
        },
        Err(e) => {
            tracing::error!(monitor = %monitor.id, error = %e, "Monitor misconfigured");
            0
        }
    };

    let response_time_ms = started.elapsed().as_millis() as u64;
    metrics::record_probe(&monitor.id, status != 0);
    tracing::info!(monitor = %monitor.id, status, response_time_ms, "Monitor probed");

    MonitorLog {
        status,
        response_time_ms,
        checked_at,
    }
}
