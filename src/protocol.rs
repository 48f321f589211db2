//! Wire types for the stdin/stdout invocation protocol.
//!
//! The operator console writes one JSON request object to stdin and reads
//! newline-delimited JSON events from stdout:
//!
//! ```text
//! stdin   {"schema_version": "multi-server.v1", "plans": [...]}
//! stdout  {"type": "progress", "payload": {...}}      one per host transition
//! stdout  {"type": "result", "payload": {...}}        final line on success
//! stdout  {"type": "error", "message": "..."}         final line on abort
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::identity::slugify_segment;
use crate::models::{
    BaselinePreference, CatalogEntry, DrilldownEntry, ExportOptions, HostResult, HostStatus, Plan,
    Summary,
};

/// The only request/response schema this engine speaks.
pub const SCHEMA_VERSION: &str = "multi-server.v1";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported schema_version '{0}' (expected '{SCHEMA_VERSION}')")]
    UnsupportedSchema(String),
    #[error("request contains no plans; cannot select a baseline host")]
    NoPlans,
    #[error("duplicate host_id '{0}' in request")]
    DuplicateHost(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub schema_version: String,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Overall scan deadline; hosts still scanning when it passes go offline.
    #[serde(default)]
    pub time_budget_seconds: Option<f64>,
    #[serde(default)]
    pub plans: Vec<PlanJson>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanJson {
    #[serde(default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub roots: Vec<PathBuf>,
    #[serde(default)]
    pub baseline: BaselinePreference,
    #[serde(default)]
    pub export: ExportOptions,
    #[serde(default)]
    pub throttle_seconds: Option<f64>,
}

impl PlanJson {
    /// Resolve defaults: a missing `host_id` becomes the slugified label, or
    /// a fresh `host-<uuid>` when there is no label either.
    pub fn into_plan(self) -> Plan {
        let label = self
            .label
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        let host_id = self
            .host_id
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .or_else(|| label.as_deref().and_then(slugify_segment))
            .unwrap_or_else(|| format!("host-{}", uuid::Uuid::new_v4()));
        let throttle_seconds = self
            .throttle_seconds
            .filter(|s| *s > 0.0 && Duration::try_from_secs_f64(*s).is_ok());
        Plan {
            label: label.unwrap_or_else(|| host_id.clone()),
            host_id,
            scope: self.scope.unwrap_or_default(),
            roots: self.roots,
            baseline: self.baseline,
            export: self.export,
            throttle_seconds,
        }
    }
}

impl Request {
    /// The overall scan deadline. Non-positive, non-finite, or
    /// unrepresentable values mean the run has no deadline.
    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_seconds
            .filter(|s| *s > 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok())
    }
}

/// Parse and validate a request. Schema is checked before anything else so
/// a foreign request is rejected even if its body would not parse.
pub fn parse_request(input: &str) -> Result<Request, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(input)?;
    let version = value
        .get("schema_version")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if version != SCHEMA_VERSION {
        return Err(ProtocolError::UnsupportedSchema(version.to_string()));
    }
    let request: Request = serde_json::from_value(value)?;
    if request.plans.is_empty() {
        return Err(ProtocolError::NoPlans);
    }
    Ok(request)
}

/// Turn request plans into run plans, rejecting duplicate host ids.
pub fn resolve_plans(plans: Vec<PlanJson>) -> Result<Vec<Plan>, ProtocolError> {
    let plans: Vec<Plan> = plans.into_iter().map(PlanJson::into_plan).collect();
    let mut seen = HashSet::new();
    for plan in &plans {
        if !seen.insert(plan.host_id.as_str()) {
            return Err(ProtocolError::DuplicateHost(plan.host_id.clone()));
        }
    }
    if plans.is_empty() {
        return Err(ProtocolError::NoPlans);
    }
    Ok(plans)
}

/// Bound a failure message before it goes on the wire. Cuts on a char
/// boundary and marks the cut with `...`.
pub fn truncate_message(message: &str, max_len: usize) -> String {
    if message.len() <= max_len {
        return message.to_string();
    }
    let budget = max_len.saturating_sub(3);
    let mut end = budget;
    while end > 0 && !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &message[..end])
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressPayload {
    pub host_id: String,
    pub status: HostStatus,
    pub message: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub version: String,
    pub results: Vec<HostResult>,
    pub catalog: Vec<CatalogEntry>,
    pub drilldown: Vec<DrilldownEntry>,
    pub summary: Summary,
}

/// One line on stdout.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Event {
    Progress { payload: ProgressPayload },
    Result { payload: Box<Response> },
    Error { message: String },
}
