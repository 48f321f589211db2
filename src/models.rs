//! Core data models used throughout driftwatch.
//!
//! These types represent the plans, discovered configuration records, and
//! the catalog/drill-down rows that flow from scanning to the final response.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Free-form classifier metadata attached to a discovered file.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Canonicalization strategy for a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Xml,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Xml => "xml",
        }
    }

    /// Picks the strategy for a classified file: an explicit `content_type`
    /// in the metadata wins, otherwise any format id mentioning xml does.
    pub fn for_format(format_id: &str, metadata: &Metadata) -> Self {
        if let Some(declared) = metadata.get("content_type").and_then(|v| v.as_str()) {
            if let Ok(ct) = declared.parse() {
                return ct;
            }
        }
        if format_id.to_ascii_lowercase().contains("xml") {
            ContentType::Xml
        } else {
            ContentType::Text
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContentType::Text),
            "xml" => Ok(ContentType::Xml),
            other => Err(other.to_string()),
        }
    }
}

/// Baseline preference declared by a plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselinePreference {
    #[serde(default)]
    pub is_preferred: bool,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub role: String,
}

/// Which response sections a plan asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    #[serde(default = "default_true")]
    pub include_catalog: bool,
    #[serde(default = "default_true")]
    pub include_drilldown: bool,
    #[serde(default)]
    pub include_configs: bool,
    #[serde(default)]
    pub include_raw: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_catalog: true,
            include_drilldown: true,
            include_configs: false,
            include_raw: false,
        }
    }
}

/// One host's scan request. Immutable for the duration of a run.
#[derive(Debug, Clone)]
pub struct Plan {
    pub host_id: String,
    pub label: String,
    pub scope: String,
    pub roots: Vec<PathBuf>,
    pub baseline: BaselinePreference,
    pub export: ExportOptions,
    pub throttle_seconds: Option<f64>,
}

/// One discovered configuration file on one host.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigRecord {
    pub config_id: String,
    pub display_name: String,
    pub format_id: String,
    pub content_type: ContentType,
    pub canonical: String,
    pub raw: String,
    pub metadata: Metadata,
    pub file_hash: String,
    pub secrets: bool,
    pub masked: bool,
    pub source_path: PathBuf,
    pub plugin_name: String,
    pub relative_path: String,
}

impl ConfigRecord {
    /// Tokens the classifier reported as already masked in this file.
    pub fn masked_tokens(&self) -> Vec<String> {
        self.metadata
            .get("masked_tokens")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|t| t.as_str())
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Lifecycle status of a host in progress events and results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Running,
    Succeeded,
    Failed,
}

/// Whether a host's roots could be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Found,
    NotFound,
    PermissionDenied,
    Offline,
}

/// Per-config listing on a host result, when the plan exports it.
#[derive(Debug, Clone, Serialize)]
pub struct HostConfigSummary {
    pub config_id: String,
    pub display_name: String,
    pub format: String,
    pub relative_path: String,
    pub source_path: PathBuf,
    pub file_hash: String,
    pub secrets: bool,
    pub masked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

/// Outcome of scanning one plan.
#[derive(Debug, Clone, Serialize)]
pub struct HostResult {
    pub host_id: String,
    pub label: String,
    pub scope: String,
    pub status: HostStatus,
    pub availability: Availability,
    pub message: String,
    pub used_cache: bool,
    pub config_count: usize,
    pub is_baseline: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configs: Option<Vec<HostConfigSummary>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Medium,
    High,
}

impl Severity {
    /// `high` once at least half of all hosts drift, `medium` for any drift.
    pub fn classify(drift_count: usize, host_count: usize) -> Self {
        if drift_count == 0 {
            Severity::None
        } else if drift_count * 2 >= host_count {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageStatus {
    Full,
    Partial,
    Missing,
}

impl CoverageStatus {
    pub fn classify(present: usize, expected: usize) -> Self {
        if present == 0 {
            CoverageStatus::Missing
        } else if present >= expected {
            CoverageStatus::Full
        } else {
            CoverageStatus::Partial
        }
    }
}

/// One catalog row per cross-host config identity.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub config_id: String,
    pub display_name: String,
    pub format: String,
    pub drift_count: usize,
    pub severity: Severity,
    pub present_hosts: Vec<String>,
    pub missing_hosts: Vec<String>,
    pub has_secrets: bool,
    pub has_masked_tokens: bool,
    pub has_validation_issues: bool,
    pub coverage_status: CoverageStatus,
}

/// Per-host status in a drill-down row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DrilldownStatus {
    Missing,
    Match,
    Drift,
    #[serde(rename = "Permission denied")]
    PermissionDenied,
    Offline,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrilldownHost {
    pub host_id: String,
    pub label: String,
    pub status: DrilldownStatus,
    pub has_secrets: bool,
    pub redacted: bool,
}

/// The representative diff attached to a drill-down row.
#[derive(Debug, Clone, Serialize)]
pub struct DrilldownDiff {
    pub baseline_host_id: String,
    pub compared_host_id: String,
    pub text: String,
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub redacted_tokens: BTreeMap<String, usize>,
}

/// One drill-down row per cross-host config identity.
#[derive(Debug, Clone, Serialize)]
pub struct DrilldownEntry {
    pub config_id: String,
    pub display_name: String,
    pub format: String,
    pub baseline_host_id: String,
    pub hosts: Vec<DrilldownHost>,
    pub diff: DrilldownDiff,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub host_count: usize,
    pub hosts_succeeded: usize,
    pub hosts_failed: usize,
    pub configs_evaluated: usize,
    pub drifting_configs: usize,
    pub baseline_host_id: String,
    pub baseline_label: String,
    pub generated_at: String,
}
