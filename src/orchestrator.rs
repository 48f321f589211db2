//! Run orchestration.
//!
//! Coordinates one invocation: baseline selection → per-host scans (bounded
//! worker pool, failures isolated per host) → catalog and drill-down →
//! response. Progress events always come out in plan order, whatever order
//! the scans actually finish in.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::cache::DiffCache;
use crate::catalog::{self, HostConfigs};
use crate::classify::{Classifier, ExtensionClassifier, PatternSecretHunter, SecretHunter};
use crate::config::Config;
use crate::diff::DiffError;
use crate::models::{
    Availability, ConfigRecord, HostConfigSummary, HostResult, HostStatus, Plan, Summary,
};
use crate::progress::EventSink;
use crate::protocol::{truncate_message, Response, SCHEMA_VERSION};
use crate::scanner::{HostScan, HostScanner, ScanBudget, ScanError, ScanSettings};

/// Run-level failures. Per-host failures never surface here.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no plans supplied; cannot select a baseline host")]
    NoPlans,
    #[error("failed to build drift catalog: {0}")]
    Catalog(#[from] DiffError),
}

/// Knobs for a run, normally taken from [`Config`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub workers: usize,
    pub context_lines: usize,
    pub max_message_len: usize,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.scan.workers.max(1),
            context_lines: config.diff.context_lines,
            max_message_len: config.protocol.max_message_len,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Index of the baseline plan: preferred first, then higher priority, then
/// request order.
pub fn select_baseline(plans: &[Plan]) -> Option<usize> {
    plans
        .iter()
        .enumerate()
        .min_by_key(|(idx, p)| {
            (
                !p.baseline.is_preferred,
                std::cmp::Reverse(p.baseline.priority),
                *idx,
            )
        })
        .map(|(idx, _)| idx)
}

pub struct Orchestrator {
    scanner: Arc<HostScanner>,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(scanner: HostScanner, options: RunOptions) -> Self {
        Self {
            scanner: Arc::new(scanner),
            options,
        }
    }

    /// Wire the built-in classifier and secret hunter around `cache`.
    pub fn from_config(config: &Config, cache: DiffCache) -> anyhow::Result<Self> {
        let classifier: Arc<dyn Classifier> = Arc::new(ExtensionClassifier::new());
        let settings = ScanSettings::from_config(config)?;
        let hunter: Arc<dyn SecretHunter> = Arc::new(
            PatternSecretHunter::new(settings.follow_symlinks)?
                .with_excludes(settings.excludes.clone())
                .with_max_file_bytes(settings.max_file_bytes),
        );
        let scanner = HostScanner::new(classifier, hunter, Arc::new(cache), settings);
        Ok(Self::new(scanner, RunOptions::from_config(config)))
    }

    pub async fn run(
        &self,
        plans: &[Plan],
        budget: &ScanBudget,
        sink: &dyn EventSink,
    ) -> Result<Response, RunError> {
        let baseline_idx = select_baseline(plans).ok_or(RunError::NoPlans)?;
        let baseline = &plans[baseline_idx];
        info!(
            hosts = plans.len(),
            baseline = %baseline.host_id,
            workers = self.options.workers,
            "starting drift run"
        );

        let handles = self.spawn_scans(plans, budget);

        let mut results = Vec::with_capacity(plans.len());
        let mut host_configs = HostConfigs::new();
        let mut availability = HashMap::new();

        for (plan, handle) in plans.iter().zip(handles) {
            sink.progress(
                &plan.host_id,
                HostStatus::Running,
                &format!("scanning {} root(s)", plan.roots.len()),
            );

            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => Err(ScanError::UnexpectedFailure(format!("scan task failed: {}", e))),
            };
            let is_baseline = plan.host_id == baseline.host_id;

            let result = match outcome {
                Ok(scan) => {
                    let result = self.succeeded(plan, &scan, is_baseline);
                    host_configs.insert(plan.host_id.clone(), scan.configs);
                    result
                }
                Err(err) => self.failed(plan, &err, is_baseline),
            };
            info!(
                host_id = %plan.host_id,
                status = ?result.status,
                availability = ?result.availability,
                configs = result.config_count,
                used_cache = result.used_cache,
                "host finished"
            );
            sink.progress(&plan.host_id, result.status, &result.message);
            availability.insert(plan.host_id.clone(), result.availability);
            results.push(result);
        }

        let built = catalog::build(
            plans,
            &host_configs,
            &availability,
            &baseline.host_id,
            self.options.context_lines,
        )?;

        let summary = Summary {
            host_count: plans.len(),
            hosts_succeeded: results
                .iter()
                .filter(|r| r.status == HostStatus::Succeeded)
                .count(),
            hosts_failed: results
                .iter()
                .filter(|r| r.status == HostStatus::Failed)
                .count(),
            configs_evaluated: built.entries.len(),
            drifting_configs: built.entries.iter().filter(|e| e.drift_count > 0).count(),
            baseline_host_id: baseline.host_id.clone(),
            baseline_label: baseline.label.clone(),
            generated_at: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        };

        let want_catalog = plans.iter().any(|p| p.export.include_catalog);
        let want_drilldown = plans.iter().any(|p| p.export.include_drilldown);

        Ok(Response {
            version: SCHEMA_VERSION.to_string(),
            results,
            catalog: if want_catalog { built.entries } else { Vec::new() },
            drilldown: if want_drilldown {
                built.drilldown
            } else {
                Vec::new()
            },
            summary,
        })
    }

    /// Start every scan up front; at most `workers` run at once. A plan's
    /// throttle delay is served while it still holds its worker slot.
    fn spawn_scans(
        &self,
        plans: &[Plan],
        budget: &ScanBudget,
    ) -> Vec<tokio::task::JoinHandle<Result<HostScan, ScanError>>> {
        let slots = Arc::new(Semaphore::new(self.options.workers.max(1)));
        plans
            .iter()
            .map(|plan| {
                let slots = Arc::clone(&slots);
                let scanner = Arc::clone(&self.scanner);
                let budget = budget.clone();
                let plan = plan.clone();
                tokio::spawn(async move {
                    let _permit = slots
                        .acquire_owned()
                        .await
                        .map_err(|e| ScanError::UnexpectedFailure(e.to_string()))?;
                    let throttle = plan.throttle_seconds;
                    let scan_budget = budget.clone();
                    let outcome =
                        tokio::task::spawn_blocking(move || scanner.scan(&plan, &scan_budget))
                            .await
                            .unwrap_or_else(|e| {
                                Err(ScanError::UnexpectedFailure(format!(
                                    "scan task failed: {}",
                                    e
                                )))
                            });
                    if let Some(delay) = throttle.and_then(throttle_delay) {
                        let delay = budget.remaining().map_or(delay, |left| delay.min(left));
                        if !budget.is_exhausted() && !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    outcome
                })
            })
            .collect()
    }

    fn succeeded(&self, plan: &Plan, scan: &HostScan, is_baseline: bool) -> HostResult {
        let count = scan.configs.len();
        let message = if scan.used_cache {
            format!("{} config(s) discovered, all from cache", count)
        } else {
            format!("{} config(s) discovered", count)
        };
        let configs = plan.export.include_configs.then(|| {
            scan.configs
                .values()
                .map(|record| summarize(record, plan.export.include_raw))
                .collect()
        });
        HostResult {
            host_id: plan.host_id.clone(),
            label: plan.label.clone(),
            scope: plan.scope.clone(),
            status: HostStatus::Succeeded,
            availability: Availability::Found,
            message,
            used_cache: scan.used_cache,
            config_count: count,
            is_baseline,
            configs,
        }
    }

    fn failed(&self, plan: &Plan, err: &ScanError, is_baseline: bool) -> HostResult {
        warn!(host_id = %plan.host_id, error = %err, "host scan failed");
        HostResult {
            host_id: plan.host_id.clone(),
            label: plan.label.clone(),
            scope: plan.scope.clone(),
            status: HostStatus::Failed,
            availability: err.availability(),
            message: truncate_message(&err.to_string(), self.options.max_message_len),
            used_cache: false,
            config_count: 0,
            is_baseline,
            configs: None,
        }
    }
}

/// A plan's pause after its scan. Values a `Duration` cannot hold mean none.
fn throttle_delay(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
}

fn summarize(record: &ConfigRecord, include_raw: bool) -> HostConfigSummary {
    HostConfigSummary {
        config_id: record.config_id.clone(),
        display_name: record.display_name.clone(),
        format: record.format_id.clone(),
        relative_path: record.relative_path.clone(),
        source_path: record.source_path.clone(),
        file_hash: record.file_hash.clone(),
        secrets: record.secrets,
        masked: record.masked,
        raw: include_raw.then(|| record.raw.clone()),
    }
}
