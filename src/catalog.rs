//! Cross-host aggregation into a drift catalog and drill-down rows.
//!
//! For every `config_id` seen on at least one host, a baseline record is
//! picked (the baseline host's own copy, else the copy on the
//! alphabetically-first host by label), every present host is diffed against
//! it, and drift count, severity and coverage are derived.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::diff::{self, DiffError, DiffOptions, DiffResult, Redaction};
use crate::models::{
    Availability, CatalogEntry, ConfigRecord, CoverageStatus, DrilldownDiff, DrilldownEntry,
    DrilldownHost, DrilldownStatus, Plan, Severity,
};

/// Per-host discovered configs, keyed by host id then config id.
pub type HostConfigs = HashMap<String, BTreeMap<String, ConfigRecord>>;

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
    pub drilldown: Vec<DrilldownEntry>,
}

/// Build the catalog and drill-down for one run.
///
/// `plans` fixes host order and the expected host set; hosts absent from
/// `host_configs` (failed scans) count as missing every config.
pub fn build(
    plans: &[Plan],
    host_configs: &HostConfigs,
    host_availability: &HashMap<String, Availability>,
    baseline_host_id: &str,
    context_lines: usize,
) -> Result<Catalog, DiffError> {
    let config_ids: BTreeSet<&String> = host_configs.values().flat_map(|c| c.keys()).collect();
    let mut catalog = Catalog::default();

    for config_id in config_ids {
        let present: Vec<(&Plan, &ConfigRecord)> = plans
            .iter()
            .filter_map(|p| {
                host_configs
                    .get(&p.host_id)
                    .and_then(|configs| configs.get(config_id))
                    .map(|record| (p, record))
            })
            .collect();
        let Some((baseline_plan, baseline)) = baseline_record(&present, baseline_host_id) else {
            continue;
        };

        let mut drift_count = 0;
        let mut per_host: HashMap<&str, (DrilldownStatus, DiffResult)> = HashMap::new();
        for (plan, record) in &present {
            let result = diff_against(baseline_plan, baseline, plan, record, context_lines)?;
            let status = if plan.host_id != baseline_plan.host_id && result.has_changes() {
                drift_count += 1;
                DrilldownStatus::Drift
            } else {
                DrilldownStatus::Match
            };
            per_host.insert(plan.host_id.as_str(), (status, result));
        }

        let present_hosts: Vec<String> = present.iter().map(|(p, _)| p.label.clone()).collect();
        let missing_hosts: Vec<String> = plans
            .iter()
            .filter(|p| !per_host.contains_key(p.host_id.as_str()))
            .map(|p| p.label.clone())
            .collect();

        let hosts: Vec<DrilldownHost> = plans
            .iter()
            .map(|p| {
                let record = present
                    .iter()
                    .find(|(pp, _)| pp.host_id == p.host_id)
                    .map(|(_, r)| *r);
                let status = match per_host.get(p.host_id.as_str()) {
                    Some((status, _)) => *status,
                    None => absent_status(host_availability.get(&p.host_id)),
                };
                DrilldownHost {
                    host_id: p.host_id.clone(),
                    label: p.label.clone(),
                    status,
                    has_secrets: record.is_some_and(|r| r.secrets),
                    redacted: record.is_some_and(|r| r.masked),
                }
            })
            .collect();

        let target = representative_target(&present, &per_host, &baseline_plan.host_id);
        let (_, target_diff) = &per_host[target.host_id.as_str()];
        let diff = DrilldownDiff {
            baseline_host_id: baseline_plan.host_id.clone(),
            compared_host_id: target.host_id.clone(),
            text: target_diff.diff.clone(),
            added: target_diff.stats.added,
            removed: target_diff.stats.removed,
            changed: target_diff.stats.changed,
            redacted_tokens: target_diff.redactions.clone().unwrap_or_default(),
        };

        let entry = CatalogEntry {
            config_id: config_id.clone(),
            display_name: baseline.display_name.clone(),
            format: baseline.format_id.clone(),
            drift_count,
            severity: Severity::classify(drift_count, plans.len()),
            present_hosts,
            has_validation_issues: !missing_hosts.is_empty(),
            missing_hosts,
            has_secrets: present.iter().any(|(_, r)| r.secrets),
            has_masked_tokens: present.iter().any(|(_, r)| r.masked),
            coverage_status: CoverageStatus::classify(present.len(), plans.len()),
        };
        debug!(config_id = %config_id, drift_count, "catalog entry built");

        catalog.drilldown.push(DrilldownEntry {
            config_id: config_id.clone(),
            display_name: entry.display_name.clone(),
            format: entry.format.clone(),
            baseline_host_id: baseline_plan.host_id.clone(),
            hosts,
            diff,
        });
        catalog.entries.push(entry);
    }

    Ok(catalog)
}

/// The baseline host's record, else the record on the host whose label sorts
/// first (host id breaks label ties).
fn baseline_record<'a>(
    present: &[(&'a Plan, &'a ConfigRecord)],
    baseline_host_id: &str,
) -> Option<(&'a Plan, &'a ConfigRecord)> {
    present
        .iter()
        .find(|(p, _)| p.host_id == baseline_host_id)
        .or_else(|| {
            present.iter().min_by(|(a, _), (b, _)| {
                a.label
                    .cmp(&b.label)
                    .then_with(|| a.host_id.cmp(&b.host_id))
            })
        })
        .copied()
}

fn diff_against(
    baseline_plan: &Plan,
    baseline: &ConfigRecord,
    plan: &Plan,
    record: &ConfigRecord,
    context_lines: usize,
) -> Result<DiffResult, DiffError> {
    let mut tokens = baseline.masked_tokens();
    tokens.extend(record.masked_tokens());
    let redaction = if tokens.is_empty() {
        Redaction::None
    } else {
        Redaction::Tokens(tokens)
    };
    let options = DiffOptions::default()
        .labels(baseline_plan.label.as_str(), plan.label.as_str())
        .context_lines(context_lines)
        .redaction(redaction);
    diff::diff(
        &baseline.canonical,
        &record.canonical,
        baseline.content_type.as_str(),
        options,
    )
}

/// First drifting host in plan order, else the first other host with the
/// config, else the baseline record's own host.
fn representative_target<'a>(
    present: &[(&'a Plan, &'a ConfigRecord)],
    per_host: &HashMap<&str, (DrilldownStatus, DiffResult)>,
    baseline_host_id: &str,
) -> &'a Plan {
    let others = || {
        present
            .iter()
            .filter(move |(p, _)| p.host_id != baseline_host_id)
    };
    others()
        .find(|(p, _)| {
            matches!(
                per_host.get(p.host_id.as_str()),
                Some((DrilldownStatus::Drift, _))
            )
        })
        .or_else(|| others().next())
        .or_else(|| present.iter().find(|(p, _)| p.host_id == baseline_host_id))
        .map(|(p, _)| *p)
        .unwrap_or(present[0].0)
}

fn absent_status(availability: Option<&Availability>) -> DrilldownStatus {
    match availability {
        Some(Availability::PermissionDenied) => DrilldownStatus::PermissionDenied,
        Some(Availability::Offline) => DrilldownStatus::Offline,
        _ => DrilldownStatus::Missing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BaselinePreference, ContentType, ExportOptions, Metadata};
    use serde_json::json;
    use std::path::PathBuf;

    fn plan(host: &str) -> Plan {
        Plan {
            host_id: host.to_string(),
            label: host.to_string(),
            scope: String::new(),
            roots: vec![],
            baseline: BaselinePreference::default(),
            export: ExportOptions::default(),
            throttle_seconds: None,
        }
    }

    fn record(config_id: &str, canonical: &str) -> ConfigRecord {
        ConfigRecord {
            config_id: config_id.to_string(),
            display_name: config_id.to_string(),
            format_id: "json".to_string(),
            content_type: ContentType::Text,
            canonical: canonical.to_string(),
            raw: canonical.to_string(),
            metadata: Metadata::new(),
            file_hash: String::new(),
            secrets: false,
            masked: false,
            source_path: PathBuf::from(config_id),
            plugin_name: "json".to_string(),
            relative_path: config_id.to_string(),
        }
    }

    fn hosts(entries: &[(&str, Vec<ConfigRecord>)]) -> HostConfigs {
        entries
            .iter()
            .map(|(host, records)| {
                let map: BTreeMap<String, ConfigRecord> = records
                    .iter()
                    .map(|r| (r.config_id.clone(), r.clone()))
                    .collect();
                (host.to_string(), map)
            })
            .collect()
    }

    fn found(hosts: &[&str]) -> HashMap<String, Availability> {
        hosts
            .iter()
            .map(|h| (h.to_string(), Availability::Found))
            .collect()
    }

    #[test]
    fn single_drifting_host_of_three_is_medium() {
        let plans = vec![plan("server01"), plan("server02"), plan("server03")];
        let configs = hosts(&[
            ("server01", vec![record("app", "a=1\nb=2\n")]),
            ("server02", vec![record("app", "a=1\nb=2\n")]),
            ("server03", vec![record("app", "a=1\nb=3\n")]),
        ]);
        let availability = found(&["server01", "server02", "server03"]);
        let catalog = build(&plans, &configs, &availability, "server01", 3).unwrap();

        let entry = &catalog.entries[0];
        assert_eq!(entry.drift_count, 1);
        assert_eq!(entry.severity, Severity::Medium);
        assert_eq!(entry.coverage_status, CoverageStatus::Full);
        assert!(!entry.has_validation_issues);

        let drill = &catalog.drilldown[0];
        let statuses: Vec<_> = drill.hosts.iter().map(|h| h.status).collect();
        assert_eq!(
            statuses,
            vec![DrilldownStatus::Match, DrilldownStatus::Match, DrilldownStatus::Drift]
        );
        assert_eq!(drill.diff.compared_host_id, "server03");
        assert_eq!(drill.diff.changed, 1);
        assert!(drill.diff.text.contains("+b=3"));
    }

    #[test]
    fn missing_and_failed_hosts_are_distinguished() {
        let plans = vec![plan("a"), plan("b"), plan("c"), plan("d")];
        let configs = hosts(&[("a", vec![record("app", "x\n")]), ("b", vec![])]);
        let mut availability = found(&["a", "b"]);
        availability.insert("c".into(), Availability::PermissionDenied);
        availability.insert("d".into(), Availability::Offline);

        let catalog = build(&plans, &configs, &availability, "a", 3).unwrap();
        let entry = &catalog.entries[0];
        assert_eq!(entry.coverage_status, CoverageStatus::Partial);
        assert!(entry.has_validation_issues);
        assert_eq!(entry.present_hosts, vec!["a"]);
        assert_eq!(entry.missing_hosts, vec!["b", "c", "d"]);
        assert_eq!(entry.severity, Severity::None);

        let statuses: Vec<_> = catalog.drilldown[0].hosts.iter().map(|h| h.status).collect();
        assert_eq!(
            statuses,
            vec![
                DrilldownStatus::Match,
                DrilldownStatus::Missing,
                DrilldownStatus::PermissionDenied,
                DrilldownStatus::Offline
            ]
        );
        assert_eq!(catalog.drilldown[0].diff.compared_host_id, "a");
        assert!(catalog.drilldown[0].diff.text.is_empty());
    }

    #[test]
    fn fallback_baseline_is_alphabetically_first_label() {
        let mut zeta = plan("h-z");
        zeta.label = "zeta".into();
        let mut alpha = plan("h-a");
        alpha.label = "alpha".into();
        let plans = vec![plan("base"), zeta, alpha];
        let configs = hosts(&[
            ("base", vec![]),
            ("h-z", vec![record("only", "z\n")]),
            ("h-a", vec![record("only", "a\n")]),
        ]);
        let catalog = build(&plans, &configs, &found(&["base", "h-z", "h-a"]), "base", 3).unwrap();
        let drill = &catalog.drilldown[0];
        assert_eq!(drill.baseline_host_id, "h-a");
        assert_eq!(catalog.entries[0].drift_count, 1);
        assert_eq!(drill.diff.compared_host_id, "h-z");
    }

    #[test]
    fn majority_drift_is_high() {
        let plans = vec![plan("a"), plan("b"), plan("c")];
        let configs = hosts(&[
            ("a", vec![record("app", "v=1\n")]),
            ("b", vec![record("app", "v=2\n")]),
            ("c", vec![record("app", "v=3\n")]),
        ]);
        let catalog = build(&plans, &configs, &found(&["a", "b", "c"]), "a", 3).unwrap();
        assert_eq!(catalog.entries[0].drift_count, 2);
        assert_eq!(catalog.entries[0].severity, Severity::High);
    }

    #[test]
    fn masked_tokens_are_redacted_before_comparison() {
        let plans = vec![plan("a"), plan("b")];
        let mut left = record("app", "user=admin\npassword=alpha\n");
        let mut right = record("app", "user=admin\npassword=bravo\n");
        left.metadata.insert("masked_tokens".into(), json!(["alpha"]));
        left.masked = true;
        right.metadata.insert("masked_tokens".into(), json!(["bravo"]));
        right.masked = true;
        let configs = hosts(&[("a", vec![left]), ("b", vec![right])]);

        let catalog = build(&plans, &configs, &found(&["a", "b"]), "a", 3).unwrap();
        assert_eq!(catalog.entries[0].drift_count, 0);
        assert!(catalog.entries[0].has_masked_tokens);
        let drill = &catalog.drilldown[0];
        assert!(drill.hosts.iter().all(|h| h.redacted));
        assert_eq!(drill.diff.redacted_tokens.get("bravo"), Some(&1));
    }

    #[test]
    fn rows_are_sorted_by_config_id() {
        let plans = vec![plan("a")];
        let configs = hosts(&[("a", vec![record("zz", "1\n"), record("aa", "2\n")])]);
        let catalog = build(&plans, &configs, &found(&["a"]), "a", 3).unwrap();
        let ids: Vec<_> = catalog.entries.iter().map(|e| e.config_id.as_str()).collect();
        assert_eq!(ids, vec!["aa", "zz"]);
    }
}
