//! Per-host configuration scanning.
//!
//! Walks every existing root of a plan, asks the [`Classifier`] about each
//! file, derives the cross-host `config_id`, and produces one
//! [`ConfigRecord`] per identity. Canonical content is taken from the
//! [`DiffCache`] when the stored signature still matches; otherwise the file
//! is canonicalized and the cache refreshed.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::cache::{self, CachePayload, DiffCache};
use crate::canonical::canonicalize;
use crate::classify::{Classifier, SecretHunter};
use crate::config::{default_excludes, Config};
use crate::identity;
use crate::models::{Availability, ConfigRecord, ContentType, Metadata, Plan};

/// Why a host scan failed. Never escapes the orchestrator; it becomes the
/// host's `availability` and `message`.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("no accessible roots (checked: {roots})")]
    NoAccessibleRoots { roots: String },
    #[error("permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },
    #[error("scan cancelled before completion")]
    Cancelled,
    #[error("{0}")]
    UnexpectedFailure(String),
}

impl ScanError {
    pub fn availability(&self) -> Availability {
        match self {
            ScanError::NoAccessibleRoots { .. } => Availability::NotFound,
            ScanError::PermissionDenied { .. } => Availability::PermissionDenied,
            ScanError::Cancelled | ScanError::UnexpectedFailure(_) => Availability::Offline,
        }
    }

    fn from_io(path: &Path, err: &io::Error) -> Self {
        if err.kind() == io::ErrorKind::PermissionDenied {
            ScanError::PermissionDenied {
                path: path.to_path_buf(),
            }
        } else {
            ScanError::UnexpectedFailure(format!("{}: {}", path.display(), err))
        }
    }
}

/// Cooperative cancellation shared between the caller and running scans.
///
/// Checked once per file, so an abandoned host stops promptly without
/// affecting hosts that already finished.
#[derive(Debug, Clone, Default)]
pub struct ScanBudget {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl ScanBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time_limit(limit: Duration) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Instant::now().checked_add(limit),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_exhausted(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// Walk settings derived from [`Config`].
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub follow_symlinks: bool,
    pub max_file_bytes: u64,
    pub sample_bytes: usize,
    pub excludes: GlobSet,
}

impl ScanSettings {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut patterns = default_excludes();
        patterns.extend(config.scan.exclude_globs.iter().cloned());
        Ok(Self {
            follow_symlinks: config.scan.follow_symlinks,
            max_file_bytes: config.scan.max_file_bytes,
            sample_bytes: config.scan.sample_bytes,
            excludes: build_globset(&patterns)?,
        })
    }
}

/// Everything one host scan produced.
#[derive(Debug, Clone, Default)]
pub struct HostScan {
    pub configs: BTreeMap<String, ConfigRecord>,
    /// True only when every discovered config was served from the cache.
    pub used_cache: bool,
    pub cache_hits: usize,
}

pub struct HostScanner {
    classifier: Arc<dyn Classifier>,
    hunter: Arc<dyn SecretHunter>,
    cache: Arc<DiffCache>,
    settings: ScanSettings,
}

impl HostScanner {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        hunter: Arc<dyn SecretHunter>,
        cache: Arc<DiffCache>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            classifier,
            hunter,
            cache,
            settings,
        }
    }

    pub fn scan(&self, plan: &Plan, budget: &ScanBudget) -> Result<HostScan, ScanError> {
        let roots = accessible_roots(plan)?;
        let fingerprint = cache::root_fingerprint(&plan.roots);
        let secret_paths = self.secret_paths(&plan.host_id, &roots);

        let mut scan = HostScan::default();
        for root in &roots {
            self.scan_root(plan, root, &fingerprint, &secret_paths, budget, &mut scan)?;
        }

        scan.used_cache = !scan.configs.is_empty() && scan.cache_hits == scan.configs.len();
        debug!(
            host_id = %plan.host_id,
            configs = scan.configs.len(),
            cache_hits = scan.cache_hits,
            "host scan complete"
        );
        Ok(scan)
    }

    /// Paths flagged by the secret hunter, computed once per plan.
    fn secret_paths(&self, host_id: &str, roots: &[PathBuf]) -> HashSet<PathBuf> {
        let mut paths = HashSet::new();
        for root in roots {
            match self.hunter.hunt(root) {
                Ok(hits) => paths.extend(hits.into_iter().map(|h| resolve(&h.path))),
                Err(e) => {
                    warn!(host_id, root = %root.display(), error = %e, "secret hunt failed");
                }
            }
        }
        paths
    }

    fn scan_root(
        &self,
        plan: &Plan,
        root: &Path,
        fingerprint: &str,
        secret_paths: &HashSet<PathBuf>,
        budget: &ScanBudget,
        scan: &mut HostScan,
    ) -> Result<(), ScanError> {
        let walker = WalkDir::new(root)
            .follow_links(self.settings.follow_symlinks)
            .sort_by_file_name();

        for entry in walker {
            if budget.is_exhausted() {
                return Err(ScanError::Cancelled);
            }
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(root).to_path_buf();
                match e.io_error() {
                    Some(io_err) => ScanError::from_io(&path, io_err),
                    None => ScanError::UnexpectedFailure(e.to_string()),
                }
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            if self.settings.excludes.is_match(&relative) {
                continue;
            }

            let size = entry
                .metadata()
                .map_err(|e| match e.io_error() {
                    Some(io_err) => ScanError::from_io(path, io_err),
                    None => ScanError::UnexpectedFailure(e.to_string()),
                })?
                .len();
            if size > self.settings.max_file_bytes {
                debug!(path = %path.display(), size, "skipping oversized file");
                continue;
            }

            let bytes = fs::read(path).map_err(|e| ScanError::from_io(path, &e))?;
            let sample = &bytes[..bytes.len().min(self.settings.sample_bytes)];
            let Some(matched) = self.classifier.classify(path, sample) else {
                continue;
            };

            let config_id = identity::config_id(
                &matched.format_id,
                matched.variant.as_deref(),
                &matched.metadata,
                &relative,
                &matched.plugin_name,
            );
            if let Some(existing) = scan.configs.get(&config_id) {
                warn!(
                    host_id = %plan.host_id,
                    config_id = %config_id,
                    kept = %existing.source_path.display(),
                    ignored = %path.display(),
                    "duplicate config identity on host"
                );
                continue;
            }

            let file_hash = cache::file_hash(&bytes);
            let content_type = ContentType::for_format(&matched.format_id, &matched.metadata);
            let raw = String::from_utf8_lossy(&bytes).into_owned();
            let signature = cache::signature(&plan.host_id, &config_id, fingerprint, &file_hash);

            let cached = self
                .cache
                .load(&plan.host_id, &config_id, &signature)
                .filter(|entry| entry.file_hash == file_hash && entry.content_type == content_type);
            let canonical = match cached {
                Some(entry) => {
                    scan.cache_hits += 1;
                    entry.canonical
                }
                None => {
                    let canonical = canonicalize(&raw, content_type);
                    let payload = CachePayload {
                        canonical: &canonical,
                        content_type,
                        metadata: &matched.metadata,
                        file_hash: &file_hash,
                    };
                    let saved = self
                        .cache
                        .save(&plan.host_id, &config_id, &signature, payload);
                    if let Err(e) = saved {
                        warn!(config_id = %config_id, error = %e, "failed to persist cache entry");
                    }
                    canonical
                }
            };

            let masked = is_masked(&matched.metadata);
            let record = ConfigRecord {
                config_id: config_id.clone(),
                display_name: identity::display_name(&matched.metadata, &relative),
                format_id: matched.format_id,
                content_type,
                canonical,
                raw,
                secrets: secret_paths.contains(&resolve(path)),
                masked,
                metadata: matched.metadata,
                file_hash,
                source_path: path.to_path_buf(),
                plugin_name: matched.plugin_name,
                relative_path: relative,
            };
            scan.configs.insert(config_id, record);
        }
        Ok(())
    }
}

/// Roots that exist on disk. Fails when none do, or when a root cannot even
/// be inspected for lack of permission.
fn accessible_roots(plan: &Plan) -> Result<Vec<PathBuf>, ScanError> {
    let mut found = Vec::new();
    for root in &plan.roots {
        match fs::metadata(root) {
            Ok(_) => found.push(root.clone()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(host_id = %plan.host_id, root = %root.display(), "root missing");
            }
            Err(e) => return Err(ScanError::from_io(root, &e)),
        }
    }
    if found.is_empty() {
        let roots = plan
            .roots
            .iter()
            .map(|r| r.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(ScanError::NoAccessibleRoots { roots });
    }
    Ok(found)
}

/// The classifier flags masking either directly or by listing masked tokens.
fn is_masked(metadata: &Metadata) -> bool {
    metadata
        .get("masked")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
        || metadata
            .get("masked_tokens")
            .and_then(|v| v.as_array())
            .is_some_and(|tokens| !tokens.is_empty())
}

fn resolve(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
