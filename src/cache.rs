//! Content-addressed diff cache.
//!
//! Stores the last canonical form computed for each (host, config) pair so
//! repeated runs over unchanged files skip canonicalization. One JSON file
//! per pair, named by `sha1(host_id ":" config_id)`, so no directory index is
//! needed and concurrent writers for different pairs never touch the same
//! file.
//!
//! The cache is advisory. An entry is only reused when its stored signature
//! equals the freshly computed one; anything else (missing file, corrupt
//! JSON, stale or foreign signature) is a miss.
//!
//! ```text
//! <data dir>/driftwatch/
//! ├── cache/diffs/<sha1>.json    current layout
//! └── diff-cache/<sha1>.json     legacy layout, migrated once
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::models::{ContentType, Metadata};

/// Environment variable overriding the application data directory.
pub const DATA_DIR_ENV: &str = "DRIFTWATCH_DATA_DIR";

const APP_DIR: &str = "driftwatch";
const LEGACY_DIR: &str = "diff-cache";

/// Persisted canonical form for one (host, config) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub canonical: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub metadata: Metadata,
    pub file_hash: String,
    pub signature: String,
}

/// Fields the scanner hands over when saving.
#[derive(Debug, Clone)]
pub struct CachePayload<'a> {
    pub canonical: &'a str,
    pub content_type: ContentType,
    pub metadata: &'a Metadata,
    pub file_hash: &'a str,
}

#[derive(Debug, Clone)]
pub struct DiffCache {
    dir: PathBuf,
    enabled: bool,
}

impl DiffCache {
    /// Open the cache rooted at `dir`, creating it if needed. A directory
    /// that cannot be created disables the cache instead of failing.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        match fs::create_dir_all(&dir) {
            Ok(()) => Self { dir, enabled: true },
            Err(e) => {
                warn!(
                    dir = %dir.display(),
                    error = %e,
                    "diff cache unavailable, continuing without it"
                );
                Self { dir, enabled: false }
            }
        }
    }

    /// A cache that never hits and never writes.
    pub fn disabled() -> Self {
        Self {
            dir: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn entry_path(&self, host_id: &str, config_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key_digest(host_id, config_id)))
    }

    /// Return the stored entry only if its signature matches `signature`.
    pub fn load(&self, host_id: &str, config_id: &str, signature: &str) -> Option<CacheEntry> {
        if !self.enabled {
            return None;
        }
        let path = self.entry_path(host_id, config_id);
        let bytes = fs::read(&path).ok()?;
        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "corrupt cache entry treated as miss");
                return None;
            }
        };
        if entry.signature != signature {
            debug!(host_id, config_id, "stale cache entry");
            return None;
        }
        Some(entry)
    }

    /// Persist an entry. Written to a temporary file and renamed into place.
    pub fn save(
        &self,
        host_id: &str,
        config_id: &str,
        signature: &str,
        payload: CachePayload<'_>,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let entry = CacheEntry {
            canonical: payload.canonical.to_string(),
            content_type: payload.content_type,
            metadata: payload.metadata.clone(),
            file_hash: payload.file_hash.to_string(),
            signature: signature.to_string(),
        };
        let path = self.entry_path(host_id, config_id);
        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let json = serde_json::to_vec(&entry)?;
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write cache entry: {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e).with_context(|| {
                format!("Failed to move cache entry into place: {}", path.display())
            });
        }
        Ok(())
    }
}

fn key_digest(host_id: &str, config_id: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(host_id.as_bytes());
    hasher.update(b":");
    hasher.update(config_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Digest of the sorted, resolved scan roots of a plan.
pub fn root_fingerprint(roots: &[PathBuf]) -> String {
    let mut resolved: Vec<String> = roots
        .iter()
        .map(|r| {
            fs::canonicalize(r)
                .unwrap_or_else(|_| r.clone())
                .to_string_lossy()
                .to_string()
        })
        .collect();
    resolved.sort();
    resolved.dedup();
    let mut hasher = Sha256::new();
    for root in &resolved {
        hasher.update(root.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Signature binding a cache entry to (host, config, roots, file bytes).
pub fn signature(
    host_id: &str,
    config_id: &str,
    root_fingerprint: &str,
    file_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{host_id}:{config_id}:{root_fingerprint}:{file_hash}").as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 of file bytes, hex encoded.
pub fn file_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Application data root: `$DRIFTWATCH_DATA_DIR`, else the platform's
/// per-user local data directory joined with `driftwatch`.
pub fn data_root() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .ok_or_else(|| anyhow!("Could not determine a per-user data directory; set {DATA_DIR_ENV}"))
}

/// Resolve the diff cache directory. An explicit directory is used as-is.
pub fn resolve_cache_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Ok(data_root()?.join("cache").join("diffs")),
    }
}

/// Where older releases kept cache entries.
pub fn legacy_cache_dir() -> Option<PathBuf> {
    data_root().ok().map(|root| root.join(LEGACY_DIR))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Destination already had entries, or there was nothing to migrate.
    Skipped,
    Migrated { copied: usize, failed: usize },
}

/// Copy legacy cache files into `dest` when `dest` is still empty.
///
/// Never fails: individual copy errors are logged and counted.
pub fn migrate_legacy(legacy: &Path, dest: &Path) -> MigrationOutcome {
    if legacy == dest || !legacy.is_dir() {
        return MigrationOutcome::Skipped;
    }
    let dest_has_entries = fs::read_dir(dest)
        .map(|mut it| it.next().is_some())
        .unwrap_or(false);
    if dest_has_entries {
        return MigrationOutcome::Skipped;
    }

    let entries = match fs::read_dir(legacy) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(legacy = %legacy.display(), error = %e, "cannot read legacy cache");
            return MigrationOutcome::Skipped;
        }
    };
    if let Err(e) = fs::create_dir_all(dest) {
        warn!(dest = %dest.display(), error = %e, "cannot create cache directory for migration");
        return MigrationOutcome::Skipped;
    }

    let mut copied = 0;
    let mut failed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(name) = path.file_name() else {
            continue;
        };
        match fs::copy(&path, dest.join(name)) {
            Ok(_) => copied += 1,
            Err(e) => {
                failed += 1;
                warn!(file = %path.display(), error = %e, "legacy cache entry not migrated");
            }
        }
    }
    if copied == 0 && failed == 0 {
        return MigrationOutcome::Skipped;
    }
    info!(copied, failed, dest = %dest.display(), "migrated legacy diff cache");
    MigrationOutcome::Migrated { copied, failed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn payload<'a>(canonical: &'a str, meta: &'a Metadata) -> CachePayload<'a> {
        CachePayload {
            canonical,
            content_type: ContentType::Text,
            metadata: meta,
            file_hash: "abc",
        }
    }

    #[test]
    fn save_then_load_with_matching_signature() {
        let tmp = TempDir::new().unwrap();
        let cache = DiffCache::new(tmp.path());
        let meta = Metadata::new();
        cache.save("h1", "json:a", "sig-1", payload("a=1\n", &meta)).unwrap();

        let entry = cache.load("h1", "json:a", "sig-1").unwrap();
        assert_eq!(entry.canonical, "a=1\n");
        assert_eq!(entry.file_hash, "abc");
    }

    #[test]
    fn signature_mismatch_is_a_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = DiffCache::new(tmp.path());
        let meta = Metadata::new();
        cache.save("h1", "json:a", "sig-1", payload("a=1\n", &meta)).unwrap();
        assert!(cache.load("h1", "json:a", "sig-2").is_none());
        assert!(cache.load("h2", "json:a", "sig-1").is_none());
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = DiffCache::new(tmp.path());
        fs::write(cache.entry_path("h1", "c"), b"{not json").unwrap();
        assert!(cache.load("h1", "c", "sig").is_none());
    }

    #[test]
    fn one_file_per_pair() {
        let tmp = TempDir::new().unwrap();
        let cache = DiffCache::new(tmp.path());
        let meta = Metadata::new();
        cache.save("h1", "a", "s", payload("1", &meta)).unwrap();
        cache.save("h1", "b", "s", payload("2", &meta)).unwrap();
        cache.save("h1", "a", "s2", payload("3", &meta)).unwrap();
        let files: Vec<_> = fs::read_dir(tmp.path()).unwrap().flatten().collect();
        assert_eq!(files.len(), 2);
        assert_ne!(cache.entry_path("h1", "a"), cache.entry_path("h2", "a"));
    }

    #[test]
    fn disabled_cache_never_hits() {
        let cache = DiffCache::disabled();
        let meta = Metadata::new();
        cache.save("h", "c", "s", payload("x", &meta)).unwrap();
        assert!(cache.load("h", "c", "s").is_none());
    }

    #[test]
    fn signature_depends_on_every_component() {
        let base = signature("h", "c", "roots", "hash");
        assert_ne!(base, signature("h2", "c", "roots", "hash"));
        assert_ne!(base, signature("h", "c2", "roots", "hash"));
        assert_ne!(base, signature("h", "c", "roots2", "hash"));
        assert_ne!(base, signature("h", "c", "roots", "hash2"));
        assert_eq!(base, signature("h", "c", "roots", "hash"));
    }

    #[test]
    fn root_fingerprint_ignores_order() {
        let a = PathBuf::from("/srv/a");
        let b = PathBuf::from("/srv/b");
        assert_eq!(
            root_fingerprint(&[a.clone(), b.clone()]),
            root_fingerprint(&[b, a.clone()])
        );
        assert_ne!(root_fingerprint(&[a.clone()]), root_fingerprint(&[a, PathBuf::from("/srv/c")]));
    }

    #[test]
    fn migration_copies_into_empty_destination_once() {
        let tmp = TempDir::new().unwrap();
        let legacy = tmp.path().join("legacy");
        let dest = tmp.path().join("cache/diffs");
        fs::create_dir_all(&legacy).unwrap();
        fs::write(legacy.join("aa.json"), b"{}").unwrap();
        fs::write(legacy.join("bb.json"), b"{}").unwrap();
        fs::write(legacy.join("notes.txt"), b"x").unwrap();

        assert_eq!(
            migrate_legacy(&legacy, &dest),
            MigrationOutcome::Migrated { copied: 2, failed: 0 }
        );
        assert!(dest.join("aa.json").exists());
        assert!(!dest.join("notes.txt").exists());

        fs::write(legacy.join("cc.json"), b"{}").unwrap();
        assert_eq!(migrate_legacy(&legacy, &dest), MigrationOutcome::Skipped);
        assert!(!dest.join("cc.json").exists());
    }

    #[test]
    fn migration_without_legacy_dir_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let outcome = migrate_legacy(&tmp.path().join("nope"), &tmp.path().join("dest"));
        assert_eq!(outcome, MigrationOutcome::Skipped);
    }
}
