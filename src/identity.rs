//! Cross-host identity for discovered configuration files.
//!
//! A `config_id` is the join key the catalog uses to decide that two files on
//! two hosts are "the same" configuration. It is derived only from classifier
//! output and the path relative to the scan root, so it is identical across
//! runs and across hosts.

use sha2::{Digest, Sha256};

use crate::models::Metadata;

/// Metadata keys tried, in order, before falling back to the relative path.
const CANDIDATE_KEYS: &[&str] = &["original_filename", "role", "kind"];

/// Derive the stable `config_id` for a classified file.
pub fn config_id(
    format_id: &str,
    variant: Option<&str>,
    metadata: &Metadata,
    relative_path: &str,
    plugin_name: &str,
) -> String {
    let candidate = CANDIDATE_KEYS
        .iter()
        .filter_map(|key| metadata.get(*key).and_then(|v| v.as_str()))
        .chain(std::iter::once(relative_path))
        .find_map(|c| slugify_path(c.trim()));

    match candidate {
        Some(slug) => {
            let format = slugify_segment(format_id).unwrap_or_else(|| "unknown".to_string());
            let mut parts = vec![format];
            if let Some(v) = variant.and_then(slugify_segment) {
                parts.push(v);
            }
            parts.push(slug);
            parts.join(":")
        }
        None => {
            let seed = if relative_path.is_empty() {
                plugin_name
            } else {
                relative_path
            };
            format!("{}#{}", format_id, hash12(seed))
        }
    }
}

/// Human-facing name for a record: classifier-provided, else the file name.
pub fn display_name(metadata: &Metadata, relative_path: &str) -> String {
    if let Some(name) = metadata
        .get("display_name")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
    {
        return name.trim().to_string();
    }
    relative_path
        .rsplit(['/', '\\'])
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(relative_path)
        .to_string()
}

/// Slugify a path-like string, keeping `/` separators between segments.
pub fn slugify_path(raw: &str) -> Option<String> {
    let segments: Vec<String> = raw
        .split(['/', '\\'])
        .filter_map(slugify_segment)
        .collect();
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Lowercase, collapsing every run of non-alphanumerics into one `-`.
pub fn slugify_segment(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for c in raw.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// First 12 hex characters of the SHA-256 of `input`.
pub fn hash12(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..12].to_string()
}
