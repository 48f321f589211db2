use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::diff::DEFAULT_CONTEXT_LINES;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub diff: DiffConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScanConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_sample_bytes")]
    pub sample_bytes: usize,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
            sample_bytes: default_sample_bytes(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_workers() -> usize {
    1
}
fn default_max_file_bytes() -> u64 {
    5 * 1024 * 1024
}
fn default_sample_bytes() -> usize {
    4096
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiffConfig {
    #[serde(default = "default_context_lines")]
    pub context_lines: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            context_lines: default_context_lines(),
        }
    }
}

fn default_context_lines() -> usize {
    DEFAULT_CONTEXT_LINES
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProtocolConfig {
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_message_len: default_max_message_len(),
        }
    }
}

fn default_max_message_len() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            enabled: default_cache_enabled(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}

/// Globs always excluded from scanning, in addition to `scan.exclude_globs`.
pub fn default_excludes() -> Vec<String> {
    vec!["**/.git/**".to_string(), "**/node_modules/**".to_string()]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.scan.workers == 0 {
            anyhow::bail!("scan.workers must be >= 1");
        }
        if self.scan.sample_bytes == 0 {
            anyhow::bail!("scan.sample_bytes must be > 0");
        }
        if self.scan.max_file_bytes == 0 {
            anyhow::bail!("scan.max_file_bytes must be > 0");
        }
        if self.protocol.max_message_len < 16 {
            anyhow::bail!("protocol.max_message_len must be >= 16");
        }
        for pattern in &self.scan.exclude_globs {
            globset::Glob::new(pattern)
                .with_context(|| format!("Invalid scan.exclude_globs entry: '{}'", pattern))?;
        }
        Ok(())
    }
}
