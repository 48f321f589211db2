//! # driftwatch
//!
//! Configuration drift detection across a fleet of hosts.
//!
//! Each host is described by a scan plan (filesystem roots plus a baseline
//! preference). Configuration files found under those roots are classified,
//! joined across hosts by a stable config identity, canonicalized so that
//! formatting-only differences disappear, and diffed against the baseline
//! host's copy. The result is a drift catalog (one row per config) and a
//! drill-down (per-host status plus a representative unified diff).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────────────┐
//! │ Orchestrator │──▶│ HostScanner │──▶│ identity + canonical │
//! │  (per plan)  │   │  (per host) │   │   + DiffCache        │
//! └──────┬───────┘   └─────────────┘   └──────────┬───────────┘
//!        │                                        │ ConfigRecords
//!        ▼                                        ▼
//! ┌──────────────┐                      ┌──────────────────┐
//! │  NDJSON on   │◀─────────────────────│  catalog + diff  │
//! │   stdout     │                      └──────────────────┘
//! └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`canonical`] | Comparison-stable rendering of text and XML |
//! | [`diff`] | Unified diff with token redaction |
//! | [`identity`] | Cross-host config identity |
//! | [`cache`] | On-disk canonicalization cache |
//! | [`classify`] | Classifier and secret hunter contracts |
//! | [`scanner`] | Per-host scanning |
//! | [`catalog`] | Drift catalog and drill-down |
//! | [`orchestrator`] | Run coordination |
//! | [`protocol`] | Request and event wire types |
//! | [`progress`] | Event sinks |
//! | [`logging`] | Diagnostic log setup |

pub mod cache;
pub mod canonical;
pub mod catalog;
pub mod classify;
pub mod config;
pub mod diff;
pub mod identity;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod protocol;
pub mod scanner;
