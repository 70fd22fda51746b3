//! Ownership graph
//!
//! Per-jurisdiction directed graph linking procurement contracts to their
//! winners and the winners to their first-level owners and subsidiaries.
//! Graphs are grown incrementally by [`builder::GraphBuilder`] and
//! persisted after every pipeline stage by [`snapshot::SnapshotStore`].

pub mod builder;
pub mod model;
pub mod sanitize;
pub mod snapshot;
pub mod summary;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use builder::{BuildStats, GraphBuilder};
pub use model::{Attributes, Edge, Node, NodeIdx, OwnershipGraph, ProcurementFacts};
pub use snapshot::{GraphSnapshot, SnapshotEntry, SnapshotStore};
pub use summary::{GraphSummary, IntegrityReport};

/// Default controlling stake, in percent
pub const DEFAULT_CONTROL_THRESHOLD_PCT: f64 = 50.0;

/// Graph construction and persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// OWNS edges strictly above this percentage also get a CONTROLS edge
    pub control_threshold_pct: f64,
    /// Root directory of per-jurisdiction snapshots
    pub snapshot_dir: PathBuf,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            control_threshold_pct: DEFAULT_CONTROL_THRESHOLD_PCT,
            snapshot_dir: PathBuf::from("snapshots"),
        }
    }
}
