//! Graph snapshot persistence
//!
//! Every pipeline stage writes a new snapshot file; existing files are
//! never overwritten. Files live under `{root}/{jurisdiction}/` and are
//! named `{sequence:04}-{stage}.json`, so the newest snapshot of a
//! jurisdiction is the one with the highest sequence number. JSON keeps
//! runs inspectable with ordinary tools.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use procurement_types::Stage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::model::{Edge, Node, OwnershipGraph};
use crate::error::SnapshotError;

/// Snapshot format version - increment when the layout changes
pub const SNAPSHOT_VERSION: u32 = 1;

/// A persisted graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Format version
    pub version: u32,
    pub sequence: u32,
    pub stage: Stage,
    pub jurisdiction: String,
    pub created_at: DateTime<Utc>,
    /// BLAKE3 hash of jurisdiction, nodes and edges
    pub hash: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl GraphSnapshot {
    /// Capture the current state of a graph
    pub fn capture(
        graph: &OwnershipGraph,
        stage: Stage,
        sequence: u32,
    ) -> Result<Self, serde_json::Error> {
        let nodes = graph.nodes().to_vec();
        let edges = graph.edges().to_vec();
        let hash = content_hash(graph.jurisdiction(), &nodes, &edges)?;
        Ok(Self {
            version: SNAPSHOT_VERSION,
            sequence,
            stage,
            jurisdiction: graph.jurisdiction().to_string(),
            created_at: Utc::now(),
            hash,
            nodes,
            edges,
        })
    }

    /// Load and verify a snapshot file
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let bytes = fs::read(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot: Self = serde_json::from_slice(&bytes).map_err(|source| SnapshotError::Json {
            path: path.to_path_buf(),
            source,
        })?;

        // Version check
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: snapshot.version,
            });
        }

        let expected = content_hash(&snapshot.jurisdiction, &snapshot.nodes, &snapshot.edges)
            .map_err(|source| SnapshotError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        if expected != snapshot.hash {
            return Err(SnapshotError::HashMismatch {
                path: path.to_path_buf(),
            });
        }

        Ok(snapshot)
    }

    /// Write to a path that must not exist yet
    fn write_new(&self, path: &Path) -> Result<(), SnapshotError> {
        let io_err = |source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self).map_err(|source| SnapshotError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(io_err)?;
        Ok(())
    }

    pub fn into_graph(self) -> Result<OwnershipGraph, SnapshotError> {
        OwnershipGraph::from_parts(self.jurisdiction, self.nodes, self.edges)
    }
}

fn content_hash(jurisdiction: &str, nodes: &[Node], edges: &[Edge]) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(&(jurisdiction, nodes, edges))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// A snapshot file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub sequence: u32,
    pub stage: Stage,
    pub path: PathBuf,
}

impl SnapshotEntry {
    fn parse(path: PathBuf) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?;
        let stem = file_name.strip_suffix(".json")?;
        let (sequence, stage) = stem.split_once('-')?;
        Some(Self {
            sequence: sequence.parse().ok()?,
            stage: stage.parse().ok()?,
            path,
        })
    }
}

/// Append-only snapshot directory
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn jurisdiction_dir(&self, jurisdiction: &str) -> PathBuf {
        self.root.join(jurisdiction)
    }

    /// Snapshots of a jurisdiction ordered by sequence
    pub fn list(&self, jurisdiction: &str) -> Result<Vec<SnapshotEntry>, SnapshotError> {
        let dir = self.jurisdiction_dir(jurisdiction);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let read_dir = fs::read_dir(&dir).map_err(|source| SnapshotError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| SnapshotError::Io {
                path: dir.clone(),
                source,
            })?;
            match SnapshotEntry::parse(entry.path()) {
                Some(parsed) => entries.push(parsed),
                None => debug!(path = %entry.path().display(), "Ignoring non-snapshot file"),
            }
        }
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    /// Persist a graph as the next snapshot of its jurisdiction
    pub fn save(&self, graph: &OwnershipGraph, stage: Stage) -> Result<SnapshotEntry, SnapshotError> {
        let jurisdiction = graph.jurisdiction();
        let sequence = self
            .list(jurisdiction)?
            .last()
            .map_or(1, |e| e.sequence + 1);
        let path = self
            .jurisdiction_dir(jurisdiction)
            .join(format!("{:04}-{}.json", sequence, stage));

        let snapshot =
            GraphSnapshot::capture(graph, stage, sequence).map_err(|source| SnapshotError::Json {
                path: path.clone(),
                source,
            })?;
        snapshot.write_new(&path)?;

        info!(
            jurisdiction,
            stage = %stage,
            sequence,
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            path = %path.display(),
            "Saved graph snapshot"
        );
        Ok(SnapshotEntry {
            sequence,
            stage,
            path,
        })
    }

    /// Most recent snapshot of any stage
    pub fn load_latest(
        &self,
        jurisdiction: &str,
    ) -> Result<Option<(SnapshotEntry, OwnershipGraph)>, SnapshotError> {
        self.load_last_matching(jurisdiction, |_| true)
    }

    /// Most recent snapshot written after `stage`
    pub fn load_latest_stage(
        &self,
        jurisdiction: &str,
        stage: Stage,
    ) -> Result<Option<(SnapshotEntry, OwnershipGraph)>, SnapshotError> {
        self.load_last_matching(jurisdiction, |e| e.stage == stage)
    }

    fn load_last_matching(
        &self,
        jurisdiction: &str,
        predicate: impl Fn(&SnapshotEntry) -> bool,
    ) -> Result<Option<(SnapshotEntry, OwnershipGraph)>, SnapshotError> {
        let Some(entry) = self.list(jurisdiction)?.into_iter().rev().find(|e| predicate(e)) else {
            return Ok(None);
        };
        let graph = GraphSnapshot::load(&entry.path)?.into_graph()?;
        info!(
            jurisdiction,
            stage = %entry.stage,
            sequence = entry.sequence,
            nodes = graph.node_count(),
            "Loaded graph snapshot"
        );
        Ok(Some((entry, graph)))
    }
}
