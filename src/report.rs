//! Output tables and the metrics report
//!
//! - `matches.csv`: one line per procurement row with its resolution
//!   status (exact, fuzzy, unmatched, errored)
//! - `urgency.csv`: one line per procurement, most urgent first
//! - `metrics_report.txt`: plain-text summary of every stage

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use procurement_types::{MatchKind, ProcurementRow, Relation};
use serde::Serialize;

use crate::graph::{BuildStats, GraphSummary, IntegrityReport, OwnershipGraph};
use crate::resolve::{Resolution, ResolutionStats};
use crate::risk::{PropagationSummary, VerificationReport, VERIFICATION_FLAG};
use crate::screening::{runner::ScreeningOutcome, AttachStats};

pub const MATCHES_FILE: &str = "matches.csv";
pub const URGENCY_FILE: &str = "urgency.csv";
pub const METRICS_FILE: &str = "metrics_report.txt";

/// How one procurement row was accounted for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Exact,
    Fuzzy,
    Unmatched,
    /// No usable winner name
    Errored,
}

impl From<MatchKind> for RowStatus {
    fn from(kind: MatchKind) -> Self {
        match kind {
            MatchKind::Exact => RowStatus::Exact,
            MatchKind::Fuzzy => RowStatus::Fuzzy,
        }
    }
}

/// Line of `matches.csv`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRow {
    pub row: usize,
    pub contract_id: Option<String>,
    pub winner_name: Option<String>,
    pub status: RowStatus,
    pub identifier: Option<String>,
    pub candidate_name: Option<String>,
    pub candidate_source: Option<String>,
    pub candidate_row: Option<usize>,
    pub similarity: Option<f64>,
}

/// Resolution status of every procurement row, in row order
pub fn match_rows(rows: &[ProcurementRow], resolution: &Resolution) -> Vec<MatchRow> {
    let by_row = resolution.by_base_row();
    let skipped: HashSet<usize> = resolution.skipped.iter().copied().collect();
    rows.iter()
        .map(|row| {
            let matched = by_row.get(&row.row);
            let status = match matched {
                Some(m) => m.kind.into(),
                None if skipped.contains(&row.row) => RowStatus::Errored,
                None => RowStatus::Unmatched,
            };
            MatchRow {
                row: row.row,
                contract_id: row.contract_id.clone(),
                winner_name: row.winner_name.clone(),
                status,
                identifier: matched.map(|m| m.identifier.clone()),
                candidate_name: matched.map(|m| m.candidate_name.clone()),
                candidate_source: matched.map(|m| m.candidate_source.clone()),
                candidate_row: matched.map(|m| m.candidate_row),
                similarity: matched.map(|m| m.similarity),
            }
        })
        .collect()
}

/// Matched / unmatched / errored procurement rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowAccounting {
    pub total: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub errored: usize,
}

impl RowAccounting {
    pub fn of(rows: &[MatchRow]) -> Self {
        let mut accounting = RowAccounting {
            total: rows.len(),
            ..RowAccounting::default()
        };
        for row in rows {
            match row.status {
                RowStatus::Exact | RowStatus::Fuzzy => accounting.matched += 1,
                RowStatus::Unmatched => accounting.unmatched += 1,
                RowStatus::Errored => accounting.errored += 1,
            }
        }
        accounting
    }

    /// Rows dropped by the loader before resolution
    pub fn with_load_errors(mut self, skipped: usize) -> Self {
        self.total += skipped;
        self.errored += skipped;
        self
    }

    pub fn is_balanced(&self) -> bool {
        self.matched + self.unmatched + self.errored == self.total
    }
}

fn create_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

pub fn write_matches(path: &Path, rows: &[MatchRow]) -> Result<(), csv::Error> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Line of `urgency.csv`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrgencyRow {
    pub procurement_id: String,
    pub contract_id: Option<String>,
    pub jurisdiction: String,
    /// Winner ids joined with `;`
    pub winners: String,
    pub winner_names: String,
    pub value: Option<f64>,
    pub value_percentile: Option<f64>,
    pub expected_shadiness: Option<f64>,
    /// Nodes that supplied the winners' shadiness
    pub shadiness_sources: String,
    pub urgency_linear: Option<f64>,
    pub urgency: Option<f64>,
    pub verification_flag: Option<String>,
}

/// Per-procurement report rows, most urgent first, ties by id
pub fn urgency_rows(graph: &OwnershipGraph) -> Vec<UrgencyRow> {
    let mut rows: Vec<UrgencyRow> = graph
        .procurements()
        .map(|idx| {
            let node = graph.node(idx);
            let facts = node.procurement.clone().unwrap_or_default();
            let winners: Vec<_> = graph
                .successors(idx, &[Relation::Won])
                .map(|w| graph.node(w))
                .collect();
            let join = |values: Vec<&str>| values.join(";");
            UrgencyRow {
                procurement_id: node.id.clone(),
                contract_id: facts.contract_id,
                jurisdiction: graph.jurisdiction().to_string(),
                winners: join(winners.iter().map(|w| w.id.as_str()).collect()),
                winner_names: join(winners.iter().filter_map(|w| w.name.as_deref()).collect()),
                value: facts.value,
                value_percentile: facts.value_percentile,
                expected_shadiness: facts.expected_shadiness,
                shadiness_sources: join(
                    winners
                        .iter()
                        .filter_map(|w| w.shadiness_source.as_deref())
                        .collect(),
                ),
                urgency_linear: facts.urgency_linear,
                urgency: facts.urgency,
                verification_flag: node.attributes.get(VERIFICATION_FLAG).map(|v| v.to_string()),
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.urgency
            .unwrap_or(0.0)
            .total_cmp(&a.urgency.unwrap_or(0.0))
            .then_with(|| a.procurement_id.cmp(&b.procurement_id))
    });
    rows
}

pub fn write_urgency(path: &Path, rows: &[UrgencyRow]) -> Result<(), csv::Error> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Everything `metrics_report.txt` prints for one jurisdiction
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsReport {
    pub jurisdiction: String,
    pub rows: RowAccounting,
    pub resolution: ResolutionStats,
    pub winners: BuildStats,
    pub expansion: BuildStats,
    pub screening: Option<ScreeningSummary>,
    pub propagation: PropagationSummary,
    pub graph: GraphSummary,
    pub integrity: IntegrityReport,
    pub verification: VerificationReport,
    /// Snapshot files written by this run
    pub snapshots: Vec<String>,
}

/// Screening counts shown in the report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScreeningSummary {
    pub screened: usize,
    pub resumed: usize,
    pub skipped: usize,
    pub matched: usize,
    pub no_match: usize,
    pub unknown: usize,
    pub sanctioned: usize,
}

impl ScreeningSummary {
    pub fn new(outcome: &ScreeningOutcome, attach: &AttachStats) -> Self {
        Self {
            screened: outcome.screened,
            resumed: outcome.resumed,
            skipped: outcome.skipped,
            matched: outcome.matched,
            no_match: outcome.no_match,
            unknown: outcome.unknown,
            sanctioned: attach.sanctioned,
        }
    }
}

impl fmt::Display for MetricsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Procurement Risk Report: {} ===", self.jurisdiction)?;
        writeln!(f)?;
        writeln!(f, "Procurement Rows:")?;
        writeln!(f, "  Total:              {}", self.rows.total)?;
        writeln!(f, "  Matched:            {}", self.rows.matched)?;
        writeln!(f, "  Unmatched:          {}", self.rows.unmatched)?;
        writeln!(f, "  Errored:            {}", self.rows.errored)?;
        writeln!(f)?;
        write!(f, "{}", self.resolution)?;
        writeln!(f)?;
        writeln!(f, "Graph Construction:")?;
        writeln!(
            f,
            "  Winners step:       +{} nodes, +{} edges",
            self.winners.nodes_added, self.winners.edges_added
        )?;
        writeln!(
            f,
            "  Ownership step:     +{} nodes, +{} edges ({} controller rows)",
            self.expansion.nodes_added, self.expansion.edges_added, self.expansion.controller_rows
        )?;
        writeln!(f)?;
        match &self.screening {
            Some(s) => {
                writeln!(f, "Screening:")?;
                writeln!(f, "  Screened:           {} ({} resumed, {} skipped)", s.screened, s.resumed, s.skipped)?;
                writeln!(f, "  Matched:            {}", s.matched)?;
                writeln!(f, "  No match:           {}", s.no_match)?;
                writeln!(f, "  Unknown:            {}", s.unknown)?;
                writeln!(f, "  Sanctioned:         {}", s.sanctioned)?;
            }
            None => writeln!(f, "Screening: disabled")?,
        }
        writeln!(f)?;
        writeln!(f, "Shadiness:")?;
        writeln!(
            f,
            "  Winners:            {} ({} with risk)",
            self.propagation.winners, self.propagation.risky_winners
        )?;
        writeln!(f, "  Max shadiness:      {:.4}", self.propagation.max_shadiness)?;
        writeln!(
            f,
            "  Mean expected:      {:.4}",
            self.propagation.mean_expected_shadiness
        )?;
        writeln!(f)?;
        write!(f, "{}", self.graph)?;
        writeln!(f)?;
        write!(f, "{}", self.integrity)?;
        writeln!(f)?;
        write!(f, "{}", self.verification)?;
        if !self.snapshots.is_empty() {
            writeln!(f)?;
            writeln!(f, "Snapshots:")?;
            for snapshot in &self.snapshots {
                writeln!(f, "  {}", snapshot)?;
            }
        }
        Ok(())
    }
}

pub fn write_metrics(path: &Path, report: &MetricsReport) -> io::Result<()> {
    create_parent(path)?;
    fs::write(path, report.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Attributes, Node, ProcurementFacts};
    use procurement_types::{MatchRecord, NodeKind, Roles};

    fn award(row: usize, name: Option<&str>) -> ProcurementRow {
        ProcurementRow {
            row,
            contract_id: Some(format!("C{}", row)),
            winner_name: name.map(str::to_string),
            jurisdiction: "GB".into(),
            ..ProcurementRow::default()
        }
    }

    #[test]
    fn test_match_rows_account_for_every_row() {
        let rows = vec![award(0, Some("Acme Ltd")), award(1, Some("Nobody")), award(2, None)];
        let resolution = Resolution {
            matches: vec![MatchRecord {
                base_row: 0,
                base_name: "Acme Ltd".into(),
                candidate_row: 4,
                candidate_source: "register".into(),
                candidate_name: "ACME".into(),
                identifier: "GB1".into(),
                similarity: 1.0,
                kind: MatchKind::Exact,
            }],
            unmatched: vec![1],
            skipped: vec![2],
            ..Resolution::default()
        };

        let lines = match_rows(&rows, &resolution);
        let statuses: Vec<RowStatus> = lines.iter().map(|l| l.status).collect();
        assert_eq!(statuses, vec![RowStatus::Exact, RowStatus::Unmatched, RowStatus::Errored]);
        assert_eq!(lines[0].identifier.as_deref(), Some("GB1"));

        let accounting = RowAccounting::of(&lines).with_load_errors(2);
        assert_eq!(accounting.total, 5);
        assert_eq!(accounting.errored, 3);
        assert!(accounting.is_balanced());
    }

    #[test]
    fn test_urgency_rows_sorted_most_urgent_first() {
        let mut graph = OwnershipGraph::new("GB");
        for (id, urgency) in [("P-low", 0.1), ("P-high", 0.8)] {
            let p = graph.upsert_node(Node::new(id, NodeKind::Procurement));
            graph.node_mut(p).procurement = Some(ProcurementFacts {
                urgency: Some(urgency),
                ..ProcurementFacts::default()
            });
            let w = graph.upsert_node(
                Node::new(format!("W-{}", id), NodeKind::Company)
                    .with_name(Some("Winner".into()))
                    .with_roles(Roles::winner()),
            );
            graph.upsert_edge(p, w, Relation::Won, None, Attributes::new());
        }

        let rows = urgency_rows(&graph);
        assert_eq!(rows[0].procurement_id, "P-high");
        assert_eq!(rows[0].winners, "W-P-high");
        assert_eq!(rows[1].winner_names, "Winner");
    }

    #[test]
    fn test_tables_written_as_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("GB").join(MATCHES_FILE);
        let rows = vec![MatchRow {
            row: 0,
            contract_id: Some("C0".into()),
            winner_name: Some("Acme".into()),
            status: RowStatus::Unmatched,
            identifier: None,
            candidate_name: None,
            candidate_source: None,
            candidate_row: None,
            similarity: None,
        }];
        write_matches(&path, &rows).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("row,contract_id,winner_name,status,identifier,candidate_name,candidate_source,candidate_row,similarity")
        );
        assert_eq!(lines.next(), Some("0,C0,Acme,unmatched,,,,,"));
    }

    #[test]
    fn test_metrics_report_sections() {
        let report = MetricsReport {
            jurisdiction: "GB".into(),
            ..MetricsReport::default()
        };
        let text = report.to_string();
        assert!(text.starts_with("=== Procurement Risk Report: GB ==="));
        assert!(text.contains("Screening: disabled"));
        assert!(text.contains("Entity Resolution:"));
        assert!(text.contains("Integrity Check:"));
        assert!(text.contains("Urgency buckets:"));
    }
}
