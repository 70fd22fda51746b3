//! Pipeline orchestration
//!
//! Per jurisdiction: resolve winners, grow the previous graph with the
//! new rows, screen, propagate, score, verify. A snapshot is written
//! after each of the four graph stages and the three output tables are
//! written at the end. One writer per jurisdiction at a time.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use procurement_types::{EntityRecord, ProcurementRow, ShareholderRow, Stage, SubsidiaryRow};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::graph::{GraphBuilder, GraphSummary, IntegrityReport, SnapshotEntry, SnapshotStore};
use crate::report::{
    self, match_rows, urgency_rows, MetricsReport, RowAccounting, ScreeningSummary, MATCHES_FILE,
    METRICS_FILE, URGENCY_FILE,
};
use crate::resolve::{Resolution, Resolver};
use crate::risk::{risk_scores_from, verify, Propagator, UrgencyScorer};
use crate::screening::{attach_scores, Checkpoint, Screener, ScreeningClient};
use crate::tables;

/// Input table locations
#[derive(Debug, Clone, Default)]
pub struct PipelineInputs {
    pub procurements: PathBuf,
    /// Company register tables, searched in the given order
    pub candidates: Vec<PathBuf>,
    pub shareholders: Option<PathBuf>,
    pub subsidiaries: Option<PathBuf>,
}

/// Tables after loading
#[derive(Debug, Clone, Default)]
pub struct LoadedInputs {
    pub procurements: Vec<ProcurementRow>,
    /// Procurement rows the loader rejected
    pub procurement_errors: usize,
    pub candidates: Vec<EntityRecord>,
    pub shareholders: Vec<ShareholderRow>,
    pub subsidiaries: Vec<SubsidiaryRow>,
}

impl LoadedInputs {
    /// Jurisdictions present in the procurement table, sorted
    pub fn jurisdictions(&self) -> Vec<String> {
        self.procurements
            .iter()
            .map(|r| r.jurisdiction.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn source_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("candidates")
        .to_string()
}

/// Load every input table through the configured column mappings
pub fn load_inputs(config: &PipelineConfig, inputs: &PipelineInputs) -> Result<LoadedInputs> {
    let columns = &config.columns;
    let procurements = tables::load_procurements(&inputs.procurements, &columns.procurement)
        .with_context(|| format!("Failed to load procurement table {}", inputs.procurements.display()))?;
    for skipped in &procurements.skipped {
        warn!(row = skipped.row, reason = %skipped.reason, "Skipped procurement row");
    }

    let mut candidates = Vec::new();
    for path in &inputs.candidates {
        let table = tables::load_candidates(path, &source_name(path), &columns.candidates)
            .with_context(|| format!("Failed to load candidate table {}", path.display()))?;
        candidates.extend(table.rows);
    }

    let shareholders = match &inputs.shareholders {
        Some(path) => {
            tables::load_shareholders(path, &columns.shareholders)
                .with_context(|| format!("Failed to load shareholder table {}", path.display()))?
                .rows
        }
        None => Vec::new(),
    };
    let subsidiaries = match &inputs.subsidiaries {
        Some(path) => {
            tables::load_subsidiaries(path, &columns.subsidiaries)
                .with_context(|| format!("Failed to load subsidiary table {}", path.display()))?
                .rows
        }
        None => Vec::new(),
    };

    Ok(LoadedInputs {
        procurement_errors: procurements.skipped.len(),
        procurements: procurements.rows,
        candidates,
        shareholders,
        subsidiaries,
    })
}

/// Resolve winner names and write the identifiers back into the rows
pub fn resolve_winners(
    resolver: &Resolver,
    rows: &mut [ProcurementRow],
    candidates: &[EntityRecord],
) -> Resolution {
    let base: Vec<EntityRecord> = rows.iter().map(|r| r.winner_record("procurement")).collect();
    let resolution = resolver.resolve(&base, candidates);
    let by_row = resolution.by_base_row();
    for row in rows.iter_mut() {
        row.winner_id = by_row.get(&row.row).map(|m| m.identifier.clone());
    }
    resolution
}

/// Outcome of a full run
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub jurisdictions: Vec<MetricsReport>,
    /// Row accounting over all jurisdictions, loader rejects included
    pub rows: RowAccounting,
    pub outputs: Vec<PathBuf>,
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline Report:")?;
        writeln!(
            f,
            "  Procurement rows:   {} ({} matched, {} unmatched, {} errored)",
            self.rows.total, self.rows.matched, self.rows.unmatched, self.rows.errored
        )?;
        for report in &self.jurisdictions {
            let flagged = report.verification.flagged.len();
            writeln!(
                f,
                "  {}: {} nodes, {} edges, max shadiness {:.3}, {} flagged",
                report.jurisdiction, report.graph.nodes, report.graph.edges,
                report.propagation.max_shadiness, flagged
            )?;
        }
        for path in &self.outputs {
            writeln!(f, "  wrote {}", path.display())?;
        }
        Ok(())
    }
}

/// Runs the stages for one configuration
pub struct Pipeline<'a, C> {
    config: &'a PipelineConfig,
    screener: Option<&'a Screener<C>>,
}

impl<'a, C: ScreeningClient> Pipeline<'a, C> {
    /// `screener` is `None` when screening is disabled
    pub fn new(config: &'a PipelineConfig, screener: Option<&'a Screener<C>>) -> Self {
        Self { config, screener }
    }

    /// Run every jurisdiction in `jurisdictions`, or every jurisdiction
    /// of the procurement table when empty
    pub async fn run(&self, inputs: &PipelineInputs, jurisdictions: &[String]) -> Result<PipelineReport> {
        let loaded = load_inputs(self.config, inputs)?;
        let selected = if jurisdictions.is_empty() {
            loaded.jurisdictions()
        } else {
            jurisdictions.iter().map(|j| j.to_uppercase()).collect()
        };
        info!(jurisdictions = ?selected, rows = loaded.procurements.len(), "Starting pipeline");

        let mut report = PipelineReport::default();
        for jurisdiction in &selected {
            let rows: Vec<ProcurementRow> = loaded
                .procurements
                .iter()
                .filter(|r| &r.jurisdiction == jurisdiction)
                .cloned()
                .collect();
            if rows.is_empty() {
                warn!(jurisdiction = %jurisdiction, "No procurement rows for jurisdiction");
            }
            let (metrics, outputs) = self
                .run_jurisdiction(jurisdiction, rows, &loaded)
                .await
                .with_context(|| format!("Pipeline failed for jurisdiction {}", jurisdiction))?;

            report.rows.total += metrics.rows.total;
            report.rows.matched += metrics.rows.matched;
            report.rows.unmatched += metrics.rows.unmatched;
            report.rows.errored += metrics.rows.errored;
            report.outputs.extend(outputs);
            report.jurisdictions.push(metrics);
        }
        report.rows = report.rows.with_load_errors(loaded.procurement_errors);
        Ok(report)
    }

    async fn run_jurisdiction(
        &self,
        jurisdiction: &str,
        mut rows: Vec<ProcurementRow>,
        loaded: &LoadedInputs,
    ) -> Result<(MetricsReport, Vec<PathBuf>)> {
        let config = self.config;
        let store = SnapshotStore::new(&config.graph.snapshot_dir);
        let mut snapshots: Vec<SnapshotEntry> = Vec::new();

        // Resolution
        let resolver = Resolver::new(config.resolver.clone());
        let resolution = resolve_winners(&resolver, &mut rows, &loaded.candidates);
        let matches = match_rows(&rows, &resolution);

        // Graph construction
        let builder =
            GraphBuilder::new(config.graph.clone()).with_normalizer(resolver.normalizer().clone());
        let previous = store
            .load_latest(jurisdiction)
            .context("Failed to load previous snapshot")?
            .map(|(_, graph)| graph);
        let (graph, winners) = builder.add_winners(previous, jurisdiction, &rows)?;
        snapshots.push(store.save(&graph, Stage::Initial)?);

        let (graph, expansion) =
            builder.expand_ownership(graph, &loaded.shareholders, &loaded.subsidiaries);
        snapshots.push(store.save(&graph, Stage::Expanded)?);

        // Screening
        let (graph, screening) = match self.screener {
            Some(screener) => {
                let checkpoint = screener
                    .config()
                    .checkpoint_dir
                    .as_deref()
                    .map(|dir| Checkpoint::for_jurisdiction(dir, jurisdiction));
                let outcome = screener
                    .screen(&graph, checkpoint.as_ref())
                    .await
                    .context("Screening failed")?;
                let (graph, attach) = attach_scores(
                    graph,
                    &outcome.results,
                    screener.config().sanction_threshold,
                );
                (graph, Some(ScreeningSummary::new(&outcome, &attach)))
            }
            None => {
                info!(jurisdiction, "Screening disabled, keeping existing risk scores");
                (graph, None)
            }
        };
        snapshots.push(store.save(&graph, Stage::Screened)?);

        // Risk
        let scores = risk_scores_from(&graph);
        let (graph, propagation) = Propagator::new(config.propagation.clone()).propagate(graph, &scores);
        let scorer = UrgencyScorer::new(config.urgency.clone());
        let (graph, distribution) = scorer.score(graph);
        let (graph, verification) = verify(graph, &distribution, scorer.config());
        snapshots.push(store.save(&graph, Stage::Final)?);

        // Outputs
        let out_dir = config.output_dir.join(jurisdiction);
        let matches_path = out_dir.join(MATCHES_FILE);
        let urgency_path = out_dir.join(URGENCY_FILE);
        let metrics_path = out_dir.join(METRICS_FILE);

        report::write_matches(&matches_path, &matches)
            .with_context(|| format!("Failed to write {}", matches_path.display()))?;
        report::write_urgency(&urgency_path, &urgency_rows(&graph))
            .with_context(|| format!("Failed to write {}", urgency_path.display()))?;

        let metrics = MetricsReport {
            jurisdiction: jurisdiction.to_string(),
            rows: RowAccounting::of(&matches),
            resolution: resolution.stats,
            winners,
            expansion,
            screening,
            propagation,
            graph: GraphSummary::of(&graph),
            integrity: IntegrityReport::check(&graph),
            verification,
            snapshots: snapshots
                .iter()
                .map(|s| s.path.display().to_string())
                .collect(),
        };
        report::write_metrics(&metrics_path, &metrics)
            .with_context(|| format!("Failed to write {}", metrics_path.display()))?;

        info!(
            jurisdiction,
            matched = metrics.rows.matched,
            unmatched = metrics.rows.unmatched,
            errored = metrics.rows.errored,
            nodes = metrics.graph.nodes,
            edges = metrics.graph.edges,
            "Jurisdiction complete"
        );
        Ok((metrics, vec![matches_path, urgency_path, metrics_path]))
    }
}

/// Resolution only: load tables, match winners, write the match table
pub fn resolve_only(config: &PipelineConfig, inputs: &PipelineInputs, output: &Path) -> Result<RowAccounting> {
    let mut loaded = load_inputs(config, inputs)?;
    let resolver = Resolver::new(config.resolver.clone());
    let resolution = resolve_winners(&resolver, &mut loaded.procurements, &loaded.candidates);
    let matches = match_rows(&loaded.procurements, &resolution);
    report::write_matches(output, &matches)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    Ok(RowAccounting::of(&matches).with_load_errors(loaded.procurement_errors))
}

/// Summary and integrity check of the newest snapshot of a jurisdiction
pub fn latest_summary(
    config: &PipelineConfig,
    jurisdiction: &str,
) -> Result<Option<(SnapshotEntry, GraphSummary, IntegrityReport)>> {
    let store = SnapshotStore::new(&config.graph.snapshot_dir);
    let latest = store
        .load_latest(&jurisdiction.to_uppercase())
        .with_context(|| format!("Failed to load snapshots for {}", jurisdiction))?;
    Ok(latest.map(|(entry, graph)| {
        let summary = GraphSummary::of(&graph);
        let integrity = IntegrityReport::check(&graph);
        (entry, summary, integrity)
    }))
}
