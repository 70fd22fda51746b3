//! End-to-end pipeline tests over small CSV fixtures
//!
//! The screening service is replaced by an in-process client returning
//! fixed scores per node id.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use procurement_risk::error::ScreeningError;
use procurement_risk::graph::SnapshotStore;
use procurement_risk::screening::client::BatchMatches;
use procurement_risk::screening::{ScopeMatch, Screener, ScreeningClient, ScreeningConfig, ScreeningQuery};
use procurement_risk::{Pipeline, PipelineConfig, PipelineInputs};
use procurement_types::{MatchKind, Relation, ScreeningStatus, Stage};
use tempfile::TempDir;

const PROCUREMENTS: &str = "\
ID_AWARD,WIN_NAME,WIN_COUNTRY_CODE,AWARD_VALUE_EURO_FIN_1
A1,ACME Inc,GB,100
A2,Initech Systms,GB,100000
A3,Nowhere Trading,GB,5000
A4,,GB,300
A5,Acme Inc,,10
";

const CANDIDATES: &str = "\
bvdidnumber,name
GB1,ACME
GB3,Initech Systems
";

const SHAREHOLDERS: &str = "\
bvdidnumber,shareholderbvdidnumber,shareholdername,shareholderfirstname,shareholdercountryisocode,shareholderdirect,shareholdertotal
GB1,S1,Shady Holdings,,GB,60,
GB3,P9,John Smith,John,GB,10,
GB3,GB3,Initech Systems,,GB,5,
";

const SUBSIDIARIES: &str = "\
bvdidnumber,subsidiarybvdidnumber,subsidiaryname,subsidiarycountryisocode,subsidiarydirect,subsidiarytotal
GB3,SUB1,Initech Labs,GB,100,
";

struct FixedScores {
    scores: HashMap<String, f64>,
    calls: AtomicUsize,
}

impl FixedScores {
    fn new(scores: &[(&str, f64)]) -> Self {
        Self {
            scores: scores.iter().map(|(id, s)| (id.to_string(), *s)).collect(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ScreeningClient for FixedScores {
    async fn match_batch(
        &self,
        scope: &str,
        queries: &[ScreeningQuery],
    ) -> Result<BatchMatches, ScreeningError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(queries
            .iter()
            .map(|q| {
                let hit = self.scores.get(&q.node_id).map(|score| ScopeMatch {
                    scope: scope.to_string(),
                    score: *score,
                    matched_id: Some(format!("os-{}", q.node_id)),
                    matched_name: Some(q.name.clone()),
                    properties: Default::default(),
                });
                (q.node_id.clone(), hit)
            })
            .collect())
    }
}

struct Fixture {
    dir: TempDir,
    inputs: PipelineInputs,
    config: PipelineConfig,
}

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let inputs = PipelineInputs {
        procurements: write(dir.path(), "awards.csv", PROCUREMENTS),
        candidates: vec![write(dir.path(), "orbis.csv", CANDIDATES)],
        shareholders: Some(write(dir.path(), "shareholders.csv", SHAREHOLDERS)),
        subsidiaries: Some(write(dir.path(), "subsidiaries.csv", SUBSIDIARIES)),
    };

    let mut config = PipelineConfig::default();
    config.graph.snapshot_dir = dir.path().join("snapshots");
    config.output_dir = dir.path().join("output");
    config.screening = ScreeningConfig {
        scopes: vec!["sanctions".to_string()],
        batch_size: 2,
        concurrency: 2,
        backoff_ms: 1,
        max_backoff_ms: 2,
        ..ScreeningConfig::default()
    };
    Fixture { dir, inputs, config }
}

fn screener(config: &ScreeningConfig) -> Screener<FixedScores> {
    let client = FixedScores::new(&[
        ("GB1", 0.1),
        ("S1", 0.9),
        ("GB3", 0.2),
        ("P9", 0.95),
        ("SUB1", 0.3),
    ]);
    Screener::new(client, config.clone())
}

#[tokio::test]
async fn test_full_run_links_scores_and_ranks() {
    let fx = fixture();
    let screener = screener(&fx.config.screening);
    let report = Pipeline::new(&fx.config, Some(&screener))
        .run(&fx.inputs, &[])
        .await
        .unwrap();

    // Row accounting: A5 is dropped by the loader and counted as errored
    assert_eq!(report.rows.total, 5);
    assert_eq!(report.rows.matched, 2);
    assert_eq!(report.rows.unmatched, 1);
    assert_eq!(report.rows.errored, 2);
    assert!(report.rows.is_balanced());

    assert_eq!(report.jurisdictions.len(), 1);
    let metrics = &report.jurisdictions[0];
    assert_eq!(metrics.jurisdiction, "GB");
    assert_eq!(metrics.resolution.exact, 1);
    assert_eq!(metrics.resolution.fuzzy, 1);
    // A4 has no winner, so its procurement node is the only structural finding
    assert_eq!(metrics.integrity.orphans.len(), 1);
    assert_eq!(metrics.integrity.procurements_without_winner.len(), 1);
    assert!(metrics.integrity.winners_without_contract.is_empty());
    assert_eq!(metrics.snapshots.len(), 4);

    let screening = metrics.screening.unwrap();
    assert_eq!(screening.matched, 5);
    assert_eq!(screening.unknown, 0);
    assert_eq!(screening.sanctioned, 2);
    assert!((metrics.propagation.max_shadiness - 0.95).abs() < 1e-12);

    // Final graph
    let store = SnapshotStore::new(&fx.config.graph.snapshot_dir);
    let (entry, graph) = store.load_latest_stage("GB", Stage::Final).unwrap().unwrap();
    assert_eq!(entry.sequence, 4);

    assert!(graph.has_edge("S1", "GB1", Relation::Owns));
    assert!(graph.has_edge("S1", "GB1", Relation::Controls));
    assert!(graph.has_edge("P9", "GB3", Relation::Owns));
    assert!(!graph.has_edge("P9", "GB3", Relation::Controls));
    assert!(graph.has_edge("GB3", "SUB1", Relation::SubsidiaryOf));
    assert!(!graph.has_edge("GB3", "GB3", Relation::Owns));

    let acme = graph.get("GB1").unwrap();
    assert_eq!(acme.shadiness, Some(0.9));
    assert_eq!(acme.shadiness_source.as_deref(), Some("S1"));
    assert_eq!(acme.screening, Some(ScreeningStatus::Matched));

    let initech = graph.get("GB3").unwrap();
    assert_eq!(initech.shadiness, Some(0.95));
    assert_eq!(initech.shadiness_source.as_deref(), Some("P9"));
    assert!(graph.get("S1").unwrap().roles.sanctioned);

    let unmatched = graph.get("unmatched:nowhere trading").unwrap();
    assert!(unmatched.roles.unmatched);
    assert_eq!(unmatched.risk_score, None);
    assert_eq!(unmatched.shadiness, Some(0.0));

    // Outputs
    let out = fx.config.output_dir.join("GB");
    let matches = fs::read_to_string(out.join("matches.csv")).unwrap();
    assert!(matches.contains("GB1"));
    assert!(matches.contains(MatchKind::Fuzzy.as_str()));
    let metrics_text = fs::read_to_string(out.join("metrics_report.txt")).unwrap();
    assert!(metrics_text.starts_with("=== Procurement Risk Report: GB ==="));
    assert!(metrics_text.contains("Urgency buckets:"));

    let mut urgency = csv::Reader::from_path(out.join("urgency.csv")).unwrap();
    let rows: Vec<HashMap<String, String>> = urgency.deserialize().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 4);
    // Highest value and highest shadiness ranks first
    assert_eq!(rows[0]["winners"], "GB3");
    let urgency_of = |winner: &str| -> f64 {
        rows.iter()
            .find(|r| r["winners"] == winner)
            .map(|r| r["urgency"].parse().unwrap())
            .unwrap()
    };
    assert!(urgency_of("GB3") > urgency_of("GB1"));
    for row in &rows {
        let u: f64 = row["urgency"].parse().unwrap();
        assert!((0.0..=1.0).contains(&u));
    }
}

#[tokio::test]
async fn test_rerun_is_idempotent_and_appends_snapshots() {
    let fx = fixture();
    let screener = screener(&fx.config.screening);
    let pipeline = Pipeline::new(&fx.config, Some(&screener));

    let first = pipeline.run(&fx.inputs, &["gb".to_string()]).await.unwrap();
    let second = pipeline.run(&fx.inputs, &["gb".to_string()]).await.unwrap();

    let (a, b) = (&first.jurisdictions[0], &second.jurisdictions[0]);
    assert_eq!(a.graph.nodes, b.graph.nodes);
    assert_eq!(a.graph.edges, b.graph.edges);
    assert_eq!(b.winners.nodes_added, 0);
    assert_eq!(b.winners.edges_added, 0);
    assert_eq!(b.expansion.nodes_added, 0);
    assert_eq!(b.propagation, a.propagation);

    let store = SnapshotStore::new(&fx.config.graph.snapshot_dir);
    let entries = store.list("GB").unwrap();
    assert_eq!(entries.len(), 8);
    let stages: Vec<Stage> = entries.iter().map(|e| e.stage).collect();
    assert_eq!(&stages[..4], &Stage::ALL);
    assert_eq!(&stages[4..], &Stage::ALL);
}

#[tokio::test]
async fn test_run_without_screening_scores_zero_shadiness() {
    let fx = fixture();
    let report = Pipeline::<FixedScores>::new(&fx.config, None)
        .run(&fx.inputs, &[])
        .await
        .unwrap();

    let metrics = &report.jurisdictions[0];
    assert!(metrics.screening.is_none());
    assert_eq!(metrics.propagation.max_shadiness, 0.0);
    assert_eq!(metrics.propagation.risky_winners, 0);
    // Screened stage is still written so the sequence stays aligned
    assert_eq!(metrics.snapshots.len(), 4);
    assert!(metrics.snapshots[2].ends_with("0003-screened.json"));
}

#[tokio::test]
async fn test_checkpoint_resume_skips_screened_entities() {
    let mut fx = fixture();
    fx.config.screening.checkpoint_dir = Some(fx.dir.path().join("checkpoints"));
    fx.config.screening.checkpoint_every = 1;

    let first = screener(&fx.config.screening);
    Pipeline::new(&fx.config, Some(&first))
        .run(&fx.inputs, &[])
        .await
        .unwrap();
    assert!(first.client().calls.load(Ordering::SeqCst) > 0);
    assert!(fx.dir.path().join("checkpoints").join("GB.jsonl").exists());

    let second = screener(&fx.config.screening);
    let report = Pipeline::new(&fx.config, Some(&second))
        .run(&fx.inputs, &[])
        .await
        .unwrap();
    assert_eq!(second.client().calls.load(Ordering::SeqCst), 0);

    let screening = report.jurisdictions[0].screening.unwrap();
    assert_eq!(screening.screened, 0);
    assert_eq!(screening.resumed, 5);
    assert!((report.jurisdictions[0].propagation.max_shadiness - 0.95).abs() < 1e-12);
}

#[test]
fn test_resolve_only_writes_match_table() {
    let fx = fixture();
    let output = fx.dir.path().join("out").join("matches.csv");
    let accounting =
        procurement_risk::pipeline::resolve_only(&fx.config, &fx.inputs, &output).unwrap();

    assert_eq!(accounting.total, 5);
    assert_eq!(accounting.matched, 2);
    assert!(accounting.is_balanced());

    let mut reader = csv::Reader::from_path(&output).unwrap();
    assert_eq!(reader.records().count(), 4);
}

#[test]
fn test_missing_winner_column_is_fatal() {
    let fx = fixture();
    let awards = write(fx.dir.path(), "broken.csv", "ID_AWARD,WIN_COUNTRY_CODE,AWARD_VALUE_EURO\nA1,GB,1\n");
    let inputs = PipelineInputs {
        procurements: awards,
        ..fx.inputs.clone()
    };
    let err = procurement_risk::pipeline::load_inputs(&fx.config, &inputs).unwrap_err();
    assert!(format!("{:#}", err).contains("WIN_NAME"));
}
