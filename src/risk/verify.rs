//! Post-scoring verification
//!
//! Checks never fail the run. Findings are collected into a
//! [`VerificationReport`] and offending procurement nodes get a
//! `verification_flag` attribute.

use std::fmt;

use procurement_types::{AttrValue, NodeKind};
use serde::Serialize;
use tracing::{info, warn};

use super::urgency::{UrgencyConfig, ValueDistribution};
use crate::graph::OwnershipGraph;

/// Attribute set on procurement nodes that failed a check
pub const VERIFICATION_FLAG: &str = "verification_flag";

/// Number of urgency buckets of width 0.1
pub const BUCKETS: usize = 10;

/// A single verification finding
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum VerificationIssue {
    UrgencyOutOfRange { node: String, value: f64 },
    NotANumber { node: String, field: &'static str },
    MissingUrgency { node: String, field: &'static str },
    MeanPercentileOff { mean: f64, tolerance: f64 },
    DegenerateDistribution { values: usize },
    WinnerWithoutShadiness { node: String },
    ProcurementWithoutExpectedShadiness { node: String },
}

impl VerificationIssue {
    /// Procurement node the issue is about, if any
    fn procurement(&self) -> Option<&str> {
        match self {
            Self::UrgencyOutOfRange { node, .. }
            | Self::NotANumber { node, .. }
            | Self::MissingUrgency { node, .. }
            | Self::ProcurementWithoutExpectedShadiness { node } => Some(node),
            _ => None,
        }
    }

    fn flag(&self) -> &'static str {
        match self {
            Self::UrgencyOutOfRange { .. } => "urgency_out_of_range",
            Self::NotANumber { .. } => "not_a_number",
            Self::MissingUrgency { .. } => "missing_urgency",
            Self::MeanPercentileOff { .. } => "mean_percentile_off",
            Self::DegenerateDistribution { .. } => "degenerate_distribution",
            Self::WinnerWithoutShadiness { .. } => "winner_without_shadiness",
            Self::ProcurementWithoutExpectedShadiness { .. } => "missing_expected_shadiness",
        }
    }
}

impl fmt::Display for VerificationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UrgencyOutOfRange { node, value } => {
                write!(f, "{}: urgency {} outside [0, 1]", node, value)
            }
            Self::NotANumber { node, field } => write!(f, "{}: {} is NaN", node, field),
            Self::MissingUrgency { node, field } => write!(f, "{}: {} was never scored", node, field),
            Self::MeanPercentileOff { mean, tolerance } => write!(
                f,
                "mean value percentile {:.4} is more than {} away from 0.5",
                mean, tolerance
            ),
            Self::DegenerateDistribution { values } => write!(
                f,
                "value distribution is degenerate ({} usable values), percentiles fixed at 0.5",
                values
            ),
            Self::WinnerWithoutShadiness { node } => write!(f, "{}: winner has no shadiness", node),
            Self::ProcurementWithoutExpectedShadiness { node } => {
                write!(f, "{}: procurement has no expected shadiness", node)
            }
        }
    }
}

/// Min, mean and max of one score column
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Range {
    pub count: usize,
    pub min: f64,
    pub mean: f64,
    pub max: f64,
}

impl Range {
    fn of(values: impl IntoIterator<Item = f64>) -> Self {
        let mut range = Range {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            ..Range::default()
        };
        let mut total = 0.0;
        for v in values.into_iter().filter(|v| !v.is_nan()) {
            range.count += 1;
            range.min = range.min.min(v);
            range.max = range.max.max(v);
            total += v;
        }
        if range.count == 0 {
            return Range::default();
        }
        range.mean = total / range.count as f64;
        range
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "n={} min={:.4} mean={:.4} max={:.4}",
            self.count, self.min, self.mean, self.max
        )
    }
}

/// Outcome of the verification pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VerificationReport {
    pub jurisdiction: String,
    pub distribution: ValueDistribution,
    pub value_range: Range,
    pub percentile_range: Range,
    pub expected_shadiness_range: Range,
    pub urgency_range: Range,
    pub urgency_linear_range: Range,
    /// Procurement counts per urgency bucket `[i/10, (i+1)/10)`, last bucket closed
    pub urgency_buckets: [usize; BUCKETS],
    pub issues: Vec<VerificationIssue>,
    /// Procurement ids carrying a verification flag
    pub flagged: Vec<String>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.issues.is_empty()
    }

    /// Label of an urgency bucket, e.g. `[0.3,0.4)`
    pub fn bucket_label(i: usize) -> String {
        let lo = i as f64 / BUCKETS as f64;
        let hi = (i + 1) as f64 / BUCKETS as f64;
        if i + 1 == BUCKETS {
            format!("[{:.1},{:.1}]", lo, hi)
        } else {
            format!("[{:.1},{:.1})", lo, hi)
        }
    }

    /// Share of procurements with urgency at or below each bucket's upper edge
    pub fn cumulative_share(&self) -> [f64; BUCKETS] {
        let total: usize = self.urgency_buckets.iter().sum();
        let mut out = [0.0; BUCKETS];
        if total == 0 {
            return out;
        }
        let mut running = 0;
        for (i, count) in self.urgency_buckets.iter().enumerate() {
            running += count;
            out[i] = running as f64 / total as f64;
        }
        out
    }
}

fn bucket_of(urgency: f64) -> usize {
    ((urgency * BUCKETS as f64).floor() as usize).min(BUCKETS - 1)
}

/// Run every check over a scored graph, flagging offending procurements
pub fn verify(
    mut graph: OwnershipGraph,
    distribution: &ValueDistribution,
    config: &UrgencyConfig,
) -> (OwnershipGraph, VerificationReport) {
    let mut report = VerificationReport {
        jurisdiction: graph.jurisdiction().to_string(),
        distribution: distribution.clone(),
        ..VerificationReport::default()
    };

    let mut values = Vec::new();
    let mut percentiles = Vec::new();
    let mut expected = Vec::new();
    let mut urgencies = Vec::new();
    let mut linear = Vec::new();

    for node in graph.nodes() {
        if node.kind != NodeKind::Procurement {
            if node.roles.winner && node.kind.is_entity() && node.shadiness.is_none() {
                report.issues.push(VerificationIssue::WinnerWithoutShadiness {
                    node: node.id.clone(),
                });
            }
            continue;
        }

        let facts = node.procurement.clone().unwrap_or_default();
        match facts.expected_shadiness {
            Some(r) if r.is_nan() => report.issues.push(VerificationIssue::NotANumber {
                node: node.id.clone(),
                field: "expected_shadiness",
            }),
            Some(r) => expected.push(r),
            None => report
                .issues
                .push(VerificationIssue::ProcurementWithoutExpectedShadiness {
                    node: node.id.clone(),
                }),
        }

        for (field, value, sink) in [
            ("urgency", facts.urgency, &mut urgencies),
            ("urgency_linear", facts.urgency_linear, &mut linear),
        ] {
            let Some(value) = value else {
                report.issues.push(VerificationIssue::MissingUrgency {
                    node: node.id.clone(),
                    field,
                });
                continue;
            };
            if value.is_nan() {
                report.issues.push(VerificationIssue::NotANumber {
                    node: node.id.clone(),
                    field,
                });
            } else if !(0.0..=1.0).contains(&value) {
                report.issues.push(VerificationIssue::UrgencyOutOfRange {
                    node: node.id.clone(),
                    value,
                });
            } else {
                sink.push(value);
            }
        }

        if let Some(v) = facts.value {
            values.push(v);
        }
        if let Some(x) = facts.value_percentile {
            percentiles.push(x);
        }
    }

    for &u in &urgencies {
        report.urgency_buckets[bucket_of(u)] += 1;
    }

    report.value_range = Range::of(values);
    report.percentile_range = Range::of(percentiles);
    report.expected_shadiness_range = Range::of(expected);
    report.urgency_range = Range::of(urgencies);
    report.urgency_linear_range = Range::of(linear);

    if distribution.degenerate {
        if distribution.procurements > 0 {
            report.issues.push(VerificationIssue::DegenerateDistribution {
                values: distribution.count,
            });
        }
    } else if report.percentile_range.count > 0
        && (report.percentile_range.mean - 0.5).abs() > config.mean_percentile_tolerance
    {
        report.issues.push(VerificationIssue::MeanPercentileOff {
            mean: report.percentile_range.mean,
            tolerance: config.mean_percentile_tolerance,
        });
    }

    for issue in &report.issues {
        warn!(jurisdiction = %report.jurisdiction, issue = %issue, "Verification issue");
        let Some(id) = issue.procurement() else { continue };
        let Some(idx) = graph.find(id) else { continue };
        graph
            .node_mut(idx)
            .attributes
            .insert(VERIFICATION_FLAG.to_string(), AttrValue::from(issue.flag()));
        if !report.flagged.iter().any(|f| f == id) {
            report.flagged.push(id.to_string());
        }
    }

    info!(
        jurisdiction = %report.jurisdiction,
        issues = report.issues.len(),
        flagged = report.flagged.len(),
        "Verification finished"
    );
    (graph, report)
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Verification ({}):", self.jurisdiction)?;
        writeln!(f, "  Contract value:       {}", self.value_range)?;
        writeln!(f, "  Value percentile:     {}", self.percentile_range)?;
        writeln!(f, "  Expected shadiness:   {}", self.expected_shadiness_range)?;
        writeln!(f, "  Urgency:              {}", self.urgency_range)?;
        writeln!(f, "  Urgency (linear):     {}", self.urgency_linear_range)?;
        writeln!(
            f,
            "  Values: {} usable, {} discarded, {} median-filled, {} zeroed",
            self.distribution.count,
            self.distribution.discarded,
            self.distribution.filled,
            self.distribution.zeroed
        )?;
        writeln!(f, "  Urgency buckets:")?;
        let cumulative = self.cumulative_share();
        for (i, count) in self.urgency_buckets.iter().enumerate() {
            writeln!(
                f,
                "    {:<12}{:>8}  cum {:.3}",
                Self::bucket_label(i),
                count,
                cumulative[i]
            )?;
        }
        if self.passed() {
            writeln!(f, "  Status: PASSED")?;
        } else {
            writeln!(f, "  Status: {} issue(s)", self.issues.len())?;
            for issue in &self.issues {
                writeln!(f, "    - {}", issue)?;
            }
        }
        Ok(())
    }
}
