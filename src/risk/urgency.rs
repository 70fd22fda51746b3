//! Urgency scoring
//!
//! Contract values are z-scored within the jurisdiction and mapped
//! through the standard normal CDF to a percentile `x`. The linear
//! urgency is `r * x` and the nonlinear urgency is `r * x^gamma` with
//! `gamma = a + (b - a) * x`, where `r` is the expected shadiness.
//! Small contracts are pushed down harder than large ones.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::graph::{NodeIdx, OwnershipGraph};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrgencyConfig {
    /// Exponent at percentile 0
    pub gamma_low: f64,
    /// Exponent at percentile 1
    pub gamma_high: f64,
    /// Values above this are treated as data errors
    pub value_cap: f64,
    /// Give valueless procurements the median value instead of urgency 0
    pub median_fill: bool,
    /// Allowed distance of the mean percentile from 0.5
    pub mean_percentile_tolerance: f64,
}

impl Default for UrgencyConfig {
    fn default() -> Self {
        Self {
            gamma_low: 0.5,
            gamma_high: 2.0,
            value_cap: 1e9,
            median_fill: true,
            mean_percentile_tolerance: 0.1,
        }
    }
}

/// Standard normal cumulative distribution
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + libm::erf(z / std::f64::consts::SQRT_2))
}

/// `r * x^gamma`, with `gamma` sliding from `a` to `b` as `x` grows
pub fn nonlinear_urgency(x: f64, r: f64, a: f64, b: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    let gamma = a + (b - a) * x;
    r * x.powf(gamma)
}

/// Statistics of the contract values used for z-scoring
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValueDistribution {
    pub procurements: usize,
    /// Usable values
    pub count: usize,
    /// Values dropped as negative, non-finite or above the cap
    pub discarded: usize,
    /// Procurements scored with the median value
    pub filled: usize,
    /// Procurements scored zero for lack of a value
    pub zeroed: usize,
    pub mean: f64,
    /// Population standard deviation
    pub std_dev: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Fewer than two values or zero spread; every percentile is 0.5
    pub degenerate: bool,
}

impl ValueDistribution {
    fn from_values(mut values: Vec<f64>) -> Self {
        let count = values.len();
        if count == 0 {
            return Self {
                degenerate: true,
                ..Self::default()
            };
        }
        values.sort_by(f64::total_cmp);
        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
        let median = if count % 2 == 1 {
            values[count / 2]
        } else {
            (values[count / 2 - 1] + values[count / 2]) / 2.0
        };
        let std_dev = variance.sqrt();
        Self {
            count,
            mean,
            std_dev,
            median,
            min: values[0],
            max: values[count - 1],
            degenerate: count < 2 || std_dev == 0.0,
            ..Self::default()
        }
    }

    /// Percentile of a value under the fitted normal
    pub fn percentile(&self, value: f64) -> f64 {
        if self.degenerate {
            return 0.5;
        }
        normal_cdf((value - self.mean) / self.std_dev)
    }
}

/// Adds value percentile and urgency to every procurement node
#[derive(Debug, Clone, Default)]
pub struct UrgencyScorer {
    config: UrgencyConfig,
}

impl UrgencyScorer {
    pub fn new(config: UrgencyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &UrgencyConfig {
        &self.config
    }

    fn usable(&self, value: Option<f64>) -> Option<f64> {
        value.filter(|v| v.is_finite() && *v >= 0.0 && *v <= self.config.value_cap)
    }

    pub fn score(&self, mut graph: OwnershipGraph) -> (OwnershipGraph, ValueDistribution) {
        let procurements: Vec<NodeIdx> = graph.procurements().collect();

        let mut discarded = 0;
        let mut values = Vec::with_capacity(procurements.len());
        for &idx in &procurements {
            let raw = graph.node(idx).procurement.as_ref().and_then(|f| f.value);
            match self.usable(raw) {
                Some(v) => values.push(v),
                None if raw.is_some() => discarded += 1,
                None => {}
            }
        }

        let mut distribution = ValueDistribution::from_values(values);
        distribution.procurements = procurements.len();
        distribution.discarded = discarded;
        if distribution.degenerate && !procurements.is_empty() {
            warn!(
                jurisdiction = graph.jurisdiction(),
                values = distribution.count,
                "Degenerate value distribution, all percentiles set to 0.5"
            );
        }

        let (a, b) = (self.config.gamma_low, self.config.gamma_high);
        for &idx in &procurements {
            let facts = graph
                .node_mut(idx)
                .procurement
                .get_or_insert_with(Default::default);
            let r = facts.expected_shadiness.unwrap_or(0.0).clamp(0.0, 1.0);

            let value = match self.usable(facts.value) {
                Some(v) => Some(v),
                None if self.config.median_fill && distribution.count > 0 => {
                    distribution.filled += 1;
                    Some(distribution.median)
                }
                None => None,
            };

            match value {
                Some(v) => {
                    let x = distribution.percentile(v);
                    facts.value_percentile = Some(x);
                    facts.urgency_linear = Some(r * x);
                    facts.urgency = Some(nonlinear_urgency(x, r, a, b));
                }
                None => {
                    distribution.zeroed += 1;
                    facts.value_percentile = None;
                    facts.urgency_linear = Some(0.0);
                    facts.urgency = Some(0.0);
                }
            }
        }

        info!(
            jurisdiction = graph.jurisdiction(),
            procurements = distribution.procurements,
            values = distribution.count,
            discarded = distribution.discarded,
            filled = distribution.filled,
            mean = distribution.mean,
            std_dev = distribution.std_dev,
            "Scored urgency"
        );
        (graph, distribution)
    }
}
