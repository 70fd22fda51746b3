//! Shadiness propagation
//!
//! A winner's shadiness is the highest risk score in its ownership
//! neighbourhood: the winner, its first-level owners and subsidiaries,
//! and the direct controllers of those. Entities without a score count
//! as zero. Because the rule is a plain maximum, raising any reachable
//! score can never lower a winner's shadiness.
//!
//! Traversal keeps a visited set, so ownership cycles terminate.

use std::collections::{HashMap, HashSet, VecDeque};

use procurement_types::Relation;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::graph::{NodeIdx, OwnershipGraph};

/// Edges leading from an owned entity up to its owners
const UPSTREAM: &[Relation] = &[Relation::Owns, Relation::Controls, Relation::SubsidiaryOf];

/// Edges leading from a parent down to its subsidiaries
const DOWNSTREAM: &[Relation] = &[Relation::SubsidiaryOf];

/// Risk scores by node id
pub type RiskScores = HashMap<String, f64>;

/// Neighbourhood settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Ownership hops around each winner
    pub ownership_depth: usize,
    /// Add the direct controllers of every node in the neighbourhood
    pub include_controllers: bool,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            ownership_depth: 1,
            include_controllers: true,
        }
    }
}

/// Propagation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PropagationSummary {
    pub winners: usize,
    pub procurements: usize,
    /// Winners with non-zero shadiness
    pub risky_winners: usize,
    pub max_shadiness: f64,
    pub mean_expected_shadiness: f64,
}

/// Collect every node id carrying a risk score
pub fn risk_scores_from(graph: &OwnershipGraph) -> RiskScores {
    graph
        .nodes()
        .iter()
        .filter_map(|n| n.risk_score.map(|score| (n.id.clone(), score)))
        .collect()
}

/// Computes shadiness for winners and expected shadiness for procurements
#[derive(Debug, Clone, Default)]
pub struct Propagator {
    config: PropagationConfig,
}

impl Propagator {
    pub fn new(config: PropagationConfig) -> Self {
        Self { config }
    }

    /// Nodes whose risk feeds a winner's shadiness, winner first
    pub fn neighbourhood(&self, graph: &OwnershipGraph, winner: NodeIdx) -> Vec<NodeIdx> {
        let mut visited: HashSet<NodeIdx> = HashSet::new();
        let mut order = vec![winner];
        let mut queue: VecDeque<(NodeIdx, usize)> = VecDeque::new();

        visited.insert(winner);
        queue.push_back((winner, 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= self.config.ownership_depth {
                continue;
            }
            let next: Vec<NodeIdx> = graph
                .predecessors(current, UPSTREAM)
                .chain(graph.successors(current, DOWNSTREAM))
                .collect();
            for neighbour in next {
                if visited.insert(neighbour) {
                    order.push(neighbour);
                    queue.push_back((neighbour, depth + 1));
                }
            }
        }

        if self.config.include_controllers {
            let members = order.len();
            for i in 0..members {
                let controllers: Vec<NodeIdx> =
                    graph.predecessors(order[i], &[Relation::Controls]).collect();
                for controller in controllers {
                    if visited.insert(controller) {
                        order.push(controller);
                    }
                }
            }
        }

        order
    }

    /// Attach shadiness to every winner and expected shadiness to every
    /// procurement. Consumes the input graph and returns the enriched one.
    pub fn propagate(
        &self,
        mut graph: OwnershipGraph,
        scores: &RiskScores,
    ) -> (OwnershipGraph, PropagationSummary) {
        let risk_of = |graph: &OwnershipGraph, idx: NodeIdx| -> f64 {
            scores
                .get(&graph.node(idx).id)
                .copied()
                .filter(|s| s.is_finite())
                .map_or(0.0, |s| s.clamp(0.0, 1.0))
        };

        let winners: Vec<NodeIdx> = (0..graph.node_count())
            .filter(|&idx| {
                let node = graph.node(idx);
                node.roles.winner && node.kind.is_entity()
            })
            .collect();

        let mut summary = PropagationSummary {
            winners: winners.len(),
            ..PropagationSummary::default()
        };

        for &winner in &winners {
            let mut best = (winner, risk_of(&graph, winner));
            for idx in self.neighbourhood(&graph, winner) {
                let risk = risk_of(&graph, idx);
                if risk > best.1 {
                    best = (idx, risk);
                }
            }

            let source_id = graph.node(best.0).id.clone();
            let node = graph.node_mut(winner);
            node.shadiness = Some(best.1);
            node.shadiness_source = (best.1 > 0.0).then_some(source_id);

            summary.max_shadiness = summary.max_shadiness.max(best.1);
            if best.1 > 0.0 {
                summary.risky_winners += 1;
            }
        }

        let procurements: Vec<NodeIdx> = graph.procurements().collect();
        let mut expected_total = 0.0;
        for &procurement in &procurements {
            let winners = graph.winners_of(procurement);
            let expected = if winners.is_empty() {
                0.0
            } else {
                let likelihood = 1.0 / winners.len() as f64;
                winners
                    .iter()
                    .map(|&w| likelihood * graph.node(w).shadiness.unwrap_or(0.0))
                    .sum::<f64>()
                    .clamp(0.0, 1.0)
            };
            expected_total += expected;
            graph
                .node_mut(procurement)
                .procurement
                .get_or_insert_with(Default::default)
                .expected_shadiness = Some(expected);
        }

        summary.procurements = procurements.len();
        if !procurements.is_empty() {
            summary.mean_expected_shadiness = expected_total / procurements.len() as f64;
        }

        info!(
            jurisdiction = graph.jurisdiction(),
            winners = summary.winners,
            risky_winners = summary.risky_winners,
            procurements = summary.procurements,
            max_shadiness = summary.max_shadiness,
            "Propagated shadiness"
        );
        (graph, summary)
    }
}
