//! Incremental ownership graph construction
//!
//! `extend` takes the previous graph of a jurisdiction (or none) and the
//! current input rows, and returns the grown graph. It runs in two steps
//! so the pipeline can persist a snapshot between them:
//!
//! 1. `add_winners`: one procurement node per contract, one node per
//!    winner, WON edges from contract to winner
//! 2. `expand_ownership`: one hop of shareholders (OWNS, plus CONTROLS
//!    above the control threshold) and subsidiaries (SUBSIDIARY_OF) around
//!    every resolved winner, then the controlling owners of those first-ring
//!    companies so control chains reach the winner
//!
//! Every insert is an upsert, so replaying the same rows leaves the graph
//! unchanged.

use std::collections::{HashMap, HashSet};

use procurement_types::{
    NodeKind, ProcurementRow, Relation, Roles, ShareholderRow, SubsidiaryRow,
};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::model::{Attributes, Node, NodeIdx, OwnershipGraph, ProcurementFacts};
use super::sanitize::sanitize_attributes;
use super::GraphConfig;
use crate::error::GraphError;
use crate::resolve::normalize::Normalizer;

/// Prefix of procurement node ids
pub const PROCUREMENT_ID_PREFIX: &str = "proc-";

/// Prefix of unmatched winner node ids
pub const UNMATCHED_ID_PREFIX: &str = "unmatched:";

/// Counters for one builder step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub rows_seen: usize,
    /// Procurement rows whose winner resolved to an identifier
    pub matched_rows: usize,
    /// Procurement rows whose winner stayed unresolved
    pub unmatched_rows: usize,
    /// Procurement rows without a usable winner name
    pub errored_rows: usize,
    /// Rows from another jurisdiction
    pub foreign_rows: usize,
    /// Shareholder rows linking a controller to a first-ring company
    pub controller_rows: usize,
    pub nodes_added: usize,
    pub edges_added: usize,
}

/// Graph builder for one configuration
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    config: GraphConfig,
    normalizer: Normalizer,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new(GraphConfig::default())
    }
}

impl GraphBuilder {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            normalizer: Normalizer::default(),
        }
    }

    /// Use the resolver's normalizer for unmatched winner ids
    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Both builder steps in one call
    pub fn extend(
        &self,
        graph: Option<OwnershipGraph>,
        jurisdiction: &str,
        procurements: &[ProcurementRow],
        shareholders: &[ShareholderRow],
        subsidiaries: &[SubsidiaryRow],
    ) -> Result<OwnershipGraph, GraphError> {
        let (graph, _) = self.add_winners(graph, jurisdiction, procurements)?;
        let (graph, _) = self.expand_ownership(graph, shareholders, subsidiaries);
        Ok(graph)
    }

    /// Add procurement and winner nodes with their WON edges
    pub fn add_winners(
        &self,
        graph: Option<OwnershipGraph>,
        jurisdiction: &str,
        rows: &[ProcurementRow],
    ) -> Result<(OwnershipGraph, BuildStats), GraphError> {
        let mut graph = match graph {
            Some(g) if g.jurisdiction() != jurisdiction => {
                return Err(GraphError::JurisdictionMismatch {
                    graph: g.jurisdiction().to_string(),
                    requested: jurisdiction.to_string(),
                });
            }
            Some(g) => g,
            None => OwnershipGraph::new(jurisdiction),
        };

        let (nodes_before, edges_before) = (graph.node_count(), graph.edge_count());
        let mut stats = BuildStats::default();
        let values = mean_values(rows, jurisdiction);

        for row in rows {
            stats.rows_seen += 1;
            if row.jurisdiction != jurisdiction {
                stats.foreign_rows += 1;
                continue;
            }

            let id = procurement_id(row);
            let value = values.get(&id).copied();
            let procurement = graph.upsert_node(self.procurement_node(row, id, value));

            let winner = match (&row.winner_id, &row.winner_name) {
                (Some(id), name) => {
                    stats.matched_rows += 1;
                    Node::new(id.clone(), NodeKind::Company)
                        .with_name(name.clone())
                        .with_roles(Roles::winner())
                }
                (None, Some(name)) => match self.normalizer.normalize(name) {
                    Some(normalized) => {
                        stats.unmatched_rows += 1;
                        Node::new(
                            format!("{}{}", UNMATCHED_ID_PREFIX, normalized.text),
                            NodeKind::Company,
                        )
                        .with_name(Some(name.clone()))
                        .with_roles(Roles::unmatched_winner())
                    }
                    None => {
                        stats.errored_rows += 1;
                        continue;
                    }
                },
                (None, None) => {
                    debug!(row = row.row, "Procurement row without winner name");
                    stats.errored_rows += 1;
                    continue;
                }
            };
            let winner = graph.upsert_node(winner.with_jurisdiction(Some(row.jurisdiction.clone())));
            graph.upsert_edge(procurement, winner, Relation::Won, None, Attributes::new());
        }

        stats.nodes_added = graph.node_count() - nodes_before;
        stats.edges_added = graph.edge_count() - edges_before;
        info!(
            jurisdiction,
            rows = stats.rows_seen,
            matched = stats.matched_rows,
            unmatched = stats.unmatched_rows,
            errored = stats.errored_rows,
            nodes_added = stats.nodes_added,
            edges_added = stats.edges_added,
            "Added procurement winners"
        );
        Ok((graph, stats))
    }

    /// Expand one hop of ownership around every resolved winner, then add
    /// the controlling owners of that first ring
    pub fn expand_ownership(
        &self,
        mut graph: OwnershipGraph,
        shareholders: &[ShareholderRow],
        subsidiaries: &[SubsidiaryRow],
    ) -> (OwnershipGraph, BuildStats) {
        let (nodes_before, edges_before) = (graph.node_count(), graph.edge_count());
        let mut stats = BuildStats::default();

        for row in shareholders {
            stats.rows_seen += 1;
            let Some(company) = expandable_winner(&graph, &row.company_id) else {
                continue;
            };
            if row.shareholder_id == row.company_id {
                debug!(company = %row.company_id, "Ignoring self-ownership row");
                continue;
            }
            self.link_owner(&mut graph, row, company);
        }

        for row in subsidiaries {
            stats.rows_seen += 1;
            let Some(company) = expandable_winner(&graph, &row.company_id) else {
                continue;
            };
            if row.subsidiary_id == row.company_id {
                continue;
            }

            let subsidiary = graph.upsert_node(
                Node::new(row.subsidiary_id.clone(), NodeKind::Company)
                    .with_name(row.subsidiary_name.clone())
                    .with_jurisdiction(row.jurisdiction.clone())
                    .with_roles(Roles::subsidiary())
                    .with_attributes(sanitize_attributes(&row.attributes, &row.subsidiary_id)),
            );
            graph.upsert_edge(
                company,
                subsidiary,
                Relation::SubsidiaryOf,
                row.ownership_pct,
                Attributes::new(),
            );
        }

        // Controllers of the ring; plain minority owners stay out
        let ring = first_ring(&graph);
        for row in shareholders {
            let Some(company) = graph.find(&row.company_id).filter(|idx| ring.contains(idx)) else {
                continue;
            };
            if row.shareholder_id == row.company_id || !self.is_controlling(row.ownership_pct) {
                continue;
            }
            self.link_owner(&mut graph, row, company);
            stats.controller_rows += 1;
        }

        stats.nodes_added = graph.node_count() - nodes_before;
        stats.edges_added = graph.edge_count() - edges_before;
        info!(
            jurisdiction = graph.jurisdiction(),
            rows = stats.rows_seen,
            controllers = stats.controller_rows,
            nodes_added = stats.nodes_added,
            edges_added = stats.edges_added,
            "Expanded ownership"
        );
        (graph, stats)
    }

    /// OWNS edge from the row's shareholder to `company`, plus CONTROLS when
    /// the stored stake is above the threshold. The first stake seen for a
    /// pair is kept, and CONTROLS always carries that same stake.
    fn link_owner(&self, graph: &mut OwnershipGraph, row: &ShareholderRow, company: NodeIdx) {
        let kind = if row.is_person {
            NodeKind::Person
        } else {
            NodeKind::Company
        };
        let shareholder = graph.upsert_node(
            Node::new(row.shareholder_id.clone(), kind)
                .with_name(row.shareholder_name.clone())
                .with_jurisdiction(row.jurisdiction.clone())
                .with_roles(Roles::shareholder())
                .with_attributes(sanitize_attributes(&row.attributes, &row.shareholder_id)),
        );
        let owns = graph.upsert_edge(
            shareholder,
            company,
            Relation::Owns,
            row.ownership_pct,
            Attributes::new(),
        );
        let stake = graph.edges()[owns].ownership_pct;
        if self.is_controlling(stake) {
            graph.upsert_edge(shareholder, company, Relation::Controls, stake, Attributes::new());
        }
    }

    fn is_controlling(&self, pct: Option<f64>) -> bool {
        pct.is_some_and(|pct| pct > self.config.control_threshold_pct)
    }

    fn procurement_node(&self, row: &ProcurementRow, id: String, value: Option<f64>) -> Node {
        let mut attributes = sanitize_attributes(&row.attributes, "procurement");
        if let Some(contract_id) = &row.contract_id {
            attributes
                .entry("contract_id".to_string())
                .or_insert_with(|| contract_id.clone().into());
        }

        let mut node = Node::new(id, NodeKind::Procurement)
            .with_jurisdiction(Some(row.jurisdiction.clone()))
            .with_attributes(attributes);
        node.procurement = Some(ProcurementFacts {
            contract_id: row.contract_id.clone(),
            value,
            ..ProcurementFacts::default()
        });
        node
    }
}

/// Stable procurement node id. Rows sharing a contract id share a node;
/// rows without one are keyed by their own content and position.
pub fn procurement_id(row: &ProcurementRow) -> String {
    let key = match &row.contract_id {
        Some(contract_id) => format!("{}/contract/{}", row.jurisdiction, contract_id),
        None => format!(
            "{}/row/{}/{}/{}",
            row.jurisdiction,
            row.winner_name.as_deref().unwrap_or_default(),
            row.value.map(|v| v.to_string()).unwrap_or_default(),
            row.row
        ),
    };
    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes());
    format!("{}{}", PROCUREMENT_ID_PREFIX, id)
}

/// Mean finite value per procurement node. A contract with several
/// winners arrives as one row per winner, each carrying its own value.
fn mean_values(rows: &[ProcurementRow], jurisdiction: &str) -> HashMap<String, f64> {
    let mut sums: HashMap<String, (f64, usize)> = HashMap::new();
    for row in rows.iter().filter(|row| row.jurisdiction == jurisdiction) {
        if let Some(value) = row.value.filter(|v| v.is_finite()) {
            let (sum, n) = sums.entry(procurement_id(row)).or_default();
            *sum += value;
            *n += 1;
        }
    }
    sums.into_iter()
        .map(|(id, (sum, n))| (id, sum / n as f64))
        .collect()
}

/// A resolved winner node eligible for ownership expansion
fn expandable_winner(graph: &OwnershipGraph, id: &str) -> Option<NodeIdx> {
    graph.find(id).filter(|&idx| is_expandable(graph.node(idx)))
}

fn is_expandable(node: &Node) -> bool {
    node.roles.winner && !node.roles.unmatched && node.kind.is_entity()
}

/// Non-winner shareholders and subsidiaries directly attached to an
/// expandable winner. Derived from edges, not roles, so a controller added
/// on an earlier run never widens the ring.
fn first_ring(graph: &OwnershipGraph) -> HashSet<NodeIdx> {
    let mut ring = HashSet::new();
    for idx in 0..graph.node_count() {
        if !is_expandable(graph.node(idx)) {
            continue;
        }
        ring.extend(graph.predecessors(idx, &[Relation::Owns]));
        ring.extend(graph.successors(idx, &[Relation::SubsidiaryOf]));
    }
    ring.retain(|&idx| !is_expandable(graph.node(idx)));
    ring
}
