//! Graph summary and integrity checks

use std::collections::BTreeMap;
use std::fmt;

use procurement_types::{NodeKind, Relation};
use serde::Serialize;

use super::model::OwnershipGraph;

/// Node, edge and role counts of a graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphSummary {
    pub jurisdiction: String,
    pub nodes: usize,
    pub edges: usize,
    pub nodes_by_kind: BTreeMap<String, usize>,
    pub edges_by_relation: BTreeMap<String, usize>,
    pub winners: usize,
    pub unmatched_winners: usize,
    pub shareholders: usize,
    pub subsidiaries: usize,
    pub sanctioned: usize,
    /// Entity nodes carrying a risk score
    pub screened: usize,
}

impl GraphSummary {
    pub fn of(graph: &OwnershipGraph) -> Self {
        let mut summary = Self {
            jurisdiction: graph.jurisdiction().to_string(),
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            ..Self::default()
        };
        for kind in [NodeKind::Procurement, NodeKind::Company, NodeKind::Person] {
            summary.nodes_by_kind.insert(kind.as_str().to_string(), 0);
        }
        for relation in Relation::ALL {
            summary.edges_by_relation.insert(relation.as_str().to_string(), 0);
        }

        for node in graph.nodes() {
            *summary
                .nodes_by_kind
                .entry(node.kind.as_str().to_string())
                .or_default() += 1;
            let roles = node.roles;
            summary.winners += usize::from(roles.winner);
            summary.unmatched_winners += usize::from(roles.winner && roles.unmatched);
            summary.shareholders += usize::from(roles.shareholder);
            summary.subsidiaries += usize::from(roles.subsidiary);
            summary.sanctioned += usize::from(roles.sanctioned);
            summary.screened += usize::from(node.risk_score.is_some());
        }
        for edge in graph.edges() {
            *summary
                .edges_by_relation
                .entry(edge.relation.as_str().to_string())
                .or_default() += 1;
        }
        summary
    }
}

impl fmt::Display for GraphSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Graph Summary ({}):", self.jurisdiction)?;
        writeln!(f, "  Nodes:              {}", self.nodes)?;
        for (kind, count) in &self.nodes_by_kind {
            writeln!(f, "    {:<18}{}", kind, count)?;
        }
        writeln!(f, "  Edges:              {}", self.edges)?;
        for (relation, count) in &self.edges_by_relation {
            writeln!(f, "    {:<18}{}", relation, count)?;
        }
        writeln!(
            f,
            "  Winners:            {} ({} unmatched)",
            self.winners, self.unmatched_winners
        )?;
        writeln!(f, "  Shareholders:       {}", self.shareholders)?;
        writeln!(f, "  Subsidiaries:       {}", self.subsidiaries)?;
        writeln!(f, "  Screened entities:  {}", self.screened)?;
        writeln!(f, "  Sanctioned:         {}", self.sanctioned)?;
        Ok(())
    }
}

/// Structural problems worth a look before scoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Nodes without any edge
    pub orphans: Vec<String>,
    /// Procurement nodes without a WON edge
    pub procurements_without_winner: Vec<String>,
    /// Winner nodes no procurement points at
    pub winners_without_contract: Vec<String>,
}

impl IntegrityReport {
    pub fn check(graph: &OwnershipGraph) -> Self {
        let mut report = Self::default();
        for (idx, node) in graph.nodes().iter().enumerate() {
            if graph.degree(idx) == 0 {
                report.orphans.push(node.id.clone());
            }
            match node.kind {
                NodeKind::Procurement => {
                    if graph.winners_of(idx).is_empty() {
                        report.procurements_without_winner.push(node.id.clone());
                    }
                }
                _ if node.roles.winner => {
                    if graph.predecessors(idx, &[Relation::Won]).next().is_none() {
                        report.winners_without_contract.push(node.id.clone());
                    }
                }
                _ => {}
            }
        }
        report
    }

    pub fn is_clean(&self) -> bool {
        self.orphans.is_empty()
            && self.procurements_without_winner.is_empty()
            && self.winners_without_contract.is_empty()
    }
}

impl fmt::Display for IntegrityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Integrity Check:")?;
        writeln!(f, "  Orphan nodes:                 {}", self.orphans.len())?;
        writeln!(
            f,
            "  Procurements without winner:  {}",
            self.procurements_without_winner.len()
        )?;
        writeln!(
            f,
            "  Winners without contract:     {}",
            self.winners_without_contract.len()
        )?;
        for id in self.orphans.iter().take(10) {
            writeln!(f, "    orphan: {}", id)?;
        }
        Ok(())
    }
}
