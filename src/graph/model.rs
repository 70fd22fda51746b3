//! Ownership graph storage
//!
//! Nodes and edges live in arenas addressed by position. A string index
//! maps identifiers to node positions and an edge index enforces one
//! edge per (source, target, relation). Both inserts are upserts, which
//! is what makes rebuilding a graph from the same rows a no-op.

use std::collections::{BTreeMap, HashMap};

use procurement_types::{AttrValue, NodeKind, Relation, Roles, ScreeningStatus};
use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;

/// Scalar node or edge attributes
pub type Attributes = BTreeMap<String, AttrValue>;

/// Position of a node in the arena
pub type NodeIdx = usize;

/// Scores and values carried by procurement nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcurementFacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,
    /// Mean contract value over the rows of this procurement, before capping or median fill
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_shadiness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_percentile: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency_linear: Option<f64>,
}

/// A graph node. Identity is `id`, never the display name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub roles: Roles,
    /// Screening score in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screening: Option<ScreeningStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadiness: Option<f64>,
    /// Node whose risk score produced `shadiness`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadiness_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procurement: Option<ProcurementFacts>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            name: None,
            jurisdiction: None,
            roles: Roles::default(),
            risk_score: None,
            screening: None,
            shadiness: None,
            shadiness_source: None,
            procurement: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn with_jurisdiction(mut self, jurisdiction: Option<String>) -> Self {
        self.jurisdiction = jurisdiction;
        self
    }

    pub fn with_roles(mut self, roles: Roles) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    /// Fold a re-observed node into this one: roles are OR-ed, missing
    /// fields and attribute keys are filled, existing values are kept.
    fn absorb(&mut self, other: Node) {
        self.roles.merge(other.roles);
        if self.name.is_none() {
            self.name = other.name;
        }
        if self.jurisdiction.is_none() {
            self.jurisdiction = other.jurisdiction;
        }
        for (key, value) in other.attributes {
            self.attributes.entry(key).or_insert(value);
        }
        if let Some(incoming) = other.procurement {
            match self.procurement.as_mut() {
                Some(facts) => {
                    if facts.contract_id.is_none() {
                        facts.contract_id = incoming.contract_id;
                    }
                    if facts.value.is_none() {
                        facts.value = incoming.value;
                    }
                }
                None => self.procurement = Some(incoming),
            }
        }
    }

    /// Risk used by propagation; unscreened nodes count as zero
    pub fn risk_or_zero(&self) -> f64 {
        self.risk_score.unwrap_or(0.0)
    }
}

/// A directed, typed edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub relation: Relation,
    /// Ownership percentage in [0, 100]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ownership_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

/// Attributed directed multigraph for one jurisdiction
#[derive(Debug, Clone)]
pub struct OwnershipGraph {
    jurisdiction: String,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    /// (source, target) positions per edge
    ends: Vec<(NodeIdx, NodeIdx)>,
    index: HashMap<String, NodeIdx>,
    edge_index: HashMap<(NodeIdx, NodeIdx, Relation), usize>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
}

impl PartialEq for OwnershipGraph {
    fn eq(&self, other: &Self) -> bool {
        self.jurisdiction == other.jurisdiction
            && self.nodes == other.nodes
            && self.edges == other.edges
    }
}

impl OwnershipGraph {
    pub fn new(jurisdiction: impl Into<String>) -> Self {
        Self {
            jurisdiction: jurisdiction.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            ends: Vec::new(),
            index: HashMap::new(),
            edge_index: HashMap::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
        }
    }

    /// Rebuild a graph from persisted parts, re-creating the indexes
    pub fn from_parts(
        jurisdiction: String,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> Result<Self, SnapshotError> {
        let mut graph = Self::new(jurisdiction);
        for node in nodes {
            graph.upsert_node(node);
        }
        for edge in edges {
            let source = graph.find(&edge.source).ok_or_else(|| SnapshotError::DanglingEdge {
                node: edge.source.clone(),
            })?;
            let target = graph.find(&edge.target).ok_or_else(|| SnapshotError::DanglingEdge {
                node: edge.target.clone(),
            })?;
            graph.upsert_edge(source, target, edge.relation, edge.ownership_pct, edge.attributes);
        }
        Ok(graph)
    }

    pub fn jurisdiction(&self) -> &str {
        &self.jurisdiction
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn find(&self, id: &str) -> Option<NodeIdx> {
        self.index.get(id).copied()
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.find(id).map(|idx| &self.nodes[idx])
    }

    pub fn node(&self, idx: NodeIdx) -> &Node {
        &self.nodes[idx]
    }

    pub fn node_mut(&mut self, idx: NodeIdx) -> &mut Node {
        &mut self.nodes[idx]
    }

    /// Insert a node or merge it into the existing node with the same id
    pub fn upsert_node(&mut self, node: Node) -> NodeIdx {
        if let Some(&idx) = self.index.get(&node.id) {
            self.nodes[idx].absorb(node);
            return idx;
        }
        let idx = self.nodes.len();
        self.index.insert(node.id.clone(), idx);
        self.nodes.push(node);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        idx
    }

    /// Insert an edge unless one with the same (source, target, relation)
    /// exists; an existing edge only gains a missing percentage and new
    /// attribute keys.
    pub fn upsert_edge(
        &mut self,
        source: NodeIdx,
        target: NodeIdx,
        relation: Relation,
        ownership_pct: Option<f64>,
        attributes: Attributes,
    ) -> usize {
        let key = (source, target, relation);
        if let Some(&edge_idx) = self.edge_index.get(&key) {
            let edge = &mut self.edges[edge_idx];
            if edge.ownership_pct.is_none() {
                edge.ownership_pct = ownership_pct;
            }
            for (k, v) in attributes {
                edge.attributes.entry(k).or_insert(v);
            }
            return edge_idx;
        }

        let edge_idx = self.edges.len();
        self.edges.push(Edge {
            source: self.nodes[source].id.clone(),
            target: self.nodes[target].id.clone(),
            relation,
            ownership_pct,
            attributes,
        });
        self.ends.push((source, target));
        self.edge_index.insert(key, edge_idx);
        self.outgoing[source].push(edge_idx);
        self.incoming[target].push(edge_idx);
        edge_idx
    }

    pub fn has_edge(&self, source: &str, target: &str, relation: Relation) -> bool {
        match (self.find(source), self.find(target)) {
            (Some(s), Some(t)) => self.edge_index.contains_key(&(s, t, relation)),
            _ => false,
        }
    }

    pub fn edge_between(&self, source: &str, target: &str, relation: Relation) -> Option<&Edge> {
        let s = self.find(source)?;
        let t = self.find(target)?;
        self.edge_index.get(&(s, t, relation)).map(|&e| &self.edges[e])
    }

    /// Sources of edges into `idx` with one of `relations`
    pub fn predecessors<'a>(
        &'a self,
        idx: NodeIdx,
        relations: &'a [Relation],
    ) -> impl Iterator<Item = NodeIdx> + 'a {
        self.incoming[idx]
            .iter()
            .filter(move |&&e| relations.contains(&self.edges[e].relation))
            .map(move |&e| self.ends[e].0)
    }

    /// Targets of edges out of `idx` with one of `relations`
    pub fn successors<'a>(
        &'a self,
        idx: NodeIdx,
        relations: &'a [Relation],
    ) -> impl Iterator<Item = NodeIdx> + 'a {
        self.outgoing[idx]
            .iter()
            .filter(move |&&e| relations.contains(&self.edges[e].relation))
            .map(move |&e| self.ends[e].1)
    }

    /// Number of edges touching `idx`
    pub fn degree(&self, idx: NodeIdx) -> usize {
        self.incoming[idx].len() + self.outgoing[idx].len()
    }

    /// Positions of procurement nodes in insertion order
    pub fn procurements(&self) -> impl Iterator<Item = NodeIdx> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.kind == NodeKind::Procurement)
            .map(|(idx, _)| idx)
    }

    /// Winners of a procurement, in WON edge insertion order
    pub fn winners_of(&self, procurement: NodeIdx) -> Vec<NodeIdx> {
        self.successors(procurement, &[Relation::Won]).collect()
    }

    /// Consume the graph, returning its persisted parts
    pub fn into_parts(self) -> (String, Vec<Node>, Vec<Edge>) {
        (self.jurisdiction, self.nodes, self.edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company(id: &str) -> Node {
        Node::new(id, NodeKind::Company)
    }

    #[test]
    fn test_upsert_node_is_idempotent() {
        let mut graph = OwnershipGraph::new("GB");
        let a = graph.upsert_node(company("GB1").with_name(Some("Acme".into())));
        let b = graph.upsert_node(company("GB1").with_name(Some("ACME Ltd".into())));
        assert_eq!(a, b);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.node(a).name.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_upsert_node_merges_roles_and_fills_attributes() {
        let mut graph = OwnershipGraph::new("GB");
        let mut attrs = Attributes::new();
        attrs.insert("sector".into(), AttrValue::from("construction"));
        graph.upsert_node(company("GB1").with_roles(Roles::winner()).with_attributes(attrs));

        let mut more = Attributes::new();
        more.insert("sector".into(), AttrValue::from("retail"));
        more.insert("employees".into(), AttrValue::from(12.0));
        let idx = graph.upsert_node(company("GB1").with_roles(Roles::shareholder()).with_attributes(more));

        let node = graph.node(idx);
        assert!(node.roles.winner && node.roles.shareholder);
        assert_eq!(node.attributes["sector"], AttrValue::from("construction"));
        assert_eq!(node.attributes["employees"], AttrValue::from(12.0));
    }

    #[test]
    fn test_upsert_edge_keyed_by_relation() {
        let mut graph = OwnershipGraph::new("GB");
        let s = graph.upsert_node(company("S"));
        let w = graph.upsert_node(company("W"));
        graph.upsert_edge(s, w, Relation::Owns, Some(60.0), Attributes::new());
        graph.upsert_edge(s, w, Relation::Owns, Some(70.0), Attributes::new());
        graph.upsert_edge(s, w, Relation::Controls, Some(60.0), Attributes::new());

        assert_eq!(graph.edge_count(), 2);
        assert_eq!(
            graph.edge_between("S", "W", Relation::Owns).and_then(|e| e.ownership_pct),
            Some(60.0)
        );
        assert!(graph.has_edge("S", "W", Relation::Controls));
        assert!(!graph.has_edge("W", "S", Relation::Owns));
    }

    #[test]
    fn test_neighbors_filter_by_relation() {
        let mut graph = OwnershipGraph::new("GB");
        let p = graph.upsert_node(Node::new("P", NodeKind::Procurement));
        let w = graph.upsert_node(company("W"));
        let s = graph.upsert_node(company("S"));
        let sub = graph.upsert_node(company("SUB"));
        graph.upsert_edge(p, w, Relation::Won, None, Attributes::new());
        graph.upsert_edge(s, w, Relation::Owns, Some(10.0), Attributes::new());
        graph.upsert_edge(w, sub, Relation::SubsidiaryOf, Some(100.0), Attributes::new());

        let owners: Vec<_> = graph.predecessors(w, &[Relation::Owns, Relation::Controls]).collect();
        assert_eq!(owners, vec![s]);
        let subs: Vec<_> = graph.successors(w, &[Relation::SubsidiaryOf]).collect();
        assert_eq!(subs, vec![sub]);
        assert_eq!(graph.winners_of(p), vec![w]);
        assert_eq!(graph.procurements().collect::<Vec<_>>(), vec![p]);
    }

    #[test]
    fn test_from_parts_rejects_dangling_edge() {
        let edge = Edge {
            source: "A".into(),
            target: "B".into(),
            relation: Relation::Owns,
            ownership_pct: None,
            attributes: Attributes::new(),
        };
        let err = OwnershipGraph::from_parts("GB".into(), vec![company("A")], vec![edge]).unwrap_err();
        assert!(matches!(err, SnapshotError::DanglingEdge { node } if node == "B"));
    }
}
