//! Sanctions and risk screening
//!
//! Entity nodes are screened against an external matching service, one
//! request per dataset scope and batch. The entity's risk score is the
//! best hit across scopes. Failures that survive the retry budget leave
//! the entity `unknown` and the run carries on.

pub mod checkpoint;
pub mod client;
pub mod runner;

use std::path::PathBuf;

use procurement_types::{NodeKind, RowAttributes, ScreeningStatus};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::graph::{sanitize::sanitize_attributes, Node, OwnershipGraph};

pub use checkpoint::Checkpoint;
pub use client::{HttpScreeningClient, ScreeningClient};
pub use runner::{ScreeningOutcome, Screener};

/// Dataset scopes screened by default
pub const DEFAULT_SCOPES: &[&str] = &["sanctions", "peps", "regulatory", "crime"];

/// Default score at which an entity counts as sanctioned
pub const DEFAULT_SANCTION_THRESHOLD: f64 = 0.7;

/// Prefix of attributes copied from the best screening hit
pub const ATTRIBUTE_PREFIX: &str = "screening";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningConfig {
    /// Skip screening entirely
    pub enabled: bool,
    /// Base URL of the matching service
    pub base_url: String,
    pub scopes: Vec<String>,
    /// Entities per request
    pub batch_size: usize,
    /// Requests in flight
    pub concurrency: usize,
    /// Attempts per request, including the first
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_secs: u64,
    /// Flush the checkpoint after this many completed entities
    pub checkpoint_every: usize,
    /// Checkpoint directory; results land in `{dir}/{jurisdiction}.jsonl`
    pub checkpoint_dir: Option<PathBuf>,
    pub sanction_threshold: f64,
    /// Environment variable holding the bearer token
    pub api_key_env: String,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:8000".to_string(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            batch_size: 20,
            concurrency: 8,
            max_attempts: 3,
            backoff_ms: 500,
            max_backoff_ms: 10_000,
            timeout_secs: 30,
            checkpoint_every: 50,
            checkpoint_dir: None,
            sanction_threshold: DEFAULT_SANCTION_THRESHOLD,
            api_key_env: "SCREENING_API_KEY".to_string(),
        }
    }
}

/// Entity schema understood by the matching service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntitySchema {
    Company,
    Person,
}

/// What gets sent to the matching service for one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningQuery {
    pub node_id: String,
    pub schema: EntitySchema,
    pub name: String,
    pub jurisdiction: Option<String>,
    pub registration_number: Option<String>,
    pub town: Option<String>,
    pub postal_code: Option<String>,
}

/// Placeholder values sources use for "no data"
fn is_valid(value: &str) -> bool {
    let v = value.trim().to_lowercase();
    !matches!(v.as_str(), "" | "nan" | "unknown" | "-" | "n.a." | "n/a")
}

fn valid(value: Option<&str>) -> Option<String> {
    value.filter(|v| is_valid(v)).map(|v| v.trim().to_string())
}

fn attribute_text<'a>(node: &'a Node, keys: &[&str]) -> Option<&'a str> {
    node.attributes
        .iter()
        .find(|(k, _)| keys.iter().any(|key| k.eq_ignore_ascii_case(key)))
        .and_then(|(_, v)| v.as_text())
}

impl ScreeningQuery {
    /// Build a query for an entity node; `None` for procurements, unmatched
    /// winners and nodes without a usable name
    pub fn from_node(node: &Node) -> Option<Self> {
        let schema = match node.kind {
            NodeKind::Company => EntitySchema::Company,
            NodeKind::Person => EntitySchema::Person,
            NodeKind::Procurement => return None,
        };
        if node.roles.unmatched {
            return None;
        }
        let name = valid(node.name.as_deref())?;
        let registration_number = match schema {
            EntitySchema::Company => valid(Some(node.id.as_str())),
            EntitySchema::Person => None,
        };
        Some(Self {
            node_id: node.id.clone(),
            schema,
            name,
            jurisdiction: valid(node.jurisdiction.as_deref()),
            registration_number,
            town: valid(attribute_text(node, &["town", "city"])),
            postal_code: valid(attribute_text(node, &["postal_code", "postcode", "zip"])),
        })
    }
}

/// Best hit of one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeMatch {
    pub scope: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_name: Option<String>,
    /// Raw properties of the matched entity
    #[serde(default, skip_serializing_if = "RowAttributes::is_empty")]
    pub properties: RowAttributes,
}

/// Screening outcome of one entity, also the checkpoint line format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningResult {
    pub node_id: String,
    pub status: ScreeningStatus,
    /// Best score across scopes; absent when unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best: Option<ScopeMatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScreeningResult {
    pub fn is_unknown(&self) -> bool {
        self.status == ScreeningStatus::Unknown
    }
}

/// Counts of an attach pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttachStats {
    pub attached: usize,
    pub sanctioned: usize,
    pub unknown: usize,
    /// Results whose node is not in the graph
    pub missing: usize,
}

/// Write screening results onto the graph. Matched and no-match results
/// set the risk score; unknown results leave it empty so propagation
/// counts them as zero. Scores at or above `sanction_threshold` add the
/// `sanctioned` role.
pub fn attach_scores(
    mut graph: OwnershipGraph,
    results: &[ScreeningResult],
    sanction_threshold: f64,
) -> (OwnershipGraph, AttachStats) {
    let mut stats = AttachStats::default();
    for result in results {
        let Some(idx) = graph.find(&result.node_id) else {
            debug!(node = %result.node_id, "Screening result for unknown node");
            stats.missing += 1;
            continue;
        };
        let node = graph.node_mut(idx);
        node.screening = Some(result.status);
        node.risk_score = match result.status {
            ScreeningStatus::Unknown => None,
            _ => Some(result.score.unwrap_or(0.0).clamp(0.0, 1.0)),
        };
        stats.attached += 1;
        if result.is_unknown() {
            stats.unknown += 1;
        }
        if node.risk_score.is_some_and(|s| s >= sanction_threshold) {
            node.roles.sanctioned = true;
            stats.sanctioned += 1;
        }

        if let Some(best) = &result.best {
            let mut raw = RowAttributes::new();
            raw.insert("scope".into(), best.scope.clone().into());
            if let Some(id) = &best.matched_id {
                raw.insert("matched_id".into(), id.clone().into());
            }
            if let Some(name) = &best.matched_name {
                raw.insert("matched_name".into(), name.clone().into());
            }
            if !best.properties.is_empty() {
                raw.insert(
                    "properties".into(),
                    serde_json::Value::Object(best.properties.clone().into_iter().collect()),
                );
            }
            let sanitized = sanitize_attributes(&raw, &result.node_id);
            for (key, value) in sanitized {
                node.attributes.insert(format!("{}.{}", ATTRIBUTE_PREFIX, key), value);
            }
        }
    }

    info!(
        jurisdiction = graph.jurisdiction(),
        attached = stats.attached,
        sanctioned = stats.sanctioned,
        unknown = stats.unknown,
        "Attached screening scores"
    );
    (graph, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use procurement_types::{AttrValue, Roles};
    use serde_json::json;

    fn company(id: &str, name: &str) -> Node {
        Node::new(id, NodeKind::Company)
            .with_name(Some(name.into()))
            .with_jurisdiction(Some("GB".into()))
    }

    #[test]
    fn test_query_from_company_node() {
        let mut attrs = crate::graph::Attributes::new();
        attrs.insert("City".into(), AttrValue::from("London"));
        attrs.insert("postcode".into(), AttrValue::from("nan"));
        let node = company("GB123", "Acme Ltd").with_attributes(attrs);

        let query = ScreeningQuery::from_node(&node).unwrap();
        assert_eq!(query.schema, EntitySchema::Company);
        assert_eq!(query.registration_number.as_deref(), Some("GB123"));
        assert_eq!(query.town.as_deref(), Some("London"));
        assert_eq!(query.postal_code, None);
    }

    #[test]
    fn test_query_skips_procurements_unmatched_and_placeholder_names() {
        assert!(ScreeningQuery::from_node(&Node::new("P", NodeKind::Procurement)).is_none());
        let unmatched = company("unmatched:foo", "Foo").with_roles(Roles::unmatched_winner());
        assert!(ScreeningQuery::from_node(&unmatched).is_none());
        assert!(ScreeningQuery::from_node(&company("GB1", "Unknown")).is_none());
    }

    #[test]
    fn test_person_query_has_no_registration_number() {
        let node = Node::new("P1", NodeKind::Person).with_name(Some("Jane Roe".into()));
        let query = ScreeningQuery::from_node(&node).unwrap();
        assert_eq!(query.schema, EntitySchema::Person);
        assert_eq!(query.registration_number, None);
    }

    #[test]
    fn test_attach_scores_sets_roles_and_attributes() {
        let mut graph = OwnershipGraph::new("GB");
        graph.upsert_node(company("A", "Alpha"));
        graph.upsert_node(company("B", "Beta"));
        graph.upsert_node(company("C", "Gamma"));

        let mut properties = RowAttributes::new();
        properties.insert("country".into(), json!(["ru", "cy"]));
        properties.insert("notes".into(), json!(null));
        let results = vec![
            ScreeningResult {
                node_id: "A".into(),
                status: ScreeningStatus::Matched,
                score: Some(0.92),
                best: Some(ScopeMatch {
                    scope: "sanctions".into(),
                    score: 0.92,
                    matched_id: Some("NK-1".into()),
                    matched_name: Some("ALPHA LLC".into()),
                    properties,
                }),
                failed_scopes: vec![],
                error: None,
            },
            ScreeningResult {
                node_id: "B".into(),
                status: ScreeningStatus::Unknown,
                score: None,
                best: None,
                failed_scopes: vec!["peps".into()],
                error: Some("timeout".into()),
            },
            ScreeningResult {
                node_id: "Z".into(),
                status: ScreeningStatus::NoMatch,
                score: Some(0.0),
                best: None,
                failed_scopes: vec![],
                error: None,
            },
        ];

        let (graph, stats) = attach_scores(graph, &results, DEFAULT_SANCTION_THRESHOLD);
        assert_eq!(stats.attached, 2);
        assert_eq!(stats.missing, 1);
        assert_eq!(stats.sanctioned, 1);

        let a = graph.get("A").unwrap();
        assert!(a.roles.sanctioned);
        assert_eq!(a.risk_score, Some(0.92));
        assert_eq!(a.attributes["screening.scope"], AttrValue::from("sanctions"));
        assert_eq!(a.attributes["screening.properties.country"], AttrValue::from("ru; cy"));
        assert!(!a.attributes.contains_key("screening.properties.notes"));

        let b = graph.get("B").unwrap();
        assert_eq!(b.risk_score, None);
        assert_eq!(b.screening, Some(ScreeningStatus::Unknown));
        assert!(graph.get("C").unwrap().screening.is_none());
    }
}
