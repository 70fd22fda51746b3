//! Shared types for procurement-risk
//!
//! Records read from input tables, the resolution output, and the small
//! vocabulary the ownership graph is written in. Everything that is
//! persisted (snapshots, checkpoints, output tables) is expressed in
//! these types so the on-disk formats have one definition.
//!
//! ## Rules
//!
//! 1. Input records are never mutated after loading; downstream stages
//!    enrich copies or graph nodes instead.
//! 2. Enums serialize as snake_case strings, relations as upper-case labels.

pub mod records;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use records::*;

// ============================================================================
// RESOLUTION
// ============================================================================

/// How a base entity was linked to its candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy,
}

impl MatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchKind::Exact => "exact",
            MatchKind::Fuzzy => "fuzzy",
        }
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resolved base entity. At most one exists per base row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Row index of the base entity in its table
    pub base_row: usize,
    pub base_name: String,
    /// Row index of the chosen candidate in its source table
    pub candidate_row: usize,
    pub candidate_source: String,
    pub candidate_name: String,
    /// Identifier carried by the candidate; becomes the graph node id
    pub identifier: String,
    /// Similarity in [0, 1]; exact matches are 1.0
    pub similarity: f64,
    pub kind: MatchKind,
}

// ============================================================================
// GRAPH VOCABULARY
// ============================================================================

/// What a graph node represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Procurement,
    Company,
    Person,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Procurement => "procurement",
            NodeKind::Company => "company",
            NodeKind::Person => "person",
        }
    }

    /// Entities are the nodes that can be screened and carry risk
    pub fn is_entity(&self) -> bool {
        !matches!(self, NodeKind::Procurement)
    }
}

/// Edge relation. Ownership relations point from owner to owned entity;
/// `Won` points from contract to winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Relation {
    Won,
    Owns,
    Controls,
    SubsidiaryOf,
}

impl Relation {
    pub const ALL: [Relation; 4] = [
        Relation::Won,
        Relation::Owns,
        Relation::Controls,
        Relation::SubsidiaryOf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Won => "WON",
            Relation::Owns => "OWNS",
            Relation::Controls => "CONTROLS",
            Relation::SubsidiaryOf => "SUBSIDIARY_OF",
        }
    }

    pub fn is_ownership(&self) -> bool {
        !matches!(self, Relation::Won)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role flags accumulated on a node across runs. Merging is a bitwise OR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Roles {
    pub winner: bool,
    pub shareholder: bool,
    pub subsidiary: bool,
    pub sanctioned: bool,
    pub unmatched: bool,
}

impl Roles {
    pub fn winner() -> Self {
        Self {
            winner: true,
            ..Self::default()
        }
    }

    pub fn unmatched_winner() -> Self {
        Self {
            winner: true,
            unmatched: true,
            ..Self::default()
        }
    }

    pub fn shareholder() -> Self {
        Self {
            shareholder: true,
            ..Self::default()
        }
    }

    pub fn subsidiary() -> Self {
        Self {
            subsidiary: true,
            ..Self::default()
        }
    }

    pub fn merge(&mut self, other: Roles) {
        self.winner |= other.winner;
        self.shareholder |= other.shareholder;
        self.subsidiary |= other.subsidiary;
        self.sanctioned |= other.sanctioned;
        self.unmatched |= other.unmatched;
    }
}

/// Scalar attribute value. Graph attributes are restricted to scalars so
/// snapshots stay flat and loadable by any tabular tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Flag(bool),
    Number(f64),
    Text(String),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttrValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Flag(b) => write!(f, "{}", b),
            AttrValue::Number(n) => write!(f, "{}", n),
            AttrValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Text(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Text(s)
    }
}

impl From<f64> for AttrValue {
    fn from(n: f64) -> Self {
        AttrValue::Number(n)
    }
}

impl From<bool> for AttrValue {
    fn from(b: bool) -> Self {
        AttrValue::Flag(b)
    }
}

/// Outcome of screening one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreeningStatus {
    /// At least one scope returned a hit
    Matched,
    /// Every scope answered with no hit
    NoMatch,
    /// A scope could not be screened after retries
    Unknown,
}

// ============================================================================
// SNAPSHOT STAGES
// ============================================================================

/// Named pipeline stage a snapshot was written after
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initial,
    Expanded,
    Screened,
    Final,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Initial, Stage::Expanded, Stage::Screened, Stage::Final];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initial => "initial",
            Stage::Expanded => "expanded",
            Stage::Screened => "screened",
            Stage::Final => "final",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_labels_serialize_upper_case() {
        let json = serde_json::to_string(&Relation::SubsidiaryOf).unwrap();
        assert_eq!(json, "\"SUBSIDIARY_OF\"");
        assert_eq!(Relation::Won.to_string(), "WON");
    }

    #[test]
    fn test_roles_merge_is_union() {
        let mut roles = Roles::winner();
        roles.merge(Roles::shareholder());
        assert!(roles.winner);
        assert!(roles.shareholder);
        assert!(!roles.sanctioned);
    }

    #[test]
    fn test_attr_value_untagged_roundtrip() {
        let values = vec![
            AttrValue::Flag(true),
            AttrValue::Number(0.5),
            AttrValue::Text("GB".into()),
        ];
        let json = serde_json::to_string(&values).unwrap();
        assert_eq!(json, "[true,0.5,\"GB\"]");
        let back: Vec<AttrValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_stage_parse() {
        assert_eq!("screened".parse::<Stage>().unwrap(), Stage::Screened);
        assert!("done".parse::<Stage>().is_err());
    }
}
