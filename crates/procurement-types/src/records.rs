//! Input records
//!
//! One struct per table kind. Optional fields are optional in the source
//! data; loaders decide which missing values make a row unusable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Free-form attributes carried from a source row. Values may be nested
/// when the source is JSON; the graph builder flattens them.
pub type RowAttributes = BTreeMap<String, serde_json::Value>;

/// A named entity from a base or candidate table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Zero-based data row index within the source table
    pub row: usize,
    /// Source table label, used for first-seen ordering across tables
    pub source: String,
    pub name: Option<String>,
    pub jurisdiction: Option<String>,
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: RowAttributes,
}

impl EntityRecord {
    pub fn new(row: usize, source: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            row,
            source: source.into(),
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }
}

/// One contract award row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcurementRow {
    pub row: usize,
    /// Award or notice identifier; rows sharing it form one procurement
    pub contract_id: Option<String>,
    pub winner_name: Option<String>,
    /// Resolved winner identifier, filled from the match table
    pub winner_id: Option<String>,
    pub jurisdiction: String,
    /// Contract value in a single currency
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: RowAttributes,
}

impl ProcurementRow {
    /// Base entity view of the winner, used as resolver input
    pub fn winner_record(&self, source: &str) -> EntityRecord {
        EntityRecord {
            row: self.row,
            source: source.to_string(),
            name: self.winner_name.clone(),
            jurisdiction: Some(self.jurisdiction.clone()),
            identifier: None,
            attributes: RowAttributes::new(),
        }
    }
}

/// First-level shareholder of a company
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShareholderRow {
    pub row: usize,
    /// Identifier of the owned company
    pub company_id: String,
    pub shareholder_id: String,
    pub shareholder_name: Option<String>,
    pub jurisdiction: Option<String>,
    pub is_person: bool,
    /// Ownership percentage in [0, 100]
    pub ownership_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: RowAttributes,
}

/// First-level subsidiary of a company
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubsidiaryRow {
    pub row: usize,
    /// Identifier of the parent company
    pub company_id: String,
    pub subsidiary_id: String,
    pub subsidiary_name: Option<String>,
    pub jurisdiction: Option<String>,
    pub ownership_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: RowAttributes,
}
