//! Column mappings for the input tables
//!
//! Defaults follow the TED award export and the Orbis ownership exports.
//! Any column can be renamed in the `columns` section of the pipeline
//! config:
//!
//! ```yaml
//! columns:
//!   procurement:
//!     winner_name: "WIN_NAME"
//!     value: ["AWARD_VALUE_EURO_FIN_1", "AWARD_VALUE_EURO"]
//!   shareholders:
//!     direct_pct: "shareholderdirect"
//! ```

use serde::{Deserialize, Serialize};

/// All table mappings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ColumnsConfig {
    pub procurement: ProcurementColumns,
    pub candidates: CandidateColumns,
    pub shareholders: ShareholderColumns,
    pub subsidiaries: SubsidiaryColumns,
}

/// Contract award table
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcurementColumns {
    /// Award identifier; rows sharing it are one procurement
    pub contract_id: Option<String>,
    pub winner_name: String,
    pub jurisdiction: String,
    /// Value columns tried in order; the first parseable one wins
    pub value: Vec<String>,
    /// Extra columns copied verbatim into node attributes
    pub attributes: Vec<String>,
}

impl Default for ProcurementColumns {
    fn default() -> Self {
        Self {
            contract_id: Some("ID_AWARD".to_string()),
            winner_name: "WIN_NAME".to_string(),
            jurisdiction: "WIN_COUNTRY_CODE".to_string(),
            value: vec![
                "AWARD_VALUE_EURO_FIN_1".to_string(),
                "AWARD_EST_VALUE_EURO".to_string(),
                "AWARD_VALUE_EURO".to_string(),
            ],
            attributes: Vec::new(),
        }
    }
}

/// Company register table searched for winner names
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CandidateColumns {
    pub identifier: String,
    pub name: String,
    pub jurisdiction: Option<String>,
    pub attributes: Vec<String>,
}

impl Default for CandidateColumns {
    fn default() -> Self {
        Self {
            identifier: "bvdidnumber".to_string(),
            name: "name".to_string(),
            jurisdiction: None,
            attributes: Vec::new(),
        }
    }
}

/// First-level shareholders table
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShareholderColumns {
    pub company_id: String,
    pub shareholder_id: String,
    pub shareholder_name: String,
    /// A non-empty value marks the shareholder as a natural person
    pub first_name: Option<String>,
    pub jurisdiction: Option<String>,
    pub direct_pct: Option<String>,
    pub total_pct: Option<String>,
    pub attributes: Vec<String>,
}

impl Default for ShareholderColumns {
    fn default() -> Self {
        Self {
            company_id: "bvdidnumber".to_string(),
            shareholder_id: "shareholderbvdidnumber".to_string(),
            shareholder_name: "shareholdername".to_string(),
            first_name: Some("shareholderfirstname".to_string()),
            jurisdiction: Some("shareholdercountryisocode".to_string()),
            direct_pct: Some("shareholderdirect".to_string()),
            total_pct: Some("shareholdertotal".to_string()),
            attributes: Vec::new(),
        }
    }
}

/// First-level subsidiaries table
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubsidiaryColumns {
    pub company_id: String,
    pub subsidiary_id: String,
    pub subsidiary_name: String,
    pub jurisdiction: Option<String>,
    pub direct_pct: Option<String>,
    pub total_pct: Option<String>,
    pub attributes: Vec<String>,
}

impl Default for SubsidiaryColumns {
    fn default() -> Self {
        Self {
            company_id: "bvdidnumber".to_string(),
            subsidiary_id: "subsidiarybvdidnumber".to_string(),
            subsidiary_name: "subsidiaryname".to_string(),
            jurisdiction: Some("subsidiarycountryisocode".to_string()),
            direct_pct: Some("subsidiarydirect".to_string()),
            total_pct: Some("subsidiarytotal".to_string()),
            attributes: Vec::new(),
        }
    }
}
