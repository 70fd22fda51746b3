//! Input table loading
//!
//! Loads the four CSV inputs (contract awards, company register,
//! shareholders, subsidiaries) through the column mappings in
//! [`columns`]. A missing required column fails the whole table with
//! [`TableError::MissingColumns`]. Rows that cannot be used are returned
//! in [`LoadedTable::skipped`] with a reason, never dropped silently.

pub mod columns;
pub mod parse;

use std::collections::HashMap;
use std::io;
use std::path::Path;

use csv::StringRecord;
use procurement_types::{EntityRecord, ProcurementRow, RowAttributes, ShareholderRow, SubsidiaryRow};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::TableError;

pub use columns::{
    CandidateColumns, ColumnsConfig, ProcurementColumns, ShareholderColumns, SubsidiaryColumns,
};
use parse::{parse_amount, parse_percentage};

/// A row the loader could not use
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRow {
    pub row: usize,
    pub reason: String,
}

/// Parsed rows plus the rows that were skipped
#[derive(Debug, Clone)]
pub struct LoadedTable<T> {
    pub rows: Vec<T>,
    pub skipped: Vec<SkippedRow>,
}

impl<T> LoadedTable<T> {
    pub fn total(&self) -> usize {
        self.rows.len() + self.skipped.len()
    }
}

impl<T> Default for LoadedTable<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

// ============================================================================
// Row access
// ============================================================================

struct HeaderIndex {
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    fn new(headers: &StringRecord) -> Self {
        let positions = headers
            .iter()
            .enumerate()
            .map(|(idx, h)| (h.trim().to_string(), idx))
            .collect();
        Self { positions }
    }

    fn has(&self, column: &str) -> bool {
        self.positions.contains_key(column)
    }

    fn missing<'a>(&self, required: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        required
            .into_iter()
            .filter(|col| !self.has(col))
            .map(str::to_string)
            .collect()
    }
}

/// One data row with header lookup. Empty cells read as `None`.
struct Fields<'a> {
    headers: &'a HeaderIndex,
    record: &'a StringRecord,
}

impl<'a> Fields<'a> {
    fn get(&self, column: &str) -> Option<&'a str> {
        self.headers
            .positions
            .get(column)
            .and_then(|idx| self.record.get(*idx))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn get_opt(&self, column: Option<&String>) -> Option<&'a str> {
        column.and_then(|col| self.get(col))
    }

    fn attributes(&self, columns: &[String]) -> RowAttributes {
        columns
            .iter()
            .filter_map(|col| {
                self.get(col)
                    .map(|v| (col.clone(), Value::String(v.to_string())))
            })
            .collect()
    }
}

fn open_reader(table: &'static str, path: &Path) -> Result<csv::Reader<std::fs::File>, TableError> {
    csv::Reader::from_path(path).map_err(|source| TableError::Open {
        table,
        path: path.to_path_buf(),
        source,
    })
}

/// Shared loader loop: validates headers, then parses each record,
/// collecting parse failures as skipped rows.
fn load_rows<R, T, F>(
    mut reader: csv::Reader<R>,
    table: &'static str,
    path: &Path,
    required: &[&str],
    mut parse_row: F,
) -> Result<LoadedTable<T>, TableError>
where
    R: io::Read,
    F: FnMut(usize, &Fields<'_>) -> Result<T, String>,
{
    let headers = HeaderIndex::new(reader.headers()?);
    let missing = headers.missing(required.iter().copied());
    if !missing.is_empty() {
        return Err(TableError::MissingColumns {
            table,
            path: path.to_path_buf(),
            missing,
        });
    }

    let mut loaded = LoadedTable::default();
    for (row, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(table, row, error = %e, "Skipping unreadable row");
                loaded.skipped.push(SkippedRow {
                    row,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let fields = Fields {
            headers: &headers,
            record: &record,
        };
        match parse_row(row, &fields) {
            Ok(parsed) => loaded.rows.push(parsed),
            Err(reason) => {
                warn!(table, row, reason = %reason, "Skipping row");
                loaded.skipped.push(SkippedRow { row, reason });
            }
        }
    }

    info!(
        table,
        path = %path.display(),
        rows = loaded.rows.len(),
        skipped = loaded.skipped.len(),
        "Loaded table"
    );
    Ok(loaded)
}

// ============================================================================
// Procurement awards
// ============================================================================

pub fn load_procurements(
    path: &Path,
    columns: &ProcurementColumns,
) -> Result<LoadedTable<ProcurementRow>, TableError> {
    let reader = open_reader("procurement", path)?;
    read_procurements(reader, path, columns)
}

/// Parse award rows from any reader. A row keeps a missing winner name
/// (the resolver counts it); a missing jurisdiction skips the row.
pub fn read_procurements<R: io::Read>(
    reader: csv::Reader<R>,
    path: &Path,
    columns: &ProcurementColumns,
) -> Result<LoadedTable<ProcurementRow>, TableError> {
    let mut required = vec![columns.winner_name.as_str(), columns.jurisdiction.as_str()];
    if let Some(col) = &columns.contract_id {
        required.push(col.as_str());
    }

    // At least one of the value columns must exist
    let mut reader = reader;
    let headers = HeaderIndex::new(reader.headers()?);
    if !columns.value.is_empty() && !columns.value.iter().any(|c| headers.has(c)) {
        return Err(TableError::MissingColumns {
            table: "procurement",
            path: path.to_path_buf(),
            missing: columns.value.clone(),
        });
    }

    load_rows(reader, "procurement", path, &required, |row, fields| {
        let jurisdiction = fields
            .get(&columns.jurisdiction)
            .ok_or_else(|| format!("missing {}", columns.jurisdiction))?;
        let value = columns
            .value
            .iter()
            .filter_map(|col| fields.get(col))
            .find_map(parse_amount);

        Ok(ProcurementRow {
            row,
            contract_id: fields.get_opt(columns.contract_id.as_ref()).map(str::to_string),
            winner_name: fields.get(&columns.winner_name).map(str::to_string),
            winner_id: None,
            jurisdiction: jurisdiction.to_uppercase(),
            value,
            attributes: fields.attributes(&columns.attributes),
        })
    })
}

// ============================================================================
// Company register
// ============================================================================

pub fn load_candidates(
    path: &Path,
    source: &str,
    columns: &CandidateColumns,
) -> Result<LoadedTable<EntityRecord>, TableError> {
    let reader = open_reader("candidate", path)?;
    read_candidates(reader, path, source, columns)
}

/// Parse register rows. Rows missing a name or identifier are kept so
/// the resolver can count them as malformed candidates.
pub fn read_candidates<R: io::Read>(
    reader: csv::Reader<R>,
    path: &Path,
    source: &str,
    columns: &CandidateColumns,
) -> Result<LoadedTable<EntityRecord>, TableError> {
    let required = [columns.identifier.as_str(), columns.name.as_str()];
    load_rows(reader, "candidate", path, &required, |row, fields| {
        Ok(EntityRecord {
            row,
            source: source.to_string(),
            name: fields.get(&columns.name).map(str::to_string),
            jurisdiction: fields
                .get_opt(columns.jurisdiction.as_ref())
                .map(str::to_uppercase),
            identifier: fields.get(&columns.identifier).map(str::to_string),
            attributes: fields.attributes(&columns.attributes),
        })
    })
}

// ============================================================================
// Ownership tables
// ============================================================================

pub fn load_shareholders(
    path: &Path,
    columns: &ShareholderColumns,
) -> Result<LoadedTable<ShareholderRow>, TableError> {
    let reader = open_reader("shareholder", path)?;
    read_shareholders(reader, path, columns)
}

pub fn read_shareholders<R: io::Read>(
    reader: csv::Reader<R>,
    path: &Path,
    columns: &ShareholderColumns,
) -> Result<LoadedTable<ShareholderRow>, TableError> {
    let required = [columns.company_id.as_str(), columns.shareholder_id.as_str()];
    load_rows(reader, "shareholder", path, &required, |row, fields| {
        let company_id = fields
            .get(&columns.company_id)
            .ok_or_else(|| format!("missing {}", columns.company_id))?;
        let shareholder_id = fields
            .get(&columns.shareholder_id)
            .ok_or_else(|| format!("missing {}", columns.shareholder_id))?;

        Ok(ShareholderRow {
            row,
            company_id: company_id.to_string(),
            shareholder_id: shareholder_id.to_string(),
            shareholder_name: fields.get(&columns.shareholder_name).map(str::to_string),
            jurisdiction: fields
                .get_opt(columns.jurisdiction.as_ref())
                .map(str::to_uppercase),
            is_person: fields.get_opt(columns.first_name.as_ref()).is_some(),
            ownership_pct: stake(fields, &columns.direct_pct, &columns.total_pct),
            attributes: fields.attributes(&columns.attributes),
        })
    })
}

pub fn load_subsidiaries(
    path: &Path,
    columns: &SubsidiaryColumns,
) -> Result<LoadedTable<SubsidiaryRow>, TableError> {
    let reader = open_reader("subsidiary", path)?;
    read_subsidiaries(reader, path, columns)
}

pub fn read_subsidiaries<R: io::Read>(
    reader: csv::Reader<R>,
    path: &Path,
    columns: &SubsidiaryColumns,
) -> Result<LoadedTable<SubsidiaryRow>, TableError> {
    let required = [columns.company_id.as_str(), columns.subsidiary_id.as_str()];
    load_rows(reader, "subsidiary", path, &required, |row, fields| {
        let company_id = fields
            .get(&columns.company_id)
            .ok_or_else(|| format!("missing {}", columns.company_id))?;
        let subsidiary_id = fields
            .get(&columns.subsidiary_id)
            .ok_or_else(|| format!("missing {}", columns.subsidiary_id))?;

        Ok(SubsidiaryRow {
            row,
            company_id: company_id.to_string(),
            subsidiary_id: subsidiary_id.to_string(),
            subsidiary_name: fields.get(&columns.subsidiary_name).map(str::to_string),
            jurisdiction: fields
                .get_opt(columns.jurisdiction.as_ref())
                .map(str::to_uppercase),
            ownership_pct: stake(fields, &columns.direct_pct, &columns.total_pct),
            attributes: fields.attributes(&columns.attributes),
        })
    })
}

/// Direct stake, falling back to the total stake
fn stake(fields: &Fields<'_>, direct: &Option<String>, total: &Option<String>) -> Option<f64> {
    fields
        .get_opt(direct.as_ref())
        .and_then(parse_percentage)
        .or_else(|| fields.get_opt(total.as_ref()).and_then(parse_percentage))
}
