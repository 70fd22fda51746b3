//! Exact pass: normalized name plus numeric key lookup

use std::collections::{BTreeSet, HashMap};

use super::normalize::NormalizedName;
use super::PreparedCandidate;

type ExactKey = (String, BTreeSet<String>);

/// Candidate positions grouped by exact key, in first-seen order
#[derive(Debug, Default)]
pub struct ExactIndex {
    by_key: HashMap<ExactKey, Vec<usize>>,
}

impl ExactIndex {
    pub fn build(candidates: &[PreparedCandidate]) -> Self {
        let mut by_key: HashMap<ExactKey, Vec<usize>> = HashMap::new();
        for (pos, candidate) in candidates.iter().enumerate() {
            by_key
                .entry((candidate.name.text.clone(), candidate.name.numbers.clone()))
                .or_default()
                .push(pos);
        }
        Self { by_key }
    }

    /// Candidate positions sharing the name's exact key
    pub fn lookup(&self, name: &NormalizedName) -> &[usize] {
        self.by_key
            .get(&(name.text.clone(), name.numbers.clone()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
