//! Fuzzy pass
//!
//! Two-stage approach:
//! 1. Prefix bucket - cheap candidate filtering on the first characters
//!    of the normalized name
//! 2. strsim similarity - accurate scoring on the surviving candidates
//!
//! Candidates must also carry the same numeric key as the base name.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{PreparedBase, PreparedCandidate};

/// Default acceptance threshold for fuzzy matches
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Similarity function used to score surviving candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMetric {
    #[default]
    JaroWinkler,
    NormalizedLevenshtein,
    SorensenDice,
}

impl SimilarityMetric {
    /// Similarity in [0, 1]
    pub fn score(&self, a: &str, b: &str) -> f64 {
        let raw = match self {
            SimilarityMetric::JaroWinkler => strsim::jaro_winkler(a, b),
            SimilarityMetric::NormalizedLevenshtein => strsim::normalized_levenshtein(a, b),
            SimilarityMetric::SorensenDice => strsim::sorensen_dice(a, b),
        };
        raw.clamp(0.0, 1.0)
    }
}

/// Best fuzzy candidate for one base name
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyHit {
    /// Position in the prepared candidate list
    pub candidate: usize,
    pub similarity: f64,
}

/// Candidate positions bucketed by name prefix
#[derive(Debug)]
pub struct PrefixIndex {
    prefix_len: usize,
    buckets: HashMap<String, Vec<usize>>,
}

impl PrefixIndex {
    pub fn build(candidates: &[PreparedCandidate], prefix_len: usize) -> Self {
        let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();
        for (pos, candidate) in candidates.iter().enumerate() {
            buckets
                .entry(candidate.name.prefix(prefix_len))
                .or_default()
                .push(pos);
        }
        Self {
            prefix_len,
            buckets,
        }
    }

    pub fn bucket(&self, base: &PreparedBase) -> &[usize] {
        self.buckets
            .get(&base.name.prefix(self.prefix_len))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Scoring parameters shared by every worker
#[derive(Debug, Clone, Copy)]
pub struct FuzzyParams {
    pub metric: SimilarityMetric,
    pub threshold: f64,
    pub require_country_prefix: bool,
}

/// Highest scoring candidate at or above the threshold. Ties keep the
/// earliest candidate, so the result only depends on the inputs.
pub fn best_match(
    base: &PreparedBase,
    candidates: &[PreparedCandidate],
    index: &PrefixIndex,
    params: &FuzzyParams,
) -> Option<FuzzyHit> {
    let mut best: Option<FuzzyHit> = None;

    for &pos in index.bucket(base) {
        let candidate = &candidates[pos];
        if candidate.name.numbers != base.name.numbers {
            continue;
        }
        if params.require_country_prefix && !base.accepts_identifier(&candidate.identifier) {
            continue;
        }

        let similarity = params.metric.score(&base.name.text, &candidate.name.text);
        if similarity < params.threshold {
            continue;
        }
        if best.map_or(true, |b| similarity > b.similarity) {
            best = Some(FuzzyHit {
                candidate: pos,
                similarity,
            });
        }
    }

    best
}
