//! Entity resolution
//!
//! Links base entities (procurement winners) to candidate entities
//! (company register rows) that share no identifier. An exact pass on
//! the normalized name and numeric key runs first; names it leaves
//! unresolved go through a prefix-filtered fuzzy pass on a worker pool.
//! Exact results are never revisited by the fuzzy pass.

pub mod exact;
pub mod fuzzy;
pub mod normalize;
pub mod pool;

use std::collections::HashMap;
use std::fmt;

use procurement_types::{EntityRecord, MatchKind, MatchRecord};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use exact::ExactIndex;
use fuzzy::{FuzzyHit, FuzzyParams, PrefixIndex, SimilarityMetric, DEFAULT_SIMILARITY_THRESHOLD};
use normalize::{NormalizedName, Normalizer, LEGAL_SUFFIXES};

// ============================================================================
// Configuration
// ============================================================================

/// Which unresolved names enter the fuzzy pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuzzyScope {
    /// Every name the exact pass left unresolved
    #[default]
    Unresolved,
    /// Only unresolved names that needed transliteration
    TransliteratedOnly,
}

/// Resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Minimum similarity for a fuzzy match (inclusive)
    pub similarity_threshold: f64,
    pub similarity: SimilarityMetric,
    pub fuzzy_scope: FuzzyScope,
    /// Characters compared by the fuzzy pre-filter
    pub prefix_len: usize,
    /// Names at most this many characters long are matched exactly only
    pub short_name_len: usize,
    /// Fuzzy worker threads
    pub workers: usize,
    /// Base names per worker job
    pub chunk_size: usize,
    /// Candidate identifiers must start with the base jurisdiction code
    pub require_country_prefix: bool,
    pub legal_suffixes: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            similarity: SimilarityMetric::default(),
            fuzzy_scope: FuzzyScope::default(),
            prefix_len: 3,
            short_name_len: 3,
            workers: 4,
            chunk_size: pool::DEFAULT_CHUNK_SIZE,
            require_country_prefix: false,
            legal_suffixes: LEGAL_SUFFIXES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ============================================================================
// Prepared inputs
// ============================================================================

/// Candidate that survived validation
#[derive(Debug, Clone)]
pub struct PreparedCandidate {
    /// Position in the caller's candidate slice
    pub source_pos: usize,
    pub name: NormalizedName,
    pub identifier: String,
}

/// Base entity that survived validation
#[derive(Debug, Clone)]
pub struct PreparedBase {
    /// Position in the caller's base slice
    pub source_pos: usize,
    pub name: NormalizedName,
    /// Upper-cased two letter country code, if known
    pub country: Option<String>,
}

impl PreparedBase {
    /// Country prefix rule for identifiers such as `GB01234567`
    pub fn accepts_identifier(&self, identifier: &str) -> bool {
        match &self.country {
            Some(country) => identifier
                .get(..country.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(country)),
            None => true,
        }
    }
}

// ============================================================================
// Output
// ============================================================================

/// Resolution counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionStats {
    pub base_total: usize,
    /// Base rows without a usable name
    pub base_skipped: usize,
    pub candidates_total: usize,
    /// Candidate rows without a usable name or identifier
    pub candidates_skipped: usize,
    pub exact: usize,
    pub fuzzy: usize,
    pub unmatched: usize,
}

impl ResolutionStats {
    pub fn matched(&self) -> usize {
        self.exact + self.fuzzy
    }
}

impl fmt::Display for ResolutionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Entity Resolution:")?;
        writeln!(
            f,
            "  Base entities:      {} ({} skipped)",
            self.base_total, self.base_skipped
        )?;
        writeln!(
            f,
            "  Candidates:         {} ({} skipped)",
            self.candidates_total, self.candidates_skipped
        )?;
        writeln!(f, "  Exact matches:      {}", self.exact)?;
        writeln!(f, "  Fuzzy matches:      {}", self.fuzzy)?;
        writeln!(f, "  Unmatched:          {}", self.unmatched)?;
        Ok(())
    }
}

/// Result of one resolution run. Every base row appears in exactly one of
/// `matches`, `unmatched` or `skipped`.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// At most one per base row, in base order
    pub matches: Vec<MatchRecord>,
    /// Base rows with a usable name but no match
    pub unmatched: Vec<usize>,
    /// Base rows without a usable name
    pub skipped: Vec<usize>,
    pub stats: ResolutionStats,
}

impl Resolution {
    /// Matches keyed by base row
    pub fn by_base_row(&self) -> HashMap<usize, &MatchRecord> {
        self.matches.iter().map(|m| (m.base_row, m)).collect()
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Exact-then-fuzzy entity resolver
#[derive(Debug, Clone)]
pub struct Resolver {
    config: ResolverConfig,
    normalizer: Normalizer,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

impl Resolver {
    pub fn new(config: ResolverConfig) -> Self {
        let normalizer = Normalizer::new(config.legal_suffixes.iter().map(String::as_str));
        Self { config, normalizer }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Resolve every base entity against the candidates. Candidate order
    /// (table order, then row order) decides ties.
    pub fn resolve(&self, base: &[EntityRecord], candidates: &[EntityRecord]) -> Resolution {
        let mut stats = ResolutionStats {
            base_total: base.len(),
            candidates_total: candidates.len(),
            ..ResolutionStats::default()
        };

        let prepared_candidates = self.prepare_candidates(candidates, &mut stats);
        let (prepared_base, skipped) = self.prepare_base(base);
        stats.base_skipped = skipped.len();

        // Exact pass
        let exact_index = ExactIndex::build(&prepared_candidates);
        let mut outcomes: Vec<Option<(usize, f64, MatchKind)>> = vec![None; prepared_base.len()];
        let mut pending: Vec<usize> = Vec::new();

        for (i, entry) in prepared_base.iter().enumerate() {
            let hit = exact_index
                .lookup(&entry.name)
                .iter()
                .copied()
                .find(|&pos| self.eligible(entry, &prepared_candidates[pos]));
            match hit {
                Some(pos) => outcomes[i] = Some((pos, 1.0, MatchKind::Exact)),
                None if self.fuzzy_eligible(entry) => pending.push(i),
                None => {}
            }
        }
        debug!(
            exact_keys = exact_index.len(),
            pending = pending.len(),
            "Exact pass complete"
        );

        // Fuzzy pass over distinct pending names
        for (i, hit) in self.fuzzy_pass(&prepared_base, &pending, &prepared_candidates) {
            if let Some(hit) = hit {
                outcomes[i] = Some((hit.candidate, hit.similarity, MatchKind::Fuzzy));
            }
        }

        let mut resolution = Resolution {
            skipped,
            ..Resolution::default()
        };
        for (entry, outcome) in prepared_base.iter().zip(outcomes) {
            let record = &base[entry.source_pos];
            match outcome {
                Some((pos, similarity, kind)) => {
                    let candidate = &prepared_candidates[pos];
                    let source = &candidates[candidate.source_pos];
                    match kind {
                        MatchKind::Exact => stats.exact += 1,
                        MatchKind::Fuzzy => stats.fuzzy += 1,
                    }
                    resolution.matches.push(MatchRecord {
                        base_row: record.row,
                        base_name: record.name.clone().unwrap_or_default(),
                        candidate_row: source.row,
                        candidate_source: source.source.clone(),
                        candidate_name: source.name.clone().unwrap_or_default(),
                        identifier: candidate.identifier.clone(),
                        similarity,
                        kind,
                    });
                }
                None => {
                    stats.unmatched += 1;
                    resolution.unmatched.push(record.row);
                }
            }
        }

        resolution.stats = stats;
        info!(
            base = stats.base_total,
            exact = stats.exact,
            fuzzy = stats.fuzzy,
            unmatched = stats.unmatched,
            skipped = stats.base_skipped,
            "Entity resolution complete"
        );
        resolution
    }

    fn prepare_candidates(
        &self,
        candidates: &[EntityRecord],
        stats: &mut ResolutionStats,
    ) -> Vec<PreparedCandidate> {
        let mut prepared = Vec::with_capacity(candidates.len());
        for (source_pos, record) in candidates.iter().enumerate() {
            let identifier = record
                .identifier
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty());
            let name = record.name.as_deref().and_then(|n| self.normalizer.normalize(n));
            match (name, identifier) {
                (Some(name), Some(identifier)) => prepared.push(PreparedCandidate {
                    source_pos,
                    name,
                    identifier: identifier.to_string(),
                }),
                _ => {
                    debug!(source = %record.source, row = record.row, "Skipping malformed candidate");
                    stats.candidates_skipped += 1;
                }
            }
        }
        prepared
    }

    fn prepare_base(&self, base: &[EntityRecord]) -> (Vec<PreparedBase>, Vec<usize>) {
        let mut prepared = Vec::with_capacity(base.len());
        let mut skipped = Vec::new();
        for (source_pos, record) in base.iter().enumerate() {
            match record.name.as_deref().and_then(|n| self.normalizer.normalize(n)) {
                Some(name) => prepared.push(PreparedBase {
                    source_pos,
                    name,
                    country: self.country_of(record),
                }),
                None => {
                    debug!(source = %record.source, row = record.row, "Skipping base entity without name");
                    skipped.push(record.row);
                }
            }
        }
        (prepared, skipped)
    }

    fn country_of(&self, record: &EntityRecord) -> Option<String> {
        if !self.config.require_country_prefix {
            return None;
        }
        record
            .jurisdiction
            .as_deref()
            .and_then(|j| j.trim().get(..2))
            .map(str::to_uppercase)
    }

    fn eligible(&self, base: &PreparedBase, candidate: &PreparedCandidate) -> bool {
        !self.config.require_country_prefix || base.accepts_identifier(&candidate.identifier)
    }

    fn fuzzy_eligible(&self, entry: &PreparedBase) -> bool {
        if entry.name.char_len() <= self.config.short_name_len {
            return false;
        }
        match self.config.fuzzy_scope {
            FuzzyScope::Unresolved => true,
            FuzzyScope::TransliteratedOnly => entry.name.transliterated,
        }
    }

    /// Score each distinct pending name once, then fan results back out
    /// to every base position carrying that name.
    fn fuzzy_pass(
        &self,
        prepared_base: &[PreparedBase],
        pending: &[usize],
        candidates: &[PreparedCandidate],
    ) -> Vec<(usize, Option<FuzzyHit>)> {
        if pending.is_empty() || candidates.is_empty() {
            return pending.iter().map(|&i| (i, None)).collect();
        }

        let mut distinct: Vec<usize> = Vec::new();
        let mut slot_of: HashMap<(&NormalizedName, Option<&str>), usize> = HashMap::new();
        let mut slots: Vec<usize> = Vec::with_capacity(pending.len());
        for &i in pending {
            let entry = &prepared_base[i];
            let key = (&entry.name, entry.country.as_deref());
            let slot = *slot_of.entry(key).or_insert_with(|| {
                distinct.push(i);
                distinct.len() - 1
            });
            slots.push(slot);
        }

        let index = PrefixIndex::build(candidates, self.config.prefix_len);
        let params = FuzzyParams {
            metric: self.config.similarity,
            threshold: self.config.similarity_threshold,
            require_country_prefix: self.config.require_country_prefix,
        };
        let hits = pool::map_ordered(
            &distinct,
            self.config.workers,
            self.config.chunk_size,
            |&i| fuzzy::best_match(&prepared_base[i], candidates, &index, &params),
        );
        debug!(
            pending = pending.len(),
            distinct = distinct.len(),
            hits = hits.iter().filter(|h| h.is_some()).count(),
            "Fuzzy pass complete"
        );

        pending
            .iter()
            .zip(slots)
            .map(|(&i, slot)| (i, hits[slot]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(names: &[&str]) -> Vec<EntityRecord> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| EntityRecord::new(i, "awards", *n))
            .collect()
    }

    fn candidates(rows: &[(&str, &str)]) -> Vec<EntityRecord> {
        rows.iter()
            .enumerate()
            .map(|(i, (n, id))| EntityRecord::new(i, "register", *n).with_identifier(*id))
            .collect()
    }

    #[test]
    fn test_acme_globex_scenario() {
        let resolver = Resolver::default();
        let result = resolver.resolve(
            &base(&["ACME Inc", "Acme Incorporated", "Globex LLC"]),
            &candidates(&[("acme", "ID1"), ("globex", "ID2")]),
        );

        assert_eq!(result.matches.len(), 3);
        let m = result.by_base_row();
        assert_eq!(m[&0].identifier, "ID1");
        assert_eq!(m[&0].kind, MatchKind::Exact);
        assert_eq!(m[&0].similarity, 1.0);
        assert_eq!(m[&1].identifier, "ID1");
        assert_eq!(m[&1].kind, MatchKind::Fuzzy);
        assert!(m[&1].similarity >= 0.8);
        assert_eq!(m[&2].identifier, "ID2");
        assert_eq!(m[&2].kind, MatchKind::Exact);
        assert_eq!(result.stats.exact, 2);
        assert_eq!(result.stats.fuzzy, 1);
    }

    #[test]
    fn test_exact_beats_better_looking_fuzzy() {
        // "acmee" comes first in candidate order and clears the fuzzy
        // threshold, but the exact key must win.
        let result = Resolver::default().resolve(
            &base(&["Acme Ltd"]),
            &candidates(&[("Acmee", "ID9"), ("ACME", "ID1")]),
        );
        assert_eq!(result.matches[0].identifier, "ID1");
        assert_eq!(result.matches[0].kind, MatchKind::Exact);
    }

    #[test]
    fn test_first_seen_candidate_wins_exact_ties() {
        let result = Resolver::default().resolve(
            &base(&["Globex"]),
            &candidates(&[("Globex Corp", "ID2"), ("globex", "ID3")]),
        );
        assert_eq!(result.matches[0].identifier, "ID2");
    }

    #[test]
    fn test_numbers_must_agree() {
        let result = Resolver::default().resolve(
            &base(&["Acme Holdings 2"]),
            &candidates(&[("Acme Holdings 1", "ID1")]),
        );
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched, vec![0]);
    }

    #[test]
    fn test_below_threshold_is_unmatched_not_error() {
        let config = ResolverConfig {
            similarity: SimilarityMetric::NormalizedLevenshtein,
            ..ResolverConfig::default()
        };
        let result = Resolver::new(config).resolve(
            &base(&["Acme Widgets International"]),
            &candidates(&[("acme", "ID1")]),
        );
        assert!(result.matches.is_empty());
        assert_eq!(result.stats.unmatched, 1);
    }

    #[test]
    fn test_malformed_rows_are_counted() {
        let mut b = base(&["Acme"]);
        b.push(EntityRecord {
            row: 1,
            source: "awards".into(),
            ..EntityRecord::default()
        });
        let mut c = candidates(&[("acme", "ID1")]);
        c.push(EntityRecord::new(1, "register", "No Id Ltd"));

        let result = Resolver::default().resolve(&b, &c);
        assert_eq!(result.stats.base_skipped, 1);
        assert_eq!(result.skipped, vec![1]);
        assert_eq!(result.stats.candidates_skipped, 1);
        assert_eq!(result.matches.len(), 1);
    }

    #[test]
    fn test_short_names_are_exact_only() {
        let result = Resolver::default().resolve(&base(&["ABX"]), &candidates(&[("ABC", "ID1")]));
        assert!(result.matches.is_empty());
    }

    #[test]
    fn test_transliterated_only_scope() {
        let config = ResolverConfig {
            fuzzy_scope: FuzzyScope::TransliteratedOnly,
            ..ResolverConfig::default()
        };
        let resolver = Resolver::new(config);
        let result = resolver.resolve(
            &base(&["Acme Incorporated", "Газпромм"]),
            &candidates(&[("acme", "ID1"), ("Gazprom", "RU1")]),
        );
        let m = result.by_base_row();
        assert!(!m.contains_key(&0));
        assert_eq!(m[&1].identifier, "RU1");
        assert_eq!(m[&1].kind, MatchKind::Fuzzy);
    }

    #[test]
    fn test_country_prefix_rule() {
        let config = ResolverConfig {
            require_country_prefix: true,
            ..ResolverConfig::default()
        };
        let b = vec![EntityRecord::new(0, "awards", "Acme").with_jurisdiction("FR")];
        let c = candidates(&[("acme", "GB0001"), ("acme", "FR0002")]);
        let result = Resolver::new(config).resolve(&b, &c);
        assert_eq!(result.matches[0].identifier, "FR0002");
    }

    #[test]
    fn test_fuzzy_same_for_any_worker_count() {
        let names: Vec<String> = (0..600)
            .map(|i| format!("Company Number {} Trading", i % 50))
            .chain((0..300).map(|i| format!("Holding Group {} Services", i % 30)))
            .collect();
        let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let cands: Vec<(String, String)> = (0..50)
            .map(|i| (format!("Company Number {} Trade", i), format!("C{i}")))
            .chain((0..30).map(|i| (format!("Holding Grp {} Service", i), format!("H{i}"))))
            .collect();
        let cand_refs: Vec<(&str, &str)> =
            cands.iter().map(|(n, id)| (n.as_str(), id.as_str())).collect();

        let run = |workers: usize| {
            let config = ResolverConfig {
                workers,
                chunk_size: 8,
                ..ResolverConfig::default()
            };
            Resolver::new(config)
                .resolve(&base(&name_refs), &candidates(&cand_refs))
                .matches
        };

        let single = run(1);
        assert!(!single.is_empty());
        assert_eq!(run(4), single);
        assert_eq!(run(16), single);
    }
}
