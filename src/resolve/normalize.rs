//! Name normalization for entity resolution
//!
//! Turns a raw company name into the comparison form used by both
//! matching passes:
//! - Unicode NFKC fold
//! - Transliteration of non-Latin scripts to ASCII
//! - Lowercase conversion
//! - Periods and apostrophes removed, other punctuation replaced by spaces
//! - Whitespace collapsed
//! - Trailing legal suffix tokens stripped
//!
//! Digit runs are collected into a separate numeric key. Two names only
//! match when their numeric keys are equal, so "Acme 1" never links to
//! "Acme 2" however similar the text is.

use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Legal suffixes stripped from the end of a name
pub const LEGAL_SUFFIXES: &[&str] = &["inc", "corp", "ltd", "llc", "company", "co", "sas"];

fn digit_runs() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[0-9]+").ok()).as_ref()
}

/// Comparison form of a name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedName {
    pub text: String,
    /// Digit runs found in the name
    pub numbers: BTreeSet<String>,
    /// The raw name contained non-Latin letters
    pub transliterated: bool,
}

impl NormalizedName {
    /// Length in characters
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// First `n` characters, used as the fuzzy pre-filter key
    pub fn prefix(&self, n: usize) -> String {
        self.text.chars().take(n).collect()
    }
}

/// Name normalizer with a configurable suffix list
#[derive(Debug, Clone)]
pub struct Normalizer {
    suffixes: HashSet<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(LEGAL_SUFFIXES.iter().copied())
    }
}

impl Normalizer {
    pub fn new<'a>(suffixes: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            suffixes: suffixes.into_iter().map(str::to_lowercase).collect(),
        }
    }

    /// Normalize a raw name. Returns `None` when nothing usable remains.
    ///
    /// ```
    /// use procurement_risk::resolve::normalize::Normalizer;
    ///
    /// let n = Normalizer::default();
    /// assert_eq!(n.normalize("ACME, Inc.").unwrap().text, "acme");
    /// assert_eq!(n.normalize("J.P. Morgan & Co").unwrap().text, "jp morgan");
    /// ```
    pub fn normalize(&self, raw: &str) -> Option<NormalizedName> {
        let folded: String = raw.nfkc().collect();

        let transliterated = folded.chars().any(|c| c.is_alphabetic() && !is_latin(c));
        let latin = if transliterated {
            deunicode::deunicode(&folded)
        } else {
            folded
        };

        let cleaned: String = latin
            .chars()
            .flat_map(char::to_lowercase)
            .filter(|c| !matches!(c, '.' | '\'' | '\u{2019}'))
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();

        let mut tokens: Vec<&str> = cleaned.split_whitespace().collect();
        // Keep at least one token so "Company Ltd" does not vanish
        while tokens.len() > 1 && tokens.last().is_some_and(|t| self.suffixes.contains(*t)) {
            tokens.pop();
        }
        if tokens.is_empty() {
            return None;
        }

        let text = tokens.join(" ");
        let numbers = digit_runs()
            .map(|re| re.find_iter(&text).map(|m| m.as_str().to_string()).collect())
            .unwrap_or_default();

        Some(NormalizedName {
            text,
            numbers,
            transliterated,
        })
    }
}

/// Latin letters: ASCII plus the Latin-1 Supplement and Latin Extended blocks
fn is_latin(c: char) -> bool {
    c.is_ascii_alphabetic()
        || ('\u{00C0}'..='\u{024F}').contains(&c)
        || ('\u{1E00}'..='\u{1EFF}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn norm(s: &str) -> String {
        Normalizer::default().normalize(s).map(|n| n.text).unwrap_or_default()
    }

    #[test]
    fn test_normalize_basic() {
        assert_eq!(norm("ACME Inc"), "acme");
        assert_eq!(norm("Globex LLC"), "globex");
        assert_eq!(norm("  Initech   Corp. "), "initech");
        assert_eq!(norm("Acme Incorporated"), "acme incorporated");
    }

    #[test]
    fn test_only_trailing_suffixes_stripped() {
        assert_eq!(norm("Co Operative Bank"), "co operative bank");
        assert_eq!(norm("Acme Co Ltd"), "acme");
        assert_eq!(norm("Company Ltd"), "company");
    }

    #[test]
    fn test_punctuation_handling() {
        assert_eq!(norm("Smith's Bakery"), "smiths bakery");
        assert_eq!(norm("A.C.M.E. GmbH"), "acme gmbh");
        assert_eq!(norm("Alpha-Beta/Gamma"), "alpha beta gamma");
    }

    #[test]
    fn test_numbers_extracted() {
        let n = Normalizer::default().normalize("Building 42 Holdings 7").unwrap();
        assert_eq!(n.text, "building 42 holdings 7");
        let expected: BTreeSet<String> = ["42", "7"].iter().map(|s| s.to_string()).collect();
        assert_eq!(n.numbers, expected);
    }

    #[test]
    fn test_transliteration() {
        let n = Normalizer::default().normalize("Газпром").unwrap();
        assert!(n.transliterated);
        assert_eq!(n.text, "gazprom");

        let latin = Normalizer::default().normalize("Société Générale").unwrap();
        assert!(!latin.transliterated);
        assert_eq!(latin.text, "société générale");
    }

    #[test]
    fn test_empty_names() {
        assert!(Normalizer::default().normalize("").is_none());
        assert!(Normalizer::default().normalize(" .,- ").is_none());
    }

    #[test]
    fn test_prefix_counts_chars() {
        let n = Normalizer::default().normalize("Ölwerk").unwrap();
        assert_eq!(n.prefix(3), "ölw");
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(raw in "[A-Za-z0-9 .,&'()/-]{0,40}") {
            let normalizer = Normalizer::default();
            if let Some(once) = normalizer.normalize(&raw) {
                let twice = normalizer.normalize(&once.text).unwrap();
                prop_assert_eq!(&twice.text, &once.text);
                prop_assert_eq!(&twice.numbers, &once.numbers);
            }
        }

        #[test]
        fn prop_normalize_idempotent_mixed_scripts(
            raw in prop::sample::select(vec![
                "Газпром Нефть", "Ελληνικά Πετρέλαια Inc", "北京 建设 Ltd", "Müller & Söhne",
                "Société Générale SAS", "ООО Ромашка 2", "Łódź Logistics Co",
            ])
        ) {
            let normalizer = Normalizer::default();
            let once = normalizer.normalize(raw).unwrap();
            let twice = normalizer.normalize(&once.text).unwrap();
            prop_assert_eq!(twice.text, once.text);
        }
    }
}
