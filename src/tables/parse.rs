//! Cell value parsing

use std::sync::OnceLock;

use regex::Regex;

fn number_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\d+(?:[.,]\d+)?").ok())
        .as_ref()
}

/// Parse an ownership stake such as `"51.2"`, `">50"` or `"25,5 %"` into a
/// percentage in [0, 100]. Takes the first numeric token.
pub fn parse_percentage(raw: &str) -> Option<f64> {
    let token = number_pattern()?.find(raw)?;
    let value: f64 = token.as_str().replace(',', ".").parse().ok()?;
    if value.is_finite() {
        Some(value.clamp(0.0, 100.0))
    } else {
        None
    }
}

/// Parse a monetary amount. Accepts plain decimals and `1,234,567.89`
/// style thousands separators.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let value = trimmed
        .parse::<f64>()
        .ok()
        .or_else(|| trimmed.replace([',', ' '], "").parse::<f64>().ok())?;
    value.is_finite().then_some(value)
}

/// Truthy cell values
pub fn parse_flag(raw: &str) -> bool {
    let s = raw.trim();
    s.eq_ignore_ascii_case("true") || s == "1" || s.eq_ignore_ascii_case("yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_percentage_first_number() {
        assert_eq!(parse_percentage("60"), Some(60.0));
        assert_eq!(parse_percentage("51.2"), Some(51.2));
        assert_eq!(parse_percentage(">50"), Some(50.0));
        assert_eq!(parse_percentage("25,5 %"), Some(25.5));
        assert_eq!(parse_percentage("n.a."), None);
        assert_eq!(parse_percentage(""), None);
    }

    #[test]
    fn test_parse_percentage_clamps() {
        assert_eq!(parse_percentage("150"), Some(100.0));
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("100000"), Some(100000.0));
        assert_eq!(parse_amount(" 2.5e3 "), Some(2500.0));
        assert_eq!(parse_amount("1,234,567.5"), Some(1234567.5));
        assert_eq!(parse_amount("unknown"), None);
        assert_eq!(parse_amount("NaN"), None);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("Yes"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("no"));
    }
}
