use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Marker used by pages (and by extraction placeholders) for a missing amount
pub const NOT_AVAILABLE: &str = "N/A";

const SHORT_DESCRIPTION_CHARS: usize = 500;

static CURRENCY_AMOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$?[\d,]+").expect("static regex"));

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("static regex"));

/// Keep the first occurrence of each word (case-insensitive), preserving the
/// original casing and order. Whitespace runs collapse to single spaces.
pub fn dedupe_words(text: &str) -> String {
    let mut seen = HashSet::new();
    let mut kept = Vec::new();

    for word in text.split_whitespace() {
        if seen.insert(word.to_lowercase()) {
            kept.push(word);
        }
    }

    kept.join(" ")
}

/// Parse a displayed amount such as "$12,345.67". Absence is the error channel.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() || raw == NOT_AVAILABLE {
        return None;
    }

    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    cleaned.parse::<f64>().ok()
}

/// First 500 characters, with "..." appended when anything was cut
pub fn short_description(text: &str) -> String {
    match text.char_indices().nth(SHORT_DESCRIPTION_CHARS) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// First integer in a counter label, ignoring thousands separators.
/// "1,204 donations" -> 1204
pub fn parse_count(raw: &str) -> Option<i64> {
    let without_commas = raw.replace(',', "");
    DIGITS
        .find(&without_commas)
        .and_then(|m| m.as_str().parse::<i64>().ok())
}

/// First currency-looking token in a sentence: "raised of $10,000 goal" -> "$10,000"
pub fn first_currency_amount(raw: &str) -> Option<String> {
    CURRENCY_AMOUNT
        .find_iter(raw)
        .map(|m| m.as_str())
        .find(|s| s.chars().any(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

/// Collapse inner whitespace of scraped text and trim the ends
pub fn clean_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_dedupe_words_example() {
        assert_eq!(dedupe_words("Help Help the Dogs dogs"), "Help the Dogs");
    }

    #[test]
    fn test_dedupe_words_keeps_first_casing() {
        assert_eq!(dedupe_words("dogs DOGS Dogs cats"), "dogs cats");
        assert_eq!(dedupe_words("  Save   the\tday \n save "), "Save the day");
        assert_eq!(dedupe_words(""), "");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("$12,345.67"), Some(12345.67));
        assert_eq!(parse_amount("N/A"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("Goal: $0"), Some(0.0));
        assert_eq!(parse_amount("€ 1.250"), Some(1.25));
        assert_eq!(parse_amount("no digits"), None);
        assert_eq!(parse_amount("1.2.3"), None);
    }

    #[test]
    fn test_short_description() {
        let short = "a".repeat(500);
        assert_eq!(short_description(&short), short);

        let long = "b".repeat(501);
        let result = short_description(&long);
        assert_eq!(result.len(), 503);
        assert!(result.ends_with("..."));

        // multi-byte characters count as one
        let accented = "é".repeat(600);
        let result = short_description(&accented);
        assert_eq!(result.chars().count(), 503);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("1,204 donations"), Some(1204));
        assert_eq!(parse_count("Shares: 37"), Some(37));
        assert_eq!(parse_count("none"), None);
    }

    #[test]
    fn test_first_currency_amount() {
        assert_eq!(
            first_currency_amount("raised of $10,000 goal"),
            Some("$10,000".to_string())
        );
        assert_eq!(first_currency_amount("25,500 target"), Some("25,500".to_string()));
        assert_eq!(first_currency_amount("no goal set"), None);
        assert_eq!(first_currency_amount("$ goal"), None);
        assert_eq!(
            first_currency_amount("raised, of $5,000"),
            Some("$5,000".to_string())
        );
    }

    proptest! {
        #[test]
        fn prop_dedupe_words_idempotent(text in "[a-zA-Z ]{0,60}") {
            let once = dedupe_words(&text);
            prop_assert_eq!(dedupe_words(&once), once.clone());
        }

        #[test]
        fn prop_dedupe_words_has_no_case_duplicates(text in "[a-cA-C ]{0,40}") {
            let result = dedupe_words(&text);
            let mut seen = HashSet::new();
            for word in result.split(' ').filter(|w| !w.is_empty()) {
                prop_assert!(seen.insert(word.to_lowercase()));
            }
        }

        #[test]
        fn prop_parse_amount_never_panics(raw in "\\PC{0,30}") {
            let _ = parse_amount(&raw);
        }
    }
}
