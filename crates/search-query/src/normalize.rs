//! String normalization and LIKE pattern escaping.
//!
//! String parameters are indexed twice: the raw value and a normalized shadow
//! (`STR_VALUE_LCASE`). Search values are normalized the same way before they
//! are compared against the shadow column.

use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

/// Escape character used in every generated `LIKE ... ESCAPE` clause.
pub const LIKE_ESCAPE: char = '+';

/// Lowercases, decomposes and strips combining marks, so "Évê" and "eve"
/// normalize to the same text. Punctuation and whitespace are kept.
pub fn normalize_string(input: &str) -> String {
    input
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Escapes LIKE wildcards (`%`, `_`) and the escape character itself.
pub fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if c == LIKE_ESCAPE || c == '%' || c == '_' {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}

/// Pattern for a starts-with match.
pub fn starts_with_pattern(input: &str) -> String {
    format!("{}%", escape_like(input))
}

/// Pattern for a substring match.
pub fn contains_pattern(input: &str) -> String {
    format!("%{}%", escape_like(input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_case_and_accents() {
        assert_eq!(normalize_string("Évê"), "eve");
        assert_eq!(normalize_string("Jones Jr"), "jones jr");
        assert_eq!(normalize_string("Müller-Lüdenscheidt"), "muller-ludenscheidt");
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off+"), "50+%+_off++");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_patterns() {
        assert_eq!(starts_with_pattern("jo_"), "jo+_%");
        assert_eq!(contains_pattern("100%"), "%100+%%");
    }
}
