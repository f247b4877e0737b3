//! Query/document tokenizer shared by indexing and retrieval.
//!
//! A token is a maximal run of ASCII letters, digits, or underscore,
//! case-folded to lowercase. Everything else — including non-ASCII
//! bytes — is a separator. No stemming, no stop words; the same function
//! is used on both sides of the index so terms always line up.

/// Split `text` into lowercase word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for &b in text.as_bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' {
            current.push(b.to_ascii_lowercase() as char);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Tokenize and deduplicate, preserving first-seen order. Used for query
/// terms so repeated words don't double-count.
pub fn unique_tokens(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tokenize(text).into_iter().filter(|t| seen.insert(t.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_punctuation_and_folds_case() {
        assert_eq!(
            tokenize("Database.ConnectionPool::new()"),
            vec!["database", "connectionpool", "new"]
        );
    }

    #[test]
    fn keeps_underscores_and_digits() {
        assert_eq!(tokenize("parse_file2 x"), vec!["parse_file2", "x"]);
    }

    #[test]
    fn non_ascii_is_a_separator() {
        assert_eq!(tokenize("naïve café"), vec!["na", "ve", "caf"]);
    }

    #[test]
    fn empty_and_symbol_only_inputs() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("+-*/ !!").is_empty());
    }

    #[test]
    fn unique_preserves_first_seen_order() {
        assert_eq!(unique_tokens("b a b c a"), vec!["b", "a", "c"]);
    }
}
