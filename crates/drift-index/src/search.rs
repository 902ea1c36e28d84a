//! Search query parsing.

use crate::catalog::tokenize;

/// Turn raw query text into lowercased whole-word tokens.
///
/// `remove_single_character_terms` drops one-character tokens, which
/// otherwise match nearly every file through disc and track numbers.
#[must_use]
pub fn parse_query(text: &str, remove_single_character_terms: bool) -> Vec<String> {
    let mut tokens = tokenize(text);
    if remove_single_character_terms {
        tokens.retain(|t| t.chars().count() > 1);
    }
    tokens.sort_unstable();
    tokens.dedup();
    tokens
}
