//! Tokenization and term hashing
//!
//! Terms are lowercased, stripped of punctuation and optionally filtered
//! against an English stopword list. Each surviving term is hashed into a
//! fixed vocabulary space so indices stay stable without a stored vocabulary.

use regex_lite::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// NLTK English stopword list
const STOPWORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "your", "yours",
    "yourself", "yourselves", "he", "him", "his", "himself", "she", "her", "hers", "herself",
    "it", "its", "itself", "they", "them", "their", "theirs", "themselves", "what", "which",
    "who", "whom", "this", "that", "these", "those", "am", "is", "are", "was", "were", "be",
    "been", "being", "have", "has", "had", "having", "do", "does", "did", "doing", "a", "an",
    "the", "and", "but", "if", "or", "because", "as", "until", "while", "of", "at", "by",
    "for", "with", "about", "against", "between", "into", "through", "during", "before",
    "after", "above", "below", "to", "from", "up", "down", "in", "out", "on", "off", "over",
    "under", "again", "further", "then", "once", "here", "there", "when", "where", "why",
    "how", "all", "any", "both", "each", "few", "more", "most", "other", "some", "such", "no",
    "nor", "not", "only", "own", "same", "so", "than", "too", "very", "s", "t", "can", "will",
    "just", "don", "should", "now",
];

fn punctuation() -> &'static Regex {
    static PUNCT: OnceLock<Regex> = OnceLock::new();
    PUNCT.get_or_init(|| {
        Regex::new(r"[[:punct:]‘’“”–—…§¶]+").expect("punctuation pattern is valid")
    })
}

pub fn is_stopword(term: &str) -> bool {
    STOPWORDS.contains(&term)
}

/// Split text into normalized terms.
///
/// Punctuation is removed rather than replaced, so `"non-compete"` becomes
/// `"noncompete"` and `"Section 4.2"` becomes `["section", "42"]`.
pub fn tokenize(text: &str, remove_stopwords: bool) -> Vec<String> {
    let lowered = text.to_lowercase();
    let stripped = punctuation().replace_all(&lowered, "");

    stripped
        .split_whitespace()
        .filter(|term| !(remove_stopwords && is_stopword(term)))
        .map(str::to_string)
        .collect()
}

/// Deterministic index of a term in `[0, vocab_size)`
pub fn hash_term(term: &str, vocab_size: u32) -> u32 {
    let digest = Sha256::digest(term.as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix % vocab_size.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_lowercases_and_strips_punctuation() {
        let terms = tokenize("The Licensee's obligations (see Section 4.2) survive!", true);
        assert_eq!(terms, vec!["licensees", "obligations", "see", "section", "42", "survive"]);
    }

    #[test]
    fn test_tokenize_keeps_stopwords_when_disabled() {
        let terms = tokenize("the term of the agreement", false);
        assert_eq!(terms, vec!["the", "term", "of", "the", "agreement"]);
    }

    #[test]
    fn test_only_stopwords_yields_nothing() {
        assert!(tokenize("to be or not to be", true).is_empty());
        assert!(tokenize("   ", true).is_empty());
        assert!(tokenize("?!", true).is_empty());
    }

    #[test]
    fn test_hash_is_stable_and_bounded() {
        let a = hash_term("indemnification", 1_000);
        assert_eq!(a, hash_term("indemnification", 1_000));
        assert!(a < 1_000);
        assert_ne!(hash_term("indemnification", u32::MAX), hash_term("termination", u32::MAX));
    }
}
