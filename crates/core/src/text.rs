//! Normalization and fuzzy-containment primitives shared by every matching
//! stage. All matching in this crate is accent-insensitive and tolerates
//! singular/plural variation without a full stemmer.

use std::collections::BTreeSet;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Tokens too generic to carry a matching signal in user queries.
pub static QUERY_STOPWORDS: &[&str] = &[
    "de", "del", "la", "el", "los", "las", "para", "con", "por", "sin",
    "sobre", "que", "cual", "cuales", "tiene", "tienen", "quiero",
    "necesito", "dame", "mostrar", "muestra", "todos", "todas", "producto",
    "productos", "registrado", "registrados", "registro", "the", "for",
    "with", "that", "which", "have", "product", "products", "show", "give",
    "want", "need",
];

/// Strips accents (NFD, combining marks removed), lowercases, and collapses
/// whitespace runs into single spaces.
pub fn normalize(text: &str) -> String {
    let stripped: String = text
        .nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .collect();
    stripped
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Alphanumeric token runs of the normalized text, keeping tokens of at
/// least `min_len` characters.
pub fn tokenize(text: &str, min_len: usize) -> Vec<String> {
    normalize(text)
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|tok| !tok.is_empty() && tok.len() >= min_len)
        .map(str::to_string)
        .collect()
}

/// Strips a trailing "es"/"s" pluralization when the remainder stays long
/// enough to be meaningful.
pub fn singularize(token: &str) -> &str {
    if token.len() > 4 && token.ends_with("es") {
        &token[..token.len() - 2]
    } else if token.len() > 3 && token.ends_with('s') {
        &token[..token.len() - 1]
    } else {
        token
    }
}

/// Coarse morphological root: singularized, then a trailing gender vowel is
/// dropped so e.g. "ciruelo"/"ciruela"/"ciruelas" collapse together.
pub fn token_root(token: &str) -> String {
    let tok = singularize(token.trim());
    if tok.len() >= 5 && (tok.ends_with('a') || tok.ends_with('o')) {
        tok[..tok.len() - 1].to_string()
    } else {
        tok.to_string()
    }
}

/// Root set of the informative tokens in `text`; roots shorter than 4
/// characters are too ambiguous to keep.
pub fn token_roots(text: &str) -> BTreeSet<String> {
    let mut roots = BTreeSet::new();
    for tok in tokenize(text, 3) {
        if QUERY_STOPWORDS.contains(&tok.as_str()) {
            continue;
        }
        let root = token_root(&tok);
        if root.len() >= 4 {
            roots.insert(root);
        }
    }
    roots
}

/// Informative tokens of at least 4 characters with stopwords removed.
pub fn meaningful_tokens(text: &str) -> Vec<String> {
    tokenize(text, 4)
        .into_iter()
        .filter(|tok| !QUERY_STOPWORDS.contains(&tok.as_str()))
        .collect()
}

/// Whole-word containment over already-normalized text.
pub fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut offset = 0;
    while let Some(pos) = haystack[offset..].find(needle) {
        let begin = offset + pos;
        let end = begin + needle.len();
        let boundary_before = haystack[..begin]
            .chars()
            .next_back()
            .map_or(true, |ch| !ch.is_alphanumeric());
        let boundary_after = haystack[end..]
            .chars()
            .next()
            .map_or(true, |ch| !ch.is_alphanumeric());
        if boundary_before && boundary_after {
            return true;
        }
        offset = begin + needle.len();
    }
    false
}

/// Containment with plural tolerance. Needles of up to 3 characters must
/// match on a word boundary; longer needles match as substrings, falling
/// back to their singular form.
pub fn contains_with_plural_support(haystack: &str, needle: &str) -> bool {
    let h = normalize(haystack);
    let n = normalize(needle);
    if h.is_empty() || n.is_empty() {
        return false;
    }
    if n.len() <= 3 {
        if contains_word(&h, &n) {
            return true;
        }
        let singular = singularize(&n);
        return singular != n && contains_word(&h, singular);
    }
    if h.contains(&n) {
        return true;
    }
    let singular = singularize(&n);
    singular != n && h.contains(singular)
}

/// Collapses whitespace and trims list punctuation from a display value.
pub fn clean_value(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|ch: char| matches!(ch, ' ' | '.' | ',' | ':' | ';'))
        .to_string()
}

/// Char-safe truncation with a trailing ellipsis.
pub fn truncate_ellipsis(text: &str, max_len: usize) -> String {
    let cleaned = clean_value(text);
    if cleaned.chars().count() <= max_len {
        return cleaned;
    }
    let kept: String = cleaned.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_accents_and_collapses_whitespace() {
        assert_eq!(normalize("  Cerezó   Región "), "cerezo region");
    }

    #[test]
    fn singularize_handles_both_plural_endings() {
        assert_eq!(singularize("cerezos"), "cerezo");
        assert_eq!(singularize("coles"), "col");
        assert_eq!(singularize("mas"), "mas");
    }

    #[test]
    fn token_roots_collapse_gender_variants() {
        let left = token_roots("ciruelos");
        let right = token_roots("ciruela");
        assert!(!left.is_disjoint(&right));
    }

    #[test]
    fn short_needles_require_word_boundaries() {
        assert!(contains_with_plural_support("trials on oak and vine", "oak"));
        assert!(!contains_with_plural_support("soaked leaves", "oak"));
    }

    #[test]
    fn plural_and_accent_variants_match() {
        assert!(contains_with_plural_support("daños en cerezos", "cerezo"));
        assert!(contains_with_plural_support("daños en cerezó", "cerezo"));
        assert!(!contains_with_plural_support("daños en manzanos", "cerezo"));
    }

    #[test]
    fn meaningful_tokens_drop_stopwords() {
        let tokens = meaningful_tokens("productos registrados para pulgones");
        assert_eq!(tokens, vec!["pulgones".to_string()]);
    }

    #[test]
    fn truncate_is_char_safe() {
        let value = truncate_ellipsis("composición líquida concentrada", 15);
        assert!(value.ends_with("..."));
        assert!(value.chars().count() <= 15);
    }
}
