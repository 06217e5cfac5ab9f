//! Query-side adaptation: dimension fitting, per-document and per-row
//! deduplication of raw nearest-neighbor hits, and query sanitation.

use std::collections::HashSet;

use crate::models::Hit;
use crate::text::normalize;

const MAX_QUERY_WORDS: usize = 70;
const MAX_TOKEN_REPETITIONS: usize = 4;

/// Fits a query vector to the target collection dimension: zero-pads when
/// short, truncates when long, returns it unchanged when equal.
pub fn adapt_dimension(vector: Vec<f32>, target_dim: usize) -> Vec<f32> {
    use std::cmp::Ordering;
    match vector.len().cmp(&target_dim) {
        Ordering::Equal => vector,
        Ordering::Less => {
            let mut padded = vector;
            padded.resize(target_dim, 0.0);
            padded
        }
        Ordering::Greater => {
            let mut truncated = vector;
            truncated.truncate(target_dim);
            truncated
        }
    }
}

/// Keeps the best hit per document. Assumes `hits` arrive sorted by
/// descending score; hits without a `doc_id` cannot be deduplicated and pass
/// through so recall is not lost.
pub fn dedupe_top_docs(hits: &[Hit], top_k_docs: usize) -> Vec<Hit> {
    let mut selected = Vec::new();
    let mut seen_doc_ids: HashSet<String> = HashSet::new();

    for hit in hits {
        let doc_id = hit.doc_id();
        if doc_id.is_empty() {
            selected.push(hit.clone());
        } else if seen_doc_ids.insert(doc_id) {
            selected.push(hit.clone());
        }
        if selected.len() >= top_k_docs {
            break;
        }
    }

    selected
}

/// Deduplicates label-collection hits down to one row per normalized
/// (product, crop, objective) combination, preserving score order.
pub fn dedupe_product_rows(hits: &[Hit], top_k_rows: usize) -> Vec<Hit> {
    let mut selected = Vec::new();
    let mut seen_keys: HashSet<(String, String, String)> = HashSet::new();

    for hit in hits {
        let product = hit
            .payload
            .get_first(&["product_id", "trade_name", "product_trade_name"]);
        let key = (
            normalize(&product),
            normalize(&hit.payload.get_str("crop")),
            normalize(&hit.payload.get_str("objective")),
        );
        if !seen_keys.insert(key) {
            continue;
        }
        selected.push(hit.clone());
        if selected.len() >= top_k_rows {
            break;
        }
    }

    selected
}

/// Merges two hit lists by id, first-seen wins, stable order. Hits without
/// an id are always kept.
pub fn merge_hits_by_id(left: Vec<Hit>, right: Vec<Hit>) -> Vec<Hit> {
    let mut out: Vec<Hit> = Vec::with_capacity(left.len() + right.len());
    let mut seen_ids: HashSet<String> = HashSet::new();

    for hit in left.into_iter().chain(right) {
        if !hit.id.is_empty() && !seen_ids.insert(hit.id.clone()) {
            continue;
        }
        out.push(hit);
    }
    out
}

/// Bounds a (possibly model-rewritten) query before embedding: caps the word
/// count and drops words once the same normalized token has repeated too
/// often, which keeps degenerate rewrites from dominating the vector.
pub fn sanitize_query(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>();
    if collapsed.is_empty() {
        return String::new();
    }

    let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut filtered: Vec<&str> = Vec::new();

    for word in collapsed.into_iter().take(MAX_QUERY_WORDS) {
        let key: String = normalize(word)
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-')
            .collect();
        if key.is_empty() {
            continue;
        }
        let count = counts.entry(key).or_insert(0);
        if *count >= MAX_TOKEN_REPETITIONS {
            continue;
        }
        *count += 1;
        filtered.push(word);
    }

    filtered.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Payload;
    use serde_json::json;

    fn doc_hit(id: &str, score: f32, doc_id: &str) -> Hit {
        Hit::new(id, score, Payload::from_value(json!({ "doc_id": doc_id })))
    }

    #[test]
    fn adapt_dimension_is_identity_pad_and_prefix() {
        let vector = vec![0.1, 0.2, 0.3];
        assert_eq!(adapt_dimension(vector.clone(), 3), vector);

        let padded = adapt_dimension(vector.clone(), 5);
        assert_eq!(padded.len(), 5);
        assert_eq!(&padded[..3], &vector[..]);
        assert_eq!(&padded[3..], &[0.0, 0.0]);

        let truncated = adapt_dimension(vector.clone(), 2);
        assert_eq!(truncated, &vector[..2]);
    }

    #[test]
    fn dedupe_keeps_one_hit_per_document_in_order() {
        let hits = vec![
            doc_hit("1", 0.9, "doc-a"),
            doc_hit("2", 0.8, "doc-a"),
            doc_hit("3", 0.7, "doc-b"),
            doc_hit("4", 0.6, "doc-c"),
        ];
        let kept = dedupe_top_docs(&hits, 10);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].id, "1");
        assert_eq!(kept[1].id, "3");
        assert_eq!(kept[2].id, "4");
    }

    #[test]
    fn dedupe_respects_k_and_keeps_idless_hits() {
        let hits = vec![
            doc_hit("1", 0.9, "doc-a"),
            doc_hit("2", 0.8, ""),
            doc_hit("3", 0.7, "doc-b"),
        ];
        let kept = dedupe_top_docs(&hits, 2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].id, "2");
    }

    #[test]
    fn product_rows_dedupe_on_product_crop_objective() {
        let row = |id: &str, product: &str, crop: &str, objective: &str| {
            Hit::new(
                id,
                0.5,
                Payload::from_value(json!({
                    "trade_name": product,
                    "crop": crop,
                    "objective": objective,
                })),
            )
        };
        let hits = vec![
            row("1", "Fungex", "Cerezo", "Oidio"),
            row("2", "fungex", "cerezo", "oidio"),
            row("3", "Fungex", "Vid", "Oidio"),
        ];
        let kept = dedupe_product_rows(&hits, 10);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn merge_by_id_is_first_seen_and_stable() {
        let left = vec![doc_hit("1", 0.9, "a"), doc_hit("2", 0.8, "b")];
        let right = vec![doc_hit("2", 0.7, "b"), doc_hit("3", 0.6, "c")];
        let merged = merge_hits_by_id(left, right);
        let ids: Vec<&str> = merged.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[test]
    fn sanitize_caps_words_and_repetitions() {
        let long = vec!["palabra"; 90].join(" ");
        let sanitized = sanitize_query(&long);
        assert_eq!(sanitized.split_whitespace().count(), 4);

        let many = (0..80).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        assert_eq!(sanitize_query(&many).split_whitespace().count(), 70);
    }
}
