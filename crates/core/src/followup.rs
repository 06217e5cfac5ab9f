//! Resolves which previously-assembled document contexts an ambiguous
//! follow-up utterance refers to. Rules apply in a fixed priority order and
//! the first rule yielding a non-empty result wins; token tables are static
//! data (the source corpus is Spanish, English is accepted too).

use std::collections::{BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::models::{CandidateEntity, DocumentContext};
use crate::text::{contains_word, normalize, tokenize};

/// Tokens meaning "every offered option".
static ALL_TOKENS: &[&str] = &["todos", "todas", "ambos", "ambas", "all", "both"];

/// Ordinal words per offered position, 1-based.
static ORDINAL_TOKENS: &[&[&str]] = &[
    &["primero", "primera", "1", "uno", "first"],
    &["segundo", "segunda", "2", "dos", "second"],
    &["tercero", "tercera", "3", "tres", "third"],
    &["cuarto", "cuarta", "4", "cuatro", "fourth"],
    &["quinto", "quinta", "5", "cinco", "fifth"],
];

/// Phrasings that show the user wants to drill into a specific report.
static DETAIL_TOKENS: &[&str] = &[
    "detalle", "mas informacion", "ampliar", "detail", "more information", "expand",
];

fn item_regex() -> &'static Option<Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r"\b(?:ensayo|informe|reporte|report|trial|item)\s+(\d+)\b").ok()
    })
}

fn entity_doc_ids(entity: &CandidateEntity) -> impl Iterator<Item = String> + '_ {
    entity
        .doc_ids
        .iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

/// True when the message asks for the detail of a specific report.
pub fn wants_specific_detail(message: &str) -> bool {
    let normalized = normalize(message);
    if normalized.is_empty() {
        return false;
    }
    if item_regex()
        .as_ref()
        .is_some_and(|regex| regex.is_match(&normalized))
    {
        return true;
    }
    DETAIL_TOKENS.iter().any(|token| normalized.contains(token))
}

/// Document ids the message, hints, and explicit indexes point at, without
/// touching the contexts. Used for cache-miss re-retrieval.
pub fn collect_selected_doc_ids(
    message: &str,
    offered: &[CandidateEntity],
    explicit_hints: &[String],
    explicit_indexes: &[usize],
) -> BTreeSet<String> {
    let mut selected: BTreeSet<String> = BTreeSet::new();
    for &idx in explicit_indexes {
        if idx >= 1 && idx <= offered.len() {
            selected.extend(entity_doc_ids(&offered[idx - 1]));
        }
    }

    let hints: Vec<String> = explicit_hints
        .iter()
        .map(|hint| normalize(hint))
        .filter(|hint| !hint.is_empty())
        .collect();
    let combined = std::iter::once(normalize(message))
        .chain(hints)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if let Some(regex) = item_regex() {
        for captures in regex.captures_iter(&combined) {
            if let Some(idx) = captures.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) {
                if idx >= 1 && idx <= offered.len() {
                    selected.extend(entity_doc_ids(&offered[idx - 1]));
                }
            }
        }
    }

    for entity in offered {
        let label = normalize(&entity.label);
        let products: Vec<String> = entity
            .products
            .iter()
            .map(|product| normalize(product))
            .filter(|product| !product.is_empty())
            .collect();
        let mentioned = (!label.is_empty() && combined.contains(&label))
            || products.iter().any(|product| combined.contains(product));
        if mentioned {
            selected.extend(entity_doc_ids(entity));
        }
    }

    if selected.is_empty() && offered.len() == 1 {
        selected.extend(entity_doc_ids(&offered[0]));
    }

    selected
}

/// Resolves a follow-up reference to a context subset. Deterministic: the
/// same inputs always select the same contexts, and an explicit index that
/// maps to nothing yields an empty selection so the caller can ask for
/// clarification instead of guessing.
pub fn select_contexts(
    message: &str,
    offered: &[CandidateEntity],
    contexts: &[DocumentContext],
    explicit_indexes: &[usize],
    explicit_hints: &[String],
) -> Vec<DocumentContext> {
    let hints: Vec<String> = explicit_hints
        .iter()
        .map(|hint| normalize(hint))
        .filter(|hint| !hint.is_empty())
        .collect();
    let combined = std::iter::once(normalize(message))
        .chain(hints)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if combined.is_empty() && explicit_indexes.is_empty() {
        return Vec::new();
    }

    let mut selected_doc_ids: BTreeSet<String> = BTreeSet::new();
    let mut explicit_selection = !explicit_indexes.is_empty();

    // 1. Indexes resolved upstream.
    for &idx in explicit_indexes {
        if idx >= 1 && idx <= offered.len() {
            selected_doc_ids.extend(entity_doc_ids(&offered[idx - 1]));
        }
    }

    // 2. "item N" phrasing in the message itself.
    if let Some(regex) = item_regex() {
        for captures in regex.captures_iter(&combined) {
            if let Some(idx) = captures.get(1).and_then(|m| m.as_str().parse::<usize>().ok()) {
                if idx >= 1 && idx <= offered.len() {
                    selected_doc_ids.extend(entity_doc_ids(&offered[idx - 1]));
                    explicit_selection = true;
                }
            }
        }
    }

    // 3. "all"/"both" takes every prior context.
    if ALL_TOKENS
        .iter()
        .any(|token| contains_word(&combined, token))
    {
        return dedupe_by_product_objective(contexts.to_vec());
    }

    // 4. Ordinal words mapped positionally to the offered list.
    for (position, entity) in offered.iter().enumerate() {
        let Some(terms) = ORDINAL_TOKENS.get(position) else {
            break;
        };
        if terms.iter().any(|term| contains_word(&combined, term)) {
            selected_doc_ids.extend(entity_doc_ids(entity));
            explicit_selection = true;
        }
    }

    // 5. Label or product-name mention.
    for entity in offered {
        let label = normalize(&entity.label);
        let products: Vec<String> = entity
            .products
            .iter()
            .map(|product| normalize(product))
            .filter(|product| !product.is_empty())
            .collect();
        let mentioned = (!label.is_empty() && combined.contains(&label))
            || products.iter().any(|product| combined.contains(product));
        if mentioned {
            selected_doc_ids.extend(entity_doc_ids(entity));
            explicit_selection = true;
        }
    }

    // 8 (early). A single offered entity is an unambiguous default.
    if !explicit_selection && selected_doc_ids.is_empty() && offered.len() == 1 {
        selected_doc_ids.extend(entity_doc_ids(&offered[0]));
        explicit_selection = true;
    }

    if explicit_selection && !selected_doc_ids.is_empty() {
        let filtered: Vec<DocumentContext> = contexts
            .iter()
            .filter(|context| selected_doc_ids.contains(&context.doc_id))
            .cloned()
            .collect();
        debug!(
            selected = selected_doc_ids.len(),
            resolved = filtered.len(),
            "explicit follow-up selection"
        );
        return if filtered.is_empty() {
            Vec::new()
        } else {
            dedupe_by_product_objective(filtered)
        };
    }

    // 6. Product-name mention matched against context metadata.
    let message_tokens = tokenize(&combined, 4);
    for context in contexts {
        let product = normalize(&context.product);
        if product.is_empty() {
            continue;
        }
        if combined.contains(&product)
            || message_tokens.iter().any(|token| product.contains(token.as_str()))
        {
            if !context.doc_id.is_empty() {
                selected_doc_ids.insert(context.doc_id.clone());
            }
        }
    }

    // 7. Fallback: metadata overlap with any context.
    if selected_doc_ids.is_empty() {
        let matched: Vec<DocumentContext> = contexts
            .iter()
            .filter(|context| {
                [&context.species, &context.product, &context.variety]
                    .iter()
                    .map(|term| normalize(term))
                    .filter(|term| !term.is_empty())
                    .any(|term| combined.contains(&term))
            })
            .cloned()
            .collect();
        return dedupe_by_product_objective(matched);
    }

    let filtered: Vec<DocumentContext> = contexts
        .iter()
        .filter(|context| selected_doc_ids.contains(&context.doc_id))
        .cloned()
        .collect();
    dedupe_by_product_objective(filtered)
}

/// Collapses redundant contexts: grouped by normalized product, sub-grouped
/// by objective signature, keeping the most recent season per sub-group.
pub fn dedupe_by_product_objective(contexts: Vec<DocumentContext>) -> Vec<DocumentContext> {
    if contexts.is_empty() {
        return contexts;
    }

    let mut product_order: Vec<String> = Vec::new();
    let mut by_product: HashMap<String, Vec<DocumentContext>> = HashMap::new();
    for context in &contexts {
        let key = {
            let normalized = normalize(&context.product);
            if normalized.is_empty() {
                "__unknown__".to_string()
            } else {
                normalized
            }
        };
        if !by_product.contains_key(&key) {
            product_order.push(key.clone());
        }
        by_product.entry(key).or_default().push(context.clone());
    }

    let mut selected_ids: BTreeSet<String> = BTreeSet::new();
    let mut result: Vec<DocumentContext> = Vec::new();

    for product_key in product_order {
        let group = by_product.remove(&product_key).unwrap_or_default();

        let mut objective_order: Vec<String> = Vec::new();
        let mut by_objective: HashMap<String, Vec<DocumentContext>> = HashMap::new();
        for (i, context) in group.into_iter().enumerate() {
            let signature = objective_signature(&context);
            let key = if signature.is_empty() {
                // Per-document unknown marker: contexts without an objective
                // section must not collapse into each other.
                format!("__unknown__:{}:{}", context.doc_id, i)
            } else {
                signature
            };
            if !by_objective.contains_key(&key) {
                objective_order.push(key.clone());
            }
            by_objective.entry(key).or_default().push(context);
        }

        for objective_key in objective_order {
            let sub_group = by_objective.remove(&objective_key).unwrap_or_default();
            let Some(best) = sub_group
                .into_iter()
                .max_by_key(|context| season_key(&context.season))
            else {
                continue;
            };
            if !best.doc_id.is_empty() && !selected_ids.insert(best.doc_id.clone()) {
                continue;
            }
            result.push(best);
        }
    }

    if result.is_empty() {
        contexts
    } else {
        result
    }
}

/// Bag of the first informative tokens found in objective-labeled chunks.
fn objective_signature(context: &DocumentContext) -> String {
    let mut snippets: Vec<String> = Vec::new();
    for chunk in &context.chunks {
        let section = normalize(&chunk.section);
        if !section.contains("objetivo") && !section.contains("objective") {
            continue;
        }
        let text = chunk.text.trim();
        if !text.is_empty() {
            snippets.push(normalize(text));
        }
    }
    if snippets.is_empty() {
        return String::new();
    }
    let tokens = tokenize(&snippets.join(" "), 4);
    tokens
        .into_iter()
        .take(16)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Season recency: latest year wins, then the later-starting span, then the
/// lexically larger raw string.
fn season_key(season: &str) -> (i32, i32, String) {
    let mut years: Vec<i32> = Vec::new();
    let digits: Vec<char> = season.chars().collect();
    let mut i = 0;
    while i < digits.len() {
        if digits[i].is_ascii_digit() {
            let start = i;
            while i < digits.len() && digits[i].is_ascii_digit() {
                i += 1;
            }
            if i - start == 4 {
                if let Ok(year) = digits[start..i].iter().collect::<String>().parse::<i32>() {
                    if (1900..=2099).contains(&year) {
                        years.push(year);
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    match (years.iter().max(), years.iter().min()) {
        (Some(&max), Some(&min)) => (max, min, season.to_string()),
        _ => (0, 0, String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContextChunk, EntitySource, MatchScope};

    fn entity(label: &str, product: &str, doc_ids: &[&str]) -> CandidateEntity {
        CandidateEntity {
            label: label.to_string(),
            products: vec![product.to_string()],
            doc_ids: doc_ids.iter().map(|id| id.to_string()).collect(),
            product: product.to_string(),
            client: "AgroSur".into(),
            season: "2022-2023".into(),
            species: "Cerezo".into(),
            variety: "Lapins".into(),
            overview: String::new(),
            source: EntitySource::Semantic,
            match_scope: MatchScope::QueryMatch,
            inclusion_reason: String::new(),
        }
    }

    fn context(doc_id: &str, product: &str, season: &str) -> DocumentContext {
        DocumentContext {
            doc_id: doc_id.to_string(),
            product: product.to_string(),
            season: season.to_string(),
            species: "Cerezo".into(),
            variety: "Lapins".into(),
            ..DocumentContext::default()
        }
    }

    fn objective_chunk(text: &str) -> ContextChunk {
        ContextChunk {
            index: 1,
            chunk_type: "paragraph".into(),
            page_number: None,
            section: "OBJETIVO".into(),
            heading_path: String::new(),
            text: text.to_string(),
        }
    }

    #[test]
    fn explicit_indexes_win() {
        let offered = vec![
            entity("Fungex (Cerezo, Lapins, 2022-2023)", "Fungex", &["d1"]),
            entity("Acarix (Cerezo, Lapins, 2022-2023)", "Acarix", &["d2"]),
        ];
        let contexts = vec![context("d1", "Fungex", "2022"), context("d2", "Acarix", "2022")];
        let selected = select_contexts("quiero ese", &offered, &contexts, &[2], &[]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].doc_id, "d2");
    }

    #[test]
    fn item_number_phrasing_is_detected() {
        let offered = vec![
            entity("Fungex", "Fungex", &["d1"]),
            entity("Acarix", "Acarix", &["d2"]),
        ];
        let contexts = vec![context("d1", "Fungex", "2022"), context("d2", "Acarix", "2022")];
        let selected = select_contexts("dame el ensayo 1", &offered, &contexts, &[], &[]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].doc_id, "d1");
    }

    #[test]
    fn all_tokens_return_every_context() {
        let offered = vec![
            entity("Fungex", "Fungex", &["d1"]),
            entity("Acarix", "Acarix", &["d2"]),
        ];
        let contexts = vec![context("d1", "Fungex", "2022"), context("d2", "Acarix", "2022")];
        let selected = select_contexts("muestrame todos", &offered, &contexts, &[], &[]);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn ordinal_words_map_positionally() {
        let offered = vec![
            entity("Fungex", "Fungex", &["d1"]),
            entity("Acarix", "Acarix", &["d2"]),
        ];
        let contexts = vec![context("d1", "Fungex", "2022"), context("d2", "Acarix", "2022")];
        let selected = select_contexts("el segundo por favor", &offered, &contexts, &[], &[]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].doc_id, "d2");
    }

    #[test]
    fn product_mention_selects_matching_entity() {
        let offered = vec![
            entity("Fungex", "Fungex", &["d1"]),
            entity("Acarix", "Acarix", &["d2"]),
        ];
        let contexts = vec![context("d1", "Fungex", "2022"), context("d2", "Acarix", "2022")];
        let selected = select_contexts("cuentame de acarix", &offered, &contexts, &[], &[]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].doc_id, "d2");
    }

    #[test]
    fn single_offer_is_default_without_reference() {
        let offered = vec![entity("Fungex", "Fungex", &["d1"])];
        let contexts = vec![context("d1", "Fungex", "2022")];
        let selected = select_contexts("y como le fue", &offered, &contexts, &[], &[]);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].doc_id, "d1");
    }

    #[test]
    fn out_of_range_index_yields_empty_selection() {
        let offered = vec![entity("Fungex", "Fungex", &["d1"])];
        let contexts = vec![context("d1", "Fungex", "2022")];
        let selected = select_contexts("zzz", &offered, &contexts, &[9], &[]);
        assert!(selected.is_empty());
    }

    #[test]
    fn selection_is_deterministic() {
        let offered = vec![
            entity("Fungex", "Fungex", &["d1"]),
            entity("Acarix", "Acarix", &["d2"]),
        ];
        let contexts = vec![context("d1", "Fungex", "2022"), context("d2", "Acarix", "2022")];
        let first = select_contexts("ensayo 2", &offered, &contexts, &[], &[]);
        let second = select_contexts("ensayo 2", &offered, &contexts, &[], &[]);
        let ids = |list: &[DocumentContext]| {
            list.iter().map(|c| c.doc_id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn dedupe_keeps_latest_season_per_objective() {
        let mut old = context("d1", "Fungex", "2020-2021");
        old.chunks.push(objective_chunk("Evaluar control de oidio en cerezo"));
        let mut new = context("d2", "Fungex", "2022-2023");
        new.chunks.push(objective_chunk("Evaluar control de oidio en cerezo"));
        let mut other = context("d3", "Fungex", "2019-2020");
        other.chunks.push(objective_chunk("Evaluar fitotoxicidad en variedades tardias"));

        let kept = dedupe_by_product_objective(vec![old, new, other]);
        let ids: Vec<&str> = kept.iter().map(|context| context.doc_id.as_str()).collect();
        assert!(ids.contains(&"d2"));
        assert!(ids.contains(&"d3"));
        assert!(!ids.contains(&"d1"));
    }

    #[test]
    fn contexts_without_objective_do_not_collapse() {
        let kept = dedupe_by_product_objective(vec![
            context("d1", "Fungex", "2020"),
            context("d2", "Fungex", "2022"),
        ]);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn season_recency_prefers_latest_year() {
        assert!(season_key("2022-2023") > season_key("2021-2022"));
        assert!(season_key("temporada 2023") > season_key("2022"));
        assert_eq!(season_key("sin fecha").0, 0);
    }
}
