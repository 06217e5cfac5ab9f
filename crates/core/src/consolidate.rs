//! Groups raw label-row hits into one row per real-world product and renders
//! a bounded evidence block. Field values are deduplicated by normalized
//! text and capped both in count and in length so the block stays within the
//! prompt's own limits regardless of result volume.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::catalog::ProductCatalog;
use crate::models::{Hit, Payload};
use crate::text::{normalize, truncate_ellipsis};

/// Above this many distinct products the rendering switches to compact rows.
pub const COMPACT_THRESHOLD: usize = 25;

/// Distinct values retained per field while accumulating.
const FIELD_VALUE_CAP: usize = 16;

const NOT_AVAILABLE: &str = "n/a";

static COMPOSITION_KEYS: &[&str] = &[
    "composition", "composition_text", "chemical_composition",
    "active_ingredient", "active_ingredients", "ingredient", "ingredients",
    "active_substance", "active_substances",
];

static FORMULATION_KEYS: &[&str] = &[
    "formulation_type", "product_type", "formulation", "type",
];

/// One consolidated product row keyed by (authorization, product name).
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidatedRow {
    pub product: String,
    pub authorization: String,
    pub formulation_types: BTreeSet<String>,
    pub compositions: BTreeSet<String>,
    pub crops: BTreeSet<String>,
    pub objectives: BTreeSet<String>,
    pub doses: BTreeSet<String>,
}

impl ConsolidatedRow {
    fn new(product: String, authorization: String) -> Self {
        Self {
            product,
            authorization,
            formulation_types: BTreeSet::new(),
            compositions: BTreeSet::new(),
            crops: BTreeSet::new(),
            objectives: BTreeSet::new(),
            doses: BTreeSet::new(),
        }
    }
}

fn row_key(payload: &Payload) -> (String, String) {
    let product = payload.get_first(&["trade_name", "product_trade_name"]);
    let product = if product.is_empty() {
        "unnamed product".to_string()
    } else {
        product
    };
    let authorization = payload.get_str("authorization");
    let authorization = if authorization.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        authorization
    };
    (normalize(&authorization), normalize(&product))
}

fn push_bounded(set: &mut BTreeSet<String>, value: String) {
    if value.is_empty() || value == NOT_AVAILABLE || set.len() >= FIELD_VALUE_CAP {
        return;
    }
    set.insert(value);
}

/// Consolidates hits into one row per normalized (authorization, product)
/// key, accumulating deduplicated value sets across all hits sharing it.
pub fn consolidate(hits: &[Hit], catalog: &ProductCatalog) -> Vec<ConsolidatedRow> {
    let mut keys: Vec<(String, String)> = Vec::new();
    let mut rows: Vec<ConsolidatedRow> = Vec::new();

    for hit in hits {
        let payload = &hit.payload;
        let key = row_key(payload);
        let position = match keys.iter().position(|existing| *existing == key) {
            Some(position) => position,
            None => {
                let product = payload.get_first(&["trade_name", "product_trade_name"]);
                let product = if product.is_empty() {
                    "unnamed product".to_string()
                } else {
                    product
                };
                let authorization = payload.get_str("authorization");
                let authorization = if authorization.is_empty() {
                    NOT_AVAILABLE.to_string()
                } else {
                    authorization
                };
                keys.push(key);
                rows.push(ConsolidatedRow::new(product, authorization));
                rows.len() - 1
            }
        };

        let row = &mut rows[position];
        push_bounded(&mut row.formulation_types, formulation_of(payload));
        push_bounded(&mut row.compositions, composition_of(payload, catalog));
        push_bounded(&mut row.crops, payload.get_str("crop"));
        push_bounded(&mut row.objectives, payload.get_str("objective"));
        push_bounded(&mut row.doses, normalize_dose(&payload.get_str("dose_text")));
    }

    rows.sort_by_key(|row| normalize(&row.product));
    rows
}

/// Number of distinct consolidated products a hit set would produce.
pub fn distinct_product_count(hits: &[Hit]) -> usize {
    let keys: BTreeSet<(String, String)> = hits.iter().map(|hit| row_key(&hit.payload)).collect();
    keys.len()
}

/// Renders consolidated rows, choosing compact or detailed mode by result
/// cardinality. Returns the block and whether compact mode was used.
pub fn render_evidence_block(hits: &[Hit], catalog: &ProductCatalog) -> (String, bool) {
    let count = distinct_product_count(hits);
    let compact = count > COMPACT_THRESHOLD;
    let rows = consolidate(hits, catalog);
    let block = render_rows(&rows, compact);
    debug!(products = count, compact, chars = block.len(), "label evidence block");
    (block, compact)
}

pub fn render_rows(rows: &[ConsolidatedRow], compact: bool) -> String {
    if rows.is_empty() {
        return "- no label data".to_string();
    }
    let lines: Vec<String> = rows
        .iter()
        .map(|row| {
            if compact {
                format!(
                    "- product: {} | authorization: {} | composition: {} | type: {}",
                    row.product,
                    row.authorization,
                    render_values(&row.compositions, 2, 80, " | "),
                    render_values(&row.formulation_types, 1, 45, ", "),
                )
            } else {
                format!(
                    "- product: {} | composition: {} | type: {} | authorization: {} | crop: {} | objective: {} | dose: {}",
                    row.product,
                    render_values(&row.compositions, 4, 120, " | "),
                    render_values(&row.formulation_types, 5, 60, ", "),
                    row.authorization,
                    render_values(&row.crops, 10, 60, ", "),
                    render_values(&row.objectives, 10, 110, ", "),
                    render_values(&row.doses, 10, 80, "; "),
                )
            }
        })
        .collect();
    lines.join("\n")
}

fn render_values(values: &BTreeSet<String>, max_items: usize, max_len: usize, sep: &str) -> String {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut cleaned: Vec<String> = Vec::new();
    for value in values {
        let text = value.split_whitespace().collect::<Vec<_>>().join(" ");
        let text = text.trim_matches(|ch: char| matches!(ch, ' ' | '.' | ',' | ':' | ';'));
        if text.is_empty() {
            continue;
        }
        let shortened = truncate_ellipsis(text, max_len);
        let key = normalize(&shortened);
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        cleaned.push(shortened);
        if cleaned.len() >= max_items {
            break;
        }
    }
    if cleaned.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        cleaned.join(sep)
    }
}

fn formulation_of(payload: &Payload) -> String {
    payload.get_first(FORMULATION_KEYS)
}

/// Composition of a label row: walks the alias-key family, rejecting strings
/// that look like safety-contact boilerplate or phone numbers, then falls
/// back to the chemical group, the product catalog, and finally any payload
/// key that mentions an ingredient-like concern.
fn composition_of(payload: &Payload, catalog: &ProductCatalog) -> String {
    let mut parts: Vec<String> = Vec::new();

    for key in COMPOSITION_KEYS {
        let text = payload.value_text(key);
        if !text.is_empty() && looks_like_composition(&text) {
            parts.push(text);
        }
    }
    if parts.is_empty() {
        let group = payload.get_str("chemical_group");
        if !group.is_empty() && looks_like_composition(&group) {
            parts.push(group);
        }
    }
    if parts.is_empty() {
        let product_id = payload.get_str("product_id");
        if !product_id.is_empty() {
            let from_catalog = catalog.composition_of(&product_id);
            if !from_catalog.is_empty() && looks_like_composition(from_catalog) {
                parts.push(from_catalog.to_string());
            }
        }
    }
    if parts.is_empty() {
        for (key, _) in payload.0.iter() {
            let key_norm = normalize(key);
            let relevant = ["ingred", "compos", "substance", "active"]
                .iter()
                .any(|tok| key_norm.contains(tok));
            let excluded = ["phone", "telefono", "email", "emergency", "emergencia", "contact"]
                .iter()
                .any(|tok| key_norm.contains(tok));
            if !relevant || excluded {
                continue;
            }
            let text = payload.value_text(key);
            if !text.is_empty() && looks_like_composition(&text) {
                parts.push(text);
            }
        }
    }

    if parts.is_empty() {
        return NOT_AVAILABLE.to_string();
    }

    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut cleaned: Vec<String> = Vec::new();
    for part in parts {
        let collapsed = part.split_whitespace().collect::<Vec<_>>().join(" ");
        let key = normalize(&collapsed);
        if !key.is_empty() && seen.insert(key) {
            cleaned.push(collapsed);
        }
    }
    truncate_ellipsis(&cleaned.join(" | "), 250)
}

/// A composition string must not be a safety notice or carry a phone-like
/// digit run.
fn looks_like_composition(text: &str) -> bool {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return false;
    }
    let boilerplate = ["telefono", "phone", "emergencia", "emergency", "advertencia", "contacto"];
    if boilerplate.iter().any(|tok| normalized.contains(tok)) {
        return false;
    }
    let mut digit_run = 0usize;
    for ch in normalized.chars() {
        if ch.is_ascii_digit() || ch == '-' || ch == ' ' {
            if ch.is_ascii_digit() {
                digit_run += 1;
            }
            if digit_run >= 8 {
                return false;
            }
        } else {
            digit_run = 0;
        }
    }
    true
}

/// Cleans dose text: collapsed whitespace, spaced ranges, a space between a
/// number and its unit, and tidy separators.
fn normalize_dose(value: &str) -> String {
    let collapsed = value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|ch: char| matches!(ch, ' ' | '.' | ',' | ':' | ';'))
        .to_string();
    if collapsed.is_empty() {
        return String::new();
    }

    let mut spaced = String::with_capacity(collapsed.len() + 8);
    let chars: Vec<char> = collapsed.chars().collect();
    for (i, ch) in chars.iter().enumerate() {
        spaced.push(*ch);
        if ch.is_ascii_digit() {
            if let Some(next) = chars.get(i + 1) {
                if next.is_alphabetic() {
                    spaced.push(' ');
                }
            }
        }
    }

    spaced
        .replace(" ;", ";")
        .replace(';', "; ")
        .replace(" ,", ",")
        .replace(',', ", ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|ch: char| matches!(ch, ' ' | '.'))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(id: &str, name: &str, auth: &str, crop: &str, objective: &str, dose: &str) -> Hit {
        Hit::new(
            id,
            0.5,
            Payload::from_value(json!({
                "trade_name": name,
                "authorization": auth,
                "composition": "Azufre 50% p/p",
                "formulation_type": "WP",
                "crop": crop,
                "objective": objective,
                "dose_text": dose,
            })),
        )
    }

    fn empty_catalog() -> ProductCatalog {
        ProductCatalog::from_records(Vec::new())
    }

    #[test]
    fn consolidation_keys_are_unique() {
        let hits = vec![
            hit("1", "Fungex", "1234", "Cerezo", "Oidio", "200 g/hl"),
            hit("2", "FUNGEX", "1234", "Vid", "Botrytis", "300g/hl"),
            hit("3", "Acarix", "5678", "Vid", "Arañita", "1 l/ha"),
        ];
        let rows = consolidate(&hits, &empty_catalog());
        assert_eq!(rows.len(), 2);
        let keys: BTreeSet<(String, String)> = rows
            .iter()
            .map(|row| (normalize(&row.authorization), normalize(&row.product)))
            .collect();
        assert_eq!(keys.len(), rows.len());

        let fungex = rows.iter().find(|row| row.product == "Fungex").unwrap();
        assert_eq!(fungex.crops.len(), 2);
        assert_eq!(fungex.objectives.len(), 2);
    }

    #[test]
    fn rendering_switches_to_compact_over_threshold() {
        let mut hits = Vec::new();
        for i in 0..(COMPACT_THRESHOLD + 1) {
            hits.push(hit(
                &i.to_string(),
                &format!("Product{i}"),
                &format!("{i}"),
                "Vid",
                "Oidio",
                "1 l/ha",
            ));
        }
        let (block, compact) = render_evidence_block(&hits, &empty_catalog());
        assert!(compact);
        assert!(!block.contains("dose:"));

        let (block, compact) = render_evidence_block(&hits[..3], &empty_catalog());
        assert!(!compact);
        assert!(block.contains("dose:"));
    }

    #[test]
    fn phone_like_values_are_rejected_as_composition() {
        assert!(!looks_like_composition("telefono de emergencia"));
        assert!(!looks_like_composition("llamar al +56 2 2345 6789"));
        assert!(looks_like_composition("Azufre 50% p/p"));
    }

    #[test]
    fn dose_text_is_normalized() {
        assert_eq!(normalize_dose("200g/hl;300 g/hl"), "200 g/hl; 300 g/hl");
        assert_eq!(normalize_dose("  1,5   l/ha "), "1, 5 l/ha");
    }

    #[test]
    fn value_sets_are_capped_in_rendering() {
        let values: BTreeSet<String> = (0..30).map(|i| format!("valor {i}")).collect();
        let rendered = render_values(&values, 5, 40, ", ");
        assert_eq!(rendered.split(", ").count(), 5);
    }

    #[test]
    fn empty_hits_render_placeholder() {
        let (block, compact) = render_evidence_block(&[], &empty_catalog());
        assert_eq!(block, "- no label data");
        assert!(!compact);
    }
}
