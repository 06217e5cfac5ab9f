//! Structured signal extraction from free conversational text: catalog-backed
//! entity detection plus regex hint heuristics. Patterns, deny-lists, and
//! stopwords live in static tables so the matching policy stays testable on
//! its own.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::catalog::TrialCatalog;
use crate::text::{contains_with_plural_support, normalize, token_roots};

/// Phrases that introduce an active-ingredient mention.
static INGREDIENT_PATTERNS: &[&str] = &[
    r"\b(?:contiene[n]?|contengan?|tiene[n]?|tengan?|con|a base de|contains?|containing|based on)\s+([a-z0-9][a-z0-9\s\-]{2,80})",
    r"\b(?:ingrediente activo|ingredientes activos|composicion|sustancia activa|active ingredients?)\s*(?:de|of)?\s*([a-z0-9][a-z0-9\s\-]{2,80})",
];

/// Phrases that introduce a target/pest objective.
static OBJECTIVE_PATTERNS: &[&str] = &[
    r"\b(?:para|contra|tratar|trata[n]?|traten|controla[rn]?|combate[rn]?|against|to control|to treat)\s+([a-z0-9][a-z0-9\s\-]{2,80})",
];

/// Phrases that introduce the crop the question is about.
static CROP_PATTERNS: &[&str] = &[
    r"\b(?:en|para|in|on)\s+(?:el|la|los|las|the)?\s*([a-z0-9][a-z0-9\s\-]{2,40})\b",
];

/// Generic nouns that must not be captured as an ingredient.
static INGREDIENT_NOISE: &[&str] = &[
    "dosis", "dosificacion", "cultivo", "cultivos", "objetivo", "objetivos",
    "plaga", "plagas", "producto", "productos", "registro", "registros",
    "dose", "crop", "target", "pest", "product", "products",
];

/// Generic nouns that must not be captured as a crop.
static CROP_NOISE: &[&str] = &[
    "registro", "registros", "producto", "productos", "label", "labels",
    "catalogo", "catalog",
];

/// Tokens that disqualify an objective capture (the phrase drifted into an
/// ingredient clause).
static OBJECTIVE_EXCLUDES: &[&str] = &["contiene", "ingrediente", "composicion", "contains"];

/// Connectives that end a hint phrase.
static HINT_CONNECTIVES: &[&str] = &[
    " con ", " en ", " y ", " que ", " del ", " de ", " para ", " sobre ",
    " and ", " with ", " for ",
];

/// Literal phrasings of "list everything" intent.
static EXHAUSTIVE_PHRASES: &[&str] = &[
    "todos los productos", "todas las opciones", "todos los registros",
    "todos los ensayos", "todas las pruebas", "todos los estudios",
    "todos los informes", "listado completo", "lista completa", "dame todos",
    "muestrame todos", "all products", "all trials", "all reports",
    "full list", "complete list",
];

fn compiled(
    patterns: &'static [&'static str],
    cell: &'static OnceLock<Vec<Regex>>,
) -> &'static Vec<Regex> {
    cell.get_or_init(|| patterns.iter().filter_map(|p| Regex::new(p).ok()).collect())
}

fn ingredient_regexes() -> &'static Vec<Regex> {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    compiled(INGREDIENT_PATTERNS, &CELL)
}

fn objective_regexes() -> &'static Vec<Regex> {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    compiled(OBJECTIVE_PATTERNS, &CELL)
}

fn crop_regexes() -> &'static Vec<Regex> {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    compiled(CROP_PATTERNS, &CELL)
}

/// Normalized candidate values per category, detected against the trial
/// catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntitySignals {
    pub species: BTreeSet<String>,
    pub products: BTreeSet<String>,
    pub varieties: BTreeSet<String>,
    pub clients: BTreeSet<String>,
    pub seasons: BTreeSet<String>,
}

/// Scans free text for catalog entities. Species are matched both by
/// plural/diacritic-tolerant containment and by root-set intersection, so
/// "cerezos" and "cerezó" both resolve to a catalog "cerezo". The remaining
/// categories are widened through the catalog's ranked query match.
pub fn detect_entities(catalog: &TrialCatalog, text: &str) -> EntitySignals {
    let mut signals = EntitySignals::default();
    let norm_text = normalize(text);
    if norm_text.is_empty() {
        return signals;
    }

    let query_roots = token_roots(&norm_text);

    for species in catalog.species() {
        if species.is_empty() {
            continue;
        }
        if contains_with_plural_support(&norm_text, species) {
            signals.species.insert(species.clone());
            continue;
        }
        let species_roots = token_roots(species);
        if !query_roots.is_empty() && !species_roots.is_disjoint(&query_roots) {
            signals.species.insert(species.clone());
        }
    }

    for record in catalog.find_by_query(&norm_text, 80) {
        if !record.species.is_empty() {
            let species_norm = normalize(&record.species);
            let species_roots = token_roots(&species_norm);
            if contains_with_plural_support(&norm_text, &species_norm)
                || (!query_roots.is_empty() && !species_roots.is_disjoint(&query_roots))
            {
                signals.species.insert(species_norm);
            }
        }
        for (value, set) in [
            (&record.product, &mut signals.products),
            (&record.variety, &mut signals.varieties),
            (&record.client, &mut signals.clients),
            (&record.season, &mut signals.seasons),
        ] {
            let normalized = normalize(value);
            if !normalized.is_empty() {
                set.insert(normalized);
            }
        }
    }

    signals
}

/// Active-ingredient hint from conversational phrasing, if any.
pub fn ingredient_hint(text: &str) -> Option<String> {
    let norm = normalize(text);
    for regex in ingredient_regexes() {
        if let Some(captures) = regex.captures(&norm) {
            if let Some(group) = captures.get(1) {
                let candidate = sanitize_hint_phrase(group.as_str());
                let leading = candidate.split_whitespace().next().unwrap_or("");
                if !candidate.is_empty()
                    && !INGREDIENT_NOISE.contains(&candidate.as_str())
                    && !INGREDIENT_NOISE.contains(&leading)
                {
                    return Some(candidate);
                }
            }
        }
    }
    None
}

/// Target/pest objective hint from conversational phrasing, if any.
pub fn objective_hint(text: &str) -> Option<String> {
    let norm = normalize(text);
    for regex in objective_regexes() {
        if let Some(captures) = regex.captures(&norm) {
            if let Some(group) = captures.get(1) {
                let candidate = sanitize_hint_phrase(group.as_str());
                if candidate.is_empty() {
                    continue;
                }
                if OBJECTIVE_EXCLUDES.iter().any(|tok| candidate.contains(tok)) {
                    continue;
                }
                return Some(candidate);
            }
        }
    }
    None
}

/// Crop hint from conversational phrasing, if any.
pub fn crop_hint(text: &str) -> Option<String> {
    let norm = normalize(text);
    for regex in crop_regexes() {
        if let Some(captures) = regex.captures(&norm) {
            if let Some(group) = captures.get(1) {
                let candidate = sanitize_hint_phrase(group.as_str());
                if !candidate.is_empty()
                    && !CROP_NOISE.iter().any(|tok| candidate.contains(tok))
                {
                    return Some(candidate);
                }
            }
        }
    }
    None
}

/// True when the user asked for an exhaustive listing.
pub fn is_exhaustive_intent(text: &str) -> bool {
    let norm = normalize(text);
    EXHAUSTIVE_PHRASES.iter().any(|phrase| norm.contains(phrase))
}

/// Trims a captured hint at the first connective so trailing clauses do not
/// pollute the phrase.
fn sanitize_hint_phrase(text: &str) -> String {
    let collapsed = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|ch: char| matches!(ch, ' ' | '.' | ',' | ':' | ';'))
        .to_string();
    if collapsed.is_empty() {
        return collapsed;
    }

    let padded = format!(" {} ", collapsed.to_lowercase());
    let mut cut = padded.len();
    for connective in HINT_CONNECTIVES {
        if let Some(idx) = padded.find(connective) {
            cut = cut.min(idx);
        }
    }
    let kept = if cut < padded.len() {
        padded[..cut].trim().to_string()
    } else {
        collapsed
    };
    kept.trim_matches(|ch: char| matches!(ch, ' ' | '.' | ',' | ':' | ';'))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TrialRecord;

    fn catalog() -> TrialCatalog {
        TrialCatalog::from_records(vec![
            TrialRecord::new("2022", "AgroSur", "Fungex", "Cerezo", "Lapins", "a.pdf", "", ""),
            TrialRecord::new("2021", "Valle", "Nitrofol", "Ciruelo", "D'Agen", "b.pdf", "", ""),
        ])
    }

    #[test]
    fn detects_species_with_plural_and_accent_variants() {
        let catalog = catalog();
        assert!(detect_entities(&catalog, "problemas en cerezos").species.contains("cerezo"));
        assert!(detect_entities(&catalog, "daño en cerezó").species.contains("cerezo"));
        assert!(detect_entities(&catalog, "hojas de ciruelas").species.contains("ciruelo"));
    }

    #[test]
    fn ingredient_hint_is_extracted_and_denoised() {
        assert_eq!(
            ingredient_hint("busco productos que contienen abamectina para vid"),
            Some("abamectina".to_string())
        );
        assert_eq!(ingredient_hint("producto con dosis alta"), None);
    }

    #[test]
    fn objective_hint_skips_ingredient_clauses() {
        assert_eq!(
            objective_hint("algo contra pulgon lanigero en manzano"),
            Some("pulgon lanigero".to_string())
        );
        assert_eq!(objective_hint("sirve para contiene azufre"), None);
    }

    #[test]
    fn hint_phrases_cut_at_connectives() {
        assert_eq!(
            objective_hint("tratamiento contra botrytis y oidio"),
            Some("botrytis".to_string())
        );
    }

    #[test]
    fn exhaustive_intent_requires_literal_phrasing() {
        assert!(is_exhaustive_intent("dame todos los productos para vid"));
        assert!(!is_exhaustive_intent("dame un producto para vid"));
    }
}
