//! Builds the deduplicated, user-facing candidate entities ("offered
//! reports") a follow-up turn resolves against: one option per matched
//! document or catalog row, joined against the trial catalog and annotated
//! with why each one was included.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::catalog::{TrialCatalog, TrialRecord};
use crate::models::{CandidateEntity, DocumentContext, EntitySource, Hit, MatchScope};
use crate::text::{normalize, token_roots};

/// An offered list never grows past this many options.
pub const MAX_OFFERED_ENTITIES: usize = 12;

const OVERVIEW_SNIPPET_MAX: usize = 420;

const NOT_AVAILABLE: &str = "n/a";

static MISSING_MARKERS: &[&str] = &["na", "n/a", "nd", "n/d", "s/i", "sin info", "sin informacion"];

fn display_value(value: &str) -> String {
    let text = value.trim();
    if text.is_empty() || MISSING_MARKERS.contains(&normalize(text).as_str()) {
        NOT_AVAILABLE.to_string()
    } else {
        text.to_string()
    }
}

fn entity_label(product: &str, species: &str, variety: &str, season: &str) -> String {
    format!("{product} ({species}, {variety}, {season})")
}

/// Lookup keys a document or file value can be found under: the raw value,
/// its file name, and its stem.
fn doc_lookup_keys(value: &str) -> BTreeSet<String> {
    let raw = value.trim();
    if raw.is_empty() {
        return BTreeSet::new();
    }
    let name = Path::new(raw)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = Path::new(&name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();
    [raw.to_string(), name, stem]
        .into_iter()
        .map(|key| normalize(&key))
        .filter(|key| !key.is_empty())
        .collect()
}

/// Document-id candidates derivable from a file value, most specific first.
fn doc_id_candidates_from_file(value: &str) -> Vec<String> {
    let raw = value.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    let name = Path::new(raw)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = Path::new(&name)
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut out: Vec<String> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for candidate in [stem, name, raw.to_string()] {
        let text = candidate.trim().to_string();
        if text.is_empty() {
            continue;
        }
        let key = normalize(&text);
        if seen.insert(key) {
            out.push(text);
        }
    }
    out
}

fn entity_from_fields(
    product: &str,
    client: &str,
    season: &str,
    species: &str,
    variety: &str,
    doc_ids: Vec<String>,
    overview: String,
    source: EntitySource,
) -> CandidateEntity {
    let product = display_value(product);
    let species_display = display_value(species);
    let variety_display = display_value(variety);
    let season_display = display_value(season);
    CandidateEntity {
        label: entity_label(&product, &species_display, &variety_display, &season_display),
        products: vec![product.clone()],
        doc_ids,
        product,
        client: display_value(client),
        season: season_display,
        species: species_display,
        variety: variety_display,
        overview,
        source,
        match_scope: MatchScope::QueryMatch,
        inclusion_reason: String::new(),
    }
}

/// One option per distinct document in the hit list, joined against the
/// trial catalog by file name or doc-id lookup keys, with a payload-only
/// fallback so real semantic evidence is never dropped on a catalog miss.
pub fn entities_from_hits(
    hits: &[Hit],
    catalog: &TrialCatalog,
    overviews: &HashMap<String, DocumentContext>,
) -> Vec<CandidateEntity> {
    let mut by_key: HashMap<String, &TrialRecord> = HashMap::new();
    for record in catalog.records() {
        for key in doc_lookup_keys(&record.file_name) {
            by_key.entry(key).or_insert(record);
        }
    }

    let mut options: Vec<CandidateEntity> = Vec::new();
    let mut seen_doc_ids: BTreeSet<String> = BTreeSet::new();

    for hit in hits {
        let payload = &hit.payload;
        let doc_id = hit.doc_id();
        if !doc_id.is_empty() && !seen_doc_ids.insert(doc_id.clone()) {
            continue;
        }

        let file = payload.get_first(&["file_name", "pdf_filename", "pdf"]);
        let mut record: Option<&TrialRecord> = None;
        for source in [&file, &doc_id] {
            for key in doc_lookup_keys(source) {
                if let Some(found) = by_key.get(&key) {
                    record = Some(found);
                    break;
                }
            }
            if record.is_some() {
                break;
            }
        }

        let mut doc_ids: Vec<String> = Vec::new();
        if !doc_id.is_empty() {
            doc_ids.push(doc_id.clone());
        }
        doc_ids.extend(doc_id_candidates_from_file(&file));
        if let Some(record) = record {
            doc_ids.extend(doc_id_candidates_from_file(&record.file_name));
        }
        let mut unique_doc_ids: Vec<String> = Vec::new();
        let mut seen_keys: BTreeSet<String> = BTreeSet::new();
        for candidate in doc_ids {
            let key = normalize(&candidate);
            if !key.is_empty() && seen_keys.insert(key) {
                unique_doc_ids.push(candidate);
            }
        }

        let overview = overviews
            .get(&doc_id)
            .map(overview_snippet)
            .unwrap_or_default();

        let entity = match record {
            Some(record) => entity_from_fields(
                &record.product,
                &record.client,
                &record.season,
                &record.species,
                &record.variety,
                unique_doc_ids,
                overview,
                EntitySource::Semantic,
            ),
            None => entity_from_fields(
                &payload.get_str("product"),
                &payload.get_str("client"),
                &payload.get_str("season"),
                &payload.get_str("species"),
                &payload.get_str("variety"),
                unique_doc_ids,
                overview,
                EntitySource::Semantic,
            ),
        };
        options.push(entity);
    }

    dedupe_entities(options)
}

/// Catalog-driven options from a ranked query match.
pub fn entities_from_catalog_query(
    catalog: &TrialCatalog,
    question: &str,
    limit: usize,
) -> Vec<CandidateEntity> {
    let records = catalog.find_by_query(question, limit.max(1));
    let options = records
        .into_iter()
        .map(|record| {
            entity_from_fields(
                &record.product,
                &record.client,
                &record.season,
                &record.species,
                &record.variety,
                doc_id_candidates_from_file(&record.file_name),
                String::new(),
                EntitySource::CatalogQuery,
            )
        })
        .collect();
    dedupe_entities(options)
}

/// Catalog-driven options for explicitly detected species.
pub fn entities_from_catalog_species(
    catalog: &TrialCatalog,
    species_norm: &BTreeSet<String>,
    limit: usize,
) -> Vec<CandidateEntity> {
    let records = catalog.find_by_species(species_norm, limit.max(1));
    let options = records
        .into_iter()
        .map(|record| {
            entity_from_fields(
                &record.product,
                &record.client,
                &record.season,
                &record.species,
                &record.variety,
                doc_id_candidates_from_file(&record.file_name),
                String::new(),
                EntitySource::CatalogSpecies,
            )
        })
        .collect();
    dedupe_entities(options)
}

fn dedupe_entities(options: Vec<CandidateEntity>) -> Vec<CandidateEntity> {
    let mut out: Vec<CandidateEntity> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for option in options {
        if seen.insert(option.identity_key()) {
            out.push(option);
        }
    }
    out
}

/// Key-unique merge of two offered lists, primary first, capped.
pub fn merge_entities(
    primary: Vec<CandidateEntity>,
    secondary: Vec<CandidateEntity>,
    limit: usize,
) -> Vec<CandidateEntity> {
    let mut out: Vec<CandidateEntity> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for option in primary.into_iter().chain(secondary) {
        if !seen.insert(option.identity_key()) {
            continue;
        }
        out.push(option);
        if out.len() >= limit.max(1) {
            break;
        }
    }
    out
}

/// Classifies each entity against the crop the user asked about and records
/// a human-readable inclusion reason for the answer-drafting model.
pub fn annotate_match_scope(entities: &mut [CandidateEntity], species_hints: &BTreeSet<String>) {
    for entity in entities.iter_mut() {
        let species_norm = normalize(&entity.species);
        let species_roots = token_roots(&species_norm);
        let direct = !species_hints.is_empty()
            && !species_norm.is_empty()
            && (species_hints.contains(&species_norm)
                || species_hints.iter().any(|hint| {
                    !species_roots.is_empty() && !species_roots.is_disjoint(&token_roots(hint))
                }));

        if direct {
            entity.match_scope = MatchScope::DirectCrop;
            entity.inclusion_reason = match entity.source {
                EntitySource::CatalogSpecies => {
                    "Matches the crop asked about (validated against the trial catalog).".to_string()
                }
                EntitySource::CatalogQuery => {
                    "Matches the crop and the query terms.".to_string()
                }
                EntitySource::Semantic => {
                    "Matches the crop asked about and was retrieved by technical similarity."
                        .to_string()
                }
            };
            continue;
        }

        if !species_hints.is_empty() {
            entity.match_scope = MatchScope::CrossCrop;
            entity.inclusion_reason = match entity.source {
                EntitySource::Semantic => {
                    "Included as a reference on another crop by technical similarity with the problem asked about."
                        .to_string()
                }
                _ => {
                    "Included as a reference on another crop by query-term overlap.".to_string()
                }
            };
            continue;
        }

        entity.match_scope = MatchScope::QueryMatch;
        entity.inclusion_reason = match entity.source {
            EntitySource::Semantic => "Semantic match with the technical query.".to_string(),
            EntitySource::CatalogQuery => "Query-term match in the trial catalog.".to_string(),
            EntitySource::CatalogSpecies => "Species detected in the conversation context.".to_string(),
        };
    }
}

/// Short descriptive snippet for one document: overview chunks first, then
/// objective/summary/conclusion sections, then the first text chunk.
pub fn overview_snippet(context: &DocumentContext) -> String {
    let mut candidates: Vec<&str> = Vec::new();
    for chunk in &context.chunks {
        let text = chunk.text.trim();
        if text.is_empty() {
            continue;
        }
        let chunk_type = normalize(&chunk.chunk_type);
        if chunk_type == "doc_overview" || chunk_type == "conclusion_overview" {
            candidates.push(text);
            continue;
        }
        let section = normalize(&chunk.section);
        if ["objetivo", "resumen", "conclusion", "objective", "abstract"]
            .iter()
            .any(|token| section.contains(token))
        {
            candidates.push(text);
        }
    }

    if candidates.is_empty() {
        if let Some(chunk) = context
            .chunks
            .iter()
            .find(|chunk| !chunk.text.trim().is_empty())
        {
            candidates.push(chunk.text.trim());
        }
    }

    if candidates.is_empty() {
        return String::new();
    }

    let merged = candidates.join(" ");
    let collapsed = merged.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(OVERVIEW_SNIPPET_MAX).collect()
}

/// Plain-text numbered option list used in clarification replies.
pub fn render_entity_options(entities: &[CandidateEntity]) -> String {
    if entities.is_empty() {
        return String::new();
    }
    entities
        .iter()
        .enumerate()
        .map(|(i, entity)| format!("{}. {} | client: {}", i + 1, entity.label, entity.client))
        .collect::<Vec<_>>()
        .join("\n")
}
