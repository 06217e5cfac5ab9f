//! Assembles bounded, section-prioritized document contexts from raw chunk
//! hits. Each selected document gets a dynamic character budget and a greedy
//! packing pass over a priority-ordered selection plan.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::RetrievalError;
use crate::models::{ContextChunk, DocumentContext, Filter, Hit, Payload};
use crate::text::normalize;
use crate::traits::VectorSearch;

/// Section labels that must survive packing whenever they fit (source
/// corpus naming; reports occasionally arrive in English).
static CORE_SECTIONS: &[&str] = &[
    "resumen", "objetivo", "materiales y metodo", "materiales y metodos",
    "diseno experimental", "evaluaciones", "tratamiento", "tratamientos",
    "resultados", "conclusiones", "conclusion",
];

static CORE_SECTIONS_EN: &[&str] = &[
    "abstract", "objective", "materials and methods", "methods", "results",
];

/// A table chunk is only prioritized when its section suggests treatments,
/// doses, design, or results.
static TABLE_SECTION_HINTS: &[&str] = &[
    "trat", "dosis", "diseno", "result", "eval", "treatment", "dose", "design",
];

static OVERVIEW_CHUNK_TYPES: &[&str] = &["doc_overview", "conclusion_overview"];

#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// First chunks of the document (front matter, summary, introduction).
    pub head: usize,
    /// Last chunks (conclusions, annexes).
    pub tail: usize,
    /// Window before the best-scoring chunk.
    pub before: usize,
    /// Window after the best-scoring chunk. Larger than `before`: discussion
    /// and results usually follow a match.
    pub after: usize,
    pub total_budget: usize,
    pub min_doc_budget: usize,
    pub max_doc_budget: usize,
    pub include_overview: bool,
    pub scroll_page_size: usize,
    pub scroll_max_points: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            head: 8,
            tail: 10,
            before: 6,
            after: 12,
            total_budget: 96_000,
            min_doc_budget: 6_000,
            max_doc_budget: 20_000,
            include_overview: true,
            scroll_page_size: 128,
            scroll_max_points: 2_000,
        }
    }
}

impl AssemblerConfig {
    /// Per-document character budget: an even share of the total, clamped so
    /// documents are neither starved when many are selected nor wastefully
    /// over-allocated when few are.
    pub fn doc_budget(&self, docs_count: usize) -> usize {
        let total = self.total_budget.max(1);
        let min = self.min_doc_budget.max(1);
        let max = self.max_doc_budget.max(min);
        (total / docs_count.max(1)).clamp(min, max)
    }
}

pub struct ContextAssembler<'a, V: VectorSearch> {
    store: &'a V,
    collection: &'a str,
    config: &'a AssemblerConfig,
}

impl<'a, V: VectorSearch + Send + Sync> ContextAssembler<'a, V> {
    pub fn new(store: &'a V, collection: &'a str, config: &'a AssemblerConfig) -> Self {
        Self {
            store,
            collection,
            config,
        }
    }

    /// Groups hits by document, keeps the `top_docs` best documents, fetches
    /// their full chunk sets, and packs a budget-bounded context per
    /// document. Documents with no retrievable chunks are kept with their
    /// metadata so downstream stages still see that they matched.
    pub async fn build(
        &self,
        hits: &[Hit],
        top_docs: usize,
    ) -> Result<Vec<DocumentContext>, RetrievalError> {
        let mut doc_best: HashMap<String, (f32, Option<u32>, Payload)> = HashMap::new();
        for hit in hits {
            let doc_id = hit.doc_id();
            if doc_id.is_empty() {
                continue;
            }
            let candidate = (hit.score, hit.payload.chunk_index(), hit.payload.clone());
            match doc_best.entry(doc_id) {
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(candidate);
                }
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    if hit.score > entry.get().0 {
                        entry.insert(candidate);
                    }
                }
            }
        }

        let mut chosen: Vec<(String, (f32, Option<u32>, Payload))> = doc_best.into_iter().collect();
        chosen.sort_by(|a, b| b.1 .0.total_cmp(&a.1 .0).then_with(|| a.0.cmp(&b.0)));
        chosen.truncate(top_docs.max(1));

        let budget = self.config.doc_budget(chosen.len());
        debug!(docs = chosen.len(), budget, "per-document budget assigned");

        let mut out = Vec::new();
        for (doc_id, (_score, best_idx, payload_ref)) in &chosen {
            let points = self.fetch_doc_points(hits, doc_id).await?;

            let mut location = location_from_payload(payload_ref);
            fill_location_from_points(&mut location, &points);

            let chunks = pack_doc(&points, *best_idx, budget, self.config);
            out.push(DocumentContext {
                doc_id: doc_id.clone(),
                file_name: payload_ref.get_first(&["file_name", "pdf_filename", "pdf"]),
                season: payload_ref.get_str("season"),
                client: payload_ref.get_str("client"),
                product: payload_ref.get_str("product"),
                species: payload_ref.get_str("species"),
                variety: payload_ref.get_str("variety"),
                region: location.region,
                locality: location.locality,
                district: location.district,
                location: location.location,
                chunks,
            });
        }

        Ok(out)
    }

    /// Full chunk set of one document via scroll. When the store answers but
    /// rejects the scroll (e.g. the keyword index is missing), the seed hits
    /// of that document stand in; transport failures propagate.
    async fn fetch_doc_points(
        &self,
        hits: &[Hit],
        doc_id: &str,
    ) -> Result<Vec<Hit>, RetrievalError> {
        let filter = Filter::field_value("doc_id", doc_id);
        match self
            .store
            .scroll(
                self.collection,
                &filter,
                self.config.scroll_page_size,
                self.config.scroll_max_points,
            )
            .await
        {
            Ok(points) => Ok(points),
            Err(RetrievalError::BackendResponse { backend, details }) => {
                warn!(
                    backend = %backend,
                    details = %details,
                    doc_id,
                    "scroll rejected, using seed hits"
                );
                Ok(hits
                    .iter()
                    .filter(|hit| hit.doc_id() == doc_id)
                    .cloned()
                    .collect())
            }
            Err(other) => Err(other),
        }
    }
}

fn section_norm(payload: &Payload) -> String {
    normalize(&payload.get_str("section_norm"))
}

fn is_overview_chunk(payload: &Payload) -> bool {
    let chunk_type = payload.get_str("chunk_type");
    OVERVIEW_CHUNK_TYPES.contains(&chunk_type.as_str())
}

fn is_core_section(payload: &Payload) -> bool {
    let section = section_norm(payload);
    if section.is_empty() {
        return false;
    }
    // Containment also covers composite labels like "resultados > cuadro 3".
    CORE_SECTIONS
        .iter()
        .chain(CORE_SECTIONS_EN)
        .any(|core| section == *core || section.contains(core))
}

fn is_relevant_table(payload: &Payload) -> bool {
    if payload.get_str("chunk_type") != "table" {
        return false;
    }
    let section = section_norm(payload);
    TABLE_SECTION_HINTS.iter().any(|hint| section.contains(hint))
}

/// Selection plan as a priority-ordered union: core sections and relevant
/// tables, the asymmetric window around the best chunk, head and tail
/// windows, and (when enabled) document-level overview chunks.
fn plan_indices(points: &[Hit], best_idx: Option<u32>, config: &AssemblerConfig) -> Vec<u32> {
    let indices: BTreeSet<u32> = points
        .iter()
        .filter_map(|point| point.payload.chunk_index())
        .collect();
    let (Some(&min_i), Some(&max_i)) = (indices.first(), indices.last()) else {
        return Vec::new();
    };

    let mut wanted: BTreeSet<u32> = BTreeSet::new();

    for point in points {
        let payload = &point.payload;
        let Some(idx) = payload.chunk_index() else {
            continue;
        };
        if !config.include_overview && is_overview_chunk(payload) {
            continue;
        }
        if is_core_section(payload) || is_relevant_table(payload) {
            wanted.insert(idx);
        }
    }

    if let Some(best) = best_idx {
        let from = best.saturating_sub(config.before as u32);
        let to = best.saturating_add(config.after as u32);
        wanted.extend(from..=to);
    }

    wanted.extend(min_i..min_i.saturating_add(config.head as u32));
    let tail_from = max_i.saturating_sub(config.tail.saturating_sub(1) as u32);
    wanted.extend(tail_from..=max_i);

    if config.include_overview {
        for point in points {
            if let Some(idx) = point.payload.chunk_index() {
                if is_overview_chunk(&point.payload) {
                    wanted.insert(idx);
                }
            }
        }
    }

    wanted.into_iter().collect()
}

/// Greedy packing in priority order: core/table/overview chunks first, then
/// the remaining plan. A chunk whose text would exceed the remaining budget
/// is skipped, not truncated. Output is re-sorted by chunk index.
fn pack_doc(
    points: &[Hit],
    best_idx: Option<u32>,
    doc_char_budget: usize,
    config: &AssemblerConfig,
) -> Vec<ContextChunk> {
    let mut by_idx: HashMap<u32, &Payload> = HashMap::new();
    for point in points {
        if let Some(idx) = point.payload.chunk_index() {
            by_idx.entry(idx).or_insert(&point.payload);
        }
    }

    let plan = plan_indices(points, best_idx, config);

    let mut core_first: Vec<u32> = Vec::new();
    let mut rest: Vec<u32> = Vec::new();
    for idx in plan {
        let Some(&payload) = by_idx.get(&idx) else {
            continue;
        };
        if is_core_section(payload) || is_relevant_table(payload) || is_overview_chunk(payload) {
            core_first.push(idx);
        } else {
            rest.push(idx);
        }
    }

    let mut chunks: Vec<ContextChunk> = Vec::new();
    let mut total_chars = 0usize;
    let mut seen: HashSet<u32> = HashSet::new();

    for idx in core_first.into_iter().chain(rest) {
        if !seen.insert(idx) {
            continue;
        }
        let Some(&payload) = by_idx.get(&idx) else {
            continue;
        };
        if !config.include_overview && is_overview_chunk(payload) {
            continue;
        }
        let text = payload.text();
        if text.is_empty() {
            continue;
        }
        let text_chars = text.chars().count();
        if total_chars + text_chars > doc_char_budget {
            continue;
        }
        total_chars += text_chars;
        chunks.push(ContextChunk {
            index: idx,
            chunk_type: payload.get_str("chunk_type"),
            page_number: payload.page_number(),
            section: payload.get_str("section_norm"),
            heading_path: payload.get_str("heading_path"),
            text,
        });
    }

    chunks.sort_by_key(|chunk| chunk.index);
    chunks
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Location {
    region: String,
    locality: String,
    district: String,
    location: String,
}

impl Location {
    fn is_complete(&self) -> bool {
        !self.region.is_empty()
            && !self.locality.is_empty()
            && !self.district.is_empty()
            && !self.location.is_empty()
    }

    fn is_blank(&self) -> bool {
        self.region.is_empty()
            && self.locality.is_empty()
            && self.district.is_empty()
            && self.location.is_empty()
    }

    fn merge(&mut self, candidate: Location) {
        for (slot, value) in [
            (&mut self.region, candidate.region),
            (&mut self.locality, candidate.locality),
            (&mut self.district, candidate.district),
            (&mut self.location, candidate.location),
        ] {
            if slot.is_empty() && !value.is_empty() {
                *slot = value;
            }
        }
    }
}

fn location_from_payload(payload: &Payload) -> Location {
    Location {
        region: payload.get_first(&["region", "location_region", "state"]),
        locality: payload.get_first(&["locality", "location_locality", "localidad", "city"]),
        district: payload.get_first(&["district", "commune", "comuna", "location_district"]),
        location: payload.get_first(&["location", "location_text", "ubicacion", "zone"]),
    }
}

fn district_regexes() -> &'static Vec<Regex> {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    CELL.get_or_init(|| {
        [
            r"(?i)comuna\s+de\s+([A-Za-zÁÉÍÓÚÑáéíóúñ'’.\-\s]{2,80})",
            r"(?i)comuna\s+([A-Za-zÁÉÍÓÚÑáéíóúñ'’.\-\s]{2,80})",
            r"(?i)district\s+of\s+([A-Za-z'’.\-\s]{2,80})",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn locality_regexes() -> &'static Vec<Regex> {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    CELL.get_or_init(|| {
        [
            r"(?i)localidad\s+de\s+([A-Za-zÁÉÍÓÚÑáéíóúñ'’.\-\s]{2,80})",
            r"(?i)localidad\s+([A-Za-zÁÉÍÓÚÑáéíóúñ'’.\-\s]{2,80})",
            r"(?i)located\s+in\s+([A-Za-z'’.\-\s]{2,80})",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn region_regexes() -> &'static Vec<Regex> {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    CELL.get_or_init(|| {
        [
            r"(?i)regi[oó]n\s+del?\s+([A-Za-zÁÉÍÓÚÑáéíóúñ'’.\-\s]{2,120})",
            r"(?i)regi[oó]n\s+de\s+([A-Za-zÁÉÍÓÚÑáéíóúñ'’.\-\s]{2,120})",
            r"(?i)regi[oó]n\s+([A-Za-zÁÉÍÓÚÑáéíóúñ'’.\-\s]{2,120})",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn free_location_regex() -> &'static Option<Regex> {
    static CELL: OnceLock<Option<Regex>> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r"(?i)(ubicad[oa]\s+en\s+[^.\n]{8,180}|located\s+(?:in|at)\s+[^.\n]{8,180})")
            .ok()
    })
}

fn clean_location_value(value: &str) -> String {
    let collapsed = value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(['’', '´'], "'");
    collapsed
        .trim_matches(|ch: char| matches!(ch, ' ' | '.' | ';' | ','))
        .to_string()
}

/// Cuts a captured location phrase at coordinates, parentheses, or country
/// mentions so long sentence tails never leak into a metadata field.
fn cut_location_capture(value: &str) -> String {
    let lowered = value.to_lowercase();
    let mut cut = value.len();
    for separator in ["(", ")", ",", ";"] {
        if let Some(idx) = lowered.find(separator) {
            cut = cut.min(idx);
        }
    }
    for keyword in [" latitud", " longitud", " latitude", " longitude", "chile"] {
        if let Some(idx) = lowered.find(keyword) {
            cut = cut.min(idx);
        }
    }
    let mut kept = value.get(..cut).unwrap_or(value).to_string();
    for trailing in ["en la comuna de", "comuna de"] {
        if let Some(idx) = kept.to_lowercase().find(trailing) {
            kept.truncate(idx);
        }
    }
    clean_location_value(kept.trim_end_matches('-'))
}

fn location_from_text(text: &str) -> Location {
    let mut out = Location::default();
    if text.is_empty() {
        return out;
    }

    for (slot, regexes) in [
        (&mut out.district, district_regexes()),
        (&mut out.locality, locality_regexes()),
        (&mut out.region, region_regexes()),
    ] {
        for regex in regexes {
            if let Some(captures) = regex.captures(text) {
                if let Some(group) = captures.get(1) {
                    let value = cut_location_capture(&clean_location_value(group.as_str()));
                    if !value.is_empty() {
                        *slot = value;
                        break;
                    }
                }
            }
        }
    }

    if let Some(regex) = free_location_regex() {
        if let Some(captures) = regex.captures(text) {
            if let Some(group) = captures.get(1) {
                let value = cut_location_capture(&clean_location_value(group.as_str()));
                if !value.is_empty() {
                    out.location = value;
                }
            }
        }
    }

    out
}

/// Completes missing location fields from any chunk of the document:
/// payload metadata first, free-text extraction from the chunk body as a
/// fallback, merged field by field until complete or exhausted.
fn fill_location_from_points(location: &mut Location, points: &[Hit]) {
    if location.is_complete() {
        return;
    }
    for point in points {
        let mut candidate = location_from_payload(&point.payload);
        if candidate.is_blank() {
            candidate = location_from_text(&point.payload.text());
        }
        location.merge(candidate);
        if location.is_complete() {
            break;
        }
    }
}

/// Renders assembled contexts as the plain-text evidence block handed to the
/// answer-drafting model.
pub fn render_context_block(contexts: &[DocumentContext]) -> String {
    if contexts.is_empty() {
        return "NO_TRIAL_CONTEXT".to_string();
    }
    let mut parts: Vec<String> = Vec::new();
    for (i, context) in contexts.iter().enumerate() {
        parts.push(format!("=== REPORT {} ===", i + 1));
        parts.push(format!("doc_id: {}", context.doc_id));
        parts.push(format!("season: {}", context.season));
        parts.push(format!("client: {}", context.client));
        parts.push(format!("product: {}", context.product));
        parts.push(format!("species: {}", context.species));
        parts.push(format!("variety: {}", context.variety));
        parts.push(format!("district: {}", context.district));
        parts.push(format!("locality: {}", context.locality));
        parts.push(format!("region: {}", context.region));
        parts.push(format!("location: {}", context.location));
        for chunk in &context.chunks {
            if chunk.text.is_empty() {
                continue;
            }
            parts.push(format!("[chunk {} | section {}]", chunk.index, chunk.section));
            parts.push(chunk.text.clone());
        }
        parts.push(String::new());
    }
    parts.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::VectorSearch;
    use async_trait::async_trait;
    use serde_json::json;

    fn chunk_hit(doc: &str, idx: u32, section: &str, chunk_type: &str, text: &str) -> Hit {
        Hit::new(
            format!("{doc}-{idx}"),
            0.0,
            Payload::from_value(json!({
                "doc_id": doc,
                "chunk_index": idx,
                "section_norm": section,
                "chunk_type": chunk_type,
                "text": text,
            })),
        )
    }

    struct FakeStore {
        points: Vec<Hit>,
        fail_scroll: bool,
    }

    #[async_trait]
    impl VectorSearch for FakeStore {
        async fn search(
            &self,
            _collection: &str,
            _vector: &[f32],
            _top_k: usize,
            _filter: Option<&Filter>,
        ) -> Result<Vec<Hit>, RetrievalError> {
            Ok(Vec::new())
        }

        async fn scroll(
            &self,
            _collection: &str,
            filter: &Filter,
            _page_size: usize,
            _max_points: usize,
        ) -> Result<Vec<Hit>, RetrievalError> {
            if self.fail_scroll {
                return Err(RetrievalError::BackendResponse {
                    backend: "qdrant".to_string(),
                    details: "missing index".to_string(),
                });
            }
            let wanted = filter
                .must
                .first()
                .map(|condition| match &condition.matches {
                    crate::models::FieldMatch::Value(value) => value.clone(),
                    crate::models::FieldMatch::AnyOf(values) => {
                        values.first().cloned().unwrap_or_default()
                    }
                })
                .unwrap_or_default();
            Ok(self
                .points
                .iter()
                .filter(|point| point.doc_id() == wanted)
                .cloned()
                .collect())
        }
    }

    #[test]
    fn budget_stays_clamped_for_any_doc_count() {
        let config = AssemblerConfig::default();
        assert_eq!(config.doc_budget(1), config.max_doc_budget);
        assert_eq!(config.doc_budget(8), 12_000);
        assert_eq!(config.doc_budget(50), config.min_doc_budget);
        for count in 1..40 {
            let budget = config.doc_budget(count);
            assert!(budget >= config.min_doc_budget && budget <= config.max_doc_budget);
        }
    }

    #[test]
    fn plan_prioritizes_core_sections_and_windows() {
        let config = AssemblerConfig {
            head: 2,
            tail: 2,
            before: 1,
            after: 2,
            ..AssemblerConfig::default()
        };
        let points: Vec<Hit> = (0..30)
            .map(|i| {
                let section = if i == 15 { "RESULTADOS" } else { "OTRA" };
                chunk_hit("doc", i, section, "paragraph", "text")
            })
            .collect();
        let plan = plan_indices(&points, Some(10), &config);
        assert!(plan.contains(&0) && plan.contains(&1));
        assert!(plan.contains(&28) && plan.contains(&29));
        assert!(plan.contains(&9) && plan.contains(&12));
        assert!(plan.contains(&15));
        assert!(!plan.contains(&20));
    }

    #[test]
    fn packing_respects_budget_and_sorted_unique_indices() {
        let config = AssemblerConfig::default();
        let points: Vec<Hit> = (0..10)
            .map(|i| chunk_hit("doc", i, "RESULTADOS", "paragraph", &"x".repeat(100)))
            .collect();
        let packed = pack_doc(&points, Some(5), 350, &config);
        let total: usize = packed.iter().map(|chunk| chunk.text.chars().count()).sum();
        assert!(total <= 350);
        let indices: Vec<u32> = packed.iter().map(|chunk| chunk.index).collect();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(indices, sorted);
    }

    #[test]
    fn oversized_chunks_are_skipped_not_truncated() {
        let config = AssemblerConfig::default();
        let points = vec![
            chunk_hit("doc", 0, "RESUMEN", "paragraph", &"a".repeat(300)),
            chunk_hit("doc", 1, "RESULTADOS", "paragraph", &"b".repeat(80)),
        ];
        let packed = pack_doc(&points, None, 100, &config);
        assert_eq!(packed.len(), 1);
        assert_eq!(packed[0].index, 1);
    }

    #[test]
    fn location_extraction_falls_back_to_chunk_text() {
        let payload = Payload::from_value(json!({
            "doc_id": "doc",
            "chunk_index": 0,
            "text": "El ensayo se realizó en la localidad de Graneros, Región del Libertador O'Higgins.",
        }));
        let mut location = Location::default();
        fill_location_from_points(&mut location, &[Hit::new("1", 0.0, payload)]);
        assert_eq!(location.locality, "Graneros");
        assert!(location.region.starts_with("Libertador"));
    }

    #[tokio::test]
    async fn build_keeps_chunkless_documents_with_metadata() {
        let store = FakeStore {
            points: Vec::new(),
            fail_scroll: false,
        };
        let config = AssemblerConfig::default();
        let assembler = ContextAssembler::new(&store, "trial_chunks", &config);
        let seed = Hit::new(
            "1",
            0.9,
            Payload::from_value(json!({
                "doc_id": "doc-a",
                "product": "Fungex",
                "species": "Cerezo",
            })),
        );
        let contexts = assembler.build(&[seed], 8).await.unwrap();
        assert_eq!(contexts.len(), 1);
        assert!(contexts[0].chunks.is_empty());
        assert_eq!(contexts[0].product, "Fungex");
    }

    #[tokio::test]
    async fn rejected_scroll_falls_back_to_seed_hits() {
        let store = FakeStore {
            points: Vec::new(),
            fail_scroll: true,
        };
        let config = AssemblerConfig::default();
        let assembler = ContextAssembler::new(&store, "trial_chunks", &config);
        let seed = chunk_hit("doc-a", 3, "RESULTADOS", "paragraph", "resultado del ensayo");
        let contexts = assembler.build(&[seed], 8).await.unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].chunks.len(), 1);
        assert_eq!(contexts[0].chunks[0].index, 3);
    }

    #[tokio::test]
    async fn build_orders_documents_by_best_score() {
        let mut points = Vec::new();
        for doc in ["doc-a", "doc-b"] {
            for i in 0..3 {
                points.push(chunk_hit(doc, i, "RESULTADOS", "paragraph", "texto"));
            }
        }
        let store = FakeStore {
            points,
            fail_scroll: false,
        };
        let config = AssemblerConfig::default();
        let assembler = ContextAssembler::new(&store, "trial_chunks", &config);
        let hits = vec![
            Hit::new("1", 0.4, Payload::from_value(json!({"doc_id": "doc-a", "chunk_index": 0}))),
            Hit::new("2", 0.9, Payload::from_value(json!({"doc_id": "doc-b", "chunk_index": 1}))),
        ];
        let contexts = assembler.build(&hits, 8).await.unwrap();
        assert_eq!(contexts[0].doc_id, "doc-b");
        assert_eq!(contexts[1].doc_id, "doc-a");
    }
}
