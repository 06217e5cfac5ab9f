//! Turn-level pipelines over the trait seams: trial evidence (first turn),
//! product evidence (label recall boosting + consolidation), and follow-up
//! evidence re-targeting. Stages run strictly sequentially inside a turn —
//! each stage's output is the next stage's input — and no stage retries
//! internally or raises on empty input.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::info;

use crate::assembler::{render_context_block, AssemblerConfig, ContextAssembler};
use crate::booster::{post_enrich_filter, progressive_seed_filter, RecallBooster};
use crate::catalog::{ProductCatalog, TrialCatalog};
use crate::consolidate::{consolidate, render_evidence_block, ConsolidatedRow};
use crate::embeddings::Embedder;
use crate::entities::{
    annotate_match_scope, entities_from_catalog_query, entities_from_catalog_species,
    entities_from_hits, merge_entities, MAX_OFFERED_ENTITIES,
};
use crate::error::RetrievalError;
use crate::extract::{detect_entities, ingredient_hint, objective_hint};
use crate::followup::{
    collect_selected_doc_ids, dedupe_by_product_objective, select_contexts, wants_specific_detail,
};
use crate::models::{CandidateEntity, DocumentContext, Hit};
use crate::query::{
    adapt_dimension, dedupe_product_rows, dedupe_top_docs, merge_hits_by_id, sanitize_query,
};
use crate::session::SessionState;
use crate::text::normalize;
use crate::traits::VectorSearch;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub trial_collection: String,
    pub product_collection: String,
    pub trial_vector_dim: usize,
    pub product_vector_dim: usize,
    /// Distinct documents kept per trial retrieval.
    pub trial_top_docs: usize,
    /// Base row count for the label pipeline; stage limits scale off it.
    pub product_top_k: usize,
    pub assembler: AssemblerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trial_collection: "trial_chunks".to_string(),
            product_collection: "product_labels".to_string(),
            trial_vector_dim: crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS,
            product_vector_dim: crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS,
            trial_top_docs: 8,
            product_top_k: 8,
            assembler: AssemblerConfig::default(),
        }
    }
}

/// First-turn trial retrieval output: deduplicated hits, assembled contexts,
/// the offered entity list, and the rendered evidence block.
#[derive(Debug, Clone)]
pub struct TrialEvidence {
    pub query: String,
    pub hits: Vec<Hit>,
    pub contexts: Vec<DocumentContext>,
    pub entities: Vec<CandidateEntity>,
    pub context_block: String,
}

/// Label pipeline output: the widened hit set, consolidated rows, and the
/// rendered evidence block with the mode it was rendered in.
#[derive(Debug, Clone)]
pub struct ProductEvidence {
    pub hits: Vec<Hit>,
    pub rows: Vec<ConsolidatedRow>,
    pub evidence_block: String,
    pub compact: bool,
}

/// Outcome of a follow-up turn. An unresolvable explicit reference is
/// distinct from "no prior evidence existed" so the caller can ask a
/// clarifying question instead of guessing.
#[derive(Debug, Clone)]
pub enum FollowupOutcome {
    Selected(Vec<DocumentContext>),
    NeedsClarification,
    NoPriorEvidence,
}

pub struct RetrievalEngine<V, E> {
    store: V,
    embedder: E,
    trials: Arc<TrialCatalog>,
    products: Arc<ProductCatalog>,
    config: EngineConfig,
}

impl<V, E> RetrievalEngine<V, E>
where
    V: VectorSearch + Send + Sync,
    E: Embedder + Send + Sync,
{
    pub fn new(
        store: V,
        embedder: E,
        trials: Arc<TrialCatalog>,
        products: Arc<ProductCatalog>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            trials,
            products,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn trial_catalog(&self) -> &TrialCatalog {
        &self.trials
    }

    pub fn product_catalog(&self) -> &ProductCatalog {
        &self.products
    }

    /// Over-fetches chunk candidates and keeps the best hit per document.
    pub async fn search_trial_hits(
        &self,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<Hit>, RetrievalError> {
        let query = sanitize_query(question);
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let vector = adapt_dimension(self.embedder.embed(&query), self.config.trial_vector_dim);
        let candidate_k = (top_k * 4).max(top_k).max(1);
        let raw = self
            .store
            .search(&self.config.trial_collection, &vector, candidate_k, None)
            .await?;
        Ok(dedupe_top_docs(&raw, top_k.max(1)))
    }

    /// Over-fetches label rows and keeps one per product/crop/objective.
    pub async fn search_product_rows(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<Hit>, RetrievalError> {
        let sanitized = sanitize_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let vector = adapt_dimension(
            self.embedder.embed(&sanitized),
            self.config.product_vector_dim,
        );
        let candidate_k = (top_k * 3).max(top_k).max(1);
        let raw = self
            .store
            .search(&self.config.product_collection, &vector, candidate_k, None)
            .await?;
        Ok(dedupe_product_rows(&raw, top_k.max(1)))
    }

    /// First-turn trial pipeline: retrieve, assemble contexts under budget,
    /// and build the offered entity list from both the semantic hits and the
    /// trial catalog.
    pub async fn trial_evidence(&self, question: &str) -> Result<TrialEvidence, RetrievalError> {
        let query = sanitize_query(question);
        let hits = self
            .search_trial_hits(&query, self.config.trial_top_docs)
            .await?;
        info!(hits = hits.len(), "trial retrieval");

        let distinct_docs: BTreeSet<String> = hits
            .iter()
            .map(Hit::doc_id)
            .filter(|doc_id| !doc_id.is_empty())
            .collect();
        let assembler = ContextAssembler::new(
            &self.store,
            &self.config.trial_collection,
            &self.config.assembler,
        );
        let contexts = assembler.build(&hits, distinct_docs.len().max(1)).await?;

        let overviews: HashMap<String, DocumentContext> = contexts
            .iter()
            .filter(|context| !context.doc_id.is_empty())
            .map(|context| (context.doc_id.clone(), context.clone()))
            .collect();

        let semantic = entities_from_hits(&hits, &self.trials, &overviews);
        let from_catalog = entities_from_catalog_query(&self.trials, question, MAX_OFFERED_ENTITIES);
        let mut offered = merge_entities(semantic, from_catalog, MAX_OFFERED_ENTITIES);

        let species_hints = detect_entities(&self.trials, question).species;
        if !species_hints.is_empty() {
            let covered = offered
                .iter()
                .any(|entity| species_hints.contains(&normalize(&entity.species)));
            if !covered {
                let species_matches =
                    entities_from_catalog_species(&self.trials, &species_hints, 8);
                if !species_matches.is_empty() {
                    offered = merge_entities(species_matches, offered, MAX_OFFERED_ENTITIES);
                }
            }
        }
        annotate_match_scope(&mut offered, &species_hints);

        let context_block = render_context_block(&contexts);
        Ok(TrialEvidence {
            query,
            hits,
            contexts,
            entities: offered,
            context_block,
        })
    }

    /// Label pipeline: seed search, progressive hint filtering, identifier
    /// enrichment, catalog recall boosts, post-enrichment narrowing, and the
    /// best-effort confirmation pass, consolidated and rendered at the end.
    pub async fn product_evidence(
        &self,
        query: &str,
        user_message: &str,
        product_hint: &str,
    ) -> Result<ProductEvidence, RetrievalError> {
        let base_top_k = self.config.product_top_k.max(1);
        let retrieval_top_k = (base_top_k * 2).max(20);
        let combined = format!("{query} {user_message}");
        let combined_norm = normalize(&combined);
        let ingredient = ingredient_hint(&combined_norm);
        let objective = objective_hint(&combined_norm);

        let seeds = self.search_product_rows(query, retrieval_top_k).await?;
        info!(seeds = seeds.len(), "label seed retrieval");

        // Catalog signals from the raw question, kept alongside the
        // semantic seeds through consolidation.
        let (pre_matches, _records) = self
            .products
            .find_by_query(&combined, (base_top_k * 20).max(120));

        let filtered = progressive_seed_filter(&seeds, query, user_message, product_hint);
        let seed_for_enrich = if filtered.is_empty() { &seeds } else { &filtered };

        let booster = RecallBooster::new(
            &self.store,
            &self.config.product_collection,
            &self.products,
        );

        let mut rows = booster
            .enrich_from_seeds(seed_for_enrich, (base_top_k * 16).max(160))
            .await?;
        if !pre_matches.is_empty() {
            let pre_rows = booster
                .rows_by_identifiers(&pre_matches, (base_top_k * 220).max(4_500))
                .await?;
            if !pre_rows.is_empty() {
                rows = merge_hits_by_id(rows, pre_rows);
            }
        }

        rows = booster
            .boost_by_objective(rows, objective.as_deref(), (base_top_k * 220).max(4_500))
            .await?;
        rows = booster
            .boost_by_ingredient(rows, ingredient.as_deref(), (base_top_k * 24).max(240))
            .await?;
        rows = post_enrich_filter(rows, ingredient.as_deref(), objective.as_deref());
        rows = booster
            .confirm_with_catalog(rows, query, user_message, base_top_k)
            .await?;

        let (evidence_block, compact) = render_evidence_block(&rows, &self.products);
        let consolidated = consolidate(&rows, &self.products);
        info!(
            rows = rows.len(),
            products = consolidated.len(),
            compact,
            "label evidence consolidated"
        );
        Ok(ProductEvidence {
            hits: rows,
            rows: consolidated,
            evidence_block,
            compact,
        })
    }

    /// Follow-up pipeline: resolve the user reference against session state,
    /// rebuilding contexts from cached hits (or a fresh retrieval) when none
    /// were cached.
    pub async fn followup_evidence(
        &self,
        session: &mut SessionState,
        message: &str,
        explicit_indexes: &[usize],
        explicit_hints: &[String],
    ) -> Result<FollowupOutcome, RetrievalError> {
        let mut contexts = session.cached_contexts.clone();

        if contexts.is_empty() {
            let selected_ids = collect_selected_doc_ids(
                message,
                &session.offered_entities,
                explicit_hints,
                explicit_indexes,
            );

            if !session.cached_hits.is_empty() {
                let candidates: Vec<Hit> = if selected_ids.is_empty() {
                    session.cached_hits.clone()
                } else {
                    session
                        .cached_hits
                        .iter()
                        .filter(|hit| selected_ids.contains(&hit.doc_id()))
                        .cloned()
                        .collect()
                };
                if candidates.is_empty() {
                    if !selected_ids.is_empty() {
                        // An explicit selection that maps to no cached hit
                        // must not trigger an open retrieval that would mix
                        // in unrelated evidence.
                        return Ok(FollowupOutcome::NeedsClarification);
                    }
                } else {
                    let top_docs = if selected_ids.is_empty() {
                        self.config.trial_top_docs
                    } else {
                        selected_ids.len().min(self.config.trial_top_docs)
                    };
                    let assembler = ContextAssembler::new(
                        &self.store,
                        &self.config.trial_collection,
                        &self.config.assembler,
                    );
                    contexts = assembler.build(&candidates, top_docs.max(1)).await?;
                }
            } else {
                let question = format!("{}\n{}", session.last_question, message);
                let hits = self
                    .search_trial_hits(&question, self.config.trial_top_docs)
                    .await?;
                if !hits.is_empty() {
                    let assembler = ContextAssembler::new(
                        &self.store,
                        &self.config.trial_collection,
                        &self.config.assembler,
                    );
                    contexts = assembler.build(&hits, self.config.trial_top_docs).await?;
                }
            }
        }

        if contexts.is_empty() {
            return Ok(FollowupOutcome::NoPriorEvidence);
        }

        let selected = select_contexts(
            message,
            &session.offered_entities,
            &contexts,
            explicit_indexes,
            explicit_hints,
        );
        if !selected.is_empty() {
            info!(selected = selected.len(), "follow-up contexts resolved");
            session.cached_contexts = selected.clone();
            session.touch();
            return Ok(FollowupOutcome::Selected(selected));
        }
        if !explicit_indexes.is_empty() || wants_specific_detail(message) {
            return Ok(FollowupOutcome::NeedsClarification);
        }

        // No reference at all: continue over everything already assembled.
        let all = dedupe_by_product_objective(contexts);
        session.cached_contexts = all.clone();
        session.touch();
        Ok(FollowupOutcome::Selected(all))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ProductRecord, TrialRecord};
    use crate::embeddings::HashingNgramEmbedder;
    use crate::models::{FieldMatch, Filter, Payload};
    use async_trait::async_trait;
    use serde_json::json;

    struct FakeStore {
        trial_hits: Vec<Hit>,
        trial_points: Vec<Hit>,
        product_rows: Vec<Hit>,
    }

    #[async_trait]
    impl VectorSearch for FakeStore {
        async fn search(
            &self,
            collection: &str,
            _vector: &[f32],
            top_k: usize,
            _filter: Option<&Filter>,
        ) -> Result<Vec<Hit>, RetrievalError> {
            let source = if collection == "trial_chunks" {
                &self.trial_hits
            } else {
                &self.product_rows
            };
            Ok(source.iter().take(top_k).cloned().collect())
        }

        async fn scroll(
            &self,
            collection: &str,
            filter: &Filter,
            _page_size: usize,
            max_points: usize,
        ) -> Result<Vec<Hit>, RetrievalError> {
            if collection == "trial_chunks" {
                let wanted = filter
                    .must
                    .first()
                    .map(|condition| match &condition.matches {
                        FieldMatch::Value(value) => value.clone(),
                        FieldMatch::AnyOf(values) => values.first().cloned().unwrap_or_default(),
                    })
                    .unwrap_or_default();
                return Ok(self
                    .trial_points
                    .iter()
                    .filter(|point| point.doc_id() == wanted)
                    .take(max_points)
                    .cloned()
                    .collect());
            }

            let mut wanted_ids: BTreeSet<String> = BTreeSet::new();
            let mut wanted_auths: BTreeSet<String> = BTreeSet::new();
            for condition in &filter.should {
                if let FieldMatch::AnyOf(values) = &condition.matches {
                    match condition.field.as_str() {
                        "product_id" => wanted_ids.extend(values.iter().cloned()),
                        "authorization" => wanted_auths.extend(values.iter().cloned()),
                        _ => {}
                    }
                }
            }
            Ok(self
                .product_rows
                .iter()
                .filter(|hit| {
                    wanted_ids.contains(&hit.payload.get_str("product_id"))
                        || wanted_auths.contains(&hit.payload.get_str("authorization"))
                })
                .take(max_points)
                .cloned()
                .collect())
        }
    }

    fn trial_chunk(doc: &str, idx: u32, section: &str, text: &str) -> Hit {
        Hit::new(
            format!("{doc}-{idx}"),
            0.0,
            Payload::from_value(json!({
                "doc_id": doc,
                "chunk_index": idx,
                "section_norm": section,
                "chunk_type": "paragraph",
                "text": text,
            })),
        )
    }

    fn product_row(id: &str, product_id: &str, name: &str, composition: &str, objective: &str) -> Hit {
        Hit::new(
            id,
            0.5,
            Payload::from_value(json!({
                "product_id": product_id,
                "trade_name": name,
                "authorization": format!("auth-{product_id}"),
                "composition": composition,
                "objective": objective,
                "crop": "cerezo",
            })),
        )
    }

    fn trial_catalog() -> Arc<TrialCatalog> {
        Arc::new(TrialCatalog::from_records(vec![TrialRecord::new(
            "2022-2023",
            "AgroSur",
            "Fungex",
            "Cerezo",
            "Lapins",
            "doc-a.pdf",
            "",
            "",
        )]))
    }

    fn engine(store: FakeStore) -> RetrievalEngine<FakeStore, HashingNgramEmbedder> {
        RetrievalEngine::new(
            store,
            HashingNgramEmbedder { dimensions: 32 },
            trial_catalog(),
            Arc::new(ProductCatalog::from_records(vec![ProductRecord::new(
                "p-001",
                "Fungex",
                ["auth-p-001".to_string()].into_iter().collect(),
                ["oidio".to_string()].into_iter().collect(),
                ["azufre".to_string()].into_iter().collect(),
                "Azufre 50%",
                "",
            )])),
            EngineConfig {
                trial_vector_dim: 32,
                product_vector_dim: 32,
                ..EngineConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn trial_evidence_assembles_contexts_and_entities() {
        let store = FakeStore {
            trial_hits: vec![Hit::new(
                "1",
                0.9,
                Payload::from_value(json!({
                    "doc_id": "doc-a",
                    "chunk_index": 2,
                    "file_name": "doc-a.pdf",
                })),
            )],
            trial_points: vec![
                trial_chunk("doc-a", 0, "RESUMEN", "resumen del ensayo"),
                trial_chunk("doc-a", 2, "RESULTADOS", "resultados obtenidos"),
            ],
            product_rows: Vec::new(),
        };
        let engine = engine(store);
        let evidence = engine.trial_evidence("como controlar oidio en cerezos").await.unwrap();
        assert_eq!(evidence.contexts.len(), 1);
        assert_eq!(evidence.contexts[0].chunks.len(), 2);
        assert!(!evidence.entities.is_empty());
        assert_eq!(evidence.entities[0].product, "Fungex");
        assert!(evidence.context_block.contains("=== REPORT 1 ==="));
    }

    #[tokio::test]
    async fn trial_evidence_with_no_hits_is_empty_not_an_error() {
        let store = FakeStore {
            trial_hits: Vec::new(),
            trial_points: Vec::new(),
            product_rows: Vec::new(),
        };
        let engine = engine(store);
        let evidence = engine.trial_evidence("consulta sin coincidencias xyz").await.unwrap();
        assert!(evidence.hits.is_empty());
        assert!(evidence.contexts.is_empty());
        assert_eq!(evidence.context_block, "NO_TRIAL_CONTEXT");
    }

    #[tokio::test]
    async fn weak_ingredient_filter_never_empties_the_seed_set() {
        let seeds: Vec<Hit> = (0..5)
            .map(|i| {
                product_row(
                    &i.to_string(),
                    &format!("p-{i:03}"),
                    &format!("Product{i}"),
                    "Cobre 30%",
                    "venturia",
                )
            })
            .collect();
        let store = FakeStore {
            trial_hits: Vec::new(),
            trial_points: Vec::new(),
            product_rows: seeds.clone(),
        };
        let engine = engine(store);
        let evidence = engine
            .product_evidence("productos que contienen glifosato", "", "")
            .await
            .unwrap();
        assert_eq!(evidence.hits.len(), 5);
    }

    #[tokio::test]
    async fn followup_with_cached_contexts_resolves_reference() {
        let store = FakeStore {
            trial_hits: Vec::new(),
            trial_points: Vec::new(),
            product_rows: Vec::new(),
        };
        let engine = engine(store);
        let mut session = SessionState::new("user-1");
        session.offered_entities = vec![CandidateEntity {
            label: "Fungex (Cerezo, Lapins, 2022-2023)".into(),
            products: vec!["Fungex".into()],
            doc_ids: vec!["doc-a".into()],
            product: "Fungex".into(),
            client: "AgroSur".into(),
            season: "2022-2023".into(),
            species: "Cerezo".into(),
            variety: "Lapins".into(),
            overview: String::new(),
            source: crate::models::EntitySource::Semantic,
            match_scope: crate::models::MatchScope::QueryMatch,
            inclusion_reason: String::new(),
        }];
        session.cached_contexts = vec![DocumentContext {
            doc_id: "doc-a".into(),
            product: "Fungex".into(),
            ..DocumentContext::default()
        }];

        let outcome = engine
            .followup_evidence(&mut session, "dame el detalle del ensayo 1", &[], &[])
            .await
            .unwrap();
        match outcome {
            FollowupOutcome::Selected(contexts) => {
                assert_eq!(contexts.len(), 1);
                assert_eq!(contexts[0].doc_id, "doc-a");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn followup_out_of_range_index_asks_for_clarification() {
        let store = FakeStore {
            trial_hits: Vec::new(),
            trial_points: Vec::new(),
            product_rows: Vec::new(),
        };
        let engine = engine(store);
        let mut session = SessionState::new("user-1");
        session.cached_contexts = vec![DocumentContext {
            doc_id: "doc-a".into(),
            product: "Fungex".into(),
            ..DocumentContext::default()
        }];

        let outcome = engine
            .followup_evidence(&mut session, "zzz", &[9], &[])
            .await
            .unwrap();
        assert!(matches!(outcome, FollowupOutcome::NeedsClarification));
    }

    #[tokio::test]
    async fn followup_without_any_evidence_reports_no_prior_evidence() {
        let store = FakeStore {
            trial_hits: Vec::new(),
            trial_points: Vec::new(),
            product_rows: Vec::new(),
        };
        let engine = engine(store);
        let mut session = SessionState::new("user-1");
        let outcome = engine
            .followup_evidence(&mut session, "y entonces", &[], &[])
            .await
            .unwrap();
        assert!(matches!(outcome, FollowupOutcome::NoPriorEvidence));
    }
}
