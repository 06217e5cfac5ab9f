pub mod assembler;
pub mod booster;
pub mod catalog;
pub mod consolidate;
pub mod embeddings;
pub mod engine;
pub mod entities;
pub mod error;
pub mod extract;
pub mod followup;
pub mod models;
pub mod query;
pub mod session;
pub mod stores;
pub mod text;
pub mod traits;

pub use assembler::{render_context_block, AssemblerConfig, ContextAssembler};
pub use booster::{
    field_text, filter_hits_by_field, post_enrich_filter, progressive_seed_filter, ProductField,
    RecallBooster,
};
pub use catalog::{ProductCatalog, ProductMatches, ProductRecord, TrialCatalog, TrialRecord};
pub use consolidate::{
    consolidate, distinct_product_count, render_evidence_block, render_rows, ConsolidatedRow,
    COMPACT_THRESHOLD,
};
pub use embeddings::{Embedder, HashingNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use engine::{EngineConfig, FollowupOutcome, ProductEvidence, RetrievalEngine, TrialEvidence};
pub use entities::{
    annotate_match_scope, entities_from_catalog_query, entities_from_catalog_species,
    entities_from_hits, merge_entities, overview_snippet, render_entity_options,
    MAX_OFFERED_ENTITIES,
};
pub use error::{CatalogError, RetrievalError};
pub use extract::{
    crop_hint, detect_entities, ingredient_hint, is_exhaustive_intent, objective_hint,
    EntitySignals,
};
pub use followup::{
    collect_selected_doc_ids, dedupe_by_product_objective, select_contexts, wants_specific_detail,
};
pub use models::{
    CandidateEntity, ContextChunk, DocumentContext, EntitySource, FieldCondition, FieldMatch,
    Filter, Hit, MatchScope, Payload,
};
pub use query::{
    adapt_dimension, dedupe_product_rows, dedupe_top_docs, merge_hits_by_id, sanitize_query,
};
pub use session::{SessionRegistry, SessionState};
pub use stores::QdrantStore;
pub use traits::VectorSearch;
