use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::text::normalize;

/// One scored result from the vector store or a structured lookup. Hits are
/// immutable once returned; the engine only filters, merges, and reorders
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub payload: Payload,
}

impl Hit {
    pub fn new(id: impl Into<String>, score: f32, payload: Payload) -> Self {
        Self {
            id: id.into(),
            score,
            payload,
        }
    }

    pub fn doc_id(&self) -> String {
        self.payload.get_str("doc_id")
    }
}

/// Validated accessor layer over the loosely-typed payload maps returned by
/// the vector store. The rest of the pipeline reads fields through this
/// wrapper instead of raw JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub Map<String, Value>);

impl Payload {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self(Map::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Trimmed string form of a scalar field, or empty when absent.
    pub fn get_str(&self, key: &str) -> String {
        match self.0.get(key) {
            Some(Value::String(text)) => text.trim().to_string(),
            Some(Value::Number(number)) => number.to_string(),
            Some(Value::Bool(flag)) => flag.to_string(),
            _ => String::new(),
        }
    }

    /// First non-empty value among aliased field names.
    pub fn get_first(&self, keys: &[&str]) -> String {
        for key in keys {
            let value = self.get_str(key);
            if !value.is_empty() {
                return value;
            }
        }
        String::new()
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        match self.0.get(key) {
            Some(Value::Number(number)) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
            Some(Value::String(text)) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn chunk_index(&self) -> Option<u32> {
        self.get_u32("chunk_index")
    }

    pub fn page_number(&self) -> Option<u32> {
        self.get_u32("page_number")
    }

    /// Best available chunk text across the field aliases seen in indexed
    /// payloads.
    pub fn text(&self) -> String {
        self.get_first(&["text", "chunk", "content", "page_content"])
    }

    /// Flattens a field of any shape (scalar, list, nested map) into one
    /// comma-joined text value.
    pub fn value_text(&self, key: &str) -> String {
        self.0.get(key).map(flatten_value).unwrap_or_default()
    }
}

fn flatten_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(flatten_value)
                .filter(|part| !part.is_empty())
                .collect();
            parts.join(", ")
        }
        Value::Object(map) => {
            let parts: Vec<String> = map
                .values()
                .map(flatten_value)
                .filter(|part| !part.is_empty())
                .collect();
            parts.join(", ")
        }
    }
}

/// Field-level filter passed to the vector store. `must` conditions all have
/// to hold; `should` conditions widen (any may hold).
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub must: Vec<FieldCondition>,
    pub should: Vec<FieldCondition>,
}

impl Filter {
    pub fn field_value(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            must: vec![FieldCondition {
                field: field.into(),
                matches: FieldMatch::Value(value.into()),
            }],
            should: Vec::new(),
        }
    }

    pub fn any_of<I, S>(field: impl Into<String>, values: I) -> FieldCondition
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldCondition {
            field: field.into(),
            matches: FieldMatch::AnyOf(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn with_should(mut self, condition: FieldCondition) -> Self {
        self.should.push(condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct FieldCondition {
    pub field: String,
    pub matches: FieldMatch,
}

#[derive(Debug, Clone)]
pub enum FieldMatch {
    Value(String),
    AnyOf(Vec<String>),
}

/// One selected chunk inside an assembled document context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextChunk {
    pub index: u32,
    pub chunk_type: String,
    pub page_number: Option<u32>,
    pub section: String,
    pub heading_path: String,
    pub text: String,
}

/// The assembled, budget-bounded textual evidence for one source document.
/// Chunk indices are unique and sorted ascending; the packed text total never
/// exceeds the per-document budget it was built under.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentContext {
    pub doc_id: String,
    pub file_name: String,
    pub season: String,
    pub client: String,
    pub product: String,
    pub species: String,
    pub variety: String,
    pub region: String,
    pub locality: String,
    pub district: String,
    pub location: String,
    pub chunks: Vec<ContextChunk>,
}

/// Where an offered entity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySource {
    Semantic,
    CatalogQuery,
    CatalogSpecies,
}

/// How an offered entity relates to the crop the user asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchScope {
    DirectCrop,
    CrossCrop,
    QueryMatch,
}

/// A deduplicated, user-facing summary of one matched document or product,
/// kept in session state so later follow-up references can be resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEntity {
    pub label: String,
    pub products: Vec<String>,
    pub doc_ids: Vec<String>,
    pub product: String,
    pub client: String,
    pub season: String,
    pub species: String,
    pub variety: String,
    pub overview: String,
    pub source: EntitySource,
    pub match_scope: MatchScope,
    pub inclusion_reason: String,
}

impl CandidateEntity {
    /// Normalized uniqueness key: no two entities in one offered list may
    /// collapse to the same value.
    pub fn identity_key(&self) -> String {
        [
            &self.product,
            &self.client,
            &self.season,
            &self.species,
            &self.variety,
        ]
        .iter()
        .map(|part| normalize(part))
        .collect::<Vec<_>>()
        .join("|")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_reads_scalars_and_aliases() {
        let payload = Payload::from_value(json!({
            "doc_id": "doc-1",
            "chunk_index": "7",
            "page_content": "  trial summary  ",
        }));
        assert_eq!(payload.get_str("doc_id"), "doc-1");
        assert_eq!(payload.chunk_index(), Some(7));
        assert_eq!(payload.text(), "trial summary");
    }

    #[test]
    fn value_text_flattens_lists() {
        let payload = Payload::from_value(json!({
            "ingredients": ["copper", "sulfur", ""],
        }));
        assert_eq!(payload.value_text("ingredients"), "copper, sulfur");
    }

    #[test]
    fn identity_key_ignores_case_and_accents() {
        let entity = CandidateEntity {
            label: String::new(),
            products: Vec::new(),
            doc_ids: Vec::new(),
            product: "Fungex Máx".into(),
            client: "AgroSur".into(),
            season: "2022-2023".into(),
            species: "Cerezo".into(),
            variety: "Lapins".into(),
            overview: String::new(),
            source: EntitySource::Semantic,
            match_scope: MatchScope::QueryMatch,
            inclusion_reason: String::new(),
        };
        assert_eq!(
            entity.identity_key(),
            "fungex max|agrosur|2022-2023|cerezo|lapins"
        );
    }
}
