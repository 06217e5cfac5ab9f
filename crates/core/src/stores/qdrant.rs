use crate::error::RetrievalError;
use crate::models::{FieldMatch, Filter, Hit, Payload};
use crate::traits::VectorSearch;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Qdrant REST client implementing the engine's vector-search boundary.
/// Only the two calls the engine needs are exposed: ordered similarity
/// search and filtered bulk scroll.
pub struct QdrantStore {
    endpoint: String,
    client: Client,
}

impl QdrantStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            endpoint,
            client: Client::new(),
        }
    }

    fn filter_json(filter: &Filter) -> Value {
        let render = |conditions: &[crate::models::FieldCondition]| -> Vec<Value> {
            conditions
                .iter()
                .map(|condition| match &condition.matches {
                    FieldMatch::Value(value) => json!({
                        "key": condition.field,
                        "match": { "value": value },
                    }),
                    FieldMatch::AnyOf(values) => json!({
                        "key": condition.field,
                        "match": { "any": values },
                    }),
                })
                .collect()
        };

        let mut body = serde_json::Map::new();
        if !filter.must.is_empty() {
            body.insert("must".to_string(), Value::Array(render(&filter.must)));
        }
        if !filter.should.is_empty() {
            body.insert("should".to_string(), Value::Array(render(&filter.should)));
        }
        Value::Object(body)
    }

    fn hit_from_point(point: &Value) -> Hit {
        let id = match point.get("id") {
            Some(Value::Number(number)) => number.to_string(),
            Some(Value::String(text)) => text.clone(),
            _ => String::new(),
        };
        let score = point
            .pointer("/score")
            .and_then(Value::as_f64)
            .unwrap_or(0.0) as f32;
        let payload = point
            .get("payload")
            .cloned()
            .map(Payload::from_value)
            .unwrap_or_default();
        Hit { id, score, payload }
    }
}

#[async_trait]
impl VectorSearch for QdrantStore {
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<Hit>, RetrievalError> {
        let mut body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
            "with_vector": false,
        });
        if let Some(filter) = filter {
            if !filter.is_empty() {
                body["filter"] = Self::filter_json(filter);
            }
        }

        let response = self
            .client
            .post(format!(
                "{}/collections/{}/points/search",
                self.endpoint, collection
            ))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RetrievalError::BackendResponse {
                backend: "qdrant".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: Value = response.json().await?;
        let points = parsed
            .pointer("/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(points.iter().map(Self::hit_from_point).collect())
    }

    async fn scroll(
        &self,
        collection: &str,
        filter: &Filter,
        page_size: usize,
        max_points: usize,
    ) -> Result<Vec<Hit>, RetrievalError> {
        let mut all_points: Vec<Hit> = Vec::new();
        let mut next_offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "filter": Self::filter_json(filter),
                "limit": page_size.max(1),
                "with_payload": true,
                "with_vector": false,
            });
            if let Some(offset) = &next_offset {
                body["offset"] = offset.clone();
            }

            let response = self
                .client
                .post(format!(
                    "{}/collections/{}/points/scroll",
                    self.endpoint, collection
                ))
                .json(&body)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(RetrievalError::BackendResponse {
                    backend: "qdrant".to_string(),
                    details: response.status().to_string(),
                });
            }

            let parsed: Value = response.json().await?;
            let points = parsed
                .pointer("/result/points")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let page_len = points.len();
            all_points.extend(points.iter().map(Self::hit_from_point));

            if all_points.len() >= max_points {
                all_points.truncate(max_points);
                break;
            }

            next_offset = parsed
                .pointer("/result/next_page_offset")
                .filter(|offset| !offset.is_null())
                .cloned();
            if next_offset.is_none() || page_len == 0 {
                break;
            }
        }

        Ok(all_points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_renders_must_and_should_clauses() {
        let filter = Filter::field_value("doc_id", "doc-1")
            .with_should(Filter::any_of("product_id", ["p-1", "p-2"]));
        let rendered = QdrantStore::filter_json(&filter);
        assert_eq!(rendered["must"][0]["key"], "doc_id");
        assert_eq!(rendered["must"][0]["match"]["value"], "doc-1");
        assert_eq!(rendered["should"][0]["match"]["any"][1], "p-2");
    }

    #[test]
    fn points_parse_numeric_and_string_ids() {
        let numeric = QdrantStore::hit_from_point(&json!({
            "id": 42, "score": 0.8, "payload": { "doc_id": "d" }
        }));
        assert_eq!(numeric.id, "42");
        assert!((numeric.score - 0.8).abs() < 1e-6);
        assert_eq!(numeric.payload.get_str("doc_id"), "d");

        let text = QdrantStore::hit_from_point(&json!({ "id": "abc" }));
        assert_eq!(text.id, "abc");
        assert_eq!(text.score, 0.0);
    }
}
