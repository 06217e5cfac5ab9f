use crate::error::RetrievalError;
use crate::models::{Filter, Hit};
use async_trait::async_trait;

/// Black-box nearest-neighbor search plus unordered bulk fetch by filter.
/// The engine is generic over this seam; tests substitute in-memory fakes.
#[async_trait]
pub trait VectorSearch {
    /// Ordered similarity search, optionally narrowed by a field filter.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<Hit>, RetrievalError>;

    /// Unordered bulk fetch of every point matching the filter, paged
    /// internally, bounded by `max_points`.
    async fn scroll(
        &self,
        collection: &str,
        filter: &Filter,
        page_size: usize,
        max_points: usize,
    ) -> Result<Vec<Hit>, RetrievalError>;
}
