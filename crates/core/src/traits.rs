use crate::models::{Chunk, HybridWeights};
use crate::store::{StoreHit, StoredChunk};
use crate::SearchError;
use async_trait::async_trait;

#[async_trait]
pub trait VectorIndex {
    /// Up to `k` documents ordered by descending cosine similarity.
    async fn vector_search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<StoreHit>, SearchError>;
}

#[async_trait]
pub trait KeywordIndex {
    /// Up to `k` documents ordered by descending lexical relevance.
    async fn keyword_search(
        &self,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<StoreHit>, SearchError>;
}

#[async_trait]
pub trait HybridIndex {
    /// One combined query carrying a boosted vector clause and a boosted
    /// keyword clause. The store owns the combined scoring.
    async fn hybrid_search(
        &self,
        query_vector: &[f32],
        query_text: &str,
        k: usize,
        weights: HybridWeights,
    ) -> Result<Vec<StoreHit>, SearchError>;
}

#[async_trait]
pub trait DocumentLookup {
    async fn fetch(&self, id: &str) -> Result<Option<StoredChunk>, SearchError>;

    /// Resolves several ids in one round-trip. Output follows the order of
    /// `ids`; ids the store does not know are skipped.
    async fn fetch_many(&self, ids: &[String]) -> Result<Vec<StoredChunk>, SearchError> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(chunk) = self.fetch(id).await? {
                found.push(chunk);
            }
        }
        Ok(found)
    }
}

#[async_trait]
pub trait IndexAdmin {
    async fn index_exists(&self) -> Result<bool, SearchError>;

    /// Drops any existing index and creates an empty one whose vector field
    /// has `dimensions` components.
    async fn recreate_index(&self, dimensions: usize) -> Result<(), SearchError>;

    async fn index_chunks(&self, chunks: &[Chunk]) -> Result<(), SearchError>;

    /// Dimensionality of the vector field, `None` when no index exists.
    async fn vector_dimensions(&self) -> Result<Option<usize>, SearchError>;
}

/// Everything the retrieval engine reads from.
pub trait SearchIndex: VectorIndex + KeywordIndex + HybridIndex + DocumentLookup {}

impl<T> SearchIndex for T where T: VectorIndex + KeywordIndex + HybridIndex + DocumentLookup {}
