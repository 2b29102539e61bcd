//! Question → ranked passages.
//!
//! Three interchangeable strategies sit behind [`Retriever::retrieve`]:
//! plain k-NN, a store-scored weighted hybrid query, and Reciprocal Rank
//! Fusion of independent vector and keyword searches. RRF works on ranks
//! rather than scores because cosine similarities and BM25 scores live on
//! unrelated scales.

use crate::embeddings::Embedder;
use crate::models::{HybridWeights, RetrievalResult, RetrievedChunk, SearchStrategy};
use crate::store::StoreHit;
use crate::traits::SearchIndex;
use crate::SearchError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_RRF_K: f64 = 60.0;
pub const DEFAULT_OVERFETCH: usize = 2;

/// Which ranked list is accumulated first when fusing. Documents with equal
/// fused scores keep the order in which they were first seen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    VectorFirst,
    KeywordFirst,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub rrf_k: f64,
    pub overfetch: usize,
    pub weights: HybridWeights,
    pub tie_break: TieBreak,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            rrf_k: DEFAULT_RRF_K,
            overfetch: DEFAULT_OVERFETCH,
            weights: HybridWeights::default(),
            tie_break: TieBreak::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusedScore {
    pub id: String,
    pub score: f64,
}

/// Contribution of a 1-based `rank` to a fused score.
pub fn reciprocal_rank(rank: usize, rrf_k: f64) -> f64 {
    1.0 / (rrf_k + rank as f64)
}

/// Sums reciprocal-rank contributions per document across `lists` and sorts
/// by the total, highest first. The sort is stable, so ties resolve to the
/// document encountered first (earlier list, then earlier rank). A document
/// repeated inside one list only counts at its best rank.
pub fn fuse_ranked_lists(lists: &[&[StoreHit]], rrf_k: f64) -> Vec<FusedScore> {
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut fused: Vec<FusedScore> = Vec::new();

    for list in lists {
        let mut seen_in_list: HashSet<&str> = HashSet::new();
        for (index, hit) in list.iter().enumerate() {
            if !seen_in_list.insert(hit.id.as_str()) {
                continue;
            }

            let contribution = reciprocal_rank(index + 1, rrf_k);
            match positions.get(hit.id.as_str()) {
                Some(&position) => fused[position].score += contribution,
                None => {
                    positions.insert(hit.id.as_str(), fused.len());
                    fused.push(FusedScore {
                        id: hit.id.clone(),
                        score: contribution,
                    });
                }
            }
        }
    }

    fused.sort_by(|left, right| right.score.total_cmp(&left.score));
    fused
}

fn dedup_and_truncate(chunks: Vec<RetrievedChunk>, k: usize) -> Vec<RetrievedChunk> {
    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| seen.insert(chunk.id.clone()))
        .take(k)
        .collect()
}

pub struct Retriever<S, E> {
    store: Arc<S>,
    embedder: Arc<E>,
    config: RetrievalConfig,
}

impl<S, E> Retriever<S, E>
where
    S: SearchIndex + Send + Sync,
    E: Embedder,
{
    pub fn new(store: Arc<S>, embedder: Arc<E>, config: RetrievalConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn retrieve(
        &self,
        question: &str,
        strategy: SearchStrategy,
    ) -> Result<RetrievalResult, SearchError> {
        let k = self.config.top_k;
        if k == 0 {
            return Ok(RetrievalResult::empty(strategy));
        }

        let chunks = match strategy {
            SearchStrategy::Vector => self.vector(question, k).await?,
            SearchStrategy::Hybrid => self.hybrid(question, k).await?,
            SearchStrategy::HybridRrf => self.hybrid_rrf(question, k).await?,
        };
        let chunks = dedup_and_truncate(chunks, k);

        info!(%strategy, top_k = k, returned = chunks.len(), "retrieved chunks");
        Ok(RetrievalResult { strategy, chunks })
    }

    async fn vector(&self, question: &str, k: usize) -> Result<Vec<RetrievedChunk>, SearchError> {
        let query_vector = self.embedder.embed(question).await?;
        let hits = self.store.vector_search(&query_vector, k).await?;
        Ok(hits.into_iter().map(StoreHit::into_retrieved).collect())
    }

    async fn hybrid(&self, question: &str, k: usize) -> Result<Vec<RetrievedChunk>, SearchError> {
        let query_vector = self.embedder.embed(question).await?;
        let hits = self
            .store
            .hybrid_search(&query_vector, question, k, self.config.weights)
            .await?;
        Ok(hits.into_iter().map(StoreHit::into_retrieved).collect())
    }

    async fn hybrid_rrf(
        &self,
        question: &str,
        k: usize,
    ) -> Result<Vec<RetrievedChunk>, SearchError> {
        let fetch_k = k.saturating_mul(self.config.overfetch.max(1));
        let query_vector = self.embedder.embed(question).await?;

        let (vector_hits, keyword_hits) = tokio::try_join!(
            self.store.vector_search(&query_vector, fetch_k),
            self.store.keyword_search(question, fetch_k)
        )?;
        debug!(
            fetch_k,
            vector = vector_hits.len(),
            keyword = keyword_hits.len(),
            "fusing ranked lists"
        );

        let lists: [&[StoreHit]; 2] = match self.config.tie_break {
            TieBreak::VectorFirst => [&vector_hits, &keyword_hits],
            TieBreak::KeywordFirst => [&keyword_hits, &vector_hits],
        };
        let top: Vec<FusedScore> = fuse_ranked_lists(&lists, self.config.rrf_k)
            .into_iter()
            .take(k)
            .collect();

        let ids: Vec<String> = top.iter().map(|fused| fused.id.clone()).collect();
        let mut texts: HashMap<String, String> = self
            .store
            .fetch_many(&ids)
            .await?
            .into_iter()
            .map(|doc| (doc.id, doc.text))
            .collect();

        Ok(top
            .into_iter()
            .filter_map(|fused| {
                texts.remove(&fused.id).map(|text| RetrievedChunk {
                    id: fused.id,
                    text,
                    score: fused.score,
                })
            })
            .collect())
    }
}
