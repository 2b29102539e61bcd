//! In-process index with the same contract as the Elasticsearch store.
//!
//! Vector search scores with Elasticsearch's cosine transform `(1 + cos) / 2`,
//! keyword search with Okapi BM25, and hybrid search sums the boosted scores
//! of both over the union of their matches. Meant for tests and offline runs
//! over small corpora.

use crate::models::{Chunk, HybridWeights};
use crate::store::{StoreHit, StoredChunk};
use crate::traits::{DocumentLookup, HybridIndex, IndexAdmin, KeywordIndex, VectorIndex};
use crate::SearchError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

#[derive(Default)]
struct MemoryState {
    dimensions: Option<usize>,
    documents: Vec<Chunk>,
}

#[derive(Default)]
pub struct MemoryIndex {
    state: RwLock<MemoryState>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a ready index from already embedded chunks.
    pub fn with_chunks(dimensions: usize, chunks: Vec<Chunk>) -> Result<Self, SearchError> {
        let index = Self::new();
        {
            let mut state = index.write()?;
            state.dimensions = Some(dimensions);
            for chunk in chunks {
                upsert(&mut state, chunk, dimensions)?;
            }
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.read().map(|state| state.documents.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>, SearchError> {
        self.state
            .read()
            .map_err(|_| SearchError::Request("memory index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>, SearchError> {
        self.state
            .write()
            .map_err(|_| SearchError::Request("memory index lock poisoned".to_string()))
    }
}

fn upsert(state: &mut MemoryState, chunk: Chunk, dimensions: usize) -> Result<(), SearchError> {
    if chunk.vector.len() != dimensions {
        return Err(SearchError::Request(format!(
            "chunk {} has {} dimensions, index expects {}",
            chunk.id,
            chunk.vector.len(),
            dimensions
        )));
    }

    match state.documents.iter_mut().find(|doc| doc.id == chunk.id) {
        Some(existing) => *existing = chunk,
        None => state.documents.push(chunk),
    }
    Ok(())
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|term| !term.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn cosine(left: &[f32], right: &[f32]) -> f64 {
    let dot: f64 = left
        .iter()
        .zip(right)
        .map(|(a, b)| f64::from(*a) * f64::from(*b))
        .sum();
    let left_norm = left.iter().map(|a| f64::from(*a).powi(2)).sum::<f64>().sqrt();
    let right_norm = right.iter().map(|b| f64::from(*b).powi(2)).sum::<f64>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

/// Stable descending sort; equal scores keep insertion order.
fn rank(mut scored: Vec<(usize, f64)>, k: usize) -> Vec<(usize, f64)> {
    scored.sort_by(|left, right| right.1.total_cmp(&left.1));
    scored.truncate(k);
    scored
}

fn knn_scores(
    state: &MemoryState,
    query_vector: &[f32],
    k: usize,
) -> Result<Vec<(usize, f64)>, SearchError> {
    if let Some(dimensions) = state.dimensions {
        if query_vector.len() != dimensions {
            return Err(SearchError::Request(format!(
                "query vector has {} dimensions, index expects {}",
                query_vector.len(),
                dimensions
            )));
        }
    }

    let scored = state
        .documents
        .iter()
        .enumerate()
        .map(|(position, doc)| (position, (1.0 + cosine(query_vector, &doc.vector)) / 2.0))
        .collect();
    Ok(rank(scored, k))
}

fn bm25_scores(state: &MemoryState, query_text: &str) -> Vec<(usize, f64)> {
    let query_terms = terms(query_text);
    if query_terms.is_empty() || state.documents.is_empty() {
        return Vec::new();
    }

    let tokenized: Vec<Vec<String>> = state.documents.iter().map(|doc| terms(&doc.text)).collect();
    let doc_count = tokenized.len() as f64;
    let avg_len = tokenized.iter().map(Vec::len).sum::<usize>() as f64 / doc_count;

    let mut document_frequency: HashMap<&str, usize> = HashMap::new();
    for doc_terms in &tokenized {
        let mut seen: Vec<&str> = doc_terms.iter().map(String::as_str).collect();
        seen.sort_unstable();
        seen.dedup();
        for term in seen {
            *document_frequency.entry(term).or_default() += 1;
        }
    }

    tokenized
        .iter()
        .enumerate()
        .filter_map(|(position, doc_terms)| {
            let length = doc_terms.len() as f64;
            let score: f64 = query_terms
                .iter()
                .map(|term| {
                    let tf = doc_terms.iter().filter(|t| *t == term).count() as f64;
                    if tf == 0.0 {
                        return 0.0;
                    }
                    let df = document_frequency.get(term.as_str()).copied().unwrap_or(0) as f64;
                    let idf = (1.0 + (doc_count - df + 0.5) / (df + 0.5)).ln();
                    let norm = if avg_len > 0.0 { length / avg_len } else { 0.0 };
                    idf * (tf * (BM25_K1 + 1.0)) / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * norm))
                })
                .sum();
            (score > 0.0).then_some((position, score))
        })
        .collect()
}

fn to_hits(state: &MemoryState, scored: Vec<(usize, f64)>) -> Vec<StoreHit> {
    scored
        .into_iter()
        .map(|(position, score)| {
            let doc = &state.documents[position];
            StoreHit::new(doc.id.clone(), doc.text.clone(), score)
        })
        .collect()
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn vector_search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<StoreHit>, SearchError> {
        let state = self.read()?;
        let scored = knn_scores(&state, query_vector, k)?;
        Ok(to_hits(&state, scored))
    }
}

#[async_trait]
impl KeywordIndex for MemoryIndex {
    async fn keyword_search(
        &self,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<StoreHit>, SearchError> {
        let state = self.read()?;
        let scored = rank(bm25_scores(&state, query_text), k);
        Ok(to_hits(&state, scored))
    }
}

#[async_trait]
impl HybridIndex for MemoryIndex {
    async fn hybrid_search(
        &self,
        query_vector: &[f32],
        query_text: &str,
        k: usize,
        weights: HybridWeights,
    ) -> Result<Vec<StoreHit>, SearchError> {
        let state = self.read()?;
        let mut combined = vec![0.0f64; state.documents.len()];
        let mut matched = vec![false; state.documents.len()];

        for (position, score) in knn_scores(&state, query_vector, k)? {
            combined[position] += weights.vector * score;
            matched[position] = true;
        }
        for (position, score) in bm25_scores(&state, query_text) {
            combined[position] += weights.keyword * score;
            matched[position] = true;
        }

        let scored = combined
            .into_iter()
            .enumerate()
            .filter(|(position, _)| matched[*position])
            .collect();
        Ok(to_hits(&state, rank(scored, k)))
    }
}

#[async_trait]
impl DocumentLookup for MemoryIndex {
    async fn fetch(&self, id: &str) -> Result<Option<StoredChunk>, SearchError> {
        let state = self.read()?;
        Ok(state
            .documents
            .iter()
            .find(|doc| doc.id == id)
            .map(|doc| StoredChunk {
                id: doc.id.clone(),
                text: doc.text.clone(),
            }))
    }
}

#[async_trait]
impl IndexAdmin for MemoryIndex {
    async fn index_exists(&self) -> Result<bool, SearchError> {
        Ok(self.read()?.dimensions.is_some())
    }

    async fn recreate_index(&self, dimensions: usize) -> Result<(), SearchError> {
        let mut state = self.write()?;
        state.dimensions = Some(dimensions);
        state.documents.clear();
        Ok(())
    }

    async fn index_chunks(&self, chunks: &[Chunk]) -> Result<(), SearchError> {
        let mut state = self.write()?;
        let dimensions = state
            .dimensions
            .ok_or_else(|| SearchError::Request("index has not been created".to_string()))?;
        for chunk in chunks {
            upsert(&mut state, chunk.clone(), dimensions)?;
        }
        Ok(())
    }

    async fn vector_dimensions(&self) -> Result<Option<usize>, SearchError> {
        Ok(self.read()?.dimensions)
    }
}
