use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A passage of the corpus together with its embedding. One chunk is one
/// index document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub vector: Vec<f32>,
}

/// A chunk reference as handed back by retrieval. `score` is whatever the
/// strategy ranked by: the store score for `vector`/`hybrid`, the fused
/// reciprocal-rank score for `hybrid_rrf`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub id: String,
    pub text: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    #[default]
    #[serde(alias = "knn")]
    Vector,
    Hybrid,
    HybridRrf,
}

impl SearchStrategy {
    pub const ALL: [SearchStrategy; 3] = [Self::Vector, Self::Hybrid, Self::HybridRrf];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Hybrid => "hybrid",
            Self::HybridRrf => "hybrid_rrf",
        }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "vector" | "knn" => Ok(Self::Vector),
            "hybrid" => Ok(Self::Hybrid),
            "hybrid_rrf" | "hybrid-rrf" | "rrf" => Ok(Self::HybridRrf),
            other => Err(format!(
                "unknown search strategy '{other}' (expected vector, hybrid or hybrid_rrf)"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub strategy: SearchStrategy,
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn empty(strategy: SearchStrategy) -> Self {
        Self {
            strategy,
            chunks: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.chunks.iter().map(|chunk| chunk.id.as_str()).collect()
    }
}

/// Boosts applied to the two clauses of a store-scored hybrid query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HybridWeights {
    pub vector: f64,
    pub keyword: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            vector: 0.5,
            keyword: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerRecord {
    pub question: String,
    pub strategy: SearchStrategy,
    pub answer_text: String,
    pub response_time_seconds: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl AnswerRecord {
    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(into = "i8", try_from = "i8")]
pub enum FeedbackScore {
    Up,
    Down,
}

impl From<FeedbackScore> for i8 {
    fn from(value: FeedbackScore) -> Self {
        match value {
            FeedbackScore::Up => 1,
            FeedbackScore::Down => -1,
        }
    }
}

impl TryFrom<i8> for FeedbackScore {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Up),
            -1 => Ok(Self::Down),
            other => Err(format!("feedback score must be +1 or -1, got {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    pub conversation_id: Uuid,
    pub score: FeedbackScore,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationEntry {
    pub id: Uuid,
    pub record: AnswerRecord,
    pub timestamp: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn new(record: AnswerRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            record,
            timestamp: Utc::now(),
        }
    }
}

/// A labelled question: `document` is the id of the chunk that answers it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroundTruth {
    pub question: String,
    pub document: String,
}
