use crate::models::RetrievedChunk;

/// One row of a store response, in the store's own ranking order.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHit {
    pub id: String,
    pub text: String,
    pub score: f64,
}

impl StoreHit {
    pub fn new(id: impl Into<String>, text: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            score,
        }
    }

    pub fn into_retrieved(self) -> RetrievedChunk {
        RetrievedChunk {
            id: self.id,
            text: self.text,
            score: self.score,
        }
    }
}

/// A document resolved by id after fusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub id: String,
    pub text: String,
}
