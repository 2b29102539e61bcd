use crate::embeddings::Embedder;
use crate::llm::LanguageModel;
use crate::models::{AnswerRecord, SearchStrategy};
use crate::prompt::PromptBuilder;
use crate::retrieval::Retriever;
use crate::traits::SearchIndex;
use crate::AnswerError;
use std::time::Instant;
use tracing::{debug, info};

/// Retrieval → prompt → generation for one question at a time.
pub struct RagPipeline<S, E, L> {
    retriever: Retriever<S, E>,
    prompts: PromptBuilder,
    model: L,
}

impl<S, E, L> RagPipeline<S, E, L>
where
    S: SearchIndex + Send + Sync,
    E: Embedder,
    L: LanguageModel,
{
    pub fn new(retriever: Retriever<S, E>, prompts: PromptBuilder, model: L) -> Self {
        Self {
            retriever,
            prompts,
            model,
        }
    }

    pub fn retriever(&self) -> &Retriever<S, E> {
        &self.retriever
    }

    pub fn model(&self) -> &L {
        &self.model
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    /// Swaps the prompt builder, keeping the retriever and the model.
    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    /// Answers `question` from the chunks `strategy` retrieves. An empty
    /// retrieval still reaches the model, which is instructed to stay inside
    /// the (empty) context. Failures are returned as-is, never retried.
    pub async fn answer(
        &self,
        question: &str,
        strategy: SearchStrategy,
    ) -> Result<AnswerRecord, AnswerError> {
        let started = Instant::now();

        let retrieved = self.retriever.retrieve(question, strategy).await?;
        let prompt = self.prompts.build(question, &retrieved.chunks);
        debug!(
            chunks = retrieved.len(),
            prompt_chars = prompt.len(),
            "prompt built"
        );

        let completion = self.model.complete(&prompt).await?;
        let response_time_seconds = started.elapsed().as_secs_f64();

        info!(
            %strategy,
            model = self.model.model_name(),
            response_time_seconds,
            total_tokens = completion.usage.total_tokens,
            "answered question"
        );

        Ok(AnswerRecord {
            question: question.to_string(),
            strategy,
            answer_text: completion.text,
            response_time_seconds,
            prompt_tokens: completion.usage.prompt_tokens,
            completion_tokens: completion.usage.completion_tokens,
            total_tokens: completion.usage.total_tokens,
        })
    }
}
