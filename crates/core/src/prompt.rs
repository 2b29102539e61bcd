use crate::models::RetrievedChunk;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_STORY_TITLE: &str = "The Adventure of the Speckled Band";
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 16_000;

const CHUNK_LABEL: &str = "text: ";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    /// Answer from the context only, no outside knowledge.
    #[default]
    Detective,
    /// Same scoping, and the answer must quote the context it relies on.
    CitedDetective,
}

impl PromptTemplate {
    pub const ALL: [PromptTemplate; 2] = [Self::Detective, Self::CitedDetective];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detective => "detective",
            Self::CitedDetective => "cited_detective",
        }
    }

    fn preamble(&self, story_title: &str) -> String {
        match self {
            Self::Detective => format!(
                "You are an expert detective analyzing the details of the story \"{story_title}.\" \
Answer the QUESTION using only the relevant information provided in the CONTEXT from the story.\n\n\
Make sure to stay true to the facts in the CONTEXT when answering the QUESTION. \
Avoid adding any outside knowledge or assumptions."
            ),
            Self::CitedDetective => format!(
                "You are a meticulous detective focused on delivering fact-based answers strictly \
derived from the CONTEXT provided from \"{story_title}.\" Answer the QUESTION by citing specific \
lines or details directly from the CONTEXT. Refrain from adding any interpretation or external \
knowledge."
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptConfig {
    pub template: PromptTemplate,
    pub story_title: String,
    /// Upper bound on the characters of chunk text placed in CONTEXT.
    pub max_context_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            template: PromptTemplate::default(),
            story_title: DEFAULT_STORY_TITLE.to_string(),
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    config: PromptConfig,
}

impl PromptBuilder {
    pub fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PromptConfig {
        &self.config
    }

    /// Renders the grounding prompt. Chunks appear in the given order, each
    /// behind a `text: ` label and separated by a blank line.
    pub fn build(&self, question: &str, chunks: &[RetrievedChunk]) -> String {
        let context = self.context(chunks);
        let prompt = format!(
            "{}\n\nQUESTION: {}\n\nCONTEXT:\n{}",
            self.config.template.preamble(&self.config.story_title),
            question,
            context
        );
        prompt.trim().to_string()
    }

    fn context(&self, chunks: &[RetrievedChunk]) -> String {
        let mut context = String::new();
        let mut budget = self.config.max_context_chars;

        for (position, chunk) in chunks.iter().enumerate() {
            let length = chunk.text.chars().count();
            if length <= budget {
                push_entry(&mut context, &chunk.text);
                budget -= length;
                continue;
            }

            if budget > 0 {
                let cut: String = chunk.text.chars().take(budget).collect();
                push_entry(&mut context, &cut);
            }
            warn!(
                max_context_chars = self.config.max_context_chars,
                truncated_chunk = %chunk.id,
                dropped = chunks.len() - position - 1,
                "context cap reached"
            );
            break;
        }

        context
    }
}

fn push_entry(context: &mut String, text: &str) {
    context.push_str(CHUNK_LABEL);
    context.push_str(text);
    context.push_str("\n\n");
}
