//! Renders retrieved context and a question into a citation-enforcing prompt.

use serde::{Deserialize, Serialize};

use crate::retriever::RetrievedResult;

/// Opening instructions used when none are configured.
pub const DEFAULT_INSTRUCTIONS: &str =
    "You are a knowledgeable assistant.\nAnswer the question using ONLY the context below.";

/// Phrase the generator must use when the context lacks the answer.
pub const DEFAULT_FALLBACK_PHRASE: &str = "I don't know";

fn default_instructions() -> String {
    DEFAULT_INSTRUCTIONS.to_string()
}

fn default_fallback_phrase() -> String {
    DEFAULT_FALLBACK_PHRASE.to_string()
}

/// Parameterized prompt wording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Role and grounding instructions placed first.
    #[serde(default = "default_instructions")]
    pub instructions: String,
    /// Exact phrase for unanswerable questions.
    #[serde(default = "default_fallback_phrase")]
    pub fallback_phrase: String,
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            instructions: default_instructions(),
            fallback_phrase: default_fallback_phrase(),
        }
    }
}

impl PromptTemplate {
    /// Renders the prompt. Pure: identical inputs give identical output.
    ///
    /// The context block lists each result as `"{citation_id} {content}"`
    /// separated by blank lines; the question is always the final text.
    pub fn build_prompt(&self, query: &str, results: &[RetrievedResult]) -> String {
        let context = results
            .iter()
            .map(|result| format!("{} {}", result.citation_id, result.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let citation_ids = if results.is_empty() {
            String::from("[1], [2]")
        } else {
            results
                .iter()
                .map(|result| result.citation_id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        let mut prompt = String::new();
        prompt.push_str(self.instructions.trim());
        prompt.push('\n');
        prompt.push_str(&format!(
            "Each factual statement MUST include the citation IDs of its supporting context, chosen from {citation_ids}.\n"
        ));
        prompt.push_str(&format!(
            "If the answer is not present in the context, say \"{}\".\n",
            self.fallback_phrase.trim()
        ));
        prompt.push_str("Write the answer with citations.\n\n");
        prompt.push_str("Context:\n");
        prompt.push_str(&context);
        prompt.push_str("\n\nQuestion:\n");
        prompt.push_str(query);
        prompt.trim().to_string()
    }
}

/// Renders with the default template.
pub fn build_prompt(query: &str, results: &[RetrievedResult]) -> String {
    PromptTemplate::default().build_prompt(query, results)
}
