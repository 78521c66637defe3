use std::fmt::Write;
use std::sync::Arc;

use ragline_llm::{LlmProvider, Message};

use crate::cancel::CallGuard;
use crate::error::{RagError, Result};
use crate::vector_store::{RetrievalResult, RetrievedRecord};

/// Stated in the prompt when retrieval found nothing, so the model does not
/// invent sources.
pub const NO_CONTEXT_NOTICE: &str =
    "No relevant context was found in the knowledge base. Do not cite or invent sources.";

/// Generated answer plus the context it was conditioned on.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerResponse {
    pub answer: String,
    pub context: RetrievalResult,
}

pub struct Generator<G> {
    provider: Arc<G>,
    guard: CallGuard,
}

impl<G: LlmProvider> Generator<G> {
    #[must_use]
    pub fn new(provider: Arc<G>) -> Self {
        Self {
            provider,
            guard: CallGuard::default(),
        }
    }

    #[must_use]
    pub fn with_guard(mut self, guard: CallGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Ask the model `question`, grounded in `context`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidArgument`] for a blank question and
    /// [`RagError::GenerationService`] when the model call fails.
    pub async fn answer(
        &self,
        question: &str,
        context: RetrievalResult,
        system_instruction: &str,
    ) -> Result<AnswerResponse> {
        if question.trim().is_empty() {
            return Err(RagError::InvalidArgument(
                "question must not be empty".into(),
            ));
        }
        if context.is_empty() {
            tracing::warn!("no context retrieved, asking model without sources");
        }

        let messages = build_messages(question, &context, system_instruction);
        let answer = self
            .guard
            .run("generation request", async {
                self.provider.chat(&messages).await.map_err(|e| {
                    tracing::error!(provider = self.provider.name(), "generation failed: {e}");
                    RagError::GenerationService(e)
                })
            })
            .await?;

        tracing::debug!(sources = context.len(), chars = answer.len(), "answer generated");
        Ok(AnswerResponse { answer, context })
    }
}

/// System instruction, then enumerated context snippets, then the question.
#[must_use]
pub fn build_messages(
    question: &str,
    context: &[RetrievedRecord],
    system_instruction: &str,
) -> Vec<Message> {
    let mut prompt = String::from("Context:\n");
    if context.is_empty() {
        prompt.push_str(NO_CONTEXT_NOTICE);
    } else {
        for (i, record) in context.iter().enumerate() {
            if i > 0 {
                prompt.push_str("\n\n");
            }
            let _ = write!(prompt, "Source {}: {}", i + 1, record.text);
        }
    }
    let _ = write!(prompt, "\n\nQuestion: {question}");

    vec![Message::system(system_instruction), Message::user(prompt)]
}

#[cfg(test)]
mod tests {
    use ragline_llm::Role;
    use ragline_llm::mock::MockProvider;

    use super::*;
    use crate::document::Metadata;

    fn hit(text: &str, score: f32) -> RetrievedRecord {
        RetrievedRecord {
            id: text.to_owned(),
            text: text.to_owned(),
            score,
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn prompt_enumerates_sources_in_rank_order() {
        let ctx = vec![hit("The sky is blue.", 0.9), hit("Grass is green.", 0.1)];
        let messages = build_messages("What color is the sky?", &ctx, "Be concise.");

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "Be concise.");
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(
            messages[1].content,
            "Context:\nSource 1: The sky is blue.\n\nSource 2: Grass is green.\n\n\
             Question: What color is the sky?"
        );
    }

    #[test]
    fn empty_context_is_stated_explicitly() {
        let messages = build_messages("Why?", &[], "sys");
        assert!(messages[1].content.contains(NO_CONTEXT_NOTICE));
        assert!(messages[1].content.ends_with("Question: Why?"));
        assert!(!messages[1].content.contains("Source 1"));
    }

    #[tokio::test]
    async fn answer_carries_context_back() {
        let provider = Arc::new(MockProvider::with_responses(vec!["Blue.".into()]));
        let generator = Generator::new(Arc::clone(&provider));
        let ctx = vec![hit("The sky is blue.", 0.9)];

        let resp = generator
            .answer("What color is the sky?", ctx.clone(), "sys")
            .await
            .unwrap();
        assert_eq!(resp.answer, "Blue.");
        assert_eq!(resp.context, ctx);
        assert_eq!(provider.received().len(), 1);
    }

    #[tokio::test]
    async fn empty_context_still_calls_model() {
        let provider = Arc::new(MockProvider::default());
        let generator = Generator::new(Arc::clone(&provider));
        let resp = generator.answer("q", Vec::new(), "sys").await.unwrap();
        assert!(resp.context.is_empty());
        assert_eq!(provider.received().len(), 1);
    }

    #[tokio::test]
    async fn provider_failure_is_generation_service_error() {
        let generator = Generator::new(Arc::new(MockProvider::failing()));
        let err = generator.answer("q", Vec::new(), "sys").await.unwrap_err();
        assert!(matches!(err, RagError::GenerationService(_)));
    }

    #[tokio::test]
    async fn blank_question_rejected() {
        let generator = Generator::new(Arc::new(MockProvider::default()));
        let err = generator.answer(" ", Vec::new(), "sys").await.unwrap_err();
        assert!(matches!(err, RagError::InvalidArgument(_)));
    }
}
