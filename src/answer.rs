//! Conversational answering over an [`Index`].
//!
//! One question runs four model-facing steps:
//!
//! 1. condense the question into a standalone one, if there is history
//! 2. retrieve grounding chunks for the standalone question
//! 3. answer from the chunks
//! 4. fold the exchange into the running summary
//!
//! The caller's [`ConversationState`] is never mutated. A new state is
//! returned only when every step succeeded.

use std::sync::Arc;

use anyhow::Result;

use crate::error::OracleError;
use crate::index::Index;
use crate::llm::ChatModel;
use crate::models::{ConversationState, RetrievedChunk};

#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    pub answer: String,
    /// Distinct source paths of the grounding chunks, in retrieval order.
    pub sources: Vec<String>,
    pub state: ConversationState,
}

pub struct AnsweringEngine {
    model: Arc<dyn ChatModel>,
    k: usize,
}

impl AnsweringEngine {
    pub fn new(model: Arc<dyn ChatModel>, k: usize) -> Self {
        Self { model, k }
    }

    pub fn model_id(&self) -> &str {
        self.model.model_id()
    }

    pub async fn answer(
        &self,
        index: &Index,
        conversation: &ConversationState,
        question: &str,
    ) -> Result<AnswerOutcome, OracleError> {
        self.try_answer(index, conversation, question)
            .await
            .map_err(|e| {
                let err = OracleError::answer(&e);
                tracing::warn!(error = %e, code = err.code(), "answer failed");
                err
            })
    }

    async fn try_answer(
        &self,
        index: &Index,
        conversation: &ConversationState,
        question: &str,
    ) -> Result<AnswerOutcome> {
        let standalone = if conversation.summary.trim().is_empty() {
            question.to_string()
        } else {
            let rephrased = self
                .model
                .invoke(&condense_prompt(&conversation.summary, question))
                .await?;
            let rephrased = rephrased.trim();
            if rephrased.is_empty() {
                question.to_string()
            } else {
                rephrased.to_string()
            }
        };

        let chunks = index.query(&standalone, self.k).await?;
        tracing::debug!(retrieved = chunks.len(), standalone = %standalone, "retrieved context");

        let answer = self
            .model
            .invoke(&answer_prompt(&conversation.summary, &chunks, &standalone))
            .await?;
        let answer = answer.trim().to_string();

        let summary = self
            .model
            .invoke(&summary_prompt(&conversation.summary, question, &answer))
            .await?;

        let mut sources: Vec<String> = Vec::new();
        for c in &chunks {
            if !sources.contains(&c.chunk.source) {
                sources.push(c.chunk.source.clone());
            }
        }

        Ok(AnswerOutcome {
            state: conversation.with_exchange(question, &answer, summary.trim().to_string()),
            answer,
            sources,
        })
    }
}

pub fn condense_prompt(summary: &str, question: &str) -> String {
    format!(
        "Given the following conversation and a follow up question, rephrase the follow up \
         question to be a standalone question, in its original language.\n\n\
         Chat History:\n{}\n\
         Follow Up Input: {}\n\
         Standalone question:",
        summary.trim(),
        question
    )
}

/// Grounding chunks are listed with their source path so the model can cite
/// files.
pub fn answer_prompt(summary: &str, chunks: &[RetrievedChunk], question: &str) -> String {
    let mut context = String::new();
    for c in chunks {
        context.push_str(&format!("[{}]\n{}\n\n", c.chunk.source, c.chunk.text.trim_end()));
    }

    let mut prompt = String::from(
        "You are an assistant answering questions about a source code repository. \
         Use the following pieces of context to answer the question at the end. \
         If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n",
    );
    if !summary.trim().is_empty() {
        prompt.push_str(&format!("Conversation so far:\n{}\n\n", summary.trim()));
    }
    prompt.push_str(&format!(
        "Context:\n{}Question: {}\nHelpful Answer:",
        context, question
    ));
    prompt
}

pub fn summary_prompt(previous: &str, question: &str, answer: &str) -> String {
    format!(
        "Progressively summarize the lines of conversation provided, adding onto the previous \
         summary returning a new summary.\n\n\
         Current summary:\n{}\n\n\
         New lines of conversation:\nHuman: {}\nAI: {}\n\n\
         New summary:",
        previous.trim(),
        question,
        answer
    )
}
