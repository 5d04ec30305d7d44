//! Retrieval-augmented question answering.
//!
//! Each question moves through a small state machine:
//!
//! ```text
//! Received ─▶ ContextFetched ─▶ PromptAssembled ─▶ Answered
//!                                              └─▶ Failed
//! ```
//!
//! Retrieval problems never abort a question: the answer is generated without
//! context and flagged `context_free`. Generation problems end in `Failed`
//! with a fixed apology. [`RagPipeline::ask`] therefore always returns a
//! [`RagResponse`].

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::config::{RetrievalConfig, SearchMode};
use crate::llm::ChatModel;
use crate::models::{Citation, ScoredChunk};
use crate::prompt::build_prompt;
use crate::store::{extract_incident_ids, VectorStore};

pub const EMPTY_QUERY_ANSWER: &str = "Please provide a valid query.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryState {
    Received,
    ContextFetched,
    PromptAssembled,
    Answered,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RagResponse {
    pub answer: String,
    /// Chunks actually placed in the prompt, best first.
    pub sources: Vec<Citation>,
    pub context_free: bool,
    pub state: QueryState,
}

pub struct RagPipeline {
    store: Arc<VectorStore>,
    model: Arc<dyn ChatModel>,
    retrieval: RetrievalConfig,
}

impl RagPipeline {
    pub fn new(store: Arc<VectorStore>, model: Arc<dyn ChatModel>) -> Self {
        let retrieval = store.retrieval_config().clone();
        Self {
            store,
            model,
            retrieval,
        }
    }

    /// Answer `question`, optionally overriding the configured search mode.
    pub async fn ask(&self, question: &str, mode: Option<SearchMode>) -> RagResponse {
        let mut state = QueryState::Received;
        let question = question.trim();
        if question.is_empty() {
            return RagResponse {
                answer: EMPTY_QUERY_ANSWER.to_string(),
                sources: Vec::new(),
                context_free: true,
                state: QueryState::Answered,
            };
        }

        let mode = mode.unwrap_or(self.retrieval.mode);
        let context = match self.store.retrieve(question, self.retrieval.top_k, mode).await {
            Ok(chunks) => focus_on_named_incidents(question, chunks),
            Err(e) => {
                warn!(error = %e, "answering without context");
                Vec::new()
            }
        };
        state = advance(state, QueryState::ContextFetched);

        let prompt = build_prompt(question, &context, self.retrieval.context_token_budget);
        let sources: Vec<Citation> = prompt
            .included
            .iter()
            .map(|&i| Citation::from_scored(&context[i]))
            .collect();
        let context_free = sources.is_empty();
        state = advance(state, QueryState::PromptAssembled);

        match self.model.complete(&prompt.messages).await {
            Ok(answer) => RagResponse {
                answer,
                sources,
                context_free,
                state: advance(state, QueryState::Answered),
            },
            Err(e) => {
                error!(error = %e, "answer generation failed");
                RagResponse {
                    answer: e.user_message(),
                    sources: Vec::new(),
                    context_free,
                    state: advance(state, QueryState::Failed),
                }
            }
        }
    }
}

fn advance(from: QueryState, to: QueryState) -> QueryState {
    debug!(?from, ?to, "query state");
    to
}

/// When the question names incidents and some chunks belong to them, keep
/// only those chunks.
fn focus_on_named_incidents(question: &str, chunks: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    let named = extract_incident_ids(question);
    if named.is_empty() {
        return chunks;
    }
    let (matching, other): (Vec<_>, Vec<_>) = chunks
        .into_iter()
        .partition(|c| named.iter().any(|id| *id == c.chunk.incident_id));
    if matching.is_empty() {
        other
    } else {
        matching
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_incidents;
    use crate::config::Config;
    use crate::embedding::Embedder;
    use crate::error::GenerationError;
    use crate::index::MemoryIndex;
    use crate::llm::ChatMessage;
    use crate::models::{ChunkMetadata, DocumentChunk, IncidentRecord};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ConstEmbedder;

    #[async_trait]
    impl Embedder for ConstEmbedder {
        fn model_name(&self) -> &str {
            "const"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    /// Echoes the system prompt so tests can see what context was used.
    #[derive(Default)]
    struct EchoModel {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
            *self.calls.lock().unwrap() += 1;
            Ok(messages[0].content.clone())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ChatModel for FailingModel {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, GenerationError> {
            Err(GenerationError::Timeout)
        }
    }

    fn record(id: &str, state: &str) -> IncidentRecord {
        IncidentRecord {
            id: id.to_string(),
            short_description: format!("Issue {}", id),
            description: None,
            priority: "3".to_string(),
            state: state.to_string(),
            assigned_to: None,
            work_notes: None,
            resolution: None,
            tag: None,
            opened_at: None,
            updated_at: None,
        }
    }

    async fn pipeline(records: &[IncidentRecord], model: Arc<dyn ChatModel>) -> RagPipeline {
        let store = VectorStore::new(
            Arc::new(ConstEmbedder),
            Arc::new(MemoryIndex::new()),
            &Config::default(),
        );
        store
            .index(&chunk_incidents(records, "incidents", 400))
            .await
            .unwrap();
        RagPipeline::new(Arc::new(store), model)
    }

    #[tokio::test]
    async fn test_blank_question_makes_no_calls() {
        let model = Arc::new(EchoModel::default());
        let rag = pipeline(&[], model.clone()).await;
        let resp = rag.ask("   ", None).await;
        assert_eq!(resp.answer, EMPTY_QUERY_ANSWER);
        assert_eq!(*model.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_index_answers_context_free() {
        let rag = pipeline(&[], Arc::new(EchoModel::default())).await;
        let resp = rag.ask("what is broken?", None).await;
        assert_eq!(resp.state, QueryState::Answered);
        assert!(resp.context_free);
        assert!(resp.sources.is_empty());
    }

    #[tokio::test]
    async fn test_named_incident_narrows_context() {
        let records = vec![record("INC1", "New"), record("INC2", "Closed"), record("INC3", "New")];
        let rag = pipeline(&records, Arc::new(EchoModel::default())).await;
        let resp = rag.ask("status of INC2?", Some(SearchMode::Semantic)).await;
        assert!(!resp.sources.is_empty());
        assert!(resp.sources.iter().all(|s| s.incident_id == "INC2"));
        assert!(resp.answer.contains("State: Closed"));
    }

    #[tokio::test]
    async fn test_generation_failure_is_failed_state() {
        let rag = pipeline(&[record("INC1", "New")], Arc::new(FailingModel)).await;
        let resp = rag.ask("anything", None).await;
        assert_eq!(resp.state, QueryState::Failed);
        assert!(resp.answer.contains("try again"));
    }

    #[test]
    fn test_focus_keeps_all_when_nothing_matches() {
        let chunk = |id: &str| ScoredChunk {
            chunk: DocumentChunk {
                id: format!("{}#0", id),
                incident_id: id.to_string(),
                chunk_index: 0,
                source: "s".to_string(),
                text: String::new(),
                hash: String::new(),
                metadata: ChunkMetadata::default(),
            },
            score: 0.5,
        };
        let kept = focus_on_named_incidents("INC9?", vec![chunk("INC1"), chunk("INC2")]);
        assert_eq!(kept.len(), 2);
    }
}
