//! Vector store adapter.
//!
//! [`VectorStore`] pairs an [`Embedder`] with a [`VectorIndex`] and exposes the
//! three operations the rest of the crate needs:
//!
//! - [`VectorStore::index`] embeds chunks in batches and upserts them keyed by
//!   source and chunk id, so indexing the same chunks twice overwrites.
//! - [`VectorStore::replace_source`] deletes everything tagged with a source
//!   label, then indexes the new chunks.
//! - [`VectorStore::retrieve`] returns at most `k` chunks, best first, with
//!   scores in `[0, 1]`, ranked according to a [`SearchMode`].
//!
//! Replacement is not atomic: a retrieval racing a reload may observe a
//! partially replaced index.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{Config, RetrievalConfig, SearchMode, Secrets};
use crate::embedding::{create_embedder, embed_query, Embedder};
use crate::error::RetrievalError;
use crate::index::{IndexMatch, IndexQuery, IndexedVector, PineconeIndex, VectorIndex};
use crate::models::{DocumentChunk, ScoredChunk};
use crate::ranking;

static INCIDENT_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bINC\d+\b").unwrap());

/// Incident identifiers named in `text`, upper-cased, in order of first mention.
pub fn extract_incident_ids(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    INCIDENT_ID
        .find_iter(text)
        .map(|m| m.as_str().to_uppercase())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

pub struct VectorStore {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    retrieval: RetrievalConfig,
    batch_size: usize,
}

impl VectorStore {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>, config: &Config) -> Self {
        Self {
            embedder,
            index,
            retrieval: config.retrieval.clone(),
            batch_size: config.embedding.batch_size.max(1),
        }
    }

    /// Build the production store: configured embedder plus Pinecone.
    pub fn from_config(config: &Config, secrets: &Secrets) -> Result<Self> {
        let embedder = create_embedder(config, secrets)?;
        let index = PineconeIndex::new(
            &config.index.host,
            secrets.pinecone_api_key.clone(),
            config.index.namespace.clone(),
            Duration::from_secs(config.index.timeout_secs),
        )?;
        Ok(Self::new(embedder, Arc::new(index), config))
    }

    pub fn retrieval_config(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    /// Embed and upsert `chunks`. Returns the number of vectors written.
    pub async fn index(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        let mut written = 0;
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .with_context(|| format!("embedding batch of {} chunks failed", texts.len()))?;

            let records: Vec<IndexedVector> = batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(chunk, values)| IndexedVector { values, chunk })
                .collect();
            self.index.upsert(&records).await?;
            written += records.len();
            debug!(
                model = self.embedder.model_name(),
                dims = self.embedder.dims(),
                written,
                total = chunks.len(),
                "indexed batch"
            );
        }
        Ok(written)
    }

    /// Delete everything tagged with `source`, then index `chunks`.
    pub async fn replace_source(&self, source: &str, chunks: &[DocumentChunk]) -> Result<usize> {
        self.index
            .delete_source(source)
            .await
            .with_context(|| format!("failed to clear source '{}'", source))?;
        let written = self.index(chunks).await?;
        info!(source, chunks = written, "replaced indexed source");
        Ok(written)
    }

    /// Number of vectors in the index.
    pub async fn count(&self) -> Result<usize> {
        self.index.count().await
    }

    /// Up to `k` chunks relevant to `query`, best first, scores in `[0, 1]`.
    pub async fn retrieve(&self, query: &str, k: usize, mode: SearchMode) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let k = k.max(1);
        let query_vec = embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(|e| RetrievalError::Unavailable(format!("{:#}", e)))?;

        let results = match mode {
            SearchMode::Semantic => {
                let matches = self.nearest(&query_vec, k, None, false).await?;
                ranking::semantic_rank(matches, k)
            }
            SearchMode::Hybrid => {
                let matches = self.nearest(&query_vec, self.candidate_k(k), None, false).await?;
                ranking::hybrid_rank(query, matches, self.retrieval.hybrid_alpha, k)
            }
            SearchMode::General => self.general(&query_vec, k).await?,
            SearchMode::IncidentNumber => {
                let ids = extract_incident_ids(query);
                let exact = self.by_incident_ids(&query_vec, &ids, k).await?;
                if exact.is_empty() {
                    debug!(?ids, "no exact incident match, using general search");
                    self.general(&query_vec, k).await?
                } else {
                    exact
                }
            }
        };

        if results.is_empty() {
            return Err(RetrievalError::Empty);
        }
        debug!(mode = mode.as_str(), count = results.len(), "retrieved chunks");
        Ok(results)
    }

    fn candidate_k(&self, k: usize) -> usize {
        self.retrieval.candidate_k.max(k)
    }

    async fn general(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let matches = self.nearest(query_vec, self.candidate_k(k), None, true).await?;
        let confident = ranking::filter_confident(matches, self.retrieval.min_confidence);
        Ok(ranking::mmr_select(
            query_vec,
            confident,
            self.retrieval.mmr_lambda,
            k,
        ))
    }

    /// Chunks of the named incidents, each scored 1.0.
    async fn by_incident_ids(
        &self,
        query_vec: &[f32],
        ids: &[String],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let mut seen = HashSet::new();
        let mut results = Vec::new();
        for id in ids {
            for m in self.nearest(query_vec, k, Some(id.as_str()), false).await? {
                if seen.insert(m.chunk.id.clone()) {
                    results.push(ScoredChunk {
                        chunk: m.chunk,
                        score: 1.0,
                    });
                }
            }
        }
        Ok(ranking::finalize(results, k))
    }

    async fn nearest(
        &self,
        vector: &[f32],
        top_k: usize,
        incident_id: Option<&str>,
        include_values: bool,
    ) -> Result<Vec<IndexMatch>, RetrievalError> {
        self.index
            .query(&IndexQuery {
                vector,
                top_k,
                incident_id,
                include_values,
            })
            .await
            .map_err(|e| RetrievalError::Unavailable(format!("{:#}", e)))
    }
}
