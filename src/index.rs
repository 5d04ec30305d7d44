//! Vector index capability.
//!
//! The [`VectorIndex`] trait is the narrow surface the rest of the crate
//! uses to talk to a vector database: upsert, delete by source, query, and
//! count. Consistency is whatever the backend provides; nothing here adds
//! locking or transactions on top.
//!
//! Vectors are keyed `"{source}:{chunk_id}"` (see [`vector_id`]) so that a
//! source can be removed by listing its id prefix. Pinecone serverless and
//! starter indexes reject delete-by-metadata-filter.
//!
//! | Implementation | Backend |
//! |----------------|---------|
//! | [`PineconeIndex`] | Pinecone data-plane REST API |
//! | [`MemoryIndex`] | in-process map, brute-force cosine similarity |

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, error};

use crate::embedding::cosine_similarity;
use crate::models::{ChunkMetadata, DocumentChunk};

/// Largest id batch Pinecone accepts in one delete call.
const DELETE_BATCH: usize = 1000;

/// Page size for listing ids by prefix.
const LIST_PAGE: usize = 100;

/// Storage key of a chunk: its source, a colon, then its chunk id.
pub fn vector_id(chunk: &DocumentChunk) -> String {
    format!("{}:{}", chunk.source, chunk.id)
}

/// A chunk and its embedding, ready to be stored.
#[derive(Debug, Clone)]
pub struct IndexedVector {
    pub values: Vec<f32>,
    pub chunk: DocumentChunk,
}

/// A nearest-neighbour query.
#[derive(Debug, Clone)]
pub struct IndexQuery<'a> {
    pub vector: &'a [f32],
    pub top_k: usize,
    /// Restrict matches to chunks of this incident.
    pub incident_id: Option<&'a str>,
    /// Return stored vectors with each match (needed for MMR reranking).
    pub include_values: bool,
}

/// One match returned by [`VectorIndex::query`].
#[derive(Debug, Clone)]
pub struct IndexMatch {
    pub chunk: DocumentChunk,
    /// Raw similarity reported by the backend (cosine, `[-1, 1]`).
    pub score: f64,
    pub values: Option<Vec<f32>>,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite vectors keyed by [`vector_id`].
    async fn upsert(&self, vectors: &[IndexedVector]) -> Result<()>;

    /// Remove every vector tagged with `source`.
    async fn delete_source(&self, source: &str) -> Result<()>;

    /// Nearest neighbours, best first.
    async fn query(&self, query: &IndexQuery<'_>) -> Result<Vec<IndexMatch>>;

    /// Number of stored vectors.
    async fn count(&self) -> Result<usize>;
}

// ============ Pinecone ============

/// Pinecone index addressed by its data-plane host.
pub struct PineconeIndex {
    client: reqwest::Client,
    host: String,
    api_key: String,
    namespace: String,
}

impl PineconeIndex {
    pub fn new(host: &str, api_key: String, namespace: String, timeout: Duration) -> Result<Self> {
        if host.trim().is_empty() {
            return Err(anyhow!(
                "Pinecone host not configured: set [index].host or PINECONE_HOST"
            ));
        }
        let host = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", host.trim_end_matches('/'))
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Pinecone HTTP client")?;
        Ok(Self {
            client,
            host,
            api_key,
            namespace,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<(reqwest::StatusCode, String)> {
        let url = format!("{}{}", self.host, path);
        let res = self
            .client
            .post(&url)
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Pinecone request to {} failed", path))?;
        let status = res.status();
        let text = res.text().await?;
        Ok((status, text))
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<(reqwest::StatusCode, String)> {
        let url = format!("{}{}", self.host, path);
        let res = self
            .client
            .get(&url)
            .header("Api-Key", &self.api_key)
            .query(params)
            .send()
            .await
            .context("Pinecone list request failed")?;
        let status = res.status();
        let text = res.text().await?;
        Ok((status, text))
    }

    /// Every stored id starting with `prefix`, following pagination.
    async fn list_ids(&self, prefix: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut params = vec![
                ("namespace", self.namespace.clone()),
                ("prefix", prefix.to_string()),
                ("limit", LIST_PAGE.to_string()),
            ];
            if let Some(t) = &token {
                params.push(("paginationToken", t.clone()));
            }
            let (status, text) = self.get("/vectors/list", &params).await?;
            // A namespace that was never written reports 404.
            if status.as_u16() == 404 {
                break;
            }
            if !status.is_success() {
                error!(status = ?status, body = %text, "Pinecone list failed");
                return Err(anyhow!("Pinecone list error {}: {}", status, text));
            }

            let body: Value = serde_json::from_str(&text).context("invalid Pinecone list response")?;
            let page = body["vectors"].as_array().cloned().unwrap_or_default();
            ids.extend(
                page.iter()
                    .filter_map(|v| v["id"].as_str())
                    .map(str::to_string),
            );
            token = body["pagination"]["next"]
                .as_str()
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            if token.is_none() || page.is_empty() {
                break;
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(&self, vectors: &[IndexedVector]) -> Result<()> {
        if vectors.is_empty() {
            return Ok(());
        }
        let payload: Vec<Value> = vectors
            .iter()
            .map(|v| {
                json!({
                    "id": vector_id(&v.chunk),
                    "values": v.values,
                    "metadata": chunk_to_metadata(&v.chunk),
                })
            })
            .collect();

        let (status, body) = self
            .post(
                "/vectors/upsert",
                &json!({ "namespace": self.namespace, "vectors": payload }),
            )
            .await?;
        if !status.is_success() {
            error!(status = ?status, body = %body, "Pinecone upsert failed");
            return Err(anyhow!("Pinecone upsert error {}: {}", status, body));
        }
        debug!(count = vectors.len(), "upserted vectors to Pinecone");
        Ok(())
    }

    async fn delete_source(&self, source: &str) -> Result<()> {
        let ids = self.list_ids(&format!("{}:", source)).await?;
        if ids.is_empty() {
            debug!(source, "no Pinecone vectors for source, nothing to delete");
            return Ok(());
        }
        for batch in ids.chunks(DELETE_BATCH) {
            let (status, body) = self
                .post(
                    "/vectors/delete",
                    &json!({ "namespace": self.namespace, "ids": batch }),
                )
                .await?;
            if !status.is_success() {
                error!(status = ?status, body = %body, "Pinecone delete failed");
                return Err(anyhow!("Pinecone delete error {}: {}", status, body));
            }
        }
        debug!(source, count = ids.len(), "deleted Pinecone vectors");
        Ok(())
    }

    async fn query(&self, query: &IndexQuery<'_>) -> Result<Vec<IndexMatch>> {
        let mut body = json!({
            "namespace": self.namespace,
            "vector": query.vector,
            "topK": query.top_k,
            "includeMetadata": true,
            "includeValues": query.include_values,
        });
        if let Some(incident) = query.incident_id {
            body["filter"] = json!({ "incident_number": { "$eq": incident } });
        }

        let (status, text) = self.post("/query", &body).await?;
        if !status.is_success() {
            error!(status = ?status, body = %text, "Pinecone query failed");
            return Err(anyhow!("Pinecone query error {}: {}", status, text));
        }

        let body: Value = serde_json::from_str(&text).context("invalid Pinecone query response")?;
        let matches = body["matches"].as_array().cloned().unwrap_or_default();

        let results: Vec<IndexMatch> = matches
            .iter()
            .filter_map(|m| {
                let id = m["id"].as_str()?;
                let chunk = metadata_to_chunk(id, &m["metadata"])?;
                let values = m["values"].as_array().and_then(|arr| {
                    let v: Vec<f32> = arr.iter().filter_map(|x| x.as_f64()).map(|x| x as f32).collect();
                    (!v.is_empty()).then_some(v)
                });
                Some(IndexMatch {
                    chunk,
                    score: m["score"].as_f64().unwrap_or(0.0),
                    values,
                })
            })
            .collect();

        debug!(count = results.len(), "Pinecone query matches");
        Ok(results)
    }

    async fn count(&self) -> Result<usize> {
        let (status, text) = self.post("/describe_index_stats", &json!({})).await?;
        if !status.is_success() {
            return Err(anyhow!("Pinecone stats error {}: {}", status, text));
        }
        let body: Value = serde_json::from_str(&text).context("invalid Pinecone stats response")?;
        Ok(body["namespaces"][&self.namespace]["vectorCount"]
            .as_u64()
            .unwrap_or(0) as usize)
    }
}

/// Flatten a chunk into Pinecone metadata. Absent optionals are omitted
/// because Pinecone rejects null metadata values.
pub fn chunk_to_metadata(chunk: &DocumentChunk) -> Value {
    let mut meta = json!({
        "type": "incident_details",
        "incident_number": chunk.incident_id,
        "chunk_id": chunk.id,
        "chunk_index": chunk.chunk_index,
        "source": chunk.source,
        "text": chunk.text,
        "hash": chunk.hash,
        "priority": chunk.metadata.priority,
        "state": chunk.metadata.state,
    });
    let optional = [
        ("assigned_to", &chunk.metadata.assigned_to),
        ("tag", &chunk.metadata.tag),
        ("opened_at", &chunk.metadata.opened_at),
        ("updated_at", &chunk.metadata.updated_at),
    ];
    for (key, value) in optional {
        if let Some(v) = value {
            meta[key] = json!(v);
        }
    }
    meta
}

/// Rebuild a chunk from Pinecone metadata; `None` for foreign vectors.
/// The chunk id comes from `chunk_id` metadata, else the raw vector id.
pub fn metadata_to_chunk(id: &str, meta: &Value) -> Option<DocumentChunk> {
    let text = meta["text"].as_str()?;
    let incident_id = meta["incident_number"].as_str()?;
    let opt = |key: &str| meta[key].as_str().map(str::to_string);

    Some(DocumentChunk {
        id: opt("chunk_id").unwrap_or_else(|| id.to_string()),
        incident_id: incident_id.to_string(),
        chunk_index: meta["chunk_index"].as_u64().unwrap_or(0) as usize,
        source: opt("source").unwrap_or_default(),
        text: text.to_string(),
        hash: opt("hash").unwrap_or_default(),
        metadata: ChunkMetadata {
            priority: opt("priority").unwrap_or_default(),
            state: opt("state").unwrap_or_default(),
            assigned_to: opt("assigned_to"),
            tag: opt("tag"),
            opened_at: opt("opened_at"),
            updated_at: opt("updated_at"),
        },
    })
}

// ============ In-memory ============

/// In-process index for tests and offline runs.
#[derive(Default)]
pub struct MemoryIndex {
    vectors: RwLock<BTreeMap<String, IndexedVector>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vector ids currently stored, in order.
    pub fn ids(&self) -> Vec<String> {
        self.vectors
            .read()
            .map(|v| v.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, vectors: &[IndexedVector]) -> Result<()> {
        let mut stored = self.vectors.write().map_err(|_| anyhow!("index lock poisoned"))?;
        for v in vectors {
            stored.insert(vector_id(&v.chunk), v.clone());
        }
        Ok(())
    }

    async fn delete_source(&self, source: &str) -> Result<()> {
        let mut stored = self.vectors.write().map_err(|_| anyhow!("index lock poisoned"))?;
        stored.retain(|_, v| v.chunk.source != source);
        Ok(())
    }

    async fn query(&self, query: &IndexQuery<'_>) -> Result<Vec<IndexMatch>> {
        let stored = self.vectors.read().map_err(|_| anyhow!("index lock poisoned"))?;
        let mut matches: Vec<IndexMatch> = stored
            .values()
            .filter(|v| query.incident_id.map_or(true, |id| v.chunk.incident_id == id))
            .map(|v| IndexMatch {
                chunk: v.chunk.clone(),
                score: cosine_similarity(query.vector, &v.values) as f64,
                values: query.include_values.then(|| v.values.clone()),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        matches.truncate(query.top_k);
        Ok(matches)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self
            .vectors
            .read()
            .map_err(|_| anyhow!("index lock poisoned"))?
            .len())
    }
}
