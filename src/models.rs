//! Core data models.
//!
//! These types represent the incidents, chunks, and retrieval results that
//! flow through the load → index → retrieve → answer pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const UNSPECIFIED_PRIORITY: &str = "unspecified";
pub const UNKNOWN_STATE: &str = "unknown";

/// A normalized incident loaded from the data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub id: String,
    pub short_description: String,
    pub description: Option<String>,
    pub priority: String,
    pub state: String,
    pub assigned_to: Option<String>,
    pub work_notes: Option<String>,
    pub resolution: Option<String>,
    pub tag: Option<String>,
    pub opened_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Filterable metadata stored alongside each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ChunkMetadata {
    pub priority: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// A unit of embedding and retrieval, derived from exactly one incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// `"{incident_id}#{chunk_index}"`.
    pub id: String,
    pub incident_id: String,
    pub chunk_index: usize,
    /// Source file label; reload replaces every chunk carrying it.
    pub source: String,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
    pub metadata: ChunkMetadata,
}

/// A chunk paired with its relevance score in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: DocumentChunk,
    pub score: f64,
}

/// A cited source shown with an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub chunk_id: String,
    pub incident_id: String,
    pub score: f64,
    pub snippet: String,
}

impl Citation {
    pub fn from_scored(sc: &ScoredChunk) -> Self {
        Self {
            chunk_id: sc.chunk.id.clone(),
            incident_id: sc.chunk.incident_id.clone(),
            score: sc.score,
            snippet: sc.chunk.text.clone(),
        }
    }
}

/// One question/answer exchange in a session.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
    pub sources: Vec<Citation>,
    pub context_free: bool,
    pub failed: bool,
    pub asked_at: DateTime<Utc>,
}
