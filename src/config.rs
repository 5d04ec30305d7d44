//! Configuration loading and validation.
//!
//! Tunables live in a TOML file; secrets come from the process environment.
//! Every section has defaults, so an empty file is a valid configuration.
//! [`load_config`] validates ranges and enumerated options at startup so a
//! bad value fails fast instead of surfacing mid-conversation.

use serde::Deserialize;
use std::path::Path;

use crate::error::ConfigError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub tickets: TicketsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    /// Local path or `http(s)://` URL of the incident JSON export.
    #[serde(default = "default_data_path")]
    pub path: String,
    /// Label attached to every chunk; reload replaces everything under it.
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            path: default_data_path(),
            source: default_source(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_data_path() -> String {
    "data/incidents.json".to_string()
}
fn default_source() -> String {
    "incidents".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_chunk_tokens(),
        }
    }
}

fn default_chunk_tokens() -> usize {
    400
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Pinecone index host, e.g. `https://incident-chatbot-abc123.svc.pinecone.io`.
    /// `PINECONE_HOST` in the environment takes precedence.
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            namespace: default_namespace(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

/// External embedding service.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// `POST {llm.base_url}/v1/embeddings`, authenticated with `MISTRAL_API_KEY`.
    Mistral,
    /// `POST https://api.openai.com/v1/embeddings`, authenticated with `OPENAI_API_KEY`.
    #[serde(rename = "openai")]
    OpenAi,
    /// `POST {embedding.url}/api/embed` on a local Ollama instance.
    Ollama,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: EmbeddingProviderKind,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Ollama base URL.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> EmbeddingProviderKind {
    EmbeddingProviderKind::Mistral
}
fn default_embedding_model() -> String {
    "mistral-embed".to_string()
}
fn default_dims() -> usize {
    1024
}
fn default_batch_size() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_llm_max_tokens(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.mistral.ai".to_string()
}
fn default_llm_model() -> String {
    "mistral-tiny".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_llm_max_tokens() -> u32 {
    2000
}
fn default_llm_timeout_secs() -> u64 {
    60
}

/// How the vector store ranks candidates for a question.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SearchMode {
    /// Confidence-filtered similarity search reranked for diversity.
    #[default]
    General,
    /// Plain top-k nearest neighbours.
    Semantic,
    /// Keyword and semantic scores blended by `hybrid_alpha`.
    Hybrid,
    /// Exact lookup of `INC…` identifiers named in the question.
    IncidentNumber,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::General => "general",
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
            SearchMode::IncidentNumber => "incident-number",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub mode: SearchMode,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f64,
    #[serde(default = "default_context_token_budget")]
    pub context_token_budget: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            mode: SearchMode::default(),
            candidate_k: default_candidate_k(),
            min_confidence: default_min_confidence(),
            hybrid_alpha: default_hybrid_alpha(),
            mmr_lambda: default_mmr_lambda(),
            context_token_budget: default_context_token_budget(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_candidate_k() -> usize {
    10
}
fn default_min_confidence() -> f64 {
    0.5
}
fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_mmr_lambda() -> f64 {
    0.6
}
fn default_context_token_budget() -> usize {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct TicketsConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_ticket_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_ticket_limit")]
    pub default_limit: usize,
}

impl Default for TicketsConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: default_ticket_timeout_secs(),
            default_limit: default_ticket_limit(),
        }
    }
}

fn default_ticket_timeout_secs() -> u64 {
    10
}
fn default_ticket_limit() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Sessions idle longer than this are dropped.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
    /// Creating a session past this count evicts the least recently active.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            session_idle_secs: default_session_idle_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}
fn default_session_idle_secs() -> u64 {
    3600
}
fn default_max_sessions() -> usize {
    1000
}

/// Credentials read from the environment.
#[derive(Clone)]
pub struct Secrets {
    pub pinecone_api_key: String,
    pub llm_api_key: String,
    pub openai_api_key: Option<String>,
    pub ticket_username: Option<String>,
    pub ticket_password: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("pinecone_api_key", &"<redacted>")
            .field("llm_api_key", &"<redacted>")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .field("ticket_username", &self.ticket_username)
            .finish()
    }
}

pub const PINECONE_API_KEY: &str = "PINECONE_API_KEY";
pub const MISTRAL_API_KEY: &str = "MISTRAL_API_KEY";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";

impl Secrets {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            pinecone_api_key: get(PINECONE_API_KEY)
                .ok_or(ConfigError::MissingSecret(PINECONE_API_KEY))?,
            llm_api_key: get(MISTRAL_API_KEY).ok_or(ConfigError::MissingSecret(MISTRAL_API_KEY))?,
            openai_api_key: get(OPENAI_API_KEY),
            ticket_username: get("TICKET_USERNAME"),
            ticket_password: get("TICKET_PASSWORD"),
        })
    }
}

/// Read, parse, and validate the configuration file.
///
/// A missing file at `path` yields the defaults; any other read failure is
/// an error. `PINECONE_HOST` overrides `[index].host`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let mut config = match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Config::default()
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            })
        }
    };

    if let Ok(host) = std::env::var("PINECONE_HOST") {
        if !host.trim().is_empty() {
            config.index.host = host;
        }
    }

    Ok(config)
}

/// Parse TOML text and validate it.
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

pub fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.data.path.trim().is_empty() {
        return Err(invalid("data.path must not be empty"));
    }
    if config.data.source.trim().is_empty() {
        return Err(invalid("data.source must not be empty"));
    }
    if config.chunking.max_tokens == 0 {
        return Err(invalid("chunking.max_tokens must be > 0"));
    }

    let r = &config.retrieval;
    if r.top_k < 1 {
        return Err(invalid("retrieval.top_k must be >= 1"));
    }
    if r.candidate_k < r.top_k {
        return Err(invalid("retrieval.candidate_k must be >= retrieval.top_k"));
    }
    for (name, value) in [
        ("retrieval.min_confidence", r.min_confidence),
        ("retrieval.hybrid_alpha", r.hybrid_alpha),
        ("retrieval.mmr_lambda", r.mmr_lambda),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(invalid(format!("{} must be in [0.0, 1.0]", name)));
        }
    }
    if r.context_token_budget == 0 {
        return Err(invalid("retrieval.context_token_budget must be > 0"));
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        return Err(invalid("llm.temperature must be in [0.0, 2.0]"));
    }
    if config.llm.max_tokens == 0 {
        return Err(invalid("llm.max_tokens must be > 0"));
    }

    if config.embedding.dims == 0 {
        return Err(invalid("embedding.dims must be > 0"));
    }
    if config.embedding.batch_size == 0 {
        return Err(invalid("embedding.batch_size must be > 0"));
    }

    for (name, secs) in [
        ("data.timeout_secs", config.data.timeout_secs),
        ("index.timeout_secs", config.index.timeout_secs),
        ("embedding.timeout_secs", config.embedding.timeout_secs),
        ("llm.timeout_secs", config.llm.timeout_secs),
        ("tickets.timeout_secs", config.tickets.timeout_secs),
        ("server.session_idle_secs", config.server.session_idle_secs),
    ] {
        if secs == 0 {
            return Err(invalid(format!("{} must be > 0", name)));
        }
    }
    if config.server.max_sessions == 0 {
        return Err(invalid("server.max_sessions must be > 0"));
    }

    Ok(())
}
