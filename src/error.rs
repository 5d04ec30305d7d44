//! Error taxonomy.
//!
//! Each outbound concern has its own error type so that the boundary nearest
//! the user action can decide how to present it. Only [`ConfigError`] is
//! fatal; the others are turned into a readable message via `user_message`.

use thiserror::Error;

/// The incident data file could not be turned into records.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to fetch {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("fetching {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected JSON shape in {origin}: {reason}")]
    Shape { origin: String, reason: String },
}

impl LoadError {
    pub fn user_message(&self) -> String {
        format!("Could not load incident data: {}", self)
    }
}

/// The vector index gave no usable context.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("the vector index returned no matches")]
    Empty,

    #[error("vector search unavailable: {0}")]
    Unavailable(String),
}

impl RetrievalError {
    pub fn user_message(&self) -> String {
        match self {
            RetrievalError::Empty => "No indexed incident data matched the question.".to_string(),
            RetrievalError::Unavailable(_) => {
                "Incident search is unavailable right now; answering without context.".to_string()
            }
        }
    }
}

/// The language model call did not produce an answer.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("LLM request timed out")]
    Timeout,

    #[error("LLM transport error: {0}")]
    Transport(String),

    #[error("LLM API error ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("unexpected LLM response: {0}")]
    Parse(String),
}

impl GenerationError {
    pub fn user_message(&self) -> String {
        "Sorry, I couldn't generate an answer right now. Please try again.".to_string()
    }
}

impl From<reqwest::Error> for GenerationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GenerationError::Timeout
        } else if e.is_decode() {
            GenerationError::Parse(e.to_string())
        } else {
            GenerationError::Transport(e.to_string())
        }
    }
}

/// A call to the external ticketing system failed.
#[derive(Debug, Error)]
pub enum TicketServiceError {
    #[error("ticket service unreachable: {0}")]
    Transport(String),

    #[error("ticket service returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("incident not found: {0}")]
    NotFound(String),

    #[error("invalid incident number: {0}")]
    InvalidNumber(String),

    #[error("unexpected ticket service response: {0}")]
    Parse(String),
}

impl TicketServiceError {
    /// Upstream HTTP status to proxy, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            TicketServiceError::Upstream { status, .. } => Some(*status),
            TicketServiceError::NotFound(_) => Some(404),
            _ => None,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            TicketServiceError::NotFound(number) => format!("No incident found with number {}.", number),
            TicketServiceError::InvalidNumber(number) => {
                format!("'{}' is not a valid incident number.", number)
            }
            other => format!("Ticket operation failed: {}", other),
        }
    }
}

impl From<reqwest::Error> for TicketServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TicketServiceError::Parse(e.to_string())
        } else {
            TicketServiceError::Transport(e.to_string())
        }
    }
}

/// Fatal startup configuration problem.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required environment variable {0}")]
    MissingSecret(&'static str),
}
