//! Error types for record decoding, normalization, and config loading.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("step record has no id")]
    MissingId,

    #[error("step record {id} has no session_id")]
    MissingSession { id: String },

    #[error("step record {id} belongs to session {actual}, expected {expected}")]
    ForeignSession {
        id: String,
        expected: String,
        actual: String,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid step record JSON at line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
