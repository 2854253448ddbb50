use thiserror::Error;

use runlens_core::DecodeError;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("subscribe to session {session_id} failed: {reason}")]
    Subscribe { session_id: String, reason: String },

    #[error("event source read failed: {0}")]
    SourceRead(String),

    /// The consumer side of the delivery channel is gone.
    #[error("event source closed")]
    SourceClosed,

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
