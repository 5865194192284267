//! Error types for the batch ingestion pipeline.
//!
//! The taxonomy mirrors the pipeline's containment policy: decode and handler
//! failures are converted into resolution actions (dead-letter or release) at
//! the stage where they occur, queue failures surface as [`QueueError`], and
//! only provisioning problems terminate startup via [`PipelineError`].

use thiserror::Error;

/// A payload could not be mapped to a known application message type.
///
/// Carries the original payload so the dead-letter path (and anyone reading
/// the error queue) sees exactly what was received, not a re-encoded copy.
#[derive(Debug, Error)]
#[error("failed to decode message payload: {source}")]
pub struct DecodeError {
    /// The payload as it arrived from the queue.
    pub payload: String,
    #[source]
    pub source: serde_json::Error,
}

/// Errors raised by a queue backend.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A broker call failed (network fault, throttling, bad request).
    #[error("queue operation failed: {0}")]
    Operation(String),

    /// The delivery token does not identify any in-flight message.
    #[error("unknown delivery token: {0}")]
    UnknownToken(String),

    /// The delivery token belongs to a different receive session. Tokens must
    /// be resolved through the session that produced them.
    #[error("delivery token {token} does not belong to session {session}")]
    ForeignToken { token: String, session: usize },

    /// The session has been closed and can no longer be used.
    #[error("session is closed")]
    SessionClosed,
}

/// Errors raised by a storage writer.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage write failed: {0}")]
    WriteFailed(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A batch handler failed. The outcome applies to the whole batch; the
/// pipeline releases every delivery in the group for redelivery.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Other(String),
}

/// Fatal pipeline startup errors. Everything else is contained per stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to provision queue '{queue}': {source}")]
    Provisioning { queue: String, source: QueueError },

    #[error("failed to open receive session {index} on queue '{queue}': {source}")]
    SessionOpen {
        queue: String,
        index: usize,
        source: QueueError,
    },
}
