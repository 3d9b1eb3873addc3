use std::fmt::Display;

/// Errors raised by the chain-event ingestion pipeline. The supervisor
/// decides retry versus abort by matching on the variant, never the text.
#[derive(Debug)]
pub enum ExecutionError {
    /// The event parsed but is semantically invalid. Processed once, then
    /// skipped forever.
    MalformedEvent(String),
    /// The event payload could not be decoded at all
    DecodeError(String),
    /// Transient transport failure; retried with backoff
    RpcError(String),
    /// Pipeline-level failure; aborts the sync
    SyncError(String),
    /// Registry mutation failed; aborts the pipeline
    Database(String),
    /// Node preconditions unmet; the caller retries later
    NodeNotReady,
}

impl ExecutionError {
    /// Malformed events are persistently rejected rather than retried; the
    /// block transaction keeps their bookkeeping and moves on.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ExecutionError::MalformedEvent(_) | ExecutionError::DecodeError(_)
        )
    }
}

impl Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for ExecutionError {}

impl From<database::DatabaseError> for ExecutionError {
    fn from(error: database::DatabaseError) -> Self {
        ExecutionError::Database(error.to_string())
    }
}
