#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A conditional write (e.g. PendingInput WAITING -> COMPLETED) observed
    /// a state other than the one it required. Carries the id so callers can
    /// decide whether this is ALREADY_COMPLETED (benign) or a real conflict.
    #[error("conditional update conflict on {0}")]
    Conflict(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
