/// Process-level error type.
///
/// Adapter crates map transport/config failures into this type. Gateway
/// failures have their own enums below so the pipeline can tell which stage
/// failed and pick the matching reply.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single classification call. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("classifier request failed: {0}")]
    Network(String),

    #[error("classifier returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("classifier response had no choices")]
    EmptyChoices,

    #[error("classifier response envelope is not valid json: {0}")]
    MalformedEnvelope(String),

    #[error("classifier payload is not a valid record: {0}")]
    MalformedPayload(String),
}

/// Failure talking to the tabular store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistError {
    #[error("store authentication failed: {0}")]
    Auth(String),

    #[error("failed to list destinations: {0}")]
    Lookup(String),

    #[error("failed to create destination '{name}': {reason}")]
    Create { name: String, reason: String },

    #[error("failed to append to '{name}': {reason}")]
    Append { name: String, reason: String },
}
