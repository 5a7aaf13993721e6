/// Core error type for the relay.
///
/// Adapter crates map their specific errors into this type so the poll loop
/// and the operator conversation can decide locally what is recoverable.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("source protocol error: {0}")]
    SourceProtocol(String),

    #[error("delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("precondition not met: {0}")]
    PreconditionNotMet(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
