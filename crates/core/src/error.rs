use thiserror::Error;

pub type RotatorResult<T> = Result<T, RotatorError>;

#[derive(Error, Debug)]
pub enum RotatorError {
    /// The decision engine has no state for a segment or arm the caller
    /// referenced. Its view of the schema is older than the store's.
    #[error("Unknown segment: {0}")]
    UnknownSegment(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Event queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RotatorError {
    /// Whether reloading the engine from the store may make the same call succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RotatorError::UnknownSegment(_))
    }
}

/// Reject zero or empty identifying parameters before any state is touched.
pub fn require_page_url(page_url: &str) -> RotatorResult<()> {
    if page_url.is_empty() {
        return Err(RotatorError::Validation("page url must not be empty".into()));
    }
    Ok(())
}

pub fn require_id(name: &str, id: u32) -> RotatorResult<()> {
    if id == 0 {
        return Err(RotatorError::Validation(format!("{name} must not be zero")));
    }
    Ok(())
}

pub fn require_description(name: &str, description: &str) -> RotatorResult<()> {
    if description.trim().is_empty() {
        return Err(RotatorError::Validation(format!("{name} must not be empty")));
    }
    Ok(())
}
