/// Errors surfaced by the service layer.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The entity does not exist, or the caller may not see it.
    #[error("not found")]
    NotFound,

    #[error("store error: {0}")]
    Store(String),
}

impl ServiceError {
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }
}
