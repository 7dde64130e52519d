/// Errors that can occur on the event backbone.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<skein_core::CoreError> for EventError {
    fn from(err: skein_core::CoreError) -> Self {
        Self::Serialization(err.to_string())
    }
}
