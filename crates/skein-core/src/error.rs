use thiserror::Error;

/// Core error types shared across Skein services
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown event topic: {0}")]
    UnknownTopic(String),

    #[error("Invalid event payload for {topic}: {message}")]
    InvalidPayload { topic: String, message: String },

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CoreError {
    /// Create a new UnknownTopic error
    pub fn unknown_topic(topic: impl Into<String>) -> Self {
        Self::UnknownTopic(topic.into())
    }

    /// Create a new InvalidPayload error
    pub fn invalid_payload(topic: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

/// Convenience result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::unknown_topic("post.archived");
        assert_eq!(err.to_string(), "Unknown event topic: post.archived");

        let err = CoreError::invalid_payload("post.created", "missing postId");
        assert!(err.to_string().contains("post.created"));
        assert!(err.to_string().contains("missing postId"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err: serde_json::Error =
            serde_json::from_str::<serde_json::Value>("{ nope }").unwrap_err();
        let core_err: CoreError = json_err.into();
        assert!(matches!(core_err, CoreError::JsonError(_)));
    }
}
