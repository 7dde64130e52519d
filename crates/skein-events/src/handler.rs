use async_trait::async_trait;
use skein_core::events::EventEnvelope;

/// A delivered event.
///
/// `attempt` is at least 2 for redeliveries, so an idempotent handler can
/// log duplicates without treating them as errors.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: EventEnvelope,
    pub attempt: u32,
}

/// Error returned by a consumer handler.
///
/// A failed handler leaves the message unacknowledged: it is logged and
/// effectively lost until a consumer restart redelivers it (Redis backend).
/// There is no automatic retry loop.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<skein_core::CoreError> for HandlerError {
    fn from(err: skein_core::CoreError) -> Self {
        Self(err.to_string())
    }
}

/// A consumer-side event handler.
///
/// Handlers for one queue run one message at a time in delivery order;
/// handlers for different queues run concurrently. Implementations must be
/// idempotent on the entity natural key carried by the payload.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError>;
}
