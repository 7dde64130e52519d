use std::sync::Arc;

use serde::Serialize;

use skein_core::events::EventEnvelope;

use crate::error::EventError;
use crate::handler::EventHandler;
use crate::local::LocalBus;
use crate::redis_bus::RedisBus;

/// Backend-agnostic handle to the event backbone.
///
/// Cloning is cheap; clones share the underlying broker connection.
#[derive(Clone)]
pub enum EventBus {
    Local(LocalBus),
    Redis(RedisBus),
}

impl EventBus {
    /// In-process bus for tests and single-process deployments.
    pub fn new_local() -> Self {
        Self::Local(LocalBus::new())
    }

    /// Redis Streams bus. The connection is established lazily on first use.
    pub fn new_redis(url: impl Into<String>) -> Self {
        Self::Redis(RedisBus::new(url))
    }

    /// Wrap `payload` in an envelope and publish it to `topic`.
    ///
    /// Callers on a write path treat a returned error as best-effort: log it
    /// and complete the write anyway.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &impl Serialize,
    ) -> Result<(), EventError> {
        let envelope = EventEnvelope::new(topic, payload)?;
        match self {
            Self::Local(bus) => bus.publish(&envelope),
            Self::Redis(bus) => bus.publish(&envelope).await,
        }
    }

    /// Subscribe `handler` to the given topics under a named consumer group.
    ///
    /// Each call creates one subscription with its own queue; deliveries
    /// within it are handled one at a time in order. Returns after the
    /// consumer task is spawned.
    pub async fn subscribe(
        &self,
        group: &str,
        event_topics: &[&str],
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), EventError> {
        match self {
            Self::Local(bus) => bus.subscribe(group, event_topics, handler),
            Self::Redis(bus) => bus.subscribe(group, event_topics, handler),
        }
    }
}
