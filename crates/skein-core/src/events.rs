//! The event contract carried by the backbone.
//!
//! Topics are dot-separated routing keys. Every payload carries the entity's
//! natural key (`postId`) so consumers can detect and ignore duplicate
//! deliveries; the backbone is at-least-once, never exactly-once.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use time::OffsetDateTime;

use crate::error::{CoreError, Result};

/// Routing keys for the topic exchange.
pub mod topics {
    /// A post was persisted by the post service.
    pub const POST_CREATED: &str = "post.created";
    /// A post was deleted by its owner.
    pub const POST_DELETED: &str = "post.deleted";

    /// All topics the platform publishes.
    pub const ALL: &[&str] = &[POST_CREATED, POST_DELETED];
}

/// An event as it travels between publish and acknowledgment.
///
/// The payload is kept as raw JSON here; consumers decode it into the typed
/// structs below once they have matched on the topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique id assigned at publish time.
    pub id: String,
    /// Dot-separated routing key, e.g. `post.created`.
    pub topic: String,
    /// Flat structured payload.
    pub payload: serde_json::Value,
    /// Publish timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub published_at: OffsetDateTime,
}

impl EventEnvelope {
    /// Wrap a payload for publishing on the given topic.
    pub fn new(topic: impl Into<String>, payload: &impl Serialize) -> Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.into(),
            payload: serde_json::to_value(payload)?,
            published_at: OffsetDateTime::now_utc(),
        })
    }

    /// Decode the payload into its typed form.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| CoreError::invalid_payload(&self.topic, e.to_string()))
    }
}

/// Payload for `post.created`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCreated {
    pub post_id: String,
    pub user_id: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Payload for `post.deleted`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDeleted {
    pub post_id: String,
    pub user_id: String,
    pub media_ids: Vec<String>,
}
