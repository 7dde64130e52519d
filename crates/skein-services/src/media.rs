//! The media service: stored objects are cleaned up when their post goes.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use skein_core::events::{PostDeleted, topics};
use skein_events::{Delivery, EventHandler, HandlerError};

use crate::error::ServiceError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaObject {
    pub id: String,
    pub user_id: String,
    pub url: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn insert(&self, object: MediaObject) -> Result<(), ServiceError>;
    async fn get(&self, id: &str) -> Result<Option<MediaObject>, ServiceError>;

    /// Remove an object. Returns whether it existed; removing an absent
    /// object is not an error.
    async fn remove(&self, id: &str) -> Result<bool, ServiceError>;
}

#[derive(Default)]
pub struct MemoryMediaStore {
    objects: DashMap<String, MediaObject>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.objects.contains_key(id)
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn insert(&self, object: MediaObject) -> Result<(), ServiceError> {
        self.objects.insert(object.id.clone(), object);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<MediaObject>, ServiceError> {
        Ok(self.objects.get(id).map(|o| o.clone()))
    }

    async fn remove(&self, id: &str) -> Result<bool, ServiceError> {
        Ok(self.objects.remove(id).is_some())
    }
}

/// Consumer that deletes a post's media when the post is deleted.
pub struct MediaConsumer {
    store: Arc<dyn MediaStore>,
}

impl MediaConsumer {
    pub fn new(store: Arc<dyn MediaStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventHandler for MediaConsumer {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        if delivery.envelope.topic != topics::POST_DELETED {
            warn!(topic = %delivery.envelope.topic, "ignoring event on unhandled topic");
            return Ok(());
        }
        let event: PostDeleted = delivery.envelope.decode()?;
        for media_id in &event.media_ids {
            let existed = self
                .store
                .remove(media_id)
                .await
                .map_err(|e| HandlerError::new(e.to_string()))?;
            if !existed && delivery.attempt > 1 {
                debug!(media_id = %media_id, "already removed on an earlier delivery");
            }
        }
        debug!(post_id = %event.post_id, count = event.media_ids.len(), "media cleaned up");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::events::EventEnvelope;

    fn object(id: &str) -> MediaObject {
        MediaObject {
            id: id.to_string(),
            user_id: "u1".to_string(),
            url: format!("https://media.example/{id}"),
            created_at: OffsetDateTime::now_utc(),
        }
    }

    fn deleted_event(media_ids: &[&str]) -> Delivery {
        let payload = PostDeleted {
            post_id: "p1".to_string(),
            user_id: "u1".to_string(),
            media_ids: media_ids.iter().map(|s| s.to_string()).collect(),
        };
        Delivery {
            envelope: EventEnvelope::new(topics::POST_DELETED, &payload).unwrap(),
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn removes_exactly_the_listed_objects() {
        let store = Arc::new(MemoryMediaStore::new());
        for id in ["m1", "m2", "m3"] {
            store.insert(object(id)).await.unwrap();
        }
        let consumer = MediaConsumer::new(store.clone());

        consumer.handle(deleted_event(&["m1", "m2"])).await.unwrap();

        assert!(store.get("m1").await.unwrap().is_none());
        assert!(store.get("m2").await.unwrap().is_none());
        assert!(store.get("m3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_delivery_is_a_no_op() {
        let store = Arc::new(MemoryMediaStore::new());
        store.insert(object("m1")).await.unwrap();
        let consumer = MediaConsumer::new(store.clone());

        consumer.handle(deleted_event(&["m1"])).await.unwrap();
        let mut duplicate = deleted_event(&["m1"]);
        duplicate.attempt = 2;
        consumer.handle(duplicate).await.unwrap();

        assert!(store.get("m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unrelated_topics_are_ignored() {
        let store = Arc::new(MemoryMediaStore::new());
        store.insert(object("m1")).await.unwrap();
        let consumer = MediaConsumer::new(store.clone());

        let delivery = Delivery {
            envelope: EventEnvelope::new("post.created", &serde_json::json!({"postId": "p1"}))
                .unwrap(),
            attempt: 1,
        };
        consumer.handle(delivery).await.unwrap();
        assert!(store.get("m1").await.unwrap().is_some());
    }
}
