//! The search service: an index kept current by consuming post events.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use skein_core::events::{PostCreated, PostDeleted, topics};
use skein_events::{Delivery, EventHandler, HandlerError};

use crate::error::ServiceError;

/// Query results are capped at this many documents, newest first.
pub const MAX_RESULTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDoc {
    pub post_id: String,
    pub user_id: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Insert or replace the document for a post. Keyed by `post_id`, so
    /// re-applying the same event is a no-op.
    async fn upsert(&self, doc: SearchDoc) -> Result<(), ServiceError>;

    /// Remove a document. Removing an absent one is not an error.
    async fn remove(&self, post_id: &str) -> Result<(), ServiceError>;

    async fn query(&self, term: &str) -> Result<Vec<SearchDoc>, ServiceError>;
}

/// In-memory index keyed by post id.
#[derive(Default)]
pub struct MemorySearchIndex {
    docs: DashMap<String, SearchDoc>,
}

impl MemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn upsert(&self, doc: SearchDoc) -> Result<(), ServiceError> {
        self.docs.insert(doc.post_id.clone(), doc);
        Ok(())
    }

    async fn remove(&self, post_id: &str) -> Result<(), ServiceError> {
        self.docs.remove(post_id);
        Ok(())
    }

    async fn query(&self, term: &str) -> Result<Vec<SearchDoc>, ServiceError> {
        let needle = term.to_lowercase();
        let mut hits: Vec<SearchDoc> = self
            .docs
            .iter()
            .filter(|doc| doc.content.to_lowercase().contains(&needle))
            .map(|doc| doc.clone())
            .collect();
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.post_id.cmp(&a.post_id)));
        hits.truncate(MAX_RESULTS);
        Ok(hits)
    }
}

/// Consumer keeping the index in step with the post service.
pub struct SearchConsumer {
    index: Arc<dyn SearchIndex>,
}

impl SearchConsumer {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl EventHandler for SearchConsumer {
    async fn handle(&self, delivery: Delivery) -> Result<(), HandlerError> {
        if delivery.attempt > 1 {
            debug!(event_id = %delivery.envelope.id, "redelivered event, applying idempotently");
        }
        match delivery.envelope.topic.as_str() {
            topics::POST_CREATED => {
                let event: PostCreated = delivery.envelope.decode()?;
                self.index
                    .upsert(SearchDoc {
                        post_id: event.post_id,
                        user_id: event.user_id,
                        content: event.content,
                        created_at: event.created_at,
                    })
                    .await
                    .map_err(|e| HandlerError::new(e.to_string()))
            }
            topics::POST_DELETED => {
                let event: PostDeleted = delivery.envelope.decode()?;
                self.index
                    .remove(&event.post_id)
                    .await
                    .map_err(|e| HandlerError::new(e.to_string()))
            }
            other => {
                // Unknown topics are acknowledged, not retried.
                warn!(topic = %other, "ignoring event on unhandled topic");
                Ok(())
            }
        }
    }
}
