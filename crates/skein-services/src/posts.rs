//! The post service: the writer that owns the post cache keys.
//!
//! Write path, in order: persist, publish the event (best-effort), invalidate
//! the affected cache keys, then return. Invalidations are awaited so a
//! client that reads immediately after its own write never sees the
//! pre-write value from cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use skein_cache::keys::{POST_LIST_PREFIX, post_key, post_list_key};
use skein_cache::store::CacheStore;
use skein_events::EventBus;
use skein_core::events::{PostCreated, PostDeleted, topics};

use crate::error::ServiceError;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub content: String,
    #[serde(default)]
    pub media_ids: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// One page of the post feed, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_posts: usize,
}

/// Source of truth for posts.
#[async_trait]
pub trait PostStore: Send + Sync {
    async fn insert(&self, post: Post) -> Result<(), ServiceError>;
    async fn get(&self, id: &str) -> Result<Option<Post>, ServiceError>;
    async fn list(&self, page: usize, page_size: usize) -> Result<PostPage, ServiceError>;
    async fn remove(&self, id: &str) -> Result<Option<Post>, ServiceError>;
}

/// In-memory store backing tests and single-process deployments.
#[derive(Default)]
pub struct MemoryPostStore {
    posts: DashMap<String, Post>,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn insert(&self, post: Post) -> Result<(), ServiceError> {
        self.posts.insert(post.id.clone(), post);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Post>, ServiceError> {
        Ok(self.posts.get(id).map(|p| p.clone()))
    }

    async fn list(&self, page: usize, page_size: usize) -> Result<PostPage, ServiceError> {
        let mut all: Vec<Post> = self.posts.iter().map(|p| p.clone()).collect();
        // Newest first; the id tie-break keeps pagination stable.
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total_posts = all.len();
        let total_pages = total_posts.div_ceil(page_size);
        let posts = all
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();
        Ok(PostPage {
            posts,
            current_page: page,
            total_pages,
            total_posts,
        })
    }

    async fn remove(&self, id: &str) -> Result<Option<Post>, ServiceError> {
        Ok(self.posts.remove(id).map(|(_, p)| p))
    }
}

/// Cache facade for the post key family.
///
/// Only the post service writes or invalidates these keys.
#[derive(Clone)]
pub struct PostCache {
    store: CacheStore,
    detail_ttl: Duration,
    list_ttl: Duration,
}

impl PostCache {
    pub fn new(store: CacheStore, detail_ttl: Duration, list_ttl: Duration) -> Self {
        Self {
            store,
            detail_ttl,
            list_ttl,
        }
    }

    pub async fn get_post(&self, id: &str) -> Option<Post> {
        self.store.get_json(&post_key(id)).await
    }

    pub async fn put_post(&self, post: &Post) {
        self.store
            .set_json(&post_key(&post.id), post, self.detail_ttl)
            .await;
    }

    pub async fn get_page(&self, page: usize, page_size: usize) -> Option<PostPage> {
        self.store.get_json(&post_list_key(page, page_size)).await
    }

    pub async fn put_page(&self, page: usize, page_size: usize, result: &PostPage) {
        self.store
            .set_json(&post_list_key(page, page_size), result, self.list_ttl)
            .await;
    }

    /// Drop every list page. A new or removed post changes the feed, so all
    /// cached pages are stale at once.
    pub async fn invalidate_lists(&self) {
        self.store.delete_prefix(POST_LIST_PREFIX).await;
    }

    /// Drop one post's detail entry and every list page.
    pub async fn invalidate_post(&self, id: &str) {
        self.store
            .invalidate_entity(&post_key(id), POST_LIST_PREFIX)
            .await;
    }
}

/// The post service itself.
#[derive(Clone)]
pub struct PostService {
    store: Arc<dyn PostStore>,
    cache: PostCache,
    bus: EventBus,
}

impl PostService {
    pub fn new(store: Arc<dyn PostStore>, cache: PostCache, bus: EventBus) -> Self {
        Self { store, cache, bus }
    }

    /// Create a post. The event publish is best-effort: a broker outage is
    /// logged and the write still succeeds.
    pub async fn create(
        &self,
        user_id: &str,
        content: &str,
        media_ids: Vec<String>,
    ) -> Result<Post, ServiceError> {
        let post = Post {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            media_ids,
            created_at: OffsetDateTime::now_utc(),
        };
        self.store.insert(post.clone()).await?;

        let event = PostCreated {
            post_id: post.id.clone(),
            user_id: post.user_id.clone(),
            content: post.content.clone(),
            created_at: post.created_at,
        };
        if let Err(e) = self.bus.publish(topics::POST_CREATED, &event).await {
            warn!(post_id = %post.id, error = %e, "failed to publish post.created");
        }

        self.cache.invalidate_lists().await;
        debug!(post_id = %post.id, "post created");
        Ok(post)
    }

    /// Read-through fetch of a single post.
    pub async fn get(&self, id: &str) -> Result<Post, ServiceError> {
        if let Some(post) = self.cache.get_post(id).await {
            return Ok(post);
        }
        let post = self.store.get(id).await?.ok_or(ServiceError::NotFound)?;
        self.cache.put_post(&post).await;
        Ok(post)
    }

    /// Read-through fetch of one feed page. Out-of-range paging inputs are
    /// clamped rather than rejected.
    pub async fn list(&self, page: usize, page_size: usize) -> Result<PostPage, ServiceError> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);

        if let Some(cached) = self.cache.get_page(page, page_size).await {
            return Ok(cached);
        }
        let result = self.store.list(page, page_size).await?;
        self.cache.put_page(page, page_size, &result).await;
        Ok(result)
    }

    /// Delete a post owned by `user_id`.
    ///
    /// A post owned by someone else reports not-found, same as a missing
    /// post, so existence is not leaked to non-owners.
    pub async fn delete(&self, id: &str, user_id: &str) -> Result<(), ServiceError> {
        let post = self.store.get(id).await?.ok_or(ServiceError::NotFound)?;
        if post.user_id != user_id {
            return Err(ServiceError::NotFound);
        }
        self.store.remove(id).await?;

        let event = PostDeleted {
            post_id: post.id.clone(),
            user_id: post.user_id.clone(),
            media_ids: post.media_ids.clone(),
        };
        if let Err(e) = self.bus.publish(topics::POST_DELETED, &event).await {
            warn!(post_id = %post.id, error = %e, "failed to publish post.deleted");
        }

        self.cache.invalidate_post(id).await;
        debug!(post_id = %id, "post deleted");
        Ok(())
    }
}
