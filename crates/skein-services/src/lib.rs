//! Backend services of the platform: posts (the writer), search and media
//! (event consumers). The gateway proxies to their HTTP surfaces; this crate
//! holds the coordination logic those surfaces sit on.

pub mod consumers;
pub mod error;
pub mod media;
pub mod posts;
pub mod search;

pub use consumers::spawn_consumers;
pub use error::ServiceError;
pub use media::{MediaConsumer, MediaObject, MediaStore, MemoryMediaStore};
pub use posts::{MemoryPostStore, Post, PostCache, PostPage, PostService, PostStore};
pub use search::{MemorySearchIndex, SearchConsumer, SearchDoc, SearchIndex};
