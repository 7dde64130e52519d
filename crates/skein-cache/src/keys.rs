//! Cache key scheme.
//!
//! Single-entity keys are `post:<id>`; list keys are
//! `posts:<page>:<pageSize>`. The list prefix is load-bearing: the write-path
//! invalidation scan-deletes every key under it, so nothing else may be
//! stored there.

/// Key for a single post detail entry.
pub fn post_key(post_id: &str) -> String {
    format!("post:{post_id}")
}

/// Key for one page of the post list.
pub fn post_list_key(page: usize, page_size: usize) -> String {
    format!("{POST_LIST_PREFIX}{page}:{page_size}")
}

/// Prefix shared by every post list entry.
pub const POST_LIST_PREFIX: &str = "posts:";
