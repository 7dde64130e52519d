//! Wiring of the long-lived consumers onto the event backbone.

use std::sync::Arc;

use skein_core::events::topics;
use skein_events::{EventBus, EventError};

use crate::media::{MediaConsumer, MediaStore};
use crate::search::{SearchConsumer, SearchIndex};

/// Consumer group name used by the search service.
pub const SEARCH_GROUP: &str = "search-service";
/// Consumer group name used by the media service.
pub const MEDIA_GROUP: &str = "media-service";

/// Subscribe the search and media consumers.
///
/// Each service gets its own consumer group, so both receive every event
/// they subscribe to. Returns once the consumer tasks are running.
pub async fn spawn_consumers(
    bus: &EventBus,
    search: Arc<dyn SearchIndex>,
    media: Arc<dyn MediaStore>,
) -> Result<(), EventError> {
    bus.subscribe(SEARCH_GROUP, topics::ALL, Arc::new(SearchConsumer::new(search)))
        .await?;
    bus.subscribe(
        MEDIA_GROUP,
        &[topics::POST_DELETED],
        Arc::new(MediaConsumer::new(media)),
    )
    .await?;
    Ok(())
}
