//! Redis Streams backend: one stream per topic, one consumer group per
//! subscribing service.
//!
//! Delivery is at-least-once. An entry is acknowledged (`XACK`) only after
//! the handler returns `Ok`; failed entries stay in the group's pending list
//! and are redelivered when a consumer restarts, because each consumer loop
//! drains its pending entries before reading new ones. There is no in-process
//! retry loop.

use std::sync::Arc;
use std::time::Duration;

use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use skein_core::events::EventEnvelope;

use crate::error::EventError;
use crate::handler::{Delivery, EventHandler};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const READ_BLOCK_MS: usize = 5_000;
const READ_BATCH: usize = 16;

/// Stream key for a topic.
fn stream_key(topic: &str) -> String {
    format!("skein:events:{topic}")
}

/// Consumer name within a group.
///
/// The name must survive restarts: `XREADGROUP` with an explicit id only
/// returns entries pending for the requesting consumer, so a process that
/// comes back under a fresh name would never see what its predecessor left
/// unacknowledged. One stable name per group keeps that backlog reachable.
fn consumer_name(group: &str) -> String {
    format!("{group}-0")
}

/// Redis Streams event bus.
///
/// The publish connection is established lazily on first use and owned by
/// this value; it is shared (serialized behind a mutex) by every publishing
/// path in the process. Each subscription runs its own consumer loop on a
/// dedicated connection.
#[derive(Clone)]
pub struct RedisBus {
    url: String,
    conn: Arc<Mutex<Option<ConnectionManager>>>,
    connect_timeout: Duration,
}

impl RedisBus {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            conn: Arc::new(Mutex::new(None)),
            connect_timeout: Duration::from_secs(2),
        }
    }

    async fn connect(&self) -> Result<ConnectionManager, EventError> {
        let client =
            Client::open(self.url.as_str()).map_err(|e| EventError::Connection(e.to_string()))?;
        timeout(self.connect_timeout, client.get_connection_manager())
            .await
            .map_err(|_| EventError::Connection("broker connect timed out".into()))?
            .map_err(|e| EventError::Connection(e.to_string()))
    }

    /// Publish an envelope to its topic stream.
    ///
    /// Makes at most one reconnect attempt. On persistent broker
    /// unavailability the error is returned for the caller to log; the
    /// caller's own write must still succeed.
    pub async fn publish(&self, envelope: &EventEnvelope) -> Result<(), EventError> {
        let json = serde_json::to_string(envelope)
            .map_err(|e| EventError::Serialization(e.to_string()))?;
        let key = stream_key(&envelope.topic);

        let mut guard = self.conn.lock().await;
        let had_conn = guard.is_some();
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(EventError::Connection("broker connection lost".into()));
        };

        let first: redis::RedisResult<String> = conn
            .xadd(&key, "*", &[("envelope", json.as_str())])
            .await;
        match first {
            Ok(id) => {
                debug!(topic = %envelope.topic, stream_id = %id, "event published");
                Ok(())
            }
            Err(e) if had_conn => {
                // Stale connection: one bounded reconnect, one retry.
                warn!(error = %e, "publish failed, reconnecting once");
                *guard = Some(self.connect().await?);
                let Some(conn) = guard.as_mut() else {
                    return Err(EventError::Connection("broker connection lost".into()));
                };
                let retried: redis::RedisResult<String> = conn
                    .xadd(&key, "*", &[("envelope", json.as_str())])
                    .await;
                match retried {
                    Ok(id) => {
                        debug!(topic = %envelope.topic, stream_id = %id, "event published");
                        Ok(())
                    }
                    Err(e) => {
                        *guard = None;
                        Err(EventError::Publish(e.to_string()))
                    }
                }
            }
            Err(e) => {
                *guard = None;
                Err(EventError::Publish(e.to_string()))
            }
        }
    }

    /// Start a consumer loop for `group` over the given topics.
    ///
    /// The loop owns a private consumer-group reader per stream; messages on
    /// one stream are handled one at a time in delivery order. Connection
    /// failures reconnect with a fixed delay, as the loop must outlive broker
    /// restarts.
    pub fn subscribe(
        &self,
        group: &str,
        event_topics: &[&str],
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), EventError> {
        if event_topics.is_empty() {
            return Err(EventError::Subscribe("no topics given".into()));
        }
        let streams: Vec<String> = event_topics.iter().map(|t| stream_key(t)).collect();
        let url = self.url.clone();
        let group = group.to_string();
        let connect_timeout = self.connect_timeout;

        tokio::spawn(async move {
            let consumer = consumer_name(&group);
            loop {
                if let Err(e) =
                    run_consumer(&url, &group, &consumer, &streams, handler.clone(), connect_timeout)
                        .await
                {
                    error!(
                        group = %group,
                        error = %e,
                        "consumer loop error, reconnecting in {}s",
                        RECONNECT_DELAY.as_secs()
                    );
                    sleep(RECONNECT_DELAY).await;
                }
            }
        });
        Ok(())
    }
}

async fn run_consumer(
    url: &str,
    group: &str,
    consumer: &str,
    streams: &[String],
    handler: Arc<dyn EventHandler>,
    connect_timeout: Duration,
) -> Result<(), EventError> {
    let client = Client::open(url).map_err(|e| EventError::Connection(e.to_string()))?;
    let mut conn = timeout(connect_timeout, client.get_connection_manager())
        .await
        .map_err(|_| EventError::Connection("broker connect timed out".into()))?
        .map_err(|e| EventError::Connection(e.to_string()))?;

    for stream in streams {
        ensure_group(&mut conn, stream, group).await?;
    }

    // Drain this consumer group's pending entries before reading new ones,
    // so messages left unacknowledged by a crashed consumer are redelivered.
    let mut ids: Vec<String> = vec!["0".to_string(); streams.len()];

    info!(group = %group, streams = ?streams, "subscribed to event streams");

    loop {
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .block(READ_BLOCK_MS)
            .count(READ_BATCH);
        let reply: StreamReadReply = conn
            .xread_options(streams, &ids, &opts)
            .await
            .map_err(|e| EventError::Subscribe(e.to_string()))?;

        let mut progressed = vec![false; streams.len()];
        for stream_key in &reply.keys {
            let Some(idx) = streams.iter().position(|s| *s == stream_key.key) else {
                continue;
            };
            let redelivery = ids[idx] != ">";
            for entry in &stream_key.ids {
                progressed[idx] = true;
                if redelivery {
                    ids[idx] = entry.id.clone();
                }
                let attempt = if redelivery { 2 } else { 1 };
                handle_entry(
                    &mut conn,
                    &stream_key.key,
                    group,
                    entry,
                    attempt,
                    handler.as_ref(),
                )
                .await;
            }
        }

        // A pending read that returned nothing for a stream means its
        // backlog is drained; switch that stream to live delivery.
        for (idx, id) in ids.iter_mut().enumerate() {
            if *id != ">" && !progressed[idx] {
                *id = ">".to_string();
            }
        }
    }
}

async fn handle_entry(
    conn: &mut ConnectionManager,
    stream: &str,
    group: &str,
    entry: &redis::streams::StreamId,
    attempt: u32,
    handler: &dyn EventHandler,
) {
    let Some(json) = entry.get::<String>("envelope") else {
        warn!(stream = %stream, entry_id = %entry.id, "entry without envelope field, discarding");
        ack(conn, stream, group, &entry.id).await;
        return;
    };
    let envelope: EventEnvelope = match serde_json::from_str(&json) {
        Ok(envelope) => envelope,
        Err(e) => {
            // Malformed entries would stay pending forever; discard them.
            warn!(stream = %stream, entry_id = %entry.id, error = %e, "malformed envelope, discarding");
            ack(conn, stream, group, &entry.id).await;
            return;
        }
    };

    let topic = envelope.topic.clone();
    let event_id = envelope.id.clone();
    match handler.handle(Delivery { envelope, attempt }).await {
        Ok(()) => {
            ack(conn, stream, group, &entry.id).await;
            debug!(topic = %topic, event_id = %event_id, attempt, "event handled");
        }
        Err(e) => {
            // Not acknowledged: stays pending until a consumer restart.
            warn!(
                topic = %topic,
                event_id = %event_id,
                attempt,
                error = %e,
                "event handler failed, message left unacknowledged"
            );
        }
    }
}

async fn ack(conn: &mut ConnectionManager, stream: &str, group: &str, entry_id: &str) {
    let res: redis::RedisResult<i64> = conn.xack(stream, group, &[entry_id]).await;
    if let Err(e) = res {
        warn!(stream = %stream, entry_id = %entry_id, error = %e, "XACK failed");
    }
}

async fn ensure_group(
    conn: &mut ConnectionManager,
    stream: &str,
    group: &str,
) -> Result<(), EventError> {
    let res: redis::RedisResult<String> = conn.xgroup_create_mkstream(stream, group, "0").await;
    match res {
        Ok(_) => Ok(()),
        // The group already exists: fine, another instance created it.
        Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
        Err(e) => Err(EventError::Subscribe(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_keys_are_namespaced_per_topic() {
        assert_eq!(stream_key("post.created"), "skein:events:post.created");
        assert_ne!(stream_key("post.created"), stream_key("post.deleted"));
    }

    #[test]
    fn consumer_name_is_stable_across_restarts() {
        // A restarted service must present the same name it crashed under,
        // or its unacknowledged entries would stay pending forever.
        assert_eq!(
            consumer_name("search-service"),
            consumer_name("search-service")
        );
        assert_ne!(
            consumer_name("search-service"),
            consumer_name("media-service")
        );
    }

    #[tokio::test]
    async fn publish_with_broker_down_fails_without_blocking() {
        // Connection refused is immediate; the bounded connect attempt must
        // surface as an error, not a hang or a panic.
        let bus = RedisBus::new("redis://127.0.0.1:1");
        let envelope =
            EventEnvelope::new("post.created", &serde_json::json!({"postId": "p1"})).unwrap();
        let started = std::time::Instant::now();
        let result = bus.publish(&envelope).await;
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
