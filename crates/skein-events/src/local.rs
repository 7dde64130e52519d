//! In-process backend: per-subscription queues drained in order.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use skein_core::events::EventEnvelope;

use crate::error::EventError;
use crate::handler::{Delivery, EventHandler};

/// In-process topic exchange.
///
/// Each subscription owns a private unbounded queue; publishing clones the
/// envelope into every queue bound to the topic. A dedicated task drains each
/// queue sequentially, which preserves delivery order within a subscription.
#[derive(Clone, Default)]
pub struct LocalBus {
    subscriptions: Arc<RwLock<HashMap<String, Vec<mpsc::UnboundedSender<EventEnvelope>>>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, envelope: &EventEnvelope) -> Result<(), EventError> {
        let subs = self
            .subscriptions
            .read()
            .map_err(|_| EventError::Publish("subscription table poisoned".into()))?;
        if let Some(queues) = subs.get(&envelope.topic) {
            for queue in queues {
                // A closed queue means the consumer task is gone; the message
                // is dropped for that subscriber only.
                let _ = queue.send(envelope.clone());
            }
        }
        tracing::debug!(topic = %envelope.topic, event_id = %envelope.id, "event published (local)");
        Ok(())
    }

    pub fn subscribe(
        &self,
        group: &str,
        event_topics: &[&str],
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), EventError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<EventEnvelope>();
        {
            let mut subs = self
                .subscriptions
                .write()
                .map_err(|_| EventError::Subscribe("subscription table poisoned".into()))?;
            for topic in event_topics {
                subs.entry(topic.to_string()).or_default().push(tx.clone());
            }
        }

        let group = group.to_string();
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let delivery = Delivery {
                    envelope,
                    attempt: 1,
                };
                let topic = delivery.envelope.topic.clone();
                let event_id = delivery.envelope.id.clone();
                if let Err(e) = handler.handle(delivery).await {
                    tracing::warn!(
                        group = %group,
                        topic = %topic,
                        event_id = %event_id,
                        error = %e,
                        "event handler failed, message dropped"
                    );
                }
            }
        });

        tracing::info!(topics = ?event_topics, "subscribed (local)");
        Ok(())
    }
}
