//! The event backbone: at-least-once publish/subscribe between services.
//!
//! One [`EventBus`] value owns its broker connection and is handed to
//! services by dependency injection; there is no ambient global channel.
//! Two backends share the interface:
//!
//! - **Local**: in-process queues, one per subscription, drained in order.
//!   Used in tests and single-process deployments.
//! - **Redis**: one stream per topic, one consumer group per subscribing
//!   service. A message is acknowledged only after the handler returns `Ok`;
//!   unacknowledged messages stay pending and are redelivered when a consumer
//!   restarts.
//!
//! Publishing is best-effort: a broker outage is logged and reported to the
//! caller, which must not fail its own write because of it.

pub mod bus;
pub mod error;
pub mod handler;
pub mod local;
pub mod redis_bus;

pub use bus::EventBus;
pub use error::EventError;
pub use handler::{Delivery, EventHandler, HandlerError};
pub use skein_core::events::{EventEnvelope, PostCreated, PostDeleted, topics};
