//! Shared types for the Skein platform.
//!
//! This crate holds what every service needs and nothing more: the core error
//! taxonomy and the event contract (envelope, topics, typed payloads) that the
//! backbone carries between services.

pub mod error;
pub mod events;

pub use error::{CoreError, Result};
pub use events::{EventEnvelope, PostCreated, PostDeleted, topics};
