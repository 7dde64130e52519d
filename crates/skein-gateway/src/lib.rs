//! The platform's single public entry point.
//!
//! The gateway admits requests against per-client rate budgets, verifies
//! bearer credentials, rewrites the public `/v1` path space to the backends'
//! `/api` space and forwards over HTTP with streaming bodies. Backends are
//! never reachable except through it.

pub mod error;
pub mod handlers;
pub mod limiter;
pub mod middleware;
pub mod observability;
pub mod proxy;
pub mod routes;
pub mod server;

pub use error::GatewayError;
pub use limiter::{Admission, CounterStore, RateLimiter};
pub use routes::{BodyPolicy, Route, RouteTable};
pub use server::{AppState, ServerBuilder, SkeinGateway, build_app, build_state};
