//! Stateless credential verification.
//!
//! The verifier checks signature and expiry of a signed credential against a
//! fixed shared secret and produces a [`Principal`]. It never issues
//! credentials and performs no I/O, so it is safe to call concurrently from
//! every request-handling path.

pub mod error;
pub mod verifier;

pub use error::VerifyError;
pub use verifier::{Claims, Principal, TokenVerifier};
