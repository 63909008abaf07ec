//! Ratekeeper - Rate Limiting Engine
//!
//! This crate decides whether a request identified by a key may proceed
//! under a named bucket's policy. It provides fixed window, sliding window
//! and token bucket algorithms over interchangeable in-memory and Redis
//! stores, a manager that applies the store failure policy, and axum
//! middleware that enforces limits on HTTP routes.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;

pub use error::{RateLimitError, Result};
pub use ratelimit::{Decision, FailureMode, Policy, RateLimitManager};
