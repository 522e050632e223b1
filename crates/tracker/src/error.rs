//! Typed error type for tracker construction.
//!
//! `Tracker::track` itself is infallible by contract; only building a
//! sink (e.g. opening the Redis connection) can fail.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
