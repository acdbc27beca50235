//! Infrastructure-backed notification transports.
//!
//! The bus abstraction lives in `projector-events` as pure mechanics; this
//! module provides transports for cross-process fan-out (e.g. Redis).

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisBusError, RedisPubSubBus};
