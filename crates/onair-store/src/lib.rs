//! # onair-store
//!
//! Channel-scoped schedule and countdown-timer state on top of a shared
//! key-value store.
//!
//! The crate exposes the [`KeyValueStore`] seam with an in-memory and a Redis
//! backend, an [`Authorizer`] seam with a credential-backed implementation,
//! and the services the HTTP layer drives: [`ChannelRegistry`],
//! [`ScheduleStore`], [`ScheduleQueryService`] and [`TimerEngine`].

pub mod auth;
pub mod channels;
pub mod kv;
pub mod memory;
pub mod query;
pub mod redis_store;
pub mod schedule;
pub mod timer;

mod error;

use std::sync::Arc;
use std::time::Duration;

pub use auth::{Authorizer, CredentialAuthorizer};
pub use channels::ChannelRegistry;
pub use error::{KvError, KvResult};
pub use kv::{KeyValueStore, WriteOp};
pub use memory::MemoryStore;
pub use query::ScheduleQueryService;
pub use redis_store::RedisStore;
pub use schedule::ScheduleStore;
pub use timer::TimerEngine;

/// Open the Redis backend when a URL is configured, else an empty in-memory store.
pub async fn open_store(
    redis_url: Option<&str>,
    timeout: Duration,
) -> KvResult<Arc<dyn KeyValueStore>> {
    match redis_url {
        Some(url) => Ok(Arc::new(RedisStore::connect(url, timeout).await?)),
        None => {
            tracing::warn!("No REDIS_URL configured, state will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
