//! Key-value primitives the schedule, timer and registry are written against.

use async_trait::async_trait;

use crate::error::KvResult;

/// One write inside an atomic [`KeyValueStore::apply`] batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Set(String, String),
    Delete(String),
    ListPush(String, String),
    /// Remove every occurrence of the value from the list.
    ListRemove(String, String),
    SetAdd(String, String),
    SetRemove(String, String),
    Incr(String),
}

/// Durable string-keyed store with list and set values.
///
/// Implementations must bound every call in time and report failures as
/// errors instead of blocking.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> KvResult<Option<String>>;

    /// Read several string keys in one round-trip, in order.
    async fn get_many(&self, keys: &[String]) -> KvResult<Vec<Option<String>>>;

    async fn set(&self, key: &str, value: &str) -> KvResult<()>;

    /// Delete a key of any type. Missing keys are not an error.
    async fn delete(&self, key: &str) -> KvResult<()>;

    /// Append to a list, returning its new length.
    async fn list_push(&self, key: &str, value: &str) -> KvResult<usize>;

    /// Whole list contents; empty when the key is absent.
    async fn list_range(&self, key: &str) -> KvResult<Vec<String>>;

    /// Remove all occurrences of `value`, returning how many were removed.
    async fn list_remove(&self, key: &str, value: &str) -> KvResult<usize>;

    /// Returns `true` if the member was newly added.
    async fn set_add(&self, key: &str, member: &str) -> KvResult<bool>;

    /// Returns `true` if the member was present.
    async fn set_remove(&self, key: &str, member: &str) -> KvResult<bool>;

    async fn set_members(&self, key: &str) -> KvResult<Vec<String>>;

    async fn set_is_member(&self, key: &str, member: &str) -> KvResult<bool>;

    /// Apply all writes atomically: readers see either none or all of them.
    async fn apply(&self, ops: Vec<WriteOp>) -> KvResult<()>;
}
