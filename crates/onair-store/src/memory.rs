//! In-process [`KeyValueStore`] used for local development and tests.
//!
//! Mirrors Redis typing: a key holds exactly one kind of value, lists and
//! sets disappear when they become empty, and `apply` batches are staged on a
//! copy and swapped in only when every op succeeded.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{KvError, KvResult};
use crate::kv::{KeyValueStore, WriteOp};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    strings: HashMap<String, String>,
    lists: HashMap<String, Vec<String>>,
    sets: HashMap<String, BTreeSet<String>>,
}

impl MemoryState {
    fn ensure_free_for(&self, key: &str, kind: Kind) -> KvResult<()> {
        let clash = match kind {
            Kind::String => self.lists.contains_key(key) || self.sets.contains_key(key),
            Kind::List => self.strings.contains_key(key) || self.sets.contains_key(key),
            Kind::Set => self.strings.contains_key(key) || self.lists.contains_key(key),
        };
        if clash {
            return Err(KvError::WrongType(key.to_string()));
        }
        Ok(())
    }

    fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.ensure_free_for(key, Kind::String)?;
        Ok(self.strings.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> KvResult<()> {
        self.ensure_free_for(key, Kind::String)?;
        self.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) {
        self.strings.remove(key);
        self.lists.remove(key);
        self.sets.remove(key);
    }

    fn list_push(&mut self, key: &str, value: &str) -> KvResult<usize> {
        self.ensure_free_for(key, Kind::List)?;
        let list = self.lists.entry(key.to_string()).or_default();
        list.push(value.to_string());
        Ok(list.len())
    }

    fn list_remove(&mut self, key: &str, value: &str) -> KvResult<usize> {
        self.ensure_free_for(key, Kind::List)?;
        let Some(list) = self.lists.get_mut(key) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|v| v != value);
        let removed = before - list.len();
        if list.is_empty() {
            self.lists.remove(key);
        }
        Ok(removed)
    }

    fn set_add(&mut self, key: &str, member: &str) -> KvResult<bool> {
        self.ensure_free_for(key, Kind::Set)?;
        Ok(self
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    fn set_remove(&mut self, key: &str, member: &str) -> KvResult<bool> {
        self.ensure_free_for(key, Kind::Set)?;
        let Some(set) = self.sets.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(member);
        if set.is_empty() {
            self.sets.remove(key);
        }
        Ok(removed)
    }

    fn incr(&mut self, key: &str) -> KvResult<i64> {
        let current = match self.get(key)? {
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|_| KvError::WrongType(key.to_string()))?,
            None => 0,
        };
        let next = current.saturating_add(1);
        self.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    fn apply_op(&mut self, op: &WriteOp) -> KvResult<()> {
        match op {
            WriteOp::Set(key, value) => self.set(key, value),
            WriteOp::Delete(key) => {
                self.delete(key);
                Ok(())
            }
            WriteOp::ListPush(key, value) => self.list_push(key, value).map(|_| ()),
            WriteOp::ListRemove(key, value) => self.list_remove(key, value).map(|_| ()),
            WriteOp::SetAdd(key, member) => self.set_add(key, member).map(|_| ()),
            WriteOp::SetRemove(key, member) => self.set_remove(key, member).map(|_| ()),
            WriteOp::Incr(key) => self.incr(key).map(|_| ()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    String,
    List,
    Set,
}

/// Shared in-memory store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys of any type currently held.
    pub async fn key_count(&self) -> usize {
        let state = self.state.read().await;
        state.strings.len() + state.lists.len() + state.sets.len()
    }

    /// All keys starting with `prefix`, sorted.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let state = self.state.read().await;
        let mut keys: Vec<String> = state
            .strings
            .keys()
            .chain(state.lists.keys())
            .chain(state.sets.keys())
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.state.read().await.get(key)
    }

    async fn get_many(&self, keys: &[String]) -> KvResult<Vec<Option<String>>> {
        let state = self.state.read().await;
        // MGET semantics: non-string keys read as absent.
        Ok(keys.iter().map(|k| state.strings.get(k).cloned()).collect())
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        self.state.write().await.set(key, value)
    }

    async fn delete(&self, key: &str) -> KvResult<()> {
        self.state.write().await.delete(key);
        Ok(())
    }

    async fn list_push(&self, key: &str, value: &str) -> KvResult<usize> {
        self.state.write().await.list_push(key, value)
    }

    async fn list_range(&self, key: &str) -> KvResult<Vec<String>> {
        let state = self.state.read().await;
        state.ensure_free_for(key, Kind::List)?;
        Ok(state.lists.get(key).cloned().unwrap_or_default())
    }

    async fn list_remove(&self, key: &str, value: &str) -> KvResult<usize> {
        self.state.write().await.list_remove(key, value)
    }

    async fn set_add(&self, key: &str, member: &str) -> KvResult<bool> {
        self.state.write().await.set_add(key, member)
    }

    async fn set_remove(&self, key: &str, member: &str) -> KvResult<bool> {
        self.state.write().await.set_remove(key, member)
    }

    async fn set_members(&self, key: &str) -> KvResult<Vec<String>> {
        let state = self.state.read().await;
        state.ensure_free_for(key, Kind::Set)?;
        Ok(state
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn set_is_member(&self, key: &str, member: &str) -> KvResult<bool> {
        let state = self.state.read().await;
        state.ensure_free_for(key, Kind::Set)?;
        Ok(state.sets.get(key).is_some_and(|s| s.contains(member)))
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> KvResult<()> {
        let mut state = self.state.write().await;
        let mut staged = state.clone();
        for op in &ops {
            staged.apply_op(op)?;
        }
        *state = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_strings() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").await.unwrap(), None);
        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lists_keep_order_and_vanish_when_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.list_push("l", "0").await.unwrap(), 1);
        assert_eq!(store.list_push("l", "1").await.unwrap(), 2);
        store.list_push("l", "0").await.unwrap();
        assert_eq!(store.list_range("l").await.unwrap(), vec!["0", "1", "0"]);

        assert_eq!(store.list_remove("l", "0").await.unwrap(), 2);
        assert_eq!(store.list_range("l").await.unwrap(), vec!["1"]);
        store.list_remove("l", "1").await.unwrap();
        assert_eq!(store.key_count().await, 0);
    }

    #[tokio::test]
    async fn test_sets() {
        let store = MemoryStore::new();
        assert!(store.set_add("s", "foo").await.unwrap());
        assert!(!store.set_add("s", "foo").await.unwrap());
        assert!(store.set_is_member("s", "foo").await.unwrap());
        assert!(!store.set_is_member("s", "bar").await.unwrap());
        assert!(store.set_remove("s", "foo").await.unwrap());
        assert!(store.set_members("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_type_rejected() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert!(matches!(
            store.list_push("k", "x").await,
            Err(KvError::WrongType(_))
        ));
    }

    #[tokio::test]
    async fn test_get_many_in_order() {
        let store = MemoryStore::new();
        store.set("a", "1").await.unwrap();
        store.set("c", "3").await.unwrap();
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(
            store.get_many(&keys).await.unwrap(),
            vec![Some("1".to_string()), None, Some("3".to_string())]
        );
    }

    #[tokio::test]
    async fn test_apply_is_all_or_nothing() {
        let store = MemoryStore::new();
        store.set("str", "v").await.unwrap();

        let result = store
            .apply(vec![
                WriteOp::Set("a".into(), "1".into()),
                WriteOp::ListPush("str".into(), "boom".into()),
            ])
            .await;
        assert!(result.is_err());
        assert_eq!(store.get("a").await.unwrap(), None);

        store
            .apply(vec![
                WriteOp::Set("a".into(), "1".into()),
                WriteOp::Delete("a".into()),
                WriteOp::Set("a".into(), "2".into()),
                WriteOp::Incr("n".into()),
                WriteOp::Incr("n".into()),
            ])
            .await
            .unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.get("n").await.unwrap().as_deref(), Some("2"));
    }
}
