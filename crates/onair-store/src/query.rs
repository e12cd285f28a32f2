//! Public, unauthenticated schedule reads.
//!
//! A snapshot is assembled from the slot list, every slot field, the
//! metadata fields and the categories blob. Writers bump the schedule
//! revision inside their atomic batch; a read that sees the revision move
//! underneath it starts over so callers observe either the pre- or the
//! post-write state.

use std::sync::Arc;

use tracing::{debug, warn};

use onair_shared::constants::SCHEDULE_READ_ATTEMPTS;
use onair_shared::{
    keys, Categories, ChannelName, CoreResult, MetadataField, ScheduleMetadata, ScheduleSnapshot,
    Slot, SlotEntry, SlotField,
};

use crate::kv::KeyValueStore;

#[derive(Clone)]
pub struct ScheduleQueryService {
    kv: Arc<dyn KeyValueStore>,
}

impl ScheduleQueryService {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Metadata, ordered slots and categories for `channel`.
    ///
    /// Unregistered channels yield an empty snapshot rather than an error.
    pub async fn get_schedule(&self, channel: &ChannelName) -> CoreResult<ScheduleSnapshot> {
        if !self.kv.set_is_member(keys::CHANNELS, channel.as_str()).await? {
            debug!(channel = %channel, "Schedule requested for unknown channel");
            return Ok(ScheduleSnapshot {
                channel: channel.to_string(),
                ..ScheduleSnapshot::default()
            });
        }

        let rev_key = keys::schedule_revision(channel);
        let mut attempt = 1;
        loop {
            let before = self.kv.get(&rev_key).await?;
            let snapshot = self.read_once(channel).await?;
            let after = self.kv.get(&rev_key).await?;

            if before == after {
                return Ok(snapshot);
            }
            if attempt >= SCHEDULE_READ_ATTEMPTS {
                warn!(
                    channel = %channel,
                    attempts = attempt,
                    "Schedule kept changing during read; returning last view"
                );
                return Ok(snapshot);
            }
            debug!(channel = %channel, attempt, "Schedule changed during read, retrying");
            attempt += 1;
        }
    }

    async fn read_once(&self, channel: &ChannelName) -> CoreResult<ScheduleSnapshot> {
        let indices = self.kv.list_range(&keys::slot_list(channel)).await?;

        let mut wanted: Vec<String> = Vec::with_capacity(indices.len() * SlotField::ALL.len() + 6);
        for index in &indices {
            wanted.extend(
                SlotField::ALL
                    .iter()
                    .map(|field| keys::slot_field(channel, index, *field)),
            );
        }
        wanted.extend(
            MetadataField::ALL
                .iter()
                .map(|field| keys::meta_field(channel, *field)),
        );
        wanted.push(keys::categories(channel));

        let mut values = self.kv.get_many(&wanted).await?.into_iter();

        let slots = indices
            .into_iter()
            .map(|index| {
                let mut slot = Slot::default();
                for field in SlotField::ALL {
                    slot.set_field(field, values.next().flatten().unwrap_or_default());
                }
                SlotEntry { index, slot }
            })
            .collect();

        let mut metadata = ScheduleMetadata::default();
        for field in MetadataField::ALL {
            metadata.set_field(field, values.next().flatten().unwrap_or_default());
        }

        let categories = parse_categories(channel, values.next().flatten().as_deref());

        Ok(ScheduleSnapshot {
            channel: channel.to_string(),
            metadata,
            slots,
            categories,
        })
    }
}

/// Decode the stored categories blob; anything malformed reads as empty.
pub(crate) fn parse_categories(channel: &ChannelName, raw: Option<&str>) -> Categories {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Categories::new();
    };
    match serde_json::from_str(raw) {
        Ok(categories) => categories,
        Err(e) => {
            warn!(channel = %channel, error = %e, "Malformed categories blob, treating as empty");
            Categories::new()
        }
    }
}

/// Read the attribute record of one slot index.
pub(crate) async fn read_slot(
    kv: &dyn KeyValueStore,
    channel: &ChannelName,
    index: &str,
) -> CoreResult<Slot> {
    let wanted: Vec<String> = SlotField::ALL
        .iter()
        .map(|field| keys::slot_field(channel, index, *field))
        .collect();
    let values = kv.get_many(&wanted).await?;

    let mut slot = Slot::default();
    for (field, value) in SlotField::ALL.into_iter().zip(values) {
        slot.set_field(field, value.unwrap_or_default());
    }
    Ok(slot)
}

pub(crate) async fn read_metadata(
    kv: &dyn KeyValueStore,
    channel: &ChannelName,
) -> CoreResult<ScheduleMetadata> {
    let wanted: Vec<String> = MetadataField::ALL
        .iter()
        .map(|field| keys::meta_field(channel, *field))
        .collect();
    let values = kv.get_many(&wanted).await?;

    let mut metadata = ScheduleMetadata::default();
    for (field, value) in MetadataField::ALL.into_iter().zip(values) {
        metadata.set_field(field, value.unwrap_or_default());
    }
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KvResult;
    use crate::kv::WriteOp;
    use crate::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Lands a concurrent slot rewrite right after each of the first
    /// `writes` batched reads, the way another writer's `apply` would.
    struct InterleavedWriter {
        inner: MemoryStore,
        channel: ChannelName,
        writes: AtomicUsize,
        batched_reads: AtomicUsize,
    }

    impl InterleavedWriter {
        fn new(inner: MemoryStore, writes: usize) -> Self {
            Self {
                inner,
                channel: channel(),
                writes: AtomicUsize::new(writes),
                batched_reads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl KeyValueStore for InterleavedWriter {
        async fn get(&self, key: &str) -> KvResult<Option<String>> {
            self.inner.get(key).await
        }

        async fn get_many(&self, wanted: &[String]) -> KvResult<Vec<Option<String>>> {
            let values = self.inner.get_many(wanted).await?;
            let n = self.batched_reads.fetch_add(1, Ordering::SeqCst);
            let pending = self
                .writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |w| w.checked_sub(1))
                .is_ok();
            if pending {
                let field = keys::slot_field(&self.channel, "0", SlotField::Activity);
                self.inner
                    .apply(vec![
                        WriteOp::Set(field, format!("New{n}")),
                        WriteOp::Incr(keys::schedule_revision(&self.channel)),
                    ])
                    .await?;
            }
            Ok(values)
        }

        async fn set(&self, key: &str, value: &str) -> KvResult<()> {
            self.inner.set(key, value).await
        }

        async fn delete(&self, key: &str) -> KvResult<()> {
            self.inner.delete(key).await
        }

        async fn list_push(&self, key: &str, value: &str) -> KvResult<usize> {
            self.inner.list_push(key, value).await
        }

        async fn list_range(&self, key: &str) -> KvResult<Vec<String>> {
            self.inner.list_range(key).await
        }

        async fn list_remove(&self, key: &str, value: &str) -> KvResult<usize> {
            self.inner.list_remove(key, value).await
        }

        async fn set_add(&self, key: &str, member: &str) -> KvResult<bool> {
            self.inner.set_add(key, member).await
        }

        async fn set_remove(&self, key: &str, member: &str) -> KvResult<bool> {
            self.inner.set_remove(key, member).await
        }

        async fn set_members(&self, key: &str) -> KvResult<Vec<String>> {
            self.inner.set_members(key).await
        }

        async fn set_is_member(&self, key: &str, member: &str) -> KvResult<bool> {
            self.inner.set_is_member(key, member).await
        }

        async fn apply(&self, ops: Vec<WriteOp>) -> KvResult<()> {
            self.inner.apply(ops).await
        }
    }

    async fn one_slot_channel() -> MemoryStore {
        let store = MemoryStore::new();
        let ch = channel();
        store.set_add(keys::CHANNELS, "foo").await.unwrap();
        store.list_push(&keys::slot_list(&ch), "0").await.unwrap();
        store
            .set(&keys::slot_field(&ch, "0", SlotField::Activity), "Old")
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_write_during_read_returns_post_write_view() {
        let kv = Arc::new(InterleavedWriter::new(one_slot_channel().await, 1));
        let query = ScheduleQueryService::new(kv.clone());

        let snapshot = query.get_schedule(&channel()).await.unwrap();
        assert_eq!(snapshot.slots[0].slot.activity, "New0");
        assert_eq!(kv.batched_reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_constantly_changing_schedule_gives_up_after_cap() {
        let kv = Arc::new(InterleavedWriter::new(one_slot_channel().await, usize::MAX));
        let query = ScheduleQueryService::new(kv.clone());

        let snapshot = query.get_schedule(&channel()).await.unwrap();
        assert_eq!(
            kv.batched_reads.load(Ordering::SeqCst),
            SCHEDULE_READ_ATTEMPTS
        );
        // Last attempt read before the fifth concurrent write landed.
        let last = SCHEDULE_READ_ATTEMPTS - 2;
        assert_eq!(snapshot.slots[0].slot.activity, format!("New{last}"));
    }

    fn channel() -> ChannelName {
        ChannelName::parse("foo").unwrap()
    }

    #[tokio::test]
    async fn test_unknown_channel_is_empty_snapshot() {
        let store = MemoryStore::new();
        // Orphaned keys of an unregistered channel must not surface.
        store.list_push(&keys::slot_list(&channel()), "0").await.unwrap();

        let query = ScheduleQueryService::new(Arc::new(store));
        let snapshot = query.get_schedule(&channel()).await.unwrap();
        assert_eq!(snapshot.channel, "foo");
        assert!(snapshot.slots.is_empty());
        assert!(snapshot.categories.is_empty());
        assert_eq!(snapshot.metadata, ScheduleMetadata::default());
    }

    #[tokio::test]
    async fn test_reads_only_listed_indices() {
        let store = MemoryStore::new();
        let ch = channel();
        store.set_add(keys::CHANNELS, "foo").await.unwrap();
        store.list_push(&keys::slot_list(&ch), "0").await.unwrap();
        store
            .set(&keys::slot_field(&ch, "0", SlotField::Activity), "Stream")
            .await
            .unwrap();
        store
            .set(&keys::slot_field(&ch, "7", SlotField::Activity), "Orphan")
            .await
            .unwrap();
        store
            .set(&keys::meta_field(&ch, MetadataField::StartTime), "18:00")
            .await
            .unwrap();

        let query = ScheduleQueryService::new(Arc::new(store));
        let snapshot = query.get_schedule(&ch).await.unwrap();
        assert_eq!(snapshot.slots.len(), 1);
        assert_eq!(snapshot.slots[0].index, "0");
        assert_eq!(snapshot.slots[0].slot.activity, "Stream");
        assert_eq!(snapshot.slots[0].slot.time, "");
        assert_eq!(snapshot.metadata.start_time, "18:00");
    }

    #[tokio::test]
    async fn test_malformed_categories_read_as_empty() {
        let store = MemoryStore::new();
        let ch = channel();
        store.set_add(keys::CHANNELS, "foo").await.unwrap();
        store.set(&keys::categories(&ch), "{not json").await.unwrap();

        let query = ScheduleQueryService::new(Arc::new(store));
        let snapshot = query.get_schedule(&ch).await.unwrap();
        assert!(snapshot.categories.is_empty());
    }

    #[test]
    fn test_parse_categories() {
        let ch = channel();
        let parsed = parse_categories(
            &ch,
            Some(r#"{"Gaming":["bg-purple","text-white","border-purple","🎮"]}"#),
        );
        assert_eq!(parsed["Gaming"][3], "🎮");
        assert!(parse_categories(&ch, Some(r#"{"Gaming":["only","three","items"]}"#)).is_empty());
        assert!(parse_categories(&ch, None).is_empty());
    }
}
