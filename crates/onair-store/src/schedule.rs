//! Slot and metadata writes for a channel's schedule.
//!
//! Slots are addressed by their position in the channel's index list, so a
//! delete re-numbers every remaining slot to `0..N-1` in the same relative
//! order. The whole compaction is written as one atomic batch.
//!
//! Concurrent deletes on one channel are not serialised: each reads the
//! list, then writes its own compacted view, so the last batch wins. The
//! targeted index of every delete is gone afterwards, but which slots end up
//! at which positions is not deterministic under that race.

use std::sync::Arc;

use tracing::{debug, info};

use onair_shared::{
    keys, Categories, ChannelName, CoreError, CoreResult, MetadataPatch, NewSlot,
    ScheduleMetadata, ScheduleSnapshot, SlotEntry, SlotField, SlotPatch,
};

use crate::auth::{authorize, Authorizer};
use crate::kv::{KeyValueStore, WriteOp};
use crate::query::{read_metadata, read_slot, ScheduleQueryService};

#[derive(Clone)]
pub struct ScheduleStore {
    kv: Arc<dyn KeyValueStore>,
    authorizer: Arc<dyn Authorizer>,
    query: ScheduleQueryService,
}

impl ScheduleStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, authorizer: Arc<dyn Authorizer>) -> Self {
        let query = ScheduleQueryService::new(Arc::clone(&kv));
        Self {
            kv,
            authorizer,
            query,
        }
    }

    /// Unauthenticated read; see [`ScheduleQueryService::get_schedule`].
    pub async fn get_schedule(&self, channel: &ChannelName) -> CoreResult<ScheduleSnapshot> {
        self.query.get_schedule(channel).await
    }

    /// Append a slot at index `len(list)` and return it.
    pub async fn append_slot(
        &self,
        token: &str,
        channel: &ChannelName,
        new_slot: NewSlot,
    ) -> CoreResult<SlotEntry> {
        authorize(self.authorizer.as_ref(), token, channel).await?;
        self.ensure_registered(channel).await?;
        let slot = new_slot.validate()?;

        let list_key = keys::slot_list(channel);
        let index = self.kv.list_range(&list_key).await?.len().to_string();

        // Every field is written so stale records at a reused index are overwritten.
        let mut ops: Vec<WriteOp> = SlotField::ALL
            .iter()
            .map(|field| {
                WriteOp::Set(
                    keys::slot_field(channel, &index, *field),
                    slot.field(*field).to_string(),
                )
            })
            .collect();
        ops.push(WriteOp::ListPush(list_key, index.clone()));
        ops.push(WriteOp::Incr(keys::schedule_revision(channel)));
        self.kv.apply(ops).await?;

        info!(channel = %channel, index = %index, hour = %slot.hour, "Slot appended");
        Ok(SlotEntry { index, slot })
    }

    /// Overwrite only the fields present in `patch`.
    pub async fn update_slot(
        &self,
        token: &str,
        channel: &ChannelName,
        index: &str,
        patch: SlotPatch,
    ) -> CoreResult<SlotEntry> {
        authorize(self.authorizer.as_ref(), token, channel).await?;
        self.ensure_registered(channel).await?;
        patch.validate()?;
        self.ensure_slot(channel, index).await?;

        if patch.is_empty() {
            debug!(channel = %channel, index, "Empty slot patch, nothing written");
        } else {
            let present = patch.present();
            let mut ops: Vec<WriteOp> = present
                .iter()
                .map(|(field, value)| {
                    WriteOp::Set(keys::slot_field(channel, index, *field), (*value).to_string())
                })
                .collect();
            ops.push(WriteOp::Incr(keys::schedule_revision(channel)));
            self.kv.apply(ops).await?;
            info!(channel = %channel, index, fields = present.len(), "Slot updated");
        }

        let slot = read_slot(self.kv.as_ref(), channel, index).await?;
        Ok(SlotEntry {
            index: index.to_string(),
            slot,
        })
    }

    /// Remove the slot at `index` and compact the remaining indices.
    pub async fn delete_slot(&self, token: &str, channel: &ChannelName, index: &str) -> CoreResult<()> {
        authorize(self.authorizer.as_ref(), token, channel).await?;
        self.ensure_registered(channel).await?;

        let list_key = keys::slot_list(channel);
        let indices = self.kv.list_range(&list_key).await?;
        if !indices.iter().any(|i| i == index) {
            return Err(CoreError::not_found(format!("slot {index}")));
        }

        let mut old_fields: Vec<String> = Vec::with_capacity(indices.len() * SlotField::ALL.len());
        for old in &indices {
            old_fields.extend(
                SlotField::ALL
                    .iter()
                    .map(|field| keys::slot_field(channel, old, *field)),
            );
        }
        let values = self.kv.get_many(&old_fields).await?;

        let ops = compaction_ops(channel, &indices, index, &old_fields, values);
        let remaining = indices.len() - 1;
        self.kv.apply(ops).await?;

        info!(channel = %channel, index, remaining, "Slot deleted and indices compacted");
        Ok(())
    }

    /// Overwrite only the metadata fields present in `patch`.
    pub async fn set_metadata(
        &self,
        token: &str,
        channel: &ChannelName,
        patch: MetadataPatch,
    ) -> CoreResult<ScheduleMetadata> {
        authorize(self.authorizer.as_ref(), token, channel).await?;
        self.ensure_registered(channel).await?;
        patch.validate()?;

        let present = patch.present();
        if !present.is_empty() {
            let mut ops: Vec<WriteOp> = present
                .iter()
                .map(|(field, value)| {
                    WriteOp::Set(keys::meta_field(channel, *field), (*value).to_string())
                })
                .collect();
            ops.push(WriteOp::Incr(keys::schedule_revision(channel)));
            self.kv.apply(ops).await?;
        }

        info!(channel = %channel, fields = present.len(), "Schedule metadata updated");
        read_metadata(self.kv.as_ref(), channel).await
    }

    /// Replace the whole categories map.
    pub async fn set_categories(
        &self,
        token: &str,
        channel: &ChannelName,
        categories: Categories,
    ) -> CoreResult<Categories> {
        authorize(self.authorizer.as_ref(), token, channel).await?;
        self.ensure_registered(channel).await?;
        if categories.keys().any(|name| name.trim().is_empty()) {
            return Err(CoreError::invalid("category name must not be empty"));
        }

        let encoded = serde_json::to_string(&categories)
            .map_err(|e| CoreError::invalid(format!("unencodable categories: {e}")))?;
        self.kv
            .apply(vec![
                WriteOp::Set(keys::categories(channel), encoded),
                WriteOp::Incr(keys::schedule_revision(channel)),
            ])
            .await?;

        info!(channel = %channel, count = categories.len(), "Categories replaced");
        Ok(categories)
    }

    async fn ensure_registered(&self, channel: &ChannelName) -> CoreResult<()> {
        if self.kv.set_is_member(keys::CHANNELS, channel.as_str()).await? {
            Ok(())
        } else {
            Err(CoreError::not_found(format!("channel {channel}")))
        }
    }

    /// Exact string match against the list; `"01"` never matches `"1"`.
    async fn ensure_slot(&self, channel: &ChannelName, index: &str) -> CoreResult<()> {
        let indices = self.kv.list_range(&keys::slot_list(channel)).await?;
        if indices.iter().any(|i| i == index) {
            Ok(())
        } else {
            Err(CoreError::not_found(format!("slot {index}")))
        }
    }
}

/// Build the batch that drops `target` and renumbers the rest.
///
/// `old_fields` holds the field keys of every index in `indices` order, and
/// `values` their current contents. Absent fields stay absent at the new
/// position.
fn compaction_ops(
    channel: &ChannelName,
    indices: &[String],
    target: &str,
    old_fields: &[String],
    values: Vec<Option<String>>,
) -> Vec<WriteOp> {
    let list_key = keys::slot_list(channel);
    let per_slot = SlotField::ALL.len();

    let mut ops: Vec<WriteOp> = old_fields.iter().cloned().map(WriteOp::Delete).collect();
    ops.push(WriteOp::Delete(list_key.clone()));

    let mut values = values.into_iter();
    let mut next = 0usize;
    for old in indices {
        let record: Vec<Option<String>> = values.by_ref().take(per_slot).collect();
        if old == target {
            continue;
        }
        let new_index = next.to_string();
        next += 1;
        if *old != new_index {
            debug!(channel = %channel, from = %old, to = %new_index, "Moving slot");
        }
        for (field, value) in SlotField::ALL.into_iter().zip(record) {
            if let Some(value) = value {
                ops.push(WriteOp::Set(
                    keys::slot_field(channel, &new_index, field),
                    value,
                ));
            }
        }
        ops.push(WriteOp::ListPush(list_key.clone(), new_index));
    }
    ops.push(WriteOp::Incr(keys::schedule_revision(channel)));
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{credential_digest, CredentialAuthorizer};
    use crate::memory::MemoryStore;

    const ADMIN: &str = "admin-token";
    const FOO_TOKEN: &str = "foo-secret";

    async fn setup() -> (MemoryStore, ScheduleStore, ChannelName) {
        let store = MemoryStore::new();
        let kv: Arc<dyn KeyValueStore> = Arc::new(store.clone());
        let auth = Arc::new(CredentialAuthorizer::new(Arc::clone(&kv), Some(ADMIN.into())));
        let channel = ChannelName::parse("foo").unwrap();
        store.set_add(keys::CHANNELS, "foo").await.unwrap();
        store
            .set(&keys::password(&channel), &credential_digest(FOO_TOKEN))
            .await
            .unwrap();
        (store, ScheduleStore::new(kv, auth), channel)
    }

    fn slot(activity: &str, time: &str) -> NewSlot {
        NewSlot {
            hour: "0".into(),
            time: time.into(),
            category: "Gaming".into(),
            activity: activity.into(),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_append_then_delete_first_compacts() {
        let (store, schedule, ch) = setup().await;

        let first = schedule
            .append_slot(FOO_TOKEN, &ch, slot("Stream", "12:00am - 1:00am"))
            .await
            .unwrap();
        assert_eq!(first.index, "0");

        let second = schedule
            .append_slot(
                FOO_TOKEN,
                &ch,
                NewSlot {
                    hour: "1".into(),
                    description: Some("late night".into()),
                    ..slot("Just Chatting", "1:00am - 2:00am")
                },
            )
            .await
            .unwrap();
        assert_eq!(second.index, "1");

        schedule.delete_slot(FOO_TOKEN, &ch, "0").await.unwrap();

        let snapshot = schedule.get_schedule(&ch).await.unwrap();
        assert_eq!(snapshot.slots.len(), 1);
        assert_eq!(snapshot.slots[0].index, "0");
        assert_eq!(snapshot.slots[0].slot, second.slot);

        // Nothing left behind at the old position.
        let leftovers = store.keys_with_prefix("schedule:foo:slot:1:").await;
        assert!(leftovers.is_empty(), "leaked keys: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_delete_middle_keeps_relative_order() {
        let (_store, schedule, ch) = setup().await;
        for name in ["a", "b", "c", "d"] {
            schedule
                .append_slot(ADMIN, &ch, slot(name, "t"))
                .await
                .unwrap();
        }

        schedule.delete_slot(ADMIN, &ch, "1").await.unwrap();

        let snapshot = schedule.get_schedule(&ch).await.unwrap();
        let seen: Vec<(&str, &str)> = snapshot
            .slots
            .iter()
            .map(|e| (e.index.as_str(), e.slot.activity.as_str()))
            .collect();
        assert_eq!(seen, vec![("0", "a"), ("1", "c"), ("2", "d")]);

        // Appending after compaction continues from the new length.
        let next = schedule.append_slot(ADMIN, &ch, slot("e", "t")).await.unwrap();
        assert_eq!(next.index, "3");
    }

    #[tokio::test]
    async fn test_sequences_of_deletes_stay_contiguous() {
        let (store, schedule, ch) = setup().await;
        for i in 0..6 {
            schedule
                .append_slot(ADMIN, &ch, slot(&format!("s{i}"), "t"))
                .await
                .unwrap();
        }
        for target in ["5", "0", "2", "0"] {
            schedule.delete_slot(ADMIN, &ch, target).await.unwrap();
        }

        let snapshot = schedule.get_schedule(&ch).await.unwrap();
        let indices: Vec<&str> = snapshot.slots.iter().map(|e| e.index.as_str()).collect();
        assert_eq!(indices, vec!["0", "1"]);
        let activities: Vec<&str> = snapshot
            .slots
            .iter()
            .map(|e| e.slot.activity.as_str())
            .collect();
        assert_eq!(activities, vec!["s2", "s4"]);

        let stored = store.keys_with_prefix("schedule:foo:slot:").await;
        assert_eq!(stored.len(), 2 * SlotField::ALL.len());
    }

    #[tokio::test]
    async fn test_update_is_partial() {
        let (_store, schedule, ch) = setup().await;
        schedule
            .append_slot(ADMIN, &ch, slot("Stream", "12:00am - 1:00am"))
            .await
            .unwrap();

        let updated = schedule
            .update_slot(
                ADMIN,
                &ch,
                "0",
                SlotPatch {
                    activity: Some("Speedrun".into()),
                    time: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.slot.activity, "Speedrun");
        assert_eq!(updated.slot.time, "");
        assert_eq!(updated.slot.category, "Gaming");
    }

    #[tokio::test]
    async fn test_empty_patch_writes_nothing() {
        let (store, schedule, ch) = setup().await;
        schedule.append_slot(ADMIN, &ch, slot("Stream", "t")).await.unwrap();
        let rev_before = store.get(&keys::schedule_revision(&ch)).await.unwrap();

        let entry = schedule
            .update_slot(ADMIN, &ch, "0", SlotPatch::default())
            .await
            .unwrap();
        assert_eq!(entry.slot.activity, "Stream");
        assert_eq!(
            store.get(&keys::schedule_revision(&ch)).await.unwrap(),
            rev_before
        );
    }

    #[tokio::test]
    async fn test_missing_or_malformed_index_is_not_found() {
        let (_store, schedule, ch) = setup().await;
        schedule.append_slot(ADMIN, &ch, slot("a", "t")).await.unwrap();
        schedule.append_slot(ADMIN, &ch, slot("b", "t")).await.unwrap();

        for bad in ["2", "01", " 1", "-1", "one"] {
            assert!(matches!(
                schedule.delete_slot(ADMIN, &ch, bad).await,
                Err(CoreError::NotFound(_))
            ));
            assert!(matches!(
                schedule
                    .update_slot(ADMIN, &ch, bad, SlotPatch::default())
                    .await,
                Err(CoreError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_unauthorized_changes_nothing() {
        let (_store, schedule, ch) = setup().await;
        schedule.append_slot(ADMIN, &ch, slot("a", "t")).await.unwrap();
        let before = schedule.get_schedule(&ch).await.unwrap();

        for token in ["", "wrong"] {
            assert_eq!(
                schedule.append_slot(token, &ch, slot("x", "t")).await,
                Err(CoreError::Unauthorized)
            );
            assert_eq!(
                schedule
                    .update_slot(
                        token,
                        &ch,
                        "0",
                        SlotPatch {
                            activity: Some("x".into()),
                            ..Default::default()
                        }
                    )
                    .await,
                Err(CoreError::Unauthorized)
            );
            assert_eq!(
                schedule.delete_slot(token, &ch, "0").await,
                Err(CoreError::Unauthorized)
            );
            assert_eq!(
                schedule
                    .set_metadata(
                        token,
                        &ch,
                        MetadataPatch {
                            date: Some("x".into()),
                            ..Default::default()
                        }
                    )
                    .await,
                Err(CoreError::Unauthorized)
            );
            assert_eq!(
                schedule
                    .set_categories(token, &ch, Categories::new())
                    .await,
                Err(CoreError::Unauthorized)
            );
        }

        assert_eq!(schedule.get_schedule(&ch).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_other_channel_token_is_unauthorized() {
        let (store, schedule, _ch) = setup().await;
        store.set_add(keys::CHANNELS, "bar").await.unwrap();
        let bar = ChannelName::parse("bar").unwrap();
        assert_eq!(
            schedule.append_slot(FOO_TOKEN, &bar, slot("a", "t")).await,
            Err(CoreError::Unauthorized)
        );
    }

    #[tokio::test]
    async fn test_unregistered_channel_is_not_found() {
        let (_store, schedule, _ch) = setup().await;
        let ghost = ChannelName::parse("ghost").unwrap();
        assert!(matches!(
            schedule.append_slot(ADMIN, &ghost, slot("a", "t")).await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_append_validates_required_fields() {
        let (_store, schedule, ch) = setup().await;
        let err = schedule
            .append_slot(ADMIN, &ch, slot("", "t"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
        assert!(schedule.get_schedule(&ch).await.unwrap().slots.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_partial_and_categories_replace() {
        let (_store, schedule, ch) = setup().await;
        schedule
            .set_metadata(
                ADMIN,
                &ch,
                MetadataPatch {
                    date: Some("Subathon weekend".into()),
                    start_time: Some("18:00".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let meta = schedule
            .set_metadata(
                ADMIN,
                &ch,
                MetadataPatch {
                    end_time: Some("23:30".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(meta.date, "Subathon weekend");
        assert_eq!(meta.start_time, "18:00");
        assert_eq!(meta.end_time, "23:30");

        let tokens = || {
            [
                "bg-a".to_string(),
                "text-a".to_string(),
                "border-a".to_string(),
                "icon".to_string(),
            ]
        };
        let mut first = Categories::new();
        first.insert("Gaming".into(), tokens());
        first.insert("Art".into(), tokens());
        schedule.set_categories(ADMIN, &ch, first).await.unwrap();

        let mut second = Categories::new();
        second.insert("Music".into(), tokens());
        schedule.set_categories(ADMIN, &ch, second).await.unwrap();

        let snapshot = schedule.get_schedule(&ch).await.unwrap();
        assert_eq!(snapshot.categories.keys().collect::<Vec<_>>(), vec!["Music"]);
        assert_eq!(snapshot.metadata, meta);
    }
}
