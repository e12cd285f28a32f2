//! Channel registry: creation, cascade deletion and credentials.
//!
//! A channel's schedule keys exist iff its name is in the global `channels`
//! set, so creation and deletion each touch the set and the keys in one
//! atomic batch.

use std::sync::Arc;

use tracing::info;

use onair_shared::{keys, ChannelName, CoreError, CoreResult, MetadataField, SlotField};

use crate::auth::{authorize, authorize_admin, credential_digest, Authorizer};
use crate::kv::{KeyValueStore, WriteOp};

#[derive(Clone)]
pub struct ChannelRegistry {
    kv: Arc<dyn KeyValueStore>,
    authorizer: Arc<dyn Authorizer>,
}

impl ChannelRegistry {
    pub fn new(kv: Arc<dyn KeyValueStore>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self { kv, authorizer }
    }

    /// All registered channels, sorted by name.
    pub async fn list_channels(&self) -> CoreResult<Vec<ChannelName>> {
        let mut names: Vec<ChannelName> = self
            .kv
            .set_members(keys::CHANNELS)
            .await?
            .iter()
            .filter_map(|raw| ChannelName::parse(raw).ok())
            .collect();
        names.sort();
        Ok(names)
    }

    pub async fn exists(&self, channel: &ChannelName) -> CoreResult<bool> {
        Ok(self
            .kv
            .set_is_member(keys::CHANNELS, channel.as_str())
            .await?)
    }

    /// Register `raw_name` with empty schedule metadata. Admin only.
    pub async fn create_channel(
        &self,
        token: &str,
        raw_name: &str,
        credential: Option<&str>,
    ) -> CoreResult<ChannelName> {
        authorize_admin(self.authorizer.as_ref(), token).await?;
        let channel = ChannelName::parse(raw_name)?;
        if self.exists(&channel).await? {
            return Err(CoreError::invalid_state(format!(
                "channel {channel} already exists"
            )));
        }

        let mut ops: Vec<WriteOp> = MetadataField::ALL
            .iter()
            .map(|field| WriteOp::Set(keys::meta_field(&channel, *field), String::new()))
            .collect();
        ops.push(WriteOp::Set(keys::categories(&channel), "{}".to_string()));
        if let Some(credential) = credential {
            if credential.is_empty() {
                return Err(CoreError::invalid("credential must not be empty"));
            }
            ops.push(WriteOp::Set(
                keys::password(&channel),
                credential_digest(credential),
            ));
        }
        ops.push(WriteOp::SetAdd(
            keys::CHANNELS.to_string(),
            channel.to_string(),
        ));
        self.kv.apply(ops).await?;

        info!(channel = %channel, with_credential = credential.is_some(), "Channel created");
        Ok(channel)
    }

    /// Remove the channel and everything stored under it. Admin only.
    pub async fn delete_channel(&self, token: &str, raw_name: &str) -> CoreResult<()> {
        authorize_admin(self.authorizer.as_ref(), token).await?;
        let channel = ChannelName::parse(raw_name)?;
        if !self.exists(&channel).await? {
            return Err(CoreError::not_found(format!("channel {channel}")));
        }

        let indices = self.kv.list_range(&keys::slot_list(&channel)).await?;

        let mut ops = Vec::with_capacity(indices.len() * SlotField::ALL.len() + 12);
        for index in &indices {
            ops.extend(
                SlotField::ALL
                    .iter()
                    .map(|field| WriteOp::Delete(keys::slot_field(&channel, index, *field))),
            );
        }
        ops.push(WriteOp::Delete(keys::slot_list(&channel)));
        ops.extend(
            MetadataField::ALL
                .iter()
                .map(|field| WriteOp::Delete(keys::meta_field(&channel, *field))),
        );
        ops.push(WriteOp::Delete(keys::categories(&channel)));
        ops.push(WriteOp::Delete(keys::schedule_revision(&channel)));
        ops.push(WriteOp::Delete(keys::password(&channel)));
        ops.push(WriteOp::Delete(keys::timer_state(&channel)));
        ops.push(WriteOp::SetRemove(
            keys::CHANNELS.to_string(),
            channel.to_string(),
        ));
        self.kv.apply(ops).await?;

        info!(channel = %channel, slots = indices.len(), "Channel deleted");
        Ok(())
    }

    /// Replace the channel's credential. Admin or the channel itself.
    pub async fn set_credential(
        &self,
        token: &str,
        channel: &ChannelName,
        credential: &str,
    ) -> CoreResult<()> {
        authorize(self.authorizer.as_ref(), token, channel).await?;
        if credential.is_empty() {
            return Err(CoreError::invalid("credential must not be empty"));
        }
        if !self.exists(channel).await? {
            return Err(CoreError::not_found(format!("channel {channel}")));
        }

        self.kv
            .set(&keys::password(channel), &credential_digest(credential))
            .await?;

        info!(channel = %channel, "Channel credential replaced");
        Ok(())
    }
}
