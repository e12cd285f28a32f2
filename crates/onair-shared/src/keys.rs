//! Key layout in the shared key-value store.
//!
//! Every key is namespaced `{domain}:{channel}:{...}` so the schedule, timer
//! and channel registry can share one physical store without collision.

use crate::types::{ChannelName, MetadataField, SlotField};

/// Global set of registered channel names.
pub const CHANNELS: &str = "channels";

/// Digest of the channel's bearer credential.
pub fn password(channel: &ChannelName) -> String {
    format!("auth:{channel}:password")
}

/// Ordered list of slot indices.
pub fn slot_list(channel: &ChannelName) -> String {
    format!("schedule:{channel}:slots")
}

pub fn slot_field(channel: &ChannelName, index: &str, field: SlotField) -> String {
    format!("schedule:{channel}:slot:{index}:{}", field.as_str())
}

pub fn meta_field(channel: &ChannelName, field: MetadataField) -> String {
    format!("schedule:{channel}:meta:{}", field.as_str())
}

pub fn categories(channel: &ChannelName) -> String {
    format!("schedule:{channel}:categories")
}

/// Counter bumped by every slot mutation batch.
pub fn schedule_revision(channel: &ChannelName) -> String {
    format!("schedule:{channel}:rev")
}

pub fn timer_state(channel: &ChannelName) -> String {
    format!("timer:{channel}:state")
}
