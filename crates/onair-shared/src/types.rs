use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_CHANNEL_NAME_LEN;
use crate::error::{CoreError, CoreResult};

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Normalised channel identifier: trimmed, lowercase, `[a-z0-9_]{1,25}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let name = raw.trim().to_lowercase();
        if name.is_empty() {
            return Err(CoreError::invalid("channel name must not be empty"));
        }
        if name.len() > MAX_CHANNEL_NAME_LEN {
            return Err(CoreError::invalid(format!(
                "channel name longer than {MAX_CHANNEL_NAME_LEN} characters"
            )));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(CoreError::invalid(format!(
                "channel name '{name}' may only contain letters, digits and '_'"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChannelName {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChannelName {
    type Error = CoreError;

    fn try_from(value: String) -> CoreResult<Self> {
        Self::parse(&value)
    }
}

impl From<ChannelName> for String {
    fn from(name: ChannelName) -> Self {
        name.0
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// Attribute stored once per slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotField {
    Hour,
    Time,
    Category,
    Activity,
    Description,
}

impl SlotField {
    pub const ALL: [SlotField; 5] = [
        SlotField::Hour,
        SlotField::Time,
        SlotField::Category,
        SlotField::Activity,
        SlotField::Description,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SlotField::Hour => "hour",
            SlotField::Time => "time",
            SlotField::Category => "category",
            SlotField::Activity => "activity",
            SlotField::Description => "description",
        }
    }
}

/// JSON form of a slot hour: an integer on the wire, a decimal string in
/// storage. Input accepts either; output is a number whenever the stored
/// value parses as one.
mod hour_wire {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HourRepr {
        Int(i64),
        Text(String),
    }

    impl From<HourRepr> for String {
        fn from(repr: HourRepr) -> Self {
            match repr {
                HourRepr::Int(n) => n.to_string(),
                HourRepr::Text(s) => s,
            }
        }
    }

    pub fn serialize<S: Serializer>(hour: &str, serializer: S) -> Result<S::Ok, S::Error> {
        match hour.parse::<u32>() {
            Ok(n) if hour.bytes().all(|b| b.is_ascii_digit()) => serializer.serialize_u32(n),
            _ => serializer.serialize_str(hour),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        HourRepr::deserialize(deserializer).map(String::from)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            hour: &Option<String>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match hour {
                Some(hour) => super::serialize(hour, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<String>, D::Error> {
            Ok(Option::<HourRepr>::deserialize(deserializer)?.map(String::from))
        }
    }
}

/// One hour of programming. Absent attributes read back as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    /// Hour offset from the schedule start, not a wall-clock hour.
    #[serde(with = "hour_wire")]
    pub hour: String,
    /// Free-text display time, independent of `hour`.
    pub time: String,
    pub category: String,
    pub activity: String,
    pub description: String,
}

impl Slot {
    pub fn field(&self, field: SlotField) -> &str {
        match field {
            SlotField::Hour => &self.hour,
            SlotField::Time => &self.time,
            SlotField::Category => &self.category,
            SlotField::Activity => &self.activity,
            SlotField::Description => &self.description,
        }
    }

    pub fn set_field(&mut self, field: SlotField, value: String) {
        match field {
            SlotField::Hour => self.hour = value,
            SlotField::Time => self.time = value,
            SlotField::Category => self.category = value,
            SlotField::Activity => self.activity = value,
            SlotField::Description => self.description = value,
        }
    }
}

/// A slot together with its current position in the channel's sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotEntry {
    pub index: String,
    #[serde(flatten)]
    pub slot: Slot,
}

/// Input for appending a slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSlot {
    #[serde(with = "hour_wire")]
    pub hour: String,
    pub time: String,
    pub category: String,
    pub activity: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewSlot {
    /// Check required fields and turn the input into a storable slot.
    pub fn validate(self) -> CoreResult<Slot> {
        validate_hour(&self.hour)?;
        for (name, value) in [
            ("time", &self.time),
            ("category", &self.category),
            ("activity", &self.activity),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::invalid(format!("{name} is required")));
            }
        }
        Ok(Slot {
            hour: self.hour.trim().to_string(),
            time: self.time,
            category: self.category,
            activity: self.activity,
            description: self.description.unwrap_or_default(),
        })
    }
}

/// Partial slot update. `None` leaves the field untouched; `Some("")` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotPatch {
    #[serde(default, with = "hour_wire::option")]
    pub hour: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub activity: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl SlotPatch {
    pub fn validate(&self) -> CoreResult<()> {
        if let Some(hour) = &self.hour {
            validate_hour(hour)?;
        }
        Ok(())
    }

    /// Fields present in the patch, in storage order.
    pub fn present(&self) -> Vec<(SlotField, &str)> {
        [
            (SlotField::Hour, self.hour.as_deref().map(str::trim)),
            (SlotField::Time, self.time.as_deref()),
            (SlotField::Category, self.category.as_deref()),
            (SlotField::Activity, self.activity.as_deref()),
            (SlotField::Description, self.description.as_deref()),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.map(|v| (field, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.present().is_empty()
    }
}

fn validate_hour(hour: &str) -> CoreResult<()> {
    let hour = hour.trim();
    if hour.is_empty() {
        return Err(CoreError::invalid("hour is required"));
    }
    if !hour.bytes().all(|b| b.is_ascii_digit()) || hour.parse::<u32>().is_err() {
        return Err(CoreError::invalid(format!(
            "hour '{hour}' is not a non-negative integer"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Schedule metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    Date,
    StartDate,
    EndDate,
    StartTime,
    EndTime,
}

impl MetadataField {
    pub const ALL: [MetadataField; 5] = [
        MetadataField::Date,
        MetadataField::StartDate,
        MetadataField::EndDate,
        MetadataField::StartTime,
        MetadataField::EndTime,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetadataField::Date => "date",
            MetadataField::StartDate => "startDate",
            MetadataField::EndDate => "endDate",
            MetadataField::StartTime => "startTime",
            MetadataField::EndTime => "endTime",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleMetadata {
    /// Display string.
    pub date: String,
    pub start_date: String,
    pub end_date: String,
    /// `HH:MM`, 24-hour.
    pub start_time: String,
    pub end_time: String,
}

impl ScheduleMetadata {
    pub fn set_field(&mut self, field: MetadataField, value: String) {
        match field {
            MetadataField::Date => self.date = value,
            MetadataField::StartDate => self.start_date = value,
            MetadataField::EndDate => self.end_date = value,
            MetadataField::StartTime => self.start_time = value,
            MetadataField::EndTime => self.end_time = value,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPatch {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

impl MetadataPatch {
    /// Dates must be `YYYY-MM-DD` and times `HH:MM` unless cleared.
    pub fn validate(&self) -> CoreResult<()> {
        for (name, value) in [("startDate", &self.start_date), ("endDate", &self.end_date)] {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                NaiveDate::parse_from_str(v, "%Y-%m-%d").map_err(|_| {
                    CoreError::invalid(format!("{name} '{v}' is not a YYYY-MM-DD date"))
                })?;
            }
        }
        for (name, value) in [("startTime", &self.start_time), ("endTime", &self.end_time)] {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                if v.len() != 5 || NaiveTime::parse_from_str(v, "%H:%M").is_err() {
                    return Err(CoreError::invalid(format!(
                        "{name} '{v}' is not a 24-hour HH:MM time"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn present(&self) -> Vec<(MetadataField, &str)> {
        [
            (MetadataField::Date, self.date.as_deref()),
            (MetadataField::StartDate, self.start_date.as_deref()),
            (MetadataField::EndDate, self.end_date.as_deref()),
            (MetadataField::StartTime, self.start_time.as_deref()),
            (MetadataField::EndTime, self.end_time.as_deref()),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.map(|v| (field, v)))
        .collect()
    }
}

/// Category name to its four display-style tokens.
pub type Categories = BTreeMap<String, [String; 4]>;

/// Everything a public viewer needs to render one channel's schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSnapshot {
    pub channel: String,
    pub metadata: ScheduleMetadata,
    pub slots: Vec<SlotEntry>,
    pub categories: Categories,
}

// ---------------------------------------------------------------------------
// Timer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    Stopped,
    Running,
    Paused,
}

/// Persisted countdown state.
///
/// At most one of `start_time_ms` / `paused_at_ms` is ever set; the
/// constructors are the only way to build a value, and decoding goes through
/// the same normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "TimerRecord", into = "TimerRecord")]
pub struct TimerState {
    duration_ms: i64,
    start_time_ms: Option<i64>,
    paused_at_ms: Option<i64>,
}

impl TimerState {
    pub fn stopped(duration_ms: i64) -> Self {
        Self {
            duration_ms: duration_ms.max(0),
            start_time_ms: None,
            paused_at_ms: None,
        }
    }

    pub fn running(duration_ms: i64, start_time_ms: i64) -> Self {
        Self {
            duration_ms: duration_ms.max(0),
            start_time_ms: Some(start_time_ms),
            paused_at_ms: None,
        }
    }

    pub fn paused(duration_ms: i64, remaining_ms: i64) -> Self {
        Self {
            duration_ms: duration_ms.max(0),
            start_time_ms: None,
            paused_at_ms: Some(remaining_ms.max(0)),
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    pub fn start_time_ms(&self) -> Option<i64> {
        self.start_time_ms
    }

    pub fn paused_at_ms(&self) -> Option<i64> {
        self.paused_at_ms
    }

    pub fn is_running(&self) -> bool {
        self.start_time_ms.is_some()
    }

    pub fn status(&self) -> TimerStatus {
        match (self.start_time_ms, self.paused_at_ms) {
            (Some(_), _) => TimerStatus::Running,
            (None, Some(_)) => TimerStatus::Paused,
            (None, None) => TimerStatus::Stopped,
        }
    }

    /// Live remaining time, clamped at zero.
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        match (self.start_time_ms, self.paused_at_ms) {
            (Some(start), _) => {
                let elapsed = now_ms.saturating_sub(start);
                self.duration_ms.saturating_sub(elapsed).max(0)
            }
            (None, Some(paused)) => paused,
            (None, None) => self.duration_ms,
        }
    }

    pub fn snapshot(&self, now_ms: i64) -> TimerSnapshot {
        let remaining_ms = self.remaining_ms(now_ms);
        let is_expired = remaining_ms <= 0;
        TimerSnapshot {
            remaining_ms,
            is_running: self.is_running() && !is_expired,
            is_expired,
        }
    }
}

/// Wire form of [`TimerState`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimerRecord {
    #[serde(default)]
    duration_ms: i64,
    #[serde(default)]
    start_time_ms: Option<i64>,
    #[serde(default)]
    paused_at_ms: Option<i64>,
    #[serde(default)]
    is_running: bool,
}

impl From<TimerRecord> for TimerState {
    fn from(record: TimerRecord) -> Self {
        match (record.is_running, record.start_time_ms, record.paused_at_ms) {
            (true, Some(start), _) => TimerState::running(record.duration_ms, start),
            (_, _, Some(paused)) => TimerState::paused(record.duration_ms, paused),
            // A start anchor without the running flag is treated as stopped.
            _ => TimerState::stopped(record.duration_ms),
        }
    }
}

impl From<TimerState> for TimerRecord {
    fn from(state: TimerState) -> Self {
        TimerRecord {
            duration_ms: state.duration_ms,
            start_time_ms: state.start_time_ms,
            paused_at_ms: state.paused_at_ms,
            is_running: state.is_running(),
        }
    }
}

/// Read-only view served to overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub remaining_ms: i64,
    pub is_running: bool,
    pub is_expired: bool,
}

impl TimerSnapshot {
    /// View of a channel whose timer was never configured.
    pub fn unset() -> Self {
        Self {
            remaining_ms: 0,
            is_running: false,
            is_expired: true,
        }
    }
}
