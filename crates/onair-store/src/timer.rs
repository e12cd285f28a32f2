//! Stream countdown timer state machine.
//!
//! Nothing ticks in-process: the state is a duration plus either a start
//! anchor (running) or a frozen remainder (paused), and every read derives
//! the live remaining time from the wall clock.
//!
//! `stop` keeps the configured duration, so a later `start` runs the full
//! duration again, while `pause`/`resume` carry the remainder over.
//! Concurrent writers are last-write-wins on the whole record.

use std::sync::Arc;

use tracing::{debug, info, warn};

use onair_shared::constants::MS_PER_MINUTE;
use onair_shared::{
    keys, ChannelName, Clock, CoreError, CoreResult, TimerSnapshot, TimerState, TimerStatus,
};

use crate::auth::{authorize, Authorizer};
use crate::kv::KeyValueStore;

#[derive(Clone)]
pub struct TimerEngine {
    kv: Arc<dyn KeyValueStore>,
    authorizer: Arc<dyn Authorizer>,
    clock: Arc<dyn Clock>,
}

impl TimerEngine {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        authorizer: Arc<dyn Authorizer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kv,
            authorizer,
            clock,
        }
    }

    /// Stored state, or `None` when the timer was never configured.
    pub async fn state(&self, channel: &ChannelName) -> CoreResult<Option<TimerState>> {
        let Some(raw) = self.kv.get(&keys::timer_state(channel)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<TimerState>(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(channel = %channel, error = %e, "Malformed timer record, treating as unset");
                Ok(None)
            }
        }
    }

    /// Live view for overlays. No authorization.
    pub async fn snapshot(&self, channel: &ChannelName) -> CoreResult<TimerSnapshot> {
        let snapshot = match self.state(channel).await? {
            Some(state) => state.snapshot(self.clock.now_ms()),
            None => TimerSnapshot::unset(),
        };
        debug!(
            channel = %channel,
            remaining_ms = snapshot.remaining_ms,
            running = snapshot.is_running,
            "Timer snapshot"
        );
        Ok(snapshot)
    }

    /// Configure `hours:minutes` and either start right away or wait stopped.
    pub async fn set_duration(
        &self,
        token: &str,
        channel: &ChannelName,
        hours: i64,
        minutes: i64,
        start_immediately: bool,
    ) -> CoreResult<TimerState> {
        authorize(self.authorizer.as_ref(), token, channel).await?;
        let duration_ms = duration_from_parts(hours, minutes)?;

        let state = if start_immediately {
            TimerState::running(duration_ms, self.clock.now_ms())
        } else {
            TimerState::stopped(duration_ms)
        };
        self.save(channel, &state).await?;

        info!(channel = %channel, duration_ms, start_immediately, "Timer duration set");
        Ok(state)
    }

    /// Run from the current remainder: the frozen value when paused, the live
    /// value when already running, the configured duration otherwise.
    pub async fn start(&self, token: &str, channel: &ChannelName) -> CoreResult<TimerState> {
        authorize(self.authorizer.as_ref(), token, channel).await?;
        let now = self.clock.now_ms();
        let current = self.load_or_unset(channel).await?;

        let remaining = current.remaining_ms(now);
        let state = TimerState::running(remaining, now);
        self.save(channel, &state).await?;

        info!(channel = %channel, remaining_ms = remaining, from = ?current.status(), "Timer started");
        Ok(state)
    }

    /// Clear the anchor and any pause, keeping the configured duration.
    pub async fn stop(&self, token: &str, channel: &ChannelName) -> CoreResult<TimerState> {
        authorize(self.authorizer.as_ref(), token, channel).await?;
        let current = self.load_or_unset(channel).await?;

        let state = TimerState::stopped(current.duration_ms());
        self.save(channel, &state).await?;

        info!(channel = %channel, duration_ms = state.duration_ms(), "Timer stopped");
        Ok(state)
    }

    pub async fn pause(&self, token: &str, channel: &ChannelName) -> CoreResult<TimerState> {
        authorize(self.authorizer.as_ref(), token, channel).await?;
        let now = self.clock.now_ms();
        let current = self.load_or_unset(channel).await?;
        if current.status() != TimerStatus::Running {
            return Err(CoreError::invalid_state("timer is not running"));
        }

        let remaining = current.remaining_ms(now);
        let state = TimerState::paused(current.duration_ms(), remaining);
        self.save(channel, &state).await?;

        info!(channel = %channel, remaining_ms = remaining, "Timer paused");
        Ok(state)
    }

    pub async fn resume(&self, token: &str, channel: &ChannelName) -> CoreResult<TimerState> {
        authorize(self.authorizer.as_ref(), token, channel).await?;
        let now = self.clock.now_ms();
        let current = self.load_or_unset(channel).await?;
        if current.is_running() {
            return Err(CoreError::invalid_state("timer is already running"));
        }
        let Some(paused) = current.paused_at_ms() else {
            return Err(CoreError::invalid_state("timer is not paused"));
        };

        let state = TimerState::running(paused, now);
        self.save(channel, &state).await?;

        info!(channel = %channel, remaining_ms = paused, "Timer resumed");
        Ok(state)
    }

    /// Shift the remaining time by `delta_minutes`, never below zero.
    pub async fn adjust(
        &self,
        token: &str,
        channel: &ChannelName,
        delta_minutes: i64,
    ) -> CoreResult<TimerState> {
        authorize(self.authorizer.as_ref(), token, channel).await?;
        let now = self.clock.now_ms();
        let current = self.load_or_unset(channel).await?;

        let remaining = current
            .remaining_ms(now)
            .saturating_add(delta_minutes.saturating_mul(MS_PER_MINUTE))
            .max(0);
        // Re-anchoring at `now` with duration = remaining keeps the live
        // formula consistent with the new value.
        let state = match current.status() {
            TimerStatus::Running => TimerState::running(remaining, now),
            TimerStatus::Paused => TimerState::paused(remaining, remaining),
            TimerStatus::Stopped => TimerState::stopped(remaining),
        };
        self.save(channel, &state).await?;

        info!(channel = %channel, delta_minutes, remaining_ms = remaining, "Timer adjusted");
        Ok(state)
    }

    async fn load_or_unset(&self, channel: &ChannelName) -> CoreResult<TimerState> {
        Ok(self
            .state(channel)
            .await?
            .unwrap_or_else(|| TimerState::stopped(0)))
    }

    async fn save(&self, channel: &ChannelName, state: &TimerState) -> CoreResult<()> {
        let encoded = serde_json::to_string(state)
            .map_err(|e| CoreError::Unavailable(format!("timer encode failed: {e}")))?;
        self.kv.set(&keys::timer_state(channel), &encoded).await?;
        Ok(())
    }
}

fn duration_from_parts(hours: i64, minutes: i64) -> CoreResult<i64> {
    if hours < 0 || minutes < 0 {
        return Err(CoreError::invalid("hours and minutes must not be negative"));
    }
    let total = hours
        .checked_mul(60)
        .and_then(|m| m.checked_add(minutes))
        .and_then(|m| m.checked_mul(MS_PER_MINUTE))
        .ok_or_else(|| CoreError::invalid("duration is too large"))?;
    if total <= 0 {
        return Err(CoreError::invalid("duration must be positive"));
    }
    Ok(total)
}
