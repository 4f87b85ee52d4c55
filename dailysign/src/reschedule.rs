//! Turning a recognized countdown into a future wake-up, and making sure a
//! pass that did useful work always leaves a way to resume.

use crate::engine::{Clock, TaskScheduler};
use crate::errors::AutomationError;
use crate::store::{DailyRecord, StateStore};
use crate::types::Bounds;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// After this many real countdown schedules in a day, today's countdown
/// obligations count as satisfied even without further evidence.
pub const MIN_COUNTDOWN_RUNS: u32 = 3;

/// What to do with a recognized countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownDecision {
    /// Short enough to sleep through inside this pass
    WaitInProcess(Duration),
    /// Register an external wake-up this many seconds from now
    ScheduleExternal(u64),
    /// The caller only wanted to look, not to wait
    Ignore,
}

/// Per-pass scheduling facts; reset at the start of every pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScheduleState {
    /// A wake-up was registered during this pass
    pub created: bool,
    /// The countdown widget was located structurally at least once
    pub countdown_widget_seen: bool,
    /// "Come back tomorrow" was seen, nothing left to schedule
    pub exhausted: bool,
}

#[derive(Clone)]
pub struct RescheduleManager {
    scheduler: Arc<dyn TaskScheduler>,
    clock: Arc<dyn Clock>,
    store: StateStore,
    task_code: String,
    short_wait_threshold: Duration,
    fallback_delay: Duration,
}

impl RescheduleManager {
    pub fn new(
        scheduler: Arc<dyn TaskScheduler>,
        clock: Arc<dyn Clock>,
        store: StateStore,
        task_code: impl Into<String>,
    ) -> Self {
        Self {
            scheduler,
            clock,
            store,
            task_code: task_code.into(),
            short_wait_threshold: Duration::from_secs(60),
            fallback_delay: Duration::from_secs(300),
        }
    }

    pub fn with_thresholds(mut self, short_wait_threshold: Duration, fallback_delay: Duration) -> Self {
        self.short_wait_threshold = short_wait_threshold;
        self.fallback_delay = fallback_delay;
        self
    }

    fn marker_key(&self) -> String {
        format!("{}:countdown", self.task_code)
    }

    fn region_key(&self) -> String {
        format!("{}:countdown_region", self.task_code)
    }

    /// Pure policy: sub-threshold countdowns are waited out in-process,
    /// longer ones go to the external scheduler.
    pub fn decide(&self, seconds: u64, wait_for_next: bool) -> CountdownDecision {
        if !wait_for_next {
            return CountdownDecision::Ignore;
        }
        let remaining = Duration::from_secs(seconds);
        if remaining < self.short_wait_threshold {
            CountdownDecision::WaitInProcess(remaining)
        } else {
            CountdownDecision::ScheduleExternal(seconds)
        }
    }

    /// Register a one-shot invocation `delta` from now. Returns the wake
    /// time in epoch milliseconds.
    #[instrument(skip(self, state), fields(task = %self.task_code))]
    pub fn schedule_in(&self, state: &mut ScheduleState, delta: Duration) -> Result<i64, AutomationError> {
        let at = self.clock.now().timestamp_millis() + delta.as_millis() as i64;
        self.scheduler
            .create_one_shot_schedule(&self.task_code, at)
            .map_err(|e| {
                AutomationError::PlatformError(format!("Failed to create schedule for {}: {e}", self.task_code))
            })?;
        state.created = true;
        info!(at, delay_secs = delta.as_secs(), "next run scheduled");
        Ok(at)
    }

    /// Apply the policy to a recognized countdown. External schedules also
    /// bump today's countdown marker as a real run.
    pub fn apply_countdown(
        &self,
        state: &mut ScheduleState,
        seconds: u64,
        wait_for_next: bool,
    ) -> Result<CountdownDecision, AutomationError> {
        let decision = self.decide(seconds, wait_for_next);
        if let CountdownDecision::ScheduleExternal(secs) = decision {
            self.schedule_in(state, Duration::from_secs(secs))?;
            self.record_countdown_run(true)?;
        }
        Ok(decision)
    }

    /// The fixed short-delay schedule used whenever the real wake time is unknown.
    pub fn schedule_fallback(&self, state: &mut ScheduleState, reason: &str) -> Result<i64, AutomationError> {
        warn!(task = %self.task_code, "{}, scheduling a retry in {}s", reason, self.fallback_delay.as_secs());
        self.schedule_in(state, self.fallback_delay)
    }

    /// End-of-pass guarantee: if the pass produced a completion signal but
    /// never registered a wake-up, create the fallback schedule. Returns
    /// whether a fallback was created. Calling it again in the same pass
    /// is a no-op.
    pub fn ensure_resumable(
        &self,
        state: &mut ScheduleState,
        completion_signal: bool,
    ) -> Result<bool, AutomationError> {
        if !completion_signal || state.created || state.exhausted {
            return Ok(false);
        }
        if !self.is_countdown_satisfied()? {
            self.schedule_fallback(state, "No countdown schedule was created today")?;
            return Ok(true);
        }
        if state.countdown_widget_seen {
            self.schedule_fallback(state, "Countdown widget present but its time could not be read")?;
            return Ok(true);
        }
        debug!(task = %self.task_code, "countdown obligations satisfied for today");
        Ok(false)
    }

    pub fn countdown_marker(&self) -> Result<DailyRecord, AutomationError> {
        self.store.daily(&self.marker_key())
    }

    /// `real` marks that an actual future wake-up was registered today.
    pub fn record_countdown_run(&self, real: bool) -> Result<DailyRecord, AutomationError> {
        self.store.update_daily(&self.marker_key(), |r| {
            r.count += 1;
            if real {
                r.executed = true;
            }
        })
    }

    pub fn is_countdown_satisfied(&self) -> Result<bool, AutomationError> {
        let marker = self.countdown_marker()?;
        debug!(task = %self.task_code, count = marker.count, "countdown runs today");
        Ok(marker.count >= MIN_COUNTDOWN_RUNS)
    }

    /// Last place the countdown widget was seen. Never expires.
    pub fn cached_region(&self) -> Result<Option<Bounds>, AutomationError> {
        self.store.persistent(&self.region_key())
    }

    pub fn cache_region(&self, region: Bounds) -> Result<(), AutomationError> {
        debug!(task = %self.task_code, %region, "caching countdown region");
        self.store.set_persistent(&self.region_key(), &region)
    }
}
