use crate::errors::AutomationError;
use crate::store::StateStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One independently trackable unit of daily work within a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub code: String,
    pub display_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Subtask {
    pub fn new(code: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            display_name: display_name.into(),
            enabled: true,
        }
    }
}

/// Tracks which subtasks of one task are done today.
///
/// Completion is monotonic within a day: nothing here can unmark a
/// subtask, only the day rolling over resets it.
#[derive(Clone)]
pub struct SubtaskTracker {
    store: StateStore,
    task_code: String,
}

impl SubtaskTracker {
    pub fn new(store: StateStore, task_code: impl Into<String>) -> Self {
        Self {
            store,
            task_code: task_code.into(),
        }
    }

    pub fn task_code(&self) -> &str {
        &self.task_code
    }

    fn subtask_key(&self, subtask: &Subtask) -> String {
        format!("{}:subtask:{}", self.task_code, subtask.code)
    }

    fn task_key(&self) -> String {
        format!("{}:executed", self.task_code)
    }

    /// Whether `subtask` has been marked done today.
    ///
    /// With `require_all_if_group` the question is asked on behalf of a
    /// composite "everything finished" check, where a disabled subtask is
    /// not required and therefore counts as done.
    pub fn is_done(&self, subtask: &Subtask, require_all_if_group: bool) -> Result<bool, AutomationError> {
        if require_all_if_group && !subtask.enabled {
            return Ok(true);
        }
        let record = self.store.daily(&self.subtask_key(subtask))?;
        debug!(task = %self.task_code, subtask = %subtask.code, done = record.executed, "subtask state");
        Ok(record.executed)
    }

    /// Idempotent within a day.
    pub fn mark_done(&self, subtask: &Subtask) -> Result<(), AutomationError> {
        let record = self
            .store
            .update_daily(&self.subtask_key(subtask), |r| {
                r.executed = true;
                r.count += 1;
            })?;
        info!(
            task = %self.task_code,
            subtask = %subtask.code,
            times = record.count,
            "subtask '{}' done", subtask.display_name
        );
        Ok(())
    }

    /// True when every subtask in the group is done (disabled ones excepted).
    pub fn all_done(&self, subtasks: &[Subtask]) -> Result<bool, AutomationError> {
        for subtask in subtasks {
            if !self.is_done(subtask, true)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn is_task_done(&self) -> Result<bool, AutomationError> {
        Ok(self.store.daily(&self.task_key())?.executed)
    }

    pub fn mark_task_done(&self) -> Result<(), AutomationError> {
        self.store.update_daily(&self.task_key(), |r| {
            r.executed = true;
            r.count += 1;
        })?;
        info!(task = %self.task_code, "task done for today");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::FixedClock;
    use std::sync::Arc;

    fn tracker() -> (SubtaskTracker, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::noon(2026, 10, 19));
        let store = StateStore::in_memory(clock.clone());
        (SubtaskTracker::new(store, "DingDong"), clock)
    }

    #[test]
    fn test_mark_done_is_idempotent() {
        let (tracker, _) = tracker();
        let sign = Subtask::new("creditSign", "积分签到");
        assert!(!tracker.is_done(&sign, false).unwrap());
        tracker.mark_done(&sign).unwrap();
        tracker.mark_done(&sign).unwrap();
        assert!(tracker.is_done(&sign, false).unwrap());
    }

    #[test]
    fn test_completion_resets_next_day() {
        let (tracker, clock) = tracker();
        let sign = Subtask::new("creditSign", "积分签到");
        tracker.mark_done(&sign).unwrap();
        clock.advance_days(1);
        assert!(!tracker.is_done(&sign, false).unwrap());
    }

    #[test]
    fn test_group_check_requires_every_enabled_subtask() {
        let (tracker, _) = tracker();
        let sign = Subtask::new("creditSign", "积分签到");
        let fishpond = Subtask::new("fishpond", "鱼塘签到");
        let group = vec![sign.clone(), fishpond.clone()];

        tracker.mark_done(&sign).unwrap();
        assert!(!tracker.all_done(&group).unwrap());
        tracker.mark_done(&fishpond).unwrap();
        assert!(tracker.all_done(&group).unwrap());
    }

    #[test]
    fn test_disabled_subtask_does_not_block_group() {
        let (tracker, _) = tracker();
        let sign = Subtask::new("creditSign", "积分签到");
        let mut fishpond = Subtask::new("fishpond", "鱼塘签到");
        fishpond.enabled = false;

        tracker.mark_done(&sign).unwrap();
        assert!(!tracker.is_done(&fishpond, false).unwrap());
        assert!(tracker.all_done(&[sign, fishpond]).unwrap());
    }

    #[test]
    fn test_subtasks_are_scoped_per_task() {
        let clock = Arc::new(FixedClock::noon(2026, 10, 19));
        let store = StateStore::in_memory(clock);
        let a = SubtaskTracker::new(store.clone(), "Taobao");
        let b = SubtaskTracker::new(store, "DingDong");
        let shared = Subtask::new("sign", "签到");
        a.mark_done(&shared).unwrap();
        assert!(!b.is_done(&shared, false).unwrap());
    }
}
