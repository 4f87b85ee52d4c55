//! Daily check-in automation for mobile applications
//!
//! Each supported application is a [`SignTask`]: a flow of subtasks driven
//! by the [`AutomationLoop`] through an [`AutomationEngine`] that talks to
//! the device. Elements are found by an [`ElementLocator`] that falls back
//! from the accessibility tree to image templates to OCR. Progress is kept
//! per day in a [`StateStore`], and countdown timers seen on screen become
//! one-shot wake-ups through the [`RescheduleManager`].

pub mod config;
pub mod countdown;
pub mod diagnostics;
pub mod engine;
pub mod errors;
pub mod locator;
pub mod reschedule;
pub mod runner;
pub mod selector;
pub mod store;
pub mod subtask;
pub mod tasks;
#[cfg(test)]
mod tests;
pub mod types;
pub mod utils;

pub use config::{EngineConfig, Limits, TaskConfig, Timings};
pub use countdown::{parse_countdown, CountdownRecognizer};
pub use diagnostics::FileFailureRecorder;
pub use engine::{AutomationEngine, Clock, FailureRecorder, SystemClock, TaskScheduler};
pub use errors::AutomationError;
pub use locator::{Alternative, ElementLocator};
pub use reschedule::{CountdownDecision, RescheduleManager, ScheduleState};
pub use runner::{AutomationLoop, PassContext, PassOutcome, RunState, Services, SignTask, SubtaskOutcome};
pub use selector::{Selector, Target, Template};
pub use store::{DailyRecord, JsonFileBackend, MemoryBackend, StateStore, StorageBackend};
pub use subtask::{Subtask, SubtaskTracker};
pub use types::{Bounds, DeviceSize, LocateStrategy, Match, OcrText, Point, Screenshot};
