//! Contracts for the collaborators the engine drives but does not own:
//! the device accessibility layer, the wake-up scheduler, the diagnostics
//! sink and the wall clock.

use crate::errors::AutomationError;
use crate::selector::{Selector, Template};
use crate::types::{Bounds, Match, OcrText, Point, Screenshot};
use chrono::{DateTime, Local};
use std::time::Duration;

/// The device side of automation: app lifecycle, screen queries and input.
///
/// Query methods return empty results for "not on screen". `Err` is
/// reserved for the provider itself misbehaving.
#[async_trait::async_trait]
pub trait AutomationEngine: Send + Sync {
    /// Launch (or foreground) an application by package id
    async fn launch(&self, package: &str) -> Result<(), AutomationError>;

    /// Force-stop whatever application is in the foreground
    async fn kill_current_app(&self) -> Result<(), AutomationError>;

    /// Send the application to the background
    async fn minimize(&self, package: &str) -> Result<(), AutomationError>;

    /// Capture the current screen. `None` when capture permission is missing.
    async fn capture_screen(&self) -> Result<Option<Screenshot>, AutomationError>;

    /// Query the accessibility tree, waiting up to `timeout` for at least
    /// one widget. Candidates are returned in tree order.
    async fn query_widgets(
        &self,
        selector: &Selector,
        timeout: Duration,
        region: Option<Bounds>,
    ) -> Result<Vec<Match>, AutomationError>;

    /// Template matching against a screenshot
    async fn match_template(
        &self,
        template: &Template,
        screen: &Screenshot,
        region: Option<Bounds>,
    ) -> Result<Option<Match>, AutomationError>;

    /// Run OCR on a screenshot, restricted to `region` when given.
    /// `pattern` is a hint for engines that can filter on their side.
    async fn recognize_text(
        &self,
        screen: &Screenshot,
        region: Option<Bounds>,
        pattern: &str,
    ) -> Result<Vec<OcrText>, AutomationError>;

    async fn tap(&self, point: Point) -> Result<(), AutomationError>;

    /// Press-and-drag along a straight line
    async fn drag(&self, start: Point, end: Point, duration: Duration)
        -> Result<(), AutomationError>;

    /// Vertical swipe at the horizontal centre of the screen
    async fn swipe(&self, start_y: i32, end_y: i32) -> Result<(), AutomationError>;

    async fn back(&self) -> Result<(), AutomationError>;
}

/// Registers one-shot future invocations of a task
pub trait TaskScheduler: Send + Sync {
    fn create_one_shot_schedule(
        &self,
        task_code: &str,
        epoch_millis: i64,
    ) -> Result<(), AutomationError>;
}

/// Sink for screenshots taken when something went wrong
pub trait FailureRecorder: Send + Sync {
    fn record_failure_screenshot(
        &self,
        screen: Option<&Screenshot>,
        task_code: &str,
        label: &str,
    ) -> Result<(), AutomationError>;
}

/// Wall clock, injectable so day boundaries and wake times can be tested
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}
