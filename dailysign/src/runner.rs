//! The per-application pass: launch, clear popups, find the main entry,
//! run the subtasks that are not done yet, then put the app away.

use crate::config::{EngineConfig, TaskConfig};
use crate::countdown::CountdownRecognizer;
use crate::engine::{AutomationEngine, Clock, FailureRecorder, TaskScheduler};
use crate::errors::AutomationError;
use crate::locator::ElementLocator;
use crate::reschedule::{RescheduleManager, ScheduleState};
use crate::selector::Target;
use crate::store::StateStore;
use crate::subtask::{Subtask, SubtaskTracker};
use crate::types::{Bounds, DeviceSize, Match, Point};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

const LAUNCH_SETTLE: Duration = Duration::from_millis(1000);
const ENTRY_SETTLE: Duration = Duration::from_millis(3000);
const RESTART_SETTLE: Duration = Duration::from_millis(2000);
const BETWEEN_SUBTASKS: Duration = Duration::from_millis(1000);

/// Shown while a feed is still counting browse time
pub const DEFAULT_BROWSE_INDICATOR: &str = "滑动浏览";
const BROWSE_INDICATOR_WAIT: Duration = Duration::from_secs(5);

const SLIDER_TIPS: &str = ".*完成验证.*";
const SLIDER_HANDLE: &str = "滑块";

/// External collaborators shared by every pass
#[derive(Clone)]
pub struct Services {
    pub engine: Arc<dyn AutomationEngine>,
    pub scheduler: Arc<dyn TaskScheduler>,
    pub recorder: Arc<dyn FailureRecorder>,
    pub clock: Arc<dyn Clock>,
    pub store: StateStore,
}

/// Run-scoped counters and flags. A fresh value is created for every pass
/// so nothing leaks from one pass into the next.
#[derive(Debug, Default, Clone)]
pub struct RunState {
    pub restarts: u32,
    pub browse_iterations: u32,
    pub countdown_claims: u32,
    pub countdown_waits: u32,
    pub schedule: ScheduleState,
    /// Set when a bounded loop gave up; remaining loop-style steps are skipped
    pub finish_loop: bool,
    pub signed: bool,
    pub search_exhausted: bool,
}

/// Result of running one subtask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtaskOutcome {
    Completed,
    /// Not finished this time; will be attempted again next pass
    Pending,
    /// The app ended up somewhere unrecoverable and should be relaunched
    Restart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// Disabled, or already completed today
    Skipped,
    Completed,
    Incomplete,
    Aborted(String),
}

impl fmt::Display for PassOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassOutcome::Skipped => write!(f, "skipped"),
            PassOutcome::Completed => write!(f, "completed"),
            PassOutcome::Incomplete => write!(f, "incomplete"),
            PassOutcome::Aborted(reason) => write!(f, "aborted: {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassPhase {
    Launch,
    DismissPopups,
    LocateMainEntry,
    RunSubtasks,
    Minimize,
}

/// Everything a flow needs during one pass
pub struct PassContext {
    pub config: Arc<EngineConfig>,
    pub task_config: TaskConfig,
    pub engine: Arc<dyn AutomationEngine>,
    pub locator: ElementLocator,
    pub recognizer: CountdownRecognizer,
    pub recorder: Arc<dyn FailureRecorder>,
    pub store: StateStore,
    pub tracker: SubtaskTracker,
    pub reschedule: RescheduleManager,
    pub state: RunState,
}

impl PassContext {
    pub fn task_code(&self) -> &str {
        &self.task_config.task_code
    }

    pub fn device(&self) -> DeviceSize {
        self.config.device
    }

    /// Region from fractions of the device size
    pub fn region(&self, left: f64, top: f64, right: f64, bottom: f64) -> Bounds {
        Bounds::from_fractions(self.device(), left, top, right, bottom)
    }

    pub async fn locate(&self, target: &Target) -> Option<Match> {
        self.locator.locate(target).await
    }

    pub async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    pub async fn click(&self, target: &Match, label: &str) -> Result<(), AutomationError> {
        info!(x = target.center.x, y = target.center.y, "tap {}", label);
        self.engine.tap(target.center).await
    }

    /// Tap `found` when present; hands the match back so callers can chain.
    pub async fn click_if_found(
        &self,
        found: Option<Match>,
        label: &str,
    ) -> Result<Option<Match>, AutomationError> {
        match found {
            Some(m) => {
                self.click(&m, label).await?;
                Ok(Some(m))
            }
            None => {
                debug!("{} not found", label);
                Ok(None)
            }
        }
    }

    pub async fn find_and_click(&self, target: &Target, label: &str) -> Result<bool, AutomationError> {
        let found = self.locate(target).await;
        Ok(self.click_if_found(found, label).await?.is_some())
    }

    pub async fn back(&self) -> Result<(), AutomationError> {
        self.engine.back().await
    }

    /// Tap every prompt in `patterns` that is currently on screen.
    pub async fn dismiss_all(&self, patterns: &[&str], timeout: Duration) -> Result<(), AutomationError> {
        for pattern in patterns {
            let target = Target::text(*pattern).timeout(timeout);
            if self.find_and_click(&target, pattern).await? {
                self.pause(Duration::from_millis(500)).await;
            }
        }
        Ok(())
    }

    /// Keep tapping a close button while it keeps coming back, at most
    /// `limits.popup_close_limit` times. Returns the number of taps.
    pub async fn close_repeating(&self, target: &Target, label: &str) -> Result<u32, AutomationError> {
        let limit = self.config.limits.popup_close_limit;
        let again = target.clone().timeout(Duration::from_secs(1));
        let mut closed = 0;
        let mut found = self.locate(target).await;
        while let Some(button) = found {
            if closed >= limit {
                warn!("{} keeps reappearing after {} taps, moving on", label, closed);
                break;
            }
            self.click(&button, label).await?;
            closed += 1;
            self.pause(Duration::from_millis(500)).await;
            found = self.locate(&again).await;
        }
        Ok(closed)
    }

    /// Drag through the slider CAPTCHA if one is showing. Returns whether
    /// a gesture was performed.
    pub async fn solve_slider_if_present(&self) -> Result<bool, AutomationError> {
        let tips = Target::text(SLIDER_TIPS).timeout(Duration::from_secs(1));
        if self.locate(&tips).await.is_none() {
            return Ok(false);
        }
        info!("slider verification present");
        let Some(slider) = self.locate(&Target::text(SLIDER_HANDLE)).await else {
            error!("Slider verification shown but the slider itself was not found");
            return Ok(false);
        };
        let start = Point::new(slider.bounds.left + 10, slider.bounds.center_y());
        let end = Point::new(self.device().width - 10, slider.bounds.bottom - 10);
        self.engine
            .drag(start, end, Duration::from_millis(1000))
            .await?;
        info!("slider gesture done, waiting for verification");
        self.pause(Duration::from_secs(2)).await;
        Ok(true)
    }

    /// Scroll a content feed for at least the minimum dwell time, and keep
    /// going while `indicator` is still visible, up to the maximum.
    pub async fn browse(&self, indicator: Option<&str>) -> Result<(), AutomationError> {
        let timings = &self.config.timings;
        let height = self.device().height as f64;
        let start_y = (height * 0.85) as i32;
        let end_y = start_y - (height * 0.3) as i32;
        let indicator = Target::text(indicator.unwrap_or(DEFAULT_BROWSE_INDICATOR))
            .timeout(BROWSE_INDICATOR_WAIT);

        self.engine.swipe(start_y, end_y).await?;
        let started = Instant::now();
        loop {
            let elapsed = started.elapsed();
            let keep_going = if elapsed < timings.browse_min() {
                true
            } else if elapsed < timings.browse_max() {
                self.locator.exists(&indicator).await
            } else {
                false
            };
            if !keep_going {
                break;
            }
            self.pause(timings.browse_swipe_interval()).await;
            self.engine.swipe(start_y, end_y).await?;
        }
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "browsing finished");
        Ok(())
    }

    /// Capture the screen and hand it to the diagnostics sink. Never fails.
    pub async fn record_failure(&self, label: &str) {
        let screen = match self.engine.capture_screen().await {
            Ok(screen) => screen,
            Err(e) => {
                warn!("Could not capture failure screenshot: {}", e);
                None
            }
        };
        if let Err(e) = self
            .recorder
            .record_failure_screenshot(screen.as_ref(), self.task_code(), label)
        {
            warn!("Failed to record failure screenshot '{}': {}", label, e);
        }
    }
}

/// One application's check-in flow.
#[async_trait::async_trait]
pub trait SignTask: Send + Sync {
    fn task_code(&self) -> &str;

    fn package_name(&self) -> &str;

    /// All subtasks, enabled or not, in execution order
    fn subtasks(&self) -> &[Subtask];

    /// Clear permission prompts, splash ads and the like right after launch
    async fn dismiss_popups(&self, _ctx: &mut PassContext) -> Result<(), AutomationError> {
        Ok(())
    }

    /// Find the element that leads into the check-in area
    async fn locate_main_entry(&self, ctx: &mut PassContext) -> Option<Match>;

    async fn run_subtask(
        &self,
        subtask: &Subtask,
        ctx: &mut PassContext,
    ) -> Result<SubtaskOutcome, AutomationError>;

    /// Runs after the subtasks, before the app is minimized
    async fn finish(&self, _ctx: &mut PassContext) -> Result<(), AutomationError> {
        Ok(())
    }
}

/// Drives passes for any [`SignTask`].
pub struct AutomationLoop {
    config: Arc<EngineConfig>,
    services: Services,
    locator: ElementLocator,
    recognizer: CountdownRecognizer,
}

impl AutomationLoop {
    pub fn new(config: EngineConfig, services: Services) -> Self {
        let locator = ElementLocator::new(services.engine.clone(), config.ocr_enabled);
        let recognizer = CountdownRecognizer::new(
            services.engine.clone(),
            config.timings.ocr_retries,
            config.timings.ocr_retry_delay(),
        );
        Self {
            config: Arc::new(config),
            services,
            locator,
            recognizer,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A fresh context for one pass of `task_config`
    pub fn context(&self, task_config: TaskConfig) -> PassContext {
        let code = task_config.task_code.clone();
        let timings = &self.config.timings;
        PassContext {
            config: self.config.clone(),
            engine: self.services.engine.clone(),
            locator: self.locator.clone(),
            recognizer: self.recognizer.clone(),
            recorder: self.services.recorder.clone(),
            store: self.services.store.clone(),
            tracker: SubtaskTracker::new(self.services.store.clone(), code.clone()),
            reschedule: RescheduleManager::new(
                self.services.scheduler.clone(),
                self.services.clock.clone(),
                self.services.store.clone(),
                code,
            )
            .with_thresholds(timings.short_wait_threshold(), timings.fallback_delay()),
            state: RunState::default(),
            task_config,
        }
    }

    /// Run one pass. Never fails: environment-level failures are logged,
    /// a diagnostic screenshot is taken, and the pass reports `Aborted`.
    #[instrument(skip_all, fields(task = task.task_code()))]
    pub async fn run_pass(&self, task: &dyn SignTask) -> PassOutcome {
        let task_config = self
            .config
            .task(task.task_code())
            .cloned()
            .unwrap_or_else(|| TaskConfig::new(task.task_code()));
        if !task_config.enabled {
            info!("task disabled in configuration");
            return PassOutcome::Skipped;
        }

        let mut ctx = self.context(task_config);
        match ctx.tracker.is_task_done() {
            Ok(true) => {
                info!("already completed today");
                return PassOutcome::Skipped;
            }
            Ok(false) => {}
            Err(e) => warn!("Could not read task state, running anyway: {}", e),
        }

        let outcome = match self.drive(task, &mut ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Pass ended early: {}", e);
                ctx.record_failure("pass_aborted").await;
                self.minimize(task).await;
                let reason = match e {
                    AutomationError::EnvironmentFailure(reason) => reason,
                    other => other.to_string(),
                };
                PassOutcome::Aborted(reason)
            }
        };
        info!(restarts = ctx.state.restarts, %outcome, "pass finished");
        outcome
    }

    async fn drive(&self, task: &dyn SignTask, ctx: &mut PassContext) -> Result<PassOutcome, AutomationError> {
        let mut phase = PassPhase::Launch;
        loop {
            debug!(?phase, restarts = ctx.state.restarts, "entering phase");
            phase = match phase {
                PassPhase::Launch => {
                    self.services.engine.launch(task.package_name()).await?;
                    ctx.pause(LAUNCH_SETTLE).await;
                    PassPhase::DismissPopups
                }
                PassPhase::DismissPopups => {
                    task.dismiss_popups(ctx).await?;
                    PassPhase::LocateMainEntry
                }
                PassPhase::LocateMainEntry => match task.locate_main_entry(ctx).await {
                    Some(entry) => {
                        ctx.click(&entry, "main entry").await?;
                        ctx.pause(ENTRY_SETTLE).await;
                        PassPhase::RunSubtasks
                    }
                    None => {
                        warn!("main entry not found");
                        self.restart(ctx).await?
                    }
                },
                PassPhase::RunSubtasks => match self.run_subtasks(task, ctx).await? {
                    SubtaskOutcome::Restart => self.restart(ctx).await?,
                    _ => PassPhase::Minimize,
                },
                PassPhase::Minimize => {
                    task.finish(ctx).await?;
                    let outcome = match ctx.tracker.all_done(task.subtasks()) {
                        Ok(true) => {
                            ctx.tracker.mark_task_done()?;
                            info!("all subtasks done");
                            PassOutcome::Completed
                        }
                        Ok(false) => {
                            warn!("some subtasks are not done yet");
                            PassOutcome::Incomplete
                        }
                        Err(e) => {
                            warn!("Could not read subtask state: {}", e);
                            PassOutcome::Incomplete
                        }
                    };
                    self.minimize(task).await;
                    return Ok(outcome);
                }
            };
        }
    }

    /// Spend one unit of the restart budget, or fail the pass when it is gone.
    async fn restart(&self, ctx: &mut PassContext) -> Result<PassPhase, AutomationError> {
        let limit = self.config.limits.restart_limit;
        if ctx.state.restarts >= limit {
            return Err(AutomationError::EnvironmentFailure(format!(
                "app did not reach a known state after {limit} restarts"
            )));
        }
        ctx.state.restarts += 1;
        warn!("restarting app ({}/{})", ctx.state.restarts, limit);
        self.services.engine.kill_current_app().await?;
        ctx.pause(RESTART_SETTLE).await;
        Ok(PassPhase::Launch)
    }

    async fn run_subtasks(
        &self,
        task: &dyn SignTask,
        ctx: &mut PassContext,
    ) -> Result<SubtaskOutcome, AutomationError> {
        for subtask in task.subtasks().iter().filter(|s| s.enabled) {
            match ctx.tracker.is_done(subtask, false) {
                Ok(true) => {
                    debug!(subtask = %subtask.code, "already done today, skipping");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Could not read state of '{}', skipping: {}", subtask.code, e);
                    continue;
                }
            }

            info!(subtask = %subtask.code, "running '{}'", subtask.display_name);
            match task.run_subtask(subtask, ctx).await {
                Ok(SubtaskOutcome::Completed) => {
                    if let Err(e) = ctx.tracker.mark_done(subtask) {
                        warn!(subtask = %subtask.code, "could not persist completion: {}", e);
                    }
                }
                Ok(SubtaskOutcome::Pending) => {
                    info!(subtask = %subtask.code, "not finished this pass");
                }
                Ok(SubtaskOutcome::Restart) => {
                    warn!(subtask = %subtask.code, "requested an app restart");
                    return Ok(SubtaskOutcome::Restart);
                }
                Err(e @ AutomationError::EnvironmentFailure(_)) => return Err(e),
                Err(e) => warn!(subtask = %subtask.code, "subtask failed: {}", e),
            }
            ctx.pause(BETWEEN_SUBTASKS).await;
        }
        Ok(SubtaskOutcome::Completed)
    }

    async fn minimize(&self, task: &dyn SignTask) {
        if self.config.debugging {
            debug!("debugging enabled, leaving app in the foreground");
            return;
        }
        if let Err(e) = self.services.engine.minimize(task.package_name()).await {
            warn!("Failed to minimize {}: {}", task.package_name(), e);
        }
    }
}
