//! Taobao: daily red-packet sign-in, ad browsing for coins, and the
//! timed coin collection that drives rescheduling.

use crate::config::TaskConfig;
use crate::errors::AutomationError;
use crate::locator::Alternative;
use crate::reschedule::CountdownDecision;
use crate::runner::{PassContext, SignTask, SubtaskOutcome};
use crate::selector::Target;
use crate::subtask::Subtask;
use crate::types::Match;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

pub const TASK_CODE: &str = "Taobao";
pub const PACKAGE_NAME: &str = "com.taobao.taobao";

pub const DAILY_SIGN: &str = "dailySign";
pub const BROWSE_ADS: &str = "browseAds";
pub const COLLECT_COINS: &str = "collectCoins";

const MAIN_ENTRY: &str = "红包签到";
const MY_TAOBAO: &str = "我的淘宝";
const SIGN_FOR_CASH: &str = "签到领现金";
const SIGN_NOW: &str = ".*立即签到.*";
const SIGN_CONFIRMED: &str = ".*继续领(现金|钱).*";
const MORE_COINS: &str = r"\+\d{4,}";
const GO_BROWSE: &str = "去逛逛";
const GO_SEARCH: &str = "去搜索";
const ALL_FINISHED: &str = "已完成";
const USE_NOW: &str = "去使用";
const CLAIM_COINS: &str = r"立即领\d+元宝";
const CLAIM_COUNTDOWN: &str = "点击.*取";
const COUNTDOWN_WIDGET: &str = "倒计时";
const SEARCH_CONTAINER: &str = "com.taobao.taobao:id/dynamic_container";
const SEARCH_CANDIDATE: &str = "android.view.View";
const SEARCH_BROWSE_INDICATOR: &str = "浏览本页面.*";

const DIALOG_WAIT: Duration = Duration::from_secs(3);

/// How a countdown check ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownCheck {
    /// An external wake-up was registered
    Scheduled,
    /// A countdown was read but the caller did not want to wait on it
    Observed,
    /// "Come back tomorrow": nothing more to collect today
    Exhausted,
    Unreadable,
    /// The claim button kept coming back; a fallback retry was scheduled
    GaveUp,
}

pub struct Taobao {
    subtasks: Vec<Subtask>,
}

impl Taobao {
    pub fn new(task_config: &TaskConfig) -> Self {
        Self {
            subtasks: task_config.subtasks_or(Self::default_subtasks()),
        }
    }

    pub fn default_subtasks() -> Vec<Subtask> {
        vec![
            Subtask::new(DAILY_SIGN, "签到"),
            Subtask::new(BROWSE_ADS, "逛一逛"),
            Subtask::new(COLLECT_COINS, "领元宝"),
        ]
    }

    fn signed_key(ctx: &PassContext) -> String {
        format!("{}:signed", ctx.task_code())
    }

    fn sign_failures_key(ctx: &PassContext) -> String {
        format!("{}:sign_failures", ctx.task_code())
    }

    fn hang_key(ctx: &PassContext) -> String {
        format!("{}:hang", ctx.task_code())
    }

    #[instrument(skip_all)]
    async fn daily_sign(&self, ctx: &mut PassContext) -> Result<SubtaskOutcome, AutomationError> {
        ctx.solve_slider_if_present().await?;
        if ctx.store.daily(&Self::signed_key(ctx))?.executed {
            info!("already signed in today");
            ctx.state.signed = true;
            return Ok(SubtaskOutcome::Completed);
        }
        if !ctx.locator.ocr_enabled() {
            warn!("OCR is disabled, the sign-in button cannot be found");
            return Ok(SubtaskOutcome::Pending);
        }

        ctx.pause(Duration::from_secs(1)).await;
        ctx.solve_slider_if_present().await?;

        let tapped = ctx
            .find_and_click(&Target::ocr(SIGN_NOW), "立即签到")
            .await?;
        if tapped {
            ctx.pause(Duration::from_secs(1)).await;
        }
        if ctx.locator.exists(&Target::text(SIGN_CONFIRMED)).await {
            self.mark_signed(ctx)?;
        } else if tapped {
            warn!("sign-in tapped but not confirmed yet");
        } else {
            let failures = ctx.store.daily(&Self::sign_failures_key(ctx))?.count;
            if failures > ctx.config.limits.presumed_success_after {
                warn!(
                    failures,
                    "sign-in never confirmed, presuming it succeeded; this may be a false positive"
                );
                ctx.state.signed = true;
            } else {
                ctx.store
                    .update_daily(&Self::sign_failures_key(ctx), |r| r.count += 1)?;
                error!("Sign-in button not found and sign-in not confirmed");
                ctx.record_failure("签到").await;
            }
        }

        Ok(if ctx.state.signed {
            SubtaskOutcome::Completed
        } else {
            SubtaskOutcome::Pending
        })
    }

    fn mark_signed(&self, ctx: &mut PassContext) -> Result<(), AutomationError> {
        info!("sign-in confirmed");
        ctx.state.signed = true;
        ctx.store.update_daily(&Self::signed_key(ctx), |r| {
            r.executed = true;
            r.count += 1;
        })?;
        Ok(())
    }

    /// Counts today's checks of the browsing task and forces it done once
    /// the hang limit is reached. Returns whether it is done.
    fn hang_done(&self, ctx: &PassContext) -> Result<bool, AutomationError> {
        let limit = ctx.config.limits.hang_task_limit;
        let record = ctx.store.update_daily(&Self::hang_key(ctx), |r| {
            if !r.executed {
                r.count += 1;
                if r.count >= limit {
                    r.executed = true;
                }
            }
        })?;
        if record.executed && record.count >= limit {
            debug!(checks = record.count, "browsing task treated as done");
        }
        Ok(record.executed)
    }

    fn set_hang_done(&self, ctx: &PassContext) -> Result<(), AutomationError> {
        ctx.store
            .update_daily(&Self::hang_key(ctx), |r| r.executed = true)?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn browse_ads(&self, ctx: &mut PassContext) -> Result<SubtaskOutcome, AutomationError> {
        let more_coins = Target::text(MORE_COINS).within(ctx.region(0.0, 0.0, 0.5, 0.5));
        loop {
            if ctx.state.finish_loop {
                return Ok(SubtaskOutcome::Pending);
            }
            ctx.solve_slider_if_present().await?;
            if self.hang_done(ctx)? {
                info!("nothing left to browse today");
                return Ok(SubtaskOutcome::Completed);
            }

            self.check_countdown(ctx, false).await?;
            if ctx.state.finish_loop {
                return Ok(SubtaskOutcome::Pending);
            }

            ctx.state.browse_iterations += 1;
            let limit = ctx.config.limits.browse_iteration_limit;
            if ctx.state.browse_iterations > limit {
                error!(
                    "{}",
                    AutomationError::LoopAnomaly(format!(
                        "ad browsing ran {} times, stopping",
                        ctx.state.browse_iterations - 1
                    ))
                );
                ctx.state.finish_loop = true;
                return Ok(SubtaskOutcome::Pending);
            }

            let Some(entry) = ctx.locate(&more_coins).await else {
                info!("no reward entry visible");
                self.check_countdown(ctx, true).await?;
                return Ok(SubtaskOutcome::Pending);
            };
            ctx.click(&entry, "更多元宝").await?;
            ctx.pause(Duration::from_secs(2)).await;

            let mut finished = false;
            if ctx.find_and_click(&Target::text(GO_BROWSE), GO_BROWSE).await? {
                ctx.pause(Duration::from_secs(1)).await;
                ctx.browse(None).await?;
                ctx.pause(Duration::from_secs(1)).await;
                ctx.back().await?;
            } else {
                warn!("'{}' not found, browsing may be finished", GO_BROWSE);
                if !ctx.state.search_exhausted
                    && ctx.find_and_click(&Target::text(GO_SEARCH), GO_SEARCH).await?
                {
                    self.search_once(ctx).await?;
                } else if ctx
                    .find_and_click(&Target::text(ALL_FINISHED), ALL_FINISHED)
                    .await?
                {
                    finished = true;
                    ctx.pause(Duration::from_secs(1)).await;
                    ctx.back().await?;
                    self.set_hang_done(ctx)?;
                }
            }

            ctx.pause(Duration::from_secs(1)).await;
            self.close_reward_dialogs(ctx).await?;
            self.check_countdown(ctx, true).await?;
            if finished {
                return Ok(SubtaskOutcome::Completed);
            }
            ctx.pause(Duration::from_secs(1)).await;
        }
    }

    /// Search is attempted at most once per pass.
    async fn search_once(&self, ctx: &mut PassContext) -> Result<(), AutomationError> {
        ctx.state.search_exhausted = true;
        let container = Target::id(SEARCH_CONTAINER).timeout(Duration::from_secs(5));
        if ctx.locate(&container).await.is_some() {
            let candidates = Target::class_name(SEARCH_CANDIDATE).within(ctx.region(0.0, 0.0, 0.8, 0.7));
            let found = ctx
                .locator
                .probe(&candidates, ctx.config.timings.probe_timeout())
                .await;
            debug!(count = found.len(), "search candidates");
            if let Some(item) = found.get(1) {
                ctx.click(item, "推荐商品").await?;
                ctx.pause(Duration::from_secs(1)).await;
                ctx.browse(Some(SEARCH_BROWSE_INDICATOR)).await?;
                ctx.pause(Duration::from_secs(1)).await;
            } else {
                error!("No recommendation to open, search task failed");
                ctx.record_failure("搜索任务").await;
            }
            ctx.back().await?;
        } else {
            warn!("search page did not open");
        }
        ctx.pause(Duration::from_secs(1)).await;
        ctx.back().await
    }

    /// Work through the reward dialogs shown after a claim. Returns whether
    /// any dialog led to another browse.
    async fn close_reward_dialogs(&self, ctx: &mut PassContext) -> Result<bool, AutomationError> {
        let use_now = Target::text(USE_NOW);
        let claim = Target::text(CLAIM_COINS);
        let mut browsed = false;
        for _ in 0..ctx.config.limits.dialog_chain_limit {
            match ctx.locator.alternative(&use_now, &claim, DIALOG_WAIT).await {
                Alternative::First(button) => {
                    ctx.click(&button, USE_NOW).await?;
                    ctx.pause(DIALOG_WAIT).await;
                    return Ok(browsed);
                }
                Alternative::Second(button) => {
                    ctx.click(&button, "立即领元宝").await?;
                    ctx.pause(Duration::from_secs(1)).await;
                    ctx.browse(None).await?;
                    ctx.back().await?;
                    ctx.pause(Duration::from_secs(1)).await;
                    browsed = true;
                }
                Alternative::Neither => return Ok(browsed),
            }
        }
        warn!("reward dialogs kept chaining, moving on");
        Ok(browsed)
    }

    /// Claim whatever the countdown button offers, then read the next
    /// countdown and hand it to the reschedule policy.
    #[instrument(skip(self, ctx))]
    pub async fn check_countdown(
        &self,
        ctx: &mut PassContext,
        wait_for_next: bool,
    ) -> Result<CountdownCheck, AutomationError> {
        let claim_region = ctx.region(0.5, 0.1, 1.0, 0.6);
        let default_region = ctx.region(0.5, 0.2, 1.0, 0.6);
        let limit = ctx.config.limits.countdown_claim_limit;
        let claim = Target::text(CLAIM_COUNTDOWN)
            .or_ocr(CLAIM_COUNTDOWN)
            .within(claim_region);
        let widget = Target::text(COUNTDOWN_WIDGET).within(claim_region);

        loop {
            if ctx.state.countdown_claims > limit || ctx.state.countdown_waits > limit {
                ctx.reschedule.schedule_fallback(
                    &mut ctx.state.schedule,
                    "Countdown claim keeps reappearing, a dialog may be stuck",
                )?;
                ctx.state.finish_loop = true;
                return Ok(CountdownCheck::GaveUp);
            }

            if let Some(button) = ctx.locate(&claim).await {
                ctx.click(&button, "倒计时领取").await?;
                ctx.state.countdown_claims += 1;
                ctx.pause(Duration::from_secs(1)).await;
                self.close_reward_dialogs(ctx).await?;
                continue;
            }

            let region = match ctx.locate(&widget).await {
                Some(found) => {
                    ctx.state.schedule.countdown_widget_seen = true;
                    if let Err(e) = ctx.reschedule.cache_region(found.bounds) {
                        warn!("Could not cache countdown region: {}", e);
                    }
                    found.bounds
                }
                None => match ctx.reschedule.cached_region() {
                    Ok(Some(cached)) => cached,
                    Ok(None) => default_region,
                    Err(e) => {
                        warn!("Could not read cached countdown region: {}", e);
                        default_region
                    }
                },
            };

            let Some(seconds) = ctx.recognizer.recognize(region).await else {
                if ctx.recognizer.is_terminal(region).await {
                    info!("countdown rewards finished for today");
                    ctx.state.schedule.exhausted = true;
                    return Ok(CountdownCheck::Exhausted);
                }
                if wait_for_next {
                    error!(
                        "{}",
                        AutomationError::RecognitionFailure(format!("countdown unreadable in {region}"))
                    );
                    ctx.record_failure("倒计时识别").await;
                } else {
                    debug!(%region, "countdown unreadable");
                }
                return Ok(CountdownCheck::Unreadable);
            };

            info!(seconds, "countdown recognized");
            match ctx
                .reschedule
                .apply_countdown(&mut ctx.state.schedule, seconds, wait_for_next)?
            {
                CountdownDecision::WaitInProcess(wait) => {
                    ctx.state.countdown_waits += 1;
                    info!(wait_secs = wait.as_secs(), "waiting for countdown in process");
                    ctx.pause(wait).await;
                }
                CountdownDecision::ScheduleExternal(_) => return Ok(CountdownCheck::Scheduled),
                CountdownDecision::Ignore => return Ok(CountdownCheck::Observed),
            }
        }
    }

    async fn collect_coins(&self, ctx: &mut PassContext) -> Result<SubtaskOutcome, AutomationError> {
        if ctx.state.schedule.exhausted {
            return Ok(SubtaskOutcome::Completed);
        }
        if ctx.state.finish_loop {
            return Ok(SubtaskOutcome::Pending);
        }
        ctx.solve_slider_if_present().await?;
        match self.check_countdown(ctx, true).await? {
            CountdownCheck::Exhausted => Ok(SubtaskOutcome::Completed),
            _ => Ok(SubtaskOutcome::Pending),
        }
    }
}

impl Default for Taobao {
    fn default() -> Self {
        Self {
            subtasks: Self::default_subtasks(),
        }
    }
}

#[async_trait]
impl SignTask for Taobao {
    fn task_code(&self) -> &str {
        TASK_CODE
    }

    fn package_name(&self) -> &str {
        PACKAGE_NAME
    }

    fn subtasks(&self) -> &[Subtask] {
        &self.subtasks
    }

    async fn dismiss_popups(&self, ctx: &mut PassContext) -> Result<(), AutomationError> {
        let confirm = Target::text("打开|允许").timeout(DIALOG_WAIT);
        if ctx.find_and_click(&confirm, "打开").await? {
            ctx.pause(Duration::from_millis(500)).await;
        }
        let close = Target::text("关闭按钮").timeout(DIALOG_WAIT);
        if ctx.find_and_click(&close, "关闭按钮").await? {
            ctx.pause(Duration::from_millis(500)).await;
        }
        ctx.solve_slider_if_present().await?;
        Ok(())
    }

    async fn locate_main_entry(&self, ctx: &mut PassContext) -> Option<Match> {
        if let Err(e) = ctx.solve_slider_if_present().await {
            warn!("Slider gesture failed: {}", e);
        }
        if let Some(entry) = ctx.locate(&Target::text(MAIN_ENTRY)).await {
            return Some(entry);
        }

        debug!("'{}' not visible, trying through '{}'", MAIN_ENTRY, MY_TAOBAO);
        let my_taobao = Target::ocr(MY_TAOBAO).within(ctx.region(0.5, 0.8, 1.0, 1.0));
        match ctx.find_and_click(&my_taobao, MY_TAOBAO).await {
            Ok(true) => {
                ctx.pause(Duration::from_secs(1)).await;
                ctx.locate(&Target::text(SIGN_FOR_CASH)).await
            }
            Ok(false) => None,
            Err(e) => {
                warn!("Could not open '{}': {}", MY_TAOBAO, e);
                None
            }
        }
    }

    async fn run_subtask(
        &self,
        subtask: &Subtask,
        ctx: &mut PassContext,
    ) -> Result<SubtaskOutcome, AutomationError> {
        match subtask.code.as_str() {
            DAILY_SIGN => self.daily_sign(ctx).await,
            BROWSE_ADS => self.browse_ads(ctx).await,
            COLLECT_COINS => self.collect_coins(ctx).await,
            other => {
                warn!("Unknown subtask '{}'", other);
                Ok(SubtaskOutcome::Pending)
            }
        }
    }

    /// Without a confirmed sign-in the app is killed so the next pass
    /// starts clean. A confirmed sign-in always leaves a wake-up behind.
    /// A sign-in subtask already marked done today also counts as signed.
    async fn finish(&self, ctx: &mut PassContext) -> Result<(), AutomationError> {
        let mut signed = ctx.state.signed || ctx.store.daily(&Self::signed_key(ctx))?.executed;
        if !signed {
            if let Some(sign) = self.subtasks.iter().find(|s| s.code == DAILY_SIGN) {
                signed = ctx.tracker.is_done(sign, false)?;
            }
        }
        if !signed {
            warn!("sign-in not confirmed this pass, killing the app");
            ctx.engine.kill_current_app().await?;
        }
        ctx.reschedule
            .ensure_resumable(&mut ctx.state.schedule, signed)?;
        Ok(())
    }
}
