//! DingDong grocery: credit sign-in and the fish pond rewards.
//!
//! The fish pond is drawn on a canvas, so everything past its entry is
//! found by image templates from the task configuration.

use crate::config::TaskConfig;
use crate::errors::AutomationError;
use crate::locator::Alternative;
use crate::runner::{PassContext, SignTask, SubtaskOutcome};
use crate::selector::Target;
use crate::subtask::Subtask;
use crate::types::Match;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const TASK_CODE: &str = "DingDong";
pub const PACKAGE_NAME: &str = "com.yaya.zone";

pub const CREDIT_SIGN: &str = "creditSign";
pub const FISHPOND: &str = "fishpond";

const POPUP_PROMPTS: &[&str] = &[r"\s*允许\s*", r"\s*跳过\s*", r"\s*下次再说\s*", r"\s*取消\s*"];
const POPUP_CLOSE_ID: &str = "com.yaya.zone:id/iv_(close|cancel)";
const MINE_ID: &str = "com.yaya.zone:id/ani_mine";
const MINE_TEXT: &str = "我的";
const CREDIT_ENTRY: &str = "(福利.*)?积分";
const CREDIT_PAGE: &str = "积分规则|福利中心|签到提醒";
const SIGN_BUTTON: &str = "^(立即|今日)?签到$";
const ALREADY_SIGNED: &str = ".*(今日已签到|明天签到可).*";
const CAN_COLLECT: &str = "可领取";

/// Names of the configured template images
pub mod templates {
    pub const MINE: &str = "mine";
    pub const SIGN_AND_GET_POINTS: &str = "sign_and_get_points";
    pub const FISHPOND_ENTRY: &str = "fishpond_entry";
    pub const FISHPOND_CHECK: &str = "fishpond_check";
    pub const CONTINUOUS_SIGN: &str = "fishpond_continuous_sign";
    pub const DO_CONTINUOUS_SIGN: &str = "fishpond_do_continuous_sign";
    pub const CLOSE_CONTINUOUS_SIGN: &str = "fishpond_close_continuous_sign";
    pub const CAN_COLLECT: &str = "fishpond_can_collect";
    pub const DAILY_COLLECT: &str = "fishpond_daily_collect";
    pub const NORMAL_COLLECT: &str = "fishpond_normal_collect";
    pub const CLOSE: &str = "fishpond_close";
}

pub struct DingDong {
    subtasks: Vec<Subtask>,
}

impl DingDong {
    pub fn new(task_config: &TaskConfig) -> Self {
        Self {
            subtasks: task_config.subtasks_or(Self::default_subtasks()),
        }
    }

    pub fn default_subtasks() -> Vec<Subtask> {
        vec![
            Subtask::new(CREDIT_SIGN, "积分签到"),
            Subtask::new(FISHPOND, "鱼塘签到"),
        ]
    }

    async fn find_image(&self, ctx: &PassContext, name: &str) -> Option<Match> {
        let Some(template) = ctx.task_config.template(name) else {
            debug!("template '{}' not configured", name);
            return None;
        };
        ctx.locate(&Target::image(template)).await
    }

    async fn tap_image(&self, ctx: &PassContext, name: &str, label: &str) -> Result<bool, AutomationError> {
        let found = self.find_image(ctx, name).await;
        Ok(ctx.click_if_found(found, label).await?.is_some())
    }

    #[instrument(skip_all)]
    async fn credit_sign(&self, ctx: &mut PassContext) -> Result<SubtaskOutcome, AutomationError> {
        let Some(entry) = ctx.locate(&Target::text(CREDIT_ENTRY)).await else {
            warn!("credit entry not found");
            return Ok(SubtaskOutcome::Pending);
        };
        ctx.click(&entry, "领积分").await?;
        ctx.pause(Duration::from_secs(1)).await;

        let mut outcome = SubtaskOutcome::Pending;
        if ctx.locator.exists(&Target::text(CREDIT_PAGE)).await {
            info!("credit page opened");
            ctx.pause(Duration::from_secs(1)).await;
            match ctx
                .locator
                .alternative(
                    &Target::text(SIGN_BUTTON),
                    &Target::text(ALREADY_SIGNED),
                    Duration::from_secs(3),
                )
                .await
            {
                Alternative::First(button) => {
                    // The widget bounds are unreliable on some builds, the
                    // template is tried first when configured.
                    if !self
                        .tap_image(ctx, templates::SIGN_AND_GET_POINTS, "签到领积分")
                        .await?
                    {
                        ctx.click(&button, "立即签到").await?;
                    }
                    info!("credit sign-in done");
                    outcome = SubtaskOutcome::Completed;
                }
                Alternative::Second(_) => {
                    info!("credit already signed today");
                    outcome = SubtaskOutcome::Completed;
                }
                Alternative::Neither => warn!("sign-in button not found on the credit page"),
            }
            ctx.pause(Duration::from_millis(500)).await;
        } else {
            warn!("credit page did not open");
        }
        ctx.back().await?;
        ctx.pause(Duration::from_secs(1)).await;
        Ok(outcome)
    }

    /// Dismiss the continuous sign-in dialog. Returns whether the pond is
    /// showing afterwards.
    async fn close_continuous_sign(&self, ctx: &PassContext) -> Result<bool, AutomationError> {
        if self
            .tap_image(ctx, templates::DO_CONTINUOUS_SIGN, "连续签到")
            .await?
        {
            ctx.pause(Duration::from_secs(1)).await;
        }
        if self
            .tap_image(ctx, templates::CLOSE_CONTINUOUS_SIGN, "关闭连续签到")
            .await?
        {
            ctx.pause(Duration::from_secs(1)).await;
        }
        Ok(self.find_image(ctx, templates::FISHPOND_CHECK).await.is_some())
    }

    #[instrument(skip_all)]
    async fn fishpond(&self, ctx: &mut PassContext) -> Result<SubtaskOutcome, AutomationError> {
        if !self
            .tap_image(ctx, templates::FISHPOND_ENTRY, "鱼塘")
            .await?
        {
            info!("fish pond entry not found");
            return Ok(SubtaskOutcome::Pending);
        }
        ctx.pause(Duration::from_secs(2)).await;

        let mut dialog_handled = false;
        if self.find_image(ctx, templates::FISHPOND_CHECK).await.is_none() {
            // A dialog on top of the pond; anything else means we are lost.
            if !self.close_continuous_sign(ctx).await? {
                warn!("fish pond did not open");
                return Ok(SubtaskOutcome::Restart);
            }
            dialog_handled = true;
        }
        if !dialog_handled
            && self
                .tap_image(ctx, templates::CONTINUOUS_SIGN, "连续签到")
                .await?
        {
            ctx.pause(Duration::from_secs(2)).await;
            self.close_continuous_sign(ctx).await?;
            ctx.pause(Duration::from_secs(2)).await;
        }

        if self
            .tap_image(ctx, templates::CAN_COLLECT, CAN_COLLECT)
            .await?
        {
            ctx.pause(Duration::from_secs(1)).await;
            if self
                .tap_image(ctx, templates::DAILY_COLLECT, "每日签到")
                .await?
            {
                ctx.pause(Duration::from_secs(1)).await;
            }
            let limit = ctx.config.limits.collect_loop_limit;
            let mut collected = 0;
            while collected < limit
                && self
                    .tap_image(ctx, templates::NORMAL_COLLECT, "奖励领取")
                    .await?
            {
                collected += 1;
                ctx.pause(Duration::from_secs(2)).await;
            }
            let mut by_text = 0;
            while by_text < limit
                && ctx
                    .find_and_click(&Target::ocr(CAN_COLLECT), CAN_COLLECT)
                    .await?
            {
                by_text += 1;
                ctx.pause(Duration::from_secs(1)).await;
            }
            info!(collected, by_text, "fish pond rewards collected");
        }

        if !self
            .tap_image(ctx, templates::CLOSE, "关闭鱼塘")
            .await?
        {
            ctx.back().await?;
        }
        ctx.pause(Duration::from_secs(1)).await;
        Ok(SubtaskOutcome::Completed)
    }
}

impl Default for DingDong {
    fn default() -> Self {
        Self {
            subtasks: Self::default_subtasks(),
        }
    }
}

#[async_trait]
impl SignTask for DingDong {
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
        ctx.dismiss_all(POPUP_PROMPTS, Duration::from_secs(1)).await?;
        let closed = ctx
            .close_repeating(&Target::id(POPUP_CLOSE_ID), "关闭弹窗")
            .await?;
        if closed > 0 {
            debug!(closed, "popups closed");
        }
        Ok(())
    }

    async fn locate_main_entry(&self, ctx: &mut PassContext) -> Option<Match> {
        let mine = Target::id(MINE_ID)
            .or_image(ctx.task_config.template(templates::MINE))
            .or_ocr(MINE_TEXT)
            .within(ctx.region(0.5, 0.7, 1.0, 1.0));
        ctx.locate(&mine).await
    }

    async fn run_subtask(
        &self,
        subtask: &Subtask,
        ctx: &mut PassContext,
    ) -> Result<SubtaskOutcome, AutomationError> {
        match subtask.code.as_str() {
            CREDIT_SIGN => self.credit_sign(ctx).await,
            FISHPOND => self.fishpond(ctx).await,
            other => {
                warn!("Unknown subtask '{}'", other);
                Ok(SubtaskOutcome::Pending)
            }
        }
    }
}
