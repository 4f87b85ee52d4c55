//! Reading on-screen countdown timers through OCR

use crate::engine::AutomationEngine;
use crate::locator::full_match;
use crate::types::Bounds;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Digits separated by colons, two or three groups, surrounded by noise
pub const COUNTDOWN_PATTERN: &str = r"^[^0-9]*((?:[0-9]+:){1,2}[0-9]+)[^0-9]*$";

/// Phrase shown once today's countdown rewards are exhausted
pub const DEFAULT_TERMINAL_PATTERN: &str = ".*明日再来.*";

static COUNTDOWN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(COUNTDOWN_PATTERN).expect("countdown pattern is a valid regex")
});

/// Parse noisy OCR output such as `倒计时 01:02:03` into seconds.
///
/// Groups are weighted right to left in base 60, so `01:02:03` is
/// 3 + 2*60 + 1*3600.
pub fn parse_countdown(text: &str) -> Option<u64> {
    let captures = COUNTDOWN_RE.captures(text.trim())?;
    let digits = captures.get(1)?.as_str();
    digits
        .split(':')
        .rev()
        .enumerate()
        .try_fold(0u64, |total, (position, group)| {
            let value: u64 = group.parse().ok()?;
            let weight = 60u64.checked_pow(position as u32)?;
            total.checked_add(value.checked_mul(weight)?)
        })
}

/// Samples a screen region until a countdown can be read, with a bounded
/// number of retries.
#[derive(Clone)]
pub struct CountdownRecognizer {
    engine: Arc<dyn AutomationEngine>,
    retries: u32,
    retry_delay: Duration,
    terminal_pattern: String,
}

impl CountdownRecognizer {
    pub fn new(engine: Arc<dyn AutomationEngine>, retries: u32, retry_delay: Duration) -> Self {
        Self {
            engine,
            retries,
            retry_delay,
            terminal_pattern: DEFAULT_TERMINAL_PATTERN.to_string(),
        }
    }

    pub fn with_terminal_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.terminal_pattern = pattern.into();
        self
    }

    /// Remaining seconds shown inside `region`, or `None` once every
    /// attempt (the first plus `retries`) failed to produce a readable value.
    #[instrument(level = "debug", skip(self))]
    pub async fn recognize(&self, region: Bounds) -> Option<u64> {
        for attempt in 0..=self.retries {
            if let Some(seconds) = self.sample(region).await {
                debug!(seconds, attempt, "countdown recognized");
                return Some(seconds);
            }
            if attempt < self.retries {
                warn!("Countdown OCR failed, retrying ({}/{})", attempt + 1, self.retries);
                tokio::time::sleep(self.retry_delay).await;
            }
        }
        None
    }

    async fn sample(&self, region: Bounds) -> Option<u64> {
        let screen = match self.engine.capture_screen().await {
            Ok(Some(screen)) => screen,
            Ok(None) => return None,
            Err(e) => {
                warn!("Screen capture failed: {}", e);
                return None;
            }
        };
        let texts = match self
            .engine
            .recognize_text(&screen, Some(region), COUNTDOWN_PATTERN)
            .await
        {
            Ok(texts) => texts,
            Err(e) => {
                warn!("Countdown OCR error: {}", e);
                return None;
            }
        };
        debug!(?texts, "countdown OCR output");
        // Only the first block is considered, the region is tight enough.
        texts.first().and_then(|t| parse_countdown(&t.label))
    }

    /// Whether the region shows the "come back tomorrow" phrase, meaning no
    /// further countdown is coming today.
    pub async fn is_terminal(&self, region: Bounds) -> bool {
        let Some(re) = full_match(&self.terminal_pattern) else {
            return false;
        };
        let screen = match self.engine.capture_screen().await {
            Ok(Some(screen)) => screen,
            _ => return false,
        };
        match self
            .engine
            .recognize_text(&screen, Some(region), &self.terminal_pattern)
            .await
        {
            Ok(texts) => texts.iter().any(|t| re.is_match(t.label.trim())),
            Err(e) => {
                warn!("Terminal phrase OCR error: {}", e);
                false
            }
        }
    }
}
