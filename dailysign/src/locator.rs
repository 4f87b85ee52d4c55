use tracing::{debug, instrument, warn};

use crate::engine::AutomationEngine;
use crate::selector::Target;
use crate::types::{Bounds, LocateStrategy, Match, Screenshot};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

// Per-attempt timeout and pause used when polling for one of two targets
const ALTERNATIVE_POLL_TIMEOUT: Duration = Duration::from_millis(200);
const ALTERNATIVE_POLL_INTERVAL: Duration = Duration::from_millis(300);
const PROBE_INTERVAL: Duration = Duration::from_millis(250);

/// Which of two alternative targets showed up first
#[derive(Debug, Clone, PartialEq)]
pub enum Alternative {
    First(Match),
    Second(Match),
    Neither,
}

/// Finds targets on screen through a cost-ordered fallback chain:
/// structural query, then image template, then OCR.
///
/// Absence is never an error. Provider failures are logged and treated
/// as "not found" so callers only ever branch on `Option`.
#[derive(Clone)]
pub struct ElementLocator {
    engine: Arc<dyn AutomationEngine>,
    ocr_enabled: bool,
}

impl ElementLocator {
    pub fn new(engine: Arc<dyn AutomationEngine>, ocr_enabled: bool) -> Self {
        Self {
            engine,
            ocr_enabled,
        }
    }

    pub fn ocr_enabled(&self) -> bool {
        self.ocr_enabled
    }

    /// Locate the first match for `target`. When several candidates
    /// qualify, the first in provider order wins.
    #[instrument(level = "debug", skip(self, target), fields(target = %target.describe()))]
    pub async fn locate(&self, target: &Target) -> Option<Match> {
        if target.selector.is_some() {
            if let Some(found) = self.locate_all(target).await.into_iter().next() {
                return Some(found);
            }
        }

        // The screenshot taken for template matching is reused by OCR.
        let mut screen: Option<Screenshot> = None;

        if let Some(template) = &target.template {
            screen = self.capture().await;
            if let Some(shot) = &screen {
                match self
                    .engine
                    .match_template(template, shot, target.region)
                    .await
                {
                    Ok(Some(found)) if within(target.region, &found.bounds) => {
                        debug!(template = %template.name, bounds = %found.bounds, "found by template");
                        return Some(Match::new(
                            found.bounds,
                            found.text,
                            LocateStrategy::Template,
                        ));
                    }
                    Ok(Some(found)) => {
                        debug!(bounds = %found.bounds, "template match outside region, ignored");
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Template matching failed for '{}': {}", template.name, e),
                }
            }
        }

        if let Some(pattern) = &target.ocr_pattern {
            if !self.ocr_enabled {
                debug!("OCR disabled, skipping pattern '{}'", pattern);
                return None;
            }
            let label_regex = full_match(pattern)?;
            if screen.is_none() {
                screen = self.capture().await;
            }
            let shot = screen.as_ref()?;
            match self
                .engine
                .recognize_text(shot, target.region, pattern)
                .await
            {
                Ok(texts) => {
                    let found = texts
                        .into_iter()
                        .filter(|t| within(target.region, &t.bounds))
                        .find(|t| label_regex.is_match(t.label.trim()));
                    if let Some(text) = found {
                        debug!(label = %text.label, bounds = %text.bounds, "found by OCR");
                        return Some(text.into());
                    }
                }
                Err(e) => warn!("OCR failed for pattern '{}': {}", pattern, e),
            }
        }

        None
    }

    /// All structural candidates inside the target region, in provider order.
    /// Template and OCR strategies are not consulted.
    pub async fn locate_all(&self, target: &Target) -> Vec<Match> {
        let Some(selector) = &target.selector else {
            return Vec::new();
        };
        match self
            .engine
            .query_widgets(selector, target.timeout, target.region)
            .await
        {
            Ok(candidates) => candidates
                .into_iter()
                .filter(|m| within(target.region, &m.bounds))
                .map(|m| Match::new(m.bounds, m.text, LocateStrategy::Structural))
                .collect(),
            Err(e) => {
                warn!("Structural query '{}' failed: {}", selector, e);
                Vec::new()
            }
        }
    }

    pub async fn exists(&self, target: &Target) -> bool {
        self.locate(target).await.is_some()
    }

    /// Poll two targets until one of them appears or `timeout` elapses.
    /// `first` is checked before `second` on every round.
    pub async fn alternative(&self, first: &Target, second: &Target, timeout: Duration) -> Alternative {
        let first = first.clone().timeout(ALTERNATIVE_POLL_TIMEOUT);
        let second = second.clone().timeout(ALTERNATIVE_POLL_TIMEOUT);
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(found) = self.locate(&first).await {
                return Alternative::First(found);
            }
            if let Some(found) = self.locate(&second).await {
                return Alternative::Second(found);
            }
            if Instant::now() >= deadline {
                return Alternative::Neither;
            }
            tokio::time::sleep(ALTERNATIVE_POLL_INTERVAL).await;
        }
    }

    /// Wait for structural candidates that may be rendered by another
    /// thread of the target app. A background task keeps querying until
    /// something shows up; the caller waits on a one-shot channel for at
    /// most `timeout` and then gives up, aborting the probe.
    pub async fn probe(&self, target: &Target, timeout: Duration) -> Vec<Match> {
        let (tx, rx) = oneshot::channel();
        let locator = self.clone();
        let target = target.clone();
        let handle = tokio::spawn(async move {
            let found = loop {
                let found = locator.locate_all(&target).await;
                if !found.is_empty() {
                    break found;
                }
                tokio::time::sleep(PROBE_INTERVAL).await;
            };
            let _ = tx.send(found);
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(found)) => found,
            _ => {
                handle.abort();
                debug!("Probe timed out after {:?}", timeout);
                Vec::new()
            }
        }
    }

    async fn capture(&self) -> Option<Screenshot> {
        match self.engine.capture_screen().await {
            Ok(Some(shot)) => Some(shot),
            Ok(None) => {
                warn!("Screen capture unavailable");
                None
            }
            Err(e) => {
                warn!("Screen capture failed: {}", e);
                None
            }
        }
    }
}

fn within(region: Option<Bounds>, bounds: &Bounds) -> bool {
    region.map_or(true, |r| r.contains(bounds))
}

/// Compile `pattern` so that it has to match the whole label.
pub(crate) fn full_match(pattern: &str) -> Option<Regex> {
    match Regex::new(&format!("^(?:{pattern})$")) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!("Invalid pattern '{}': {}", pattern, e);
            None
        }
    }
}
