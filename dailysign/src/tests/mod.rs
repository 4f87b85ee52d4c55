mod locator_tests;

use crate::config::EngineConfig;
use crate::engine::{AutomationEngine, Clock, FailureRecorder, TaskScheduler};
use crate::errors::AutomationError;
use crate::runner::{AutomationLoop, Services};
use crate::selector::{Selector, Template};
use crate::store::StateStore;
use crate::types::{Bounds, LocateStrategy, Match, OcrText, Point, Screenshot};
use chrono::{DateTime, Local, TimeZone};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_test_writer()
        .try_init();
}

/// A clock that only moves when told to
pub struct FixedClock {
    now: Mutex<DateTime<Local>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn noon(year: i32, month: u32, day: u32) -> Self {
        let now = Local
            .with_ymd_and_hms(year, month, day, 12, 0, 0)
            .single()
            .expect("valid local noon");
        Self::new(now)
    }

    pub fn advance_days(&self, days: i64) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::days(days);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
pub struct MockScheduler {
    calls: Mutex<Vec<(String, i64)>>,
}

impl MockScheduler {
    pub fn calls(&self) -> Vec<(String, i64)> {
        self.calls.lock().unwrap().clone()
    }
}

impl TaskScheduler for MockScheduler {
    fn create_one_shot_schedule(&self, task_code: &str, epoch_millis: i64) -> Result<(), AutomationError> {
        self.calls
            .lock()
            .unwrap()
            .push((task_code.to_string(), epoch_millis));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockRecorder {
    labels: Mutex<Vec<String>>,
}

impl MockRecorder {
    pub fn labels(&self) -> Vec<String> {
        self.labels.lock().unwrap().clone()
    }
}

impl FailureRecorder for MockRecorder {
    fn record_failure_screenshot(
        &self,
        _screen: Option<&Screenshot>,
        _task_code: &str,
        label: &str,
    ) -> Result<(), AutomationError> {
        self.labels.lock().unwrap().push(label.to_string());
        Ok(())
    }
}

/// Everything the mock engine was asked to do, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Launch(String),
    Kill,
    Minimize(String),
    Capture,
    Query(String),
    Template(String),
    Ocr(String),
    Tap(Point),
    Drag(Point, Point),
    Swipe(i32, i32),
    Back,
}

#[derive(Default)]
struct MockScreen {
    widgets: HashMap<String, Vec<Match>>,
    widget_scripts: HashMap<String, VecDeque<Vec<Match>>>,
    templates: HashMap<String, Match>,
    ocr: HashMap<String, Vec<OcrText>>,
    ocr_scripts: HashMap<String, VecDeque<Vec<OcrText>>>,
    capture_disabled: bool,
    calls: Vec<Call>,
}

/// Scripted device. Widgets and OCR results are keyed by the exact pattern
/// the code under test asks for; scripted responses are consumed first,
/// then the static ones apply.
#[derive(Default)]
pub struct MockEngine {
    screen: Mutex<MockScreen>,
}

pub fn widget(bounds: Bounds, text: &str) -> Match {
    Match::new(bounds, Some(text.to_string()), LocateStrategy::Structural)
}

pub fn ocr_text(bounds: Bounds, label: &str) -> OcrText {
    OcrText {
        label: label.to_string(),
        bounds,
    }
}

/// A template whose payload is valid base64
pub fn template(name: &str) -> Template {
    Template::new(name, "aGVsbG8=")
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_widget(&self, pattern: &str, bounds: Bounds) {
        self.set_widgets(pattern, vec![widget(bounds, pattern)]);
    }

    pub fn set_widgets(&self, pattern: &str, matches: Vec<Match>) {
        self.screen
            .lock()
            .unwrap()
            .widgets
            .insert(pattern.to_string(), matches);
    }

    pub fn script_widgets(&self, pattern: &str, responses: Vec<Vec<Match>>) {
        self.screen
            .lock()
            .unwrap()
            .widget_scripts
            .insert(pattern.to_string(), responses.into());
    }

    pub fn set_template(&self, name: &str, bounds: Bounds) {
        self.screen.lock().unwrap().templates.insert(
            name.to_string(),
            Match::new(bounds, None, LocateStrategy::Template),
        );
    }

    pub fn set_ocr(&self, pattern: &str, texts: Vec<OcrText>) {
        self.screen
            .lock()
            .unwrap()
            .ocr
            .insert(pattern.to_string(), texts);
    }

    pub fn script_ocr(&self, pattern: &str, responses: Vec<Vec<OcrText>>) {
        self.screen
            .lock()
            .unwrap()
            .ocr_scripts
            .insert(pattern.to_string(), responses.into());
    }

    pub fn disable_capture(&self) {
        self.screen.lock().unwrap().capture_disabled = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.screen.lock().unwrap().calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }

    pub fn taps_at(&self, point: Point) -> usize {
        self.count(|c| *c == Call::Tap(point))
    }

    fn record(&self, call: Call) {
        self.screen.lock().unwrap().calls.push(call);
    }
}

#[async_trait::async_trait]
impl AutomationEngine for MockEngine {
    async fn launch(&self, package: &str) -> Result<(), AutomationError> {
        self.record(Call::Launch(package.to_string()));
        Ok(())
    }

    async fn kill_current_app(&self) -> Result<(), AutomationError> {
        self.record(Call::Kill);
        Ok(())
    }

    async fn minimize(&self, package: &str) -> Result<(), AutomationError> {
        self.record(Call::Minimize(package.to_string()));
        Ok(())
    }

    async fn capture_screen(&self) -> Result<Option<Screenshot>, AutomationError> {
        let mut screen = self.screen.lock().unwrap();
        screen.calls.push(Call::Capture);
        if screen.capture_disabled {
            return Ok(None);
        }
        Ok(Some(Screenshot {
            image_data: vec![0; 4 * 4 * 4],
            width: 4,
            height: 4,
        }))
    }

    async fn query_widgets(
        &self,
        selector: &Selector,
        timeout: Duration,
        _region: Option<Bounds>,
    ) -> Result<Vec<Match>, AutomationError> {
        let found = {
            let mut screen = self.screen.lock().unwrap();
            let pattern = selector.pattern().to_string();
            screen.calls.push(Call::Query(pattern.clone()));
            match screen
                .widget_scripts
                .get_mut(&pattern)
                .and_then(|script| script.pop_front())
            {
                Some(scripted) => scripted,
                None => screen.widgets.get(&pattern).cloned().unwrap_or_default(),
            }
        };
        if found.is_empty() {
            // A real query waits for the widget before giving up.
            tokio::time::sleep(timeout).await;
        }
        Ok(found)
    }

    async fn match_template(
        &self,
        template: &Template,
        _screen: &Screenshot,
        _region: Option<Bounds>,
    ) -> Result<Option<Match>, AutomationError> {
        let mut screen = self.screen.lock().unwrap();
        screen.calls.push(Call::Template(template.name.clone()));
        Ok(screen.templates.get(&template.name).cloned())
    }

    async fn recognize_text(
        &self,
        _screen: &Screenshot,
        _region: Option<Bounds>,
        pattern: &str,
    ) -> Result<Vec<OcrText>, AutomationError> {
        let mut screen = self.screen.lock().unwrap();
        screen.calls.push(Call::Ocr(pattern.to_string()));
        if let Some(scripted) = screen
            .ocr_scripts
            .get_mut(pattern)
            .and_then(|script| script.pop_front())
        {
            return Ok(scripted);
        }
        Ok(screen.ocr.get(pattern).cloned().unwrap_or_default())
    }

    async fn tap(&self, point: Point) -> Result<(), AutomationError> {
        self.record(Call::Tap(point));
        Ok(())
    }

    async fn drag(&self, start: Point, end: Point, _duration: Duration) -> Result<(), AutomationError> {
        self.record(Call::Drag(start, end));
        Ok(())
    }

    async fn swipe(&self, start_y: i32, end_y: i32) -> Result<(), AutomationError> {
        self.record(Call::Swipe(start_y, end_y));
        Ok(())
    }

    async fn back(&self) -> Result<(), AutomationError> {
        self.record(Call::Back);
        Ok(())
    }
}

/// Mock collaborators wired into an [`AutomationLoop`]
pub struct Harness {
    pub engine: Arc<MockEngine>,
    pub scheduler: Arc<MockScheduler>,
    pub recorder: Arc<MockRecorder>,
    pub clock: Arc<FixedClock>,
    pub store: StateStore,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let clock = Arc::new(FixedClock::noon(2026, 10, 19));
        Self {
            engine: Arc::new(MockEngine::new()),
            scheduler: Arc::new(MockScheduler::default()),
            recorder: Arc::new(MockRecorder::default()),
            store: StateStore::in_memory(clock.clone()),
            clock,
        }
    }

    pub fn services(&self) -> Services {
        Services {
            engine: self.engine.clone(),
            scheduler: self.scheduler.clone(),
            recorder: self.recorder.clone(),
            clock: self.clock.clone(),
            store: self.store.clone(),
        }
    }

    pub fn automation(&self, config: EngineConfig) -> AutomationLoop {
        AutomationLoop::new(config, self.services())
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }
}
