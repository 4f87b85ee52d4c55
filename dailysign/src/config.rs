//! Engine configuration, read from a JSON or YAML file.

use crate::errors::AutomationError;
use crate::selector::Template;
use crate::subtask::Subtask;
use crate::types::DeviceSize;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "DAILYSIGN_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub device: DeviceSize,
    /// Allow OCR as the last locate strategy
    pub ocr_enabled: bool,
    /// Leave the app in the foreground after a pass
    pub debugging: bool,
    pub limits: Limits,
    pub timings: Timings,
    pub tasks: Vec<TaskConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device: DeviceSize::default(),
            ocr_enabled: true,
            debugging: false,
            limits: Limits::default(),
            timings: Timings::default(),
            tasks: Vec::new(),
        }
    }
}

/// Iteration ceilings for every bounded loop in a pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// App restarts allowed when the main entry cannot be found
    pub restart_limit: u32,
    /// Taps on the countdown claim button before giving up
    pub countdown_claim_limit: u32,
    /// Iterations of the ad browsing loop
    pub browse_iteration_limit: u32,
    /// Daily checks of the browsing task before it is forced done
    pub hang_task_limit: u32,
    /// Unconfirmed sign-in attempts after which success is presumed
    pub presumed_success_after: u32,
    pub popup_close_limit: u32,
    pub collect_loop_limit: u32,
    pub dialog_chain_limit: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            restart_limit: 3,
            countdown_claim_limit: 4,
            browse_iteration_limit: 6,
            hang_task_limit: 10,
            presumed_success_after: 3,
            popup_close_limit: 5,
            collect_loop_limit: 10,
            dialog_chain_limit: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub short_wait_threshold_secs: u64,
    pub fallback_delay_secs: u64,
    pub ocr_retries: u32,
    pub ocr_retry_delay_ms: u64,
    pub browse_min_ms: u64,
    pub browse_max_ms: u64,
    pub browse_swipe_interval_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            short_wait_threshold_secs: 60,
            fallback_delay_secs: 300,
            ocr_retries: 3,
            ocr_retry_delay_ms: 1000,
            browse_min_ms: 16_000,
            browse_max_ms: 40_000,
            browse_swipe_interval_ms: 4_000,
            probe_timeout_ms: 5_000,
        }
    }
}

impl Timings {
    pub fn short_wait_threshold(&self) -> Duration {
        Duration::from_secs(self.short_wait_threshold_secs)
    }

    pub fn fallback_delay(&self) -> Duration {
        Duration::from_secs(self.fallback_delay_secs)
    }

    pub fn ocr_retry_delay(&self) -> Duration {
        Duration::from_millis(self.ocr_retry_delay_ms)
    }

    pub fn browse_min(&self) -> Duration {
        Duration::from_millis(self.browse_min_ms)
    }

    pub fn browse_max(&self) -> Duration {
        Duration::from_millis(self.browse_max_ms)
    }

    pub fn browse_swipe_interval(&self) -> Duration {
        Duration::from_millis(self.browse_swipe_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// One application's check-in flow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    pub task_code: String,
    #[serde(default)]
    pub task_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Overrides the flow's built-in subtask list when not empty
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// Template images by name, base64 encoded
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl TaskConfig {
    pub fn new(task_code: impl Into<String>) -> Self {
        Self {
            task_code: task_code.into(),
            task_name: String::new(),
            enabled: true,
            subtasks: Vec::new(),
            templates: BTreeMap::new(),
        }
    }

    pub fn template(&self, name: &str) -> Option<Template> {
        self.templates
            .get(name)
            .filter(|b64| !b64.trim().is_empty())
            .map(|b64| Template::new(name, b64.clone()))
    }

    /// The configured subtasks, or `defaults` when none are configured
    pub fn subtasks_or(&self, defaults: Vec<Subtask>) -> Vec<Subtask> {
        if self.subtasks.is_empty() {
            defaults
        } else {
            self.subtasks.clone()
        }
    }
}

impl EngineConfig {
    /// Load from a file; `.yaml`/`.yml` is parsed as YAML, anything else as JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AutomationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AutomationError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let config = if is_yaml {
            Self::from_yaml(&content)?
        } else {
            Self::from_json(&content)?
        };
        info!(path = %path.display(), tasks = config.tasks.len(), "configuration loaded");
        Ok(config)
    }

    /// Load from the file named by `DAILYSIGN_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self, AutomationError> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::load(path.trim()),
            _ => {
                debug!("{} not set, using default configuration", CONFIG_ENV_VAR);
                Ok(Self::default())
            }
        }
    }

    pub fn from_json(content: &str) -> Result<Self, AutomationError> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| AutomationError::Config(format!("Invalid JSON configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, AutomationError> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| AutomationError::Config(format!("Invalid YAML configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AutomationError> {
        if self.device.width <= 0 || self.device.height <= 0 {
            return Err(AutomationError::Config(format!(
                "Device size must be positive, got {}x{}",
                self.device.width, self.device.height
            )));
        }
        let mut task_codes = HashSet::new();
        for task in &self.tasks {
            if !task_codes.insert(task.task_code.as_str()) {
                return Err(AutomationError::Config(format!(
                    "Duplicate task code '{}'",
                    task.task_code
                )));
            }
            let mut codes = HashSet::new();
            for subtask in &task.subtasks {
                if !codes.insert(subtask.code.as_str()) {
                    return Err(AutomationError::Config(format!(
                        "Duplicate subtask code '{}' in task '{}'",
                        subtask.code, task.task_code
                    )));
                }
            }
            for name in task.templates.keys() {
                if let Some(template) = task.template(name) {
                    template.validate().map_err(AutomationError::Config)?;
                }
            }
        }
        Ok(())
    }

    pub fn task(&self, task_code: &str) -> Option<&TaskConfig> {
        self.tasks.iter().find(|t| t.task_code == task_code)
    }
}
