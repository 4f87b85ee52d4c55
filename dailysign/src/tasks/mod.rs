//! Application-specific check-in flows

use crate::config::{EngineConfig, TaskConfig};
use crate::runner::SignTask;

pub mod dingdong;
pub mod taobao;

pub use dingdong::DingDong;
pub use taobao::Taobao;

/// Task codes with a built-in flow
pub const SUPPORTED_TASKS: &[&str] = &[taobao::TASK_CODE, dingdong::TASK_CODE];

/// Build the flow for `task_code`, with subtasks taken from `config` when
/// the task is configured there.
pub fn build(task_code: &str, config: &EngineConfig) -> Option<Box<dyn SignTask>> {
    let task_config = config
        .task(task_code)
        .cloned()
        .unwrap_or_else(|| TaskConfig::new(task_code));
    match task_code {
        taobao::TASK_CODE => Some(Box::new(Taobao::new(&task_config))),
        dingdong::TASK_CODE => Some(Box::new(DingDong::new(&task_config))),
        _ => None,
    }
}
