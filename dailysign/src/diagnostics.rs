use crate::engine::{Clock, FailureRecorder, SystemClock};
use crate::errors::AutomationError;
use crate::types::Screenshot;
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Saves failure screenshots as PNG files named
/// `<task>_<label>_<timestamp>.png` under a directory.
pub struct FileFailureRecorder {
    dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FileFailureRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(dir, Arc::new(SystemClock))
    }

    pub fn with_clock(dir: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            clock,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(&self, task_code: &str, label: &str) -> String {
        let stamp = self.clock.now().format("%Y%m%d_%H%M%S");
        format!("{}_{}_{}.png", sanitize(task_code), sanitize(label), stamp)
    }
}

/// Keep file names portable; labels are often CJK, which is fine, but
/// path separators and spaces are not.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

impl FailureRecorder for FileFailureRecorder {
    fn record_failure_screenshot(
        &self,
        screen: Option<&Screenshot>,
        task_code: &str,
        label: &str,
    ) -> Result<(), AutomationError> {
        let Some(screen) = screen else {
            warn!(task = task_code, label, "no screenshot available for failure record");
            return Ok(());
        };

        let image = RgbaImage::from_raw(screen.width, screen.height, screen.image_data.clone())
            .ok_or_else(|| {
                AutomationError::InvalidArgument(format!(
                    "Screenshot buffer of {} bytes does not fit {}x{} RGBA",
                    screen.image_data.len(),
                    screen.width,
                    screen.height
                ))
            })?;

        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(self.file_name(task_code, label));
        image
            .save(&path)
            .map_err(|e| AutomationError::Storage(format!("Failed to save {}: {e}", path.display())))?;
        info!(task = task_code, label, path = %path.display(), "failure screenshot saved");
        Ok(())
    }
}
