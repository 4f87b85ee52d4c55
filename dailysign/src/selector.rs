use crate::types::Bounds;
use base64::Engine as _;
use std::time::Duration;

/// Default timeout for structural queries when the target does not set one
pub const DEFAULT_TARGET_TIMEOUT: Duration = Duration::from_secs(3);

/// Structural ways to query the accessibility tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Regex matched against the whole text / content description
    Text(String),
    /// Regex matched against the whole resource id
    Id(String),
    /// Widget class name, e.g. `android.view.View`
    ClassName(String),
}

impl Selector {
    /// The raw pattern handed to the provider
    pub fn pattern(&self) -> &str {
        match self {
            Selector::Text(p) | Selector::Id(p) | Selector::ClassName(p) => p,
        }
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Selector::Text(p) => write!(f, "text:{p}"),
            Selector::Id(p) => write!(f, "id:{p}"),
            Selector::ClassName(p) => write!(f, "classname:{p}"),
        }
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        match s {
            _ if s.starts_with("id:") => Selector::Id(s[3..].to_string()),
            _ if s.starts_with("text:") => Selector::Text(s[5..].to_string()),
            _ if s.to_lowercase().starts_with("classname:") => {
                let parts: Vec<&str> = s.splitn(2, ':').collect();
                Selector::ClassName(parts[1].trim().to_string())
            }
            _ if s.starts_with('#') => Selector::Id(s[1..].to_string()),
            // plain strings are text patterns
            _ => Selector::Text(s.to_string()),
        }
    }
}

/// A named template image, base64 encoded, for the image matching provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub name: String,
    pub base64: String,
}

impl Template {
    pub fn new(name: impl Into<String>, base64: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base64: base64.into(),
        }
    }

    /// Check that the payload is valid base64 and not empty.
    pub fn validate(&self) -> Result<(), String> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(self.base64.trim())
            .map_err(|e| format!("template '{}' is not valid base64: {e}", self.name))?;
        if bytes.is_empty() {
            return Err(format!("template '{}' is empty", self.name));
        }
        Ok(())
    }
}

/// What to look for on screen and where.
///
/// The locate strategies are tried in a fixed order: the structural
/// selector, then the image template, then OCR. Each one is optional; a
/// target with only a template skips the structural query entirely.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub selector: Option<Selector>,
    pub template: Option<Template>,
    pub ocr_pattern: Option<String>,
    /// Matches outside this rectangle are discarded
    pub region: Option<Bounds>,
    pub timeout: Duration,
}

impl Target {
    fn empty() -> Self {
        Self {
            selector: None,
            template: None,
            ocr_pattern: None,
            region: None,
            timeout: DEFAULT_TARGET_TIMEOUT,
        }
    }

    pub fn selector(selector: impl Into<Selector>) -> Self {
        Self {
            selector: Some(selector.into()),
            ..Self::empty()
        }
    }

    pub fn text(pattern: impl Into<String>) -> Self {
        Self::selector(Selector::Text(pattern.into()))
    }

    pub fn id(pattern: impl Into<String>) -> Self {
        Self::selector(Selector::Id(pattern.into()))
    }

    pub fn class_name(name: impl Into<String>) -> Self {
        Self::selector(Selector::ClassName(name.into()))
    }

    pub fn image(template: Template) -> Self {
        Self {
            template: Some(template),
            ..Self::empty()
        }
    }

    /// OCR only, no structural query
    pub fn ocr(pattern: impl Into<String>) -> Self {
        Self {
            ocr_pattern: Some(pattern.into()),
            ..Self::empty()
        }
    }

    /// Add an image template fallback. `None` leaves the target unchanged,
    /// which keeps call sites simple when a template is not configured.
    pub fn or_image(mut self, template: Option<Template>) -> Self {
        if template.is_some() {
            self.template = template;
        }
        self
    }

    pub fn or_ocr(mut self, pattern: impl Into<String>) -> Self {
        self.ocr_pattern = Some(pattern.into());
        self
    }

    pub fn within(mut self, region: Bounds) -> Self {
        self.region = Some(region);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Short description for logs
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(s) = &self.selector {
            parts.push(s.to_string());
        }
        if let Some(t) = &self.template {
            parts.push(format!("image:{}", t.name));
        }
        if let Some(p) = &self.ocr_pattern {
            parts.push(format!("ocr:{p}"));
        }
        if let Some(r) = &self.region {
            parts.push(format!("in {r}"));
        }
        parts.join(" | ")
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::selector(s)
    }
}
