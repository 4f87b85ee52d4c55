//! Common types shared by the locator, the recognizers and the flows

use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in device pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Screen size used to turn fractional regions into pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSize {
    pub width: i32,
    pub height: i32,
}

impl Default for DeviceSize {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 2340,
        }
    }
}

/// Axis-aligned rectangle in device pixel coordinates (left, top, right, bottom)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Build a rectangle from fractions of the device size, e.g.
    /// `(0.5, 0.1, 1.0, 0.6)` is the right half between 10% and 60% height.
    pub fn from_fractions(device: DeviceSize, left: f64, top: f64, right: f64, bottom: f64) -> Self {
        let w = device.width as f64;
        let h = device.height as f64;
        Self {
            left: (w * left).round() as i32,
            top: (h * top).round() as i32,
            right: (w * right).round() as i32,
            bottom: (h * bottom).round() as i32,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn center_x(&self) -> i32 {
        self.left + self.width() / 2
    }

    pub fn center_y(&self) -> i32 {
        self.top + self.height() / 2
    }

    pub fn center(&self) -> Point {
        Point::new(self.center_x(), self.center_y())
    }

    /// True when `other` lies entirely inside `self` (edges inclusive).
    pub fn contains(&self, other: &Bounds) -> bool {
        other.left >= self.left
            && other.top >= self.top
            && other.right <= self.right
            && other.bottom <= self.bottom
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{} {},{}]",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// Which locate strategy produced a match. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocateStrategy {
    Structural,
    Template,
    Ocr,
}

/// Normalized locate result, identical in shape for every strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub bounds: Bounds,
    pub center: Point,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub strategy: LocateStrategy,
}

impl Match {
    pub fn new(bounds: Bounds, text: Option<String>, strategy: LocateStrategy) -> Self {
        Self {
            bounds,
            center: bounds.center(),
            text,
            strategy,
        }
    }

    pub fn label(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

/// One text block returned by the OCR provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrText {
    pub label: String,
    pub bounds: Bounds,
}

impl From<OcrText> for Match {
    fn from(value: OcrText) -> Self {
        Match::new(value.bounds, Some(value.label), LocateStrategy::Ocr)
    }
}

/// Holds the screenshot data
#[derive(Debug, Clone)]
pub struct Screenshot {
    /// Raw RGBA pixels
    pub image_data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}
