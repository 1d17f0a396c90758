//! Frame types produced by the validator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Camera attributes resolved from the metadata provider
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraInfo {
    pub name: String,
    pub category: String,
    pub location: String,
    pub institute: String,
}

/// Image size reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

/// One detected entity within a frame
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub object_id: String,
    pub object_type: Option<String>,
    /// Degrees
    pub lat: f64,
    /// Degrees
    pub lng: f64,
    /// Meters
    pub altitude: f64,
    /// Knots
    pub speed: f64,
}

/// One observation instant from one camera
///
/// `frame_id` is device-assigned and not unique across cameras. Frames with the same
/// (`frame_id`, `camera_id`, `captured_at`) are stored as separate records.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub frame_id: String,
    pub camera_id: String,
    pub camera_info: Option<CameraInfo>,
    pub captured_at: DateTime<Utc>,
    pub image_dimensions: Option<ImageDimensions>,
    /// Detection order is preserved
    pub objects: Vec<DetectedObject>,
    /// JPEG bytes, device streaming path only
    pub image: Option<Vec<u8>>,
}

impl Frame {
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

/// What is wrong with a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    Missing,
    WrongType { expected: &'static str },
    NotNumeric,
    Empty,
    InvalidTimestamp,
    OutOfRange,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing => write!(f, "required field is missing"),
            Self::WrongType { expected } => write!(f, "expected {}", expected),
            Self::NotNumeric => write!(f, "not a number or numeric string"),
            Self::Empty => write!(f, "must not be empty"),
            Self::InvalidTimestamp => write!(f, "not a valid timestamp"),
            Self::OutOfRange => write!(f, "value out of range"),
        }
    }
}

/// Schema validation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field `{field}`: {issue}")]
pub struct ValidationError {
    /// Path of the offending field, e.g. `objects[0].lat`
    pub field: String,
    pub issue: ValidationIssue,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, issue: ValidationIssue) -> Self {
        Self {
            field: field.into(),
            issue,
        }
    }
}
