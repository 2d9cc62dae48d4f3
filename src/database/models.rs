use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Four corner x/y pairs, clockwise from top-left.
pub type BoundingBox = [i32; 8];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

impl Tag {
    /// Canonical form of a class or tag name.
    pub fn normalize(name: &str) -> String {
        name.trim().to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub class_name: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedText {
    pub text: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Combined output of one vision pass over a single image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub objects: Vec<DetectedObject>,
    #[serde(default)]
    pub texts: Vec<DetectedText>,
}

/// An indexed image with everything detected on it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRecord {
    pub id: i64,
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub objects: Vec<DetectedObject>,
    pub texts: Vec<DetectedText>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagView {
    pub name: String,
    pub original_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchPage {
    pub images: Vec<ImageRecord>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    pub pages: u64,
}
