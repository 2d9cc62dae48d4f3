use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::database::models::Detection;
use crate::error::{Error, Result};
use crate::media::mimetype;

/// A vision backend that finds objects and text in an image.
pub trait Detector: Send + Sync {
    fn detect(&self, path: &Path) -> Result<Detection>;
}

/// Reads detections an external YOLO/OCR run wrote next to each image as
/// `<image>.detections.json`.
pub struct SidecarDetector {
    suffix: String,
}

impl Default for SidecarDetector {
    fn default() -> Self {
        Self {
            suffix: ".detections.json".to_string(),
        }
    }
}

impl SidecarDetector {
    pub fn sidecar_path(&self, image: &Path) -> PathBuf {
        let mut name = image.as_os_str().to_os_string();
        name.push(&self.suffix);
        PathBuf::from(name)
    }
}

impl Detector for SidecarDetector {
    fn detect(&self, path: &Path) -> Result<Detection> {
        let is_image =
            mimetype::is_image(path).map_err(|e| Error::detection(path, format!("{:#}", e)))?;
        if !is_image {
            return Err(Error::detection(path, "not an image"));
        }

        let sidecar = self.sidecar_path(path);
        let raw = fs::read_to_string(&sidecar)
            .map_err(|e| Error::detection(path, format!("no detections at {:?}: {}", sidecar, e)))?;
        let detection: Detection = serde_json::from_str(&raw)
            .map_err(|e| Error::detection(path, format!("malformed detections: {}", e)))?;

        debug!(
            "Detected {} objects and {} texts in {:?}",
            detection.objects.len(),
            detection.texts.len(),
            path
        );
        Ok(detection)
    }
}
