use std::collections::BTreeSet;

use chrono::Utc;
use tracing::{debug, info};

use crate::database::models::{DetectedObject, Detection, ImageRecord, Tag};
use crate::database::repo::Repository;
use crate::error::{Error, Result};
use crate::index::cache::{CachePolicy, TagCache};

/// Turns detections into persisted images, tags and texts.
///
/// Owns the tag cache so that every tag creation goes through the same staging path as
/// the store transaction it belongs to.
#[derive(Debug, Default)]
pub struct Indexer {
    tags: TagCache,
}

impl Indexer {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            tags: TagCache::new(policy),
        }
    }

    pub fn tags(&self) -> &TagCache {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut TagCache {
        &mut self.tags
    }

    pub fn index(
        &mut self,
        repo: &mut Repository,
        filename: &str,
        detection: &Detection,
    ) -> Result<ImageRecord> {
        validate(filename, detection)?;
        self.tags.ensure_initialized(repo)?;

        let class_names: BTreeSet<String> = detection
            .objects
            .iter()
            .map(|object| Tag::normalize(&object.class_name))
            .collect();

        let mut staging = self.tags.stage();
        let writer = repo.writer()?;

        let mut tags = Vec::with_capacity(class_names.len());
        for name in &class_names {
            tags.push(staging.resolve(&writer, name)?);
        }
        let created = staging.added().len();

        let created_at = Utc::now();
        let image_id = writer.insert_image(filename, created_at)?;
        for tag in &tags {
            writer.link_tag(image_id, tag.id)?;
        }
        let mut objects = Vec::with_capacity(detection.objects.len());
        for object in &detection.objects {
            let object = DetectedObject {
                class_name: Tag::normalize(&object.class_name),
                confidence: object.confidence,
            };
            writer.insert_object(image_id, &object)?;
            objects.push(object);
        }
        for text in &detection.texts {
            writer.insert_text(image_id, text)?;
        }

        writer.commit()?;
        staging.commit();

        info!(
            "Indexed {} as image {} with {} tags ({} new), {} texts",
            filename,
            image_id,
            tags.len(),
            created,
            detection.texts.len()
        );

        Ok(ImageRecord {
            id: image_id,
            filename: filename.to_string(),
            created_at,
            tags: tags.into_iter().map(|tag| tag.name).collect(),
            objects,
            texts: detection.texts.clone(),
        })
    }
}

fn validate(filename: &str, detection: &Detection) -> Result<()> {
    if filename.trim().is_empty() {
        return Err(Error::validation("filename is empty"));
    }

    for object in &detection.objects {
        if Tag::normalize(&object.class_name).is_empty() {
            return Err(Error::validation(format!("{}: object with empty class name", filename)));
        }
        check_confidence(filename, object.confidence)?;
    }
    for text in &detection.texts {
        check_confidence(filename, text.confidence)?;
    }

    debug!(
        "Validated detection for {}: {} objects, {} texts",
        filename,
        detection.objects.len(),
        detection.texts.len()
    );
    Ok(())
}

fn check_confidence(filename: &str, confidence: f32) -> Result<()> {
    if confidence.is_finite() && (0.0..=1.0).contains(&confidence) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "{}: confidence {} outside [0, 1]",
            filename, confidence
        )))
    }
}
