use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Result};
use crossbeam::channel::bounded;
use indicatif::ProgressBar;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::error::Error;
use crate::ingest::scanner;
use crate::ml::detector::Detector;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Outcome {
    Indexed,
    Skipped,
    Failed,
}

/// Walks `root`, runs detection on worker threads and indexes every result.
///
/// Detection happens outside the catalog lock; only the persistence step is serialized.
/// Images already in the catalog are skipped, failures are logged and counted.
pub fn run(
    root: &Path,
    catalog: Arc<Catalog>,
    detector: Arc<dyn Detector>,
    extensions: Vec<String>,
    workers: usize,
    progress: ProgressBar,
) -> Result<IngestReport> {
    let (scan_tx, scan_rx) = bounded::<PathBuf>(256);
    let (done_tx, done_rx) = bounded::<Outcome>(256);

    let scan_root = root.to_path_buf();
    let scanner_handle = thread::spawn(move || {
        info!("Scanner started");
        let scanned = scanner::scan_directory(&scan_root, &extensions, scan_tx);
        info!("Scanner finished");
        scanned
    });

    let mut worker_handles = Vec::new();
    for i in 0..workers.max(1) {
        let rx = scan_rx.clone();
        let tx = done_tx.clone();
        let catalog = catalog.clone();
        let detector = detector.clone();
        let root = root.to_path_buf();

        worker_handles.push(thread::spawn(move || {
            debug!("Ingest worker {} started", i);
            for path in rx {
                let outcome = ingest_one(&root, &path, &catalog, detector.as_ref());
                if tx.send(outcome).is_err() {
                    break;
                }
            }
            debug!("Ingest worker {} finished", i);
        }));
    }
    // Drop the originals so the receivers close when all senders are done
    drop(scan_rx);
    drop(done_tx);

    let mut report = IngestReport::default();
    for outcome in done_rx {
        match outcome {
            Outcome::Indexed => report.indexed += 1,
            Outcome::Skipped => report.skipped += 1,
            Outcome::Failed => report.failed += 1,
        }
        progress.inc(1);
    }
    progress.finish_with_message(format!(
        "{} indexed, {} skipped, {} failed",
        report.indexed, report.skipped, report.failed
    ));

    let scanned = scanner_handle
        .join()
        .map_err(|_| anyhow!("Scanner thread panicked"))??;
    for handle in worker_handles {
        handle.join().map_err(|_| anyhow!("Ingest worker panicked"))?;
    }

    info!("Ingested {} files from {:?}: {:?}", scanned, root, report);
    Ok(report)
}

fn ingest_one(root: &Path, path: &Path, catalog: &Catalog, detector: &dyn Detector) -> Outcome {
    let filename = catalog_name(root, path);
    let indexed = detector
        .detect(path)
        .and_then(|detection| catalog.index(&filename, &detection));

    match indexed {
        Ok(image) => {
            debug!("Indexed {} as {}", filename, image.id);
            Outcome::Indexed
        }
        Err(Error::Conflict(_)) => {
            info!("Skipping {}: already indexed", filename);
            Outcome::Skipped
        }
        Err(e) if e.is_detection() => {
            warn!("{}", e);
            Outcome::Failed
        }
        Err(e) if e.is_store() => {
            error!("Store rejected {}: {}", filename, e);
            Outcome::Failed
        }
        Err(e) => {
            error!("Failed to index {}: {}", filename, e);
            Outcome::Failed
        }
    }
}

/// Path relative to the ingest root with `/` separators.
fn catalog_name(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path.to_string_lossy().into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::repo::Repository;
    use crate::index::cache::CachePolicy;
    use crate::media::mimetype::PNG_MAGIC;
    use crate::ml::detector::SidecarDetector;
    use crate::search::translations::TranslationTable;
    use std::fs;

    fn extensions() -> Vec<String> {
        vec!["png".to_string(), "jpg".to_string()]
    }

    #[test]
    fn test_ingest_directory_twice() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let detector = SidecarDetector::default();
        fs::create_dir_all(dir.path().join("street"))?;

        for (name, classes) in [("street/a.png", &["car", "person"][..]), ("b.png", &["car"][..])] {
            let path = dir.path().join(name);
            fs::write(&path, PNG_MAGIC)?;
            let json = serde_json::json!({
                "objects": classes
                    .iter()
                    .map(|c| serde_json::json!({"class_name": c, "confidence": 0.9}))
                    .collect::<Vec<_>>(),
                "texts": [{
                    "text": "Main Street",
                    "confidence": 0.7,
                    "bbox": [0, 0, 4, 0, 4, 2, 0, 2]
                }]
            });
            fs::write(detector.sidecar_path(&path), json.to_string())?;
        }
        // No sidecar: detection fails for this one.
        fs::write(dir.path().join("c.png"), PNG_MAGIC)?;
        fs::write(dir.path().join("notes.txt"), "ignored")?;

        let catalog = Arc::new(Catalog::new(
            Repository::open_in_memory()?,
            TranslationTable::default(),
            CachePolicy::FailOpen,
            100,
        ));
        let detector: Arc<dyn Detector> = Arc::new(detector);

        let first = run(
            dir.path(),
            catalog.clone(),
            detector.clone(),
            extensions(),
            3,
            ProgressBar::hidden(),
        )?;
        assert_eq!(first, IngestReport { indexed: 2, skipped: 0, failed: 1 });

        let second = run(
            dir.path(),
            catalog.clone(),
            detector,
            extensions(),
            1,
            ProgressBar::hidden(),
        )?;
        assert_eq!(second, IngestReport { indexed: 0, skipped: 2, failed: 1 });

        let cars = catalog.search("#car", 1, 10, "en")?;
        assert_eq!(cars.total, 2);
        let people = catalog.search("person", 1, 10, "en")?;
        assert_eq!(people.images[0].filename, "street/a.png");
        assert_eq!(catalog.suggest("str", 5, "en")?, vec!["Main Street"]);
        Ok(())
    }

    #[test]
    fn test_ingest_one_classifies_errors() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let detector = SidecarDetector::default();
        let catalog = Catalog::new(
            Repository::open_in_memory()?,
            TranslationTable::default(),
            CachePolicy::FailOpen,
            100,
        );

        let good = dir.path().join("good.png");
        fs::write(&good, PNG_MAGIC)?;
        fs::write(
            detector.sidecar_path(&good),
            r#"{"objects": [{"class_name": "cat", "confidence": 0.9}]}"#,
        )?;
        let invalid = dir.path().join("invalid.png");
        fs::write(&invalid, PNG_MAGIC)?;
        fs::write(
            detector.sidecar_path(&invalid),
            r#"{"objects": [{"class_name": "cat", "confidence": 1.5}]}"#,
        )?;
        let not_image = dir.path().join("fake.png");
        fs::write(&not_image, "plain text")?;

        let outcome = |path: &Path| ingest_one(dir.path(), path, &catalog, &detector);
        assert!(matches!(outcome(&good), Outcome::Indexed));
        assert!(matches!(outcome(&good), Outcome::Skipped));
        assert!(matches!(outcome(&invalid), Outcome::Failed));
        assert!(matches!(outcome(&not_image), Outcome::Failed));
        assert_eq!(catalog.search("", 1, 10, "en")?.total, 1);
        Ok(())
    }

    #[test]
    fn test_catalog_name_is_relative() {
        let root = Path::new("/data/photos");
        assert_eq!(catalog_name(root, &root.join("2024/beach.jpg")), "2024/beach.jpg");
        assert_eq!(catalog_name(root, Path::new("/elsewhere/x.png")), "/elsewhere/x.png");
    }
}
