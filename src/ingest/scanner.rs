use walkdir::{WalkDir, DirEntry};
use std::path::{Path, PathBuf};
use crossbeam::channel::Sender;
use anyhow::Result;

/// Sends every non-hidden file under `root` with one of `extensions` (lower-case, no dot).
pub fn scan_directory(root: &Path, extensions: &[String], tx: Sender<PathBuf>) -> Result<usize> {
    let walker = WalkDir::new(root).sort_by_file_name().into_iter();
    let mut sent = 0;

    for entry in walker.filter_entry(|e| e.depth() == 0 || !is_hidden(e)) {
        let entry = entry?;
        if !entry.file_type().is_file() || !has_extension(entry.path(), extensions) {
            continue;
        }
        // Receivers gone means the pipeline is shutting down.
        if tx.send(entry.path().to_path_buf()).is_err() {
            break;
        }
        sent += 1;
    }
    Ok(sent)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name()
         .to_str()
         .map(|s| s.starts_with('.'))
         .unwrap_or(false)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}
