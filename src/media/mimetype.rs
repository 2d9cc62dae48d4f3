use std::path::Path;
use anyhow::{Result, Context};

pub fn detect_mimetype(path: &Path) -> Result<String> {
    let kind = infer::get_from_path(path)
        .with_context(|| format!("Failed to read {:?} for mimetype detection", path))?;

    match kind {
        Some(k) => Ok(k.mime_type().to_string()),
        None => Ok("application/octet-stream".to_string()),
    }
}

pub fn is_image(path: &Path) -> Result<bool> {
    Ok(detect_mimetype(path)?.starts_with("image/"))
}

/// A PNG signature and header chunk, enough for `infer` to sniff.
#[cfg(test)]
pub(crate) const PNG_MAGIC: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R',
];
