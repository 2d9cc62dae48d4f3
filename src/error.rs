use std::path::PathBuf;

/// Errors raised by the indexing and search core.
///
/// Absence (an unknown image id) is never an error; lookups return `Option`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("image `{0}` is already indexed")]
    Conflict(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("detection failed for {path:?}: {reason}")]
    Detection { path: PathBuf, reason: String },

    #[error("translation table: {0}")]
    Translations(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn detection(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Detection {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Persistence failures, including transaction conflicts.
    pub fn is_store(&self) -> bool {
        matches!(self, Error::Store(_) | Error::Conflict(_))
    }

    pub fn is_detection(&self) -> bool {
        matches!(self, Error::Detection { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
