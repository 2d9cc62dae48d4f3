use parking_lot::Mutex;
use tracing::debug;

use crate::database::models::{DetectedText, Detection, ImageRecord, SearchPage, Tag, TagView};
use crate::database::repo::Repository;
use crate::error::Result;
use crate::index::cache::CachePolicy;
use crate::index::indexer::Indexer;
use crate::search::engine::SearchEngine;
use crate::search::translations::TranslationTable;

struct Inner {
    repo: Repository,
    indexer: Indexer,
}

/// Process-wide entry point for indexing and search.
///
/// The store connection and the tag cache sit behind one lock. Writers hold it for the
/// whole persistence step, so a tag name can never be created twice; readers take the
/// same lock since a single SQLite connection cannot be shared between threads anyway.
pub struct Catalog {
    inner: Mutex<Inner>,
    translations: TranslationTable,
    max_per_page: u32,
}

impl Catalog {
    pub fn new(
        repo: Repository,
        translations: TranslationTable,
        policy: CachePolicy,
        max_per_page: u32,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                repo,
                indexer: Indexer::new(policy),
            }),
            translations,
            max_per_page,
        }
    }

    /// Persists one image with its detections. Detection itself must already be done.
    pub fn index(&self, filename: &str, detection: &Detection) -> Result<ImageRecord> {
        let mut guard = self.inner.lock();
        let Inner { repo, indexer } = &mut *guard;
        indexer.index(repo, filename, detection)
    }

    pub fn add_tag(&self, name: &str) -> Result<Tag> {
        let mut guard = self.inner.lock();
        let Inner { repo, indexer } = &mut *guard;
        indexer.tags_mut().add(repo, name)
    }

    pub fn search(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
        locale: &str,
    ) -> Result<SearchPage> {
        self.read(|engine| engine.search(query, page, per_page, locale))
    }

    pub fn suggest(&self, query: &str, limit: usize, locale: &str) -> Result<Vec<String>> {
        self.read(|engine| engine.suggest(query, limit, locale))
    }

    pub fn list_tags(&self, locale: &str) -> Result<Vec<TagView>> {
        self.read(|engine| engine.list_tags(locale))
    }

    pub fn image(&self, id: i64) -> Result<Option<ImageRecord>> {
        self.inner.lock().repo.image(id)
    }

    pub fn image_texts(&self, id: i64) -> Result<Option<Vec<DetectedText>>> {
        self.inner.lock().repo.image_texts(id)
    }

    pub fn delete_image(&self, id: i64) -> Result<bool> {
        self.inner.lock().repo.delete_image(id)
    }

    fn read<T>(&self, op: impl FnOnce(&SearchEngine<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self.inner.lock();
        let Inner { repo, indexer } = &mut *guard;
        indexer.tags_mut().ensure_initialized(repo)?;
        debug!("Serving read with {} cached tags", indexer.tags().len());

        let engine = SearchEngine::new(repo, indexer.tags(), &self.translations, self.max_per_page);
        op(&engine)
    }
}
