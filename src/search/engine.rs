use std::collections::BTreeSet;

use tracing::debug;

use crate::database::models::{SearchPage, TagView};
use crate::database::repo::{ImageFilter, Repository};
use crate::error::{Error, Result};
use crate::index::cache::TagCache;
use crate::search::query::Query;
use crate::search::translations::TranslationTable;

/// Read-side view over the store, the tag cache and the translation table.
///
/// Built per call while the catalog lock is held; the cache must already be initialized.
pub struct SearchEngine<'a> {
    repo: &'a Repository,
    tags: &'a TagCache,
    translations: &'a TranslationTable,
    max_per_page: u32,
}

impl<'a> SearchEngine<'a> {
    pub fn new(
        repo: &'a Repository,
        tags: &'a TagCache,
        translations: &'a TranslationTable,
        max_per_page: u32,
    ) -> Self {
        Self {
            repo,
            tags,
            translations,
            max_per_page,
        }
    }

    pub fn search(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
        locale: &str,
    ) -> Result<SearchPage> {
        if page == 0 {
            return Err(Error::validation("page starts at 1"));
        }
        if per_page == 0 || per_page > self.max_per_page {
            return Err(Error::validation(format!(
                "per_page must be between 1 and {}",
                self.max_per_page
            )));
        }
        check_locale(locale)?;

        let canonical;
        let needle;
        let filter = match Query::parse(query) {
            Query::ListAll => ImageFilter::All,
            Query::Tag(tag) => {
                canonical = self.resolve(tag, locale);
                ImageFilter::Tagged(&canonical)
            }
            Query::Combined(raw) => {
                canonical = self.resolve(raw, locale);
                needle = raw.to_lowercase();
                ImageFilter::TaggedOrText {
                    tag: &canonical,
                    needle: &needle,
                }
            }
        };
        debug!("Search {:?} in {} resolved to {:?}", query, locale, filter);

        let total = self.repo.count_images(filter)?;
        let offset = u64::from(page - 1) * u64::from(per_page);
        let images = if offset < total {
            self.repo.images(filter, per_page, offset)?
        } else {
            Vec::new()
        };

        Ok(SearchPage {
            images,
            total,
            page,
            per_page,
            pages: total.div_ceil(u64::from(per_page)),
        })
    }

    /// Autocompletion for a partially typed query. Tags match by prefix, texts by word.
    pub fn suggest(&self, query: &str, limit: usize, locale: &str) -> Result<Vec<String>> {
        check_locale(locale)?;
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        if let Some(rest) = query.strip_prefix('#') {
            let tags = self.tag_suggestions(&rest.to_lowercase(), limit, locale);
            return Ok(tags.into_iter().map(|name| format!("#{}", name)).collect());
        }

        let needle = query.to_lowercase();
        let mut suggestions = Vec::with_capacity(limit);
        let texts = self.repo.texts_at_word(&needle, limit)?;
        for candidate in self.tag_suggestions(&needle, limit, locale).into_iter().chain(texts) {
            if !suggestions.contains(&candidate) {
                suggestions.push(candidate);
            }
        }
        suggestions.truncate(limit);
        Ok(suggestions)
    }

    /// Every known tag with its display name, in canonical order.
    pub fn list_tags(&self, locale: &str) -> Result<Vec<TagView>> {
        check_locale(locale)?;
        Ok(self
            .tags
            .sorted()
            .into_iter()
            .map(|tag| TagView {
                name: self.translations.display(tag, locale).to_string(),
                original_name: tag.to_string(),
            })
            .collect())
    }

    fn resolve(&self, query: &str, locale: &str) -> String {
        self.translations
            .resolve(query, locale, |name| self.tags.contains(name))
    }

    /// Display names of cached tags whose canonical or display name starts with `prefix`.
    fn tag_suggestions(&self, prefix: &str, limit: usize, locale: &str) -> Vec<String> {
        let mut canonical: BTreeSet<&str> =
            self.tags.prefix_match(prefix, limit).into_iter().collect();
        canonical.extend(
            self.translations
                .display_prefix_matches(locale, prefix)
                .filter(|tag| self.tags.contains(tag)),
        );

        let mut names: Vec<String> = Vec::with_capacity(limit);
        for tag in canonical {
            let display = self.translations.display(tag, locale);
            if !names.iter().any(|n| n == display) {
                names.push(display.to_string());
            }
            if names.len() == limit {
                break;
            }
        }
        names
    }
}

fn check_locale(locale: &str) -> Result<()> {
    if locale.trim().is_empty() {
        Err(Error::validation("locale is empty"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{DetectedObject, DetectedText, Detection};
    use crate::index::indexer::Indexer;
    use std::collections::HashMap;

    struct Fixture {
        repo: Repository,
        indexer: Indexer,
        translations: TranslationTable,
    }

    impl Fixture {
        fn new(translations: &str) -> Self {
            let raw: HashMap<String, HashMap<String, String>> =
                serde_json::from_str(translations).unwrap();
            Self {
                repo: Repository::open_in_memory().unwrap(),
                indexer: Indexer::default(),
                translations: TranslationTable::from_entries(raw).unwrap(),
            }
        }

        fn add(&mut self, filename: &str, classes: &[&str], texts: &[&str]) -> i64 {
            let detection = Detection {
                objects: classes
                    .iter()
                    .map(|c| DetectedObject {
                        class_name: c.to_string(),
                        confidence: 0.9,
                    })
                    .collect(),
                texts: texts
                    .iter()
                    .map(|t| DetectedText {
                        text: t.to_string(),
                        confidence: 0.9,
                        bbox: [0; 8],
                    })
                    .collect(),
            };
            self.indexer.index(&mut self.repo, filename, &detection).unwrap().id
        }

        fn engine(&self) -> SearchEngine<'_> {
            SearchEngine::new(&self.repo, self.indexer.tags(), &self.translations, 100)
        }

        fn search(&self, query: &str, locale: &str) -> Vec<String> {
            self.engine()
                .search(query, 1, 100, locale)
                .unwrap()
                .images
                .into_iter()
                .map(|image| image.filename)
                .collect()
        }
    }

    #[test]
    fn test_tag_and_text_union() {
        let mut f = Fixture::new("{}");
        f.add("a.jpg", &["cat"], &[]);
        f.add("b.jpg", &[], &["black cat"]);
        f.add("c.jpg", &["dog"], &["dog park"]);

        assert_eq!(f.search("cat", "en"), vec!["a.jpg", "b.jpg"]);
        assert_eq!(f.search("#cat", "en"), vec!["a.jpg"]);
        assert_eq!(f.search("CAT", "en"), vec!["a.jpg", "b.jpg"]);
        assert_eq!(f.search("", "en"), vec!["a.jpg", "b.jpg", "c.jpg"]);
        assert!(f.search("#bird", "en").is_empty());
    }

    #[test]
    fn test_translated_queries_resolve_to_canonical_tag() {
        let mut f =
            Fixture::new(r#"{"cat": {"ru": "кот"}, "person": {"ru": "человек"}}"#);
        f.add("a.jpg", &["cat"], &[]);
        f.add("b.jpg", &["person"], &["кот и человек"]);

        assert_eq!(f.search("#Кот", "ru"), vec!["a.jpg"]);
        assert_eq!(f.search("кот", "ru"), vec!["a.jpg", "b.jpg"]);
        assert_eq!(f.search("человек", "ru"), vec!["b.jpg"]);
        assert!(f.search("#кот", "en").is_empty());
    }

    #[test]
    fn test_pagination() {
        let mut f = Fixture::new("{}");
        for i in 0..25 {
            f.add(&format!("{:02}.jpg", i), &["cat"], &[]);
        }
        f.add("other.jpg", &["dog"], &[]);

        let page = f.engine().search("#cat", 3, 10, "en").unwrap();
        assert_eq!(page.total, 25);
        assert_eq!(page.pages, 3);
        assert_eq!(page.images.len(), 5);
        assert_eq!(page.images[0].filename, "20.jpg");

        let past_end = f.engine().search("#cat", 4, 10, "en").unwrap();
        assert!(past_end.images.is_empty());
        assert_eq!(past_end.total, 25);
    }

    #[test]
    fn test_invalid_pagination_is_rejected() {
        let f = Fixture::new("{}");
        let engine = f.engine();
        assert!(matches!(engine.search("", 0, 10, "en"), Err(Error::Validation(_))));
        assert!(matches!(engine.search("", 1, 0, "en"), Err(Error::Validation(_))));
        assert!(matches!(engine.search("", 1, 101, "en"), Err(Error::Validation(_))));
        assert!(matches!(engine.search("", 1, 10, ""), Err(Error::Validation(_))));
    }

    #[test]
    fn test_suggest_tags_and_words() {
        let mut f = Fixture::new(r#"{"cat": {"ru": "кот"}}"#);
        f.add("a.jpg", &["cat", "car"], &["black cat", "concatenate"]);

        let engine = f.engine();
        assert!(engine.suggest("", 5, "en").unwrap().is_empty());
        assert_eq!(engine.suggest("#ca", 5, "en").unwrap(), vec!["#car", "#cat"]);
        assert_eq!(engine.suggest("#ca", 5, "ru").unwrap(), vec!["#car", "#кот"]);
        assert_eq!(engine.suggest("#ca", 1, "en").unwrap(), vec!["#car"]);
        assert_eq!(engine.suggest("cat", 5, "en").unwrap(), vec!["cat", "black cat"]);
        assert_eq!(engine.suggest("ca", 2, "en").unwrap().len(), 2);
    }

    #[test]
    fn test_suggest_prefix_law() {
        let mut f = Fixture::new(r#"{"cat": {"ru": "Кот"}, "dog": {"ru": "собака"}}"#);
        f.add("a.jpg", &["cat", "dog", "car", "person"], &[]);

        let engine = f.engine();
        for locale in ["en", "ru"] {
            for tag in f.indexer.tags().sorted() {
                let display = f.translations.display(tag, locale);
                let chars: Vec<char> = display.chars().collect();
                for k in 1..=chars.len() {
                    let prefix: String = chars[..k].iter().collect();
                    let suggestions = engine.suggest(&prefix, 10, locale).unwrap();
                    assert!(
                        suggestions.iter().any(|s| s == display),
                        "{:?} missing from suggestions for {:?} in {}",
                        display,
                        prefix,
                        locale
                    );
                }
            }
        }
    }

    #[test]
    fn test_list_tags() {
        let mut f = Fixture::new(r#"{"cat": {"ru": "кот"}}"#);
        f.add("a.jpg", &["dog", "cat"], &[]);

        let tags = f.engine().list_tags("ru").unwrap();
        assert_eq!(
            tags,
            vec![
                TagView { name: "кот".into(), original_name: "cat".into() },
                TagView { name: "dog".into(), original_name: "dog".into() },
            ]
        );
    }
}
