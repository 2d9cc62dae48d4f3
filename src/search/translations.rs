use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::ops::Bound;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::database::models::Tag;
use crate::error::{Error, Result};

/// Canonical tag name to locale-specific display names.
///
/// Read-only once loaded. Keeps a per-locale reverse index from the lower-cased display
/// name back to the canonical tag, which is why two tags may not share a display name
/// in one locale.
#[derive(Debug, Default)]
pub struct TranslationTable {
    entries: HashMap<String, HashMap<String, String>>,
    reverse: HashMap<String, BTreeMap<String, String>>,
}

impl TranslationTable {
    /// Loads `{ "person": { "en": "person", "ru": "человек" }, ... }`.
    /// A missing file yields an empty table.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No tag translations at {:?}, display names fall back to tag names", path);
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Translations(format!("failed to read {:?}: {}", path, e)))?;
        let entries: HashMap<String, HashMap<String, String>> = serde_json::from_str(&raw)
            .map_err(|e| Error::Translations(format!("malformed {:?}: {}", path, e)))?;

        let table = Self::from_entries(entries)?;
        info!("Loaded {} tag translations", table.entries.len());
        Ok(table)
    }

    pub fn from_entries(raw: HashMap<String, HashMap<String, String>>) -> Result<Self> {
        let mut entries: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut reverse: HashMap<String, BTreeMap<String, String>> = HashMap::new();

        // Sorted so that collision errors are reported the same way on every run.
        let mut raw: Vec<_> = raw.into_iter().collect();
        raw.sort_by(|a, b| a.0.cmp(&b.0));

        for (tag, locales) in raw {
            let canonical = Tag::normalize(&tag);
            if entries.contains_key(&canonical) {
                return Err(Error::Translations(format!(
                    "tag `{}` is listed more than once",
                    canonical
                )));
            }

            for (locale, display) in &locales {
                let folded = display.to_lowercase();
                let index = reverse.entry(locale.clone()).or_default();
                if let Some(other) = index.get(&folded) {
                    return Err(Error::Translations(format!(
                        "`{}` and `{}` both display as `{}` in locale `{}`",
                        other, canonical, display, locale
                    )));
                }
                index.insert(folded, canonical.clone());
            }
            entries.insert(canonical, locales);
        }

        debug!("Translation locales: {:?}", reverse.keys().collect::<Vec<_>>());
        Ok(Self { entries, reverse })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Display name of a canonical tag, or the tag itself when untranslated.
    pub fn display<'a>(&'a self, tag: &'a str, locale: &str) -> &'a str {
        self.entries
            .get(tag)
            .and_then(|locales| locales.get(locale))
            .map(String::as_str)
            .unwrap_or(tag)
    }

    /// The canonical tag a localized string refers to.
    ///
    /// A translated display name wins when its tag is known to `is_known`; otherwise the
    /// lower-cased input is taken as the canonical name itself. When the input is also a
    /// known untranslated tag that displays as itself, that tag wins over the translation.
    pub fn resolve(&self, query: &str, locale: &str, is_known: impl Fn(&str) -> bool) -> String {
        let folded = query.to_lowercase();
        let translated = self
            .reverse
            .get(locale)
            .and_then(|index| index.get(&folded))
            .filter(|canonical| is_known(canonical));

        match translated {
            Some(canonical)
                if *canonical != folded && self.displays_as_itself(&folded, locale, &is_known) =>
            {
                warn!(
                    "`{}` in locale `{}` is both a tag and the display name of `{}`, using the tag",
                    folded, locale, canonical
                );
                folded
            }
            Some(canonical) => canonical.clone(),
            None => folded,
        }
    }

    fn displays_as_itself(&self, tag: &str, locale: &str, is_known: impl Fn(&str) -> bool) -> bool {
        is_known(tag) && self.display(tag, locale).to_lowercase() == tag
    }

    /// Canonical tags whose display name in `locale` starts with the lower-cased `prefix`,
    /// in display-name order.
    pub fn display_prefix_matches<'a>(
        &'a self,
        locale: &str,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.reverse
            .get(locale)
            .into_iter()
            .flat_map(move |index| {
                index
                    .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
                    .take_while(move |(display, _)| display.starts_with(prefix))
                    .map(|(_, canonical)| canonical.as_str())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn table(json: &str) -> Result<TranslationTable> {
        let raw: HashMap<String, HashMap<String, String>> = serde_json::from_str(json).unwrap();
        TranslationTable::from_entries(raw)
    }

    #[test]
    fn test_display_falls_back_to_tag() -> Result<()> {
        let t = table(r#"{"cat": {"ru": "кот"}}"#)?;
        assert_eq!(t.display("cat", "ru"), "кот");
        assert_eq!(t.display("cat", "en"), "cat");
        assert_eq!(t.display("dog", "ru"), "dog");
        Ok(())
    }

    #[test]
    fn test_resolve_uses_known_translations_only() -> Result<()> {
        let t = table(r#"{"cat": {"ru": "Кот"}}"#)?;
        assert_eq!(t.resolve("кОт", "ru", |name| name == "cat"), "cat");
        assert_eq!(t.resolve("кот", "ru", |_| false), "кот");
        assert_eq!(t.resolve("Dog", "ru", |_| true), "dog");
        assert_eq!(t.resolve("кот", "en", |_| true), "кот");
        Ok(())
    }

    #[test]
    fn test_untranslated_tag_wins_over_colliding_translation() -> Result<()> {
        let t = table(r#"{"bat": {"en": "cat", "ru": "летучая мышь"}}"#)?;
        let both = |name: &str| name == "cat" || name == "bat";

        assert_eq!(t.resolve("Cat", "en", both), "cat");
        assert_eq!(t.resolve("cat", "en", |name| name == "bat"), "bat");
        assert_eq!(t.resolve("bat", "en", both), "bat");
        assert_eq!(t.resolve("летучая мышь", "ru", both), "bat");
        Ok(())
    }

    #[test]
    fn test_collisions_are_rejected() {
        let err = table(r#"{"cat": {"ru": "кот"}, "kitten": {"ru": "Кот"}}"#).unwrap_err();
        assert!(matches!(err, Error::Translations(_)));

        let err = table(r#"{"Cat": {"ru": "кот"}, "cat": {"de": "Katze"}}"#).unwrap_err();
        assert!(matches!(err, Error::Translations(_)));
    }

    #[test]
    fn test_display_prefix_matches() -> Result<()> {
        let t =
            table(r#"{"cat": {"ru": "кот"}, "whale": {"ru": "кит"}, "dog": {"ru": "собака"}}"#)?;
        let hits: Vec<_> = t.display_prefix_matches("ru", "к").collect();
        assert_eq!(hits, vec!["whale", "cat"]);
        assert_eq!(t.display_prefix_matches("ru", "ко").collect::<Vec<_>>(), vec!["cat"]);
        assert_eq!(t.display_prefix_matches("jp", "к").count(), 0);
        Ok(())
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        let missing = TranslationTable::load(&dir.path().join("absent.json"))?;
        assert!(missing.is_empty());

        let path = dir.path().join("tag_translations.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, r#"{{"person": {{"en": "person", "ru": "человек"}}}}"#).unwrap();

        let loaded = TranslationTable::load(&path)?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.display("person", "ru"), "человек");

        fs::write(&path, "not json").unwrap();
        assert!(matches!(TranslationTable::load(&path), Err(Error::Translations(_))));
        Ok(())
    }
}
