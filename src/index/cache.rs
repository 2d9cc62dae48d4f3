use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use tracing::{info, warn};

use crate::database::models::Tag;
use crate::database::repo::{Repository, Writer};
use crate::error::{Error, Result};

/// What the cache does when the store cannot be read during initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    /// Log, keep serving the names already known, and retry on the next access.
    #[default]
    FailOpen,
    /// Return the store error to the caller.
    FailClosed,
}

impl FromStr for CachePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "fail-open" => Ok(CachePolicy::FailOpen),
            "fail-closed" => Ok(CachePolicy::FailClosed),
            other => Err(Error::validation(format!("unknown cache policy `{}`", other))),
        }
    }
}

impl fmt::Display for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachePolicy::FailOpen => f.write_str("fail-open"),
            CachePolicy::FailClosed => f.write_str("fail-closed"),
        }
    }
}

/// In-memory mirror of the canonical tag names in the store.
#[derive(Debug, Default)]
pub struct TagCache {
    names: HashSet<String>,
    initialized: bool,
    policy: CachePolicy,
}

impl TagCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    #[cfg(test)]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Loads every tag name from the store on the first successful call.
    pub fn ensure_initialized(&mut self, repo: &Repository) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        match repo.tag_names() {
            Ok(names) => {
                self.names.extend(names);
                self.initialized = true;
                info!("Tag cache initialized with {} tags", self.names.len());
                Ok(())
            }
            Err(e) if self.policy == CachePolicy::FailOpen => {
                warn!(
                    "Tag cache could not load from store, serving {} known tags: {}",
                    self.names.len(),
                    e
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&Tag::normalize(name))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// All cached names in sorted order.
    pub fn sorted(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Up to `limit` cached names starting with `prefix`, alphabetically first.
    pub fn prefix_match(&self, prefix: &str, limit: usize) -> Vec<&str> {
        let prefix = prefix.to_lowercase();
        let mut hits: Vec<&str> = self
            .names
            .iter()
            .filter(|name| name.starts_with(&prefix))
            .map(String::as_str)
            .collect();
        hits.sort_unstable();
        hits.truncate(limit);
        hits
    }

    /// Creates the tag in store and cache as one unit. Existing tags are returned unchanged.
    pub fn add(&mut self, repo: &mut Repository, name: &str) -> Result<Tag> {
        self.ensure_initialized(repo)?;
        let mut staging = self.stage();
        let writer = repo.writer()?;
        let tag = staging.resolve(&writer, name)?;
        writer.commit()?;
        staging.commit();
        Ok(tag)
    }

    /// Opens a staging scope for tags created inside one store transaction.
    pub fn stage(&mut self) -> Staging<'_> {
        Staging {
            cache: self,
            added: Vec::new(),
            committed: false,
        }
    }
}

/// Cache additions tied to an open store transaction.
///
/// Dropping without `commit` removes every name added through this scope, matching the
/// store rollback of the transaction they were created in.
pub struct Staging<'c> {
    cache: &'c mut TagCache,
    added: Vec<String>,
    committed: bool,
}

impl<'c> Staging<'c> {
    /// Looks a tag up through the cache, creating it in `writer` when absent.
    pub fn resolve(&mut self, writer: &Writer<'_>, name: &str) -> Result<Tag> {
        let name = Tag::normalize(name);
        if name.is_empty() {
            return Err(Error::validation("tag name is empty"));
        }

        if self.cache.names.contains(&name) {
            if let Some(tag) = writer.find_tag(&name)? {
                return Ok(tag);
            }
            warn!("Cached tag `{}` missing from store, recreating", name);
        }

        let tag = writer.insert_tag(&name)?;
        if self.cache.names.insert(name.clone()) {
            self.added.push(name);
        }
        Ok(tag)
    }

    pub fn added(&self) -> &[String] {
        &self.added
    }

    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Staging<'_> {
    fn drop(&mut self) {
        if self.committed || self.added.is_empty() {
            return;
        }
        warn!("Rolling back {} staged tags", self.added.len());
        for name in self.added.drain(..) {
            self.cache.names.remove(&name);
        }
    }
}
