//! Content-hash keyed dedup index
//!
//! Backed by a sharded `DashSet`: `insert` takes the shard's write lock, so
//! check-and-mark is a single atomic step and two workers racing on the same
//! URL can never both observe it as new.

use dashmap::DashSet;

use super::canonical::{CanonicalUrl, UrlError};

/// Set of content hashes already observed by the pipeline
#[derive(Debug, Default)]
pub struct DedupIndex {
    seen: DashSet<String>,
}

impl DedupIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild an index from previously persisted hashes
    pub fn from_hashes<I, S>(hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let seen = DashSet::new();
        for hash in hashes {
            seen.insert(hash.into());
        }
        Self { seen }
    }

    /// Whether `hash` has not been marked yet
    ///
    /// Only a snapshot: use [`check_and_mark`](Self::check_and_mark) when the
    /// answer decides who processes the URL.
    #[must_use]
    pub fn is_new(&self, hash: &str) -> bool {
        !self.seen.contains(hash)
    }

    /// Mark `hash` as seen. Returns true if it was not seen before.
    pub fn mark_seen(&self, hash: &str) -> bool {
        self.seen.insert(hash.to_string())
    }

    /// Atomically test and mark; true for exactly one caller per hash
    pub fn check_and_mark(&self, hash: &str) -> bool {
        self.mark_seen(hash)
    }

    /// Canonicalize `raw` and mark it
    ///
    /// Returns `Ok(Some(url))` for the first observation and `Ok(None)` for a
    /// duplicate.
    ///
    /// # Errors
    ///
    /// Propagates [`UrlError::Malformed`] from canonicalization.
    pub fn insert_url(&self, raw: &str) -> Result<Option<CanonicalUrl>, UrlError> {
        let url = CanonicalUrl::parse(raw)?;
        if self.check_and_mark(url.content_hash()) {
            Ok(Some(url))
        } else {
            Ok(None)
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Copy of every hash, for persisting the index between runs
    #[must_use]
    pub fn hashes(&self) -> Vec<String> {
        self.seen.iter().map(|h| h.key().clone()).collect()
    }
}
