//! Process-wide template cache: signature -> (cache key -> template).
//!
//! Entries are never evicted; `clear` is the only way to drop them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::errors::PrepqResult;
use crate::lazy::context::ValueContext;
use crate::query::builder::{BuiltQuery, Param};
use crate::query::equivalence::MappingFailure;
use crate::query::normalize::{normalize, Prepared};
use crate::query::signature::{CacheKey, Signature};

/// Command text and parameter slots extracted from a dry construction run.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedTemplate {
    command: String,
    params: Vec<Param>,
}

impl CachedTemplate {
    pub fn from_built(query: BuiltQuery) -> Self {
        Self {
            command: query.command,
            params: query.params,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Substitute the real values from `context`. The template is untouched.
    pub fn normalize(&self, context: &ValueContext) -> PrepqResult<Prepared> {
        normalize(&self.command, &self.params, context)
    }
}

#[derive(Clone, Debug)]
pub enum CacheEntry {
    Template(Arc<CachedTemplate>),
    /// Verification failed for this key; serve real results without retrying.
    Uncacheable(MappingFailure),
}

/// Snapshot of cache contents and counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub signatures: usize,
    pub templates: usize,
    pub uncacheable: usize,
    pub hits: u64,
    pub misses: u64,
    pub fallbacks: u64,
    pub bypassed: u64,
}

impl CacheStats {
    pub fn to_json(&self) -> PrepqResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Default)]
pub struct TemplateCache {
    entries: RwLock<IndexMap<Signature, IndexMap<CacheKey, CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    fallbacks: AtomicU64,
    bypassed: AtomicU64,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, signature: &Signature, key: &CacheKey) -> Option<CacheEntry> {
        let entries = self.entries.read();
        entries.get(signature).and_then(|keys| keys.get(key)).cloned()
    }

    pub fn get(&self, signature: &Signature, key: &CacheKey) -> Option<Arc<CachedTemplate>> {
        match self.lookup(signature, key) {
            Some(CacheEntry::Template(template)) => Some(template),
            _ => None,
        }
    }

    /// Store `template`, replacing whatever was cached for the key.
    pub fn store(
        &self,
        signature: Signature,
        key: CacheKey,
        template: CachedTemplate,
    ) -> Arc<CachedTemplate> {
        let template = Arc::new(template);
        self.entries
            .write()
            .entry(signature)
            .or_default()
            .insert(key, CacheEntry::Template(Arc::clone(&template)));
        template
    }

    pub fn mark_uncacheable(&self, signature: Signature, key: CacheKey, failure: MappingFailure) {
        self.entries
            .write()
            .entry(signature)
            .or_default()
            .insert(key, CacheEntry::Uncacheable(failure));
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Number of distinct signatures seen.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Number of keys cached under `signature`.
    pub fn entries_for(&self, signature: &Signature) -> usize {
        self.entries.read().get(signature).map_or(0, IndexMap::len)
    }

    pub fn template_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .flat_map(IndexMap::values)
            .filter(|entry| matches!(entry, CacheEntry::Template(_)))
            .count()
    }

    pub fn signatures(&self) -> Vec<Signature> {
        self.entries.read().keys().cloned().collect()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bypass(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read();
        let (templates, uncacheable) = entries
            .values()
            .flat_map(IndexMap::values)
            .fold((0, 0), |(t, u), entry| match entry {
                CacheEntry::Template(_) => (t + 1, u),
                CacheEntry::Uncacheable(_) => (t, u + 1),
            });
        CacheStats {
            signatures: entries.len(),
            templates,
            uncacheable,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
        }
    }
}
