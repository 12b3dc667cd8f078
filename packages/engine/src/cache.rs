//! Shared cache for service and external source lookups
//!
//! Nested law evaluations and remote table lookups are the expensive
//! resolutions. Their results are cached under a key built from the lookup
//! path, the resolved parameters, the reference date and a [`CacheScope`]
//! covering the data the lookup reads (overwrites, source tables, claims),
//! so repeated references within (and across) evaluations do not recompute
//! them and evaluations over different data never share an entry.
//! The cache is safe to share between concurrent evaluations.

use crate::types::{Record, Value};
use chrono::NaiveDate;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// A cached resolution
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: Value,
    pub missing_required: bool,
}

/// Concurrency-safe map from lookup key to resolved value
#[derive(Debug, Default)]
pub struct ValueCache {
    entries: DashMap<String, CachedValue>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<CachedValue> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, key: String, value: CachedValue) {
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Data a lookup depends on besides its path, parameters and date
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheScope<'a> {
    /// What-if overrides of the evaluation
    pub overwrite: Option<&'a BTreeMap<String, Record>>,
    /// Fingerprint of the source tables the lookup reads
    pub sources: Option<&'a str>,
    /// Changes whenever registered claims change
    pub generation: u64,
}

impl CacheScope<'_> {
    fn digest(&self) -> Option<String> {
        let overwrite = self.overwrite.filter(|o| !o.is_empty());
        if overwrite.is_none() && self.sources.is_none() && self.generation == 0 {
            return None;
        }
        // BTreeMap serialization is ordered, so equal scopes hash equally
        serde_json::to_vec(&(overwrite, self.sources, self.generation))
            .map(|bytes| hex::encode(Sha256::digest(bytes)))
            .ok()
    }
}

/// Build the cache key `path(k1:v1,k2:v2,date)`.
///
/// Approved-only lookups get an `#approved` suffix, and a non-empty
/// [`CacheScope`] is hashed into a `#<sha256>` suffix.
pub fn cache_key(
    path: &str,
    parameters: &Record,
    reference_date: NaiveDate,
    scope: CacheScope<'_>,
    approved: bool,
) -> String {
    let params = parameters
        .iter()
        .map(|(k, v)| format!("{}:{}", k, v))
        .collect::<Vec<_>>()
        .join(",");
    let mut key = format!("{}({},{})", path, params, reference_date.format("%Y-%m-%d"));
    if approved {
        key.push_str("#approved");
    }
    if let Some(digest) = scope.digest() {
        key.push('#');
        key.push_str(&digest);
    }
    key
}
