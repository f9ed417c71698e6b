//! Per-request metadata bag.
//!
//! A `Meta` is a handle to a shared map. Cloning the handle does not copy the
//! data: a request, every response produced from it, and any follow-up request
//! built with [`Request::with_meta`](crate::request::Request::with_meta) all see
//! the same entries. Use [`Meta::fork`] to start an independent copy.
//!
//! Entries are guarded per key, so concurrent handlers may mutate one bag, but
//! read-modify-write sequences spanning several keys must be serialized by the
//! caller.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};

#[derive(Clone, Default)]
pub struct Meta {
    entries: Arc<DashMap<String, Value>>,
}

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true when both handles point at the same bag.
    pub fn ptr_eq(&self, other: &Meta) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    /// Copies the entries into a new, unshared bag.
    pub fn fork(&self) -> Meta {
        self.snapshot().into()
    }

    /// Copies the entries into a plain JSON map.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl From<Map<String, Value>> for Meta {
    fn from(map: Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Meta {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let meta = Meta::new();
        for (key, value) in iter {
            meta.insert(key, value);
        }
        meta
    }
}

impl fmt::Debug for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|e| (e.key().clone(), e.value().clone())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clones_share_entries() {
        let meta = Meta::new();
        let alias = meta.clone();
        alias.insert("seed", 7);
        assert_eq!(meta.get("seed"), Some(json!(7)));
        assert!(meta.ptr_eq(&alias));
    }

    #[test]
    fn fork_detaches() {
        let meta: Meta = [("depth", json!(1))].into_iter().collect();
        let forked = meta.fork();
        forked.insert("depth", 2);
        assert_eq!(meta.get("depth"), Some(json!(1)));
        assert!(!meta.ptr_eq(&forked));
    }
}
