//! Offline record cache
//!
//! Local mirror of directory records, keyed by identity. Backends consult it
//! when the book is offline and prime it with full downloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::error::{ConnectorError, ConnectorResult};
use crate::record::Record;

/// Key-value store of records keyed by identity.
pub trait OfflineCache: Send + Sync {
    /// Get a record by identity.
    fn get(&self, uid: &str) -> Option<Record>;

    /// Insert or replace a record. The record must carry an identity.
    fn put(&self, record: &Record) -> ConnectorResult<()>;

    /// Remove a record, returning whether it was present.
    fn remove(&self, uid: &str) -> bool;

    /// All records matching `predicate`.
    fn query(&self, predicate: &dyn Fn(&Record) -> bool) -> Vec<Record>;

    /// Drop every record and the populated flag.
    fn clean(&self);

    /// Whether a full download has completed since the last clean.
    fn is_populated(&self) -> bool;

    /// Mark the cache as holding a full download.
    fn set_populated(&self, populated: bool);

    /// Time of the last completed full download.
    fn last_refresh(&self) -> Option<DateTime<Utc>>;

    /// Record the time of a completed full download.
    fn set_last_refresh(&self, at: DateTime<Utc>);

    /// Identities of every cached record.
    fn ids(&self) -> Vec<String> {
        self.query(&|_| true)
            .into_iter()
            .filter_map(|r| r.uid)
            .collect()
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CacheState {
    #[serde(default)]
    populated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_refresh: Option<DateTime<Utc>>,
    #[serde(default)]
    records: BTreeMap<String, Record>,
}

/// In-memory [`OfflineCache`] with JSON snapshots.
#[derive(Debug, Default)]
pub struct MemoryCache {
    state: RwLock<CacheState>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a cache from a snapshot produced by [`MemoryCache::to_json`].
    pub fn from_json(json: &str) -> ConnectorResult<Self> {
        let state: CacheState = serde_json::from_str(json)
            .map_err(|e| ConnectorError::internal_with_source("invalid cache snapshot", e))?;
        debug!(
            records = state.records.len(),
            populated = state.populated,
            "Restored offline cache snapshot"
        );
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Serialize the cache contents.
    pub fn to_json(&self) -> ConnectorResult<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        serde_json::to_string(&*state)
            .map_err(|e| ConnectorError::internal_with_source("failed to serialize cache", e))
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OfflineCache for MemoryCache {
    fn get(&self, uid: &str) -> Option<Record> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.records.get(uid).cloned()
    }

    fn put(&self, record: &Record) -> ConnectorResult<()> {
        let uid = record
            .uid
            .clone()
            .ok_or_else(|| ConnectorError::internal("cannot cache a record without identity"))?;
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.records.insert(uid, record.clone());
        Ok(())
    }

    fn remove(&self, uid: &str) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.records.remove(uid).is_some()
    }

    fn query(&self, predicate: &dyn Fn(&Record) -> bool) -> Vec<Record> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .records
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect()
    }

    fn clean(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        debug!(records = state.records.len(), "Cleaning offline cache");
        state.records.clear();
        state.populated = false;
    }

    fn is_populated(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .populated
    }

    fn set_populated(&self, populated: bool) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .populated = populated;
    }

    fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .last_refresh
    }

    fn set_last_refresh(&self, at: DateTime<Utc>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .last_refresh = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{FieldId, FieldValue};

    fn jane() -> Record {
        Record::contact()
            .with_uid("uid=jane,dc=example,dc=com")
            .with_text(FieldId::FullName, "Jane Doe")
            .with(FieldId::Photo, FieldValue::Bytes(vec![1, 2, 3]))
    }

    #[test]
    fn test_put_get_remove() {
        let cache = MemoryCache::new();
        cache.put(&jane()).unwrap();

        assert_eq!(cache.get("uid=jane,dc=example,dc=com"), Some(jane()));
        assert!(cache.remove("uid=jane,dc=example,dc=com"));
        assert!(!cache.remove("uid=jane,dc=example,dc=com"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_put_requires_identity() {
        let cache = MemoryCache::new();
        assert!(cache.put(&Record::contact()).is_err());
    }

    #[test]
    fn test_query_and_ids() {
        let cache = MemoryCache::new();
        cache.put(&jane()).unwrap();
        cache
            .put(
                &Record::contact()
                    .with_uid("uid=john,dc=example,dc=com")
                    .with_text(FieldId::FullName, "John Roe"),
            )
            .unwrap();

        let hits = cache.query(&|r| r.text(FieldId::FullName) == Some("John Roe"));
        assert_eq!(hits.len(), 1);
        assert_eq!(cache.ids().len(), 2);
    }

    #[test]
    fn test_clean_resets_populated() {
        let cache = MemoryCache::new();
        cache.put(&jane()).unwrap();
        cache.set_populated(true);

        cache.clean();
        assert!(!cache.is_populated());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_json_snapshot() {
        let cache = MemoryCache::new();
        cache.put(&jane()).unwrap();
        cache.set_populated(true);
        let now = Utc::now();
        cache.set_last_refresh(now);

        let restored = MemoryCache::from_json(&cache.to_json().unwrap()).unwrap();
        assert!(restored.is_populated());
        assert_eq!(restored.last_refresh(), Some(now));
        assert_eq!(restored.get("uid=jane,dc=example,dc=com"), Some(jane()));
    }
}
