use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{IdentifierType, SourceId};
use crate::entity::SourceRecord;
use crate::error::KiraError;
use crate::fs_util::write_atomic;

/// Local response cache keyed by `(source, identifier type, value)`.
///
/// Entries are written to a temp file and renamed into place, so a reader
/// running concurrently sees either no entry or a complete one. An empty
/// record list is a valid entry: the source was asked and had nothing.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    root: Option<Utf8PathBuf>,
    stats: Arc<CacheCounters>,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub source: SourceId,
    pub identifier_type: IdentifierType,
    pub identifier_value: String,
    pub fetched_at: DateTime<Utc>,
    pub records: Vec<SourceRecord>,
}

impl ResponseCache {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self {
            root: Some(root),
            stats: Arc::new(CacheCounters::default()),
        }
    }

    /// A cache that never hits and never writes.
    pub fn disabled() -> Self {
        Self {
            root: None,
            stats: Arc::new(CacheCounters::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    pub fn root(&self) -> Option<&Utf8Path> {
        self.root.as_deref()
    }

    pub fn entry_path(
        &self,
        source: SourceId,
        kind: IdentifierType,
        value: &str,
    ) -> Option<Utf8PathBuf> {
        let root = self.root.as_ref()?;
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        let digest = hex::encode(hasher.finalize());
        Some(
            root.join("responses")
                .join(source.as_str())
                .join(format!("{digest}.json")),
        )
    }

    pub fn get(&self, source: SourceId, kind: IdentifierType, value: &str) -> Option<CacheEntry> {
        let path = self.entry_path(source, kind, value)?;
        let entry = fs::read_to_string(path.as_std_path())
            .ok()
            .and_then(|content| match serde_json::from_str::<CacheEntry>(&content) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!(path = %path, error = %err, "ignoring unreadable cache entry");
                    None
                }
            })
            .filter(|entry| entry.identifier_type == kind && entry.identifier_value == value);
        let counter = if entry.is_some() {
            &self.stats.hits
        } else {
            &self.stats.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        entry
    }

    pub fn put(
        &self,
        source: SourceId,
        kind: IdentifierType,
        value: &str,
        records: &[SourceRecord],
    ) -> Result<(), KiraError> {
        let Some(path) = self.entry_path(source, kind, value) else {
            return Ok(());
        };
        let entry = CacheEntry {
            source,
            identifier_type: kind,
            identifier_value: value.to_string(),
            fetched_at: Utc::now(),
            records: records.to_vec(),
        };
        let content = serde_json::to_vec_pretty(&entry)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        write_atomic(&path, &content)?;
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::FieldValue;

    #[test]
    fn miss_then_hit() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let cache = ResponseCache::new(root);

        assert!(cache.get(SourceId::Chebi, IdentifierType::Name, "water").is_none());
        let record = SourceRecord::new(SourceId::Chebi, "CHEBI:15377")
            .with_field("name", FieldValue::text("water"));
        cache
            .put(SourceId::Chebi, IdentifierType::Name, "water", &[record.clone()])
            .unwrap();

        let entry = cache.get(SourceId::Chebi, IdentifierType::Name, "water").unwrap();
        assert_eq!(entry.records, vec![record]);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                writes: 1
            }
        );
    }

    #[test]
    fn disabled_cache_never_hits() {
        let cache = ResponseCache::disabled();
        cache
            .put(SourceId::Pubchem, IdentifierType::Name, "water", &[])
            .unwrap();
        assert!(cache.get(SourceId::Pubchem, IdentifierType::Name, "water").is_none());
    }
}
