//! Content-hash deduplication table, persisted as `dedup.json`

use crate::error::Result;
use crate::persist;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// First sighting of a content hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupEntry {
    pub first_source_tag: String,
    pub first_seen_at: DateTime<Utc>,
    #[serde(default)]
    pub user_metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DedupDocument {
    #[serde(default)]
    hashes: BTreeMap<String, DedupEntry>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    pub unique_hashes: usize,
    pub checks: u64,
    pub duplicates_found: u64,
    pub pending_flush: usize,
}

pub struct DedupStore {
    path: PathBuf,
    flush_every: usize,
    entries: HashMap<String, DedupEntry>,
    pending: usize,
    checks: u64,
    duplicates: u64,
}

impl DedupStore {
    /// Load `path`, archiving it and starting empty if it is corrupt
    pub fn open(path: &Path, flush_every: usize) -> Self {
        let loaded = persist::load_or_archive::<DedupDocument>(path);
        Self::from_document(path, flush_every, loaded.value)
    }

    /// Load for inspection only; a corrupt file stays where it is
    pub fn open_read_only(path: &Path) -> Self {
        Self::from_document(path, 1, persist::load_or_default(path))
    }

    fn from_document(path: &Path, flush_every: usize, doc: DedupDocument) -> Self {
        debug!("Loaded {} dedup hashes from {:?}", doc.hashes.len(), path);
        Self {
            path: path.to_path_buf(),
            flush_every: flush_every.max(1),
            entries: doc.hashes.into_iter().collect(),
            pending: 0,
            checks: 0,
            duplicates: 0,
        }
    }

    pub fn is_duplicate(&self, content_hash: &str) -> bool {
        self.entries.contains_key(content_hash)
    }

    /// Insert a hash; no-op if it is already known
    pub fn register(
        &mut self,
        content_hash: &str,
        source_tag: &str,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<()> {
        if self.entries.contains_key(content_hash) {
            return Ok(());
        }
        self.entries.insert(
            content_hash.to_string(),
            DedupEntry {
                first_source_tag: source_tag.to_string(),
                first_seen_at: Utc::now(),
                user_metadata: metadata,
            },
        );
        self.pending += 1;
        if self.pending >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    /// Test-and-set: true if the hash was newly inserted
    pub fn check_and_add(
        &mut self,
        content_hash: &str,
        source_tag: &str,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<bool> {
        self.checks += 1;
        if self.is_duplicate(content_hash) {
            self.duplicates += 1;
            return Ok(false);
        }
        self.register(content_hash, source_tag, metadata)?;
        Ok(true)
    }

    /// Forget a hash registered earlier in this run whose record could not
    /// be persisted, so a later cycle can retry it
    pub fn release(&mut self, content_hash: &str) -> bool {
        let removed = self.entries.remove(content_hash).is_some();
        if removed {
            debug!("Released dedup hash {}", content_hash);
            self.pending += 1;
        }
        removed
    }

    pub fn get(&self, content_hash: &str) -> Option<&DedupEntry> {
        self.entries.get(content_hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            unique_hashes: self.entries.len(),
            checks: self.checks,
            duplicates_found: self.duplicates,
            pending_flush: self.pending,
        }
    }

    /// Write the whole table if anything changed since the last flush
    pub fn flush(&mut self) -> Result<()> {
        if self.pending == 0 && self.path.exists() {
            return Ok(());
        }
        let doc = DedupDocument {
            hashes: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            last_updated: Some(Utc::now()),
        };
        persist::save_atomic(&self.path, &doc)?;
        info!("Flushed {} dedup hashes to {:?}", doc.hashes.len(), self.path);
        self.pending = 0;
        Ok(())
    }
}
