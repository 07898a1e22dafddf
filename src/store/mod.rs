//! Tiered object store.
//!
//! One JSON file per record under `store/<tier>/<source_tag>/`. Hot files are
//! plain `.json`; warm and cold hold `.json.gz`. `age` only ever moves an
//! object forward, writing its successor before unlinking the original.

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::models::{Record, Tier};
use crate::persist;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const TEMP_SUFFIXES: &[&str] = &[".tmp", ".temp"];
const JUNK_FILES: &[&str] = &[".DS_Store", "Thumbs.db"];

/// Result of a `put`
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub path: PathBuf,
    pub bytes: u64,
    /// False when the hash was already stored in some tier
    pub created: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgeReport {
    pub moved_to_warm: usize,
    pub moved_to_cold: usize,
    pub bytes_saved: u64,
    /// Objects left in place because a transition failed
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub removed: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TierUsage {
    pub files: usize,
    pub bytes: u64,
    /// Logical size; read from the gzip trailer for compressed tiers
    pub uncompressed_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreReport {
    pub tiers: BTreeMap<Tier, TierUsage>,
    pub total_files: usize,
    pub total_bytes: u64,
    /// On-disk bytes over logical bytes; 1.0 for an empty store
    pub compression_ratio: f64,
}

pub struct TieredStore {
    root: PathBuf,
    config: StoreConfig,
}

/// Source tags become directory names; keep them to a safe alphabet
pub fn sanitize_component(tag: &str) -> String {
    let cleaned: String = tag
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}

fn file_name(hash: &str, tier: Tier) -> String {
    if tier.is_compressed() {
        format!("{}.json.gz", hash)
    } else {
        format!("{}.json", hash)
    }
}

fn is_gz(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "gz")
}

fn is_object(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    name.ends_with(".json") || name.ends_with(".json.gz")
}

fn modified(path: &Path) -> Result<SystemTime> {
    Ok(fs::metadata(path)?.modified()?)
}

fn set_modified(path: &Path, time: SystemTime) -> Result<()> {
    File::options().write(true).open(path)?.set_modified(time)?;
    Ok(())
}

fn gzip_into(bytes: &[u8], target: &Path) -> Result<()> {
    let file = File::create(target)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()?.sync_all()?;
    Ok(())
}

/// ISIZE: the last four bytes of a gzip member, little endian
fn gzip_isize(path: &Path) -> Result<u64> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() < 4 {
        return Ok(0);
    }
    file.seek(SeekFrom::End(-4))?;
    let mut trailer = [0u8; 4];
    file.read_exact(&mut trailer)?;
    Ok(u32::from_le_bytes(trailer) as u64)
}

fn read_object(path: &Path) -> Result<Vec<u8>> {
    let raw = fs::read(path)?;
    if !is_gz(path) {
        return Ok(raw);
    }
    let mut out = Vec::new();
    GzDecoder::new(raw.as_slice()).read_to_end(&mut out)?;
    Ok(out)
}

fn write_object(bytes: &[u8], target: &Path) -> Result<()> {
    let tmp = persist::tmp_path(target);
    let written = if is_gz(target) {
        gzip_into(bytes, &tmp)
    } else {
        fs::write(&tmp, bytes).map_err(Error::from)
    };
    if let Err(e) = written.and_then(|_| fs::rename(&tmp, target).map_err(Error::from)) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

impl TieredStore {
    pub fn new(root: &Path, config: &StoreConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            config: config.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tier_dir(&self, tier: Tier) -> PathBuf {
        self.root.join(tier.as_str())
    }

    pub fn path_for(&self, tier: Tier, source_tag: &str, hash: &str) -> PathBuf {
        self.tier_dir(tier)
            .join(sanitize_component(source_tag))
            .join(file_name(&sanitize_component(hash), tier))
    }

    /// Find the tier and file holding `hash`, searching hot, warm, cold
    pub fn locate(&self, hash: &str) -> Option<(Tier, PathBuf)> {
        let hash = sanitize_component(hash);
        for tier in Tier::ALL {
            let Ok(entries) = fs::read_dir(self.tier_dir(tier)) else {
                continue;
            };
            let mut dirs: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            dirs.sort();
            for dir in dirs {
                let candidate = dir.join(file_name(&hash, tier));
                if candidate.is_file() {
                    return Some((tier, candidate));
                }
            }
        }
        None
    }

    /// Write `record` into the hot tier unless its hash is already stored
    pub fn put(&self, record: &Record) -> Result<StoredObject> {
        if let Some((tier, path)) = self.locate(&record.content_hash) {
            debug!("{} already stored in {} tier", record.content_hash, tier);
            let bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            return Ok(StoredObject {
                path,
                bytes,
                created: false,
            });
        }

        let path = self.path_for(Tier::Hot, &record.source_tag, &record.content_hash);
        let mut stored = record.clone();
        stored.tier = Tier::Hot;
        stored.storage_path = Some(path.clone());

        let write = || -> Result<u64> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_vec_pretty(&stored)?;
            write_object(&json, &path)?;
            Ok(json.len() as u64)
        };
        let bytes = write().map_err(|e| {
            Error::StoreTransient(format!("{}: {}", path.display(), e))
        })?;

        Ok(StoredObject {
            path,
            bytes,
            created: true,
        })
    }

    fn read_at(&self, tier: Tier, path: &Path) -> Result<Record> {
        let bytes = read_object(path)?;
        let mut record: Record = serde_json::from_slice(&bytes)?;
        record.tier = tier;
        record.storage_path = Some(path.to_path_buf());
        Ok(record)
    }

    /// Load a record from whichever tier holds it
    pub fn get(&self, hash: &str) -> Result<Record> {
        let (tier, path) = self
            .locate(hash)
            .ok_or_else(|| Error::NotFound(format!("content hash {}", hash)))?;
        self.read_at(tier, &path)
    }

    /// Replace a stored record in place, keeping its tier and mtime
    pub fn rewrite(&self, record: &Record) -> Result<()> {
        let (_, path) = self
            .locate(&record.content_hash)
            .ok_or_else(|| Error::NotFound(format!("content hash {}", record.content_hash)))?;
        let mtime = modified(&path)?;

        // The stored copy keeps the fields it was written with
        let mut stored = record.clone();
        let original: Record = serde_json::from_slice(&read_object(&path)?)?;
        stored.tier = original.tier;
        stored.storage_path = original.storage_path;

        write_object(&serde_json::to_vec_pretty(&stored)?, &path)?;
        set_modified(&path, mtime)
    }

    /// Every stored object, hot first
    pub fn object_paths(&self) -> Vec<(Tier, PathBuf)> {
        let mut out = Vec::new();
        for tier in Tier::ALL {
            let mut paths: Vec<PathBuf> = WalkDir::new(self.tier_dir(tier))
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| is_object(p))
                .collect();
            paths.sort();
            out.extend(paths.into_iter().map(|p| (tier, p)));
        }
        out
    }

    /// Iterate every readable record; unreadable files are logged and skipped
    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        self.object_paths()
            .into_iter()
            .filter_map(move |(tier, path)| match self.read_at(tier, &path) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping unreadable object {:?}: {}", path, e);
                    None
                }
            })
    }

    /// Move objects older than the configured thresholds one tier forward
    pub fn age(&self, now: DateTime<Utc>) -> AgeReport {
        let mut report = AgeReport::default();

        for (tier, path) in self.object_paths() {
            if tier == Tier::Cold {
                continue;
            }
            let threshold_days = match tier {
                Tier::Hot => self.config.hot_to_warm_days,
                _ => self.config.warm_to_cold_days,
            };
            let mtime = match modified(&path) {
                Ok(t) => t,
                Err(e) => {
                    report.failures.push(format!("{}: {}", path.display(), e));
                    continue;
                }
            };
            let age = now - DateTime::<Utc>::from(mtime);
            if age.num_seconds() <= threshold_days as i64 * 86_400 {
                continue;
            }

            let next = match tier {
                Tier::Hot => Tier::Warm,
                _ => Tier::Cold,
            };
            match self.transition(&path, next, mtime) {
                Ok(saved) => {
                    report.bytes_saved += saved;
                    match next {
                        Tier::Warm => report.moved_to_warm += 1,
                        _ => report.moved_to_cold += 1,
                    }
                    // An old enough hot object continues on to cold
                    if next == Tier::Warm
                        && age.num_seconds() > self.config.warm_to_cold_days as i64 * 86_400
                    {
                        let warm = self.successor_path(&path, next);
                        match self.transition(&warm, Tier::Cold, mtime) {
                            Ok(_) => report.moved_to_cold += 1,
                            Err(e) => report.failures.push(format!("{}: {}", warm.display(), e)),
                        }
                    }
                }
                Err(e) => {
                    warn!("Leaving {:?} in {} tier: {}", path, tier, e);
                    report.failures.push(format!("{}: {}", path.display(), e));
                }
            }
        }

        if report.moved_to_warm + report.moved_to_cold > 0 {
            info!(
                "Aged store: {} to warm, {} to cold, {} bytes saved",
                report.moved_to_warm, report.moved_to_cold, report.bytes_saved
            );
        }
        report
    }

    fn successor_path(&self, path: &Path, to: Tier) -> PathBuf {
        let tag_dir = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let hash = name.trim_end_matches(".gz").trim_end_matches(".json");
        self.tier_dir(to).join(tag_dir).join(file_name(hash, to))
    }

    /// Write the successor, restore the mtime, then unlink the original.
    /// Returns bytes saved by compression.
    fn transition(&self, path: &Path, to: Tier, mtime: SystemTime) -> Result<u64> {
        let target = self.successor_path(path, to);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let before = fs::metadata(path)?.len();

        if is_gz(path) {
            let tmp = persist::tmp_path(&target);
            fs::copy(path, &tmp)?;
            if let Err(e) = fs::rename(&tmp, &target) {
                let _ = fs::remove_file(&tmp);
                return Err(e.into());
            }
        } else {
            write_object(&fs::read(path)?, &target)?;
        }
        set_modified(&target, mtime)?;
        fs::remove_file(path)?;

        let after = fs::metadata(&target)?.len();
        debug!("Moved {:?} -> {:?}", path, target);
        Ok(before.saturating_sub(after))
    }

    /// Remove leftover temp files and OS junk anywhere under the store
    pub fn sweep_temp(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let junk: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                let name = e.file_name().to_string_lossy();
                TEMP_SUFFIXES.iter().any(|s| name.ends_with(s)) || JUNK_FILES.contains(&name.as_ref())
            })
            .map(|e| e.into_path())
            .collect();

        for path in junk {
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            match fs::remove_file(&path) {
                Ok(()) => {
                    report.removed += 1;
                    report.bytes += size;
                }
                Err(e) => warn!("Failed to remove {:?}: {}", path, e),
            }
        }
        if report.removed > 0 {
            info!("Swept {} temp files ({} bytes)", report.removed, report.bytes);
        }
        report
    }

    pub fn report(&self) -> StoreReport {
        let mut report = StoreReport::default();
        for tier in Tier::ALL {
            report.tiers.insert(tier, TierUsage::default());
        }

        for (tier, path) in self.object_paths() {
            let Ok(meta) = fs::metadata(&path) else {
                continue;
            };
            let logical = if is_gz(&path) {
                gzip_isize(&path).unwrap_or(0)
            } else {
                meta.len()
            };
            let usage = report.tiers.entry(tier).or_default();
            usage.files += 1;
            usage.bytes += meta.len();
            usage.uncompressed_bytes += logical;
        }

        report.total_files = report.tiers.values().map(|u| u.files).sum();
        report.total_bytes = report.tiers.values().map(|u| u.bytes).sum();
        let logical: u64 = report.tiers.values().map(|u| u.uncompressed_bytes).sum();
        report.compression_ratio = if logical == 0 {
            1.0
        } else {
            report.total_bytes as f64 / logical as f64
        };
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{content_hash, RecordStub};
    use chrono::Duration;
    use tempfile::TempDir;

    fn record(tag: &str, text: &str) -> Record {
        RecordStub::new(tag, text)
            .with_field("title", text)
            .into_record("document", &[], Utc::now())
    }

    fn store(tmp: &TempDir) -> TieredStore {
        TieredStore::new(&tmp.path().join("store"), &StoreConfig::default())
    }

    fn backdate(path: &Path, days: i64) {
        let when = SystemTime::now() - std::time::Duration::from_secs(days as u64 * 86_400);
        set_modified(path, when).unwrap();
    }

    #[test]
    fn test_put_get_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let r = record("arxiv", "alpha");

        let stored = store.put(&r).unwrap();
        assert!(stored.created);
        assert_eq!(
            stored.path,
            tmp.path().join("store/hot/arxiv").join(format!("{}.json", r.content_hash))
        );

        let again = store.put(&r).unwrap();
        assert!(!again.created);
        assert_eq!(again.path, stored.path);

        let loaded = store.get(&r.content_hash).unwrap();
        assert_eq!(loaded.payload, r.payload);
        assert_eq!(loaded.tier, Tier::Hot);
        assert_eq!(loaded.storage_path, Some(stored.path));

        assert!(matches!(store.get(&content_hash("missing")), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("arxiv"), "arxiv");
        assert_eq!(sanitize_component("../etc"), ".._etc");
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component("my source"), "my_source");
    }

    #[test]
    fn test_age_compresses_old_hot_objects() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let old = record("s1", "old");
        let fresh = record("s1", "fresh");
        let old_path = store.put(&old).unwrap().path;
        store.put(&fresh).unwrap();
        let original = fs::read(&old_path).unwrap();
        backdate(&old_path, 40);

        let report = store.age(Utc::now());
        assert_eq!(report.moved_to_warm, 1);
        assert_eq!(report.moved_to_cold, 0);
        assert!(report.failures.is_empty());
        assert!(!old_path.exists());

        let warm = store.path_for(Tier::Warm, "s1", &old.content_hash);
        assert!(warm.exists());
        assert_eq!(read_object(&warm).unwrap(), original);

        let warm_age = Utc::now() - DateTime::<Utc>::from(modified(&warm).unwrap());
        assert!(warm_age >= Duration::days(39));

        let loaded = store.get(&old.content_hash).unwrap();
        assert_eq!(loaded.tier, Tier::Warm);
        assert_eq!(loaded.storage_path, Some(warm));

        // Moving forward is idempotent; nothing returns to hot
        let second = store.age(Utc::now());
        assert_eq!(second.moved_to_warm, 0);
        assert!(!old_path.exists());
    }

    #[test]
    fn test_age_moves_warm_to_cold() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let r = record("s1", "ancient");
        let hot = store.put(&r).unwrap().path;
        backdate(&hot, 40);
        store.age(Utc::now());

        let warm = store.path_for(Tier::Warm, "s1", &r.content_hash);
        assert!(warm.exists());
        let report = store.age(Utc::now() + Duration::days(200));
        assert_eq!(report.moved_to_cold, 1);
        assert!(!warm.exists());

        let cold = store.path_for(Tier::Cold, "s1", &r.content_hash);
        assert_eq!(store.get(&r.content_hash).unwrap().tier, Tier::Cold);
        assert!(cold.exists());
        assert!(!hot.exists());
    }

    #[test]
    fn test_very_old_hot_object_reaches_cold() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let r = record("s1", "fossil");
        let hot = store.put(&r).unwrap().path;
        backdate(&hot, 400);

        let report = store.age(Utc::now());
        assert_eq!(report.moved_to_warm, 1);
        assert_eq!(report.moved_to_cold, 1);
        assert_eq!(store.get(&r.content_hash).unwrap().tier, Tier::Cold);
    }

    #[test]
    fn test_put_skips_hash_in_colder_tier() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let r = record("s1", "aged");
        let hot = store.put(&r).unwrap().path;
        backdate(&hot, 40);
        store.age(Utc::now());

        let again = store.put(&r).unwrap();
        assert!(!again.created);
        assert!(!hot.exists());
    }

    #[test]
    fn test_sweep_and_report() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        for i in 0..3 {
            store.put(&record("s1", &format!("doc {}", i))).unwrap();
        }
        let first = store.object_paths()[0].1.clone();
        backdate(&first, 40);
        store.age(Utc::now());

        let hot_dir = store.tier_dir(Tier::Hot).join("s1");
        fs::write(hot_dir.join("x.json.tmp"), "partial").unwrap();
        fs::write(hot_dir.join(".DS_Store"), "junk").unwrap();
        fs::write(hot_dir.join("upload.temp"), "junk").unwrap();

        let sweep = store.sweep_temp();
        assert_eq!(sweep.removed, 3);
        assert!(!hot_dir.join(".DS_Store").exists());

        let report = store.report();
        assert_eq!(report.total_files, 3);
        assert_eq!(report.tiers[&Tier::Hot].files, 2);
        let warm = report.tiers[&Tier::Warm];
        assert_eq!(warm.files, 1);
        assert!(warm.uncompressed_bytes > 0);
        assert_eq!(report.tiers[&Tier::Cold].files, 0);
        assert!(report.compression_ratio > 0.0);
    }

    #[test]
    fn test_rewrite_keeps_tier_and_mtime() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let r = record("s1", "rescored");
        let hot = store.put(&r).unwrap().path;
        backdate(&hot, 40);
        store.age(Utc::now());

        let mut loaded = store.get(&r.content_hash).unwrap();
        let warm = loaded.storage_path.clone().unwrap();
        let before = modified(&warm).unwrap();
        loaded.alignment_score = Some(0.42);
        store.rewrite(&loaded).unwrap();

        assert_eq!(modified(&warm).unwrap(), before);
        let after = store.get(&r.content_hash).unwrap();
        assert_eq!(after.alignment_score, Some(0.42));
        assert_eq!(after.tier, Tier::Warm);
        assert_eq!(store.records().count(), 1);
    }

    #[test]
    fn test_records_skips_corrupt_objects() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.put(&record("s1", "good")).unwrap();
        let bad = store.tier_dir(Tier::Hot).join("s1").join("bad.json");
        fs::write(&bad, "{nope").unwrap();
        assert_eq!(store.records().count(), 1);
    }
}
