//! Whole-document JSON persistence shared by the dedup table, the graph,
//! the pattern registry, the ethics log and the metrics file.

use crate::error::{Error, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Result of loading a persisted document
#[derive(Debug)]
pub struct Loaded<T> {
    pub value: T,
    /// Where a corrupt document was moved to, if it was
    pub archived: Option<PathBuf>,
}

/// Load a JSON document, or start from `T::default()`.
///
/// A missing file is not an error. An unreadable or unparsable file is
/// renamed to `<name>.corrupt.<timestamp>` and the default is returned.
pub fn load_or_archive<T>(path: &Path) -> Loaded<T>
where
    T: DeserializeOwned + Default,
{
    let content = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No document at {:?}, starting empty", path);
            return Loaded {
                value: T::default(),
                archived: None,
            };
        }
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            return archive(path);
        }
    };

    match serde_json::from_slice::<T>(&content) {
        Ok(value) => Loaded {
            value,
            archived: None,
        },
        Err(e) => {
            warn!("Corrupt document {:?}: {}", path, e);
            archive(path)
        }
    }
}

/// Load a JSON document without touching the file on failure.
///
/// For read-only callers: a corrupt document is reported and skipped, and
/// is left in place for the next writer to archive.
pub fn load_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!("Ignoring corrupt document {:?}: {}", path, e);
            T::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            T::default()
        }
    }
}

fn archive<T: Default>(path: &Path) -> Loaded<T> {
    let target = corrupt_path(path);
    let archived = match fs::rename(path, &target) {
        Ok(()) => {
            warn!("Archived corrupt state {:?} -> {:?}", path, target);
            Some(target)
        }
        Err(e) => {
            warn!("Could not archive {:?}: {}", path, e);
            None
        }
    };
    Loaded {
        value: T::default(),
        archived,
    }
}

/// `graph.json` -> `graph.json.corrupt.20250101T120000Z`
pub fn corrupt_path(path: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    path.with_file_name(format!("{}.corrupt.{}", name, stamp))
}

/// Serialize to `<path>.tmp`, then rename over `path`
pub fn save_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    let json = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Append a single JSON line
pub fn append_ndjson<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Single-process guard on the root directory. Released on drop.
#[derive(Debug)]
pub struct RootLock {
    path: PathBuf,
}

/// A lock file without a readable pid younger than this is still being written
const LOCK_WRITE_GRACE: Duration = Duration::from_secs(10);

impl RootLock {
    /// Take the lock, reclaiming it when the recorded holder has exited
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match Self::create(path) {
            Err(Error::Locked(_)) if Self::is_stale(path) => {
                warn!("Reclaiming stale lock {:?}", path);
                fs::remove_file(path)?;
                Self::create(path)
            }
            other => other,
        }
    }

    fn create(path: &Path) -> Result<Self> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let lock = Self {
                    path: path.to_path_buf(),
                };
                writeln!(file, "{}", std::process::id())?;
                file.sync_all()?;
                Ok(lock)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(Error::Locked(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn is_stale(path: &Path) -> bool {
        let pid = fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok());
        match pid {
            Some(pid) if pid == std::process::id() => false,
            Some(pid) => !process_alive(pid),
            None => fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| t.elapsed().ok())
                .is_some_and(|age| age > LOCK_WRITE_GRACE),
        }
    }
}

/// Without procfs the holder is assumed alive
fn process_alive(pid: u32) -> bool {
    let proc_root = Path::new("/proc");
    !proc_root.is_dir() || proc_root.join(pid.to_string()).exists()
}

impl Drop for RootLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release lock {:?}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_document_is_default() {
        let tmp = TempDir::new().unwrap();
        let loaded: Loaded<BTreeMap<String, u32>> = load_or_archive(&tmp.path().join("x.json"));
        assert!(loaded.value.is_empty());
        assert!(loaded.archived.is_none());
    }

    #[test]
    fn test_corrupt_document_is_archived() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("graph.json");
        fs::write(&path, "{not json").unwrap();

        let loaded: Loaded<BTreeMap<String, u32>> = load_or_archive(&path);
        assert!(loaded.value.is_empty());
        let archived = loaded.archived.unwrap();
        assert!(!path.exists());
        assert!(archived
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("graph.json.corrupt."));
        assert_eq!(fs::read_to_string(archived).unwrap(), "{not json");
    }

    #[test]
    fn test_save_atomic_leaves_no_tmp() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("doc.json");
        let mut doc = BTreeMap::new();
        doc.insert("a".to_string(), 1u32);

        save_atomic(&path, &doc).unwrap();
        assert!(!tmp_path(&path).exists());

        let loaded: Loaded<BTreeMap<String, u32>> = load_or_archive(&path);
        assert_eq!(loaded.value, doc);
    }

    #[test]
    fn test_append_ndjson() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("logs").join("events.log");
        append_ndjson(&path, &serde_json::json!({"n": 1})).unwrap();
        append_ndjson(&path, &serde_json::json!({"n": 2})).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines, vec![r#"{"n":1}"#, r#"{"n":2}"#]);
    }

    #[test]
    fn test_root_lock_is_exclusive() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("accrete.lock");
        let lock = RootLock::acquire(&path).unwrap();
        assert!(matches!(RootLock::acquire(&path), Err(Error::Locked(_))));
        drop(lock);
        assert!(!path.exists());
        assert!(RootLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_root_lock_reclaims_dead_holder() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("accrete.lock");
        // Above the kernel's pid_max, so never a live process
        fs::write(&path, "4294967295\n").unwrap();

        let lock = RootLock::acquire(&path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap().trim(),
            std::process::id().to_string()
        );
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_root_lock_respects_live_or_fresh_holder() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("accrete.lock");

        fs::write(&path, format!("{}\n", std::process::id())).unwrap();
        assert!(matches!(RootLock::acquire(&path), Err(Error::Locked(_))));

        // Holder has not written its pid yet
        fs::write(&path, "").unwrap();
        assert!(matches!(RootLock::acquire(&path), Err(Error::Locked(_))));
        assert!(path.exists());
    }

    #[test]
    fn test_load_or_default_leaves_corrupt_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("metrics.json");
        fs::write(&path, "{not json").unwrap();

        let value: BTreeMap<String, u32> = load_or_default(&path);
        assert!(value.is_empty());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{not json");
    }
}
