//! Local feed adapter: stubs read from `*.json` files in a directory.
//!
//! Each file holds one item or an array of items. Useful for offline runs
//! and for replaying exports from other tools.

use super::{FetchContext, Fetcher};
use crate::error::{Error, Result};
use crate::models::RecordStub;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub struct LocalFetcher {
    tag: String,
    dir: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedFile {
    Many(Vec<FeedItem>),
    One(FeedItem),
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    payload: BTreeMap<String, String>,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    license: String,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

impl LocalFetcher {
    pub fn new(tag: &str, dir: PathBuf) -> Self {
        Self {
            tag: tag.to_string(),
            dir,
        }
    }

    fn feed_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            return Err(Error::Adapter(format!(
                "Feed directory not found: {}",
                self.dir.display()
            )));
        }
        let mut files: Vec<PathBuf> = WalkDir::new(&self.dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        Ok(files)
    }

    fn read_file(&self, path: &Path) -> Result<Vec<RecordStub>> {
        let content = std::fs::read_to_string(path)?;
        let items = match serde_json::from_str::<FeedFile>(&content)? {
            FeedFile::Many(items) => items,
            FeedFile::One(item) => vec![item],
        };
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(items
            .into_iter()
            .enumerate()
            .map(|(i, item)| RecordStub {
                source_tag: self.tag.clone(),
                source_id: item.source_id.unwrap_or_else(|| format!("{}-{}", stem, i)),
                url: item.url,
                payload: item.payload,
                tags: item.tags,
                license: item.license,
                metadata: item.metadata,
            })
            .collect())
    }
}

fn matches_any(stub: &RecordStub, queries: &[String]) -> bool {
    let filters: Vec<String> = queries
        .iter()
        .filter(|q| !q.starts_with('@') && !q.trim().is_empty())
        .map(|q| q.to_lowercase())
        .collect();
    if filters.is_empty() {
        return true;
    }
    let text = stub
        .payload
        .values()
        .map(|v| v.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    filters.iter().any(|f| text.contains(f.as_str()))
}

#[async_trait]
impl Fetcher for LocalFetcher {
    fn source_tag(&self) -> &str {
        &self.tag
    }

    fn search<'a>(
        &'a self,
        _ctx: &'a FetchContext,
        queries: &'a [String],
    ) -> BoxStream<'a, Result<RecordStub>> {
        let files = match self.feed_files() {
            Ok(files) => files,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };
        debug!("Local feed {:?}: {} files", self.dir, files.len());

        stream::iter(files)
            .flat_map(move |path| {
                let results: Vec<Result<RecordStub>> = match self.read_file(&path) {
                    Ok(stubs) => stubs
                        .into_iter()
                        .filter(|s| matches_any(s, queries))
                        .map(Ok)
                        .collect(),
                    Err(e) => {
                        warn!("Skipping feed file {:?}: {}", path, e);
                        vec![Err(Error::Adapter(format!("{}: {}", path.display(), e)))]
                    }
                };
                stream::iter(results)
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EthicsConfig;
    use crate::ethics::{EthicsGate, StaticRobotsProbe};
    use crate::models::Priority;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(tmp: &TempDir) -> FetchContext {
        FetchContext {
            gate: Arc::new(EthicsGate::open(
                &EthicsConfig::default(),
                "accrete",
                &tmp.path().join("ethics_log.json"),
                Arc::new(ManualClock::default()),
                Arc::new(StaticRobotsProbe::allow_all()),
            )),
            source_tag: "feed".to_string(),
            priority: Priority::Default,
            max_results: 10,
        }
    }

    #[tokio::test]
    async fn test_reads_single_and_array_files() {
        let tmp = TempDir::new().unwrap();
        let feed = tmp.path().join("feed");
        std::fs::create_dir_all(&feed).unwrap();
        std::fs::write(
            feed.join("a.json"),
            r#"{"source_id": "one", "payload": {"title": "neural nets"}, "tags": ["x"]}"#,
        )
        .unwrap();
        std::fs::write(
            feed.join("b.json"),
            r#"[{"payload": {"title": "graphs"}}, {"payload": {"title": "neural planning"}}]"#,
        )
        .unwrap();
        std::fs::write(feed.join("broken.json"), "{nope").unwrap();
        std::fs::write(feed.join("notes.txt"), "ignored").unwrap();

        let ctx = context(&tmp);
        let fetcher = LocalFetcher::new("feed", feed);
        let results: Vec<_> = fetcher.search(&ctx, &[]).collect().await;
        assert_eq!(results.len(), 4);
        let ok: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(ok.len(), 3);
        assert_eq!(ok[0].source_id, "one");
        assert_eq!(ok[1].source_id, "b-0");
        assert!(ok.iter().all(|s| s.source_tag == "feed"));

        let queries = vec!["neural".to_string(), "@focus".to_string()];
        let filtered: Vec<_> = fetcher
            .search(&ctx, &queries)
            .filter_map(|r| async move { r.ok() })
            .collect()
            .await;
        assert_eq!(filtered.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_directory_is_adapter_error() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let fetcher = LocalFetcher::new("feed", tmp.path().join("absent"));
        let results: Vec<_> = fetcher.search(&ctx, &[]).collect().await;
        assert!(matches!(results.as_slice(), [Err(Error::Adapter(_))]));
    }
}
