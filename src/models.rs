//! Core data types that flow through the pipeline.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::str::FromStr;

/// Declared source priority. Variant order is scheduling order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
    /// Fallback bucket for sources that declare nothing
    Default,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
            Priority::Default => write!(f, "default"),
        }
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            "default" => Ok(Priority::Default),
            _ => Err(Error::Config(format!("Unknown priority: {}", s))),
        }
    }
}

/// Storage tier. Objects only ever move forward: hot -> warm -> cold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Hot, Tier::Warm, Tier::Cold];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
        }
    }

    pub fn is_compressed(&self) -> bool {
        !matches!(self, Tier::Hot)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scores assigned by the quality filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub relevance: f64,
    pub authority: f64,
    pub recency: f64,
    pub engagement: f64,
    pub composite: f64,
}

/// A candidate yielded by a fetcher's `search`, before extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordStub {
    pub source_tag: String,
    pub source_id: String,
    /// Where the item lives; its origin is what the ethics gate checks
    #[serde(default)]
    pub url: Option<String>,
    /// Text fields known at search time (title, abstract, ...)
    #[serde(default)]
    pub payload: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub license: String,
    /// Adapter-specific extras: engagement counts, publish time, ...
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl RecordStub {
    pub fn new(source_tag: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            source_tag: source_tag.into(),
            source_id: source_id.into(),
            url: None,
            payload: BTreeMap::new(),
            tags: BTreeSet::new(),
            license: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(name.into(), value.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Turn the stub into a record carrying the same payload.
    ///
    /// `content_hash` is computed over the declared text fields.
    pub fn into_record(self, kind: &str, text_fields: &[&str], ingested_at: DateTime<Utc>) -> Record {
        let content_hash = content_hash(&canonical_text(&self.payload, text_fields));
        Record {
            content_hash,
            attribution_url: self.url.clone().unwrap_or_default(),
            source_tag: self.source_tag,
            source_id: self.source_id,
            kind: kind.to_string(),
            ingested_at,
            payload: self.payload,
            tags: self.tags,
            license: self.license,
            metadata: self.metadata,
            quality_scores: None,
            concepts: BTreeSet::new(),
            alignment_score: None,
            tier: Tier::Hot,
            storage_path: None,
        }
    }
}

/// The unit of ingested content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub source_tag: String,
    pub source_id: String,
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
    /// Record type used for metrics (`academic_paper`, `code_repository`, ...)
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub payload: BTreeMap<String, String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub attribution_url: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub quality_scores: Option<QualityScores>,
    /// Concepts discovered while scoring, reused by the emergence detector
    #[serde(default)]
    pub concepts: BTreeSet<String>,
    #[serde(default)]
    pub alignment_score: Option<f64>,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
}

impl Record {
    /// `<source_tag>:<source_id>`
    pub fn natural_key(&self) -> String {
        format!("{}:{}", self.source_tag, self.source_id)
    }

    /// All payload text, in field-name order
    pub fn text(&self) -> String {
        self.payload
            .values()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn title(&self) -> Option<&str> {
        self.payload
            .get("title")
            .or_else(|| self.payload.get("name"))
            .map(String::as_str)
    }

    /// Numeric metadata value, accepting integers, floats and numeric strings
    pub fn metric(&self, key: &str) -> Option<f64> {
        match self.metadata.get(key)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Declared publish time, if the adapter supplied a parsable one
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.metadata.get("published_at")?.as_str()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Join the declared text fields in order; an empty declaration means every
/// field in name order. Missing and empty fields are skipped.
pub fn canonical_text(payload: &BTreeMap<String, String>, text_fields: &[&str]) -> String {
    let parts: Vec<&str> = if text_fields.is_empty() {
        payload.values().map(String::as_str).collect()
    } else {
        text_fields
            .iter()
            .filter_map(|field| payload.get(*field).map(String::as_str))
            .collect()
    };
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Hex SHA-256 of UTF-8 text
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// First 16 hex chars of SHA-256
pub fn short_id(key: &str) -> String {
    let mut full = content_hash(key);
    full.truncate(16);
    full
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order_and_parse() {
        let mut priorities = vec![Priority::Low, Priority::Default, Priority::Critical, Priority::High];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![Priority::Critical, Priority::High, Priority::Low, Priority::Default]
        );
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_canonical_text_follows_declared_order() {
        let stub = RecordStub::new("arxiv", "1")
            .with_field("abstract", "body")
            .with_field("title", "head")
            .with_field("extra", "ignored");
        assert_eq!(canonical_text(&stub.payload, &["title", "abstract"]), "head\nbody");
        assert_eq!(canonical_text(&stub.payload, &[]), "body\nignored\nhead");
    }

    #[test]
    fn test_content_hash_is_sha256() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(short_id("abc"), "ba7816bf8f01cfea");
    }

    #[test]
    fn test_record_metric_and_published_at() {
        let record = RecordStub::new("github", "x/y")
            .with_metadata("stars", serde_json::json!(1200))
            .with_metadata("views", serde_json::json!("42"))
            .with_metadata("published_at", serde_json::json!("2024-01-02T03:04:05Z"))
            .into_record("code_repository", &[], Utc::now());
        assert_eq!(record.metric("stars"), Some(1200.0));
        assert_eq!(record.metric("views"), Some(42.0));
        assert_eq!(record.metric("citations"), None);
        assert_eq!(record.published_at().unwrap().to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }
}
