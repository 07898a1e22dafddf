//! Emergence detector: notices concepts converging across sources.
//!
//! Every ingested record contributes its tags and scored concepts to a
//! bounded buffer. A concept emerges once it has been seen often enough,
//! from at least two sources, and it is reported exactly once.

use crate::config::DetectorConfig;
use crate::error::Result;
use crate::models::Record;
use crate::persist;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One sighting of a concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub concept: String,
    pub source_tag: String,
    pub content_hash: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternEmerged {
    pub concept: String,
    pub strength: f64,
    pub sources: BTreeSet<String>,
    pub occurrence_count: usize,
    pub emitted_at: DateTime<Utc>,
}

/// Registry entry kept to suppress re-emission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedPattern {
    pub strength: f64,
    pub source_count: usize,
    pub occurrence_count: usize,
    pub emitted_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryDocument {
    #[serde(default)]
    emitted: BTreeMap<String, EmittedPattern>,
    #[serde(default)]
    buffer: VecDeque<Observation>,
}

/// Receives emergence events
pub trait PatternSink: Send + Sync {
    fn emit(&self, event: &PatternEmerged) -> Result<()>;
}

/// NDJSON line format of `logs/patterns.log`
#[derive(Debug, Serialize, Deserialize)]
pub struct PatternLine {
    pub timestamp: DateTime<Utc>,
    pub concept: String,
    pub strength: f64,
    pub source_count: usize,
    pub occurrence_count: usize,
}

pub struct NdjsonPatternSink {
    path: PathBuf,
}

impl NdjsonPatternSink {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl PatternSink for NdjsonPatternSink {
    fn emit(&self, event: &PatternEmerged) -> Result<()> {
        persist::append_ndjson(
            &self.path,
            &PatternLine {
                timestamp: event.emitted_at,
                concept: event.concept.clone(),
                strength: event.strength,
                source_count: event.sources.len(),
                occurrence_count: event.occurrence_count,
            },
        )
    }
}

pub struct EmergenceDetector {
    config: DetectorConfig,
    path: PathBuf,
    emitted: BTreeMap<String, EmittedPattern>,
    buffer: VecDeque<Observation>,
}

/// Tags plus scored concepts, trimmed and lowercased
pub fn concepts_of(record: &Record) -> BTreeSet<String> {
    record
        .tags
        .iter()
        .chain(record.concepts.iter())
        .map(|c| c.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect()
}

impl EmergenceDetector {
    pub fn open(config: &DetectorConfig, path: &Path) -> Self {
        let loaded = persist::load_or_archive::<RegistryDocument>(path);
        Self::from_document(config, path, loaded.value)
    }

    /// Load for inspection only; a corrupt file stays where it is
    pub fn open_read_only(config: &DetectorConfig, path: &Path) -> Self {
        Self::from_document(config, path, persist::load_or_default(path))
    }

    fn from_document(config: &DetectorConfig, path: &Path, doc: RegistryDocument) -> Self {
        let mut detector = Self {
            config: config.clone(),
            path: path.to_path_buf(),
            emitted: doc.emitted,
            buffer: doc.buffer,
        };
        detector.trim();
        detector
    }

    fn trim(&mut self) {
        while self.buffer.len() > self.config.buffer_cap {
            self.buffer.pop_front();
        }
    }

    /// Buffer the record's concepts and emit any newly converged patterns.
    ///
    /// A pattern the sink rejects is logged and left unregistered, so it is
    /// offered again on the concept's next sighting. Returns the patterns
    /// that were delivered and registered.
    pub fn observe(
        &mut self,
        record: &Record,
        now: DateTime<Utc>,
        sink: &dyn PatternSink,
    ) -> Vec<PatternEmerged> {
        let concepts = concepts_of(record);
        for concept in &concepts {
            self.buffer.push_back(Observation {
                concept: concept.clone(),
                source_tag: record.source_tag.clone(),
                content_hash: record.content_hash.clone(),
                observed_at: now,
            });
        }
        self.trim();

        let mut events = Vec::new();
        for concept in concepts {
            if self.emitted.contains_key(&concept) {
                continue;
            }
            let Some(event) = self.evaluate(&concept, now) else {
                continue;
            };
            if let Err(e) = sink.emit(&event) {
                warn!("Pattern sink rejected '{}': {}", event.concept, e);
                continue;
            }
            info!(
                "Pattern emerged: '{}' (strength {:.2}, {} sources, {} occurrences)",
                event.concept,
                event.strength,
                event.sources.len(),
                event.occurrence_count
            );
            self.emitted.insert(
                concept,
                EmittedPattern {
                    strength: event.strength,
                    source_count: event.sources.len(),
                    occurrence_count: event.occurrence_count,
                    emitted_at: now,
                },
            );
            events.push(event);
        }
        events
    }

    fn evaluate(&self, concept: &str, now: DateTime<Utc>) -> Option<PatternEmerged> {
        let hits: Vec<&Observation> = self.buffer.iter().filter(|o| o.concept == concept).collect();
        let occurrences = hits.len();
        let sources: BTreeSet<String> = hits.iter().map(|o| o.source_tag.clone()).collect();
        let min = self.config.min_occurrences.max(1);
        let strength = occurrences as f64 / min as f64;

        debug!(
            "Concept '{}': {} occurrences from {} sources (strength {:.2})",
            concept,
            occurrences,
            sources.len(),
            strength
        );
        if occurrences < min || sources.len() < 2 || strength < self.config.convergence_threshold {
            return None;
        }
        Some(PatternEmerged {
            concept: concept.to_string(),
            strength,
            sources,
            occurrence_count: occurrences,
            emitted_at: now,
        })
    }

    pub fn is_emitted(&self, concept: &str) -> bool {
        self.emitted.contains_key(&concept.trim().to_lowercase())
    }

    pub fn emitted(&self) -> &BTreeMap<String, EmittedPattern> {
        &self.emitted
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn persist(&self) -> Result<()> {
        persist::save_atomic(
            &self.path,
            &RegistryDocument {
                emitted: self.emitted.clone(),
                buffer: self.buffer.clone(),
            },
        )
    }
}
