//! Session counters and the cumulative `metrics.json` history

use crate::error::Result;
use crate::persist;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const DAILY_RETENTION_DAYS: i64 = 90;
const GRAPH_SAMPLE_CAP: usize = 500;
const SUMMARY_DAYS: i64 = 7;

/// Per-run counters; also the shape of the cumulative totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub requests_made: u64,
    pub fetched: u64,
    pub deduped: u64,
    pub filtered_quality: u64,
    pub filtered_alignment: u64,
    pub persisted: u64,
    pub bytes_written: u64,
    pub compressed_bytes_saved: u64,
    pub blocked_by_robots: u64,
    pub failed_fetches: u64,
    pub store_failures: u64,
}

impl Counters {
    fn absorb(&mut self, other: &Counters) {
        self.requests_made += other.requests_made;
        self.fetched += other.fetched;
        self.deduped += other.deduped;
        self.filtered_quality += other.filtered_quality;
        self.filtered_alignment += other.filtered_alignment;
        self.persisted += other.persisted;
        self.bytes_written += other.bytes_written;
        self.compressed_bytes_saved += other.compressed_bytes_saved;
        self.blocked_by_robots += other.blocked_by_robots;
        self.failed_fetches += other.failed_fetches;
        self.store_failures += other.store_failures;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCounters {
    pub fetched: u64,
    pub persisted: u64,
    pub failed: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCounters {
    pub count: u64,
    pub bytes: u64,
}

/// Metrics for one orchestrator cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub counters: Counters,
    pub by_source: BTreeMap<String, SourceCounters>,
    pub by_type: BTreeMap<String, TypeCounters>,
    /// Wall time spent inside per-record processing
    pub processing_ms: u64,
}

impl SessionMetrics {
    pub fn start(now: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            started_at: now,
            ended_at: None,
            counters: Counters::default(),
            by_source: BTreeMap::new(),
            by_type: BTreeMap::new(),
            processing_ms: 0,
        }
    }

    pub fn source(&mut self, tag: &str) -> &mut SourceCounters {
        self.by_source.entry(tag.to_string()).or_default()
    }

    pub fn note_fetched(&mut self, tag: &str) {
        self.counters.fetched += 1;
        self.source(tag).fetched += 1;
    }

    pub fn note_failure(&mut self, tag: &str) {
        self.counters.failed_fetches += 1;
        self.source(tag).failed += 1;
    }

    /// Count one persisted record
    pub fn increment(&mut self, tag: &str, kind: &str, bytes: u64) {
        self.counters.persisted += 1;
        self.counters.bytes_written += bytes;
        let source = self.source(tag);
        source.persisted += 1;
        source.bytes += bytes;
        let by_type = self.by_type.entry(kind.to_string()).or_default();
        by_type.count += 1;
        by_type.bytes += bytes;
    }

    pub fn finish(&mut self, now: DateTime<Utc>) {
        self.ended_at = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStat {
    pub date: NaiveDate,
    pub fetched: u64,
    pub persisted: u64,
    pub bytes: u64,
    pub sources: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphSample {
    pub timestamp: DateTime<Utc>,
    pub nodes: usize,
    pub edges: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CumulativeMetrics {
    #[serde(default)]
    pub totals: Counters,
    #[serde(default)]
    pub total_sessions: u64,
    /// persisted / fetched over all sessions
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub total_processing_ms: u64,
    /// Milliseconds per fetched record
    #[serde(default)]
    pub average_processing_ms: f64,
    #[serde(default)]
    pub by_source: BTreeMap<String, SourceCounters>,
    #[serde(default)]
    pub by_type: BTreeMap<String, TypeCounters>,
    #[serde(default)]
    pub daily: Vec<DailyStat>,
    #[serde(default)]
    pub graph_growth: Vec<GraphSample>,
    #[serde(default)]
    pub last_session: Option<SessionMetrics>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub totals: Counters,
    pub total_sessions: u64,
    pub success_rate: f64,
    pub average_processing_ms: f64,
    pub recent_daily: Vec<DailyStat>,
    pub graph: Option<GraphSample>,
    pub last_session: Option<SessionMetrics>,
}

pub struct MetricsStore {
    path: PathBuf,
    data: CumulativeMetrics,
}

impl MetricsStore {
    pub fn open(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            data: persist::load_or_archive::<CumulativeMetrics>(path).value,
        }
    }

    /// Load for inspection only; a corrupt file stays where it is
    pub fn open_read_only(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            data: persist::load_or_default(path),
        }
    }

    pub fn data(&self) -> &CumulativeMetrics {
        &self.data
    }

    /// Fold a finished session into the history
    pub fn record_session(&mut self, session: &SessionMetrics, now: DateTime<Utc>) {
        let data = &mut self.data;
        data.totals.absorb(&session.counters);
        data.total_sessions += 1;
        data.total_processing_ms += session.processing_ms;
        if data.totals.fetched > 0 {
            data.success_rate = data.totals.persisted as f64 / data.totals.fetched as f64;
            data.average_processing_ms =
                data.total_processing_ms as f64 / data.totals.fetched as f64;
        }

        for (tag, c) in &session.by_source {
            let total = data.by_source.entry(tag.clone()).or_default();
            total.fetched += c.fetched;
            total.persisted += c.persisted;
            total.failed += c.failed;
            total.bytes += c.bytes;
        }
        for (kind, c) in &session.by_type {
            let total = data.by_type.entry(kind.clone()).or_default();
            total.count += c.count;
            total.bytes += c.bytes;
        }

        let today = now.date_naive();
        let sources: BTreeSet<String> = session
            .by_source
            .iter()
            .filter(|(_, c)| c.fetched > 0)
            .map(|(tag, _)| tag.clone())
            .collect();
        match data.daily.iter_mut().find(|d| d.date == today) {
            Some(day) => {
                day.fetched += session.counters.fetched;
                day.persisted += session.counters.persisted;
                day.bytes += session.counters.bytes_written;
                day.sources.extend(sources);
            }
            None => data.daily.push(DailyStat {
                date: today,
                fetched: session.counters.fetched,
                persisted: session.counters.persisted,
                bytes: session.counters.bytes_written,
                sources,
            }),
        }
        let cutoff = today - Duration::days(DAILY_RETENTION_DAYS);
        data.daily.retain(|d| d.date > cutoff);
        data.daily.sort_by_key(|d| d.date);

        data.last_session = Some(session.clone());
        debug!("Recorded session {} into cumulative metrics", session.session_id);
    }

    /// Count bytes saved by store aging outside a cycle
    pub fn record_compression(&mut self, bytes_saved: u64) {
        self.data.totals.compressed_bytes_saved += bytes_saved;
    }

    pub fn record_graph(&mut self, nodes: usize, edges: usize, now: DateTime<Utc>) {
        self.data.graph_growth.push(GraphSample {
            timestamp: now,
            nodes,
            edges,
        });
        let excess = self.data.graph_growth.len().saturating_sub(GRAPH_SAMPLE_CAP);
        self.data.graph_growth.drain(..excess);
    }

    /// Totals plus the last seven days of daily stats
    pub fn summary(&self, now: DateTime<Utc>) -> MetricsSummary {
        let since = now.date_naive() - Duration::days(SUMMARY_DAYS);
        MetricsSummary {
            totals: self.data.totals,
            total_sessions: self.data.total_sessions,
            success_rate: self.data.success_rate,
            average_processing_ms: self.data.average_processing_ms,
            recent_daily: self
                .data
                .daily
                .iter()
                .filter(|d| d.date > since)
                .cloned()
                .collect(),
            graph: self.data.graph_growth.last().copied(),
            last_session: self.data.last_session.clone(),
        }
    }

    pub fn persist(&mut self) -> Result<()> {
        self.data.last_updated = Some(Utc::now());
        persist::save_atomic(&self.path, &self.data)
    }
}
