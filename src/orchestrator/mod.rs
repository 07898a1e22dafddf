//! Ingestion orchestrator.
//!
//! Drives every enabled source, in priority order, through the ethics gate,
//! dedup, extraction, quality and alignment scoring, storage, the graph and
//! the emergence detector. No single record, adapter or source can abort a
//! cycle; every failure becomes a counted [`Outcome`].

use crate::alignment::AlignmentScorer;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, SourceConfig};
use crate::dedup::DedupStore;
use crate::detect::{EmergenceDetector, NdjsonPatternSink, PatternEmerged, PatternSink};
use crate::error::{Error, Result};
use crate::ethics::{EthicsGate, HttpRobotsProbe, RobotsProbe, Verdict};
use crate::fetch::{self, FetchContext, Fetcher};
use crate::graph::{GraphStats, KnowledgeGraph};
use crate::metrics::{MetricsStore, SessionMetrics};
use crate::models::{Priority, RecordStub, Tier};
use crate::progress;
use crate::quality::{FilterReason, QualityFilter, QualityStats};
use crate::store::TieredStore;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What happened to one stub
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Persisted,
    RobotsDenied,
    Duplicate,
    QualityRejected { reason: FilterReason },
    AlignmentRejected { rationale: String },
    AdapterFailure { message: String },
    StoreTransient { message: String },
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Persisted => "persisted",
            Outcome::RobotsDenied => "robots_denied",
            Outcome::Duplicate => "duplicate",
            Outcome::QualityRejected { .. } => "quality_rejected",
            Outcome::AlignmentRejected { .. } => "alignment_rejected",
            Outcome::AdapterFailure { .. } => "adapter_failure",
            Outcome::StoreTransient { .. } => "store_transient",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::QualityRejected { reason } => write!(f, "{} ({})", self.as_str(), reason),
            Outcome::AlignmentRejected { rationale } => write!(f, "{} ({})", self.as_str(), rationale),
            Outcome::AdapterFailure { message } | Outcome::StoreTransient { message } => {
                write!(f, "{}: {}", self.as_str(), message)
            }
            _ => f.write_str(self.as_str()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StubOutcome {
    pub source_tag: String,
    pub source_id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Result of one cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub session: SessionMetrics,
    pub sources_run: Vec<String>,
    pub sources_skipped: Vec<String>,
    pub outcomes: Vec<StubOutcome>,
    pub patterns: Vec<PatternEmerged>,
    pub interrupted: bool,
}

impl CycleReport {
    pub fn outcome_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for o in &self.outcomes {
            *counts.entry(o.outcome.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RescoreReport {
    pub rescored: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub failures: usize,
}

/// Injected pieces; `for_config` wires the production ones
pub struct Collaborators {
    /// Fetchers keyed by their source tag; configured sources without one
    /// get the adapter their config names
    pub fetchers: Vec<Arc<dyn Fetcher>>,
    pub clock: Arc<dyn Clock>,
    pub probe: Arc<dyn RobotsProbe>,
    pub sink: Arc<dyn PatternSink>,
}

impl Collaborators {
    pub fn for_config(config: &Config) -> Result<Self> {
        let client = fetch::http_client(&config.fetch)?;
        Ok(Self {
            fetchers: Vec::new(),
            clock: Arc::new(SystemClock),
            probe: Arc::new(HttpRobotsProbe::new(client)),
            sink: Arc::new(NdjsonPatternSink::new(&config.paths.patterns_log)),
        })
    }
}

#[derive(Clone)]
struct ScheduledSource {
    config: SourceConfig,
    fetcher: Arc<dyn Fetcher>,
    priority: Priority,
    queries: Vec<String>,
}

pub struct Orchestrator {
    config: Config,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn PatternSink>,
    gate: Arc<EthicsGate>,
    sources: Vec<ScheduledSource>,
    dedup: DedupStore,
    quality: QualityFilter,
    alignment: AlignmentScorer,
    store: TieredStore,
    graph: KnowledgeGraph,
    detector: EmergenceDetector,
    metrics: MetricsStore,
    last_run: HashMap<String, DateTime<Utc>>,
    shutdown: Arc<AtomicBool>,
    show_progress: bool,
}

impl Orchestrator {
    /// Create the root skeleton and open every component
    pub fn open(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.ensure_root()?;
        let paths = &config.paths;

        let gate = Arc::new(EthicsGate::open(
            &config.ethics,
            &config.fetch.user_agent,
            &paths.ethics_log,
            collaborators.clock.clone(),
            collaborators.probe.clone(),
        ));

        let sources = Self::schedule(&config, collaborators.fetchers)?;
        info!(
            "Scheduled sources: {}",
            sources
                .iter()
                .map(|s| format!("{} ({})", s.config.tag, s.priority))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            dedup: DedupStore::open(&paths.dedup_file, config.dedup.flush_every),
            quality: QualityFilter::new(&config.quality),
            alignment: AlignmentScorer::new(&config.alignment, &config.focus),
            store: TieredStore::new(&paths.store_dir, &config.store),
            graph: KnowledgeGraph::open(&paths.graph_file),
            detector: EmergenceDetector::open(&config.detector, &paths.patterns_registry),
            metrics: MetricsStore::open(&paths.metrics_file),
            clock: collaborators.clock,
            sink: collaborators.sink,
            gate,
            sources,
            last_run: HashMap::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            show_progress: false,
            config,
        })
    }

    /// Pair configured sources with fetchers, sorted by priority then tag
    fn schedule(config: &Config, supplied: Vec<Arc<dyn Fetcher>>) -> Result<Vec<ScheduledSource>> {
        let mut supplied: BTreeMap<String, Arc<dyn Fetcher>> = supplied
            .into_iter()
            .map(|f| (f.source_tag().to_string(), f))
            .collect();
        let client = fetch::http_client(&config.fetch)?;
        let mut sources = Vec::new();

        for source in config.enabled_sources() {
            let fetcher = match supplied.remove(&source.tag) {
                Some(f) => f,
                None => fetch::build_fetcher(source, config, &client)?,
            };
            sources.push(ScheduledSource {
                priority: source.priority.unwrap_or_else(|| fetcher.priority()),
                queries: config.queries_for(source),
                config: source.clone(),
                fetcher,
            });
        }

        // Supplied fetchers with no config entry run with defaults
        let known: Vec<String> = config.sources.iter().map(|s| s.tag.clone()).collect();
        for (tag, fetcher) in supplied {
            if known.contains(&tag) {
                continue;
            }
            let source = SourceConfig::new(&tag);
            sources.push(ScheduledSource {
                priority: fetcher.priority(),
                queries: config.queries_for(&source),
                config: source,
                fetcher,
            });
        }

        sources.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.config.tag.cmp(&b.config.tag))
        });
        Ok(sources)
    }

    /// Show one spinner per source while cycling
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Flag checked between records and while sleeping between cycles
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    fn stopping(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn source_order(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.config.tag.clone()).collect()
    }

    pub fn gate(&self) -> &Arc<EthicsGate> {
        &self.gate
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    pub fn store(&self) -> &TieredStore {
        &self.store
    }

    pub fn detector(&self) -> &EmergenceDetector {
        &self.detector
    }

    pub fn metrics(&self) -> &MetricsStore {
        &self.metrics
    }

    pub fn quality_stats(&self) -> &QualityStats {
        self.quality.stats()
    }

    /// One pass over the sources. `only` restricts the pass to those tags.
    pub async fn run_cycle(&mut self, only: &[String]) -> Result<CycleReport> {
        self.cycle(only, false).await
    }

    async fn cycle(&mut self, only: &[String], respect_frequency: bool) -> Result<CycleReport> {
        let started = self.clock.now();
        let mut session = SessionMetrics::start(started);
        let mut report = CycleReport {
            session: session.clone(),
            sources_run: Vec::new(),
            sources_skipped: Vec::new(),
            outcomes: Vec::new(),
            patterns: Vec::new(),
            interrupted: false,
        };
        info!("Starting cycle {}", session.session_id);

        let deadline = Duration::from_secs(self.config.fetch.deadline_seconds);
        let sources = self.sources.clone();

        'sources: for source in sources {
            let tag = source.config.tag.clone();
            if !only.is_empty() && !only.contains(&tag) {
                continue;
            }
            if self.stopping() {
                report.interrupted = true;
                break;
            }

            let now = self.clock.now();
            if respect_frequency {
                if let Some(last) = self.last_run.get(&tag) {
                    let gap = source.fetcher.update_frequency().min_gap();
                    let elapsed = (now - *last).to_std().unwrap_or(Duration::ZERO);
                    if elapsed < gap {
                        debug!("Skipping {}: last run {}s ago", tag, elapsed.as_secs());
                        report.sources_skipped.push(tag);
                        continue;
                    }
                }
            }
            self.last_run.insert(tag.clone(), now);
            report.sources_run.push(tag.clone());

            let ctx = FetchContext {
                gate: self.gate.clone(),
                source_tag: tag.clone(),
                priority: source.priority,
                max_results: source.config.max_per_cycle,
            };
            let fetcher = source.fetcher.clone();
            let mut stream = fetcher.search(&ctx, &source.queries);
            let mut taken = 0usize;
            let spinner = self.show_progress.then(|| progress::add_spinner(&tag));

            loop {
                if taken >= source.config.max_per_cycle {
                    debug!("{} reached max_per_cycle ({})", tag, source.config.max_per_cycle);
                    break;
                }
                if self.stopping() {
                    report.interrupted = true;
                    break 'sources;
                }

                let next = match tokio::time::timeout(deadline, stream.next()).await {
                    Ok(Some(item)) => item,
                    Ok(None) => break,
                    Err(_) => {
                        warn!("Search for {} exceeded {}s; moving on", tag, deadline.as_secs());
                        session.note_failure(&tag);
                        break;
                    }
                };

                let stub = match next {
                    Ok(stub) => stub,
                    Err(Error::RobotsDisallowed(url)) => {
                        debug!("{}: adapter request denied by robots.txt: {}", tag, url);
                        session.counters.blocked_by_robots += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!("{}: search failed: {}", tag, e);
                        session.note_failure(&tag);
                        continue;
                    }
                };
                taken += 1;
                if let Some(pb) = &spinner {
                    pb.inc(1);
                }

                let timer = Instant::now();
                let (outcome, patterns) = self
                    .process_stub(fetcher.as_ref(), &ctx, &stub, deadline, &mut session)
                    .await;
                session.processing_ms += timer.elapsed().as_millis() as u64;

                info!(
                    target: "accrete::ingest",
                    source = %tag,
                    source_id = %stub.source_id,
                    content_hash = %fetcher.hash_for(&stub),
                    outcome = outcome.as_str(),
                    "{}",
                    outcome
                );
                report.patterns.extend(patterns);
                report.outcomes.push(StubOutcome {
                    source_tag: tag.clone(),
                    source_id: stub.source_id.clone(),
                    outcome,
                });
            }
            if let Some(pb) = spinner {
                pb.finish_with_message("done");
            }
        }

        session.finish(self.clock.now());
        self.flush(&session).await;

        info!(
            "Cycle {} done: fetched {}, persisted {}, deduped {}, filtered {}/{}, failures {}",
            session.session_id,
            session.counters.fetched,
            session.counters.persisted,
            session.counters.deduped,
            session.counters.filtered_quality,
            session.counters.filtered_alignment,
            session.counters.failed_fetches
        );
        report.session = session;
        Ok(report)
    }

    async fn process_stub(
        &mut self,
        fetcher: &dyn Fetcher,
        ctx: &FetchContext,
        stub: &RecordStub,
        deadline: Duration,
        session: &mut SessionMetrics,
    ) -> (Outcome, Vec<PatternEmerged>) {
        let tag = ctx.source_tag.as_str();
        session.note_fetched(tag);

        match self.gate.validate(stub.url.as_deref(), tag, ctx.priority).await {
            Verdict::Ok => session.counters.requests_made += 1,
            _ => {
                session.counters.blocked_by_robots += 1;
                return (Outcome::RobotsDenied, Vec::new());
            }
        }

        let hash = fetcher.hash_for(stub);
        let mut meta = BTreeMap::new();
        meta.insert("source_id".to_string(), serde_json::json!(stub.source_id));
        match self.dedup.check_and_add(&hash, tag, meta) {
            Ok(true) => {}
            Ok(false) => {
                session.counters.deduped += 1;
                return (Outcome::Duplicate, Vec::new());
            }
            // The hash is registered in memory; only the flush failed
            Err(e) => warn!("Dedup flush failed: {}", e),
        }

        let extracted = match tokio::time::timeout(deadline, fetcher.extract(ctx, stub)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Deadline(deadline.as_secs())),
        };
        let mut record = match extracted {
            Ok(record) => record,
            Err(Error::RobotsDisallowed(url)) => {
                session.counters.blocked_by_robots += 1;
                debug!("Extraction denied by robots.txt: {}", url);
                return (Outcome::RobotsDenied, Vec::new());
            }
            Err(e) => {
                session.note_failure(tag);
                return (
                    Outcome::AdapterFailure {
                        message: e.to_string(),
                    },
                    Vec::new(),
                );
            }
        };

        let now = self.clock.now();
        record.content_hash = hash.clone();
        record.ingested_at = now;

        let quality = self.quality.filter(&mut record, now);
        if let Some(reason) = quality.reason {
            session.counters.filtered_quality += 1;
            return (Outcome::QualityRejected { reason }, Vec::new());
        }

        let alignment = self.alignment.score(&record);
        record.alignment_score = Some(alignment.composite);
        if !alignment.accepted {
            session.counters.filtered_alignment += 1;
            debug!(
                "Alignment {:.2} for {}: {}",
                alignment.composite,
                record.natural_key(),
                alignment.rationale
            );
            return (
                Outcome::AlignmentRejected {
                    rationale: alignment.rationale,
                },
                Vec::new(),
            );
        }

        let stored = match self.store.put(&record) {
            Ok(stored) => stored,
            Err(e) => {
                session.counters.store_failures += 1;
                self.dedup.release(&hash);
                warn!("Dropping {} this cycle: {}", record.natural_key(), e);
                return (
                    Outcome::StoreTransient {
                        message: e.to_string(),
                    },
                    Vec::new(),
                );
            }
        };
        if !stored.created {
            session.counters.deduped += 1;
            return (Outcome::Duplicate, Vec::new());
        }
        record.storage_path = Some(stored.path);
        record.tier = Tier::Hot;

        self.graph.ingest(&record, now);
        let patterns = self.detector.observe(&record, now, self.sink.as_ref());
        session.increment(tag, &record.kind, stored.bytes);
        self.gate.record_attribution(&record).await;

        (Outcome::Persisted, patterns)
    }

    /// Persist every component; failures are logged, never fatal
    async fn flush(&mut self, session: &SessionMetrics) {
        let now = self.clock.now();
        if let Err(e) = self.dedup.flush() {
            error!("Failed to flush dedup table: {}", e);
        }
        if let Err(e) = self.graph.persist() {
            error!("Failed to save graph: {}", e);
        }
        if let Err(e) = self.detector.persist() {
            error!("Failed to save pattern registry: {}", e);
        }
        if let Err(e) = self.gate.persist().await {
            error!("Failed to save ethics log: {}", e);
        }
        self.metrics
            .record_graph(self.graph.node_count(), self.graph.edge_count(), now);
        self.metrics.record_session(session, now);
        if let Err(e) = self.metrics.persist() {
            error!("Failed to save metrics: {}", e);
        }
    }

    /// Cycle until shutdown (or `max_cycles`), honoring each source's
    /// update frequency after the first cycle
    pub async fn run_continuous(
        &mut self,
        only: &[String],
        max_cycles: Option<u64>,
    ) -> Result<Vec<CycleReport>> {
        let interval = Duration::from_secs(self.config.engine.cycle_interval_seconds);
        let mut reports = Vec::new();

        loop {
            let report = self.cycle(only, !reports.is_empty()).await?;
            let interrupted = report.interrupted;
            reports.push(report);

            if interrupted || self.stopping() {
                break;
            }
            if max_cycles.is_some_and(|max| reports.len() as u64 >= max) {
                break;
            }

            info!("Sleeping {}s until next cycle", interval.as_secs());
            let mut remaining = interval;
            while !remaining.is_zero() && !self.stopping() {
                let step = remaining.min(Duration::from_secs(1));
                self.clock.sleep(step).await;
                remaining -= step;
            }
            if self.stopping() {
                break;
            }
        }

        info!("Continuous run stopped after {} cycles", reports.len());
        Ok(reports)
    }

    /// Recompute `alignment_score` for every stored record
    pub fn rescore(&mut self) -> RescoreReport {
        let mut report = RescoreReport::default();
        let records: Vec<_> = self.store.records().collect();
        for mut record in records {
            let result = self.alignment.score(&record);
            record.alignment_score = Some(result.composite);
            match self.store.rewrite(&record) {
                Ok(()) => {
                    report.rescored += 1;
                    if result.accepted {
                        report.accepted += 1;
                    } else {
                        report.rejected += 1;
                    }
                }
                Err(e) => {
                    warn!("Failed to rescore {}: {}", record.content_hash, e);
                    report.failures += 1;
                }
            }
        }
        info!(
            "Rescored {} records ({} now below threshold)",
            report.rescored, report.rejected
        );
        report
    }

    /// Replace the graph with one rebuilt from the store
    pub fn rebuild_graph(&mut self) -> Result<GraphStats> {
        self.graph.clear();
        let records: Vec<_> = self.store.records().collect();
        for record in &records {
            self.graph.ingest(record, record.ingested_at);
        }
        self.graph.persist()?;
        info!("Rebuilt graph from {} stored records", records.len());
        Ok(self.graph.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ethics::StaticRobotsProbe;
    use crate::models::Record;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct Feed {
        tag: String,
        priority: Priority,
        stubs: Vec<RecordStub>,
        fail_extract: bool,
    }

    impl Feed {
        fn new(tag: &str, priority: Priority, texts: &[&str]) -> Self {
            Self {
                tag: tag.to_string(),
                priority,
                stubs: texts
                    .iter()
                    .enumerate()
                    .map(|(i, t)| RecordStub::new(tag, format!("{}-{}", tag, i)).with_field("title", *t))
                    .collect(),
                fail_extract: false,
            }
        }
    }

    #[async_trait]
    impl Fetcher for Feed {
        fn source_tag(&self) -> &str {
            &self.tag
        }

        fn priority(&self) -> Priority {
            self.priority
        }

        fn search<'a>(
            &'a self,
            _ctx: &'a FetchContext,
            _queries: &'a [String],
        ) -> BoxStream<'a, Result<RecordStub>> {
            stream::iter(self.stubs.clone().into_iter().map(Ok)).boxed()
        }

        async fn extract(&self, _ctx: &FetchContext, stub: &RecordStub) -> Result<Record> {
            if self.fail_extract {
                return Err(Error::Adapter("boom".to_string()));
            }
            Ok(stub.clone().into_record("document", &[], Utc::now()))
        }
    }

    #[derive(Default)]
    struct NullSink(Mutex<usize>);

    impl PatternSink for NullSink {
        fn emit(&self, _event: &PatternEmerged) -> Result<()> {
            *self.0.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn permissive(tmp: &TempDir) -> Config {
        let mut config = Config::with_root(tmp.path());
        config.sources.clear();
        config.quality.keywords = vec!["alpha".into(), "beta".into(), "gamma".into()];
        config.quality.thresholds.relevance = 0.0;
        config.quality.thresholds.authority = 0.0;
        config.quality.thresholds.engagement = 0.0;
        config.alignment.threshold = 0.0;
        config
    }

    fn open(config: Config, fetchers: Vec<Arc<dyn Fetcher>>) -> Orchestrator {
        Orchestrator::open(
            config,
            Collaborators {
                fetchers,
                clock: Arc::new(ManualClock::default()),
                probe: Arc::new(StaticRobotsProbe::allow_all()),
                sink: Arc::new(NullSink::default()),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sources_sorted_by_priority_then_tag() {
        let tmp = TempDir::new().unwrap();
        let orch = open(
            permissive(&tmp),
            vec![
                Arc::new(Feed::new("zeta", Priority::Low, &[])),
                Arc::new(Feed::new("beta", Priority::Default, &[])),
                Arc::new(Feed::new("alpha", Priority::Low, &[])),
                Arc::new(Feed::new("omega", Priority::Critical, &[])),
            ],
        );
        assert_eq!(orch.source_order(), vec!["omega", "alpha", "zeta", "beta"]);
    }

    #[tokio::test]
    async fn test_config_priority_overrides_fetcher() {
        let tmp = TempDir::new().unwrap();
        let mut config = permissive(&tmp);
        let mut source = SourceConfig::new("late");
        source.priority = Some(Priority::Critical);
        source.adapter = Some("local".to_string());
        config.sources.push(source);
        let orch = open(
            config,
            vec![
                Arc::new(Feed::new("early", Priority::High, &[])),
                Arc::new(Feed::new("late", Priority::Low, &[])),
            ],
        );
        assert_eq!(orch.source_order(), vec!["late", "early"]);
    }

    #[tokio::test]
    async fn test_max_per_cycle_caps_source() {
        let tmp = TempDir::new().unwrap();
        let mut config = permissive(&tmp);
        let mut source = SourceConfig::new("s");
        source.adapter = Some("local".to_string());
        source.max_per_cycle = 2;
        config.sources.push(source);
        let mut orch = open(
            config,
            vec![Arc::new(Feed::new("s", Priority::High, &["alpha one", "alpha two", "alpha three"]))],
        );
        let report = orch.run_cycle(&[]).await.unwrap();
        assert_eq!(report.session.counters.fetched, 2);
        assert_eq!(report.session.counters.persisted, 2);
    }

    #[tokio::test]
    async fn test_extract_failure_is_counted_and_hash_kept() {
        let tmp = TempDir::new().unwrap();
        let mut feed = Feed::new("s", Priority::High, &["alpha"]);
        feed.fail_extract = true;
        let mut orch = open(permissive(&tmp), vec![Arc::new(feed)]);

        let report = orch.run_cycle(&[]).await.unwrap();
        assert_eq!(report.session.counters.failed_fetches, 1);
        assert!(matches!(report.outcomes[0].outcome, Outcome::AdapterFailure { .. }));
        assert_eq!(orch.dedup().len(), 1);

        let again = orch.run_cycle(&[]).await.unwrap();
        assert_eq!(again.outcomes[0].outcome, Outcome::Duplicate);
    }

    #[tokio::test]
    async fn test_quality_rejection_is_not_persisted() {
        let tmp = TempDir::new().unwrap();
        let mut config = permissive(&tmp);
        config.quality.thresholds.relevance = 0.7;
        let mut orch = open(config, vec![Arc::new(Feed::new("s", Priority::High, &["alpha"]))]);

        let report = orch.run_cycle(&[]).await.unwrap();
        assert_eq!(
            report.outcomes[0].outcome,
            Outcome::QualityRejected {
                reason: FilterReason::LowRelevance
            }
        );
        assert_eq!(orch.store().report().total_files, 0);
        assert_eq!(orch.graph().node_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_releases_hash() {
        let tmp = TempDir::new().unwrap();
        let config = permissive(&tmp);
        let store_dir = config.paths.store_dir.clone();
        let mut orch = open(config, vec![Arc::new(Feed::new("s", Priority::High, &["alpha"]))]);

        // A file where the hot tier directory should be makes every put fail
        std::fs::create_dir_all(&store_dir).unwrap();
        std::fs::write(store_dir.join("hot"), "not a directory").unwrap();

        let report = orch.run_cycle(&[]).await.unwrap();
        assert!(matches!(report.outcomes[0].outcome, Outcome::StoreTransient { .. }));
        assert_eq!(report.session.counters.store_failures, 1);
        assert!(orch.dedup().is_empty());

        std::fs::remove_file(store_dir.join("hot")).unwrap();
        let retry = orch.run_cycle(&[]).await.unwrap();
        assert_eq!(retry.outcomes[0].outcome, Outcome::Persisted);
    }

    #[tokio::test]
    async fn test_source_filter_and_shutdown() {
        let tmp = TempDir::new().unwrap();
        let mut orch = open(
            permissive(&tmp),
            vec![
                Arc::new(Feed::new("a", Priority::High, &["alpha"])),
                Arc::new(Feed::new("b", Priority::High, &["beta"])),
            ],
        );
        let report = orch.run_cycle(&["b".to_string()]).await.unwrap();
        assert_eq!(report.sources_run, vec!["b"]);

        orch.shutdown_handle().store(true, Ordering::SeqCst);
        let stopped = orch.run_cycle(&[]).await.unwrap();
        assert!(stopped.interrupted);
        assert!(stopped.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_continuous_honors_update_frequency() {
        struct Daily(Feed);

        #[async_trait]
        impl Fetcher for Daily {
            fn source_tag(&self) -> &str {
                self.0.source_tag()
            }
            fn priority(&self) -> Priority {
                self.0.priority
            }
            fn update_frequency(&self) -> crate::fetch::UpdateFrequency {
                crate::fetch::UpdateFrequency::Daily
            }
            fn search<'a>(
                &'a self,
                ctx: &'a FetchContext,
                queries: &'a [String],
            ) -> BoxStream<'a, Result<RecordStub>> {
                self.0.search(ctx, queries)
            }
        }

        let tmp = TempDir::new().unwrap();
        let mut config = permissive(&tmp);
        config.engine.cycle_interval_seconds = 3600;
        let mut orch = open(
            config,
            vec![
                Arc::new(Daily(Feed::new("daily", Priority::High, &["alpha"]))),
                Arc::new(Feed::new("often", Priority::High, &["beta"])),
            ],
        );

        let reports = orch.run_continuous(&[], Some(3)).await.unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].sources_run, vec!["daily", "often"]);
        assert_eq!(reports[1].sources_run, vec!["often"]);
        assert_eq!(reports[1].sources_skipped, vec!["daily"]);
    }

    #[tokio::test]
    async fn test_rescore_and_rebuild() {
        let tmp = TempDir::new().unwrap();
        let mut orch = open(
            permissive(&tmp),
            vec![Arc::new(Feed::new("s", Priority::High, &["alpha", "beta"]))],
        );
        orch.run_cycle(&[]).await.unwrap();
        assert_eq!(orch.graph().node_count(), 3);

        let rescored = orch.rescore();
        assert_eq!(rescored.rescored, 2);
        assert_eq!(rescored.failures, 0);
        assert!(orch.store().records().all(|r| r.alignment_score.is_some()));

        let stats = orch.rebuild_graph().unwrap();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.total_edges, 2);
    }
}
