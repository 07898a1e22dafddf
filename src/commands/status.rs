//! Status command implementation

use crate::config::Config;
use crate::dedup::DedupStore;
use crate::detect::EmergenceDetector;
use crate::error::Result;
use crate::ethics::{EthicsCounters, EthicsLog};
use crate::graph::{GraphStats, KnowledgeGraph};
use crate::metrics::{MetricsStore, MetricsSummary};
use crate::persist;
use crate::store::{StoreReport, TieredStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub root: String,
    pub engine_enabled: bool,
    pub sources: Vec<String>,
    pub metrics: MetricsSummary,
    pub graph: GraphStats,
    pub dedup_hashes: usize,
    pub store: StoreReport,
    pub ethics: EthicsCounters,
    pub cached_origins: usize,
    pub emitted_patterns: usize,
}

/// Summarize persisted state without taking the root lock
pub fn cmd_status(config: &Config) -> Result<StatusInfo> {
    info!("Getting status");
    let paths = &config.paths;

    let metrics = MetricsStore::open_read_only(&paths.metrics_file).summary(Utc::now());
    let graph = KnowledgeGraph::open_read_only(&paths.graph_file).stats();
    let dedup = DedupStore::open_read_only(&paths.dedup_file);
    let store = TieredStore::new(&paths.store_dir, &config.store).report();
    let ethics = persist::load_or_default::<EthicsLog>(&paths.ethics_log);
    let detector = EmergenceDetector::open_read_only(&config.detector, &paths.patterns_registry);

    Ok(StatusInfo {
        config_path: paths.config_file.display().to_string(),
        root: paths.base_dir.display().to_string(),
        engine_enabled: config.engine.enabled,
        sources: config.enabled_sources().map(|s| s.tag.clone()).collect(),
        metrics,
        graph,
        dedup_hashes: dedup.len(),
        store,
        ethics: ethics.counters,
        cached_origins: ethics.robots_cache.len(),
        emitted_patterns: detector.emitted().len(),
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 accrete Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Root: {}", status.root);
    println!(
        "Engine: {}",
        if status.engine_enabled { "✓ enabled" } else { "✗ disabled" }
    );
    println!("Sources: {}", status.sources.join(", "));

    let m = &status.metrics;
    println!("\nIngestion ({} sessions):", m.total_sessions);
    println!("  Fetched: {}", m.totals.fetched);
    println!("  Persisted: {}", m.totals.persisted);
    println!("  Duplicates: {}", m.totals.deduped);
    println!(
        "  Filtered: {} quality, {} alignment",
        m.totals.filtered_quality, m.totals.filtered_alignment
    );
    println!("  Blocked by robots: {}", m.totals.blocked_by_robots);
    println!("  Success rate: {:.1}%", m.success_rate * 100.0);
    println!("  Avg processing: {:.1} ms/record", m.average_processing_ms);
    if !m.recent_daily.is_empty() {
        println!("  Last 7 days:");
        for day in &m.recent_daily {
            println!(
                "    {}: {} fetched, {} persisted",
                day.date, day.fetched, day.persisted
            );
        }
    }

    println!("\nKnowledge graph:");
    for (kind, count) in &status.graph.nodes_by_type {
        println!("  {}: {}", kind, count);
    }
    println!("  Edges: {}", status.graph.total_edges);
    println!("  Emitted patterns: {}", status.emitted_patterns);

    println!("\nDedup hashes: {}", status.dedup_hashes);

    println!("\nStore:");
    for (tier, usage) in &status.store.tiers {
        println!("  {}: {} files, {} bytes", tier, usage.files, usage.bytes);
    }
    println!("  Compression ratio: {:.2}", status.store.compression_ratio);

    let e = &status.ethics;
    println!("\nEthics:");
    println!("  Requests: {}", e.requests);
    println!("  Rate-limit waits: {}", e.rate_limit_blocks);
    println!("  Robots blocks: {}", e.robots_blocks);
    println!("  Attributions: {}", e.attributions);
    println!("  Cached origins: {}", status.cached_origins);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_status_on_empty_root() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_root(tmp.path());
        config.ensure_root().unwrap();

        let status = cmd_status(&config).unwrap();
        assert_eq!(status.dedup_hashes, 0);
        assert_eq!(status.graph.total_nodes, 0);
        assert_eq!(status.store.total_files, 0);
        assert_eq!(status.metrics.total_sessions, 0);
        assert_eq!(status.sources, vec!["arxiv".to_string(), "github".to_string()]);
    }

    #[test]
    fn test_status_leaves_corrupt_state_in_place() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_root(tmp.path());
        config.ensure_root().unwrap();
        let paths = &config.paths;
        let files = [
            &paths.graph_file,
            &paths.metrics_file,
            &paths.dedup_file,
            &paths.ethics_log,
            &paths.patterns_registry,
        ];
        for file in files {
            std::fs::write(file, "{not json").unwrap();
        }

        let status = cmd_status(&config).unwrap();
        assert_eq!(status.graph.total_nodes, 0);
        assert_eq!(status.dedup_hashes, 0);
        for file in files {
            assert_eq!(std::fs::read_to_string(file).unwrap(), "{not json");
        }
    }
}
