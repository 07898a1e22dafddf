//! Run command implementation

use crate::config::{Config, EngineMode};
use crate::error::{Error, Result};
use crate::orchestrator::{Collaborators, CycleReport, Orchestrator};
use crate::persist::RootLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use tracing::{info, warn};

/// Options for the run command
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Force continuous mode regardless of `engine.mode`
    pub continuous: bool,
    /// Restrict the run to these source tags
    pub sources: Vec<String>,
    /// Stop after this many cycles in continuous mode
    pub max_cycles: Option<u64>,
    pub show_progress: bool,
}

/// Per-cycle digest printed after a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    pub session_id: String,
    pub sources_run: Vec<String>,
    pub sources_skipped: Vec<String>,
    pub outcomes: BTreeMap<String, usize>,
    pub fetched: u64,
    pub persisted: u64,
    pub deduped: u64,
    pub filtered_quality: u64,
    pub filtered_alignment: u64,
    pub blocked_by_robots: u64,
    pub failed_fetches: u64,
    pub store_failures: u64,
    pub bytes_written: u64,
    pub patterns: Vec<String>,
    pub interrupted: bool,
}

impl From<&CycleReport> for CycleSummary {
    fn from(report: &CycleReport) -> Self {
        let c = &report.session.counters;
        Self {
            session_id: report.session.session_id.to_string(),
            sources_run: report.sources_run.clone(),
            sources_skipped: report.sources_skipped.clone(),
            outcomes: report
                .outcome_counts()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            fetched: c.fetched,
            persisted: c.persisted,
            deduped: c.deduped,
            filtered_quality: c.filtered_quality,
            filtered_alignment: c.filtered_alignment,
            blocked_by_robots: c.blocked_by_robots,
            failed_fetches: c.failed_fetches,
            store_failures: c.store_failures,
            bytes_written: c.bytes_written,
            patterns: report.patterns.iter().map(|p| p.concept.clone()).collect(),
            interrupted: report.interrupted,
        }
    }
}

/// Run one cycle, or cycle until Ctrl-C in continuous mode
pub async fn cmd_run(config: Config, options: RunOptions) -> Result<Vec<CycleSummary>> {
    if !config.engine.enabled {
        return Err(Error::Config(
            "engine.enabled is false; nothing to run".to_string(),
        ));
    }
    config.ensure_root()?;
    let _lock = RootLock::acquire(&config.paths.lock_file)?;

    let continuous = options.continuous || config.engine.mode == EngineMode::Continuous;
    let collaborators = Collaborators::for_config(&config)?;
    let mut orchestrator =
        Orchestrator::open(config, collaborators)?.with_progress(options.show_progress);

    let shutdown = orchestrator.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing the current record");
            shutdown.store(true, Ordering::SeqCst);
        }
    });

    let reports = if continuous {
        info!("Running continuously");
        orchestrator
            .run_continuous(&options.sources, options.max_cycles)
            .await?
    } else {
        vec![orchestrator.run_cycle(&options.sources).await?]
    };

    Ok(reports.iter().map(CycleSummary::from).collect())
}

/// Print cycle summaries to console
pub fn print_run_summary(summaries: &[CycleSummary]) {
    for summary in summaries {
        println!("\n🔄 Cycle {}\n", summary.session_id);
        println!("Sources: {}", summary.sources_run.join(", "));
        if !summary.sources_skipped.is_empty() {
            println!("Skipped (not due): {}", summary.sources_skipped.join(", "));
        }
        println!("  Fetched:            {}", summary.fetched);
        println!("  Persisted:          {}", summary.persisted);
        println!("  Duplicates:         {}", summary.deduped);
        println!("  Quality rejected:   {}", summary.filtered_quality);
        println!("  Alignment rejected: {}", summary.filtered_alignment);
        println!("  Blocked by robots:  {}", summary.blocked_by_robots);
        println!("  Failed fetches:     {}", summary.failed_fetches);
        println!("  Store failures:     {}", summary.store_failures);
        println!("  Bytes written:      {}", summary.bytes_written);
        if !summary.patterns.is_empty() {
            println!("\n✨ Emerging patterns: {}", summary.patterns.join(", "));
        }
        if summary.interrupted {
            println!("\n⚠ Interrupted before the cycle finished");
        }
    }
}
