//! Store aging command implementation

use crate::config::Config;
use crate::error::Result;
use crate::metrics::MetricsStore;
use crate::persist::RootLock;
use crate::store::{AgeReport, SweepReport, TieredStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgeStats {
    pub age: AgeReport,
    pub sweep: Option<SweepReport>,
}

/// Move hot objects to warm and warm to cold, then sweep temp files
pub fn cmd_age_store(config: &Config, sweep: bool) -> Result<AgeStats> {
    config.ensure_root()?;
    let _lock = RootLock::acquire(&config.paths.lock_file)?;

    let store = TieredStore::new(&config.paths.store_dir, &config.store);
    let age = store.age(Utc::now());
    let sweep = sweep.then(|| store.sweep_temp());

    if age.bytes_saved > 0 {
        let mut metrics = MetricsStore::open(&config.paths.metrics_file);
        metrics.record_compression(age.bytes_saved);
        if let Err(e) = metrics.persist() {
            warn!("Failed to save metrics: {}", e);
        }
    }

    info!(
        "Aged store: {} to warm, {} to cold, {} bytes saved",
        age.moved_to_warm, age.moved_to_cold, age.bytes_saved
    );
    Ok(AgeStats { age, sweep })
}

/// Print aging results to console
pub fn print_age_stats(stats: &AgeStats) {
    println!("\n🗄 Store aging\n");
    println!("  Hot → warm: {}", stats.age.moved_to_warm);
    println!("  Warm → cold: {}", stats.age.moved_to_cold);
    println!("  Bytes saved: {}", stats.age.bytes_saved);
    if !stats.age.failures.is_empty() {
        println!("  ⚠ Left in place: {}", stats.age.failures.len());
        for path in &stats.age.failures {
            println!("    {}", path);
        }
    }
    if let Some(sweep) = &stats.sweep {
        println!("  Temp files removed: {} ({} bytes)", sweep.removed, sweep.bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordStub;
    use chrono::Duration;
    use std::time::SystemTime;
    use tempfile::TempDir;

    #[test]
    fn test_age_store_records_compression() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_root(tmp.path());
        config.ensure_root().unwrap();

        let store = TieredStore::new(&config.paths.store_dir, &config.store);
        let mut record = RecordStub::new("arxiv", "2401.1")
            .with_field("title", "An aging test record ".repeat(50))
            .into_record("academic_paper", &["title"], Utc::now());
        record.content_hash = "ab".repeat(32);
        let stored = store.put(&record).unwrap();

        let old = SystemTime::now() - (Duration::days(40)).to_std().unwrap();
        std::fs::File::options()
            .write(true)
            .open(&stored.path)
            .unwrap()
            .set_modified(old)
            .unwrap();

        let stats = cmd_age_store(&config, true).unwrap();
        assert_eq!(stats.age.moved_to_warm, 1);
        assert!(stats.sweep.is_some());
        assert!(!config.paths.lock_file.exists());

        let metrics = MetricsStore::open(&config.paths.metrics_file);
        assert_eq!(
            metrics.data().totals.compressed_bytes_saved,
            stats.age.bytes_saved
        );
    }
}
