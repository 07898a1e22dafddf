//! Rescore command implementation

use crate::config::Config;
use crate::error::Result;
use crate::orchestrator::{Collaborators, Orchestrator, RescoreReport};
use crate::persist::RootLock;

/// Recompute alignment for every stored record against the current focus set
pub fn cmd_rescore(config: Config) -> Result<RescoreReport> {
    config.ensure_root()?;
    let _lock = RootLock::acquire(&config.paths.lock_file)?;
    let collaborators = Collaborators::for_config(&config)?;
    let mut orchestrator = Orchestrator::open(config, collaborators)?;
    Ok(orchestrator.rescore())
}

pub fn print_rescore_report(report: &RescoreReport) {
    println!("\n🎯 Rescored {} records\n", report.rescored);
    println!("  Above threshold: {}", report.accepted);
    println!("  Below threshold: {}", report.rejected);
    if report.failures > 0 {
        println!("  ⚠ Failures: {}", report.failures);
    }
}
