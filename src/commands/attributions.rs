//! Attribution report command

use crate::config::Config;
use crate::error::Result;
use crate::ethics::{Attribution, EthicsLog};
use crate::persist;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionReport {
    pub total: usize,
    pub non_compliant: usize,
    pub recent: Vec<Attribution>,
}

/// The `limit` most recent attribution rows from `ethics_log.json`
pub fn cmd_attributions(config: &Config, limit: usize) -> Result<AttributionReport> {
    let log = persist::load_or_default::<EthicsLog>(&config.paths.ethics_log);
    let skip = log.attributions.len().saturating_sub(limit);
    Ok(AttributionReport {
        total: log.attributions.len(),
        non_compliant: log
            .attributions
            .iter()
            .filter(|a| !a.license_compliant)
            .count(),
        recent: log.attributions[skip..].to_vec(),
    })
}

pub fn print_attributions(report: &AttributionReport) {
    println!("\n📜 Attributions ({} total)\n", report.total);
    if report.recent.is_empty() {
        println!("No content ingested yet. Use 'accrete run' to start.");
        return;
    }
    for row in &report.recent {
        let mark = if row.license_compliant { "✓" } else { "⚠" };
        println!("{} {}", mark, row.attribution_text);
        println!("    License: {}  ({})", row.license, row.timestamp.to_rfc3339());
    }
    if report.non_compliant > 0 {
        println!(
            "\n{} records carry a license that needs review",
            report.non_compliant
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn row(i: usize, license: &str) -> Attribution {
        Attribution {
            content_hash: format!("h{}", i),
            source: "arxiv".to_string(),
            url: format!("https://arxiv.org/abs/{}", i),
            license: license.to_string(),
            license_compliant: crate::ethics::is_open_license(license),
            attribution_text: format!("Content sourced from arxiv (https://arxiv.org/abs/{})", i),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_report_limits_to_most_recent() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_root(tmp.path());
        let log = EthicsLog {
            attributions: vec![row(1, "MIT"), row(2, "proprietary"), row(3, "CC-BY-4.0")],
            ..Default::default()
        };
        persist::save_atomic(&config.paths.ethics_log, &log).unwrap();

        let report = cmd_attributions(&config, 2).unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.non_compliant, 1);
        assert_eq!(report.recent.len(), 2);
        assert_eq!(report.recent[1].content_hash, "h3");
    }
}
