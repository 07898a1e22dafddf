//! Ethics gate: pre-flight checks on every outbound fetch
//!
//! - robots.txt policy per origin, cached in `ethics_log.json`
//! - per-source minimum request interval, bucketed by priority
//! - attribution rows for every persisted record
//! - violation log

mod rate_limit;
mod robots;

pub use rate_limit::*;
pub use robots::*;

use crate::clock::Clock;
use crate::config::{EthicsConfig, RobotsDefault};
use crate::error::Result;
use crate::models::{Priority, Record};
use crate::persist;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// License markers treated as open
pub const OPEN_LICENSES: &[&str] = &[
    "cc0",
    "cc-by",
    "mit",
    "apache",
    "gpl",
    "bsd",
    "public domain",
    "open access",
    "creative commons",
];

/// Cached policy for one origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourcePolicy {
    pub origin: String,
    pub robots_allowed: bool,
    pub last_checked: DateTime<Utc>,
    pub rate_limit_rpm: u32,
    pub min_interval_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crawl_delay_seconds: Option<f64>,
    /// Raw robots.txt, used for per-path decisions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robots_txt: Option<String>,
}

/// Result of a pre-flight check
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Ok,
    RobotsDenied,
    /// Only returned by [`EthicsGate::check`]; `validate` sleeps instead
    RateLimited { wait: Duration },
}

impl Verdict {
    pub fn is_ok(&self) -> bool {
        matches!(self, Verdict::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub content_hash: String,
    pub source: String,
    pub url: String,
    pub license: String,
    pub license_compliant: bool,
    pub attribution_text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: String,
    pub origin: String,
    pub url: String,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthicsCounters {
    pub requests: u64,
    pub rate_limit_blocks: u64,
    pub robots_blocks: u64,
    pub violations: u64,
    pub attributions: u64,
}

/// On-disk form of `ethics_log.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EthicsLog {
    #[serde(default)]
    pub robots_cache: BTreeMap<String, SourcePolicy>,
    #[serde(default)]
    pub attributions: Vec<Attribution>,
    #[serde(default)]
    pub violations: Vec<Violation>,
    #[serde(default)]
    pub counters: EthicsCounters,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Shared pre-flight gate. Cheap to share behind an `Arc`.
pub struct EthicsGate {
    config: EthicsConfig,
    user_agent: String,
    path: PathBuf,
    clock: Arc<dyn Clock>,
    probe: Arc<dyn RobotsProbe>,
    global: Option<GlobalRateLimiter>,
    state: Mutex<EthicsLog>,
    limiters: Mutex<HashMap<String, SourceRateLimiter>>,
}

impl EthicsGate {
    /// Open the gate, loading any persisted policy cache
    pub fn open(
        config: &EthicsConfig,
        user_agent: &str,
        path: &Path,
        clock: Arc<dyn Clock>,
        probe: Arc<dyn RobotsProbe>,
    ) -> Self {
        let loaded = persist::load_or_archive::<EthicsLog>(path);
        debug!(
            "Ethics log loaded: {} cached origins, {} attributions",
            loaded.value.robots_cache.len(),
            loaded.value.attributions.len()
        );

        let global = config
            .global_rpm
            .map(|rpm| GlobalRateLimiter::per_minute(rpm, clock.clone()));

        Self {
            config: config.clone(),
            user_agent: user_agent.to_string(),
            path: path.to_path_buf(),
            clock,
            probe,
            global,
            state: Mutex::new(loaded.value),
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Block until `target` may be fetched for `source_tag`, or deny it.
    ///
    /// `target` is a URL; anything that does not parse as one skips the
    /// robots check and is only rate limited.
    pub async fn validate(&self, target: Option<&str>, source_tag: &str, priority: Priority) -> Verdict {
        loop {
            match self.check(target, source_tag, priority).await {
                Verdict::RateLimited { wait } => {
                    self.state.lock().await.counters.rate_limit_blocks += 1;
                    self.clock.sleep(wait).await;
                }
                Verdict::Ok => {
                    if let Some(global) = &self.global {
                        global.wait().await;
                    }
                    return Verdict::Ok;
                }
                Verdict::RobotsDenied => return Verdict::RobotsDenied,
            }
        }
    }

    /// Non-blocking form of [`validate`](Self::validate)
    pub async fn check(&self, target: Option<&str>, source_tag: &str, priority: Priority) -> Verdict {
        let rpm = self.config.rate_limits.rpm_for(priority);
        let parsed = target.and_then(|t| Url::parse(t).ok());
        let mut crawl_delay = None;

        if let Some(url) = parsed.as_ref().filter(|u| u.has_host()) {
            let policy = self.policy_for(url, rpm).await;
            crawl_delay = policy.crawl_delay_seconds;

            if !self.robots_permit(&policy, url) {
                self.record_violation(&policy.origin, url.as_str(), source_tag)
                    .await;
                return Verdict::RobotsDenied;
            }
        }

        let mut interval = interval_for_rpm(rpm);
        // Cached policies predate the parser cap, so clamp again here
        if let Some(delay) = crawl_delay
            .filter(|d| d.is_finite() && *d > 0.0)
            .and_then(|d| Duration::try_from_secs_f64(d.min(MAX_CRAWL_DELAY_SECONDS)).ok())
        {
            interval = interval.max(delay);
        }

        let now = self.clock.now();
        let mut limiters = self.limiters.lock().await;
        let limiter = limiters
            .entry(source_tag.to_string())
            .or_insert_with(|| SourceRateLimiter::per_minute(rpm));
        limiter.set_min_interval(interval);

        match limiter.try_acquire(now) {
            Ok(()) => {
                drop(limiters);
                self.state.lock().await.counters.requests += 1;
                Verdict::Ok
            }
            Err(wait) => Verdict::RateLimited { wait },
        }
    }

    fn robots_permit(&self, policy: &SourcePolicy, url: &Url) -> bool {
        if !policy.robots_allowed {
            return false;
        }
        match &policy.robots_txt {
            Some(content) => RobotsRules::parse(content).is_allowed(url.path(), self.agent_token()),
            None => true,
        }
    }

    /// Product token used for robots matching (`accrete/0.1 (...)` -> `accrete`)
    fn agent_token(&self) -> &str {
        self.user_agent
            .split(|c: char| c == '/' || c.is_whitespace())
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("*")
    }

    async fn policy_for(&self, url: &Url, rpm: u32) -> SourcePolicy {
        let origin = url.origin().ascii_serialization();
        let now = self.clock.now();
        let ttl = chrono::Duration::hours(self.config.robots_ttl_hours as i64);

        {
            let mut state = self.state.lock().await;
            if let Some(policy) = state.robots_cache.get_mut(&origin) {
                if now - policy.last_checked <= ttl {
                    policy.rate_limit_rpm = rpm;
                    policy.min_interval_seconds = 60.0 / f64::from(rpm.max(1));
                    return policy.clone();
                }
            }
        }

        let mut origin_url = url.clone();
        origin_url.set_path("/");
        origin_url.set_query(None);
        origin_url.set_fragment(None);

        let fetched = self.probe.fetch(&origin_url).await;
        let (robots_allowed, robots_txt) = match fetched {
            RobotsFetch::Found(content) => (true, Some(content)),
            RobotsFetch::Missing => (true, None),
            RobotsFetch::Unreachable(reason) => {
                let allowed = self.config.robots_default == RobotsDefault::Allow;
                warn!(
                    "robots.txt unreachable for {} ({}); default {}",
                    origin,
                    reason,
                    if allowed { "allow" } else { "deny" }
                );
                (allowed, None)
            }
        };

        let crawl_delay_seconds = robots_txt
            .as_deref()
            .and_then(|c| RobotsRules::parse(c).crawl_delay(self.agent_token()));

        let policy = SourcePolicy {
            origin: origin.clone(),
            robots_allowed,
            last_checked: now,
            rate_limit_rpm: rpm,
            min_interval_seconds: 60.0 / f64::from(rpm.max(1)),
            crawl_delay_seconds,
            robots_txt,
        };

        self.state
            .lock()
            .await
            .robots_cache
            .insert(origin, policy.clone());
        policy
    }

    async fn record_violation(&self, origin: &str, url: &str, source_tag: &str) {
        warn!("robots.txt denies {} for source {}", url, source_tag);
        let mut state = self.state.lock().await;
        state.counters.robots_blocks += 1;
        state.counters.violations += 1;
        state.violations.push(Violation {
            kind: "robots_txt".to_string(),
            origin: origin.to_string(),
            url: url.to_string(),
            source: source_tag.to_string(),
            timestamp: self.clock.now(),
        });
    }

    /// Seed or replace the cached policy for an origin
    pub async fn insert_policy(&self, policy: SourcePolicy) {
        self.state
            .lock()
            .await
            .robots_cache
            .insert(policy.origin.clone(), policy);
    }

    pub async fn policy(&self, origin: &str) -> Option<SourcePolicy> {
        self.state.lock().await.robots_cache.get(origin).cloned()
    }

    /// Append an attribution row for a persisted record
    pub async fn record_attribution(&self, record: &Record) -> Attribution {
        let url = if record.attribution_url.is_empty() {
            format!("{}:{}", record.source_tag, record.source_id)
        } else {
            record.attribution_url.clone()
        };
        let attribution = Attribution {
            content_hash: record.content_hash.clone(),
            source: record.source_tag.clone(),
            attribution_text: format!("Content sourced from {} ({})", record.source_tag, url),
            url,
            license: record.license.clone(),
            license_compliant: is_open_license(&record.license),
            timestamp: self.clock.now(),
        };

        if !attribution.license_compliant {
            debug!(
                "License '{}' for {} needs review",
                record.license, record.content_hash
            );
        }

        let mut state = self.state.lock().await;
        state.counters.attributions += 1;
        state.attributions.push(attribution.clone());
        attribution
    }

    /// Most recent attribution rows, newest last
    pub async fn attribution_report(&self, limit: usize) -> Vec<Attribution> {
        let state = self.state.lock().await;
        let skip = state.attributions.len().saturating_sub(limit);
        state.attributions[skip..].to_vec()
    }

    pub async fn violations(&self) -> Vec<Violation> {
        self.state.lock().await.violations.clone()
    }

    pub async fn counters(&self) -> EthicsCounters {
        self.state.lock().await.counters
    }

    /// Last granted request time for a source tag
    pub async fn last_request_at(&self, source_tag: &str) -> Option<DateTime<Utc>> {
        self.limiters
            .lock()
            .await
            .get(source_tag)
            .and_then(SourceRateLimiter::last_request)
    }

    /// Write `ethics_log.json`
    pub async fn persist(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.last_updated = Some(self.clock.now());
        persist::save_atomic(&self.path, &*state)?;
        info!(
            "Saved ethics log ({} origins, {} attributions, {} violations)",
            state.robots_cache.len(),
            state.attributions.len(),
            state.violations.len()
        );
        Ok(())
    }
}

/// Whether a license string names an open license
pub fn is_open_license(license: &str) -> bool {
    let license = license.to_lowercase();
    OPEN_LICENSES.iter().any(|marker| license.contains(marker))
}
