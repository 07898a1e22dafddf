//! Configuration management for accrete
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::models::Priority;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Adapter names understood by [`crate::fetch::build_fetcher`]
pub const KNOWN_ADAPTERS: &[&str] = &["arxiv", "github", "local"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Orchestrator scheduling
    #[serde(default)]
    pub engine: EngineConfig,

    /// Adapter call limits and HTTP settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Configured sources
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,

    /// Robots and rate limiting
    #[serde(default)]
    pub ethics: EthicsConfig,

    /// Quality filter
    #[serde(default)]
    pub quality: QualityConfig,

    /// Alignment scorer
    #[serde(default)]
    pub alignment: AlignmentConfig,

    /// Tiered store aging
    #[serde(default)]
    pub store: StoreConfig,

    /// Dedup persistence
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Emergence detector
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Tracked focus items and gaps
    #[serde(default)]
    pub focus: FocusConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    #[default]
    Oneshot,
    Continuous,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Orchestrator runs when true
    #[serde(default = "default_engine_enabled")]
    pub enabled: bool,

    /// `oneshot` or `continuous`
    #[serde(default)]
    pub mode: EngineMode,

    /// Seconds to sleep between cycles in continuous mode
    #[serde(default = "default_cycle_interval_seconds")]
    pub cycle_interval_seconds: u64,
}

/// Fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Soft deadline per adapter call, in seconds
    #[serde(default = "default_fetch_deadline_seconds")]
    pub deadline_seconds: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// User agent for HTTP requests and robots matching
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// A configured source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source tag (unique)
    pub tag: String,

    /// Adapter implementation; defaults to the tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,

    /// Include in scheduling
    #[serde(default = "default_source_enabled")]
    pub enabled: bool,

    /// Overrides the adapter's declared priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    /// Cap on records taken per cycle
    #[serde(default = "default_max_per_cycle")]
    pub max_per_cycle: usize,

    /// Static queries; `@focus` and `@gaps` expand from the focus set
    #[serde(default)]
    pub queries: Vec<String>,

    /// API base URL override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Directory for the `local` adapter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Environment variable holding an API token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
}

impl SourceConfig {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            adapter: None,
            enabled: true,
            priority: None,
            max_per_cycle: default_max_per_cycle(),
            queries: Vec::new(),
            base_url: None,
            path: None,
            token_env: None,
        }
    }

    pub fn adapter_name(&self) -> &str {
        self.adapter.as_deref().unwrap_or(&self.tag)
    }
}

fn default_sources() -> Vec<SourceConfig> {
    let mut arxiv = SourceConfig::new("arxiv");
    arxiv.priority = Some(Priority::High);
    arxiv.queries = vec!["@focus".to_string(), "@gaps".to_string()];

    let mut github = SourceConfig::new("github");
    github.priority = Some(Priority::Medium);
    github.queries = vec!["@focus".to_string()];
    github.token_env = Some("GITHUB_TOKEN".to_string());

    vec![arxiv, github]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RobotsDefault {
    #[default]
    Allow,
    Deny,
}

/// Ethics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthicsConfig {
    /// Decision when robots.txt cannot be reached
    #[serde(default)]
    pub robots_default: RobotsDefault,

    /// Hours before a cached robots policy is refreshed
    #[serde(default = "default_robots_ttl_hours")]
    pub robots_ttl_hours: u64,

    /// Optional process-wide request cap across all sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_rpm: Option<u32>,

    /// Requests per minute by priority
    #[serde(default)]
    pub rate_limits: RateLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default = "default_rpm_critical")]
    pub critical: u32,
    #[serde(default = "default_rpm_high")]
    pub high: u32,
    #[serde(default = "default_rpm_medium")]
    pub medium: u32,
    #[serde(default = "default_rpm_low")]
    pub low: u32,
    #[serde(default = "default_rpm_default")]
    pub default: u32,
}

impl RateLimits {
    pub fn rpm_for(&self, priority: Priority) -> u32 {
        match priority {
            Priority::Critical => self.critical,
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
            Priority::Default => self.default,
        }
    }

    fn all(&self) -> [(&'static str, u32); 5] {
        [
            ("critical", self.critical),
            ("high", self.high),
            ("medium", self.medium),
            ("low", self.low),
            ("default", self.default),
        ]
    }
}

/// Quality filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Domain keywords for relevance
    #[serde(default = "default_quality_keywords")]
    pub keywords: Vec<String>,

    /// Source tags scoring 0.9 authority
    #[serde(default = "default_high_authority")]
    pub high_authority: Vec<String>,

    /// Source tags scoring 0.7 authority
    #[serde(default = "default_medium_authority")]
    pub medium_authority: Vec<String>,

    #[serde(default)]
    pub thresholds: QualityThresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityThresholds {
    #[serde(default = "default_relevance_floor")]
    pub relevance: f64,
    #[serde(default = "default_authority_floor")]
    pub authority: f64,
    #[serde(default = "default_engagement_floor")]
    pub engagement: f64,
    #[serde(default = "default_composite_floor")]
    pub composite: f64,
}

/// Alignment scorer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// Acceptance threshold for the composite
    #[serde(default = "default_alignment_threshold")]
    pub threshold: f64,

    /// Source tag -> module compatibility
    #[serde(default = "default_module_fit")]
    pub module_fit: BTreeMap<String, f64>,

    /// Module fit for unlisted sources
    #[serde(default = "default_module_fit_fallback")]
    pub module_fit_fallback: f64,

    /// Source tag -> bump added to the quality composite
    #[serde(default = "default_source_bumps")]
    pub source_bumps: BTreeMap<String, f64>,
}

/// Tiered store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_hot_to_warm_days")]
    pub hot_to_warm_days: u64,
    #[serde(default = "default_warm_to_cold_days")]
    pub warm_to_cold_days: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_flush_every")]
    pub flush_every: usize,
}

/// Emergence detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_min_occurrences")]
    pub min_occurrences: usize,
    #[serde(default = "default_convergence_threshold")]
    pub convergence_threshold: f64,
    #[serde(default = "default_buffer_cap")]
    pub buffer_cap: usize,
}

/// A topic currently pursued
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FocusItem {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// `low` and `initiated` items also count as gaps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_level: Option<String>,
}

impl FocusItem {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            integration_level: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FocusConfig {
    #[serde(default)]
    pub items: Vec<FocusItem>,
    /// Topics known to be under-represented
    #[serde(default)]
    pub gaps: Vec<String>,
}

impl FocusConfig {
    /// Explicit gaps plus weakly integrated focus items, deduplicated
    pub fn gaps(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let weak = self.items.iter().filter(|item| {
            matches!(
                item.integration_level.as_deref().map(str::to_lowercase).as_deref(),
                Some("low") | Some("initiated")
            )
        });
        self.gaps
            .iter()
            .cloned()
            .chain(weak.map(|item| item.name.clone()))
            .filter(|g| !g.trim().is_empty() && seen.insert(g.to_lowercase()))
            .collect()
    }
}

/// Paths configuration (computed at runtime)
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    pub base_dir: PathBuf,
    pub config_file: PathBuf,
    pub dedup_file: PathBuf,
    pub graph_file: PathBuf,
    pub patterns_registry: PathBuf,
    pub ethics_log: PathBuf,
    pub metrics_file: PathBuf,
    pub store_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub ingestion_log: PathBuf,
    pub patterns_log: PathBuf,
    pub lock_file: PathBuf,
}

impl PathsConfig {
    pub fn for_root(base: &Path, config_file: &Path) -> Self {
        let logs = base.join("logs");
        Self {
            base_dir: base.to_path_buf(),
            config_file: config_file.to_path_buf(),
            dedup_file: base.join("dedup.json"),
            graph_file: base.join("graph.json"),
            patterns_registry: base.join("emitted_patterns.json"),
            ethics_log: base.join("ethics_log.json"),
            metrics_file: base.join("metrics.json"),
            store_dir: base.join("store"),
            ingestion_log: logs.join("ingestion.log"),
            patterns_log: logs.join("patterns.log"),
            logs_dir: logs,
            lock_file: base.join("accrete.lock"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            fetch: FetchConfig::default(),
            sources: default_sources(),
            ethics: EthicsConfig::default(),
            quality: QualityConfig::default(),
            alignment: AlignmentConfig::default(),
            store: StoreConfig::default(),
            dedup: DedupConfig::default(),
            detector: DetectorConfig::default(),
            focus: FocusConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: default_engine_enabled(),
            mode: EngineMode::default(),
            cycle_interval_seconds: default_cycle_interval_seconds(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            deadline_seconds: default_fetch_deadline_seconds(),
            timeout_secs: default_fetch_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for EthicsConfig {
    fn default() -> Self {
        Self {
            robots_default: RobotsDefault::default(),
            robots_ttl_hours: default_robots_ttl_hours(),
            global_rpm: None,
            rate_limits: RateLimits::default(),
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            critical: default_rpm_critical(),
            high: default_rpm_high(),
            medium: default_rpm_medium(),
            low: default_rpm_low(),
            default: default_rpm_default(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            keywords: default_quality_keywords(),
            high_authority: default_high_authority(),
            medium_authority: default_medium_authority(),
            thresholds: QualityThresholds::default(),
        }
    }
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            relevance: default_relevance_floor(),
            authority: default_authority_floor(),
            engagement: default_engagement_floor(),
            composite: default_composite_floor(),
        }
    }
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            threshold: default_alignment_threshold(),
            module_fit: default_module_fit(),
            module_fit_fallback: default_module_fit_fallback(),
            source_bumps: default_source_bumps(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            hot_to_warm_days: default_hot_to_warm_days(),
            warm_to_cold_days: default_warm_to_cold_days(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            flush_every: default_dedup_flush_every(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_occurrences: default_min_occurrences(),
            convergence_threshold: default_convergence_threshold(),
            buffer_cap: default_buffer_cap(),
        }
    }
}

impl Config {
    /// Get the default base directory (~/.accrete)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".accrete")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Point all paths at `base_dir` (or the default root)
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig::for_root(&base, &base.join("config.toml"));
    }

    /// Defaults rooted at `base_dir`; used by `init` and tests
    pub fn with_root(base_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.init_paths(Some(base_dir.into()));
        config
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {} (run 'accrete init')",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig::for_root(&base, config_path);

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Check if the root has been initialized
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists()
    }

    /// Create the root skeleton; failure here is fatal
    pub fn ensure_root(&self) -> Result<()> {
        for dir in [&self.paths.base_dir, &self.paths.store_dir, &self.paths.logs_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                Error::Config(format!("Root {} is not writable: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    /// Sources that take part in scheduling
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// Expand a source's query list against the focus set.
    ///
    /// Local feeds treat queries as substring filters, so directives are
    /// dropped for them rather than expanded.
    pub fn queries_for(&self, source: &SourceConfig) -> Vec<String> {
        if source.adapter_name() == "local" {
            return source
                .queries
                .iter()
                .map(|q| q.trim())
                .filter(|q| !q.is_empty() && !q.starts_with('@'))
                .map(str::to_string)
                .collect();
        }

        let mut queries = Vec::new();
        for query in &source.queries {
            match query.trim() {
                "@focus" => {
                    for item in &self.focus.items {
                        let description: String = item.description.chars().take(100).collect();
                        let q = format!("{} {}", item.name, description);
                        queries.push(q.trim().to_string());
                    }
                }
                "@gaps" => queries.extend(self.focus.gaps()),
                "" => {}
                other => queries.push(other.to_string()),
            }
        }
        let mut seen = HashSet::new();
        queries.retain(|q| seen.insert(q.clone()));
        queries
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, value: f64| -> Result<()> {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!(
                    "{} must be between 0.0 and 1.0",
                    name
                )));
            }
            Ok(())
        };

        let t = &self.quality.thresholds;
        unit("quality.thresholds.relevance", t.relevance)?;
        unit("quality.thresholds.authority", t.authority)?;
        unit("quality.thresholds.engagement", t.engagement)?;
        unit("quality.thresholds.composite", t.composite)?;
        unit("alignment.threshold", self.alignment.threshold)?;
        unit("alignment.module_fit_fallback", self.alignment.module_fit_fallback)?;
        for (tag, fit) in &self.alignment.module_fit {
            unit(&format!("alignment.module_fit.{}", tag), *fit)?;
        }

        for (name, rpm) in self.ethics.rate_limits.all() {
            if rpm == 0 {
                return Err(Error::Config(format!(
                    "ethics.rate_limits.{} must be positive",
                    name
                )));
            }
        }
        if self.ethics.global_rpm == Some(0) {
            return Err(Error::Config("ethics.global_rpm must be positive".to_string()));
        }

        if self.store.hot_to_warm_days >= self.store.warm_to_cold_days {
            return Err(Error::Config(
                "store.hot_to_warm_days must be < store.warm_to_cold_days".to_string(),
            ));
        }

        if self.detector.min_occurrences == 0 {
            return Err(Error::Config(
                "detector.min_occurrences must be >= 1".to_string(),
            ));
        }
        if self.detector.buffer_cap == 0 {
            return Err(Error::Config("detector.buffer_cap must be >= 1".to_string()));
        }
        if self.detector.convergence_threshold < 0.0 {
            return Err(Error::Config(
                "detector.convergence_threshold must not be negative".to_string(),
            ));
        }

        if self.dedup.flush_every == 0 {
            return Err(Error::Config("dedup.flush_every must be >= 1".to_string()));
        }

        if self.fetch.deadline_seconds == 0 {
            return Err(Error::Config(
                "fetch.deadline_seconds must be positive".to_string(),
            ));
        }

        let mut tags = HashSet::new();
        for source in &self.sources {
            if source.tag.trim().is_empty() {
                return Err(Error::Config("sources[*].tag must not be empty".to_string()));
            }
            if !tags.insert(source.tag.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate source tag: {}",
                    source.tag
                )));
            }
            if !KNOWN_ADAPTERS.contains(&source.adapter_name()) {
                return Err(Error::Config(format!(
                    "Unknown adapter '{}' for source '{}' (expected one of: {})",
                    source.adapter_name(),
                    source.tag,
                    KNOWN_ADAPTERS.join(", ")
                )));
            }
            if source.adapter_name() == "local" && source.path.is_none() {
                return Err(Error::Config(format!(
                    "Source '{}' uses the local adapter and needs a path",
                    source.tag
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.engine.enabled);
        assert_eq!(config.engine.mode, EngineMode::Oneshot);
        assert_eq!(config.ethics.rate_limits.rpm_for(Priority::Low), 5);
        assert_eq!(config.quality.thresholds.relevance, 0.7);
        assert_eq!(config.detector.buffer_cap, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::with_root(tmp.path());
        config.engine.cycle_interval_seconds = 60;
        config.focus.items.push(FocusItem::new("agents", "multi agent planning"));

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load(&config.paths.config_file).unwrap();
        assert_eq!(loaded.engine.cycle_interval_seconds, 60);
        assert_eq!(loaded.focus.items, config.focus.items);
        assert_eq!(loaded.sources.len(), 2);
        assert_eq!(loaded.paths.graph_file, tmp.path().join("graph.json"));
        assert_eq!(loaded.paths.patterns_log, tmp.path().join("logs").join("patterns.log"));
    }

    #[test]
    fn test_load_partial_toml_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[engine]
mode = "continuous"

[ethics]
robots_default = "deny"

[ethics.rate_limits]
high = 60

[[sources]]
tag = "papers"
adapter = "arxiv"
priority = "critical"
queries = ["@gaps", "reasoning"]
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.engine.mode, EngineMode::Continuous);
        assert_eq!(config.ethics.robots_default, RobotsDefault::Deny);
        assert_eq!(config.ethics.rate_limits.high, 60);
        assert_eq!(config.ethics.rate_limits.low, 5);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].adapter_name(), "arxiv");
        assert_eq!(config.sources[0].max_per_cycle, 50);
    }

    #[test]
    fn test_missing_config_is_error() {
        let tmp = TempDir::new().unwrap();
        let err = Config::load(&tmp.path().join("config.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.quality.thresholds.relevance = 1.5;
        assert!(config.validate().is_err());
        config.quality.thresholds.relevance = 0.7;

        config.ethics.rate_limits.medium = 0;
        assert!(config.validate().is_err());
        config.ethics.rate_limits.medium = 10;

        config.store.hot_to_warm_days = 200;
        assert!(config.validate().is_err());
        config.store.hot_to_warm_days = 30;

        config.sources.push(SourceConfig::new("arxiv"));
        assert!(config.validate().is_err());
        config.sources.pop();

        config.sources.push(SourceConfig::new("youtube"));
        assert!(config.validate().is_err());
        config.sources.pop();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_gaps_include_weak_focus_items() {
        let mut focus = FocusConfig::default();
        focus.gaps = vec!["causal inference".to_string()];
        focus.items.push(FocusItem {
            name: "memory".to_string(),
            description: String::new(),
            integration_level: Some("initiated".to_string()),
        });
        focus.items.push(FocusItem {
            name: "planning".to_string(),
            description: String::new(),
            integration_level: Some("high".to_string()),
        });
        focus.items.push(FocusItem {
            name: "Causal Inference".to_string(),
            description: String::new(),
            integration_level: Some("low".to_string()),
        });

        assert_eq!(focus.gaps(), vec!["causal inference", "memory"]);
    }

    #[test]
    fn test_queries_expand_focus_directives() {
        let mut config = Config::default();
        config.focus.items.push(FocusItem::new("agents", "tool use"));
        config.focus.gaps.push("world models".to_string());

        let mut source = SourceConfig::new("arxiv");
        source.queries = vec![
            "@focus".to_string(),
            "@gaps".to_string(),
            "static".to_string(),
            "static".to_string(),
        ];

        assert_eq!(
            config.queries_for(&source),
            vec!["agents tool use", "world models", "static"]
        );
    }

    #[test]
    fn test_local_feed_keeps_only_literal_filters() {
        let mut config = Config::default();
        config.focus.items.push(FocusItem::new("agents", "tool use"));
        config.focus.gaps.push("world models".to_string());

        let mut source = SourceConfig::new("feed");
        source.adapter = Some("local".to_string());
        source.queries = vec!["@focus".to_string(), "@gaps".to_string()];
        assert!(config.queries_for(&source).is_empty());

        source.queries.push(" graphs ".to_string());
        assert_eq!(config.queries_for(&source), vec!["graphs"]);
    }
}
