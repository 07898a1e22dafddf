//! Default values for configuration

use std::collections::BTreeMap;

/// Orchestrator runs by default
pub fn default_engine_enabled() -> bool {
    true
}

/// Gap between cycles in continuous mode (1 hour)
pub fn default_cycle_interval_seconds() -> u64 {
    3600
}

/// Soft deadline for each adapter call
pub fn default_fetch_deadline_seconds() -> u64 {
    30
}

/// HTTP request timeout in seconds
pub fn default_fetch_timeout() -> u64 {
    20
}

/// Default user agent string
pub fn default_user_agent() -> String {
    format!("accrete/{} (+research ingestion)", env!("CARGO_PKG_VERSION"))
}

pub fn default_source_enabled() -> bool {
    true
}

/// Cap on records taken from one source per cycle
pub fn default_max_per_cycle() -> usize {
    50
}

/// Re-check robots.txt for an origin after this many hours
pub fn default_robots_ttl_hours() -> u64 {
    24
}

pub fn default_rpm_critical() -> u32 {
    30
}

pub fn default_rpm_high() -> u32 {
    20
}

pub fn default_rpm_medium() -> u32 {
    10
}

pub fn default_rpm_low() -> u32 {
    5
}

pub fn default_rpm_default() -> u32 {
    10
}

/// Domain keywords for relevance scoring
pub fn default_quality_keywords() -> Vec<String> {
    [
        "ai",
        "artificial intelligence",
        "machine learning",
        "deep learning",
        "neural network",
        "nlp",
        "computer vision",
        "reinforcement learning",
        "transformer",
        "gpt",
        "llm",
        "agi",
        "cognitive",
        "neural",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Sources scoring 0.9 authority
pub fn default_high_authority() -> Vec<String> {
    [
        "arxiv", "nature", "science", "ieee", "acm", "neurips", "icml", "openai", "deepmind",
        "anthropic", "google", "stanford", "mit",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Sources scoring 0.7 authority
pub fn default_medium_authority() -> Vec<String> {
    [
        "medium",
        "github",
        "hugging face",
        "kaggle",
        "youtube",
        "ted",
        "coursera",
        "reddit",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

pub fn default_relevance_floor() -> f64 {
    0.7
}

pub fn default_authority_floor() -> f64 {
    0.6
}

pub fn default_engagement_floor() -> f64 {
    0.5
}

/// Composite is not gated unless configured
pub fn default_composite_floor() -> f64 {
    0.0
}

/// Alignment acceptance threshold
pub fn default_alignment_threshold() -> f64 {
    0.6
}

/// Source tag -> compatibility with the tracked modules
pub fn default_module_fit() -> BTreeMap<String, f64> {
    [
        ("youtube", 0.8),
        ("arxiv", 0.9),
        ("github", 0.85),
        ("web", 0.7),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), *v))
    .collect()
}

/// Module fit for sources missing from the table
pub fn default_module_fit_fallback() -> f64 {
    0.5
}

/// Per-source bump added to the quality composite
pub fn default_source_bumps() -> BTreeMap<String, f64> {
    [("arxiv", 0.2), ("github", 0.1), ("youtube", 0.05), ("web", 0.0)]
        .iter()
        .map(|(k, v)| (k.to_string(), *v))
        .collect()
}

pub fn default_hot_to_warm_days() -> u64 {
    30
}

pub fn default_warm_to_cold_days() -> u64 {
    180
}

/// Flush the dedup document after this many new hashes
pub fn default_dedup_flush_every() -> usize {
    100
}

pub fn default_min_occurrences() -> usize {
    5
}

pub fn default_convergence_threshold() -> f64 {
    0.85
}

/// Pattern buffer capacity (oldest evicted first)
pub fn default_buffer_cap() -> usize {
    10_000
}
