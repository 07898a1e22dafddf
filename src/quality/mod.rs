//! Quality filter: relevance, authority, recency and engagement scoring.
//!
//! Relevance is pluggable through [`Scorer`]; the default counts whole-word
//! matches of the configured domain keywords.

use crate::config::QualityConfig;
use crate::models::{QualityScores, Record};
use crate::text::TextIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

const WEIGHT_RELEVANCE: f64 = 0.35;
const WEIGHT_AUTHORITY: f64 = 0.30;
const WEIGHT_RECENCY: f64 = 0.20;
const WEIGHT_ENGAGEMENT: f64 = 0.15;

/// Relevance output: a score in [0,1] and the concepts that produced it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Relevance {
    pub score: f64,
    pub concepts: BTreeSet<String>,
}

pub trait Scorer: Send + Sync {
    fn relevance(&self, record: &Record) -> Relevance;
}

/// Keyword-presence scorer: matches / 5, capped at 1
#[derive(Debug, Clone)]
pub struct KeywordScorer {
    keywords: Vec<String>,
}

impl KeywordScorer {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }
}

impl Scorer for KeywordScorer {
    fn relevance(&self, record: &Record) -> Relevance {
        let index = TextIndex::new(&record.text());
        let concepts: BTreeSet<String> = self
            .keywords
            .iter()
            .filter(|k| index.contains_phrase(k))
            .cloned()
            .collect();
        Relevance {
            score: (concepts.len() as f64 / 5.0).min(1.0),
            concepts,
        }
    }
}

/// Why a record failed the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    LowRelevance,
    LowAuthority,
    LowEngagement,
    LowComposite,
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FilterReason::LowRelevance => "low_relevance",
            FilterReason::LowAuthority => "low_authority",
            FilterReason::LowEngagement => "low_engagement",
            FilterReason::LowComposite => "low_composite",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub scores: QualityScores,
    pub passed: bool,
    /// First failed floor, in relevance/authority/engagement/composite order
    pub reason: Option<FilterReason>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityStats {
    pub total_checked: u64,
    pub passed: u64,
    pub filtered: BTreeMap<FilterReason, u64>,
}

impl QualityStats {
    pub fn pass_rate(&self) -> f64 {
        if self.total_checked == 0 {
            return 0.0;
        }
        self.passed as f64 / self.total_checked as f64
    }
}

pub struct QualityFilter {
    config: QualityConfig,
    scorer: Box<dyn Scorer>,
    stats: QualityStats,
}

impl QualityFilter {
    pub fn new(config: &QualityConfig) -> Self {
        let scorer = Box::new(KeywordScorer::new(&config.keywords));
        Self::with_scorer(config, scorer)
    }

    pub fn with_scorer(config: &QualityConfig, scorer: Box<dyn Scorer>) -> Self {
        Self {
            config: config.clone(),
            scorer,
            stats: QualityStats::default(),
        }
    }

    /// Score `record`, store the scores and discovered concepts on it, and
    /// report pass/fail against the configured floors
    pub fn filter(&mut self, record: &mut Record, now: DateTime<Utc>) -> QualityReport {
        let relevance = self.scorer.relevance(record);
        let authority = self.authority(&record.source_tag);
        let recency = recency_score(record.published_at().unwrap_or(record.ingested_at), now);
        let engagement = engagement_score(record);
        let composite = WEIGHT_RELEVANCE * relevance.score
            + WEIGHT_AUTHORITY * authority
            + WEIGHT_RECENCY * recency
            + WEIGHT_ENGAGEMENT * engagement;

        let scores = QualityScores {
            relevance: relevance.score,
            authority,
            recency,
            engagement,
            composite,
        };

        let t = &self.config.thresholds;
        let reason = if scores.relevance < t.relevance {
            Some(FilterReason::LowRelevance)
        } else if scores.authority < t.authority {
            Some(FilterReason::LowAuthority)
        } else if scores.engagement < t.engagement {
            Some(FilterReason::LowEngagement)
        } else if scores.composite < t.composite {
            Some(FilterReason::LowComposite)
        } else {
            None
        };

        record.quality_scores = Some(scores);
        record.concepts.extend(relevance.concepts);

        self.stats.total_checked += 1;
        match reason {
            Some(r) => {
                *self.stats.filtered.entry(r).or_insert(0) += 1;
                debug!(
                    "Quality rejected {} ({}): {:?}",
                    record.natural_key(),
                    r,
                    scores
                );
            }
            None => self.stats.passed += 1,
        }

        QualityReport {
            scores,
            passed: reason.is_none(),
            reason,
        }
    }

    /// 0.9 for high-authority sources, 0.7 for medium, 0.5 otherwise
    pub fn authority(&self, source_tag: &str) -> f64 {
        let tag = source_tag.to_lowercase();
        let listed = |list: &[String]| {
            list.iter()
                .map(|s| s.to_lowercase())
                .any(|s| !s.is_empty() && tag.contains(&s))
        };
        if listed(&self.config.high_authority) {
            0.9
        } else if listed(&self.config.medium_authority) {
            0.7
        } else {
            0.5
        }
    }

    pub fn stats(&self) -> &QualityStats {
        &self.stats
    }
}

/// Step function over age in days
pub fn recency_score(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age = (now - timestamp).num_days();
    match age {
        i64::MIN..=7 => 1.0,
        8..=30 => 0.9,
        31..=90 => 0.8,
        91..=180 => 0.7,
        181..=365 => 0.6,
        _ => (1.0 - age as f64 / 1000.0).max(0.3),
    }
}

/// Base 0.5 plus bumps for citations, stars and views
pub fn engagement_score(record: &Record) -> f64 {
    let citations = record.metric("citations").unwrap_or(0.0);
    let stars = record.metric("stars").unwrap_or(0.0);
    let views = record.metric("views").unwrap_or(0.0);

    let mut score: f64 = 0.5;
    if citations > 100.0 {
        score += 0.2;
    } else if citations > 10.0 {
        score += 0.1;
    }
    if stars > 1000.0 {
        score += 0.15;
    } else if stars > 100.0 {
        score += 0.05;
    }
    if views > 10_000.0 {
        score += 0.15;
    } else if views > 1000.0 {
        score += 0.05;
    }
    score.min(1.0)
}
