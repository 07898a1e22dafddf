//! Alignment scorer: how well a record serves the tracked focus set

use crate::config::{AlignmentConfig, FocusConfig, FocusItem};
use crate::models::Record;
use crate::text::{words, TextIndex};
use serde::{Deserialize, Serialize};

const WEIGHT_FOCUS: f64 = 0.3;
const WEIGHT_MODULE: f64 = 0.2;
const WEIGHT_GAP: f64 = 0.3;
const WEIGHT_QUALITY: f64 = 0.2;

/// Leading description words considered for focus matching
const LEADING_WORDS: usize = 5;
/// Shorter leading words ("a", "the", "of") never count as a match
const MIN_LEADING_WORD_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignmentBreakdown {
    pub focus: f64,
    pub module: f64,
    pub gap: f64,
    pub quality: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub composite: f64,
    pub accepted: bool,
    pub breakdown: AlignmentBreakdown,
    pub rationale: String,
}

pub struct AlignmentScorer {
    config: AlignmentConfig,
    focus: Vec<FocusItem>,
    gaps: Vec<String>,
}

impl AlignmentScorer {
    pub fn new(config: &AlignmentConfig, focus: &FocusConfig) -> Self {
        Self {
            config: config.clone(),
            focus: focus.items.clone(),
            gaps: focus.gaps(),
        }
    }

    pub fn gaps(&self) -> &[String] {
        &self.gaps
    }

    pub fn score(&self, record: &Record) -> AlignmentResult {
        let index = TextIndex::new(&record.text());
        let breakdown = AlignmentBreakdown {
            focus: self.focus_relevance(&index),
            module: self.module_fit(&record.source_tag),
            gap: self.gap_contribution(&index),
            quality: self.source_quality(record),
        };
        let composite = WEIGHT_FOCUS * breakdown.focus
            + WEIGHT_MODULE * breakdown.module
            + WEIGHT_GAP * breakdown.gap
            + WEIGHT_QUALITY * breakdown.quality;

        AlignmentResult {
            composite,
            accepted: composite >= self.config.threshold,
            rationale: rationale(composite, &breakdown).to_string(),
            breakdown,
        }
    }

    fn focus_relevance(&self, index: &TextIndex) -> f64 {
        let hits = self
            .focus
            .iter()
            .filter(|item| {
                index.contains_phrase(&item.name)
                    || words(&item.description)
                        .iter()
                        .take(LEADING_WORDS)
                        .filter(|w| w.chars().count() >= MIN_LEADING_WORD_LEN)
                        .any(|w| index.contains_phrase(w))
            })
            .count();
        hits as f64 / self.focus.len().max(1) as f64
    }

    fn module_fit(&self, source_tag: &str) -> f64 {
        self.config
            .module_fit
            .get(source_tag)
            .copied()
            .unwrap_or(self.config.module_fit_fallback)
    }

    fn gap_contribution(&self, index: &TextIndex) -> f64 {
        if self.gaps.is_empty() {
            return 0.5;
        }
        let matches = self.gaps.iter().filter(|g| index.contains_phrase(g)).count();
        (2.0 * matches as f64 / self.gaps.len() as f64).min(1.0)
    }

    fn source_quality(&self, record: &Record) -> f64 {
        let base = record.quality_scores.map(|q| q.composite).unwrap_or(0.5);
        let bump = self
            .config
            .source_bumps
            .get(&record.source_tag)
            .copied()
            .unwrap_or(0.0);
        (base + bump).min(1.0)
    }
}

/// Log text only; never feeds the accept decision
fn rationale(composite: f64, b: &AlignmentBreakdown) -> &'static str {
    if composite >= 0.8 {
        "strongly aligned"
    } else if composite >= 0.6 {
        "moderately aligned"
    } else if b.focus > 0.5 && b.gap < 0.3 {
        "on topic but fills no gap"
    } else if b.gap > 0.5 {
        "fills a gap, low overall relevance"
    } else {
        "low alignment"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{QualityScores, RecordStub};
    use chrono::Utc;

    fn record(source: &str, text: &str) -> Record {
        RecordStub::new(source, "x")
            .with_field("title", text)
            .into_record("document", &[], Utc::now())
    }

    fn focus() -> FocusConfig {
        FocusConfig {
            items: vec![
                FocusItem::new("planning", "hierarchical task decomposition"),
                FocusItem::new("memory", "episodic retrieval for agents"),
            ],
            gaps: vec!["world models".to_string(), "causal inference".to_string()],
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_breakdown_and_composite() {
        let scorer = AlignmentScorer::new(&AlignmentConfig::default(), &focus());
        let mut r = record("arxiv", "Planning with world models");
        r.quality_scores = Some(QualityScores {
            relevance: 1.0,
            authority: 1.0,
            recency: 1.0,
            engagement: 1.0,
            composite: 0.7,
        });
        let result = scorer.score(&r);
        assert!(approx(result.breakdown.focus, 0.5));
        assert!(approx(result.breakdown.module, 0.9));
        assert!(approx(result.breakdown.gap, 1.0));
        assert!(approx(result.breakdown.quality, 0.9));
        assert!(approx(result.composite, 0.15 + 0.18 + 0.3 + 0.18));
        assert!(result.accepted);
        assert_eq!(result.rationale, "strongly aligned");
    }

    #[test]
    fn test_leading_description_words_match() {
        let scorer = AlignmentScorer::new(&AlignmentConfig::default(), &focus());
        let r = record("web", "Notes on episodic recall");
        assert!(approx(scorer.score(&r).breakdown.focus, 0.5));

        // "for" is fourth but too short to count
        let r = record("web", "a guide for beginners");
        assert!(approx(scorer.score(&r).breakdown.focus, 0.0));
    }

    #[test]
    fn test_neutral_defaults() {
        let scorer = AlignmentScorer::new(&AlignmentConfig::default(), &FocusConfig::default());
        let result = scorer.score(&record("unknown", "anything"));
        assert!(approx(result.breakdown.focus, 0.0));
        assert!(approx(result.breakdown.module, 0.5));
        assert!(approx(result.breakdown.gap, 0.5));
        assert!(approx(result.breakdown.quality, 0.5));
        assert!(!result.accepted);
        assert_eq!(result.rationale, "low alignment");
    }

    #[test]
    fn test_rationale_rules() {
        let b = |focus, gap| AlignmentBreakdown {
            focus,
            module: 0.0,
            gap,
            quality: 0.0,
        };
        assert_eq!(rationale(0.85, &b(0.0, 0.0)), "strongly aligned");
        assert_eq!(rationale(0.65, &b(0.0, 0.0)), "moderately aligned");
        assert_eq!(rationale(0.4, &b(0.8, 0.1)), "on topic but fills no gap");
        assert_eq!(rationale(0.4, &b(0.1, 0.8)), "fills a gap, low overall relevance");
        assert_eq!(rationale(0.4, &b(0.4, 0.4)), "low alignment");
    }

    #[test]
    fn test_threshold_is_configurable() {
        let mut config = AlignmentConfig::default();
        config.threshold = 0.0;
        let scorer = AlignmentScorer::new(&config, &FocusConfig::default());
        assert!(scorer.score(&record("unknown", "")).accepted);
    }
}
