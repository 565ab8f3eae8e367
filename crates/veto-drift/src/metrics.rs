//! Metric and attachment computations over a sampled window.

use std::collections::{BTreeMap, HashSet};

use regex::{Regex, RegexBuilder};

use crate::config::{MetricBaselines, PatternConfig};
use crate::error::{DriftError, DriftResult};
use crate::report::{
    concern_for, AttachmentIndicator, AttachmentIndicatorKind, AttachmentRisk, AttachmentUrgency,
    DriftAnalysis, Interaction, MetricName, Trend,
};

const MAX_EVIDENCE: usize = 3;
const EVIDENCE_CHARS: usize = 80;

// ── Patterns ────────────────────────────────────────────────────────────

/// A compiled, case-insensitive pattern list.
#[derive(Clone, Debug)]
pub struct PatternSet {
    regexes: Vec<Regex>,
}

impl PatternSet {
    pub fn compile(list: &'static str, patterns: &[String]) -> DriftResult<Self> {
        let regexes = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| DriftError::InvalidPattern {
                        list,
                        pattern: p.clone(),
                        source,
                    })
            })
            .collect::<DriftResult<Vec<_>>>()?;
        Ok(Self { regexes })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regexes.iter().any(|r| r.is_match(text))
    }
}

#[derive(Clone, Debug)]
pub(crate) struct CompiledPatterns {
    pub emotional: PatternSet,
    pub dependency: PatternSet,
    pub boundary_violation: PatternSet,
    pub ai_disclaimer: PatternSet,
    pub autonomy: PatternSet,
    pub dependency_encouraging: PatternSet,
    pub social_isolation: PatternSet,
    pub relationship_confusion: PatternSet,
}

impl CompiledPatterns {
    pub fn compile(config: &PatternConfig) -> DriftResult<Self> {
        Ok(Self {
            emotional: PatternSet::compile("emotional", &config.emotional)?,
            dependency: PatternSet::compile("dependency", &config.dependency)?,
            boundary_violation: PatternSet::compile(
                "boundary_violation",
                &config.boundary_violation,
            )?,
            ai_disclaimer: PatternSet::compile("ai_disclaimer", &config.ai_disclaimer)?,
            autonomy: PatternSet::compile("autonomy", &config.autonomy)?,
            dependency_encouraging: PatternSet::compile(
                "dependency_encouraging",
                &config.dependency_encouraging,
            )?,
            social_isolation: PatternSet::compile("social_isolation", &config.social_isolation)?,
            relationship_confusion: PatternSet::compile(
                "relationship_confusion",
                &config.relationship_confusion,
            )?,
        })
    }
}

fn hit_rate(window: &[&Interaction], set: &PatternSet) -> f64 {
    if window.is_empty() {
        return 0.0;
    }
    let hits = window.iter().filter(|i| set.is_match(&i.user_message)).count();
    hits as f64 / window.len() as f64
}

fn evidence(window: &[&Interaction], set: &PatternSet) -> Vec<String> {
    window
        .iter()
        .rev()
        .filter(|i| set.is_match(&i.user_message))
        .take(MAX_EVIDENCE)
        .map(|i| i.user_message.chars().take(EVIDENCE_CHARS).collect())
        .collect()
}

// ── Sampling ────────────────────────────────────────────────────────────

/// Reduce `history` to at most `max` interactions, chronologically.
///
/// Keeps the most recent `recent_fraction` of the budget verbatim and fills
/// the rest with an evenly strided sample of the older interactions.
pub fn downsample(history: &[Interaction], max: usize, recent_fraction: f64) -> Vec<&Interaction> {
    let mut ordered: Vec<&Interaction> = history.iter().collect();
    ordered.sort_by_key(|i| i.timestamp);
    if max == 0 || ordered.len() <= max {
        return ordered;
    }

    let recent_count = ((max as f64 * recent_fraction).floor() as usize).clamp(1, max);
    let older_budget = max - recent_count;
    let split = ordered.len() - recent_count;
    let (older, recent) = ordered.split_at(split);

    let mut sampled: Vec<&Interaction> = (0..older_budget)
        .map(|i| older[i * older.len() / older_budget])
        .collect();
    sampled.extend_from_slice(recent);
    sampled
}

// ── Metrics ─────────────────────────────────────────────────────────────

pub(crate) fn compute(
    metric: MetricName,
    window: &[&Interaction],
    patterns: &CompiledPatterns,
) -> f64 {
    let n = window.len();
    if n == 0 {
        return 0.0;
    }
    let n_f = n as f64;

    match metric {
        MetricName::PersonalityChangeRate => {
            window.iter().filter(|i| i.personality_adjustment).count() as f64 / n_f
        }
        MetricName::ResponseConsistency => {
            if n < 2 {
                return 1.0;
            }
            let lengths: Vec<f64> = window
                .iter()
                .map(|i| i.ai_response.chars().count() as f64)
                .collect();
            let mean = lengths.iter().sum::<f64>() / n_f;
            if mean <= f64::EPSILON {
                return 1.0;
            }
            let variance = lengths.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / n_f;
            let cv = variance.sqrt() / mean;
            1.0 - cv.min(1.0)
        }
        MetricName::InteractionFrequency => {
            let days: HashSet<_> = window.iter().map(|i| i.timestamp.date_naive()).collect();
            n_f / days.len().max(1) as f64
        }
        MetricName::TopicDiversity => {
            let topics: HashSet<String> = window
                .iter()
                .filter_map(|i| i.topic.as_deref())
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect();
            (topics.len() as f64 / (n_f * 0.3)).min(1.0)
        }
        MetricName::EmotionalLanguageRatio => hit_rate(window, &patterns.emotional),
        MetricName::DependencyLanguageFrequency => hit_rate(window, &patterns.dependency),
        MetricName::BoundaryRespect => {
            let violations = window
                .iter()
                .filter(|i| {
                    patterns.boundary_violation.is_match(&i.user_message)
                        && !patterns.ai_disclaimer.is_match(&i.ai_response)
                })
                .count();
            1.0 - violations as f64 / n_f
        }
        MetricName::AutonomyEncouragement => {
            let autonomy = window
                .iter()
                .filter(|i| patterns.autonomy.is_match(&i.ai_response))
                .count() as f64;
            let dependency = window
                .iter()
                .filter(|i| patterns.dependency_encouraging.is_match(&i.ai_response))
                .count() as f64;
            (0.5 + (autonomy - dependency) / (2.0 * n_f)).clamp(0.0, 1.0)
        }
    }
}

fn trend(
    metric: MetricName,
    window: &[&Interaction],
    patterns: &CompiledPatterns,
    threshold: f64,
) -> Trend {
    if window.len() < 4 {
        return Trend::Stable;
    }
    let (first, second) = window.split_at(window.len() / 2);
    let delta = compute(metric, second, patterns) - compute(metric, first, patterns);
    if delta.abs() <= 0.1 * threshold {
        Trend::Stable
    } else if delta > 0.0 {
        Trend::Increasing
    } else {
        Trend::Decreasing
    }
}

pub(crate) fn analyze_metrics(
    window: &[&Interaction],
    baselines: &MetricBaselines,
    patterns: &CompiledPatterns,
) -> BTreeMap<MetricName, DriftAnalysis> {
    MetricName::ALL
        .iter()
        .map(|&metric| {
            let baseline = baselines.get(metric);
            let current = compute(metric, window, patterns);
            let drift = (current - baseline.baseline).abs();
            let analysis = DriftAnalysis {
                metric,
                current,
                baseline: baseline.baseline,
                drift,
                threshold: baseline.threshold,
                concern: concern_for(drift, baseline.threshold),
                trend: trend(metric, window, patterns, baseline.threshold),
            };
            (metric, analysis)
        })
        .collect()
}

// ── Attachment ──────────────────────────────────────────────────────────

pub(crate) fn attachment_risk(
    window: &[&Interaction],
    patterns: &CompiledPatterns,
    daily_usage_threshold: f64,
) -> AttachmentRisk {
    if window.is_empty() {
        return AttachmentRisk::default();
    }

    let per_day = compute(MetricName::InteractionFrequency, window, patterns);
    let usage = AttachmentIndicator {
        kind: AttachmentIndicatorKind::ExcessiveUsage,
        score: (per_day / daily_usage_threshold).min(1.0),
        evidence: if per_day > daily_usage_threshold {
            vec![format!(
                "{per_day:.1} interactions per active day (threshold {daily_usage_threshold:.0})"
            )]
        } else {
            Vec::new()
        },
    };

    let language = |kind, set: &PatternSet, multiplier: f64| AttachmentIndicator {
        kind,
        score: (hit_rate(window, set) * multiplier).min(1.0),
        evidence: evidence(window, set),
    };
    let indicators = vec![
        usage,
        language(
            AttachmentIndicatorKind::EmotionalDependency,
            &patterns.dependency,
            5.0,
        ),
        language(
            AttachmentIndicatorKind::SocialIsolation,
            &patterns.social_isolation,
            10.0,
        ),
        language(
            AttachmentIndicatorKind::RelationshipConfusion,
            &patterns.relationship_confusion,
            8.0,
        ),
    ];

    let overall_score = indicators.iter().map(|i| i.score * i.kind.weight()).sum();
    AttachmentRisk {
        indicators,
        overall_score,
        urgency: AttachmentUrgency::for_score(overall_score),
    }
}
