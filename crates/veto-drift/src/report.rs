use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use veto_types::{ConcernLevel, RiskLevel, Severity};

// ── Input ───────────────────────────────────────────────────────────────

/// One observed exchange between the user and the assistant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub timestamp: DateTime<Utc>,
    pub user_message: String,
    pub ai_response: String,
    #[serde(default)]
    pub topic: Option<String>,
    /// The exchange carried a personality or sass adjustment.
    #[serde(default)]
    pub personality_adjustment: bool,
}

impl Interaction {
    pub fn new(user_message: impl Into<String>, ai_response: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            user_message: user_message.into(),
            ai_response: ai_response.into(),
            topic: None,
            personality_adjustment: false,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_personality_adjustment(mut self) -> Self {
        self.personality_adjustment = true;
        self
    }
}

// ── Metrics ─────────────────────────────────────────────────────────────

/// The eight behavioral metrics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    PersonalityChangeRate,
    ResponseConsistency,
    InteractionFrequency,
    TopicDiversity,
    EmotionalLanguageRatio,
    DependencyLanguageFrequency,
    BoundaryRespect,
    AutonomyEncouragement,
}

impl MetricName {
    pub const ALL: [MetricName; 8] = [
        Self::PersonalityChangeRate,
        Self::ResponseConsistency,
        Self::InteractionFrequency,
        Self::TopicDiversity,
        Self::EmotionalLanguageRatio,
        Self::DependencyLanguageFrequency,
        Self::BoundaryRespect,
        Self::AutonomyEncouragement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PersonalityChangeRate => "personality_change_rate",
            Self::ResponseConsistency => "response_consistency",
            Self::InteractionFrequency => "interaction_frequency",
            Self::TopicDiversity => "topic_diversity",
            Self::EmotionalLanguageRatio => "emotional_language_ratio",
            Self::DependencyLanguageFrequency => "dependency_language_frequency",
            Self::BoundaryRespect => "boundary_respect",
            Self::AutonomyEncouragement => "autonomy_encouragement",
        }
    }
}

impl std::fmt::Display for MetricName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a metric across the sampled window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// Grade `drift` against `threshold`.
///
/// LOW below half the threshold, MEDIUM below it, HIGH below twice it,
/// CRITICAL beyond.
pub fn concern_for(drift: f64, threshold: f64) -> ConcernLevel {
    if drift < 0.5 * threshold {
        Severity::Low
    } else if drift < threshold {
        Severity::Medium
    } else if drift < 2.0 * threshold {
        Severity::High
    } else {
        Severity::Critical
    }
}

/// One metric compared with its baseline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriftAnalysis {
    pub metric: MetricName,
    pub current: f64,
    pub baseline: f64,
    pub drift: f64,
    pub threshold: f64,
    pub concern: ConcernLevel,
    pub trend: Trend,
}

/// Derived alert for a metric or attachment finding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriftAlert {
    /// Metric name, or `"attachment_risk"`.
    pub source: String,
    pub concern: ConcernLevel,
    pub message: String,
    pub current: f64,
    pub baseline: Option<f64>,
}

// ── Attachment ──────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentIndicatorKind {
    ExcessiveUsage,
    EmotionalDependency,
    SocialIsolation,
    RelationshipConfusion,
}

impl AttachmentIndicatorKind {
    /// Fixed weight in the overall score. Weights do not sum to one.
    pub fn weight(&self) -> f64 {
        match self {
            Self::ExcessiveUsage => 0.3,
            Self::EmotionalDependency => 0.4,
            Self::SocialIsolation => 0.4,
            Self::RelationshipConfusion => 0.5,
        }
    }
}

/// One attachment indicator with a score in `[0, 1]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttachmentIndicator {
    pub kind: AttachmentIndicatorKind,
    pub score: f64,
    pub evidence: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentUrgency {
    None,
    Monitor,
    Soon,
    Immediate,
}

impl AttachmentUrgency {
    pub fn for_score(score: f64) -> Self {
        if score > 0.7 {
            Self::Immediate
        } else if score > 0.4 {
            Self::Soon
        } else if score > 0.2 {
            Self::Monitor
        } else {
            Self::None
        }
    }

    /// Risk level this urgency implies for the overall report.
    pub fn implied_risk(&self) -> RiskLevel {
        match self {
            Self::None | Self::Monitor => Severity::Low,
            Self::Soon => Severity::Medium,
            Self::Immediate => Severity::High,
        }
    }
}

/// Weighted attachment-risk estimate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRisk {
    pub indicators: Vec<AttachmentIndicator>,
    /// Weighted sum; not clamped, so it can exceed 1.0.
    pub overall_score: f64,
    pub urgency: AttachmentUrgency,
}

impl Default for AttachmentRisk {
    fn default() -> Self {
        Self {
            indicators: Vec::new(),
            overall_score: 0.0,
            urgency: AttachmentUrgency::None,
        }
    }
}

// ── Report ──────────────────────────────────────────────────────────────

/// Result of one behavioral analysis pass. Advisory only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BehavioralReport {
    pub generated_at: DateTime<Utc>,
    pub interactions_total: usize,
    pub interactions_analyzed: usize,
    pub risk_level: RiskLevel,
    pub metrics: BTreeMap<MetricName, DriftAnalysis>,
    /// Metrics at MEDIUM concern or above.
    pub drift_detected: BTreeMap<MetricName, DriftAnalysis>,
    pub attachment_risk: AttachmentRisk,
    pub alerts: Vec<DriftAlert>,
    pub recommendations: Vec<String>,
}

impl BehavioralReport {
    pub(crate) fn empty(now: DateTime<Utc>) -> Self {
        Self {
            generated_at: now,
            interactions_total: 0,
            interactions_analyzed: 0,
            risk_level: Severity::Low,
            metrics: BTreeMap::new(),
            drift_detected: BTreeMap::new(),
            attachment_risk: AttachmentRisk::default(),
            alerts: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    /// Highest concern among all metrics.
    pub fn worst_concern(&self) -> ConcernLevel {
        self.metrics
            .values()
            .map(|m| m.concern)
            .max()
            .unwrap_or(Severity::Low)
    }
}
