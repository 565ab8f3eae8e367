//! # veto-drift
//!
//! Behavioral drift monitor. Computes eight metrics over a sampled window
//! of interaction history and compares each with a configured baseline:
//!
//! | Metric | Meaning |
//! |--------|---------|
//! | `personality_change_rate` | fraction of exchanges carrying a personality adjustment |
//! | `response_consistency` | `1 − CV` of response lengths |
//! | `interaction_frequency` | interactions per active day |
//! | `topic_diversity` | unique topics ÷ (0.3 × count), capped at 1 |
//! | `emotional_language_ratio` | emotional-pattern hit rate in user messages |
//! | `dependency_language_frequency` | dependency-pattern hit rate in user messages |
//! | `boundary_respect` | `1 −` undisclaimed boundary requests ÷ count |
//! | `autonomy_encouragement` | `0.5 +` net autonomy phrasing ÷ `2N` |
//!
//! A separate weighted attachment-risk score drives an urgency grade. The
//! monitor is advisory and never blocks on its own.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod report;

pub use config::{DriftConfig, MetricBaseline, MetricBaselines, PatternConfig};
pub use error::{DriftError, DriftResult};
pub use metrics::{downsample, PatternSet};
pub use monitor::DriftMonitor;
pub use report::{
    concern_for, AttachmentIndicator, AttachmentIndicatorKind, AttachmentRisk, AttachmentUrgency,
    BehavioralReport, DriftAlert, DriftAnalysis, Interaction, MetricName, Trend,
};
