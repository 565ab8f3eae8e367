//! Behavioral drift monitor.
//!
//! Analysis is advisory. The monitor never blocks an operation; the
//! coordinator turns its report into incidents.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use veto_audit::{record_or_warn, AuditEntry, AuditSink, AuditTable};
use veto_types::Severity;

use crate::config::DriftConfig;
use crate::error::DriftResult;
use crate::metrics::{analyze_metrics, attachment_risk, downsample, CompiledPatterns};
use crate::report::{
    AttachmentIndicatorKind, AttachmentUrgency, BehavioralReport, DriftAlert, MetricName, Trend,
};

const AUDIT_ACTOR: &str = "drift_monitor";

/// Computes behavioral metrics and attachment risk over interaction history.
pub struct DriftMonitor {
    config: DriftConfig,
    patterns: CompiledPatterns,
    audit: Arc<dyn AuditSink>,
}

impl DriftMonitor {
    pub fn new(config: DriftConfig, audit: Arc<dyn AuditSink>) -> DriftResult<Self> {
        config.validate()?;
        let patterns = CompiledPatterns::compile(&config.patterns)?;
        Ok(Self {
            config,
            patterns,
            audit,
        })
    }

    pub fn config(&self) -> &DriftConfig {
        &self.config
    }

    /// Analyze `history`, sampling down to `max_interactions` first.
    ///
    /// `max_interactions = 0` uses the configured default.
    pub fn analyze_behavioral_patterns(
        &self,
        history: &[crate::Interaction],
        max_interactions: usize,
    ) -> BehavioralReport {
        self.analyze_behavioral_patterns_at(history, max_interactions, Utc::now())
    }

    pub fn analyze_behavioral_patterns_at(
        &self,
        history: &[crate::Interaction],
        max_interactions: usize,
        now: DateTime<Utc>,
    ) -> BehavioralReport {
        let mut report = BehavioralReport::empty(now);
        report.interactions_total = history.len();
        if history.is_empty() {
            debug!("no interactions to analyze");
            return report;
        }

        let max = if max_interactions == 0 {
            self.config.max_interactions
        } else {
            max_interactions
        };
        let window = downsample(history, max, self.config.recent_fraction);
        report.interactions_analyzed = window.len();

        report.metrics = analyze_metrics(&window, &self.config.baselines, &self.patterns);
        report.drift_detected = report
            .metrics
            .iter()
            .filter(|(_, a)| a.concern >= Severity::Medium)
            .map(|(k, a)| (*k, a.clone()))
            .collect();
        report.attachment_risk =
            attachment_risk(&window, &self.patterns, self.config.daily_usage_threshold);

        for analysis in report.drift_detected.values() {
            let direction = match analysis.trend {
                Trend::Increasing => ", trending up",
                Trend::Decreasing => ", trending down",
                Trend::Stable => "",
            };
            report.alerts.push(DriftAlert {
                source: analysis.metric.to_string(),
                concern: analysis.concern,
                message: format!(
                    "{} at {:.3} drifted {:.3} from baseline {:.3}{direction}",
                    analysis.metric, analysis.current, analysis.drift, analysis.baseline
                ),
                current: analysis.current,
                baseline: Some(analysis.baseline),
            });
        }

        let attachment = &report.attachment_risk;
        if attachment.urgency >= AttachmentUrgency::Soon {
            report.alerts.push(DriftAlert {
                source: "attachment_risk".into(),
                concern: attachment.urgency.implied_risk(),
                message: format!(
                    "attachment risk {:.2} ({:?} attention)",
                    attachment.overall_score, attachment.urgency
                ),
                current: attachment.overall_score,
                baseline: None,
            });
        }

        report.risk_level = report
            .worst_concern()
            .max(report.attachment_risk.urgency.implied_risk());
        report.recommendations = recommendations(&report);

        if report.risk_level.is_elevated() {
            warn!(
                risk = %report.risk_level,
                alerts = report.alerts.len(),
                attachment = report.attachment_risk.overall_score,
                "behavioral drift detected"
            );
        } else {
            debug!(
                risk = %report.risk_level,
                analyzed = report.interactions_analyzed,
                "behavioral analysis complete"
            );
        }

        if self.config.audit_snapshots {
            self.audit_report(&report);
        }
        report
    }

    fn audit_report(&self, report: &BehavioralReport) {
        record_or_warn(
            self.audit.as_ref(),
            AuditEntry::new(
                AuditTable::DriftMetrics,
                AUDIT_ACTOR,
                format!(
                    "{} interactions analyzed, risk {}",
                    report.interactions_analyzed, report.risk_level
                ),
            )
            .at(report.generated_at)
            .payload(&serde_json::json!({
                "metrics": &report.metrics,
                "attachment_risk": &report.attachment_risk,
            })),
        );
        for alert in &report.alerts {
            record_or_warn(
                self.audit.as_ref(),
                AuditEntry::new(AuditTable::DriftAlerts, AUDIT_ACTOR, alert.message.clone())
                    .at(report.generated_at)
                    .payload(alert),
            );
        }
    }
}

fn recommendations(report: &BehavioralReport) -> Vec<String> {
    let mut out = Vec::new();
    let elevated = |metric: MetricName| {
        report
            .drift_detected
            .get(&metric)
            .is_some_and(|a| a.concern.is_elevated())
    };

    if elevated(MetricName::PersonalityChangeRate) {
        out.push("slow personality evolution; review recent adjustments".to_string());
    }
    if elevated(MetricName::BoundaryRespect) {
        out.push("reinforce AI disclosure when users ask relationship questions".to_string());
    }
    if elevated(MetricName::AutonomyEncouragement) {
        out.push("favor responses that encourage the user's own decisions".to_string());
    }
    if elevated(MetricName::DependencyLanguageFrequency) {
        out.push("gently point the user toward other sources of support".to_string());
    }

    let attachment = &report.attachment_risk;
    for indicator in &attachment.indicators {
        if indicator.score < 0.5 {
            continue;
        }
        let line = match indicator.kind {
            AttachmentIndicatorKind::ExcessiveUsage => "suggest breaks between sessions",
            AttachmentIndicatorKind::EmotionalDependency => {
                "encourage human connection alongside the assistant"
            }
            AttachmentIndicatorKind::SocialIsolation => "suggest reaching out to friends or family",
            AttachmentIndicatorKind::RelationshipConfusion => {
                "clarify the assistant's nature as an AI"
            }
        };
        out.push(line.to_string());
    }
    if attachment.urgency == AttachmentUrgency::Immediate {
        out.push("escalate attachment findings to a human reviewer".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Interaction;
    use chrono::Duration;
    use veto_audit::{InMemoryAuditLog, QueryWindow};

    fn monitor() -> (DriftMonitor, Arc<InMemoryAuditLog>) {
        let audit = Arc::new(InMemoryAuditLog::new());
        (
            DriftMonitor::new(DriftConfig::default(), audit.clone()).unwrap(),
            audit,
        )
    }

    fn healthy_history(n: i64) -> Vec<Interaction> {
        let start = Utc::now() - Duration::hours(n);
        let topics = ["music", "code", "travel", "food", "science", "books"];
        (0..n)
            .map(|i| {
                let mut interaction = Interaction::new(
                    "can you help me plan my week?",
                    "Sure. You can do it: list your priorities first, then block time.",
                )
                .at(start + Duration::hours(i))
                .topic(topics[i as usize % topics.len()]);
                if i % 10 == 0 {
                    interaction = interaction.with_personality_adjustment();
                }
                interaction
            })
            .collect()
    }

    #[test]
    fn empty_history_is_low_risk() {
        let (monitor, audit) = monitor();
        let report = monitor.analyze_behavioral_patterns(&[], 100);
        assert_eq!(report.risk_level, Severity::Low);
        assert!(report.metrics.is_empty());
        assert!(audit.is_empty());
    }

    #[test]
    fn every_metric_reported() {
        let (monitor, _) = monitor();
        let report = monitor.analyze_behavioral_patterns(&healthy_history(20), 100);
        assert_eq!(report.metrics.len(), 8);
        assert_eq!(report.interactions_analyzed, 20);
    }

    #[test]
    fn sampling_caps_window() {
        let (monitor, _) = monitor();
        let report = monitor.analyze_behavioral_patterns(&healthy_history(50), 10);
        assert_eq!(report.interactions_total, 50);
        assert_eq!(report.interactions_analyzed, 10);
    }

    #[test]
    fn heavy_personality_churn_is_flagged() {
        let (monitor, audit) = monitor();
        let history: Vec<Interaction> = (0..10)
            .map(|_| Interaction::new("hi", "hello").with_personality_adjustment())
            .collect();
        let report = monitor.analyze_behavioral_patterns(&history, 0);
        let churn = &report.metrics[&MetricName::PersonalityChangeRate];
        assert!((churn.current - 1.0).abs() < 1e-12);
        assert_eq!(churn.concern, Severity::Critical);
        assert_eq!(report.risk_level, Severity::Critical);
        assert!(report
            .alerts
            .iter()
            .any(|a| a.source == "personality_change_rate"));
        assert!(!audit
            .list(Some(AuditTable::DriftAlerts), QueryWindow::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn attachment_urgency_raises_risk() {
        let mut config = DriftConfig::default();
        // Neutralize metric drift so only attachment drives the level.
        config.baselines.personality_change_rate.threshold = 10.0;
        config.baselines.response_consistency.threshold = 10.0;
        config.baselines.interaction_frequency.threshold = 1000.0;
        config.baselines.topic_diversity.threshold = 10.0;
        config.baselines.emotional_language_ratio.threshold = 10.0;
        config.baselines.dependency_language_frequency.threshold = 10.0;
        config.baselines.boundary_respect.threshold = 10.0;
        config.baselines.autonomy_encouragement.threshold = 10.0;
        let monitor = DriftMonitor::new(config, Arc::new(InMemoryAuditLog::new())).unwrap();

        let history: Vec<Interaction> = (0..4)
            .map(|_| Interaction::new("I have no friends, only you understand me", "I'm here."))
            .collect();
        let report = monitor.analyze_behavioral_patterns(&history, 0);
        assert_eq!(report.attachment_risk.urgency, AttachmentUrgency::Immediate);
        assert_eq!(report.worst_concern(), Severity::Low);
        assert_eq!(report.risk_level, Severity::High);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("human reviewer")));
    }

    #[test]
    fn analysis_is_repeatable() {
        let (monitor, _) = monitor();
        let history = healthy_history(30);
        let now = Utc::now();
        let a = monitor.analyze_behavioral_patterns_at(&history, 20, now);
        let b = monitor.analyze_behavioral_patterns_at(&history, 20, now);
        assert_eq!(a, b);
    }
}
