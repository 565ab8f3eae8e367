//! Safety Coordinator.
//!
//! Owns the four governance components, the incident list and the
//! overall [`SafetyStatus`]. Only the coordinator mutates incidents and
//! status; components are reached exclusively through their own methods.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use veto_audit::{record_or_warn, AuditEntry, AuditSink, AuditTable, InMemoryAuditLog, JsonlAuditLog};
use veto_drift::{DriftMonitor, Interaction};
use veto_isolation::{IsolationRegistry, RecommendedAction};
use veto_oversight::{ApprovalDisplay, ApprovalResponse, ApprovalStatus, ConsoleDisplay, OversightManager};
use veto_rate_limit::{ChangeRateLimiter, CommittedChange};
use veto_types::{subsystems, Severity};

use crate::config::{AuditBackend, CoordinatorSettings, SafetyConfig};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::incident::{
    compute_status, Incident, IncidentSignal, IncidentState, IncidentType, SafetyStatus,
    SafetyStatusChange, SYSTEM_WIDE,
};
use crate::mutation::{DecisionStage, MutationDecision, MutationProposal};
use crate::notifier::{EmergencyNotice, EmergencyNotifier, LogNotifier};
use crate::playbook::{plan, PlaybookAction};
use crate::report::{escalation_needed, recommendations, SafetyReport};

const ACTOR: &str = "safety_coordinator";

/// Operation name an emergency restore must be approved under.
pub const SYSTEM_RESTORE_OPERATION: &str = "system_restore";

struct CoordinatorState {
    /// Sticky emergency flag.
    shutdown: bool,
    status: SafetyStatus,
    open: Vec<Incident>,
    resolved: VecDeque<Incident>,
    /// Acceptance times for the incident burst rule.
    accepted_at: VecDeque<DateTime<Utc>>,
    status_history: Vec<SafetyStatusChange>,
    observed: VecDeque<Interaction>,
    last_report: Option<SafetyReport>,
}

impl CoordinatorState {
    fn new() -> Self {
        Self {
            shutdown: false,
            status: SafetyStatus::Operational,
            open: Vec::new(),
            resolved: VecDeque::new(),
            accepted_at: VecDeque::new(),
            status_history: Vec::new(),
            observed: VecDeque::new(),
            last_report: None,
        }
    }

    fn recompute(&mut self, reason: &str, now: DateTime<Utc>) -> Option<SafetyStatusChange> {
        let next = compute_status(&self.open, self.shutdown);
        if next == self.status {
            return None;
        }
        let change = SafetyStatusChange {
            timestamp: now,
            from: self.status,
            to: next,
            reason: reason.to_string(),
        };
        self.status = next;
        self.status_history.push(change.clone());
        Some(change)
    }
}

// ── Builder ─────────────────────────────────────────────────────────────

/// Assembles a [`SafetyCoordinator`] from configuration plus optional seams.
pub struct SafetyCoordinatorBuilder {
    config: SafetyConfig,
    audit: Option<Arc<dyn AuditSink>>,
    display: Option<Arc<dyn ApprovalDisplay>>,
    notifier: Option<Arc<dyn EmergencyNotifier>>,
}

impl SafetyCoordinatorBuilder {
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn display(mut self, display: Arc<dyn ApprovalDisplay>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn EmergencyNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Validate the configuration and build every component.
    ///
    /// A non-empty audit log is replayed into the rate limiter so daily
    /// budgets and brakes survive a restart.
    pub fn build(self) -> CoordinatorResult<SafetyCoordinator> {
        let config = self.config;
        config.validate()?;

        let audit: Arc<dyn AuditSink> = match self.audit {
            Some(audit) => audit,
            None => match &config.audit {
                AuditBackend::Memory => Arc::new(InMemoryAuditLog::new()),
                AuditBackend::Jsonl { path } => Arc::new(JsonlAuditLog::open(path)?),
            },
        };
        let display = self
            .display
            .unwrap_or_else(|| Arc::new(ConsoleDisplay::stdout()));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));

        let isolation = Arc::new(IsolationRegistry::new(config.isolation, audit.clone())?);
        let limiter = Arc::new(ChangeRateLimiter::new(config.rate_limit, audit.clone())?);
        let drift = Arc::new(DriftMonitor::new(config.drift, audit.clone())?);
        let oversight = Arc::new(OversightManager::new(
            config.oversight,
            display,
            audit.clone(),
        )?);

        if !audit.is_empty() {
            let summary = limiter.replay_from_audit(audit.as_ref())?;
            info!(
                changes = summary.changes_restored,
                skipped = summary.changes_skipped,
                brakes = summary.brakes_restored,
                "rate limiter state replayed from audit log"
            );
        }

        let (shutdown_tx, _) = watch::channel(false);
        Ok(SafetyCoordinator {
            settings: config.coordinator,
            isolation,
            limiter,
            drift,
            oversight,
            audit,
            notifier,
            state: Mutex::new(CoordinatorState::new()),
            shutdown_tx,
        })
    }
}

// ── Coordinator ─────────────────────────────────────────────────────────

/// Single owner of the safety core. Construct once and share via `Arc`.
pub struct SafetyCoordinator {
    settings: CoordinatorSettings,
    isolation: Arc<IsolationRegistry>,
    limiter: Arc<ChangeRateLimiter>,
    drift: Arc<DriftMonitor>,
    oversight: Arc<OversightManager>,
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn EmergencyNotifier>,
    state: Mutex<CoordinatorState>,
    shutdown_tx: watch::Sender<bool>,
}

impl SafetyCoordinator {
    pub fn builder(config: SafetyConfig) -> SafetyCoordinatorBuilder {
        SafetyCoordinatorBuilder {
            config,
            audit: None,
            display: None,
            notifier: None,
        }
    }

    pub fn new(config: SafetyConfig) -> CoordinatorResult<Self> {
        Self::builder(config).build()
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn isolation(&self) -> &IsolationRegistry {
        &self.isolation
    }

    pub fn rate_limiter(&self) -> &ChangeRateLimiter {
        &self.limiter
    }

    pub fn drift_monitor(&self) -> &DriftMonitor {
        &self.drift
    }

    pub fn oversight(&self) -> &OversightManager {
        &self.oversight
    }

    pub fn audit(&self) -> Arc<dyn AuditSink> {
        self.audit.clone()
    }

    fn lock(&self) -> CoordinatorResult<MutexGuard<'_, CoordinatorState>> {
        self.state
            .lock()
            .map_err(|_| CoordinatorError::Backend("coordinator state lock poisoned".into()))
    }

    // ── Status ──────────────────────────────────────────────────────────

    pub fn status(&self) -> CoordinatorResult<SafetyStatus> {
        Ok(self.lock()?.status)
    }

    pub fn status_history(&self) -> CoordinatorResult<Vec<SafetyStatusChange>> {
        Ok(self.lock()?.status_history.clone())
    }

    pub fn is_shutdown(&self) -> CoordinatorResult<bool> {
        Ok(self.lock()?.shutdown)
    }

    fn refresh_status(&self, reason: &str, now: DateTime<Utc>) -> CoordinatorResult<SafetyStatus> {
        let (status, change) = {
            let mut state = self.lock()?;
            let change = state.recompute(reason, now);
            (state.status, change)
        };
        if let Some(change) = change {
            if change.to > change.from {
                warn!(from = %change.from, to = %change.to, reason = %change.reason, "safety status raised");
            } else {
                info!(from = %change.from, to = %change.to, reason = %change.reason, "safety status lowered");
            }
            record_or_warn(
                self.audit.as_ref(),
                AuditEntry::new(
                    AuditTable::StatusHistory,
                    ACTOR,
                    format!("safety status {} -> {}", change.from, change.to),
                )
                .subsystem("coordinator")
                .at(now)
                .payload(&change),
            );
        }
        Ok(status)
    }

    // ── Incidents ───────────────────────────────────────────────────────

    /// Accept an incident unless an open one of the same type and
    /// subsystem is younger than the dedup window, then run its playbook.
    pub async fn report_incident(&self, signal: IncidentSignal) -> CoordinatorResult<Option<Incident>> {
        self.report_incident_at(signal, Utc::now()).await
    }

    #[instrument(skip(self, signal), fields(incident_type = %signal.incident_type, subsystem = %signal.subsystem))]
    pub async fn report_incident_at(
        &self,
        signal: IncidentSignal,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<Option<Incident>> {
        let dedup = Duration::seconds(self.settings.incident_dedup_secs as i64);
        let burst_window = Duration::seconds(self.settings.incident_burst_window_secs as i64);
        let mut incident = {
            let mut state = self.lock()?;
            if state
                .open
                .iter()
                .any(|i| i.matches(&signal) && now - i.detected_at < dedup)
            {
                debug!(severity = %signal.severity, "duplicate incident suppressed");
                return Ok(None);
            }
            let incident = Incident::open(format!("inc-{}", Uuid::new_v4()), signal, now);
            state.open.push(incident.clone());
            state.accepted_at.push_back(now);
            while state
                .accepted_at
                .front()
                .is_some_and(|t| now - *t >= burst_window)
            {
                state.accepted_at.pop_front();
            }
            incident
        };

        if incident.severity.is_elevated() {
            error!(
                incident_id = %incident.id,
                severity = %incident.severity,
                description = %incident.description,
                "safety incident"
            );
        } else {
            warn!(
                incident_id = %incident.id,
                severity = %incident.severity,
                description = %incident.description,
                "safety incident"
            );
        }

        let mut taken = Vec::new();
        for action in plan(&incident, &self.settings) {
            match self.execute(&incident, &action, now).await {
                Ok(()) => taken.push(action.to_string()),
                Err(e) => {
                    error!(incident_id = %incident.id, action = %action, error = %e, "playbook step failed");
                    taken.push(format!("{action} (failed: {e})"));
                }
            }
        }
        incident.response_actions = taken.clone();
        {
            let mut state = self.lock()?;
            if let Some(open) = state.open.iter_mut().find(|i| i.id == incident.id) {
                open.response_actions = taken;
            }
        }
        record_or_warn(
            self.audit.as_ref(),
            AuditEntry::new(
                AuditTable::Incidents,
                ACTOR,
                format!("{} ({}): {}", incident.incident_type, incident.severity, incident.description),
            )
            .subsystem(incident.subsystem.clone())
            .at(now)
            .payload(&incident),
        );

        self.refresh_status(&format!("incident {}", incident.id), now)?;
        self.check_escalation(now).await?;
        Ok(Some(incident))
    }

    async fn execute(
        &self,
        incident: &Incident,
        action: &PlaybookAction,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<()> {
        let reason = format!("{}: {}", incident.incident_type, incident.description);
        match action {
            PlaybookAction::EmergencyIsolate { subsystems } => {
                for name in subsystems {
                    if self
                        .isolation
                        .status(name)
                        .is_some_and(|s| s.blocks_interaction())
                    {
                        continue;
                    }
                    self.isolation.emergency_isolate_at(name, &reason, ACTOR, now)?;
                }
            }
            PlaybookAction::EngageBrake {
                subsystem,
                duration_secs,
            } => {
                self.limiter.engage_emergency_brake_at(
                    subsystem,
                    &reason,
                    Some(StdDuration::from_secs(*duration_secs)),
                    now,
                )?;
            }
            PlaybookAction::TightenLimits { subsystem, factor } => {
                self.limiter.tighten_limits(subsystem, *factor, &reason)?;
            }
            PlaybookAction::EscalateToHuman => {
                let notice = self.notice(&reason, vec![incident.subsystem.clone()], now)?;
                self.notifier.notify(&notice).await?;
            }
            PlaybookAction::EmergencyShutdown => {
                self.emergency_safety_shutdown_at(&reason, &[], ACTOR, now)
                    .await?;
            }
            PlaybookAction::LogOnly => {
                info!(incident_id = %incident.id, "incident logged");
            }
        }
        Ok(())
    }

    fn notice(
        &self,
        reason: &str,
        affected: Vec<String>,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<EmergencyNotice> {
        let state = self.lock()?;
        Ok(EmergencyNotice {
            contact: self.settings.emergency_contact.clone(),
            status: state.status,
            reason: reason.to_string(),
            affected,
            open_incidents: state.open.len(),
            timestamp: now,
        })
    }

    /// Escalate to emergency shutdown when too many serious incidents
    /// are open or too many were accepted recently. Returns whether it fired.
    async fn check_escalation(&self, now: DateTime<Utc>) -> CoordinatorResult<bool> {
        let trigger = {
            let state = self.lock()?;
            if state.shutdown {
                return Ok(false);
            }
            let serious = state
                .open
                .iter()
                .filter(|i| i.severity.is_elevated())
                .count();
            if serious >= self.settings.max_concurrent_incidents {
                Some(format!("{serious} concurrent high/critical incidents"))
            } else if state.accepted_at.len() >= self.settings.incident_burst_threshold {
                Some(format!(
                    "{} incidents within {}s",
                    state.accepted_at.len(),
                    self.settings.incident_burst_window_secs
                ))
            } else {
                None
            }
        };
        match trigger {
            Some(reason) => {
                self.emergency_safety_shutdown_at(&format!("automatic escalation: {reason}"), &[], ACTOR, now)
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close an open incident. Rate-limit incidents also restore the
    /// subsystem's configured limits.
    pub fn resolve_incident(
        &self,
        incident_id: &str,
        actor: &str,
        resolution: &str,
    ) -> CoordinatorResult<Incident> {
        let now = Utc::now();
        let incident = {
            let mut state = self.lock()?;
            let index = state
                .open
                .iter()
                .position(|i| i.id == incident_id)
                .ok_or_else(|| CoordinatorError::UnknownIncident(incident_id.to_string()))?;
            let mut incident = state.open.remove(index);
            incident.state = IncidentState::Resolved;
            incident.resolved_at = Some(now);
            incident.resolved_by = Some(actor.to_string());
            incident.resolution = Some(resolution.to_string());
            state.resolved.push_back(incident.clone());
            while state.resolved.len() > self.settings.max_incident_history {
                state.resolved.pop_front();
            }
            incident
        };
        if incident.incident_type == IncidentType::RateLimitViolation
            && incident.subsystem != SYSTEM_WIDE
        {
            self.limiter.reset_limits(&incident.subsystem)?;
        }
        info!(incident_id, actor, "incident resolved");
        record_or_warn(
            self.audit.as_ref(),
            AuditEntry::new(AuditTable::Incidents, actor, format!("resolved: {resolution}"))
                .subsystem(incident.subsystem.clone())
                .at(now)
                .payload(&incident),
        );
        self.refresh_status(&format!("incident {incident_id} resolved"), now)?;
        Ok(incident)
    }

    pub fn open_incidents(&self) -> CoordinatorResult<Vec<Incident>> {
        Ok(self.lock()?.open.clone())
    }

    /// Resolved incidents, oldest first.
    pub fn incident_history(&self) -> CoordinatorResult<Vec<Incident>> {
        Ok(self.lock()?.resolved.iter().cloned().collect())
    }

    // ── Emergency actions ───────────────────────────────────────────────

    /// Quarantine `target` (or `"all"`) and brake its changes until restored.
    pub fn emergency_system_isolation(
        &self,
        target: &str,
        reason: &str,
        actor: &str,
    ) -> CoordinatorResult<Vec<String>> {
        let isolated = self.isolation.emergency_isolate(target, reason, actor)?;
        self.limiter.engage_emergency_brake(target, reason, None)?;
        error!(target, actor, reason, affected = ?isolated, "emergency system isolation");
        Ok(isolated)
    }

    /// Isolate `systems` (everything when empty), brake every change,
    /// require a human for every approval and page the emergency contact.
    ///
    /// The resulting EMERGENCY_SHUTDOWN status is sticky until
    /// [`restore_from_emergency`](Self::restore_from_emergency).
    pub async fn emergency_safety_shutdown(
        &self,
        reason: &str,
        systems: &[String],
        actor: &str,
    ) -> CoordinatorResult<Vec<String>> {
        self.emergency_safety_shutdown_at(reason, systems, actor, Utc::now())
            .await
    }

    #[instrument(skip(self, systems))]
    pub async fn emergency_safety_shutdown_at(
        &self,
        reason: &str,
        systems: &[String],
        actor: &str,
        now: DateTime<Utc>,
    ) -> CoordinatorResult<Vec<String>> {
        self.lock()?.shutdown = true;
        self.oversight.require_approval_for_all(true);

        let targets: Vec<String> = if systems.is_empty() {
            vec![subsystems::ALL.to_string()]
        } else {
            systems.to_vec()
        };
        let mut isolated = Vec::new();
        for target in &targets {
            match self.isolation.emergency_isolate_at(target, reason, actor, now) {
                Ok(names) => isolated.extend(names),
                Err(e) => error!(target = %target, error = %e, "isolation during shutdown failed"),
            }
        }
        if let Err(e) = self
            .limiter
            .engage_emergency_brake_at(subsystems::ALL, reason, None, now)
        {
            error!(error = %e, "brake during shutdown failed");
        }

        error!(actor, reason, isolated = ?isolated, "EMERGENCY SAFETY SHUTDOWN");
        record_or_warn(
            self.audit.as_ref(),
            AuditEntry::new(
                AuditTable::EmergencyActions,
                actor,
                format!("emergency safety shutdown: {reason}"),
            )
            .at(now)
            .payload(&json!({ "event": "emergency_shutdown", "reason": reason, "isolated": &isolated })),
        );
        self.refresh_status(reason, now)?;

        let notice = self.notice(reason, isolated.clone(), now)?;
        if let Err(e) = self.notifier.notify(&notice).await {
            error!(error = %e, "emergency contact could not be paged");
        }
        Ok(isolated)
    }

    /// Return one subsystem (or `"all"`) to ACTIVE and release its brake.
    ///
    /// Refused while an emergency shutdown is in effect.
    pub fn restore_system_from_isolation(&self, subsystem: &str, actor: &str) -> CoordinatorResult<()> {
        if self.lock()?.shutdown {
            return Err(CoordinatorError::EmergencyShutdownActive);
        }
        self.isolation.restore(subsystem, actor)?;
        self.limiter.release_emergency_brake(subsystem, actor)?;
        info!(subsystem, actor, "subsystem restored from isolation");
        record_or_warn(
            self.audit.as_ref(),
            AuditEntry::new(
                AuditTable::EmergencyActions,
                actor,
                format!("{subsystem} restored from isolation"),
            )
            .subsystem(subsystem)
            .payload(&json!({ "event": "restored", "subsystem": subsystem })),
        );
        Ok(())
    }

    /// Leave emergency shutdown.
    ///
    /// `authorization` must be a human-approved `system_restore` decision
    /// that the oversight manager itself recorded.
    pub fn restore_from_emergency(
        &self,
        actor: &str,
        authorization: &ApprovalResponse,
    ) -> CoordinatorResult<SafetyStatus> {
        if authorization.operation != SYSTEM_RESTORE_OPERATION {
            return Err(CoordinatorError::RestoreNotAuthorized(format!(
                "approval is for '{}', not '{SYSTEM_RESTORE_OPERATION}'",
                authorization.operation
            )));
        }
        if !authorization.approved || authorization.status != ApprovalStatus::Approved {
            return Err(CoordinatorError::RestoreNotAuthorized(format!(
                "approval {} is {}",
                authorization.request_id, authorization.status
            )));
        }
        if authorization.auto_decided {
            return Err(CoordinatorError::RestoreNotAuthorized(
                "restore must be approved by a human reviewer".into(),
            ));
        }
        if self.oversight.status_of(&authorization.request_id)? != Some(ApprovalStatus::Approved) {
            return Err(CoordinatorError::RestoreNotAuthorized(format!(
                "approval {} is not on record",
                authorization.request_id
            )));
        }

        let now = Utc::now();
        self.lock()?.shutdown = false;
        self.oversight.require_approval_for_all(false);
        self.isolation.restore(subsystems::ALL, actor)?;
        self.limiter.release_emergency_brake(subsystems::ALL, actor)?;
        warn!(
            actor,
            approval = %authorization.request_id,
            reviewer = ?authorization.reviewer,
            "emergency shutdown lifted"
        );
        record_or_warn(
            self.audit.as_ref(),
            AuditEntry::new(
                AuditTable::EmergencyActions,
                actor,
                "restored from emergency shutdown",
            )
            .at(now)
            .payload(&json!({ "event": "emergency_restore", "authorization": authorization })),
        );
        self.refresh_status("restored from emergency", now)
    }

    // ── Mutation pipeline ───────────────────────────────────────────────

    /// Run a proposed change through isolation, the rate limiter and, when
    /// either asks for it, human oversight.
    ///
    /// Never fails: a component error becomes a conservative denial plus a
    /// CRITICAL `SYSTEM_INSTABILITY` incident.
    #[instrument(skip(self, proposal), fields(subsystem = %proposal.subsystem, kind = %proposal.kind, magnitude = proposal.magnitude))]
    pub async fn evaluate_mutation(&self, proposal: MutationProposal) -> MutationDecision {
        let now = Utc::now();
        let mut decision = MutationDecision::new(proposal.clone(), now);
        let p = &proposal;

        let isolation = match self.isolation.validate_interaction_at(
            &p.requestor,
            &p.subsystem,
            &p.operation,
            &p.context,
            now,
        ) {
            Ok(d) => d,
            Err(e) => return self.internal_failure(decision, "isolation", e.to_string()).await,
        };
        if !isolation.allowed {
            decision.remediation = isolation_remediation(isolation.recommended_action);
            let reason = isolation.reason.clone();
            decision.isolation = Some(isolation);
            return decision.deny(DecisionStage::Isolation, reason);
        }

        let rate = match self.limiter.validate_change_request_at(
            &p.subsystem,
            &p.kind,
            p.magnitude,
            &p.requestor,
            &p.context,
            now,
        ) {
            Ok(r) => r,
            Err(e) => return self.internal_failure(decision, "rate limiter", e.to_string()).await,
        };
        if !rate.approved {
            let mut remediation = Vec::new();
            if let Some(m) = rate.adjusted_magnitude {
                remediation.push(format!("reduce magnitude to {m:.3}"));
            }
            if let Some(s) = rate.cooldown_remaining {
                remediation.push(format!("retry in {s}s"));
            }
            remediation.extend(rate.alternatives.iter().cloned());
            decision.remediation = remediation;
            let reason = rate.reason.clone();
            decision.isolation = Some(isolation);
            decision.rate_limit = Some(rate);
            return decision.deny(DecisionStage::RateLimit, reason);
        }

        let needs_approval = isolation.requires_approval
            || rate.requires_approval
            || self.oversight.requires_approval_for_all();
        decision.reservation_id = rate.reservation_id.clone();
        decision.isolation = Some(isolation);
        decision.rate_limit = Some(rate);

        if needs_approval {
            let operation = p.approval_operation_name();
            // Pin the budget for as long as a reviewer may take.
            if let Err(e) = self.hold(&decision, self.oversight.approval_timeout(&operation)) {
                self.release(&decision);
                return self.internal_failure(decision, "rate limiter", e.to_string()).await;
            }
            let outcome = self
                .oversight
                .request_human_approval(
                    &operation,
                    p.approval_details(),
                    p.urgency,
                    &p.requestor,
                    p.context.clone(),
                )
                .await;
            match outcome {
                Ok(response) if response.approved => {
                    // The commit window starts at the decision, not the request.
                    if let Err(e) = self.hold(&decision, StdDuration::ZERO) {
                        return self.internal_failure(decision, "rate limiter", e.to_string()).await;
                    }
                    decision.approval = Some(response);
                }
                Ok(response) => {
                    self.release(&decision);
                    decision.remediation = match response.status {
                        ApprovalStatus::Timeout => vec![
                            "resubmit when a reviewer is available".into(),
                            "request emergency approval".into(),
                        ],
                        _ => vec!["revise the change and resubmit".into()],
                    };
                    let reason = format!("approval {}: {}", response.status, response.reason);
                    decision.approval = Some(response);
                    return decision.deny(DecisionStage::Oversight, reason);
                }
                Err(e) => {
                    self.release(&decision);
                    return self.internal_failure(decision, "oversight", e.to_string()).await;
                }
            }
        }

        decision.approved = true;
        decision.stage = DecisionStage::Approved;
        decision.reason = "approved".into();
        info!(
            requestor = %p.requestor,
            reservation = ?decision.reservation_id,
            human_reviewed = decision.approval.as_ref().is_some_and(|a| !a.auto_decided),
            "mutation approved"
        );
        decision
    }

    fn hold(&self, decision: &MutationDecision, hold: StdDuration) -> CoordinatorResult<()> {
        if let Some(id) = &decision.reservation_id {
            self.limiter.hold_reservation(id, hold)?;
        }
        Ok(())
    }

    fn release(&self, decision: &MutationDecision) {
        if let Some(id) = &decision.reservation_id {
            if let Err(e) = self.limiter.release_reservation(id) {
                debug!(reservation = %id, error = %e, "reservation already gone");
            }
        }
    }

    async fn internal_failure(
        &self,
        decision: MutationDecision,
        component: &str,
        message: String,
    ) -> MutationDecision {
        error!(component, error = %message, "safety check failed; denying");
        let signal = IncidentSignal::new(
            IncidentType::SystemInstability,
            Severity::Critical,
            decision.proposal.subsystem.clone(),
            format!("{component} check failed: {message}"),
        );
        if let Err(e) = self.report_incident(signal).await {
            error!(error = %e, "instability incident could not be recorded");
        }
        let mut decision =
            decision.deny(DecisionStage::Internal, format!("{component} check failed: {message}"));
        decision.remediation = vec!["retry after the safety core recovers".into()];
        decision
    }

    /// Confirm an approved mutation was applied. Call exactly once.
    pub fn commit_mutation(&self, decision: &MutationDecision) -> CoordinatorResult<CommittedChange> {
        if !decision.approved {
            return Err(CoordinatorError::NotApproved(decision.reason.clone()));
        }
        let p = &decision.proposal;
        let change = match &decision.reservation_id {
            Some(id) => self.limiter.commit_reservation(id)?,
            None => self
                .limiter
                .record_approved_change(&p.subsystem, &p.kind, p.magnitude)?,
        };
        let resource = p
            .context
            .get("resource")
            .and_then(|v| v.as_str())
            .unwrap_or(&p.operation);
        self.isolation
            .record_resource_usage(&p.requestor, resource, 1)?;
        Ok(change)
    }

    /// Give back the budget held by an approved mutation that will not be applied.
    pub fn abandon_mutation(&self, decision: &MutationDecision) -> CoordinatorResult<()> {
        if let Some(id) = &decision.reservation_id {
            self.limiter.release_reservation(id)?;
        }
        Ok(())
    }

    // ── Monitoring ──────────────────────────────────────────────────────

    /// Add an exchange to the window analyzed by the monitoring cycle.
    pub fn observe_interaction(&self, interaction: Interaction) -> CoordinatorResult<()> {
        let mut state = self.lock()?;
        state.observed.push_back(interaction);
        while state.observed.len() > self.settings.max_observed_interactions {
            state.observed.pop_front();
        }
        Ok(())
    }

    pub fn observed_interactions(&self) -> CoordinatorResult<Vec<Interaction>> {
        Ok(self.lock()?.observed.iter().cloned().collect())
    }

    /// Snapshot every component. Analyzes `history`, or the observed
    /// window when `history` is empty.
    pub fn comprehensive_safety_check(&self, history: &[Interaction]) -> CoordinatorResult<SafetyReport> {
        let now = Utc::now();
        if history.is_empty() {
            let observed = self.observed_interactions()?;
            self.snapshot(&observed, now)
        } else {
            self.snapshot(history, now)
        }
    }

    fn snapshot(&self, history: &[Interaction], now: DateTime<Utc>) -> CoordinatorResult<SafetyReport> {
        let isolation = self.isolation.integrity_report_at(now)?;
        let behavior = if history.is_empty() {
            None
        } else {
            Some(self.drift.analyze_behavioral_patterns_at(history, 0, now))
        };
        let rate_limits = self.limiter.report_at(now)?;
        let oversight = self.oversight.statistics()?;
        let (status, open_incidents) = {
            let state = self.lock()?;
            (state.status, state.open.clone())
        };
        let mut report = SafetyReport {
            generated_at: now,
            status,
            isolation,
            behavior,
            rate_limits,
            oversight,
            open_incidents,
            recommendations: Vec::new(),
            escalation_needed: false,
        };
        report.recommendations = recommendations(&report, &self.settings);
        report.escalation_needed = escalation_needed(&report);
        Ok(report)
    }

    /// Latest report produced by the monitoring cycle.
    pub fn last_report(&self) -> CoordinatorResult<Option<SafetyReport>> {
        Ok(self.lock()?.last_report.clone())
    }

    /// One monitor tick: sweep expired approvals, snapshot components,
    /// turn findings into incidents and escalate if needed.
    pub async fn run_monitoring_cycle(&self) -> CoordinatorResult<SafetyReport> {
        self.run_monitoring_cycle_at(Utc::now()).await
    }

    pub async fn run_monitoring_cycle_at(&self, now: DateTime<Utc>) -> CoordinatorResult<SafetyReport> {
        let expired = self.oversight.sweep_expired_at(now)?;
        if !expired.is_empty() {
            warn!(count = expired.len(), "expired approval requests timed out");
        }

        let observed = self.observed_interactions()?;
        let report = self.snapshot(&observed, now)?;
        for signal in detect_signals(&report, &self.settings) {
            self.report_incident_at(signal, now).await?;
        }

        let report = self.snapshot_after_incidents(report)?;
        debug!(
            status = %report.status,
            open_incidents = report.open_incidents.len(),
            escalation_needed = report.escalation_needed,
            "monitoring cycle complete"
        );
        self.lock()?.last_report = Some(report.clone());
        Ok(report)
    }

    fn snapshot_after_incidents(&self, mut report: SafetyReport) -> CoordinatorResult<SafetyReport> {
        {
            let state = self.lock()?;
            report.status = state.status;
            report.open_incidents = state.open.clone();
        }
        report.rate_limits = self.limiter.report_at(report.generated_at)?;
        report.oversight = self.oversight.statistics()?;
        report.recommendations = recommendations(&report, &self.settings);
        report.escalation_needed = escalation_needed(&report);
        Ok(report)
    }

    /// Spawn the periodic monitor. Stops on [`shutdown`](Self::shutdown).
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let mut stop = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(StdDuration::from_secs(self.settings.tick_interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(tick_secs = self.settings.tick_interval_secs, "safety monitor started");
            loop {
                if *stop.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_monitoring_cycle().await {
                            error!(error = %e, "monitoring cycle failed");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            info!("safety monitor stopped");
        })
    }

    /// Signal the monitor task to stop.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

fn isolation_remediation(action: RecommendedAction) -> Vec<String> {
    let line = match action {
        RecommendedAction::Proceed => return Vec::new(),
        RecommendedAction::RequestApproval => "request human approval for this operation",
        RecommendedAction::Deny => "this operation is not permitted for the requesting subsystem",
        RecommendedAction::RetryLater => "retry after the daily quota resets",
        RecommendedAction::Investigate => "investigate the requesting subsystem before retrying",
    };
    vec![line.to_string()]
}

/// Turn a component snapshot into incident signals.
pub fn detect_signals(report: &SafetyReport, settings: &CoordinatorSettings) -> Vec<IncidentSignal> {
    let mut signals = Vec::new();

    for (requestor, count) in &report.isolation.top_offenders {
        if *count >= settings.offender_threshold {
            signals.push(
                IncidentSignal::new(
                    IncidentType::IsolationBreach,
                    Severity::High,
                    requestor.clone(),
                    format!("{requestor} caused {count} isolation violations in the last hour"),
                )
                .evidence(json!({ "violations": count })),
            );
        }
    }
    if report.isolation.critical_violations > 0 {
        signals.push(IncidentSignal::new(
            IncidentType::UnauthorizedAccess,
            Severity::Critical,
            SYSTEM_WIDE,
            format!(
                "{} critical isolation violations in the last hour",
                report.isolation.critical_violations
            ),
        ));
    }

    if let Some(behavior) = &report.behavior {
        if behavior.risk_level >= Severity::Medium {
            signals.push(
                IncidentSignal::new(
                    IncidentType::BehavioralDrift,
                    behavior.risk_level,
                    SYSTEM_WIDE,
                    format!(
                        "behavioral risk {} across {} interactions",
                        behavior.risk_level, behavior.interactions_analyzed
                    ),
                )
                .evidence(json!({ "alerts": &behavior.alerts })),
            );
        }
    }

    for key in report.rate_limits.saturated(settings.saturation_threshold) {
        signals.push(IncidentSignal::new(
            IncidentType::RateLimitViolation,
            Severity::Medium,
            key.subsystem.clone(),
            format!(
                "{}/{} used {:.0}% of its daily budget",
                key.subsystem,
                key.kind,
                key.utilization * 100.0
            ),
        ));
    }

    let stats = &report.oversight;
    if stats.human_routed() >= settings.min_routed_approvals
        && stats.timeout_rate >= settings.timeout_rate_threshold
    {
        signals.push(IncidentSignal::new(
            IncidentType::HumanOversightFailure,
            Severity::High,
            SYSTEM_WIDE,
            format!("{:.0}% of approval requests timed out", stats.timeout_rate * 100.0),
        ));
    } else if stats.pending > settings.max_pending_approvals {
        signals.push(IncidentSignal::new(
            IncidentType::HumanOversightFailure,
            Severity::Medium,
            SYSTEM_WIDE,
            format!("{} approval requests awaiting review", stats.pending),
        ));
    }

    let mut serious_types: Vec<IncidentType> = signals
        .iter()
        .filter(|s| s.severity.is_elevated())
        .map(|s| s.incident_type)
        .collect();
    serious_types.sort();
    serious_types.dedup();
    if serious_types.len() >= 3 {
        signals.push(IncidentSignal::new(
            IncidentType::CascadeFailure,
            Severity::Critical,
            SYSTEM_WIDE,
            format!("simultaneous failures: {serious_types:?}"),
        ));
    }
    signals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::MemoryNotifier;
    use serde_json::Value;
    use veto_oversight::{MemoryDisplay, OperatorResponse};
    use veto_types::Urgency;

    struct Harness {
        coordinator: Arc<SafetyCoordinator>,
        notifier: Arc<MemoryNotifier>,
        display: Arc<MemoryDisplay>,
    }

    fn harness_with(config: SafetyConfig) -> Harness {
        let notifier = Arc::new(MemoryNotifier::new());
        let display = Arc::new(MemoryDisplay::new());
        let coordinator = SafetyCoordinator::builder(config)
            .audit(Arc::new(InMemoryAuditLog::new()))
            .display(display.clone())
            .notifier(notifier.clone())
            .build()
            .unwrap();
        Harness {
            coordinator: Arc::new(coordinator),
            notifier,
            display,
        }
    }

    fn harness() -> Harness {
        harness_with(SafetyConfig::default())
    }

    fn signal(kind: IncidentType, severity: Severity, subsystem: &str) -> IncidentSignal {
        IncidentSignal::new(kind, severity, subsystem, "test signal")
    }

    async fn approve_next(h: &Harness, reviewer: &str) -> String {
        let request = loop {
            if let Some(r) = h
                .coordinator
                .oversight()
                .pending_requests()
                .unwrap()
                .into_iter()
                .next()
            {
                break r;
            }
            tokio::task::yield_now().await;
        };
        h.coordinator
            .oversight()
            .respond(
                &request.id,
                OperatorResponse::Approve {
                    reviewer: reviewer.into(),
                    note: None,
                },
            )
            .await
            .unwrap();
        request.id
    }

    #[tokio::test]
    async fn duplicate_incidents_within_an_hour_are_suppressed() {
        let h = harness();
        let now = Utc::now();
        let first = h
            .coordinator
            .report_incident_at(signal(IncidentType::RateLimitViolation, Severity::Medium, "memory"), now)
            .await
            .unwrap();
        assert!(first.is_some());
        let second = h
            .coordinator
            .report_incident_at(
                signal(IncidentType::RateLimitViolation, Severity::Medium, "memory"),
                now + Duration::minutes(30),
            )
            .await
            .unwrap();
        assert!(second.is_none());
        // Another subsystem is a separate incident.
        let other = h
            .coordinator
            .report_incident_at(
                signal(IncidentType::RateLimitViolation, Severity::Medium, "research"),
                now,
            )
            .await
            .unwrap();
        assert!(other.is_some());
        assert_eq!(h.coordinator.open_incidents().unwrap().len(), 2);
        assert_eq!(h.coordinator.status().unwrap(), SafetyStatus::Monitoring);
    }

    #[tokio::test]
    async fn drift_playbook_brakes_and_escalates() {
        let h = harness();
        let incident = h
            .coordinator
            .report_incident(signal(IncidentType::BehavioralDrift, Severity::High, SYSTEM_WIDE))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(incident.response_actions.len(), 3);
        assert!(h.coordinator.rate_limiter().is_brake_engaged("personality_evolution"));
        assert!(h.coordinator.rate_limiter().is_brake_engaged("code_generation"));
        assert!(!h.coordinator.rate_limiter().is_brake_engaged("memory"));
        assert_eq!(h.notifier.notices().len(), 1);
        assert_eq!(h.coordinator.status().unwrap(), SafetyStatus::ElevatedRisk);
    }

    #[tokio::test]
    async fn breach_playbook_quarantines_subsystem() {
        let h = harness();
        h.coordinator
            .report_incident(signal(IncidentType::IsolationBreach, Severity::High, "research"))
            .await
            .unwrap();
        assert_eq!(
            h.coordinator.isolation().status("research"),
            Some(veto_isolation::SystemStatus::Quarantined)
        );
    }

    #[tokio::test]
    async fn three_serious_incidents_trigger_shutdown() {
        let h = harness();
        for subsystem in ["memory", "research", "conversation"] {
            h.coordinator
                .report_incident(signal(IncidentType::SystemInstability, Severity::High, subsystem))
                .await
                .unwrap();
        }
        assert_eq!(h.coordinator.status().unwrap(), SafetyStatus::EmergencyShutdown);
        assert!(h.coordinator.oversight().requires_approval_for_all());
        assert!(h.coordinator.rate_limiter().is_brake_engaged("memory"));
        assert_eq!(
            h.coordinator.isolation().status("conversation"),
            Some(veto_isolation::SystemStatus::Quarantined)
        );
        assert!(!h.notifier.notices().is_empty());

        // Sticky: resolving incidents does not lift the shutdown.
        for incident in h.coordinator.open_incidents().unwrap() {
            h.coordinator
                .resolve_incident(&incident.id, "alice", "handled")
                .unwrap();
        }
        assert_eq!(h.coordinator.status().unwrap(), SafetyStatus::EmergencyShutdown);
        assert!(matches!(
            h.coordinator.restore_system_from_isolation("memory", "alice"),
            Err(CoordinatorError::EmergencyShutdownActive)
        ));
    }

    #[tokio::test]
    async fn burst_of_incidents_triggers_shutdown() {
        let h = harness();
        for subsystem in ["memory", "research", "conversation", "sass_adjustment", "code_generation"] {
            h.coordinator
                .report_incident(signal(IncidentType::RateLimitViolation, Severity::Low, subsystem))
                .await
                .unwrap();
        }
        assert!(h.coordinator.is_shutdown().unwrap());
    }

    #[tokio::test]
    async fn restore_requires_human_system_restore_approval() {
        let h = harness();
        h.coordinator
            .emergency_safety_shutdown("drill", &[], "alice")
            .await
            .unwrap();

        let forged = ApprovalResponse {
            request_id: "apr-forged".into(),
            operation: SYSTEM_RESTORE_OPERATION.into(),
            requester: "mallory".into(),
            status: ApprovalStatus::Approved,
            approved: true,
            auto_decided: false,
            reason: "trust me".into(),
            reviewer: Some("mallory".into()),
            follow_up_required: false,
            requested_at: Utc::now(),
            decided_at: Utc::now(),
        };
        assert!(matches!(
            h.coordinator.restore_from_emergency("mallory", &forged),
            Err(CoordinatorError::RestoreNotAuthorized(_))
        ));

        let coordinator = h.coordinator.clone();
        let waiter = tokio::spawn(async move {
            coordinator
                .oversight()
                .request_human_approval(
                    SYSTEM_RESTORE_OPERATION,
                    json!({ "reason": "drill over" }),
                    Urgency::High,
                    "alice",
                    Value::Null,
                )
                .await
                .unwrap()
        });
        approve_next(&h, "bob").await;
        let approval = waiter.await.unwrap();
        assert!(approval.approved);

        let status = h.coordinator.restore_from_emergency("alice", &approval).unwrap();
        assert_eq!(status, SafetyStatus::Operational);
        assert!(!h.coordinator.oversight().requires_approval_for_all());
        assert!(!h.coordinator.rate_limiter().is_brake_engaged("memory"));
        assert_eq!(
            h.coordinator.isolation().status("memory"),
            Some(veto_isolation::SystemStatus::Active)
        );
        assert_eq!(h.display.shown().len(), 1);
    }

    #[tokio::test]
    async fn small_evolution_is_auto_approved_and_committed() {
        let h = harness();
        let proposal = MutationProposal::new(
            "personality_evolution",
            "personality_evolution",
            "evolution",
            "evolve",
            0.04,
        );
        let decision = h.coordinator.evaluate_mutation(proposal).await;
        assert!(decision.approved, "{}", decision.reason);
        let approval = decision.approval.as_ref().unwrap();
        assert!(approval.auto_decided);
        assert!(decision.reservation_id.is_some());

        let change = h.coordinator.commit_mutation(&decision).unwrap();
        assert!((change.cumulative_after - 0.04).abs() < 1e-9);
        assert_eq!(
            h.coordinator
                .isolation()
                .usage_today("personality_evolution", "evolve"),
            1
        );
    }

    #[tokio::test]
    async fn isolation_denial_short_circuits() {
        let h = harness();
        let proposal = MutationProposal::new("research", "code_generation", "generation", "write", 0.1);
        let decision = h.coordinator.evaluate_mutation(proposal).await;
        assert!(!decision.approved);
        assert_eq!(decision.stage, DecisionStage::Isolation);
        assert!(decision.rate_limit.is_none());
        assert!(!decision.remediation.is_empty());
        assert!(matches!(
            decision.into_result(),
            Err(crate::SafetyError::PolicyViolation { .. })
        ));
    }

    #[tokio::test]
    async fn oversize_change_rejected_with_adjusted_magnitude() {
        let h = harness();
        let proposal = MutationProposal::new(
            "personality_evolution",
            "personality_evolution",
            "evolution",
            "evolve",
            0.15,
        );
        let decision = h.coordinator.evaluate_mutation(proposal).await;
        assert_eq!(decision.stage, DecisionStage::RateLimit);
        assert!(decision
            .remediation
            .iter()
            .any(|r| r.starts_with("reduce magnitude to")));
        assert!(matches!(
            decision.clone().into_result(),
            Err(crate::SafetyError::RateLimitExceeded {
                adjusted_magnitude: Some(_),
                ..
            })
        ));
        assert!(h.coordinator.commit_mutation(&decision).is_err());
    }

    #[tokio::test]
    async fn unknown_change_kind_maps_to_error() {
        let h = harness();
        let proposal = MutationProposal::new("memory", "memory", "erase", "write", 0.1);
        let decision = h.coordinator.evaluate_mutation(proposal).await;
        assert!(matches!(
            decision.into_result(),
            Err(crate::SafetyError::UnknownChangeKind { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_approval_denies_and_releases_budget() {
        let h = harness();
        // Medium evolution (between auto-approve and auto-deny) needs a human.
        let proposal = MutationProposal::new(
            "personality_evolution",
            "personality_evolution",
            "evolution",
            "evolve",
            0.09,
        );
        let decision = h.coordinator.evaluate_mutation(proposal).await;
        assert_eq!(decision.stage, DecisionStage::Oversight);
        let approval = decision.approval.as_ref().unwrap();
        assert_eq!(approval.status, ApprovalStatus::Timeout);
        assert!(approval.follow_up_required);
        assert!(matches!(
            decision.into_result(),
            Err(crate::SafetyError::ApprovalTimeout { .. })
        ));
        let report = h.coordinator.rate_limiter().report().unwrap();
        assert!(report.keys.iter().all(|k| k.pending_reservations == 0));
    }

    #[tokio::test]
    async fn late_human_approval_still_commits() {
        let mut config = SafetyConfig::default();
        config.rate_limit.reservation_ttl_secs = 1;
        let h = harness_with(config);
        let coordinator = h.coordinator.clone();
        let pending = tokio::spawn(async move {
            coordinator
                .evaluate_mutation(MutationProposal::new(
                    "personality_evolution",
                    "personality_evolution",
                    "evolution",
                    "evolve",
                    0.09,
                ))
                .await
        });
        while h.coordinator.oversight().pending_requests().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }

        // The reviewer answers well after the reservation TTL.
        tokio::time::sleep(StdDuration::from_secs(2)).await;
        let report = h.coordinator.rate_limiter().report().unwrap();
        let key = report
            .keys
            .iter()
            .find(|k| k.subsystem == "personality_evolution" && k.kind == "evolution")
            .unwrap();
        assert_eq!(key.pending_reservations, 1);
        assert!((key.cumulative_today - 0.09).abs() < 1e-9);

        approve_next(&h, "judy").await;
        let decision = pending.await.unwrap();
        assert!(decision.approved, "{}", decision.reason);
        let change = h.coordinator.commit_mutation(&decision).unwrap();
        assert_eq!(change.reservation_id, decision.reservation_id);
        assert!((change.cumulative_after - 0.09).abs() < 1e-9);
    }

    #[tokio::test]
    async fn shutdown_brakes_every_mutation() {
        let h = harness();
        h.coordinator
            .emergency_safety_shutdown("drill", &["memory".to_string()], "alice")
            .await
            .unwrap();
        let proposal = MutationProposal::new("conversation", "conversation", "write", "write", 0.1);
        let decision = h.coordinator.evaluate_mutation(proposal).await;
        // The global brake stops the change before oversight is consulted.
        assert_eq!(decision.stage, DecisionStage::RateLimit);
        assert!(decision.reason.contains("emergency brake"));
    }

    #[tokio::test]
    async fn monitoring_cycle_detects_drift() {
        let h = harness();
        for _ in 0..10 {
            h.coordinator
                .observe_interaction(
                    Interaction::new("I need you, you're all I have", "I'll always be here")
                        .with_personality_adjustment(),
                )
                .unwrap();
        }
        let report = h.coordinator.run_monitoring_cycle().await.unwrap();
        assert!(report
            .open_incidents
            .iter()
            .any(|i| i.incident_type == IncidentType::BehavioralDrift));
        assert!(report.escalation_needed);
        assert!(h.coordinator.rate_limiter().is_brake_engaged("personality_evolution"));
        assert!(h.coordinator.last_report().unwrap().is_some());
    }

    #[tokio::test]
    async fn quiet_system_reports_operational() {
        let h = harness();
        let report = h.coordinator.comprehensive_safety_check(&[]).unwrap();
        assert_eq!(report.status, SafetyStatus::Operational);
        assert!(report.behavior.is_none());
        assert!(!report.escalation_needed);
        assert!(report.recommendations.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_task_stops_on_shutdown() {
        let h = harness();
        let handle = h.coordinator.clone().start();
        tokio::time::sleep(StdDuration::from_secs(125)).await;
        h.coordinator.shutdown();
        handle.await.unwrap();
        assert!(h.coordinator.last_report().unwrap().is_some());
    }

    #[test]
    fn cascade_detected_from_three_serious_types() {
        let mut report = SafetyReport {
            generated_at: Utc::now(),
            status: SafetyStatus::Operational,
            isolation: Default::default(),
            behavior: None,
            rate_limits: Default::default(),
            oversight: Default::default(),
            open_incidents: Vec::new(),
            recommendations: Vec::new(),
            escalation_needed: false,
        };
        report.isolation.top_offenders = vec![("research".into(), 5)];
        report.isolation.critical_violations = 2;
        report.oversight.timed_out = 4;
        report.oversight.timeout_rate = 1.0;
        let signals = detect_signals(&report, &CoordinatorSettings::default());
        assert!(signals
            .iter()
            .any(|s| s.incident_type == IncidentType::CascadeFailure));
    }
}
