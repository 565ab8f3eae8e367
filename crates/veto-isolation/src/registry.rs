//! Isolation registry: capability checks between subsystems.
//!
//! `validate_interaction` runs seven short-circuiting checks in a fixed
//! order. It never consumes quota; callers report usage separately via
//! `record_resource_usage`, so repeated validation of the same request
//! yields the same decision until some state-changing call intervenes.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use veto_audit::{record_or_warn, AuditEntry, AuditSink, AuditTable};
use veto_types::{subsystems, Severity};

use crate::decision::{
    IsolationDecision, IsolationIntegrity, StatusChange, ViolationRecord, ViolationType,
};
use crate::error::{IsolationError, IsolationResult};
use crate::policy::{IsolationConfig, IsolationLevel, SubsystemPolicy, SystemStatus, MODIFYING_OPERATIONS};

const AUDIT_ACTOR: &str = "isolation_registry";

// ── State ───────────────────────────────────────────────────────────────

struct RegistryState {
    policies: HashMap<String, SubsystemPolicy>,
    /// Recent denial timestamps per requestor, for auto-quarantine.
    denials: HashMap<String, VecDeque<DateTime<Utc>>>,
    violations: VecDeque<ViolationRecord>,
    /// (subsystem, resource) → units consumed on `usage_day`.
    usage: HashMap<(String, String), u64>,
    usage_day: NaiveDate,
    status_history: Vec<StatusChange>,
}

impl RegistryState {
    fn roll_usage_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.usage_day {
            self.usage.clear();
            self.usage_day = today;
        }
    }

    fn usage(&self, subsystem: &str, resource: &str, now: DateTime<Utc>) -> u64 {
        if now.date_naive() != self.usage_day {
            return 0;
        }
        self.usage
            .get(&(subsystem.to_string(), resource.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn transition(
        &mut self,
        subsystem: &str,
        to: SystemStatus,
        level: IsolationLevel,
        actor: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> IsolationResult<StatusChange> {
        let policy = self
            .policies
            .get_mut(subsystem)
            .ok_or_else(|| IsolationError::UnknownSubsystem(subsystem.to_string()))?;
        let change = StatusChange {
            timestamp: now,
            subsystem: subsystem.to_string(),
            from: policy.status,
            to,
            level_from: policy.isolation_level,
            level_to: level,
            actor: actor.to_string(),
            reason: reason.to_string(),
        };
        policy.status = to;
        policy.isolation_level = level;
        self.status_history.push(change.clone());
        Ok(change)
    }
}

// ── Registry ────────────────────────────────────────────────────────────

/// Owner of every subsystem's [`SubsystemPolicy`] and [`SystemStatus`].
pub struct IsolationRegistry {
    state: RwLock<RegistryState>,
    quarantine_threshold: usize,
    violation_window: Duration,
    max_violation_history: usize,
    audit: Arc<dyn AuditSink>,
}

impl IsolationRegistry {
    /// Build a registry from configuration.
    pub fn new(config: IsolationConfig, audit: Arc<dyn AuditSink>) -> IsolationResult<Self> {
        config.validate()?;
        let mut policies = HashMap::new();
        for policy in config.policies {
            let name = policy.name.clone();
            if policies.insert(name.clone(), policy).is_some() {
                return Err(IsolationError::DuplicatePolicy(name));
            }
        }

        Ok(Self {
            state: RwLock::new(RegistryState {
                policies,
                denials: HashMap::new(),
                violations: VecDeque::new(),
                usage: HashMap::new(),
                usage_day: Utc::now().date_naive(),
                status_history: Vec::new(),
            }),
            quarantine_threshold: config.quarantine_threshold.max(1),
            violation_window: Duration::seconds(config.violation_window_secs as i64),
            max_violation_history: config.max_violation_history.max(1),
            audit,
        })
    }

    fn read(&self) -> IsolationResult<std::sync::RwLockReadGuard<'_, RegistryState>> {
        self.state
            .read()
            .map_err(|_| IsolationError::Backend("registry lock poisoned".into()))
    }

    fn write(&self) -> IsolationResult<std::sync::RwLockWriteGuard<'_, RegistryState>> {
        self.state
            .write()
            .map_err(|_| IsolationError::Backend("registry lock poisoned".into()))
    }

    // ── Validation ──────────────────────────────────────────────────────

    /// Check whether `requestor` may perform `operation` against `target`.
    pub fn validate_interaction(
        &self,
        requestor: &str,
        target: &str,
        operation: &str,
        context: &Value,
    ) -> IsolationResult<IsolationDecision> {
        self.validate_interaction_at(requestor, target, operation, context, Utc::now())
    }

    /// [`validate_interaction`](Self::validate_interaction) at an explicit time.
    pub fn validate_interaction_at(
        &self,
        requestor: &str,
        target: &str,
        operation: &str,
        context: &Value,
        now: DateTime<Utc>,
    ) -> IsolationResult<IsolationDecision> {
        let requestor = requestor.to_ascii_lowercase();
        let target = target.to_ascii_lowercase();
        let operation = operation.to_ascii_lowercase();

        let decision = {
            let state = self.read()?;
            evaluate(&state, &requestor, &target, &operation, context, now)
        };

        if decision.allowed {
            debug!(
                requestor = %requestor,
                target = %target,
                operation = %operation,
                requires_approval = decision.requires_approval,
                "interaction allowed"
            );
        } else {
            self.record_denial(&requestor, &target, &operation, &decision, now)?;
        }
        Ok(decision)
    }

    fn record_denial(
        &self,
        requestor: &str,
        target: &str,
        operation: &str,
        decision: &IsolationDecision,
        now: DateTime<Utc>,
    ) -> IsolationResult<()> {
        let Some(violation_type) = decision.violation_type else {
            return Ok(());
        };
        warn!(
            requestor = %requestor,
            target = %target,
            operation = %operation,
            violation = %violation_type,
            severity = %decision.severity,
            reason = %decision.reason,
            "isolation violation"
        );

        let record = ViolationRecord {
            timestamp: now,
            requestor: requestor.to_string(),
            target: target.to_string(),
            operation: operation.to_string(),
            violation_type,
            severity: decision.severity,
            reason: decision.reason.clone(),
        };
        record_or_warn(
            self.audit.as_ref(),
            AuditEntry::new(AuditTable::Violations, AUDIT_ACTOR, decision.reason.clone())
                .subsystem(requestor)
                .at(now)
                .payload(&record),
        );

        let quarantine = {
            let mut guard = self.write()?;
            let state = &mut *guard;
            state.violations.push_back(record);
            while state.violations.len() > self.max_violation_history {
                state.violations.pop_front();
            }

            // Unknown requestors have no status to change.
            match state.policies.get(requestor) {
                None => false,
                Some(policy) => {
                    let already_fenced = policy.status == SystemStatus::Quarantined;
                    let cutoff = now - self.violation_window;
                    let window = state.denials.entry(requestor.to_string()).or_default();
                    window.push_back(now);
                    while window.front().is_some_and(|t| *t <= cutoff) {
                        window.pop_front();
                    }
                    window.len() >= self.quarantine_threshold && !already_fenced
                }
            }
        };

        if quarantine {
            let reason = format!(
                "{} isolation violations within {} minutes",
                self.quarantine_threshold,
                self.violation_window.num_minutes()
            );
            self.emergency_isolate_at(requestor, &reason, AUDIT_ACTOR, now)?;
            if let Ok(mut state) = self.write() {
                state.denials.remove(requestor);
            }
        }
        Ok(())
    }

    // ── Usage ───────────────────────────────────────────────────────────

    /// Count `amount` units of `resource` against `subsystem`'s daily quota.
    ///
    /// Returns the new total for today.
    pub fn record_resource_usage(
        &self,
        subsystem: &str,
        resource: &str,
        amount: u64,
    ) -> IsolationResult<u64> {
        self.record_resource_usage_at(subsystem, resource, amount, Utc::now())
    }

    pub fn record_resource_usage_at(
        &self,
        subsystem: &str,
        resource: &str,
        amount: u64,
        now: DateTime<Utc>,
    ) -> IsolationResult<u64> {
        let subsystem = subsystem.to_ascii_lowercase();
        let resource = resource.to_ascii_lowercase();
        let mut state = self.write()?;
        if !state.policies.contains_key(&subsystem) {
            return Err(IsolationError::UnknownSubsystem(subsystem));
        }
        state.roll_usage_day(now);
        let counter = state.usage.entry((subsystem, resource)).or_insert(0);
        *counter = counter.saturating_add(amount);
        Ok(*counter)
    }

    // ── Status transitions ──────────────────────────────────────────────

    /// Quarantine `target` (or every subsystem for `"all"`) at maximum
    /// isolation. Returns the affected subsystems.
    pub fn emergency_isolate(
        &self,
        target: &str,
        reason: &str,
        actor: &str,
    ) -> IsolationResult<Vec<String>> {
        self.emergency_isolate_at(target, reason, actor, Utc::now())
    }

    pub fn emergency_isolate_at(
        &self,
        target: &str,
        reason: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> IsolationResult<Vec<String>> {
        let target = target.to_ascii_lowercase();
        let changes = {
            let mut state = self.write()?;
            let names: Vec<String> = if subsystems::is_all(&target) {
                let mut all: Vec<String> = state.policies.keys().cloned().collect();
                all.sort();
                all
            } else if state.policies.contains_key(&target) {
                vec![target.clone()]
            } else {
                return Err(IsolationError::UnknownSubsystem(target));
            };

            let mut changes = Vec::with_capacity(names.len());
            for name in &names {
                changes.push(state.transition(
                    name,
                    SystemStatus::Quarantined,
                    IsolationLevel::Maximum,
                    actor,
                    reason,
                    now,
                )?);
            }
            changes
        };

        for change in &changes {
            error!(
                subsystem = %change.subsystem,
                actor = %actor,
                reason = %reason,
                "subsystem quarantined"
            );
            self.audit_status_change(change);
            record_or_warn(
                self.audit.as_ref(),
                AuditEntry::new(
                    AuditTable::EmergencyActions,
                    actor,
                    format!("emergency isolation: {reason}"),
                )
                .subsystem(change.subsystem.clone())
                .at(now)
                .payload(change),
            );
        }
        Ok(changes.into_iter().map(|c| c.subsystem).collect())
    }

    /// Return `subsystem` to ACTIVE at MEDIUM isolation.
    ///
    /// This is the only path back to ACTIVE; the prior isolation level is
    /// never restored.
    pub fn restore(&self, subsystem: &str, actor: &str) -> IsolationResult<()> {
        self.restore_at(subsystem, actor, Utc::now())
    }

    pub fn restore_at(&self, subsystem: &str, actor: &str, now: DateTime<Utc>) -> IsolationResult<()> {
        let subsystem = subsystem.to_ascii_lowercase();
        let changes = {
            let mut state = self.write()?;
            let names: Vec<String> = if subsystems::is_all(&subsystem) {
                let mut all: Vec<String> = state.policies.keys().cloned().collect();
                all.sort();
                all
            } else {
                vec![subsystem.clone()]
            };
            let mut changes = Vec::with_capacity(names.len());
            for name in &names {
                changes.push(state.transition(
                    name,
                    SystemStatus::Active,
                    IsolationLevel::Medium,
                    actor,
                    "restored",
                    now,
                )?);
                state.denials.remove(name);
            }
            changes
        };

        for change in &changes {
            info!(subsystem = %change.subsystem, actor = %actor, "subsystem restored");
            self.audit_status_change(change);
        }
        Ok(())
    }

    /// Move a subsystem to SUSPENDED, MAINTENANCE or ISOLATED.
    pub fn set_status(
        &self,
        subsystem: &str,
        status: SystemStatus,
        actor: &str,
        reason: &str,
    ) -> IsolationResult<()> {
        let subsystem = subsystem.to_ascii_lowercase();
        match status {
            SystemStatus::Active => {
                return Err(IsolationError::InvalidTransition {
                    subsystem,
                    to: status,
                    via: "restore",
                })
            }
            SystemStatus::Quarantined => {
                return Err(IsolationError::InvalidTransition {
                    subsystem,
                    to: status,
                    via: "emergency_isolate",
                })
            }
            _ => {}
        }

        let change = {
            let mut state = self.write()?;
            let level = state
                .policies
                .get(&subsystem)
                .map(|p| p.isolation_level)
                .ok_or_else(|| IsolationError::UnknownSubsystem(subsystem.clone()))?;
            let level = if status == SystemStatus::Isolated {
                level.max(IsolationLevel::High)
            } else {
                level
            };
            state.transition(&subsystem, status, level, actor, reason, Utc::now())?
        };
        info!(subsystem = %subsystem, status = %status, actor = %actor, "status changed");
        self.audit_status_change(&change);
        Ok(())
    }

    fn audit_status_change(&self, change: &StatusChange) {
        record_or_warn(
            self.audit.as_ref(),
            AuditEntry::new(
                AuditTable::StatusHistory,
                change.actor.clone(),
                format!("{} -> {}", change.from, change.to),
            )
            .subsystem(change.subsystem.clone())
            .at(change.timestamp)
            .payload(change),
        );
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn status(&self, subsystem: &str) -> Option<SystemStatus> {
        let state = self.read().ok()?;
        state
            .policies
            .get(&subsystem.to_ascii_lowercase())
            .map(|p| p.status)
    }

    pub fn policy(&self, subsystem: &str) -> Option<SubsystemPolicy> {
        let state = self.read().ok()?;
        state.policies.get(&subsystem.to_ascii_lowercase()).cloned()
    }

    /// Registered subsystem names, sorted.
    pub fn subsystems(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .read()
            .map(|s| s.policies.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Units of `resource` consumed by `subsystem` today.
    pub fn usage_today(&self, subsystem: &str, resource: &str) -> u64 {
        self.read()
            .map(|s| {
                s.usage(
                    &subsystem.to_ascii_lowercase(),
                    &resource.to_ascii_lowercase(),
                    Utc::now(),
                )
            })
            .unwrap_or(0)
    }

    pub fn violations_since(&self, since: DateTime<Utc>) -> Vec<ViolationRecord> {
        self.read()
            .map(|s| {
                s.violations
                    .iter()
                    .filter(|v| v.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn status_history(&self) -> Vec<StatusChange> {
        self.read()
            .map(|s| s.status_history.clone())
            .unwrap_or_default()
    }

    pub fn integrity_report(&self) -> IsolationResult<IsolationIntegrity> {
        self.integrity_report_at(Utc::now())
    }

    pub fn integrity_report_at(&self, now: DateTime<Utc>) -> IsolationResult<IsolationIntegrity> {
        let state = self.read()?;
        let mut report = IsolationIntegrity {
            generated_at: Some(now),
            ..Default::default()
        };

        for (name, policy) in &state.policies {
            report.statuses.insert(name.clone(), policy.status);
            match policy.status {
                SystemStatus::Isolated => report.isolated.push(name.clone()),
                SystemStatus::Quarantined => report.quarantined.push(name.clone()),
                _ => {}
            }
        }
        report.isolated.sort();
        report.quarantined.sort();

        let cutoff = now - Duration::hours(1);
        let mut offenders: BTreeMap<String, usize> = BTreeMap::new();
        for violation in state.violations.iter().filter(|v| v.timestamp > cutoff) {
            report.violations_last_hour += 1;
            *report
                .violations_by_severity
                .entry(violation.severity)
                .or_insert(0) += 1;
            if violation.severity == Severity::Critical {
                report.critical_violations += 1;
            }
            *offenders.entry(violation.requestor.clone()).or_insert(0) += 1;
        }
        let mut offenders: Vec<(String, usize)> = offenders.into_iter().collect();
        offenders.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        offenders.truncate(5);
        report.top_offenders = offenders;

        Ok(report)
    }
}

// ── Checks ──────────────────────────────────────────────────────────────

fn evaluate(
    state: &RegistryState,
    requestor: &str,
    target: &str,
    operation: &str,
    context: &Value,
    now: DateTime<Utc>,
) -> IsolationDecision {
    // 1. Both ends known.
    let Some(policy) = state.policies.get(requestor) else {
        return IsolationDecision::deny(
            ViolationType::UnknownSystem,
            Severity::Critical,
            format!("unknown requestor subsystem '{requestor}'"),
        );
    };
    let Some(target_policy) = state.policies.get(target) else {
        return IsolationDecision::deny(
            ViolationType::UnknownSystem,
            Severity::Critical,
            format!("unknown target subsystem '{target}'"),
        );
    };

    // 2. Fenced-off subsystems.
    for (name, status) in [(requestor, policy.status), (target, target_policy.status)] {
        if status.blocks_interaction() {
            return IsolationDecision::deny(
                ViolationType::SystemIsolated,
                Severity::High,
                format!("subsystem '{name}' is {status}"),
            );
        }
    }

    // 3. Modification of protected subsystems.
    if MODIFYING_OPERATIONS.contains(&operation) && policy.cannot_modify.contains(target) {
        return IsolationDecision::deny(
            ViolationType::ForbiddenModification,
            Severity::High,
            format!("'{requestor}' may not {operation} '{target}'"),
        );
    }

    // 4. Banned operations.
    if policy.banned_operations.contains(operation) {
        return IsolationDecision::deny(
            ViolationType::BannedOperation,
            Severity::High,
            format!("operation '{operation}' is banned for '{requestor}'"),
        );
    }

    // 5. Reachability.
    if !policy.can_reach(target) {
        return IsolationDecision::deny(
            ViolationType::UnauthorizedAccess,
            Severity::Medium,
            format!("'{requestor}' is not permitted to reach '{target}'"),
        );
    }

    // 6. Allowed operations.
    if !policy.allowed_operations.contains(operation) {
        return IsolationDecision::deny(
            ViolationType::UnauthorizedOperation,
            Severity::Medium,
            format!("operation '{operation}' is not in the allowed set for '{requestor}'"),
        );
    }

    // 7. Resource quota.
    let resource = context
        .get("resource")
        .and_then(Value::as_str)
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| operation.to_string());
    if let Some(limit) = policy.resource_quotas.get(&resource) {
        let requested = context.get("amount").and_then(Value::as_u64).unwrap_or(1);
        let used = state.usage(requestor, &resource, now);
        if used.saturating_add(requested) > *limit {
            return IsolationDecision::deny(
                ViolationType::ResourceLimitExceeded,
                Severity::Medium,
                format!(
                    "daily quota for '{resource}' exhausted ({used}/{limit}); retry after midnight UTC"
                ),
            );
        }
    }

    let requires_approval = policy.approval_required.contains(operation)
        || target_policy.approval_required.contains(operation);
    IsolationDecision::allow(requires_approval)
}
