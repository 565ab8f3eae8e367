//! Change rate limiter: budgets self-modification per (subsystem, kind).
//!
//! Validation runs the budget math and, when it approves, reserves the
//! magnitude under the same lock. Two concurrent callers therefore cannot
//! both spend the last of a daily budget. The reservation is turned into a
//! committed change by `record_approved_change` (or `commit_reservation`),
//! released explicitly, or expires after the configured TTL.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};
use veto_audit::{record_or_warn, AuditEntry, AuditSink, AuditTable};
use veto_types::{subsystems, Severity};

use crate::config::{ChangeLimits, DailyWindow, RateLimitConfig};
use crate::error::{RateLimitError, RateLimitResult};
use crate::result::{
    risk_level_for, BrakeStatus, ChangeValidationResult, CommittedChange, KeyUtilization,
    RateLimiterReport, RejectionRecord, ReplaySummary, RiskEscalation,
};

const EPSILON: f64 = 1e-9;
const AUDIT_ACTOR: &str = "rate_limiter";

/// Committed entries older than this are dropped from ledgers.
fn retention() -> Duration {
    Duration::hours(48)
}

// ── Ledger ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
struct LedgerEntry {
    timestamp: DateTime<Utc>,
    magnitude: f64,
}

#[derive(Clone, Debug)]
struct Reservation {
    id: String,
    magnitude: f64,
    reserved_at: DateTime<Utc>,
    /// Set while the change waits on a reviewer; overrides the TTL.
    held_until: Option<DateTime<Utc>>,
    requester: String,
}

impl Reservation {
    fn is_live(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.reserved_at < ttl || self.held_until.is_some_and(|until| now < until)
    }
}

/// Mutable counters for one (subsystem, kind) key.
#[derive(Clone, Debug)]
struct RateLedger {
    configured: ChangeLimits,
    limits: ChangeLimits,
    committed: VecDeque<LedgerEntry>,
    reservations: Vec<Reservation>,
    last_change: Option<DateTime<Utc>>,
}

impl RateLedger {
    fn new(limits: ChangeLimits) -> Self {
        Self {
            configured: limits.clone(),
            limits,
            committed: VecDeque::new(),
            reservations: Vec::new(),
            last_change: None,
        }
    }

    /// Committed magnitude since `since`, plus every live reservation.
    fn cumulative_since(&self, since: DateTime<Utc>) -> f64 {
        let committed: f64 = self
            .committed
            .iter()
            .filter(|e| e.timestamp >= since)
            .map(|e| e.magnitude)
            .sum();
        let reserved: f64 = self.reservations.iter().map(|r| r.magnitude).sum();
        committed + reserved
    }

    /// Accepted changes (committed or reserved) strictly after `start`.
    fn count_after(&self, start: DateTime<Utc>) -> usize {
        self.committed.iter().filter(|e| e.timestamp > start).count()
            + self
                .reservations
                .iter()
                .filter(|r| r.reserved_at > start)
                .count()
    }

    fn last_accepted(&self) -> Option<DateTime<Utc>> {
        let committed = self.committed.back().map(|e| e.timestamp);
        let reserved = self.reservations.iter().map(|r| r.reserved_at).max();
        committed.max(reserved)
    }

    fn oldest_since(&self, since: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.committed
            .iter()
            .map(|e| e.timestamp)
            .find(|ts| *ts >= since)
    }
}

struct LimiterState {
    ledgers: HashMap<(String, String), RateLedger>,
    brakes: HashMap<String, BrakeStatus>,
    escalations: VecDeque<RiskEscalation>,
    rejections: VecDeque<RejectionRecord>,
}

impl LimiterState {
    fn active_brake(&self, subsystem: &str, now: DateTime<Utc>) -> Option<&BrakeStatus> {
        [subsystem, subsystems::ALL]
            .into_iter()
            .filter_map(|key| self.brakes.get(key))
            .find(|b| b.is_active_at(now))
    }

    /// Drop expired reservations, brakes and stale ledger entries.
    fn expire(&mut self, now: DateTime<Utc>, reservation_ttl: Duration) {
        let horizon = now - retention();
        for ((subsystem, kind), ledger) in self.ledgers.iter_mut() {
            while ledger
                .committed
                .front()
                .is_some_and(|e| e.timestamp < horizon)
            {
                ledger.committed.pop_front();
            }
            ledger.reservations.retain(|r| {
                let live = r.is_live(now, reservation_ttl);
                if !live {
                    warn!(
                        subsystem = %subsystem,
                        kind = %kind,
                        reservation_id = %r.id,
                        magnitude = r.magnitude,
                        "reservation expired without commit"
                    );
                }
                live
            });
        }
        self.brakes.retain(|subsystem, brake| {
            let live = brake.is_active_at(now);
            if !live {
                info!(subsystem = %subsystem, "emergency brake expired");
            }
            live
        });
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, max: usize) {
    queue.push_back(item);
    while queue.len() > max {
        queue.pop_front();
    }
}

fn secs_until(now: DateTime<Utc>, then: DateTime<Utc>) -> u64 {
    let millis = (then - now).num_milliseconds().max(0);
    ((millis + 999) / 1000).max(1) as u64
}

fn local_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_timezone(&Local)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or(now - Duration::hours(24))
}

// ── Limiter ─────────────────────────────────────────────────────────────

/// Per-(subsystem, kind) change budget tracker.
pub struct ChangeRateLimiter {
    state: Mutex<LimiterState>,
    daily_window: DailyWindow,
    reservation_ttl: Duration,
    frequency_risk_divisor: f64,
    max_event_history: usize,
    audit: Arc<dyn AuditSink>,
}

impl ChangeRateLimiter {
    /// Build a limiter from validated configuration.
    pub fn new(config: RateLimitConfig, audit: Arc<dyn AuditSink>) -> RateLimitResult<Self> {
        config.validate()?;
        let ledgers = config
            .limits
            .into_iter()
            .map(|entry| {
                (
                    (
                        entry.subsystem.to_ascii_lowercase(),
                        entry.kind.to_ascii_lowercase(),
                    ),
                    RateLedger::new(entry.limits),
                )
            })
            .collect();

        Ok(Self {
            state: Mutex::new(LimiterState {
                ledgers,
                brakes: HashMap::new(),
                escalations: VecDeque::new(),
                rejections: VecDeque::new(),
            }),
            daily_window: config.daily_window,
            reservation_ttl: Duration::seconds(config.reservation_ttl_secs as i64),
            frequency_risk_divisor: config.frequency_risk_divisor,
            max_event_history: config.max_event_history.max(1),
            audit,
        })
    }

    fn lock(&self) -> RateLimitResult<MutexGuard<'_, LimiterState>> {
        self.state
            .lock()
            .map_err(|_| RateLimitError::Backend("ledger lock poisoned".into()))
    }

    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.daily_window {
            DailyWindow::Rolling24h => now - Duration::hours(24),
            DailyWindow::LocalMidnight => local_midnight(now),
        }
    }

    fn audit_event(&self, table: AuditTable, subsystem: &str, summary: String, payload: Value) {
        record_or_warn(
            self.audit.as_ref(),
            AuditEntry::new(table, AUDIT_ACTOR, summary)
                .subsystem(subsystem)
                .payload(&payload),
        );
    }

    // ── Validation ──────────────────────────────────────────────────────

    /// Check a proposed change and, if approved, reserve its magnitude.
    pub fn validate_change_request(
        &self,
        subsystem: &str,
        kind: &str,
        magnitude: f64,
        requester: &str,
        context: &Value,
    ) -> RateLimitResult<ChangeValidationResult> {
        self.validate_change_request_at(subsystem, kind, magnitude, requester, context, Utc::now())
    }

    /// [`validate_change_request`](Self::validate_change_request) at an explicit time.
    pub fn validate_change_request_at(
        &self,
        subsystem: &str,
        kind: &str,
        magnitude: f64,
        requester: &str,
        context: &Value,
        now: DateTime<Utc>,
    ) -> RateLimitResult<ChangeValidationResult> {
        let subsystem = subsystem.to_ascii_lowercase();
        let kind = kind.to_ascii_lowercase();

        let (result, escalation) = {
            let mut guard = self.lock()?;
            let state = &mut *guard;
            state.expire(now, self.reservation_ttl);
            let (result, escalation) =
                self.evaluate(state, &subsystem, &kind, magnitude, requester, now);

            if !result.approved {
                push_bounded(
                    &mut state.rejections,
                    RejectionRecord {
                        timestamp: now,
                        subsystem: subsystem.clone(),
                        kind: kind.clone(),
                        magnitude,
                        reason: result.reason.clone(),
                        risk_level: result.risk_level,
                    },
                    self.max_event_history,
                );
            }
            if let Some(escalation) = &escalation {
                push_bounded(
                    &mut state.escalations,
                    escalation.clone(),
                    self.max_event_history,
                );
            }
            (result, escalation)
        };

        if result.approved {
            debug!(
                subsystem = %subsystem,
                kind = %kind,
                magnitude,
                risk = %result.risk_level,
                requires_approval = result.requires_approval,
                "change reserved"
            );
        } else {
            warn!(
                subsystem = %subsystem,
                kind = %kind,
                magnitude,
                risk = %result.risk_level,
                reason = %result.reason,
                "change rejected"
            );
        }

        if let Some(escalation) = escalation {
            warn!(
                subsystem = %subsystem,
                kind = %kind,
                requester = %escalation.requester,
                projected_total = escalation.projected_total,
                threshold = escalation.threshold,
                "risk escalation recorded for human review"
            );
            self.audit_event(
                AuditTable::ChangeRequests,
                &subsystem,
                format!("risk escalation for {subsystem}/{kind}"),
                json!({ "event": "risk_escalation", "escalation": escalation }),
            );
        }

        self.audit_event(
            AuditTable::ChangeRequests,
            &subsystem,
            format!(
                "{} {subsystem}/{kind} magnitude {magnitude:.3}: {}",
                if result.approved { "approved" } else { "rejected" },
                result.reason
            ),
            json!({ "event": "validated", "requester": requester, "context": context, "result": &result }),
        );

        Ok(result)
    }

    fn evaluate(
        &self,
        state: &mut LimiterState,
        subsystem: &str,
        kind: &str,
        magnitude: f64,
        requester: &str,
        now: DateTime<Utc>,
    ) -> (ChangeValidationResult, Option<RiskEscalation>) {
        if !magnitude.is_finite() || magnitude < 0.0 {
            let result = ChangeValidationResult::rejected(
                subsystem,
                kind,
                magnitude,
                format!("invalid magnitude {magnitude}"),
                Severity::Critical,
                now,
            );
            return (result, None);
        }

        // 1. Emergency brake.
        if let Some(brake) = state.active_brake(subsystem, now) {
            let mut result = ChangeValidationResult::rejected(
                subsystem,
                kind,
                magnitude,
                format!("emergency brake engaged: {}", brake.reason),
                Severity::Critical,
                now,
            )
            .with_alternative("wait for the emergency brake to be released")
            .with_alternative("request emergency human approval");
            result.cooldown_remaining = brake.expires_at.map(|expires| secs_until(now, expires));
            return (result, None);
        }

        let window_start = self.window_start(now);
        let Some(ledger) = state
            .ledgers
            .get_mut(&(subsystem.to_string(), kind.to_string()))
        else {
            let result = ChangeValidationResult::rejected(
                subsystem,
                kind,
                magnitude,
                format!("unknown change kind '{kind}' for subsystem '{subsystem}'"),
                Severity::Critical,
                now,
            )
            .with_alternative("register limits for this change kind before requesting changes");
            return (result, None);
        };

        let limits = ledger.limits.clone();
        let cumulative = ledger.cumulative_since(window_start);
        let proposed = cumulative + magnitude;
        let recent = ledger.count_after(now - Duration::hours(24));

        // 5. Risk score, computed up front so every result carries it.
        let risk_score = (magnitude / limits.max_single_change)
            .max(proposed / limits.max_daily_change)
            .max(recent as f64 / self.frequency_risk_divisor);
        let risk_level = risk_level_for(risk_score);

        let mut result = ChangeValidationResult {
            approved: false,
            reason: String::new(),
            subsystem: subsystem.to_string(),
            kind: kind.to_string(),
            magnitude,
            cumulative_today: cumulative,
            proposed_new_total: proposed,
            adjusted_magnitude: None,
            cooldown_remaining: None,
            risk_score,
            risk_level,
            // 6.
            requires_approval: magnitude > limits.approval_required_threshold
                || risk_level.is_elevated(),
            alternatives: Vec::new(),
            reservation_id: None,
            timestamp: now,
        };

        // 2. Single-change cap.
        if magnitude > 2.0 * limits.max_single_change + EPSILON {
            result.reason = format!(
                "magnitude {magnitude:.3} far exceeds the single-change limit {:.3}",
                limits.max_single_change
            );
            result.alternatives.push(format!(
                "split the change into steps of at most {:.3}",
                limits.max_single_change
            ));
            result
                .alternatives
                .push("request emergency human approval".into());
            return (result, None);
        }
        if magnitude > limits.max_single_change + EPSILON {
            let adjusted = 0.9 * limits.max_single_change;
            result.reason = format!(
                "magnitude {magnitude:.3} exceeds the single-change limit {:.3}",
                limits.max_single_change
            );
            result.adjusted_magnitude = Some(adjusted);
            result
                .alternatives
                .push(format!("retry with magnitude {adjusted:.3}"));
            return (result, None);
        }

        // 3. Daily cap.
        if proposed > limits.max_daily_change + EPSILON {
            let remaining = limits.max_daily_change - cumulative;
            if remaining <= EPSILON {
                result.reason = format!(
                    "daily change budget exhausted ({cumulative:.3} of {:.3} used)",
                    limits.max_daily_change
                );
                let frees_at = match self.daily_window {
                    DailyWindow::Rolling24h => ledger
                        .oldest_since(window_start)
                        .map(|ts| ts + Duration::hours(24)),
                    DailyWindow::LocalMidnight => Some(window_start + Duration::hours(24)),
                };
                result.cooldown_remaining = frees_at.map(|at| secs_until(now, at));
                result
                    .alternatives
                    .push("wait for the daily budget to free up".into());
                result
                    .alternatives
                    .push("request emergency human approval".into());
            } else {
                let adjusted = 0.9 * remaining;
                result.reason = format!(
                    "change would exceed the daily budget ({proposed:.3} > {:.3})",
                    limits.max_daily_change
                );
                result.adjusted_magnitude = Some(adjusted);
                result
                    .alternatives
                    .push(format!("retry with magnitude {adjusted:.3}"));
            }
            return (result, None);
        }

        // 4. Cooldown and burst allowance.
        let cooldown = Duration::seconds(limits.cooldown_seconds as i64);
        if ledger.count_after(now - cooldown) >= limits.burst_allowance as usize {
            if let Some(last) = ledger.last_accepted() {
                if now - last < cooldown {
                    let wait = secs_until(now, last + cooldown);
                    result.reason = format!(
                        "burst allowance of {} used; cooldown active",
                        limits.burst_allowance
                    );
                    result.cooldown_remaining = Some(wait);
                    result.alternatives.push(format!("retry in {wait}s"));
                    return (result, None);
                }
            }
        }

        // Approved: reserve under the lock.
        let reservation_id = format!("rsv-{}", uuid::Uuid::new_v4());
        ledger.reservations.push(Reservation {
            id: reservation_id.clone(),
            magnitude,
            reserved_at: now,
            held_until: None,
            requester: requester.to_string(),
        });
        result.approved = true;
        result.reservation_id = Some(reservation_id);
        result.reason = if result.requires_approval {
            "within limits; human approval required".into()
        } else {
            "within limits".into()
        };

        // 7. Risk escalation.
        let escalation = (magnitude > limits.risk_escalation_threshold
            || proposed > limits.risk_escalation_threshold)
            .then(|| RiskEscalation {
                timestamp: now,
                subsystem: subsystem.to_string(),
                kind: kind.to_string(),
                requester: requester.to_string(),
                magnitude,
                projected_total: proposed,
                threshold: limits.risk_escalation_threshold,
                risk_level,
            });

        (result, escalation)
    }

    // ── Commit / release ────────────────────────────────────────────────

    /// Record an applied change. Call exactly once per accepted mutation.
    ///
    /// Consumes the live reservation with a matching magnitude, or the
    /// oldest live reservation on the key.
    pub fn record_approved_change(
        &self,
        subsystem: &str,
        kind: &str,
        magnitude: f64,
    ) -> RateLimitResult<CommittedChange> {
        self.record_approved_change_at(subsystem, kind, magnitude, Utc::now())
    }

    pub fn record_approved_change_at(
        &self,
        subsystem: &str,
        kind: &str,
        magnitude: f64,
        now: DateTime<Utc>,
    ) -> RateLimitResult<CommittedChange> {
        if !magnitude.is_finite() || magnitude < 0.0 {
            return Err(RateLimitError::InvalidMagnitude(magnitude));
        }
        let subsystem = subsystem.to_ascii_lowercase();
        let kind = kind.to_ascii_lowercase();

        let change = {
            let mut guard = self.lock()?;
            let state = &mut *guard;
            state.expire(now, self.reservation_ttl);
            let window_start = self.window_start(now);
            let ledger = state
                .ledgers
                .get_mut(&(subsystem.clone(), kind.clone()))
                .ok_or_else(|| RateLimitError::UnknownChangeKind {
                    subsystem: subsystem.clone(),
                    kind: kind.clone(),
                })?;

            let index = ledger
                .reservations
                .iter()
                .position(|r| (r.magnitude - magnitude).abs() < EPSILON)
                .or_else(|| (!ledger.reservations.is_empty()).then_some(0));
            let reservation = index.map(|i| ledger.reservations.remove(i));
            if reservation.is_none() {
                warn!(
                    subsystem = %subsystem,
                    kind = %kind,
                    magnitude,
                    "committing change without a live reservation"
                );
            }

            ledger.committed.push_back(LedgerEntry {
                timestamp: now,
                magnitude,
            });
            ledger.last_change = Some(now);

            CommittedChange {
                subsystem: subsystem.clone(),
                kind: kind.clone(),
                magnitude,
                timestamp: now,
                reservation_id: reservation.map(|r| r.id),
                cumulative_after: ledger.cumulative_since(window_start),
            }
        };

        info!(
            subsystem = %subsystem,
            kind = %kind,
            magnitude,
            cumulative = change.cumulative_after,
            "change committed"
        );
        self.audit_event(
            AuditTable::ChangeRequests,
            &subsystem,
            format!("committed {subsystem}/{kind} magnitude {magnitude:.3}"),
            json!({ "event": "committed", "change": &change }),
        );
        Ok(change)
    }

    /// Commit the change held by `reservation_id` at its reserved magnitude.
    pub fn commit_reservation(&self, reservation_id: &str) -> RateLimitResult<CommittedChange> {
        self.commit_reservation_at(reservation_id, Utc::now())
    }

    pub fn commit_reservation_at(
        &self,
        reservation_id: &str,
        now: DateTime<Utc>,
    ) -> RateLimitResult<CommittedChange> {
        let (subsystem, kind, magnitude) = {
            let mut guard = self.lock()?;
            guard.expire(now, self.reservation_ttl);
            guard
                .ledgers
                .iter()
                .find_map(|((subsystem, kind), ledger)| {
                    ledger
                        .reservations
                        .iter()
                        .find(|r| r.id == reservation_id)
                        .map(|r| (subsystem.clone(), kind.clone(), r.magnitude))
                })
                .ok_or_else(|| RateLimitError::UnknownReservation(reservation_id.to_string()))?
        };
        self.commit_matching(&subsystem, &kind, reservation_id, magnitude, now)
    }

    fn commit_matching(
        &self,
        subsystem: &str,
        kind: &str,
        reservation_id: &str,
        magnitude: f64,
        now: DateTime<Utc>,
    ) -> RateLimitResult<CommittedChange> {
        // Move the reservation to the front so the commit picks it exactly.
        {
            let mut guard = self.lock()?;
            let ledger = guard
                .ledgers
                .get_mut(&(subsystem.to_string(), kind.to_string()))
                .ok_or_else(|| RateLimitError::UnknownReservation(reservation_id.to_string()))?;
            let index = ledger
                .reservations
                .iter()
                .position(|r| r.id == reservation_id)
                .ok_or_else(|| RateLimitError::UnknownReservation(reservation_id.to_string()))?;
            let reservation = ledger.reservations.remove(index);
            ledger.reservations.insert(0, reservation);
        }
        let change = self.record_approved_change_at(subsystem, kind, magnitude, now)?;
        if change.reservation_id.as_deref() != Some(reservation_id) {
            warn!(reservation_id = %reservation_id, "reservation changed hands during commit");
        }
        Ok(change)
    }

    /// Keep a reservation alive for `hold` plus the normal TTL.
    ///
    /// Used while the change waits on a human decision that may take longer
    /// than the TTL. A hold never shortens an existing one.
    pub fn hold_reservation(
        &self,
        reservation_id: &str,
        hold: std::time::Duration,
    ) -> RateLimitResult<DateTime<Utc>> {
        self.hold_reservation_at(reservation_id, hold, Utc::now())
    }

    pub fn hold_reservation_at(
        &self,
        reservation_id: &str,
        hold: std::time::Duration,
        now: DateTime<Utc>,
    ) -> RateLimitResult<DateTime<Utc>> {
        let until = Duration::from_std(hold)
            .ok()
            .and_then(|hold| hold.checked_add(&self.reservation_ttl))
            .and_then(|span| now.checked_add_signed(span))
            .ok_or_else(|| RateLimitError::InvalidConfig(format!("hold of {hold:?} is out of range")))?;

        let mut guard = self.lock()?;
        guard.expire(now, self.reservation_ttl);
        let reservation = guard
            .ledgers
            .values_mut()
            .flat_map(|ledger| ledger.reservations.iter_mut())
            .find(|r| r.id == reservation_id)
            .ok_or_else(|| RateLimitError::UnknownReservation(reservation_id.to_string()))?;
        let until = reservation.held_until.map_or(until, |prev| prev.max(until));
        reservation.held_until = Some(until);
        debug!(reservation_id = %reservation_id, held_until = %until, "reservation held");
        Ok(until)
    }

    /// Free the budget held by a reservation whose change was not applied.
    pub fn release_reservation(&self, reservation_id: &str) -> RateLimitResult<()> {
        let released = {
            let mut guard = self.lock()?;
            guard.ledgers.iter_mut().find_map(|((subsystem, kind), ledger)| {
                let index = ledger
                    .reservations
                    .iter()
                    .position(|r| r.id == reservation_id)?;
                let r = ledger.reservations.remove(index);
                Some((subsystem.clone(), kind.clone(), r))
            })
        };
        let Some((subsystem, kind, reservation)) = released else {
            return Err(RateLimitError::UnknownReservation(reservation_id.to_string()));
        };

        debug!(
            subsystem = %subsystem,
            kind = %kind,
            reservation_id = %reservation_id,
            requester = %reservation.requester,
            "reservation released"
        );
        self.audit_event(
            AuditTable::ChangeRequests,
            &subsystem,
            format!("released reservation on {subsystem}/{kind}"),
            json!({ "event": "released", "reservation_id": reservation_id, "magnitude": reservation.magnitude }),
        );
        Ok(())
    }

    // ── Brakes ──────────────────────────────────────────────────────────

    /// Hard-stop every change on `subsystem` (or `"all"`).
    ///
    /// `duration = None` holds until [`release_emergency_brake`](Self::release_emergency_brake).
    pub fn engage_emergency_brake(
        &self,
        subsystem: &str,
        reason: &str,
        duration: Option<std::time::Duration>,
    ) -> RateLimitResult<BrakeStatus> {
        self.engage_emergency_brake_at(subsystem, reason, duration, Utc::now())
    }

    pub fn engage_emergency_brake_at(
        &self,
        subsystem: &str,
        reason: &str,
        duration: Option<std::time::Duration>,
        now: DateTime<Utc>,
    ) -> RateLimitResult<BrakeStatus> {
        let subsystem = subsystem.to_ascii_lowercase();
        let expires_at = match duration {
            Some(d) => Some(
                Duration::from_std(d)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
                    .ok_or_else(|| {
                        RateLimitError::InvalidConfig(format!("brake duration {d:?} is out of range"))
                    })?,
            ),
            None => None,
        };
        let brake = BrakeStatus {
            subsystem: subsystem.clone(),
            reason: reason.to_string(),
            engaged_at: now,
            expires_at,
        };
        self.lock()?.brakes.insert(subsystem.clone(), brake.clone());

        error!(
            subsystem = %subsystem,
            reason = %reason,
            expires_at = ?expires_at,
            "emergency brake engaged"
        );
        self.audit_event(
            AuditTable::EmergencyActions,
            &subsystem,
            format!("emergency brake engaged: {reason}"),
            json!({ "event": "brake_engaged", "brake": &brake }),
        );
        Ok(brake)
    }

    /// Release a brake. Returns whether one was engaged.
    pub fn release_emergency_brake(&self, subsystem: &str, actor: &str) -> RateLimitResult<bool> {
        let subsystem = subsystem.to_ascii_lowercase();
        let released = self.lock()?.brakes.remove(&subsystem).is_some();
        if released {
            info!(subsystem = %subsystem, actor = %actor, "emergency brake released");
            self.audit_event(
                AuditTable::EmergencyActions,
                &subsystem,
                format!("emergency brake released by {actor}"),
                json!({ "event": "brake_released", "subsystem": &subsystem, "actor": actor }),
            );
        }
        Ok(released)
    }

    pub fn is_brake_engaged(&self, subsystem: &str) -> bool {
        let now = Utc::now();
        self.lock()
            .map(|s| s.active_brake(&subsystem.to_ascii_lowercase(), now).is_some())
            .unwrap_or(true)
    }

    pub fn active_brakes(&self) -> Vec<BrakeStatus> {
        let now = Utc::now();
        let mut brakes: Vec<BrakeStatus> = self
            .lock()
            .map(|s| {
                s.brakes
                    .values()
                    .filter(|b| b.is_active_at(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        brakes.sort_by(|a, b| a.subsystem.cmp(&b.subsystem));
        brakes
    }

    // ── Limits ──────────────────────────────────────────────────────────

    /// Scale every key of `subsystem` (or `"all"`) down by `factor`.
    ///
    /// Returns the number of keys tightened.
    pub fn tighten_limits(&self, subsystem: &str, factor: f64, reason: &str) -> RateLimitResult<usize> {
        if !(factor.is_finite() && factor > 0.0 && factor <= 1.0) {
            return Err(RateLimitError::InvalidFactor(factor));
        }
        let subsystem = subsystem.to_ascii_lowercase();
        let all = subsystems::is_all(&subsystem);
        let count = {
            let mut guard = self.lock()?;
            let mut count = 0;
            for ((name, _), ledger) in guard.ledgers.iter_mut() {
                if all || *name == subsystem {
                    ledger.limits = ledger.limits.scaled(factor);
                    count += 1;
                }
            }
            count
        };
        if count > 0 {
            warn!(subsystem = %subsystem, factor, reason = %reason, keys = count, "limits tightened");
            self.audit_event(
                AuditTable::EmergencyActions,
                &subsystem,
                format!("limits tightened by {factor}: {reason}"),
                json!({ "event": "limits_tightened", "factor": factor, "reason": reason }),
            );
        }
        Ok(count)
    }

    /// Restore configured limits for `subsystem` (or `"all"`).
    pub fn reset_limits(&self, subsystem: &str) -> RateLimitResult<usize> {
        let subsystem = subsystem.to_ascii_lowercase();
        let all = subsystems::is_all(&subsystem);
        let mut guard = self.lock()?;
        let mut count = 0;
        for ((name, _), ledger) in guard.ledgers.iter_mut() {
            if (all || *name == subsystem) && ledger.limits != ledger.configured {
                ledger.limits = ledger.configured.clone();
                count += 1;
            }
        }
        if count > 0 {
            info!(subsystem = %subsystem, keys = count, "limits reset");
        }
        Ok(count)
    }

    /// Register or replace the limits for one key.
    pub fn set_limits(&self, subsystem: &str, kind: &str, limits: ChangeLimits) -> RateLimitResult<()> {
        let entry = crate::config::ChangeLimitEntry::new(subsystem, kind, limits);
        RateLimitConfig {
            limits: vec![entry.clone()],
            ..Default::default()
        }
        .validate()?;

        let key = (
            entry.subsystem.to_ascii_lowercase(),
            entry.kind.to_ascii_lowercase(),
        );
        let mut guard = self.lock()?;
        match guard.ledgers.get_mut(&key) {
            Some(ledger) => {
                ledger.configured = entry.limits.clone();
                ledger.limits = entry.limits;
            }
            None => {
                guard.ledgers.insert(key, RateLedger::new(entry.limits));
            }
        }
        Ok(())
    }

    /// Effective limits for a key.
    pub fn limits(&self, subsystem: &str, kind: &str) -> Option<ChangeLimits> {
        let key = (subsystem.to_ascii_lowercase(), kind.to_ascii_lowercase());
        self.lock().ok()?.ledgers.get(&key).map(|l| l.limits.clone())
    }

    // ── Reporting ───────────────────────────────────────────────────────

    pub fn report(&self) -> RateLimitResult<RateLimiterReport> {
        self.report_at(Utc::now())
    }

    pub fn report_at(&self, now: DateTime<Utc>) -> RateLimitResult<RateLimiterReport> {
        let mut guard = self.lock()?;
        guard.expire(now, self.reservation_ttl);
        let window_start = self.window_start(now);

        let mut keys: Vec<KeyUtilization> = guard
            .ledgers
            .iter()
            .map(|((subsystem, kind), ledger)| {
                let cumulative = ledger.cumulative_since(window_start);
                let cooldown = Duration::seconds(ledger.limits.cooldown_seconds as i64);
                KeyUtilization {
                    subsystem: subsystem.clone(),
                    kind: kind.clone(),
                    cumulative_today: cumulative,
                    max_daily_change: ledger.limits.max_daily_change,
                    utilization: cumulative / ledger.limits.max_daily_change,
                    pending_reservations: ledger.reservations.len(),
                    changes_last_24h: ledger.count_after(now - Duration::hours(24)),
                    last_change: ledger.last_change,
                    in_cooldown: ledger.count_after(now - cooldown)
                        >= ledger.limits.burst_allowance as usize,
                    tightened: ledger.limits != ledger.configured,
                }
            })
            .collect();
        keys.sort_by(|a, b| (&a.subsystem, &a.kind).cmp(&(&b.subsystem, &b.kind)));

        let mut active_brakes: Vec<BrakeStatus> = guard.brakes.values().cloned().collect();
        active_brakes.sort_by(|a, b| a.subsystem.cmp(&b.subsystem));

        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::hours(24);
        Ok(RateLimiterReport {
            generated_at: Some(now),
            keys,
            active_brakes,
            rejections_last_hour: guard
                .rejections
                .iter()
                .filter(|r| r.timestamp > hour_ago)
                .count(),
            escalations_last_24h: guard
                .escalations
                .iter()
                .filter(|e| e.timestamp > day_ago)
                .count(),
        })
    }

    pub fn recent_escalations(&self, since: DateTime<Utc>) -> Vec<RiskEscalation> {
        self.lock()
            .map(|s| {
                s.escalations
                    .iter()
                    .filter(|e| e.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    // ── Recovery ────────────────────────────────────────────────────────

    /// Rebuild ledgers and brakes from a previous run's audit trail.
    ///
    /// Committed changes within the retention horizon are restored; live
    /// reservations are not, so unconfirmed approvals from the previous
    /// run must be re-validated. Call on a freshly built limiter.
    pub fn replay_from_audit(&self, sink: &dyn AuditSink) -> RateLimitResult<ReplaySummary> {
        self.replay_from_audit_at(sink, Utc::now())
    }

    pub fn replay_from_audit_at(
        &self,
        sink: &dyn AuditSink,
        now: DateTime<Utc>,
    ) -> RateLimitResult<ReplaySummary> {
        let records = sink.all()?;
        let horizon = now - retention();
        let mut summary = ReplaySummary::default();

        let mut guard = self.lock()?;
        let state = &mut *guard;
        for record in records {
            let event = record.payload.get("event").and_then(Value::as_str);
            match (record.table, event) {
                (AuditTable::ChangeRequests, Some("committed")) => {
                    let change = record
                        .payload
                        .get("change")
                        .cloned()
                        .and_then(|v| serde_json::from_value::<CommittedChange>(v).ok());
                    let Some(change) = change else {
                        summary.changes_skipped += 1;
                        continue;
                    };
                    let key = (change.subsystem.clone(), change.kind.clone());
                    match state.ledgers.get_mut(&key) {
                        Some(ledger) if change.timestamp >= horizon => {
                            ledger.committed.push_back(LedgerEntry {
                                timestamp: change.timestamp,
                                magnitude: change.magnitude,
                            });
                            ledger.last_change = Some(change.timestamp);
                            summary.changes_restored += 1;
                        }
                        _ => summary.changes_skipped += 1,
                    }
                }
                (AuditTable::EmergencyActions, Some("brake_engaged")) => {
                    if let Some(brake) = record
                        .payload
                        .get("brake")
                        .cloned()
                        .and_then(|v| serde_json::from_value::<BrakeStatus>(v).ok())
                    {
                        state.brakes.insert(brake.subsystem.clone(), brake);
                    }
                }
                (AuditTable::EmergencyActions, Some("brake_released")) => {
                    if let Some(subsystem) = record.payload.get("subsystem").and_then(Value::as_str) {
                        state.brakes.remove(subsystem);
                    }
                }
                _ => {}
            }
        }

        for ledger in state.ledgers.values_mut() {
            ledger
                .committed
                .make_contiguous()
                .sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        }
        state.brakes.retain(|_, b| b.is_active_at(now));
        summary.brakes_restored = state.brakes.len();

        info!(
            restored = summary.changes_restored,
            skipped = summary.changes_skipped,
            brakes = summary.brakes_restored,
            "rate ledgers replayed from audit log"
        );
        Ok(summary)
    }
}
