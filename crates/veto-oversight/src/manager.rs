//! Human Oversight Manager.
//!
//! Requests that no rule can decide are parked in a pending map with a
//! oneshot responder and the caller awaits it under a timeout. Whoever
//! removes the entry from the map under the state lock performs the one
//! terminal transition; every later attempt sees `AlreadyResolved`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;
use veto_audit::{record_or_warn, AuditEntry, AuditSink, AuditTable};
use veto_types::Urgency;

use crate::condition::EvalContext;
use crate::display::ApprovalDisplay;
use crate::error::{OversightError, OversightResult};
use crate::policy::{ApprovalPolicy, OversightConfig};
use crate::request::{
    risk_for_reviewer, ApprovalRequest, ApprovalResponse, ApprovalStatistics, ApprovalStatus,
    OperatorResponse, RiskAssessment,
};

const AUDIT_ACTOR: &str = "oversight_manager";

struct CompiledPolicy {
    policy: ApprovalPolicy,
    pattern: Regex,
}

struct PendingApproval {
    request: ApprovalRequest,
    responder: oneshot::Sender<ApprovalResponse>,
}

#[derive(Default)]
struct Counters {
    total: u64,
    auto_approved: u64,
    auto_denied: u64,
    approved: u64,
    denied: u64,
    timed_out: u64,
    cancelled: u64,
    human_response_secs: f64,
    human_responses: u64,
}

#[derive(Default)]
struct OversightState {
    pending: HashMap<String, PendingApproval>,
    history: VecDeque<ApprovalResponse>,
    counters: Counters,
}

impl OversightState {
    fn missing(&self, id: &str) -> OversightError {
        if self.history.iter().any(|r| r.request_id == id) {
            OversightError::AlreadyResolved(id.to_string())
        } else {
            OversightError::UnknownRequest(id.to_string())
        }
    }

    fn record(&mut self, response: &ApprovalResponse, max_history: usize) {
        let c = &mut self.counters;
        match (response.status, response.auto_decided) {
            (ApprovalStatus::Approved, true) => c.auto_approved += 1,
            (ApprovalStatus::Denied, true) => c.auto_denied += 1,
            (ApprovalStatus::Approved, false) => c.approved += 1,
            (ApprovalStatus::Denied, false) => c.denied += 1,
            (ApprovalStatus::Timeout, _) => c.timed_out += 1,
            (ApprovalStatus::Cancelled, _) => c.cancelled += 1,
            (ApprovalStatus::Pending, _) => {}
        }
        if !response.auto_decided && response.status != ApprovalStatus::Timeout {
            c.human_response_secs += response.response_secs().max(0.0);
            c.human_responses += 1;
        }
        self.history.push_back(response.clone());
        while self.history.len() > max_history {
            self.history.pop_front();
        }
    }
}

/// Policy-driven approval workflow with fail-closed timeouts.
pub struct OversightManager {
    config: OversightConfig,
    policies: Vec<CompiledPolicy>,
    state: Mutex<OversightState>,
    require_all: AtomicBool,
    display: Arc<dyn ApprovalDisplay>,
    audit: Arc<dyn AuditSink>,
}

impl OversightManager {
    pub fn new(
        config: OversightConfig,
        display: Arc<dyn ApprovalDisplay>,
        audit: Arc<dyn AuditSink>,
    ) -> OversightResult<Self> {
        config.validate()?;
        let policies = config
            .policies
            .iter()
            .map(|policy| {
                Ok(CompiledPolicy {
                    pattern: policy.compile()?,
                    policy: policy.clone(),
                })
            })
            .collect::<OversightResult<Vec<_>>>()?;
        Ok(Self {
            config,
            policies,
            state: Mutex::new(OversightState::default()),
            require_all: AtomicBool::new(false),
            display,
            audit,
        })
    }

    fn lock(&self) -> OversightResult<MutexGuard<'_, OversightState>> {
        self.state
            .lock()
            .map_err(|_| OversightError::Backend("oversight state lock poisoned".into()))
    }

    /// First policy whose pattern matches the whole operation name.
    pub fn policy_for(&self, operation: &str) -> Option<&ApprovalPolicy> {
        self.policies
            .iter()
            .find(|p| p.pattern.is_match(operation))
            .map(|p| &p.policy)
    }

    /// Longest a caller may wait on a human for `operation`.
    pub fn approval_timeout(&self, operation: &str) -> Duration {
        let secs = self
            .policy_for(operation)
            .map_or(self.config.default_timeout_secs, |p| p.timeout_seconds);
        Duration::from_secs(secs)
    }

    /// Emergency mode: route every operation to a human.
    ///
    /// Auto-approve rules are suspended; auto-deny rules still apply.
    pub fn require_approval_for_all(&self, enabled: bool) {
        let previous = self.require_all.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            warn!(enabled, "human approval required for all operations");
        }
    }

    pub fn requires_approval_for_all(&self) -> bool {
        self.require_all.load(Ordering::SeqCst)
    }

    // ── Requests ────────────────────────────────────────────────────────

    /// Decide `operation`, waiting for a human when no rule decides it.
    ///
    /// Never returns an error for a policy outcome: denial, timeout and
    /// cancellation arrive as an [`ApprovalResponse`] with `approved = false`.
    pub async fn request_human_approval(
        &self,
        operation: &str,
        details: Value,
        urgency: Urgency,
        requester: &str,
        context: Value,
    ) -> OversightResult<ApprovalResponse> {
        let now = Utc::now();
        let id = format!("apr-{}", Uuid::new_v4());
        let require_all = self.requires_approval_for_all();
        self.lock()?.counters.total += 1;

        let policy = match self.policy_for(operation) {
            Some(policy) if policy.required || require_all => policy.clone(),
            Some(_) => {
                return self.auto_decide(
                    id,
                    operation,
                    requester,
                    ApprovalStatus::Approved,
                    "policy does not require approval",
                    now,
                )
            }
            None if require_all => ApprovalPolicy::new(regex::escape(operation))
                .timeout(self.config.default_timeout_secs),
            None => {
                return self.auto_decide(
                    id,
                    operation,
                    requester,
                    ApprovalStatus::Approved,
                    "no approval policy applies",
                    now,
                )
            }
        };

        let cx = EvalContext {
            details: &details,
            context: &context,
            urgency,
            requester,
        };
        if let Some(rule) = policy.auto_deny_conditions.iter().find(|c| c.evaluate(&cx)) {
            warn!(operation, requester, rule = %rule.describe(), "auto-denied");
            return self.auto_decide(
                id,
                operation,
                requester,
                ApprovalStatus::Denied,
                format!("auto-denied: {}", rule.describe()),
                now,
            );
        }
        let unmet: Vec<String> = policy
            .auto_approve_conditions
            .iter()
            .filter(|c| !c.evaluate(&cx))
            .map(|c| c.describe())
            .collect();
        if !require_all && !policy.auto_approve_conditions.is_empty() && unmet.is_empty() {
            debug!(operation, requester, "auto-approved");
            return self.auto_decide(
                id,
                operation,
                requester,
                ApprovalStatus::Approved,
                "auto-approved: all approval conditions held",
                now,
            );
        }

        let mut factors = vec![format!(
            "policy {} requires {:?} review",
            policy.operation_pattern, policy.reviewer_level
        )];
        if require_all {
            factors.push("human approval required for all operations".into());
        }
        factors.push(format!("urgency {urgency}"));
        let request = ApprovalRequest {
            id: id.clone(),
            operation: operation.to_string(),
            details,
            context,
            urgency,
            requester: requester.to_string(),
            created_at: now,
            expires_at: now + chrono::Duration::seconds(policy.timeout_seconds as i64),
            timeout_seconds: policy.timeout_seconds,
            reviewer_level: policy.reviewer_level,
            escalation_path: policy.escalation_path.clone(),
            risk_assessment: RiskAssessment {
                level: risk_for_reviewer(policy.reviewer_level),
                factors,
            },
            approval_criteria: unmet,
        };
        self.await_human(request).await
    }

    fn auto_decide(
        &self,
        id: String,
        operation: &str,
        requester: &str,
        status: ApprovalStatus,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> OversightResult<ApprovalResponse> {
        let response =
            ApprovalResponse::decided(id, operation, requester, status, reason, now, now).auto();
        self.lock()?.record(&response, self.config.max_history);
        self.audit_response(&response);
        Ok(response)
    }

    async fn await_human(&self, request: ApprovalRequest) -> OversightResult<ApprovalResponse> {
        let (tx, mut rx) = oneshot::channel();
        let id = request.id.clone();
        let wait = Duration::from_secs(request.timeout_seconds);
        {
            let mut state = self.lock()?;
            state.pending.insert(
                id.clone(),
                PendingApproval {
                    request: request.clone(),
                    responder: tx,
                },
            );
        }
        info!(
            request_id = %id,
            operation = %request.operation,
            requester = %request.requester,
            timeout_secs = request.timeout_seconds,
            "approval request awaiting human review"
        );
        record_or_warn(
            self.audit.as_ref(),
            AuditEntry::new(
                AuditTable::ApprovalRequests,
                AUDIT_ACTOR,
                format!("{} requested by {}", request.operation, request.requester),
            )
            .at(request.created_at)
            .payload(&request),
        );
        if let Err(e) = self.display.show_request(&request).await {
            warn!(request_id = %id, error = %e, "approval prompt could not be shown");
        }

        match tokio::time::timeout(wait, &mut rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                let resolved = self.resolve(&id, |r| {
                    ApprovalResponse::decided(
                        r.id.clone(),
                        &r.operation,
                        &r.requester,
                        ApprovalStatus::Cancelled,
                        "responder dropped",
                        r.created_at,
                        Utc::now(),
                    )
                })?;
                Ok(resolved.map(|(_, response)| response).unwrap_or_else(|| {
                    ApprovalResponse::decided(
                        id.clone(),
                        &request.operation,
                        &request.requester,
                        ApprovalStatus::Cancelled,
                        "responder dropped",
                        request.created_at,
                        Utc::now(),
                    )
                }))
            }
            Err(_) => match self.resolve(&id, timeout_response)? {
                Some((_, response)) => {
                    warn!(
                        request_id = %id,
                        operation = %request.operation,
                        "approval request timed out; treating as denied"
                    );
                    self.announce(&response).await;
                    Ok(response)
                }
                // Another resolver removed the entry first; its responder
                // always sends or is dropped, so this wait is bounded.
                None => rx.await.map_err(|_| OversightError::AlreadyResolved(id)),
            },
        }
    }

    /// Atomically remove a pending request and record its terminal response.
    fn resolve(
        &self,
        id: &str,
        decide: impl FnOnce(&ApprovalRequest) -> ApprovalResponse,
    ) -> OversightResult<Option<(oneshot::Sender<ApprovalResponse>, ApprovalResponse)>> {
        let mut state = self.lock()?;
        let Some(pending) = state.pending.remove(id) else {
            return Ok(None);
        };
        let response = decide(&pending.request);
        state.record(&response, self.config.max_history);
        drop(state);
        self.audit_response(&response);
        Ok(Some((pending.responder, response)))
    }

    async fn announce(&self, response: &ApprovalResponse) {
        if let Err(e) = self.display.show_resolution(response).await {
            debug!(request_id = %response.request_id, error = %e, "resolution not shown");
        }
    }

    /// Apply an operator's answer to a pending request.
    ///
    /// `Details` re-renders the request and leaves it pending. Any answer
    /// for a request that already reached a terminal state fails with
    /// [`OversightError::AlreadyResolved`].
    pub async fn respond(
        &self,
        request_id: &str,
        answer: OperatorResponse,
    ) -> OversightResult<ApprovalStatus> {
        let (status, reviewer, reason) = match answer {
            OperatorResponse::Details => {
                let request = {
                    let state = self.lock()?;
                    match state.pending.get(request_id) {
                        Some(p) => p.request.clone(),
                        None => return Err(state.missing(request_id)),
                    }
                };
                if let Err(e) = self.display.show_details(&request).await {
                    warn!(request_id, error = %e, "approval details could not be shown");
                }
                return Ok(ApprovalStatus::Pending);
            }
            OperatorResponse::Approve { reviewer, note } => (
                ApprovalStatus::Approved,
                reviewer,
                note.unwrap_or_else(|| "approved by reviewer".into()),
            ),
            OperatorResponse::Deny { reviewer, reason } => (
                ApprovalStatus::Denied,
                reviewer,
                reason.unwrap_or_else(|| "denied by reviewer".into()),
            ),
            OperatorResponse::Cancel { reviewer } => (
                ApprovalStatus::Cancelled,
                reviewer,
                "cancelled by reviewer".to_string(),
            ),
        };

        let resolved = self.resolve(request_id, |r| {
            ApprovalResponse::decided(
                r.id.clone(),
                &r.operation,
                &r.requester,
                status,
                reason,
                r.created_at,
                Utc::now(),
            )
            .reviewed_by(reviewer.clone())
        })?;
        let Some((responder, response)) = resolved else {
            return Err(self.lock()?.missing(request_id));
        };
        info!(request_id, status = %status, reviewer = %reviewer, "approval request resolved");
        if responder.send(response.clone()).is_err() {
            debug!(request_id, "requester no longer waiting");
        }
        self.announce(&response).await;
        Ok(status)
    }

    /// Time out every pending request whose deadline has passed.
    ///
    /// Covers requesters that stopped waiting; a live requester's own
    /// timer normally fires first.
    pub fn sweep_expired(&self) -> OversightResult<Vec<ApprovalResponse>> {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> OversightResult<Vec<ApprovalResponse>> {
        let overdue: Vec<String> = self
            .lock()?
            .pending
            .values()
            .filter(|p| p.request.expires_at <= now)
            .map(|p| p.request.id.clone())
            .collect();
        let mut out = Vec::new();
        for id in overdue {
            if let Some((responder, response)) = self.resolve(&id, timeout_response)? {
                warn!(request_id = %id, "expired approval request swept");
                let _ = responder.send(response.clone());
                out.push(response);
            }
        }
        Ok(out)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Pending requests, oldest first.
    pub fn pending_requests(&self) -> OversightResult<Vec<ApprovalRequest>> {
        let mut out: Vec<ApprovalRequest> = self
            .lock()?
            .pending
            .values()
            .map(|p| p.request.clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    /// Current status of a request, if it is pending or still in history.
    pub fn status_of(&self, request_id: &str) -> OversightResult<Option<ApprovalStatus>> {
        let state = self.lock()?;
        if state.pending.contains_key(request_id) {
            return Ok(Some(ApprovalStatus::Pending));
        }
        Ok(state
            .history
            .iter()
            .rev()
            .find(|r| r.request_id == request_id)
            .map(|r| r.status))
    }

    /// Decided requests, oldest first.
    pub fn history(&self) -> OversightResult<Vec<ApprovalResponse>> {
        Ok(self.lock()?.history.iter().cloned().collect())
    }

    pub fn statistics(&self) -> OversightResult<ApprovalStatistics> {
        let state = self.lock()?;
        let c = &state.counters;
        let mut stats = ApprovalStatistics {
            total_requests: c.total,
            auto_approved: c.auto_approved,
            auto_denied: c.auto_denied,
            approved: c.approved,
            denied: c.denied,
            timed_out: c.timed_out,
            cancelled: c.cancelled,
            pending: state.pending.len(),
            require_approval_for_all: self.requires_approval_for_all(),
            ..ApprovalStatistics::default()
        };
        let decided = stats.decided();
        if decided > 0 {
            stats.approval_rate = (c.approved + c.auto_approved) as f64 / decided as f64;
        }
        let human = stats.human_routed();
        if human > 0 {
            stats.timeout_rate = c.timed_out as f64 / human as f64;
        }
        if c.human_responses > 0 {
            stats.avg_response_secs = c.human_response_secs / c.human_responses as f64;
        }
        Ok(stats)
    }

    fn audit_response(&self, response: &ApprovalResponse) {
        record_or_warn(
            self.audit.as_ref(),
            AuditEntry::new(
                AuditTable::ApprovalResponses,
                response.reviewer.as_deref().unwrap_or(AUDIT_ACTOR),
                format!(
                    "{} {}: {}",
                    response.operation, response.status, response.reason
                ),
            )
            .at(response.decided_at)
            .payload(response),
        );
    }
}

fn timeout_response(request: &ApprovalRequest) -> ApprovalResponse {
    ApprovalResponse::decided(
        request.id.clone(),
        &request.operation,
        &request.requester,
        ApprovalStatus::Timeout,
        format!(
            "no reviewer response within {}s; treated as denied",
            request.timeout_seconds
        ),
        request.created_at,
        Utc::now(),
    )
}
