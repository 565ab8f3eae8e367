//! Shared fixtures for the veto end-to-end and property tests.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use veto_audit::InMemoryAuditLog;
use veto_coordinator::{MemoryNotifier, SafetyConfig, SafetyCoordinator};
use veto_isolation::{IsolationConfig, IsolationRegistry};
use veto_oversight::{ApprovalRequest, MemoryDisplay, OversightConfig, OversightManager};
use veto_rate_limit::{ChangeLimitEntry, ChangeRateLimiter, RateLimitConfig};

/// Fixed instant so time-dependent assertions are reproducible.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn limiter() -> (ChangeRateLimiter, Arc<InMemoryAuditLog>) {
    let audit = Arc::new(InMemoryAuditLog::new());
    let limiter = ChangeRateLimiter::new(RateLimitConfig::default(), audit.clone())
        .expect("default rate limits are valid");
    (limiter, audit)
}

/// Limiter configured with exactly `limits`.
pub fn limiter_with(limits: Vec<ChangeLimitEntry>) -> ChangeRateLimiter {
    let config = RateLimitConfig {
        limits,
        ..RateLimitConfig::default()
    };
    ChangeRateLimiter::new(config, Arc::new(InMemoryAuditLog::new()))
        .expect("test limits are valid")
}

pub fn registry() -> IsolationRegistry {
    IsolationRegistry::new(IsolationConfig::default(), Arc::new(InMemoryAuditLog::new()))
        .expect("default isolation policies are valid")
}

pub fn oversight() -> (OversightManager, Arc<MemoryDisplay>) {
    let display = Arc::new(MemoryDisplay::new());
    let manager = OversightManager::new(
        OversightConfig::default(),
        display.clone(),
        Arc::new(InMemoryAuditLog::new()),
    )
    .expect("default approval policies are valid");
    (manager, display)
}

/// Wait until a request is pending and return the oldest one.
pub async fn next_pending(manager: &OversightManager) -> ApprovalRequest {
    loop {
        if let Some(request) = manager
            .pending_requests()
            .expect("pending requests readable")
            .into_iter()
            .next()
        {
            return request;
        }
        tokio::task::yield_now().await;
    }
}

/// A coordinator wired to in-memory seams.
pub struct Fixture {
    pub coordinator: Arc<SafetyCoordinator>,
    pub audit: Arc<InMemoryAuditLog>,
    pub display: Arc<MemoryDisplay>,
    pub notifier: Arc<MemoryNotifier>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(SafetyConfig::default())
    }

    pub fn with_config(config: SafetyConfig) -> Self {
        let audit = Arc::new(InMemoryAuditLog::new());
        let display = Arc::new(MemoryDisplay::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let coordinator = SafetyCoordinator::builder(config)
            .audit(audit.clone())
            .display(display.clone())
            .notifier(notifier.clone())
            .build()
            .expect("coordinator builds from valid config");
        Self {
            coordinator: Arc::new(coordinator),
            audit,
            display,
            notifier,
        }
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}
