//! # veto-rate-limit
//!
//! Change rate limiter for self-modification. Every proposed change is
//! keyed by `(subsystem, kind)` and checked, in order, against:
//!
//! 1. an emergency brake on the subsystem (hard stop, CRITICAL)
//! 2. the single-change cap (`> 2×` rejects, `> 1×` suggests 90 % of the cap)
//! 3. the daily cumulative cap (suggests 90 % of what remains)
//! 4. the burst allowance inside the cooldown window
//!
//! then scored for risk and flagged for human approval when large or
//! risky. Approved results carry a `reservation_id`; the caller confirms
//! the applied change exactly once through
//! [`ChangeRateLimiter::record_approved_change`] or
//! [`ChangeRateLimiter::commit_reservation`].

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod limiter;
pub mod result;

pub use config::{default_limits, ChangeLimitEntry, ChangeLimits, DailyWindow, RateLimitConfig};
pub use error::{RateLimitError, RateLimitResult};
pub use limiter::ChangeRateLimiter;
pub use result::{
    risk_level_for, BrakeStatus, ChangeValidationResult, CommittedChange, KeyUtilization,
    RateLimiterReport, RejectionRecord, ReplaySummary, RiskEscalation,
};
