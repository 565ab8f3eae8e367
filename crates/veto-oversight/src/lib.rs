//! # veto-oversight
//!
//! Human Oversight Manager. Each operation is matched against an ordered
//! table of [`ApprovalPolicy`] rules:
//!
//! 1. no required policy: approved automatically
//! 2. any auto-deny [`Condition`] holds: denied, no human involved
//! 3. every auto-approve condition holds: approved automatically
//! 4. otherwise the request is shown through an [`ApprovalDisplay`] and the
//!    caller waits for an operator, up to the policy timeout
//!
//! A timeout is a denial with `follow_up_required` set. Each request has
//! exactly one terminal transition.

#![deny(unsafe_code)]

pub mod condition;
pub mod display;
pub mod error;
pub mod manager;
pub mod policy;
pub mod request;

pub use condition::{Condition, EvalContext, ANY_FIELD};
pub use display::{render_request, ApprovalDisplay, ConsoleDisplay, MemoryDisplay};
pub use error::{OversightError, OversightResult};
pub use manager::OversightManager;
pub use policy::{default_policies, ApprovalPolicy, OversightConfig, ReviewerLevel, DANGEROUS_CALLS};
pub use request::{
    ApprovalRequest, ApprovalResponse, ApprovalStatistics, ApprovalStatus, OperatorResponse,
    RiskAssessment,
};
