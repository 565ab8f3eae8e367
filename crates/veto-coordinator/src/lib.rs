//! # veto-coordinator
//!
//! The [`SafetyCoordinator`] owns the isolation registry, change rate
//! limiter, drift monitor and oversight manager, and is the only place
//! incidents are opened, resolved or acted on.
//!
//! Proposed self-modifications go through
//! [`SafetyCoordinator::evaluate_mutation`]: isolation first, then the
//! rate limiter, then human oversight when either asks for it. A periodic
//! monitor ([`SafetyCoordinator::start`]) snapshots every component,
//! turns findings into incidents and escalates to emergency shutdown when
//! too many serious incidents pile up.

#![deny(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod incident;
pub mod mutation;
pub mod notifier;
pub mod playbook;
pub mod report;

pub use config::{AuditBackend, CoordinatorSettings, LoggingConfig, SafetyConfig};
pub use coordinator::{
    detect_signals, SafetyCoordinator, SafetyCoordinatorBuilder, SYSTEM_RESTORE_OPERATION,
};
pub use error::{CoordinatorError, CoordinatorResult, SafetyError};
pub use incident::{
    compute_status, Incident, IncidentSignal, IncidentState, IncidentType, SafetyStatus,
    SafetyStatusChange, SYSTEM_WIDE,
};
pub use mutation::{DecisionStage, MutationDecision, MutationProposal};
pub use notifier::{EmergencyNotice, EmergencyNotifier, LogNotifier, MemoryNotifier};
pub use playbook::{plan, PlaybookAction};
pub use report::SafetyReport;
