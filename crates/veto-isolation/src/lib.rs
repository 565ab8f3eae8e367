//! # veto-isolation
//!
//! The isolation registry holds a declarative [`SubsystemPolicy`] for each
//! logical subsystem (personality evolution, code generation, research,
//! memory, …) and answers one question: may subsystem A perform operation
//! X against subsystem B right now?
//!
//! ## Check order
//!
//! 1. Both subsystems known (`unknown_system`, critical)
//! 2. Neither side isolated or quarantined (high)
//! 3. No modifying operation against a protected subsystem (high)
//! 4. Operation not banned for the requestor (high)
//! 5. Target reachable from the requestor (medium)
//! 6. Operation in the requestor's allowed set (medium)
//! 7. Daily resource quota not exhausted (medium)
//!
//! The first failing check wins. Repeated denials auto-quarantine the
//! requestor; only [`IsolationRegistry::restore`] returns a subsystem to
//! ACTIVE.

#![deny(unsafe_code)]

pub mod decision;
pub mod error;
pub mod policy;
pub mod registry;

pub use decision::{
    IsolationDecision, IsolationIntegrity, RecommendedAction, StatusChange, ViolationRecord,
    ViolationType,
};
pub use error::{IsolationError, IsolationResult};
pub use policy::{default_policies, IsolationConfig, IsolationLevel, SubsystemPolicy, SystemStatus};
pub use registry::IsolationRegistry;
