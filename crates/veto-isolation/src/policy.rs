use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use veto_types::{secs_in_bounds, subsystems, MAX_CONFIG_SECS};

use crate::error::{IsolationError, IsolationResult};

// ── Status ──────────────────────────────────────────────────────────────

/// Operational status of a subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Active,
    Isolated,
    Suspended,
    Quarantined,
    Maintenance,
}

impl SystemStatus {
    /// Whether interactions to or from a subsystem in this status are denied.
    pub fn blocks_interaction(&self) -> bool {
        matches!(self, Self::Isolated | Self::Quarantined)
    }
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl std::fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Isolated => write!(f, "isolated"),
            Self::Suspended => write!(f, "suspended"),
            Self::Quarantined => write!(f, "quarantined"),
            Self::Maintenance => write!(f, "maintenance"),
        }
    }
}

/// How tightly a subsystem is fenced off.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    Low,
    Medium,
    High,
    Maximum,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Maximum => write!(f, "maximum"),
        }
    }
}

/// Operations that count as modifying the target.
pub const MODIFYING_OPERATIONS: &[&str] = &["modify", "write", "update", "delete"];

// ── Policy ──────────────────────────────────────────────────────────────

/// Declarative capability policy for one subsystem.
///
/// Operation and subsystem names are compared case-insensitively; the
/// builder lower-cases everything it is given.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsystemPolicy {
    pub name: String,
    pub status: SystemStatus,
    pub isolation_level: IsolationLevel,
    /// Operations this subsystem may perform.
    pub allowed_operations: BTreeSet<String>,
    /// Operations this subsystem may never perform.
    pub banned_operations: BTreeSet<String>,
    /// Subsystems this one may not modify.
    pub cannot_modify: BTreeSet<String>,
    /// Subsystems this one may interact with.
    pub reachable: BTreeSet<String>,
    /// Daily quota per resource. A resource is named by the request
    /// context's `resource` field, or by the operation itself.
    pub resource_quotas: BTreeMap<String, u64>,
    /// Operations that are allowed but need human approval.
    pub approval_required: BTreeSet<String>,
}

impl Default for SubsystemPolicy {
    fn default() -> Self {
        Self::new("")
    }
}

fn lowered<I, S>(items: I) -> impl Iterator<Item = String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items.into_iter().map(|s| s.as_ref().to_ascii_lowercase())
}

impl SubsystemPolicy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_ascii_lowercase(),
            status: SystemStatus::Active,
            isolation_level: IsolationLevel::Medium,
            allowed_operations: BTreeSet::new(),
            banned_operations: BTreeSet::new(),
            cannot_modify: BTreeSet::new(),
            reachable: BTreeSet::new(),
            resource_quotas: BTreeMap::new(),
            approval_required: BTreeSet::new(),
        }
    }

    pub fn level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    pub fn allow<I, S>(mut self, ops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_operations.extend(lowered(ops));
        self
    }

    pub fn ban<I, S>(mut self, ops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.banned_operations.extend(lowered(ops));
        self
    }

    pub fn protect<I, S>(mut self, subsystems: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.cannot_modify.extend(lowered(subsystems));
        self
    }

    pub fn reach<I, S>(mut self, subsystems: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.reachable.extend(lowered(subsystems));
        self
    }

    pub fn quota(mut self, resource: impl AsRef<str>, daily_limit: u64) -> Self {
        self.resource_quotas
            .insert(resource.as_ref().to_ascii_lowercase(), daily_limit);
        self
    }

    pub fn require_approval<I, S>(mut self, ops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.approval_required.extend(lowered(ops));
        self
    }

    pub fn can_reach(&self, target: &str) -> bool {
        target == self.name || self.reachable.contains(target)
    }
}

// ── Configuration ───────────────────────────────────────────────────────

/// Isolation registry configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    pub policies: Vec<SubsystemPolicy>,
    /// Denials within `violation_window_secs` that auto-quarantine a requestor.
    pub quarantine_threshold: usize,
    pub violation_window_secs: u64,
    /// Maximum violation records kept in memory.
    pub max_violation_history: usize,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            policies: default_policies(),
            quarantine_threshold: 5,
            violation_window_secs: 3600,
            max_violation_history: 1000,
        }
    }
}

impl IsolationConfig {
    pub fn validate(&self) -> IsolationResult<()> {
        if !secs_in_bounds(self.violation_window_secs) {
            return Err(IsolationError::InvalidConfig(format!(
                "violation_window_secs exceeds {MAX_CONFIG_SECS}"
            )));
        }
        let mut seen = HashSet::new();
        for policy in &self.policies {
            if !seen.insert(policy.name.as_str()) {
                return Err(IsolationError::DuplicatePolicy(policy.name.clone()));
            }
        }
        Ok(())
    }
}

/// Built-in policy set for the well-known subsystems.
pub fn default_policies() -> Vec<SubsystemPolicy> {
    use subsystems::*;

    vec![
        SubsystemPolicy::new(PERSONALITY_EVOLUTION)
            .level(IsolationLevel::High)
            .allow(["read", "query", "analyze", "evolve"])
            .ban(["execute_code", "network_access", "file_system_write"])
            .protect([CODE_GENERATION, MEMORY, RESEARCH])
            .reach([CONVERSATION, MEMORY, SASS_ADJUSTMENT])
            .quota("evolve", 10)
            .require_approval(["evolve"]),
        SubsystemPolicy::new(SASS_ADJUSTMENT)
            .level(IsolationLevel::Medium)
            .allow(["read", "query", "adjust"])
            .ban(["execute_code", "network_access"])
            .protect([PERSONALITY_EVOLUTION, CODE_GENERATION, MEMORY])
            .reach([CONVERSATION, PERSONALITY_EVOLUTION])
            .quota("adjust", 20),
        SubsystemPolicy::new(CODE_GENERATION)
            .level(IsolationLevel::Maximum)
            .allow(["read", "query", "analyze", "generate"])
            .ban(["system_call", "network_access", "modify_safety"])
            .protect([PERSONALITY_EVOLUTION, SASS_ADJUSTMENT, MEMORY])
            .reach([RESEARCH, MEMORY])
            .quota("generate", 25)
            .require_approval(["generate", "execute"]),
        SubsystemPolicy::new(RESEARCH)
            .level(IsolationLevel::Medium)
            .allow(["read", "query", "search", "summarize"])
            .ban(["execute_code", "file_system_write"])
            .protect([PERSONALITY_EVOLUTION, CODE_GENERATION, SASS_ADJUSTMENT])
            .reach([MEMORY, CONVERSATION])
            .quota("search", 100),
        SubsystemPolicy::new(MEMORY)
            .level(IsolationLevel::High)
            .allow(["read", "query", "write", "update", "delete"])
            .ban(["execute_code", "network_access"])
            .protect([PERSONALITY_EVOLUTION, CODE_GENERATION])
            .reach([CONVERSATION, RESEARCH])
            .quota("write", 500),
        SubsystemPolicy::new(CONVERSATION)
            .level(IsolationLevel::Low)
            .allow(["read", "query", "respond", "write"])
            .ban(["execute_code"])
            .protect([CODE_GENERATION, PERSONALITY_EVOLUTION])
            .reach([MEMORY, SASS_ADJUSTMENT, PERSONALITY_EVOLUTION, RESEARCH]),
    ]
}
