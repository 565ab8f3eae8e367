use regex::Regex;
use serde::{Deserialize, Serialize};
use veto_types::{secs_in_bounds, MAX_CONFIG_SECS};

use crate::condition::{Condition, ANY_FIELD};
use crate::error::{OversightError, OversightResult};

/// Call fragments that make a code-bearing request unconditionally denied.
pub const DANGEROUS_CALLS: &[&str] = &[
    "subprocess",
    "os.system",
    "rm -rf",
    "eval(",
    "exec(",
    "shutil.rmtree",
    "__import__",
];

// ── Policy ──────────────────────────────────────────────────────────────

/// Who must review a request routed to a human.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerLevel {
    Operator,
    Senior,
    SafetyOfficer,
}

/// Approval rules for operations whose name matches `operation_pattern`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    /// Regex matched against the whole operation name.
    pub operation_pattern: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_reviewer")]
    pub reviewer_level: ReviewerLevel,
    #[serde(default)]
    pub escalation_path: Vec<String>,
    /// All must hold to approve without a human. Empty never auto-approves.
    #[serde(default)]
    pub auto_approve_conditions: Vec<Condition>,
    /// Any holding denies without a human.
    #[serde(default)]
    pub auto_deny_conditions: Vec<Condition>,
}

fn default_required() -> bool {
    true
}

fn default_timeout() -> u64 {
    300
}

fn default_reviewer() -> ReviewerLevel {
    ReviewerLevel::Operator
}

impl ApprovalPolicy {
    pub fn new(operation_pattern: impl Into<String>) -> Self {
        Self {
            operation_pattern: operation_pattern.into(),
            required: true,
            timeout_seconds: default_timeout(),
            reviewer_level: ReviewerLevel::Operator,
            escalation_path: Vec::new(),
            auto_approve_conditions: Vec::new(),
            auto_deny_conditions: Vec::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn reviewer(mut self, level: ReviewerLevel) -> Self {
        self.reviewer_level = level;
        self
    }

    pub fn escalate_to(mut self, contacts: &[&str]) -> Self {
        self.escalation_path = contacts.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn auto_approve_when(mut self, condition: Condition) -> Self {
        self.auto_approve_conditions.push(condition);
        self
    }

    pub fn auto_deny_when(mut self, condition: Condition) -> Self {
        self.auto_deny_conditions.push(condition);
        self
    }

    pub(crate) fn compile(&self) -> OversightResult<Regex> {
        if self.timeout_seconds == 0 || !secs_in_bounds(self.timeout_seconds) {
            return Err(OversightError::InvalidPolicy(format!(
                "{}: timeout_seconds must be in 1..={MAX_CONFIG_SECS}",
                self.operation_pattern
            )));
        }
        for condition in self
            .auto_approve_conditions
            .iter()
            .chain(&self.auto_deny_conditions)
        {
            condition.validate()?;
        }
        Regex::new(&format!("^(?:{})$", self.operation_pattern))
            .map_err(|e| OversightError::InvalidPolicy(format!("{}: {e}", self.operation_pattern)))
    }
}

/// Default policy table. Order matters: the first matching pattern wins.
pub fn default_policies() -> Vec<ApprovalPolicy> {
    let dangerous = Condition::contains_any(ANY_FIELD, DANGEROUS_CALLS);
    vec![
        ApprovalPolicy::new("code_execution")
            .reviewer(ReviewerLevel::SafetyOfficer)
            .escalate_to(&["safety_officer"])
            .auto_deny_when(dangerous.clone()),
        ApprovalPolicy::new("code_generation(_.*)?")
            .timeout(600)
            .reviewer(ReviewerLevel::Senior)
            .escalate_to(&["senior_operator", "safety_officer"])
            .auto_deny_when(dangerous)
            .auto_approve_when(Condition::number_below("lines_of_code", 20.0))
            .auto_approve_when(Condition::not(Condition::field_present("network"))),
        ApprovalPolicy::new("personality_.*")
            .escalate_to(&["senior_operator"])
            .auto_deny_when(Condition::number_above("magnitude", 0.3))
            .auto_approve_when(Condition::number_below("magnitude", 0.05)),
        ApprovalPolicy::new("memory_(delete|purge|wipe).*")
            .reviewer(ReviewerLevel::Senior)
            .escalate_to(&["senior_operator"]),
        ApprovalPolicy::new("memory_.*").optional(),
        ApprovalPolicy::new("research_.*")
            .auto_approve_when(Condition::not(Condition::field_present("external_action"))),
        ApprovalPolicy::new("system_restore")
            .timeout(900)
            .reviewer(ReviewerLevel::SafetyOfficer)
            .escalate_to(&["safety_officer", "emergency_contact"]),
    ]
}

// ── Configuration ───────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OversightConfig {
    pub policies: Vec<ApprovalPolicy>,
    /// Timeout for operations routed to a human without a matching policy
    /// (only happens while approval is required for everything).
    pub default_timeout_secs: u64,
    /// Resolved requests kept for statistics and double-resolution checks.
    pub max_history: usize,
}

impl Default for OversightConfig {
    fn default() -> Self {
        Self {
            policies: default_policies(),
            default_timeout_secs: 300,
            max_history: 1000,
        }
    }
}

impl OversightConfig {
    pub fn validate(&self) -> OversightResult<()> {
        if self.default_timeout_secs == 0 || !secs_in_bounds(self.default_timeout_secs) {
            return Err(OversightError::InvalidPolicy(format!(
                "default_timeout_secs must be in 1..={MAX_CONFIG_SECS}"
            )));
        }
        if self.max_history == 0 {
            return Err(OversightError::InvalidPolicy(
                "max_history must be positive".into(),
            ));
        }
        for policy in &self.policies {
            policy.compile()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        OversightConfig::default().validate().unwrap();
    }

    #[test]
    fn pattern_is_anchored() {
        let re = ApprovalPolicy::new("memory_.*").compile().unwrap();
        assert!(re.is_match("memory_write"));
        assert!(!re.is_match("long_memory_write"));
        let exact = ApprovalPolicy::new("code_execution").compile().unwrap();
        assert!(!exact.is_match("code_execution_batch"));
        let suffixed = ApprovalPolicy::new("code_generation(_.*)?").compile().unwrap();
        assert!(suffixed.is_match("code_generation"));
        assert!(suffixed.is_match("code_generation_generate"));
    }

    #[test]
    fn zero_timeout_rejected() {
        let policy = ApprovalPolicy::new("x").timeout(0);
        assert!(matches!(
            policy.compile(),
            Err(OversightError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn oversized_timeouts_rejected() {
        let policy = ApprovalPolicy::new("x").timeout(u64::MAX / 4);
        assert!(policy.compile().is_err());

        let config = OversightConfig {
            default_timeout_secs: MAX_CONFIG_SECS + 1,
            ..OversightConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(OversightError::InvalidPolicy(_))
        ));
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let policy: ApprovalPolicy = serde_json::from_str(
            r#"{ "operation_pattern": "deploy_.*",
                 "auto_deny_conditions": [{ "type": "always" }] }"#,
        )
        .unwrap();
        assert!(policy.required);
        assert_eq!(policy.timeout_seconds, 300);
        assert_eq!(policy.auto_deny_conditions, vec![Condition::Always]);
    }
}
