//! Typed predicate tree for auto-approve and auto-deny rules.
//!
//! Fields are dotted paths (`"patch.lines"`) resolved against the request
//! `details` first and its `context` second. The wildcard field `"*"`
//! searches every string leaf in both documents.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use veto_types::Urgency;

use crate::error::{OversightError, OversightResult};

/// Field name that addresses every string leaf in details and context.
pub const ANY_FIELD: &str = "*";

/// A predicate over an approval request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// The field's text contains any needle, case-insensitively.
    ContainsAny { field: String, needles: Vec<String> },
    /// The field's text matches the regex, case-insensitively.
    MatchesRegex { field: String, pattern: String },
    NumberAbove { field: String, value: f64 },
    NumberBelow { field: String, value: f64 },
    Equals { field: String, value: Value },
    FieldPresent { field: String },
    UrgencyAtMost { urgency: Urgency },
    RequesterIn { requesters: Vec<String> },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
    Always,
}

/// Everything a condition can inspect.
#[derive(Clone, Copy, Debug)]
pub struct EvalContext<'a> {
    pub details: &'a Value,
    pub context: &'a Value,
    pub urgency: Urgency,
    pub requester: &'a str,
}

impl Condition {
    pub fn contains_any(field: impl Into<String>, needles: &[&str]) -> Self {
        Self::ContainsAny {
            field: field.into(),
            needles: needles.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn number_above(field: impl Into<String>, value: f64) -> Self {
        Self::NumberAbove {
            field: field.into(),
            value,
        }
    }

    pub fn number_below(field: impl Into<String>, value: f64) -> Self {
        Self::NumberBelow {
            field: field.into(),
            value,
        }
    }

    pub fn field_present(field: impl Into<String>) -> Self {
        Self::FieldPresent {
            field: field.into(),
        }
    }

    pub fn not(condition: Condition) -> Self {
        Self::Not {
            condition: Box::new(condition),
        }
    }

    /// Check regex patterns compile, recursively.
    pub fn validate(&self) -> OversightResult<()> {
        match self {
            Self::MatchesRegex { pattern, .. } => RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map(|_| ())
                .map_err(|e| OversightError::InvalidCondition(format!("{pattern}: {e}"))),
            Self::All { conditions } | Self::Any { conditions } => {
                conditions.iter().try_for_each(Condition::validate)
            }
            Self::Not { condition } => condition.validate(),
            _ => Ok(()),
        }
    }

    /// Evaluate against a request. Missing fields make field predicates false.
    pub fn evaluate(&self, cx: &EvalContext<'_>) -> bool {
        match self {
            Self::ContainsAny { field, needles } => {
                let needles: Vec<String> = needles.iter().map(|n| n.to_lowercase()).collect();
                texts(cx, field).iter().any(|text| {
                    let text = text.to_lowercase();
                    needles.iter().any(|n| text.contains(n.as_str()))
                })
            }
            Self::MatchesRegex { field, pattern } => {
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(re) => texts(cx, field).iter().any(|t| re.is_match(t)),
                    Err(e) => {
                        warn!(pattern = %pattern, error = %e, "unusable regex condition");
                        false
                    }
                }
            }
            Self::NumberAbove { field, value } => {
                number(cx, field).is_some_and(|n| n > *value)
            }
            Self::NumberBelow { field, value } => {
                number(cx, field).is_some_and(|n| n < *value)
            }
            Self::Equals { field, value } => lookup(cx, field) == Some(value),
            Self::FieldPresent { field } => lookup(cx, field).is_some_and(|v| !v.is_null()),
            Self::UrgencyAtMost { urgency } => cx.urgency <= *urgency,
            Self::RequesterIn { requesters } => requesters.iter().any(|r| r == cx.requester),
            Self::All { conditions } => conditions.iter().all(|c| c.evaluate(cx)),
            Self::Any { conditions } => conditions.iter().any(|c| c.evaluate(cx)),
            Self::Not { condition } => !condition.evaluate(cx),
            Self::Always => true,
        }
    }

    /// Short human-readable form for approval prompts.
    pub fn describe(&self) -> String {
        match self {
            Self::ContainsAny { field, needles } => {
                format!("{field} contains any of [{}]", needles.join(", "))
            }
            Self::MatchesRegex { field, pattern } => format!("{field} matches /{pattern}/"),
            Self::NumberAbove { field, value } => format!("{field} > {value}"),
            Self::NumberBelow { field, value } => format!("{field} < {value}"),
            Self::Equals { field, value } => format!("{field} == {value}"),
            Self::FieldPresent { field } => format!("{field} is present"),
            Self::UrgencyAtMost { urgency } => format!("urgency <= {urgency:?}"),
            Self::RequesterIn { requesters } => {
                format!("requester in [{}]", requesters.join(", "))
            }
            Self::All { conditions } => join(conditions, " and "),
            Self::Any { conditions } => join(conditions, " or "),
            Self::Not { condition } => format!("not ({})", condition.describe()),
            Self::Always => "always".to_string(),
        }
    }
}

fn join(conditions: &[Condition], sep: &str) -> String {
    let parts: Vec<String> = conditions.iter().map(|c| c.describe()).collect();
    format!("({})", parts.join(sep))
}

fn resolve<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    path.split('.').try_fold(root, |node, key| match node {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn lookup<'v>(cx: &EvalContext<'v>, field: &str) -> Option<&'v Value> {
    resolve(cx.details, field).or_else(|| resolve(cx.context, field))
}

fn number(cx: &EvalContext<'_>, field: &str) -> Option<f64> {
    match lookup(cx, field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        Value::Null => {}
    }
}

fn texts(cx: &EvalContext<'_>, field: &str) -> Vec<String> {
    let mut out = Vec::new();
    if field == ANY_FIELD {
        collect_strings(cx.details, &mut out);
        collect_strings(cx.context, &mut out);
    } else if let Some(value) = lookup(cx, field) {
        collect_strings(value, &mut out);
    }
    out
}
