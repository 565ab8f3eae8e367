//! Console operator commands.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use serde_json::json;
use tracing::{error, info, warn};
use veto_coordinator::{SafetyCoordinator, SYSTEM_RESTORE_OPERATION};
use veto_oversight::OperatorResponse;
use veto_types::Urgency;

pub const HELP: &str = "\
commands:
  approve <id> [note]      approve a pending request
  deny <id> [reason]       deny a pending request
  cancel <id>              cancel a pending request
  details <id>             show a pending request again
  pending                  list pending approval requests
  status                   safety status and open incidents
  incidents                list open incidents
  resolve <id> [note]      resolve an open incident
  restore <subsystem>      return a subsystem (or \"all\") to service
  shutdown <reason>        emergency safety shutdown
  lift <reason>            ask for system_restore approval, then leave shutdown
  help                     this text";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Approve { id: String, note: Option<String> },
    Deny { id: String, reason: Option<String> },
    Cancel { id: String },
    Details { id: String },
    Pending,
    Status,
    Incidents,
    Resolve { id: String, note: String },
    Restore { subsystem: String },
    Shutdown { reason: String },
    Lift { reason: String },
    Help,
}

fn rest(parts: &[&str]) -> Option<String> {
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Parse one console line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, args)) = parts.split_first() else {
        return Ok(None);
    };
    let first = || {
        args.first()
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("usage: {verb} <argument>"))
    };
    let command = match verb.to_ascii_lowercase().as_str() {
        "approve" | "a" => Command::Approve {
            id: first()?,
            note: rest(&args[1..]),
        },
        "deny" | "d" => Command::Deny {
            id: first()?,
            reason: rest(&args[1..]),
        },
        "cancel" => Command::Cancel { id: first()? },
        "details" => Command::Details { id: first()? },
        "pending" | "p" => Command::Pending,
        "status" | "s" => Command::Status,
        "incidents" => Command::Incidents,
        "resolve" => Command::Resolve {
            id: first()?,
            note: rest(&args[1..]).unwrap_or_else(|| "resolved by operator".into()),
        },
        "restore" => Command::Restore {
            subsystem: first()?,
        },
        "shutdown" => Command::Shutdown {
            reason: rest(args).ok_or_else(|| anyhow!("usage: shutdown <reason>"))?,
        },
        "lift" => Command::Lift {
            reason: rest(args).ok_or_else(|| anyhow!("usage: lift <reason>"))?,
        },
        "help" | "?" => Command::Help,
        other => bail!("unknown command '{other}' (try 'help')"),
    };
    Ok(Some(command))
}

/// Run a command on behalf of `operator` and return the text to print.
pub async fn execute(
    coordinator: &Arc<SafetyCoordinator>,
    operator: &str,
    command: Command,
) -> Result<String> {
    let oversight = coordinator.oversight();
    match command {
        Command::Approve { id, note } => {
            let status = oversight
                .respond(
                    &id,
                    OperatorResponse::Approve {
                        reviewer: operator.to_string(),
                        note,
                    },
                )
                .await?;
            Ok(format!("{id}: {status}"))
        }
        Command::Deny { id, reason } => {
            let status = oversight
                .respond(
                    &id,
                    OperatorResponse::Deny {
                        reviewer: operator.to_string(),
                        reason,
                    },
                )
                .await?;
            Ok(format!("{id}: {status}"))
        }
        Command::Cancel { id } => {
            let status = oversight
                .respond(
                    &id,
                    OperatorResponse::Cancel {
                        reviewer: operator.to_string(),
                    },
                )
                .await?;
            Ok(format!("{id}: {status}"))
        }
        Command::Details { id } => {
            oversight.respond(&id, OperatorResponse::Details).await?;
            Ok(String::new())
        }
        Command::Pending => {
            let pending = oversight.pending_requests()?;
            if pending.is_empty() {
                return Ok("no pending requests".into());
            }
            Ok(pending
                .iter()
                .map(|r| {
                    format!(
                        "{}  {}  by {}  expires {}",
                        r.id,
                        r.operation,
                        r.requester,
                        r.expires_at.format("%H:%M:%S")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::Status => {
            let report = coordinator.comprehensive_safety_check(&[])?;
            let mut out = format!(
                "status: {}  open incidents: {}  pending approvals: {}",
                report.status,
                report.open_incidents.len(),
                report.oversight.pending
            );
            for line in &report.recommendations {
                out.push_str(&format!("\n  - {line}"));
            }
            Ok(out)
        }
        Command::Incidents => {
            let open = coordinator.open_incidents()?;
            if open.is_empty() {
                return Ok("no open incidents".into());
            }
            Ok(open
                .iter()
                .map(|i| {
                    format!(
                        "{}  {}  {}  {}: {}",
                        i.id, i.severity, i.incident_type, i.subsystem, i.description
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"))
        }
        Command::Resolve { id, note } => {
            let incident = coordinator.resolve_incident(&id, operator, &note)?;
            Ok(format!("{} resolved", incident.id))
        }
        Command::Restore { subsystem } => {
            coordinator.restore_system_from_isolation(&subsystem, operator)?;
            Ok(format!("{subsystem} restored"))
        }
        Command::Shutdown { reason } => {
            let isolated = coordinator
                .emergency_safety_shutdown(&reason, &[], operator)
                .await?;
            Ok(format!("emergency shutdown: {} subsystems isolated", isolated.len()))
        }
        Command::Lift { reason } => {
            if !coordinator.is_shutdown()? {
                bail!("no emergency shutdown in effect");
            }
            spawn_lift(coordinator.clone(), operator.to_string(), reason);
            Ok("system_restore approval requested; approve it to lift the shutdown".into())
        }
        Command::Help => Ok(HELP.to_string()),
    }
}

/// Wait for a human `system_restore` decision in the background and lift
/// the shutdown if it is approved.
fn spawn_lift(coordinator: Arc<SafetyCoordinator>, operator: String, reason: String) {
    tokio::spawn(async move {
        let response = coordinator
            .oversight()
            .request_human_approval(
                SYSTEM_RESTORE_OPERATION,
                json!({ "reason": reason }),
                Urgency::High,
                &operator,
                json!({ "requested_by": operator }),
            )
            .await;
        match response {
            Ok(response) if response.approved => {
                match coordinator.restore_from_emergency(&operator, &response) {
                    Ok(status) => info!(status = %status, "emergency shutdown lifted"),
                    Err(e) => error!(error = %e, "could not lift emergency shutdown"),
                }
            }
            Ok(response) => warn!(
                status = %response.status,
                reason = %response.reason,
                "system_restore not approved; emergency shutdown stays in effect"
            ),
            Err(e) => error!(error = %e, "system_restore approval failed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use veto_coordinator::SafetyConfig;
    use veto_oversight::MemoryDisplay;

    fn coordinator() -> Arc<SafetyCoordinator> {
        Arc::new(
            SafetyCoordinator::builder(SafetyConfig::default())
                .display(Arc::new(MemoryDisplay::new()))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn parses_commands_with_free_text() {
        assert_eq!(
            parse("approve apr-1 looks fine").unwrap(),
            Some(Command::Approve {
                id: "apr-1".into(),
                note: Some("looks fine".into())
            })
        );
        assert_eq!(
            parse("deny apr-2").unwrap(),
            Some(Command::Deny {
                id: "apr-2".into(),
                reason: None
            })
        );
        assert_eq!(parse("   ").unwrap(), None);
        assert_eq!(parse("STATUS").unwrap(), Some(Command::Status));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse("approve").is_err());
        assert!(parse("shutdown").is_err());
        assert!(parse("launch rockets").is_err());
    }

    #[tokio::test]
    async fn restore_refused_during_shutdown() {
        let c = coordinator();
        execute(&c, "alice", Command::Shutdown { reason: "drill".into() })
            .await
            .unwrap();
        assert!(execute(&c, "alice", Command::Restore { subsystem: "memory".into() })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn lift_waits_for_approval() {
        let c = coordinator();
        assert!(execute(&c, "alice", Command::Lift { reason: "x".into() })
            .await
            .is_err());

        execute(&c, "alice", Command::Shutdown { reason: "drill".into() })
            .await
            .unwrap();
        execute(&c, "alice", Command::Lift { reason: "drill over".into() })
            .await
            .unwrap();

        let id = loop {
            if let Some(r) = c.oversight().pending_requests().unwrap().into_iter().next() {
                break r.id;
            }
            tokio::task::yield_now().await;
        };
        execute(&c, "bob", Command::Approve { id, note: None })
            .await
            .unwrap();
        while c.is_shutdown().unwrap() {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            c.status().unwrap(),
            veto_coordinator::SafetyStatus::Operational
        );
    }

    #[tokio::test]
    async fn unknown_request_is_an_error() {
        let c = coordinator();
        assert!(execute(&c, "alice", Command::Cancel { id: "apr-missing".into() })
            .await
            .is_err());
        assert_eq!(
            execute(&c, "alice", Command::Pending).await.unwrap(),
            "no pending requests"
        );
    }
}
