//! Where pending approval requests are shown to operators.

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{OversightError, OversightResult};
use crate::request::{ApprovalRequest, ApprovalResponse};

/// Surface that presents approval requests to a human.
///
/// Only requests routed to a human reach the display; auto-decided
/// requests never do.
#[async_trait]
pub trait ApprovalDisplay: Send + Sync {
    async fn show_request(&self, request: &ApprovalRequest) -> OversightResult<()>;

    /// Show the request again in full. Defaults to `show_request`.
    async fn show_details(&self, request: &ApprovalRequest) -> OversightResult<()> {
        self.show_request(request).await
    }

    async fn show_resolution(&self, _response: &ApprovalResponse) -> OversightResult<()> {
        Ok(())
    }
}

/// Render a request as a plain-text operator prompt.
pub fn render_request(request: &ApprovalRequest) -> String {
    let mut out = String::new();
    out.push_str("==================== APPROVAL REQUIRED ====================\n");
    out.push_str(&format!("id:         {}\n", request.id));
    out.push_str(&format!("operation:  {}\n", request.operation));
    out.push_str(&format!("requester:  {}\n", request.requester));
    out.push_str(&format!("urgency:    {}\n", request.urgency));
    out.push_str(&format!(
        "risk:       {} ({})\n",
        request.risk_assessment.level,
        request.risk_assessment.factors.join("; ")
    ));
    out.push_str(&format!("reviewer:   {:?}\n", request.reviewer_level));
    out.push_str(&format!(
        "expires:    {} ({}s)\n",
        request.expires_at.to_rfc3339(),
        request.timeout_seconds
    ));
    let details = serde_json::to_string_pretty(&request.details)
        .unwrap_or_else(|_| request.details.to_string());
    out.push_str("details:\n");
    for line in details.lines() {
        out.push_str("  ");
        out.push_str(line);
        out.push('\n');
    }
    if !request.approval_criteria.is_empty() {
        out.push_str("unmet auto-approve criteria:\n");
        for criterion in &request.approval_criteria {
            out.push_str(&format!("  - {criterion}\n"));
        }
    }
    out.push_str(&format!(
        "respond: approve {id} [note] | deny {id} [reason] | cancel {id} | details {id}\n",
        id = request.id
    ));
    out
}

/// Writes rendered prompts to any `Write` target.
pub struct ConsoleDisplay {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleDisplay {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn write(&self, text: &str) -> OversightResult<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| OversightError::Backend("console lock poisoned".into()))?;
        out.write_all(text.as_bytes())
            .and_then(|_| out.flush())
            .map_err(|e| OversightError::Display(e.to_string()))
    }
}

impl Default for ConsoleDisplay {
    fn default() -> Self {
        Self::stdout()
    }
}

#[async_trait]
impl ApprovalDisplay for ConsoleDisplay {
    async fn show_request(&self, request: &ApprovalRequest) -> OversightResult<()> {
        self.write(&render_request(request))
    }

    async fn show_resolution(&self, response: &ApprovalResponse) -> OversightResult<()> {
        let by = response
            .reviewer
            .as_deref()
            .map(|r| format!(" by {r}"))
            .unwrap_or_default();
        self.write(&format!(
            "approval {} {}{by}: {}\n",
            response.request_id, response.status, response.reason
        ))
    }
}

/// Keeps rendered prompts in memory. Used by tests and embedders that
/// poll for prompts instead of printing them.
#[derive(Default)]
pub struct MemoryDisplay {
    shown: Mutex<Vec<String>>,
}

impl MemoryDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every request shown, in order, including re-renders.
    pub fn shown(&self) -> Vec<String> {
        self.shown.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ApprovalDisplay for MemoryDisplay {
    async fn show_request(&self, request: &ApprovalRequest) -> OversightResult<()> {
        self.shown
            .lock()
            .map_err(|_| OversightError::Backend("display lock poisoned".into()))?
            .push(request.id.clone());
        Ok(())
    }
}
