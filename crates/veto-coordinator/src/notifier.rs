use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::incident::SafetyStatus;

/// Message paged to the emergency contact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmergencyNotice {
    pub contact: String,
    pub status: SafetyStatus,
    pub reason: String,
    pub affected: Vec<String>,
    pub open_incidents: usize,
    pub timestamp: DateTime<Utc>,
}

/// Pager seam for emergencies and human escalations.
#[async_trait]
pub trait EmergencyNotifier: Send + Sync {
    async fn notify(&self, notice: &EmergencyNotice) -> CoordinatorResult<()>;
}

/// Logs notices at `error!`. The default when nothing else is wired.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl EmergencyNotifier for LogNotifier {
    async fn notify(&self, notice: &EmergencyNotice) -> CoordinatorResult<()> {
        error!(
            contact = %notice.contact,
            status = %notice.status,
            affected = ?notice.affected,
            open_incidents = notice.open_incidents,
            reason = %notice.reason,
            "EMERGENCY NOTICE"
        );
        Ok(())
    }
}

/// Keeps notices in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    notices: Mutex<Vec<EmergencyNotice>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<EmergencyNotice> {
        self.notices.lock().map(|n| n.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EmergencyNotifier for MemoryNotifier {
    async fn notify(&self, notice: &EmergencyNotice) -> CoordinatorResult<()> {
        self.notices
            .lock()
            .map_err(|_| CoordinatorError::Backend("notifier lock poisoned".into()))?
            .push(notice.clone());
        Ok(())
    }
}
