use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_WALK_IN_NOTE: &str = "Walk-in";

/// Most recent orphaned tokens kept in the admission ledger.
pub const ORPHAN_HISTORY_LIMIT: usize = 256;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Upcoming,
    Waiting,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Upcoming => "upcoming",
            AppointmentStatus::Waiting => "waiting",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }

    /// Open entries (waiting or upcoming) may only be closed.
    pub fn can_transition_to(&self, target: &AppointmentStatus) -> bool {
        !self.is_terminal() && target.is_terminal()
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A walk-in appointment carrying its per-doctor token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: Uuid,
    pub user_id: String,
    pub doctor_id: String,
    pub display_name: String,
    pub issued_at: DateTime<Utc>,
    pub token: u64,
    pub note: String,
    pub status: AppointmentStatus,
}

impl QueueEntry {
    pub fn waiting(
        doctor_id: &str,
        user_id: &str,
        display_name: &str,
        note: &str,
        token: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            doctor_id: doctor_id.to_string(),
            display_name: display_name.to_string(),
            issued_at: Utc::now(),
            token,
            note: note.to_string(),
            status: AppointmentStatus::Waiting,
        }
    }
}

/// Sorts entries into walk-in call order: token, then issuance time.
pub fn sort_call_order(entries: &mut [QueueEntry]) {
    entries.sort_by(|a, b| {
        a.token
            .cmp(&b.token)
            .then_with(|| a.issued_at.cmp(&b.issued_at))
    });
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinQueueRequest {
    #[serde(default)]
    pub doctor_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinQueueResponse {
    pub token: u64,
    pub appointment: QueueEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEntryStatusRequest {
    pub status: AppointmentStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    pub doctor_id: String,
    pub waiting: usize,
    pub completed: usize,
    pub cancelled: usize,
    /// Display only; never a reservation.
    pub tokens_issued: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrphanedToken {
    pub doctor_id: String,
    pub token: u64,
    pub reason: String,
    pub detected_at: DateTime<Utc>,
}

/// Counts are cumulative for the process lifetime; `orphaned_tokens` keeps
/// only the last `ORPHAN_HISTORY_LIMIT` records, oldest first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionLedger {
    pub successful_joins: u64,
    pub partial_admissions: u64,
    pub orphaned_tokens: VecDeque<OrphanedToken>,
}

impl AdmissionLedger {
    pub fn record_join(&mut self) {
        self.successful_joins += 1;
    }

    pub fn record_orphan(&mut self, orphan: OrphanedToken) {
        self.partial_admissions += 1;
        if self.orphaned_tokens.len() == ORPHAN_HISTORY_LIMIT {
            self.orphaned_tokens.pop_front();
        }
        self.orphaned_tokens.push_back(orphan);
    }
}
