use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::error::QueueError;
use crate::models::{AppointmentStatus, QueueEntry};

#[async_trait]
pub trait QueueEntryStore: Send + Sync {
    async fn insert(&self, entry: QueueEntry) -> Result<QueueEntry, QueueError>;

    /// Entries for one doctor, optionally restricted to one status. No ordering
    /// is promised.
    async fn list_for_doctor(
        &self,
        doctor_id: &str,
        status: Option<AppointmentStatus>,
    ) -> Result<Vec<QueueEntry>, QueueError>;

    async fn get(&self, entry_id: Uuid) -> Result<Option<QueueEntry>, QueueError>;

    async fn update_status(
        &self,
        entry_id: Uuid,
        status: AppointmentStatus,
    ) -> Result<QueueEntry, QueueError>;
}

/// Backends that can issue the next token and write its waiting entry in one
/// storage transaction. When present the admission service uses it instead of
/// the separate counter and entry stores, so no token can be issued without
/// its entry.
#[async_trait]
pub trait AtomicAdmissionStore: Send + Sync {
    async fn admit(
        &self,
        doctor_id: &str,
        user_id: &str,
        display_name: &str,
        note: &str,
    ) -> Result<QueueEntry, QueueError>;
}

#[derive(Default)]
pub struct InMemoryQueueStore {
    entries: RwLock<HashMap<Uuid, QueueEntry>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueEntryStore for InMemoryQueueStore {
    async fn insert(&self, entry: QueueEntry) -> Result<QueueEntry, QueueError> {
        let mut entries = self.entries.write().await;
        entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn list_for_doctor(
        &self,
        doctor_id: &str,
        status: Option<AppointmentStatus>,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let entries = self.entries.read().await;
        Ok(entries
            .values()
            .filter(|e| e.doctor_id == doctor_id)
            .filter(|e| status.map_or(true, |s| e.status == s))
            .cloned()
            .collect())
    }

    async fn get(&self, entry_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
        Ok(self.entries.read().await.get(&entry_id).cloned())
    }

    async fn update_status(
        &self,
        entry_id: Uuid,
        status: AppointmentStatus,
    ) -> Result<QueueEntry, QueueError> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(&entry_id)
            .ok_or_else(|| QueueError::NotFound(entry_id.to_string()))?;
        entry.status = status;
        Ok(entry.clone())
    }
}

/// Row shape of the `appointments` table.
#[derive(Debug, Serialize, Deserialize)]
struct AppointmentRow {
    id: Uuid,
    user_id: String,
    doctor_id: String,
    name: String,
    date: DateTime<Utc>,
    token: u64,
    #[serde(default)]
    note: Option<String>,
    status: AppointmentStatus,
}

impl From<QueueEntry> for AppointmentRow {
    fn from(entry: QueueEntry) -> Self {
        Self {
            id: entry.id,
            user_id: entry.user_id,
            doctor_id: entry.doctor_id,
            name: entry.display_name,
            date: entry.issued_at,
            token: entry.token,
            note: Some(entry.note),
            status: entry.status,
        }
    }
}

impl From<AppointmentRow> for QueueEntry {
    fn from(row: AppointmentRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            doctor_id: row.doctor_id,
            display_name: row.name,
            issued_at: row.date,
            token: row.token,
            note: row.note.unwrap_or_default(),
            status: row.status,
        }
    }
}

pub struct SupabaseQueueStore {
    supabase: SupabaseClient,
    service_key: Option<String>,
}

impl SupabaseQueueStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            service_key: config.supabase_service_key.clone(),
        }
    }

    fn first_row(rows: Vec<AppointmentRow>, entry_id: Uuid) -> Result<QueueEntry, QueueError> {
        rows.into_iter()
            .next()
            .map(QueueEntry::from)
            .ok_or_else(|| QueueError::NotFound(entry_id.to_string()))
    }
}

#[async_trait]
impl QueueEntryStore for SupabaseQueueStore {
    async fn insert(&self, entry: QueueEntry) -> Result<QueueEntry, QueueError> {
        let entry_id = entry.id;
        let body = serde_json::to_value(AppointmentRow::from(entry))?;

        let rows: Vec<AppointmentRow> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/appointments",
            self.service_key.as_deref(),
            Some(body),
            Some(SupabaseClient::representation_headers()),
        ).await?;

        debug!("Queue entry {} written", entry_id);
        Self::first_row(rows, entry_id)
            .map_err(|_| QueueError::Persistence("Insert returned no representation".to_string()))
    }

    async fn list_for_doctor(
        &self,
        doctor_id: &str,
        status: Option<AppointmentStatus>,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&token=not.is.null",
            urlencoding::encode(doctor_id)
        );
        if let Some(status) = status {
            path.push_str(&format!("&status=eq.{}", status));
        }
        path.push_str("&order=token.asc,date.asc");

        let rows: Vec<AppointmentRow> = self.supabase.request(
            Method::GET,
            &path,
            self.service_key.as_deref(),
            None,
        ).await?;

        Ok(rows.into_iter().map(QueueEntry::from).collect())
    }

    async fn get(&self, entry_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", entry_id);
        let rows: Vec<AppointmentRow> = self.supabase.request(
            Method::GET,
            &path,
            self.service_key.as_deref(),
            None,
        ).await?;

        Ok(rows.into_iter().next().map(QueueEntry::from))
    }

    async fn update_status(
        &self,
        entry_id: Uuid,
        status: AppointmentStatus,
    ) -> Result<QueueEntry, QueueError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", entry_id);
        let rows: Vec<AppointmentRow> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            self.service_key.as_deref(),
            Some(json!({ "status": status })),
            Some(SupabaseClient::representation_headers()),
        ).await?;

        Self::first_row(rows, entry_id)
    }
}

#[async_trait]
impl AtomicAdmissionStore for SupabaseQueueStore {
    /// Calls the `join_queue` SQL function: counter upsert and appointment
    /// insert commit together or not at all.
    async fn admit(
        &self,
        doctor_id: &str,
        user_id: &str,
        display_name: &str,
        note: &str,
    ) -> Result<QueueEntry, QueueError> {
        let rows: Vec<AppointmentRow> = self.supabase.rpc(
            "join_queue",
            json!({
                "p_doctor_id": doctor_id,
                "p_user_id": user_id,
                "p_name": display_name,
                "p_note": note,
            }),
            self.service_key.as_deref(),
        ).await?;

        rows.into_iter()
            .next()
            .map(QueueEntry::from)
            .ok_or_else(|| QueueError::Persistence("join_queue returned no row".to_string()))
    }
}
