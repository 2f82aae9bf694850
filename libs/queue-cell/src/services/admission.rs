use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

use shared_config::{AppConfig, CounterBackend};

use crate::error::QueueError;
use crate::models::{
    sort_call_order, AdmissionLedger, AppointmentStatus, JoinQueueRequest, JoinQueueResponse,
    OrphanedToken, QueueEntry, QueueSummary, DEFAULT_WALK_IN_NOTE,
};
use crate::services::counter::{
    InMemoryTokenCounter, RedisTokenCounter, SupabaseTokenCounter, TokenCounterStore,
};
use crate::services::entries::{
    AtomicAdmissionStore, InMemoryQueueStore, QueueEntryStore, SupabaseQueueStore,
};

/// Issues per-doctor walk-in tokens and records the matching queue entries.
#[derive(Clone)]
pub struct QueueAdmissionService {
    counters: Arc<dyn TokenCounterStore>,
    entries: Arc<dyn QueueEntryStore>,
    atomic: Option<Arc<dyn AtomicAdmissionStore>>,
    ledger: Arc<RwLock<AdmissionLedger>>,
}

/// Validated join, owned so it can move into the admission task.
struct Admission {
    doctor_id: String,
    user_id: String,
    display_name: String,
    note: String,
}

impl QueueAdmissionService {
    pub fn new(counters: Arc<dyn TokenCounterStore>, entries: Arc<dyn QueueEntryStore>) -> Self {
        Self {
            counters,
            entries,
            atomic: None,
            ledger: Arc::new(RwLock::new(AdmissionLedger::default())),
        }
    }

    /// Joins go through `store` in one transaction instead of a counter
    /// update followed by an entry write.
    pub fn with_atomic_admission(mut self, store: Arc<dyn AtomicAdmissionStore>) -> Self {
        self.atomic = Some(store);
        self
    }

    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryTokenCounter::new()),
            Arc::new(InMemoryQueueStore::new()),
        )
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self, QueueError> {
        let service = match config.counter_backend {
            CounterBackend::Memory => Self::in_memory(),
            CounterBackend::Redis => Self::new(
                Arc::new(RedisTokenCounter::new(config).await?),
                Arc::new(SupabaseQueueStore::new(config)),
            ),
            CounterBackend::Supabase => {
                let entries = Arc::new(SupabaseQueueStore::new(config));
                Self::new(Arc::new(SupabaseTokenCounter::new(config)), entries.clone())
                    .with_atomic_admission(entries)
            }
        };

        info!(
            atomic = service.atomic.is_some(),
            "Queue admission service using {:?} token counters",
            config.counter_backend
        );
        Ok(service)
    }

    pub async fn join_queue(&self, request: JoinQueueRequest) -> Result<JoinQueueResponse, QueueError> {
        let doctor_id = request.doctor_id.trim();
        let user_id = request.user_id.trim();

        if doctor_id.is_empty() {
            return Err(QueueError::Validation("doctorId is required".to_string()));
        }
        if user_id.is_empty() {
            return Err(QueueError::Validation("userId is required".to_string()));
        }

        let admission = Admission {
            doctor_id: doctor_id.to_string(),
            user_id: user_id.to_string(),
            display_name: request.display_name,
            note: request.note.unwrap_or_else(|| DEFAULT_WALK_IN_NOTE.to_string()),
        };

        // Detached so a dropped caller cannot stop between the counter update
        // and the entry write.
        let service = self.clone();
        tokio::spawn(async move { service.admit(admission).await })
            .await
            .map_err(|e| {
                error!(target: "queue_admission::reconcile", doctor_id, "Admission task aborted: {}", e);
                QueueError::Persistence(format!("Admission task aborted: {}", e))
            })?
    }

    async fn admit(&self, admission: Admission) -> Result<JoinQueueResponse, QueueError> {
        let Admission { doctor_id, user_id, display_name, note } = admission;
        let doctor_id = doctor_id.as_str();

        if let Some(atomic) = &self.atomic {
            let appointment = atomic
                .admit(doctor_id, &user_id, &display_name, &note)
                .await
                .map_err(|e| {
                    error!(doctor_id, "Queue admission failed: {}", e);
                    Self::as_persistence(e)
                })?;
            return Ok(self.admitted(appointment).await);
        }

        let token = self.counters.increment(doctor_id).await.map_err(|e| {
            error!(doctor_id, "Token counter update failed: {}", e);
            Self::as_persistence(e)
        })?;

        let entry = QueueEntry::waiting(doctor_id, &user_id, &display_name, &note, token);

        match self.entries.insert(entry).await {
            Ok(appointment) => Ok(self.admitted(appointment).await),
            Err(e) => {
                let reason = e.to_string();
                error!(
                    target: "queue_admission::reconcile",
                    doctor_id,
                    token,
                    "Token issued without a queue entry: {}",
                    reason
                );
                self.ledger.write().await.record_orphan(OrphanedToken {
                    doctor_id: doctor_id.to_string(),
                    token,
                    reason: reason.clone(),
                    detected_at: Utc::now(),
                });
                Err(QueueError::PartialAdmission {
                    doctor_id: doctor_id.to_string(),
                    token,
                    reason,
                })
            }
        }
    }

    async fn admitted(&self, appointment: QueueEntry) -> JoinQueueResponse {
        self.ledger.write().await.record_join();
        info!(
            doctor_id = %appointment.doctor_id,
            token = appointment.token,
            entry_id = %appointment.id,
            "Issued walk-in token"
        );
        JoinQueueResponse { token: appointment.token, appointment }
    }

    fn as_persistence(e: QueueError) -> QueueError {
        match e {
            QueueError::Persistence(_) => e,
            other => QueueError::Persistence(other.to_string()),
        }
    }

    /// Waiting entries for a doctor in call order.
    pub async fn waiting_queue(&self, doctor_id: &str) -> Result<Vec<QueueEntry>, QueueError> {
        let doctor_id = doctor_id.trim();
        let mut entries = self
            .entries
            .list_for_doctor(doctor_id, Some(AppointmentStatus::Waiting))
            .await?;
        entries.retain(|e| e.status == AppointmentStatus::Waiting);
        sort_call_order(&mut entries);
        Ok(entries)
    }

    pub async fn queue_summary(&self, doctor_id: &str) -> Result<QueueSummary, QueueError> {
        let doctor_id = doctor_id.trim();
        let entries = self.entries.list_for_doctor(doctor_id, None).await?;
        let tokens_issued = self.counters.current(doctor_id).await?;

        let count = |status: AppointmentStatus| entries.iter().filter(|e| e.status == status).count();

        Ok(QueueSummary {
            doctor_id: doctor_id.to_string(),
            waiting: count(AppointmentStatus::Waiting),
            completed: count(AppointmentStatus::Completed),
            cancelled: count(AppointmentStatus::Cancelled),
            tokens_issued,
        })
    }

    pub async fn update_entry_status(
        &self,
        entry_id: Uuid,
        status: AppointmentStatus,
    ) -> Result<QueueEntry, QueueError> {
        let current = self
            .entries
            .get(entry_id)
            .await?
            .ok_or_else(|| QueueError::NotFound(entry_id.to_string()))?;

        if !current.status.can_transition_to(&status) {
            return Err(QueueError::InvalidStatusTransition {
                from: current.status.to_string(),
                to: status.to_string(),
            });
        }

        let updated = self.entries.update_status(entry_id, status).await?;
        info!(
            entry_id = %entry_id,
            doctor_id = %updated.doctor_id,
            token = updated.token,
            "Queue entry moved from {} to {}",
            current.status,
            status
        );
        Ok(updated)
    }

    pub async fn ledger(&self) -> AdmissionLedger {
        self.ledger.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use mockall::mock;
    use mockall::predicate::eq;

    mock! {
        Counter {}

        #[async_trait]
        impl TokenCounterStore for Counter {
            async fn increment(&self, doctor_id: &str) -> Result<u64, QueueError>;
            async fn current(&self, doctor_id: &str) -> Result<u64, QueueError>;
        }
    }

    mock! {
        Entries {}

        #[async_trait]
        impl QueueEntryStore for Entries {
            async fn insert(&self, entry: QueueEntry) -> Result<QueueEntry, QueueError>;
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
    }

    mock! {
        Atomic {}

        #[async_trait]
        impl AtomicAdmissionStore for Atomic {
            async fn admit(
                &self,
                doctor_id: &str,
                user_id: &str,
                display_name: &str,
                note: &str,
            ) -> Result<QueueEntry, QueueError>;
        }
    }

    fn request(doctor_id: &str, user_id: &str) -> JoinQueueRequest {
        JoinQueueRequest {
            doctor_id: doctor_id.to_string(),
            user_id: user_id.to_string(),
            display_name: "Ada".to_string(),
            note: None,
        }
    }

    #[tokio::test]
    async fn validation_happens_before_the_counter_is_touched() {
        let mut counter = MockCounter::new();
        counter.expect_increment().never();
        let entries = MockEntries::new();
        let service = QueueAdmissionService::new(Arc::new(counter), Arc::new(entries));

        assert_matches!(
            service.join_queue(request("  ", "U1")).await,
            Err(QueueError::Validation(msg)) if msg.contains("doctorId")
        );
        assert_matches!(
            service.join_queue(request("D1", "")).await,
            Err(QueueError::Validation(msg)) if msg.contains("userId")
        );
    }

    #[tokio::test]
    async fn counter_failure_is_a_persistence_error_without_entry_write() {
        let mut counter = MockCounter::new();
        counter
            .expect_increment()
            .with(eq("D1"))
            .times(1)
            .returning(|_| Err(QueueError::Persistence("connection reset".to_string())));
        let mut entries = MockEntries::new();
        entries.expect_insert().never();
        let service = QueueAdmissionService::new(Arc::new(counter), Arc::new(entries));

        assert_matches!(
            service.join_queue(request("D1", "U1")).await,
            Err(QueueError::Persistence(_))
        );
        assert_eq!(service.ledger().await.partial_admissions, 0);
    }

    #[tokio::test]
    async fn entry_failure_after_increment_is_a_partial_admission() {
        let mut counter = MockCounter::new();
        counter.expect_increment().times(1).returning(|_| Ok(5));
        let mut entries = MockEntries::new();
        entries
            .expect_insert()
            .times(1)
            .returning(|_| Err(QueueError::Persistence("write timed out".to_string())));
        let service = QueueAdmissionService::new(Arc::new(counter), Arc::new(entries));

        let result = service.join_queue(request("D1", "U1")).await;
        assert_matches!(
            result,
            Err(QueueError::PartialAdmission { ref doctor_id, token: 5, .. }) if doctor_id == "D1"
        );

        let ledger = service.ledger().await;
        assert_eq!(ledger.successful_joins, 0);
        assert_eq!(ledger.partial_admissions, 1);
        assert_eq!(ledger.orphaned_tokens.len(), 1);
        assert_eq!(ledger.orphaned_tokens[0].token, 5);
        assert!(ledger.orphaned_tokens[0].reason.contains("write timed out"));
    }

    #[tokio::test]
    async fn persisted_entry_carries_the_issued_token() {
        let mut counter = MockCounter::new();
        counter.expect_increment().with(eq("D9")).returning(|_| Ok(12));
        let mut entries = MockEntries::new();
        entries.expect_insert().times(1).returning(|entry| Ok(entry));
        let service = QueueAdmissionService::new(Arc::new(counter), Arc::new(entries));

        let response = service.join_queue(request(" D9 ", " U4 ")).await.unwrap();

        assert_eq!(response.token, 12);
        assert_eq!(response.appointment.token, 12);
        assert_eq!(response.appointment.doctor_id, "D9");
        assert_eq!(response.appointment.user_id, "U4");
        assert_eq!(response.appointment.status, AppointmentStatus::Waiting);
        assert_eq!(response.appointment.note, DEFAULT_WALK_IN_NOTE);
        assert_eq!(service.ledger().await.successful_joins, 1);
    }

    #[tokio::test]
    async fn atomic_store_replaces_the_split_write() {
        let mut counter = MockCounter::new();
        counter.expect_increment().never();
        let mut entries = MockEntries::new();
        entries.expect_insert().never();
        let mut atomic = MockAtomic::new();
        atomic
            .expect_admit()
            .with(eq("D2"), eq("U7"), eq("Ada"), eq(DEFAULT_WALK_IN_NOTE))
            .times(1)
            .returning(|doctor_id, user_id, name, note| {
                Ok(QueueEntry::waiting(doctor_id, user_id, name, note, 4))
            });
        let service = QueueAdmissionService::new(Arc::new(counter), Arc::new(entries))
            .with_atomic_admission(Arc::new(atomic));

        let response = service.join_queue(request(" D2 ", "U7")).await.unwrap();

        assert_eq!(response.token, 4);
        assert_eq!(response.appointment.token, 4);
        assert_eq!(service.ledger().await.successful_joins, 1);
    }

    #[tokio::test]
    async fn atomic_failure_is_persistence_not_partial() {
        let counter = MockCounter::new();
        let entries = MockEntries::new();
        let mut atomic = MockAtomic::new();
        atomic
            .expect_admit()
            .returning(|_, _, _, _| Err(QueueError::Persistence("rolled back".to_string())));
        let service = QueueAdmissionService::new(Arc::new(counter), Arc::new(entries))
            .with_atomic_admission(Arc::new(atomic));

        assert_matches!(
            service.join_queue(request("D1", "U1")).await,
            Err(QueueError::Persistence(msg)) if msg.contains("rolled back")
        );
        let ledger = service.ledger().await;
        assert_eq!(ledger.partial_admissions, 0);
        assert!(ledger.orphaned_tokens.is_empty());
    }

    #[tokio::test]
    async fn read_paths_trim_the_doctor_id() {
        let mut counter = MockCounter::new();
        counter.expect_current().with(eq("D1")).returning(|_| Ok(1));
        let mut entries = MockEntries::new();
        entries
            .expect_list_for_doctor()
            .with(eq("D1"), mockall::predicate::always())
            .returning(|_, _| Ok(vec![QueueEntry::waiting("D1", "U1", "A", "Walk-in", 1)]));
        let service = QueueAdmissionService::new(Arc::new(counter), Arc::new(entries));

        assert_eq!(service.waiting_queue(" D1 ").await.unwrap().len(), 1);
        let summary = service.queue_summary("D1 ").await.unwrap();
        assert_eq!(summary.doctor_id, "D1");
        assert_eq!(summary.waiting, 1);
        assert_eq!(summary.tokens_issued, 1);
    }

    #[tokio::test]
    async fn waiting_queue_sorts_whatever_the_store_returns() {
        let counter = MockCounter::new();
        let mut entries = MockEntries::new();
        entries
            .expect_list_for_doctor()
            .with(eq("D1"), eq(Some(AppointmentStatus::Waiting)))
            .returning(|_, _| {
                Ok(vec![
                    QueueEntry::waiting("D1", "U3", "C", "Walk-in", 3),
                    QueueEntry::waiting("D1", "U1", "A", "Walk-in", 1),
                    QueueEntry::waiting("D1", "U2", "B", "Walk-in", 2),
                ])
            });
        let service = QueueAdmissionService::new(Arc::new(counter), Arc::new(entries));

        let tokens: Vec<u64> = service
            .waiting_queue("D1")
            .await
            .unwrap()
            .iter()
            .map(|e| e.token)
            .collect();
        assert_eq!(tokens, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn closed_entries_cannot_be_reopened() {
        let counter = MockCounter::new();
        let mut entries = MockEntries::new();
        let mut done = QueueEntry::waiting("D1", "U1", "A", "Walk-in", 1);
        done.status = AppointmentStatus::Completed;
        let id = done.id;
        entries.expect_get().returning(move |_| Ok(Some(done.clone())));
        entries.expect_update_status().never();
        let service = QueueAdmissionService::new(Arc::new(counter), Arc::new(entries));

        assert_matches!(
            service.update_entry_status(id, AppointmentStatus::Cancelled).await,
            Err(QueueError::InvalidStatusTransition { .. })
        );
    }

    #[tokio::test]
    async fn status_update_on_unknown_entry_is_not_found() {
        let counter = MockCounter::new();
        let mut entries = MockEntries::new();
        entries.expect_get().returning(|_| Ok(None));
        let service = QueueAdmissionService::new(Arc::new(counter), Arc::new(entries));

        assert_matches!(
            service.update_entry_status(Uuid::new_v4(), AppointmentStatus::Completed).await,
            Err(QueueError::NotFound(_))
        );
    }
}
