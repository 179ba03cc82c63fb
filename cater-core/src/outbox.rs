use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::search::AggregateUpdate;
use crate::CoreResult;

/// An idempotent write against the search index. Tasks that fail inline are
/// parked in the outbox and replayed by the mirror worker.
///
/// Index tasks carry ids only. The document is projected from the relational
/// store when the task runs, so a late replay never writes stale data and a
/// record deleted in the meantime has its document removed instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MirrorTask {
    /// Create or refresh the summary document of a booking.
    IndexBooking { booking_id: Uuid },
    RemoveBookingDoc { booking_id: Uuid },
    UpdateUserAggregate { user_id: Uuid, update: AggregateUpdate },
    /// Create or refresh the whole profile document.
    IndexUser { user_id: Uuid },
    /// Refresh the named profile fields of the user document.
    UpdateUserDoc { user_id: Uuid, fields: Vec<String> },
    RemoveUserDoc { user_id: Uuid },
}

impl MirrorTask {
    pub fn kind(&self) -> &'static str {
        match self {
            MirrorTask::IndexBooking { .. } => "index_booking",
            MirrorTask::RemoveBookingDoc { .. } => "remove_booking_doc",
            MirrorTask::UpdateUserAggregate { .. } => "update_user_aggregate",
            MirrorTask::IndexUser { .. } => "index_user",
            MirrorTask::UpdateUserDoc { .. } => "update_user_doc",
            MirrorTask::RemoveUserDoc { .. } => "remove_user_doc",
        }
    }

    /// Id of the record the task mirrors.
    pub fn subject_id(&self) -> Uuid {
        match self {
            MirrorTask::IndexBooking { booking_id }
            | MirrorTask::RemoveBookingDoc { booking_id } => *booking_id,
            MirrorTask::UpdateUserAggregate { user_id, .. }
            | MirrorTask::IndexUser { user_id }
            | MirrorTask::UpdateUserDoc { user_id, .. }
            | MirrorTask::RemoveUserDoc { user_id } => *user_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Dead,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Dead => "dead",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub task: MirrorTask,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue(&self, task: &MirrorTask, error: &str) -> CoreResult<Uuid>;

    /// Pending entries whose next attempt is due, oldest first.
    async fn claim_due(&self, limit: u32) -> CoreResult<Vec<OutboxEntry>>;

    /// Drop an entry once its task has been applied.
    async fn complete(&self, id: Uuid) -> CoreResult<()>;

    async fn reschedule(
        &self,
        id: Uuid,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> CoreResult<()>;

    /// Give up on an entry after its attempt budget is spent.
    async fn bury(&self, id: Uuid, attempts: u32, error: &str) -> CoreResult<()>;
}
