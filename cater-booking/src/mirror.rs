use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

use cater_core::outbox::{MirrorTask, OutboxStore};
use cater_core::search::{self, AggregateUpdate, SearchIndex, BOOKINGS, USERS};
use cater_core::{CoreError, CoreResult, Entity};

use crate::gateway::PersistenceGateway;

/// Keeps the search index in step with the relational store.
///
/// Every write is a [`MirrorTask`]. It is tried once inline; if that fails
/// the task is parked in the outbox for the mirror worker and the gap is
/// logged. Callers never see mirror failures. Documents are projected from
/// the store when a task runs, never from the caller's copy.
pub struct MirrorSync {
    index: Arc<dyn SearchIndex>,
    outbox: Arc<dyn OutboxStore>,
    store: PersistenceGateway,
}

impl MirrorSync {
    pub fn new(
        index: Arc<dyn SearchIndex>,
        outbox: Arc<dyn OutboxStore>,
        store: PersistenceGateway,
    ) -> Self {
        Self {
            index,
            outbox,
            store,
        }
    }

    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.index
    }

    /// Run a task against the index. Every task is safe to repeat and to run
    /// after later tasks for the same record.
    pub async fn apply(&self, task: &MirrorTask) -> CoreResult<()> {
        match task {
            MirrorTask::IndexBooking { booking_id } => {
                match gone(Entity::Booking, self.store.get_one_filled(*booking_id).await)? {
                    Some(booking) => {
                        let doc = search::booking_summary(&booking);
                        self.index.upsert_doc(BOOKINGS, *booking_id, &doc).await
                    }
                    None => self.remove(BOOKINGS, *booking_id).await,
                }
            }
            MirrorTask::RemoveBookingDoc { booking_id } => self.remove(BOOKINGS, *booking_id).await,
            MirrorTask::UpdateUserAggregate { user_id, update } => {
                match gone(Entity::User, self.store.user(*user_id).await)? {
                    Some(_) => self.index.apply_aggregate(USERS, *user_id, update).await,
                    None => self.remove(USERS, *user_id).await,
                }
            }
            MirrorTask::IndexUser { user_id } => self.index_user(*user_id, None).await,
            MirrorTask::UpdateUserDoc { user_id, fields } => {
                self.index_user(*user_id, Some(fields)).await
            }
            MirrorTask::RemoveUserDoc { user_id } => self.remove(USERS, *user_id).await,
        }
    }

    /// Upsert the stored profile, or just `fields` of it when given.
    async fn index_user(&self, user_id: Uuid, fields: Option<&[String]>) -> CoreResult<()> {
        let Some(user) = gone(Entity::User, self.store.user(user_id).await)? else {
            return self.remove(USERS, user_id).await;
        };
        let mut doc = search::user_document(&user);
        if let (Some(fields), Some(all)) = (fields, doc.as_object()) {
            let picked: Map<String, Value> = all
                .iter()
                .filter(|(key, _)| key.as_str() == "id" || fields.contains(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            doc = Value::Object(picked);
        }
        self.index.upsert_doc(USERS, user_id, &doc).await
    }

    async fn remove(&self, collection: &str, id: Uuid) -> CoreResult<()> {
        match self.index.get_doc(collection, id).await? {
            Some(found) => self.index.remove_doc(collection, &found.internal_id).await,
            None => Ok(()),
        }
    }

    /// Apply inline, falling back to the outbox.
    pub async fn dispatch(&self, task: MirrorTask) {
        let err = match self.apply(&task).await {
            Ok(()) => {
                debug!(task = task.kind(), subject = %task.subject_id(), "Mirror write applied");
                return;
            }
            Err(err) => err,
        };

        error!(
            consistency_gap = true,
            task = task.kind(),
            subject = %task.subject_id(),
            "Mirror write failed, deferring to outbox: {}",
            err
        );
        if let Err(enqueue_err) = self.outbox.enqueue(&task, &err.to_string()).await {
            error!(
                consistency_gap = true,
                task = task.kind(),
                subject = %task.subject_id(),
                "Outbox enqueue failed, mirror write lost: {}",
                enqueue_err
            );
        }
    }

    pub async fn index_booking(&self, booking_id: Uuid) {
        self.dispatch(MirrorTask::IndexBooking { booking_id }).await;
    }

    pub async fn update_user_aggregate(&self, user_id: Uuid, update: AggregateUpdate) {
        self.dispatch(MirrorTask::UpdateUserAggregate { user_id, update })
            .await;
    }

    pub async fn remove_booking(&self, booking_id: Uuid) {
        self.dispatch(MirrorTask::RemoveBookingDoc { booking_id }).await;
    }
}

/// `None` when the `entity` record itself no longer exists.
fn gone<T>(entity: Entity, result: CoreResult<T>) -> CoreResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(CoreError::NotFound { entity: missing, .. }) if missing == entity => Ok(None),
        Err(err) => Err(err),
    }
}
