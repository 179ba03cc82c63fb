use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::booking::FilledBooking;
use crate::user::User;
use crate::CoreResult;

pub const BOOKINGS: &str = "bookings";
pub const USERS: &str = "users";

/// A document as stored in the index, with the index-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDoc {
    pub internal_id: String,
    pub doc: Value,
}

impl IndexedDoc {
    /// Domain id carried in the document body.
    pub fn entity_id(&self) -> Option<Uuid> {
        self.doc
            .get("id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

/// Atomic edit of the `bookings`/`lastBookingDate` aggregate on a user document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AggregateUpdate {
    AppendBooking {
        booking_id: Uuid,
        date: DateTime<Utc>,
    },
    RemoveBooking {
        booking_id: Uuid,
    },
}

impl AggregateUpdate {
    /// Apply the update to a document in place. Appending an id that is
    /// already listed only refreshes the date.
    pub fn apply_to(&self, doc: &mut Value) {
        if !doc.is_object() {
            *doc = json!({});
        }
        let Some(fields) = doc.as_object_mut() else {
            return;
        };
        let bookings = fields
            .entry("bookings")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !bookings.is_array() {
            *bookings = Value::Array(Vec::new());
        }
        let Some(list) = bookings.as_array_mut() else {
            return;
        };

        match self {
            AggregateUpdate::AppendBooking { booking_id, date } => {
                let id = Value::String(booking_id.to_string());
                if !list.contains(&id) {
                    list.push(id);
                }
                fields.insert("lastBookingDate".into(), json!(date));
            }
            AggregateUpdate::RemoveBooking { booking_id } => {
                let id = booking_id.to_string();
                list.retain(|item| item.as_str() != Some(id.as_str()));
            }
        }
    }
}

/// Projection of a filled booking stored in the `bookings` collection.
pub fn booking_summary(booking: &FilledBooking) -> Value {
    json!({
        "id": booking.id,
        "timings": { "date": booking.timings.date },
        "created": booking.created,
        "state": booking.state,
        "vendor": { "name": booking.vendor.name, "id": booking.vendor.id },
        "customer": { "email": booking.customer.email, "id": booking.customer.id },
        "menuPrice": booking.menu_price,
        "total": booking.total,
    })
}

/// Profile document stored in the `users` collection. The `bookings` and
/// `lastBookingDate` aggregates are added later by [`AggregateUpdate`].
pub fn user_document(user: &User) -> Value {
    json!({
        "id": user.id,
        "email": user.email,
        "type": user.user_type,
        "firstName": user.first_name,
        "lastName": user.last_name,
        "phone": user.phone.as_deref().unwrap_or_default(),
        "created": user.created,
    })
}

/// Ownership clause appended to a booking search query.
pub fn scoped_query(query: &str, field: &str, id: Uuid) -> String {
    let clause = format!("{field}:\"{id}\"");
    let query = query.trim();
    if query.is_empty() {
        clause
    } else {
        format!("{query} AND {clause}")
    }
}

/// Documents are addressed by the domain id in their body, which is also the
/// index's own id for every document written through [`SearchIndex::upsert_doc`]
/// or [`SearchIndex::apply_aggregate`].
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn create_doc(&self, collection: &str, doc: &Value) -> CoreResult<IndexedDoc>;

    async fn get_doc(&self, collection: &str, id: Uuid) -> CoreResult<Option<IndexedDoc>>;

    /// Merge `partial` into the stored document.
    async fn update_doc(&self, collection: &str, internal_id: &str, partial: &Value)
        -> CoreResult<()>;

    async fn remove_doc(&self, collection: &str, internal_id: &str) -> CoreResult<()>;

    /// Run a query-string search, returning one page of hits plus the total hit count.
    async fn query(
        &self,
        collection: &str,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> CoreResult<(Vec<IndexedDoc>, u64)>;

    /// Merge `doc` into the document for `id`, creating it if missing, in one
    /// atomic index operation.
    async fn upsert_doc(&self, collection: &str, id: Uuid, doc: &Value) -> CoreResult<()>;

    /// Apply `update` to the document for `id` in one atomic index operation.
    /// A missing document is started as `{"id": id}`.
    async fn apply_aggregate(
        &self,
        collection: &str,
        id: Uuid,
        update: &AggregateUpdate,
    ) -> CoreResult<()>;
}
