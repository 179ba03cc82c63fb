//! In-memory implementations of every storage trait.
//!
//! Used by the service and API test suites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use cater_core::booking::{
    Booking, BookingChanges, BookingFilter, BookingTag, FeeSettings, NewBooking, Tag,
    TagAssignment,
};
use cater_core::outbox::{MirrorTask, OutboxEntry, OutboxStatus, OutboxStore};
use cater_core::payment::{NewPayment, Payment, PaymentState};
use cater_core::repository::{
    BookingRepository, PaymentRepository, SettingsProvider, UserRepository, VendorRepository,
};
use cater_core::search::{AggregateUpdate, IndexedDoc, SearchIndex};
use cater_core::user::{NewUser, NewVendor, User, UserChanges, Vendor};
use cater_core::{CoreError, CoreResult, Entity};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct StoreState {
    users: HashMap<Uuid, User>,
    vendors: HashMap<Uuid, Vendor>,
    tags: HashMap<i64, Tag>,
    bookings: HashMap<Uuid, Booking>,
    booking_tags: HashMap<Uuid, Vec<(i64, Map<String, Value>)>>,
    payments: HashMap<Uuid, Payment>,
}

/// Relational store kept in process memory.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    fees: Arc<Mutex<FeeSettings>>,
    failing_payment_writes: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new(fees: FeeSettings) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            fees: Arc::new(Mutex::new(fees)),
            failing_payment_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make payment state changes fail until switched back.
    pub fn fail_payment_updates(&self, failing: bool) {
        self.failing_payment_writes.store(failing, Ordering::SeqCst);
    }

    pub fn add_tag(&self, tag: Tag) {
        guard(&self.state).tags.insert(tag.id, tag);
    }

    pub fn set_fees(&self, fees: FeeSettings) {
        *guard(&self.fees) = fees;
    }

    pub fn booking_count(&self) -> usize {
        guard(&self.state).bookings.len()
    }

    pub fn payment_count(&self) -> usize {
        guard(&self.state).payments.len()
    }
}

#[async_trait]
impl SettingsProvider for MemoryStore {
    async fn fee_settings(&self) -> CoreResult<FeeSettings> {
        Ok(*guard(&self.fees))
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn create_booking(&self, booking: &NewBooking) -> CoreResult<Booking> {
        let now = Utc::now();
        let record = Booking {
            id: Uuid::new_v4(),
            state: booking.state,
            covers: booking.covers,
            menu_price: booking.menu_price,
            commission_fee: booking.fees.commission_fee,
            service_fee: booking.fees.service_fee,
            timings: booking.timings.clone(),
            location: booking.location.clone(),
            logistics: booking.logistics.clone(),
            dietary_notes: booking.dietary_notes.clone(),
            vendor_id: booking.vendor_id,
            customer_id: booking.customer_id,
            created: now,
            updated: now,
        };

        let mut state = guard(&self.state);
        if !state.vendors.contains_key(&booking.vendor_id) {
            return Err(CoreError::StorageError(format!(
                "foreign key violation: vendor {}",
                booking.vendor_id
            )));
        }
        state.bookings.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        Ok(guard(&self.state).bookings.get(&id).cloned())
    }

    async fn update_booking(&self, id: Uuid, changes: &BookingChanges) -> CoreResult<Booking> {
        let mut state = guard(&self.state);
        let booking = state
            .bookings
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(Entity::Booking, id))?;

        if let Some(next) = changes.state {
            booking.state = next;
        }
        if let Some(covers) = changes.covers {
            booking.covers = covers;
        }
        if let Some(timings) = &changes.timings {
            booking.timings = timings.clone();
        }
        if let Some(location) = &changes.location {
            booking.location = location.clone();
        }
        if let Some(logistics) = &changes.logistics {
            booking.logistics = logistics.clone();
        }
        if let Some(notes) = &changes.dietary_notes {
            booking.dietary_notes = Some(notes.clone());
        }
        booking.updated = Utc::now();
        Ok(booking.clone())
    }

    async fn delete_booking(&self, id: Uuid) -> CoreResult<()> {
        let mut state = guard(&self.state);
        if state.bookings.remove(&id).is_none() {
            return Err(CoreError::not_found(Entity::Booking, id));
        }
        state.booking_tags.remove(&id);
        state.payments.retain(|_, p| p.booking_id != id);
        Ok(())
    }

    async fn booking_tags(&self, id: Uuid) -> CoreResult<Vec<BookingTag>> {
        let state = guard(&self.state);
        let mut tags: Vec<BookingTag> = state
            .booking_tags
            .get(&id)
            .map(|rows| {
                rows.iter()
                    .filter_map(|(tag_id, attributes)| {
                        let tag = state.tags.get(tag_id)?.clone();
                        Some(BookingTag::new(tag, attributes.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        tags.sort_by_key(|t| t.tag.id);
        Ok(tags)
    }

    async fn replace_booking_tags(&self, id: Uuid, tags: &[TagAssignment]) -> CoreResult<()> {
        let mut state = guard(&self.state);
        if let Some(unknown) = tags.iter().find(|t| !state.tags.contains_key(&t.tag_id)) {
            return Err(CoreError::ValidationError(format!(
                "unknown tag id: {}",
                unknown.tag_id
            )));
        }

        let existing = state.booking_tags.remove(&id).unwrap_or_default();
        let rows = tags
            .iter()
            .map(|assignment| {
                let attributes = match &assignment.attributes {
                    Some(attributes) => attributes.clone(),
                    None => existing
                        .iter()
                        .find(|(tag_id, _)| *tag_id == assignment.tag_id)
                        .map(|(_, attributes)| attributes.clone())
                        .unwrap_or_default(),
                };
                (assignment.tag_id, attributes)
            })
            .collect();
        state.booking_tags.insert(id, rows);
        Ok(())
    }

    async fn list_bookings(
        &self,
        filter: &BookingFilter,
        limit: u32,
        offset: u32,
    ) -> CoreResult<(Vec<Booking>, u64)> {
        let state = guard(&self.state);
        let mut matching: Vec<&Booking> = state
            .bookings
            .values()
            .filter(|b| filter.state.map_or(true, |s| b.state == s))
            .filter(|b| filter.vendor_id.map_or(true, |v| b.vendor_id == v))
            .collect();
        matching.sort_by(|a, b| b.created.cmp(&a.created).then(a.id.cmp(&b.id)));

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn create_payment(&self, payment: &NewPayment) -> CoreResult<Payment> {
        let now = Utc::now();
        let record = Payment {
            id: Uuid::new_v4(),
            booking_id: payment.booking_id,
            total: payment.total,
            currency: payment.currency.clone(),
            state: PaymentState::Pending,
            provider: payment.provider.clone(),
            created: now,
            updated: now,
        };
        guard(&self.state).payments.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_payment(&self, id: Uuid) -> CoreResult<Option<Payment>> {
        Ok(guard(&self.state).payments.get(&id).cloned())
    }

    async fn payments_for_booking(&self, booking_id: Uuid) -> CoreResult<Vec<Payment>> {
        let state = guard(&self.state);
        let mut payments: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created);
        Ok(payments)
    }

    async fn set_payment_state(&self, id: Uuid, next: PaymentState) -> CoreResult<Payment> {
        if self.failing_payment_writes.load(Ordering::SeqCst) {
            return Err(CoreError::StorageError("payment write failed".into()));
        }
        let mut state = guard(&self.state);
        let payment = state
            .payments
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(Entity::Payment, id))?;
        payment.state = next;
        payment.updated = Utc::now();
        Ok(payment.clone())
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, user: &NewUser) -> CoreResult<User> {
        let email = user.email.trim().to_lowercase();
        let mut state = guard(&self.state);
        if state.users.values().any(|u| u.email == email) {
            return Err(CoreError::Duplicate("Email".into()));
        }

        let now = Utc::now();
        let record = User {
            id: Uuid::new_v4(),
            email,
            user_type: user.user_type,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            phone: user.phone.clone(),
            customer_id: None,
            created: now,
            updated: now,
        };
        state.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_user(&self, id: Uuid) -> CoreResult<Option<User>> {
        Ok(guard(&self.state).users.get(&id).cloned())
    }

    async fn update_user(&self, id: Uuid, changes: &UserChanges) -> CoreResult<User> {
        let mut state = guard(&self.state);
        if let Some(email) = &changes.email {
            let email = email.trim().to_lowercase();
            if state.users.values().any(|u| u.email == email && u.id != id) {
                return Err(CoreError::Duplicate("Email".into()));
            }
        }

        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(Entity::User, id))?;
        if let Some(email) = &changes.email {
            user.email = email.trim().to_lowercase();
        }
        if let Some(user_type) = changes.user_type {
            user.user_type = user_type;
        }
        if let Some(first_name) = &changes.first_name {
            user.first_name = Some(first_name.clone());
        }
        if let Some(last_name) = &changes.last_name {
            user.last_name = Some(last_name.clone());
        }
        if let Some(phone) = &changes.phone {
            user.phone = Some(phone.clone());
        }
        user.updated = Utc::now();
        Ok(user.clone())
    }

    async fn delete_user(&self, id: Uuid) -> CoreResult<()> {
        let mut state = guard(&self.state);
        if state.users.remove(&id).is_none() {
            return Err(CoreError::not_found(Entity::User, id));
        }
        state.vendors.retain(|_, v| v.user_id != id);
        Ok(())
    }

    async fn set_provider_customer(&self, id: Uuid, customer_id: &str) -> CoreResult<User> {
        let mut state = guard(&self.state);
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(Entity::User, id))?;
        user.customer_id = Some(customer_id.to_string());
        user.updated = Utc::now();
        Ok(user.clone())
    }
}

#[async_trait]
impl VendorRepository for MemoryStore {
    async fn get_vendor(&self, id: Uuid) -> CoreResult<Option<Vendor>> {
        Ok(guard(&self.state).vendors.get(&id).cloned())
    }

    async fn get_vendor_by_user(&self, user_id: Uuid) -> CoreResult<Option<Vendor>> {
        Ok(guard(&self.state)
            .vendors
            .values()
            .find(|v| v.user_id == user_id)
            .cloned())
    }

    async fn create_vendor(&self, vendor: &NewVendor) -> CoreResult<Vendor> {
        let record = Vendor {
            id: Uuid::new_v4(),
            name: vendor.name.clone(),
            menu_price: vendor.menu_price,
            user_id: vendor.user_id,
        };
        guard(&self.state).vendors.insert(record.id, record.clone());
        Ok(record)
    }

    async fn update_menu_price(&self, id: Uuid, menu_price: Decimal) -> CoreResult<Vendor> {
        let mut state = guard(&self.state);
        let vendor = state
            .vendors
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found(Entity::Vendor, id))?;
        vendor.menu_price = menu_price;
        Ok(vendor.clone())
    }
}

/// Search index kept in process memory.
///
/// Queries understand `field.path:"value"` clauses joined with ` AND `,
/// bare words (matched case-insensitively against every string in the
/// document) and the empty query (everything). Writes can be switched to
/// fail for exercising the outbox path.
#[derive(Clone, Default)]
pub struct MemoryIndex {
    collections: Arc<Mutex<HashMap<String, Vec<IndexedDoc>>>>,
    next_id: Arc<AtomicU64>,
    failing: Arc<AtomicBool>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn docs(&self, collection: &str) -> Vec<IndexedDoc> {
        guard(&self.collections)
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Document whose body `id` equals `id`, read synchronously.
    pub fn doc_for(&self, collection: &str, id: Uuid) -> Option<Value> {
        find_by_id(&self.docs(collection), id).map(|d| d.doc.clone())
    }

    fn check_writable(&self) -> CoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::StorageError("search index unavailable".into()));
        }
        Ok(())
    }

    fn with_doc<F>(&self, collection: &str, internal_id: &str, edit: F) -> CoreResult<()>
    where
        F: FnOnce(&mut Value),
    {
        self.check_writable()?;
        let mut collections = guard(&self.collections);
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| d.internal_id == internal_id))
            .ok_or_else(|| {
                CoreError::StorageError(format!("document {internal_id} missing in {collection}"))
            })?;
        edit(&mut doc.doc);
        Ok(())
    }
}

impl MemoryIndex {
    /// Edit the document for `id` under the lock, starting `{"id": id}` when
    /// there is none.
    fn with_doc_or_new<F>(&self, collection: &str, id: Uuid, edit: F) -> CoreResult<()>
    where
        F: FnOnce(&mut Value),
    {
        self.check_writable()?;
        let mut collections = guard(&self.collections);
        let docs = collections.entry(collection.to_string()).or_default();
        let position = match docs.iter().position(|d| d.entity_id() == Some(id)) {
            Some(position) => position,
            None => {
                docs.push(IndexedDoc {
                    internal_id: id.to_string(),
                    doc: serde_json::json!({ "id": id }),
                });
                docs.len() - 1
            }
        };
        edit(&mut docs[position].doc);
        Ok(())
    }
}

fn find_by_id(docs: &[IndexedDoc], id: Uuid) -> Option<&IndexedDoc> {
    docs.iter().find(|d| d.entity_id() == Some(id))
}

fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, key| current.get(key))
}

fn contains_text(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Array(items) => items.iter().any(|v| contains_text(v, needle)),
        Value::Object(fields) => fields.values().any(|v| contains_text(v, needle)),
        _ => false,
    }
}

fn clause_matches(doc: &Value, clause: &str) -> bool {
    match clause.split_once(':') {
        Some((field, expected)) if !field.contains(' ') => {
            let expected = expected.trim_matches('"');
            match lookup(doc, field) {
                Some(Value::String(s)) => s == expected,
                Some(Value::Array(items)) => items.iter().any(|v| v.as_str() == Some(expected)),
                Some(other) => other.to_string() == expected,
                None => false,
            }
        }
        _ => contains_text(doc, &clause.trim_matches('"').to_lowercase()),
    }
}

/// Whether `doc` satisfies a query string.
pub fn matches_query(doc: &Value, query: &str) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return true;
    }
    query
        .split(" AND ")
        .map(str::trim)
        .filter(|clause| !clause.is_empty())
        .all(|clause| clause_matches(doc, clause))
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn create_doc(&self, collection: &str, doc: &Value) -> CoreResult<IndexedDoc> {
        self.check_writable()?;
        let internal_id = match doc.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1),
        };
        let indexed = IndexedDoc {
            internal_id,
            doc: doc.clone(),
        };
        guard(&self.collections)
            .entry(collection.to_string())
            .or_default()
            .push(indexed.clone());
        Ok(indexed)
    }

    async fn get_doc(&self, collection: &str, id: Uuid) -> CoreResult<Option<IndexedDoc>> {
        let collections = guard(&self.collections);
        Ok(collections
            .get(collection)
            .and_then(|docs| find_by_id(docs, id))
            .cloned())
    }

    async fn update_doc(&self, collection: &str, internal_id: &str, partial: &Value) -> CoreResult<()> {
        self.with_doc(collection, internal_id, |doc| {
            if let (Some(target), Some(changes)) = (doc.as_object_mut(), partial.as_object()) {
                for (key, value) in changes {
                    target.insert(key.clone(), value.clone());
                }
            }
        })
    }

    async fn remove_doc(&self, collection: &str, internal_id: &str) -> CoreResult<()> {
        self.check_writable()?;
        if let Some(docs) = guard(&self.collections).get_mut(collection) {
            docs.retain(|d| d.internal_id != internal_id);
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> CoreResult<(Vec<IndexedDoc>, u64)> {
        let collections = guard(&self.collections);
        let hits: Vec<&IndexedDoc> = collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| matches_query(&d.doc, query)).collect())
            .unwrap_or_default();
        let total = hits.len() as u64;
        let page = hits
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn upsert_doc(&self, collection: &str, id: Uuid, doc: &Value) -> CoreResult<()> {
        self.with_doc_or_new(collection, id, |stored| {
            if let (Some(target), Some(changes)) = (stored.as_object_mut(), doc.as_object()) {
                for (key, value) in changes {
                    target.insert(key.clone(), value.clone());
                }
            }
        })
    }

    async fn apply_aggregate(
        &self,
        collection: &str,
        id: Uuid,
        update: &AggregateUpdate,
    ) -> CoreResult<()> {
        self.with_doc_or_new(collection, id, |doc| update.apply_to(doc))
    }
}

#[derive(Debug, Clone)]
struct OutboxRecord {
    entry: OutboxEntry,
    status: OutboxStatus,
}

/// Outbox kept in process memory.
#[derive(Clone, Default)]
pub struct MemoryOutbox {
    records: Arc<Mutex<Vec<OutboxRecord>>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Vec<OutboxEntry> {
        self.with_status(OutboxStatus::Pending)
    }

    pub fn dead(&self) -> Vec<OutboxEntry> {
        self.with_status(OutboxStatus::Dead)
    }

    /// Every stored entry, buried ones included.
    pub fn len(&self) -> usize {
        guard(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_status(&self, status: OutboxStatus) -> Vec<OutboxEntry> {
        guard(&self.records)
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.entry.clone())
            .collect()
    }

    /// Make every pending entry due now.
    pub fn expedite(&self) {
        let now = Utc::now();
        for record in guard(&self.records).iter_mut() {
            record.entry.next_attempt_at = now;
        }
    }
}

#[async_trait]
impl OutboxStore for MemoryOutbox {
    async fn enqueue(&self, task: &MirrorTask, error: &str) -> CoreResult<Uuid> {
        let id = Uuid::new_v4();
        guard(&self.records).push(OutboxRecord {
            entry: OutboxEntry {
                id,
                task: task.clone(),
                attempts: 0,
                next_attempt_at: Utc::now(),
                last_error: Some(error.to_string()),
            },
            status: OutboxStatus::Pending,
        });
        Ok(id)
    }

    async fn claim_due(&self, limit: u32) -> CoreResult<Vec<OutboxEntry>> {
        let now = Utc::now();
        let mut due: Vec<OutboxEntry> = guard(&self.records)
            .iter()
            .filter(|r| r.status == OutboxStatus::Pending && r.entry.next_attempt_at <= now)
            .map(|r| r.entry.clone())
            .collect();
        due.sort_by_key(|e| e.next_attempt_at);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn complete(&self, id: Uuid) -> CoreResult<()> {
        guard(&self.records).retain(|r| r.entry.id != id);
        Ok(())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> CoreResult<()> {
        if let Some(record) = guard(&self.records).iter_mut().find(|r| r.entry.id == id) {
            record.entry.attempts = attempts;
            record.entry.next_attempt_at = next_attempt_at;
            record.entry.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn bury(&self, id: Uuid, attempts: u32, error: &str) -> CoreResult<()> {
        if let Some(record) = guard(&self.records).iter_mut().find(|r| r.entry.id == id) {
            record.entry.attempts = attempts;
            record.entry.last_error = Some(error.to_string());
            record.status = OutboxStatus::Dead;
        }
        Ok(())
    }
}
