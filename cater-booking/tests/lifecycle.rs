use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use cater_booking::{
    BookingManager, MirrorSync, MirrorWorker, MockMailer, MockPaymentAdapter,
    NotificationDispatcher, PaymentOrchestrator, PersistenceGateway, RetryPolicy, UserService,
};
use cater_core::booking::{
    BookingFilter, BookingPayload, BookingState, FeeSettings, Tag, DIETARY_TAG_PID, EVENT_TAG_PID,
};
use cater_core::identity::Actor;
use cater_core::notification::Template;
use cater_core::payment::PaymentState;
use cater_core::repository::{UserRepository, VendorRepository};
use cater_core::search::{BOOKINGS, USERS};
use cater_core::user::{NewUser, NewVendor, User, UserChanges, UserType, Vendor};
use cater_core::{CoreError, Entity};
use cater_shared::Paging;
use cater_store::memory::{MemoryIndex, MemoryOutbox, MemoryStore};

const VEGAN: i64 = 20;
const WEDDING: i64 = 11;

struct Harness {
    store: MemoryStore,
    index: MemoryIndex,
    outbox: MemoryOutbox,
    mailer: Arc<MockMailer>,
    adapter: Arc<MockPaymentAdapter>,
    mirror: Arc<MirrorSync>,
    manager: BookingManager,
    accounts: UserService,
    customer: User,
    vendor: Vendor,
    vendor_user: User,
}

fn dec(raw: &str) -> Decimal {
    Decimal::from_str(raw).unwrap()
}

fn new_user(email: &str, user_type: UserType) -> NewUser {
    NewUser {
        email: email.to_string(),
        user_type,
        first_name: Some("Test".into()),
        last_name: Some("Person".into()),
        phone: None,
    }
}

async fn harness() -> Harness {
    let store = MemoryStore::new(FeeSettings {
        commission_fee: Decimal::from(15),
        service_fee: Decimal::from(10),
    });
    store.add_tag(Tag {
        id: WEDDING,
        name: "Wedding".into(),
        pid: EVENT_TAG_PID,
    });
    store.add_tag(Tag {
        id: VEGAN,
        name: "Vegan".into(),
        pid: DIETARY_TAG_PID,
    });

    let index = MemoryIndex::new();
    let outbox = MemoryOutbox::new();
    let mailer = Arc::new(MockMailer::new());
    let adapter = Arc::new(MockPaymentAdapter::new());

    let gateway = PersistenceGateway::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    );
    let mirror = Arc::new(MirrorSync::new(
        Arc::new(index.clone()),
        Arc::new(outbox.clone()),
        gateway.clone(),
    ));
    let notifier = Arc::new(NotificationDispatcher::new(mailer.clone()));
    let payments = Arc::new(PaymentOrchestrator::new(adapter.clone(), "gbp"));
    let manager = BookingManager::new(
        gateway,
        mirror.clone(),
        notifier.clone(),
        payments.clone(),
    );
    let accounts = UserService::new(Arc::new(store.clone()), mirror.clone(), notifier, payments);

    let customer = store
        .create_user(&new_user("ada@example.com", UserType::Customer))
        .await
        .unwrap();
    let vendor_user = store
        .create_user(&new_user("chef@example.com", UserType::Vendor))
        .await
        .unwrap();
    let vendor = store
        .create_vendor(&NewVendor {
            name: "Hot Pans".into(),
            menu_price: Decimal::from(25),
            user_id: vendor_user.id,
        })
        .await
        .unwrap();

    Harness {
        store,
        index,
        outbox,
        mailer,
        adapter,
        mirror,
        manager,
        accounts,
        customer,
        vendor,
        vendor_user,
    }
}

fn wedding_payload(vendor_id: Uuid) -> BookingPayload {
    serde_json::from_value(json!({
        "vendor_id": vendor_id,
        "covers": 4,
        "menuPrice": 1,
        "timings": { "date": "2030-03-01T19:30:00Z" },
        "location": { "postcode": "EC1A 1BB" },
        "eventType": { "id": WEDDING },
        "dietary": {
            "tags": [{ "id": VEGAN, "priceModifier": 2, "quantity": 3 }],
            "notes": "no nuts"
        }
    }))
    .unwrap()
}

impl Harness {
    fn customer_actor(&self) -> Actor {
        Actor::customer(self.customer.id)
    }

    fn vendor_actor(&self) -> Actor {
        Actor::vendor(self.vendor_user.id)
    }
}

#[tokio::test]
async fn test_create_snapshots_price_and_computes_total() {
    let h = harness().await;
    let booking = h
        .manager
        .create(&h.customer_actor(), &wedding_payload(h.vendor.id))
        .await
        .unwrap();

    assert_eq!(booking.state, BookingState::Pending);
    assert_eq!(booking.customer_id, h.customer.id);
    assert_eq!(booking.menu_price, Decimal::from(25));
    assert_eq!(booking.service_fee, Decimal::from(10));
    assert_eq!(booking.total, Decimal::from(106));
    assert_eq!(booking.event_type.as_ref().map(|t| t.tag.id), Some(WEDDING));
    assert_eq!(booking.dietary.notes.as_deref(), Some("no nuts"));
    assert_eq!(booking.vendor.name, "Hot Pans");
    assert_eq!(booking.customer.email, "ada@example.com");

    let doc = h.index.doc_for(BOOKINGS, booking.id).unwrap();
    assert_eq!(doc["state"], "pending");
    assert_eq!(doc["vendor"]["name"], "Hot Pans");

    for user_id in [h.customer.id, h.vendor_user.id] {
        let user_doc = h.index.doc_for(USERS, user_id).unwrap();
        assert_eq!(user_doc["bookings"], json!([booking.id.to_string()]));
        assert!(user_doc.get("lastBookingDate").is_some());
    }

    let templates = h.mailer.templates();
    assert!(templates.contains(&Template::BookingReceived));
    assert!(templates.contains(&Template::VendorBookingReceived));
}

#[tokio::test]
async fn test_create_rejects_unknown_vendor() {
    let h = harness().await;
    let err = h
        .manager
        .create(&h.customer_actor(), &wedding_payload(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::NotFound {
            entity: Entity::Vendor,
            ..
        }
    ));
    assert_eq!(h.store.booking_count(), 0);
}

#[tokio::test]
async fn test_oversized_dietary_price_is_rejected_before_writing() {
    let h = harness().await;
    let payload: BookingPayload = serde_json::from_value(json!({
        "vendor_id": h.vendor.id,
        "covers": 4,
        "timings": { "date": "2030-03-01T19:30:00Z" },
        "dietary": {
            "tags": [{ "id": VEGAN, "priceModifier": "79228162514264337593543950335", "quantity": 2 }]
        }
    }))
    .unwrap();

    let err = h
        .manager
        .create(&h.customer_actor(), &payload)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));
    assert_eq!(h.store.booking_count(), 0);
    assert!(h.index.docs(BOOKINGS).is_empty());
}

#[tokio::test]
async fn test_unknown_tag_leaves_no_booking_behind() {
    let h = harness().await;
    let payload: BookingPayload = serde_json::from_value(json!({
        "vendor_id": h.vendor.id,
        "covers": 2,
        "timings": { "date": "2030-03-01T19:30:00Z" },
        "eventType": { "id": 999 }
    }))
    .unwrap();

    let err = h.manager.create(&h.customer_actor(), &payload).await.unwrap_err();
    assert!(matches!(err, CoreError::ValidationError(_)));
    assert_eq!(h.store.booking_count(), 0);
}

#[tokio::test]
async fn test_snapshot_survives_later_price_and_fee_changes() {
    let h = harness().await;
    let booking = h
        .manager
        .create(&h.customer_actor(), &wedding_payload(h.vendor.id))
        .await
        .unwrap();

    h.store
        .update_menu_price(h.vendor.id, Decimal::from(40))
        .await
        .unwrap();
    h.store.set_fees(FeeSettings {
        commission_fee: Decimal::from(20),
        service_fee: Decimal::from(12),
    });

    let reloaded = h
        .manager
        .get_one(booking.id, &h.customer_actor())
        .await
        .unwrap();
    assert_eq!(reloaded.menu_price, Decimal::from(25));
    assert_eq!(reloaded.service_fee, Decimal::from(10));
    assert_eq!(reloaded.total, Decimal::from(106));
}

#[tokio::test]
async fn test_access_rules_for_reading() {
    let h = harness().await;
    let booking = h
        .manager
        .create(&h.customer_actor(), &wedding_payload(h.vendor.id))
        .await
        .unwrap();

    let stranger = Actor::customer(Uuid::new_v4());
    let err = h.manager.get_one(booking.id, &stranger).await.unwrap_err();
    assert!(matches!(err, CoreError::OwnershipViolation(_)));

    let other_vendor_user = h
        .store
        .create_user(&new_user("other@example.com", UserType::Vendor))
        .await
        .unwrap();
    h.store
        .create_vendor(&NewVendor {
            name: "Cold Pans".into(),
            menu_price: Decimal::from(10),
            user_id: other_vendor_user.id,
        })
        .await
        .unwrap();
    let err = h
        .manager
        .get_one(booking.id, &Actor::vendor(other_vendor_user.id))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::OwnershipViolation(_)));

    assert!(h.manager.get_one(booking.id, &h.vendor_actor()).await.is_ok());
    assert!(h
        .manager
        .get_one(booking.id, &Actor::admin(Uuid::new_v4()))
        .await
        .is_ok());

    // Vendors can read but not edit
    let err = h
        .manager
        .update(booking.id, &BookingPayload::default(), &h.vendor_actor())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::OwnershipViolation(_)));
}

#[tokio::test]
async fn test_empty_update_round_trip_keeps_booking() {
    let h = harness().await;
    let actor = h.customer_actor();
    let created = h
        .manager
        .create(&actor, &wedding_payload(h.vendor.id))
        .await
        .unwrap();

    let before = h.manager.get_one(created.id, &actor).await.unwrap();
    h.manager
        .update(created.id, &BookingPayload::default(), &actor)
        .await
        .unwrap();
    let after = h.manager.get_one(created.id, &actor).await.unwrap();

    assert_eq!(before.state, after.state);
    assert_eq!(before.total, after.total);
    assert_eq!(before.tag_ids(), after.tag_ids());
    assert_eq!(before, h.manager.get_one(created.id, &actor).await.unwrap());
}

#[tokio::test]
async fn test_bare_tag_keeps_stored_attributes() {
    let h = harness().await;
    let actor = h.customer_actor();
    let created = h
        .manager
        .create(&actor, &wedding_payload(h.vendor.id))
        .await
        .unwrap();

    let payload: BookingPayload = serde_json::from_value(json!({
        "covers": 5,
        "dietary": { "tags": [{ "id": VEGAN }] }
    }))
    .unwrap();
    let updated = h.manager.update(created.id, &payload, &actor).await.unwrap();

    assert_eq!(updated.tag_ids(), vec![VEGAN]);
    assert!(updated.event_type.is_none());
    // 5 * 25 + 2 * 3
    assert_eq!(updated.total, Decimal::from(131));
    assert_eq!(
        h.index.doc_for(BOOKINGS, created.id).unwrap()["state"],
        "pending"
    );
}

#[tokio::test]
async fn test_update_rejects_invalid_transition_before_writing() {
    let h = harness().await;
    let actor = h.customer_actor();
    let created = h
        .manager
        .create(&actor, &wedding_payload(h.vendor.id))
        .await
        .unwrap();

    let payload: BookingPayload =
        serde_json::from_value(json!({ "state": "completed", "covers": 9 })).unwrap();
    let err = h.manager.update(created.id, &payload, &actor).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));

    let reloaded = h.manager.get_one(created.id, &actor).await.unwrap();
    assert_eq!(reloaded.state, BookingState::Pending);
    assert_eq!(reloaded.covers, 4);
}

#[tokio::test]
async fn test_insert_payment_authorizes_total_with_service_fee() {
    let h = harness().await;
    let actor = h.customer_actor();
    let booking = h
        .manager
        .create(&actor, &wedding_payload(h.vendor.id))
        .await
        .unwrap();

    let payment = h
        .manager
        .insert_payment(booking.id, "tok_visa", &actor)
        .await
        .unwrap();
    assert_eq!(payment.total, dec("116.60"));
    assert_eq!(payment.currency, "gbp");
    assert_eq!(payment.state, PaymentState::Pending);
    assert_eq!(payment.provider.name, "Stripe");

    let requests = h.adapter.transactions();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].amount_minor, 11660);
    assert_eq!(requests[0].source, "tok_visa");

    let payments = h.manager.get_payments(booking.id, &actor).await.unwrap();
    assert_eq!(payments, vec![payment]);
}

#[tokio::test]
async fn test_declined_card_records_nothing() {
    let h = harness().await;
    let actor = h.customer_actor();
    let booking = h
        .manager
        .create(&actor, &wedding_payload(h.vendor.id))
        .await
        .unwrap();
    h.adapter.fail_transactions(true);

    let err = h
        .manager
        .insert_payment(booking.id, "tok_chargeDeclined", &actor)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ProviderError(_)));
    assert_eq!(h.store.payment_count(), 0);
}

#[tokio::test]
async fn test_accept_payment_captures_then_approves() {
    let h = harness().await;
    let booking = h
        .manager
        .create(&h.customer_actor(), &wedding_payload(h.vendor.id))
        .await
        .unwrap();
    let payment = h
        .manager
        .insert_payment(booking.id, "tok_visa", &h.customer_actor())
        .await
        .unwrap();

    let accepted = h
        .manager
        .accept_payment(booking.id, payment.id, &h.vendor_actor())
        .await
        .unwrap();
    assert_eq!(accepted.state, BookingState::ApprovedVendor);
    assert_eq!(accepted.payments[0].state, PaymentState::Approved);
    assert_eq!(h.adapter.captured(), vec![payment.provider.id.clone()]);
    assert_eq!(
        h.index.doc_for(BOOKINGS, booking.id).unwrap()["state"],
        "approvedVendor"
    );
}

#[tokio::test]
async fn test_payment_write_failure_after_capture_keeps_booking_mirrored() {
    let h = harness().await;
    let actor = h.customer_actor();
    let booking = h
        .manager
        .create(&actor, &wedding_payload(h.vendor.id))
        .await
        .unwrap();
    let payment = h
        .manager
        .insert_payment(booking.id, "tok_visa", &actor)
        .await
        .unwrap();
    h.store.fail_payment_updates(true);

    let err = h
        .manager
        .accept_payment(booking.id, payment.id, &h.vendor_actor())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::StorageError(_)));
    assert_eq!(h.adapter.captured(), vec![payment.provider.id.clone()]);

    h.store.fail_payment_updates(false);
    let reloaded = h.manager.get_one(booking.id, &actor).await.unwrap();
    assert_eq!(reloaded.state, BookingState::ApprovedVendor);
    assert_eq!(reloaded.payments[0].state, PaymentState::Pending);
    assert_eq!(
        h.index.doc_for(BOOKINGS, booking.id).unwrap()["state"],
        "approvedVendor"
    );
}

#[tokio::test]
async fn test_capture_failure_changes_nothing() {
    let h = harness().await;
    let actor = h.customer_actor();
    let booking = h
        .manager
        .create(&actor, &wedding_payload(h.vendor.id))
        .await
        .unwrap();
    let payment = h
        .manager
        .insert_payment(booking.id, "tok_visa", &actor)
        .await
        .unwrap();
    h.adapter.fail_capture(true);

    let err = h
        .manager
        .accept_payment(booking.id, payment.id, &h.vendor_actor())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ProviderError(_)));

    let reloaded = h.manager.get_one(booking.id, &actor).await.unwrap();
    assert_eq!(reloaded.state, BookingState::Pending);
    assert_eq!(reloaded.payments[0].state, PaymentState::Pending);
}

#[tokio::test]
async fn test_decline_leaves_payment_untouched() {
    let h = harness().await;
    let actor = h.customer_actor();
    let booking = h
        .manager
        .create(&actor, &wedding_payload(h.vendor.id))
        .await
        .unwrap();
    let payment = h
        .manager
        .insert_payment(booking.id, "tok_visa", &actor)
        .await
        .unwrap();

    let declined = h
        .manager
        .decline_payment(booking.id, payment.id, &h.vendor_actor())
        .await
        .unwrap();
    assert_eq!(declined.state, BookingState::DeclinedVendor);
    assert_eq!(declined.payments[0].state, PaymentState::Pending);

    // Terminal state: accepting afterwards is rejected before any capture
    let err = h
        .manager
        .accept_payment(booking.id, payment.id, &h.vendor_actor())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidTransition { .. }));
    assert!(h.adapter.captured().is_empty());
}

#[tokio::test]
async fn test_payment_of_another_booking_is_not_found() {
    let h = harness().await;
    let actor = h.customer_actor();
    let first = h
        .manager
        .create(&actor, &wedding_payload(h.vendor.id))
        .await
        .unwrap();
    let second = h
        .manager
        .create(&actor, &wedding_payload(h.vendor.id))
        .await
        .unwrap();
    let payment = h
        .manager
        .insert_payment(first.id, "tok_visa", &actor)
        .await
        .unwrap();

    let err = h
        .manager
        .get_one_payment(second.id, payment.id, &actor)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "PAYMENT_NOT_FOUND");
    assert_eq!(
        h.manager
            .get_one_payment(first.id, payment.id, &actor)
            .await
            .unwrap()
            .id,
        payment.id
    );
}

#[tokio::test]
async fn test_remove_cleans_up_mirrors() {
    let h = harness().await;
    let actor = h.customer_actor();
    let booking = h
        .manager
        .create(&actor, &wedding_payload(h.vendor.id))
        .await
        .unwrap();

    let ack = h.manager.remove(booking.id, &actor).await.unwrap();
    assert_eq!(ack.message, "Booking has been successfully removed.");

    assert!(h.index.doc_for(BOOKINGS, booking.id).is_none());
    for user_id in [h.customer.id, h.vendor_user.id] {
        assert_eq!(
            h.index.doc_for(USERS, user_id).unwrap()["bookings"],
            json!([])
        );
    }
    let err = h.manager.get_one(booking.id, &actor).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_index_outage_is_repaired_by_worker() {
    let h = harness().await;
    h.index.set_failing(true);

    let booking = h
        .manager
        .create(&h.customer_actor(), &wedding_payload(h.vendor.id))
        .await
        .unwrap();
    assert_eq!(h.outbox.pending().len(), 3);
    assert!(h.index.doc_for(BOOKINGS, booking.id).is_none());

    h.index.set_failing(false);
    let worker = MirrorWorker::new(
        h.mirror.clone(),
        Arc::new(h.outbox.clone()),
        RetryPolicy::with_max_attempts(3),
        10,
        Duration::from_millis(10),
    );
    let stats = worker.run_once().await.unwrap();
    assert_eq!(stats.completed, 3);
    assert!(h.outbox.pending().is_empty());
    assert!(h.index.doc_for(BOOKINGS, booking.id).is_some());
    assert_eq!(
        h.index.doc_for(USERS, h.customer.id).unwrap()["bookings"],
        json!([booking.id.to_string()])
    );
}

#[tokio::test]
async fn test_late_replay_does_not_resurrect_removed_booking() {
    let h = harness().await;
    let actor = h.customer_actor();
    let booking = h
        .manager
        .create(&actor, &wedding_payload(h.vendor.id))
        .await
        .unwrap();

    h.index.set_failing(true);
    let payload: BookingPayload = serde_json::from_value(json!({ "covers": 5 })).unwrap();
    h.manager.update(booking.id, &payload, &actor).await.unwrap();
    assert_eq!(h.outbox.pending().len(), 1);

    h.index.set_failing(false);
    h.manager.remove(booking.id, &actor).await.unwrap();
    assert!(h.index.doc_for(BOOKINGS, booking.id).is_none());

    let worker = MirrorWorker::new(
        h.mirror.clone(),
        Arc::new(h.outbox.clone()),
        RetryPolicy::with_max_attempts(3),
        10,
        Duration::from_millis(10),
    );
    let stats = worker.run_once().await.unwrap();
    assert_eq!(stats.completed, 1);
    assert!(h.index.doc_for(BOOKINGS, booking.id).is_none());
    let page = h
        .manager
        .search("", Paging::default(), &Actor::admin(Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(page.total_records, 0);
}

#[tokio::test]
async fn test_search_is_scoped_to_actor() {
    let h = harness().await;
    let other = h
        .store
        .create_user(&new_user("grace@example.com", UserType::Customer))
        .await
        .unwrap();
    let mine = h
        .manager
        .create(&h.customer_actor(), &wedding_payload(h.vendor.id))
        .await
        .unwrap();
    h.manager
        .create(&Actor::customer(other.id), &wedding_payload(h.vendor.id))
        .await
        .unwrap();

    let page = h
        .manager
        .search("", Paging::default(), &h.customer_actor())
        .await
        .unwrap();
    assert_eq!(page.total_records, 1);
    assert_eq!(page.results[0].id, mine.id);

    let page = h
        .manager
        .search("pending", Paging::default(), &h.vendor_actor())
        .await
        .unwrap();
    assert_eq!(page.total_records, 2);

    let page = h
        .manager
        .search("", Paging::new(Some(1), None), &Actor::admin(Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(page.total_records, 2);
    assert_eq!(page.results.len(), 1);
    assert_eq!(page.paging.next, Some(1));
}

#[tokio::test]
async fn test_search_drops_stale_hits() {
    let h = harness().await;
    let booking = h
        .manager
        .create(&h.customer_actor(), &wedding_payload(h.vendor.id))
        .await
        .unwrap();
    // Relational row gone, mirror doc left behind
    h.manager
        .gateway()
        .remove(booking.id)
        .await
        .unwrap();

    let page = h
        .manager
        .search("", Paging::default(), &h.customer_actor())
        .await
        .unwrap();
    assert_eq!(page.total_records, 1);
    assert!(page.results.is_empty());
}

#[tokio::test]
async fn test_status_notifications_report_deliveries() {
    let h = harness().await;
    let actor = h.customer_actor();
    let booking = h
        .manager
        .create(&actor, &wedding_payload(h.vendor.id))
        .await
        .unwrap();

    let report = h
        .manager
        .send_status_notification(booking.id, &actor)
        .await
        .unwrap();
    assert_eq!(report.deliveries.len(), 2);
    assert!(report.deliveries.iter().all(|d| d.is_sent()));

    h.mailer.set_failing(true);
    let payment = h
        .manager
        .insert_payment(booking.id, "tok_visa", &actor)
        .await
        .unwrap();
    h.manager
        .accept_payment(booking.id, payment.id, &h.vendor_actor())
        .await
        .unwrap();
    let report = h
        .manager
        .send_payment_status_notification(booking.id, payment.id, &actor)
        .await
        .unwrap();
    assert_eq!(report.deliveries.len(), 2);
    assert!(report
        .deliveries
        .iter()
        .all(|d| !d.is_sent() && d.template == Template::PaymentTaken));
}

#[tokio::test]
async fn test_admin_listing() {
    let h = harness().await;
    let booking = h
        .manager
        .create(&h.customer_actor(), &wedding_payload(h.vendor.id))
        .await
        .unwrap();

    let err = h
        .manager
        .list_bookings(&BookingFilter::default(), Paging::default(), &h.customer_actor())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotPermitted(_)));

    let admin = Actor::admin(Uuid::new_v4());
    let filter = BookingFilter {
        state: Some(BookingState::Pending),
        vendor_id: Some(h.vendor.id),
    };
    let page = h
        .manager
        .list_bookings(&filter, Paging::default(), &admin)
        .await
        .unwrap();
    assert_eq!(page.total_records, 1);
    assert_eq!(page.results[0].id, booking.id);

    let filter = BookingFilter {
        state: Some(BookingState::Completed),
        vendor_id: None,
    };
    let page = h
        .manager
        .list_bookings(&filter, Paging::default(), &admin)
        .await
        .unwrap();
    assert_eq!(page.total_records, 0);
}

#[tokio::test]
async fn test_register_links_provider_and_mirrors_profile() {
    let h = harness().await;
    let user = h
        .accounts
        .register(&new_user("New.Person@Example.com", UserType::Customer))
        .await
        .unwrap();

    assert_eq!(user.email, "new.person@example.com");
    assert!(user.customer_id.as_deref().unwrap().starts_with("cus_mock_"));
    assert_eq!(h.mailer.templates(), vec![Template::Welcome]);
    let doc = h.index.doc_for(USERS, user.id).unwrap();
    assert_eq!(doc["email"], "new.person@example.com");
    assert_eq!(doc["type"], "customer");

    let err = h
        .accounts
        .register(&new_user("new.person@example.com", UserType::Vendor))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "EMAIL_ALREADY_IN_USE");
}

#[tokio::test]
async fn test_register_survives_provider_outage() {
    let h = harness().await;
    h.adapter.fail_customers(true);
    let user = h
        .accounts
        .register(&new_user("solo@example.com", UserType::Customer))
        .await
        .unwrap();
    assert!(user.customer_id.is_none());
    assert!(h.index.doc_for(USERS, user.id).is_some());
}

#[tokio::test]
async fn test_profile_updates_are_self_or_admin() {
    let h = harness().await;
    let changes = UserChanges {
        first_name: Some("Augusta".into()),
        ..UserChanges::default()
    };

    let err = h
        .accounts
        .update_user(h.customer.id, &changes, &h.vendor_actor())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotPermitted(_)));

    let updated = h
        .accounts
        .update_user(h.customer.id, &changes, &h.customer_actor())
        .await
        .unwrap();
    assert_eq!(updated.first_name.as_deref(), Some("Augusta"));
    let doc = h.index.doc_for(USERS, h.customer.id).unwrap();
    assert_eq!(doc["firstName"], "Augusta");
    assert!(doc.get("email").is_none());

    let ack = h
        .accounts
        .remove_user(h.customer.id, &Actor::admin(Uuid::new_v4()))
        .await
        .unwrap();
    assert_eq!(ack.message, "User has been successfully removed.");
    assert!(h.index.doc_for(USERS, h.customer.id).is_none());
    assert!(h.accounts.get_user(h.customer.id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_user_search_hydrates_profiles() {
    let h = harness().await;
    let user = h
        .accounts
        .register(&new_user("finder@example.com", UserType::Customer))
        .await
        .unwrap();

    let page = h
        .accounts
        .search_users("finder", Paging::default())
        .await
        .unwrap();
    assert_eq!(page.total_records, 1);
    assert_eq!(page.results[0].id, user.id);
}
