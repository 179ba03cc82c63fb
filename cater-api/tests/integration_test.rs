use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use cater_api::{
    app,
    middleware::Claims,
    state::{AppState, AuthConfig, RateLimit},
};
use cater_booking::{
    BookingManager, MirrorSync, MockMailer, MockPaymentAdapter, NotificationDispatcher,
    PaymentOrchestrator, PersistenceGateway, UserService,
};
use cater_core::booking::{FeeSettings, Tag, DIETARY_TAG_PID, EVENT_TAG_PID};
use cater_core::identity::Role;
use cater_core::repository::{UserRepository, VendorRepository};
use cater_core::user::{NewUser, NewVendor, UserType};
use cater_store::memory::{MemoryIndex, MemoryOutbox, MemoryStore};

const SECRET: &str = "test-secret";

struct TestApp {
    router: Router,
    store: MemoryStore,
}

fn test_app() -> TestApp {
    let store = MemoryStore::new(FeeSettings {
        commission_fee: Decimal::from(15),
        service_fee: Decimal::from(10),
    });
    store.add_tag(Tag {
        id: 11,
        name: "Wedding".into(),
        pid: EVENT_TAG_PID,
    });
    store.add_tag(Tag {
        id: 20,
        name: "Vegan".into(),
        pid: DIETARY_TAG_PID,
    });

    let gateway = PersistenceGateway::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    );
    let mirror = Arc::new(MirrorSync::new(
        Arc::new(MemoryIndex::new()),
        Arc::new(MemoryOutbox::new()),
        gateway.clone(),
    ));
    let notifier = Arc::new(NotificationDispatcher::new(Arc::new(MockMailer::new())));
    let payments = Arc::new(PaymentOrchestrator::new(
        Arc::new(MockPaymentAdapter::new()),
        "gbp",
    ));

    let state = AppState {
        bookings: Arc::new(BookingManager::new(
            gateway,
            mirror.clone(),
            notifier.clone(),
            payments.clone(),
        )),
        users: Arc::new(UserService::new(
            Arc::new(store.clone()),
            mirror,
            notifier,
            payments,
        )),
        redis: None,
        rate_limit: RateLimit {
            requests: 100,
            window_seconds: 60,
        },
        auth: AuthConfig {
            secret: SECRET.into(),
        },
    };

    TestApp {
        router: app(state),
        store,
    }
}

fn token(id: Uuid, role: Role) -> String {
    let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize;
    Claims { sub: id, role, exp }.sign(SECRET).unwrap()
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(bearer) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {bearer}"));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(raw) => Decimal::from_str(raw).unwrap(),
        other => Decimal::from_str(&other.to_string()).unwrap(),
    }
}

/// Vendor profile user plus vendor record, returning (vendor_id, vendor_user_id).
async fn seed_vendor(store: &MemoryStore) -> (Uuid, Uuid) {
    let user = store
        .create_user(&NewUser {
            email: "chef@example.com".into(),
            user_type: UserType::Vendor,
            first_name: Some("Gordon".into()),
            last_name: None,
            phone: None,
        })
        .await
        .unwrap();
    let vendor = store
        .create_vendor(&NewVendor {
            name: "Hot Pans".into(),
            menu_price: Decimal::from(25),
            user_id: user.id,
        })
        .await
        .unwrap();
    (vendor.id, user.id)
}

fn booking_body(vendor_id: Uuid) -> Value {
    json!({
        "vendor_id": vendor_id,
        "covers": 4,
        "timings": { "date": "2030-03-01T19:30:00Z" },
        "eventType": { "id": 11 },
        "dietary": { "tags": [{ "id": 20, "priceModifier": 2, "quantity": 3 }] }
    })
}

async fn register(router: &Router, email: &str) -> Uuid {
    let (status, body) = send(
        router,
        "POST",
        "/v1/users",
        None,
        Some(json!({ "email": email, "firstName": "Ada" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    Uuid::parse_str(body["id"].as_str().unwrap()).unwrap()
}

#[tokio::test]
async fn test_health_is_public() {
    let app = test_app();
    let (status, body) = send(&app.router, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let app = test_app();
    let (status, body) = send(&app.router, "GET", "/v1/bookings", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let (status, _) = send(&app.router, "GET", "/v1/bookings", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_booking_flow_over_http() {
    let app = test_app();
    let (vendor_id, vendor_user_id) = seed_vendor(&app.store).await;
    let customer_id = register(&app.router, "ada@example.com").await;
    let customer = token(customer_id, Role::Customer);
    let vendor = token(vendor_user_id, Role::Vendor);

    let (status, booking) = send(
        &app.router,
        "POST",
        "/v1/bookings",
        Some(&customer),
        Some(booking_body(vendor_id)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["state"], "pending");
    assert_eq!(decimal(&booking["total"]), Decimal::from(106));
    let booking_id = booking["id"].as_str().unwrap().to_string();

    let (status, page) = send(&app.router, "GET", "/v1/bookings", Some(&customer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["totalRecords"], 1);
    assert_eq!(page["paging"]["limit"], 10);

    let (status, payment) = send(
        &app.router,
        "POST",
        &format!("/v1/bookings/{booking_id}/payments"),
        Some(&customer),
        Some(json!({ "card_token": "tok_visa" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(decimal(&payment["total"]), Decimal::from_str("116.60").unwrap());
    let payment_id = payment["id"].as_str().unwrap().to_string();

    let (status, accepted) = send(
        &app.router,
        "POST",
        &format!("/v1/bookings/{booking_id}/payments/{payment_id}/accept"),
        Some(&vendor),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(accepted["state"], "approvedVendor");

    let (status, report) = send(
        &app.router,
        "POST",
        &format!("/v1/bookings/{booking_id}/status/send-email"),
        Some(&customer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["deliveries"].as_array().unwrap().len(), 2);

    let (status, ack) = send(
        &app.router,
        "DELETE",
        &format!("/v1/bookings/{booking_id}"),
        Some(&customer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["message"], "Booking has been successfully removed.");

    let (status, body) = send(
        &app.router,
        "GET",
        &format!("/v1/bookings/{booking_id}"),
        Some(&customer),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "BOOKING_NOT_FOUND");
}

#[tokio::test]
async fn test_error_codes_over_http() {
    let app = test_app();
    let (vendor_id, _) = seed_vendor(&app.store).await;
    let customer_id = register(&app.router, "ada@example.com").await;
    let customer = token(customer_id, Role::Customer);

    let (_, booking) = send(
        &app.router,
        "POST",
        "/v1/bookings",
        Some(&customer),
        Some(booking_body(vendor_id)),
    )
    .await;
    let booking_uri = format!("/v1/bookings/{}", booking["id"].as_str().unwrap());

    let stranger = token(Uuid::new_v4(), Role::Customer);
    let (status, body) = send(&app.router, "GET", &booking_uri, Some(&stranger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "YOU_DONOT_OWNER_OF_BOOKING");

    let (status, body) = send(
        &app.router,
        "PATCH",
        &booking_uri,
        Some(&customer),
        Some(json!({ "state": "completed" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_STATE_TRANSITION");

    let (status, body) = send(
        &app.router,
        "POST",
        "/v1/users",
        None,
        Some(json!({ "email": "ADA@example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "EMAIL_ALREADY_IN_USE");

    let (status, body) = send(
        &app.router,
        "POST",
        "/v1/bookings",
        Some(&customer),
        Some(json!({ "covers": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERRORS");
}

#[tokio::test]
async fn test_malformed_bodies_are_validation_errors() {
    let app = test_app();
    let (vendor_id, _) = seed_vendor(&app.store).await;
    let customer_id = register(&app.router, "ada@example.com").await;
    let customer = token(customer_id, Role::Customer);

    let mut body = booking_body(vendor_id);
    body["covers"] = json!("four");
    let (status, body) = send(&app.router, "POST", "/v1/bookings", Some(&customer), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERRORS");

    let (_, booking) = send(
        &app.router,
        "POST",
        "/v1/bookings",
        Some(&customer),
        Some(booking_body(vendor_id)),
    )
    .await;
    let booking_uri = format!("/v1/bookings/{}", booking["id"].as_str().unwrap());
    let (status, body) = send(
        &app.router,
        "PATCH",
        &booking_uri,
        Some(&customer),
        Some(json!({ "state": "archived" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERRORS");

    let (status, body) = send(
        &app.router,
        "POST",
        "/v1/users",
        None,
        Some(json!({ "email": 42 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERRORS");
}

#[tokio::test]
async fn test_admin_listing_requires_admin() {
    let app = test_app();
    let (vendor_id, _) = seed_vendor(&app.store).await;
    let customer_id = register(&app.router, "ada@example.com").await;
    let customer = token(customer_id, Role::Customer);
    send(
        &app.router,
        "POST",
        "/v1/bookings",
        Some(&customer),
        Some(booking_body(vendor_id)),
    )
    .await;

    let (status, body) = send(&app.router, "GET", "/v1/admin/bookings", Some(&customer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "OPERATION_NOT_PERMITTED");

    let admin = token(Uuid::new_v4(), Role::Admin);
    let (status, body) = send(
        &app.router,
        "GET",
        "/v1/admin/bookings?state=pending&limit=5",
        Some(&admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalRecords"], 1);
    assert_eq!(body["paging"]["limit"], 5);
}

#[tokio::test]
async fn test_user_profile_routes() {
    let app = test_app();
    let user_id = register(&app.router, "ada@example.com").await;
    let own = token(user_id, Role::Customer);
    let other = token(Uuid::new_v4(), Role::Customer);
    let uri = format!("/v1/users/{user_id}");

    let (status, body) = send(&app.router, "GET", &uri, Some(&other), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "ada@example.com");

    let (status, _) = send(
        &app.router,
        "PATCH",
        &uri,
        Some(&other),
        Some(json!({ "lastName": "Byron" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app.router,
        "PATCH",
        &uri,
        Some(&own),
        Some(json!({ "lastName": "Lovelace" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lastName"], "Lovelace");

    let (status, body) = send(
        &app.router,
        "GET",
        "/v1/users/search?q=ada",
        Some(&own),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalRecords"], 1);

    let (status, body) = send(&app.router, "DELETE", &uri, Some(&own), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "User has been successfully removed.");
}

#[tokio::test]
async fn test_card_tokens() {
    let app = test_app();
    let bearer = token(Uuid::new_v4(), Role::Customer);
    let (status, body) = send(
        &app.router,
        "POST",
        "/v1/payments/tokens",
        Some(&bearer),
        Some(json!({
            "number": "4000056655665556",
            "exp_month": 12,
            "exp_year": 2030,
            "cvc": "123"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "tok_mock_5556");
}
