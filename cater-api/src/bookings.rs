use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use cater_booking::{Acknowledgement, NotificationReport, PaymentRequest};
use cater_core::booking::{BookingPayload, FilledBooking};
use cater_core::identity::Actor;
use cater_core::payment::{CardDetails, CardToken, Payment};
use cater_shared::{Page, Paging};

use crate::error::{ApiJson, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl SearchParams {
    pub fn paging(&self) -> Paging {
        Paging::new(self.limit, self.offset)
    }

    pub fn query(&self) -> &str {
        self.q.as_deref().unwrap_or_default()
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking).get(search_bookings))
        .route(
            "/v1/bookings/{id}",
            get(get_booking).patch(update_booking).delete(remove_booking),
        )
        .route(
            "/v1/bookings/{id}/payments",
            get(list_payments).post(insert_payment),
        )
        .route("/v1/bookings/{id}/payments/{pid}", get(get_payment))
        .route("/v1/bookings/{id}/payments/{pid}/accept", post(accept_payment))
        .route("/v1/bookings/{id}/payments/{pid}/decline", post(decline_payment))
        .route("/v1/bookings/{id}/status/send-email", post(send_status_email))
        .route(
            "/v1/bookings/{id}/payments/{pid}/status/send-email",
            post(send_payment_status_email),
        )
        .route("/v1/payments/tokens", post(create_token))
}

async fn create_booking(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    ApiJson(payload): ApiJson<BookingPayload>,
) -> Result<(StatusCode, Json<FilledBooking>), AppError> {
    let booking = state.bookings.create(&actor, &payload).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

async fn search_bookings(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Page<FilledBooking>>, AppError> {
    let page = state
        .bookings
        .search(params.query(), params.paging(), &actor)
        .await?;
    Ok(Json(page))
}

async fn get_booking(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<FilledBooking>, AppError> {
    Ok(Json(state.bookings.get_one(id, &actor).await?))
}

async fn update_booking(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    ApiJson(payload): ApiJson<BookingPayload>,
) -> Result<Json<FilledBooking>, AppError> {
    Ok(Json(state.bookings.update(id, &payload, &actor).await?))
}

async fn remove_booking(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Acknowledgement>, AppError> {
    Ok(Json(state.bookings.remove(id, &actor).await?))
}

async fn list_payments(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Payment>>, AppError> {
    Ok(Json(state.bookings.get_payments(id, &actor).await?))
}

async fn insert_payment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    ApiJson(request): ApiJson<PaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    let payment = state
        .bookings
        .insert_payment(id, &request.card_token, &actor)
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

async fn get_payment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((id, pid)): Path<(Uuid, Uuid)>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(state.bookings.get_one_payment(id, pid, &actor).await?))
}

async fn accept_payment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((id, pid)): Path<(Uuid, Uuid)>,
) -> Result<Json<FilledBooking>, AppError> {
    Ok(Json(state.bookings.accept_payment(id, pid, &actor).await?))
}

async fn decline_payment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((id, pid)): Path<(Uuid, Uuid)>,
) -> Result<Json<FilledBooking>, AppError> {
    Ok(Json(state.bookings.decline_payment(id, pid, &actor).await?))
}

async fn send_status_email(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<NotificationReport>, AppError> {
    Ok(Json(
        state.bookings.send_status_notification(id, &actor).await?,
    ))
}

async fn send_payment_status_email(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((id, pid)): Path<(Uuid, Uuid)>,
) -> Result<Json<NotificationReport>, AppError> {
    Ok(Json(
        state
            .bookings
            .send_payment_status_notification(id, pid, &actor)
            .await?,
    ))
}

async fn create_token(
    State(state): State<AppState>,
    ApiJson(card): ApiJson<CardDetails>,
) -> Result<Json<CardToken>, AppError> {
    Ok(Json(state.bookings.create_token(&card).await?))
}
