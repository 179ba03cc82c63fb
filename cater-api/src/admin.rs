use axum::{
    extract::{Query, State},
    routing::get,
    Extension, Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use cater_core::booking::{BookingFilter, BookingState, FilledBooking};
use cater_core::identity::Actor;
use cater_shared::{Page, Paging};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub state: Option<BookingState>,
    pub vendor_id: Option<Uuid>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/admin/bookings", get(list_bookings))
}

async fn list_bookings(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<FilledBooking>>, AppError> {
    let filter = BookingFilter {
        state: params.state,
        vendor_id: params.vendor_id,
    };
    let paging = Paging::new(params.limit, params.offset);
    Ok(Json(
        state.bookings.list_bookings(&filter, paging, &actor).await?,
    ))
}
