use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use uuid::Uuid;

use cater_booking::Acknowledgement;
use cater_core::identity::Actor;
use cater_core::user::{NewUser, User, UserChanges};
use cater_shared::Page;

use crate::bookings::SearchParams;
use crate::error::{ApiJson, AppError};
use crate::state::AppState;

/// Registration is open; everything else needs a token.
pub fn public_routes() -> Router<AppState> {
    Router::new().route("/v1/users", axum::routing::post(register))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/users/search", get(search_users))
        .route(
            "/v1/users/{id}",
            get(get_user).patch(update_user).delete(remove_user),
        )
}

async fn register(
    State(state): State<AppState>,
    ApiJson(new_user): ApiJson<NewUser>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let user = state.users.register(&new_user).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn search_users(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Page<User>>, AppError> {
    Ok(Json(
        state
            .users
            .search_users(params.query(), params.paging())
            .await?,
    ))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.users.get_user(id).await?))
}

async fn update_user(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    ApiJson(changes): ApiJson<UserChanges>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.users.update_user(id, &changes, &actor).await?))
}

async fn remove_user(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Acknowledgement>, AppError> {
    Ok(Json(state.users.remove_user(id, &actor).await?))
}
