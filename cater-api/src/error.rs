use axum::{
    extract::{rejection::JsonRejection, FromRequest},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use cater_core::CoreError;

#[derive(Debug)]
pub enum AppError {
    AuthenticationError(String),
    Anyhow(anyhow::Error),
}

fn core_status(err: &CoreError) -> StatusCode {
    match err {
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::OwnershipViolation(_) | CoreError::NotPermitted(_) => StatusCode::FORBIDDEN,
        CoreError::ValidationError(_) => StatusCode::BAD_REQUEST,
        CoreError::Duplicate(_) | CoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
        CoreError::ProviderError(_) | CoreError::DeliveryError(_) => StatusCode::BAD_GATEWAY,
        CoreError::StorageError(_) | CoreError::InternalError(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::AuthenticationError(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
            }
            AppError::Anyhow(err) => match err.downcast_ref::<CoreError>() {
                Some(core) => {
                    let status = core_status(core);
                    if status.is_server_error() {
                        tracing::error!("Request failed: {}", core);
                    }
                    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
                        "Internal Server Error".to_string()
                    } else {
                        core.to_string()
                    };
                    (status, core.code(), message)
                }
                None => match err.downcast_ref::<JsonRejection>() {
                    Some(rejection) => (
                        StatusCode::BAD_REQUEST,
                        "VALIDATION_ERRORS",
                        rejection.body_text(),
                    ),
                    None => {
                        tracing::error!("Internal Server Error: {}", err);
                        (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "INTERNAL_ERROR",
                            "Internal Server Error".to_string(),
                        )
                    }
                },
            },
        };

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Anyhow(err.into())
    }
}

/// `Json` extractor whose rejections answer with the `{error, code}` body.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);
