//! HTTP rendering of [`AppError`] (feature-gated on `axum`)

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::app_error::AppError;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (status, Json(self.body())).into_response()
    }
}
