//! HTTP mapping of [`ProvisionError`].

use crate::error::ProvisionError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Every tagged error from a mutating operation is a 500 carrying the message.
pub struct ApiError(pub ProvisionError);

impl From<ProvisionError> for ApiError {
    fn from(e: ProvisionError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": self.0.to_string() })),
        )
            .into_response()
    }
}
