use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::{render::Format, render::RenderError, store::StoreError};

/// Everything a request can fail with. Each variant maps to one status.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Authentication credentials were not provided.")]
    Unauthenticated,
    #[error("Invalid token.")]
    InvalidToken,
    #[error("You do not have permission to perform this action.")]
    Forbidden,
    #[error("Not found.")]
    NotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error("Could not satisfy the request format {requested:?}.")]
    NotAcceptable { requested: String },
    #[error("{field}: {message}")]
    Validation { field: &'static str, message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated | ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotAcceptable { .. } => StatusCode::NOT_ACCEPTABLE,
            ApiError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Store(_) | ApiError::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            ApiError::Unauthenticated | ApiError::InvalidToken => (
                status,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                Json(json!({ "detail": self.to_string() })),
            )
                .into_response(),
            ApiError::NotAcceptable { .. } => {
                let available: Vec<&str> = Format::ALL.iter().map(|f| f.name()).collect();
                let body = json!({ "detail": self.to_string(), "available_formats": available });
                (status, Json(body)).into_response()
            }
            ApiError::Validation { field, message } => {
                (status, Json(json!({ field: [message] }))).into_response()
            }
            ApiError::Store(_) | ApiError::Render(_) => {
                tracing::error!(error = %self, "internal error");
                (status, Json(json!({ "detail": "A server error occurred." }))).into_response()
            }
            _ => (status, Json(json!({ "detail": self.to_string() }))).into_response(),
        }
    }
}
