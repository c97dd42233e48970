//! HTTP error taxonomy. Every error renders as `{"error": "..."}` with
//! the status code its class calls for.

use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::element::ValidationError;
use crate::session::SessionError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    BadRequest(String),
    #[error("session not found")]
    SessionNotFound,
    #[error("element not found")]
    ElementNotFound,
    #[error("session closed")]
    SessionClosed,
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::ElementNotFound => Self::ElementNotFound,
            SessionError::Closed => Self::SessionClosed,
            SessionError::Store(err) => Self::Store(err),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound | Self::ElementNotFound => StatusCode::NOT_FOUND,
            Self::SessionClosed | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}

/// Route JSON body extraction failures through the same error shape.
pub fn json_error_handler(
    err: actix_web::error::JsonPayloadError,
    _req: &HttpRequest,
) -> actix_web::Error {
    ApiError::BadRequest(err.to_string()).into()
}
