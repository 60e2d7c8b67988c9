use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::Request;
use serde::Serialize;
use thiserror::Error;

/// API failure modes, each rendered as an `{"error": ...}` JSON body.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed input. Raised before any store access.
    #[error("{0}")]
    Validation(String),

    /// Uniqueness or referential-integrity violation.
    #[error("{0}")]
    Conflict(String),

    /// Bad credentials or no session.
    #[error("{0}")]
    Auth(String),

    /// Store or internal failure. The message carries the cause for
    /// operator diagnosis; it never contains credential material.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Internal(format!("database error: {err}"))
    }
}

impl From<r2d2::Error> for ApiError {
    fn from(err: r2d2::Error) -> Self {
        Self::Internal(format!("connection pool error: {err}"))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        let status = match &self {
            ApiError::Validation(_) | ApiError::Conflict(_) => Status::BadRequest,
            ApiError::Auth(_) => Status::Unauthorized,
            ApiError::Internal(message) => {
                log::error!("{message}");
                Status::InternalServerError
            }
        };
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).respond_to(request)
    }
}
