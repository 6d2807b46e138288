use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Domain failure taxonomy.  Every variant carries a stable machine code so
/// clients can map errors without parsing the human message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    Validation {
        code: &'static str,
        message: String,
    },
    #[error("{message}")]
    NotFound {
        code: &'static str,
        message: String,
    },
    #[error("{message}")]
    Forbidden {
        code: &'static str,
        message: String,
    },
    #[error("{message}")]
    Conflict {
        code: &'static str,
        message: String,
    },
    #[error("{message}")]
    Expired {
        code: &'static str,
        message: String,
    },
    #[error("authentication required")]
    Unauthenticated,
    #[error("too many requests")]
    RateLimited,
    #[error("internal error")]
    Internal(#[from] StoreError),
    #[error("internal error")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("internal error")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl AppError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        AppError::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Forbidden {
            code,
            message: message.into(),
        }
    }

    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Conflict {
            code,
            message: message.into(),
        }
    }

    pub fn expired(code: &'static str, message: impl Into<String>) -> Self {
        AppError::Expired {
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,
            // The mobile clients treat state conflicts as plain 400s.
            AppError::Conflict { .. } => StatusCode::BAD_REQUEST,
            AppError::Expired { .. } => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) | AppError::Hash(_) | AppError::Jwt(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::Conflict { code, .. }
            | AppError::Expired { code, .. } => code,
            AppError::Unauthenticated => "UNAUTHENTICATED",
            AppError::RateLimited => "RATE_LIMITED",
            AppError::Internal(_) | AppError::Hash(_) | AppError::Jwt(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Infrastructure failures are logged in full here and never leak to
        // clients.
        let message = match &self {
            AppError::Internal(err) => {
                tracing::error!(error = %err, "store operation failed");
                "Internal server error".to_string()
            }
            AppError::Hash(err) => {
                tracing::error!(error = %err, "password hashing failed");
                "Internal server error".to_string()
            }
            AppError::Jwt(err) => {
                tracing::error!(error = %err, "token issuing failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorBody {
            error: message,
            code: self.code(),
        });

        (status, body).into_response()
    }
}
