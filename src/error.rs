// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::isolation::IsolationError;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    ValidationError {
        message: String,
        field_errors: Option<HashMap<String, String>>,
    },

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::ValidationError { .. } => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::ValidationError { message, .. } => message,
            ApiError::Unauthorized(msg) => msg,
            ApiError::Forbidden(msg) => msg,
            ApiError::NotFound(msg) => msg,
            ApiError::InternalServerError(msg) => msg,
            ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        match self {
            ApiError::ValidationError { message, field_errors } => {
                let mut response = json!({
                    "error": true,
                    "message": message,
                    "code": "VALIDATION_ERROR"
                });

                if let Some(field_errors) = field_errors {
                    response["field_errors"] = json!(field_errors);
                }

                response
            }
            _ => {
                json!({
                    "error": true,
                    "message": self.message(),
                    "code": self.error_code()
                })
            }
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(
        message: impl Into<String>,
        field_errors: Option<HashMap<String, String>>,
    ) -> Self {
        ApiError::ValidationError {
            message: message.into(),
            field_errors,
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

// Convert isolation-layer errors to HTTP errors.
// Denials keep constant response shapes: wrong-tenant and nonexistent both
// come through RecordNotFoundOrForbidden as the same 404 body.
impl From<IsolationError> for ApiError {
    fn from(err: IsolationError) -> Self {
        match err {
            IsolationError::AuthenticationRequired => {
                ApiError::unauthorized("Authentication required")
            }
            IsolationError::AccessDenied(msg) => ApiError::forbidden(msg),
            IsolationError::RecordNotFoundOrForbidden => ApiError::not_found("Record not found"),
            IsolationError::Validation(msg) => ApiError::validation_error(msg, None),
            IsolationError::UnscopableQuery(msg) => {
                ApiError::bad_request(format!("query cannot be tenant-scoped: {}", msg))
            }
            IsolationError::Internal(msg) => {
                // Don't expose internal SQL errors to clients
                tracing::error!("isolation internal error: {}", msg);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<crate::database::manager::DatabaseError> for ApiError {
    fn from(err: crate::database::manager::DatabaseError) -> Self {
        match err {
            crate::database::manager::DatabaseError::ConfigMissing(_)
            | crate::database::manager::DatabaseError::InvalidDatabaseUrl => {
                tracing::error!("database configuration error: {}", err);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            crate::database::manager::DatabaseError::Sqlx(sqlx_err) => {
                // Log the real error but return generic message
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::internal_server_error("Database error occurred")
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_statuses_match_taxonomy() {
        assert_eq!(ApiError::from(IsolationError::AuthenticationRequired).status_code(), 401);
        assert_eq!(ApiError::from(IsolationError::AccessDenied("x".into())).status_code(), 403);
        assert_eq!(ApiError::from(IsolationError::RecordNotFoundOrForbidden).status_code(), 404);
        assert_eq!(ApiError::from(IsolationError::Validation("x".into())).status_code(), 400);
        assert_eq!(
            ApiError::from(IsolationError::UnscopableQuery("x".into())).status_code(),
            400
        );
    }

    #[test]
    fn not_found_body_is_constant() {
        let a = ApiError::from(IsolationError::RecordNotFoundOrForbidden).to_json();
        let b = ApiError::from(IsolationError::RecordNotFoundOrForbidden).to_json();
        assert_eq!(a, b);
        assert_eq!(a["code"], "NOT_FOUND");
    }
}
