use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error body returned by every endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Conflict", "Bad Request")
    pub error: String,
    /// Stable machine-readable code (e.g. "insufficient_stock")
    pub code: String,
    /// Human-readable description, safe to show to the end user
    pub message: String,
    /// RFC 3339 timestamp of when the error was produced
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Forbidden: {0}")]
    ForbiddenOperation(String),

    #[error("Invalid quantity {quantity}: quantity must be at least 1")]
    InvalidQuantity { quantity: i32 },

    #[error("Cart has no selected items")]
    EmptyCart,

    #[error("Product {0} is no longer available")]
    ProductUnavailable(Uuid),

    #[error("Insufficient stock for {product_name} ({product_id}): {available} available, {requested} requested")]
    InsufficientStock {
        product_id: Uuid,
        product_name: String,
        available: i32,
        requested: i32,
    },

    #[error("Cannot change {field} from '{from}' to '{to}'")]
    InvalidStateTransition {
        field: &'static str,
        from: String,
        to: String,
    },

    #[error("Concurrent modification of {entity} {id}")]
    PersistenceConflict { entity: &'static str, id: Uuid },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            Self::ForbiddenOperation(_) => StatusCode::FORBIDDEN,
            Self::InvalidQuantity { .. } | Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::EmptyCart | Self::ProductUnavailable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InsufficientStock { .. }
            | Self::InvalidStateTransition { .. }
            | Self::PersistenceConflict { .. } => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::DatabaseError(_) | Self::IntegrityViolation(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable code clients can switch on.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "authentication_required",
            Self::ForbiddenOperation(_) => "forbidden_operation",
            Self::InvalidQuantity { .. } => "invalid_quantity",
            Self::EmptyCart => "empty_cart",
            Self::ProductUnavailable(_) => "product_unavailable",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::PersistenceConflict { .. } => "persistence_conflict",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::DatabaseError(_) => "database_error",
            Self::IntegrityViolation(_) => "integrity_violation",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) | Self::IntegrityViolation(_) | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            Self::ServiceUnavailable(_) => "Service temporarily unavailable".to_string(),
            _ => self.to_string(),
        }
    }

    /// Business rejections the caller can fix and retry; everything else is a fault.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::DatabaseError(_) | Self::IntegrityViolation(_) | Self::InternalError(_)
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
