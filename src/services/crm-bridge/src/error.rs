//! Error handling module for the CRM Bridge Service
//!
//! Every failure a request can hit, from an unknown webhook token to a CRM
//! rejecting a write, is one variant of [`BridgeError`]. Handlers return it
//! directly and axum turns it into a JSON error response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Error types for the bridge service
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Unknown webhook token, project, connection or user
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Connection exists but is not ACTIVE
    #[error("Connection {connection_id} is inactive (status {status})")]
    Inactive {
        connection_id: String,
        status: String,
    },

    /// Stored category text is not one of the four supported operations
    #[error("Unsupported connection category: {category}")]
    UnsupportedCategory { category: String },

    /// Project has no CRM base URL configured
    #[error("CRM webhook URL is not configured for project {project_id}")]
    MissingCrmConfig { project_id: String },

    /// Stored field mapping or configuration text could not be parsed
    #[error("Malformed {what}: {reason}")]
    MalformedConfig { what: String, reason: String },

    /// MOVE operation payload lacks the key used to find the deal
    #[error("Missing identifier: none of [{keys}] found in payload")]
    MissingIdentifier { keys: String },

    /// CRM search returned no matching record
    #[error("No deal found with phone number {phone}")]
    RecordNotFound { phone: String },

    /// CRM call failed or returned an error payload
    #[error("CRM API error ({code}): {message}")]
    Upstream { code: String, message: String },

    /// Request validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Missing or invalid credentials
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// Authenticated principal lacks access to the resource
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Database operation errors
    #[error("Database error: {source}")]
    Database {
        #[from]
        source: sqlx::Error,
    },

    /// Internal server errors
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl BridgeError {
    /// Create a new not found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a new inactive-connection error
    pub fn inactive<S1: Into<String>, S2: Into<String>>(connection_id: S1, status: S2) -> Self {
        Self::Inactive {
            connection_id: connection_id.into(),
            status: status.into(),
        }
    }

    /// Create a new unsupported category error
    pub fn unsupported_category<S: Into<String>>(category: S) -> Self {
        Self::UnsupportedCategory {
            category: category.into(),
        }
    }

    /// Create a new missing CRM configuration error
    pub fn missing_crm_config<S: Into<String>>(project_id: S) -> Self {
        Self::MissingCrmConfig {
            project_id: project_id.into(),
        }
    }

    /// Create a new malformed configuration error
    pub fn malformed_config<S1: Into<String>, S2: Into<String>>(what: S1, reason: S2) -> Self {
        Self::MalformedConfig {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// Create a new missing identifier error listing the keys that were tried
    pub fn missing_identifier(keys: &[&str]) -> Self {
        Self::MissingIdentifier {
            keys: keys.join(", "),
        }
    }

    /// Create a new record not found error
    pub fn record_not_found<S: Into<String>>(phone: S) -> Self {
        Self::RecordNotFound {
            phone: phone.into(),
        }
    }

    /// Create a new upstream CRM error
    pub fn upstream<S1: Into<String>, S2: Into<String>>(code: S1, message: S2) -> Self {
        Self::Upstream {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a new unauthorized error
    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create a new forbidden error
    pub fn forbidden<S: Into<String>>(message: S) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::NotFound { .. } | BridgeError::RecordNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            BridgeError::Inactive { .. }
            | BridgeError::UnsupportedCategory { .. }
            | BridgeError::MissingCrmConfig { .. }
            | BridgeError::MissingIdentifier { .. }
            | BridgeError::Validation { .. } => StatusCode::BAD_REQUEST,
            BridgeError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            BridgeError::Forbidden { .. } => StatusCode::FORBIDDEN,
            BridgeError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            BridgeError::MalformedConfig { .. }
            | BridgeError::Configuration { .. }
            | BridgeError::Database { .. }
            | BridgeError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error (for API responses)
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::NotFound { .. } => "NOT_FOUND",
            BridgeError::Inactive { .. } => "CONNECTION_INACTIVE",
            BridgeError::UnsupportedCategory { .. } => "UNSUPPORTED_CATEGORY",
            BridgeError::MissingCrmConfig { .. } => "MISSING_CRM_CONFIG",
            BridgeError::MalformedConfig { .. } => "MALFORMED_CONFIG",
            BridgeError::MissingIdentifier { .. } => "MISSING_IDENTIFIER",
            BridgeError::RecordNotFound { .. } => "RECORD_NOT_FOUND",
            BridgeError::Upstream { .. } => "UPSTREAM_ERROR",
            BridgeError::Validation { .. } => "VALIDATION_ERROR",
            BridgeError::Unauthorized { .. } => "UNAUTHORIZED",
            BridgeError::Forbidden { .. } => "FORBIDDEN",
            BridgeError::Configuration { .. } => "CONFIGURATION_ERROR",
            BridgeError::Database { .. } => "DATABASE_ERROR",
            BridgeError::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_code = self.error_code();
        let error_message = self.to_string();

        if status_code.is_server_error() {
            tracing::error!(
                error_code = error_code,
                error_message = %error_message,
                "Request failed"
            );
        } else {
            tracing::warn!(
                error_code = error_code,
                error_message = %error_message,
                "Request rejected"
            );
        }

        let body = Json(json!({
            "error": error_message,
            "code": error_code,
        }));

        (status_code, body).into_response()
    }
}

impl From<validator::ValidationErrors> for BridgeError {
    fn from(errors: validator::ValidationErrors) -> Self {
        BridgeError::validation(errors.to_string())
    }
}
