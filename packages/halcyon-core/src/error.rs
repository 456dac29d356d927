//! Centralized error types for the Halcyon core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::addons::binary::BinaryAddonError;
use crate::addons::database::DbError;
use crate::addons::manager::AddonError;
use crate::addons::xml::AddonXmlError;
use crate::upnp::soap::SoapError;
use crate::upnp::ssdp::DiscoveryError;
use crate::url::UrlError;
use crate::vfs::VfsError;

/// Application-wide error type for the Halcyon server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum HubError {
    /// The addressed resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A backend exists but cannot serve the request right now
    /// (server not yet discovered, tuner offline).
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Virtual file system operation failed.
    #[error("VFS error: {0}")]
    Vfs(String),

    /// Network discovery failed (SSDP/mDNS issues).
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// SOAP request to a media server failed.
    #[error("SOAP request failed: {0}")]
    Soap(String),

    /// Add-on subsystem error.
    #[error("Add-on error: {0}")]
    Addon(String),

    /// Add-on database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error (missing required settings).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl HubError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Unavailable(_) => "unavailable",
            Self::Vfs(_) => "vfs_error",
            Self::Discovery(_) => "discovery_failed",
            Self::Soap(_) => "soap_error",
            Self::Addon(_) => "addon_error",
            Self::Database(_) => "database_error",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) | Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Result Type Aliases
// ─────────────────────────────────────────────────────────────────────────────

// Re-export Result type aliases from their defining modules
pub use crate::upnp::soap::SoapResult;
pub use crate::upnp::ssdp::DiscoveryResult;
pub use crate::vfs::VfsResult;

/// Convenient Result alias for application-wide operations.
pub type HubResult<T> = Result<T, HubError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<VfsError> for HubError {
    fn from(err: VfsError) -> Self {
        match err {
            VfsError::NotFound(path) => Self::NotFound(path),
            VfsError::UnsupportedScheme(scheme) => {
                Self::InvalidRequest(format!("Unsupported scheme: {}", scheme))
            }
            VfsError::NotSupported(op) => {
                Self::InvalidRequest(format!("Operation not supported: {}", op))
            }
            VfsError::Unavailable(msg) => Self::Unavailable(msg),
            VfsError::Url(e) => Self::InvalidRequest(e.to_string()),
            other => Self::Vfs(other.to_string()),
        }
    }
}

impl From<UrlError> for HubError {
    fn from(err: UrlError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl From<SoapError> for HubError {
    fn from(err: SoapError) -> Self {
        Self::Soap(err.to_string())
    }
}

impl From<DiscoveryError> for HubError {
    fn from(err: DiscoveryError) -> Self {
        Self::Discovery(err.to_string())
    }
}

impl From<AddonError> for HubError {
    fn from(err: AddonError) -> Self {
        match err {
            AddonError::NotFound(id) => Self::NotFound(format!("Add-on {}", id)),
            AddonError::Db(e) => Self::Database(e.to_string()),
            AddonError::MissingDependency { .. }
            | AddonError::RequiredBy { .. }
            | AddonError::UnsupportedPlatform(_) => Self::InvalidRequest(err.to_string()),
            other => Self::Addon(other.to_string()),
        }
    }
}

impl From<DbError> for HubError {
    fn from(err: DbError) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<AddonXmlError> for HubError {
    fn from(err: AddonXmlError) -> Self {
        Self::Addon(err.to_string())
    }
}

impl From<BinaryAddonError> for HubError {
    fn from(err: BinaryAddonError) -> Self {
        Self::Addon(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err = HubError::NotFound("upnp://missing/0".into());
        assert_eq!(err.code(), "not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unavailable_maps_to_503() {
        let err = HubError::Unavailable("server not discovered yet".into());
        assert_eq!(err.code(), "unavailable");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn vfs_not_found_converts_to_not_found() {
        let err: HubError = VfsError::NotFound("/nope".into()).into();
        assert!(matches!(err, HubError::NotFound(_)));
    }

    #[test]
    fn vfs_unsupported_scheme_is_client_error() {
        let err: HubError = VfsError::UnsupportedScheme("gopher".into()).into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
