//! The error taxonomy shared by the store, transformer chain, and broadcaster.
use crate::response::{StatusCause, StatusDetails};
use thiserror::Error;

/// The canonical optimistic-concurrency conflict message, stable across the
/// whole crate so callers can match on it.
pub const CONFLICT_MESSAGE: &str =
    "the object has been modified; please apply your changes to the latest version and try again";

/// The error taxonomy of spec §7. Every backend/transformer/strategy error
/// that the store surfaces to a caller is interpreted into one of these.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{resource} \"{name}\" not found")]
    NotFound { resource: String, name: String },

    #[error("{resource} \"{name}\" already exists")]
    AlreadyExists { resource: String, name: String },

    #[error("{0}")]
    Conflict(String),

    #[error("{resource} \"{name}\" is invalid: {causes:?}")]
    Invalid {
        resource: String,
        name: String,
        causes: Vec<StatusCause>,
    },

    #[error("{0}")]
    BadRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("server timeout, retry: {0}")]
    ServerTimeout(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("shutdown in progress")]
    ShutdownInProgress,
}

impl ApiError {
    pub fn conflict() -> Self {
        ApiError::Conflict(CONFLICT_MESSAGE.to_string())
    }

    /// The spec's canonical status `reason` token for this error.
    pub fn reason(&self) -> &'static str {
        match self {
            ApiError::NotFound { .. } => "NotFound",
            ApiError::AlreadyExists { .. } => "AlreadyExists",
            ApiError::Conflict(_) => "Conflict",
            ApiError::Invalid { .. } => "Invalid",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::ServerTimeout(_) => "ServerTimeout",
            ApiError::Internal(_) => "Internal",
            ApiError::ShutdownInProgress => "ShutdownInProgress",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }

    pub fn to_status_details(&self, resource: &str) -> StatusDetails {
        match self {
            ApiError::NotFound { name, .. } | ApiError::AlreadyExists { name, .. } => StatusDetails {
                name: name.clone(),
                resource: resource.to_string(),
                ..Default::default()
            },
            ApiError::Invalid { name, causes, .. } => StatusDetails {
                name: name.clone(),
                resource: resource.to_string(),
                causes: causes.clone(),
                ..Default::default()
            },
            _ => StatusDetails {
                resource: resource.to_string(),
                ..Default::default()
            },
        }
    }
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;
