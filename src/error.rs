//! Error types for every layer of the service

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;
pub type StorageResult<T> = Result<T, StorageError>;
pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Database(#[from] redb::DatabaseError),
    #[error(transparent)]
    Transaction(#[from] redb::TransactionError),
    #[error(transparent)]
    Table(#[from] redb::TableError),
    #[error(transparent)]
    Storage(#[from] redb::StorageError),
    #[error(transparent)]
    Commit(#[from] redb::CommitError),
    /// A stored record could not be encoded or decoded
    #[error("corrupt record: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("place {0} already exists")]
    SlugTaken(String),
    #[error("place {0} does not exist")]
    PlaceNotFound(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Backend(#[from] opendal::Error),
    #[error("storage backend does not support {0}")]
    Unsupported(&'static str),
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("token rejected: {0}")]
    InvalidToken(String),
    #[error("identity provider responded with {status}: {body}")]
    Provider { status: u16, body: String },
}

impl IdentityError {
    /// Whether the provider looked at the credential and refused it, as opposed
    /// to the provider being unreachable or failing
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::InvalidToken(_) => true,
            Self::Provider { status, .. } => (400..500).contains(status),
            Self::Http(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Errors surfaced to HTTP clients
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid or missing authorization header")]
    Unauthorized,
    /// The place does not exist, or the caller does not own it
    #[error("Place not found")]
    NotFound,
    #[error("Object not found")]
    ObjectNotFound,
    #[error("Upload URL is invalid or already used")]
    UploadRejected,
    #[error("Method not allowed")]
    MethodNotAllowed,
    #[error("{0}")]
    BadRequest(String),
    #[error("could not allocate a unique slug after {0} attempts")]
    SlugExhausted(usize),
    #[error(transparent)]
    Database(#[from] DbError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl AppError {
    fn as_status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound | Self::ObjectNotFound => StatusCode::NOT_FOUND,
            Self::UploadRejected => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.as_status_code();
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "Something went wrong, please try again".to_string()
        } else {
            self.to_string()
        };

        let title = status.canonical_reason().unwrap_or("Error");
        (status, Json(json!({ "error": title, "message": message }))).into_response()
    }
}
