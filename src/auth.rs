//! Bearer token authentication
//!
//! Handlers that need a signed-in caller take a [`CurrentUser`]; handlers
//! where identity is optional take `Option<CurrentUser>`.

use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts},
    http::{header, request::Parts, HeaderMap},
};

use crate::error::AppError;
use crate::state::AppState;

/// Identity provider subject of the authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser(pub String);

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Extracts the token from the `Authorization` header
///
/// The `Bearer` scheme prefix is optional and matched case-insensitively.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        _ if value.eq_ignore_ascii_case("bearer") => "",
        _ => value,
    };

    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Verifies the bearer token, if any
///
/// A missing or refused token yields `Ok(None)`. A provider that cannot be
/// reached is an internal error, not a reason to send the client to sign in.
async fn resolve(parts: &Parts, state: &AppState) -> Result<Option<CurrentUser>, AppError> {
    let Some(token) = bearer_token(&parts.headers) else {
        return Ok(None);
    };

    match state.identity.verify_id_token(token).await {
        Ok(subject) => Ok(Some(CurrentUser(subject))),
        Err(e) if e.is_rejection() => {
            tracing::debug!(error = %e, "rejected bearer token");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        resolve(parts, state).await?.ok_or(AppError::Unauthorized)
    }
}

impl OptionalFromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Option<Self>, Self::Rejection> {
        resolve(parts, state).await
    }
}
