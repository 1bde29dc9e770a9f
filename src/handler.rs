//! HTTP request handlers
//!
//! Handlers stay thin: they extract the caller and the payload, delegate to
//! [`crate::places`] or the identity provider, and shape the HTTP response.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::auth::{bearer_token, CurrentUser};
use crate::error::{AppError, AppResult, IdentityError};
use crate::extract::AppJson;
use crate::model::{CreatePlaceRequest, GoogleSignInRequest, UpdatePlaceRequest, UploadQuery};
use crate::places;
use crate::state::AppState;
use crate::storage::MemoryStore;

/// `GET /places` - the caller's places, newest first
pub async fn list_places(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<impl IntoResponse> {
    Ok(Json(places::list_places(&state, user.id())?))
}

/// `POST /places` - creates a place
///
/// # Response
///
/// - **201 Created** - the place, with upload URLs for the preview and photos
/// - **400 Bad Request** - more than four images
/// - **401 Unauthorized** - missing or invalid ID token
pub async fn create_place(
    State(state): State<AppState>,
    user: CurrentUser,
    AppJson(payload): AppJson<CreatePlaceRequest>,
) -> AppResult<impl IntoResponse> {
    let place = places::create_place(&state, user.id(), payload).await?;
    Ok((StatusCode::CREATED, Json(place)))
}

/// `GET /places/{slug}` - public view of one place
pub async fn get_place(
    Path(slug): Path<String>,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(places::get_place(&state, &slug)?))
}

/// `POST /places/{slug}` - updates a place
///
/// # Response
///
/// - **200 OK** - `{ "images": [uploadURL...], "previewURL": uploadURL | null }`
/// - **404 Not Found** - the place does not exist or belongs to someone else
pub async fn update_place(
    Path(slug): Path<String>,
    State(state): State<AppState>,
    user: CurrentUser,
    AppJson(payload): AppJson<UpdatePlaceRequest>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(
        places::update_place(&state, user.id(), &slug, payload).await?,
    ))
}

/// `DELETE /places/{slug}` - deletes a place, its images and stored objects
pub async fn delete_place(
    Path(slug): Path<String>,
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<impl IntoResponse> {
    places::delete_place(&state, user.id(), &slug).await?;
    Ok(Json(json!({ "message": "Place deleted" })))
}

/// `GET /places/{slug}/editable` - whether the caller owns the place
pub async fn place_editable(
    Path(slug): Path<String>,
    State(state): State<AppState>,
    user: Option<CurrentUser>,
) -> AppResult<impl IntoResponse> {
    let editable = places::is_editable(&state, &slug, user.as_ref().map(CurrentUser::id))?;
    Ok(Json(editable))
}

/// A rejected code or refresh token is the caller's problem, anything else is ours
fn provider_error(e: IdentityError) -> AppError {
    if e.is_rejection() {
        AppError::Unauthorized
    } else {
        e.into()
    }
}

/// `POST /auth/google` - exchanges an authorization code for tokens
///
/// Provisions the user on first sign-in.
pub async fn google_sign_in(
    State(state): State<AppState>,
    AppJson(payload): AppJson<GoogleSignInRequest>,
) -> AppResult<impl IntoResponse> {
    let tokens = state
        .identity
        .exchange_code(&payload.code)
        .await
        .map_err(provider_error)?;

    let id_token = tokens.id_token.as_deref().ok_or(AppError::Unauthorized)?;
    let subject = state
        .identity
        .verify_id_token(id_token)
        .await
        .map_err(provider_error)?;

    let (user, created) = state.repo.ensure_user(&subject)?;
    if created {
        tracing::info!(user_id = user.id, "user provisioned");
    }

    Ok(Json(tokens))
}

/// `POST /auth/google/refresh-token` - exchanges the bearer refresh token for new tokens
pub async fn google_refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<impl IntoResponse> {
    let refresh_token = bearer_token(&headers).ok_or(AppError::Unauthorized)?;

    let tokens = state
        .identity
        .refresh(refresh_token)
        .await
        .map_err(provider_error)?;

    Ok(Json(tokens))
}

/// `PUT /objects/{*key}` - receives a client upload for the in-memory backend
///
/// Only accepted with the token of an upload URL issued for `key`.
pub async fn put_object(
    Path(key): Path<String>,
    Query(query): Query<UploadQuery>,
    State(store): State<Arc<MemoryStore>>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    if !store.accept_upload(&key, &query.upload, body.to_vec()) {
        return Err(AppError::UploadRejected);
    }
    Ok(StatusCode::OK)
}

/// `GET /objects/{*key}` - serves an object of the in-memory backend
pub async fn get_object(
    Path(key): Path<String>,
    State(store): State<Arc<MemoryStore>>,
) -> AppResult<impl IntoResponse> {
    let bytes = store.get(&key).ok_or(AppError::ObjectNotFound)?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        bytes,
    ))
}

pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Not Found", "message": "No such route" })),
    )
}
