//! Route definitions for the places API
//!
//! This module configures all HTTP routes and maps them to their respective handlers.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::handler::{
    create_place, delete_place, get_object, get_place, google_refresh_token, google_sign_in,
    list_places, method_not_allowed, not_found, place_editable, put_object, update_place,
};
use crate::state::AppState;
use crate::storage::MemoryStore;

/// Creates and configures the Axum application router with all routes
///
/// # Route Definitions
///
/// - `GET /places` - Lists the caller's places (bearer ID token)
/// - `POST /places` - Creates a place (bearer ID token)
/// - `GET /places/{slug}` - Fetches one place (public)
/// - `POST /places/{slug}` - Updates a place (owner only)
/// - `DELETE /places/{slug}` - Deletes a place and its stored objects (owner only)
/// - `GET /places/{slug}/editable` - Whether the caller owns the place
/// - `POST /auth/google` - Exchanges an OAuth authorization code
/// - `POST /auth/google/refresh-token` - Exchanges a refresh token
///
/// Any other method on a known path answers 405.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route(
            "/places",
            get(list_places)
                .post(create_place)
                .fallback(method_not_allowed),
        )
        .route(
            "/places/{slug}",
            get(get_place)
                .post(update_place)
                .delete(delete_place)
                .fallback(method_not_allowed),
        )
        .route(
            "/places/{slug}/editable",
            get(place_editable).fallback(method_not_allowed),
        )
        .route(
            "/auth/google",
            post(google_sign_in).fallback(method_not_allowed),
        )
        .route(
            "/auth/google/refresh-token",
            post(google_refresh_token).fallback(method_not_allowed),
        )
        .fallback(not_found)
        .with_state(state)
}

/// Upload and serve routes for the in-memory object backend
///
/// - `PUT /objects/{*key}?upload={token}` - stores the body under `key`
/// - `GET /objects/{*key}` - returns the stored bytes
///
/// Merged into the app only when `STORAGE_BACKEND=memory`, whose public URL
/// defaults to `http://localhost:{PORT}/objects`.
pub fn object_routes(store: Arc<MemoryStore>) -> Router {
    Router::new()
        .route(
            "/objects/{*key}",
            get(get_object)
                .put(put_object)
                .fallback(method_not_allowed),
        )
        .with_state(store)
}
