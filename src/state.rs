//! Application state shared across all request handlers

use std::sync::Arc;

use crate::identity::IdentityProvider;
use crate::repository::PlaceRepository;
use crate::storage::ObjectStore;

/// Every collaborator a request needs, constructed once in `main` and
/// injected into the router
#[derive(Clone)]
pub struct AppState {
    pub repo: PlaceRepository,
    pub storage: Arc<dyn ObjectStore>,
    pub identity: Arc<dyn IdentityProvider>,
}
