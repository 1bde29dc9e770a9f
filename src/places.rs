//! Place save and delete orchestration
//!
//! Ties the repository, the storage gateway and image reconciliation together.
//! Storage side effects run first; every row mutation of one operation is then
//! committed in a single transaction.

use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, DbError};
use crate::model::{
    CreatePlaceRequest, ImageView, PlaceChanges, PlaceRecord, PlaceResponse, PlaceWithImages,
    UpdatePlaceRequest, UpdatePlaceResponse,
};
use crate::reconcile::{self, ReconcilePlan, MAX_IMAGES_PER_PLACE};
use crate::state::AppState;
use crate::storage::{place_image_key, place_prefix, place_preview_key};

const SLUG_LEN: usize = 11;
const SLUG_ATTEMPTS: usize = 5;
const SLUG_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generates a random base-36 slug
pub fn generate_slug() -> String {
    let mut rng = rand::rng();
    (0..SLUG_LEN)
        .map(|_| SLUG_ALPHABET[rng.random_range(0..SLUG_ALPHABET.len())] as char)
        .collect()
}

fn check_capacity(plan: &ReconcilePlan) -> AppResult<()> {
    let count = plan.resulting_count();
    if count > MAX_IMAGES_PER_PLACE {
        return Err(AppError::BadRequest(format!(
            "a place holds at most {} images, got {}",
            MAX_IMAGES_PER_PLACE, count
        )));
    }
    Ok(())
}

fn not_found_or(e: DbError) -> AppError {
    match e {
        DbError::PlaceNotFound(_) => AppError::NotFound,
        e => e.into(),
    }
}

/// Loads a place, answering not found when it is missing or owned by someone else
fn owned_place(state: &AppState, owner: &str, slug: &str) -> AppResult<PlaceWithImages> {
    match state.repo.get_place_with_images(slug)? {
        Some(current) if current.place.created_by == owner => Ok(current),
        _ => Err(AppError::NotFound),
    }
}

pub fn list_places(state: &AppState, owner: &str) -> AppResult<Vec<PlaceResponse>> {
    Ok(state
        .repo
        .list_places_by_owner(owner)?
        .into_iter()
        .map(PlaceResponse::from)
        .collect())
}

pub fn get_place(state: &AppState, slug: &str) -> AppResult<PlaceResponse> {
    state
        .repo
        .get_place_with_images(slug)?
        .map(PlaceResponse::from)
        .ok_or(AppError::NotFound)
}

/// Whether `user` owns the place
///
/// Anonymous callers get `false` without a lookup, even for unknown slugs.
pub fn is_editable(state: &AppState, slug: &str, user: Option<&str>) -> AppResult<bool> {
    let Some(user) = user else {
        return Ok(false);
    };
    let owner = state
        .repo
        .get_place_owner(slug)?
        .ok_or(AppError::NotFound)?;
    Ok(user == owner)
}

/// Creates a place owned by `owner`
///
/// The response carries upload URLs instead of serve URLs: `previewURL` is
/// where the client uploads the rendered map preview and every image `url` is
/// where the matching photo goes.
pub async fn create_place(
    state: &AppState,
    owner: &str,
    request: CreatePlaceRequest,
) -> AppResult<PlaceResponse> {
    create_place_with_slugs(state, owner, request, generate_slug).await
}

/// Creation loop drawing candidate slugs from `next_slug`
async fn create_place_with_slugs<F>(
    state: &AppState,
    owner: &str,
    request: CreatePlaceRequest,
    mut next_slug: F,
) -> AppResult<PlaceResponse>
where
    F: FnMut() -> String + Send,
{
    let plan = reconcile::plan(&request.images, &[]);
    check_capacity(&plan)?;

    let mut record = PlaceRecord {
        slug: String::new(),
        name: request.name,
        address: request.address,
        description: request.description,
        location: request.location,
        preview_url: None,
        created_by: owner.to_string(),
        created_at: Utc::now(),
        next_image_index: 0,
    };

    for attempt in 1..=SLUG_ATTEMPTS {
        let slug = next_slug();
        if state.repo.slug_exists(&slug)? {
            warn!(slug = %slug, attempt, "slug collision, regenerating");
            continue;
        }

        let preview = state
            .storage
            .issue_upload_slot(&place_preview_key(&slug))
            .await?;
        let staged = reconcile::sync_storage(state.storage.as_ref(), &slug, &plan).await?;

        record.slug = slug.clone();
        record.preview_url = Some(preview.serve_url);
        record.created_at = Utc::now();

        let written = state.repo.write(|w| {
            w.create_place(&record)?;
            w.add_images(&slug, &staged)?;
            Ok(())
        });

        match written {
            Ok(()) => {
                info!(slug = %slug, owner, images = staged.len(), "place created");

                let mut response = PlaceResponse::from(PlaceWithImages {
                    place: record,
                    images: Vec::new(),
                });
                response.preview_url = Some(preview.upload_url);
                response.images = staged
                    .into_iter()
                    .map(|image| ImageView {
                        id: image.id,
                        url: image.upload_url,
                    })
                    .collect();
                return Ok(response);
            }
            Err(DbError::SlugTaken(_)) => {
                warn!(slug = %slug, attempt, "slug taken while writing, regenerating");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(AppError::SlugExhausted(SLUG_ATTEMPTS))
}

/// Updates a place owned by `owner`
///
/// A new preview upload URL is issued only when the location strictly
/// changed. Images are reconciled only when the request lists them.
pub async fn update_place(
    state: &AppState,
    owner: &str,
    slug: &str,
    request: UpdatePlaceRequest,
) -> AppResult<UpdatePlaceResponse> {
    let current = owned_place(state, owner, slug)?;

    let mut plan = request
        .images
        .as_deref()
        .map(|images| reconcile::plan(images, &current.images));
    if let Some(plan) = &plan {
        check_capacity(plan)?;
    }
    if plan.as_ref().is_some_and(ReconcilePlan::is_noop) {
        debug!(slug, "submitted images match the stored ones");
        plan = None;
    }

    let mut changes = PlaceChanges {
        name: request.name,
        address: request.address,
        description: request.description,
        location: request.location,
        preview_url: None,
    };

    let mut preview_upload_url = None;
    if request
        .location
        .is_some_and(|location| location != current.place.location)
    {
        let preview = state
            .storage
            .issue_upload_slot(&place_preview_key(slug))
            .await?;
        changes.preview_url = Some(preview.serve_url);
        preview_upload_url = Some(preview.upload_url);
    }

    let staged = match &mut plan {
        Some(plan) => {
            // Re-read the orphans right before touching storage so deletions
            // follow the latest stored rows, not the snapshot taken above.
            plan.orphaned = state.repo.get_image_ids_not_in(slug, plan.keep_ids())?;
            debug!(
                slug,
                kept = plan.kept.len(),
                orphaned = plan.orphaned.len(),
                incoming = plan.incoming.len(),
                "reconciling images"
            );
            reconcile::sync_storage(state.storage.as_ref(), slug, plan).await?
        }
        None => Vec::new(),
    };

    state
        .repo
        .write(|w| {
            if w.update_place_fields(owner, slug, changes)? == 0 {
                return Err(DbError::PlaceNotFound(slug.to_string()));
            }

            if let Some(plan) = &plan {
                let deleted = w.delete_images_not_in(slug, plan.keep_ids())?;
                if deleted.len() != plan.orphaned.len() {
                    warn!(
                        slug,
                        planned = plan.orphaned.len(),
                        deleted = deleted.len(),
                        "image rows changed during save"
                    );
                }
                w.add_images(slug, &staged)?;
            }
            Ok(())
        })
        .map_err(not_found_or)?;

    info!(slug, new_images = staged.len(), "place updated");

    Ok(UpdatePlaceResponse {
        images: staged.into_iter().map(|image| image.upload_url).collect(),
        preview_url: preview_upload_url,
    })
}

/// Deletes a place owned by `owner` together with all its stored objects
pub async fn delete_place(state: &AppState, owner: &str, slug: &str) -> AppResult<()> {
    let current = owned_place(state, owner, slug)?;

    let mut keys: Vec<String> = current
        .images
        .iter()
        .map(|image| place_image_key(slug, &image.id))
        .collect();
    keys.push(place_preview_key(slug));
    state.storage.delete_objects(&keys).await?;

    if let Some(swept) = state
        .storage
        .delete_objects_by_prefix(&place_prefix(slug))
        .await?
    {
        debug!(slug, swept, "swept place prefix");
    }

    state.repo.write(|w| w.delete_place(slug))?;
    info!(slug, owner, "place deleted");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use tempfile::NamedTempFile;

    use crate::database::init_db;
    use crate::error::IdentityError;
    use crate::identity::{IdentityProvider, TokenSet};
    use crate::model::Location;
    use crate::repository::PlaceRepository;
    use crate::storage::MemoryStore;

    struct NoIdentity;

    #[async_trait]
    impl IdentityProvider for NoIdentity {
        async fn exchange_code(&self, _code: &str) -> Result<TokenSet, IdentityError> {
            Err(IdentityError::InvalidToken("unused".to_string()))
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<TokenSet, IdentityError> {
            Err(IdentityError::InvalidToken("unused".to_string()))
        }

        async fn verify_id_token(&self, _id_token: &str) -> Result<String, IdentityError> {
            Err(IdentityError::InvalidToken("unused".to_string()))
        }
    }

    fn setup() -> (AppState, Arc<MemoryStore>, NamedTempFile) {
        let temp_db = NamedTempFile::new().unwrap();
        let db = init_db(temp_db.path().to_str().unwrap()).unwrap();
        let store = Arc::new(MemoryStore::new("http://cdn.test"));
        let state = AppState {
            repo: PlaceRepository::new(Arc::new(db)),
            storage: store.clone(),
            identity: Arc::new(NoIdentity),
        };
        (state, store, temp_db)
    }

    fn request() -> CreatePlaceRequest {
        CreatePlaceRequest {
            name: "Home".to_string(),
            address: "1 Main St".to_string(),
            description: String::new(),
            location: Location {
                lat: 40.0,
                lng: -73.0,
            },
            images: vec![],
        }
    }

    fn slugs(candidates: &[&str]) -> impl FnMut() -> String + Send {
        let mut candidates: Vec<String> = candidates.iter().map(|s| s.to_string()).collect();
        candidates.reverse();
        move || candidates.pop().unwrap_or_else(|| "exhausted".to_string())
    }

    #[tokio::test]
    async fn test_create_regenerates_taken_slug() {
        let (state, _store, _temp_db) = setup();
        create_place_with_slugs(&state, "u1", request(), slugs(&["taken"]))
            .await
            .unwrap();

        let created = create_place_with_slugs(&state, "u2", request(), slugs(&["taken", "fresh"]))
            .await
            .unwrap();

        assert_eq!(created.slug, "fresh");
        assert_eq!(state.repo.get_place_owner("taken").unwrap().as_deref(), Some("u1"));
        assert_eq!(state.repo.get_place_owner("fresh").unwrap().as_deref(), Some("u2"));
    }

    #[tokio::test]
    async fn test_create_gives_up_after_bounded_attempts() {
        let (state, _store, _temp_db) = setup();
        create_place_with_slugs(&state, "u1", request(), slugs(&["taken"]))
            .await
            .unwrap();

        let result =
            create_place_with_slugs(&state, "u2", request(), || "taken".to_string()).await;

        assert!(matches!(result, Err(AppError::SlugExhausted(SLUG_ATTEMPTS))));
        assert!(state.repo.list_places_by_owner("u2").unwrap().is_empty());
    }

    #[test]
    fn test_anonymous_caller_never_edits() {
        let (state, _store, _temp_db) = setup();
        assert!(!is_editable(&state, "missing", None).unwrap());
        assert!(matches!(
            is_editable(&state, "missing", Some("u1")),
            Err(AppError::NotFound)
        ));
    }

    #[test]
    fn test_generate_slug_is_base36() {
        let slug = generate_slug();
        assert_eq!(slug.len(), SLUG_LEN);
        assert!(slug
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(generate_slug(), slug);
    }

    #[test]
    fn test_check_capacity() {
        let mut plan = ReconcilePlan {
            kept: vec!["a".to_string(), "b".to_string()],
            orphaned: vec![],
            incoming: vec!["t1".to_string(), "t2".to_string()],
        };
        assert!(check_capacity(&plan).is_ok());

        plan.incoming.push("t3".to_string());
        assert!(matches!(
            check_capacity(&plan),
            Err(AppError::BadRequest(_))
        ));
    }
}
