//! Image reconciliation
//!
//! Converges a place's stored image set to the list a client submitted. The
//! plan is computed purely from the two lists; the storage side (deleting
//! orphaned objects, minting upload slots) runs before any row is touched so a
//! failed object deletion never leaves a row pointing at nothing.

use futures::future::try_join_all;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::model::{ImageEntry, PlaceImageRecord, StagedImage};
use crate::storage::{place_image_key, ObjectStore};

pub const MAX_IMAGES_PER_PLACE: usize = 4;

/// The operations needed to converge stored images to a submission
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Submitted ids that refer to images actually stored for the place
    pub kept: Vec<String>,
    /// Stored ids absent from the submission
    pub orphaned: Vec<String>,
    /// Client ids of the new entries, in submission order
    pub incoming: Vec<String>,
}

impl ReconcilePlan {
    /// Number of images the place holds once the plan is applied
    pub fn resulting_count(&self) -> usize {
        self.kept.len() + self.incoming.len()
    }

    pub fn is_noop(&self) -> bool {
        self.orphaned.is_empty() && self.incoming.is_empty()
    }

    /// Ids that must survive the row deletion step
    pub fn keep_ids(&self) -> &[String] {
        &self.kept
    }
}

/// Partitions `submitted` against `stored`
///
/// Kept ids that do not belong to the place are ignored. Kept images are
/// never reordered.
pub fn plan(submitted: &[ImageEntry], stored: &[PlaceImageRecord]) -> ReconcilePlan {
    let mut requested = Vec::new();
    let mut incoming = Vec::new();

    for entry in submitted {
        match entry {
            ImageEntry::Kept { id } => requested.push(id.as_str()),
            ImageEntry::Pending { client_id, .. } => incoming.push(client_id.clone()),
        }
    }

    let (kept, orphaned): (Vec<&PlaceImageRecord>, Vec<&PlaceImageRecord>) = stored
        .iter()
        .partition(|image| requested.contains(&image.id.as_str()));

    ReconcilePlan {
        kept: kept.into_iter().map(|image| image.id.clone()).collect(),
        orphaned: orphaned.into_iter().map(|image| image.id.clone()).collect(),
        incoming,
    }
}

/// Runs the storage side of `plan` for the place `slug`
///
/// Orphaned objects are deleted first, then one upload slot is issued per
/// incoming entry. Both fan-outs run concurrently and any failure aborts the
/// whole sync. The returned images are in the same order as `plan.incoming`.
pub async fn sync_storage(
    store: &dyn ObjectStore,
    slug: &str,
    plan: &ReconcilePlan,
) -> StorageResult<Vec<StagedImage>> {
    let orphaned_keys: Vec<String> = plan
        .orphaned
        .iter()
        .map(|id| place_image_key(slug, id))
        .collect();
    store.delete_objects(&orphaned_keys).await?;

    try_join_all(plan.incoming.iter().map(move |_| async move {
        let id = Uuid::new_v4().to_string();
        let slot = store.issue_upload_slot(&place_image_key(slug, &id)).await?;
        Ok::<_, StorageError>(StagedImage {
            id,
            serve_url: slot.serve_url,
            upload_url: slot.upload_url,
        })
    }))
    .await
}
