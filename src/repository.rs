//! Place, image and user persistence on top of redb
//!
//! Reads open their own read transaction. Writes go through
//! [`PlaceRepository::write`], which hands a [`PlaceWriter`] to a closure and
//! commits every mutation it made in a single transaction.

use std::sync::Arc;

use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, WriteTransaction};

use crate::database::{
    image_key, owner_index_key, prefix_range, TABLE_OWNER_INDEX, TABLE_PLACES,
    TABLE_PLACE_IMAGES, TABLE_USERS,
};
use crate::error::{DbError, DbResult};
use crate::model::{
    PlaceChanges, PlaceImageRecord, PlaceRecord, PlaceWithImages, StagedImage, UserRecord,
};

/// Shared handle to the place store
#[derive(Clone)]
pub struct PlaceRepository {
    db: Arc<Database>,
}

impl PlaceRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get_place(&self, slug: &str) -> DbResult<Option<PlaceRecord>> {
        let read_txn = self.db.begin_read()?;
        let places = read_txn.open_table(TABLE_PLACES)?;
        read_place(&places, slug)
    }

    pub fn slug_exists(&self, slug: &str) -> DbResult<bool> {
        Ok(self.get_place(slug)?.is_some())
    }

    /// Returns the place metadata joined with its images, ordered by insertion
    pub fn get_place_with_images(&self, slug: &str) -> DbResult<Option<PlaceWithImages>> {
        let read_txn = self.db.begin_read()?;
        let places = read_txn.open_table(TABLE_PLACES)?;
        let Some(place) = read_place(&places, slug)? else {
            return Ok(None);
        };

        let images = read_txn.open_table(TABLE_PLACE_IMAGES)?;
        let images = read_images(&images, slug)?;
        Ok(Some(PlaceWithImages { place, images }))
    }

    pub fn get_place_owner(&self, slug: &str) -> DbResult<Option<String>> {
        Ok(self.get_place(slug)?.map(|place| place.created_by))
    }

    /// Ids of the stored images of `slug` that are not listed in `keep`
    pub fn get_image_ids_not_in(&self, slug: &str, keep: &[String]) -> DbResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let images = read_txn.open_table(TABLE_PLACE_IMAGES)?;

        Ok(read_images(&images, slug)?
            .into_iter()
            .filter(|image| !keep.contains(&image.id))
            .map(|image| image.id)
            .collect())
    }

    /// Lists every place created by `owner`, newest first
    pub fn list_places_by_owner(&self, owner: &str) -> DbResult<Vec<PlaceWithImages>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(TABLE_OWNER_INDEX)?;
        let places = read_txn.open_table(TABLE_PLACES)?;
        let images = read_txn.open_table(TABLE_PLACE_IMAGES)?;

        let (start_key, end_key) = prefix_range(owner);
        let mut results = Vec::new();

        for entry in index.range(start_key.as_str()..end_key.as_str())?.rev() {
            let (_, slug) = entry?;
            let slug = slug.value();

            // The index is written in the same transaction as the place, a miss
            // here means the record was removed out from under the index.
            let Some(place) = read_place(&places, slug)? else {
                tracing::warn!(slug, owner, "owner index points at a missing place");
                continue;
            };

            let place_images = read_images(&images, slug)?;
            results.push(PlaceWithImages {
                place,
                images: place_images,
            });
        }

        Ok(results)
    }

    pub fn find_user(&self, google_id: &str) -> DbResult<Option<UserRecord>> {
        let read_txn = self.db.begin_read()?;
        let users = read_txn.open_table(TABLE_USERS)?;

        match users.get(google_id)? {
            Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
            None => Ok(None),
        }
    }

    /// Returns the user with this subject, creating it first if needed
    ///
    /// The boolean is `true` when the user was created by this call.
    pub fn ensure_user(&self, google_id: &str) -> DbResult<(UserRecord, bool)> {
        // Returning users only need a read transaction
        if let Some(user) = self.find_user(google_id)? {
            return Ok((user, false));
        }

        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut users = write_txn.open_table(TABLE_USERS)?;

            let existing = match users.get(google_id)? {
                Some(value) => Some(serde_json::from_str::<UserRecord>(value.value())?),
                None => None,
            };

            match existing {
                Some(user) => (user, false),
                None => {
                    let user = UserRecord {
                        id: users.len()? + 1,
                        google_id: google_id.to_string(),
                        created_at: Utc::now(),
                    };
                    let user_json = serde_json::to_string(&user)?;
                    users.insert(google_id, user_json.as_str())?;
                    (user, true)
                }
            }
        };
        write_txn.commit()?;

        Ok(outcome)
    }

    /// Runs `f` inside one write transaction
    ///
    /// Every mutation made through the writer is committed together when `f`
    /// returns `Ok`, and discarded when it returns `Err`.
    pub fn write<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&PlaceWriter<'_>) -> DbResult<T>,
    {
        let write_txn = self.db.begin_write()?;
        let result = f(&PlaceWriter { txn: &write_txn });

        match result {
            Ok(value) => {
                write_txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                write_txn.abort()?;
                Err(e)
            }
        }
    }
}

/// Mutations available inside [`PlaceRepository::write`]
pub struct PlaceWriter<'txn> {
    txn: &'txn WriteTransaction,
}

impl PlaceWriter<'_> {
    /// Inserts a new place, failing with [`DbError::SlugTaken`] if the slug is in use
    pub fn create_place(&self, place: &PlaceRecord) -> DbResult<()> {
        let mut places = self.txn.open_table(TABLE_PLACES)?;
        if places.get(place.slug.as_str())?.is_some() {
            return Err(DbError::SlugTaken(place.slug.clone()));
        }

        let place_json = serde_json::to_string(place)?;
        places.insert(place.slug.as_str(), place_json.as_str())?;

        let index_key = owner_index_key(
            &place.created_by,
            place.created_at.timestamp_micros(),
            &place.slug,
        );
        let mut index = self.txn.open_table(TABLE_OWNER_INDEX)?;
        index.insert(index_key.as_str(), place.slug.as_str())?;

        Ok(())
    }

    /// Applies `changes` to the place only if it exists and belongs to `owner`
    ///
    /// Returns the number of affected places. A missing place and a place owned
    /// by someone else both yield 0.
    pub fn update_place_fields(
        &self,
        owner: &str,
        slug: &str,
        changes: PlaceChanges,
    ) -> DbResult<usize> {
        let mut places = self.txn.open_table(TABLE_PLACES)?;
        let mut place = match read_place(&places, slug)? {
            Some(place) if place.created_by == owner => place,
            _ => return Ok(0),
        };

        changes.apply(&mut place);

        let place_json = serde_json::to_string(&place)?;
        places.insert(slug, place_json.as_str())?;
        Ok(1)
    }

    /// Removes the place, its owner index entry and all its image rows
    ///
    /// Returns `false` when there was nothing to delete.
    pub fn delete_place(&self, slug: &str) -> DbResult<bool> {
        let mut places = self.txn.open_table(TABLE_PLACES)?;
        let Some(place) = read_place(&places, slug)? else {
            return Ok(false);
        };
        places.remove(slug)?;

        let index_key =
            owner_index_key(&place.created_by, place.created_at.timestamp_micros(), slug);
        let mut index = self.txn.open_table(TABLE_OWNER_INDEX)?;
        index.remove(index_key.as_str())?;

        let mut images = self.txn.open_table(TABLE_PLACE_IMAGES)?;
        let keys: Vec<String> = read_images(&images, slug)?
            .into_iter()
            .map(|image| image_key(slug, image.index))
            .collect();
        for key in &keys {
            images.remove(key.as_str())?;
        }

        Ok(true)
    }

    /// Appends image rows after the existing ones, in the given order
    pub fn add_images(
        &self,
        slug: &str,
        staged: &[StagedImage],
    ) -> DbResult<Vec<PlaceImageRecord>> {
        if staged.is_empty() {
            return Ok(Vec::new());
        }

        let mut places = self.txn.open_table(TABLE_PLACES)?;
        let mut place =
            read_place(&places, slug)?.ok_or_else(|| DbError::PlaceNotFound(slug.to_string()))?;

        let mut images = self.txn.open_table(TABLE_PLACE_IMAGES)?;
        let now = Utc::now();
        let mut added = Vec::with_capacity(staged.len());

        for image in staged {
            let record = PlaceImageRecord {
                id: image.id.clone(),
                place_slug: slug.to_string(),
                url: image.serve_url.clone(),
                index: place.next_image_index,
                created_at: now,
            };
            place.next_image_index += 1;

            let record_json = serde_json::to_string(&record)?;
            images.insert(image_key(slug, record.index).as_str(), record_json.as_str())?;
            added.push(record);
        }

        let place_json = serde_json::to_string(&place)?;
        places.insert(slug, place_json.as_str())?;

        Ok(added)
    }

    /// Deletes every image row of `slug` whose id is not in `keep`
    ///
    /// Returns the ids of the deleted rows. An empty `keep` deletes them all.
    pub fn delete_images_not_in(&self, slug: &str, keep: &[String]) -> DbResult<Vec<String>> {
        let mut images = self.txn.open_table(TABLE_PLACE_IMAGES)?;
        let doomed: Vec<PlaceImageRecord> = read_images(&images, slug)?
            .into_iter()
            .filter(|image| !keep.contains(&image.id))
            .collect();

        for image in &doomed {
            images.remove(image_key(slug, image.index).as_str())?;
        }

        Ok(doomed.into_iter().map(|image| image.id).collect())
    }
}

fn read_place(
    table: &impl ReadableTable<&'static str, &'static str>,
    slug: &str,
) -> DbResult<Option<PlaceRecord>> {
    match table.get(slug)? {
        Some(value) => Ok(Some(serde_json::from_str(value.value())?)),
        None => Ok(None),
    }
}

fn read_images(
    table: &impl ReadableTable<&'static str, &'static str>,
    slug: &str,
) -> DbResult<Vec<PlaceImageRecord>> {
    let (start_key, end_key) = prefix_range(slug);

    let mut images = Vec::new();
    for entry in table.range(start_key.as_str()..end_key.as_str())? {
        let (_, value) = entry?;
        images.push(serde_json::from_str(value.value())?);
    }
    Ok(images)
}
