//! Database initialization and table definitions
//!
//! This module handles the setup of the embedded redb database. Records are
//! stored as JSON strings keyed by plain or composite string keys.

use redb::{Database, TableDefinition};

use crate::error::DbResult;

/// Main table for place records
///
/// Key: place slug
/// Value: JSON-serialized PlaceRecord
pub const TABLE_PLACES: TableDefinition<&str, &str> = TableDefinition::new("places_v1");

/// Images of every place
///
/// Key: composite key "{slug}:{index}" with the index zero padded to 20 digits,
/// so a range scan over "{slug}:" yields the images in insertion order
/// Value: JSON-serialized PlaceImageRecord
pub const TABLE_PLACE_IMAGES: TableDefinition<&str, &str> =
    TableDefinition::new("place_images_v1");

/// Index table for listing places by owner
///
/// Key: composite key "{owner}:{created_at_micros}:{slug}"
/// Value: place slug
///
/// Iterating the range in reverse returns an owner's places newest first.
pub const TABLE_OWNER_INDEX: TableDefinition<&str, &str> = TableDefinition::new("owner_index_v1");

/// Users keyed by identity provider subject
///
/// Key: google subject id
/// Value: JSON-serialized UserRecord
pub const TABLE_USERS: TableDefinition<&str, &str> = TableDefinition::new("users_v1");

/// Initializes the embedded database and creates required tables
///
/// # Example
///
/// ```no_run
/// # use pathtrami::database::init_db;
/// let db = init_db("data.db").expect("Failed to initialize database");
/// ```
pub fn init_db(db_path: &str) -> DbResult<Database> {
    let db = Database::create(db_path)?;

    let write_txn = db.begin_write()?;
    {
        write_txn.open_table(TABLE_PLACES)?;
        write_txn.open_table(TABLE_PLACE_IMAGES)?;
        write_txn.open_table(TABLE_OWNER_INDEX)?;
        write_txn.open_table(TABLE_USERS)?;
    }
    write_txn.commit()?;

    Ok(db)
}

pub(crate) fn image_key(slug: &str, index: u64) -> String {
    format!("{}:{:020}", slug, index)
}

/// Half-open key range covering every composite key that starts with `prefix:`
///
/// The character '{' sorts after ':' and after every digit, so it acts as an
/// exclusive upper bound.
pub(crate) fn prefix_range(prefix: &str) -> (String, String) {
    (format!("{}:", prefix), format!("{}:{{", prefix))
}

pub(crate) fn owner_index_key(owner: &str, created_at_micros: i64, slug: &str) -> String {
    format!("{}:{:020}:{}", owner, created_at_micros, slug)
}
