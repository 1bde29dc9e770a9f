//! Data models for the places service
//!
//! This module defines the records persisted in the database and the
//! request/response payloads exchanged over HTTP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A latitude/longitude pair in floating point degrees
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

/// Represents a place record stored in the database
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PlaceRecord {
    /// Unique, immutable identifier (random base-36 token)
    pub slug: String,

    pub name: String,

    pub address: String,

    #[serde(default)]
    pub description: String,

    pub location: Location,

    /// Serve URL of the generated map thumbnail, `None` until first issued
    pub preview_url: Option<String>,

    /// Identity provider subject of the owning user
    pub created_by: String,

    pub created_at: DateTime<Utc>,

    /// Ordering index handed to the next image added to this place
    #[serde(default)]
    pub next_image_index: u64,
}

/// Represents one photo attached to a place
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlaceImageRecord {
    pub id: String,
    pub place_slug: String,
    /// Public serve URL of the stored asset
    pub url: String,
    /// Insertion order within the place, display order ascending
    pub index: u64,
    pub created_at: DateTime<Utc>,
}

/// A user provisioned on first sign-in
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UserRecord {
    pub id: u64,
    pub google_id: String,
    pub created_at: DateTime<Utc>,
}

/// A new image whose upload slot has been issued but whose row is not stored yet
#[derive(Debug, Clone, PartialEq)]
pub struct StagedImage {
    pub id: String,
    pub serve_url: String,
    pub upload_url: String,
}

/// A place together with its images in display order
#[derive(Debug, Clone)]
pub struct PlaceWithImages {
    pub place: PlaceRecord,
    pub images: Vec<PlaceImageRecord>,
}

/// Partial set of mutable place fields; `None` leaves the stored value untouched
#[derive(Debug, Clone, Default)]
pub struct PlaceChanges {
    pub name: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub location: Option<Location>,
    pub preview_url: Option<String>,
}

impl PlaceChanges {
    pub(crate) fn apply(self, place: &mut PlaceRecord) {
        if let Some(name) = self.name {
            place.name = name;
        }
        if let Some(address) = self.address {
            place.address = address;
        }
        if let Some(description) = self.description {
            place.description = description;
        }
        if let Some(location) = self.location {
            place.location = location;
        }
        if let Some(preview_url) = self.preview_url {
            place.preview_url = Some(preview_url);
        }
    }
}

/// A submitted image entry, either a reference to a stored image or a new upload
///
/// # Example
/// ```json
/// [
///   { "id": "0b6c5c1e-..." },
///   { "id": "tmp-1", "new": true, "file": "beach.jpg" }
/// ]
/// ```
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "ImagePayload")]
pub enum ImageEntry {
    /// Keep the stored image with this id
    Kept { id: String },
    /// Mint a new upload slot; `client_id` is the client's temporary id
    Pending { client_id: String, file: String },
}

#[derive(Deserialize)]
struct ImagePayload {
    id: String,
    #[serde(default)]
    new: bool,
    file: Option<String>,
}

impl TryFrom<ImagePayload> for ImageEntry {
    type Error = String;

    fn try_from(payload: ImagePayload) -> Result<Self, Self::Error> {
        match (payload.new, payload.file) {
            (true, Some(file)) => Ok(ImageEntry::Pending {
                client_id: payload.id,
                file,
            }),
            (true, None) => Err(format!("new image {} is missing a file name", payload.id)),
            (false, _) => Ok(ImageEntry::Kept { id: payload.id }),
        }
    }
}

/// Request payload for creating a place
///
/// # Example
/// ```json
/// {
///   "name": "Home",
///   "address": "1 Main St",
///   "description": "",
///   "location": { "lat": 40.0, "lng": -73.0 },
///   "images": [{ "id": "tmp-1", "new": true, "file": "front.jpg" }]
/// }
/// ```
#[derive(Deserialize, Debug)]
pub struct CreatePlaceRequest {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub description: String,
    pub location: Location,
    #[serde(default)]
    pub images: Vec<ImageEntry>,
}

/// Request payload for updating a place; absent fields are left untouched
#[derive(Deserialize, Debug, Default)]
pub struct UpdatePlaceRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub location: Option<Location>,
    /// `None` skips image reconciliation entirely, `Some(vec![])` removes every image
    pub images: Option<Vec<ImageEntry>>,
}

/// An image as exposed over HTTP
#[derive(Serialize, Debug, Clone)]
pub struct ImageView {
    pub id: String,
    pub url: String,
}

/// A place as exposed over HTTP
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PlaceResponse {
    pub slug: String,
    pub name: String,
    pub address: String,
    #[serde(rename = "previewURL")]
    pub preview_url: Option<String>,
    pub description: String,
    pub location: Location,
    pub images: Vec<ImageView>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<PlaceWithImages> for PlaceResponse {
    fn from(value: PlaceWithImages) -> Self {
        let PlaceWithImages { place, images } = value;
        PlaceResponse {
            slug: place.slug,
            name: place.name,
            address: place.address,
            preview_url: place.preview_url,
            description: place.description,
            location: place.location,
            images: images
                .into_iter()
                .map(|image| ImageView {
                    id: image.id,
                    url: image.url,
                })
                .collect(),
            created_by: place.created_by,
            created_at: place.created_at,
        }
    }
}

/// Response returned after updating a place
///
/// # Example
/// ```json
/// { "images": ["https://bucket/...signed"], "previewURL": null }
/// ```
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct UpdatePlaceResponse {
    /// Upload URLs for the new images, in submission order
    pub images: Vec<String>,
    /// Upload URL for the regenerated preview, `null` when the location did not change
    #[serde(rename = "previewURL")]
    pub preview_url: Option<String>,
}

/// Query string of an upload URL issued by the in-memory backend
#[derive(Deserialize, Debug)]
pub struct UploadQuery {
    #[serde(default)]
    pub upload: String,
}

/// Request payload for the OAuth code exchange
#[derive(Deserialize, Debug)]
pub struct GoogleSignInRequest {
    pub code: String,
}
