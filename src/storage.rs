//! Object storage gateway
//!
//! Binary assets (photos and the map preview) never pass through this service.
//! Instead the gateway hands out short-lived pre-authorized upload URLs and the
//! stable public URL the asset will be served from. Objects are keyed under
//! `places/{slug}/...` so a whole place can be swept by prefix.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use opendal::{services, Operator};
use parking_lot::Mutex;

use crate::error::StorageResult;

/// Pre-authorized write location plus the public read location of one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSlot {
    pub upload_url: String,
    pub serve_url: String,
}

/// Capability interface over an object storage backend
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Issues a pre-authorized upload URL for `key`
    ///
    /// Content validation is left to the backend's pre-signed URL policy.
    async fn issue_upload_slot(&self, key: &str) -> StorageResult<UploadSlot>;

    /// Deletes one object. Deleting a missing key is not an error.
    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    /// Deletes a known set of keys concurrently
    async fn delete_objects(&self, keys: &[String]) -> StorageResult<()> {
        try_join_all(keys.iter().map(|key| self.delete_object(key))).await?;
        Ok(())
    }

    /// Deletes every object under `prefix`, returning how many were removed
    ///
    /// Backends without listing support return `Ok(None)`; callers must then
    /// rely on [`ObjectStore::delete_objects`] with the keys they know about.
    async fn delete_objects_by_prefix(&self, _prefix: &str) -> StorageResult<Option<usize>> {
        Ok(None)
    }
}

pub fn place_prefix(slug: &str) -> String {
    format!("places/{}", slug)
}

pub fn place_image_key(slug: &str, image_id: &str) -> String {
    format!("{}/images/{}", place_prefix(slug), image_id)
}

pub fn place_preview_key(slug: &str) -> String {
    format!("{}/preview", place_prefix(slug))
}

fn serve_url(public_base_url: &str, key: &str) -> String {
    format!("{}/{}", public_base_url.trim_end_matches('/'), key)
}

/// S3 compatible backend (AWS S3, Cloudflare R2) driven through opendal
pub struct OpendalStore {
    op: Operator,
    public_base_url: String,
    upload_ttl: Duration,
}

/// Connection settings for [`OpendalStore::s3`]
#[derive(Debug, Clone)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl OpendalStore {
    pub fn s3(
        settings: &S3Settings,
        public_base_url: String,
        upload_ttl: Duration,
    ) -> StorageResult<Self> {
        let mut builder = services::S3::default()
            .bucket(&settings.bucket)
            .region(&settings.region)
            .access_key_id(&settings.access_key_id)
            .secret_access_key(&settings.secret_access_key);

        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint(endpoint);
        }

        let op = Operator::new(builder)?.finish();
        Ok(Self::new(op, public_base_url, upload_ttl))
    }

    pub fn new(op: Operator, public_base_url: String, upload_ttl: Duration) -> Self {
        Self {
            op,
            public_base_url,
            upload_ttl,
        }
    }
}

#[async_trait]
impl ObjectStore for OpendalStore {
    async fn issue_upload_slot(&self, key: &str) -> StorageResult<UploadSlot> {
        let request = self.op.presign_write(key, self.upload_ttl).await?;

        Ok(UploadSlot {
            upload_url: request.uri().to_string(),
            serve_url: serve_url(&self.public_base_url, key),
        })
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.op.delete(key).await?;
        Ok(())
    }

    async fn delete_objects_by_prefix(&self, prefix: &str) -> StorageResult<Option<usize>> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        let entries = self.op.list_with(&dir).recursive(true).await?;

        let keys: Vec<String> = entries
            .into_iter()
            .filter(|entry| entry.metadata().is_file())
            .map(|entry| entry.path().to_string())
            .collect();

        self.delete_objects(&keys).await?;
        Ok(Some(keys.len()))
    }
}

/// In-process object store for local development and tests
///
/// Upload slots do not create objects. Clients upload through
/// [`MemoryStore::accept_upload`], which needs the token of the most recent
/// slot issued for the key; tests can write directly with [`MemoryStore::put`].
pub struct MemoryStore {
    public_base_url: String,
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Outstanding upload token per key
    uploads: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new(public_base_url: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.into(),
            objects: Mutex::new(BTreeMap::new()),
            uploads: Mutex::new(HashMap::new()),
        }
    }

    pub fn put(&self, key: &str, bytes: impl Into<Vec<u8>>) {
        self.objects.lock().insert(key.to_string(), bytes.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().contains_key(key)
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.objects
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().get(key).cloned()
    }

    /// Stores `bytes` under `key` if `token` belongs to the latest upload slot
    /// issued for it. Each token is good for one upload.
    pub fn accept_upload(&self, key: &str, token: &str, bytes: Vec<u8>) -> bool {
        let mut uploads = self.uploads.lock();
        match uploads.get(key) {
            Some(expected) if !token.is_empty() && expected == token => {
                uploads.remove(key);
            }
            _ => return false,
        }
        drop(uploads);

        self.put(key, bytes);
        true
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn issue_upload_slot(&self, key: &str) -> StorageResult<UploadSlot> {
        let serve_url = serve_url(&self.public_base_url, key);
        let token = uuid::Uuid::new_v4().to_string();
        let upload_url = format!("{}?upload={}", serve_url, token);
        self.uploads.lock().insert(key.to_string(), token);

        Ok(UploadSlot {
            upload_url,
            serve_url,
        })
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.objects.lock().remove(key);
        self.uploads.lock().remove(key);
        Ok(())
    }

    async fn delete_objects_by_prefix(&self, prefix: &str) -> StorageResult<Option<usize>> {
        let dir = format!("{}/", prefix.trim_end_matches('/'));
        self.uploads.lock().retain(|key, _| !key.starts_with(&dir));

        let mut objects = self.objects.lock();
        let before = objects.len();
        objects.retain(|key, _| !key.starts_with(&dir));
        Ok(Some(before - objects.len()))
    }
}
