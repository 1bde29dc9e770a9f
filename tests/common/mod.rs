//! Shared helpers for the integration tests
#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::NamedTempFile;
use tower::ServiceExt;

use pathtrami::database::init_db;
use pathtrami::error::{IdentityError, StorageError, StorageResult};
use pathtrami::identity::{IdentityProvider, TokenSet};
use pathtrami::repository::PlaceRepository;
use pathtrami::route::{create_app, object_routes};
use pathtrami::state::AppState;
use pathtrami::storage::{MemoryStore, ObjectStore, UploadSlot};

/// Origin the test server pretends to run on
pub const ORIGIN: &str = "http://localhost:8080";
/// Public base URL of the in-memory object store, served by the app itself
pub const CDN: &str = "http://localhost:8080/objects";

/// Token whose verification fails because the provider is down
pub const OUTAGE_TOKEN: &str = "provider-down";

/// Identity provider where `code-{sub}`, `refresh-{sub}` and `id-{sub}` are
/// valid for any subject
pub struct StaticIdentity;

fn tokens_for(subject: &str) -> TokenSet {
    TokenSet {
        access_token: format!("access-{}", subject),
        refresh_token: Some(format!("refresh-{}", subject)),
        id_token: Some(format!("id-{}", subject)),
        expires_in: Some(3599),
        token_type: Some("Bearer".to_string()),
        scope: None,
    }
}

fn rejected() -> IdentityError {
    IdentityError::Provider {
        status: 400,
        body: "invalid_grant".to_string(),
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn exchange_code(&self, code: &str) -> Result<TokenSet, IdentityError> {
        code.strip_prefix("code-").map(tokens_for).ok_or_else(rejected)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, IdentityError> {
        refresh_token
            .strip_prefix("refresh-")
            .map(tokens_for)
            .ok_or_else(rejected)
    }

    async fn verify_id_token(&self, id_token: &str) -> Result<String, IdentityError> {
        if id_token == OUTAGE_TOKEN {
            return Err(IdentityError::Provider {
                status: 503,
                body: "backend error".to_string(),
            });
        }
        id_token
            .strip_prefix("id-")
            .map(str::to_string)
            .ok_or_else(|| IdentityError::InvalidToken("unknown token".to_string()))
    }
}

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    _temp_db: NamedTempFile,
}

/// Which storage calls a [`FaultyStore`] fails
#[derive(Clone, Copy, PartialEq)]
pub enum Fault {
    Deletes,
    ImageSlots,
}

/// Object store that fails one kind of call and forwards the rest
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    fault: Fault,
}

fn unavailable() -> StorageError {
    StorageError::Backend(opendal::Error::new(
        opendal::ErrorKind::Unexpected,
        "bucket unavailable",
    ))
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn issue_upload_slot(&self, key: &str) -> StorageResult<UploadSlot> {
        if self.fault == Fault::ImageSlots && key.contains("/images/") {
            return Err(unavailable());
        }
        self.inner.issue_upload_slot(key).await
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        if self.fault == Fault::Deletes {
            return Err(unavailable());
        }
        self.inner.delete_object(key).await
    }

    async fn delete_objects_by_prefix(&self, prefix: &str) -> StorageResult<Option<usize>> {
        if self.fault == Fault::Deletes {
            return Err(unavailable());
        }
        self.inner.delete_objects_by_prefix(prefix).await
    }
}

/// Creates a test application with a temporary database and in-memory storage
pub fn setup_test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new(CDN));
    let storage: Arc<dyn ObjectStore> = store.clone();
    build_test_app(store, storage)
}

/// Like [`setup_test_app`], but storage calls matching `fault` fail
pub fn setup_faulty_app(fault: Fault) -> TestApp {
    let store = Arc::new(MemoryStore::new(CDN));
    let storage: Arc<dyn ObjectStore> = Arc::new(FaultyStore {
        inner: store.clone(),
        fault,
    });
    build_test_app(store, storage)
}

fn build_test_app(store: Arc<MemoryStore>, storage: Arc<dyn ObjectStore>) -> TestApp {
    let temp_db = NamedTempFile::new().expect("Failed to create temp file");
    let db = init_db(temp_db.path().to_str().unwrap()).expect("Failed to initialize test database");

    let state = AppState {
        repo: PlaceRepository::new(Arc::new(db)),
        storage,
        identity: Arc::new(StaticIdentity),
    };

    TestApp {
        app: create_app(state.clone()).merge(object_routes(store.clone())),
        state,
        store,
        _temp_db: temp_db,
    }
}

/// Request target of an absolute URL issued by the test server
pub fn path_of(url: &str) -> &str {
    url.strip_prefix(ORIGIN).expect("URL not served by the test app")
}

/// Bearer header value for `subject`
pub fn bearer(subject: &str) -> String {
    format!("Bearer id-{}", subject)
}

impl TestApp {
    /// Sends one request and returns the status and JSON body (`Null` if empty)
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        authorization: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(value) = authorization {
            builder = builder.header("Authorization", value);
        }

        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("Failed to parse JSON")
        };
        (status, json)
    }

    /// Sends a raw body and returns the status and the response bytes
    pub async fn send_bytes(&self, method: &str, uri: &str, body: &[u8]) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_vec()))
            .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();
        (status, bytes.to_vec())
    }

    /// Simulates the client uploading to every URL of a create response
    pub fn upload_created(&self, created: &Value) {
        let slug = created["slug"].as_str().unwrap();
        self.store
            .put(&format!("places/{}/preview", slug), "png");
        for image in created["images"].as_array().unwrap() {
            let id = image["id"].as_str().unwrap();
            self.store
                .put(&format!("places/{}/images/{}", slug, id), "jpg");
        }
    }
}
