//! Shared test fixtures: an in-process mock OCI registry.
//!
//! Serves the three endpoints the engine touches (token, manifests,
//! blobs) on an ephemeral localhost port, with per-blob hit counters and
//! scriptable failures for retry tests.

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
struct StoredManifest {
    digest: String,
    body: String,
}

#[derive(Default)]
struct MockState {
    manifests: Mutex<HashMap<String, StoredManifest>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    blob_hits: Mutex<HashMap<String, usize>>,
    blob_failures: Mutex<HashMap<String, usize>>,
    token_hits: AtomicUsize,
    omit_digest_header: AtomicBool,
    break_token: AtomicBool,
}

/// In-process OCI registry on an ephemeral port.
pub struct MockRegistry {
    pub base_url: String,
    state: Arc<MockState>,
}

impl MockRegistry {
    /// Starts the registry and returns once it is accepting connections.
    pub async fn start() -> Self {
        let state = Arc::new(MockState::default());

        let app = Router::new()
            .route("/token", get(token_handler))
            .route("/v2/:org/:repo/manifests/:tag", get(manifest_handler))
            .route("/v2/:org/:repo/blobs/:digest", get(blob_handler))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock registry");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve mock registry");
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    /// Registers an image whose layers are `(media_type, content)` pairs.
    ///
    /// Returns the manifest digest the registry will report.
    pub fn add_image(&self, repository: &str, tag: &str, layers: &[(&str, &[u8])]) -> String {
        let mut layer_entries = Vec::new();
        for (media_type, content) in layers {
            let digest = blob_digest(content);
            self.state
                .blobs
                .lock()
                .unwrap()
                .insert(digest.clone(), content.to_vec());
            layer_entries.push(serde_json::json!({
                "mediaType": media_type,
                "digest": digest,
                "size": content.len(),
            }));
        }

        let body = serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "layers": layer_entries,
        })
        .to_string();
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(body.as_bytes())));

        self.state.manifests.lock().unwrap().insert(
            format!("{}:{}", repository, tag),
            StoredManifest {
                digest: digest.clone(),
                body,
            },
        );
        digest
    }

    /// Registers a blob without a manifest.
    pub fn add_blob(&self, content: &[u8]) -> String {
        let digest = blob_digest(content);
        self.state
            .blobs
            .lock()
            .unwrap()
            .insert(digest.clone(), content.to_vec());
        digest
    }

    /// Registers a manifest with an exact body, for digest-identity tests.
    pub fn add_manifest_body(&self, repository: &str, tag: &str, body: &str) -> String {
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(body.as_bytes())));
        self.state.manifests.lock().unwrap().insert(
            format!("{}:{}", repository, tag),
            StoredManifest {
                digest: digest.clone(),
                body: body.to_string(),
            },
        );
        digest
    }

    /// Makes the next `times` GETs of `digest` return HTTP 500.
    pub fn fail_blob(&self, digest: &str, times: usize) {
        self.state
            .blob_failures
            .lock()
            .unwrap()
            .insert(digest.to_string(), times);
    }

    /// When set, manifest responses omit `Docker-Content-Digest`.
    pub fn omit_digest_header(&self, omit: bool) {
        self.state.omit_digest_header.store(omit, Ordering::SeqCst);
    }

    /// When set, the token endpoint answers without a `token` field.
    pub fn break_token(&self, broken: bool) {
        self.state.break_token.store(broken, Ordering::SeqCst);
    }

    /// GET count for one blob digest (failures included).
    pub fn blob_gets(&self, digest: &str) -> usize {
        self.state
            .blob_hits
            .lock()
            .unwrap()
            .get(digest)
            .copied()
            .unwrap_or(0)
    }

    /// GET count across all blobs.
    pub fn total_blob_gets(&self) -> usize {
        self.state.blob_hits.lock().unwrap().values().sum()
    }

    /// Requests seen by the token endpoint.
    pub fn token_requests(&self) -> usize {
        self.state.token_hits.load(Ordering::SeqCst)
    }
}

/// Digest string (`sha256:<hex>`) for a blob's content.
pub fn blob_digest(content: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content)))
}

async fn token_handler(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    state.token_hits.fetch_add(1, Ordering::SeqCst);
    if state.break_token.load(Ordering::SeqCst) {
        return axum::Json(serde_json::json!({ "detail": "no token for you" }));
    }
    axum::Json(serde_json::json!({ "token": "test-token" }))
}

async fn manifest_handler(
    State(state): State<Arc<MockState>>,
    Path((org, repo, tag)): Path<(String, String, String)>,
) -> impl IntoResponse {
    let key = format!("{}/{}:{}", org, repo, tag);
    let stored = state.manifests.lock().unwrap().get(&key).cloned();
    match stored {
        Some(manifest) => {
            let mut headers = axum::http::HeaderMap::new();
            if !state.omit_digest_header.load(Ordering::SeqCst) {
                headers.insert(
                    "Docker-Content-Digest",
                    manifest.digest.parse().expect("digest header value"),
                );
            }
            (StatusCode::OK, headers, manifest.body).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn blob_handler(
    State(state): State<Arc<MockState>>,
    Path((_org, _repo, digest)): Path<(String, String, String)>,
) -> impl IntoResponse {
    *state
        .blob_hits
        .lock()
        .unwrap()
        .entry(digest.clone())
        .or_insert(0) += 1;

    {
        let mut failures = state.blob_failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(&digest) {
            if *remaining > 0 {
                *remaining -= 1;
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    let blob = state.blobs.lock().unwrap().get(&digest).cloned();
    match blob {
        Some(bytes) => (StatusCode::OK, bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
