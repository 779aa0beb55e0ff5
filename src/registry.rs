//! # OCI Registry Client for VM Image Pulling
//!
//! Raw HTTP client against the OCI distribution API, covering exactly the
//! three operations a pull needs:
//!
//! 1. **Token**: anonymous bearer token from the registry's `/token`
//!    endpoint, scoped to one repository. Tokens are never cached across
//!    repositories; the scope is repository-specific.
//! 2. **Manifest**: `GET /v2/<repo>/manifests/<tag>`. The response MUST be
//!    200 and MUST carry a `Docker-Content-Digest` header; that digest is
//!    the image's identity and becomes the cache directory name.
//! 3. **Blob**: `GET /v2/<repo>/blobs/<digest>`, streamed to a temporary
//!    file and renamed atomically into place, with retry/backoff.
//!
//! ## Timeouts
//!
//! Every request gets a 60-second connect timeout and a 3600-second total
//! budget, so one slow blob cannot hang a pull forever but a large disk
//! image still has room to finish. The connection pool keeps at most one
//! idle connection per host.
//!
//! ## Retry Policy
//!
//! A blob download makes up to `max_retries` attempts (default 5). After a
//! failed attempt the client sleeps `attempt × 5s` before trying again.
//! Once the budget is exhausted the download surfaces
//! [`Error::LayerDownloadFailed`] with the blob's digest.

use crate::constants::{
    DEFAULT_REGISTRY_URL, OCI_IMAGE_MANIFEST_MEDIA_TYPE, REQUEST_TIMEOUT, RESOURCE_TIMEOUT,
    RETRY_BACKOFF_UNIT,
};
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// HTTP client for one OCI registry.
///
/// Cheap to clone-by-reference behind an `Arc`; all methods take `&self`.
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
    service: String,
    backoff_unit: Duration,
}

impl RegistryClient {
    /// Creates a client against the default registry.
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_REGISTRY_URL)
    }

    /// Creates a client against a specific registry base URL.
    ///
    /// Used by tests to point at an in-process mock registry.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let service = base_url
            .split_once("://")
            .map(|(_, host)| host)
            .unwrap_or(&base_url)
            .to_string();
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(1)
            .connect_timeout(REQUEST_TIMEOUT)
            .timeout(RESOURCE_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url,
            service,
            backoff_unit: RETRY_BACKOFF_UNIT,
        })
    }

    /// Overrides the retry backoff unit (tests shrink it to milliseconds).
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Registry base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Acquires an anonymous pull token scoped to `repository`.
    ///
    /// # Errors
    ///
    /// [`Error::TokenFetchFailed`] on transport failure, non-success
    /// status, or a response body without a string `token` field.
    pub async fn acquire_token(&self, repository: &str) -> Result<String> {
        let url = format!(
            "{}/token?service={}&scope=repository:{}:pull",
            self.base_url, self.service, repository
        );
        debug!("fetching registry token for {}", repository);

        let token_failed = |reason: String| Error::TokenFetchFailed {
            repository: repository.to_string(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| token_failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(token_failed(format!("HTTP {}", response.status())));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| token_failed(e.to_string()))?;

        body.get("token")
            .and_then(|t| t.as_str())
            .map(|t| t.to_string())
            .ok_or_else(|| token_failed("response has no token field".to_string()))
    }

    /// Fetches the manifest for `repository:tag`.
    ///
    /// Returns the parsed manifest together with the server-reported
    /// `Docker-Content-Digest`, which is the only identity the engine
    /// trusts.
    ///
    /// # Errors
    ///
    /// [`Error::ManifestFetchFailed`] on transport failure, any non-200
    /// status, a missing digest header, or an unparseable body.
    pub async fn fetch_manifest(
        &self,
        repository: &str,
        tag: &str,
        token: &str,
    ) -> Result<(Manifest, String)> {
        let url = format!("{}/v2/{}/manifests/{}", self.base_url, repository, tag);
        debug!("fetching manifest {}:{}", repository, tag);

        let manifest_failed = |reason: String| Error::ManifestFetchFailed {
            repository: repository.to_string(),
            tag: tag.to_string(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("Accept", OCI_IMAGE_MANIFEST_MEDIA_TYPE)
            .send()
            .await
            .map_err(|e| manifest_failed(e.to_string()))?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(manifest_failed(format!("HTTP {}", response.status())));
        }

        let digest = response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| manifest_failed("missing Docker-Content-Digest header".to_string()))?;

        let manifest: Manifest = response
            .json()
            .await
            .map_err(|e| manifest_failed(format!("unparseable manifest body: {}", e)))?;

        Ok((manifest, digest))
    }

    /// Downloads one blob to `destination`, atomically.
    ///
    /// The body streams into a unique temp file next to `destination` and
    /// is renamed into place only once complete, so a partially written
    /// blob is never visible under the destination name.
    ///
    /// # Errors
    ///
    /// [`Error::LayerDownloadFailed`] once all `max_retries` attempts are
    /// exhausted.
    pub async fn download_blob(
        &self,
        repository: &str,
        digest: &str,
        media_type: &str,
        token: &str,
        destination: &Path,
        max_retries: u32,
    ) -> Result<()> {
        let url = format!("{}/v2/{}/blobs/{}", self.base_url, repository, digest);

        for attempt in 1..=max_retries.max(1) {
            match self
                .download_blob_attempt(&url, media_type, token, destination)
                .await
            {
                Ok(()) => {
                    debug!("downloaded blob {} (attempt {})", digest, attempt);
                    return Ok(());
                }
                Err(e) if attempt < max_retries => {
                    let backoff = self.backoff_unit * attempt;
                    warn!(
                        "blob {} attempt {}/{} failed: {}; retrying in {:?}",
                        digest, attempt, max_retries, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    warn!(
                        "blob {} failed after {} attempts: {}",
                        digest, max_retries, e
                    );
                }
            }
        }

        Err(Error::LayerDownloadFailed {
            digest: digest.to_string(),
        })
    }

    /// One streaming download attempt.
    async fn download_blob_attempt(
        &self,
        url: &str,
        media_type: &str,
        token: &str,
        destination: &Path,
    ) -> Result<()> {
        let mut response = self
            .client
            .get(url)
            .bearer_auth(token)
            .header("Accept", media_type)
            .send()
            .await?
            .error_for_status()?;

        let temp_path = destination.with_extension(format!("tmp.{}", uuid::Uuid::now_v7()));
        let mut file = tokio::fs::File::create(&temp_path).await?;

        let result: Result<()> = async {
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            drop(file);
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }

        drop(file);
        if let Err(e) = tokio::fs::rename(&temp_path, destination).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_derived_from_base_url() {
        let client = RegistryClient::with_base_url("https://ghcr.io/").unwrap();
        assert_eq!(client.base_url(), "https://ghcr.io");
        assert_eq!(client.service, "ghcr.io");
    }

    #[test]
    fn service_falls_back_to_bare_host() {
        let client = RegistryClient::with_base_url("localhost:5000").unwrap();
        assert_eq!(client.service, "localhost:5000");
    }
}
