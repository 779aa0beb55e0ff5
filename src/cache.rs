//! # Content-Addressed Image Cache
//!
//! Stores pulled VM images on disk, keyed by the manifest digest the
//! registry reported. Each cached image lives in its own directory:
//!
//! ```text
//! <cache-root>/ghcr/<organization>/
//! └── sha256_ab12…/             (manifest id = digest with ':' → '_')
//!     ├── manifest.json         (serialized manifest)
//!     ├── metadata.json         (repository name + timestamp)
//!     ├── sha256_cd34…          (one file per layer, raw blob bytes)
//!     └── sha256_ef56…
//! ```
//!
//! ## Trust Model
//!
//! Trust is rooted in the manifest digest forming the directory name: the
//! registry's `Docker-Content-Digest` decides where an image lives, and
//! validation only checks that the stored manifest equals the requested
//! one and that every layer file exists. Layer contents are not re-hashed.
//!
//! ## Consistency
//!
//! A cache directory is never partially populated under an externally
//! visible name: [`ImageCache::prepare`] removes any prior contents before
//! the directory is repopulated, JSON files are written to a unique temp
//! path and renamed into place, and layer files are installed with the
//! same temp+rename pattern upstream. Two cached directories for the same
//! repository never outlive a successful pull; the older one is removed by
//! [`ImageCache::cleanup_old_versions`].

use crate::constants::{CACHE_REGISTRY_DIR, MANIFEST_FILE, METADATA_FILE};
use crate::error::{Error, Result};
use crate::manifest::{ImageMetadata, Manifest};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// On-disk cache of pulled images for one registry organization.
pub struct ImageCache {
    /// `<cache-root>/ghcr/<organization>`.
    root: PathBuf,
}

impl ImageCache {
    /// Opens (creating if needed) the cache for `organization` under
    /// `cache_root`.
    pub fn new(cache_root: &Path, organization: &str) -> Result<Self> {
        let root = cache_root.join(CACHE_REGISTRY_DIR).join(organization);
        fs::create_dir_all(&root).map_err(|e| Error::DirectoryCreationFailed {
            path: root.clone(),
            reason: e.to_string(),
        })?;
        debug!("image cache at {}", root.display());
        Ok(Self { root })
    }

    /// Cache root for this organization.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one cached image.
    pub fn image_cache_dir(&self, manifest_id: &str) -> PathBuf {
        self.root.join(manifest_id)
    }

    /// Path of the serialized manifest inside a cache entry.
    pub fn manifest_path(&self, manifest_id: &str) -> PathBuf {
        self.image_cache_dir(manifest_id).join(MANIFEST_FILE)
    }

    /// Path of the metadata record inside a cache entry.
    pub fn metadata_path(&self, manifest_id: &str) -> PathBuf {
        self.image_cache_dir(manifest_id).join(METADATA_FILE)
    }

    /// Path of one layer's cached blob.
    pub fn layer_path(&self, manifest_id: &str, digest: &str) -> PathBuf {
        self.image_cache_dir(manifest_id)
            .join(digest.replace(':', "_"))
    }

    /// Whether a cache entry directory exists for `manifest_id`.
    pub fn exists(&self, manifest_id: &str) -> bool {
        self.image_cache_dir(manifest_id).is_dir()
    }

    /// Checks whether the cache entry for `manifest_id` fully matches
    /// `manifest`.
    ///
    /// True iff the stored manifest deserializes, its layer list equals the
    /// requested one, and every layer file exists. No sizes or hashes are
    /// re-verified.
    pub fn validate(&self, manifest: &Manifest, manifest_id: &str) -> bool {
        let stored: Manifest = match fs::read(self.manifest_path(manifest_id))
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        {
            Some(m) => m,
            None => {
                debug!("cache miss: no readable manifest for {}", manifest_id);
                return false;
            }
        };

        if stored.layers != manifest.layers {
            debug!("cache miss: layer list changed for {}", manifest_id);
            return false;
        }

        for layer in &manifest.layers {
            if !self.layer_path(manifest_id, &layer.digest).exists() {
                debug!(
                    "cache miss: layer file {} absent for {}",
                    layer.digest, manifest_id
                );
                return false;
            }
        }

        true
    }

    /// Whether the stored manifest for `manifest_id` equals `manifest`.
    ///
    /// Unlike [`ImageCache::validate`] this ignores layer files: a
    /// matching entry with holes is still the same image, and its
    /// surviving layers are worth reusing instead of resetting the
    /// directory.
    pub fn manifest_matches(&self, manifest: &Manifest, manifest_id: &str) -> bool {
        fs::read(self.manifest_path(manifest_id))
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Manifest>(&bytes).ok())
            .is_some_and(|stored| stored.layers == manifest.layers)
    }

    /// Resets the cache entry for `manifest_id` to an empty directory.
    ///
    /// Idempotent: any existing contents are removed first.
    pub async fn prepare(&self, manifest_id: &str) -> Result<()> {
        let dir = self.image_cache_dir(manifest_id);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        tokio::fs::create_dir_all(&dir).await?;
        Ok(())
    }

    /// Atomically writes the manifest file for `manifest_id`.
    pub async fn save_manifest(&self, manifest_id: &str, manifest: &Manifest) -> Result<()> {
        self.write_json(&self.manifest_path(manifest_id), manifest)
            .await
    }

    /// Atomically writes the metadata record for `manifest_id`.
    pub async fn save_metadata(&self, manifest_id: &str, metadata: &ImageMetadata) -> Result<()> {
        self.write_json(&self.metadata_path(manifest_id), metadata)
            .await
    }

    /// Installs `source` as the cached blob for `digest`, replacing any
    /// prior file.
    ///
    /// The copy lands under a unique temp name and is renamed into place,
    /// so a concurrent reader never observes a half-written layer.
    pub async fn replace_layer(
        &self,
        manifest_id: &str,
        digest: &str,
        source: &Path,
    ) -> Result<PathBuf> {
        let path = self.layer_path(manifest_id, digest);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::now_v7()));
        tokio::fs::copy(source, &temp_path)
            .await
            .map_err(|e| Error::CacheWriteFailed {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(Error::CacheWriteFailed {
                path,
                reason: e.to_string(),
            });
        }
        Ok(path)
    }

    /// Removes every sibling cache entry for `repository` other than
    /// `current_manifest_id`.
    ///
    /// Only directories with a readable metadata record naming the same
    /// repository are touched; anything else is preserved.
    pub async fn cleanup_old_versions(
        &self,
        current_manifest_id: &str,
        repository: &str,
    ) -> Result<()> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot scan cache root {}: {}", self.root.display(), e);
                return Ok(());
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name == current_manifest_id {
                continue;
            }

            let metadata: ImageMetadata = match fs::read(path.join(METADATA_FILE))
                .ok()
                .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            {
                Some(m) => m,
                // No metadata record: not ours to delete.
                None => continue,
            };

            if metadata.image == repository {
                info!("removing old cached version {} of {}", name, repository);
                tokio::fs::remove_dir_all(&path).await?;
            }
        }

        Ok(())
    }

    /// Writes `value` as JSON to `path` via a unique temp file + rename.
    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let temp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::now_v7()));
        tokio::fs::write(&temp_path, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(Error::CacheWriteFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
        Ok(())
    }
}
