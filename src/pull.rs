//! # Pull Orchestration
//!
//! The top-level operation of the engine: resolve an image reference to a
//! manifest, satisfy it from cache or registry, assemble the artifact
//! tree in a staging directory, and install it atomically as the VM's
//! home.
//!
//! ## Flow
//!
//! ```text
//! pull("repo:tag", name?, location?)
//!   ├── parse reference, resolve VM directory
//!   ├── token + manifest  → manifest id (digest, filesystem-safe)
//!   ├── cache hit?
//!   │     ├── yes: stage artifacts straight from cache
//!   │     └── no:  cleanup old versions, prepare entry,
//!   │              download layers (bounded, single-flight),
//!   │              reassemble split disk
//!   └── install staging → VM directory (atomic replace)
//! ```
//!
//! Multiple pulls in one process share the cache and the single-flight
//! tracker, so concurrent pulls of the same image fetch each blob once.

use crate::assemble::assemble_parts;
use crate::cache::ImageCache;
use crate::constants::DISK_IMAGE_FILE;
use crate::error::{Error, Result};
use crate::flight::FlightTracker;
use crate::index;
use crate::manifest::{manifest_id, CachedImage, ImageMetadata, LayerRole, Manifest};
use crate::materialize::install_tree;
use crate::memory::{HostMemoryProbe, MemoryProbe};
use crate::registry::RegistryClient;
use crate::scheduler::{download_layers, DiskPart, DownloadContext};
use crate::vmdir::{expand_tilde, SettingsStore, VmDirectoryProvider};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Summary of one completed pull.
#[derive(Debug, Clone)]
pub struct PulledImage {
    /// Repository name without tag.
    pub repository: String,
    /// Cache identity of the pulled manifest.
    pub manifest_id: String,
    /// Where the VM now lives.
    pub vm_directory: PathBuf,
    /// Artifact file names installed in the VM directory.
    pub files: Vec<String>,
    /// Total installed bytes.
    pub total_bytes: u64,
}

/// VM image puller over one registry organization.
///
/// Thread-safe; a single instance is meant to serve every pull in the
/// process so the cache and single-flight coordination are shared.
pub struct ImagePuller {
    registry: Arc<RegistryClient>,
    cache: Arc<ImageCache>,
    flight: Arc<FlightTracker>,
    probe: Arc<dyn MemoryProbe>,
    vm_dirs: Arc<dyn VmDirectoryProvider>,
    organization: String,
    /// One lock per manifest id; concurrent pulls of the same image
    /// serialize on it so the second becomes a cache hit instead of a
    /// racing rebuild of the same entry.
    entry_locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ImagePuller {
    /// Creates a puller from settings, against the default registry.
    pub fn new(
        settings: &dyn SettingsStore,
        vm_dirs: Arc<dyn VmDirectoryProvider>,
        organization: impl Into<String>,
    ) -> Result<Self> {
        let organization = organization.into();
        let cache_root = expand_tilde(&settings.cache_directory());
        Ok(Self {
            registry: Arc::new(RegistryClient::new()?),
            cache: Arc::new(ImageCache::new(&cache_root, &organization)?),
            flight: Arc::new(FlightTracker::new()),
            probe: Arc::new(HostMemoryProbe::new()),
            vm_dirs,
            organization,
            entry_locks: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Creates a puller from explicit components.
    ///
    /// Lets tests point at a mock registry and pin the memory probe.
    pub fn with_components(
        registry: Arc<RegistryClient>,
        cache: Arc<ImageCache>,
        flight: Arc<FlightTracker>,
        probe: Arc<dyn MemoryProbe>,
        vm_dirs: Arc<dyn VmDirectoryProvider>,
        organization: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            cache,
            flight,
            probe,
            vm_dirs,
            organization: organization.into(),
            entry_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// The image cache backing this puller.
    pub fn cache(&self) -> &Arc<ImageCache> {
        &self.cache
    }

    /// Lists every image in the cache, sorted by (repository, image id).
    pub fn list_images(&self) -> Result<Vec<CachedImage>> {
        index::list_images(&self.cache)
    }

    /// Pulls `image` (`repo:tag`) and installs it as VM `name`.
    ///
    /// With no `name` the repository name is used. `location` selects a
    /// named VM storage location from the directory provider.
    pub async fn pull(
        &self,
        image: &str,
        name: Option<&str>,
        location: Option<&str>,
    ) -> Result<PulledImage> {
        let (repo, tag) = parse_image_reference(image)?;
        let vm_name = name.unwrap_or(repo);
        let vm_dir = self.vm_dirs.vm_directory(vm_name, location)?;
        let repository = format!("{}/{}", self.organization, repo);

        info!("pulling {}:{} into {}", repository, tag, vm_name);

        let token = self.registry.acquire_token(&repository).await?;
        let (manifest, digest) = self.registry.fetch_manifest(&repository, tag, &token).await?;
        let id = manifest_id(&digest);

        let staging = tempfile::Builder::new().prefix("vmpull-").tempdir()?;

        {
            let entry_lock = self.entry_lock(&id);
            let _guard = entry_lock.lock().await;

            if self.cache.validate(&manifest, &id) {
                info!("image {} found in cache", id);
                self.stage_from_cache(&manifest, &id, staging.path()).await?;
            } else {
                info!("image {} not cached, downloading", id);
                self.stage_from_registry(&manifest, &id, repo, &repository, &token, staging.path())
                    .await?;
            }
        }

        install_tree(staging.path(), vm_dir.path()).await?;

        let (files, total_bytes) = installed_artifacts(vm_dir.path())?;
        info!(
            "pulled {}:{} ({} files, {} bytes)",
            repository,
            tag,
            files.len(),
            total_bytes
        );
        Ok(PulledImage {
            repository: repo.to_string(),
            manifest_id: id,
            vm_directory: vm_dir.path().to_path_buf(),
            files,
            total_bytes,
        })
    }

    /// Lock guarding the cache entry for one manifest id.
    fn entry_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.entry_locks.lock().expect("entry lock map poisoned");
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    /// Cache hit: compose the artifact tree from cached layer files only.
    async fn stage_from_cache(
        &self,
        manifest: &Manifest,
        id: &str,
        staging: &Path,
    ) -> Result<()> {
        let mut parts = Vec::new();
        let mut total_parts = 0u64;
        let mut expected_size = 0u64;

        for layer in &manifest.layers {
            match layer.role() {
                LayerRole::DiskPart { number, total } => {
                    parts.push(DiskPart {
                        number,
                        source: self.cache.layer_path(id, &layer.digest),
                    });
                    total_parts = total;
                    expected_size += layer.size;
                }
                role => {
                    if let Some(file_name) = role.file_name() {
                        tokio::fs::copy(
                            self.cache.layer_path(id, &layer.digest),
                            staging.join(file_name),
                        )
                        .await?;
                    }
                }
            }
        }

        if !parts.is_empty() {
            assemble_parts(
                &parts,
                total_parts,
                &staging.join(DISK_IMAGE_FILE),
                expected_size,
                self.probe.as_ref(),
            )
            .await?;
        }
        Ok(())
    }

    /// Cache miss: reset the entry, download all layers, assemble.
    async fn stage_from_registry(
        &self,
        manifest: &Manifest,
        id: &str,
        repo: &str,
        repository: &str,
        token: &str,
        staging: &Path,
    ) -> Result<()> {
        self.cache.cleanup_old_versions(id, repo).await?;
        // A same-manifest entry with missing layer files keeps its
        // survivors; only an alien or corrupt entry is reset wholesale.
        if !self.cache.manifest_matches(manifest, id) {
            self.cache.prepare(id).await?;
        }
        self.cache.save_manifest(id, manifest).await?;
        self.cache
            .save_metadata(
                id,
                &ImageMetadata {
                    image: repo.to_string(),
                    manifest_id: id.to_string(),
                    timestamp: Utc::now(),
                },
            )
            .await?;

        let ctx = DownloadContext {
            registry: Arc::clone(&self.registry),
            cache: Arc::clone(&self.cache),
            flight: Arc::clone(&self.flight),
            probe: Arc::clone(&self.probe),
        };
        let outcome = download_layers(&ctx, manifest, id, repository, token, staging).await?;

        if !outcome.disk_parts.is_empty() {
            assemble_parts(
                &outcome.disk_parts,
                outcome.total_parts,
                &staging.join(DISK_IMAGE_FILE),
                outcome.expected_disk_size,
                self.probe.as_ref(),
            )
            .await?;

            // Part blobs staged under digest names are spent; only the
            // assembled disk belongs in the installed tree.
            for part in &outcome.disk_parts {
                if part.source.starts_with(staging) {
                    tokio::fs::remove_file(&part.source).await?;
                }
            }
        }
        Ok(())
    }
}

/// Splits `repo:tag`, requiring exactly two non-empty components.
fn parse_image_reference(image: &str) -> Result<(&str, &str)> {
    let invalid = || Error::InvalidImageFormat {
        image: image.to_string(),
    };
    let (repo, tag) = image.split_once(':').ok_or_else(invalid)?;
    if repo.is_empty() || tag.is_empty() || tag.contains(':') {
        return Err(invalid());
    }
    Ok((repo, tag))
}

/// Names and total size of the files installed in a VM directory.
fn installed_artifacts(vm_dir: &Path) -> Result<(Vec<String>, u64)> {
    let mut files = Vec::new();
    let mut total = 0u64;
    for entry in std::fs::read_dir(vm_dir)?.flatten() {
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            files.push(entry.file_name().to_string_lossy().to_string());
            total += metadata.len();
        }
    }
    files.sort();
    debug!("installed artifacts: {:?}", files);
    Ok((files, total))
}
