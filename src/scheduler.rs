//! # Parallel Layer Download Scheduler
//!
//! Fans the manifest's layers out across a bounded task group (at most 5
//! downloads in flight per pull) and lands every byte twice: once in the
//! per-pull staging directory and once in the content-addressed cache.
//!
//! Per layer, the scheduler prefers the cheapest source that preserves
//! correctness:
//!
//! 1. Cached blob present and the host is not memory-constrained → copy
//!    cache → staging.
//! 2. Cached blob present, host constrained, layer is a disk part → hand
//!    the reassembler the cache file itself (no copy).
//! 3. Another task is fetching this digest → wait on the single-flight
//!    mark, then consume the cached result if it appeared.
//! 4. Otherwise download into staging, then promote staging → cache.
//!
//! The first task error cancels the whole group; the caller discards the
//! staging directory.

use crate::cache::ImageCache;
use crate::constants::{DEFAULT_DOWNLOAD_RETRIES, MAX_CONCURRENT_DOWNLOADS};
use crate::error::{Error, Result};
use crate::flight::FlightTracker;
use crate::manifest::{Layer, LayerRole, Manifest};
use crate::memory::MemoryProbe;
use crate::progress::ProgressTracker;
use crate::registry::RegistryClient;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// One disk part ready for reassembly.
///
/// `source` points into the staging directory (ephemeral) or into the
/// cache (must not be deleted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskPart {
    /// 1-based part number from the layer's media type.
    pub number: u64,
    /// File holding this part's bytes.
    pub source: PathBuf,
}

/// What the download phase produced.
#[derive(Debug)]
pub struct DownloadOutcome {
    /// Disk parts in completion order; empty for single-file disks.
    pub disk_parts: Vec<DiskPart>,
    /// Advertised part count, 0 when the disk is not split.
    pub total_parts: u64,
    /// Sum of the part layer sizes.
    pub expected_disk_size: u64,
}

/// Shared handles every download task needs.
#[derive(Clone)]
pub struct DownloadContext {
    pub registry: Arc<RegistryClient>,
    pub cache: Arc<ImageCache>,
    pub flight: Arc<FlightTracker>,
    pub probe: Arc<dyn MemoryProbe>,
}

/// Downloads every layer of `manifest` into `staging` (and the cache).
///
/// Layers with the empty or an unrecognized media type are skipped. The
/// returned outcome carries the disk-part list for the reassembler; for
/// whole-file layers the staging file is authoritative.
pub async fn download_layers(
    ctx: &DownloadContext,
    manifest: &Manifest,
    manifest_id: &str,
    repository: &str,
    token: &str,
    staging: &Path,
) -> Result<DownloadOutcome> {
    let mut work = Vec::new();
    let mut total_parts = 0u64;
    let mut expected_disk_size = 0u64;

    for layer in &manifest.layers {
        let role = layer.role();
        match role {
            LayerRole::Skip => continue,
            LayerRole::Ignored => {
                debug!("ignoring layer with media type {}", layer.media_type);
                continue;
            }
            LayerRole::DiskPart { total, .. } => {
                if total_parts != 0 && total_parts != total {
                    warn!(
                        "disk parts disagree on total: {} then {}",
                        total_parts, total
                    );
                }
                total_parts = total;
                expected_disk_size += layer.size;
            }
            _ => {}
        }
        work.push((layer.clone(), role));
    }

    let progress = Arc::new(ProgressTracker::new(
        work.iter().map(|(layer, _)| layer.size).sum(),
    ));
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_DOWNLOADS));
    let mut tasks: JoinSet<Result<Option<DiskPart>>> = JoinSet::new();

    for (layer, role) in work {
        let staging_path = match role.file_name() {
            Some(name) => staging.join(name),
            // Disk parts stage under their digest name; several parts
            // feed one output file later.
            None => staging.join(layer.cache_file_name()),
        };
        let ctx = ctx.clone();
        let progress = Arc::clone(&progress);
        let semaphore = Arc::clone(&semaphore);
        let manifest_id = manifest_id.to_string();
        let repository = repository.to_string();
        let token = token.to_string();

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| Error::TaskFailed(e.to_string()))?;
            fetch_layer(
                &ctx,
                &layer,
                role,
                &manifest_id,
                &repository,
                &token,
                &staging_path,
                &progress,
            )
            .await
        });
    }

    let mut disk_parts = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(Some(part))) => disk_parts.push(part),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                tasks.abort_all();
                return Err(e);
            }
            Err(e) => {
                tasks.abort_all();
                return Err(Error::TaskFailed(e.to_string()));
            }
        }
    }

    Ok(DownloadOutcome {
        disk_parts,
        total_parts,
        expected_disk_size,
    })
}

/// Fetches one layer into `staging_path`, preferring cache over network.
#[allow(clippy::too_many_arguments)]
async fn fetch_layer(
    ctx: &DownloadContext,
    layer: &Layer,
    role: LayerRole,
    manifest_id: &str,
    repository: &str,
    token: &str,
    staging_path: &Path,
    progress: &ProgressTracker,
) -> Result<Option<DiskPart>> {
    let cached = ctx.cache.layer_path(manifest_id, &layer.digest);
    let part_number = match role {
        LayerRole::DiskPart { number, .. } => Some(number),
        _ => None,
    };

    if cached.exists() {
        if let Some(part) =
            consume_cached(&cached, staging_path, part_number, layer, ctx, progress).await?
        {
            return Ok(part);
        }
    }

    if ctx.flight.is_downloading(&layer.digest) {
        ctx.flight.wait_for(&layer.digest, &cached).await;
        if cached.exists() {
            if let Some(part) =
                consume_cached(&cached, staging_path, part_number, layer, ctx, progress).await?
            {
                return Ok(part);
            }
        }
        // The other task failed without producing a file; fetch it ourselves.
    }

    ctx.flight.mark_started(&layer.digest);
    let result: Result<()> = async {
        ctx.registry
            .download_blob(
                repository,
                &layer.digest,
                &layer.media_type,
                token,
                staging_path,
                DEFAULT_DOWNLOAD_RETRIES,
            )
            .await?;
        ctx.cache
            .replace_layer(manifest_id, &layer.digest, staging_path)
            .await?;
        Ok(())
    }
    .await;
    // Clear the mark on every path so waiters wake even after a failure.
    ctx.flight.mark_complete(&layer.digest);
    result?;

    progress.add(layer.size).await;
    Ok(part_number.map(|number| DiskPart {
        number,
        source: staging_path.to_path_buf(),
    }))
}

/// Serves a layer from its cached blob if the memory policy allows.
///
/// Returns `Some(...)` when the cached file satisfied the layer, `None`
/// when the caller must fall through to the download path (constrained
/// host and a whole-file layer, which is always re-fetched).
async fn consume_cached(
    cached: &Path,
    staging_path: &Path,
    part_number: Option<u64>,
    layer: &Layer,
    ctx: &DownloadContext,
    progress: &ProgressTracker,
) -> Result<Option<Option<DiskPart>>> {
    let constrained = ctx.probe.memory_constrained();

    if !constrained {
        debug!("layer {} served from cache", layer.digest);
        tokio::fs::copy(cached, staging_path).await?;
        progress.add(layer.size).await;
        return Ok(Some(part_number.map(|number| DiskPart {
            number,
            source: staging_path.to_path_buf(),
        })));
    }

    if let Some(number) = part_number {
        // Constrained host: feed the reassembler the cache file directly.
        debug!("layer {} referenced in cache (no copy)", layer.digest);
        progress.add(layer.size).await;
        return Ok(Some(Some(DiskPart {
            number,
            source: cached.to_path_buf(),
        })));
    }

    Ok(None)
}
