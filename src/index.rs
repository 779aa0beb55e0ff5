//! # Cached Image Index
//!
//! Enumerates the images present in the local cache by reading each
//! entry's metadata record. Directories without readable metadata are
//! skipped with a log line; nothing is reconstructed from a bare manifest.

use crate::cache::ImageCache;
use crate::constants::METADATA_FILE;
use crate::error::Result;
use crate::manifest::{short_image_id, CachedImage, ImageMetadata};
use std::fs;
use tracing::debug;

/// Lists every cached image, sorted by (repository, image id).
///
/// Per-entry read failures are skipped, not surfaced: a half-removed or
/// foreign directory in the cache root must not break enumeration.
pub fn list_images(cache: &ImageCache) -> Result<Vec<CachedImage>> {
    let mut images = Vec::new();

    let entries = match fs::read_dir(cache.root()) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("cache root not readable: {}", e);
            return Ok(images);
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let manifest_id = entry.file_name().to_string_lossy().to_string();

        let metadata: ImageMetadata = match fs::read(path.join(METADATA_FILE))
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        {
            Some(m) => m,
            None => {
                debug!("skipping cache entry without metadata: {}", manifest_id);
                continue;
            }
        };

        images.push(CachedImage {
            repository: metadata.image,
            image_id: short_image_id(&manifest_id),
            manifest_id,
        });
    }

    images.sort_by(|a, b| {
        (a.repository.as_str(), a.image_id.as_str()).cmp(&(b.repository.as_str(), b.image_id.as_str()))
    });
    Ok(images)
}
