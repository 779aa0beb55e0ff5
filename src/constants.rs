//! Constants for the image distribution engine.
//!
//! All limits, timeouts, and well-known names are defined here to ensure
//! consistency and prevent magic numbers throughout the codebase.

use std::time::Duration;

// =============================================================================
// Registry
// =============================================================================

/// Default registry base URL for VM images.
pub const DEFAULT_REGISTRY_URL: &str = "https://ghcr.io";

/// Registry subdirectory under the cache root.
pub const CACHE_REGISTRY_DIR: &str = "ghcr";

/// Connect timeout for a single registry request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Total timeout for one registry resource (a full blob download).
pub const RESOURCE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Default number of attempts for one blob download.
pub const DEFAULT_DOWNLOAD_RETRIES: u32 = 5;

/// Backoff unit between blob download attempts (attempt × unit).
pub const RETRY_BACKOFF_UNIT: Duration = Duration::from_secs(5);

// =============================================================================
// Concurrency
// =============================================================================

/// Maximum number of layer downloads in flight per pull.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 5;

/// Poll interval while waiting on another task's in-flight download.
pub const FLIGHT_POLL_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Reassembly
// =============================================================================

/// Default copy chunk size when no memory reading is available (512 KiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 512 * 1024;

/// Upper bound on the adaptive copy chunk size (2 MiB).
pub const MAX_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// Free memory required before the chunk size scales above the default (1 GiB).
pub const CHUNK_SCALING_THRESHOLD: u64 = 1024 * 1024 * 1024;

/// Free memory below which the host counts as memory-constrained (2 GiB).
pub const MEMORY_CONSTRAINED_THRESHOLD: u64 = 2 * 1024 * 1024 * 1024;

/// Chunks written between fsyncs when memory-constrained.
pub const FSYNC_CHUNK_INTERVAL: u64 = 10;

/// Progress ticks across a reassembly (20 ticks = 5% granularity).
pub const REASSEMBLY_PROGRESS_TICKS: u64 = 20;

// =============================================================================
// OCI Media Types
// =============================================================================

/// OCI Image Manifest media type (sent as `Accept` on manifest fetch).
pub const OCI_IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Empty placeholder layer media type; always skipped.
pub const OCI_EMPTY_MEDIA_TYPE: &str = "application/vnd.oci.empty.v1+json";

/// Whole disk image layer media type (single-file variant).
pub const DISK_IMAGE_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar";

/// VM configuration blob media type.
pub const VM_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";

/// NVRAM blob media type.
pub const NVRAM_MEDIA_TYPE: &str = "application/octet-stream";

/// Pattern identifying one numbered part of a split disk image.
pub const DISK_PART_PATTERN: &str = r"part\.number=(\d+);part\.total=(\d+)";

// =============================================================================
// Artifact File Names
// =============================================================================

/// Disk image file name inside a VM directory.
pub const DISK_IMAGE_FILE: &str = "disk.img";

/// VM configuration file name inside a VM directory.
pub const VM_CONFIG_FILE: &str = "config.json";

/// NVRAM file name inside a VM directory.
pub const NVRAM_FILE: &str = "nvram.bin";

/// Serialized manifest file name inside a cache entry.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Image metadata file name inside a cache entry.
pub const METADATA_FILE: &str = "metadata.json";

// =============================================================================
// Identity
// =============================================================================

/// Hex characters of the manifest digest used as the short image id.
pub const SHORT_ID_LEN: usize = 12;
