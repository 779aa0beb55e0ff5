//! Error types for the image distribution engine.

use std::path::PathBuf;

/// Result type alias for image distribution operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the image distribution engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Image Reference Errors
    // =========================================================================
    /// Image reference is not of the form `name:tag`.
    #[error("invalid image format '{image}': expected name:tag")]
    InvalidImageFormat { image: String },

    // =========================================================================
    // Registry Errors
    // =========================================================================
    /// Registry auth endpoint did not return a usable token.
    #[error("failed to fetch registry token for '{repository}': {reason}")]
    TokenFetchFailed { repository: String, reason: String },

    /// Manifest fetch returned non-200 or lacked a content digest.
    #[error("failed to fetch manifest for '{repository}:{tag}': {reason}")]
    ManifestFetchFailed {
        repository: String,
        tag: String,
        reason: String,
    },

    /// All retries exhausted for one blob.
    #[error("failed to download layer {digest}")]
    LayerDownloadFailed { digest: String },

    // =========================================================================
    // Assembly Errors
    // =========================================================================
    /// Manifest advertised a part that was never produced.
    #[error("missing disk part {number}")]
    MissingPart { number: u64 },

    /// Reserved for the gzip layer pipeline.
    #[error("failed to decompress {file}")]
    DecompressionFailed { file: PathBuf },

    // =========================================================================
    // VM Directory Errors
    // =========================================================================
    /// Directory (or one of its parents) could not be created.
    #[error("failed to create directory {path}: {reason}")]
    DirectoryCreationFailed { path: PathBuf, reason: String },

    /// Destination VM directory already exists and overwrite is forbidden.
    #[error("directory already exists: {path}")]
    DirectoryAlreadyExists { path: PathBuf },

    /// Named VM location is not configured.
    #[error("location not found: {name}")]
    LocationNotFound { name: String },

    // =========================================================================
    // Cache Errors
    // =========================================================================
    /// Cache entry could not be written or replaced.
    #[error("cache write failed at {path}: {reason}")]
    CacheWriteFailed { path: PathBuf, reason: String },

    // =========================================================================
    // Ambient Errors
    // =========================================================================
    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Download task panicked or was cancelled.
    #[error("download task failed: {0}")]
    TaskFailed(String),
}
