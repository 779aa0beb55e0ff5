//! # vmpull
//!
//! **VM Image Distribution Engine for OCI Registries**
//!
//! This crate pulls OCI-packaged virtual machine images (a disk image,
//! a configuration blob, and an NVRAM blob) from a container registry,
//! caches them content-addressed on local disk, and materializes them
//! into named VM directories.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                           vmpull                                   │
//! ├────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────────────────────────────────────────────────┐    │
//! │  │                     ImagePuller                            │    │
//! │  │     pull(repo:tag) → cached or downloaded → VM directory   │    │
//! │  └────────────────────────────────────────────────────────────┘    │
//! │               │                                                    │
//! │  ┌────────────┼──────────────────────────────────────────────┐     │
//! │  │     Download Pipeline                                     │     │
//! │  │  RegistryClient │ bounded task group (5) │ single-flight  │     │
//! │  └────────────┼──────────────────────────────────────────────┘     │
//! │               │                                                    │
//! │  ┌────────────┼──────────────────────────────────────────────┐     │
//! │  │     Content-Addressed Cache (keyed by manifest digest)    │     │
//! │  │  validate │ prepare │ old-version cleanup │ atomic writes │     │
//! │  └────────────┼──────────────────────────────────────────────┘     │
//! │               │                                                    │
//! │  ┌────────────┼──────────────────────────────────────────────┐     │
//! │  │     Assembly & Install                                    │     │
//! │  │  ordered part reassembly │ atomic VM directory install    │     │
//! │  └───────────────────────────────────────────────────────────┘     │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Properties
//!
//! - **Identity is the manifest digest**: the registry's
//!   `Docker-Content-Digest` names the cache entry; pulls of the same
//!   digest share one directory and repeated pulls download nothing.
//! - **Single-flight downloads**: at most one task fetches a given blob
//!   digest at a time across every pull in the process; other interested
//!   tasks wait and consume the cached result.
//! - **Bounded concurrency**: no more than 5 blob downloads in flight per
//!   pull, with retry/backoff per blob.
//! - **Deterministic reassembly**: split disk images are concatenated in
//!   strict part order under a bounded chunk budget, regardless of the
//!   order downloads complete in.
//! - **Atomic installs**: a VM directory either keeps its prior contents
//!   or shows the complete new tree, never a partial one; cache entries
//!   are likewise never visible half-written.
//!
//! # External Collaborators
//!
//! Settings (cache root) and VM directory layout come in through the
//! [`SettingsStore`] and [`VmDirectoryProvider`] traits; logging goes out
//! through `tracing`. The engine installs no subscriber and owns no
//! configuration files.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vmpull::{HomeVmDirectoryProvider, ImagePuller, StaticSettings};
//!
//! #[tokio::main]
//! async fn main() -> vmpull::Result<()> {
//!     let settings = StaticSettings::new("~/.vmpull/cache");
//!     let vm_dirs = Arc::new(HomeVmDirectoryProvider::with_home("~/.vmpull/vms"));
//!     let puller = ImagePuller::new(&settings, vm_dirs, "acme-images")?;
//!
//!     let pulled = puller.pull("macos-sequoia-vanilla:latest", None, None).await?;
//!     println!("installed {} at {}", pulled.repository, pulled.vm_directory.display());
//!     Ok(())
//! }
//! ```

// =============================================================================
// Internal Modules
// =============================================================================

mod assemble;
mod cache;
mod constants;
mod error;
mod flight;
mod index;
mod manifest;
mod materialize;
mod memory;
mod progress;
mod pull;
mod registry;
mod scheduler;
mod vmdir;

// =============================================================================
// Public Surface
// =============================================================================

pub use assemble::assemble_parts;
pub use cache::ImageCache;
pub use error::{Error, Result};
pub use flight::FlightTracker;
pub use index::list_images;
pub use manifest::{
    manifest_id, short_image_id, CachedImage, ImageMetadata, Layer, LayerRole, Manifest,
};
pub use materialize::install_tree;
pub use memory::{FixedMemoryProbe, HostMemoryProbe, MemoryProbe};
pub use progress::ProgressTracker;
pub use pull::{ImagePuller, PulledImage};
pub use registry::RegistryClient;
pub use scheduler::{download_layers, DiskPart, DownloadContext, DownloadOutcome};
pub use vmdir::{
    expand_tilde, HomeVmDirectoryProvider, SettingsStore, StaticSettings, VmDirectory,
    VmDirectoryProvider,
};

/// Well-known limits, timeouts, media types, and file names.
pub mod consts {
    pub use crate::constants::*;
}
