//! # External Collaborators: Settings and VM Directories
//!
//! The engine does not own its configuration or the layout of VM homes;
//! both arrive through the traits here. A default home-directory provider
//! is included for standalone use and tests.

use crate::constants::{DISK_IMAGE_FILE, VM_CONFIG_FILE};
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Source of engine configuration.
pub trait SettingsStore: Send + Sync {
    /// Configured cache root; may start with `~`.
    fn cache_directory(&self) -> String;
}

/// Fixed settings value, for embedding and tests.
#[derive(Debug, Clone)]
pub struct StaticSettings {
    cache_directory: String,
}

impl StaticSettings {
    pub fn new(cache_directory: impl Into<String>) -> Self {
        Self {
            cache_directory: cache_directory.into(),
        }
    }
}

impl SettingsStore for StaticSettings {
    fn cache_directory(&self) -> String {
        self.cache_directory.clone()
    }
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Handle to one VM's home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmDirectory {
    path: PathBuf,
}

impl VmDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this directory holds a complete VM (disk plus config).
    pub fn initialized(&self) -> bool {
        self.path.join(DISK_IMAGE_FILE).exists() && self.path.join(VM_CONFIG_FILE).exists()
    }
}

/// Resolver from VM names (and optional named locations) to directories.
pub trait VmDirectoryProvider: Send + Sync {
    /// Resolves the home for `name`, in `location` if given.
    ///
    /// # Errors
    ///
    /// [`Error::LocationNotFound`] when `location` names nothing known.
    fn vm_directory(&self, name: &str, location: Option<&str>) -> Result<VmDirectory>;

    /// Whether the provider's storage root exists at all.
    fn initialized(&self) -> bool;

    /// Creates a throwaway VM home for callers that want a scratch pull.
    fn create_temp_vm_directory(&self) -> Result<VmDirectory>;
}

/// Default provider rooted in the user's home directory.
pub struct HomeVmDirectoryProvider {
    home: PathBuf,
    locations: HashMap<String, PathBuf>,
}

impl HomeVmDirectoryProvider {
    /// Provider over an explicit root directory.
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            locations: HashMap::new(),
        }
    }

    /// Registers a named location.
    pub fn add_location(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        self.locations.insert(name.into(), path.into());
    }

    /// Creates the home for a new named VM, refusing to clobber one.
    ///
    /// # Errors
    ///
    /// [`Error::DirectoryAlreadyExists`] when the VM home is present;
    /// [`Error::DirectoryCreationFailed`] when creation fails.
    pub fn create_vm_directory(&self, name: &str) -> Result<VmDirectory> {
        let path = self.home.join(name);
        if path.exists() {
            return Err(Error::DirectoryAlreadyExists { path });
        }
        fs::create_dir_all(&path).map_err(|e| Error::DirectoryCreationFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        Ok(VmDirectory::new(path))
    }
}

impl VmDirectoryProvider for HomeVmDirectoryProvider {
    fn vm_directory(&self, name: &str, location: Option<&str>) -> Result<VmDirectory> {
        let root = match location {
            Some(loc) => self
                .locations
                .get(loc)
                .cloned()
                .ok_or_else(|| Error::LocationNotFound {
                    name: loc.to_string(),
                })?,
            None => self.home.clone(),
        };
        Ok(VmDirectory::new(root.join(name)))
    }

    fn initialized(&self) -> bool {
        self.home.is_dir()
    }

    fn create_temp_vm_directory(&self) -> Result<VmDirectory> {
        fs::create_dir_all(&self.home).map_err(|e| Error::DirectoryCreationFailed {
            path: self.home.clone(),
            reason: e.to_string(),
        })?;
        let dir = tempfile::Builder::new()
            .prefix("vm-")
            .tempdir_in(&self.home)?;
        Ok(VmDirectory::new(dir.keep()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn expand_tilde_leaves_plain_paths_alone() {
        assert_eq!(expand_tilde("/var/cache"), PathBuf::from("/var/cache"));
        assert_eq!(expand_tilde("relative/dir"), PathBuf::from("relative/dir"));
    }

    #[test]
    fn expand_tilde_resolves_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/cache"), home.join("cache"));
        }
    }

    #[test]
    fn vm_directory_resolves_under_home() {
        let temp = TempDir::new().unwrap();
        let provider = HomeVmDirectoryProvider::with_home(temp.path());

        let dir = provider.vm_directory("my-vm", None).unwrap();
        assert_eq!(dir.path(), temp.path().join("my-vm"));
    }

    #[test]
    fn named_location_overrides_home() {
        let temp = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let mut provider = HomeVmDirectoryProvider::with_home(temp.path());
        provider.add_location("ssd", elsewhere.path());

        let dir = provider.vm_directory("my-vm", Some("ssd")).unwrap();
        assert_eq!(dir.path(), elsewhere.path().join("my-vm"));
    }

    #[test]
    fn unknown_location_fails() {
        let temp = TempDir::new().unwrap();
        let provider = HomeVmDirectoryProvider::with_home(temp.path());

        let result = provider.vm_directory("my-vm", Some("missing"));
        assert!(matches!(result, Err(Error::LocationNotFound { .. })));
    }

    #[test]
    fn create_refuses_existing_vm() {
        let temp = TempDir::new().unwrap();
        let provider = HomeVmDirectoryProvider::with_home(temp.path());

        provider.create_vm_directory("vm1").unwrap();
        let again = provider.create_vm_directory("vm1");
        assert!(matches!(again, Err(Error::DirectoryAlreadyExists { .. })));
    }

    #[test]
    fn temp_vm_directory_is_unique() {
        let temp = TempDir::new().unwrap();
        let provider = HomeVmDirectoryProvider::with_home(temp.path());

        let a = provider.create_temp_vm_directory().unwrap();
        let b = provider.create_temp_vm_directory().unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().is_dir());
    }

    #[test]
    fn initialized_requires_disk_and_config() {
        let temp = TempDir::new().unwrap();
        let dir = VmDirectory::new(temp.path());
        assert!(!dir.initialized());

        fs::write(temp.path().join(DISK_IMAGE_FILE), b"disk").unwrap();
        assert!(!dir.initialized());

        fs::write(temp.path().join(VM_CONFIG_FILE), b"{}").unwrap();
        assert!(dir.initialized());
    }
}
