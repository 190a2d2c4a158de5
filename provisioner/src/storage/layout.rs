//! Storage layout configuration

use std::path::PathBuf;

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Storage layout for the provisioner
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Default operation queue produced by the queue builder
    pub fn queue_file(&self) -> File {
        File::new(self.base_dir.join("operations.json"))
    }

    /// Default compiled inventory
    pub fn inventory_file(&self) -> File {
        File::new(self.base_dir.join("inventory.yaml"))
    }

    /// Local deployment state cache
    pub fn cache_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("cache"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Logs of failed and cancelled executions
    pub fn failures_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs").join("failures"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), crate::errors::ProvisionError> {
        self.cache_dir().create().await?;
        self.logs_dir().create().await?;
        self.failures_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        let base_dir = std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".thinkube-installer");

        Self::new(base_dir)
    }
}
