//! Topology document providers
//!
//! The topology (inventory) document is produced elsewhere and passed to
//! every operation unmodified. It is never parsed here.

use async_trait::async_trait;

use crate::errors::ProvisionError;
use crate::filesys::file::File;

/// Supplies the opaque topology document for an operation run
#[async_trait]
pub trait TopologyProvider: Send + Sync {
    async fn inventory(&self) -> Result<String, ProvisionError>;
}

/// Reads the compiled inventory from a file on every run
#[derive(Debug, Clone)]
pub struct FileTopology {
    file: File,
}

impl FileTopology {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

#[async_trait]
impl TopologyProvider for FileTopology {
    async fn inventory(&self) -> Result<String, ProvisionError> {
        if !self.file.exists().await {
            return Err(ProvisionError::NotFound(format!(
                "inventory {}",
                self.file.path().display()
            )));
        }
        self.file.read_string().await
    }
}

/// A fixed in-memory document
#[derive(Debug, Clone, Default)]
pub struct StaticTopology(pub String);

#[async_trait]
impl TopologyProvider for StaticTopology {
    async fn inventory(&self) -> Result<String, ProvisionError> {
        Ok(self.0.clone())
    }
}
