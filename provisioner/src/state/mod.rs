//! Deployment state persistence
//!
//! Two independent [`StateBacking`]s sit behind one reconciling
//! [`store::StateStore`].

pub mod file;
pub mod memory;
pub mod remote;
pub mod store;

use async_trait::async_trait;

use crate::errors::ProvisionError;

/// One storage endpoint holding a single opaque document per key
#[async_trait]
pub trait StateBacking: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Fetch the document, `None` if absent.
    ///
    /// Returns [`ProvisionError::StateCorruption`] when a stored document
    /// exists but cannot be decoded at all.
    async fn fetch(&self, key: &str) -> Result<Option<serde_json::Value>, ProvisionError>;

    async fn store(&self, key: &str, document: &serde_json::Value) -> Result<(), ProvisionError>;

    /// Delete the document; deleting an absent document succeeds
    async fn delete(&self, key: &str) -> Result<(), ProvisionError>;
}
