use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::ProvisionError;
use crate::state::StateBacking;

/// In-process backing, used for dry runs and tests
#[derive(Debug, Clone, Default)]
pub struct MemoryBacking {
    documents: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl MemoryBacking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw document access, bypassing the store
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.documents.read().await.get(key).cloned()
    }

    pub async fn put(&self, key: &str, document: serde_json::Value) {
        self.documents.write().await.insert(key.to_string(), document);
    }
}

#[async_trait]
impl StateBacking for MemoryBacking {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch(&self, key: &str) -> Result<Option<serde_json::Value>, ProvisionError> {
        Ok(self.get(key).await)
    }

    async fn store(&self, key: &str, document: &serde_json::Value) -> Result<(), ProvisionError> {
        self.put(key, document.clone()).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), ProvisionError> {
        self.documents.write().await.remove(key);
        Ok(())
    }
}
