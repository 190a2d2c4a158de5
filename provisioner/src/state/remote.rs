//! Remote backing: the installer backend's deployment-state endpoint

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::errors::ProvisionError;
use crate::http::client::HttpClient;
use crate::state::StateBacking;

pub struct RemoteBacking {
    http_client: Arc<HttpClient>,
}

impl RemoteBacking {
    pub fn new(http_client: Arc<HttpClient>) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl StateBacking for RemoteBacking {
    fn name(&self) -> &str {
        "remote"
    }

    async fn fetch(&self, key: &str) -> Result<Option<serde_json::Value>, ProvisionError> {
        let response = self.http_client.get_deployment_state(key).await?;

        if let Some(error) = response.error {
            warn!("Remote deployment state unreadable: {}", error);
            return Err(ProvisionError::StateCorruption(error));
        }

        if !response.exists {
            return Ok(None);
        }
        Ok(response.state.filter(|state| !state.is_null()))
    }

    async fn store(&self, key: &str, document: &serde_json::Value) -> Result<(), ProvisionError> {
        self.http_client.save_deployment_state(key, document).await
    }

    async fn delete(&self, key: &str) -> Result<(), ProvisionError> {
        self.http_client.clear_deployment_state(key).await
    }
}
