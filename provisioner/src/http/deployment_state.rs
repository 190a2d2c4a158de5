//! Deployment state API client

use serde::{Deserialize, Serialize};

use crate::errors::ProvisionError;
use crate::http::client::HttpClient;

const DEPLOYMENT_STATE_PATH: &str = "/api/system/deployment-state";

/// Response of `GET /api/system/deployment-state`
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentStateResponse {
    pub exists: bool,

    #[serde(default)]
    pub state: Option<serde_json::Value>,

    /// Set when the backend failed to read its own copy
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
struct SaveDeploymentStateRequest<'a> {
    state: &'a serde_json::Value,
}

impl HttpClient {
    /// Fetch the persisted deployment state document
    pub async fn get_deployment_state(
        &self,
        session: &str,
    ) -> Result<DeploymentStateResponse, ProvisionError> {
        self.get(&state_path(session)).await
    }

    /// Store the deployment state document
    pub async fn save_deployment_state(
        &self,
        session: &str,
        state: &serde_json::Value,
    ) -> Result<(), ProvisionError> {
        let _: serde_json::Value = self
            .post(&state_path(session), &SaveDeploymentStateRequest { state })
            .await?;
        Ok(())
    }

    /// Delete the persisted deployment state document
    pub async fn clear_deployment_state(&self, session: &str) -> Result<(), ProvisionError> {
        let _: serde_json::Value = self.delete(&state_path(session)).await?;
        Ok(())
    }
}

fn state_path(session: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(session.as_bytes()).collect();
    format!("{}?session={}", DEPLOYMENT_STATE_PATH, encoded)
}
