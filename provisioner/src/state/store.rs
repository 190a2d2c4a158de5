//! Reconciling state store over a remote and a local backing

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::errors::ProvisionError;
use crate::models::operation::DeploymentState;
use crate::state::StateBacking;

/// Dual-backed deployment state store.
///
/// Writes go to both backings; reads reconcile them by `timestamp`, the
/// newer copy winning and being written back over the older one. Only one
/// orchestrator writes, so last-writer-wins is sufficient.
pub struct StateStore {
    remote: Arc<dyn StateBacking>,
    local: Arc<dyn StateBacking>,
    key: String,
}

impl StateStore {
    pub fn new(
        remote: Arc<dyn StateBacking>,
        local: Arc<dyn StateBacking>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            local,
            key: key.into(),
        }
    }

    /// Write to both backings; fails only if both writes fail
    pub async fn save(&self, state: &DeploymentState) -> Result<(), ProvisionError> {
        let document = serde_json::to_value(state)?;

        let (remote, local) = tokio::join!(
            self.remote.store(&self.key, &document),
            self.local.store(&self.key, &document),
        );

        match (remote, local) {
            (Ok(()), Ok(())) => {
                debug!("Saved deployment state ({})", state.timestamp);
                Ok(())
            }
            (Err(e), Ok(())) => {
                warn!("Deployment state not written to {}: {}", self.remote.name(), e);
                Ok(())
            }
            (Ok(()), Err(e)) => {
                warn!("Deployment state not written to {}: {}", self.local.name(), e);
                Ok(())
            }
            (Err(remote), Err(local)) => {
                error!("Both state backings rejected the write");
                Err(ProvisionError::StorageUnavailable(format!(
                    "{}: {}; {}: {}",
                    self.remote.name(),
                    remote,
                    self.local.name(),
                    local
                )))
            }
        }
    }

    /// Load and reconcile. `Ok(None)` means no state exists anywhere.
    pub async fn load(&self) -> Result<Option<DeploymentState>, ProvisionError> {
        let (remote, local) = tokio::join!(
            self.read(self.remote.as_ref()),
            self.read(self.local.as_ref()),
        );

        match (remote, local) {
            (None, None) => {
                debug!("No deployment state in either backing");
                Ok(None)
            }
            (Some(remote), None) => {
                info!("Adopting remote deployment state");
                self.heal(self.local.as_ref(), &remote).await;
                Ok(Some(remote))
            }
            (None, Some(local)) => {
                info!("Adopting local deployment state");
                self.heal(self.remote.as_ref(), &local).await;
                Ok(Some(local))
            }
            (Some(remote), Some(local)) => {
                if local.timestamp > remote.timestamp {
                    info!(
                        "Local deployment state is newer ({} > {})",
                        local.timestamp, remote.timestamp
                    );
                    self.heal(self.remote.as_ref(), &local).await;
                    Ok(Some(local))
                } else {
                    if remote != local {
                        info!(
                            "Remote deployment state wins ({} >= {})",
                            remote.timestamp, local.timestamp
                        );
                        self.heal(self.local.as_ref(), &remote).await;
                    }
                    Ok(Some(remote))
                }
            }
        }
    }

    /// Delete from both backings; fails only if both deletes fail
    pub async fn clear(&self) -> Result<(), ProvisionError> {
        let (remote, local) = tokio::join!(
            self.remote.delete(&self.key),
            self.local.delete(&self.key),
        );

        match (remote, local) {
            (Err(remote), Err(local)) => Err(ProvisionError::StorageUnavailable(format!(
                "{}: {}; {}: {}",
                self.remote.name(),
                remote,
                self.local.name(),
                local
            ))),
            (Err(e), Ok(())) => {
                warn!("Failed to clear {} deployment state: {}", self.remote.name(), e);
                Ok(())
            }
            (Ok(()), Err(e)) => {
                warn!("Failed to clear {} deployment state: {}", self.local.name(), e);
                Ok(())
            }
            (Ok(()), Ok(())) => {
                info!("Cleared deployment state");
                Ok(())
            }
        }
    }

    /// Fetch and validate one copy; unreadable or invalid copies count as absent
    async fn read(&self, backing: &dyn StateBacking) -> Option<DeploymentState> {
        let document = match backing.fetch(&self.key).await {
            Ok(Some(document)) => document,
            Ok(None) => return None,
            Err(ProvisionError::StateCorruption(reason)) => {
                self.discard(backing, &reason).await;
                return None;
            }
            Err(e) => {
                warn!("Failed to read {} deployment state: {}", backing.name(), e);
                return None;
            }
        };

        let decoded = serde_json::from_value::<DeploymentState>(document)
            .map_err(|e| ProvisionError::StateCorruption(e.to_string()))
            .and_then(|state| state.validate().map(|_| state));

        match decoded {
            Ok(state) => Some(state),
            Err(e) => {
                self.discard(backing, &e.to_string()).await;
                None
            }
        }
    }

    async fn discard(&self, backing: &dyn StateBacking, reason: &str) {
        warn!(
            "Discarding corrupted {} deployment state: {}",
            backing.name(),
            reason
        );
        if let Err(e) = backing.delete(&self.key).await {
            warn!("Failed to discard {} deployment state: {}", backing.name(), e);
        }
    }

    async fn heal(&self, target: &dyn StateBacking, state: &DeploymentState) {
        let document = match serde_json::to_value(state) {
            Ok(document) => document,
            Err(e) => {
                error!("Failed to encode deployment state: {}", e);
                return;
            }
        };
        if let Err(e) = target.store(&self.key, &document).await {
            warn!("Failed to heal {} deployment state: {}", target.name(), e);
        }
    }
}
