//! Operation and deployment state models

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ProvisionError;

/// Current schema version of the persisted deployment state
pub const STATE_VERSION: u32 = 1;

/// Operation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    /// Waiting to be executed
    Pending,

    /// Execution in progress
    Running,

    /// Finished successfully
    Completed,

    /// Finished with an error; blocks the queue until reset
    Failed,
}

/// Operation descriptor as produced by the queue builder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    pub id: String,
    pub phase: String,
    pub title: String,

    /// Remote procedure (playbook) reference
    pub name: String,

    #[serde(default)]
    pub extra_vars: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// One queued unit of remote provisioning work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    pub phase: String,
    pub title: String,
    pub name: String,

    #[serde(default)]
    pub extra_vars: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub environment: HashMap<String, String>,

    pub status: OperationStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<OperationDescriptor> for Operation {
    fn from(descriptor: OperationDescriptor) -> Self {
        Self {
            id: descriptor.id,
            phase: descriptor.phase,
            title: descriptor.title,
            name: descriptor.name,
            extra_vars: descriptor.extra_vars,
            environment: descriptor.environment,
            status: OperationStatus::Pending,
            error: None,
        }
    }
}

/// Orchestration snapshot persisted by the state store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentState {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub operations: Vec<Operation>,
    pub current_index: usize,
    pub completed_ids: BTreeSet<String>,
    pub failed_ids: BTreeSet<String>,
}

impl DeploymentState {
    /// Build a fresh state with every operation pending.
    ///
    /// Descriptor ids must be unique; the list is immutable for the lifetime
    /// of the state.
    pub fn new(descriptors: Vec<OperationDescriptor>) -> Result<Self, ProvisionError> {
        let mut seen = HashSet::new();
        for descriptor in &descriptors {
            if descriptor.id.is_empty() {
                return Err(ProvisionError::ValidationError(
                    "Operation id must not be empty".to_string(),
                ));
            }
            if !seen.insert(descriptor.id.as_str()) {
                return Err(ProvisionError::ValidationError(format!(
                    "Duplicate operation id: {}",
                    descriptor.id
                )));
            }
        }

        Ok(Self {
            version: STATE_VERSION,
            timestamp: Utc::now(),
            operations: descriptors.into_iter().map(Operation::from).collect(),
            current_index: 0,
            completed_ids: BTreeSet::new(),
            failed_ids: BTreeSet::new(),
        })
    }

    /// Position of an operation in the queue
    pub fn position(&self, id: &str) -> Option<usize> {
        self.operations.iter().position(|op| op.id == id)
    }

    /// Get an operation by id
    pub fn operation(&self, id: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.id == id)
    }

    /// The operation currently marked running, if any
    pub fn running(&self) -> Option<&Operation> {
        self.operations
            .iter()
            .find(|op| op.status == OperationStatus::Running)
    }

    /// Whether this state tracks exactly the given queue, in order
    pub fn matches_queue(&self, descriptors: &[OperationDescriptor]) -> bool {
        self.operations.len() == descriptors.len()
            && self
                .operations
                .iter()
                .zip(descriptors)
                .all(|(op, descriptor)| op.id == descriptor.id)
    }

    pub fn touch(&mut self) {
        self.timestamp = Utc::now();
    }

    /// Structural validation of a document read back from storage
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.version == 0 || self.version > STATE_VERSION {
            return Err(ProvisionError::StateCorruption(format!(
                "unsupported state version {}",
                self.version
            )));
        }

        if self.current_index > self.operations.len() {
            return Err(ProvisionError::StateCorruption(format!(
                "cursor {} out of range for {} operations",
                self.current_index,
                self.operations.len()
            )));
        }

        let mut seen = HashSet::new();
        for op in &self.operations {
            if !seen.insert(op.id.as_str()) {
                return Err(ProvisionError::StateCorruption(format!(
                    "duplicate operation id {}",
                    op.id
                )));
            }

            let completed = self.completed_ids.contains(&op.id);
            let failed = self.failed_ids.contains(&op.id);
            let consistent = match op.status {
                OperationStatus::Completed => completed && !failed,
                OperationStatus::Failed => failed && !completed,
                OperationStatus::Pending | OperationStatus::Running => !completed && !failed,
            };
            if !consistent {
                return Err(ProvisionError::StateCorruption(format!(
                    "status of {} disagrees with completed/failed sets",
                    op.id
                )));
            }
        }

        if self
            .completed_ids
            .iter()
            .chain(self.failed_ids.iter())
            .any(|id| !seen.contains(id.as_str()))
        {
            return Err(ProvisionError::StateCorruption(
                "completed/failed sets reference unknown operations".to_string(),
            ));
        }

        Ok(())
    }
}
