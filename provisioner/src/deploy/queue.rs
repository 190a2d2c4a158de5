//! Operation queue state machine

use std::path::Path;

use tracing::{debug, info, warn};

use crate::errors::ProvisionError;
use crate::filesys::file::File;
use crate::models::operation::{DeploymentState, Operation, OperationDescriptor, OperationStatus};

/// Message recorded on an operation found running after a restart
pub const INTERRUPTED_MESSAGE: &str = "Interrupted before completion";

/// Result of asking the queue for work
#[derive(Debug, Clone, PartialEq)]
pub enum NextOperation {
    /// This operation may be started now
    Ready(Operation),

    /// Progress is halted by this operation (failed, or still running)
    Blocked(Operation),

    /// Every operation has completed
    Complete,
}

/// Queue state machine over a [`DeploymentState`]
#[derive(Debug, Clone)]
pub struct OperationQueue {
    state: DeploymentState,
}

impl OperationQueue {
    /// Wrap an existing state
    pub fn new(state: DeploymentState) -> Self {
        Self { state }
    }

    /// Build a fresh queue from descriptors
    pub fn from_descriptors(descriptors: Vec<OperationDescriptor>) -> Result<Self, ProvisionError> {
        Ok(Self::new(DeploymentState::new(descriptors)?))
    }

    pub fn state(&self) -> &DeploymentState {
        &self.state
    }

    /// Find the next runnable operation.
    ///
    /// A failed operation anywhere between the cursor and the first pending
    /// entry halts the queue.
    pub fn next_operation(&self) -> NextOperation {
        let ops = &self.state.operations;
        let cursor = self.state.current_index;

        let Some(current) = ops.get(cursor) else {
            return NextOperation::Complete;
        };

        match current.status {
            OperationStatus::Failed | OperationStatus::Running => {
                NextOperation::Blocked(current.clone())
            }
            OperationStatus::Pending => NextOperation::Ready(current.clone()),
            OperationStatus::Completed => {
                for op in &ops[cursor + 1..] {
                    match op.status {
                        OperationStatus::Completed => continue,
                        OperationStatus::Pending => return NextOperation::Ready(op.clone()),
                        OperationStatus::Failed | OperationStatus::Running => {
                            return NextOperation::Blocked(op.clone())
                        }
                    }
                }
                NextOperation::Complete
            }
        }
    }

    /// Pending -> Running for the next runnable operation.
    ///
    /// Only one operation may be running at a time, and only the operation
    /// returned by [`next_operation`](Self::next_operation) may start.
    pub fn mark_running(&mut self, id: &str) -> Result<(), ProvisionError> {
        self.require(id)?;

        if let Some(running) = self.state.running() {
            return Err(ProvisionError::ExecutionInProgress(format!(
                "cannot start {id} while {} is running",
                running.id
            )));
        }

        match self.next_operation() {
            NextOperation::Ready(op) if op.id == id => {}
            NextOperation::Ready(op) => {
                return Err(ProvisionError::ValidationError(format!(
                    "cannot start {id}: next runnable operation is {}",
                    op.id
                )));
            }
            NextOperation::Blocked(op) => {
                return Err(ProvisionError::ValidationError(format!(
                    "cannot start {id}: queue is blocked by {}",
                    op.id
                )));
            }
            NextOperation::Complete => {
                return Err(ProvisionError::ValidationError(format!(
                    "cannot start {id}: queue is complete"
                )));
            }
        }

        let op = self.operation_mut(id)?;
        op.status = OperationStatus::Running;
        op.error = None;
        self.state.touch();
        debug!("Operation {} is running", id);
        Ok(())
    }

    /// Mark an operation completed. Returns `false` if it already was.
    pub fn mark_completed(&mut self, id: &str) -> Result<bool, ProvisionError> {
        let position = self.require(id)?;

        let op = &mut self.state.operations[position];
        if op.status == OperationStatus::Completed {
            return Ok(false);
        }
        op.status = OperationStatus::Completed;
        op.error = None;

        self.state.completed_ids.insert(id.to_string());
        self.state.failed_ids.remove(id);

        if position == self.state.current_index {
            self.advance_cursor();
        }

        self.state.touch();
        info!(
            "Operation {} completed, cursor at {}",
            id, self.state.current_index
        );
        Ok(true)
    }

    /// Mark an operation failed. Returns `false` if it already was.
    ///
    /// The cursor never moves here; a failed cursor operation halts the queue.
    pub fn mark_failed(&mut self, id: &str, error: impl Into<String>) -> Result<bool, ProvisionError> {
        let position = self.require(id)?;

        let op = &mut self.state.operations[position];
        match op.status {
            OperationStatus::Failed => return Ok(false),
            OperationStatus::Completed => {
                return Err(ProvisionError::ValidationError(format!(
                    "cannot fail completed operation {id}"
                )));
            }
            OperationStatus::Pending | OperationStatus::Running => {}
        }

        let error = error.into();
        warn!("Operation {} failed: {}", id, error);
        op.status = OperationStatus::Failed;
        op.error = Some(error);

        self.state.failed_ids.insert(id.to_string());
        self.state.touch();
        Ok(true)
    }

    /// Return every failed operation to pending and rescan from the start
    pub fn reset_failed(&mut self) -> Vec<String> {
        let mut reset = Vec::new();
        for op in &mut self.state.operations {
            if op.status == OperationStatus::Failed {
                op.status = OperationStatus::Pending;
                op.error = None;
                reset.push(op.id.clone());
            }
        }

        self.state.failed_ids.clear();
        self.state.current_index = 0;
        self.state.touch();
        info!("Reset {} failed operation(s)", reset.len());
        reset
    }

    /// Fail operations left running by a previous process.
    ///
    /// Their remote effect is unknown, so they are never treated as done.
    pub fn recover_interrupted(&mut self) -> Vec<String> {
        let interrupted: Vec<String> = self
            .state
            .operations
            .iter()
            .filter(|op| op.status == OperationStatus::Running)
            .map(|op| op.id.clone())
            .collect();

        for id in &interrupted {
            // the id comes from the queue itself
            let _ = self.mark_failed(id, INTERRUPTED_MESSAGE);
        }
        interrupted
    }

    /// Number of completed operations
    pub fn completed_count(&self) -> usize {
        self.state.completed_ids.len()
    }

    fn advance_cursor(&mut self) {
        let ops = &self.state.operations;
        let mut index = self.state.current_index + 1;
        while index < ops.len() && ops[index].status == OperationStatus::Completed {
            index += 1;
        }
        self.state.current_index = index;
    }

    fn require(&self, id: &str) -> Result<usize, ProvisionError> {
        self.state
            .position(id)
            .ok_or_else(|| ProvisionError::NotFound(format!("operation {id}")))
    }

    fn operation_mut(&mut self, id: &str) -> Result<&mut Operation, ProvisionError> {
        self.state
            .operations
            .iter_mut()
            .find(|op| op.id == id)
            .ok_or_else(|| ProvisionError::NotFound(format!("operation {id}")))
    }
}

/// Read the operation descriptor list produced by the queue builder
pub async fn load_descriptors(path: impl AsRef<Path>) -> Result<Vec<OperationDescriptor>, ProvisionError> {
    let file = File::new(path.as_ref());
    let descriptors: Vec<OperationDescriptor> = file.read_json().await?;
    if descriptors.is_empty() {
        return Err(ProvisionError::ValidationError(format!(
            "operation queue {} is empty",
            file.path().display()
        )));
    }
    Ok(descriptors)
}
