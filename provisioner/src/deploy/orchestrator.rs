//! Session orchestrator
//!
//! Sequences operations one at a time, persisting the queue state before an
//! operation starts and after it reaches a terminal outcome.

use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use crate::deploy::executor::{
    cancellation, CancelHandle, ExecutionOutcome, ExecutionStatus, OperationExecutor,
    CANCELLED_MESSAGE,
};
use crate::deploy::failures;
use crate::deploy::queue::{NextOperation, OperationQueue};
use crate::errors::ProvisionError;
use crate::filesys::dir::Dir;
use crate::models::event::ProgressEvent;
use crate::models::operation::{DeploymentState, Operation, OperationDescriptor, OperationStatus};
use crate::state::store::StateStore;
use crate::stream::ExecutionTransport;
use crate::topology::TopologyProvider;

/// Terminal result of running one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub operation_id: String,
    pub title: String,
    pub outcome: ExecutionOutcome,
}

/// What `run_next` did
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    /// An operation ran to a terminal outcome
    Ran(Box<RunReport>),

    /// Nothing may run until this operation is retried or reset
    Blocked(Operation),

    /// Every operation has completed
    Complete,
}

/// Overall queue progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub current_index: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_title: Option<String>,
}

struct ActiveExecution {
    /// Unset until the next operation is picked
    operation_id: Option<String>,
    cancel: CancelHandle,
}

/// Orchestrator over one installation session
pub struct Orchestrator {
    store: StateStore,
    executor: OperationExecutor,
    topology: Arc<dyn TopologyProvider>,
    queue: Mutex<Option<OperationQueue>>,
    execution_slot: Mutex<()>,
    active: StdMutex<Option<ActiveExecution>>,
    last_run: StdRwLock<Option<RunReport>>,
    failure_logs: Option<Dir>,
}

impl Orchestrator {
    pub fn new(
        store: StateStore,
        transport: Arc<dyn ExecutionTransport>,
        topology: Arc<dyn TopologyProvider>,
    ) -> Self {
        Self {
            store,
            executor: OperationExecutor::new(transport),
            topology,
            queue: Mutex::new(None),
            execution_slot: Mutex::new(()),
            active: StdMutex::new(None),
            last_run: StdRwLock::new(None),
            failure_logs: None,
        }
    }

    /// Keep the log of every failed or cancelled execution under `dir`
    pub fn with_failure_logs(mut self, dir: Dir) -> Self {
        self.failure_logs = Some(dir);
        self
    }

    /// Resume the stored state for this queue, or start a fresh one.
    ///
    /// A stored state tracking a different queue is replaced.
    pub async fn initialize(
        &self,
        descriptors: Vec<OperationDescriptor>,
    ) -> Result<DeploymentState, ProvisionError> {
        let _slot = self.try_acquire_slot()?;

        let mut queue = match self.store.load().await? {
            Some(state) if state.matches_queue(&descriptors) => {
                info!(
                    "Resuming deployment: {}/{} operations completed",
                    state.completed_ids.len(),
                    state.operations.len()
                );
                OperationQueue::new(state)
            }
            Some(_) => {
                warn!("Stored deployment state tracks a different queue, starting over");
                OperationQueue::from_descriptors(descriptors)?
            }
            None => {
                info!("Starting new deployment with {} operations", descriptors.len());
                OperationQueue::from_descriptors(descriptors)?
            }
        };

        let interrupted = queue.recover_interrupted();
        if !interrupted.is_empty() {
            warn!("Operations interrupted by a previous run: {:?}", interrupted);
        }

        self.store.save(queue.state()).await?;
        let state = queue.state().clone();
        *self.queue.lock().await = Some(queue);
        Ok(state)
    }

    /// Current state snapshot
    pub async fn snapshot(&self) -> Option<DeploymentState> {
        self.queue.lock().await.as_ref().map(|q| q.state().clone())
    }

    pub async fn next_operation(&self) -> Result<NextOperation, ProvisionError> {
        let queue = self.queue.lock().await;
        Ok(Self::initialized(&queue)?.next_operation())
    }

    pub async fn progress(&self) -> Result<Progress, ProvisionError> {
        let queue = self.queue.lock().await;
        let queue = Self::initialized(&queue)?;
        let state = queue.state();
        let current = state.operations.get(state.current_index);

        Ok(Progress {
            total: state.operations.len(),
            completed: state.completed_ids.len(),
            failed: state.failed_ids.len(),
            current_index: state.current_index,
            current_phase: current.map(|op| op.phase.clone()),
            current_title: current.map(|op| op.title.clone()),
        })
    }

    /// Report of the most recent execution, kept for inspection
    pub fn last_run(&self) -> Option<RunReport> {
        self.last_run
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Id of the operation currently executing
    pub fn active_operation(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(|active| active.operation_id.clone())
    }

    /// Run the next runnable operation to a terminal outcome.
    ///
    /// Fails with [`ProvisionError::ExecutionInProgress`] if an execution is
    /// already open.
    pub async fn run_next(
        &self,
        progress: Option<&mpsc::UnboundedSender<ProgressEvent>>,
    ) -> Result<RunResult, ProvisionError> {
        let _slot = self.try_acquire_slot()?;

        // registered before the first await
        let (cancel_handle, mut cancel_signal) = cancellation();
        self.set_active(Some(ActiveExecution {
            operation_id: None,
            cancel: cancel_handle,
        }));
        let _active = ActiveGuard(self);

        let operation = match self.next_operation().await? {
            NextOperation::Ready(op) => op,
            NextOperation::Blocked(op) => {
                info!("Queue blocked by operation {}", op.id);
                return Ok(RunResult::Blocked(op));
            }
            NextOperation::Complete => {
                info!("All operations completed");
                return Ok(RunResult::Complete);
            }
        };
        self.set_active_operation(&operation.id);

        let inventory = self.topology.inventory().await?;

        self.update(|queue| queue.mark_running(&operation.id)).await?;

        info!("Starting operation {}: {}", operation.id, operation.title);
        let execution = self
            .executor
            .execute(&operation, inventory, progress, &mut cancel_signal)
            .await;
        let outcome = execution.outcome;

        let applied = self
            .update(|queue| match outcome.status {
                ExecutionStatus::Success => queue.mark_completed(&operation.id).map(|_| ()),
                ExecutionStatus::Error => queue
                    .mark_failed(&operation.id, outcome.message.clone())
                    .map(|_| ()),
                ExecutionStatus::Cancelled => queue
                    .mark_failed(&operation.id, CANCELLED_MESSAGE)
                    .map(|_| ()),
            })
            .await;

        let report = RunReport {
            operation_id: operation.id.clone(),
            title: operation.title.clone(),
            outcome,
        };
        *self.last_run.write().unwrap_or_else(|e| e.into_inner()) = Some(report.clone());

        if !report.outcome.is_success() {
            if let Some(dir) = &self.failure_logs {
                if let Err(e) = failures::write_failure_log(dir, &operation, &report.outcome).await {
                    warn!("Failed to write failure log for {}: {}", operation.id, e);
                }
            }
        }

        self.set_active(None);
        if let Some(ack) = execution.cancel_ack {
            ack.acknowledge();
        }
        drop(cancel_signal);

        applied?;
        info!(
            "Operation {} finished: {:?} ({})",
            report.operation_id, report.outcome.status, report.outcome.message
        );
        Ok(RunResult::Ran(Box::new(report)))
    }

    /// Cancel the running execution.
    ///
    /// Returns once the channel is closed and the operation's terminal state
    /// is persisted. The remote process is not guaranteed to stop.
    pub async fn cancel(&self) -> bool {
        let handle = self
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|active| (active.operation_id.clone(), active.cancel.clone()));

        match handle {
            Some((id, cancel)) => {
                info!(
                    "Cancelling operation {}",
                    id.as_deref().unwrap_or("not yet started")
                );
                cancel.cancel().await
            }
            None => false,
        }
    }

    /// Return failed operations to pending so the queue can continue
    pub async fn retry_failed(&self) -> Result<Vec<String>, ProvisionError> {
        let _slot = self.try_acquire_slot()?;
        self.update(|queue| Ok(queue.reset_failed())).await
    }

    /// Discard all progress and start the same queue over
    pub async fn reset(&self) -> Result<DeploymentState, ProvisionError> {
        let _slot = self.try_acquire_slot()?;

        let descriptors = {
            let queue = self.queue.lock().await;
            Self::initialized(&queue)?
                .state()
                .operations
                .iter()
                .map(|op| OperationDescriptor {
                    id: op.id.clone(),
                    phase: op.phase.clone(),
                    title: op.title.clone(),
                    name: op.name.clone(),
                    extra_vars: op.extra_vars.clone(),
                    environment: op.environment.clone(),
                })
                .collect::<Vec<_>>()
        };

        self.store.clear().await?;
        let queue = OperationQueue::from_descriptors(descriptors)?;
        self.store.save(queue.state()).await?;

        let state = queue.state().clone();
        *self.queue.lock().await = Some(queue);
        *self.last_run.write().unwrap_or_else(|e| e.into_inner()) = None;
        info!("Deployment state reset");
        Ok(state)
    }

    /// Apply a mutation and persist it.
    ///
    /// If the save fails, a start (anything left running) is dropped; a
    /// terminal transition is still applied in memory and the error returned.
    async fn update<T>(
        &self,
        mutate: impl FnOnce(&mut OperationQueue) -> Result<T, ProvisionError>,
    ) -> Result<T, ProvisionError> {
        let mut guard = self.queue.lock().await;
        let mut queue = Self::initialized(&guard)?.clone();

        let result = mutate(&mut queue)?;
        if let Err(e) = self.store.save(queue.state()).await {
            error!("Failed to persist deployment state: {}", e);
            if queue
                .state()
                .operations
                .iter()
                .all(|op| op.status != OperationStatus::Running)
            {
                *guard = Some(queue);
            }
            return Err(e);
        }

        *guard = Some(queue);
        Ok(result)
    }

    fn initialized(queue: &Option<OperationQueue>) -> Result<&OperationQueue, ProvisionError> {
        queue
            .as_ref()
            .ok_or_else(|| ProvisionError::ValidationError("orchestrator not initialized".to_string()))
    }

    fn try_acquire_slot(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, ProvisionError> {
        self.execution_slot.try_lock().map_err(|_| {
            let running = self.active_operation().unwrap_or_else(|| "unknown".to_string());
            ProvisionError::ExecutionInProgress(running)
        })
    }

    fn set_active(&self, active: Option<ActiveExecution>) {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = active;
    }

    fn set_active_operation(&self, operation_id: &str) {
        if let Some(active) = self.active.lock().unwrap_or_else(|e| e.into_inner()).as_mut() {
            active.operation_id = Some(operation_id.to_string());
        }
    }
}

/// Clears the active execution when `run_next` returns early
struct ActiveGuard<'a>(&'a Orchestrator);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.set_active(None);
    }
}
