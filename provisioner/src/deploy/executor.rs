//! Operation executor
//!
//! Runs exactly one operation over one streaming channel and reduces the
//! inbound event stream into an [`ExecutionOutcome`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::deploy::summary::TaskSummary;
use crate::errors::ProvisionError;
use crate::models::event::{CompleteStatus, EventKind, ProgressEvent};
use crate::models::operation::Operation;
use crate::stream::{ExecutionChannel, ExecutionRequest, ExecutionTransport};

/// Message synthesized when the channel closes before a terminal event
pub const CONNECTION_LOST: &str = "connection lost";

/// Message reported for an operator cancellation
pub const CANCELLED_MESSAGE: &str = "Cancelled by operator";

/// Terminal status of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
    Cancelled,
}

/// Why an execution ended in error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Channel failed to open, or dropped mid-stream
    Connection,

    /// The remote side sent an `error` event
    Remote,

    /// The remote side sent `complete` with `status = error`
    Operation,
}

/// One entry of the ordered execution log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub kind: EventKind,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
}

impl From<&ProgressEvent> for LogEntry {
    fn from(event: &ProgressEvent) -> Self {
        Self {
            kind: event.kind(),
            message: event.message().to_string(),
            task: event.task().map(str::to_string),
        }
    }
}

/// Terminal result of one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_code: Option<i32>,

    /// Every event as received, plus synthesized and protocol error entries
    pub log: Vec<LogEntry>,

    pub summary: TaskSummary,

    /// Protocol errors seen while the stream continued
    pub protocol_errors: usize,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// The outcome as an error, if it is a failure
    pub fn to_error(&self) -> Option<ProvisionError> {
        match self.failure? {
            FailureKind::Connection | FailureKind::Remote => {
                Some(ProvisionError::ConnectionError(self.message.clone()))
            }
            FailureKind::Operation => Some(ProvisionError::OperationFailure(self.message.clone())),
        }
    }
}

/// Requests cancellation of a running execution
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: mpsc::Sender<oneshot::Sender<()>>,
}

impl CancelHandle {
    /// Request cancellation and wait until the execution acknowledges it.
    ///
    /// Returns `false` if the execution finished without being cancelled.
    pub async fn cancel(&self) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(ack_tx).await.is_err() {
            return false;
        }
        ack_rx.await.is_ok()
    }
}

/// Receiving side of a [`CancelHandle`]
#[derive(Debug)]
pub struct CancelSignal {
    rx: mpsc::Receiver<oneshot::Sender<()>>,
}

/// Held by whoever must finish local bookkeeping before a cancel returns
#[derive(Debug)]
pub struct CancelAck(oneshot::Sender<()>);

impl CancelAck {
    pub fn acknowledge(self) {
        let _ = self.0.send(());
    }
}

/// Create a linked cancel handle and signal
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = mpsc::channel(1);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Outcome plus the pending cancel acknowledgement, if cancelled
#[derive(Debug)]
pub struct Execution {
    pub outcome: ExecutionOutcome,
    pub cancel_ack: Option<CancelAck>,
}

/// Operation executor
pub struct OperationExecutor {
    transport: Arc<dyn ExecutionTransport>,
}

impl OperationExecutor {
    pub fn new(transport: Arc<dyn ExecutionTransport>) -> Self {
        Self { transport }
    }

    /// Execute one operation to a terminal outcome.
    ///
    /// Each call starts from a clean log and summary; a retry is a full re-run.
    pub async fn execute(
        &self,
        operation: &Operation,
        inventory: String,
        progress: Option<&mpsc::UnboundedSender<ProgressEvent>>,
        cancel: &mut CancelSignal,
    ) -> Execution {
        info!("Executing operation {} ({})", operation.id, operation.name);
        let mut run = RunState::new(progress);

        let request = ExecutionRequest {
            environment: operation.environment.clone(),
            extra_vars: operation.extra_vars.clone(),
            inventory,
        };

        let opened = tokio::select! {
            biased;
            Some(ack) = cancel.rx.recv() => {
                return run.cancelled(CancelAck(ack));
            }
            opened = self.transport.open(&operation.name) => opened,
        };

        let mut channel = match opened {
            Ok(channel) => channel,
            Err(e) => {
                error!("Failed to open channel for {}: {}", operation.id, e);
                return run.connection_failed(e.to_string());
            }
        };

        if let Err(e) = channel.send(&request).await {
            error!("Failed to send parameters for {}: {}", operation.id, e);
            channel.close().await;
            return run.connection_failed(e.to_string());
        }

        let execution = run.consume(channel.as_mut(), cancel).await;
        debug!(
            "Operation {} finished with {:?}: {}",
            operation.id, execution.outcome.status, execution.outcome.message
        );
        execution
    }
}

struct RunState<'a> {
    progress: Option<&'a mpsc::UnboundedSender<ProgressEvent>>,
    log: Vec<LogEntry>,
    summary: TaskSummary,
    protocol_errors: usize,
}

impl<'a> RunState<'a> {
    fn new(progress: Option<&'a mpsc::UnboundedSender<ProgressEvent>>) -> Self {
        Self {
            progress,
            log: Vec::new(),
            summary: TaskSummary::new(),
            protocol_errors: 0,
        }
    }

    async fn consume(
        mut self,
        channel: &mut dyn ExecutionChannel,
        cancel: &mut CancelSignal,
    ) -> Execution {
        loop {
            let frame = tokio::select! {
                biased;
                Some(ack) = cancel.rx.recv() => {
                    channel.close().await;
                    return self.cancelled(CancelAck(ack));
                }
                frame = channel.recv() => frame,
            };

            let text = match frame {
                Some(Ok(text)) => text,
                Some(Err(e @ ProvisionError::ProtocolError(_))) => {
                    warn!("{}", e);
                    self.protocol_error(e.to_string());
                    continue;
                }
                Some(Err(e)) => {
                    warn!("Execution channel dropped: {}", e);
                    channel.close().await;
                    return self.connection_lost();
                }
                None => return self.connection_lost(),
            };

            let event = match ProgressEvent::from_frame(&text) {
                Ok(event) => event,
                Err(e) => {
                    warn!("{}", e);
                    self.protocol_error(e.to_string());
                    continue;
                }
            };

            self.log.push(LogEntry::from(&event));
            self.summary.record(&event);
            self.emit(event.clone());

            match event {
                ProgressEvent::Complete {
                    status,
                    message,
                    return_code,
                } => {
                    channel.close().await;
                    let (status, failure) = match status {
                        CompleteStatus::Success => (ExecutionStatus::Success, None),
                        CompleteStatus::Error => {
                            (ExecutionStatus::Error, Some(FailureKind::Operation))
                        }
                    };
                    return self.finish(status, message, failure, return_code);
                }
                ProgressEvent::Error { message } => {
                    channel.close().await;
                    return self.finish(
                        ExecutionStatus::Error,
                        message,
                        Some(FailureKind::Remote),
                        None,
                    );
                }
                _ => {}
            }
        }
    }

    fn protocol_error(&mut self, message: String) {
        self.protocol_errors += 1;
        self.log.push(LogEntry {
            kind: EventKind::Error,
            message,
            task: None,
        });
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(progress) = self.progress {
            // the observer going away never affects the execution
            let _ = progress.send(event);
        }
    }

    fn connection_lost(mut self) -> Execution {
        self.log.push(LogEntry {
            kind: EventKind::Error,
            message: CONNECTION_LOST.to_string(),
            task: None,
        });
        self.emit(ProgressEvent::Complete {
            status: CompleteStatus::Error,
            message: CONNECTION_LOST.to_string(),
            return_code: None,
        });
        self.finish(
            ExecutionStatus::Error,
            CONNECTION_LOST.to_string(),
            Some(FailureKind::Connection),
            None,
        )
    }

    fn connection_failed(mut self, reason: String) -> Execution {
        self.log.push(LogEntry {
            kind: EventKind::Error,
            message: reason.clone(),
            task: None,
        });
        self.emit(ProgressEvent::Error {
            message: reason.clone(),
        });
        self.finish(
            ExecutionStatus::Error,
            reason,
            Some(FailureKind::Connection),
            None,
        )
    }

    fn cancelled(mut self, ack: CancelAck) -> Execution {
        info!("Execution cancelled by operator");
        self.log.push(LogEntry {
            kind: EventKind::Output,
            message: CANCELLED_MESSAGE.to_string(),
            task: None,
        });
        let mut execution = self.finish(
            ExecutionStatus::Cancelled,
            CANCELLED_MESSAGE.to_string(),
            None,
            None,
        );
        execution.cancel_ack = Some(ack);
        execution
    }

    fn finish(
        self,
        status: ExecutionStatus,
        message: String,
        failure: Option<FailureKind>,
        return_code: Option<i32>,
    ) -> Execution {
        Execution {
            outcome: ExecutionOutcome {
                status,
                message,
                failure,
                return_code,
                log: self.log,
                summary: self.summary,
                protocol_errors: self.protocol_errors,
            },
            cancel_ack: None,
        }
    }
}
