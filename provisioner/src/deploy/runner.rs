//! Queue runner with auto-advance

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::deploy::orchestrator::{Orchestrator, RunReport, RunResult};
use crate::errors::ProvisionError;
use crate::models::event::ProgressEvent;
use crate::models::operation::Operation;

/// Runner options
#[derive(Debug, Clone)]
pub struct Options {
    /// Continue with the next operation after a success
    pub auto_advance: bool,

    /// Grace interval after a success before the next operation starts,
    /// so the operator can read the result
    pub auto_advance_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            auto_advance: true,
            auto_advance_delay: Duration::from_secs(2),
        }
    }
}

/// Why the runner stopped
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerExit {
    /// Every operation has completed
    Complete,

    /// A failed operation halts the queue
    Blocked(Operation),

    /// The last execution did not succeed; auto-advance is suppressed
    Halted(Box<RunReport>),

    /// Auto-advance is off and one operation ran
    Stepped(Box<RunReport>),

    /// The shutdown signal fired
    Shutdown,
}

/// Run operations until the queue completes, halts, or shutdown is requested.
///
/// On shutdown the in-flight execution is cancelled and its terminal state
/// persisted before returning.
pub async fn run<S, F>(
    options: &Options,
    orchestrator: &Orchestrator,
    progress: Option<&mpsc::UnboundedSender<ProgressEvent>>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) -> Result<RunnerExit, ProvisionError>
where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Queue runner starting...");

    loop {
        let mut shutdown_requested = false;

        let run = orchestrator.run_next(progress);
        tokio::pin!(run);

        // run_next registers its cancel handle on first poll
        let result = tokio::select! {
            biased;
            result = &mut run => result,
            _ = &mut shutdown_signal => {
                info!("Shutdown requested, cancelling current operation...");
                shutdown_requested = true;
                let (result, cancelled) = tokio::join!(&mut run, orchestrator.cancel());
                debug!("Cancel delivered: {}", cancelled);
                result
            }
        };

        let report = match result? {
            RunResult::Complete => {
                info!("Deployment queue complete");
                return Ok(RunnerExit::Complete);
            }
            RunResult::Blocked(op) => {
                warn!(
                    "Deployment blocked by {}: {}",
                    op.id,
                    op.error.as_deref().unwrap_or("in progress")
                );
                return Ok(RunnerExit::Blocked(op));
            }
            RunResult::Ran(report) => report,
        };

        if shutdown_requested {
            return Ok(RunnerExit::Shutdown);
        }

        if !report.outcome.is_success() {
            warn!(
                "Operation {} did not succeed, stopping: {}",
                report.operation_id, report.outcome.message
            );
            return Ok(RunnerExit::Halted(report));
        }

        if !options.auto_advance {
            return Ok(RunnerExit::Stepped(report));
        }

        debug!(
            "Advancing to next operation in {:?}",
            options.auto_advance_delay
        );
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Queue runner shutting down...");
                return Ok(RunnerExit::Shutdown);
            }
            _ = sleep_fn(options.auto_advance_delay) => {}
        }
    }
}
