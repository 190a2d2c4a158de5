//! Failure logs
//!
//! Every failed or cancelled execution leaves a plain text log under the
//! failures directory, one file per execution, named
//! `<operation-id>-<timestamp>.log`.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::deploy::executor::ExecutionOutcome;
use crate::errors::ProvisionError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::operation::Operation;

/// Write the ordered execution log of a failed or cancelled run
pub async fn write_failure_log(
    dir: &Dir,
    operation: &Operation,
    outcome: &ExecutionOutcome,
) -> Result<File, ProvisionError> {
    let now = Utc::now();
    let file = dir.file(&format!(
        "{}-{}.log",
        operation.id,
        now.format("%Y%m%d-%H%M%S%.3f")
    ));

    file.write_atomic(render(operation, outcome, now).as_bytes())
        .await?;
    info!("Failure log written to {}", file.path().display());
    Ok(file)
}

fn render(operation: &Operation, outcome: &ExecutionOutcome, at: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Operation: {} ({})", operation.id, operation.title);
    let _ = writeln!(out, "Phase: {}", operation.phase);
    let _ = writeln!(out, "Playbook: {}", operation.name);
    let _ = writeln!(out, "Finished: {}", at.to_rfc3339());
    let _ = writeln!(out, "Status: {:?}", outcome.status);
    if let Some(failure) = outcome.failure {
        let _ = writeln!(out, "Failure: {:?}", failure);
    }
    if let Some(code) = outcome.return_code {
        let _ = writeln!(out, "Return code: {}", code);
    }
    let _ = writeln!(out, "Message: {}", outcome.message);
    let _ = writeln!(
        out,
        "Tasks: {} total, {} ok, {} changed, {} failed, {} skipped",
        outcome.summary.total,
        outcome.summary.ok,
        outcome.summary.changed,
        outcome.summary.failed,
        outcome.summary.skipped
    );

    out.push_str("\n=== Log ===\n");
    for entry in &outcome.log {
        match &entry.task {
            Some(task) => {
                let _ = writeln!(out, "[{}] ({}) {}", entry.kind, task, entry.message);
            }
            None => {
                let _ = writeln!(out, "[{}] {}", entry.kind, entry.message);
            }
        }
    }
    out
}
