//! Task summary aggregated over one execution's event stream

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::event::{EventKind, ProgressEvent};

/// Per-execution task counts.
///
/// A task may report one outcome per remote target; each `(task, outcome)`
/// pair is counted once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub total: usize,
    pub ok: usize,
    pub changed: usize,
    pub skipped: usize,
    pub failed: usize,

    /// Name of the most recently announced task
    pub current_task: Option<String>,

    /// Display number of the most recently announced task
    pub current_task_number: Option<u32>,

    #[serde(skip)]
    tasks: HashSet<String>,

    #[serde(skip)]
    outcomes: HashSet<(String, EventKind)>,
}

impl TaskSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the summary
    pub fn record(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Task {
                task_name,
                task_number,
                ..
            } => {
                if self.tasks.insert(task_name.clone()) {
                    self.total += 1;
                }
                self.current_task = Some(task_name.clone());
                self.current_task_number = Some(*task_number);
            }
            ProgressEvent::Ok { task, .. }
            | ProgressEvent::Changed { task, .. }
            | ProgressEvent::Skipped { task, .. }
            | ProgressEvent::Failed { task, .. } => {
                let kind = event.kind();
                if !self.outcomes.insert((task.clone(), kind)) {
                    return;
                }
                match kind {
                    EventKind::Ok => self.ok += 1,
                    EventKind::Changed => self.changed += 1,
                    EventKind::Skipped => self.skipped += 1,
                    EventKind::Failed => self.failed += 1,
                    _ => {}
                }
            }
            _ => {}
        }
    }
}
