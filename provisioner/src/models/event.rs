//! Progress events streamed back by the remote execution service

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ProvisionError;

/// Status carried by a `complete` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompleteStatus {
    Success,
    Error,
}

/// One inbound protocol event.
///
/// Frames are JSON objects tagged by `type`. Unknown extra fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Start {
        #[serde(default)]
        message: String,
    },
    Play {
        #[serde(default)]
        message: String,
    },
    Task {
        task_name: String,
        #[serde(default)]
        task_number: u32,
        #[serde(default)]
        message: String,
    },
    Ok {
        task: String,
        #[serde(default)]
        message: String,
    },
    Changed {
        task: String,
        #[serde(default)]
        message: String,
    },
    Skipped {
        task: String,
        #[serde(default)]
        message: String,
    },
    Failed {
        task: String,
        #[serde(default)]
        message: String,
    },
    Output {
        #[serde(default)]
        message: String,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Complete {
        status: CompleteStatus,
        #[serde(default)]
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        return_code: Option<i32>,
    },
}

/// Event kind without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Start,
    Play,
    Task,
    Ok,
    Changed,
    Skipped,
    Failed,
    Output,
    Error,
    Complete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Start => "start",
            EventKind::Play => "play",
            EventKind::Task => "task",
            EventKind::Ok => "ok",
            EventKind::Changed => "changed",
            EventKind::Skipped => "skipped",
            EventKind::Failed => "failed",
            EventKind::Output => "output",
            EventKind::Error => "error",
            EventKind::Complete => "complete",
        };
        f.write_str(name)
    }
}

impl ProgressEvent {
    /// Parse one text frame
    pub fn from_frame(frame: &str) -> Result<Self, ProvisionError> {
        serde_json::from_str(frame)
            .map_err(|e| ProvisionError::ProtocolError(format!("{e}: {frame}")))
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ProgressEvent::Start { .. } => EventKind::Start,
            ProgressEvent::Play { .. } => EventKind::Play,
            ProgressEvent::Task { .. } => EventKind::Task,
            ProgressEvent::Ok { .. } => EventKind::Ok,
            ProgressEvent::Changed { .. } => EventKind::Changed,
            ProgressEvent::Skipped { .. } => EventKind::Skipped,
            ProgressEvent::Failed { .. } => EventKind::Failed,
            ProgressEvent::Output { .. } => EventKind::Output,
            ProgressEvent::Error { .. } => EventKind::Error,
            ProgressEvent::Complete { .. } => EventKind::Complete,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ProgressEvent::Start { message }
            | ProgressEvent::Play { message }
            | ProgressEvent::Task { message, .. }
            | ProgressEvent::Ok { message, .. }
            | ProgressEvent::Changed { message, .. }
            | ProgressEvent::Skipped { message, .. }
            | ProgressEvent::Failed { message, .. }
            | ProgressEvent::Output { message }
            | ProgressEvent::Error { message }
            | ProgressEvent::Complete { message, .. } => message,
        }
    }

    /// Task the event refers to, for task-related kinds
    pub fn task(&self) -> Option<&str> {
        match self {
            ProgressEvent::Task { task_name, .. } => Some(task_name),
            ProgressEvent::Ok { task, .. }
            | ProgressEvent::Changed { task, .. }
            | ProgressEvent::Skipped { task, .. }
            | ProgressEvent::Failed { task, .. } => Some(task),
            _ => None,
        }
    }

    /// `complete` and `error` end the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressEvent::Complete { .. } | ProgressEvent::Error { .. }
        )
    }
}
