//! Server state

use std::sync::Arc;

use tokio::sync::Notify;

use crate::deploy::orchestrator::Orchestrator;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,

    /// Wakes the app loop after failed operations are retried
    pub resume: Arc<Notify>,
}

impl ServerState {
    pub fn new(orchestrator: Arc<Orchestrator>, resume: Arc<Notify>) -> Self {
        Self {
            orchestrator,
            resume,
        }
    }
}
