//! Execution channel to the remote provisioning service

pub mod ws;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ProvisionError;

/// The single parameter message sent after a channel opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub environment: HashMap<String, String>,
    pub extra_vars: serde_json::Map<String, serde_json::Value>,

    /// Opaque topology document, passed through unmodified
    pub inventory: String,
}

/// Opens one channel per execution, addressed by operation name
#[async_trait]
pub trait ExecutionTransport: Send + Sync {
    async fn open(&self, operation_name: &str) -> Result<Box<dyn ExecutionChannel>, ProvisionError>;
}

/// A bidirectional streaming channel.
///
/// `recv` must be cancel safe: the executor races it against cancellation.
#[async_trait]
pub trait ExecutionChannel: Send {
    /// Send the parameter message
    async fn send(&mut self, request: &ExecutionRequest) -> Result<(), ProvisionError>;

    /// Next inbound text frame, `None` once the channel has closed
    async fn recv(&mut self) -> Option<Result<String, ProvisionError>>;

    /// Close locally without waiting for the remote side
    async fn close(&mut self);
}
