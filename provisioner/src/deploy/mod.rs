//! Deployment orchestration

pub mod executor;
pub mod failures;
pub mod orchestrator;
pub mod queue;
pub mod runner;
pub mod summary;
