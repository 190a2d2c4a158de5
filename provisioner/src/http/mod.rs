//! Backend HTTP client

pub mod client;
pub mod deployment_state;
