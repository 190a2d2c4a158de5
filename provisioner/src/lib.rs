//! Thinkube provisioner library
//!
//! Sequences platform installation operations against the installer
//! backend, streaming their progress and persisting queue state so an
//! interrupted installation can resume.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod server;
pub mod state;
pub mod storage;
pub mod stream;
pub mod topology;
pub mod utils;
