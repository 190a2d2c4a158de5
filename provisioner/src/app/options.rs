//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::runner;
use crate::storage::layout::StorageLayout;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Installer backend base URL
    pub backend_base_url: String,

    /// Deployment state document key
    pub session: String,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Operation queue produced by the queue builder
    pub queue_file: PathBuf,

    /// Compiled inventory handed to every operation
    pub inventory_file: PathBuf,

    /// Backend HTTP request timeout
    pub request_timeout: Duration,

    /// Execution channel connect timeout
    pub connect_timeout: Duration,

    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,

    /// Enable local status server
    pub enable_status_server: bool,

    /// Status server configuration
    pub server: ServerOptions,

    /// Queue runner options
    pub runner: runner::Options,
}

impl Default for AppOptions {
    fn default() -> Self {
        let layout = StorageLayout::default();
        Self {
            backend_base_url: "http://localhost:8000".to_string(),
            session: "deployment-state".to_string(),
            queue_file: layout.queue_file().path().to_path_buf(),
            inventory_file: layout.inventory_file().path().to_path_buf(),
            layout,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            max_shutdown_delay: Duration::from_secs(30),
            enable_status_server: false,
            server: ServerOptions::default(),
            runner: runner::Options::default(),
        }
    }
}

/// What to do with the deployment session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Command {
    /// Run the queue
    #[default]
    Run,

    /// Print progress and exit
    Status,

    /// Return failed operations to pending, then run
    Retry,

    /// Discard stored progress, then run
    Reset,
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}
