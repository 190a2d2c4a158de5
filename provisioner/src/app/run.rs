//! Main application run loop

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::options::{AppOptions, Command};
use crate::deploy::orchestrator::{Orchestrator, Progress};
use crate::deploy::queue::load_descriptors;
use crate::deploy::runner::{self, RunnerExit};
use crate::errors::ProvisionError;
use crate::filesys::file::File;
use crate::http::client::HttpClient;
use crate::models::event::{EventKind, ProgressEvent};
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::state::file::FileBacking;
use crate::state::remote::RemoteBacking;
use crate::state::store::StateStore;
use crate::stream::ws::WsTransport;
use crate::topology::FileTopology;

/// Run the provisioner over one deployment session
pub async fn run(
    command: Command,
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<Option<RunnerExit>, ProvisionError> {
    info!("Initializing provisioner...");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.max_shutdown_delay);

    tokio::spawn(async move {
        shutdown_signal.await;
        let _ = shutdown_tx.send(true);
    });

    let orchestrator = match init(&options).await {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(e) => {
            error!("Failed to start provisioner: {}", e);
            return Err(e);
        }
    };

    match command {
        Command::Status => {
            log_progress(&orchestrator.progress().await?);
            return Ok(None);
        }
        Command::Retry => {
            let retried = orchestrator.retry_failed().await?;
            info!("Retrying failed operations: {:?}", retried);
        }
        Command::Reset => {
            orchestrator.reset().await?;
        }
        Command::Run => {}
    }

    let resume = Arc::new(Notify::new());
    if options.enable_status_server {
        init_status_server(
            &options,
            orchestrator.clone(),
            resume.clone(),
            &mut shutdown_manager,
            &shutdown_rx,
        )
        .await?;
    }

    let (progress_tx, progress_rx) = mpsc::unbounded_channel();
    shutdown_manager.with_reporter_handle(tokio::spawn(report_progress(progress_rx)))?;

    let exit = loop {
        let exit = runner::run(
            &options.runner,
            orchestrator.as_ref(),
            Some(&progress_tx),
            tokio::time::sleep,
            shutdown_future(&shutdown_rx),
        )
        .await;

        let exit = match exit {
            Ok(exit) => exit,
            Err(e) => {
                error!("Queue runner failed: {}", e);
                drop(progress_tx);
                shutdown_manager.shutdown().await?;
                return Err(e);
            }
        };
        log_progress(&orchestrator.progress().await?);

        // the status server keeps the session open for retries
        if !options.enable_status_server || exit == RunnerExit::Shutdown {
            break exit;
        }
        info!("Waiting for a retry request...");
        tokio::select! {
            _ = shutdown_future(&shutdown_rx) => break RunnerExit::Shutdown,
            _ = resume.notified() => {}
        }
    };

    drop(progress_tx);
    shutdown_manager.shutdown().await?;
    Ok(Some(exit))
}

fn shutdown_future(shutdown_rx: &watch::Receiver<bool>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    let mut shutdown_rx = shutdown_rx.clone();
    Box::pin(async move {
        let _ = shutdown_rx.wait_for(|stop| *stop).await;
    })
}

fn log_progress(progress: &Progress) {
    info!(
        "Progress: {}/{} completed, {} failed, next: {}",
        progress.completed,
        progress.total,
        progress.failed,
        progress.current_title.as_deref().unwrap_or("none")
    );
}

async fn report_progress(mut progress_rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = progress_rx.recv().await {
        match event.kind() {
            EventKind::Failed | EventKind::Error => {
                warn!(task = event.task().unwrap_or_default(), "[{}] {}", event.kind(), event.message())
            }
            EventKind::Output => {
                debug!("{}", event.message())
            }
            kind => info!(task = event.task().unwrap_or_default(), "[{}] {}", kind, event.message()),
        }
    }
}

// =============================== INITIALIZATION ================================== //

async fn init(options: &AppOptions) -> Result<Orchestrator, ProvisionError> {
    options.layout.setup().await?;

    let http_client = Arc::new(HttpClient::new(
        &options.backend_base_url,
        options.request_timeout,
    )?);
    let store = StateStore::new(
        Arc::new(RemoteBacking::new(http_client)),
        Arc::new(FileBacking::new(options.layout.cache_dir())),
        options.session.clone(),
    );
    let transport = Arc::new(WsTransport::new(
        &options.backend_base_url,
        options.connect_timeout,
    )?);
    let topology = Arc::new(FileTopology::new(File::new(&options.inventory_file)));

    let orchestrator = Orchestrator::new(store, transport, topology)
        .with_failure_logs(options.layout.failures_dir());

    info!("Loading operation queue from {}", options.queue_file.display());
    let descriptors = load_descriptors(&options.queue_file).await?;
    orchestrator.initialize(descriptors).await?;

    Ok(orchestrator)
}

async fn init_status_server(
    options: &AppOptions,
    orchestrator: Arc<Orchestrator>,
    resume: Arc<Notify>,
    shutdown_manager: &mut ShutdownManager,
    shutdown_rx: &watch::Receiver<bool>,
) -> Result<(), ProvisionError> {
    info!("Initializing local status server...");

    let server_state = ServerState::new(orchestrator, resume);
    let server_handle = serve(
        &options.server,
        Arc::new(server_state),
        shutdown_future(shutdown_rx),
    )
    .await?;

    shutdown_manager.with_server_handle(server_handle)?;
    Ok(())
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: watch::Sender<bool>,
    max_shutdown_delay: Duration,
    server_handle: Option<JoinHandle<Result<(), ProvisionError>>>,
    reporter_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: watch::Sender<bool>, max_shutdown_delay: Duration) -> Self {
        Self {
            shutdown_tx,
            max_shutdown_delay,
            server_handle: None,
            reporter_handle: None,
        }
    }

    fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), ProvisionError>>,
    ) -> Result<(), ProvisionError> {
        if self.server_handle.is_some() {
            return Err(ProvisionError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    fn with_reporter_handle(&mut self, handle: JoinHandle<()>) -> Result<(), ProvisionError> {
        if self.reporter_handle.is_some() {
            return Err(ProvisionError::ShutdownError("reporter_handle already set".to_string()));
        }
        self.reporter_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ProvisionError> {
        let _ = self.shutdown_tx.send(true);

        match tokio::time::timeout(self.max_shutdown_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), ProvisionError> {
        info!("Shutting down provisioner...");

        // 1. Status server
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| ProvisionError::ShutdownError(e.to_string()))??;
        }

        // 2. Progress reporter, drains once every sender is dropped
        if let Some(handle) = self.reporter_handle.take() {
            handle.await.map_err(|e| ProvisionError::ShutdownError(e.to_string()))?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
