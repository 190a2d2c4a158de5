//! Thinkube provisioner - Entry Point
//!
//! Runs the installation operation queue against the installer backend.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use provisioner::app::options::{AppOptions, Command, ServerOptions};
use provisioner::app::run::run;
use provisioner::deploy::runner;
use provisioner::logs::{init_logging, LogLevel, LogOptions};
use provisioner::storage::layout::StorageLayout;
use provisioner::storage::settings::Settings;
use provisioner::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to render version: {e}"),
        }
        return;
    }

    let layout = match cli_args.get("home") {
        Some(home) => StorageLayout::new(home),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file
    let settings = Settings::load_or_default(&layout.settings_file()).await;

    // Initialize logging
    let log_level = match cli_args.get("log-level") {
        Some(level) => match level.parse::<LogLevel>() {
            Ok(level) => level,
            Err(e) => {
                eprintln!("{e}");
                return;
            }
        },
        None => settings.log_level.clone(),
    };
    let log_options = LogOptions {
        log_level,
        json_format: settings.json_logs,
        log_dir: Some(layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let command = if cli_args.contains_key("status") {
        Command::Status
    } else if cli_args.contains_key("reset") {
        Command::Reset
    } else if cli_args.contains_key("retry") {
        Command::Retry
    } else {
        Command::Run
    };

    // Run the queue
    let options = AppOptions {
        backend_base_url: cli_args
            .get("backend")
            .cloned()
            .unwrap_or_else(|| settings.backend.base_url.clone()),
        session: cli_args
            .get("session")
            .cloned()
            .unwrap_or_else(|| settings.session.clone()),
        queue_file: cli_args
            .get("queue")
            .map(PathBuf::from)
            .unwrap_or_else(|| layout.queue_file().path().to_path_buf()),
        inventory_file: cli_args
            .get("inventory")
            .map(PathBuf::from)
            .unwrap_or_else(|| layout.inventory_file().path().to_path_buf()),
        layout,
        request_timeout: Duration::from_secs(settings.backend.request_timeout_secs),
        connect_timeout: Duration::from_secs(settings.backend.connect_timeout_secs),
        enable_status_server: settings.enable_status_server || cli_args.contains_key("serve"),
        server: ServerOptions {
            host: settings.status_server.host.clone(),
            port: settings.status_server.port,
        },
        runner: runner::Options {
            auto_advance: settings.auto_advance && !cli_args.contains_key("step"),
            auto_advance_delay: Duration::from_millis(settings.auto_advance_delay_ms),
        },
        ..Default::default()
    };

    info!("Running provisioner with options: {:?}", options);
    match run(command, options, await_shutdown_signal()).await {
        Ok(Some(exit)) => info!("Provisioner stopped: {:?}", exit),
        Ok(None) => {}
        Err(e) => {
            error!("Failed to run the provisioner: {e}");
            std::process::exit(1);
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            return;
        }
        info!("Ctrl+C received, shutting down...");
    }
}
