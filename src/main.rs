//! socks5d - SOCKS5 proxy server

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use socks5d::config::{CliArgs, Config, ConfigManager};
use socks5d::{Server, ShutdownCoordinator};

/// Exit status for usage output and configuration errors
const USAGE_EXIT_CODE: u8 = 128;

fn main() -> ExitCode {
    let args = match CliArgs::try_parse() {
        Ok(args) => args,
        Err(e) if e.kind() == ErrorKind::DisplayVersion => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) if e.kind() == ErrorKind::DisplayHelp => {
            let _ = e.print();
            return ExitCode::from(USAGE_EXIT_CODE);
        }
        Err(e) => {
            let _ = e.print();
            eprintln!();
            let _ = CliArgs::command().print_long_help();
            return ExitCode::from(USAGE_EXIT_CODE);
        }
    };

    let print_config = args.print_config;
    let config = match ConfigManager::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}\n", e);
            let _ = CliArgs::command().print_long_help();
            return ExitCode::from(USAGE_EXIT_CODE);
        }
    };

    if print_config {
        return match config.to_redacted_json() {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {:#}", e);
                ExitCode::FAILURE
            }
        };
    }

    init_tracing(&config.log_level);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen,
        auth = ?config.auth.method,
        "Starting socks5d"
    );

    let cancel = CancellationToken::new();
    let shutdown = ShutdownCoordinator::new(cancel.clone());
    let server = Arc::new(Server::new(config.socks5_config()?, cancel.clone()));
    let tracker = server.tracker().clone();

    let listen = config.server.listen;
    let mut server_task = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.listen_and_serve(listen).await })
    };

    let result = tokio::select! {
        joined = &mut server_task => joined?,
        signal = shutdown.listen_for_signals() => {
            if let Err(e) = signal {
                error!("Error setting up signal handlers: {}", e);
                shutdown.trigger();
            }
            server_task.await?
        }
    };

    // an accept or bind failure ends the server on its own
    shutdown.trigger();
    shutdown.drain(&tracker).await;

    if result.is_ok() {
        info!("Server shutdown complete");
    }
    result
}

/// Initialize tracing/logging; RUST_LOG takes precedence over the configured level
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true),
        )
        .with(env_filter)
        .init();
}
