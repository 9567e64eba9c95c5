// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]

use acp_config::SellerConfig;
use acp_offering::OfferingRegistry;
use acp_runtime::ShutdownToken;
use acp_sellerd::pidfile::PidFile;
use acp_sellerd::{offerings, run_seller};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "acp-sellerd", version, about = "ACP seller daemon")]
struct Args {
    /// Root folder containing <offering>/offering.json configs.
    #[arg(long)]
    offerings_root: Option<PathBuf>,

    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let default = if debug { "acp=debug" } else { "acp=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .init();
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(err) => {
            warn!(
                target: "acp.supervisor",
                error = %err,
                "SIGTERM handler unavailable, listening for ctrl-c only"
            );
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);

    let mut config = SellerConfig::from_env();
    if let Some(root) = args.offerings_root {
        config.offerings_root = root;
    }

    let pid = match PidFile::acquire(&config.config_dir) {
        Ok(pid) => pid,
        Err(err) => {
            error!(
                target: "acp.supervisor",
                error = %format_args!("{err:#}"),
                "refusing to start"
            );
            return ExitCode::from(1);
        }
    };

    let mut registry = OfferingRegistry::new(config.offerings_root.clone());
    offerings::register_builtin_offerings(&mut registry);

    let shutdown = ShutdownToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!(target: "acp.supervisor", "shutdown signal received");
            shutdown.shutdown();
        });
    }

    let result = run_seller(config, registry, shutdown).await;

    // Remove the PID file on both exit paths.
    drop(pid);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(
                target: "acp.supervisor",
                error = %format_args!("{err:#}"),
                "seller terminated with error"
            );
            ExitCode::from(1)
        }
    }
}
