//! opsh-server: single-operator remote command daemon.
//!
//! Launches operator commands in batch or pseudo-terminal mode, streams
//! their output to per-launch files, and exposes launch/status/output/stop
//! controls. The chat transport is a separate component; this binary wires
//! the control operations to a line-oriented console standing in for it.

mod config;
mod control;
mod session;

use clap::Parser;
use config::DaemonConfig;
use control::SessionControl;
use opsh_core::SessionNotifier;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

/// Identity attached to requests arriving on the local console.
const CONSOLE_OPERATOR: &str = "operator";

/// opsh-server — single-operator command session daemon
#[derive(Parser, Debug)]
#[command(name = "opsh-server", version, about = "Single-operator command session daemon")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.opsh/config.toml")]
    config: String,

    /// Directory for per-launch output files
    #[arg(long)]
    output_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Relays lifecycle notifications to the console operator.
struct ConsoleNotifier;

impl SessionNotifier for ConsoleNotifier {
    fn session_started(&self, pid: u32) {
        println!("session started (pid {pid})");
    }

    fn session_finished(&self, exit_code: i32) {
        println!("finished (exit {exit_code})");
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting opsh-server");

    let config_path = PathBuf::from(&cli.config);
    let config = match DaemonConfig::load(Some(&config_path), cli.output_dir.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };
    info!(output_dir = %config.output_dir.display(), "session output directory");

    let control = SessionControl::new(config);
    let notifier: Arc<dyn SessionNotifier> = Arc::new(ConsoleNotifier);

    println!("commands: run <cmd> | status | output | stop | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown_signal() => {
                info!("received shutdown signal");
                break;
            }
        };
        let line = match line {
            Ok(Some(l)) => l,
            _ => break,
        };
        if !dispatch(&control, &notifier, line.trim()).await {
            break;
        }
    }

    info!("opsh-server stopped");
}

/// Map one console line to a control operation. Returns false on `quit`.
async fn dispatch(
    control: &SessionControl,
    notifier: &Arc<dyn SessionNotifier>,
    line: &str,
) -> bool {
    match line {
        "" => {}
        "quit" | "exit" => return false,
        "status" => match control.status(CONSOLE_OPERATOR).await {
            Ok(s) => {
                let state = if s.alive { "running" } else { "exited" };
                println!("pid {}: {state}", s.pid);
            }
            Err(e) => println!("{e}"),
        },
        "output" => match control.fetch_output(CONSOLE_OPERATOR).await {
            Ok(bytes) => print!("{}", String::from_utf8_lossy(&bytes)),
            Err(e) => println!("{e}"),
        },
        "stop" => match control.stop(CONSOLE_OPERATOR).await {
            Ok(()) => println!("process stopped"),
            Err(e) => println!("{e}"),
        },
        _ => {
            if let Some(command) = line.strip_prefix("run ") {
                match control
                    .launch(CONSOLE_OPERATOR, command, notifier.clone())
                    .await
                {
                    Ok(launched) => println!(
                        "launched pid {} ({} mode), output at {}",
                        launched.pid,
                        launched.mode,
                        launched.output_path.display()
                    ),
                    Err(e) => println!("{e}"),
                }
            } else {
                println!("unknown command");
            }
        }
    }
    true
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            ctrl_c.await.ok();
            return;
        }
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm.recv() => {}
    }
}
