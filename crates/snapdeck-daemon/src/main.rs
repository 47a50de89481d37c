//! Snapdeck daemon entry point.
//!
//! Loads the configuration, then supervises a connection to every configured
//! Snapcast server until interrupted.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use snapdeck_daemon::{Config, ServerEntry};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Snapdeck daemon - keeps Snapcast servers connected and in sync
#[derive(Parser, Debug)]
#[command(name = "snapdeck-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file (defaults to `<config dir>/snapdeck/config.json`)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Extra server as `NAME=HOST[:PORT]`, may be repeated
    #[arg(long = "server", value_name = "NAME=HOST[:PORT]")]
    servers: Vec<ServerEntry>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

/// Set up logging with file output for debugging.
/// In debug builds, defaults to debug level and logs to timestamped file.
/// In release builds, defaults to info level and logs to stderr.
fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("snapdeck={default_level}")));

    if cfg!(debug_assertions) {
        let temp_dir = std::env::temp_dir();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("snapdeck-daemon-{timestamp}.log");
        let log_path = temp_dir.join(&log_filename);

        #[cfg(unix)]
        {
            let symlink_path = temp_dir.join("snapdeck-daemon.log");
            let _ = std::fs::remove_file(&symlink_path);
            let _ = std::os::unix::fs::symlink(&log_path, &symlink_path);
        }

        let file_appender = tracing_appender::rolling::never(&temp_dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Flushes on drop; must outlive every log call
        std::mem::forget(guard);

        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_line_number(true),
            )
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_line_number(true),
            )
            .with(filter)
            .init();

        eprintln!("Logging to: {} (and stderr)", log_path.display());
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match args.config.clone().or_else(Config::default_path) {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    config.servers.extend(args.servers.iter().cloned());
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Before loading, so config warnings reach a subscriber
    setup_logging();

    let config = load_config(&args)?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    info!("Starting snapdeck daemon...");

    snapdeck_daemon::run(config).await?;

    info!("Snapdeck daemon stopped");
    Ok(())
}
