// Prints the screen the extension should show for a pending-request snapshot
//
// Reads the background's pushed state (JSON) from a file or stdin and writes
// the arbitrated route to stdout, one line.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::path::PathBuf;

use wallet_extension_core::{BridgeConfig, PendingSnapshot, Route};

#[derive(Parser)]
#[command(name = "pending-route")]
#[command(about = "Arbitrate pending wallet requests into a route", long_about = None)]
struct Cli {
    /// Snapshot file (reads stdin when omitted)
    snapshot: Option<PathBuf>,

    /// Only print a route if it differs from this one
    #[arg(long)]
    current: Option<String>,

    /// Print the whole queue in display order
    #[arg(long)]
    queue: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = BridgeConfig::load_or_default(&config_path)?;
    config.validate()?;

    let raw = match &cli.snapshot {
        Some(path) => std::fs::read_to_string(path)
            .context(format!("Failed to read snapshot: {}", path.display()))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read snapshot from stdin")?;
            raw
        }
    };
    let snapshot: PendingSnapshot =
        serde_json::from_str(&raw).context("Failed to parse pending snapshot")?;

    if cli.queue {
        for record in snapshot.queue() {
            println!("{}\t{}\t{}", record.time, record.id, record.route);
        }
        return Ok(());
    }

    let arbitration = snapshot.evaluate();
    let home = config.router.home_route.as_str();
    tracing::info!(
        "{} pending request(s), showing {}",
        snapshot.queue().len(),
        arbitration.path(home)
    );

    match cli.current.as_deref() {
        Some(current) => {
            let current = route_for_path(current, home)
                .with_context(|| format!("Unknown route: {}", current))?;
            if let Some(next) = snapshot.should_redirect(current) {
                println!("{}", if next == Route::Home { home } else { next.path() });
            }
        }
        None => println!("{}", arbitration.path(home)),
    }

    Ok(())
}

fn route_for_path(path: &str, home: &str) -> Option<Route> {
    if path == home {
        return Some(Route::Home);
    }
    [
        Route::Home,
        Route::Connect,
        Route::ConfirmTransaction,
        Route::Sign,
        Route::AddAsset,
        Route::SwitchNetwork,
    ]
    .into_iter()
    .find(|route| route.path() == path)
}
