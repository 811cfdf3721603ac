// gcfleet/src/main.rs
//
// CLI entrypoint: loads the account roster and tunables, brings up the bot
// fleet, then does one of three things depending on the subcommand the
// caller picked.
//
// Usage:
//   gcfleet run     --config config.json --accounts accounts.json
//   gcfleet inspect --config config.json --accounts accounts.json --link links.jsonl
//   gcfleet status  --config config.json --accounts accounts.json

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gcfleet::config::{AccountCredentials, FleetConfig};
use gcfleet::session::SimulatedSessionClientFactory;
use gcfleet::{BotController, FleetEvent, InspectLink};

#[derive(Parser)]
#[command(
    name    = "gcfleet",
    about   = "Dispatcher for a fleet of logged-in game-client bots serving item-inspection queries",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Boot the fleet, wait for initialization, then idle until Ctrl-C.
    Run {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
        #[arg(long, default_value = "accounts.json")]
        accounts: PathBuf,
    },
    /// Boot the fleet and drain a JSONL stream of inspect links through it.
    Inspect {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
        #[arg(long, default_value = "accounts.json")]
        accounts: PathBuf,
        /// JSONL file of inspect links, one `InspectLink` JSON object per
        /// line; omit or pass "-" to read from stdin.
        #[arg(long)]
        link: Option<PathBuf>,
    },
    /// Boot the fleet, wait for initialization, print `getStatus()` as JSON.
    Status {
        #[arg(long, default_value = "config.json")]
        config: PathBuf,
        #[arg(long, default_value = "accounts.json")]
        accounts: PathBuf,
    },
}

fn load_config(path: &PathBuf) -> Result<FleetConfig> {
    if path.exists() {
        Ok(FleetConfig::load(path)?)
    } else {
        warn!("no config file at {}, using defaults", path.display());
        Ok(FleetConfig::default())
    }
}

/// Brings up a fleet from the roster/config pair shared by every subcommand
/// and waits out the startup barrier. Grounded on the teacher's `Pipeline`
/// construction sequence in its own `main`: build components, wire the
/// event plumbing, then block on a readiness gate before doing real work.
async fn boot_fleet(config_path: &PathBuf, accounts_path: &PathBuf) -> Result<Arc<BotController>> {
    let config = load_config(config_path)?;
    let accounts = AccountCredentials::load_list(accounts_path)
        .with_context(|| format!("loading accounts from {}", accounts_path.display()))?;

    let proxy = gcfleet::proxy::from_config(&config);
    // The real Steam+GC wire protocol is out of scope; a production
    // deployment swaps this factory for one backed by a real Steam-client
    // crate behind the same `SessionClientFactory` trait.
    let session_factory = Arc::new(SimulatedSessionClientFactory::new(Default::default()));

    let controller = BotController::new(config.clone(), proxy, session_factory);

    let mut fleet_events = controller.subscribe_fleet_events();
    tokio::spawn(async move {
        while let Ok(event) = fleet_events.recv().await {
            match event {
                FleetEvent::Ready => info!("fleet is now ready"),
                FleetEvent::Unready => warn!("fleet has no free ready bots"),
                FleetEvent::InitializationComplete => info!("startup barrier cleared"),
            }
        }
    });

    info!(count = accounts.len(), "bringing up bot fleet");
    for account in accounts {
        controller.add_bot(account).await;
    }

    controller
        .wait_for_initialization(Duration::from_millis(config.startup_barrier_ms))
        .await;
    info!(ready = controller.get_ready_count(), "fleet initialization settled");

    Ok(controller)
}

async fn run_idle(controller: Arc<BotController>) -> Result<()> {
    info!("fleet running, waiting for Ctrl-C");
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    Ok(())
}

/// Reads `InspectLink` JSON objects one per line from `link` (or stdin if
/// `None`/"-"), dispatches each through `lookupInspect`, and prints the
/// resulting `ItemInfo` or error as a JSON line — the same "tail a JSONL
/// file through the pipeline" shape the teacher uses for its event-replay
/// modes, repurposed from security events to inspect links.
async fn run_inspect(controller: Arc<BotController>, link: Option<PathBuf>) -> Result<()> {
    let content = match &link {
        Some(path) if path.as_os_str() != "-" => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("opening link file {}", path.display()))?,
        _ => {
            info!("reading inspect links from stdin, one JSON object per line");
            let mut buf = String::new();
            tokio::io::AsyncReadExt::read_to_string(&mut tokio::io::stdin(), &mut buf).await?;
            buf
        }
    };
    let mut lines = BufReader::new(content.as_bytes()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let outcome = match serde_json::from_str::<InspectLink>(line) {
            Ok(link) => match link.validate() {
                Ok(()) => match controller.lookup_inspect(link).await {
                    Ok(info) => serde_json::to_string(&info)?,
                    Err(e) => serde_json::json!({ "error": e.to_string() }).to_string(),
                },
                Err(e) => serde_json::json!({ "error": e.to_string() }).to_string(),
            },
            Err(e) => serde_json::json!({ "error": format!("malformed inspect link: {e}") }).to_string(),
        };
        println!("{outcome}");
    }
    Ok(())
}

async fn run_status(controller: Arc<BotController>) -> Result<()> {
    let statuses = controller.get_status().await;
    println!("{}", serde_json::to_string(&statuses)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("gcfleet=info".parse()?))
        .compact()
        .init();

    let cli = Cli::parse();

    let (controller, result) = match cli.command {
        Command::Run { config, accounts } => {
            let controller = boot_fleet(&config, &accounts).await?;
            let result = run_idle(controller.clone()).await;
            (controller, result)
        }
        Command::Inspect { config, accounts, link } => {
            let controller = boot_fleet(&config, &accounts).await?;
            let result = run_inspect(controller.clone(), link).await;
            (controller, result)
        }
        Command::Status { config, accounts } => {
            let controller = boot_fleet(&config, &accounts).await?;
            let result = run_status(controller.clone()).await;
            (controller, result)
        }
    };

    controller.destroy().await;
    result
}
