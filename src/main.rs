//! Binary entrypoint for the meshnotes CLI.
//!
//! Commands:
//! - `start` - run the gateway: admission, retry-queue worker, and notification passes
//! - `init` - create a starter `config.toml`
//! - `status` - print queue and position-cache counts
//!
//! The physical radio link is an external integration that owns the gateway's
//! event sender. When `gateway.dry_run` is set, `start` attaches a line-based
//! stdin feed instead so the full pipeline can be exercised without hardware:
//! `<node> @<lat>,<lon>` records a position, `<node> ^<uptime>` records
//! telemetry, and `<node> <text>` delivers a text message.

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{info, warn};

use meshnotes::config::Config;
use meshnotes::gateway::GatewayServer;
use meshnotes::mesh::{DryRunTransport, MeshEvent};
use meshnotes::osm::OsmClient;
use meshnotes::storage::Store;

#[derive(Parser)]
#[command(name = "meshnotes")]
#[command(about = "An OpenStreetMap Notes gateway for Meshtastic mesh networks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway
    Start,
    /// Initialize a new gateway configuration
    Init,
    /// Show queue and position-cache counts
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            info!("Starting meshnotes v{}", env!("CARGO_PKG_VERSION"));

            let store = Store::open(&config.storage.data_dir)?;
            let submitter = OsmClient::new(&config.osm);
            let dry_run = config.gateway.dry_run;
            let (gateway, events) =
                GatewayServer::new(config, store, DryRunTransport, submitter)?;

            // Keeping a sender alive keeps run() alive; the stdin feed owns it
            // in dry-run mode, otherwise we hold it here until shutdown.
            let _keepalive = if dry_run {
                info!("Dry run: reading mesh events from stdin");
                tokio::spawn(stdin_feed(events));
                None
            } else {
                warn!("No radio integration attached; processing queue and timers only");
                Some(events)
            };

            gateway.run().await?;
        }
        Commands::Init => {
            info!("Initializing gateway configuration");
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Status => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            let store = Store::open(&config.storage.data_dir)?;
            let pending = store.get_pending_notes(usize::MAX)?.len();
            let awaiting = store.get_pending_for_notification()?.len();
            let failed = store.get_failed_for_notification()?.len();
            let positions = store.load_all_positions()?.len();
            println!("Pending submissions:      {pending}");
            println!("Awaiting notification:    {awaiting}");
            println!("Failed (not yet noticed): {failed}");
            println!("Cached positions:         {positions}");
        }
    }

    Ok(())
}

/// Development event source: one mesh event per stdin line (dry-run only).
async fn stdin_feed(events: tokio::sync::mpsc::Sender<MeshEvent>) {
    use tokio::io::{AsyncBufReadExt, BufReader};
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        let Some((node, rest)) = line.split_once(' ') else {
            continue;
        };
        let event = if let Some(coords) = rest.strip_prefix('@') {
            match coords.split_once(',') {
                Some((lat, lon)) => match (lat.trim().parse(), lon.trim().parse()) {
                    (Ok(lat), Ok(lon)) => MeshEvent::Position {
                        from: node.to_string(),
                        lat,
                        lon,
                    },
                    _ => continue,
                },
                None => continue,
            }
        } else if let Some(uptime) = rest.strip_prefix('^') {
            match uptime.trim().parse() {
                Ok(uptime_secs) => MeshEvent::Telemetry {
                    from: node.to_string(),
                    uptime_secs,
                },
                Err(_) => continue,
            }
        } else {
            MeshEvent::Text {
                from: node.to_string(),
                text: rest.to_string(),
            }
        };
        if events.send(event).await.is_err() {
            break;
        }
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let base_level = match verbosity {
        0 => config
            .as_ref()
            .and_then(|c| c.logging.level.parse().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config.as_ref().and_then(|c| c.logging.file.clone());
    if let Some(file) = log_file {
        if let Ok(f) = std::fs::OpenOptions::new().create(true).append(true).open(&file) {
            let mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
    } else {
        builder.format(|fmt, record| {
            writeln!(
                fmt,
                "{} [{}] {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
                record.level(),
                record.args()
            )
        });
    }
    let _ = builder.try_init();
}
