//! TunnelDeck - management plane for a fleet of remote tunnel agents
//!
//! Keeps a local, searchable view of every agent's tunnels current through
//! live event streams and periodic snapshot reconciliation.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Interval;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tunneldeck_agent_client::{AgentApi, AgentTarget, HttpAgentClient};
use tunneldeck_control::{Fleet, FleetConfig};
use tunneldeck_db::{JournalFilter, NewEndpoint};
use tunneldeck_proto::LogLevel;

/// How often expired file-log partitions are removed while running
const LOG_CLEANUP_PERIOD: Duration = Duration::from_secs(3600);

/// TunnelDeck - manage a fleet of tunnel agents
#[derive(Parser, Debug)]
#[command(name = "tunneldeck")]
#[command(about = "Manage a fleet of remote tunnel agents", long_about = None)]
#[command(version = env!("TUNNELDECK_RELEASE"))]
#[command(long_version = concat!(env!("TUNNELDECK_RELEASE"), "\nCommit: ", env!("TUNNELDECK_COMMIT"), "\nBuilt: ", env!("TUNNELDECK_BUILT")))]
struct Cli {
    /// Database URL (postgres://... or sqlite://...)
    #[arg(
        long,
        global = true,
        env = "TUNNELDECK_DATABASE_URL",
        default_value = "sqlite://./tunneldeck.db?mode=rwc"
    )]
    database_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "TUNNELDECK_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable verbose logging (same as --log-level debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    fleet: FleetArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct FleetArgs {
    /// Root directory of the partitioned file logs
    #[arg(long, global = true, env = "TUNNELDECK_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// Days of file logs to keep
    #[arg(long, global = true, env = "TUNNELDECK_LOG_RETENTION_DAYS", default_value = "7")]
    log_retention_days: u32,

    /// Event stream connect timeout in seconds
    #[arg(long, global = true, env = "TUNNELDECK_CONNECT_TIMEOUT", default_value = "10")]
    connect_timeout: u64,

    /// Connectivity probe timeout in seconds
    #[arg(long, global = true, env = "TUNNELDECK_PROBE_TIMEOUT", default_value = "5")]
    probe_timeout: u64,

    /// Delete stream-removed tunnels outright instead of recycling them
    #[arg(long, global = true, env = "TUNNELDECK_NO_RECYCLE")]
    no_recycle: bool,

    /// Largest accepted event-stream record in bytes
    #[arg(long, global = true, env = "TUNNELDECK_MAX_FRAME_BYTES", default_value = "1048576")]
    max_frame_bytes: usize,

    /// Reconcile every endpoint on this period (seconds, 0 disables)
    #[arg(long, global = true, env = "TUNNELDECK_RECONCILE_INTERVAL", default_value = "0")]
    reconcile_interval: u64,
}

impl FleetArgs {
    fn to_config(&self) -> Result<FleetConfig> {
        let interval = (self.reconcile_interval > 0)
            .then(|| Duration::from_secs(self.reconcile_interval));

        FleetConfig::builder()
            .log_dir(self.log_dir.clone())
            .log_retention_days(self.log_retention_days)
            .connect_timeout(Duration::from_secs(self.connect_timeout))
            .probe_timeout(Duration::from_secs(self.probe_timeout))
            .recycle_on_delete(!self.no_recycle)
            .max_frame_bytes(self.max_frame_bytes)
            .reconcile_interval(interval)
            .build()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to every endpoint and keep their state current until Ctrl+C
    Run,

    /// Register an endpoint
    Add {
        /// Display name
        #[arg(long)]
        name: String,

        /// Agent base URL (e.g., https://10.0.0.1:9090)
        #[arg(long)]
        url: String,

        /// API prefix on the agent
        #[arg(long, default_value = "/api")]
        api_path: String,

        /// Agent API key
        #[arg(long, env = "TUNNELDECK_API_KEY")]
        api_key: String,

        /// Color tag
        #[arg(long)]
        color: Option<String>,
    },

    /// List registered endpoints
    List,

    /// Delete an endpoint with its tunnels, recycle bin, journal and file logs
    Delete {
        #[arg(long)]
        endpoint: i64,
    },

    /// Reconcile tunnels and refresh system info (all endpoints if none given)
    Refresh {
        #[arg(long)]
        endpoint: Option<i64>,
    },

    /// Check that an agent's event feed answers
    Probe {
        #[arg(long)]
        url: String,

        #[arg(long, default_value = "/api")]
        api_path: String,

        #[arg(long, env = "TUNNELDECK_API_KEY")]
        api_key: String,
    },

    /// Show recent file-log lines, newest first
    Logs {
        #[arg(long)]
        endpoint: i64,

        /// Instance ID (endpoint-scoped lines when omitted)
        #[arg(long)]
        instance: Option<String>,

        /// Calendar days to look back, today included
        #[arg(long, default_value = "3")]
        days: u32,

        #[arg(long, default_value = "100")]
        limit: usize,
    },

    /// Search the event journal
    Search {
        #[arg(long)]
        endpoint: i64,

        #[arg(long)]
        instance: Option<String>,

        /// Event kind (initial, create, update, delete, log, ...)
        #[arg(long)]
        event_type: Option<String>,

        /// ERROR, WARN, DEBUG, EVENTS or INFO
        #[arg(long)]
        level: Option<String>,

        #[arg(long)]
        keyword: Option<String>,

        /// YYYY-MM-DD or RFC 3339
        #[arg(long)]
        start: Option<String>,

        /// YYYY-MM-DD (whole day) or RFC 3339
        #[arg(long)]
        end: Option<String>,

        #[arg(long, default_value = "1")]
        page: u64,

        #[arg(long, default_value = "20")]
        size: u64,
    },

    /// Tunnel, traffic and log statistics of an endpoint
    Stats {
        #[arg(long)]
        endpoint: i64,
    },
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

fn parse_level(value: &str) -> Result<LogLevel> {
    Ok(match value.to_ascii_uppercase().as_str() {
        "ERROR" => LogLevel::Error,
        "WARN" => LogLevel::Warn,
        "DEBUG" => LogLevel::Debug,
        "EVENTS" => LogLevel::Events,
        "INFO" => LogLevel::Info,
        other => bail!("Unknown log level: {}", other),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn open_fleet(
    database_url: &str,
    agent: HttpAgentClient,
    config: FleetConfig,
) -> Result<Fleet> {
    let db = tunneldeck_db::connect(database_url)
        .await
        .context("Failed to connect to database")?;
    tunneldeck_db::migrate(&db)
        .await
        .context("Failed to run database migrations")?;

    Ok(Fleet::new(db, Arc::new(agent), config))
}

async fn run(fleet: &Fleet) -> Result<()> {
    for (endpoint_id, result) in fleet.connect_all().await? {
        if let Err(e) = result {
            warn!(endpoint_id, "Initial connect failed: {}", e);
        }
    }

    let mut cleanup = tokio::time::interval(LOG_CLEANUP_PERIOD);
    let mut reconcile = fleet.config().reconcile_interval.map(tokio::time::interval);
    if let Some(period) = fleet.config().reconcile_interval {
        info!("Reconciling every {}s", period.as_secs());
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down...");
                break;
            }
            _ = cleanup.tick() => {
                match fleet.cleanup_logs().await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "Removed expired log partitions"),
                    Err(e) => error!("Log cleanup failed: {}", e),
                }
            }
            _ = tick(&mut reconcile) => {
                match fleet.reconcile_all().await {
                    Ok(results) => {
                        let failed = results.iter().filter(|(_, result)| result.is_err()).count();
                        info!(endpoints = results.len(), failed, "Periodic reconciliation finished");
                    }
                    Err(e) => error!("Periodic reconciliation failed: {}", e),
                }
            }
        }
    }

    fleet.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        "debug"
    } else {
        cli.log_level.as_str()
    };
    setup_logging(log_level)?;

    let config = cli.fleet.to_config()?;
    let agent = HttpAgentClient::new().context("Failed to create agent client")?;

    // Probing needs no database
    if let Commands::Probe {
        url,
        api_path,
        api_key,
    } = &cli.command
    {
        let target = AgentTarget::new(url, api_path, api_key);
        agent
            .probe(&target, config.probe_timeout)
            .await
            .with_context(|| format!("Agent at {} did not answer", url))?;
        println!("OK");
        return Ok(());
    }

    let fleet = open_fleet(&cli.database_url, agent, config).await?;

    match cli.command {
        Commands::Run => run(&fleet).await?,
        Commands::Add {
            name,
            url,
            api_path,
            api_key,
            color,
        } => {
            let endpoint = fleet
                .add_endpoint(NewEndpoint {
                    name,
                    url,
                    api_path,
                    api_key,
                    color,
                })
                .await?;
            print_json(&endpoint)?;
        }
        Commands::List => print_json(&fleet.list_endpoints().await?)?,
        Commands::Delete { endpoint } => print_json(&fleet.delete_endpoint(endpoint).await?)?,
        Commands::Refresh { endpoint } => {
            let ids = match endpoint {
                Some(id) => vec![id],
                None => fleet
                    .list_endpoints()
                    .await?
                    .into_iter()
                    .map(|endpoint| endpoint.id)
                    .collect(),
            };
            for id in ids {
                let report = fleet
                    .refresh_tunnels(id)
                    .await
                    .with_context(|| format!("Failed to reconcile endpoint {}", id))?;
                let info = fleet.refresh_system_info(id).await?;
                if !info.fresh {
                    warn!(endpoint_id = id, "System info unavailable, showing stored values");
                }
                print_json(&report)?;
            }
        }
        Commands::Probe { .. } => {}
        Commands::Logs {
            endpoint,
            instance,
            days,
            limit,
        } => {
            let entries = fleet
                .read_file_logs(endpoint, instance.as_deref(), days, limit)
                .await?;
            for entry in entries {
                println!("{} {}", entry.timestamp.to_rfc3339(), entry.message);
            }
        }
        Commands::Search {
            endpoint,
            instance,
            event_type,
            level,
            keyword,
            start,
            end,
            page,
            size,
        } => {
            let mut filter = JournalFilter::new(endpoint);
            filter.instance_id = instance;
            filter.event_type = event_type;
            filter.level = level.as_deref().map(parse_level).transpose()?;
            filter.keyword = keyword;
            filter.start = start;
            filter.end = end;
            filter.page = page;
            filter.size = size;
            print_json(&fleet.search_events(&filter).await?)?;
        }
        Commands::Stats { endpoint } => print_json(&fleet.endpoint_stats(endpoint).await?)?,
    }

    Ok(())
}
