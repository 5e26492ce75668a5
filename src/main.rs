use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use choreloop::clock::{Clock, FixedClock, SystemClock};
use choreloop::config::{self, Config};
use choreloop::scheduler::{Sweeper, is_due};
use choreloop::store::{JsonStore, ScheduleRepository};
use choreloop::{api, store};

#[derive(Parser)]
#[command(
    name = "choreloop",
    version,
    about = "Generates pending tasks from recurring schedules"
)]
struct Cli {
    #[arg(short, long, default_value = "~/.choreloop/config.toml")]
    config: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sweep loop and the HTTP API
    Run,
    /// Create the config file and empty collections
    Init,
    /// List active schedules and whether they are due now
    Status,
    /// Run a single sweep and print the report
    Sweep {
        /// Pretend it is this instant (RFC 3339)
        #[arg(long, value_parser = parse_instant)]
        at: Option<DateTime<Utc>>,
    },
    /// Ask a running server to sweep now
    Trigger {
        /// API server URL
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        url: String,
        /// Auth token (or CHORELOOP_API_KEY env)
        #[arg(long, env = "CHORELOOP_API_KEY")]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Init => init(&cli.config).await?,
        Commands::Run => run(&cli.config).await?,
        Commands::Status => status(&config::load(&cli.config)?).await?,
        Commands::Sweep { at } => sweep_once(&config::load(&cli.config)?, at).await?,
        Commands::Trigger { url, token } => trigger(&url, token.as_deref()).await?,
    }
    Ok(())
}

async fn init(config_path: &str) -> Result<()> {
    let path = config::init_config_dir(config_path).await?;
    let cfg = config::load(&path.to_string_lossy())?;
    JsonStore::new(&cfg.store.base_dir)
        .init()
        .with_context(|| format!("Failed to create store in {}", cfg.store.base_dir.display()))?;
    tracing::info!(
        "Initialized {} (store in {})",
        path.display(),
        cfg.store.base_dir.display()
    );
    Ok(())
}

fn build_sweeper(cfg: &Config, clock: Arc<dyn Clock>) -> Arc<Sweeper> {
    let store = Arc::new(JsonStore::new(&cfg.store.base_dir));
    Arc::new(Sweeper::new(
        store.clone(),
        store,
        clock,
        cfg.scheduler.timezone,
    ))
}

async fn run(config_path: &str) -> Result<()> {
    let cfg = config::load(config_path)?;
    if cfg.api.enabled && cfg.api.api_key.is_none() {
        if is_localhost(&cfg.api.bind) {
            tracing::warn!("API authentication disabled (localhost-only)");
        } else {
            anyhow::bail!(
                "API authentication required for non-localhost binding '{}'. Set [api] api_key.",
                cfg.api.bind
            );
        }
    }

    let sweeper = build_sweeper(&cfg, Arc::new(SystemClock));
    let cancel = CancellationToken::new();
    let sweep_loop = sweeper.clone().spawn(
        cfg.scheduler.interval(),
        cfg.scheduler.run_on_start,
        cancel.clone(),
    );

    if cfg.api.enabled {
        let state = api::AppState {
            sweeper: sweeper.clone(),
            api_key: cfg.api.api_key.clone(),
        };
        let listener = tokio::net::TcpListener::bind(&cfg.api.bind)
            .await
            .with_context(|| format!("Failed to bind {}", cfg.api.bind))?;
        tracing::info!("choreloop listening on {}", cfg.api.bind);

        let shutdown = cancel.clone();
        axum::serve(listener, api::router(state))
            .with_graceful_shutdown(async move {
                signal::ctrl_c().await.ok();
                shutdown.cancel();
            })
            .await?;
    } else {
        signal::ctrl_c().await?;
        cancel.cancel();
    }

    sweep_loop.await?;
    Ok(())
}

async fn sweep_once(cfg: &Config, at: Option<DateTime<Utc>>) -> Result<()> {
    let clock: Arc<dyn Clock> = match at {
        Some(at) => Arc::new(FixedClock::new(at)),
        None => Arc::new(SystemClock),
    };
    let sweeper = build_sweeper(cfg, clock);
    let report = sweeper.sweep_now().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn status(cfg: &Config) -> Result<()> {
    let repo = JsonStore::new(&cfg.store.base_dir);
    let now = SystemClock.now();
    let zone = cfg.scheduler.timezone;

    let entries = repo.list_active().await?;
    let tasks = repo.all_tasks()?;
    println!("{} active schedules ({} time)", entries.len(), zone);
    for entry in entries {
        match entry {
            Ok(schedule) => {
                let open = tasks
                    .iter()
                    .filter(|t| t.schedule == schedule.id && !t.completed)
                    .count();
                let last = schedule
                    .last_generated
                    .map(store::format_timestamp)
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "  {:<12} {:<28} {:<24} due={:<5} open={} last={}",
                    schedule.id,
                    schedule.title,
                    schedule.describe_recurrence(),
                    is_due(&schedule, now, zone),
                    open,
                    last
                );
            }
            Err(e) => println!("  (unreadable) {e}"),
        }
    }
    let open_total = tasks.iter().filter(|t| !t.completed).count();
    println!("{open_total} incomplete tasks");
    Ok(())
}

async fn trigger(url: &str, token: Option<&str>) -> Result<()> {
    let client = reqwest::Client::new();
    let mut req = client.post(format!("{url}/sweep"));
    if let Some(t) = token {
        req = req.header("Authorization", format!("Bearer {t}"));
    }
    let resp = req.send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("API error: {} {}", resp.status(), resp.text().await?);
    }
    let report: Value = resp.json().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    match store::parse_timestamp(Some(s))? {
        Some(at) => Ok(at),
        None => Err("timestamp must not be empty".to_string()),
    }
}

fn is_localhost(bind: &str) -> bool {
    use std::net::IpAddr;

    let host = if let Some(inner) = bind.strip_prefix('[')
        && let Some(bracket_end) = inner.find(']')
    {
        &inner[..bracket_end]
    } else if let Some(colon) = bind.rfind(':') {
        &bind[..colon]
    } else {
        bind
    };

    if host == "localhost" {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}
