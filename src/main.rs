//! # Ringer: local notification scheduler
//!
//! Usage:
//!   ringer schedule notifications.json        # Submit a batch (JSON object or array)
//!   ringer pending                            # List persisted notifications
//!   ringer cancel 1 2 3                       # Cancel by id
//!   ringer act 7 reply --input "on my way"    # Report a user interaction
//!   ringer register-actions actions.json      # Register action groups
//!   ringer next "* * 1 8 30 0 *" --count 3    # Preview calendar matches
//!   ringer run                                # Reconcile, then deliver until Ctrl+C
//!   ringer init                               # Write a default config file

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use ringer_core::{RingerConfig, StorageBackend};
use ringer_scheduler::{
    ActionGroup, CalendarPattern, InteractionEvent, JsonFileStore, LogSink, NotificationPayload,
    NotificationScheduler, NotificationStore, SchedulerOptions, SqliteStore, TimerAlarms,
    next_match, spawn_alarm_loop,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ringer", version, about = "🔔 Ringer: local notification scheduler")]
struct Cli {
    /// Config file (default: ~/.ringer/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit notifications from a JSON file
    Schedule { file: PathBuf },
    /// List persisted notifications
    Pending,
    /// Cancel notifications by id
    Cancel {
        #[arg(required = true)]
        ids: Vec<i32>,
    },
    /// Report a user interaction (tap, dismiss or a custom action id)
    Act {
        id: i32,
        action: String,
        /// Text captured by an input action
        #[arg(long)]
        input: Option<String>,
    },
    /// Register action groups from a JSON file
    RegisterActions { file: PathBuf },
    /// Print the next instants matching a calendar pattern
    Next {
        /// "year month day hour minute second weekday", `*` for any
        pattern: String,
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },
    /// Reconcile persisted notifications and deliver them as they come due
    Run,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn open_store(config: &RingerConfig) -> Result<Arc<dyn NotificationStore>> {
    let path = config.storage.resolved_path();
    tracing::debug!("🗄️ Store: {:?} at {}", config.storage.backend, path.display());
    let store: Arc<dyn NotificationStore> = match config.storage.backend {
        StorageBackend::Sqlite => Arc::new(SqliteStore::open(&path)?),
        StorageBackend::Json => Arc::new(JsonFileStore::new(&path)?),
    };
    Ok(store)
}

fn read_json(file: &Path) -> Result<serde_json::Value> {
    let content =
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", file.display()))
}

/// Accept either a single object or an array of them.
fn one_or_many<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<Vec<T>> {
    Ok(match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        other => vec![serde_json::from_value(other)?],
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "ringer=debug,ringer_scheduler=debug"
    } else {
        "ringer=info,ringer_scheduler=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    if let Commands::Next { pattern, count } = &cli.command {
        let pattern: CalendarPattern = pattern.parse()?;
        let mut after = Utc::now();
        for _ in 0..*count {
            match next_match(&pattern, after) {
                Some(at) => {
                    println!("{}", at.to_rfc3339());
                    after = at;
                }
                None => {
                    println!("(no further match for {pattern})");
                    break;
                }
            }
        }
        return Ok(());
    }

    if let Commands::Init { force } = &cli.command {
        let path = cli.config.clone().unwrap_or_else(RingerConfig::default_path);
        if path.exists() && !force {
            anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
        }
        let config = RingerConfig::default();
        match &cli.config {
            Some(path) => config.save_to(path)?,
            None => config.save()?,
        }
        println!("✅ Wrote {}", path.display());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => RingerConfig::load_from(path)?,
        None => RingerConfig::load()?,
    };
    let store = open_store(&config)?;
    let alarms = Arc::new(TimerAlarms::new());
    let sink = Arc::new(LogSink::new());
    let scheduler = Arc::new(NotificationScheduler::new(
        store,
        alarms.clone(),
        sink,
        SchedulerOptions::from(&config),
    )?);

    match cli.command {
        Commands::Schedule { file } => {
            let payloads: Vec<NotificationPayload> = one_or_many(read_json(&file)?)?;
            let ids = scheduler.schedule(payloads, Utc::now())?;
            println!("✅ Submitted {} notification(s): {ids:?}", ids.len());
        }
        Commands::Pending => {
            let records = scheduler.pending()?;
            if records.is_empty() {
                println!("📭 Nothing pending.");
            }
            for record in records {
                let next = record
                    .plan
                    .map(|p| p.fire_at.to_rfc3339())
                    .unwrap_or_else(|| "-".into());
                let state = format!("{:?}", record.state);
                println!(
                    "{:>6}  {:<12}  {:<26}  {}",
                    record.id, state, next, record.payload.title
                );
            }
        }
        Commands::Cancel { ids } => {
            scheduler.cancel(&ids)?;
            println!("🗑️ Cancelled {ids:?}");
        }
        Commands::Act { id, action, input } => {
            let mut event = InteractionEvent::new(id, &action);
            if let Some(text) = &input {
                event = event.with_input(text);
            }
            let resolution = scheduler.resolve_interaction(event, Utc::now())?;
            println!("{}", serde_json::to_string_pretty(&resolution)?);
        }
        Commands::RegisterActions { file } => {
            let groups: Vec<ActionGroup> = one_or_many(read_json(&file)?)?;
            scheduler.register_action_types(&groups)?;
            println!("📋 Registered {} action group(s)", groups.len());
        }
        Commands::Run => {
            let report = scheduler.reconcile(Utc::now())?;
            println!("🔔 Ringer v{}", env!("CARGO_PKG_VERSION"));
            println!("   🗄️  Store:    {}", config.storage.resolved_path().display());
            println!("   🔄 Re-armed: {:?}", report.rearmed);
            if !report.missed.is_empty() {
                println!("   ⚠️  Missed:   {:?}", report.missed);
            }
            if let Some(next) = alarms.next_fire_at() {
                println!("   ⏭️  Next:     {}", next.to_rfc3339());
            }
            println!();

            let tick = std::time::Duration::from_millis(config.scheduler.tick_interval_ms.max(10));
            let delivery = tokio::spawn(spawn_alarm_loop(scheduler.clone(), alarms, tick));
            tokio::signal::ctrl_c().await?;
            delivery.abort();
            println!("👋 Stopped.");
        }
        Commands::Next { .. } | Commands::Init { .. } => {}
    }

    Ok(())
}
