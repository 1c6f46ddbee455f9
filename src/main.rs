//! # Cadence — Outreach Campaign Scheduling Engine
//!
//! Decides whether, when, and through which channel the next campaign
//! touchpoint fires for every enrolled prospect.
//!
//! Usage:
//!   cadence run                      # Scheduler loop (tick on an interval)
//!   cadence tick                     # One scheduling pass, then exit
//!   cadence enroll <prospect> <campaign>
//!   cadence cancel <enrollment>
//!   cadence status                   # Campaigns and open enrollments
//!   cadence import seed.json         # Load campaigns/prospects/windows

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use cadence_core::clock::SystemClock;
use cadence_core::config::CadenceConfig;
use cadence_core::types::{Campaign, Prospect, SellerWindow};
use cadence_engine::{Driver, GatewaySet, TickStats};
use cadence_store::SqliteStore;

#[derive(Parser)]
#[command(
    name = "cadence",
    version,
    about = "📅 Cadence — outreach campaign scheduling engine"
)]
struct Cli {
    /// Config file (default: ~/.cadence/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler loop
    Run,
    /// Run a single scheduling pass and exit
    Tick,
    /// Enroll a prospect into a campaign
    Enroll {
        prospect_id: String,
        campaign_id: String,
    },
    /// Cancel an open enrollment
    Cancel { enrollment_id: String },
    /// Show campaigns and their open enrollments
    Status,
    /// Import campaigns, prospects, and seller windows from a JSON file
    Import { file: String },
}

/// Seed file layout for `cadence import`.
#[derive(Debug, Default, Deserialize)]
struct SeedFile {
    #[serde(default)]
    campaigns: Vec<Campaign>,
    #[serde(default)]
    prospects: Vec<Prospect>,
    #[serde(default)]
    seller_windows: Vec<SellerWindow>,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "cadence=debug,cadence_core=debug,cadence_engine=debug,cadence_store=debug,cadence_channels=debug"
    } else {
        "cadence=info,cadence_core=info,cadence_engine=info,cadence_store=info,cadence_channels=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => CadenceConfig::load_from(Path::new(&expand_path(path)))?,
        None => CadenceConfig::load()?,
    };

    let db_path = expand_path(&config.database_path);
    if let Some(parent) = Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteStore::open(Path::new(&db_path))?);

    match cli.command {
        Command::Run => run_loop(&config, store, &db_path).await,
        Command::Tick => {
            let driver = build_driver(&config, store)?;
            let stats = driver.tick().await?;
            print_stats(&stats);
            Ok(())
        }
        Command::Enroll {
            prospect_id,
            campaign_id,
        } => {
            let enrollment = cadence_engine::enrollment::enroll(
                store.as_ref(),
                &prospect_id,
                &campaign_id,
                chrono::Utc::now(),
            )?;
            println!("✅ Enrolled: {}", enrollment.id);
            Ok(())
        }
        Command::Cancel { enrollment_id } => {
            let enrollment = cadence_engine::enrollment::cancel(
                store.as_ref(),
                &enrollment_id,
                chrono::Utc::now(),
            )?;
            println!("🛑 Enrollment {} is now {}", enrollment.id, enrollment.state.as_str());
            Ok(())
        }
        Command::Status => status(store.as_ref()),
        Command::Import { file } => import(store.as_ref(), &expand_path(&file)),
    }
}

fn build_driver(config: &CadenceConfig, store: Arc<SqliteStore>) -> Result<Driver> {
    let gateways = GatewaySet {
        email: cadence_channels::email_gateway(&config.channel),
        sms: cadence_channels::sms_gateway(&config.channel),
    };
    let driver = Driver::new(
        store,
        gateways,
        Arc::new(cadence_channels::PlaceholderRenderer::new()),
        Arc::new(SystemClock),
        &config.engine,
    )?;
    Ok(driver)
}

async fn run_loop(config: &CadenceConfig, store: Arc<SqliteStore>, db_path: &str) -> Result<()> {
    let driver = build_driver(config, store)?;

    println!("📅 Cadence v{}", env!("CARGO_PKG_VERSION"));
    println!("   🗄️  Database: {db_path}");
    println!("   ⏱️  Tick every {}s", config.engine.tick_interval_secs);
    println!();

    let mut interval =
        tokio::time::interval(Duration::from_secs(config.engine.tick_interval_secs.max(1)));
    loop {
        interval.tick().await;
        if let Err(e) = driver.tick().await {
            tracing::error!("tick failed: {e}");
        }
    }
}

fn print_stats(stats: &TickStats) {
    println!("⏱️ Tick summary:");
    println!("   processed: {}", stats.processed);
    println!("   sent:      {}", stats.sent);
    println!("   skipped:   {}", stats.skipped);
    println!("   deferred:  {}", stats.deferred);
    println!("   exhausted: {}", stats.exhausted);
    println!("   failed:    {}", stats.failed);
    println!("   conflicts: {}", stats.conflicts);
    println!("   completed: {}", stats.completed);
}

fn status(store: &SqliteStore) -> Result<()> {
    use cadence_core::traits::Store;

    let campaigns = store.list_campaigns(None)?;
    if campaigns.is_empty() {
        println!("No campaigns. Load some with `cadence import`.");
        return Ok(());
    }
    for campaign in campaigns {
        let open = store.list_open_enrollments(&campaign.id)?;
        println!(
            "📋 {} [{}] — {} step(s), {} open enrollment(s)",
            campaign.name,
            campaign.status.as_str(),
            campaign.steps.len(),
            open.len()
        );
        for enrollment in open {
            println!(
                "   • {} prospect={} step={} state={} attempts={}",
                enrollment.id,
                enrollment.prospect_id,
                enrollment.current_step,
                enrollment.state.as_str(),
                enrollment.attempts
            );
        }
    }
    Ok(())
}

fn import(store: &SqliteStore, path: &str) -> Result<()> {
    use cadence_core::traits::Store;

    let content = std::fs::read_to_string(path)?;
    let seed: SeedFile = serde_json::from_str(&content)?;

    let mut campaigns = 0;
    for campaign in &seed.campaigns {
        if !campaign.steps_well_ordered() {
            tracing::warn!(campaign = %campaign.name, "step orders not increasing, skipping");
            continue;
        }
        store.insert_campaign(campaign)?;
        campaigns += 1;
    }
    for prospect in &seed.prospects {
        store.insert_prospect(prospect)?;
    }
    for window in &seed.seller_windows {
        store.upsert_seller_window(window)?;
    }

    println!(
        "✅ Imported {} campaign(s), {} prospect(s), {} seller window(s)",
        campaigns,
        seed.prospects.len(),
        seed.seller_windows.len()
    );
    Ok(())
}
