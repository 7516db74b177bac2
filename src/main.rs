//! # Sendloop — Multi-Tenant Scheduled-Message Dispatch Daemon
//!
//! Usage:
//!   sendloop serve                          # Start the daemon
//!   sendloop serve --config ./custom.toml   # Custom config path
//!   sendloop jobs list --tenant acme        # Inspect a tenant's jobs

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sendloop_channels::{GatewayClient, MemoryClient};
use sendloop_core::traits::MessagingClient;
use sendloop_core::SendloopConfig;
use sendloop_platform::{ClientFactory, TenantManager};
use sendloop_scheduler::JobStore;

#[derive(Parser)]
#[command(name = "sendloop", version, about = "📤 Sendloop — scheduled-message dispatch daemon")]
struct Cli {
    /// Config file (defaults to ~/.sendloop/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the dispatch daemon until interrupted
    Serve {
        /// Use the in-memory transport instead of the gateway (nothing
        /// leaves the process; sends are logged only)
        #[arg(long)]
        dry_run: bool,
    },
    /// Inspect persisted jobs
    Jobs {
        #[command(subcommand)]
        command: JobsCommand,
    },
}

#[derive(Subcommand)]
enum JobsCommand {
    /// Print a tenant's job collection as JSON
    List {
        /// Tenant id
        #[arg(short, long)]
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "sendloop=debug,sendloop_scheduler=debug,sendloop_platform=debug,sendloop_channels=debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config_path = cli.config.unwrap_or_else(SendloopConfig::default_path);
    let config = SendloopConfig::load(&config_path)?;

    match cli.command {
        Command::Serve { dry_run } => serve(config, dry_run).await,
        Command::Jobs {
            command: JobsCommand::List { tenant },
        } => jobs_list(config, &tenant),
    }
}

async fn serve(config: SendloopConfig, dry_run: bool) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;
    tracing::info!("📤 Sendloop starting ({} configured tenants)", config.tenants.len());

    let factory: ClientFactory = if dry_run {
        tracing::warn!("🧪 dry run: sends stay in memory");
        Arc::new(|tenant_id: &str| {
            Arc::new(MemoryClient::ready(tenant_id)) as Arc<dyn MessagingClient>
        })
    } else {
        let gateway = config.gateway.clone();
        Arc::new(move |tenant_id: &str| {
            Arc::new(GatewayClient::new(tenant_id, gateway.clone())) as Arc<dyn MessagingClient>
        })
    };
    let manager = TenantManager::new(&config.data_dir, config.scheduler.clone(), factory);

    for tenant_id in &config.tenants {
        if let Err(e) = manager.ensure(tenant_id).await {
            tracing::error!("🛑 tenant {tenant_id} failed to start: {e}");
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("⏸ shutting down");
    manager.shutdown_all().await;
    Ok(())
}

fn jobs_list(config: SendloopConfig, tenant: &str) -> Result<()> {
    let store = JobStore::new(&config.data_dir.join(tenant));
    let jobs = store.load();
    println!("{}", serde_json::to_string_pretty(&jobs)?);
    Ok(())
}
