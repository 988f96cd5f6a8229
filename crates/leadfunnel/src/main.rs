//! `leadfunnel` command-line launcher.

use anyhow::Context;
use clap::{Parser, Subcommand};
use leadfunnel_kernel::LeadFunnelKernel;
use leadfunnel_memory::SqliteLeadStore;
use leadfunnel_types::config::FunnelConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "leadfunnel", version, about = "Lead-capture funnel daemon")]
struct Cli {
    /// Config file (defaults to ~/.leadfunnel/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API (default).
    Start,
    /// Create the database schema and exit.
    InitDb,
    /// Print the effective configuration.
    Config,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command.unwrap_or(Command::Start) {
        Command::Start => {
            let kernel = LeadFunnelKernel::boot(cli.config.as_deref())
                .context("Failed to boot kernel")?;
            leadfunnel_api::server::run_daemon(kernel)
                .await
                .context("API server failed")?;
        }
        Command::InitDb => {
            let config = load_config(cli.config.as_deref())?;
            SqliteLeadStore::open(
                &config.store.database_url,
                Duration::from_millis(config.store.busy_timeout_ms),
            )
            .with_context(|| format!("Failed to open {}", config.store.database_url))?;
            info!(database = %config.store.database_url, "Database ready");
        }
        Command::Config => print_config(&load_config(cli.config.as_deref())?)?,
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FunnelConfig> {
    FunnelConfig::load(path).context("Failed to load config")
}

/// Print the config as TOML. The file only names credential variables, so
/// this reports whether each one is set rather than its value.
fn print_config(config: &FunnelConfig) -> anyhow::Result<()> {
    let rendered = toml::to_string_pretty(config).context("Failed to render config")?;
    println!("{rendered}");
    let token_env = &config.verification.twilio.auth_token_env;
    let token_state = if std::env::var(token_env).is_ok_and(|v| !v.trim().is_empty()) {
        "set"
    } else {
        "not set"
    };
    println!("# {token_env}: {token_state}");
    Ok(())
}
