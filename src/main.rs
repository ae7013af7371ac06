use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use guia_sync::config::Config;
use guia_sync::storage::SqliteGuideRepository;
use guia_sync::sync::{CycleOutcome, CycleReport, SyncEngine};

#[derive(Parser)]
#[command(
    name = "guia-sync",
    version,
    about = "Synchronizes hospital authorization guides with the clearinghouse API",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (environment variables are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); defaults to the configured format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every enabled loop until Ctrl-C
    Run,

    /// Run one transmission cycle
    Transmit,

    /// Run one field-change monitor cycle
    Watch,

    /// Run one pull reconciliation cycle
    Pull,

    /// Show guide counts, loop state and token state
    Status {
        /// Also print Prometheus metrics
        #[arg(long, default_value = "false")]
        metrics: bool,
    },

    /// Show token state for both scopes
    Token {
        /// Force a fresh authentication
        #[arg(long, default_value = "false")]
        refresh: bool,
    },

    /// End observation of one guide
    Finalize {
        /// Guide number
        numero: String,
    },

    /// Create the guide store schema
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;

    // Initialize tracing/logging
    let log_format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(log_format, cli.verbose)?;

    tracing::info!("guia-sync starting");

    match cli.command {
        Commands::Run => run(&config).await?,
        Commands::Transmit => {
            let engine = SyncEngine::connect(&config)?;
            let transmitter = engine.transmitter().cycle();
            transmitter.recover_stale()?;
            print_report("transmission", &transmitter.run_once().await?);
        }
        Commands::Watch => {
            let engine = SyncEngine::connect(&config)?;
            print_report("field_monitor", &engine.field_monitor().cycle().run_once().await?);
        }
        Commands::Pull => {
            let engine = SyncEngine::connect(&config)?;
            match engine.pull_monitor().cycle().run_once().await? {
                CycleOutcome::Completed(report) => print_report("pull_monitor", &report),
                CycleOutcome::Skipped { retry_after } => {
                    println!("Pull cycle skipped, retry in {}s", retry_after.as_secs());
                }
            }
        }
        Commands::Status { metrics } => status(&config, metrics).await?,
        Commands::Token { refresh } => token(&config, refresh).await?,
        Commands::Finalize { numero } => {
            let engine = SyncEngine::connect(&config)?;
            let guide = engine.field_monitor().cycle().force_finalize(&numero)?;
            println!(
                "Guide {} finalized (tp_status={}, version={})",
                guide.guide_number, guide.transmission_status, guide.version
            );
        }
        Commands::InitDb => {
            SqliteGuideRepository::new(&config.database.sqlite_path)?;
            println!(
                "Guide store ready at {}",
                config.database.sqlite_path.display()
            );
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            tracing_subscriber::EnvFilter::new("guia_sync=debug,info")
        } else {
            tracing_subscriber::EnvFilter::new("guia_sync=info,warn")
        }
    });

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn run(config: &Config) -> Result<()> {
    if let Err(e) = guia_sync::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed");
    }

    let engine = SyncEngine::connect(config)?;
    if engine.start_all() == 0 {
        tracing::warn!("All loops are disabled, nothing to run");
        return Ok(());
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutdown requested, waiting for running cycles");

    engine.stop_all().await;
    Ok(())
}

async fn status(config: &Config, with_metrics: bool) -> Result<()> {
    let engine = SyncEngine::connect(config)?;
    let status = engine.status().await?;
    let counts = &status.counts;

    println!("Guides: {}", counts.total());
    println!(
        "  tp_status: A={} P={} T={} E={}",
        counts.awaiting, counts.processing, counts.transmitted, counts.error
    );
    println!(
        "  monitoramento: N={} M={} F={}",
        counts.not_watched, counts.watching, counts.finalized
    );
    println!(
        "Loops: transmission={} field_monitor={} pull_monitor={}",
        status.transmission_running, status.field_monitor_running, status.pull_monitor_running
    );
    match status.last_pull_run {
        Some(at) => println!("Last pull run: {}", at.to_rfc3339()),
        None => println!("Last pull run: never (this process)"),
    }
    for info in &status.tokens {
        println!(
            "Token [{}]: present={} due_for_refresh={} age={}",
            info.scope,
            info.has_token,
            info.should_refresh,
            info.age
                .map(|a| format!("{}s", a.as_secs()))
                .unwrap_or_else(|| String::from("-"))
        );
    }

    if with_metrics {
        if let Err(e) = guia_sync::metrics::init_metrics() {
            tracing::warn!(error = %e, "Metrics initialization failed");
        }
        let text = guia_sync::metrics::gather_metrics()
            .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {e}"))?;
        println!();
        print!("{text}");
    }

    Ok(())
}

async fn token(config: &Config, refresh: bool) -> Result<()> {
    let engine = SyncEngine::connect(config)?;
    let client = engine
        .client()
        .context("No HTTP client configured")?;

    for tokens in [client.transmission_tokens(), client.export_tokens()] {
        let result = if refresh {
            tokens.force_refresh().await
        } else {
            tokens.get_valid_token().await
        };

        // Only the length is ever shown
        match result {
            Ok(token) => println!("Token [{}]: ok ({} chars)", tokens.scope(), token.len()),
            Err(e) => println!("Token [{}]: failed ({}): {}", tokens.scope(), e.kind.as_str(), e),
        }
    }

    Ok(())
}

fn print_report(name: &str, report: &CycleReport) {
    println!("{name} cycle finished");
    println!("  examined:  {}", report.examined);
    println!("  succeeded: {}", report.succeeded);
    println!("  retried:   {}", report.retried);
    println!("  failed:    {}", report.failed);
    println!("  finalized: {}", report.finalized);
    println!("  updated:   {}", report.updated);
    if report.conflicts > 0 {
        println!("  conflicts: {}", report.conflicts);
    }
}
