use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wayfarer::config::Config;
use wayfarer::crawler::{Collaborators, DefaultUrlPolicy, Frontier, HttpFetcher, WorkerPool, WorkerSettings};
use wayfarer::storage::{DuplicateDetector, SqliteUrlStore, UrlStore};
use wayfarer::utils::{format_bytes, truncate_text};

#[derive(Parser)]
#[command(
    name = "wayfarer",
    version,
    about = "Polite, deduplicating web crawler with a crash-recoverable frontier",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Args)]
struct ConfigArgs {
    /// TOML configuration file (defaults to WAYFARER_* environment variables)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frontier database path
    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl from the seed urls until the frontier drains
    Crawl {
        #[command(flatten)]
        config: ConfigArgs,

        /// Seed url (repeatable); replaces configured seeds
        #[arg(short, long = "seed")]
        seeds: Vec<String>,

        /// Number of workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Seconds between requests to the same domain
        #[arg(long)]
        politeness: Option<f64>,

        /// Seconds a worker sleeps after each url
        #[arg(long)]
        delay: Option<f64>,

        /// Delete the persistent frontier and start from the seeds
        #[arg(long, default_value = "false")]
        restart: bool,
    },

    /// Show frontier progress from the store
    Status {
        #[command(flatten)]
        config: ConfigArgs,

        /// Print this many pending urls
        #[arg(long, default_value = "0")]
        show_pending: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Crawl {
            config,
            seeds,
            workers,
            politeness,
            delay,
            restart,
        } => {
            let mut config = load_config(&config)?;
            if !seeds.is_empty() {
                config.crawler.seed_urls = seeds;
            }
            if let Some(workers) = workers {
                config.crawler.worker_count = workers;
            }
            if let Some(politeness) = politeness {
                config.crawler.politeness_interval_secs = politeness;
            }
            if let Some(delay) = delay {
                config.crawler.inter_request_delay_secs = delay;
            }
            config.storage.restart |= restart;

            setup_tracing(&config, cli.log_format.as_deref(), cli.verbose)?;
            config.validate().context("Invalid configuration")?;

            tracing::info!(
                seeds = config.crawler.seed_urls.len(),
                workers = config.crawler.worker_count,
                store = %config.storage.store_path.display(),
                restart = config.storage.restart,
                "Starting crawl command"
            );
            crawl(config).await?;
        }

        Commands::Status {
            config,
            show_pending,
        } => {
            let config = load_config(&config)?;
            setup_tracing(&config, cli.log_format.as_deref(), cli.verbose)?;
            status(&config, show_pending)?;
        }
    }

    Ok(())
}

fn load_config(args: &ConfigArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(store) = &args.store {
        config.storage.store_path = store.clone();
    }
    Ok(config)
}

fn setup_tracing(config: &Config, format: Option<&str>, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("wayfarer=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(format!("wayfarer={},warn", config.logging.level))
        })
    };

    match format.unwrap_or(&config.logging.format) {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()?;
        }
    }

    Ok(())
}

async fn crawl(config: Config) -> Result<()> {
    let policy = Arc::new(DefaultUrlPolicy::new(&config.policy)?);
    let frontier = Arc::new(Frontier::open(&config, policy.as_ref())?);
    let detector = Arc::new(DuplicateDetector::new(
        config.dedup.near_duplicate_hamming_threshold,
    ));
    let fetcher = Arc::new(HttpFetcher::new(&config.crawler).context("Failed to create HTTP client")?);

    let pool = WorkerPool::new(
        Arc::clone(&frontier),
        Arc::clone(&detector),
        Collaborators::with_html_parser(fetcher, policy)?,
        WorkerSettings::from_config(&config),
        config.crawler.worker_count,
    );

    let shutdown = pool.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, finishing in-flight urls");
            shutdown.shutdown();
        }
    });

    let stats = pool.run().await;
    let store = frontier.stats()?;
    let report = serde_json::json!({
        "pipeline": stats,
        "store": store,
        "dedup": detector.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn status(config: &Config, show_pending: usize) -> Result<()> {
    let path = &config.storage.store_path;
    if !path.exists() {
        anyhow::bail!("No frontier store at {}", path.display());
    }

    let store = SqliteUrlStore::new(path)?;
    let stats = store.stats()?;
    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    println!("Frontier store: {} ({})", path.display(), format_bytes(size));
    println!("  Total:     {}", stats.total);
    println!("  Completed: {}", stats.completed);
    println!("  Pending:   {}", stats.pending);
    println!("  Progress:  {:.1}%", stats.completion_rate() * 100.0);

    if show_pending > 0 {
        println!("Pending urls:");
        for record in store
            .all_records()?
            .into_iter()
            .filter(|r| !r.completed)
            .take(show_pending)
        {
            println!("  {}", truncate_text(&record.url, 120));
        }
    }

    Ok(())
}
