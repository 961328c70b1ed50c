//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use armory_api::AppState;
use armory_core::{CategoryRequest, Dispatcher};
use armory_shared::{
    AppConfig, Category, OutcomeStatus, Progress, TaskStatus, init_config, load_config,
    load_config_from,
};
use armory_storage::{Storage, UnitFilter};

/// How often `armory scrape` polls its task.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Armory: scrape military equipment data and serve it as an API.
#[derive(Parser)]
#[command(
    name = "armory",
    version,
    about = "Scrape per-country military equipment data, enrich it with 3D models, and serve it over HTTP.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.armory/armory.toml.
    #[arg(long, global = true, env = "ARMORY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding `[database] path`.
    #[arg(long, global = true, env = "ARMORY_DB")]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Start the HTTP API server.
    Serve {
        /// Address to bind (defaults to `[server] host`).
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (defaults to `[server] port`).
        #[arg(short, long)]
        port: Option<u16>,

        /// Pipelines allowed to run at once.
        #[arg(long)]
        max_concurrent: Option<usize>,
    },

    /// Scrape one country in the foreground and store the results.
    Scrape {
        /// Country name as used by the source site (e.g. `india`).
        country: String,

        /// Categories to scrape, comma-separated, or `all`.
        #[arg(short, long, value_delimiter = ',', default_value = "all")]
        categories: Vec<String>,
    },

    /// List countries with stored data.
    Countries,

    /// Show stored data for a country.
    Show {
        /// Country name.
        country: String,

        /// Category to list units for. Without it, prints per-category counts.
        category: Option<String>,

        /// Case-insensitive filter on name, model, and role.
        #[arg(short, long)]
        search: Option<String>,

        /// Maximum number of units to print.
        #[arg(short, long)]
        limit: Option<u32>,

        /// Print units as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "armory=info,tower_http=info",
        1 => "armory=debug,tower_http=debug",
        _ => "armory=trace,tower_http=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    // `config init` must work even when the existing file does not parse.
    if matches!(
        cli.command,
        Command::Config {
            action: ConfigAction::Init
        }
    ) {
        return cmd_config_init();
    }

    let config = resolve_config(&cli)?;
    match cli.command {
        Command::Serve {
            host,
            port,
            max_concurrent,
        } => cmd_serve(config, host, port, max_concurrent).await,
        Command::Scrape {
            country,
            categories,
        } => cmd_scrape(&config, &country, &categories).await,
        Command::Countries => cmd_countries(&config).await,
        Command::Show {
            country,
            category,
            search,
            limit,
            json,
        } => cmd_show(&config, &country, category.as_deref(), search, limit, json).await,
        Command::Config { .. } => cmd_config_show(&config),
    }
}

/// Load the config file and apply global overrides.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(db) = &cli.db {
        config.database.path = db.clone();
    }
    Ok(config)
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

async fn cmd_serve(
    mut config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
    max_concurrent: Option<usize>,
) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(n) = max_concurrent {
        config.pipeline.max_concurrent = n;
    }

    let db_path = config.database.resolved_path()?;
    info!(db = %db_path.display(), "opening database");
    let storage = Arc::new(Storage::open(&db_path).await?);
    let dispatcher = Arc::new(Dispatcher::from_config(&config, Arc::clone(&storage))?);

    let state = AppState {
        dispatcher: Arc::clone(&dispatcher),
        storage,
    };
    armory_api::serve(&config.server, state, shutdown_signal()).await?;
    dispatcher.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ---------------------------------------------------------------------------
// scrape
// ---------------------------------------------------------------------------

async fn cmd_scrape(config: &AppConfig, country: &str, categories: &[String]) -> Result<()> {
    let storage = Arc::new(Storage::open(&config.database.resolved_path()?).await?);
    let dispatcher = Dispatcher::from_config(config, storage)?;
    let request = match categories {
        [one] => CategoryRequest::from(one.as_str()),
        many => CategoryRequest::from(many),
    };
    let submission = dispatcher.submit(country, request).await?;
    let task_id = submission.task_id;
    info!(%task_id, country = %submission.country, "scrape started");

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")?
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "✓"])
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(80));

    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut cancel_sent = false;
    let progress = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !cancel_sent => {
                dispatcher.cancel(task_id).await?;
                cancel_sent = true;
                bar.set_message("cancelling...");
            }
            _ = ticker.tick() => {
                let p = dispatcher.status(task_id).await?;
                bar.set_position(u64::from(p.progress_percent));
                if !cancel_sent {
                    bar.set_message(p.message.clone());
                }
                if p.is_terminal() {
                    break p;
                }
            }
        }
    };
    bar.finish_and_clear();

    print_summary(&progress);
    match progress.status {
        TaskStatus::Failed => Err(eyre!("{}", progress.message)),
        TaskStatus::Cancelled => Err(eyre!("scrape cancelled")),
        _ => Ok(()),
    }
}

fn print_summary(progress: &Progress) {
    println!();
    println!("  {}", progress.message);
    for (category, outcome) in &progress.results {
        match outcome.status {
            OutcomeStatus::Success => {
                println!("  {category:<11} {:>5} units", outcome.record_count);
            }
            OutcomeStatus::Failed => {
                println!("  {category:<11} failed: {}", outcome.message);
            }
        }
    }
    if let Some(finished) = progress.finished_at {
        let elapsed = finished - progress.created_at;
        println!(
            "  Time:       {:.1}s",
            elapsed.num_milliseconds() as f64 / 1000.0
        );
    }
    println!();
}

// ---------------------------------------------------------------------------
// countries / show
// ---------------------------------------------------------------------------

async fn open_readonly(config: &AppConfig) -> Result<Storage> {
    Ok(Storage::open_readonly(&config.database.resolved_path()?).await?)
}

async fn cmd_countries(config: &AppConfig) -> Result<()> {
    let storage = open_readonly(config).await?;
    let countries = storage.list_countries().await?;
    if countries.is_empty() {
        println!("No countries stored yet. Run `armory scrape <country>` first.");
        return Ok(());
    }

    println!("{:<20} {:<20} LAST UPDATED", "NAME", "DISPLAY NAME");
    for c in countries {
        println!("{:<20} {:<20} {}", c.name, c.display_name, c.last_updated);
    }
    Ok(())
}

async fn cmd_show(
    config: &AppConfig,
    country: &str,
    category: Option<&str>,
    search: Option<String>,
    limit: Option<u32>,
    json: bool,
) -> Result<()> {
    let storage = open_readonly(config).await?;
    let record = storage
        .find_country(country)
        .await?
        .ok_or_else(|| eyre!("no data stored for country '{country}'"))?;

    let Some(category) = category else {
        println!("{} (updated {})", record.display_name, record.last_updated);
        for (category, count) in storage.count_units(&record.id).await? {
            println!("  {category:<11} {count:>5}");
        }
        return Ok(());
    };

    let category: Category = category.parse()?;
    let filter = UnitFilter {
        search,
        limit,
        offset: 0,
    };
    let page = storage.list_units(&record.id, category, &filter).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page.units)?);
        return Ok(());
    }

    println!(
        "{} / {category}: showing {} of {}",
        record.display_name,
        page.units.len(),
        page.total
    );
    for stored in &page.units {
        let unit = &stored.unit;
        println!(
            "  {:<28} {:<18} {:>5}  {}",
            unit.name, unit.model, unit.units, unit.role
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}
