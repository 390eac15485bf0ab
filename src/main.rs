//! # Job Harvest CLI (`jh`)
//!
//! ## Usage
//!
//! ```bash
//! jh --config ./config/jh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `jh init` | Create the SQLite database |
//! | `jh session save` | Log in by hand and store the session cookies |
//! | `jh session check` | Open the search page with stored cookies |
//! | `jh harvest` | Harvest postings for a query into its table |
//! | `jh list` | List tables |
//! | `jh query <table> [limit]` | Show the first rows of a table |
//! | `jh export <table>` | Write a table as CSV or JSON |
//! | `jh purge <table>` | Drop a table |
//! | `jh apply <url>...` | Serve application-assist actions, one job at a time |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use job_harvest::config::{self, SearchOverrides};
use job_harvest::inspect::{self, ExportFormat};
use job_harvest::progress::ProgressMode;
use job_harvest::sqlite_store::SqliteStore;
use job_harvest::{apply, browser, run};

/// Job Harvest: collect job postings from a search session into SQLite.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/jh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "jh",
    about = "Job Harvest: collect job postings into SQLite and assist with applications",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/jh.toml")]
    config: PathBuf,

    /// Log level when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database file. Safe to run more than once.
    Init,

    /// Manage the stored login session.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Harvest postings for a search into its table.
    ///
    /// Flags override the `[search]` section of the config.
    Harvest {
        /// Search keywords.
        #[arg(long)]
        query: Option<String>,

        /// Search location.
        #[arg(long)]
        location: Option<String>,

        /// Number of postings to collect.
        #[arg(long)]
        count: Option<usize>,

        /// Recency filter: any, 24h, week, month.
        #[arg(long)]
        recency: Option<String>,

        /// Progress output on stderr. Defaults to human on a TTY, off otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// List the tables in the database.
    List,

    /// Show the first rows of a table.
    Query {
        table: String,

        /// Number of rows to show.
        #[arg(default_value = "5")]
        limit: usize,
    },

    /// Write every row of a table as CSV or JSON.
    Export {
        table: String,

        #[arg(long, value_enum, default_value = "csv")]
        format: ExportFormat,

        /// Output file. Defaults to stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Drop a table. Dropping a missing table is not an error.
    Purge { table: String },

    /// Serve application-assist actions for each job URL in turn.
    Apply {
        #[arg(required = true)]
        urls: Vec<String>,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Open the login page, wait for a manual login, save the cookies.
    Save {
        /// Seconds to wait for the login.
        #[arg(long, default_value = "30")]
        wait_secs: u64,
    },
    /// Open the search page with stored cookies and print its title.
    Check,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = SqliteStore::connect(&cfg).await?;
            store.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Session { action } => match action {
            SessionAction::Save { wait_secs } => {
                browser::save_session(
                    &cfg.browser,
                    &cfg.site.login_url,
                    Duration::from_secs(wait_secs),
                )
                .await?;
            }
            SessionAction::Check => {
                browser::check_session(&cfg.browser, &cfg.site.search_url).await?;
            }
        },
        Commands::Harvest {
            query,
            location,
            count,
            recency,
            progress,
        } => {
            let overrides = SearchOverrides {
                query,
                location,
                count,
                recency,
            };
            let reporter = progress.unwrap_or_else(ProgressMode::default_for_tty).reporter();
            run::run_harvest(&cfg, &overrides, reporter.as_ref()).await?;
        }
        Commands::List => {
            inspect::run_list(&cfg).await?;
        }
        Commands::Query { table, limit } => {
            inspect::run_query(&cfg, &table, limit).await?;
        }
        Commands::Export { table, format, out } => {
            inspect::run_export(&cfg, &table, format, out.as_deref()).await?;
        }
        Commands::Purge { table } => {
            inspect::run_purge(&cfg, &table).await?;
        }
        Commands::Apply { urls } => {
            apply::run_apply(&cfg, &urls).await?;
        }
    }

    Ok(())
}
