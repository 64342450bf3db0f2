//! # Intake Harness CLI (`intake`)
//!
//! Operator surface over the library: inspect resolved sources, issue single
//! fetches, run keyword sweeps, read documents, and call model sources.
//!
//! ## Usage
//!
//! ```bash
//! intake --config ./config/intake.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `intake sources <type>` | Active sources of a type, in resolution order |
//! | `intake fetch <type> <endpoint>` | Call one endpoint and print mapped items |
//! | `intake sweep <types>...` | Chunked keyword sweep, tasks upserted to the store |
//! | `intake get <path>` | Print one stored document |
//! | `intake complete --template <file>` | JSON completion from the `llm` source |
//! | `intake embed <texts>...` | Embeddings from the `embeddings` source |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `intake_harness=info,warn`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use intake_harness::{ai_cmd, app::App, config, fetch_cmd, get, sources, sweep_cmd};

/// Intake Harness CLI: configuration-driven ingestion into a document store.
#[derive(Parser)]
#[command(
    name = "intake",
    about = "Intake Harness: configuration-driven external data ingestion",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/intake.toml`.
    #[arg(long, global = true, default_value = "./config/intake.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// List the active sources of a type.
    ///
    /// Sources whose API key secret is missing are left out (and logged).
    Sources {
        /// Source type, e.g. `news`.
        source_type: String,
    },

    /// Call one endpoint of a source.
    Fetch {
        source_type: String,
        /// Endpoint key from the source's `endpoint_paths`.
        endpoint: String,
        /// Use this source instead of the highest-priority one.
        #[arg(long)]
        source_id: Option<String>,
        /// Generic parameters as `key=value` pairs.
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
        /// Print the decoded response instead of mapped items.
        #[arg(long)]
        raw: bool,
    },

    /// Sweep monitored entities' keywords across sources and enqueue tasks.
    Sweep {
        /// Source types to sweep.
        #[arg(required = true)]
        source_types: Vec<String>,
        /// Read entities from a JSON file instead of the store.
        #[arg(long)]
        entities: Option<PathBuf>,
        /// Collect and print tasks without writing them.
        #[arg(long)]
        dry_run: bool,
        /// Abort on the first failed chunk too.
        #[arg(long)]
        fail_fast: bool,
    },

    /// Print one document, e.g. `queued_tasks/abc123`.
    Get { path: String },

    /// Request a JSON completion for a prompt template.
    Complete {
        /// Template file with `{key}` placeholders.
        #[arg(long)]
        template: PathBuf,
        /// Placeholder values as `key=value` pairs.
        #[arg(long = "var", value_parser = parse_key_val)]
        vars: Vec<(String, String)>,
    },

    /// Embed texts in one request.
    Embed {
        #[arg(required = true)]
        texts: Vec<String>,
    },
}

/// Parse a `key=value` pair for `--param` and `--var` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("intake_harness=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;
    let mut app = App::from_config(cfg)?;

    match cli.command {
        Commands::Sources { source_type } => {
            sources::list_sources(&app, &source_type).await?;
        }
        Commands::Fetch {
            source_type,
            endpoint,
            source_id,
            params,
            raw,
        } => {
            fetch_cmd::run_fetch(
                &app,
                &source_type,
                &endpoint,
                source_id.as_deref(),
                params,
                raw,
            )
            .await?;
        }
        Commands::Sweep {
            source_types,
            entities,
            dry_run,
            fail_fast,
        } => {
            sweep_cmd::run_sweep(
                &mut app,
                &source_types,
                entities.as_deref(),
                dry_run,
                fail_fast,
            )
            .await?;
        }
        Commands::Get { path } => {
            get::run_get(&mut app, &path).await?;
        }
        Commands::Complete { template, vars } => {
            ai_cmd::run_complete(&app, &template, vars).await?;
        }
        Commands::Embed { texts } => {
            ai_cmd::run_embed(&app, texts).await?;
        }
    }

    Ok(())
}
