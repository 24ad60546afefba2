use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;

use commands::lineage::{lineage_command, load_config, scopes_command, SqlInput};

/// LineageFlow (lflow) CLI - column-level lineage for SQL
#[derive(Parser)]
#[clap(name = "lflow", about = "LineageFlow - column-level SQL lineage", version)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Trace every output column back to its source table columns
    #[clap(group(ArgGroup::new("input").required(true).args(["sql", "path"])))]
    Lineage {
        /// SQL text to analyze
        #[clap(long)]
        sql: Option<String>,

        /// A .sql file or a directory searched recursively for .sql files
        #[clap(short, long)]
        path: Option<PathBuf>,

        /// Output format (text, json, dot)
        #[clap(short, long, default_value = "text")]
        format: String,

        /// SQL dialect, overrides the config file
        #[clap(short, long)]
        dialect: Option<String>,

        /// Path to the configuration file (defaults to ./lineage.yaml)
        #[clap(short, long)]
        config: Option<PathBuf>,
    },

    /// Dump the scope tree built for each statement as JSON
    Scopes {
        /// SQL text to analyze
        #[clap(long)]
        sql: String,

        /// SQL dialect, overrides the config file
        #[clap(short, long)]
        dialect: Option<String>,

        /// Path to the configuration file (defaults to ./lineage.yaml)
        #[clap(short, long)]
        config: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Lineage {
            sql,
            path,
            format,
            dialect,
            config,
        } => {
            let config = load_config(config.as_deref(), dialect)?;
            let input = match (&sql, &path) {
                (Some(sql), _) => SqlInput::Inline(sql),
                (None, Some(path)) => SqlInput::Path(path),
                (None, None) => anyhow::bail!("Either --sql or --path is required"),
            };
            lineage_command(input, &format, &config)
        }
        Command::Scopes {
            sql,
            dialect,
            config,
        } => {
            let config = load_config(config.as_deref(), dialect)?;
            scopes_command(&sql, &config)
        }
        Command::Version => {
            display::display_version();
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli.command) {
        eprintln!("Error: {:#}", err);
        process::exit(1);
    }
}
