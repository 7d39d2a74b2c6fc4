mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use rulesync_core::resolver::Resolution;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "rulesync",
    about = "Keep a directory of markdown rules in sync with a rule server",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .rulesync/ or .git/)
    #[arg(long, global = true, env = "RULESYNC_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize rulesync in the current project
    Init {
        /// Rule server URL
        #[arg(long)]
        server: Option<String>,
    },

    /// List local rules with their sync status
    List,

    /// Show one rule's metadata and content
    Show { id: String },

    /// Delete a rule locally and queue its deletion on the server
    Delete { id: String },

    /// Show sync status: counts, conflicts, pending deletions, server health
    Status,

    /// Run one sync pass now
    Sync {
        /// Answer every conflict with this choice instead of prompting
        /// (keep-local, keep-server, keep-both, mark, skip)
        #[arg(long)]
        strategy: Option<Resolution>,
    },

    /// Resolve a rule marked as a conflict
    Resolve {
        id: String,
        /// keep-local, keep-server, keep-both, mark or skip
        #[arg(long)]
        strategy: Resolution,
    },

    /// Download specific rules from the server, overwriting local copies
    Pull {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Sync in the background until interrupted
    Watch,

    /// Run the reference rule server
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "3142")]
        port: u16,
        /// JSON file to keep rules in across restarts (default: memory only)
        #[arg(long)]
        data: Option<PathBuf>,
    },

    /// Inspect and validate the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Watch | Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { server } => cmd::init::run(&root, server.as_deref()),
        Commands::List => cmd::rules::list(&root, cli.json),
        Commands::Show { id } => cmd::rules::show(&root, &id, cli.json),
        Commands::Delete { id } => cmd::rules::delete(&root, &id, cli.json),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Sync { strategy } => cmd::sync::run(&root, strategy, cli.json),
        Commands::Resolve { id, strategy } => cmd::sync::resolve(&root, &id, strategy, cli.json),
        Commands::Pull { ids } => cmd::sync::pull(&root, &ids, cli.json),
        Commands::Watch => cmd::watch::run(&root),
        Commands::Serve { port, data } => cmd::serve::run(port, data),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
