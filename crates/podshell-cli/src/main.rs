mod cmd;
mod context;
mod output;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use context::Context;
use podshell_core::WorkspaceAction;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "podshell",
    about = "Manage containerized development workspaces through the workspace CLI",
    version,
    propagate_version = true
)]
struct Cli {
    /// Data directory (default: ~/.podshell)
    #[arg(long, global = true, env = "PODSHELL_HOME")]
    home: Option<PathBuf>,

    /// Workspace CLI binary (default: from config, then `devpod` on PATH)
    #[arg(long, global = true, env = "PODSHELL_BINARY")]
    binary: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Verbose logs, and pass --debug to lifecycle commands
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List workspaces
    List,

    /// Create or start a workspace
    Up {
        id: String,
        /// Source of a new workspace, e.g. git:https://github.com/org/repo
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        ide: Option<String>,
        #[arg(long)]
        provider: Option<String>,
    },

    /// Stop a workspace
    Stop { id: String },

    /// Recreate a workspace's container
    Rebuild { id: String },

    /// Reset a workspace to a clean state
    Reset { id: String },

    /// Delete a workspace
    Delete {
        id: String,
        /// Delete even if the provider reports an error
        #[arg(long)]
        force: bool,
    },

    /// Show the status of a workspace
    Status { id: String },

    /// Show recorded actions (optionally for one workspace)
    History { id: Option<String> },

    /// Replay the log of a recorded action
    Logs { action_id: String },

    /// Inspect and validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        match &cli.command {
            Commands::Up { .. }
            | Commands::Stop { .. }
            | Commands::Rebuild { .. }
            | Commands::Reset { .. }
            | Commands::Delete { .. } => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = Context::load(cli.home.as_deref(), cli.binary.clone(), cli.debug).and_then(|ctx| {
        let json = cli.json;
        match cli.command {
            Commands::List => cmd::list::run(&ctx, json),
            Commands::Up {
                id,
                source,
                ide,
                provider,
            } => {
                let config = cmd::lifecycle::start_config(source.as_deref(), ide, provider)?;
                cmd::lifecycle::run(&ctx, &id, WorkspaceAction::Start(config), json)
            }
            Commands::Stop { id } => cmd::lifecycle::run(&ctx, &id, WorkspaceAction::Stop, json),
            Commands::Rebuild { id } => {
                cmd::lifecycle::run(&ctx, &id, WorkspaceAction::Rebuild, json)
            }
            Commands::Reset { id } => cmd::lifecycle::run(&ctx, &id, WorkspaceAction::Reset, json),
            Commands::Delete { id, force } => {
                cmd::lifecycle::run(&ctx, &id, WorkspaceAction::Remove { force }, json)
            }
            Commands::Status { id } => cmd::status::run(&ctx, &id, json),
            Commands::History { id } => cmd::history::run(&ctx, id.as_deref(), json),
            Commands::Logs { action_id } => cmd::logs::run(&ctx, &action_id, json),
            Commands::Config { subcommand } => cmd::config::run(&ctx, subcommand, json),
        }
    });

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
