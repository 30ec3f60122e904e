//! Leafsync CLI
//!
//! Keeps a local git checkout in step with a remote LaTeX project.
//!
//! # Commands
//!
//! - `init` - Log in, record the project and replay its full history
//! - `pull` - Replay new remote revisions and rebase local work onto them
//! - `push` - Send local commits to the remote
//! - `sync` - Pull, then push

mod commands;
mod net;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Two-way sync between a remote LaTeX project and a git checkout.
#[derive(Parser)]
#[command(name = "leafsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Project checkout directory
    #[arg(global = true, short = 'C', long, default_value = ".")]
    dir: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(global = true, short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by pull, push and sync.
#[derive(Args, Debug, Clone, Default)]
pub struct RunFlags {
    /// Refuse to run with uncommitted changes instead of stashing them
    #[arg(long)]
    pub no_stash: bool,

    /// Remove empty folders that exist on only one side
    #[arg(long)]
    pub prune: bool,

    /// Show what would be done without changing anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Delete remote folders without asking
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in, record the project and replay its full history
    Init {
        /// Login email
        #[arg(short, long)]
        username: String,

        /// Login password (prompted for when omitted)
        #[arg(short, long)]
        password: Option<String>,

        /// Project id or project URL
        #[arg(long)]
        project: String,

        /// Base URL of the service
        #[arg(long, default_value = "https://www.overleaf.com")]
        base_url: String,

        /// Replace an existing repository
        #[arg(short, long)]
        force: bool,
    },

    /// Replay new remote revisions and rebase local work onto them
    Pull {
        #[command(flatten)]
        flags: RunFlags,
    },

    /// Send local commits to the remote
    Push {
        #[command(flatten)]
        flags: RunFlags,
    },

    /// Pull, then push
    Sync {
        #[command(flatten)]
        flags: RunFlags,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Init {
            username,
            password,
            project,
            base_url,
            force,
        } => commands::init::run(&cli.dir, username, password, &project, &base_url, force),
        Commands::Pull { flags } => commands::pull::run(&cli.dir, &flags),
        Commands::Push { flags } => commands::push::run(&cli.dir, &flags),
        Commands::Sync { flags } => commands::sync::run(&cli.dir, &flags),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::from(err.exit_code())
        }
    }
}
