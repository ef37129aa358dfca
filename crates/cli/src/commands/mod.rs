//! CLI command definitions and execution
//!
//! Each command maps onto one `ObjectStore` entry point of the transport
//! engine. Object paths are absolute paths inside the configured bucket.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use bfs_core::{ConfigManager, ObjectPath};
use bfs_s3::S3Client;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

mod abort;
mod config;
mod get;
mod ls;
mod mv;
mod put;
mod rm;
mod stat;
mod uploads;

/// bfs - bucketfs transport engine driver
///
/// Talks to one S3-compatible bucket with HMAC-SHA1 signed requests,
/// parallel multipart transfers and bounded retries.
#[derive(Parser, Debug)]
#[command(name = "bfs")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (default: ~/.config/bfs/config.toml)
    #[arg(long, global = true, env = "BFS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format: human-readable or JSON
    #[arg(long, global = true, default_value = "false")]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, default_value = "false")]
    pub no_color: bool,

    /// Disable the transfer spinner
    #[arg(long, global = true, default_value = "false")]
    pub no_progress: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, default_value = "false")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true, default_value = "false")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the transport configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show object metadata
    Stat(stat::StatArgs),

    /// Download an object into a local file
    Get(get::GetArgs),

    /// Upload a local file, in parallel parts when it is large
    Put(put::PutArgs),

    /// Remove objects
    Rm(rm::RmArgs),

    /// List objects
    Ls(ls::LsArgs),

    /// Rename an object (server-side copy, then delete the source)
    Mv(mv::MvArgs),

    /// List multipart sessions that were never completed
    Uploads(uploads::UploadsArgs),

    /// Abort a multipart session and release its parts
    Abort(abort::AbortArgs),
}

/// Settings every command needs
#[derive(Debug, Clone)]
pub struct Globals {
    pub output: OutputConfig,
    pub config: Option<PathBuf>,
}

impl Globals {
    pub fn formatter(&self) -> Formatter {
        Formatter::new(self.output.clone())
    }

    fn config_manager(&self) -> bfs_core::Result<ConfigManager> {
        match &self.config {
            Some(path) => Ok(ConfigManager::with_path(path.clone())),
            None => ConfigManager::new(),
        }
    }

    /// Load the configuration and build a client, reporting failures.
    pub fn client(&self, formatter: &Formatter) -> Result<S3Client, ExitCode> {
        let config = self
            .config_manager()
            .and_then(|manager| manager.load())
            .map_err(|e| formatter.fail("Failed to load configuration", &e))?;
        S3Client::new(config.transport).map_err(|e| formatter.fail("Failed to create client", &e))
    }
}

/// Parse an object path argument; a missing leading `/` is added.
pub(crate) fn object_path(arg: &str) -> bfs_core::Result<ObjectPath> {
    if arg.starts_with('/') {
        ObjectPath::new(arg)
    } else {
        ObjectPath::new(format!("/{arg}"))
    }
}

/// Execute the CLI command and return an exit code
pub async fn execute(cli: Cli) -> ExitCode {
    let globals = Globals {
        output: OutputConfig {
            json: cli.json,
            no_color: cli.no_color,
            no_progress: cli.no_progress,
            quiet: cli.quiet,
        },
        config: cli.config,
    };

    match cli.command {
        Commands::Config(cmd) => config::execute(cmd, &globals),
        Commands::Stat(args) => stat::execute(args, &globals).await,
        Commands::Get(args) => get::execute(args, &globals).await,
        Commands::Put(args) => put::execute(args, &globals).await,
        Commands::Rm(args) => rm::execute(args, &globals).await,
        Commands::Ls(args) => ls::execute(args, &globals).await,
        Commands::Mv(args) => mv::execute(args, &globals).await,
        Commands::Uploads(args) => uploads::execute(args, &globals).await,
        Commands::Abort(args) => abort::execute(args, &globals).await,
    }
}
