//! # quadfs CLI
//!
//! Every command opens the data directory directly; the server need not run.
//!
//! ## Available Commands
//!
//! - `server` - start the HTTP server
//! - `init` - create the data directory and the root node
//! - `status` / `verify` - store summary, log replay and blob integrity check
//! - `mkdir`, `ls`, `stat`, `put`, `get`, `cp`, `mv`, `rm` - filesystem
//! - `query` - read-only query
//! - `log` - inspect committed transactions
//! - `export` - canonical or N-Quads dump
//! - `grant` / `revoke` - change permissions

mod commands;

use crate::config::Config;
use clap::{Parser, Subcommand, ValueEnum};
use quadfs_core::QuadFsError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// quadfs - a filesystem over a permission-filtered, transaction-logged quad store
#[derive(Parser, Debug)]
#[command(name = "quadfs")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress the startup banner
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Data directory (overrides config and QUADFS_DATA_DIR)
    #[arg(short = 'D', long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Config file (default: ./quadfs.toml if present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Act as this user id; without it the local operator acts as admin
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// Display name for --user
    #[arg(long, global = true)]
    pub name: Option<String>,

    /// Commit message recorded with mutations
    #[arg(short, long, global = true)]
    pub message: Option<String>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    pub fn is_server(&self) -> bool {
        matches!(self.command, Some(Commands::Server { .. }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportFormat {
    /// Binary canonical export with a BLAKE3 checksum
    Canonical,
    /// One N-Quads line per readable quad
    Nquads,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to (overrides config)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Create the data directory and the filesystem root
    Init,

    /// Show store status
    Status,

    /// Replay the log and re-hash blobs
    Verify,

    /// Create a directory and any missing parents
    Mkdir { path: String },

    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Show one entry
    Stat { path: String },

    /// Upload a local file
    Put {
        /// Local file to read
        source: PathBuf,
        /// Destination path in the store
        path: String,
    },

    /// Download a file, optionally a byte range
    Get {
        path: String,

        /// Local output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// First byte offset
        #[arg(long, default_value = "0")]
        start: u64,

        /// Exclusive end offset (default: end of file)
        #[arg(long)]
        end: Option<u64>,
    },

    /// Copy a file or directory
    Cp {
        src: String,
        dst: String,

        /// Replace an existing destination
        #[arg(short, long)]
        force: bool,
    },

    /// Move or rename a file or directory
    Mv {
        src: String,
        dst: String,

        /// Replace an existing destination
        #[arg(short, long)]
        force: bool,
    },

    /// Delete a file or directory tree
    Rm { path: String },

    /// Run a read-only query
    Query {
        /// Query text; read from --file when absent
        text: Option<String>,

        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Show committed transactions
    Log {
        /// Show this transaction in full
        index: Option<u64>,

        /// Number of recent transactions to list
        #[arg(short = 'n', long, default_value = "10")]
        last: u64,
    },

    /// Export the graph
    Export {
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short = 't', long, value_enum, default_value = "canonical")]
        format: ExportFormat,
    },

    /// Set a subject's access level on a path
    Grant {
        path: String,
        subject: String,
        /// none, list, read, write or manage
        level: String,
    },

    /// Remove a subject's direct grant on a path
    Revoke { path: String, subject: String },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), QuadFsError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    let ctx = CliContext {
        config,
        user: cli.user,
        name: cli.name,
        message: cli.message,
        json: cli.json,
    };

    match cli.command {
        Some(Commands::Server { host, port }) => cmd_server(ctx, host, port).await,
        Some(Commands::Init) => cmd_init(&ctx),
        Some(Commands::Status) | None => cmd_status(&ctx),
        Some(Commands::Verify) => cmd_verify(&ctx),
        Some(Commands::Mkdir { path }) => cmd_mkdir(&ctx, &path),
        Some(Commands::Ls { path }) => cmd_ls(&ctx, &path),
        Some(Commands::Stat { path }) => cmd_stat(&ctx, &path),
        Some(Commands::Put { source, path }) => cmd_put(&ctx, &source, &path),
        Some(Commands::Get {
            path,
            output,
            start,
            end,
        }) => cmd_get(&ctx, &path, output.as_deref(), start, end),
        Some(Commands::Cp { src, dst, force }) => cmd_transfer(&ctx, &src, &dst, force, false),
        Some(Commands::Mv { src, dst, force }) => cmd_transfer(&ctx, &src, &dst, force, true),
        Some(Commands::Rm { path }) => cmd_rm(&ctx, &path),
        Some(Commands::Query { text, file }) => cmd_query(&ctx, text, file.as_deref()),
        Some(Commands::Log { index, last }) => cmd_log(&ctx, index, last),
        Some(Commands::Export { output, format }) => cmd_export(&ctx, &output, format),
        Some(Commands::Grant {
            path,
            subject,
            level,
        }) => cmd_grant(&ctx, &path, &subject, &level),
        Some(Commands::Revoke { path, subject }) => cmd_revoke(&ctx, &path, &subject),
    }
}
