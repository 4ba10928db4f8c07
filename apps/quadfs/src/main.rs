//! # quadfs
//!
//! The binary: an HTTP server and a CLI over one quadfs data directory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 apps/quadfs (THE BINARY)             │
//! │                                                      │
//! │   ┌─────────────┐           ┌─────────────────────┐  │
//! │   │    CLI      │           │  HTTP (/dav, /query)│  │
//! │   │   (clap)    │           │       (axum)        │  │
//! │   └──────┬──────┘           └──────────┬──────────┘  │
//! │          └──────────────┬──────────────┘             │
//! │                         ▼                            │
//! │                 ┌───────────────┐                    │
//! │                 │  quadfs-core  │                    │
//! │                 └───────────────┘                    │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! quadfs server --host 0.0.0.0 --port 8080
//! quadfs --user alice mkdir /projects/report
//! quadfs --user alice put ./notes.txt /projects/report/notes.txt
//! quadfs query 'SELECT ?s WHERE { ?s a fs:Directory }'
//! ```

use clap::Parser;
use quadfs::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // QUADFS_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("QUADFS_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "quadfs=info,quadfs_core=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && cli.is_server() {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    eprintln!(
        "\n  quadfs v{}\n  permission-filtered quad store filesystem\n",
        env!("CARGO_PKG_VERSION")
    );
}
