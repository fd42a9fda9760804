// Copyright 2026 Palate Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use palate::cli;
use palate::config::{HarvestConfig, DEFAULT_START_URL};

#[derive(Parser)]
#[command(
    name = "palate",
    about = "Palate — restaurant-guide harvester",
    version,
    after_help = "Run 'palate <command> --help' for details on each command."
)]
struct Cli {
    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect restaurant metadata and photos into JSON/CSV
    Harvest {
        /// Listing entry URL (page 1)
        #[arg(long, default_value = DEFAULT_START_URL)]
        start_url: String,
        /// Read detail URLs from a file (one per line) instead of the listing
        #[arg(long)]
        from_file: Option<PathBuf>,
        /// Concurrent detail fetches per batch
        #[arg(long, default_value = "4")]
        workers: usize,
        /// Renderer contexts kept in the pool
        #[arg(long, default_value = "4")]
        pool_capacity: usize,
        /// Extra renderer contexts allowed under contention
        #[arg(long, default_value = "2")]
        max_overflow: usize,
        /// URLs dispatched per batch
        #[arg(long, default_value = "8")]
        batch_size: usize,
        /// Pause between batches in milliseconds
        #[arg(long, default_value = "500")]
        cooldown_ms: u64,
        /// Overall budget for one detail fetch in milliseconds
        #[arg(long, default_value = "30000")]
        fetch_timeout_ms: u64,
        /// Bounded wait for pool checkout in milliseconds
        #[arg(long, default_value = "10000")]
        acquire_timeout_ms: u64,
        /// Directory for downloaded photos
        #[arg(long, default_value = "restaurant_images")]
        images_dir: PathBuf,
        /// Output file stem (.json/.csv appended)
        #[arg(long, default_value = "restaurants")]
        output: String,
        /// Cap the number of restaurants processed
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Walk the listing and print discovered restaurant URLs
    Urls {
        /// Listing entry URL (page 1)
        #[arg(long, default_value = DEFAULT_START_URL)]
        start_url: String,
        /// Cap the number of URLs printed
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Normalize downloaded images to JPEG
    Convert {
        /// Directory containing the images
        #[arg(long, default_value = "restaurant_images")]
        dir: PathBuf,
        /// Skip backing up originals
        #[arg(long)]
        no_backup: bool,
    },
    /// Check environment and diagnose issues
    Doctor {
        /// Directory for downloaded photos
        #[arg(long, default_value = "restaurant_images")]
        images_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "palate=debug" } else { "palate=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Harvest {
            start_url,
            from_file,
            workers,
            pool_capacity,
            max_overflow,
            batch_size,
            cooldown_ms,
            fetch_timeout_ms,
            acquire_timeout_ms,
            images_dir,
            output,
            limit,
        } => {
            let config = HarvestConfig {
                start_url,
                workers,
                pool_capacity,
                max_overflow,
                batch_size,
                cooldown_ms,
                fetch_timeout_ms,
                acquire_timeout_ms,
                images_dir,
                output_stem: output,
                limit,
                ..Default::default()
            };
            cli::harvest_cmd::run(config, from_file).await
        }
        Commands::Urls { start_url, limit } => {
            let config = HarvestConfig {
                start_url,
                limit,
                ..Default::default()
            };
            cli::urls_cmd::run(config).await
        }
        Commands::Convert { dir, no_backup } => cli::convert_cmd::run(dir, !no_backup).await,
        Commands::Doctor { images_dir } => cli::doctor::run(&images_dir).await,
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        eprintln!("  Error: {e:#}");
        std::process::exit(1);
    }

    result
}
