use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rent-harvester")]
#[command(about = "Automated storage-rent collection bot for UTXO ledgers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = "config/default")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize database and show the active configuration
    Init,

    /// Run one scan pass over the box index
    Scan {
        /// Show the queued boxes in detail
        #[arg(short, long)]
        verbose: bool,

        /// Stop after this many accepted boxes
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Run a single harvest cycle
    Run {
        /// Build and balance batches without signing or broadcasting
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the unattended harvest service
    Auto {
        /// Cycle interval in seconds
        #[arg(short, long, default_value = "300")]
        interval: u64,

        /// Build and balance batches without signing or broadcasting
        #[arg(long)]
        dry_run: bool,
    },

    /// Show queue depth and the next eligible height
    Status,

    /// Show statistics and reports
    Stats {
        /// Output format: table or json
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Reset the scan cursor (forces a full rescan on the next cycle)
    Reset {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
