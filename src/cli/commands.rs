use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ingestor")]
#[command(about = "Multi-source article acquisition with dedup, quality gating and circuit breaking")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one acquisition pass over the configured sources
    Run {
        /// Only fetch these sources (repeatable)
        #[arg(short, long = "source", value_name = "ID")]
        sources: Vec<String>,

        /// Only fetch sources in these languages (repeatable)
        #[arg(short, long = "language", value_name = "TAG")]
        languages: Vec<String>,

        /// Maximum candidates requested per source (0 = adapter default)
        #[arg(short, long, default_value_t = 0)]
        max_articles: usize,

        /// Dry run - fetch and evaluate, but record nothing and hand nothing off
        #[arg(long)]
        dry_run: bool,

        /// Select sources named with --source even if they are not active
        #[arg(long)]
        force: bool,

        /// Cancel the run after this many seconds
        #[arg(long, value_name = "SECS")]
        deadline_secs: Option<u64>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List configured sources with their health
    Sources,

    /// Re-enable a source disabled by the circuit breaker
    Reactivate {
        /// Source id
        id: String,
    },

    /// Show recent acquisition jobs for a source
    History {
        /// Source id
        id: String,

        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },

    /// Forget fingerprints older than the given number of days
    Prune {
        #[arg(long)]
        days: u32,
    },
}
