//! CLI module for DeepCite
//!
//! Command-line parsing for the `deepcite` binary. Uses clap for argument
//! parsing and owo-colors for colored terminal output.

pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// DeepCite - research orchestration server
///
/// Plans sub-questions, gathers evidence in parallel, drafts, reviews and
/// publishes cited research reports.
#[derive(Parser, Debug)]
#[command(
    name = "deepcite",
    version,
    about = "DeepCite - cited research reports from a single question",
    long_about = "Plans sub-questions, gathers evidence for all of them in parallel, drafts a\n\
                  report, reviews and revises it a bounded number of times, then publishes it.\n\n\
                  Use 'serve' to run the HTTP API, or 'run' for a one-shot report.",
    after_help = "EXAMPLES:\n    \
                  deepcite serve                          # Start the server (reads deepcite.toml)\n    \
                  deepcite serve --config prod.toml       # Use a custom config file\n    \
                  deepcite run \"How is lithium recycled?\" # Research one question and print the report"
)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(
        short,
        long,
        default_value = "deepcite.toml",
        env = "DEEPCITE_CONFIG",
        global = true
    )]
    pub config: PathBuf,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Reload deepcite.toml when it changes on disk
        #[arg(long)]
        watch: bool,
    },

    /// Research a single question and print the report
    Run {
        /// The research question
        query: String,

        /// Override the maximum number of sub-questions
        #[arg(long)]
        max_sub_questions: Option<i64>,

        /// Override the maximum number of revisions
        #[arg(long)]
        max_revisions: Option<i64>,

        /// Print every progress event as JSON instead of a summary line
        #[arg(long)]
        json_events: bool,
    },
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
