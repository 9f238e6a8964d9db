//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::{Stage, ZeroBaseline};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Number of projects in the NJR-1 corpus.
pub const NJR1_DATASET_COUNT: usize = 296;

/// vgr-bench - NullAway warning reduction benchmark for VGRTool
///
/// Runs javac with Error Prone and NullAway over every NJR-1 project,
/// refactors the projects in place with VGRTool, reruns the analyzer and
/// summarizes how many warnings the refactoring removed.
///
/// Examples:
///   vgr-bench
///   vgr-bench --jobs 8 --limit 20
///   vgr-bench initialize && vgr-bench refactor && vgr-bench finalize
///   vgr-bench summarize --format json
///   vgr-bench dataset url0a1b2c3d
///   vgr-bench --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Stage(s) to run. Runs the whole pipeline when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .vgrbench.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Benchmark root directory (datasets, results, jars)
    #[arg(long, value_name = "DIR", env = "VGRBENCH_ROOT", global = true)]
    pub root: Option<PathBuf>,

    /// Number of datasets processed concurrently
    ///
    /// Defaults to the number of available CPUs.
    #[arg(short, long, value_name = "NUM", global = true)]
    pub jobs: Option<usize>,

    /// Process datasets one at a time (same as --jobs 1)
    #[arg(long, conflicts_with = "jobs", global = true)]
    pub sequential: bool,

    /// Timeout in seconds for every javac / refactorer invocation
    #[arg(long, value_name = "SECS", global = true)]
    pub timeout: Option<u64>,

    /// Benchmark only the first N datasets (1-296)
    #[arg(long, value_name = "N", value_parser = parse_dataset_count, global = true)]
    pub limit: Option<usize>,

    /// Report format written next to summary.csv
    #[arg(long, value_name = "FORMAT", global = true)]
    pub format: Option<OutputFormat>,

    /// Treatment of datasets whose initial error count is zero
    #[arg(long, value_name = "POLICY", global = true)]
    pub zero_baseline: Option<ZeroBaseline>,

    /// Run NullAwayAnnotator on each dataset before the first analysis
    #[arg(long, global = true)]
    pub annotate: bool,

    /// Enable verbose logging output (prints every tool command line)
    #[arg(short, long, visible_alias = "debug", global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Generate a default .vgrbench.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Pipeline subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Full pipeline: prepare, analyze, refactor, analyze again, summarize
    Run,
    /// Create directories, fetch the dataset cache, copy it to the working
    /// directory and verify processor jars
    Prepare,
    /// Analyze the unmodified working copy and record baseline counts
    Initialize,
    /// Refactor every dataset of the working copy in place
    Refactor,
    /// Analyze the refactored working copy and merge with the baseline
    Finalize,
    /// Summarize the last run from summary.csv without running any tool
    Summarize,
    /// Refactor, finalize and summarize (baseline already recorded)
    SkipInit,
    /// Refresh one dataset from the cache and benchmark it alone
    Dataset {
        /// Dataset name (a path is accepted; its last component is used)
        name: String,
    },
    /// Restore the working copy and rebuild the refactoring jar
    Reset {
        /// Do not rebuild the refactoring jar
        #[arg(long)]
        skip_build: bool,
    },
    /// Remove generated files, keeping the dataset cache
    Clean,
    /// Remove generated files, including the dataset cache
    FullClean,
    /// Print the resolved directory layout and exit
    Test,
}

impl Command {
    /// Pipeline stages run by this command, in order. Empty for
    /// maintenance commands and for `dataset`, which runs its own
    /// single-dataset sequence.
    pub fn stages(&self) -> Vec<Stage> {
        match self {
            Command::Run => Stage::ALL.to_vec(),
            Command::Prepare => vec![Stage::Init],
            Command::Initialize => vec![Stage::AnalyzeBefore],
            Command::Refactor => vec![Stage::Refactor],
            Command::Finalize => vec![Stage::AnalyzeAfter],
            Command::Summarize => vec![Stage::Summarize],
            Command::SkipInit => vec![Stage::Refactor, Stage::AnalyzeAfter, Stage::Summarize],
            Command::Dataset { .. }
            | Command::Reset { .. }
            | Command::Clean
            | Command::FullClean
            | Command::Test => Vec::new(),
        }
    }
}

/// Output format for the report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
        }
    }
}

fn parse_dataset_count(s: &str) -> Result<usize, String> {
    let n: usize = s
        .parse()
        .map_err(|_| format!("'{}' is not a positive integer", s))?;
    if n == 0 || n > NJR1_DATASET_COUNT {
        return Err(format!(
            "Must be a positive integer less than or equal to {}.",
            NJR1_DATASET_COUNT
        ));
    }
    Ok(n)
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The command to run, defaulting to the full pipeline.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.jobs == Some(0) {
            return Err("Jobs must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if let Some(ref config_path) = self.config {
            if !config_path.is_file() {
                return Err(format!(
                    "Config file does not exist: {}",
                    config_path.display()
                ));
            }
        }

        if let Some(Command::Dataset { ref name }) = self.command {
            if name.trim().is_empty() {
                return Err("Dataset name cannot be empty".to_string());
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
