//! Data models for the benchmark harness.
//!
//! This module contains the core data structures used throughout
//! the application for representing datasets, per-dataset outcomes,
//! derived summary rows and the final report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Value written in place of a count that could not be produced.
pub const FAILED_SENTINEL: i64 = -999;

/// Pipeline stage.
///
/// Stages are ordered; a full run walks them from `Init` to `Summarize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Prepare directories, fetch and copy datasets, verify jars
    Init,
    /// Run the analyzer on the unmodified working copy
    AnalyzeBefore,
    /// Run the refactorer on the working copy
    Refactor,
    /// Run the analyzer on the refactored working copy
    AnalyzeAfter,
    /// Aggregate and persist results
    Summarize,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Init,
        Stage::AnalyzeBefore,
        Stage::Refactor,
        Stage::AnalyzeAfter,
        Stage::Summarize,
    ];

    /// Stable name, also used as the per-dataset log file stem.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::AnalyzeBefore => "analyze-before",
            Stage::Refactor => "refactor",
            Stage::AnalyzeAfter => "analyze-after",
            Stage::Summarize => "summarize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a dataset whose initial error count is zero contributes to the
/// percentage mean.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ZeroBaseline {
    /// Percentage is undefined and left out of the mean
    #[default]
    Exclude,
    /// Percentage is reported as 0% and included in the mean
    Zero,
}

/// A benchmark subject: one project directory of the dataset corpus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    /// Directory name, used as the benchmark key.
    pub name: String,
    /// Path to the working copy (contains `src/` and `lib/`).
    pub path: PathBuf,
}

impl Dataset {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn src_dir(&self) -> PathBuf {
        self.path.join("src")
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.path.join("lib")
    }
}

/// Before/after analyzer counts for one dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub name: String,
    pub initial_error_count: u64,
    pub refactored_error_count: u64,
}

impl BenchmarkResult {
    pub fn new(name: impl Into<String>, initial: u64, refactored: u64) -> Self {
        Self {
            name: name.into(),
            initial_error_count: initial,
            refactored_error_count: refactored,
        }
    }

    /// `initial - refactored`; negative when refactoring introduced warnings.
    pub fn error_reduction(&self) -> i64 {
        self.initial_error_count as i64 - self.refactored_error_count as i64
    }

    /// Reduction relative to the initial count, in percent.
    pub fn error_reduction_percent(&self, policy: ZeroBaseline) -> Option<f64> {
        if self.initial_error_count == 0 {
            return match policy {
                ZeroBaseline::Exclude => None,
                ZeroBaseline::Zero => Some(0.0),
            };
        }
        Some(self.error_reduction() as f64 / self.initial_error_count as f64 * 100.0)
    }
}

/// A dataset that did not produce a complete before/after pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetFailure {
    pub name: String,
    /// Stage at which the dataset failed.
    pub stage: Stage,
    /// Human readable reason.
    pub reason: String,
    /// Initial count, when the failure happened after the first analysis.
    pub initial_error_count: Option<u64>,
}

/// Result of running one dataset through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DatasetOutcome {
    Completed(BenchmarkResult),
    Failed(DatasetFailure),
}

impl DatasetOutcome {
    pub fn failed(
        name: impl Into<String>,
        stage: Stage,
        reason: impl fmt::Display,
        initial_error_count: Option<u64>,
    ) -> Self {
        DatasetOutcome::Failed(DatasetFailure {
            name: name.into(),
            stage,
            reason: reason.to_string(),
            initial_error_count,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            DatasetOutcome::Completed(r) => &r.name,
            DatasetOutcome::Failed(f) => &f.name,
        }
    }
}

/// One row of the summary table.
///
/// Counts are `None` where the dataset failed before producing them; such
/// rows are persisted with [`FAILED_SENTINEL`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub benchmark: String,
    pub initial_error_count: Option<u64>,
    pub refactored_error_count: Option<u64>,
    pub error_reduction: Option<i64>,
    pub error_reduction_percent: Option<f64>,
}

impl SummaryRow {
    /// Derive a row from a completed result.
    pub fn from_result(result: &BenchmarkResult, policy: ZeroBaseline) -> Self {
        Self {
            benchmark: result.name.clone(),
            initial_error_count: Some(result.initial_error_count),
            refactored_error_count: Some(result.refactored_error_count),
            error_reduction: Some(result.error_reduction()),
            error_reduction_percent: result.error_reduction_percent(policy),
        }
    }

    /// Derive a row from any outcome.
    pub fn from_outcome(outcome: &DatasetOutcome, policy: ZeroBaseline) -> Self {
        match outcome {
            DatasetOutcome::Completed(result) => Self::from_result(result, policy),
            DatasetOutcome::Failed(failure) => Self {
                benchmark: failure.name.clone(),
                initial_error_count: failure.initial_error_count,
                refactored_error_count: None,
                error_reduction: None,
                error_reduction_percent: None,
            },
        }
    }

    /// Whether both counts are present.
    pub fn is_complete(&self) -> bool {
        self.initial_error_count.is_some() && self.refactored_error_count.is_some()
    }
}

/// Aggregate statistics over a set of summary rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Number of rows considered.
    pub datasets: usize,
    /// Rows with both counts.
    pub completed: usize,
    /// Names of datasets without a complete pair.
    pub failed: Vec<String>,
    /// Sum of initial counts over completed rows.
    pub total_initial: u64,
    /// Sum of refactored counts over completed rows.
    pub total_refactored: u64,
    /// Mean absolute reduction over completed rows.
    pub mean_error_reduction: Option<f64>,
    /// Mean percentage reduction over rows with a defined percentage.
    pub mean_error_reduction_percent: Option<f64>,
    /// Number of rows contributing to the percentage mean.
    pub percent_samples: usize,
    /// Largest percentage reductions, best first.
    pub top_by_percent: Vec<SummaryRow>,
    /// Largest absolute reductions, best first.
    pub top_by_reduction: Vec<SummaryRow>,
    /// Smallest absolute reductions, worst first.
    pub bottom_by_reduction: Vec<SummaryRow>,
}

/// Metadata about the benchmark report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Benchmark root directory.
    pub root: String,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Regular expression counted in analyzer output.
    pub error_pattern: String,
    /// Refactoring module passed to the refactorer.
    pub refactoring_module: String,
    /// Zero-baseline policy used for percentages.
    pub zero_baseline: ZeroBaseline,
    /// Worker pool size.
    pub jobs: usize,
    /// Wall time of the run in seconds (0 when summarizing an earlier run).
    pub duration_seconds: f64,
}

/// The complete benchmark report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub rows: Vec<SummaryRow>,
    pub summary: Summary,
    /// Failure details, when known (not persisted in the CSV).
    pub failures: Vec<DatasetFailure>,
}
