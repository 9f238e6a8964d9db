//! Stage scheduling.
//!
//! Runs the requested stages in order. When one invocation covers the
//! initial analysis, the refactoring and the final analysis, each dataset
//! walks all three inside one worker; otherwise every stage fans out over
//! all datasets and hands its results to the next stage through the CSV
//! tables in the results directory.

use crate::analysis;
use crate::config::Config;
use crate::models::{
    BenchmarkResult, Dataset, DatasetFailure, DatasetOutcome, Report, ReportMetadata, Stage,
    SummaryRow,
};
use crate::report::csv::{self, BaselineEntry, RefactorStatus};
use crate::runner::dataset::DatasetRunner;
use crate::workspace::{Layout, Workspace};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Stage controller for one invocation.
pub struct Pipeline {
    config: Arc<Config>,
    layout: Arc<Layout>,
    runner: DatasetRunner,
    limit: Option<usize>,
    show_progress: bool,
    started: Instant,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, layout: Arc<Layout>) -> Result<Self> {
        let runner = DatasetRunner::new(config.clone(), layout.clone())?;
        Ok(Self {
            config,
            layout,
            runner,
            limit: None,
            show_progress: true,
            started: Instant::now(),
        })
    }

    /// Only benchmark the first `limit` datasets in name order.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    fn workspace(&self) -> Workspace<'_> {
        Workspace::new(&self.config, &self.layout, self.show_progress)
    }

    /// Run `stages` in order. Returns the report when `Summarize` ran.
    pub async fn run(&self, stages: &[Stage]) -> Result<Option<Report>> {
        let fused = [Stage::AnalyzeBefore, Stage::Refactor, Stage::AnalyzeAfter]
            .iter()
            .all(|stage| stages.contains(stage));

        let mut outcomes: Option<Vec<DatasetOutcome>> = None;
        let mut report = None;

        for &stage in stages {
            match stage {
                Stage::Init => {
                    println!("📦 Preparing workspace...");
                    let datasets = self.workspace().prepare(self.limit).await?;
                    println!(
                        "   {} datasets ready in {}",
                        datasets.len(),
                        self.layout.working_dir.display()
                    );
                }
                Stage::AnalyzeBefore if fused => {
                    outcomes = Some(self.benchmark_all().await?);
                }
                Stage::Refactor | Stage::AnalyzeAfter if fused => {}
                Stage::AnalyzeBefore => self.initialize().await?,
                Stage::Refactor => self.refactor_all().await?,
                Stage::AnalyzeAfter => outcomes = Some(self.finalize().await?),
                Stage::Summarize => {
                    report = Some(self.summarize(outcomes.as_deref())?);
                }
            }
        }

        Ok(report)
    }

    /// Refresh one dataset from the cache, benchmark it and merge its row
    /// into the existing summary.
    pub async fn run_single(&self, name: &str) -> Result<Report> {
        let name = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("Dataset name has no final path component")?;

        let workspace = self.workspace();
        workspace.create_directories()?;
        workspace.ensure_processor_jars().await?;
        workspace.verify_refactorer()?;
        let dataset = workspace.refresh_dataset(&name)?;

        println!("🔬 Benchmarking {}...", name);
        let outcome = self.runner.benchmark(&dataset).await;

        let policy = self.config.pipeline.zero_baseline;
        let summary_path = self.layout.summary_csv();
        let mut rows = if summary_path.is_file() {
            csv::read_summary(&summary_path, policy)?
        } else {
            Vec::new()
        };
        rows.retain(|row| row.benchmark != name);
        rows.push(SummaryRow::from_outcome(&outcome, policy));
        analysis::sort_by_name(&mut rows);
        csv::write_summary(&summary_path, &rows)?;

        let failures = match outcome {
            DatasetOutcome::Failed(failure) => vec![failure],
            DatasetOutcome::Completed(_) => Vec::new(),
        };
        self.finish_report(rows, failures)
    }

    /// Datasets of the working copy, limited.
    pub fn datasets(&self) -> Result<Vec<Dataset>> {
        let mut datasets = self.layout.working_datasets()?;
        if datasets.is_empty() {
            bail!(
                "No datasets in {} (run `vgr-bench prepare` first)",
                self.layout.working_dir.display()
            );
        }
        if let Some(limit) = self.limit {
            datasets.truncate(limit);
        }
        Ok(datasets)
    }

    /// Analyze, refactor and re-analyze every dataset, one worker per dataset.
    async fn benchmark_all(&self) -> Result<Vec<DatasetOutcome>> {
        self.workspace().verify_refactorer()?;
        let datasets = self.datasets()?;

        println!(
            "🔬 Benchmarking {} datasets with {} workers...",
            datasets.len(),
            self.config.jobs()
        );

        let mut outcomes = self
            .fan_out(datasets, |runner, dataset| async move {
                runner.benchmark(&dataset).await
            })
            .await;
        outcomes.sort_by(|a, b| a.name().cmp(b.name()));

        let baseline: Vec<BaselineEntry> = outcomes
            .iter()
            .map(|outcome| BaselineEntry {
                benchmark: outcome.name().to_string(),
                initial_error_count: initial_count(outcome),
            })
            .collect();
        csv::write_baseline(&self.layout.baseline_csv(), &baseline)?;

        let statuses: Vec<RefactorStatus> = outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                DatasetOutcome::Completed(result) => Some(RefactorStatus::ok(&result.name)),
                DatasetOutcome::Failed(f) if f.stage == Stage::AnalyzeBefore => None,
                DatasetOutcome::Failed(f) if f.stage == Stage::Refactor => {
                    Some(RefactorStatus::failed(&f.name, &f.reason))
                }
                DatasetOutcome::Failed(f) => Some(RefactorStatus::ok(&f.name)),
            })
            .collect();
        csv::write_refactor_status(&self.layout.refactor_csv(), &statuses)?;

        self.write_summary(&outcomes)?;
        Ok(outcomes)
    }

    /// Initial analysis only; writes the baseline table.
    async fn initialize(&self) -> Result<()> {
        let datasets = self.datasets()?;
        println!("🔍 Analyzing {} unmodified datasets...", datasets.len());

        let mut entries = self
            .fan_out(datasets, |runner, dataset| async move {
                let initial = initial_analysis(&runner, &dataset).await;
                BaselineEntry {
                    benchmark: dataset.name,
                    initial_error_count: initial,
                }
            })
            .await;
        entries.sort_by(|a, b| a.benchmark.cmp(&b.benchmark));

        let failed = entries
            .iter()
            .filter(|e| e.initial_error_count.is_none())
            .count();
        csv::write_baseline(&self.layout.baseline_csv(), &entries)?;
        println!(
            "   Baseline recorded for {} datasets ({} failed) in {}",
            entries.len(),
            failed,
            self.layout.baseline_csv().display()
        );
        Ok(())
    }

    /// Refactoring only; writes the refactor status table.
    async fn refactor_all(&self) -> Result<()> {
        self.workspace().verify_refactorer()?;
        let datasets = self.datasets()?;
        println!("🛠️  Refactoring {} datasets...", datasets.len());

        let mut statuses = self
            .fan_out(datasets, |runner, dataset| async move {
                let result = runner.refactor(&dataset).await;
                match result {
                    Ok(_) => RefactorStatus::ok(dataset.name),
                    Err(e) => {
                        warn!("{}: refactoring failed: {:#}", dataset.name, e);
                        RefactorStatus::failed(dataset.name, format!("{:#}", e))
                    }
                }
            })
            .await;
        statuses.sort_by(|a, b| a.benchmark.cmp(&b.benchmark));

        let failed = statuses.iter().filter(|s| !s.succeeded).count();
        csv::write_refactor_status(&self.layout.refactor_csv(), &statuses)?;
        println!("   {} refactored, {} failed", statuses.len() - failed, failed);
        Ok(())
    }

    /// Final analysis, joined with the baseline by name.
    async fn finalize(&self) -> Result<Vec<DatasetOutcome>> {
        let baseline_path = self.layout.baseline_csv();
        if !baseline_path.is_file() {
            bail!(
                "No baseline found at {} (run `vgr-bench initialize` first)",
                baseline_path.display()
            );
        }
        let baseline: HashMap<String, Option<u64>> = csv::read_baseline(&baseline_path)?
            .into_iter()
            .map(|e| (e.benchmark, e.initial_error_count))
            .collect();

        let refactor_path = self.layout.refactor_csv();
        let refactor_failures: HashMap<String, String> = if refactor_path.is_file() {
            csv::read_refactor_status(&refactor_path)?
                .into_iter()
                .filter(|s| !s.succeeded)
                .map(|s| (s.benchmark, s.detail))
                .collect()
        } else {
            HashMap::new()
        };

        let datasets: Vec<Dataset> = self
            .datasets()?
            .into_iter()
            .filter(|d| baseline.contains_key(&d.name))
            .collect();
        println!("🔍 Analyzing {} refactored datasets...", datasets.len());

        let baseline = Arc::new(baseline);
        let refactor_failures = Arc::new(refactor_failures);

        let mut outcomes = self
            .fan_out(datasets, |runner, dataset| {
                let baseline = baseline.clone();
                let refactor_failures = refactor_failures.clone();
                async move {
                    let initial = baseline.get(&dataset.name).copied().flatten();
                    final_analysis(&runner, &dataset, initial, refactor_failures.get(&dataset.name))
                        .await
                }
            })
            .await;
        outcomes.sort_by(|a, b| a.name().cmp(b.name()));

        self.write_summary(&outcomes)?;
        Ok(outcomes)
    }

    fn write_summary(&self, outcomes: &[DatasetOutcome]) -> Result<()> {
        let rows = analysis::summary_rows(outcomes, self.config.pipeline.zero_baseline);
        csv::write_summary(&self.layout.summary_csv(), &rows)?;
        info!("Wrote {}", self.layout.summary_csv().display());
        Ok(())
    }

    /// Aggregate this run's outcomes, or the persisted summary when no
    /// analysis ran in this invocation.
    fn summarize(&self, outcomes: Option<&[DatasetOutcome]>) -> Result<Report> {
        let policy = self.config.pipeline.zero_baseline;

        let (rows, failures) = match outcomes {
            Some(outcomes) => (
                analysis::summary_rows(outcomes, policy),
                outcomes
                    .iter()
                    .filter_map(|o| match o {
                        DatasetOutcome::Failed(f) => Some(f.clone()),
                        DatasetOutcome::Completed(_) => None,
                    })
                    .collect(),
            ),
            None => {
                let path = self.layout.summary_csv();
                if !path.is_file() {
                    bail!(
                        "Error getting summary of last run: {} does not exist",
                        path.display()
                    );
                }
                let mut rows = csv::read_summary(&path, policy)?;
                analysis::sort_by_name(&mut rows);
                (rows, Vec::new())
            }
        };

        self.finish_report(rows, failures)
    }

    fn finish_report(&self, rows: Vec<SummaryRow>, failures: Vec<DatasetFailure>) -> Result<Report> {
        let pipeline = &self.config.pipeline;
        let summary = analysis::summarize(
            &rows,
            pipeline.top_n,
            pipeline.largest_n,
            pipeline.bottom_n,
        );

        let report = Report {
            metadata: ReportMetadata {
                root: self.layout.root.display().to_string(),
                generated_at: Utc::now(),
                error_pattern: self.config.toolchain.error_pattern.clone(),
                refactoring_module: self.config.refactor.module.clone(),
                zero_baseline: pipeline.zero_baseline,
                jobs: self.config.jobs(),
                duration_seconds: self.started.elapsed().as_secs_f64(),
            },
            rows,
            summary,
            failures,
        };

        let format = self.config.report.format;
        let path = self.layout.report_file(format);
        crate::report::write_report(&report, format, &path)?;
        info!("Report saved to {}", path.display());

        Ok(report)
    }

    /// Run `task` for every dataset on a bounded worker pool. Completion
    /// order is unspecified.
    async fn fan_out<T, F, Fut>(&self, datasets: Vec<Dataset>, task: F) -> Vec<T>
    where
        F: Fn(DatasetRunner, Dataset) -> Fut,
        Fut: Future<Output = T>,
    {
        let progress = self.progress_bar(datasets.len() as u64);

        let results = stream::iter(
            datasets
                .into_iter()
                .map(|dataset| task(self.runner.clone(), dataset)),
        )
        .buffer_unordered(self.config.jobs())
        .inspect(|_| {
            if let Some(ref pb) = progress {
                pb.inc(1);
            }
        })
        .collect::<Vec<T>>()
        .await;

        if let Some(pb) = progress {
            pb.finish_and_clear();
        }
        results
    }

    fn progress_bar(&self, len: u64) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let pb = ProgressBar::new(len);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Some(pb)
    }
}

fn initial_count(outcome: &DatasetOutcome) -> Option<u64> {
    match outcome {
        DatasetOutcome::Completed(result) => Some(result.initial_error_count),
        DatasetOutcome::Failed(failure) => failure.initial_error_count,
    }
}

/// Staged counterpart of the first half of [`DatasetRunner::benchmark`].
async fn initial_analysis(runner: &DatasetRunner, dataset: &Dataset) -> Option<u64> {
    if let Err(e) = runner.reset_logs(dataset).await {
        warn!("{}: {:#}", dataset.name, e);
        return None;
    }

    if runner.config().annotator.enabled {
        if let Err(e) = runner.annotate(dataset).await {
            warn!("{}: annotator failed: {:#}", dataset.name, e);
        }
    }

    match runner.run_analyzer(dataset, Stage::AnalyzeBefore).await {
        Ok(run) => Some(run.error_count),
        Err(e) => {
            warn!("{}: initial analysis failed: {:#}", dataset.name, e);
            None
        }
    }
}

/// Staged counterpart of the second half of [`DatasetRunner::benchmark`].
async fn final_analysis(
    runner: &DatasetRunner,
    dataset: &Dataset,
    initial: Option<u64>,
    refactor_failure: Option<&String>,
) -> DatasetOutcome {
    let name = dataset.name.clone();

    let Some(initial) = initial else {
        return DatasetOutcome::failed(name, Stage::AnalyzeBefore, "initial analysis failed", None);
    };

    if let Some(reason) = refactor_failure {
        return DatasetOutcome::failed(name, Stage::Refactor, reason, Some(initial));
    }

    match runner.run_analyzer(dataset, Stage::AnalyzeAfter).await {
        Ok(run) => DatasetOutcome::Completed(BenchmarkResult::new(name, initial, run.error_count)),
        Err(e) => {
            warn!("{}: analysis after refactoring failed: {:#}", name, e);
            DatasetOutcome::failed(name, Stage::AnalyzeAfter, format!("{:#}", e), Some(initial))
        }
    }
}
