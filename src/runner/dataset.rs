//! Per-dataset benchmark sequence.
//!
//! Discovers sources, runs the analyzer, refactors the working copy in
//! place and runs the analyzer again. Every invocation gets its own
//! scratch directory, so datasets can run concurrently.

use crate::analysis::LogParser;
use crate::config::Config;
use crate::models::{BenchmarkResult, Dataset, DatasetOutcome, Stage, FAILED_SENTINEL};
use crate::runner::exec::{ProcessRunner, ToolError, ToolOutput};
use crate::scanner::SourceScanner;
use crate::toolchain::{AnalyzerInvocation, AnnotatorFiles, CommandBuilder, CommandSpec};
use crate::workspace::Layout;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// One analyzer pass over one dataset.
#[derive(Debug, Clone)]
pub struct AnalyzerRun {
    pub error_count: u64,
    /// Number of sources handed to javac.
    pub sources: usize,
    /// Absent when there was nothing to compile.
    pub output: Option<ToolOutput>,
}

/// Runs the benchmark steps for single datasets. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DatasetRunner {
    config: Arc<Config>,
    layout: Arc<Layout>,
    parser: LogParser,
    process: ProcessRunner,
}

impl DatasetRunner {
    pub fn new(config: Arc<Config>, layout: Arc<Layout>) -> Result<Self> {
        let parser = LogParser::new(&config.toolchain.error_pattern).with_context(|| {
            format!("Invalid error pattern: {}", config.toolchain.error_pattern)
        })?;
        let process = ProcessRunner::from_secs(config.pipeline.timeout_seconds);
        debug!("Counting matches of {}", parser.pattern());

        Ok(Self {
            config,
            layout,
            parser,
            process,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn builder(&self) -> CommandBuilder<'_> {
        CommandBuilder::new(&self.config, &self.layout)
    }

    /// Start a fresh log directory for the dataset.
    pub async fn reset_logs(&self, dataset: &Dataset) -> Result<()> {
        let dir = self.layout.dataset_results(&dataset.name);
        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to clear {}", dir.display()))?;
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))
    }

    /// Run javac with NullAway over the dataset and count error markers.
    ///
    /// A non-zero exit still counts as a successful analysis when markers
    /// were found, unless `pipeline.accept_nonzero_with_markers` is off.
    pub async fn run_analyzer(&self, dataset: &Dataset, stage: Stage) -> Result<AnalyzerRun> {
        let result = self.analyze(dataset, stage).await;

        let count = match result {
            Ok(ref run) => run.error_count as i64,
            Err(_) => FAILED_SENTINEL,
        };
        self.record_error_count(dataset, stage, count).await?;

        result
    }

    async fn analyze(&self, dataset: &Dataset, stage: Stage) -> Result<AnalyzerRun> {
        let scratch = TempDir::new().context("Failed to create scratch directory")?;
        let classes_dir = scratch.path().join("classes");
        fs::create_dir_all(&classes_dir)?;
        let argfile = scratch.path().join("sources.txt");

        let (sources, packages) = scan_sources(dataset, &argfile).await?;
        if sources.is_empty() {
            warn!("{}: no Java sources under {}", dataset.name, dataset.src_dir().display());
            self.write_note(dataset, stage.as_str(), "no Java sources; analyzer not run\n")
                .await?;
            return Ok(AnalyzerRun {
                error_count: 0,
                sources: 0,
                output: None,
            });
        }

        debug!("{}: {} sources, packages {:?}", dataset.name, sources.len(), packages);

        let spec = self.builder().analyzer(&AnalyzerInvocation {
            dataset,
            classes_dir: &classes_dir,
            argfile: &argfile,
            packages: &packages,
        });

        let result = self.process.run("javac", &spec).await;
        self.write_log(dataset, stage.as_str(), &spec, &result).await?;
        let output = result?;

        let error_count = self.parser.count(&output.combined());

        if !output.success() {
            let accepted = self.config.pipeline.accept_nonzero_with_markers && error_count > 0;
            if !accepted {
                return Err(ToolError::NonZeroExit {
                    tool: "javac".to_string(),
                    status: output.status,
                }
                .into());
            }
        }

        debug!("{}: {} = {}", dataset.name, stage, error_count);
        Ok(AnalyzerRun {
            error_count,
            sources: sources.len(),
            output: Some(output),
        })
    }

    /// Run the refactoring tool on the dataset's working copy.
    pub async fn refactor(&self, dataset: &Dataset) -> Result<ToolOutput> {
        let spec = self.builder().refactor(dataset);
        let result = self.process.run("refactor", &spec).await;
        self.write_log(dataset, Stage::Refactor.as_str(), &spec, &result)
            .await?;

        let output = result?;
        if !output.success() {
            return Err(ToolError::NonZeroExit {
                tool: "refactor".to_string(),
                status: output.status,
            }
            .into());
        }
        Ok(output)
    }

    /// Run NullAwayAnnotator on the dataset.
    pub async fn annotate(&self, dataset: &Dataset) -> Result<ToolOutput> {
        let scratch = TempDir::new().context("Failed to create scratch directory")?;
        let classes_dir = scratch.path().join("classes");
        fs::create_dir_all(&classes_dir)?;
        let argfile = scratch.path().join("sources.txt");

        let (_, packages) = scan_sources(dataset, &argfile).await?;

        let files = AnnotatorFiles::in_dir(self.layout.annotator_dir(&dataset.name));
        fs::create_dir_all(&files.out_dir)
            .with_context(|| format!("Failed to create {}", files.out_dir.display()))?;
        fs::write(&files.paths_tsv, files.paths_tsv_content())?;

        let spec = self.builder().annotator(
            &AnalyzerInvocation {
                dataset,
                classes_dir: &classes_dir,
                argfile: &argfile,
                packages: &packages,
            },
            &files,
            &dataset.path,
        );

        let result = self.process.run("annotator", &spec).await;
        self.write_log(dataset, "annotator", &spec, &result).await?;

        let output = result?;
        if !output.success() {
            return Err(ToolError::NonZeroExit {
                tool: "annotator".to_string(),
                status: output.status,
            }
            .into());
        }
        Ok(output)
    }

    /// Full sequence for one dataset. Never fails; failures are recorded
    /// in the outcome.
    pub async fn benchmark(&self, dataset: &Dataset) -> DatasetOutcome {
        let name = dataset.name.clone();

        if let Err(e) = self.reset_logs(dataset).await {
            return DatasetOutcome::failed(name, Stage::AnalyzeBefore, format!("{:#}", e), None);
        }

        if self.config.annotator.enabled {
            if let Err(e) = self.annotate(dataset).await {
                warn!("{}: annotator failed: {:#}", name, e);
            }
        }

        let initial = match self.run_analyzer(dataset, Stage::AnalyzeBefore).await {
            Ok(run) => run.error_count,
            Err(e) => {
                warn!("{}: initial analysis failed: {:#}", name, e);
                return DatasetOutcome::failed(name, Stage::AnalyzeBefore, format!("{:#}", e), None);
            }
        };

        if let Err(e) = self.refactor(dataset).await {
            warn!("{}: refactoring failed: {:#}", name, e);
            return DatasetOutcome::failed(name, Stage::Refactor, format!("{:#}", e), Some(initial));
        }

        let refactored = match self.run_analyzer(dataset, Stage::AnalyzeAfter).await {
            Ok(run) => run.error_count,
            Err(e) => {
                warn!("{}: analysis after refactoring failed: {:#}", name, e);
                return DatasetOutcome::failed(
                    name,
                    Stage::AnalyzeAfter,
                    format!("{:#}", e),
                    Some(initial),
                );
            }
        };

        info!("{}: {} -> {} errors", name, initial, refactored);
        DatasetOutcome::Completed(BenchmarkResult::new(name, initial, refactored))
    }

    async fn record_error_count(&self, dataset: &Dataset, stage: Stage, count: i64) -> Result<()> {
        let path = self.layout.error_count_file(&dataset.name);
        ensure_parent(&path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(format!("{}: {}\n", stage, count).as_bytes())
            .await?;
        file.flush().await?;
        Ok(())
    }

    async fn write_note(&self, dataset: &Dataset, stem: &str, note: &str) -> Result<()> {
        let path = self.layout.log_file(&dataset.name, stem);
        ensure_parent(&path).await?;
        tokio::fs::write(&path, note)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    async fn write_log(
        &self,
        dataset: &Dataset,
        stem: &str,
        spec: &CommandSpec,
        result: &Result<ToolOutput, ToolError>,
    ) -> Result<()> {
        let path = self.layout.log_file(&dataset.name, stem);
        ensure_parent(&path).await?;
        tokio::fs::write(&path, render_log(spec, result))
            .await
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// Text of a per-invocation log file.
fn render_log(spec: &CommandSpec, result: &Result<ToolOutput, ToolError>) -> String {
    let mut log = String::new();
    log.push_str(&format!("CMD: {}\n", spec));

    match result {
        Ok(output) => {
            log.push_str(&format!("EXIT: {}\n", output.status));
            log.push_str(&format!("DURATION: {:.1}s\n", output.duration.as_secs_f64()));
            log.push_str("--- STDOUT ---\n");
            log.push_str(&output.stdout);
            if !output.stdout.is_empty() && !output.stdout.ends_with('\n') {
                log.push('\n');
            }
            log.push_str("--- STDERR ---\n");
            log.push_str(&output.stderr);
        }
        Err(e) => {
            log.push_str(&format!("FAILED: {}\n", e));
        }
    }

    log
}

/// Write the argfile and collect package names on the blocking pool.
///
/// Packages are only read when there are sources to compile.
async fn scan_sources(dataset: &Dataset, argfile: &Path) -> Result<(Vec<PathBuf>, Vec<String>)> {
    let scanner = SourceScanner::new(&dataset.path);
    let argfile = argfile.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let sources = scanner.write_argfile(&argfile)?;
        let packages = if sources.is_empty() {
            Vec::new()
        } else {
            scanner.annotated_packages()
        };
        Ok::<_, anyhow::Error>((sources, packages))
    })
    .await
    .context("Source scan task failed")?
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runner::testing::Harness;

    fn runner(harness: &Harness) -> DatasetRunner {
        DatasetRunner::new(
            Arc::new(harness.config.clone()),
            Arc::new(harness.layout.clone()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_run_analyzer_counts_markers() {
        let harness = Harness::new();
        harness.dataset("foo", &["BUG", "BUG fixable", "BUG fixable"]);
        let runner = runner(&harness);
        let dataset = harness.layout.working_dataset("foo");

        let run = runner.run_analyzer(&dataset, Stage::AnalyzeBefore).await.unwrap();

        assert_eq!(run.error_count, 3);
        assert_eq!(run.sources, 1);
        let log = fs::read_to_string(harness.layout.log_file("foo", "analyze-before")).unwrap();
        assert!(log.starts_with("CMD: sh "));
        assert!(log.contains("-XepOpt:NullAway:AnnotatedPackages=p.foo"));
        assert!(log.contains("--- STDERR ---"));
        let counts = fs::read_to_string(harness.layout.error_count_file("foo")).unwrap();
        assert_eq!(counts, "analyze-before: 3\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_without_markers_fails() {
        let mut harness = Harness::new();
        harness.dataset("foo", &["BUG"]);
        harness.config.toolchain.error_pattern = "never matches".to_string();
        let runner = runner(&harness);
        let dataset = harness.layout.working_dataset("foo");

        let err = runner
            .run_analyzer(&dataset, Stage::AnalyzeBefore)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("javac exited with"));
        let counts = fs::read_to_string(harness.layout.error_count_file("foo")).unwrap();
        assert_eq!(counts, "analyze-before: -999\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_rejected_when_configured() {
        let mut harness = Harness::new();
        harness.dataset("foo", &["BUG"]);
        harness.config.pipeline.accept_nonzero_with_markers = false;
        let runner = runner(&harness);

        let result = runner
            .run_analyzer(&harness.layout.working_dataset("foo"), Stage::AnalyzeBefore)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_scan_sources_off_the_runtime_thread() {
        let harness = Harness::new();
        harness.dataset("foo-bar", &["BUG"]);
        let dataset = harness.layout.working_dataset("foo-bar");
        let argfile = harness.dir.path().join("sources.txt");

        let (sources, packages) = scan_sources(&dataset, &argfile).await.unwrap();

        assert_eq!(sources, vec![dataset.path.join("src/p/A.java")]);
        assert_eq!(packages, vec!["p.foo_bar"]);
        let listed = fs::read_to_string(&argfile).unwrap();
        assert!(listed.trim_end().ends_with("src/p/A.java"));

        let empty = harness.layout.working_dataset("missing");
        let (sources, packages) = scan_sources(&empty, &argfile).await.unwrap();
        assert!(sources.is_empty());
        assert!(packages.is_empty());
    }

    #[tokio::test]
    async fn test_dataset_without_sources_counts_zero() {
        let harness = Harness::new();
        fs::create_dir_all(harness.layout.working_dir.join("empty")).unwrap();
        let runner = runner(&harness);

        let run = runner
            .run_analyzer(&harness.layout.working_dataset("empty"), Stage::AnalyzeBefore)
            .await
            .unwrap();
        assert_eq!(run.error_count, 0);
        assert!(run.output.is_none());
    }

    #[tokio::test]
    async fn test_benchmark_completed() {
        let harness = Harness::new();
        harness.dataset("foo", &["BUG", "BUG fixable", "BUG fixable"]);
        let runner = runner(&harness);

        let outcome = runner.benchmark(&harness.layout.working_dataset("foo")).await;

        assert_eq!(
            outcome,
            DatasetOutcome::Completed(BenchmarkResult::new("foo", 3, 1))
        );
        let counts = fs::read_to_string(harness.layout.error_count_file("foo")).unwrap();
        assert_eq!(counts, "analyze-before: 3\nanalyze-after: 1\n");
        let refactor_log = fs::read_to_string(harness.layout.log_file("foo", "refactor")).unwrap();
        assert!(refactor_log.contains("refactored"));
    }

    #[tokio::test]
    async fn test_refactor_timeout_is_recorded() {
        let harness = Harness::new();
        harness.dataset("baz", &["BUG", "BUG fixable"]);
        let runner = runner(&harness);

        let outcome = runner.benchmark(&harness.layout.working_dataset("baz")).await;

        match outcome {
            DatasetOutcome::Failed(failure) => {
                assert_eq!(failure.stage, Stage::Refactor);
                assert_eq!(failure.initial_error_count, Some(2));
                assert!(failure.reason.contains("timed out after 1s"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!harness.layout.log_file("baz", "analyze-after").exists());
    }

    #[tokio::test]
    async fn test_benchmark_clears_previous_logs() {
        let harness = Harness::new();
        harness.dataset("bar", &["class Bar {}"]);
        let runner = runner(&harness);
        let dataset = harness.layout.working_dataset("bar");

        runner.benchmark(&dataset).await;
        runner.benchmark(&dataset).await;

        let counts = fs::read_to_string(harness.layout.error_count_file("bar")).unwrap();
        assert_eq!(counts, "analyze-before: 0\nanalyze-after: 0\n");
    }

    #[test]
    fn test_render_log_for_failure() {
        let spec = CommandSpec::new("javac").arg("@sources.txt");
        let result = Err(ToolError::Timeout {
            tool: "javac".to_string(),
            seconds: 5,
        });
        assert_eq!(
            render_log(&spec, &result),
            "CMD: javac @sources.txt\nFAILED: javac timed out after 5s\n"
        );
    }
}
