//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.vgrbench.toml` files. The resulting [`Config`] is immutable once
//! merged with the command line and is shared by every component.

use crate::cli::OutputFormat;
use crate::models::ZeroBaseline;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = ".vgrbench.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Directory layout.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Compiler and analyzer settings.
    #[serde(default)]
    pub toolchain: ToolchainConfig,

    /// Refactoring tool settings.
    #[serde(default)]
    pub refactor: RefactorConfig,

    /// Optional NullAwayAnnotator pass.
    #[serde(default)]
    pub annotator: AnnotatorConfig,

    /// Dataset retrieval.
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// Scheduling and aggregation.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Benchmark directory layout. Subdirectories are relative to `root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Pristine dataset copies. Never modified by a run.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Working copies mutated by the refactorer.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// Where previous working copies are moved before a new run.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,

    /// Logs and summary tables.
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Processor and annotator jars.
    #[serde(default = "default_jars_dir")]
    pub jars_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            cache_dir: default_cache_dir(),
            working_dir: default_working_dir(),
            archive_dir: default_archive_dir(),
            results_dir: default_results_dir(),
            jars_dir: default_jars_dir(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("./benchmarking")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("datasets/cache")
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("datasets/refactored")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("datasets/old-runs/refactored")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_jars_dir() -> PathBuf {
    PathBuf::from("jars")
}

/// A jar on the annotation processor path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JarSpec {
    /// Path relative to the jars directory.
    pub path: PathBuf,
    /// Where to fetch the jar when it is missing.
    #[serde(default)]
    pub url: Option<String>,
}

impl JarSpec {
    fn new(path: &str, url: &str) -> Self {
        Self {
            path: PathBuf::from(path),
            url: Some(url.to_string()),
        }
    }
}

/// javac + Error Prone + NullAway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// Compiler launcher (program followed by leading arguments).
    #[serde(default = "default_javac")]
    pub javac: Vec<String>,

    /// JDK module flags Error Prone needs on JDK 16+; passed with `-J`.
    #[serde(default = "default_exports")]
    pub exports: Vec<String>,

    /// Annotation processor path entries.
    #[serde(default = "default_processor_jars")]
    pub processor_jars: Vec<JarSpec>,

    /// Extra compile classpath entries added after the dataset's `lib/*`.
    #[serde(default)]
    pub extra_classpath: Vec<String>,

    /// Extra options appended to the `-Xplugin:ErrorProne` string.
    #[serde(default)]
    pub extra_plugin_options: Vec<String>,

    /// Regular expression counted in analyzer output.
    #[serde(default = "default_error_pattern")]
    pub error_pattern: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            javac: default_javac(),
            exports: default_exports(),
            processor_jars: default_processor_jars(),
            extra_classpath: Vec::new(),
            extra_plugin_options: Vec::new(),
            error_pattern: default_error_pattern(),
        }
    }
}

fn default_javac() -> Vec<String> {
    vec!["javac".to_string()]
}

fn default_exports() -> Vec<String> {
    [
        "--add-exports=jdk.compiler/com.sun.tools.javac.api=ALL-UNNAMED",
        "--add-exports=jdk.compiler/com.sun.tools.javac.file=ALL-UNNAMED",
        "--add-exports=jdk.compiler/com.sun.tools.javac.main=ALL-UNNAMED",
        "--add-exports=jdk.compiler/com.sun.tools.javac.model=ALL-UNNAMED",
        "--add-exports=jdk.compiler/com.sun.tools.javac.parser=ALL-UNNAMED",
        "--add-exports=jdk.compiler/com.sun.tools.javac.processing=ALL-UNNAMED",
        "--add-exports=jdk.compiler/com.sun.tools.javac.tree=ALL-UNNAMED",
        "--add-exports=jdk.compiler/com.sun.tools.javac.util=ALL-UNNAMED",
        "--add-opens=jdk.compiler/com.sun.tools.javac.code=ALL-UNNAMED",
        "--add-opens=jdk.compiler/com.sun.tools.javac.comp=ALL-UNNAMED",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

const MAVEN_CENTRAL: &str = "https://repo1.maven.org/maven2";

fn default_processor_jars() -> Vec<JarSpec> {
    vec![
        JarSpec::new(
            "errorprone/error_prone_core-2.38.0-with-dependencies.jar",
            &format!("{MAVEN_CENTRAL}/com/google/errorprone/error_prone_core/2.38.0/error_prone_core-2.38.0-with-dependencies.jar"),
        ),
        JarSpec::new(
            "errorprone/dataflow-errorprone-3.49.3-eisop1.jar",
            &format!("{MAVEN_CENTRAL}/io/github/eisop/dataflow-errorprone/3.49.3-eisop1/dataflow-errorprone-3.49.3-eisop1.jar"),
        ),
        JarSpec::new(
            "errorprone/jFormatString-3.0.0.jar",
            &format!("{MAVEN_CENTRAL}/com/google/code/findbugs/jFormatString/3.0.0/jFormatString-3.0.0.jar"),
        ),
        JarSpec::new(
            "nullaway/nullaway-0.12.7.jar",
            &format!("{MAVEN_CENTRAL}/com/uber/nullaway/nullaway/0.12.7/nullaway-0.12.7.jar"),
        ),
        JarSpec::new(
            "nullaway/dataflow-nullaway-3.49.5.jar",
            &format!("{MAVEN_CENTRAL}/org/checkerframework/dataflow-nullaway/3.49.5/dataflow-nullaway-3.49.5.jar"),
        ),
        JarSpec::new(
            "nullaway/checker-qual-3.49.2.jar",
            &format!("{MAVEN_CENTRAL}/org/checkerframework/checker-qual/3.49.2/checker-qual-3.49.2.jar"),
        ),
    ]
}

fn default_error_pattern() -> String {
    crate::analysis::DEFAULT_ERROR_PATTERN.to_string()
}

/// Refactoring tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefactorConfig {
    /// Launcher placed before the jar path.
    #[serde(default = "default_java_jar")]
    pub launcher: Vec<String>,

    /// Refactoring tool jar. Required before refactoring starts.
    #[serde(default = "default_refactor_jar")]
    pub jar: PathBuf,

    /// Refactoring module passed after the dataset path.
    #[serde(default = "default_module")]
    pub module: String,

    /// Command that rebuilds the refactoring jar (`reset`).
    #[serde(default = "default_build_command")]
    pub build_command: Vec<String>,
}

impl Default for RefactorConfig {
    fn default() -> Self {
        Self {
            launcher: default_java_jar(),
            jar: default_refactor_jar(),
            module: default_module(),
            build_command: default_build_command(),
        }
    }
}

fn default_java_jar() -> Vec<String> {
    vec!["java".to_string(), "-jar".to_string()]
}

fn default_refactor_jar() -> PathBuf {
    PathBuf::from("build/libs/VGRTool-Full-1.0.jar")
}

fn default_module() -> String {
    "All".to_string()
}

fn default_build_command() -> Vec<String> {
    vec![
        "./gradlew".to_string(),
        "clean".to_string(),
        "fullJar".to_string(),
    ]
}

/// NullAwayAnnotator settings. The pass is off unless `enabled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatorConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_java_jar")]
    pub launcher: Vec<String>,

    /// Annotator jar, relative to the jars directory.
    #[serde(default = "default_annotator_jar")]
    pub jar: JarSpec,

    /// Fully qualified `@Initializer` annotation.
    #[serde(default = "default_initializer")]
    pub initializer: String,

    /// Fully qualified `@Nullable` annotation.
    #[serde(default = "default_nullable")]
    pub nullable: String,

    /// Checker name.
    #[serde(default = "default_checker")]
    pub checker: String,

    /// Search depth.
    #[serde(default = "default_depth")]
    pub depth: u32,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            launcher: default_java_jar(),
            jar: default_annotator_jar(),
            initializer: default_initializer(),
            nullable: default_nullable(),
            checker: default_checker(),
            depth: default_depth(),
        }
    }
}

fn default_annotator_jar() -> JarSpec {
    JarSpec::new(
        "annotator/annotator-core-1.3.15.jar",
        &format!("{MAVEN_CENTRAL}/edu/ucr/cs/riple/annotator/annotator-core/1.3.15/annotator-core-1.3.15.jar"),
    )
}

fn default_initializer() -> String {
    "com.uber.nullaway.annotations.Initializer".to_string()
}

fn default_nullable() -> String {
    "javax.annotation.Nullable".to_string()
}

fn default_checker() -> String {
    "NULLAWAY".to_string()
}

fn default_depth() -> u32 {
    10
}

/// Dataset retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Archive fetched when the cache is empty.
    #[serde(default = "default_archive_url")]
    pub archive_url: String,

    /// Top-level directory inside the archive, flattened into the cache.
    #[serde(default = "default_archive_root")]
    pub archive_root: String,

    /// Local copy of the archive. When set, nothing is downloaded.
    #[serde(default)]
    pub archive_file: Option<PathBuf>,

    /// Extraction launcher; archive path and `-d <dir>` are appended.
    #[serde(default = "default_unzip")]
    pub unzip: Vec<String>,

    /// Limit for each HTTP download, body included.
    #[serde(default = "default_download_timeout")]
    pub download_timeout_seconds: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            archive_url: default_archive_url(),
            archive_root: default_archive_root(),
            archive_file: None,
            unzip: default_unzip(),
            download_timeout_seconds: default_download_timeout(),
        }
    }
}

fn default_archive_url() -> String {
    "https://zenodo.org/records/4632231/files/njr-1_dataset.zip".to_string()
}

fn default_archive_root() -> String {
    "njr-1_dataset".to_string()
}

fn default_unzip() -> Vec<String> {
    vec!["unzip".to_string(), "-q".to_string()]
}

fn default_download_timeout() -> u64 {
    3600
}

/// Scheduling and aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Worker pool size. Defaults to the number of available CPUs.
    #[serde(default)]
    pub jobs: Option<usize>,

    /// Per-invocation timeout for every external tool.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// How zero initial counts enter the percentage mean.
    #[serde(default)]
    pub zero_baseline: ZeroBaseline,

    /// Size of the percentage ranking.
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Size of the largest-reduction listing.
    #[serde(default = "default_largest_n")]
    pub largest_n: usize,

    /// Size of the smallest-reduction listing.
    #[serde(default = "default_bottom_n")]
    pub bottom_n: usize,

    /// Count a non-zero javac exit as a successful analysis when the
    /// output contains analyzer errors (NullAway at ERROR fails the build).
    #[serde(default = "default_true")]
    pub accept_nonzero_with_markers: bool,

    /// Move the previous working copy aside instead of deleting it.
    #[serde(default = "default_true")]
    pub archive_previous_runs: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            jobs: None,
            timeout_seconds: default_timeout(),
            zero_baseline: ZeroBaseline::default(),
            top_n: default_top_n(),
            largest_n: default_largest_n(),
            bottom_n: default_bottom_n(),
            accept_nonzero_with_markers: true,
            archive_previous_runs: true,
        }
    }
}

fn default_timeout() -> u64 {
    1800
}

fn default_top_n() -> usize {
    10
}

fn default_largest_n() -> usize {
    5
}

fn default_bottom_n() -> usize {
    5
}

fn default_true() -> bool {
    true
}

/// Report generation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Format of the report written next to `summary.csv`.
    #[serde(default)]
    pub format: OutputFormat,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings and only
    /// override values that were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref root) = args.root {
            self.paths.root = root.clone();
        }

        if args.sequential {
            self.pipeline.jobs = Some(1);
        } else if let Some(jobs) = args.jobs {
            self.pipeline.jobs = Some(jobs);
        }

        if let Some(timeout) = args.timeout {
            self.pipeline.timeout_seconds = timeout;
        }

        if let Some(policy) = args.zero_baseline {
            self.pipeline.zero_baseline = policy;
        }

        if let Some(format) = args.format {
            self.report.format = format;
        }

        if args.annotate {
            self.annotator.enabled = true;
        }
    }

    /// Check values that deserialization cannot.
    pub fn validate(&self) -> Result<()> {
        if self.toolchain.javac.is_empty() {
            bail!("toolchain.javac must name a program");
        }
        if self.refactor.launcher.is_empty() && self.refactor.jar.as_os_str().is_empty() {
            bail!("refactor.launcher and refactor.jar cannot both be empty");
        }
        if self.annotator.enabled && self.annotator.launcher.is_empty() {
            bail!("annotator.launcher must name a program");
        }
        if self.dataset.unzip.is_empty() {
            bail!("dataset.unzip must name a program");
        }
        if self.dataset.download_timeout_seconds == 0 {
            bail!("dataset.download_timeout_seconds must be at least 1");
        }
        if self.pipeline.jobs == Some(0) {
            bail!("pipeline.jobs must be at least 1");
        }
        if self.pipeline.timeout_seconds == 0 {
            bail!("pipeline.timeout_seconds must be at least 1");
        }
        regex::Regex::new(&self.toolchain.error_pattern).with_context(|| {
            format!(
                "Invalid toolchain.error_pattern: {}",
                self.toolchain.error_pattern
            )
        })?;
        Ok(())
    }

    /// Effective worker pool size.
    pub fn jobs(&self) -> usize {
        self.pipeline.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
