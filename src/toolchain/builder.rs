//! Tool invocation builders.
//!
//! Turns the immutable configuration plus per-dataset discovered values
//! into [`CommandSpec`]s for javac (Error Prone + NullAway), the
//! refactoring tool, the annotator and the refactorer's build wrapper.

use crate::config::Config;
use crate::models::Dataset;
use crate::toolchain::command::CommandSpec;
use crate::workspace::Layout;
use std::path::{Path, PathBuf};

#[cfg(windows)]
const CLASSPATH_SEPARATOR: &str = ";";
#[cfg(not(windows))]
const CLASSPATH_SEPARATOR: &str = ":";

/// Per-invocation values discovered for one analyzer run.
#[derive(Debug, Clone)]
pub struct AnalyzerInvocation<'a> {
    pub dataset: &'a Dataset,
    /// Isolated output directory for compiled classes.
    pub classes_dir: &'a Path,
    /// javac `@argfile` listing the sources.
    pub argfile: &'a Path,
    /// Packages NullAway analyzes.
    pub packages: &'a [String],
}

/// Files the annotator and its scanner exchange for one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotatorFiles {
    /// Output directory handed to the annotator with `-d`.
    pub out_dir: PathBuf,
    pub scanner_config: PathBuf,
    pub nullaway_config: PathBuf,
    /// TSV listing the two config paths.
    pub paths_tsv: PathBuf,
}

impl AnnotatorFiles {
    /// Config files directly in `dir`, annotator output in `dir/out`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            out_dir: dir.join("out"),
            scanner_config: dir.join("scanner.xml"),
            nullaway_config: dir.join("nullaway.xml"),
            paths_tsv: dir.join("paths.tsv"),
        }
    }

    /// Content of the paths TSV.
    pub fn paths_tsv_content(&self) -> String {
        format!(
            "{}\t{}\n",
            self.nullaway_config.display(),
            self.scanner_config.display()
        )
    }
}

/// Builds external tool command lines.
pub struct CommandBuilder<'a> {
    config: &'a Config,
    layout: &'a Layout,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(config: &'a Config, layout: &'a Layout) -> Self {
        Self { config, layout }
    }

    /// Annotation processor path: every configured processor jar, plus the
    /// annotator jar when the annotator pass is enabled.
    pub fn processor_path(&self) -> String {
        let mut jars: Vec<PathBuf> = self
            .config
            .toolchain
            .processor_jars
            .iter()
            .map(|jar| self.layout.jar(&jar.path))
            .collect();
        if self.config.annotator.enabled {
            jars.push(self.layout.jar(&self.config.annotator.jar.path));
        }
        join_classpath(jars.iter().map(|p| p.to_string_lossy().into_owned()))
    }

    /// Compile classpath: the dataset's `lib/*` plus configured extras.
    pub fn classpath(&self, dataset: &Dataset) -> String {
        let mut entries = vec![dataset.lib_dir().join("*").to_string_lossy().into_owned()];
        entries.extend(self.config.toolchain.extra_classpath.iter().cloned());
        if self.config.annotator.enabled {
            entries.push(
                self.layout
                    .jar(&self.config.annotator.jar.path)
                    .to_string_lossy()
                    .into_owned(),
            );
        }
        join_classpath(entries)
    }

    /// The `-Xplugin:ErrorProne ...` value. Always a single argv entry.
    pub fn plugin_options(&self, packages: &[String], annotator: Option<&AnnotatorFiles>) -> String {
        let mut options = vec![
            "-Xplugin:ErrorProne".to_string(),
            "-XepDisableAllChecks".to_string(),
        ];

        if let Some(files) = annotator {
            options.push("-Xep:AnnotatorScanner:ERROR".to_string());
            options.push(format!(
                "-XepOpt:AnnotatorScanner:ConfigPath={}",
                files.scanner_config.display()
            ));
        }

        options.push("-Xep:NullAway:ERROR".to_string());

        if let Some(files) = annotator {
            options.push("-XepOpt:NullAway:SerializeFixMetadata=true".to_string());
            options.push(format!(
                "-XepOpt:NullAway:FixSerializationConfigPath={}",
                files.nullaway_config.display()
            ));
        }

        options.push(format!(
            "-XepOpt:NullAway:AnnotatedPackages={}",
            packages.join(",")
        ));
        options.extend(self.config.toolchain.extra_plugin_options.iter().cloned());

        options.join(" ")
    }

    /// javac with Error Prone and NullAway in error-only mode.
    pub fn analyzer(&self, invocation: &AnalyzerInvocation<'_>) -> CommandSpec {
        self.analyzer_with(invocation, None)
    }

    fn analyzer_with(
        &self,
        invocation: &AnalyzerInvocation<'_>,
        annotator: Option<&AnnotatorFiles>,
    ) -> CommandSpec {
        let toolchain = &self.config.toolchain;

        CommandSpec::from_launcher(&toolchain.javac)
            .args(toolchain.exports.iter().map(|flag| format!("-J{}", flag)))
            .arg("-d")
            .path_arg(invocation.classes_dir)
            .arg("-cp")
            .arg(self.classpath(invocation.dataset))
            .arg("-XDcompilePolicy=simple")
            .arg("--should-stop=ifError=FLOW")
            .arg("-processorpath")
            .arg(self.processor_path())
            .arg(self.plugin_options(invocation.packages, annotator))
            .args(["-Xmaxerrs", "0", "-Xmaxwarns", "0"])
            .arg(format!("@{}", invocation.argfile.display()))
    }

    /// The refactoring tool applied to the dataset's working copy.
    pub fn refactor(&self, dataset: &Dataset) -> CommandSpec {
        let refactor = &self.config.refactor;
        let spec = if refactor.launcher.is_empty() {
            CommandSpec::new(refactor.jar.to_string_lossy().into_owned())
        } else {
            CommandSpec::from_launcher(&refactor.launcher).path_arg(&refactor.jar)
        };
        spec.path_arg(&dataset.path).arg(refactor.module.clone())
    }

    /// NullAwayAnnotator run. The nested build command is rendered with
    /// shell quoting and executed by the annotator from `cwd`.
    pub fn annotator(
        &self,
        invocation: &AnalyzerInvocation<'_>,
        files: &AnnotatorFiles,
        cwd: &Path,
    ) -> CommandSpec {
        let annotator = &self.config.annotator;
        let build = self
            .analyzer_with(invocation, Some(files))
            .current_dir(cwd)
            .display();

        CommandSpec::from_launcher(&annotator.launcher)
            .path_arg(&self.layout.jar(&annotator.jar.path))
            .arg("-d")
            .path_arg(&files.out_dir)
            .arg("-bc")
            .arg(build)
            .arg("-cp")
            .path_arg(&files.paths_tsv)
            .arg("-i")
            .arg(annotator.initializer.clone())
            .arg("-n")
            .arg(annotator.nullable.clone())
            .arg("-cn")
            .arg(annotator.checker.clone())
            .arg("--depth")
            .arg(annotator.depth.to_string())
    }

    /// Command that rebuilds the refactoring jar.
    pub fn build_refactorer(&self) -> CommandSpec {
        CommandSpec::from_launcher(&self.config.refactor.build_command)
    }
}

fn join_classpath(entries: impl IntoIterator<Item = String>) -> String {
    entries
        .into_iter()
        .filter(|e| !e.is_empty())
        .collect::<Vec<_>>()
        .join(CLASSPATH_SEPARATOR)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn fixture() -> (Config, Layout, Dataset) {
        let mut config = Config::default();
        config.paths.root = PathBuf::from("/bench");
        let layout = Layout::new(&config.paths);
        let dataset = Dataset::new("foo", "/bench/datasets/refactored/foo");
        (config, layout, dataset)
    }

    #[test]
    fn test_analyzer_command() {
        let (config, layout, dataset) = fixture();
        let builder = CommandBuilder::new(&config, &layout);
        let packages = vec!["com.a".to_string(), "org.b".to_string()];
        let invocation = AnalyzerInvocation {
            dataset: &dataset,
            classes_dir: Path::new("/tmp/run/classes"),
            argfile: Path::new("/tmp/run/sources.txt"),
            packages: &packages,
        };

        let spec = builder.analyzer(&invocation);
        let args = spec.get_args();

        assert_eq!(spec.program(), "javac");
        assert_eq!(args.iter().filter(|a| a.starts_with("-J--add-")).count(), 10);
        assert!(args.windows(2).any(|w| w[0] == "-d" && w[1] == "/tmp/run/classes"));
        assert!(args
            .windows(2)
            .any(|w| w[0] == "-cp" && w[1] == "/bench/datasets/refactored/foo/lib/*"));
        assert!(args.contains(&"--should-stop=ifError=FLOW".to_string()));
        assert_eq!(args.last().unwrap(), "@/tmp/run/sources.txt");

        let plugin: Vec<&String> = args.iter().filter(|a| a.starts_with("-Xplugin:")).collect();
        assert_eq!(plugin.len(), 1);
        assert!(plugin[0].contains("-XepDisableAllChecks"));
        assert!(plugin[0].contains("-Xep:NullAway:ERROR"));
        assert!(plugin[0].ends_with("-XepOpt:NullAway:AnnotatedPackages=com.a,org.b"));
        assert!(!plugin[0].contains("AnnotatorScanner"));
    }

    #[test]
    fn test_processor_path() {
        let (mut config, layout, _) = fixture();
        let path = CommandBuilder::new(&config, &layout).processor_path();
        assert_eq!(path.split(':').count(), 6);
        assert!(path.starts_with("/bench/jars/errorprone/error_prone_core"));

        config.annotator.enabled = true;
        let path = CommandBuilder::new(&config, &layout).processor_path();
        assert_eq!(path.split(':').count(), 7);
        assert!(path.ends_with("annotator-core-1.3.15.jar"));
    }

    #[test]
    fn test_refactor_command() {
        let (config, layout, dataset) = fixture();
        let spec = CommandBuilder::new(&config, &layout).refactor(&dataset);
        assert_eq!(
            spec.display(),
            "java -jar build/libs/VGRTool-Full-1.0.jar /bench/datasets/refactored/foo All"
        );
    }

    #[test]
    fn test_refactor_without_launcher_runs_jar_directly() {
        let (mut config, layout, dataset) = fixture();
        config.refactor.launcher.clear();
        config.refactor.jar = PathBuf::from("./vgrtool");
        let spec = CommandBuilder::new(&config, &layout).refactor(&dataset);
        assert_eq!(spec.program(), "./vgrtool");
        assert_eq!(spec.get_args().len(), 2);
    }

    #[test]
    fn test_annotator_command_nests_quoted_build() {
        let (mut config, layout, dataset) = fixture();
        config.annotator.enabled = true;
        let builder = CommandBuilder::new(&config, &layout);
        let files = AnnotatorFiles::in_dir("/bench/results/foo/annotator");
        let packages = vec!["com.a".to_string()];
        let invocation = AnalyzerInvocation {
            dataset: &dataset,
            classes_dir: Path::new("/tmp/run/classes"),
            argfile: Path::new("/tmp/run/sources.txt"),
            packages: &packages,
        };

        let spec = builder.annotator(&invocation, &files, Path::new("/work"));
        let args = spec.get_args();
        let bc = args
            .iter()
            .position(|a| a == "-bc")
            .map(|i| &args[i + 1])
            .unwrap();

        assert!(bc.starts_with("cd /work && javac "));
        assert!(bc.contains("'-Xplugin:ErrorProne -XepDisableAllChecks -Xep:AnnotatorScanner:ERROR"));
        assert!(bc.contains("FixSerializationConfigPath=/bench/results/foo/annotator/nullaway.xml"));
        assert!(args.windows(2).any(|w| w[0] == "--depth" && w[1] == "10"));
        assert!(args.windows(2).any(|w| w[0] == "-cn" && w[1] == "NULLAWAY"));
    }

    #[test]
    fn test_paths_tsv_content() {
        let files = AnnotatorFiles::in_dir("/out");
        assert_eq!(files.paths_tsv_content(), "/out/nullaway.xml\t/out/scanner.xml\n");
    }

    #[test]
    fn test_build_refactorer() {
        let (config, layout, _) = fixture();
        let spec = CommandBuilder::new(&config, &layout).build_refactorer();
        assert_eq!(spec.display(), "./gradlew clean fullJar");
    }
}
