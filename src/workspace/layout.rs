//! Resolved benchmark directory layout.

use crate::cli::OutputFormat;
use crate::config::PathsConfig;
use crate::models::Dataset;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Absolute-or-root-relative paths of every directory and file the
/// harness reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    pub cache_dir: PathBuf,
    pub working_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub results_dir: PathBuf,
    pub jars_dir: PathBuf,
}

impl Layout {
    /// Join the configured subdirectories onto the root.
    pub fn new(paths: &PathsConfig) -> Self {
        Self::with_root(paths, paths.root.clone())
    }

    /// Like [`new`](Self::new), with a relative root made absolute
    /// against the current directory. Nested tool commands run from other
    /// directories, so the pipeline always uses this form.
    pub fn resolve(paths: &PathsConfig) -> Result<Self> {
        if paths.root.is_absolute() {
            return Ok(Self::new(paths));
        }
        let root = std::env::current_dir()
            .context("Failed to read current directory")?
            .join(&paths.root);
        Ok(Self::with_root(paths, root))
    }

    fn with_root(paths: &PathsConfig, root: PathBuf) -> Self {
        Self {
            cache_dir: root.join(&paths.cache_dir),
            working_dir: root.join(&paths.working_dir),
            archive_dir: root.join(&paths.archive_dir),
            results_dir: root.join(&paths.results_dir),
            jars_dir: root.join(&paths.jars_dir),
            root,
        }
    }

    /// A jar path relative to the jars directory.
    pub fn jar(&self, relative: &Path) -> PathBuf {
        self.jars_dir.join(relative)
    }

    /// Per-dataset log directory.
    pub fn dataset_results(&self, name: &str) -> PathBuf {
        self.results_dir.join(name)
    }

    /// `results/<dataset>/<stem>.txt`
    pub fn log_file(&self, name: &str, stem: &str) -> PathBuf {
        self.dataset_results(name).join(format!("{}.txt", stem))
    }

    pub fn error_count_file(&self, name: &str) -> PathBuf {
        self.log_file(name, "error_count")
    }

    pub fn annotator_dir(&self, name: &str) -> PathBuf {
        self.dataset_results(name).join("annotator")
    }

    pub fn baseline_csv(&self) -> PathBuf {
        self.results_dir.join("baseline.csv")
    }

    pub fn refactor_csv(&self) -> PathBuf {
        self.results_dir.join("refactor.csv")
    }

    pub fn summary_csv(&self) -> PathBuf {
        self.results_dir.join("summary.csv")
    }

    pub fn report_file(&self, format: OutputFormat) -> PathBuf {
        self.results_dir
            .join(format!("summary.{}", format.extension()))
    }

    /// Where the archive of a run started at `timestamp` goes.
    pub fn archive_destination(&self, timestamp: &str) -> PathBuf {
        self.archive_dir.join(timestamp)
    }

    /// Working copy of the named dataset.
    pub fn working_dataset(&self, name: &str) -> Dataset {
        Dataset::new(name, self.working_dir.join(name))
    }

    pub fn cached_dataset(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }

    /// Datasets present in the working copy, sorted by name.
    pub fn working_datasets(&self) -> Result<Vec<Dataset>> {
        Ok(list_subdirs(&self.working_dir)?
            .into_iter()
            .map(|name| self.working_dataset(&name))
            .collect())
    }

    /// Dataset names present in the cache, sorted.
    pub fn cached_names(&self) -> Result<Vec<String>> {
        list_subdirs(&self.cache_dir)
    }

    /// Directories created by `prepare`.
    pub fn directories(&self) -> [&Path; 5] {
        [
            &self.cache_dir,
            &self.working_dir,
            &self.archive_dir,
            &self.results_dir,
            &self.jars_dir,
        ]
    }
}

/// Sorted names of the subdirectories of `dir`. A missing directory has
/// none.
pub fn list_subdirs(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut names = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_joins_root() {
        let paths = PathsConfig {
            root: PathBuf::from("/bench"),
            ..Default::default()
        };
        let layout = Layout::new(&paths);

        assert_eq!(layout.cache_dir, PathBuf::from("/bench/datasets/cache"));
        assert_eq!(layout.working_dir, PathBuf::from("/bench/datasets/refactored"));
        assert_eq!(
            layout.log_file("foo", "analyze-before"),
            PathBuf::from("/bench/results/foo/analyze-before.txt")
        );
        assert_eq!(
            layout.report_file(OutputFormat::Json),
            PathBuf::from("/bench/results/summary.json")
        );
        assert_eq!(
            layout.archive_destination("2024-01-01_00-00-00"),
            PathBuf::from("/bench/datasets/old-runs/refactored/2024-01-01_00-00-00")
        );
    }

    #[test]
    fn test_resolve_makes_root_absolute() {
        let layout = Layout::resolve(&PathsConfig::default()).unwrap();
        assert!(layout.root.is_absolute());
        assert!(layout.results_dir.ends_with("benchmarking/results"));
    }

    #[test]
    fn test_working_datasets_sorted_dirs_only() {
        let dir = TempDir::new().unwrap();
        let paths = PathsConfig {
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let layout = Layout::new(&paths);

        fs::create_dir_all(layout.working_dir.join("zeta")).unwrap();
        fs::create_dir_all(layout.working_dir.join("alpha")).unwrap();
        fs::write(layout.working_dir.join("notes.txt"), "x").unwrap();

        let names: Vec<String> = layout
            .working_datasets()
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(layout.cached_names().unwrap().is_empty());
    }
}
