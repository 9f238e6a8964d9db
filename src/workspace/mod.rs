//! Benchmark workspace management.
//!
//! Owns the on-disk state around a run: directory creation, the dataset
//! cache and its download, working copies, archives of earlier runs,
//! processor jars, reset and cleanup.

pub mod download;
pub mod layout;

pub use layout::Layout;

use download::Downloader;

use crate::config::{Config, JarSpec};
use crate::models::Dataset;
use crate::runner::exec::ProcessRunner;
use crate::toolchain::{CommandBuilder, CommandSpec};
use anyhow::{bail, Context, Result};
use chrono::Local;
use git2::build::CheckoutBuilder;
use git2::Repository;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// How `reset` restored the working copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMethod {
    /// Tracked files were checked out from the enclosing git index.
    Git,
    /// The working copy was recreated from the dataset cache.
    Cache,
}

/// Filesystem operations on the benchmark root.
pub struct Workspace<'a> {
    config: &'a Config,
    layout: &'a Layout,
    runner: ProcessRunner,
    show_progress: bool,
}

impl<'a> Workspace<'a> {
    pub fn new(config: &'a Config, layout: &'a Layout, show_progress: bool) -> Self {
        Self {
            config,
            layout,
            runner: ProcessRunner::from_secs(config.pipeline.timeout_seconds),
            show_progress,
        }
    }

    /// Create every directory of the layout.
    pub fn create_directories(&self) -> Result<()> {
        for dir in self.layout.directories() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    /// Full INIT stage. Returns the datasets of the fresh working copy.
    pub async fn prepare(&self, limit: Option<usize>) -> Result<Vec<Dataset>> {
        self.create_directories()?;
        self.fetch_dataset().await?;
        self.ensure_processor_jars().await?;

        if let Some(archived) = self.archive_working_copy()? {
            info!("Archived previous working copy to {}", archived.display());
        }

        let mut names = self.layout.cached_names()?;
        if names.is_empty() {
            bail!(
                "Dataset cache is empty: {}",
                self.layout.cache_dir.display()
            );
        }
        if let Some(limit) = limit {
            names.truncate(limit);
        }

        self.copy_from_cache(&names)?;
        info!("Copied {} datasets to {}", names.len(), self.layout.working_dir.display());

        Ok(names
            .iter()
            .map(|name| self.layout.working_dataset(name))
            .collect())
    }

    fn downloader(&self) -> Result<Downloader> {
        Downloader::new(self.config.dataset.download_timeout_seconds, self.show_progress)
    }

    /// Download and extract the dataset archive when the cache is empty.
    ///
    /// A configured `dataset.archive_file` is extracted instead of
    /// downloading.
    pub async fn fetch_dataset(&self) -> Result<()> {
        if !is_empty_dir(&self.layout.cache_dir)? {
            debug!("Dataset cache present at {}", self.layout.cache_dir.display());
            return Ok(());
        }

        fs::create_dir_all(&self.layout.cache_dir).with_context(|| {
            format!("Failed to create {}", self.layout.cache_dir.display())
        })?;

        let staging = TempDir::new_in(&self.layout.root)
            .context("Failed to create staging directory")?;

        let archive = match self.config.dataset.archive_file {
            Some(ref file) => {
                if !file.is_file() {
                    bail!("Dataset archive not found: {}", file.display());
                }
                file.clone()
            }
            None => {
                println!("📥 Downloading datasets...");
                let archive = staging.path().join("dataset.zip");
                self.downloader()?
                    .fetch(&self.config.dataset.archive_url, &archive)
                    .await
                    .context("Downloading datasets failed")?;
                archive
            }
        };

        self.extract_archive(&archive, staging.path()).await
    }

    /// Unpack `archive` into the cache, flattening the archive's top-level
    /// directory.
    async fn extract_archive(&self, archive: &Path, staging: &Path) -> Result<()> {
        let extracted = staging.join("extracted");
        let unzip = CommandSpec::from_launcher(&self.config.dataset.unzip)
            .path_arg(archive)
            .arg("-d")
            .path_arg(&extracted);

        self.runner
            .run_checked("unzip", &unzip)
            .await
            .context("Extracting downloaded datasets failed")?;

        let nested = extracted.join(&self.config.dataset.archive_root);
        let source = if nested.is_dir() { nested } else { extracted };

        for entry in fs::read_dir(&source)
            .with_context(|| format!("Failed to list {}", source.display()))?
        {
            let entry = entry?;
            let target = self.layout.cache_dir.join(entry.file_name());
            fs::rename(entry.path(), &target).with_context(|| {
                format!("Failed to move {} into the cache", entry.path().display())
            })?;
        }

        info!("Extracted datasets into {}", self.layout.cache_dir.display());
        Ok(())
    }

    /// Jars the analyzer needs, with the annotator jar when enabled.
    fn required_jars(&self) -> Vec<&JarSpec> {
        let mut jars: Vec<&JarSpec> = self.config.toolchain.processor_jars.iter().collect();
        if self.config.annotator.enabled {
            jars.push(&self.config.annotator.jar);
        }
        jars
    }

    /// Download missing jars that have a URL; fail on any other missing jar.
    pub async fn ensure_processor_jars(&self) -> Result<()> {
        let downloader = self.downloader()?;
        for jar in self.required_jars() {
            let path = self.layout.jar(&jar.path);
            if path.is_file() {
                continue;
            }

            match jar.url {
                Some(ref url) => {
                    println!("📥 Fetching {}", jar.path.display());
                    downloader
                        .fetch(url, &path)
                        .await
                        .with_context(|| format!("Failed to download {}", jar.path.display()))?;
                }
                None => bail!(
                    "Missing jar {} and no download URL is configured",
                    path.display()
                ),
            }
        }
        Ok(())
    }

    /// Move (or delete) the current working copy so a run starts clean.
    ///
    /// Returns the archive location when something was archived.
    pub fn archive_working_copy(&self) -> Result<Option<PathBuf>> {
        let working = &self.layout.working_dir;
        if is_empty_dir(working)? {
            return Ok(None);
        }

        if !self.config.pipeline.archive_previous_runs {
            remove_dir_if_exists(working)?;
            fs::create_dir_all(working)?;
            return Ok(None);
        }

        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let mut dest = self.layout.archive_destination(&timestamp);
        let mut suffix = 1;
        while dest.exists() {
            dest = self
                .layout
                .archive_destination(&format!("{}_{}", timestamp, suffix));
            suffix += 1;
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        if fs::rename(working, &dest).is_err() {
            // Different filesystem.
            copy_dir_all(working, &dest)?;
            fs::remove_dir_all(working)?;
        }
        fs::create_dir_all(working)?;

        Ok(Some(dest))
    }

    /// Copy the named datasets from the cache into the working directory.
    pub fn copy_from_cache(&self, names: &[String]) -> Result<()> {
        fs::create_dir_all(&self.layout.working_dir)?;
        for name in names {
            let src = self.layout.cached_dataset(name);
            let dst = self.layout.working_dir.join(name);
            copy_dir_all(&src, &dst)
                .with_context(|| format!("Failed to copy dataset {}", name))?;
        }
        Ok(())
    }

    /// Replace one dataset's working copy with a fresh copy from the cache.
    pub fn refresh_dataset(&self, name: &str) -> Result<Dataset> {
        let cached = self.layout.cached_dataset(name);
        if !cached.is_dir() {
            bail!("Dataset {} is not in the cache: {}", name, cached.display());
        }

        let dataset = self.layout.working_dataset(name);
        remove_dir_if_exists(&dataset.path)?;
        copy_dir_all(&cached, &dataset.path)
            .with_context(|| format!("Failed to copy dataset {}", name))?;
        Ok(dataset)
    }

    /// The refactoring jar must exist before the refactor stage.
    pub fn verify_refactorer(&self) -> Result<()> {
        let refactor = &self.config.refactor;
        if !refactor.jar.is_file() {
            bail!(
                "Refactoring tool not found: {} (build it with `vgr-bench reset`)",
                refactor.jar.display()
            );
        }
        Ok(())
    }

    /// Restore the working copy, then rebuild the refactoring jar.
    pub async fn reset(&self, skip_build: bool) -> Result<RestoreMethod> {
        let method = self.restore_working_copy()?;
        match method {
            RestoreMethod::Git => info!("Restored tracked working copy from git"),
            RestoreMethod::Cache => info!("Recreated working copy from the dataset cache"),
        }

        if !skip_build {
            self.build_refactorer().await?;
        }
        Ok(method)
    }

    /// Restore tracked files from the enclosing git index, falling back to
    /// recreating the working copy from the cache.
    pub fn restore_working_copy(&self) -> Result<RestoreMethod> {
        if self.restore_from_git()? {
            return Ok(RestoreMethod::Git);
        }

        let names = self.layout.cached_names()?;
        if names.is_empty() {
            bail!(
                "Cannot restore working copy: dataset cache is empty ({})",
                self.layout.cache_dir.display()
            );
        }

        remove_dir_if_exists(&self.layout.working_dir)?;
        self.copy_from_cache(&names)?;
        Ok(RestoreMethod::Cache)
    }

    fn restore_from_git(&self) -> Result<bool> {
        let working = &self.layout.working_dir;
        if !working.exists() {
            return Ok(false);
        }

        let repo = match Repository::discover(working) {
            Ok(repo) => repo,
            Err(e) => {
                debug!("Working copy is not inside a git repository: {}", e);
                return Ok(false);
            }
        };
        let Some(workdir) = repo.workdir() else {
            return Ok(false);
        };

        let workdir = workdir.canonicalize()?;
        let working = working.canonicalize()?;
        let Ok(relative) = working.strip_prefix(&workdir) else {
            return Ok(false);
        };

        let mut index = repo.index().context("Failed to read git index")?;
        let tracked = index
            .iter()
            .any(|entry| Path::new(&*String::from_utf8_lossy(&entry.path)).starts_with(relative));
        if !tracked {
            return Ok(false);
        }

        let mut checkout = CheckoutBuilder::new();
        checkout.force();
        if !relative.as_os_str().is_empty() {
            checkout.path(relative.to_string_lossy().replace('\\', "/"));
        }
        repo.checkout_index(Some(&mut index), Some(&mut checkout))
            .context("Failed to restore working copy from git")?;
        Ok(true)
    }

    /// Run the refactorer's build command.
    pub async fn build_refactorer(&self) -> Result<()> {
        let spec = CommandBuilder::new(self.config, self.layout).build_refactorer();
        println!("🔨 Rebuilding refactoring tool: {}", spec);

        let output = self.runner.run("build", &spec).await?;
        if !output.success() {
            bail!(
                "Refactoring tool build failed ({}):\n{}",
                output.status,
                output.combined()
            );
        }
        Ok(())
    }

    /// Remove generated files. `full` also removes the dataset cache and
    /// archived runs. Returns the removed directories.
    pub fn clean(&self, full: bool) -> Result<Vec<PathBuf>> {
        let mut targets = vec![&self.layout.working_dir, &self.layout.results_dir];
        if full {
            targets.push(&self.layout.cache_dir);
            targets.push(&self.layout.archive_dir);
        }

        let mut removed = Vec::new();
        for target in targets {
            if remove_dir_if_exists(target)? {
                removed.push(target.clone());
            }
        }
        Ok(removed)
    }
}

/// Recursively copy `src` into `dst`, creating `dst`.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<u64> {
    let mut files = 0;
    for entry in WalkDir::new(src) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else if file_type.is_file() || entry.path().is_file() {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
            files += 1;
        } else {
            warn!("Skipping {}", entry.path().display());
        }
    }
    Ok(files)
}

/// Returns whether anything was removed.
fn remove_dir_if_exists(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(dir).with_context(|| format!("Failed to remove {}", dir.display()))?;
    Ok(true)
}

/// A missing directory counts as empty.
fn is_empty_dir(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(true);
    }
    Ok(fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .next()
        .is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;

    struct Fixture {
        _dir: TempDir,
        config: Config,
        layout: Layout,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths = PathsConfig {
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let layout = Layout::new(&config.paths);
        Fixture {
            _dir: dir,
            config,
            layout,
        }
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn seed_cache(layout: &Layout, names: &[&str]) {
        for name in names {
            write(
                &layout.cached_dataset(name).join("src/com/a/A.java"),
                "package com.a;\nclass A {}\n",
            );
            write(&layout.cached_dataset(name).join("lib/dep.jar"), "jar");
        }
    }

    #[test]
    fn test_copy_dir_all() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("src/a/b.txt"), "b");
        write(&dir.path().join("src/c.txt"), "c");
        fs::create_dir_all(dir.path().join("src/empty")).unwrap();

        let copied = copy_dir_all(&dir.path().join("src"), &dir.path().join("dst")).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(fs::read_to_string(dir.path().join("dst/a/b.txt")).unwrap(), "b");
        assert!(dir.path().join("dst/empty").is_dir());
    }

    #[test]
    fn test_copy_from_cache_and_refresh() {
        let f = fixture();
        seed_cache(&f.layout, &["foo", "bar"]);
        let ws = Workspace::new(&f.config, &f.layout, false);

        ws.copy_from_cache(&["foo".to_string()]).unwrap();
        let names: Vec<String> = f
            .layout
            .working_datasets()
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["foo"]);

        let java = f.layout.working_dir.join("foo/src/com/a/A.java");
        fs::write(&java, "refactored").unwrap();
        let dataset = ws.refresh_dataset("foo").unwrap();
        assert_eq!(dataset.path, f.layout.working_dir.join("foo"));
        assert!(fs::read_to_string(&java).unwrap().starts_with("package com.a;"));

        assert!(ws.refresh_dataset("missing").is_err());
    }

    #[test]
    fn test_archive_working_copy() {
        let f = fixture();
        let ws = Workspace::new(&f.config, &f.layout, false);

        assert_eq!(ws.archive_working_copy().unwrap(), None);

        write(&f.layout.working_dir.join("foo/src/A.java"), "old");
        let archived = ws.archive_working_copy().unwrap().unwrap();

        assert!(archived.starts_with(&f.layout.archive_dir));
        assert_eq!(fs::read_to_string(archived.join("foo/src/A.java")).unwrap(), "old");
        assert!(f.layout.working_dir.is_dir());
        assert!(is_empty_dir(&f.layout.working_dir).unwrap());

        // a second archive in the same second gets a distinct directory
        write(&f.layout.working_dir.join("foo/src/A.java"), "newer");
        let second = ws.archive_working_copy().unwrap().unwrap();
        assert_ne!(second, archived);
    }

    #[test]
    fn test_discard_working_copy_when_not_archiving() {
        let mut f = fixture();
        f.config.pipeline.archive_previous_runs = false;
        let ws = Workspace::new(&f.config, &f.layout, false);

        write(&f.layout.working_dir.join("foo/src/A.java"), "old");
        assert_eq!(ws.archive_working_copy().unwrap(), None);
        assert!(!f.layout.working_dir.join("foo").exists());
        assert!(!f.layout.archive_dir.exists());
    }

    #[tokio::test]
    async fn test_prepare_with_cached_datasets() {
        let mut f = fixture();
        seed_cache(&f.layout, &["c", "a", "b"]);
        for jar in &mut f.config.toolchain.processor_jars {
            jar.url = None;
        }
        for jar in &f.config.toolchain.processor_jars {
            write(&f.layout.jar(&jar.path), "jar");
        }
        let ws = Workspace::new(&f.config, &f.layout, false);

        let datasets = ws.prepare(Some(2)).await.unwrap();
        let names: Vec<&str> = datasets.iter().map(|d| d.name.as_str()).collect();

        assert_eq!(names, vec!["a", "b"]);
        assert!(f.layout.results_dir.is_dir());
        assert!(f.layout.working_dir.join("b/lib/dep.jar").is_file());
        assert!(!f.layout.working_dir.join("c").exists());
    }

    #[test]
    fn test_missing_jar_without_url_fails() {
        let mut f = fixture();
        for jar in &mut f.config.toolchain.processor_jars {
            jar.url = None;
        }
        let ws = Workspace::new(&f.config, &f.layout, false);

        let err = tokio_test::block_on(ws.ensure_processor_jars()).unwrap_err();
        assert!(err.to_string().contains("error_prone_core"));
    }

    #[test]
    fn test_verify_refactorer() {
        let mut f = fixture();
        f.config.refactor.jar = f.layout.root.join("VGRTool.jar");
        let ws = Workspace::new(&f.config, &f.layout, false);
        assert!(ws.verify_refactorer().is_err());

        write(&f.config.refactor.jar, "jar");
        let ws = Workspace::new(&f.config, &f.layout, false);
        assert!(ws.verify_refactorer().is_ok());
    }

    #[test]
    fn test_restore_from_cache_when_untracked() {
        let f = fixture();
        seed_cache(&f.layout, &["foo"]);
        let ws = Workspace::new(&f.config, &f.layout, false);

        write(&f.layout.working_dir.join("foo/src/com/a/A.java"), "refactored");
        write(&f.layout.working_dir.join("stray/x.txt"), "x");

        assert_eq!(ws.restore_working_copy().unwrap(), RestoreMethod::Cache);
        assert!(fs::read_to_string(f.layout.working_dir.join("foo/src/com/a/A.java"))
            .unwrap()
            .starts_with("package com.a;"));
        assert!(!f.layout.working_dir.join("stray").exists());
    }

    #[test]
    fn test_restore_from_git_index() {
        let f = fixture();
        let repo = Repository::init(&f.layout.root).unwrap();
        let java = f.layout.working_dir.join("foo/src/A.java");
        write(&java, "original");

        let mut index = repo.index().unwrap();
        index
            .add_path(Path::new("datasets/refactored/foo/src/A.java"))
            .unwrap();
        index.write().unwrap();

        fs::write(&java, "refactored").unwrap();
        let ws = Workspace::new(&f.config, &f.layout, false);

        assert_eq!(ws.restore_working_copy().unwrap(), RestoreMethod::Git);
        assert_eq!(fs::read_to_string(&java).unwrap(), "original");
    }

    #[test]
    fn test_clean() {
        let f = fixture();
        seed_cache(&f.layout, &["foo"]);
        write(&f.layout.working_dir.join("foo/src/A.java"), "x");
        write(&f.layout.results_dir.join("summary.csv"), "x");
        let ws = Workspace::new(&f.config, &f.layout, false);

        let removed = ws.clean(false).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(f.layout.cache_dir.is_dir());
        assert!(!f.layout.results_dir.exists());

        let removed = ws.clean(true).unwrap();
        assert_eq!(removed, vec![f.layout.cache_dir.clone()]);
    }

    /// Point the fixture at a local archive and an `sh` stand-in for unzip
    /// that runs `script` with `$1` = archive, `$3` = output directory.
    #[cfg(unix)]
    fn local_archive(f: &mut Fixture, script: &str) {
        let archive = f.layout.root.join("njr.zip");
        write(&archive, "class A {}");
        f.config.dataset.archive_file = Some(archive);
        f.config.dataset.unzip = vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "sh".to_string(),
        ];
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_dataset_flattens_archive_root() {
        let mut f = fixture();
        local_archive(
            &mut f,
            r#"echo run >> "$1.calls"; mkdir -p "$3/njr-1_dataset/foo/src" && cp "$1" "$3/njr-1_dataset/foo/src/A.java""#,
        );
        let ws = Workspace::new(&f.config, &f.layout, false);

        ws.fetch_dataset().await.unwrap();

        let java = f.layout.cache_dir.join("foo/src/A.java");
        assert_eq!(fs::read_to_string(&java).unwrap(), "class A {}");
        assert!(!f.layout.cache_dir.join("njr-1_dataset").exists());
        assert_eq!(f.layout.cached_names().unwrap(), vec!["foo"]);

        // staging directory is gone
        let mut leftovers: Vec<String> = fs::read_dir(&f.layout.root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        leftovers.sort();
        assert_eq!(leftovers, vec!["datasets", "njr.zip", "njr.zip.calls"]);

        // a populated cache is left alone
        ws.fetch_dataset().await.unwrap();
        let calls = fs::read_to_string(f.layout.root.join("njr.zip.calls")).unwrap();
        assert_eq!(calls.lines().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_dataset_without_archive_root() {
        let mut f = fixture();
        local_archive(&mut f, r#"mkdir -p "$3/bar/lib" "$3/baz/src""#);
        let ws = Workspace::new(&f.config, &f.layout, false);

        ws.fetch_dataset().await.unwrap();

        assert_eq!(f.layout.cached_names().unwrap(), vec!["bar", "baz"]);
        assert!(f.layout.cache_dir.join("bar/lib").is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_dataset_extraction_failure() {
        let mut f = fixture();
        local_archive(&mut f, "echo 'End-of-central-directory signature not found' >&2; exit 9");
        let ws = Workspace::new(&f.config, &f.layout, false);

        let err = ws.fetch_dataset().await.unwrap_err();
        assert!(format!("{:#}", err).contains("Extracting downloaded datasets failed"));
        assert!(f.layout.cached_names().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_dataset_missing_archive_file() {
        let mut f = fixture();
        f.config.dataset.archive_file = Some(f.layout.root.join("absent.zip"));
        let ws = Workspace::new(&f.config, &f.layout, false);

        let err = ws.fetch_dataset().await.unwrap_err();
        assert!(err.to_string().contains("Dataset archive not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_refactorer_failure_is_reported() {
        let mut f = fixture();
        f.config.refactor.build_command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo compile failed >&2; exit 1".to_string(),
        ];
        let ws = Workspace::new(&f.config, &f.layout, false);

        let err = ws.build_refactorer().await.unwrap_err();
        assert!(err.to_string().contains("compile failed"));
    }
}
