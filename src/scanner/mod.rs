//! Java source discovery for a dataset.
//!
//! Finds the `*.java` files javac should compile, writes them to a javac
//! `@argfile`, and collects the package names NullAway is restricted to.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const JAVA_EXTENSION: &str = "java";

/// Scans one dataset directory.
pub struct SourceScanner {
    dataset_root: PathBuf,
}

impl SourceScanner {
    /// Create a scanner for the dataset at `dataset_root`.
    pub fn new(dataset_root: impl Into<PathBuf>) -> Self {
        Self {
            dataset_root: dataset_root.into(),
        }
    }

    /// All Java sources under `<dataset>/src`, sorted.
    ///
    /// A dataset without a `src/` directory has no sources.
    pub fn java_sources(&self) -> Result<Vec<PathBuf>> {
        let src = self.dataset_root.join("src");
        if !src.is_dir() {
            debug!("No src directory in {}", self.dataset_root.display());
            return Ok(Vec::new());
        }
        collect_java_files(&src)
    }

    /// Write the javac argfile listing every source and return the sources.
    pub fn write_argfile(&self, dest: &Path) -> Result<Vec<PathBuf>> {
        let sources = self.java_sources()?;

        let mut content = String::new();
        for source in &sources {
            content.push_str(&argfile_entry(source));
            content.push('\n');
        }

        fs::write(dest, content)
            .with_context(|| format!("Failed to write source list {}", dest.display()))?;

        debug!(
            "Listed {} sources for {} in {}",
            sources.len(),
            self.dataset_root.display(),
            dest.display()
        );
        Ok(sources)
    }

    /// Distinct package names declared by the dataset's Java files, sorted.
    ///
    /// Unreadable files and files without a package declaration are
    /// skipped.
    pub fn annotated_packages(&self) -> Vec<String> {
        let files = match collect_java_files(&self.dataset_root) {
            Ok(files) => files,
            Err(e) => {
                warn!("Cannot scan {}: {}", self.dataset_root.display(), e);
                return Vec::new();
            }
        };

        let mut packages = BTreeSet::new();
        for file in files {
            match fs::read_to_string(&file) {
                Ok(content) => {
                    if let Some(package) = package_declaration(&content) {
                        packages.insert(package);
                    }
                }
                Err(e) => debug!("Skipping unreadable {}: {}", file.display(), e),
            }
        }

        packages.into_iter().collect()
    }
}

/// Recursively collect `*.java` files below `dir`, sorted by path.
fn collect_java_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(JAVA_EXTENSION) {
            files.push(path.to_path_buf());
        }
    }

    Ok(files)
}

/// Name from the first `package` declaration of a compilation unit.
///
/// Leading blank lines, line comments and block comments are skipped; the
/// first other line must be the declaration.
pub fn package_declaration(content: &str) -> Option<String> {
    let mut in_block_comment = false;

    for line in content.lines() {
        let mut line = line.trim();

        if in_block_comment {
            match line.find("*/") {
                Some(end) => {
                    in_block_comment = false;
                    line = line[end + 2..].trim();
                }
                None => continue,
            }
        }

        while line.starts_with("/*") {
            // the closer cannot share the opener's `*`
            match line[2..].find("*/") {
                Some(end) => line = line[end + 4..].trim(),
                None => {
                    in_block_comment = true;
                    line = "";
                }
            }
        }

        if line.is_empty() || line.starts_with("//") {
            continue;
        }

        let rest = line.strip_prefix("package")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let name = rest.trim().trim_end_matches(';').trim();
        let name = name.split(';').next().unwrap_or("").trim();
        if name.is_empty() {
            return None;
        }
        return Some(name.to_string());
    }

    None
}

/// Render a path as one javac argfile entry, quoting when needed.
fn argfile_entry(path: &Path) -> String {
    let raw = path.to_string_lossy();
    if raw.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'' || c == '#') {
        let escaped = raw.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{}\"", escaped)
    } else {
        raw.into_owned()
    }
}
