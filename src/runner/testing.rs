//! Shell stand-ins for javac and the refactorer, shared by runner tests.

use crate::config::{Config, PathsConfig};
use crate::workspace::Layout;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Prints one NullAway error per `BUG` line of every listed source and
/// exits 1 when any were found, like javac with NullAway at ERROR.
const FAKE_JAVAC: &str = r#"
for last; do :; done
argfile="${last#@}"
found=0
while IFS= read -r file; do
    n=$(grep -c BUG "$file")
    i=0
    while [ "$i" -lt "$n" ]; do
        echo "$file:1: error: [NullAway] dereferenced expression x is @Nullable" >&2
        i=$((i + 1))
    done
    found=$((found + n))
done < "$argfile"
echo "$found errors" >&2
[ "$found" -eq 0 ]
"#;

/// Deletes every line containing `fixable`. Hangs on datasets named `baz`.
const FAKE_REFACTOR: &str = r#"
case "$1" in
    */baz) exec sleep 5 ;;
esac
find "$1/src" -name '*.java' | while IFS= read -r file; do
    grep -v fixable "$file" > "$file.tmp"
    mv "$file.tmp" "$file"
done
echo "refactored $1 with $2"
"#;

pub struct Harness {
    pub dir: TempDir,
    pub config: Config,
    pub layout: Layout,
}

impl Harness {
    /// A workspace whose tools are the shell stand-ins above.
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let tools = dir.path().join("tools");
        fs::create_dir_all(&tools).unwrap();
        fs::write(tools.join("javac.sh"), FAKE_JAVAC).unwrap();
        fs::write(tools.join("refactor.sh"), FAKE_REFACTOR).unwrap();

        let mut config = Config::default();
        config.paths = PathsConfig {
            root: dir.path().join("bench"),
            ..Default::default()
        };
        config.toolchain.javac = vec![
            "sh".to_string(),
            tools.join("javac.sh").to_string_lossy().into_owned(),
        ];
        config.toolchain.exports.clear();
        config.refactor.launcher = vec!["sh".to_string()];
        config.refactor.jar = tools.join("refactor.sh");
        config.pipeline.timeout_seconds = 1;
        config.pipeline.jobs = Some(2);

        let layout = Layout::new(&config.paths);
        fs::create_dir_all(&layout.results_dir).unwrap();
        fs::create_dir_all(&layout.working_dir).unwrap();

        Self {
            dir,
            config,
            layout,
        }
    }

    /// Write a dataset into the working copy and the cache. Each entry of
    /// `lines` becomes one line of `src/p/A.java`.
    pub fn dataset(&self, name: &str, lines: &[&str]) {
        let mut content = format!("package p.{};\n", name.replace('-', "_"));
        for line in lines {
            content.push_str(line);
            content.push('\n');
        }
        for base in [&self.layout.working_dir, &self.layout.cache_dir] {
            write(&base.join(name).join("src/p/A.java"), &content);
            fs::create_dir_all(base.join(name).join("lib")).unwrap();
        }
    }

    /// The three datasets of the reference scenario: `foo` loses two of
    /// three errors, `bar` has none, `baz` hangs in the refactorer.
    pub fn scenario(&self) {
        self.dataset("foo", &["BUG", "BUG fixable", "BUG fixable"]);
        self.dataset("bar", &["class Bar {}"]);
        self.dataset("baz", &["BUG", "BUG fixable"]);
    }
}

pub fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}
