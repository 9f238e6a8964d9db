//! CSV tables persisted between stages.
//!
//! Three tables live in the results directory:
//!
//! - `summary.csv`: one row per dataset with both counts and derived columns
//! - `baseline.csv`: initial counts written by `initialize`
//! - `refactor.csv`: refactoring status written by `refactor`
//!
//! Counts that could not be produced are written as `-999`.

use crate::models::{BenchmarkResult, SummaryRow, ZeroBaseline, FAILED_SENTINEL};
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

pub const SUMMARY_HEADER: &str =
    "benchmark,initial_error_count,refactored_error_count,error_reduction,error_reduction_percent";
pub const BASELINE_HEADER: &str = "benchmark,initial_error_count";
pub const REFACTOR_HEADER: &str = "benchmark,status,detail";

/// Initial count of one dataset, `None` when the first analysis failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineEntry {
    pub benchmark: String,
    pub initial_error_count: Option<u64>,
}

/// Whether refactoring one dataset succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefactorStatus {
    pub benchmark: String,
    pub succeeded: bool,
    /// Failure reason; empty on success.
    pub detail: String,
}

impl RefactorStatus {
    pub fn ok(benchmark: impl Into<String>) -> Self {
        Self {
            benchmark: benchmark.into(),
            succeeded: true,
            detail: String::new(),
        }
    }

    pub fn failed(benchmark: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            benchmark: benchmark.into(),
            succeeded: false,
            detail: detail.into(),
        }
    }
}

/// Render the summary table. Rows are written in the given order.
pub fn render_summary(rows: &[SummaryRow]) -> String {
    let mut out = String::new();
    out.push_str(SUMMARY_HEADER);
    out.push('\n');

    for row in rows {
        out.push_str(&escape_field(&row.benchmark));
        out.push(',');
        out.push_str(&count_cell(row.initial_error_count));
        out.push(',');
        out.push_str(&count_cell(row.refactored_error_count));
        out.push(',');
        if let Some(reduction) = row.error_reduction {
            out.push_str(&reduction.to_string());
        }
        out.push(',');
        if let Some(percent) = row.error_reduction_percent {
            out.push_str(&format!("{:.2}", percent));
        }
        out.push('\n');
    }

    out
}

/// Parse a summary table.
///
/// Derived columns are recomputed from the counts under `policy`, so a
/// table written under one zero-baseline policy can be summarized under
/// another.
pub fn parse_summary(content: &str, policy: ZeroBaseline) -> Result<Vec<SummaryRow>> {
    let mut rows = Vec::new();

    for (line_no, fields) in records(content, SUMMARY_HEADER)? {
        if fields.len() < 3 {
            bail!("line {}: expected at least 3 fields, found {}", line_no, fields.len());
        }
        let benchmark = fields[0].clone();
        let initial = parse_count(&fields[1]).with_context(|| format!("line {}", line_no))?;
        let refactored = parse_count(&fields[2]).with_context(|| format!("line {}", line_no))?;
        rows.push(row_from_counts(benchmark, initial, refactored, policy));
    }

    Ok(rows)
}

/// Summary row from raw counts.
pub fn row_from_counts(
    benchmark: String,
    initial: Option<u64>,
    refactored: Option<u64>,
    policy: ZeroBaseline,
) -> SummaryRow {
    match (initial, refactored) {
        (Some(initial), Some(refactored)) => {
            SummaryRow::from_result(&BenchmarkResult::new(benchmark, initial, refactored), policy)
        }
        _ => SummaryRow {
            benchmark,
            initial_error_count: initial,
            refactored_error_count: refactored,
            error_reduction: None,
            error_reduction_percent: None,
        },
    }
}

pub fn write_summary(path: &Path, rows: &[SummaryRow]) -> Result<()> {
    write_table(path, &render_summary(rows))
}

pub fn read_summary(path: &Path, policy: ZeroBaseline) -> Result<Vec<SummaryRow>> {
    let content = read_table(path)?;
    parse_summary(&content, policy).with_context(|| format!("Malformed {}", path.display()))
}

pub fn render_baseline(entries: &[BaselineEntry]) -> String {
    let mut out = String::new();
    out.push_str(BASELINE_HEADER);
    out.push('\n');
    for entry in entries {
        out.push_str(&escape_field(&entry.benchmark));
        out.push(',');
        out.push_str(&count_cell(entry.initial_error_count));
        out.push('\n');
    }
    out
}

pub fn parse_baseline(content: &str) -> Result<Vec<BaselineEntry>> {
    let mut entries = Vec::new();
    for (line_no, fields) in records(content, BASELINE_HEADER)? {
        if fields.len() < 2 {
            bail!("line {}: expected 2 fields, found {}", line_no, fields.len());
        }
        entries.push(BaselineEntry {
            benchmark: fields[0].clone(),
            initial_error_count: parse_count(&fields[1])
                .with_context(|| format!("line {}", line_no))?,
        });
    }
    Ok(entries)
}

pub fn write_baseline(path: &Path, entries: &[BaselineEntry]) -> Result<()> {
    write_table(path, &render_baseline(entries))
}

pub fn read_baseline(path: &Path) -> Result<Vec<BaselineEntry>> {
    let content = read_table(path)?;
    parse_baseline(&content).with_context(|| format!("Malformed {}", path.display()))
}

pub fn render_refactor_status(statuses: &[RefactorStatus]) -> String {
    let mut out = String::new();
    out.push_str(REFACTOR_HEADER);
    out.push('\n');
    for status in statuses {
        out.push_str(&escape_field(&status.benchmark));
        out.push(',');
        out.push_str(if status.succeeded { "ok" } else { "failed" });
        out.push(',');
        out.push_str(&escape_field(&status.detail));
        out.push('\n');
    }
    out
}

pub fn parse_refactor_status(content: &str) -> Result<Vec<RefactorStatus>> {
    let mut statuses = Vec::new();
    for (line_no, fields) in records(content, REFACTOR_HEADER)? {
        if fields.len() < 2 {
            bail!("line {}: expected 3 fields, found {}", line_no, fields.len());
        }
        let succeeded = match fields[1].as_str() {
            "ok" => true,
            "failed" => false,
            other => bail!("line {}: unknown status '{}'", line_no, other),
        };
        statuses.push(RefactorStatus {
            benchmark: fields[0].clone(),
            succeeded,
            detail: fields.get(2).cloned().unwrap_or_default(),
        });
    }
    Ok(statuses)
}

pub fn write_refactor_status(path: &Path, statuses: &[RefactorStatus]) -> Result<()> {
    write_table(path, &render_refactor_status(statuses))
}

pub fn read_refactor_status(path: &Path) -> Result<Vec<RefactorStatus>> {
    let content = read_table(path)?;
    parse_refactor_status(&content).with_context(|| format!("Malformed {}", path.display()))
}

fn write_table(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn read_table(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn count_cell(count: Option<u64>) -> String {
    match count {
        Some(count) => count.to_string(),
        None => FAILED_SENTINEL.to_string(),
    }
}

/// `-999` and empty cells read back as `None`.
fn parse_count(cell: &str) -> Result<Option<u64>> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(None);
    }
    let value: i64 = cell
        .parse()
        .with_context(|| format!("invalid count '{}'", cell))?;
    if value == FAILED_SENTINEL {
        Ok(None)
    } else if value < 0 {
        bail!("negative count {}", value)
    } else {
        Ok(Some(value as u64))
    }
}

/// Data records with the 1-based line each starts on, after checking the
/// header. Quoted fields may span lines.
fn records(content: &str, header: &str) -> Result<Vec<(usize, Vec<String>)>> {
    let (first, rest) = content.split_once('\n').unwrap_or((content, ""));

    if first.trim().is_empty() && rest.is_empty() {
        bail!("empty table");
    }
    if first.trim_end() != header {
        bail!("unexpected header '{}', expected '{}'", first, header);
    }

    Ok(split_records(rest, 2))
}

/// Quote a field containing a separator, quote or line break.
fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split `content` into records, numbering lines from `first_line`.
/// Blank lines outside quotes are skipped.
fn split_records(content: &str, first_line: usize) -> Vec<(usize, Vec<String>)> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut line = first_line;
    let mut record_line = first_line;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
                finish_record(&mut records, record_line, std::mem::take(&mut fields));
                line += 1;
                record_line = line;
            }
            '\n' => {
                current.push(c);
                line += 1;
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() || !fields.is_empty() {
        fields.push(current);
        finish_record(&mut records, record_line, fields);
    }
    records
}

fn finish_record(records: &mut Vec<(usize, Vec<String>)>, line: usize, fields: Vec<String>) {
    let blank = fields.len() == 1 && fields[0].trim().is_empty();
    if !blank {
        records.push((line, fields));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DatasetOutcome, Stage};
    use tempfile::TempDir;

    fn scenario_rows(policy: ZeroBaseline) -> Vec<SummaryRow> {
        let outcomes = vec![
            DatasetOutcome::Completed(BenchmarkResult::new("bar", 0, 0)),
            DatasetOutcome::failed("baz", Stage::Refactor, "timed out", Some(7)),
            DatasetOutcome::Completed(BenchmarkResult::new("foo", 3, 1)),
        ];
        crate::analysis::summary_rows(&outcomes, policy)
    }

    #[test]
    fn test_render_summary() {
        let csv = render_summary(&scenario_rows(ZeroBaseline::Exclude));
        assert_eq!(
            csv,
            "benchmark,initial_error_count,refactored_error_count,error_reduction,error_reduction_percent\n\
             bar,0,0,0,\n\
             baz,7,-999,,\n\
             foo,3,1,2,66.67\n"
        );
    }

    #[test]
    fn test_render_summary_zero_policy() {
        let csv = render_summary(&scenario_rows(ZeroBaseline::Zero));
        assert!(csv.contains("\nbar,0,0,0,0.00\n"));
    }

    #[test]
    fn test_summary_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("results/summary.csv");
        let rows = scenario_rows(ZeroBaseline::Exclude);
        write_summary(&path, &rows).unwrap();

        let parsed = read_summary(&path, ZeroBaseline::Exclude).unwrap();
        assert_eq!(parsed, rows);

        // derived columns follow the policy used for reading
        let zero = read_summary(&path, ZeroBaseline::Zero).unwrap();
        assert_eq!(zero[0].error_reduction_percent, Some(0.0));
    }

    #[test]
    fn test_parse_summary_rejects_bad_input() {
        assert!(parse_summary("", ZeroBaseline::Exclude).is_err());
        assert!(parse_summary("name,count\nfoo,1\n", ZeroBaseline::Exclude).is_err());
        let bad = format!("{}\nfoo,three,1,,\n", SUMMARY_HEADER);
        assert!(parse_summary(&bad, ZeroBaseline::Exclude).is_err());
    }

    #[test]
    fn test_baseline() {
        let entries = vec![
            BaselineEntry {
                benchmark: "foo".to_string(),
                initial_error_count: Some(3),
            },
            BaselineEntry {
                benchmark: "qux".to_string(),
                initial_error_count: None,
            },
        ];
        let csv = render_baseline(&entries);
        assert_eq!(csv, "benchmark,initial_error_count\nfoo,3\nqux,-999\n");
        assert_eq!(parse_baseline(&csv).unwrap(), entries);
    }

    #[test]
    fn test_refactor_status_quotes_detail() {
        let statuses = vec![
            RefactorStatus::ok("foo"),
            RefactorStatus::failed("baz", "refactor exited with exit status: 1, \"oops\""),
        ];
        let csv = render_refactor_status(&statuses);
        assert!(csv.contains("baz,failed,\"refactor exited with exit status: 1, \"\"oops\"\"\"\n"));
        assert_eq!(parse_refactor_status(&csv).unwrap(), statuses);
    }

    #[test]
    fn test_split_records() {
        let fields = |content: &str| -> Vec<Vec<String>> {
            split_records(content, 2).into_iter().map(|(_, f)| f).collect()
        };
        assert_eq!(fields("a,,c\n"), vec![vec!["a", "", "c"]]);
        assert_eq!(fields("\"x,y\",z"), vec![vec!["x,y", "z"]]);
        assert_eq!(fields("a,b\r\n\r\nc,d\r\n"), vec![vec!["a", "b"], vec!["c", "d"]]);
        assert!(fields("").is_empty());

        let lines: Vec<usize> = split_records("a\n\"b\nc\"\nd\n", 2)
            .into_iter()
            .map(|(line, _)| line)
            .collect();
        assert_eq!(lines, vec![2, 3, 5]);
    }

    #[test]
    fn test_multiline_detail_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("refactor.csv");
        let statuses = vec![
            RefactorStatus::failed("foo", "line one\nline two"),
            RefactorStatus::failed("bar", "crlf\r\nsplit"),
            RefactorStatus::ok("qux"),
        ];

        write_refactor_status(&path, &statuses).unwrap();
        assert_eq!(read_refactor_status(&path).unwrap(), statuses);
    }

    #[test]
    fn test_unterminated_quote_reports_start_line() {
        let csv = format!("{}\nfoo,bogus,\"open\n\nstill open", REFACTOR_HEADER);
        let err = parse_refactor_status(&csv).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
