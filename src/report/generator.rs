//! Markdown, JSON and console report generation.
//!
//! This module renders the benchmark report produced after the final
//! analysis from the aggregated rows and summary.

use crate::models::{DatasetFailure, Report, ReportMetadata, Summary, SummaryRow, ZeroBaseline};
use anyhow::{Context, Result};
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# VGRTool NullAway Benchmark Report\n\n");

    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_summary_section(&report.summary));
    output.push_str(&generate_ranking_section(
        "Largest Percentage Reductions",
        &report.summary.top_by_percent,
    ));
    output.push_str(&generate_ranking_section(
        "Largest Absolute Reductions",
        &report.summary.top_by_reduction,
    ));
    output.push_str(&generate_ranking_section(
        "Smallest Absolute Reductions",
        &report.summary.bottom_by_reduction,
    ));
    output.push_str(&generate_failures_section(&report.summary, &report.failures));
    output.push_str(&generate_results_section(&report.rows));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Benchmark Root:** `{}`\n", metadata.root));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!(
        "- **Refactoring Module:** `{}`\n",
        metadata.refactoring_module
    ));
    section.push_str(&format!(
        "- **Error Pattern:** `{}`\n",
        metadata.error_pattern
    ));
    section.push_str(&format!(
        "- **Zero Baseline:** {}\n",
        match metadata.zero_baseline {
            ZeroBaseline::Exclude => "excluded from the percentage mean",
            ZeroBaseline::Zero => "counted as 0%",
        }
    ));
    section.push_str(&format!("- **Jobs:** {}\n", metadata.jobs));
    if metadata.duration_seconds > 0.0 {
        section.push_str(&format!(
            "- **Duration:** {:.1}s\n",
            metadata.duration_seconds
        ));
    }
    section.push('\n');

    section
}

/// Generate the summary section.
fn generate_summary_section(summary: &Summary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Datasets | Completed | Failed | Errors Before | Errors After |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} |\n\n",
        summary.datasets,
        summary.completed,
        summary.failed.len(),
        summary.total_initial,
        summary.total_refactored
    ));

    section.push_str(&format!(
        "- **Average Error Reduction:** {}\n",
        format_mean(summary.mean_error_reduction, "")
    ));
    section.push_str(&format!(
        "- **Average Error Reduction (Percent):** {} over {} datasets\n\n",
        format_mean(summary.mean_error_reduction_percent, "%"),
        summary.percent_samples
    ));

    section
}

/// Generate a ranking table.
fn generate_ranking_section(title: &str, rows: &[SummaryRow]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str(&format!("### {}\n\n", title));
    section.push_str(&table(rows));
    section.push('\n');
    section
}

/// Generate the failed datasets section.
fn generate_failures_section(summary: &Summary, failures: &[DatasetFailure]) -> String {
    if summary.failed.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Failed Datasets\n\n");
    section.push_str("These datasets are excluded from every average and ranking.\n\n");

    if failures.is_empty() {
        for name in &summary.failed {
            section.push_str(&format!("- `{}`\n", name));
        }
    } else {
        section.push_str("| Benchmark | Stage | Reason |\n");
        section.push_str("|:---|:---|:---|\n");
        for failure in failures {
            section.push_str(&format!(
                "| `{}` | {} | {} |\n",
                failure.name,
                failure.stage,
                failure.reason.replace('|', "\\|").replace('\n', " ")
            ));
        }
    }
    section.push('\n');

    section
}

/// Generate the full results table.
fn generate_results_section(rows: &[SummaryRow]) -> String {
    let mut section = String::new();

    section.push_str("## All Results\n\n");
    if rows.is_empty() {
        section.push_str("No datasets were benchmarked.\n\n");
        return section;
    }

    section.push_str("<details>\n<summary>Per-dataset counts</summary>\n\n");
    section.push_str(&table(rows));
    section.push_str("\n</details>\n\n");

    section
}

fn table(rows: &[SummaryRow]) -> String {
    let mut out = String::new();
    out.push_str("| Benchmark | Before | After | Reduction | Reduction % |\n");
    out.push_str("|:---|---:|---:|---:|---:|\n");
    for row in rows {
        out.push_str(&format!(
            "| `{}` | {} | {} | {} | {} |\n",
            row.benchmark,
            cell(row.initial_error_count),
            cell(row.refactored_error_count),
            cell(row.error_reduction),
            row.error_reduction_percent
                .map(|p| format!("{:.2}%", p))
                .unwrap_or_else(|| "-".to_string())
        ));
    }
    out
}

fn cell<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_mean(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{:.2}{}", v, unit),
        None => "n/a".to_string(),
    }
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by vgr-bench v{}*\n",
        env!("CARGO_PKG_VERSION")
    ));

    footer
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// Write the report in the requested format.
pub fn write_report(report: &Report, format: crate::cli::OutputFormat, path: &Path) -> Result<()> {
    let content = match format {
        crate::cli::OutputFormat::Json => generate_json_report(report)?,
        crate::cli::OutputFormat::Markdown => generate_markdown_report(report),
    };

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

/// Console summary printed after a run.
pub fn console_summary(summary: &Summary) -> String {
    let mut out = String::new();

    out.push_str("📊 Benchmark Summary:\n");
    out.push_str(&format!(
        "   Datasets: {} ({} completed, {} failed)\n",
        summary.datasets,
        summary.completed,
        summary.failed.len()
    ));
    out.push_str(&format!(
        "   Errors: {} before, {} after\n",
        summary.total_initial, summary.total_refactored
    ));
    out.push_str(&format!(
        "   Average error reduction: {}\n",
        format_mean(summary.mean_error_reduction, "")
    ));
    out.push_str(&format!(
        "   Average error reduction (percent): {} ({} datasets)\n",
        format_mean(summary.mean_error_reduction_percent, "%"),
        summary.percent_samples
    ));

    if !summary.top_by_percent.is_empty() {
        out.push_str("   Largest percentage reductions:\n");
        for row in &summary.top_by_percent {
            out.push_str(&format!(
                "     {:<24} {:>6} -> {:<6} {:>8}\n",
                row.benchmark,
                cell(row.initial_error_count),
                cell(row.refactored_error_count),
                row.error_reduction_percent
                    .map(|p| format!("{:.2}%", p))
                    .unwrap_or_default()
            ));
        }
    }

    reduction_listing(&mut out, "Largest absolute reductions", &summary.top_by_reduction);
    reduction_listing(&mut out, "Smallest absolute reductions", &summary.bottom_by_reduction);

    if !summary.failed.is_empty() {
        out.push_str(&format!("   ⚠️  Failed: {}\n", summary.failed.join(", ")));
    }

    out
}

fn reduction_listing(out: &mut String, title: &str, rows: &[SummaryRow]) {
    if rows.is_empty() {
        return;
    }
    out.push_str(&format!("   {}:\n", title));
    for row in rows {
        out.push_str(&format!(
            "     {:<24} {:>6} -> {:<6} {:>8}\n",
            row.benchmark,
            cell(row.initial_error_count),
            cell(row.refactored_error_count),
            cell(row.error_reduction)
        ));
    }
}
