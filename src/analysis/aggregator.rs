//! Result aggregation and statistics.
//!
//! This module turns per-dataset outcomes into summary rows and computes
//! averages and rankings over them.

use crate::models::{DatasetOutcome, Summary, SummaryRow, ZeroBaseline};
use std::cmp::Ordering;

/// Derive summary rows from outcomes, sorted by dataset name.
pub fn summary_rows(outcomes: &[DatasetOutcome], policy: ZeroBaseline) -> Vec<SummaryRow> {
    let mut rows: Vec<SummaryRow> = outcomes
        .iter()
        .map(|outcome| SummaryRow::from_outcome(outcome, policy))
        .collect();
    sort_by_name(&mut rows);
    rows
}

/// Sort rows by benchmark name.
pub fn sort_by_name(rows: &mut [SummaryRow]) {
    rows.sort_by(|a, b| a.benchmark.cmp(&b.benchmark));
}

/// Mean absolute reduction over complete rows.
pub fn mean_error_reduction(rows: &[SummaryRow]) -> Option<f64> {
    mean(
        rows.iter()
            .filter(|r| r.is_complete())
            .filter_map(|r| r.error_reduction)
            .map(|v| v as f64),
    )
}

/// Mean percentage reduction over complete rows with a defined percentage.
///
/// Rows whose percentage is `None` (zero baseline under the exclude
/// policy) or not finite are left out.
pub fn mean_error_reduction_percent(rows: &[SummaryRow]) -> (Option<f64>, usize) {
    let samples: Vec<f64> = rows
        .iter()
        .filter(|r| r.is_complete())
        .filter_map(|r| r.error_reduction_percent)
        .filter(|p| p.is_finite())
        .collect();
    (mean(samples.iter().copied()), samples.len())
}

/// Top `n` rows by percentage reduction, best first. Ties break by name.
pub fn top_by_percent(rows: &[SummaryRow], n: usize) -> Vec<SummaryRow> {
    let mut ranked: Vec<&SummaryRow> = rows
        .iter()
        .filter(|r| r.is_complete())
        .filter(|r| r.error_reduction_percent.is_some_and(f64::is_finite))
        .collect();

    ranked.sort_by(|a, b| {
        compare_f64(b.error_reduction_percent, a.error_reduction_percent)
            .then_with(|| a.benchmark.cmp(&b.benchmark))
    });

    ranked.into_iter().take(n).cloned().collect()
}

/// Top `n` rows by absolute reduction, largest first. Ties break by name.
pub fn top_by_reduction(rows: &[SummaryRow], n: usize) -> Vec<SummaryRow> {
    let mut ranked: Vec<&SummaryRow> = rows.iter().filter(|r| r.is_complete()).collect();

    ranked.sort_by(|a, b| {
        b.error_reduction
            .cmp(&a.error_reduction)
            .then_with(|| a.benchmark.cmp(&b.benchmark))
    });

    ranked.into_iter().take(n).cloned().collect()
}

/// Bottom `n` rows by absolute reduction, smallest first.
pub fn bottom_by_reduction(rows: &[SummaryRow], n: usize) -> Vec<SummaryRow> {
    let mut ranked: Vec<&SummaryRow> = rows.iter().filter(|r| r.is_complete()).collect();

    ranked.sort_by(|a, b| {
        a.error_reduction
            .cmp(&b.error_reduction)
            .then_with(|| a.benchmark.cmp(&b.benchmark))
    });

    ranked.into_iter().take(n).cloned().collect()
}

/// Compute the full summary.
pub fn summarize(
    rows: &[SummaryRow],
    top_n: usize,
    largest_n: usize,
    bottom_n: usize,
) -> Summary {
    let complete: Vec<&SummaryRow> = rows.iter().filter(|r| r.is_complete()).collect();
    let (mean_percent, percent_samples) = mean_error_reduction_percent(rows);

    Summary {
        datasets: rows.len(),
        completed: complete.len(),
        failed: rows
            .iter()
            .filter(|r| !r.is_complete())
            .map(|r| r.benchmark.clone())
            .collect(),
        total_initial: complete.iter().filter_map(|r| r.initial_error_count).sum(),
        total_refactored: complete
            .iter()
            .filter_map(|r| r.refactored_error_count)
            .sum(),
        mean_error_reduction: mean_error_reduction(rows),
        mean_error_reduction_percent: mean_percent,
        percent_samples,
        top_by_percent: top_by_percent(rows, top_n),
        top_by_reduction: top_by_reduction(rows, largest_n),
        bottom_by_reduction: bottom_by_reduction(rows, bottom_n),
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

fn compare_f64(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}
