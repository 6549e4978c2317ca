//! Text summary builder for CLI output.
//!
//! Formats human-readable lines for text mode from a completed run.

use crate::model::RunResult;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

const MAX_FAILURES_SHOWN: usize = 5;

/// Build a text summary from a run result.
pub(crate) fn build_text_summary(result: &RunResult) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!("Dataset: {}", result.dataset_id));
    if let Some(template) = result.template_id.as_deref() {
        lines.push(format!("Template: {}", template));
    }
    lines.push(format!(
        "Generated: {} ok, {} failed, {} skipped (of {} requested)",
        result.ok_count, result.failed_count, result.skipped_count, result.requested
    ));
    lines.push(format!("Appended: {}", result.appended));

    if let Some(lat) = result.latency.as_ref() {
        lines.push(format!(
            "Latency: avg {:.0} ms med {:.0} ms p25 {:.0} ms p75 {:.0} ms",
            lat.mean_ms, lat.median_ms, lat.p25_ms, lat.p75_ms
        ));
    }
    lines.push(format!(
        "Duration: {:.1}s",
        result.duration_ms as f64 / 1000.0
    ));

    let failures: Vec<_> = result
        .items
        .iter()
        .filter(|i| !i.ok && i.error.is_some())
        .collect();
    for item in failures.iter().take(MAX_FAILURES_SHOWN) {
        lines.push(format!(
            "  item {}: {}",
            item.index,
            item.error.as_deref().unwrap_or("unknown error")
        ));
    }
    if failures.len() > MAX_FAILURES_SHOWN {
        lines.push(format!(
            "  … and {} more failures",
            failures.len() - MAX_FAILURES_SHOWN
        ));
    }

    TextSummary { lines }
}
