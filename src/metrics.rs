use crate::model::LatencyStats;

/// Compute metrics (mean, median, 25th percentile, 75th percentile) from samples
pub fn compute_metrics(samples: &[f64]) -> Option<(f64, f64, f64, f64)> {
    if samples.len() < 2 {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let median = sorted[n / 2];
    let p25 = sorted[n / 4];
    let p75 = sorted[3 * n / 4];
    Some((mean, median, p25, p75))
}

/// Summarize per-request latencies; None when there are too few samples.
pub fn latency_stats_from_samples(samples: &[f64]) -> Option<LatencyStats> {
    let (mean_ms, median_ms, p25_ms, p75_ms) = compute_metrics(samples)?;
    Some(LatencyStats {
        mean_ms,
        median_ms,
        p25_ms,
        p75_ms,
    })
}
