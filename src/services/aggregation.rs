//! Windowed aggregate metrics over collected observations
//!
//! Pure computation over slices the caller has already loaded; the collector
//! runs it under a read lock. An empty dataset yields zeroed metrics, never
//! an error.

use crate::domain::session::{CheckInRecord, ObservationSummary};
use rustc_hash::FxHashSet;
use serde::Serialize;

/// Half-open time window `[start_ms, end_ms)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl TimeWindow {
    /// Window covering all of time
    pub fn all() -> Self {
        Self { start_ms: 0, end_ms: u64::MAX }
    }

    /// Window from the most recent UTC midnight to now
    pub fn today_utc(now_ms: u64) -> Self {
        const DAY_MS: u64 = 86_400_000;
        Self { start_ms: now_ms - now_ms % DAY_MS, end_ms: now_ms.saturating_add(1) }
    }

    #[inline]
    pub fn contains(&self, at_ms: u64) -> bool {
        at_ms >= self.start_ms && at_ms < self.end_ms
    }
}

/// Aggregate engagement metrics for one window
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AggregateMetrics {
    /// Markers with at least one summary in the window
    pub distinct_visitors: usize,
    /// Mean total dwell per summary (integer ms, 0 when empty)
    pub avg_dwell_ms: u64,
    /// Mean dwell per zone per summary, indexed by `ZoneIndex - 1`
    pub zone_avg_ms: Vec<u64>,
    /// Artwork id with the most summaries, `"N/A"` when empty
    pub most_visited: String,
    pub summary_count: usize,
    /// Visit sessions whose check-in falls inside the window
    pub visit_count: usize,
}

impl AggregateMetrics {
    pub fn empty(zone_count: u8) -> Self {
        Self {
            distinct_visitors: 0,
            avg_dwell_ms: 0,
            zone_avg_ms: vec![0; zone_count as usize],
            most_visited: "N/A".to_string(),
            summary_count: 0,
            visit_count: 0,
        }
    }
}

/// Compute aggregate metrics over the given window
pub fn compute(
    summaries: &[ObservationSummary],
    visits: &[CheckInRecord],
    window: TimeWindow,
    zone_count: u8,
) -> AggregateMetrics {
    let in_window: Vec<&ObservationSummary> =
        summaries.iter().filter(|s| window.contains(s.report_ms)).collect();
    let visit_count = visits.iter().filter(|v| window.contains(v.check_in_ms)).count();

    if in_window.is_empty() {
        let mut metrics = AggregateMetrics::empty(zone_count);
        metrics.visit_count = visit_count;
        return metrics;
    }

    let count = in_window.len() as u64;
    let distinct: FxHashSet<_> = in_window.iter().map(|s| s.marker_id).collect();

    let total: u64 = in_window.iter().map(|s| s.total_ms).sum();

    let mut zone_sums = vec![0u64; zone_count as usize];
    for summary in &in_window {
        for (bucket, ms) in summary.zone_ms.iter().enumerate().take(zone_sums.len()) {
            zone_sums[bucket] += ms;
        }
    }

    // Most-summarized artwork; earliest first-seen wins ties, so only a
    // strictly greater count replaces the current best
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for summary in &in_window {
        match counts.iter_mut().find(|(a, _)| *a == summary.artwork_id) {
            Some((_, n)) => *n += 1,
            None => counts.push((summary.artwork_id.as_str(), 1)),
        }
    }
    let mut most_visited = "N/A".to_string();
    let mut best = 0usize;
    for &(artwork, n) in &counts {
        if n > best {
            best = n;
            most_visited = artwork.to_string();
        }
    }

    AggregateMetrics {
        distinct_visitors: distinct.len(),
        avg_dwell_ms: total / count,
        zone_avg_ms: zone_sums.into_iter().map(|s| s / count).collect(),
        most_visited,
        summary_count: in_window.len(),
        visit_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::MarkerId;

    fn summary(artwork: &str, marker: u32, zone_ms: Vec<u64>, report_ms: u64) -> ObservationSummary {
        let total_ms = zone_ms.iter().sum();
        ObservationSummary {
            camera_id: "pi_001".to_string(),
            artwork_id: artwork.to_string(),
            marker_id: MarkerId(marker),
            zone_ms,
            total_ms,
            report_ms,
        }
    }

    #[test]
    fn test_empty_dataset_yields_zeroes() {
        let metrics = compute(&[], &[], TimeWindow::all(), 3);

        assert_eq!(metrics.distinct_visitors, 0);
        assert_eq!(metrics.avg_dwell_ms, 0);
        assert_eq!(metrics.zone_avg_ms, vec![0, 0, 0]);
        assert_eq!(metrics.most_visited, "N/A");
        assert_eq!(metrics.summary_count, 0);
        assert_eq!(metrics.visit_count, 0);
    }

    #[test]
    fn test_basic_aggregation() {
        let summaries = vec![
            summary("sunflowers", 1, vec![6000, 0, 0], 100),
            summary("sunflowers", 1, vec![0, 4000, 0], 200),
            summary("irises", 2, vec![0, 0, 2000], 300),
        ];
        let visits = vec![CheckInRecord::new(MarkerId(1), 150)];

        let metrics = compute(&summaries, &visits, TimeWindow::all(), 3);

        assert_eq!(metrics.distinct_visitors, 2);
        assert_eq!(metrics.summary_count, 3);
        assert_eq!(metrics.avg_dwell_ms, 4000);
        assert_eq!(metrics.zone_avg_ms, vec![2000, 1333, 666]);
        assert_eq!(metrics.most_visited, "sunflowers");
        assert_eq!(metrics.visit_count, 1);
    }

    #[test]
    fn test_window_filters_summaries_and_visits() {
        let summaries = vec![
            summary("sunflowers", 1, vec![1000, 0, 0], 500),
            summary("irises", 2, vec![3000, 0, 0], 5000),
        ];
        let mut old_visit = CheckInRecord::new(MarkerId(1), 400);
        old_visit.check_out(450);
        let visits = vec![old_visit, CheckInRecord::new(MarkerId(2), 5100)];

        let window = TimeWindow { start_ms: 1000, end_ms: 10_000 };
        let metrics = compute(&summaries, &visits, window, 3);

        assert_eq!(metrics.distinct_visitors, 1);
        assert_eq!(metrics.summary_count, 1);
        assert_eq!(metrics.avg_dwell_ms, 3000);
        assert_eq!(metrics.most_visited, "irises");
        assert_eq!(metrics.visit_count, 1);
    }

    #[test]
    fn test_most_visited_tie_keeps_first_seen() {
        let summaries = vec![
            summary("sunflowers", 7, vec![1000, 0, 0], 100),
            summary("irises", 9, vec![1000, 0, 0], 200),
            summary("irises", 9, vec![1000, 0, 0], 300),
            summary("sunflowers", 7, vec![1000, 0, 0], 400),
        ];

        let metrics = compute(&summaries, &[], TimeWindow::all(), 3);
        assert_eq!(metrics.most_visited, "sunflowers");
    }

    #[test]
    fn test_most_visited_counts_per_artwork_not_per_marker() {
        // Three visitors each summarized once at one artwork outweigh one
        // visitor summarized twice at another
        let summaries = vec![
            summary("irises", 5, vec![1000, 0, 0], 100),
            summary("irises", 5, vec![1000, 0, 0], 200),
            summary("sunflowers", 1, vec![1000, 0, 0], 300),
            summary("sunflowers", 2, vec![1000, 0, 0], 400),
            summary("sunflowers", 3, vec![1000, 0, 0], 500),
        ];

        let metrics = compute(&summaries, &[], TimeWindow::all(), 3);
        assert_eq!(metrics.most_visited, "sunflowers");
        assert_eq!(metrics.distinct_visitors, 4);
    }

    #[test]
    fn test_today_window() {
        const DAY_MS: u64 = 86_400_000;
        let now = 3 * DAY_MS + 5000;
        let window = TimeWindow::today_utc(now);

        assert!(window.contains(3 * DAY_MS));
        assert!(window.contains(now));
        assert!(!window.contains(3 * DAY_MS - 1));
        assert!(!window.contains(now + 1000));
    }

    #[test]
    fn test_short_zone_vectors_tolerated() {
        // A summary from a differently configured observer
        let summaries = vec![summary("sunflowers", 1, vec![2000], 100)];

        let metrics = compute(&summaries, &[], TimeWindow::all(), 3);
        assert_eq!(metrics.zone_avg_ms, vec![2000, 0, 0]);
        assert_eq!(metrics.avg_dwell_ms, 2000);
    }
}
