//! Per-kind error aggregation.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use vigil_common::duration_millis;
use vigil_common::{AppError, ErrorKind, ErrorSeverity};

/// Aggregated occurrences of one error kind.
///
/// `count` is the lifetime total; `recent` only holds timestamps inside the
/// retention window (and at most `max_entries_per_kind` of them).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorMetric {
    pub error_type: ErrorKind,
    pub count: u64,
    pub first_occurred: DateTime<Utc>,
    pub last_occurred: DateTime<Utc>,
    #[serde(with = "duration_millis")]
    pub average_interval: Duration,
    pub severity_counts: BTreeMap<ErrorSeverity, u64>,
    pub last_message: String,
    recent: VecDeque<DateTime<Utc>>,
}

impl ErrorMetric {
    pub(crate) fn new(error: &AppError) -> Self {
        let at = error.timestamp();
        Self {
            error_type: error.kind(),
            count: 0,
            first_occurred: at,
            last_occurred: at,
            average_interval: Duration::ZERO,
            severity_counts: BTreeMap::new(),
            last_message: String::new(),
            recent: VecDeque::new(),
        }
    }

    pub(crate) fn record(&mut self, error: &AppError, max_entries: usize) {
        let at = error.timestamp();

        self.count += 1;
        self.first_occurred = self.first_occurred.min(at);
        self.last_occurred = self.last_occurred.max(at);
        *self.severity_counts.entry(error.severity()).or_insert(0) += 1;
        self.last_message = error.message().to_string();

        self.recent.push_back(at);
        while self.recent.len() > max_entries {
            self.recent.pop_front();
        }

        let span = (self.last_occurred - self.first_occurred).to_std().unwrap_or_default();
        let intervals = u32::try_from(self.count.saturating_sub(1).max(1)).unwrap_or(u32::MAX);
        self.average_interval = span / intervals;
    }

    /// Drop occurrences older than `cutoff`.
    pub(crate) fn prune(&mut self, cutoff: DateTime<Utc>) {
        self.recent.retain(|at| *at >= cutoff);
    }

    /// Retained occurrence timestamps, oldest first.
    pub fn occurrences(&self) -> impl Iterator<Item = &DateTime<Utc>> + '_ {
        self.recent.iter()
    }

    /// Retained occurrences at or after `since`.
    pub fn count_since(&self, since: DateTime<Utc>) -> usize {
        self.recent.iter().filter(|at| **at >= since).count()
    }

    pub fn retained(&self) -> usize {
        self.recent.len()
    }
}

/// Start of a window of length `window` ending at `now`.
pub(crate) fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("valid timestamp")
    }

    fn network_at(secs: i64) -> AppError {
        AppError::connection("refused").with_timestamp(at(secs))
    }

    #[test]
    fn test_average_interval() {
        let first = network_at(0);
        let mut metric = ErrorMetric::new(&first);
        metric.record(&first, 10);
        assert_eq!(metric.average_interval, Duration::ZERO);

        metric.record(&network_at(10), 10);
        metric.record(&network_at(30), 10);

        assert_eq!(metric.count, 3);
        assert_eq!(metric.first_occurred, at(0));
        assert_eq!(metric.last_occurred, at(30));
        assert_eq!(metric.average_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_ring_is_bounded() {
        let first = network_at(0);
        let mut metric = ErrorMetric::new(&first);
        for secs in 0..5 {
            metric.record(&network_at(secs), 3);
        }

        assert_eq!(metric.count, 5);
        assert_eq!(metric.retained(), 3);
        assert_eq!(metric.occurrences().next(), Some(&at(2)));
    }

    #[test]
    fn test_prune_and_count_since() {
        let first = network_at(0);
        let mut metric = ErrorMetric::new(&first);
        for secs in [0, 10, 20, 30] {
            metric.record(&network_at(secs), 100);
        }

        assert_eq!(metric.count_since(at(15)), 2);
        metric.prune(at(10));
        assert_eq!(metric.retained(), 3);
        assert_eq!(metric.count, 4, "lifetime count survives pruning");
    }

    #[test]
    fn test_severity_breakdown() {
        let first = AppError::api(503, "/a", "down");
        let mut metric = ErrorMetric::new(&first);
        metric.record(&first, 10);
        metric.record(&AppError::api(404, "/a", "missing"), 10);
        metric.record(&AppError::api(500, "/a", "boom"), 10);

        assert_eq!(metric.severity_counts.get(&ErrorSeverity::Critical), Some(&2));
        assert_eq!(metric.severity_counts.get(&ErrorSeverity::Medium), Some(&1));
        assert_eq!(metric.last_message, "boom");
    }

    #[test]
    fn test_window_start_saturates() {
        let now = at(0);
        assert_eq!(window_start(now, Duration::from_secs(60)), at(-60));
        assert_eq!(window_start(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }
}
