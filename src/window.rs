use chrono::{DateTime, Duration, Utc};

/// Reference instants bounding "recent" activity on each side of the sync.
///
/// The two backends have different propagation and indexing delays, so each
/// gets its own safety margin subtracted from the last successful run. A
/// build that completed just before the last run on the CI side may not yet
/// be visible in the tracker's search index; the wider tracker margin covers
/// that gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefTimes {
    pub source: DateTime<Utc>,
    pub tracker: DateTime<Utc>,
}

/// Compute the reference times for one run. Pure; a zero lookback means the
/// reference time equals the last run exactly.
pub fn ref_times(
    last_run: DateTime<Utc>,
    source_lookback: Duration,
    tracker_lookback: Duration,
) -> RefTimes {
    RefTimes {
        source: last_run - source_lookback,
        tracker: last_run - tracker_lookback,
    }
}
