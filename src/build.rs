use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Lifecycle state of a build, normalized across backends.
///
/// The CI side reports free-form state strings; the tracker accepts a small
/// fixed vocabulary. Anything that is neither a clear success nor a clear
/// failure maps to `Unknown`, except aborted/stopped builds which the tracker
/// models as `Incomplete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Successful,
    Failed,
    Incomplete,
    Unknown,
}

impl BuildState {
    /// Normalize a Bamboo `state` value.
    pub fn from_bamboo(raw: &str) -> Self {
        match raw {
            "Successful" => Self::Successful,
            "Failed" => Self::Failed,
            "Aborted" | "Stopped" => Self::Incomplete,
            _ => Self::Unknown,
        }
    }

    /// The status string the tracker expects on a Build record.
    pub fn tracker_status(self) -> &'static str {
        match self {
            Self::Successful => "SUCCESS",
            Self::Failed => "FAILURE",
            Self::Incomplete => "INCOMPLETE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tracker_status())
    }
}

/// A named, addressable build pipeline on the CI side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Short name, e.g. "Don Camillo"
    pub name: String,
    /// Fully qualified name, e.g. "Fernandel - Don Camillo"
    pub full_name: String,
    /// Parent CI project name
    pub project: String,
    /// Stable key used to address the REST API, e.g. "FER-DON"
    pub key: String,
    /// Browsable URL
    pub url: String,
}

/// A repository revision referenced by a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsRevision {
    pub repository: String,
    pub revision: String,
}

/// One execution of a build plan, parsed from a raw CI record.
///
/// Immutable after construction. `completed` falls back to `started` for
/// results the CI server has not finished yet; those never reach the tracker
/// (the orchestrator skips builds with `finished == false`) but still need a
/// timestamp for windowing and ordering.
#[derive(Debug, Clone)]
pub struct Build {
    /// Build number, monotonic within its plan
    pub number: i64,
    pub state: BuildState,
    pub started: DateTime<Utc>,
    pub completed: DateTime<Utc>,
    pub duration_ms: i64,
    /// Browsable URL
    pub url: String,
    /// Whether the build reached a terminal state
    pub finished: bool,
    pub revisions: Vec<VcsRevision>,
}

impl Build {
    /// Duration in seconds, the unit the tracker stores.
    pub fn duration_secs(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }
}

/// Grouping key for build sets on both sides of the sync.
///
/// (target project, plan name) is the prefix of the full matching key; the
/// build number completes it. A flat map on this key avoids the mismatched
/// nested-dict shapes that plagued deep `project -> plan -> builds` groupings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKey {
    pub target_project: String,
    pub plan_name: String,
}

impl GroupKey {
    pub fn new(target_project: impl Into<String>, plan_name: impl Into<String>) -> Self {
        Self {
            target_project: target_project.into(),
            plan_name: plan_name.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.target_project, self.plan_name)
    }
}

/// Builds fetched from the CI side for one (target project, plan) group,
/// oldest first.
#[derive(Debug, Clone)]
pub struct PlanBuilds {
    pub plan: Plan,
    pub builds: Vec<Build>,
}

/// CI-side build sets, keyed by (target project, plan name).
pub type BuildGroups = IndexMap<GroupKey, PlanBuilds>;

/// Build numbers already recorded in the tracker for one group, with the
/// status last seen on each record. Status is informational only; matching
/// is by number.
#[derive(Debug, Clone, Default)]
pub struct RecordedBuilds {
    numbers: HashSet<i64>,
    statuses: HashMap<i64, String>,
}

impl RecordedBuilds {
    pub fn insert(&mut self, number: i64, status: impl Into<String>) {
        self.numbers.insert(number);
        self.statuses.insert(number, status.into());
    }

    pub fn contains(&self, number: i64) -> bool {
        self.numbers.contains(&number)
    }

    pub fn status_of(&self, number: i64) -> Option<&str> {
        self.statuses.get(&number).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }
}

/// Tracker-side build sets, keyed like the CI side.
pub type RecordedGroups = IndexMap<GroupKey, RecordedBuilds>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_bamboo_state_normalization() {
        assert_eq!(BuildState::from_bamboo("Successful"), BuildState::Successful);
        assert_eq!(BuildState::from_bamboo("Failed"), BuildState::Failed);
        assert_eq!(BuildState::from_bamboo("Aborted"), BuildState::Incomplete);
        assert_eq!(BuildState::from_bamboo("Stopped"), BuildState::Incomplete);
        assert_eq!(BuildState::from_bamboo("Unknown"), BuildState::Unknown);
        assert_eq!(BuildState::from_bamboo("InProgress"), BuildState::Unknown);
    }

    #[test]
    fn test_tracker_status_strings() {
        assert_eq!(BuildState::Successful.tracker_status(), "SUCCESS");
        assert_eq!(BuildState::Failed.tracker_status(), "FAILURE");
        assert_eq!(BuildState::Incomplete.tracker_status(), "INCOMPLETE");
        assert_eq!(BuildState::Unknown.tracker_status(), "UNKNOWN");
    }

    #[test]
    fn test_duration_seconds() {
        let build = Build {
            number: 45,
            state: BuildState::Successful,
            started: Utc.with_ymd_and_hms(2017, 6, 12, 13, 50, 0).unwrap(),
            completed: Utc.with_ymd_and_hms(2017, 6, 12, 13, 55, 39).unwrap(),
            duration_ms: 339_500,
            url: "http://bamboo.example.com/browse/FER-DON-45".to_string(),
            finished: true,
            revisions: vec![],
        };
        assert!((build.duration_secs() - 339.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recorded_builds_membership() {
        let mut recorded = RecordedBuilds::default();
        assert!(recorded.is_empty());

        recorded.insert(45, "SUCCESS");
        recorded.insert(46, "FAILURE");

        assert_eq!(recorded.len(), 2);
        assert!(recorded.contains(45));
        assert!(!recorded.contains(47));
        assert_eq!(recorded.status_of(46), Some("FAILURE"));
        assert_eq!(recorded.status_of(47), None);
    }

    #[test]
    fn test_group_key_display() {
        let key = GroupKey::new("Rally Fernandel", "Don Camillo");
        assert_eq!(key.to_string(), "Rally Fernandel::Don Camillo");
    }
}
