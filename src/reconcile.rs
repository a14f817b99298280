use log::debug;

use crate::build::{Build, BuildGroups, Plan, RecordedGroups};

/// A CI build with no counterpart record in the tracker yet.
#[derive(Debug, Clone)]
pub struct Unrecorded {
    pub plan: Plan,
    pub build: Build,
    pub target_project: String,
}

/// Partition the CI build set against the tracker's baseline and return the
/// builds the tracker does not know about.
///
/// A CI build is unrecorded when its (target project, plan) group is absent
/// from the tracker baseline, or when the group exists but does not contain
/// the build's number. Matching is by build number only; timestamps, status
/// and duration are deliberately ignored because the tracker may hold a
/// record whose mutable fields were updated after creation. The CI side is
/// authoritative for existence, not for those fields.
///
/// Tracker records with no counterpart in the CI set are ignored: both sides
/// are queried with independently bounded windows, so such records are
/// expected whenever a build falls outside the current CI window. This
/// function is not a data-loss detector.
///
/// Pure over already-parsed inputs; never fails, for any combination of
/// empty or missing groups. Output order is unspecified; the orchestrator
/// establishes post order.
pub fn reconcile(source_builds: &BuildGroups, tracker_builds: &RecordedGroups) -> Vec<Unrecorded> {
    let mut unrecorded = Vec::new();

    for (key, group) in source_builds {
        let known = tracker_builds.get(key);
        for build in &group.builds {
            if let Some(recorded) = known {
                if recorded.contains(build.number) {
                    debug!("{} #{} already reflected", key, build.number);
                    continue;
                }
            }
            unrecorded.push(Unrecorded {
                plan: group.plan.clone(),
                build: build.clone(),
                target_project: key.target_project.clone(),
            });
        }
    }

    unrecorded
}
