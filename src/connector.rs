use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, error, info, warn};
use std::collections::HashMap;

use crate::build::{BuildGroups, GroupKey, PlanBuilds};
use crate::config::Config;
use crate::error::Result;
use crate::providers::{BuildSource, BuildTracker, TrackerBuild};
use crate::reconcile::{reconcile, Unrecorded};
use crate::window::ref_times;

/// What one run did, or in preview mode, what it would have done.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// True once the run completed; partial post failures still count as a
    /// completed run with a smaller posted count.
    pub ok: bool,
    /// Newly created tracker records, per (target project, plan) group.
    pub posted: IndexMap<GroupKey, Vec<TrackerBuild>>,
    /// Builds a preview run would have posted.
    pub would_post: usize,
    /// Builds found already recorded by the per-post re-check.
    pub skipped_existing: usize,
    /// Builds skipped because they had not reached a terminal state.
    pub skipped_unfinished: usize,
    /// Builds skipped by the per-plan cap.
    pub skipped_capped: usize,
}

impl RunSummary {
    pub fn posted_count(&self) -> usize {
        self.posted.values().map(Vec::len).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Posted,
    Skipped,
}

/// Fetch and group the qualifying CI builds for one run.
///
/// Per-plan failures are fail-soft: the plan contributes nothing this run
/// and the run carries on. Builds whose completion time is before `since`
/// are discarded (the boundary itself is kept); the rest are ordered oldest
/// first per plan. No ordering is assumed from the backend, the full page is
/// scanned and sorted here.
pub(crate) async fn collect_source_builds<S: BuildSource>(
    source: &S,
    config: &Config,
    since: DateTime<Utc>,
) -> BuildGroups {
    let plans = match source.list_plans().await {
        Ok(plans) => plans,
        Err(e) => {
            error!("Plan discovery failed: {e}; the source contributes nothing this run");
            return BuildGroups::new();
        }
    };

    let mut groups = BuildGroups::new();
    for plan in plans {
        let Some(target_project) = config.target_project_for(&plan.project) else {
            debug!("Plan '{}' has no project mapping, skipping", plan.full_name);
            continue;
        };
        let target_project = target_project.to_string();

        let builds = match source.list_builds(&plan, since).await {
            Ok(builds) => builds,
            Err(e) => {
                warn!("Skipping plan {} this run: {e}", plan.key);
                continue;
            }
        };

        let mut qualifying: Vec<_> = builds
            .into_iter()
            .filter(|b| b.completed >= since)
            .collect();
        if qualifying.is_empty() {
            debug!("{}: no qualifying builds since {}", plan.key, since);
            continue;
        }
        qualifying.sort_by_key(|b| (b.completed, b.number));

        debug!("{}: {} qualifying builds", plan.key, qualifying.len());
        groups.insert(
            GroupKey::new(target_project, plan.name.clone()),
            PlanBuilds {
                plan,
                builds: qualifying,
            },
        );
    }
    groups
}

/// Sequences one sync run: resolve the time windows, fetch both sides,
/// reconcile, and post the unrecorded builds in chronological order.
pub struct Connector<S, T> {
    source: S,
    tracker: T,
    config: Config,
}

impl<S: BuildSource, T: BuildTracker> Connector<S, T> {
    pub fn new(source: S, tracker: T, config: Config) -> Self {
        Self {
            source,
            tracker,
            config,
        }
    }

    /// Establish both connections and check the configured target projects
    /// exist. Any failure here is fatal; no fetch has happened yet.
    pub async fn connect_and_validate(&mut self) -> Result<()> {
        let backend_version = self.source.connect().await?;
        self.tracker
            .connect(self.source.name(), &backend_version)
            .await?;
        self.tracker
            .validate_projects(&self.config.target_projects())
            .await?;
        info!("Initialization complete: delegate connections operational, ready to reflect builds");
        Ok(())
    }

    /// One reconciliation run against the given last-successful-run time.
    ///
    /// The two fetches are independent and run concurrently; reconciliation
    /// starts once both have completed. Posting is strictly sequential so
    /// the per-post existence re-check sees the effect of earlier posts in
    /// the same run. Callers must ensure only one run operates against a
    /// given config at a time; the existence check is read-then-write, not
    /// atomic.
    pub async fn run(&self, last_run: DateTime<Utc>) -> Result<RunSummary> {
        let preview = self.config.service.preview;
        let max_builds = self.config.service.max_builds;
        if preview {
            info!("***** Preview Mode *****   (no builds will be created in the tracker)");
        }

        let windows = ref_times(
            last_run,
            self.config.source_lookback(),
            self.config.tracker_lookback(),
        );
        debug!(
            "Reference times: source {} tracker {}",
            windows.source, windows.tracker
        );
        let target_projects = self.config.target_projects();

        let (source_builds, tracker_builds) = futures::join!(
            collect_source_builds(&self.source, &self.config, windows.source),
            self.tracker.recent_builds(windows.tracker, &target_projects),
        );
        let tracker_builds = tracker_builds?;

        let mut unrecorded = reconcile(&source_builds, &tracker_builds);
        info!("unrecorded builds count: {}", unrecorded.len());
        info!("no more than {max_builds} builds per plan will be recorded on this run");

        // Global chronological order across all plans; ties broken by
        // project, then plan, so "recently added" listings downstream read
        // in causal order.
        unrecorded.sort_by(|a, b| {
            (a.build.completed, &a.target_project, &a.plan.name)
                .cmp(&(b.build.completed, &b.target_project, &b.plan.name))
        });

        let mut summary = RunSummary::default();
        // Cap budget is keyed like every other grouping: plan name alone
        // would make same-named plans in different projects share a budget.
        let mut posted_per_plan: HashMap<GroupKey, usize> = HashMap::new();

        for item in &unrecorded {
            let plan_name = &item.plan.name;
            let group = GroupKey::new(item.target_project.clone(), plan_name.clone());
            if !item.build.finished {
                warn!(
                    "{} #{} was not processed because it is still running",
                    plan_name, item.build.number
                );
                summary.skipped_unfinished += 1;
                continue;
            }

            let posted_for_plan = posted_per_plan.entry(group.clone()).or_insert(0);
            if *posted_for_plan >= max_builds {
                debug!(
                    "{} #{} skipped, per-plan cap of {max_builds} reached",
                    plan_name, item.build.number
                );
                summary.skipped_capped += 1;
                continue;
            }

            if preview {
                info!(
                    "Preview: would add {} #{} ({}) to {}",
                    plan_name, item.build.number, item.build.state, item.target_project
                );
                // Counts toward the cap so the preview mirrors a real run.
                *posted_for_plan += 1;
                summary.would_post += 1;
                continue;
            }

            match self.post_build(item).await {
                Ok((record, PostOutcome::Posted)) => {
                    *posted_for_plan += 1;
                    summary.posted.entry(group).or_default().push(record);
                }
                Ok((_, PostOutcome::Skipped)) => {
                    summary.skipped_existing += 1;
                }
                // A failed post skips that one build; it does not consume
                // cap budget and the run carries on.
                Err(e) => {
                    error!("Failed to post {} #{}: {e}", plan_name, item.build.number);
                }
            }
        }

        summary.ok = true;
        info!(
            "Run complete: {} posted, {} already recorded, {} unfinished, {} over cap",
            summary.posted_count(),
            summary.skipped_existing,
            summary.skipped_unfinished,
            summary.skipped_capped
        );
        Ok(summary)
    }

    /// Post one build: resolve its prerequisites, re-check existence, then
    /// create. The re-check makes re-running after a partial failure safe.
    async fn post_build(&self, item: &Unrecorded) -> Result<(TrackerBuild, PostOutcome)> {
        let prereqs = self
            .tracker
            .prepare_build(&item.plan, &item.build.revisions, &item.target_project)
            .await?;

        if let Some(existing) = self
            .tracker
            .build_exists(&prereqs.definition, item.build.number)
            .await?
        {
            debug!(
                "Build #{} for {} already recorded, skipping...",
                item.build.number, item.plan.name
            );
            return Ok((existing, PostOutcome::Skipped));
        }

        let created = self
            .tracker
            .create_build(&prereqs.definition, &item.build, &prereqs.changesets)
            .await?;
        Ok((created, PostOutcome::Posted))
    }
}
