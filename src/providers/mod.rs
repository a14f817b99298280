pub mod agile_central;
pub mod bamboo;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::build::{Build, Plan, RecordedGroups, VcsRevision};
use crate::error::Result;

pub use agile_central::AgileCentralProvider;
pub use bamboo::BambooProvider;

/// A Build record held by the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerBuild {
    /// Object reference URL in the tracker
    pub obj_ref: String,
    pub number: i64,
    pub status: String,
}

/// The tracker object a build is filed under: one per (plan, target project).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDefinition {
    pub obj_ref: String,
    /// Plan name
    pub name: String,
    /// Target project name
    pub project: String,
}

/// A change set already known to the tracker, resolved from a CI-side
/// repository revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesetRef {
    pub obj_ref: String,
    pub revision: String,
}

/// Everything the tracker needs before a build can be posted.
#[derive(Debug, Clone)]
pub struct BuildPrerequisites {
    pub definition: BuildDefinition,
    pub changesets: Vec<ChangesetRef>,
}

/// The CI system the connector reads builds from.
///
/// Implementations do the transport work; windowing, ordering and grouping
/// are applied by the orchestrator on top of these calls.
#[async_trait]
pub trait BuildSource {
    /// Human-readable backend name for logs and the tracker's integration
    /// headers.
    fn name(&self) -> &str;

    /// Verify reachability and return the backend version string.
    async fn connect(&mut self) -> Result<String>;

    /// Discover the plans in scope, per configured project mapping.
    async fn list_plans(&self) -> Result<Vec<Plan>>;

    /// All available build results for one plan. `since` is a hint only;
    /// callers re-filter against the reference time regardless of what the
    /// backend returns, and no result ordering is assumed.
    async fn list_builds(&self, plan: &Plan, since: DateTime<Utc>) -> Result<Vec<Build>>;
}

/// The tracking tool the connector writes build records to.
#[async_trait]
pub trait BuildTracker {
    /// Verify reachability, identifying this connector and its source
    /// backend to the tracker.
    async fn connect(&mut self, source_name: &str, source_version: &str) -> Result<()>;

    /// Check that every target project exists in the workspace. Fatal when
    /// one is missing; builds cannot be filed into a nonexistent project.
    async fn validate_projects(&mut self, target_projects: &[String]) -> Result<()>;

    /// Build records created at or after `since`, grouped by
    /// (target project, plan name). This is the baseline the reconciliation
    /// engine subtracts against.
    async fn recent_builds(
        &self,
        since: DateTime<Utc>,
        target_projects: &[String],
    ) -> Result<RecordedGroups>;

    /// Find or create the build definition for a plan and resolve the
    /// build's repository revisions to tracker change sets.
    async fn prepare_build(
        &self,
        plan: &Plan,
        revisions: &[VcsRevision],
        target_project: &str,
    ) -> Result<BuildPrerequisites>;

    /// Look up an existing record by build definition and number. This is
    /// the per-post race re-check, distinct from the bulk baseline fetch.
    async fn build_exists(
        &self,
        definition: &BuildDefinition,
        number: i64,
    ) -> Result<Option<TrackerBuild>>;

    /// Create one build record. One call, one round trip; no batching, no
    /// retries.
    async fn create_build(
        &self,
        definition: &BuildDefinition,
        build: &Build,
        changesets: &[ChangesetRef],
    ) -> Result<TrackerBuild>;
}
