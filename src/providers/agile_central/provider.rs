use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;

use crate::build::{Build, GroupKey, Plan, RecordedGroups, VcsRevision};
use crate::error::{Result, SyncError};
use crate::providers::{
    BuildDefinition, BuildPrerequisites, BuildTracker, ChangesetRef, TrackerBuild,
};

use super::client::AgileCentralClient;
use super::types::{RawChangeset, RawProject, RawTrackerBuild, RawWorkspace};

const BUILD_FETCH: &str = "Number,Status,CreationDate,BuildDefinition,Name,Project";

/// Timestamp format the WSAPI accepts in queries and object fields.
fn wsapi_instant(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Tracker-side connection: reads the recorded-build baseline and files new
/// Build records, one per call.
pub struct AgileCentralProvider {
    client: AgileCentralClient,
    workspace: String,
    workspace_ref: Option<String>,
    /// target project name -> object ref, resolved during validation
    project_refs: HashMap<String, String>,
}

impl AgileCentralProvider {
    pub fn new(base_url: &str, api_key: &str, workspace: &str) -> Result<Self> {
        Ok(Self {
            client: AgileCentralClient::new(base_url, api_key)?,
            workspace: workspace.to_string(),
            workspace_ref: None,
            project_refs: HashMap::new(),
        })
    }

    fn workspace_ref(&self) -> Option<&str> {
        self.workspace_ref.as_deref()
    }

    async fn find_build_definition(
        &self,
        plan_name: &str,
        target_project: &str,
    ) -> Result<Option<BuildDefinition>> {
        let query = format!(
            r#"((Name = "{plan_name}") AND (Project.Name = "{target_project}"))"#
        );
        let found: Vec<super::types::RawBuildDefinition> = self
            .client
            .query("builddefinition", &query, "Name,Project", self.workspace_ref())
            .await?;

        Ok(found.into_iter().next().map(|raw| BuildDefinition {
            obj_ref: raw.obj_ref,
            name: plan_name.to_string(),
            project: target_project.to_string(),
        }))
    }

    async fn create_build_definition(
        &self,
        plan: &Plan,
        target_project: &str,
    ) -> Result<BuildDefinition> {
        let project_ref = self.project_refs.get(target_project).ok_or_else(|| {
            SyncError::Config(format!(
                "target project '{target_project}' was not validated before use"
            ))
        })?;

        info!(
            "Creating build definition '{}' in project '{}'",
            plan.name, target_project
        );
        let mut fields = serde_json::json!({
            "Name": plan.name,
            "Project": project_ref,
            "Uri": plan.url,
        });
        if let Some(workspace_ref) = self.workspace_ref() {
            fields["Workspace"] = serde_json::Value::String(workspace_ref.to_string());
        }

        let created: super::types::RawBuildDefinition = self
            .client
            .create("builddefinition", "BuildDefinition", fields)
            .await?;

        Ok(BuildDefinition {
            obj_ref: created.obj_ref,
            name: plan.name.clone(),
            project: target_project.to_string(),
        })
    }

    async fn find_changesets(&self, revisions: &[VcsRevision]) -> Result<Vec<ChangesetRef>> {
        let mut changesets = Vec::new();
        for revision in revisions {
            let query = format!(r#"(Revision = "{}")"#, revision.revision);
            let found: Vec<RawChangeset> = self
                .client
                .query("changeset", &query, "Revision", self.workspace_ref())
                .await?;
            match found.into_iter().next() {
                Some(raw) => changesets.push(ChangesetRef {
                    obj_ref: raw.obj_ref,
                    revision: revision.revision.clone(),
                }),
                None => debug!(
                    "No changeset for revision {} ({}) in the tracker",
                    revision.revision, revision.repository
                ),
            }
        }
        Ok(changesets)
    }
}

#[async_trait]
impl BuildTracker for AgileCentralProvider {
    async fn connect(&mut self, source_name: &str, source_version: &str) -> Result<()> {
        info!("Connecting to AgileCentral");
        self.client
            .set_source_identification(source_name, source_version);

        let query = format!(r#"(Name = "{}")"#, self.workspace);
        let found: Vec<RawWorkspace> = self.client.query("workspace", &query, "Name", None).await?;
        let workspace = found.into_iter().next().ok_or_else(|| {
            SyncError::Config(format!(
                "Workspace '{}' was not found in the subscription",
                self.workspace
            ))
        })?;

        info!("Connected to AgileCentral workspace '{}'", self.workspace);
        self.workspace_ref = Some(workspace.obj_ref);
        Ok(())
    }

    async fn validate_projects(&mut self, target_projects: &[String]) -> Result<()> {
        let mut missing = Vec::new();
        for name in target_projects {
            let query = format!(r#"(Name = "{name}")"#);
            let found: Vec<RawProject> = self
                .client
                .query("project", &query, "Name", self.workspace_ref())
                .await?;
            match found.into_iter().next() {
                Some(raw) => {
                    self.project_refs.insert(name.clone(), raw.obj_ref);
                }
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(SyncError::Config(format!(
                "These target projects do not exist in workspace '{}': {}",
                self.workspace,
                missing.join(", ")
            )));
        }
        info!("{} target projects validated", target_projects.len());
        Ok(())
    }

    async fn recent_builds(
        &self,
        since: DateTime<Utc>,
        target_projects: &[String],
    ) -> Result<RecordedGroups> {
        let query = format!(r#"(CreationDate >= "{}")"#, wsapi_instant(since));
        let raw_builds: Vec<RawTrackerBuild> = self
            .client
            .query("build", &query, BUILD_FETCH, self.workspace_ref())
            .await?;

        let mut groups = RecordedGroups::new();
        for raw in raw_builds {
            let Some(definition) = raw.build_definition else {
                debug!("Skipping build record {} without a definition", raw.obj_ref);
                continue;
            };
            let Some(project) = definition.project else {
                debug!(
                    "Skipping build record {} with no project on its definition",
                    raw.obj_ref
                );
                continue;
            };
            if !target_projects.contains(&project.name) {
                continue;
            }
            let number: i64 = match raw.number.parse() {
                Ok(n) => n,
                Err(_) => {
                    warn!(
                        "Build record {} has a non-numeric Number '{}', ignoring",
                        raw.obj_ref, raw.number
                    );
                    continue;
                }
            };
            groups
                .entry(GroupKey::new(project.name, definition.name))
                .or_default()
                .insert(number, raw.status);
        }

        let total: usize = groups.values().map(|g| g.len()).sum();
        info!(
            "{} recorded builds across {} groups since {}",
            total,
            groups.len(),
            since
        );
        Ok(groups)
    }

    async fn prepare_build(
        &self,
        plan: &Plan,
        revisions: &[VcsRevision],
        target_project: &str,
    ) -> Result<BuildPrerequisites> {
        let definition = match self.find_build_definition(&plan.name, target_project).await? {
            Some(definition) => definition,
            None => self.create_build_definition(plan, target_project).await?,
        };
        let changesets = self.find_changesets(revisions).await?;
        Ok(BuildPrerequisites {
            definition,
            changesets,
        })
    }

    async fn build_exists(
        &self,
        definition: &BuildDefinition,
        number: i64,
    ) -> Result<Option<TrackerBuild>> {
        let query = format!(
            r#"((BuildDefinition = "{}") AND (Number = "{number}"))"#,
            definition.obj_ref
        );
        let found: Vec<RawTrackerBuild> = self
            .client
            .query("build", &query, "Number,Status", self.workspace_ref())
            .await?;

        Ok(found.into_iter().next().map(|raw| TrackerBuild {
            obj_ref: raw.obj_ref,
            number,
            status: raw.status,
        }))
    }

    async fn create_build(
        &self,
        definition: &BuildDefinition,
        build: &Build,
        changesets: &[ChangesetRef],
    ) -> Result<TrackerBuild> {
        let mut fields = serde_json::json!({
            "Number": build.number.to_string(),
            "Status": build.state.tracker_status(),
            "Start": build.started.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            "Duration": build.duration_secs(),
            "Uri": build.url,
            "BuildDefinition": definition.obj_ref,
        });
        if !changesets.is_empty() {
            fields["Changesets"] = serde_json::Value::Array(
                changesets
                    .iter()
                    .map(|cs| serde_json::json!({"_ref": cs.obj_ref}))
                    .collect(),
            );
        }

        let created: RawTrackerBuild = self.client.create("build", "Build", fields).await?;
        Ok(TrackerBuild {
            obj_ref: created.obj_ref,
            number: build.number,
            status: created.status,
        })
    }
}
