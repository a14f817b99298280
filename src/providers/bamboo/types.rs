use serde::Deserialize;

use crate::build::{Build, BuildState, Plan, VcsRevision};
use crate::error::{Result, SyncError};

/// `info.json` payload; only the version is of interest.
#[derive(Debug, Deserialize)]
pub struct ServerInfo {
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct ProjectsResponse {
    pub projects: ProjectList,
}

#[derive(Debug, Deserialize)]
pub struct ProjectList {
    pub project: Vec<RawProject>,
}

#[derive(Debug, Deserialize)]
pub struct RawProject {
    pub name: String,
    pub plans: PlanList,
}

#[derive(Debug, Deserialize)]
pub struct PlanList {
    pub plan: Vec<RawPlan>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPlan {
    /// Fully qualified name, e.g. "Fernandel - Don Camillo"
    pub name: String,
    pub short_name: String,
    pub key: String,
    pub link: RawLink,
}

#[derive(Debug, Deserialize)]
pub struct RawLink {
    pub href: String,
}

#[derive(Debug, Deserialize)]
pub struct ResultsResponse {
    pub results: ResultList,
}

#[derive(Debug, Deserialize)]
pub struct ResultList {
    pub result: Vec<RawBuildResult>,
}

/// One raw entry from `result/{key}.json`. Fields required here are required
/// of the API; a record missing any of them fails the parse rather than
/// producing a partially populated build.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBuildResult {
    pub number: i64,
    pub state: String,
    pub link: RawLink,
    pub finished: bool,
    pub build_started_time: String,
    /// Absent while the build is still running
    #[serde(default)]
    pub build_completed_time: Option<String>,
    pub build_duration: i64,
    #[serde(default)]
    pub vcs_revisions: Option<RawVcsRevisions>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVcsRevisions {
    pub vcs_revision: Vec<RawVcsRevision>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawVcsRevision {
    pub repository_name: String,
    pub vcs_revision_key: String,
}

impl RawPlan {
    /// Rest links address the API; browse links are what humans follow.
    pub fn into_plan(self) -> Plan {
        let url = self.link.href.replace("rest/api/latest/plan", "browse");
        let project = self
            .name
            .strip_suffix(&format!(" - {}", self.short_name))
            .unwrap_or(&self.name)
            .to_string();
        Plan {
            name: self.short_name,
            full_name: self.name,
            project,
            key: self.key,
            url,
        }
    }
}

fn parse_instant(raw: &str, field: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&chrono::Utc))
        .map_err(|e| SyncError::Parse(format!("unreadable {field} '{raw}': {e}")))
}

impl RawBuildResult {
    pub fn into_build(self) -> Result<Build> {
        let started = parse_instant(&self.build_started_time, "buildStartedTime")?;
        let completed = match &self.build_completed_time {
            Some(raw) => parse_instant(raw, "buildCompletedTime")?,
            // Unfinished results carry no completion time yet; use the start
            // time for windowing and ordering. They are never posted.
            None => started,
        };
        let revisions = self
            .vcs_revisions
            .map(|revs| {
                revs.vcs_revision
                    .into_iter()
                    .map(|r| VcsRevision {
                        repository: r.repository_name,
                        revision: r.vcs_revision_key,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Build {
            number: self.number,
            state: BuildState::from_bamboo(&self.state),
            started,
            completed,
            duration_ms: self.build_duration,
            url: self.link.href.replace("rest/api/latest/result", "browse"),
            finished: self.finished,
            revisions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const RAW_BUILD: &str = r#"{
        "number": 45,
        "state": "Successful",
        "buildResultKey": "FER-DON-45",
        "link": {"href": "http://localhost:8085/rest/api/latest/result/FER-DON-45"},
        "finished": true,
        "buildStartedTime": "2017-06-12T13:50:00.000-06:00",
        "buildCompletedTime": "2017-06-12T13:55:39.712-06:00",
        "buildDuration": 339712,
        "vcsRevisions": {
            "vcsRevision": [
                {
                    "repositoryId": 360450,
                    "repositoryName": "bamboo-camillo",
                    "vcsRevisionKey": "561b474ef508710944574f4e33ea9f77a2abf69b"
                }
            ]
        }
    }"#;

    #[test]
    fn test_parse_full_build_record() {
        let raw: RawBuildResult = serde_json::from_str(RAW_BUILD).unwrap();
        let build = raw.into_build().unwrap();

        assert_eq!(build.number, 45);
        assert_eq!(build.state, BuildState::Successful);
        assert!(build.finished);
        assert_eq!(build.duration_ms, 339_712);
        assert_eq!(build.url, "http://localhost:8085/browse/FER-DON-45");
        // Offset timestamps normalize to UTC.
        assert_eq!(
            build.completed,
            Utc.with_ymd_and_hms(2017, 6, 12, 19, 55, 39).unwrap()
                + chrono::Duration::milliseconds(712)
        );
        assert_eq!(build.revisions.len(), 1);
        assert_eq!(build.revisions[0].repository, "bamboo-camillo");
        assert_eq!(
            build.revisions[0].revision,
            "561b474ef508710944574f4e33ea9f77a2abf69b"
        );
    }

    #[test]
    fn test_missing_required_field_fails_parse() {
        let raw = serde_json::from_str::<RawBuildResult>(
            r#"{"number": 45, "state": "Successful"}"#,
        );
        assert!(raw.is_err());
    }

    #[test]
    fn test_unfinished_build_falls_back_to_start_time() {
        let raw: RawBuildResult = serde_json::from_str(
            r#"{
                "number": 46,
                "state": "Unknown",
                "link": {"href": "http://localhost:8085/rest/api/latest/result/FER-DON-46"},
                "finished": false,
                "buildStartedTime": "2017-06-12T14:00:00.000Z",
                "buildDuration": 0
            }"#,
        )
        .unwrap();
        let build = raw.into_build().unwrap();

        assert!(!build.finished);
        assert_eq!(build.completed, build.started);
        assert!(build.revisions.is_empty());
    }

    #[test]
    fn test_bogus_timestamp_is_a_parse_error() {
        let raw: RawBuildResult = serde_json::from_str(
            r#"{
                "number": 47,
                "state": "Failed",
                "link": {"href": "x"},
                "finished": true,
                "buildStartedTime": "last tuesday",
                "buildDuration": 10
            }"#,
        )
        .unwrap();
        assert!(matches!(raw.into_build(), Err(SyncError::Parse(_))));
    }

    #[test]
    fn test_plan_conversion_derives_project_and_browse_url() {
        let raw: RawPlan = serde_json::from_str(
            r#"{
                "name": "Fernandel - Don Camillo",
                "shortName": "Don Camillo",
                "key": "FER-DON",
                "link": {"href": "http://localhost:8085/rest/api/latest/plan/FER-DON"}
            }"#,
        )
        .unwrap();
        let plan = raw.into_plan();

        assert_eq!(plan.name, "Don Camillo");
        assert_eq!(plan.full_name, "Fernandel - Don Camillo");
        assert_eq!(plan.project, "Fernandel");
        assert_eq!(plan.key, "FER-DON");
        assert_eq!(plan.url, "http://localhost:8085/browse/FER-DON");
    }
}
