use log::debug;
use serde::de::DeserializeOwned;

use crate::error::{Result, SyncError};

use super::types::{ProjectsResponse, RawBuildResult, RawProject, ResultsResponse, ServerInfo};

/// How many results the per-plan history request asks for.
const RESULTS_WINDOW: usize = 100;

/// Thin client over Bamboo's REST API.
pub struct BambooClient {
    client: reqwest::Client,
    /// e.g. `http://bamboo.example.com:8085/rest/api/latest`
    api_base: String,
    username: String,
    password: String,
}

impl BambooClient {
    /// `base_url` is the server root, e.g. `http://bamboo.example.com:8085`,
    /// including any path prefix but not the REST path.
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self> {
        url::Url::parse(base_url)
            .map_err(|e| SyncError::Config(format!("Invalid Bamboo base URL '{base_url}': {e}")))?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("bldsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: format!("{}/rest/api/latest", base_url.trim_end_matches('/')),
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let url = format!("{}/{}", self.api_base, endpoint);
        debug!("GET {url}");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(SyncError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| SyncError::Parse(format!("unexpected payload from {endpoint}: {e}")))
    }

    /// Server version, from `info.json`.
    pub async fn server_info(&self) -> Result<ServerInfo> {
        self.get_json("info.json").await
    }

    /// All visible projects with their plans expanded.
    pub async fn projects_with_plans(&self) -> Result<Vec<RawProject>> {
        let response: ProjectsResponse = self
            .get_json("project.json?expand=projects.project.plans")
            .await?;
        Ok(response.projects.project)
    }

    /// Recent build results for one plan key, vcs revisions expanded. The
    /// API pages newest-first but callers must not rely on that.
    pub async fn plan_results(&self, plan_key: &str) -> Result<Vec<RawBuildResult>> {
        let endpoint = format!(
            "result/{plan_key}.json?expand=results[0:{RESULTS_WINDOW}].result.vcsRevisions"
        );
        let response: ResultsResponse = self.get_json(&endpoint).await?;
        Ok(response.results.result)
    }
}
