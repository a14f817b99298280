use log::{debug, warn};
use serde::de::DeserializeOwned;

use crate::error::{Result, SyncError};

use super::types::{CreateEnvelope, QueryEnvelope};

const PAGE_SIZE: usize = 200;

/// Thin client over the tracker's WSAPI.
///
/// Authentication is an API key header; the integration headers identify
/// this connector and the CI backend it fronts, which the tracker surfaces
/// in its integration diagnostics.
pub struct AgileCentralClient {
    client: reqwest::Client,
    /// e.g. `https://rally1.rallydev.com/slm/webservice/v2.0`
    wsapi_base: String,
    api_key: String,
    source_name: Option<String>,
    source_version: Option<String>,
}

impl AgileCentralClient {
    /// `base_url` is the server root, e.g. `https://rally1.rallydev.com`.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self> {
        url::Url::parse(base_url).map_err(|e| {
            SyncError::Config(format!("Invalid AgileCentral base URL '{base_url}': {e}"))
        })?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("bldsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            wsapi_base: format!("{}/slm/webservice/v2.0", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            source_name: None,
            source_version: None,
        })
    }

    /// Record which CI backend this connector fronts; sent on every request.
    pub fn set_source_identification(&mut self, name: &str, version: &str) {
        self.source_name = Some(name.to_string());
        self.source_version = Some(version.to_string());
    }

    fn decorate(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut request = request
            .header("zsessionid", self.api_key.as_str())
            .header("X-RallyIntegrationName", "bldsync build connector")
            .header("X-RallyIntegrationVersion", env!("CARGO_PKG_VERSION"))
            .header("X-RallyIntegrationVendor", "Open Source contributors");
        if let Some(name) = &self.source_name {
            request = request.header("X-RallyIntegrationOtherName", name.as_str());
        }
        if let Some(version) = &self.source_version {
            request = request.header("X-RallyIntegrationOtherVersion", version.as_str());
        }
        request
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
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
        Ok(response)
    }

    /// Run one WSAPI query, returning at most one page of results.
    /// Operation errors inside the envelope are surfaced as API errors.
    pub async fn query<T: DeserializeOwned>(
        &self,
        object_type: &str,
        query: &str,
        fetch: &str,
        workspace_ref: Option<&str>,
    ) -> Result<Vec<T>> {
        let url = format!("{}/{}", self.wsapi_base, object_type);
        debug!("WSAPI query {object_type}: {query}");

        let mut params = vec![
            ("query", query.to_string()),
            ("fetch", fetch.to_string()),
            ("pagesize", PAGE_SIZE.to_string()),
            ("start", "1".to_string()),
        ];
        if let Some(workspace_ref) = workspace_ref {
            params.push(("workspace", workspace_ref.to_string()));
        }

        let response = self
            .decorate(self.client.get(&url).query(&params))
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let status = response.status().as_u16();

        let body = response.text().await?;
        let envelope: QueryEnvelope<T> = serde_json::from_str(&body).map_err(|e| {
            SyncError::Parse(format!("unexpected {object_type} query payload: {e}"))
        })?;

        let result = envelope.query_result;
        if !result.errors.is_empty() {
            return Err(SyncError::Api {
                status,
                message: result.errors.join(", "),
            });
        }
        for warning in &result.warnings {
            warn!("WSAPI warning on {object_type} query: {warning}");
        }
        if result.total_result_count as usize > result.results.len() {
            warn!(
                "{object_type} query matched {} records, only the first {} are considered",
                result.total_result_count,
                result.results.len()
            );
        }

        Ok(result.results)
    }

    /// Create one object. The payload is the inner field map; the type-named
    /// wrapper the WSAPI expects is added here.
    pub async fn create<T: DeserializeOwned>(
        &self,
        object_type: &str,
        wrapper: &str,
        fields: serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}/{}/create", self.wsapi_base, object_type);
        debug!("WSAPI create {object_type}");

        let body = serde_json::json!({ wrapper: fields });
        let response = self
            .decorate(self.client.post(&url).json(&body))
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let status = response.status().as_u16();

        let body = response.text().await?;
        let envelope: CreateEnvelope<T> = serde_json::from_str(&body).map_err(|e| {
            SyncError::Parse(format!("unexpected {object_type} create payload: {e}"))
        })?;

        let result = envelope.create_result;
        if !result.errors.is_empty() {
            return Err(SyncError::Api {
                status,
                message: result.errors.join(", "),
            });
        }
        result.object.ok_or_else(|| {
            SyncError::Parse(format!("{object_type} create returned no object"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::agile_central::types::RawTrackerBuild;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_query_sends_auth_and_parses_results() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/slm/webservice/v2.0/build")
            .match_header("zsessionid", "_abc123")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("query".into(), r#"(Number = "45")"#.into()),
                Matcher::UrlEncoded("pagesize".into(), "200".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{
                    "QueryResult": {
                        "TotalResultCount": 1,
                        "Results": [{"_ref": "/build/1", "Number": "45", "Status": "SUCCESS"}],
                        "Errors": [],
                        "Warnings": []
                    }
                }"#,
            )
            .create_async()
            .await;

        let client = AgileCentralClient::new(&server.url(), "_abc123").unwrap();
        let results: Vec<RawTrackerBuild> = client
            .query("build", r#"(Number = "45")"#, "Number,Status", None)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].number, "45");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_envelope_errors_become_api_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/slm/webservice/v2.0/build")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{
                    "QueryResult": {
                        "TotalResultCount": 0,
                        "Results": [],
                        "Errors": ["Could not parse query"],
                        "Warnings": []
                    }
                }"#,
            )
            .create_async()
            .await;

        let client = AgileCentralClient::new(&server.url(), "_abc123").unwrap();
        let err = client
            .query::<RawTrackerBuild>("build", "(bogus)", "Number", None)
            .await
            .unwrap_err();

        match err {
            SyncError::Api { message, .. } => assert!(message.contains("Could not parse query")),
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_unwraps_object() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/slm/webservice/v2.0/build/create")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "Build": {"Number": "45"}
            })))
            .with_status(200)
            .with_body(
                r#"{
                    "CreateResult": {
                        "Object": {"_ref": "/build/99", "Number": "45", "Status": "SUCCESS"},
                        "Errors": [],
                        "Warnings": []
                    }
                }"#,
            )
            .create_async()
            .await;

        let client = AgileCentralClient::new(&server.url(), "_abc123").unwrap();
        let created: RawTrackerBuild = client
            .create(
                "build",
                "Build",
                serde_json::json!({"Number": "45", "Status": "SUCCESS"}),
            )
            .await
            .unwrap();

        assert_eq!(created.obj_ref, "/build/99");
    }

    #[tokio::test]
    async fn test_http_failure_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/slm/webservice/v2.0/project")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let client = AgileCentralClient::new(&server.url(), "_abc123").unwrap();
        let err = client
            .query::<RawTrackerBuild>("project", "(Name = \"X\")", "Name", None)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Api { status: 503, .. }));
    }
}
