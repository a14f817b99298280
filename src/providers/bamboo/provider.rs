use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::build::{Build, Plan};
use crate::config::{Config, ProjectMapping};
use crate::error::Result;
use crate::providers::BuildSource;

use super::client::BambooClient;

/// CI-side connection: discovers the in-scope plans and pulls their build
/// history over Bamboo's REST API.
pub struct BambooProvider {
    client: BambooClient,
    mappings: Vec<ProjectMapping>,
    server: String,
}

impl BambooProvider {
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = BambooClient::new(
            &config.bamboo_base_url(),
            &config.bamboo.username,
            &config.bamboo.password,
        )?;
        Ok(Self {
            client,
            mappings: config.bamboo.projects.clone(),
            server: config.bamboo.server.clone(),
        })
    }

    fn mapping_for(&self, ci_project: &str) -> Option<&ProjectMapping> {
        self.mappings.iter().find(|m| m.project == ci_project)
    }

    fn plan_in_scope(&self, plan: &Plan) -> bool {
        self.mapping_for(&plan.project)
            .map(|m| {
                m.plans
                    .iter()
                    .any(|p| p == &plan.name || p == &plan.full_name)
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl BuildSource for BambooProvider {
    fn name(&self) -> &str {
        "Bamboo"
    }

    async fn connect(&mut self) -> Result<String> {
        info!("Connecting to Bamboo");
        let server_info = self.client.server_info().await?;
        info!(
            "Connected to Bamboo server {} running at version {}",
            self.server, server_info.version
        );
        Ok(server_info.version)
    }

    async fn list_plans(&self) -> Result<Vec<Plan>> {
        let raw_projects = self.client.projects_with_plans().await?;

        let mut plans = Vec::new();
        for raw_project in raw_projects {
            if self.mapping_for(&raw_project.name).is_none() {
                debug!("Project '{}' is not mapped, skipping", raw_project.name);
                continue;
            }
            for raw_plan in raw_project.plans.plan {
                let plan = raw_plan.into_plan();
                if self.plan_in_scope(&plan) {
                    plans.push(plan);
                } else {
                    debug!("Plan '{}' is not in scope, skipping", plan.full_name);
                }
            }
        }

        info!("{} plans in scope", plans.len());
        Ok(plans)
    }

    async fn list_builds(&self, plan: &Plan, since: DateTime<Utc>) -> Result<Vec<Build>> {
        debug!("Fetching results for {} (window start {})", plan.key, since);
        let raw_results = self.client.plan_results(&plan.key).await?;

        let builds = raw_results
            .into_iter()
            .map(|raw| raw.into_build())
            .collect::<Result<Vec<_>>>()?;

        debug!("{}: {} results fetched", plan.key, builds.len());
        Ok(builds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::bamboo::types::RawPlan;

    fn provider_with_mapping() -> BambooProvider {
        BambooProvider {
            client: BambooClient::new("http://localhost:8085", "u", "p").unwrap(),
            mappings: vec![ProjectMapping {
                project: "Fernandel".to_string(),
                target_project: "Rally Fernandel".to_string(),
                plans: vec!["Don Camillo".to_string()],
            }],
            server: "localhost".to_string(),
        }
    }

    fn plan(project: &str, name: &str) -> Plan {
        Plan {
            name: name.to_string(),
            full_name: format!("{project} - {name}"),
            project: project.to_string(),
            key: "FER-DON".to_string(),
            url: String::new(),
        }
    }

    #[test]
    fn test_plan_scope_filtering() {
        let provider = provider_with_mapping();

        assert!(provider.plan_in_scope(&plan("Fernandel", "Don Camillo")));
        assert!(!provider.plan_in_scope(&plan("Fernandel", "Ludovic Cruchot")));
        assert!(!provider.plan_in_scope(&plan("Gendarme", "Don Camillo")));
    }

    #[tokio::test]
    async fn test_list_plans_respects_mapping() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "GET",
                "/rest/api/latest/project.json?expand=projects.project.plans",
            )
            .with_status(200)
            .with_body(
                r#"{
                    "projects": {
                        "project": [
                            {
                                "name": "Fernandel",
                                "plans": {
                                    "plan": [
                                        {
                                            "name": "Fernandel - Don Camillo",
                                            "shortName": "Don Camillo",
                                            "key": "FER-DON",
                                            "link": {"href": "http://localhost:8085/rest/api/latest/plan/FER-DON"}
                                        },
                                        {
                                            "name": "Fernandel - Out Of Scope",
                                            "shortName": "Out Of Scope",
                                            "key": "FER-OOS",
                                            "link": {"href": "http://localhost:8085/rest/api/latest/plan/FER-OOS"}
                                        }
                                    ]
                                }
                            },
                            {
                                "name": "Unmapped",
                                "plans": {"plan": []}
                            }
                        ]
                    }
                }"#,
            )
            .create_async()
            .await;

        let mut provider = provider_with_mapping();
        provider.client = BambooClient::new(&server.url(), "u", "p").unwrap();

        let plans = provider.list_plans().await.unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].key, "FER-DON");
        assert_eq!(plans[0].project, "Fernandel");
    }

    #[test]
    fn test_raw_plan_helper_compiles_under_scope_rules() {
        // Full-name entries in the config are honored too.
        let raw: RawPlan = serde_json::from_str(
            r#"{
                "name": "Fernandel - Don Camillo",
                "shortName": "Don Camillo",
                "key": "FER-DON",
                "link": {"href": "http://localhost:8085/rest/api/latest/plan/FER-DON"}
            }"#,
        )
        .unwrap();
        let mut provider = provider_with_mapping();
        provider.mappings[0].plans = vec!["Fernandel - Don Camillo".to_string()];
        assert!(provider.plan_in_scope(&raw.into_plan()));
    }
}
