use anyhow::{bail, Context, Result};
use chrono::Duration;
use serde::Deserialize;
use std::path::Path;

/// Configuration file structure for bldsync.
///
/// Configs are YAML with one section per connection plus a `Service`
/// section, e.g.:
///
/// ```yaml
/// Bamboo:
///   Server: bamboo.example.com
///   Port: 8085
///   Username: builder
///   Password: sekrit
///   Lookback: 3600
///   AgileCentral_DefaultBuildProject: Rally Fernandel
///   Projects:
///     - Project: Fernandel
///       AgileCentral_Project: Rally Fernandel
///       Plans: [Don Camillo, Ludovic Cruchot]
/// AgileCentral:
///   Server: rally1.rallydev.com
///   APIKey: _secret
///   Workspace: Alligators
///   Lookback: 7200
/// Service:
///   Preview: false
///   MaxBuilds: 20
/// ```
///
/// Unknown keys in any section are rejected as configuration errors.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(rename = "Bamboo")]
    pub bamboo: BambooConfig,

    #[serde(rename = "AgileCentral")]
    pub agile_central: AgileCentralConfig,

    #[serde(rename = "Service", default)]
    pub service: ServiceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "PascalCase")]
pub struct BambooConfig {
    pub server: String,

    #[serde(default = "default_bamboo_port")]
    pub port: u16,

    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// URL path prefix for servers behind a reverse proxy, e.g. "/bamboo"
    #[serde(default)]
    pub prefix: String,

    pub username: String,
    pub password: String,

    /// Safety margin in seconds subtracted from the last run time when
    /// querying recent builds
    #[serde(default = "default_lookback_secs")]
    pub lookback: u64,

    /// Target project for builds whose plan carries no explicit mapping
    #[serde(rename = "AgileCentral_DefaultBuildProject")]
    pub default_build_project: String,

    #[serde(rename = "Projects")]
    pub projects: Vec<ProjectMapping>,
}

/// Associates one CI project with a tracker project and names the plans in
/// scope. A build is reachable only through one of these mappings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectMapping {
    #[serde(rename = "Project")]
    pub project: String,

    #[serde(rename = "AgileCentral_Project")]
    pub target_project: String,

    #[serde(rename = "Plans")]
    pub plans: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "PascalCase")]
pub struct AgileCentralConfig {
    #[serde(default = "default_agile_central_server")]
    pub server: String,

    #[serde(rename = "APIKey")]
    pub api_key: String,

    pub workspace: String,

    /// Safety margin in seconds for the tracker query window; usually wider
    /// than the CI side to cover search-index lag
    #[serde(default = "default_lookback_secs")]
    pub lookback: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "PascalCase")]
pub struct ServiceConfig {
    /// Compute and log what would be posted without writing anything
    #[serde(default)]
    pub preview: bool,

    /// Per-plan cap on builds posted in one run
    #[serde(default = "default_max_builds")]
    pub max_builds: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            preview: false,
            max_builds: default_max_builds(),
        }
    }
}

fn default_bamboo_port() -> u16 {
    8085
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_agile_central_server() -> String {
    "rally1.rallydev.com".to_string()
}

fn default_lookback_secs() -> u64 {
    3600
}

fn default_max_builds() -> usize {
    20
}

impl Config {
    /// Load and validate a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.bamboo.default_build_project.trim().is_empty() {
            bail!("Bamboo section is missing a value for AgileCentral_DefaultBuildProject");
        }
        if self.bamboo.projects.is_empty() {
            bail!("Bamboo section must configure at least one entry under Projects");
        }
        for mapping in &self.bamboo.projects {
            if mapping.plans.is_empty() {
                bail!(
                    "Project '{}' lists no Plans; every mapped project needs at least one plan in scope",
                    mapping.project
                );
            }
        }
        if self.bamboo.username.trim().is_empty() {
            bail!("No Username was provided in the Bamboo section");
        }
        if self.bamboo.password.trim().is_empty() {
            bail!("No Password was provided in the Bamboo section");
        }
        if self.agile_central.api_key.trim().is_empty() {
            bail!("No APIKey was provided in the AgileCentral section");
        }
        Ok(())
    }

    /// Bamboo server base URL without the REST path, e.g.
    /// `http://bamboo.example.com:8085`.
    pub fn bamboo_base_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.bamboo.protocol, self.bamboo.server, self.bamboo.port, self.bamboo.prefix
        )
    }

    /// Every tracker project that can receive builds: the default project
    /// plus all mapped ones, deduplicated, config order preserved.
    pub fn target_projects(&self) -> Vec<String> {
        let mut projects = vec![self.bamboo.default_build_project.clone()];
        for mapping in &self.bamboo.projects {
            if !projects.contains(&mapping.target_project) {
                projects.push(mapping.target_project.clone());
            }
        }
        projects
    }

    /// The tracker project a CI project's builds map to.
    pub fn target_project_for(&self, ci_project: &str) -> Option<&str> {
        self.bamboo
            .projects
            .iter()
            .find(|m| m.project == ci_project)
            .map(|m| m.target_project.as_str())
    }

    pub fn source_lookback(&self) -> Duration {
        Duration::seconds(self.bamboo.lookback as i64)
    }

    pub fn tracker_lookback(&self) -> Duration {
        Duration::seconds(self.agile_central.lookback as i64)
    }
}
