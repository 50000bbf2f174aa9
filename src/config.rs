//! Deploy input loading
//!
//! A deploy directory holds the deploy file (task definition plus optional
//! service). Its parent holds the environment file shared by every
//! deployable in that environment.

use crate::control::types::{LogConfiguration, ServiceSpec, TaskDefinitionSpec};
use crate::control::HttpControlApiConfig;
use crate::deploy::{DeploymentKind, DeploymentRequest, ExitRule};
use crate::error::{DeployError, Result};
use crate::poll::{PollPolicy, PollSettings};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Deploy file names, in lookup order
pub const DEFAULT_DEPLOY_FILES: &[&str] = &["deploy.json", "deploy.yaml", "deploy.yml", "config.json"];

/// Environment file names, in lookup order
pub const DEFAULT_ENVIRONMENT_FILES: &[&str] =
    &["environment.json", "environment.yaml", "environment.yml"];

/// Log driver applied to containers without a log configuration
pub const AWSLOGS_DRIVER: &str = "awslogs";

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,254}$").expect("name pattern is valid")
    })
}

/// Settings shared by every deployable in an environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    /// Cluster deployments go to
    pub cluster: String,
    /// Default service role
    #[serde(default)]
    pub scheduler_iam_role_arn: Option<String>,
    /// Default task role
    #[serde(default)]
    pub task_iam_role_arn: Option<String>,
    #[serde(default)]
    pub aws_logs_group_name: Option<String>,
    #[serde(default)]
    pub aws_logs_region: Option<String>,
    /// Control plane connection settings
    #[serde(default)]
    pub control: ControlConfig,
}

impl EnvironmentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cluster.trim().is_empty() {
            return Err(DeployError::InvalidConfig(
                "cluster must be provided in the environment config".to_string(),
            ));
        }
        self.control.validate()
    }
}

/// Control plane connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlConfig {
    /// Explicit endpoint; defaults to the regional endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_stabilize")]
    pub stabilize: PollSettings,
    #[serde(default = "default_oneshot")]
    pub oneshot: PollSettings,
    /// Oneshot exit codes that fail without waiting out the poll budget
    #[serde(default)]
    pub exit_rule: ExitRule,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_stabilize() -> PollSettings {
    PollPolicy::stabilize().into()
}

fn default_oneshot() -> PollSettings {
    PollPolicy::oneshot().into()
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_region(),
            request_timeout_secs: default_request_timeout_secs(),
            stabilize: default_stabilize(),
            oneshot: default_oneshot(),
            exit_rule: ExitRule::default(),
        }
    }
}

impl ControlConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stabilize.max_attempts == 0 || self.oneshot.max_attempts == 0 {
            return Err(DeployError::InvalidConfig(
                "maxAttempts must be at least 1".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(DeployError::InvalidConfig(
                "requestTimeoutSecs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn oneshot_policy(&self) -> PollPolicy {
        self.oneshot.into()
    }

    /// Client configuration for the control plane
    pub fn client_config(&self) -> HttpControlApiConfig {
        let base = match self.endpoint {
            Some(ref endpoint) => HttpControlApiConfig {
                endpoint: endpoint.clone(),
                ..Default::default()
            },
            None => HttpControlApiConfig::for_region(&self.region),
        };

        HttpControlApiConfig {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            stabilize: self.stabilize.into(),
            ..base
        }
    }
}

/// Contents of a deploy file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployConfig {
    pub task: TaskDefinitionSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<ServiceSpec>,
}

impl DeployConfig {
    /// Fill unset fields from the environment.
    ///
    /// Only empty or missing values are filled; anything set in the deploy
    /// file wins.
    pub fn apply_environment(&mut self, env: &EnvironmentConfig) {
        if let Some(ref mut service) = self.service {
            if service.cluster.is_empty() {
                tracing::debug!(cluster = %env.cluster, "using environment cluster");
                service.cluster = env.cluster.clone();
            }
            if service.role.is_none() {
                service.role = env.scheduler_iam_role_arn.clone();
            }
        }

        if self.task.task_role_arn.is_none() {
            self.task.task_role_arn = env.task_iam_role_arn.clone();
        }

        if let Some(ref group) = env.aws_logs_group_name {
            let region = env
                .aws_logs_region
                .clone()
                .unwrap_or_else(|| env.control.region.clone());
            let family = self.task.family.clone();

            for container in &mut self.task.container_definitions {
                if container.log_configuration.is_none() {
                    container.log_configuration = Some(LogConfiguration {
                        log_driver: AWSLOGS_DRIVER.to_string(),
                        options: [
                            ("awslogs-group".to_string(), group.clone()),
                            ("awslogs-region".to_string(), region.clone()),
                            ("awslogs-stream-prefix".to_string(), family.clone()),
                        ]
                        .into_iter()
                        .collect(),
                    });
                }
            }
        }
    }

    /// Check names and counts before anything reaches the control plane
    pub fn validate(&self, kind: DeploymentKind) -> Result<()> {
        validate_task(&self.task)?;

        match (kind, &self.service) {
            (DeploymentKind::Service, None) => Err(DeployError::InvalidConfig(
                "service deployments require a service section".to_string(),
            )),
            (DeploymentKind::Service, Some(service)) => validate_service(service),
            (DeploymentKind::Migration, _) => Ok(()),
        }
    }

    /// Turn the file contents into a typed request
    pub fn into_request(self, kind: DeploymentKind) -> Result<DeploymentRequest> {
        self.validate(kind)?;
        DeploymentRequest::from_parts(kind, self.task, self.service)
    }
}

fn validate_name(what: &str, name: &str) -> Result<()> {
    if name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(DeployError::InvalidConfig(format!(
            "invalid {} name {:?}: use up to 255 letters, numbers, hyphens and underscores",
            what, name
        )))
    }
}

fn validate_task(task: &TaskDefinitionSpec) -> Result<()> {
    validate_name("task definition family", &task.family)?;

    if task.container_definitions.is_empty() {
        return Err(DeployError::InvalidConfig(format!(
            "task definition {} has no containers",
            task.family
        )));
    }

    for container in &task.container_definitions {
        if container.name.is_empty() || container.image.is_empty() {
            return Err(DeployError::InvalidConfig(format!(
                "every container in {} needs a name and an image",
                task.family
            )));
        }
    }

    Ok(())
}

fn validate_service(service: &ServiceSpec) -> Result<()> {
    validate_name("service", &service.service_name)?;

    if service.cluster.is_empty() {
        return Err(DeployError::InvalidConfig(format!(
            "service {} has no cluster",
            service.service_name
        )));
    }

    if service.desired_count < 0 {
        return Err(DeployError::InvalidConfig(format!(
            "service {} desiredCount must not be negative",
            service.service_name
        )));
    }

    Ok(())
}

/// Locates and parses deploy and environment files
pub struct ConfigLoader;

impl ConfigLoader {
    /// First existing file from `names` in `dir`
    pub fn find_file(dir: &Path, names: &[&str]) -> Option<PathBuf> {
        names
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    /// Parse a JSON or YAML file, chosen by extension
    pub fn parse_file<T>(path: &Path) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
            _ => Ok(serde_json::from_str(&content)?),
        }
    }

    /// Load the environment file, from `explicit` or the deploy dir's parent
    pub fn load_environment(dir: &Path, explicit: Option<&Path>) -> Result<EnvironmentConfig> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let parent = dir.parent().unwrap_or(dir);
                Self::find_file(parent, DEFAULT_ENVIRONMENT_FILES).ok_or_else(|| {
                    DeployError::InvalidConfig(format!(
                        "no environment file found in {}",
                        parent.display()
                    ))
                })?
            }
        };

        tracing::debug!(path = %path.display(), "loading environment config");
        let env: EnvironmentConfig = Self::parse_file(&path)?;
        env.validate()?;
        Ok(env)
    }

    /// Load the deploy file from `dir`, with environment defaults applied
    pub fn load_deploy(dir: &Path, env: &EnvironmentConfig) -> Result<DeployConfig> {
        let path = Self::find_file(dir, DEFAULT_DEPLOY_FILES).ok_or_else(|| {
            DeployError::InvalidConfig(format!("no deploy file found in {}", dir.display()))
        })?;

        tracing::debug!(path = %path.display(), "loading deploy config");
        let mut config: DeployConfig = Self::parse_file(&path)?;
        config.apply_environment(env);
        Ok(config)
    }
}
