//! HTTP client for the cluster control plane
//!
//! Speaks the control plane's JSON 1.1 protocol: every operation is a POST to
//! the endpoint root with the operation named in the `X-Amz-Target` header.
//! Requests go out unsigned; point the endpoint at a signing proxy or a local
//! emulator.

use super::types::{
    CreateServiceParams, Failure, RunTaskOutput, ServiceState, TaskDefinitionRevision,
    TaskDefinitionSpec, TaskStatus, UpdateServiceParams, REASON_MISSING,
};
use super::waiter::StabilityWaiter;
use super::ControlApi;
use crate::error::{ApiError, ApiResult};
use crate::poll::PollPolicy;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Prefix of the `X-Amz-Target` header value
const TARGET_PREFIX: &str = "AmazonEC2ContainerServiceV20141113";

/// Content type of every request body
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Control plane client configuration
#[derive(Debug, Clone)]
pub struct HttpControlApiConfig {
    /// Base URL of the control plane
    pub endpoint: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Cadence of the stabilization waiter
    pub stabilize: PollPolicy,
}

impl HttpControlApiConfig {
    /// Regional endpoint of the hosted control plane
    pub fn for_region(region: &str) -> Self {
        Self {
            endpoint: format!("https://ecs.{}.amazonaws.com", region),
            ..Default::default()
        }
    }
}

impl Default for HttpControlApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://ecs.us-east-1.amazonaws.com".to_string(),
            request_timeout: Duration::from_secs(30),
            stabilize: PollPolicy::stabilize(),
        }
    }
}

/// reqwest-backed [`ControlApi`]
pub struct HttpControlApi {
    client: Client,
    endpoint: String,
    waiter: StabilityWaiter,
}

impl HttpControlApi {
    /// Create a new client
    pub fn new(config: HttpControlApiConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            waiter: StabilityWaiter::new(config.stabilize),
        })
    }

    /// Replace the stabilization waiter
    pub fn with_waiter(mut self, waiter: StabilityWaiter) -> Self {
        self.waiter = waiter;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<Req, Resp>(&self, operation: &str, body: &Req) -> ApiResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        debug!(operation, endpoint = %self.endpoint, "calling control plane");

        let response = self
            .client
            .post(format!("{}/", self.endpoint))
            .header("X-Amz-Target", format!("{}.{}", TARGET_PREFIX, operation))
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            return Err(decode_error(status.as_u16(), &bytes));
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::Decode(format!("{} response: {}", operation, e)))
    }
}

/// Error body returned with non-2xx responses
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    error_type: Option<String>,
    #[serde(alias = "Message", default)]
    message: Option<String>,
}

fn decode_error(status: u16, body: &[u8]) -> ApiError {
    let parsed: Option<ErrorBody> = serde_json::from_slice(body).ok();
    let (code, message) = match parsed {
        Some(ErrorBody {
            error_type,
            message,
        }) => (
            error_type
                .as_deref()
                .map(strip_namespace)
                .unwrap_or("Unknown")
                .to_string(),
            message.unwrap_or_default(),
        ),
        None => (
            "Unknown".to_string(),
            String::from_utf8_lossy(body).into_owned(),
        ),
    };

    ApiError::Service {
        status,
        code,
        message,
    }
}

/// `com.amazonaws.ecs#ClientException` -> `ClientException`
fn strip_namespace(code: &str) -> &str {
    code.rsplit('#').next().unwrap_or(code)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DescribeServicesRequest<'a> {
    cluster: &'a str,
    services: &'a [String],
}

#[derive(Deserialize)]
struct DescribeServicesResponse {
    #[serde(default)]
    services: Vec<ServiceState>,
    #[serde(default)]
    failures: Vec<Failure>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterTaskDefinitionResponse {
    task_definition: TaskDefinitionRevision,
}

#[derive(Deserialize)]
struct ServiceResponse {
    service: ServiceState,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunTaskRequest<'a> {
    cluster: &'a str,
    task_definition: &'a str,
    count: u32,
}

#[derive(Serialize)]
struct DescribeTasksRequest<'a> {
    cluster: &'a str,
    tasks: &'a [String],
}

#[derive(Deserialize)]
struct DescribeTasksResponse {
    #[serde(default)]
    tasks: Vec<TaskStatus>,
    #[serde(default)]
    failures: Vec<Failure>,
}

impl DescribeTasksResponse {
    /// Failures are reported, not raised; a task not yet visible is retried by the caller
    fn into_tasks(self) -> Vec<TaskStatus> {
        for failure in &self.failures {
            debug!(
                arn = %failure.arn_or_unknown(),
                reason = %failure.describe(),
                "task not described"
            );
        }
        self.tasks
    }
}

/// A missing service is an empty match; anything else is an error
fn check_service_failures(failures: &[Failure]) -> ApiResult<()> {
    for failure in failures {
        if failure.reason.as_deref() == Some(REASON_MISSING) {
            debug!(arn = %failure.arn_or_unknown(), "service not found");
            continue;
        }
        return Err(ApiError::Failure {
            arn: failure.arn_or_unknown(),
            reason: failure.describe(),
        });
    }
    Ok(())
}

#[async_trait]
impl ControlApi for HttpControlApi {
    async fn register_task_definition(
        &self,
        spec: &TaskDefinitionSpec,
    ) -> ApiResult<TaskDefinitionRevision> {
        let response: RegisterTaskDefinitionResponse =
            self.call("RegisterTaskDefinition", spec).await?;
        Ok(response.task_definition)
    }

    async fn describe_services(
        &self,
        cluster: &str,
        names: &[String],
    ) -> ApiResult<Vec<ServiceState>> {
        let request = DescribeServicesRequest {
            cluster,
            services: names,
        };
        let response: DescribeServicesResponse = self.call("DescribeServices", &request).await?;
        check_service_failures(&response.failures)?;
        Ok(response.services)
    }

    async fn create_service(&self, params: &CreateServiceParams) -> ApiResult<ServiceState> {
        let response: ServiceResponse = self.call("CreateService", params).await?;
        Ok(response.service)
    }

    async fn update_service(&self, params: &UpdateServiceParams) -> ApiResult<ServiceState> {
        let response: ServiceResponse = self.call("UpdateService", params).await?;
        Ok(response.service)
    }

    async fn wait_until_services_stable(&self, cluster: &str, names: &[String]) -> ApiResult<()> {
        self.waiter.wait(self, cluster, names).await
    }

    async fn run_task(
        &self,
        cluster: &str,
        task_definition: &str,
        count: u32,
    ) -> ApiResult<RunTaskOutput> {
        let request = RunTaskRequest {
            cluster,
            task_definition,
            count,
        };
        self.call("RunTask", &request).await
    }

    async fn describe_tasks(&self, cluster: &str, arns: &[String]) -> ApiResult<Vec<TaskStatus>> {
        let request = DescribeTasksRequest {
            cluster,
            tasks: arns,
        };
        let response: DescribeTasksResponse = self.call("DescribeTasks", &request).await?;
        Ok(response.into_tasks())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_namespaced_error() {
        let body = br#"{"__type":"com.amazonaws.ecs#ClientException","message":"Cluster not found."}"#;
        match decode_error(400, body) {
            ApiError::Service {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 400);
                assert_eq!(code, "ClientException");
                assert_eq!(message, "Cluster not found.");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_decode_throttling_is_retryable() {
        let body = br#"{"__type":"ThrottlingException","Message":"Rate exceeded"}"#;
        let err = decode_error(400, body);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_decode_non_json_error_body() {
        match decode_error(502, b"Bad Gateway") {
            ApiError::Service { code, message, .. } => {
                assert_eq!(code, "Unknown");
                assert_eq!(message, "Bad Gateway");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_service_failure_is_ignored() {
        let failures = vec![Failure {
            arn: Some("arn:aws:ecs:us-east-1:123:service/prod/web".to_string()),
            reason: Some("MISSING".to_string()),
            detail: None,
        }];
        assert!(check_service_failures(&failures).is_ok());
    }

    #[test]
    fn test_other_service_failure_is_an_error() {
        let failures = vec![Failure {
            arn: Some("arn:aws:ecs:us-east-1:123:service/prod/web".to_string()),
            reason: Some("ACCESS_DENIED".to_string()),
            detail: None,
        }];
        let err = check_service_failures(&failures).unwrap_err();
        assert!(matches!(err, ApiError::Failure { ref reason, .. } if reason == "ACCESS_DENIED"));
    }

    #[test]
    fn test_missing_task_failure_yields_no_tasks() {
        let body = r#"{
            "tasks": [],
            "failures": [{"arn": "arn:aws:ecs:us-east-1:123:task/prod/0123abcd", "reason": "MISSING"}]
        }"#;
        let response: DescribeTasksResponse = serde_json::from_str(body).unwrap();
        assert!(response.into_tasks().is_empty());
    }

    #[test]
    fn test_request_bodies_use_control_plane_names() {
        let names = vec!["web".to_string()];
        let body = serde_json::to_value(DescribeServicesRequest {
            cluster: "prod",
            services: &names,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"cluster": "prod", "services": ["web"]}));

        let body = serde_json::to_value(RunTaskRequest {
            cluster: "prod",
            task_definition: "migrate:3",
            count: 1,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"cluster": "prod", "taskDefinition": "migrate:3", "count": 1})
        );
    }

    #[test]
    fn test_endpoint_trailing_slash_is_trimmed() {
        let api = HttpControlApi::new(HttpControlApiConfig {
            endpoint: "http://localhost:4566/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(api.endpoint(), "http://localhost:4566");
        assert_eq!(
            HttpControlApiConfig::for_region("eu-west-1").endpoint,
            "https://ecs.eu-west-1.amazonaws.com"
        );
    }
}
