//! Error types for ecs-deploy
//!
//! Two layers: [`ApiError`] for anything the control plane or the transport
//! reports, and [`DeployError`] for the deployment outcomes the orchestrator
//! surfaces to its caller.

use thiserror::Error;

/// Result type for deployment operations
pub type Result<T> = std::result::Result<T, DeployError>;

/// Result type for control API calls
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Control plane error codes worth retrying at the caller level
const RETRYABLE_CODES: &[&str] = &[
    "ThrottlingException",
    "Throttling",
    "RequestLimitExceeded",
    "ServerException",
    "ServiceUnavailable",
];

/// Errors reported by the control API client
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("control plane returned {status} {code}: {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("malformed control plane response: {0}")]
    Decode(String),

    #[error("control plane reported failure for {arn}: {reason}")]
    Failure { arn: String, reason: String },

    #[error("service {service} entered terminal status {status} while waiting for it to stabilize")]
    WaiterFailed { service: String, status: String },

    #[error("services did not stabilize after {attempts} attempts")]
    WaiterTimeout { attempts: u32 },

    #[error("wait cancelled")]
    Cancelled,
}

impl ApiError {
    /// Whether a caller-level retry has a chance of succeeding
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            ApiError::Service { status, code, .. } => {
                *status >= 500 || RETRYABLE_CODES.contains(&code.as_str())
            }
            _ => false,
        }
    }
}

/// Deployment error types
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("failed to register task definition {family}: {source}")]
    Registration {
        family: String,
        #[source]
        source: ApiError,
    },

    #[error("{count} services named {name} found in cluster {cluster}, refusing to pick one")]
    AmbiguousService {
        cluster: String,
        name: String,
        count: usize,
    },

    #[error("service {service} did not reach a steady state: {source}")]
    Stabilization {
        service: String,
        #[source]
        source: ApiError,
    },

    #[error("task {arn} could not be placed: {reason}")]
    Placement { arn: String, reason: String },

    #[error("task {task_arn} container exited with non-zero exit code: {code}")]
    NonZeroExit { task_arn: String, code: i32 },

    #[error("task {task_arn} stopped without an exit code: {reason}")]
    TaskStopped { task_arn: String, reason: String },

    #[error("timed out waiting for task {task_arn} after {attempts} attempts")]
    Timeout { task_arn: String, attempts: u32 },

    #[error("deployment cancelled")]
    Cancelled,

    #[error("control API error: {0}")]
    Api(#[from] ApiError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl DeployError {
    /// Short stable name of the failure kind, used in the final report line
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::Registration { .. } => "registration",
            DeployError::AmbiguousService { .. } => "ambiguous-service",
            DeployError::Stabilization { .. } => "stabilization",
            DeployError::Placement { .. } => "placement",
            DeployError::NonZeroExit { .. } => "non-zero-exit",
            DeployError::TaskStopped { .. } => "task-stopped",
            DeployError::Timeout { .. } => "timeout",
            DeployError::Cancelled => "cancelled",
            DeployError::Api(_) => "control-api",
            DeployError::InvalidConfig(_) => "invalid-config",
            DeployError::Io(_) => "io",
            DeployError::Json(_) => "json",
            DeployError::Yaml(_) => "yaml",
        }
    }

    /// Whether the failure came from the transport and may succeed on retry.
    ///
    /// Domain failures (ambiguous service, non-zero exit, timeout, ...) are
    /// never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeployError::Registration { source, .. } | DeployError::Api(source) => {
                source.is_retryable()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_error(status: u16, code: &str) -> ApiError {
        ApiError::Service {
            status,
            code: code.to_string(),
            message: "boom".to_string(),
        }
    }

    #[test]
    fn test_throttling_is_retryable() {
        assert!(service_error(400, "ThrottlingException").is_retryable());
        assert!(service_error(503, "Unknown").is_retryable());
        assert!(!service_error(400, "ClientException").is_retryable());
        assert!(!service_error(400, "AccessDeniedException").is_retryable());
    }

    #[test]
    fn test_domain_errors_are_not_retryable() {
        let err = DeployError::NonZeroExit {
            task_arn: "arn:task/1".to_string(),
            code: 1,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "non-zero-exit");

        let err = DeployError::Timeout {
            task_arn: "arn:task/1".to_string(),
            attempts: 50,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_registration_delegates_retryability() {
        let err = DeployError::Registration {
            family: "web".to_string(),
            source: service_error(400, "ThrottlingException"),
        };
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "registration");
    }

    #[test]
    fn test_placement_message_carries_reason() {
        let err = DeployError::Placement {
            arn: "arn:container-instance/abc".to_string(),
            reason: "RESOURCE:MEMORY".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("arn:container-instance/abc"));
        assert!(msg.contains("RESOURCE:MEMORY"));
    }
}
