//! In-memory control plane and sleeper for unit tests

use crate::control::types::{
    CreateServiceParams, RunTaskOutput, ServiceState, TaskDefinitionRevision, TaskDefinitionSpec,
    TaskStatus, UpdateServiceParams, STATUS_ACTIVE,
};
use crate::control::ControlApi;
use crate::error::{ApiError, ApiResult};
use crate::poll::Sleeper;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Task ARN handed out by the default RunTask response
pub const TASK_ARN: &str = "arn:aws:ecs:us-east-1:123456789012:task/prod/0123abcd";

#[derive(Default)]
struct Script {
    calls: Vec<String>,
    revisions: i64,
    register_error: Option<ApiError>,
    services: VecDeque<ApiResult<Vec<ServiceState>>>,
    stabilize_error: Option<ApiError>,
    run_task: Option<ApiResult<RunTaskOutput>>,
    tasks: VecDeque<ApiResult<Vec<TaskStatus>>>,
    created: Vec<CreateServiceParams>,
    updated: Vec<UpdateServiceParams>,
}

/// Control plane fake answering from scripted responses and recording every call
#[derive(Default)]
pub struct ScriptedControlApi {
    script: Mutex<Script>,
}

impl ScriptedControlApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_registration(&self, err: ApiError) {
        self.script.lock().unwrap().register_error = Some(err);
    }

    /// Queue the result of the next DescribeServices call
    pub fn push_services(&self, services: Vec<ServiceState>) {
        self.script.lock().unwrap().services.push_back(Ok(services));
    }

    pub fn push_services_error(&self, err: ApiError) {
        self.script.lock().unwrap().services.push_back(Err(err));
    }

    pub fn fail_stabilization(&self, err: ApiError) {
        self.script.lock().unwrap().stabilize_error = Some(err);
    }

    pub fn set_run_task(&self, output: ApiResult<RunTaskOutput>) {
        self.script.lock().unwrap().run_task = Some(output);
    }

    /// Queue the state returned by the next DescribeTasks call
    pub fn push_task(&self, task: TaskStatus) {
        self.script.lock().unwrap().tasks.push_back(Ok(vec![task]));
    }

    /// Queue a DescribeTasks call that does not see the task yet
    pub fn push_missing_task(&self) {
        self.script.lock().unwrap().tasks.push_back(Ok(Vec::new()));
    }

    pub fn push_task_error(&self, err: ApiError) {
        self.script.lock().unwrap().tasks.push_back(Err(err));
    }

    /// Names of the operations invoked so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, op: &str) -> usize {
        self.script
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == op)
            .count()
    }

    pub fn created(&self) -> Vec<CreateServiceParams> {
        self.script.lock().unwrap().created.clone()
    }

    pub fn updated(&self) -> Vec<UpdateServiceParams> {
        self.script.lock().unwrap().updated.clone()
    }

    fn record(&self, op: &str) {
        self.script.lock().unwrap().calls.push(op.to_string());
    }
}

#[async_trait]
impl ControlApi for ScriptedControlApi {
    async fn register_task_definition(
        &self,
        spec: &TaskDefinitionSpec,
    ) -> ApiResult<TaskDefinitionRevision> {
        self.record("register_task_definition");
        let mut script = self.script.lock().unwrap();
        if let Some(err) = script.register_error.take() {
            return Err(err);
        }

        script.revisions += 1;
        Ok(TaskDefinitionRevision {
            task_definition_arn: format!(
                "arn:aws:ecs:us-east-1:123456789012:task-definition/{}:{}",
                spec.family, script.revisions
            ),
            family: spec.family.clone(),
            revision: script.revisions,
        })
    }

    async fn describe_services(
        &self,
        _cluster: &str,
        _names: &[String],
    ) -> ApiResult<Vec<ServiceState>> {
        self.record("describe_services");
        self.script
            .lock()
            .unwrap()
            .services
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Decode("no scripted services left".to_string())))
    }

    async fn create_service(&self, params: &CreateServiceParams) -> ApiResult<ServiceState> {
        self.record("create_service");
        self.script.lock().unwrap().created.push(params.clone());
        Ok(ServiceState {
            service_name: params.service_name.clone(),
            service_arn: Some(format!(
                "arn:aws:ecs:us-east-1:123456789012:service/{}/{}",
                params.cluster, params.service_name
            )),
            status: STATUS_ACTIVE.to_string(),
            task_definition: Some(params.task_definition.clone()),
            desired_count: params.desired_count,
            ..Default::default()
        })
    }

    async fn update_service(&self, params: &UpdateServiceParams) -> ApiResult<ServiceState> {
        self.record("update_service");
        self.script.lock().unwrap().updated.push(params.clone());
        Ok(ServiceState {
            service_name: params.service.clone(),
            service_arn: Some(format!(
                "arn:aws:ecs:us-east-1:123456789012:service/{}/{}",
                params.cluster, params.service
            )),
            status: STATUS_ACTIVE.to_string(),
            task_definition: Some(params.task_definition.clone()),
            desired_count: params.desired_count,
            ..Default::default()
        })
    }

    async fn wait_until_services_stable(&self, _cluster: &str, _names: &[String]) -> ApiResult<()> {
        self.record("wait_until_services_stable");
        match self.script.lock().unwrap().stabilize_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn run_task(
        &self,
        _cluster: &str,
        _task_definition: &str,
        _count: u32,
    ) -> ApiResult<RunTaskOutput> {
        self.record("run_task");
        self.script.lock().unwrap().run_task.take().unwrap_or_else(|| {
            Ok(RunTaskOutput {
                tasks: vec![TaskStatus {
                    task_arn: TASK_ARN.to_string(),
                    last_status: Some("PROVISIONING".to_string()),
                    ..Default::default()
                }],
                failures: Vec::new(),
            })
        })
    }

    async fn describe_tasks(&self, _cluster: &str, _arns: &[String]) -> ApiResult<Vec<TaskStatus>> {
        self.record("describe_tasks");
        self.script
            .lock()
            .unwrap()
            .tasks
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Decode("no scripted tasks left".to_string())))
    }
}

/// Sleeper that records requested delays and returns immediately
#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}
