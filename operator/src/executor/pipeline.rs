use super::*;
use k8s_openapi::api::core::v1::{EnvVar, Volume, VolumeMount};
use kube::{
    Api, CustomResource,
    api::{DeleteParams, ObjectMeta, PostParams, PropagationPolicy},
};
use serde::{Deserialize, Serialize};

/// Name of the single pipeline task wrapping the workflow container.
const PIPELINE_TASK_NAME: &str = "workflow";

/// Client-side shape of a Tekton PipelineRun, reduced to the fields
/// this controller writes and reads. The CRD itself is owned by the
/// pipeline engine installation.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default)]
#[kube(
    group = "tekton.dev",
    version = "v1",
    kind = "PipelineRun",
    plural = "pipelineruns",
    namespaced,
    status = "PipelineRunStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_spec: Option<PipelineDefinition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_run_template: Option<TaskRunTemplate>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeouts: Option<PipelineTimeouts>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PipelineDefinition {
    pub tasks: Vec<PipelineTask>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PipelineTask {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_spec: Option<EmbeddedTask>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct EmbeddedTask {
    pub steps: Vec<Step>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<Volume>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: String,

    pub image: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVar>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_mounts: Option<Vec<VolumeMount>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunTemplate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct PipelineTimeouts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunStatus {
    #[serde(default)]
    pub conditions: Vec<RunCondition>,

    pub start_time: Option<Time>,

    pub completion_time: Option<Time>,

    #[serde(default)]
    pub child_references: Vec<ChildReference>,
}

/// Knative-style condition as reported by the pipeline engine. Unlike
/// `metav1.Condition`, every field except `type` and `status` may be
/// absent.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct RunCondition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: String,

    #[serde(default)]
    pub reason: Option<String>,

    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChildReference {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub pipeline_task_name: Option<String>,
}

/// Runs workflows as pipeline runs with a single embedded task. Task
/// retries default to zero in the engine, which matches the contract:
/// the controller owns retry policy.
pub struct PipelineBackend;

fn build_pipeline_run(request: &ExecutionRequest<'_>) -> PipelineRun {
    let step = Step {
        name: CONTAINER_NAME.to_owned(),
        image: request.wfe.spec.workflow_ref.container_image.clone(),
        env: Some(backend_env(request.wfe)),
        volume_mounts: if request.dependencies.is_empty() {
            None
        } else {
            Some(backend_volume_mounts(&request.dependencies))
        },
    };
    let mut run = PipelineRun::new(
        &request.name,
        PipelineRunSpec {
            pipeline_spec: Some(PipelineDefinition {
                tasks: vec![PipelineTask {
                    name: PIPELINE_TASK_NAME.to_owned(),
                    task_spec: Some(EmbeddedTask {
                        steps: vec![step],
                        volumes: if request.dependencies.is_empty() {
                            None
                        } else {
                            Some(backend_volumes(&request.dependencies))
                        },
                    }),
                }],
            }),
            task_run_template: Some(TaskRunTemplate {
                service_account_name: Some(request.service_account.clone()),
            }),
            timeouts: Some(PipelineTimeouts {
                pipeline: Some(format!("{}s", request.timeout.as_secs())),
            }),
        },
    );
    run.metadata = ObjectMeta {
        name: Some(request.name.clone()),
        namespace: Some(request.namespace.clone()),
        labels: Some(backend_labels(request)),
        annotations: Some(backend_annotations(request)),
        ..Default::default()
    };
    run
}

fn state_from_status(status: &PipelineRunStatus) -> BackendState {
    let succeeded = status.conditions.iter().find(|c| c.type_ == "Succeeded");
    match succeeded.map(|c| c.status.as_str()) {
        Some("True") => BackendState::Succeeded {
            started_at: status.start_time.clone(),
            completed_at: status.completion_time.clone(),
        },
        Some("False") => {
            let condition = succeeded.unwrap();
            let reason = condition.reason.clone().unwrap_or_default();
            // With a single embedded task, a task-level failure always
            // points at that task.
            let failed_task = if reason == "Failed" {
                status
                    .child_references
                    .first()
                    .and_then(|c| c.pipeline_task_name.clone())
                    .or_else(|| Some(PIPELINE_TASK_NAME.to_owned()))
            } else {
                None
            };
            BackendState::Failed {
                reason,
                message: condition.message.clone().unwrap_or_default(),
                exit_code: None,
                started_at: status.start_time.clone(),
                completed_at: status.completion_time.clone(),
                failed_task_index: failed_task.as_ref().map(|_| 0),
                failed_task_name: failed_task,
            }
        }
        _ => {
            if status.start_time.is_some() {
                BackendState::Running {
                    started_at: status.start_time.clone(),
                }
            } else {
                BackendState::Pending
            }
        }
    }
}

#[async_trait]
impl ExecutionBackend for PipelineBackend {
    fn engine(&self) -> ExecutionEngine {
        ExecutionEngine::Pipeline
    }

    async fn create(
        &self,
        client: Client,
        request: &ExecutionRequest<'_>,
    ) -> Result<CreateOutcome, Error> {
        let run = build_pipeline_run(request);
        let api: Api<PipelineRun> = Api::namespaced(client.clone(), &request.namespace);
        match api.create(&PostParams::default(), &run).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                let owner = self
                    .owner(client, &request.namespace, &request.name)
                    .await?;
                Ok(CreateOutcome::AlreadyExists { owner })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn status(
        &self,
        client: Client,
        namespace: &str,
        name: &str,
    ) -> Result<BackendState, Error> {
        let api: Api<PipelineRun> = Api::namespaced(client, namespace);
        match api.get(name).await {
            Ok(run) => Ok(run
                .status
                .as_ref()
                .map(state_from_status)
                .unwrap_or(BackendState::Pending)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(BackendState::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    async fn owner(
        &self,
        client: Client,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, Error> {
        let api: Api<PipelineRun> = Api::namespaced(client, namespace);
        match api.get(name).await {
            Ok(run) => Ok(run
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get(kubernaut_common::labels::WORKFLOW_EXECUTION))
                .cloned()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, client: Client, namespace: &str, name: &str) -> Result<(), Error> {
        let api: Api<PipelineRun> = Api::namespaced(client, namespace);
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        match api.delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
