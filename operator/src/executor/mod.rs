use crate::catalog::{DependencyKind, ResolvedDependency};
use crate::util::Error;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Client;
use kubernaut_common::{annotations, labels};
use kubernaut_types::*;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;

pub mod job;
pub mod pipeline;

/// Environment variable naming the target resource inside the workflow
/// container.
pub const TARGET_RESOURCE_ENV: &str = "TARGET_RESOURCE";

/// Name of the single container every backend runs.
pub const CONTAINER_NAME: &str = "workflow";

/// Derives the backend resource name from the target resource string.
/// Deterministic and stable across restarts; doubles as the lock key,
/// because two executions against the same target collide on it.
pub fn execution_name(target_resource: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(target_resource.as_bytes());
    let digest = hasher.finalize();
    format!("wfe-{}", hex::encode(&digest[..8]))
}

/// Resolves the execution timeout: the spec's `executionConfig.timeout`
/// when present, otherwise the controller default.
pub fn execution_timeout(
    wfe: &WorkflowExecution,
    default: Duration,
) -> Result<Duration, Error> {
    match wfe
        .spec
        .execution_config
        .as_ref()
        .and_then(|c| c.timeout.as_deref())
    {
        Some(timeout) => Ok(parse_duration::parse(timeout)?),
        None => Ok(default),
    }
}

/// Everything an adapter needs to shape a backend resource. The
/// service account always comes from controller configuration, never
/// from the spec.
pub struct ExecutionRequest<'a> {
    pub wfe: &'a WorkflowExecution,

    /// Deterministic backend name from [`execution_name`].
    pub name: String,

    /// The execution namespace.
    pub namespace: String,

    pub service_account: String,

    pub timeout: Duration,

    pub dependencies: Vec<ResolvedDependency>,
}

/// Outcome of a backend creation attempt. `AlreadyExists` is the lock
/// conflict indicator; `owner` carries the workflow-execution label of
/// the conflicting resource so the caller can decide adopt-vs-fail.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created,

    AlreadyExists { owner: Option<String> },
}

/// Observed backend state as a tagged variant, so phase translation
/// stays total and pattern-complete.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendState {
    Pending,

    Running {
        started_at: Option<Time>,
    },

    Succeeded {
        started_at: Option<Time>,
        completed_at: Option<Time>,
    },

    Failed {
        reason: String,
        message: String,
        exit_code: Option<i32>,
        started_at: Option<Time>,
        completed_at: Option<Time>,
        failed_task_name: Option<String>,
        failed_task_index: Option<i32>,
    },

    NotFound,
}

impl BackendState {
    pub fn started_at(&self) -> Option<&Time> {
        match self {
            BackendState::Running { started_at }
            | BackendState::Succeeded { started_at, .. }
            | BackendState::Failed { started_at, .. } => started_at.as_ref(),
            _ => None,
        }
    }

    pub fn completed_at(&self) -> Option<&Time> {
        match self {
            BackendState::Succeeded { completed_at, .. }
            | BackendState::Failed { completed_at, .. } => completed_at.as_ref(),
            _ => None,
        }
    }

    /// Summary mirror written to the resource status.
    pub fn summary(&self) -> ExecutionStatusSummary {
        match self {
            BackendState::Pending => ExecutionStatusSummary {
                state: "Pending".into(),
                reason: None,
                message: None,
            },
            BackendState::Running { .. } => ExecutionStatusSummary {
                state: "Running".into(),
                reason: None,
                message: None,
            },
            BackendState::Succeeded { .. } => ExecutionStatusSummary {
                state: "Succeeded".into(),
                reason: None,
                message: None,
            },
            BackendState::Failed {
                reason, message, ..
            } => ExecutionStatusSummary {
                state: "Failed".into(),
                reason: Some(reason.clone()),
                message: Some(message.clone()),
            },
            BackendState::NotFound => ExecutionStatusSummary {
                state: "NotFound".into(),
                reason: None,
                message: None,
            },
        }
    }
}

/// Common interface over the supported execution engines. Engine
/// resource shapes never leak above this trait; the reconciler only
/// sees names, [`CreateOutcome`], and [`BackendState`].
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn engine(&self) -> ExecutionEngine;

    /// Creates the backend resource in the execution namespace. An
    /// already-existing resource with the deterministic name is
    /// reported, not treated as an error.
    async fn create(
        &self,
        client: Client,
        request: &ExecutionRequest<'_>,
    ) -> Result<CreateOutcome, Error>;

    async fn status(
        &self,
        client: Client,
        namespace: &str,
        name: &str,
    ) -> Result<BackendState, Error>;

    /// Value of the workflow-execution label on the backend, used to
    /// distinguish a crash-retry adoption from a lock conflict.
    async fn owner(
        &self,
        client: Client,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, Error>;

    /// Deletes with background propagation; idempotent on not-found.
    async fn delete(&self, client: Client, namespace: &str, name: &str) -> Result<(), Error>;
}

pub fn backend_for(engine: ExecutionEngine) -> &'static dyn ExecutionBackend {
    match engine {
        ExecutionEngine::Job => &job::JobBackend,
        ExecutionEngine::Pipeline => &pipeline::PipelineBackend,
    }
}

/// Labels stamped on every backend resource (§ outbound contract).
pub fn backend_labels(request: &ExecutionRequest<'_>) -> BTreeMap<String, String> {
    let wfe = request.wfe;
    let mut out = BTreeMap::new();
    out.insert(
        labels::WORKFLOW_EXECUTION.to_owned(),
        wfe.metadata.name.clone().unwrap_or_default(),
    );
    out.insert(
        labels::WORKFLOW_ID.to_owned(),
        wfe.spec.workflow_ref.workflow_id.clone(),
    );
    out.insert(
        labels::EXECUTION_ENGINE.to_owned(),
        wfe.spec.execution_engine.to_string(),
    );
    out.insert(
        labels::SOURCE_NAMESPACE.to_owned(),
        wfe.metadata.namespace.clone().unwrap_or_default(),
    );
    out
}

pub fn backend_annotations(request: &ExecutionRequest<'_>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    out.insert(
        annotations::TARGET_RESOURCE.to_owned(),
        request.wfe.spec.target_resource.clone(),
    );
    out
}

/// Environment for the workflow container: `TARGET_RESOURCE` first,
/// then every parameter in key order.
pub fn backend_env(wfe: &WorkflowExecution) -> Vec<EnvVar> {
    let mut env = vec![EnvVar {
        name: TARGET_RESOURCE_ENV.to_owned(),
        value: Some(wfe.spec.target_resource.clone()),
        ..Default::default()
    }];
    for (key, value) in &wfe.spec.parameters {
        env.push(EnvVar {
            name: key.clone(),
            value: Some(value.clone()),
            ..Default::default()
        });
    }
    env
}

pub fn backend_volumes(dependencies: &[ResolvedDependency]) -> Vec<Volume> {
    dependencies
        .iter()
        .map(|dep| match dep.kind {
            DependencyKind::Secret => Volume {
                name: dep.volume_name(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(dep.name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            DependencyKind::ConfigMap => Volume {
                name: dep.volume_name(),
                config_map: Some(ConfigMapVolumeSource {
                    name: dep.name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
        })
        .collect()
}

pub fn backend_volume_mounts(dependencies: &[ResolvedDependency]) -> Vec<VolumeMount> {
    dependencies
        .iter()
        .map(|dep| VolumeMount {
            name: dep.volume_name(),
            mount_path: dep.mount_path.clone(),
            read_only: Some(true),
            ..Default::default()
        })
        .collect()
}

/// The single workflow container shared by both engines.
pub fn backend_container(request: &ExecutionRequest<'_>) -> Container {
    Container {
        name: CONTAINER_NAME.to_owned(),
        image: Some(request.wfe.spec.workflow_ref.container_image.clone()),
        env: Some(backend_env(request.wfe)),
        volume_mounts: if request.dependencies.is_empty() {
            None
        } else {
            Some(backend_volume_mounts(&request.dependencies))
        },
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ResolvedDependency;

    fn test_wfe() -> WorkflowExecution {
        let mut wfe = WorkflowExecution::new(
            "run-app-restart",
            WorkflowExecutionSpec {
                parent_ref: ParentRef {
                    name: "remediation-abc".into(),
                    namespace: "kubernaut-system".into(),
                },
                workflow_ref: WorkflowRef {
                    workflow_id: "restart-deployment".into(),
                    version: "1.2.0".into(),
                    container_image: "ghcr.io/kubernaut/restart@sha256:abc".into(),
                    container_digest: None,
                },
                target_resource: "ns-a/deployment/app".into(),
                parameters: [
                    ("REMEDIATION_TYPE".to_string(), "restart".to_string()),
                    ("TIMEOUT".to_string(), "300".to_string()),
                ]
                .into(),
                execution_engine: ExecutionEngine::Job,
                execution_config: None,
                confidence: None,
                rationale: None,
            },
        );
        wfe.metadata.namespace = Some("ns-a".into());
        wfe
    }

    fn test_request(wfe: &WorkflowExecution) -> ExecutionRequest<'_> {
        ExecutionRequest {
            name: execution_name(&wfe.spec.target_resource),
            namespace: "kubernaut-workflows".into(),
            service_account: "kubernaut-workflow-runner".into(),
            timeout: Duration::from_secs(600),
            dependencies: vec![
                ResolvedDependency::secret("creds"),
                ResolvedDependency::config_map("settings"),
            ],
            wfe,
        }
    }

    #[test]
    fn execution_name_is_deterministic() {
        let a = execution_name("ns-a/deployment/app");
        let b = execution_name("ns-a/deployment/app");
        assert_eq!(a, b);
        assert!(a.starts_with("wfe-"));
        // "wfe-" plus 8 bytes of digest in hex
        assert_eq!(a.len(), 4 + 16);
        assert!(a[4..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn execution_name_differs_per_target() {
        assert_ne!(
            execution_name("ns-a/deployment/app"),
            execution_name("ns-b/deployment/app")
        );
    }

    #[test]
    fn env_leads_with_target_resource() {
        let wfe = test_wfe();
        let env = backend_env(&wfe);
        assert_eq!(env[0].name, TARGET_RESOURCE_ENV);
        assert_eq!(env[0].value.as_deref(), Some("ns-a/deployment/app"));
        let names: Vec<&str> = env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["TARGET_RESOURCE", "REMEDIATION_TYPE", "TIMEOUT"]);
        assert_eq!(env[1].value.as_deref(), Some("restart"));
        assert_eq!(env[2].value.as_deref(), Some("300"));
    }

    #[test]
    fn labels_tie_backend_to_execution() {
        let wfe = test_wfe();
        let request = test_request(&wfe);
        let labels = backend_labels(&request);
        assert_eq!(
            labels.get("kubernaut.io/workflow-execution").unwrap(),
            "run-app-restart"
        );
        assert_eq!(
            labels.get("kubernaut.io/workflow-id").unwrap(),
            "restart-deployment"
        );
        assert_eq!(labels.get("kubernaut.io/execution-engine").unwrap(), "job");
        assert_eq!(labels.get("kubernaut.io/source-namespace").unwrap(), "ns-a");
        assert_eq!(
            backend_annotations(&request)
                .get("kubernaut.io/target-resource")
                .unwrap(),
            "ns-a/deployment/app"
        );
    }

    #[test]
    fn volumes_and_mounts_are_read_only_and_paired() {
        let deps = vec![
            ResolvedDependency::secret("creds"),
            ResolvedDependency::config_map("settings"),
        ];
        let volumes = backend_volumes(&deps);
        let mounts = backend_volume_mounts(&deps);
        assert_eq!(volumes.len(), 2);
        assert_eq!(mounts.len(), 2);
        assert_eq!(volumes[0].name, mounts[0].name);
        assert!(volumes[0].secret.is_some());
        assert_eq!(mounts[0].mount_path, "/run/kubernaut/secrets/creds");
        assert_eq!(mounts[0].read_only, Some(true));
        assert!(volumes[1].config_map.is_some());
        assert_eq!(mounts[1].mount_path, "/run/kubernaut/configmaps/settings");
    }

    #[test]
    fn timeout_prefers_spec_over_default() {
        let mut wfe = test_wfe();
        assert_eq!(
            execution_timeout(&wfe, Duration::from_secs(600)).unwrap(),
            Duration::from_secs(600)
        );
        wfe.spec.execution_config = Some(ExecutionConfig {
            timeout: Some("2m".into()),
            service_account_name: None,
        });
        assert_eq!(
            execution_timeout(&wfe, Duration::from_secs(600)).unwrap(),
            Duration::from_secs(120)
        );
        wfe.spec.execution_config = Some(ExecutionConfig {
            timeout: Some("not a duration".into()),
            service_account_name: None,
        });
        assert!(execution_timeout(&wfe, Duration::from_secs(600)).is_err());
    }
}
