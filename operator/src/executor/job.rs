use super::*;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};
use kube::{
    Api,
    api::{DeleteParams, ObjectMeta, PostParams, PropagationPolicy},
};

/// Runs workflows as batch Jobs. The Job carries a backoff limit of
/// zero: retry policy belongs to the orchestrator, not the engine.
pub struct JobBackend;

fn build_job(request: &ExecutionRequest<'_>) -> Job {
    let labels = backend_labels(request);
    Job {
        metadata: ObjectMeta {
            name: Some(request.name.clone()),
            namespace: Some(request.namespace.clone()),
            labels: Some(labels.clone()),
            annotations: Some(backend_annotations(request)),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            active_deadline_seconds: Some(request.timeout.as_secs() as i64),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![backend_container(request)],
                    restart_policy: Some("Never".to_owned()),
                    service_account_name: Some(request.service_account.clone()),
                    volumes: if request.dependencies.is_empty() {
                        None
                    } else {
                        Some(backend_volumes(&request.dependencies))
                    },
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

#[async_trait]
impl ExecutionBackend for JobBackend {
    fn engine(&self) -> ExecutionEngine {
        ExecutionEngine::Job
    }

    async fn create(
        &self,
        client: Client,
        request: &ExecutionRequest<'_>,
    ) -> Result<CreateOutcome, Error> {
        let job = build_job(request);
        let api: Api<Job> = Api::namespaced(client.clone(), &request.namespace);
        match api.create(&PostParams::default(), &job).await {
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
        let api: Api<Job> = Api::namespaced(client, namespace);
        let job = match api.get(name).await {
            Ok(job) => job,
            Err(kube::Error::Api(ae)) if ae.code == 404 => return Ok(BackendState::NotFound),
            Err(e) => return Err(e.into()),
        };
        let status = job.status.unwrap_or_default();
        let conditions = status.conditions.unwrap_or_default();

        if let Some(complete) = conditions
            .iter()
            .find(|c| c.type_ == "Complete" && c.status == "True")
        {
            return Ok(BackendState::Succeeded {
                started_at: status.start_time,
                completed_at: status
                    .completion_time
                    .or_else(|| complete.last_transition_time.clone()),
            });
        }

        if let Some(failed) = conditions
            .iter()
            .find(|c| c.type_ == "Failed" && c.status == "True")
        {
            return Ok(BackendState::Failed {
                reason: failed.reason.clone().unwrap_or_default(),
                message: failed.message.clone().unwrap_or_default(),
                // Jobs do not surface container exit codes on the
                // condition; pods are gone by the time we look.
                exit_code: None,
                started_at: status.start_time,
                completed_at: failed.last_transition_time.clone(),
                failed_task_name: None,
                failed_task_index: None,
            });
        }

        if status.start_time.is_some() {
            return Ok(BackendState::Running {
                started_at: status.start_time,
            });
        }
        Ok(BackendState::Pending)
    }

    async fn owner(
        &self,
        client: Client,
        namespace: &str,
        name: &str,
    ) -> Result<Option<String>, Error> {
        let api: Api<Job> = Api::namespaced(client, namespace);
        match api.get(name).await {
            Ok(job) => Ok(job
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
        let api: Api<Job> = Api::namespaced(client, namespace);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ResolvedDependency;

    fn request_with_spec_service_account() -> (WorkflowExecution, &'static str) {
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
                execution_config: Some(ExecutionConfig {
                    timeout: None,
                    // Spec-level service account, which the adapter ignores.
                    service_account_name: Some("cluster-admin-sa".into()),
                }),
                confidence: None,
                rationale: None,
            },
        );
        wfe.metadata.namespace = Some("ns-a".into());
        (wfe, "kubernaut-workflow-runner")
    }

    #[test]
    fn job_shape_matches_contract() {
        let (wfe, sa) = request_with_spec_service_account();
        let request = ExecutionRequest {
            name: execution_name(&wfe.spec.target_resource),
            namespace: "kubernaut-workflows".into(),
            service_account: sa.into(),
            timeout: std::time::Duration::from_secs(600),
            dependencies: vec![ResolvedDependency::secret("creds")],
            wfe: &wfe,
        };
        let job = build_job(&request);

        assert_eq!(job.metadata.namespace.as_deref(), Some("kubernaut-workflows"));
        assert!(job.metadata.name.as_deref().unwrap().starts_with("wfe-"));

        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        assert_eq!(spec.active_deadline_seconds, Some(600));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        // The spec-level service account is advisory only.
        assert_eq!(pod.service_account_name.as_deref(), Some(sa));

        let container = &pod.containers[0];
        assert_eq!(container.name, CONTAINER_NAME);
        let env = container.env.as_ref().unwrap();
        let env_pairs: Vec<(&str, &str)> = env
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_deref().unwrap_or("")))
            .collect();
        assert!(env_pairs.contains(&("TARGET_RESOURCE", "ns-a/deployment/app")));
        assert!(env_pairs.contains(&("REMEDIATION_TYPE", "restart")));
        assert!(env_pairs.contains(&("TIMEOUT", "300")));

        let mounts = container.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, "/run/kubernaut/secrets/creds");
        assert_eq!(pod.volumes.as_ref().unwrap().len(), 1);
    }
}
