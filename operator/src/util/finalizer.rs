use crate::util::Error;
use kube::{
    Api, Client,
    api::{Patch, PatchParams},
};
use kubernaut_types::WorkflowExecution;
use serde_json::{Value, json};

/// Finalizer held on every managed WorkflowExecution until its backend
/// execution resource is confirmed gone.
pub const FINALIZER_NAME: &str = "kubernaut.io/workflowexecution";

/// Adds the finalizer to the resource. A merge patch replaces the whole
/// finalizers array, which is safe here because this controller is the
/// only finalizer owner on the resource.
pub async fn add(
    client: Client,
    name: &str,
    namespace: &str,
) -> Result<WorkflowExecution, Error> {
    let api: Api<WorkflowExecution> = Api::namespaced(client, namespace);
    let patch: Value = json!({
        "metadata": {
            "finalizers": [FINALIZER_NAME]
        }
    });
    Ok(api
        .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?)
}

/// Removes all finalizers, allowing Kubernetes to garbage collect the
/// resource.
pub async fn delete(
    client: Client,
    name: &str,
    namespace: &str,
) -> Result<WorkflowExecution, Error> {
    let api: Api<WorkflowExecution> = Api::namespaced(client, namespace);
    let patch: Value = json!({
        "metadata": {
            "finalizers": []
        }
    });
    Ok(api
        .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?)
}
