use kube::CustomResourceExt;
use kubernaut_types::*;
use std::fs;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/kubernaut.io_workflowexecutions_crd.yaml",
        serde_yaml::to_string(&WorkflowExecution::crd()).unwrap(),
    )
    .unwrap();
}
