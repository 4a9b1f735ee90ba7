pub mod args;
pub mod shutdown;

pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);

    install_rustls_provider();
}

pub fn install_rustls_provider() {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("install aws-lc-rs provider");
}

pub fn signal_ready() {
    std::fs::write("/etc/ready", "ready").expect("Failed to write readiness file");
}

/// Labels stamped onto every backend execution resource. Downstream
/// tooling selects on these, so they are part of the outbound contract.
pub mod labels {
    /// Name of the owning WorkflowExecution resource.
    pub const WORKFLOW_EXECUTION: &str = "kubernaut.io/workflow-execution";

    pub const WORKFLOW_ID: &str = "kubernaut.io/workflow-id";

    pub const EXECUTION_ENGINE: &str = "kubernaut.io/execution-engine";

    /// Namespace of the owning WorkflowExecution (backends all live in
    /// the execution namespace, which is usually a different one).
    pub const SOURCE_NAMESPACE: &str = "kubernaut.io/source-namespace";
}

pub mod annotations {
    pub const TARGET_RESOURCE: &str = "kubernaut.io/target-resource";

    /// Sha256 of the WorkflowExecution spec, stamped at first reconcile
    /// and used to reject later spec mutation.
    pub const SPEC_HASH: &str = "kubernaut.io/spec-hash";
}
