use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Reference to the orchestrator record that authored this
/// [`WorkflowExecution`]. Its `name` doubles as the correlation
/// identifier carried by every audit record and event.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ParentRef {
    pub name: String,

    pub namespace: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct WorkflowRef {
    #[serde(rename = "workflowId")]
    pub workflow_id: String,

    pub version: String,

    /// Container image reference. Must be pinned to an immutable
    /// digest, either inline (`...@sha256:...`) or via `containerDigest`.
    #[serde(rename = "containerImage")]
    pub container_image: String,

    #[serde(rename = "containerDigest")]
    pub container_digest: Option<String>,
}

/// Advisory execution tuning. `serviceAccountName` is accepted for
/// schema compatibility but never honored; workflows always run under
/// the controller-configured service account.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ExecutionConfig {
    /// Execution timeout, e.g. `"10m"`.
    pub timeout: Option<String>,

    #[serde(rename = "serviceAccountName")]
    pub service_account_name: Option<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "kubernaut.io",
    version = "v1",
    kind = "WorkflowExecution",
    plural = "workflowexecutions",
    shortname = "wfe",
    derive = "PartialEq",
    status = "WorkflowExecutionStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".spec.targetResource\", \"name\": \"TARGET\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.lastUpdated\", \"name\": \"AGE\", \"type\": \"date\" }"
)]
pub struct WorkflowExecutionSpec {
    #[serde(rename = "parentRef")]
    pub parent_ref: ParentRef,

    #[serde(rename = "workflowRef")]
    pub workflow_ref: WorkflowRef,

    /// The cluster object the workflow acts upon, either
    /// `<namespace>/<kind>/<name>` or `<kind>/<name>` for
    /// cluster-scoped targets. Also the locking key: at most one
    /// non-terminal WorkflowExecution may reference it at a time.
    #[serde(rename = "targetResource")]
    pub target_resource: String,

    /// Opaque parameters handed to the workflow container as
    /// environment variables. Keys must be upper snake case.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    #[serde(default, rename = "executionEngine")]
    pub execution_engine: ExecutionEngine,

    #[serde(rename = "executionConfig")]
    pub execution_config: Option<ExecutionConfig>,

    pub confidence: Option<String>,

    pub rationale: Option<String>,
}

impl WorkflowExecution {
    /// The stable cross-service join key: the name of the parent
    /// orchestrator record. Survives re-creation of this resource.
    pub fn correlation_id(&self) -> &str {
        &self.spec.parent_ref.name
    }
}

/// Backend engine variant. A third engine is added by implementing the
/// executor adapter operations and extending this enum.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionEngine {
    #[default]
    Pipeline,

    Job,
}

impl FromStr for ExecutionEngine {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pipeline" => Ok(ExecutionEngine::Pipeline),
            "job" => Ok(ExecutionEngine::Job),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ExecutionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionEngine::Pipeline => write!(f, "pipeline"),
            ExecutionEngine::Job => write!(f, "job"),
        }
    }
}

/// Status object for the [`WorkflowExecution`] resource. Mutated only
/// by the controller, in a single patch per reconcile.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct WorkflowExecutionStatus {
    /// A short description of the [`WorkflowExecution`]'s current state.
    pub phase: WorkflowExecutionPhase,

    /// A human-readable message indicating details about why the
    /// [`WorkflowExecution`] is in this phase.
    pub message: Option<String>,

    /// Last spec generation the controller has reconciled.
    #[serde(rename = "observedGeneration")]
    pub observed_generation: Option<i64>,

    #[serde(rename = "startTime")]
    pub start_time: Option<Time>,

    #[serde(rename = "completionTime")]
    pub completion_time: Option<Time>,

    /// Wall-clock duration between start and completion, in seconds.
    pub duration: Option<String>,

    /// Name of the backend execution resource in the execution
    /// namespace. Set once the backend has been created or adopted.
    #[serde(rename = "executionRef")]
    pub execution_ref: Option<String>,

    /// Summary mirror of the backend resource's status.
    #[serde(rename = "executionStatus")]
    pub execution_status: Option<ExecutionStatusSummary>,

    #[serde(rename = "failureDetails")]
    pub failure_details: Option<FailureDetails>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Set when the terminal audit record for this resource has been
    /// handed to the audit pipeline. Its absence on a terminal resource
    /// means the record must be re-emitted.
    #[serde(rename = "auditRecordedAt")]
    pub audit_recorded_at: Option<Time>,

    /// Timestamp of when the status object was last updated.
    #[serde(rename = "lastUpdated")]
    pub last_updated: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct ExecutionStatusSummary {
    pub state: String,

    pub reason: Option<String>,

    pub message: Option<String>,
}

/// A short description of the [`WorkflowExecution`] resource's current state.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum WorkflowExecutionPhase {
    /// The resource first appeared to the controller, or is waiting
    /// out a cooldown window on its target.
    #[default]
    Pending,

    /// The backend execution resource exists and has not finished.
    Running,

    /// The backend reported terminal success.
    Completed,

    /// Validation, locking, or the backend itself failed.
    Failed,
}

impl WorkflowExecutionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowExecutionPhase::Completed | WorkflowExecutionPhase::Failed
        )
    }
}

impl FromStr for WorkflowExecutionPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(WorkflowExecutionPhase::Pending),
            "Running" => Ok(WorkflowExecutionPhase::Running),
            "Completed" => Ok(WorkflowExecutionPhase::Completed),
            "Failed" => Ok(WorkflowExecutionPhase::Failed),
            _ => Err(()),
        }
    }
}

impl fmt::Display for WorkflowExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowExecutionPhase::Pending => write!(f, "Pending"),
            WorkflowExecutionPhase::Running => write!(f, "Running"),
            WorkflowExecutionPhase::Completed => write!(f, "Completed"),
            WorkflowExecutionPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Closed failure classification set. `was_execution_failure` tells the
/// orchestrator whether the workflow container actually ran, and thus
/// whether side effects may already have occurred.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum FailureReason {
    #[serde(rename = "OOMKilled")]
    OomKilled,

    DeadlineExceeded,

    Forbidden,

    ImagePullBackOff,

    ResourceExhausted,

    ConfigurationError,

    TaskFailed,

    #[default]
    Unknown,
}

impl FailureReason {
    /// True when the workflow container is known to have started, so a
    /// blind retry is not safe.
    pub fn was_execution_failure(&self) -> bool {
        matches!(
            self,
            FailureReason::OomKilled
                | FailureReason::DeadlineExceeded
                | FailureReason::Forbidden
                | FailureReason::TaskFailed
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::OomKilled => write!(f, "OOMKilled"),
            FailureReason::DeadlineExceeded => write!(f, "DeadlineExceeded"),
            FailureReason::Forbidden => write!(f, "Forbidden"),
            FailureReason::ImagePullBackOff => write!(f, "ImagePullBackOff"),
            FailureReason::ResourceExhausted => write!(f, "ResourceExhausted"),
            FailureReason::ConfigurationError => write!(f, "ConfigurationError"),
            FailureReason::TaskFailed => write!(f, "TaskFailed"),
            FailureReason::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Structured failure record populated when `phase` is `Failed`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct FailureDetails {
    pub reason: FailureReason,

    pub message: String,

    /// Natural-language summary of the failure for notification and
    /// LLM consumers downstream.
    pub summary: Option<String>,

    #[serde(rename = "wasExecutionFailure")]
    pub was_execution_failure: bool,

    #[serde(rename = "exitCode")]
    pub exit_code: Option<i32>,

    #[serde(rename = "failedTaskName")]
    pub failed_task_name: Option<String>,

    #[serde(rename = "failedTaskIndex")]
    pub failed_task_index: Option<i32>,
}

/// Parsed form of [`WorkflowExecutionSpec::target_resource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetResource {
    /// Absent for cluster-scoped targets.
    pub namespace: Option<String>,

    pub kind: String,

    pub name: String,
}

impl FromStr for TargetResource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(format!("target resource '{}' has an empty segment", s));
        }
        match parts.as_slice() {
            [kind, name] => Ok(TargetResource {
                namespace: None,
                kind: kind.to_string(),
                name: name.to_string(),
            }),
            [namespace, kind, name] => Ok(TargetResource {
                namespace: Some(namespace.to_string()),
                kind: kind.to_string(),
                name: name.to_string(),
            }),
            _ => Err(format!(
                "target resource '{}' must be '<namespace>/<kind>/<name>' or '<kind>/<name>'",
                s
            )),
        }
    }
}

impl fmt::Display for TargetResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", ns, self.kind, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}
