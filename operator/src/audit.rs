use crate::util::Error;
use kubernaut_common::args::AuditArgs;
use kubernaut_types::*;
use owo_colors::OwoColorize;
use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const ACTOR_ID: &str = "workflowexecution-controller";
const EVENT_CATEGORY: &str = "workflowexecution";
const RESOURCE_TYPE: &str = "WorkflowExecution";

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// Flat payload carried by every audit record. No nested workflow-ref
/// objects; downstream joins happen on `correlationId`.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEventData {
    pub workflow_id: String,

    pub workflow_version: String,

    pub container_image: String,

    pub phase: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipelinerun_name: Option<String>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub event_type: String,

    pub event_category: String,

    pub event_action: String,

    pub event_outcome: AuditOutcome,

    pub actor_id: String,

    pub correlation_id: String,

    pub resource_type: String,

    pub resource_id: String,

    pub namespace: String,

    pub event_data: AuditEventData,
}

impl AuditRecord {
    fn lifecycle(
        wfe: &WorkflowExecution,
        action: &str,
        outcome: AuditOutcome,
        phase: WorkflowExecutionPhase,
        backend_name: Option<&str>,
    ) -> Self {
        AuditRecord {
            event_type: format!("{}.{}", EVENT_CATEGORY, action),
            event_category: EVENT_CATEGORY.to_owned(),
            event_action: action.to_owned(),
            event_outcome: outcome,
            actor_id: ACTOR_ID.to_owned(),
            correlation_id: wfe.correlation_id().to_owned(),
            resource_type: RESOURCE_TYPE.to_owned(),
            resource_id: wfe.metadata.name.clone().unwrap_or_default(),
            namespace: wfe.metadata.namespace.clone().unwrap_or_default(),
            event_data: AuditEventData {
                workflow_id: wfe.spec.workflow_ref.workflow_id.clone(),
                workflow_version: wfe.spec.workflow_ref.version.clone(),
                container_image: wfe.spec.workflow_ref.container_image.clone(),
                phase: phase.to_string(),
                pipelinerun_name: backend_name.map(str::to_owned),
            },
        }
    }

    /// Spec validation and dependency resolution succeeded.
    pub fn selection_completed(wfe: &WorkflowExecution) -> Self {
        Self::lifecycle(
            wfe,
            "selection.completed",
            AuditOutcome::Success,
            WorkflowExecutionPhase::Pending,
            None,
        )
    }

    /// The backend execution resource was created or adopted.
    pub fn execution_started(wfe: &WorkflowExecution, backend_name: &str) -> Self {
        Self::lifecycle(
            wfe,
            "execution.started",
            AuditOutcome::Success,
            WorkflowExecutionPhase::Running,
            Some(backend_name),
        )
    }

    pub fn workflow_completed(wfe: &WorkflowExecution, backend_name: Option<&str>) -> Self {
        Self::lifecycle(
            wfe,
            "workflow.completed",
            AuditOutcome::Success,
            WorkflowExecutionPhase::Completed,
            backend_name,
        )
    }

    /// Terminal failure, including validation failure, lock conflict,
    /// and external backend deletion.
    pub fn workflow_failed(wfe: &WorkflowExecution, backend_name: Option<&str>) -> Self {
        Self::lifecycle(
            wfe,
            "workflow.failed",
            AuditOutcome::Failure,
            WorkflowExecutionPhase::Failed,
            backend_name,
        )
    }
}

/// Handle reconcilers use to enqueue audit records. Cheap to clone;
/// the queue is bounded, so `emit` applies backpressure when the
/// collector is slow.
#[derive(Clone)]
pub struct AuditEmitter {
    tx: mpsc::Sender<AuditRecord>,
    last_flush_ok: Arc<AtomicBool>,
}

impl AuditEmitter {
    /// Builds the emitter and spawns the background flusher. Records
    /// are delivered in FIFO order as JSON batches.
    pub fn spawn(args: &AuditArgs, shutdown: CancellationToken) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(args.audit_timeout_secs))
            .build()
            .map_err(|e| Error::Audit(format!("failed to build audit client: {}", e)))?;
        let (tx, rx) = mpsc::channel(args.audit_buffer_size.max(1));
        let last_flush_ok = Arc::new(AtomicBool::new(true));
        let flusher = Flusher {
            rx,
            http,
            endpoint: format!("{}/audit/batch", args.audit_url.trim_end_matches('/')),
            batch_size: args.audit_batch_size.max(1),
            flush_interval: Duration::from_secs(args.audit_flush_interval_secs.max(1)),
            last_flush_ok: last_flush_ok.clone(),
            shutdown,
        };
        tokio::spawn(flusher.run());
        Ok(AuditEmitter { tx, last_flush_ok })
    }

    pub async fn emit(&self, record: AuditRecord) {
        if self.tx.send(record).await.is_err() {
            eprintln!("{}", "audit queue closed; record dropped".red());
        }
    }

    /// Whether the most recent flush reached the collector. Reported
    /// through the AuditRecorded condition.
    pub fn last_flush_ok(&self) -> bool {
        self.last_flush_ok.load(Ordering::Relaxed)
    }
}

struct Flusher {
    rx: mpsc::Receiver<AuditRecord>,
    http: reqwest::Client,
    endpoint: String,
    batch_size: usize,
    flush_interval: Duration,
    last_flush_ok: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl Flusher {
    async fn run(mut self) {
        let mut pending: Vec<AuditRecord> = Vec::new();
        let mut tick = tokio::time::interval(self.flush_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    // Final best-effort drain before the process exits.
                    while let Ok(record) = self.rx.try_recv() {
                        pending.push(record);
                    }
                    self.flush(&mut pending).await;
                    return;
                }
                received = self.rx.recv() => {
                    match received {
                        Some(record) => {
                            pending.push(record);
                            if pending.len() >= self.batch_size {
                                self.flush(&mut pending).await;
                            }
                        }
                        None => {
                            self.flush(&mut pending).await;
                            return;
                        }
                    }
                }
                _ = tick.tick() => {
                    if !pending.is_empty() {
                        self.flush(&mut pending).await;
                    }
                }
            }
        }
    }

    /// Posts the pending records as one batch. On failure the batch is
    /// retained for the next attempt, bounded at four batches; beyond
    /// that the oldest records are dropped (the reconciler re-emits
    /// terminal records whose marker never landed).
    async fn flush(&self, pending: &mut Vec<AuditRecord>) {
        if pending.is_empty() {
            return;
        }
        let result = self
            .http
            .post(&self.endpoint)
            .json(&*pending)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match result {
            Ok(_) => {
                self.last_flush_ok.store(true, Ordering::Relaxed);
                pending.clear();
            }
            Err(e) => {
                self.last_flush_ok.store(false, Ordering::Relaxed);
                eprintln!(
                    "{}",
                    format!("audit flush of {} record(s) failed: {}", pending.len(), e).red()
                );
                let cap = self.batch_size * 4;
                if pending.len() > cap {
                    let drop_count = pending.len() - cap;
                    pending.drain(..drop_count);
                    eprintln!(
                        "{}",
                        format!("audit backlog over capacity; dropped {} record(s)", drop_count)
                            .yellow()
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
                ..Default::default()
            },
        );
        wfe.metadata.namespace = Some("ns-a".into());
        wfe
    }

    #[test]
    fn records_carry_the_correlation_id() {
        let wfe = test_wfe();
        for record in [
            AuditRecord::selection_completed(&wfe),
            AuditRecord::execution_started(&wfe, "wfe-0011223344556677"),
            AuditRecord::workflow_completed(&wfe, Some("wfe-0011223344556677")),
            AuditRecord::workflow_failed(&wfe, None),
        ] {
            assert_eq!(record.correlation_id, "remediation-abc");
            assert_eq!(record.actor_id, "workflowexecution-controller");
            assert_eq!(record.event_category, "workflowexecution");
            assert_eq!(record.resource_type, "WorkflowExecution");
            assert_eq!(record.resource_id, "run-app-restart");
            assert_eq!(record.namespace, "ns-a");
        }
    }

    #[test]
    fn event_types_and_outcomes() {
        let wfe = test_wfe();
        let completed = AuditRecord::workflow_completed(&wfe, None);
        assert_eq!(completed.event_type, "workflowexecution.workflow.completed");
        assert_eq!(completed.event_outcome, AuditOutcome::Success);
        assert_eq!(completed.event_data.phase, "Completed");

        let failed = AuditRecord::workflow_failed(&wfe, None);
        assert_eq!(failed.event_type, "workflowexecution.workflow.failed");
        assert_eq!(failed.event_outcome, AuditOutcome::Failure);
        assert_eq!(failed.event_data.phase, "Failed");

        let started = AuditRecord::execution_started(&wfe, "wfe-0011223344556677");
        assert_eq!(started.event_type, "workflowexecution.execution.started");
        assert_eq!(
            started.event_data.pipelinerun_name.as_deref(),
            Some("wfe-0011223344556677")
        );
    }

    #[test]
    fn payload_is_flat_json() {
        let wfe = test_wfe();
        let value =
            serde_json::to_value(AuditRecord::selection_completed(&wfe)).unwrap();
        assert_eq!(value["eventType"], "workflowexecution.selection.completed");
        assert_eq!(value["eventCategory"], "workflowexecution");
        assert_eq!(value["eventAction"], "selection.completed");
        assert_eq!(value["eventOutcome"], "success");
        assert_eq!(value["correlationId"], "remediation-abc");
        assert_eq!(value["eventData"]["workflowId"], "restart-deployment");
        assert_eq!(value["eventData"]["workflowVersion"], "1.2.0");
        assert_eq!(value["eventData"]["phase"], "Pending");
        // No backend yet, so the key is omitted entirely.
        assert!(value["eventData"].get("pipelinerunName").is_none());
        // The payload stays flat: no nested workflowRef object.
        assert!(value.get("workflowRef").is_none());
    }
}
