use super::reconcile::ContextData;
use super::{classify, conditions};
use crate::audit::AuditRecord;
use crate::catalog::ResolvedDependency;
use crate::executor::{
    BackendState, CreateOutcome, ExecutionRequest, backend_for, execution_name,
    execution_timeout,
};
use crate::util::{Error, finalizer, hash_spec, messages, patch::patch_status};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::jiff::Timestamp;
use kube::{
    Api, Client, Resource, ResourceExt,
    api::{Patch, PatchParams},
    runtime::events::{Event, EventType},
};
use kubernaut_common::annotations;
use kubernaut_types::*;
use owo_colors::OwoColorize;
use serde_json::json;
use std::time::Duration;

pub const EVENT_WORKFLOW_VALIDATED: &str = "WorkflowValidated";
pub const EVENT_VALIDATION_FAILED: &str = "WorkflowValidationFailed";
pub const EVENT_EXECUTION_CREATED: &str = "ExecutionCreated";
pub const EVENT_PHASE_TRANSITION: &str = "PhaseTransition";
pub const EVENT_WORKFLOW_COMPLETED: &str = "WorkflowCompleted";
pub const EVENT_WORKFLOW_FAILED: &str = "WorkflowFailed";
pub const EVENT_COOLDOWN_ACTIVE: &str = "CooldownActive";

/// Publishes a cluster event for the resource. Event delivery is
/// best-effort; a failure never aborts the reconcile.
async fn publish_event(
    context: &ContextData,
    instance: &WorkflowExecution,
    type_: EventType,
    reason: &str,
    action: &str,
    note: String,
) {
    let event = Event {
        type_,
        reason: reason.to_owned(),
        note: Some(note),
        action: action.to_owned(),
        secondary: None,
    };
    if let Err(e) = context
        .recorder
        .publish(&event, &instance.object_ref(&()))
        .await
    {
        eprintln!(
            "{}",
            format!("failed to publish '{}' event: {}", reason, e).yellow()
        );
    }
}

fn now_time() -> Time {
    Time::from(Timestamp::now())
}

/// First reconcile of a fresh resource: take the finalizer, freeze the
/// spec by stamping its hash, and surface the Pending phase.
pub async fn initialize(client: Client, instance: &WorkflowExecution) -> Result<(), Error> {
    let api: Api<WorkflowExecution> =
        Api::namespaced(client.clone(), instance.meta().namespace.as_deref().unwrap());
    let patch = json!({
        "metadata": {
            "finalizers": [finalizer::FINALIZER_NAME],
            "annotations": {
                annotations::SPEC_HASH: hash_spec(&instance.spec),
            }
        }
    });
    api.patch(
        instance.meta().name.as_deref().unwrap(),
        &PatchParams::default(),
        &Patch::Merge(&patch),
    )
    .await?;
    patch_status(client, instance, |status: &mut WorkflowExecutionStatus| {
        status.phase = WorkflowExecutionPhase::Pending;
        status.message = Some("Accepted for reconciliation.".to_owned());
    })
    .await?;
    Ok(())
}

/// The target is still inside its cooldown window; report and hold.
pub async fn cooldown(
    context: &ContextData,
    instance: &WorkflowExecution,
    remaining: Duration,
) -> Result<(), Error> {
    let note = format!(
        "Target '{}' is in cooldown for another {}s.",
        instance.spec.target_resource,
        remaining.as_secs()
    );
    publish_event(
        context,
        instance,
        EventType::Normal,
        EVENT_COOLDOWN_ACTIVE,
        "Scheduling",
        note.clone(),
    )
    .await;
    patch_status(
        context.client.clone(),
        instance,
        move |status: &mut WorkflowExecutionStatus| {
            status.phase = WorkflowExecutionPhase::Pending;
            status.message = Some(note);
        },
    )
    .await?;
    Ok(())
}

pub enum CreateResult {
    /// The backend is ours (created fresh or adopted after a crash).
    Started,

    /// Another execution holds the target lock; this resource failed.
    Conflict,
}

/// Validation and dependency resolution already passed: record the
/// selection, then create the backend under the deterministic name.
/// An already-existing backend with our label is a crash-retry and is
/// adopted; any other owner means we lost the target lock.
pub async fn create_backend(
    context: &ContextData,
    instance: &WorkflowExecution,
    dependencies: Vec<ResolvedDependency>,
) -> Result<CreateResult, Error> {
    context
        .audit
        .emit(AuditRecord::selection_completed(instance))
        .await;
    publish_event(
        context,
        instance,
        EventType::Normal,
        EVENT_WORKFLOW_VALIDATED,
        "Validating",
        format!(
            "Workflow '{}@{}' validated and dependencies resolved.",
            instance.spec.workflow_ref.workflow_id, instance.spec.workflow_ref.version
        ),
    )
    .await;

    let backend = backend_for(instance.spec.execution_engine);
    let request = ExecutionRequest {
        name: execution_name(&instance.spec.target_resource),
        namespace: context.config.execution_namespace.clone(),
        service_account: context.config.service_account_name.clone(),
        timeout: execution_timeout(instance, context.config.default_timeout)?,
        dependencies,
        wfe: instance,
    };
    let own_name = instance.name_any();
    match backend.create(context.client.clone(), &request).await? {
        CreateOutcome::Created => {
            started(context, instance, &request.name, "Created").await?;
            Ok(CreateResult::Started)
        }
        CreateOutcome::AlreadyExists { owner } if owner.as_deref() == Some(own_name.as_str()) => {
            started(context, instance, &request.name, "Adopted").await?;
            Ok(CreateResult::Started)
        }
        CreateOutcome::AlreadyExists { .. } => {
            let details = classify::lock_conflict(&request.name);
            fail(
                context,
                instance,
                details,
                EVENT_WORKFLOW_FAILED,
                Some(request.name),
            )
            .await?;
            Ok(CreateResult::Conflict)
        }
    }
}

/// Records the backend as ours and moves the phase to Running.
/// `reason` distinguishes a fresh creation from an adoption.
async fn started(
    context: &ContextData,
    instance: &WorkflowExecution,
    backend_name: &str,
    reason: &'static str,
) -> Result<(), Error> {
    context
        .audit
        .emit(AuditRecord::execution_started(instance, backend_name))
        .await;
    publish_event(
        context,
        instance,
        EventType::Normal,
        EVENT_EXECUTION_CREATED,
        "Executing",
        format!("{} execution resource '{}'.", reason, backend_name),
    )
    .await;
    let audit_ok = context.audit.last_flush_ok();
    let generation = instance.meta().generation;
    let name = backend_name.to_owned();
    patch_status(
        context.client.clone(),
        instance,
        move |status: &mut WorkflowExecutionStatus| {
            status.phase = WorkflowExecutionPhase::Running;
            status.message = Some(format!("Execution '{}' has been dispatched.", name));
            if status.start_time.is_none() {
                status.start_time = Some(now_time());
            }
            status.execution_status = Some(BackendState::Pending.summary());
            conditions::set_condition(
                &mut status.conditions,
                conditions::EXECUTION_CREATED,
                true,
                reason,
                &format!("Execution resource '{}' exists.", name),
                generation,
            );
            conditions::set_condition(
                &mut status.conditions,
                conditions::EXECUTION_RUNNING,
                false,
                "Pending",
                "Backend has not started yet.",
                generation,
            );
            set_audit_condition(status, audit_ok, generation);
            status.execution_ref = Some(name);
        },
    )
    .await?;
    Ok(())
}

/// Mirrors a live (pending or running) backend into the status.
pub async fn track(
    context: &ContextData,
    instance: &WorkflowExecution,
    state: BackendState,
    backend_name: String,
) -> Result<(), Error> {
    // A missing executionRef here means the controller crashed between
    // creating the backend and recording it; adopt and re-emit.
    let newly_adopted = instance
        .status
        .as_ref()
        .is_none_or(|s| s.execution_ref.is_none());
    if newly_adopted {
        context
            .audit
            .emit(AuditRecord::execution_started(instance, &backend_name))
            .await;
        publish_event(
            context,
            instance,
            EventType::Normal,
            EVENT_EXECUTION_CREATED,
            "Executing",
            format!("Adopted execution resource '{}'.", backend_name),
        )
        .await;
    }
    let previous_phase = instance
        .status
        .as_ref()
        .map(|s| s.phase)
        .unwrap_or_default();
    if previous_phase != WorkflowExecutionPhase::Running {
        publish_event(
            context,
            instance,
            EventType::Normal,
            EVENT_PHASE_TRANSITION,
            "Executing",
            format!("Phase transition: {} -> Running.", previous_phase),
        )
        .await;
    }
    let audit_ok = context.audit.last_flush_ok();
    let generation = instance.meta().generation;
    let running = matches!(state, BackendState::Running { .. });
    patch_status(
        context.client.clone(),
        instance,
        move |status: &mut WorkflowExecutionStatus| {
            status.phase = WorkflowExecutionPhase::Running;
            status.message = Some(format!("Execution '{}' is in progress.", backend_name));
            if let Some(started_at) = state.started_at() {
                status.start_time = Some(started_at.clone());
            } else if status.start_time.is_none() {
                status.start_time = Some(now_time());
            }
            status.execution_status = Some(state.summary());
            conditions::set_condition(
                &mut status.conditions,
                conditions::EXECUTION_CREATED,
                true,
                "Created",
                &format!("Execution resource '{}' exists.", backend_name),
                generation,
            );
            conditions::set_condition(
                &mut status.conditions,
                conditions::EXECUTION_RUNNING,
                running,
                if running { "Running" } else { "Pending" },
                "Mirrored from the backend execution resource.",
                generation,
            );
            set_audit_condition(status, audit_ok, generation);
            status.execution_ref = Some(backend_name);
        },
    )
    .await?;
    Ok(())
}

/// Terminal success: mirror timings, mark conditions, record the
/// lifecycle audit event, bump the outcome metrics.
pub async fn complete(
    context: &ContextData,
    instance: &WorkflowExecution,
    state: BackendState,
    backend_name: String,
) -> Result<(), Error> {
    context
        .audit
        .emit(AuditRecord::workflow_completed(instance, Some(&backend_name)))
        .await;
    let audit_ok = context.audit.last_flush_ok();
    let generation = instance.meta().generation;
    let now = now_time();
    let start_time = state
        .started_at()
        .cloned()
        .or_else(|| instance.status.as_ref().and_then(|s| s.start_time.clone()));
    let completion_time = state.completed_at().cloned().unwrap_or_else(|| now.clone());
    let duration_secs = classify::elapsed_secs(start_time.as_ref(), Some(&completion_time));
    patch_status(
        context.client.clone(),
        instance,
        move |status: &mut WorkflowExecutionStatus| {
            status.phase = WorkflowExecutionPhase::Completed;
            status.message = Some("Workflow completed successfully.".to_owned());
            status.start_time = start_time;
            status.completion_time = Some(completion_time);
            status.duration = duration_secs.map(|s| format!("{}s", s));
            status.execution_status = Some(state.summary());
            status.execution_ref = Some(backend_name);
            status.audit_recorded_at = Some(now);
            conditions::set_condition(
                &mut status.conditions,
                conditions::EXECUTION_CREATED,
                true,
                "Created",
                "Execution resource exists.",
                generation,
            );
            conditions::set_condition(
                &mut status.conditions,
                conditions::EXECUTION_RUNNING,
                false,
                "Completed",
                "Backend finished.",
                generation,
            );
            conditions::set_condition(
                &mut status.conditions,
                conditions::EXECUTION_COMPLETE,
                true,
                "Succeeded",
                "Backend reported terminal success.",
                generation,
            );
            set_audit_condition(status, audit_ok, generation);
        },
    )
    .await?;
    publish_event(
        context,
        instance,
        EventType::Normal,
        EVENT_WORKFLOW_COMPLETED,
        "Executing",
        "Workflow completed successfully.".to_owned(),
    )
    .await;
    #[cfg(feature = "metrics")]
    context
        .workflow_metrics
        .observe_terminal("Completed", duration_secs.map(|s| s as f64));
    Ok(())
}

/// Terminal failure of any flavor: validation, lock conflict, external
/// deletion, or a failed backend run.
pub async fn fail(
    context: &ContextData,
    instance: &WorkflowExecution,
    details: FailureDetails,
    event_reason: &'static str,
    backend_name: Option<String>,
) -> Result<(), Error> {
    context
        .audit
        .emit(AuditRecord::workflow_failed(instance, backend_name.as_deref()))
        .await;
    let audit_ok = context.audit.last_flush_ok();
    let generation = instance.meta().generation;
    let now = now_time();
    let start_time = instance.status.as_ref().and_then(|s| s.start_time.clone());
    let duration_secs = classify::elapsed_secs(start_time.as_ref(), Some(&now));
    let had_backend = instance
        .status
        .as_ref()
        .is_some_and(|s| s.execution_ref.is_some());
    let event_note = details.message.clone();
    let patch_details = details.clone();
    patch_status(
        context.client.clone(),
        instance,
        move |status: &mut WorkflowExecutionStatus| {
            status.phase = WorkflowExecutionPhase::Failed;
            status.message = Some(patch_details.message.clone());
            status.completion_time = Some(now.clone());
            status.duration = duration_secs.map(|s| format!("{}s", s));
            status.audit_recorded_at = Some(now);
            conditions::set_condition(
                &mut status.conditions,
                conditions::EXECUTION_CREATED,
                had_backend,
                if had_backend {
                    "Created"
                } else {
                    "CreateFailed"
                },
                &patch_details.message,
                generation,
            );
            conditions::set_condition(
                &mut status.conditions,
                conditions::EXECUTION_RUNNING,
                false,
                "Failed",
                "Backend is not running.",
                generation,
            );
            conditions::set_condition(
                &mut status.conditions,
                conditions::EXECUTION_COMPLETE,
                false,
                &patch_details.reason.to_string(),
                &patch_details.message,
                generation,
            );
            set_audit_condition(status, audit_ok, generation);
            status.failure_details = Some(patch_details);
        },
    )
    .await?;
    publish_event(
        context,
        instance,
        EventType::Warning,
        event_reason,
        "Executing",
        event_note,
    )
    .await;
    #[cfg(feature = "metrics")]
    context
        .workflow_metrics
        .observe_terminal("Failed", duration_secs.map(|s| s as f64));
    Ok(())
}

/// A terminal resource whose audit marker never landed (crash between
/// emit and flush): re-emit the lifecycle record and stamp the marker.
pub async fn record_audit(
    context: &ContextData,
    instance: &WorkflowExecution,
) -> Result<(), Error> {
    let status = instance.status.as_ref();
    let backend_name = status.and_then(|s| s.execution_ref.as_deref());
    let record = match status.map(|s| s.phase) {
        Some(WorkflowExecutionPhase::Completed) => {
            AuditRecord::workflow_completed(instance, backend_name)
        }
        _ => AuditRecord::workflow_failed(instance, backend_name),
    };
    context.audit.emit(record).await;
    let audit_ok = context.audit.last_flush_ok();
    let generation = instance.meta().generation;
    patch_status(
        context.client.clone(),
        instance,
        move |status: &mut WorkflowExecutionStatus| {
            status.audit_recorded_at = Some(now_time());
            set_audit_condition(status, audit_ok, generation);
        },
    )
    .await?;
    Ok(())
}

/// Deletion path. Deletes the backend (idempotent) and, once it is
/// confirmed absent, emits any missing terminal audit record and drops
/// the finalizer. Returns true when the finalizer has been removed.
pub async fn cleanup(context: &ContextData, instance: &WorkflowExecution) -> Result<bool, Error> {
    let backend = backend_for(instance.spec.execution_engine);
    let name = execution_name(&instance.spec.target_resource);
    let namespace = &context.config.execution_namespace;

    backend
        .delete(context.client.clone(), namespace, &name)
        .await?;

    match backend
        .status(context.client.clone(), namespace, &name)
        .await?
    {
        BackendState::NotFound => {
            let audit_missing = instance
                .status
                .as_ref()
                .is_none_or(|s| s.audit_recorded_at.is_none());
            if audit_missing {
                let record = match instance.status.as_ref().map(|s| s.phase) {
                    Some(WorkflowExecutionPhase::Completed) => {
                        AuditRecord::workflow_completed(instance, Some(&name))
                    }
                    _ => AuditRecord::workflow_failed(instance, Some(&name)),
                };
                context.audit.emit(record).await;
            }
            finalizer::delete(
                context.client.clone(),
                instance.meta().name.as_deref().unwrap(),
                instance.meta().namespace.as_deref().unwrap(),
            )
            .await?;
            Ok(true)
        }
        _ => {
            let already_terminating = instance
                .status
                .as_ref()
                .is_some_and(|s| s.message.as_deref() == Some(messages::TERMINATING));
            if !already_terminating {
                patch_status(
                    context.client.clone(),
                    instance,
                    |status: &mut WorkflowExecutionStatus| {
                        status.message = Some(messages::TERMINATING.to_owned());
                    },
                )
                .await?;
            }
            Ok(false)
        }
    }
}

fn set_audit_condition(
    status: &mut WorkflowExecutionStatus,
    audit_ok: bool,
    generation: Option<i64>,
) {
    conditions::set_condition(
        &mut status.conditions,
        conditions::AUDIT_RECORDED,
        audit_ok,
        if audit_ok { "Flushed" } else { "FlushFailed" },
        if audit_ok {
            "Most recent audit flush succeeded."
        } else {
            "Most recent audit flush failed; records are retried."
        },
        generation,
    );
}
