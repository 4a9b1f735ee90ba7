use futures::stream::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::jiff::Timestamp;
use kube::{
    Api, Resource, ResourceExt,
    api::ListParams,
    client::Client,
    runtime::{
        Controller,
        controller::Action,
        events::{Recorder, Reporter},
        reflector::ObjectRef,
        watcher,
    },
};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use kubernaut_common::{annotations, args, labels};
use kubernaut_types::*;
use owo_colors::OwoColorize;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::actions::{self, CreateResult, EVENT_VALIDATION_FAILED, EVENT_WORKFLOW_FAILED};
use super::{classify, cooldown, validate};
use crate::audit::AuditEmitter;
use crate::catalog::{CatalogClient, Resolution, ResolvedDependency, resolve};
use crate::executor::{BackendState, backend_for, execution_name};
use crate::util::{
    self, Error,
    colors::{FG1, FG2},
    finalizer,
};

#[cfg(feature = "metrics")]
use crate::util::metrics::{ControllerMetrics, WorkflowMetrics};

/// Process-level controller configuration with durations parsed once
/// at startup.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub execution_namespace: String,

    pub service_account_name: String,

    pub cooldown_period: std::time::Duration,

    pub backend_poll_interval: std::time::Duration,

    pub default_timeout: std::time::Duration,
}

impl ControllerConfig {
    pub fn from_args(args: &args::ExecutionArgs) -> Result<Self, Error> {
        Ok(ControllerConfig {
            execution_namespace: args.execution_namespace.clone(),
            service_account_name: args.service_account_name.clone(),
            cooldown_period: parse_duration::parse(&args.cooldown_period)?,
            backend_poll_interval: parse_duration::parse(&args.backend_poll_interval)?,
            default_timeout: parse_duration::parse(&args.default_timeout)?,
        })
    }
}

/// Entrypoint for the `WorkflowExecution` controller.
pub async fn run(
    client: Client,
    catalog_args: &args::CatalogArgs,
    audit_args: &args::AuditArgs,
    execution_args: &args::ExecutionArgs,
) -> Result<(), Error> {
    println!("{}", "Starting WorkflowExecution controller...".green());

    let config = ControllerConfig::from_args(execution_args)?;

    // Startup requires the CRD to be installed.
    let crd_check: Api<WorkflowExecution> = Api::all(client.clone());
    if let Err(e) = crd_check.list(&ListParams::default().limit(1)).await {
        eprintln!("CRD is not queryable; {e:?}. Is the CRD installed?");
        std::process::exit(1);
    }

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        kubernaut_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });

    // Preparation of resources used by the `kube_runtime::Controller`
    let catalog = CatalogClient::new(catalog_args)?;
    let audit = AuditEmitter::spawn(audit_args, shutdown.clone())?;
    let recorder = Recorder::new(
        client.clone(),
        Reporter {
            controller: "kubernaut-workflowexecution-controller".to_owned(),
            instance: std::env::var("POD_NAME").ok(),
        },
    );
    let context: Arc<ContextData> = Arc::new(ContextData::new(
        client.clone(),
        config.clone(),
        catalog,
        audit,
        recorder,
    ));

    // Namespace where the Lease object lives.
    // Commonly: the controller's namespace. If you deploy in one namespace, hardcode it.
    // If you want it dynamic, inject NAMESPACE via the Downward API.
    let lease_namespace = std::env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string());
    // Unique identity per replica (Downward API POD_NAME is ideal).
    // Fallback to hostname if not present.
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("workflowexecution-controller-{}", uuid::Uuid::new_v4()));
    // The shared lock name across all replicas
    let lease_name = "workflowexecution-controller-lock".to_string();
    // TTL: how long leadership is considered valid without renewal.
    // Renew should happen well before TTL expires.
    let lease_ttl = Duration::from_secs(15);
    let renew_every = Duration::from_secs(5);
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name,
            lease_ttl,
        },
    );

    kubernaut_common::signal_ready();
    println!("{}", "🌱 Starting WorkflowExecution controller...".green());
    // We run indefinitely; only the leader runs the controller.
    // On leadership loss, we abort the controller and go back to standby.
    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(renew_every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                    task.await.ok();
                }
                break Ok(())
            },
            _ = tick.tick() => {}
        }
        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                // If we can't talk to the apiserver / update Lease, assume we are not safe to lead.
                eprintln!("leader election renew/acquire failed: {e}");
                if let Some(task) = controller_task.take() {
                    task.abort();
                    eprintln!("aborted controller due to leader election error");
                }
                continue;
            }
        };
        if matches!(lease, LeaseLockResult::Acquired(_)) {
            // We are leader; ensure controller is running
            if controller_task.is_none() {
                println!("acquired leadership; starting controller");
                let client_for_controller = client.clone();
                let context_for_controller = context.clone();
                let execution_namespace = config.execution_namespace.clone();
                let crd_api: Api<WorkflowExecution> = Api::all(client_for_controller.clone());
                controller_task = Some(tokio::spawn(async move {
                    println!("{}", "🚀 WorkflowExecution controller started.".green());
                    // Backend jobs live in the execution namespace and
                    // cannot carry cross-namespace owner references, so
                    // they map back to their WorkflowExecution by label.
                    let jobs: Api<Job> = Api::namespaced(
                        client_for_controller.clone(),
                        &execution_namespace,
                    );
                    Controller::new(crd_api, Default::default())
                        .watches(
                            jobs,
                            watcher::Config::default().labels(labels::WORKFLOW_EXECUTION),
                            map_backend_to_workflow_execution,
                        )
                        .run(reconcile, on_error, context_for_controller)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            // We are NOT leader; ensure controller is stopped
            eprintln!("lost leadership; stopping controller");
            task.abort();
        }
    }
}

/// Maps a backend Job event back to the WorkflowExecution that owns it
/// through the contract labels.
fn map_backend_to_workflow_execution(job: Job) -> Option<ObjectRef<WorkflowExecution>> {
    let job_labels = job.metadata.labels.as_ref()?;
    let name = job_labels.get(labels::WORKFLOW_EXECUTION)?;
    let namespace = job_labels.get(labels::SOURCE_NAMESPACE)?;
    Some(ObjectRef::new(name).within(namespace))
}

/// Context injected with each `reconcile` and `on_error` method invocation.
pub struct ContextData {
    /// Kubernetes client to make Kubernetes API requests with. Required for K8S resource management.
    pub(super) client: Client,

    pub(super) config: ControllerConfig,

    pub(super) catalog: CatalogClient,

    pub(super) audit: AuditEmitter,

    pub(super) recorder: Recorder,

    #[cfg(feature = "metrics")]
    pub(super) metrics: ControllerMetrics,

    #[cfg(feature = "metrics")]
    pub(super) workflow_metrics: WorkflowMetrics,
}

impl ContextData {
    /// Constructs a new instance of ContextData.
    pub fn new(
        client: Client,
        config: ControllerConfig,
        catalog: CatalogClient,
        audit: AuditEmitter,
        recorder: Recorder,
    ) -> Self {
        #[cfg(feature = "metrics")]
        {
            ContextData {
                client,
                config,
                catalog,
                audit,
                recorder,
                metrics: ControllerMetrics::new("workflowexecutions"),
                workflow_metrics: WorkflowMetrics::new(),
            }
        }
        #[cfg(not(feature = "metrics"))]
        {
            ContextData {
                client,
                config,
                catalog,
                audit,
                recorder,
            }
        }
    }
}

/// Action to be taken upon a `WorkflowExecution` resource during reconciliation
#[derive(Debug, PartialEq)]
enum WorkflowExecutionAction {
    /// Take the finalizer, stamp the spec hash, and set the Pending phase.
    Initialize,

    /// Terminal resource whose audit marker never landed; re-emit.
    RecordAudit,

    /// The target is still inside its cooldown window.
    Cooldown { remaining: std::time::Duration },

    /// Validation and dependency resolution passed; dispatch the backend.
    CreateBackend {
        dependencies: Vec<ResolvedDependency>,
    },

    /// Mirror a live backend into the status.
    Track {
        state: BackendState,
        backend_name: String,
    },

    /// The backend reported terminal success.
    Complete {
        state: BackendState,
        backend_name: String,
    },

    /// Terminal failure of any flavor.
    Fail {
        details: FailureDetails,
        event: &'static str,
        backend_name: Option<String>,
    },

    /// Deletion: drain the backend, then release the finalizer.
    Cleanup,

    /// The resource is in desired state and requires no actions to be taken.
    NoOp,
}

impl WorkflowExecutionAction {
    fn to_str(&self) -> &str {
        match self {
            WorkflowExecutionAction::Initialize => "Initialize",
            WorkflowExecutionAction::RecordAudit => "RecordAudit",
            WorkflowExecutionAction::Cooldown { .. } => "Cooldown",
            WorkflowExecutionAction::CreateBackend { .. } => "CreateBackend",
            WorkflowExecutionAction::Track { .. } => "Track",
            WorkflowExecutionAction::Complete { .. } => "Complete",
            WorkflowExecutionAction::Fail { .. } => "Fail",
            WorkflowExecutionAction::Cleanup => "Cleanup",
            WorkflowExecutionAction::NoOp => "NoOp",
        }
    }
}

/// Returns true when the resource still needs its first write: the
/// finalizer or the status object is missing.
fn needs_initialize(instance: &WorkflowExecution) -> bool {
    !instance
        .finalizers()
        .iter()
        .any(|f| f == finalizer::FINALIZER_NAME)
        || instance.status.is_none()
}

/// Reconciliation function for the `WorkflowExecution` resource.
async fn reconcile(
    instance: Arc<WorkflowExecution>,
    context: Arc<ContextData>,
) -> Result<Action, Error> {
    // The resource of `WorkflowExecution` kind is required to have a namespace set.
    // However, it is not guaranteed the resource will have a `namespace` set.
    let namespace: String = match instance.namespace() {
        None => {
            return Err(Error::UserInput(
                "Expected WorkflowExecution resource to be namespaced.".to_owned(),
            ));
        }
        Some(namespace) => namespace,
    };

    let name = instance.name_any();

    // Increment total number of reconciles for the WorkflowExecution resource.
    #[cfg(feature = "metrics")]
    context
        .metrics
        .reconcile_counter
        .with_label_values(&[&name, &namespace])
        .inc();

    // Benchmark the read phase of reconciliation.
    #[cfg(feature = "metrics")]
    let start = std::time::Instant::now();

    // Read phase of reconciliation determines goal during the write phase.
    let action = determine_action(&context, &instance).await?;

    if action != WorkflowExecutionAction::NoOp {
        println!(
            "🔧 {}{}{}{}{}",
            namespace.color(FG2),
            "/".color(FG1),
            name.color(FG2),
            " ACTION: ".color(FG1),
            format!("{:?}", action).color(FG2),
        );
    }

    // Report the read phase performance.
    #[cfg(feature = "metrics")]
    context
        .metrics
        .read_histogram
        .with_label_values(&[&name, &namespace, action.to_str()])
        .observe(start.elapsed().as_secs_f64());

    // Increment the counter for the action.
    #[cfg(feature = "metrics")]
    context
        .metrics
        .action_counter
        .with_label_values(&[&name, &namespace, action.to_str()])
        .inc();

    // Benchmark the write phase of reconciliation.
    #[cfg(feature = "metrics")]
    let timer = match action {
        // Don't measure performance for NoOp actions.
        WorkflowExecutionAction::NoOp => None,
        // Start a performance timer for the write phase.
        _ => Some(
            context
                .metrics
                .write_histogram
                .with_label_values(&[&name, &namespace, action.to_str()])
                .start_timer(),
        ),
    };

    // Performs action as decided by the `determine_action` function.
    // This is the write phase of reconciliation. Every branch mutates
    // the resource status at most once.
    let result = match action {
        WorkflowExecutionAction::Initialize => {
            actions::initialize(context.client.clone(), &instance).await?;

            Action::requeue(Duration::ZERO)
        }
        WorkflowExecutionAction::RecordAudit => {
            actions::record_audit(&context, &instance).await?;

            Action::await_change()
        }
        WorkflowExecutionAction::Cooldown { remaining } => {
            actions::cooldown(&context, &instance, remaining).await?;

            // Wake up exactly when the window closes.
            Action::requeue(remaining)
        }
        WorkflowExecutionAction::CreateBackend { dependencies } => {
            match actions::create_backend(&context, &instance, dependencies).await? {
                CreateResult::Started => Action::requeue(context.config.backend_poll_interval),
                CreateResult::Conflict => Action::await_change(),
            }
        }
        WorkflowExecutionAction::Track {
            state,
            backend_name,
        } => {
            actions::track(&context, &instance, state, backend_name).await?;

            Action::requeue(context.config.backend_poll_interval)
        }
        WorkflowExecutionAction::Complete {
            state,
            backend_name,
        } => {
            actions::complete(&context, &instance, state, backend_name).await?;

            Action::await_change()
        }
        WorkflowExecutionAction::Fail {
            details,
            event,
            backend_name,
        } => {
            actions::fail(&context, &instance, details, event, backend_name).await?;

            Action::await_change()
        }
        WorkflowExecutionAction::Cleanup => {
            if actions::cleanup(&context, &instance).await? {
                // Finalizer removed; the resource is free to go.
                Action::await_change()
            } else {
                // Still waiting on the backend to disappear.
                Action::requeue(Duration::from_secs(2))
            }
        }
        // The resource is terminal and fully recorded; nothing to do.
        WorkflowExecutionAction::NoOp => Action::await_change(),
    };

    #[cfg(feature = "metrics")]
    if let Some(timer) = timer {
        timer.observe_duration();
    }

    Ok(result)
}

/// Resources arrive into the reconciliation queue in a certain state.
/// This function looks at the state of the given `WorkflowExecution`
/// and decides which action needs to be performed. The finite set of
/// possible actions is represented by the `WorkflowExecutionAction` enum.
async fn determine_action(
    context: &Arc<ContextData>,
    instance: &WorkflowExecution,
) -> Result<WorkflowExecutionAction, Error> {
    if instance.meta().deletion_timestamp.is_some() {
        return Ok(WorkflowExecutionAction::Cleanup);
    }

    if needs_initialize(instance) {
        return Ok(WorkflowExecutionAction::Initialize);
    }
    let Some(status) = instance.status.as_ref() else {
        return Ok(WorkflowExecutionAction::Initialize);
    };

    // Level-triggered idempotence: a fully recorded terminal resource
    // never produces another write.
    if status.phase.is_terminal() {
        if status.audit_recorded_at.is_none() {
            return Ok(WorkflowExecutionAction::RecordAudit);
        }
        return Ok(WorkflowExecutionAction::NoOp);
    }

    // The spec is frozen at creation; a hash mismatch against the
    // stamp taken on the first reconcile means it was mutated.
    if let Some(stamped) = instance.annotations().get(annotations::SPEC_HASH)
        && *stamped != util::hash_spec(&instance.spec)
    {
        return Ok(WorkflowExecutionAction::Fail {
            details: classify::configuration_error(
                "spec is immutable and must not be mutated after creation",
            ),
            event: EVENT_VALIDATION_FAILED,
            backend_name: None,
        });
    }

    if let Err(message) = validate::validate(instance) {
        return Ok(WorkflowExecutionAction::Fail {
            details: classify::configuration_error(message),
            event: EVENT_VALIDATION_FAILED,
            backend_name: None,
        });
    }

    let backend_name = execution_name(&instance.spec.target_resource);
    let backend = backend_for(instance.spec.execution_engine);
    let state = backend
        .status(
            context.client.clone(),
            &context.config.execution_namespace,
            &backend_name,
        )
        .await?;

    // A backend we never recorded is either our own creation that a
    // crash left unacknowledged, or another execution's lock on the
    // target.
    if !matches!(state, BackendState::NotFound) && status.execution_ref.is_none() {
        let owner = backend
            .owner(
                context.client.clone(),
                &context.config.execution_namespace,
                &backend_name,
            )
            .await?;
        if owner.as_deref() != instance.meta().name.as_deref() {
            return Ok(WorkflowExecutionAction::Fail {
                details: classify::lock_conflict(&backend_name),
                event: EVENT_WORKFLOW_FAILED,
                backend_name: Some(backend_name),
            });
        }
    }

    match state {
        BackendState::NotFound => {
            if status.execution_ref.is_some() {
                // Created earlier, gone now: somebody deleted it.
                return Ok(WorkflowExecutionAction::Fail {
                    details: classify::externally_deleted(&backend_name),
                    event: EVENT_WORKFLOW_FAILED,
                    backend_name: Some(backend_name),
                });
            }

            let declared = context
                .catalog
                .dependencies(
                    &instance.spec.workflow_ref.workflow_id,
                    &instance.spec.workflow_ref.version,
                )
                .await?;
            match resolve(
                context.client.clone(),
                &context.config.execution_namespace,
                &declared,
            )
            .await?
            {
                Resolution::Missing(message) => Ok(WorkflowExecutionAction::Fail {
                    details: classify::configuration_error(message),
                    event: EVENT_VALIDATION_FAILED,
                    backend_name: None,
                }),
                Resolution::Resolved(dependencies) => {
                    if let Some(remaining) = cooldown_remaining_for(context, instance).await? {
                        return Ok(WorkflowExecutionAction::Cooldown { remaining });
                    }
                    Ok(WorkflowExecutionAction::CreateBackend { dependencies })
                }
            }
        }
        BackendState::Pending | BackendState::Running { .. } => {
            Ok(WorkflowExecutionAction::Track {
                state,
                backend_name,
            })
        }
        BackendState::Succeeded { .. } => Ok(WorkflowExecutionAction::Complete {
            state,
            backend_name,
        }),
        BackendState::Failed { .. } => match classify::from_backend(&state) {
            Some(details) => Ok(WorkflowExecutionAction::Fail {
                details,
                event: EVENT_WORKFLOW_FAILED,
                backend_name: Some(backend_name),
            }),
            None => Ok(WorkflowExecutionAction::NoOp),
        },
    }
}

/// Scans the most recent terminal execution for the same target and
/// returns the remaining cooldown, if any. Derived from completion
/// timestamps, not an in-memory timer, so it is crash-safe.
async fn cooldown_remaining_for(
    context: &Arc<ContextData>,
    instance: &WorkflowExecution,
) -> Result<Option<std::time::Duration>, Error> {
    let api: Api<WorkflowExecution> = Api::all(context.client.clone());
    let list = api.list(&ListParams::default()).await?;
    Ok(cooldown::cooldown_remaining(
        &list.items,
        &instance.spec.target_resource,
        instance.meta().uid.as_deref(),
        context.config.cooldown_period,
        Timestamp::now(),
    ))
}

/// Actions to be taken when a reconciliation fails - for whatever reason.
/// Prints out the error to `stderr` and requeues the resource for another
/// reconciliation after five seconds.
fn on_error(
    instance: Arc<WorkflowExecution>,
    error: &Error,
    _context: Arc<ContextData>,
) -> Action {
    eprintln!(
        "{}",
        format!("Reconciliation error: {:?} {:?}", error, instance).red()
    );
    Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    #[test]
    fn fresh_resources_need_initialization() {
        let mut wfe =
            WorkflowExecution::new("run-app-restart", WorkflowExecutionSpec::default());
        assert!(needs_initialize(&wfe));

        wfe.finalizers_mut()
            .push(finalizer::FINALIZER_NAME.to_string());
        // Finalizer present but status missing still needs the first write.
        assert!(needs_initialize(&wfe));

        wfe.status = Some(WorkflowExecutionStatus::default());
        assert!(!needs_initialize(&wfe));
    }

    #[test]
    fn job_events_map_back_through_labels() {
        let job = Job {
            metadata: ObjectMeta {
                name: Some("wfe-0011223344556677".into()),
                namespace: Some("kubernaut-workflows".into()),
                labels: Some(
                    [
                        (
                            labels::WORKFLOW_EXECUTION.to_string(),
                            "run-app-restart".to_string(),
                        ),
                        (labels::SOURCE_NAMESPACE.to_string(), "ns-a".to_string()),
                    ]
                    .into(),
                ),
                ..Default::default()
            },
            ..Default::default()
        };
        let reference = map_backend_to_workflow_execution(job).unwrap();
        assert_eq!(reference.name, "run-app-restart");
        assert_eq!(reference.namespace.as_deref(), Some("ns-a"));
    }

    #[test]
    fn unlabeled_jobs_are_ignored() {
        let job = Job::default();
        assert!(map_backend_to_workflow_execution(job).is_none());
    }

    #[test]
    fn config_parses_durations() {
        let config = ControllerConfig::from_args(&args::ExecutionArgs {
            execution_namespace: "kubernaut-workflows".into(),
            service_account_name: "kubernaut-workflow-runner".into(),
            cooldown_period: "5m".into(),
            backend_poll_interval: "10s".into(),
            default_timeout: "10m".into(),
        })
        .unwrap();
        assert_eq!(config.cooldown_period, std::time::Duration::from_secs(300));
        assert_eq!(
            config.backend_poll_interval,
            std::time::Duration::from_secs(10)
        );
        assert_eq!(config.default_timeout, std::time::Duration::from_secs(600));

        assert!(
            ControllerConfig::from_args(&args::ExecutionArgs {
                execution_namespace: "kubernaut-workflows".into(),
                service_account_name: "kubernaut-workflow-runner".into(),
                cooldown_period: "not a duration".into(),
                backend_poll_interval: "10s".into(),
                default_timeout: "10m".into(),
            })
            .is_err()
        );
    }
}
