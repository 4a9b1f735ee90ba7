use prometheus::{
    HistogramVec, IntCounterVec, histogram_opts, opts, register_histogram_vec,
    register_int_counter_vec,
};

/// Per-controller reconciliation metrics, registered against the
/// process-wide default registry and scraped by the metrics server.
pub struct ControllerMetrics {
    /// Total number of reconciles per managed resource.
    pub reconcile_counter: IntCounterVec,

    /// Count of each action taken during the write phase.
    pub action_counter: IntCounterVec,

    /// Duration of the read phase, labeled by the chosen action.
    pub read_histogram: HistogramVec,

    /// Duration of the write phase, labeled by the performed action.
    pub write_histogram: HistogramVec,
}

impl ControllerMetrics {
    pub fn new(controller: &str) -> Self {
        ControllerMetrics {
            reconcile_counter: register_int_counter_vec!(
                opts!(
                    format!("{}_reconcile_total", controller),
                    "Total number of reconciliations."
                ),
                &["name", "namespace"]
            )
            .unwrap(),
            action_counter: register_int_counter_vec!(
                opts!(
                    format!("{}_action_total", controller),
                    "Actions performed during the write phase."
                ),
                &["name", "namespace", "action"]
            )
            .unwrap(),
            read_histogram: register_histogram_vec!(
                histogram_opts!(
                    format!("{}_read_duration_seconds", controller),
                    "Duration of the reconciliation read phase."
                ),
                &["name", "namespace", "action"]
            )
            .unwrap(),
            write_histogram: register_histogram_vec!(
                histogram_opts!(
                    format!("{}_write_duration_seconds", controller),
                    "Duration of the reconciliation write phase."
                ),
                &["name", "namespace", "action"]
            )
            .unwrap(),
        }
    }
}

/// Terminal-outcome metrics. Label cardinality is fixed at two: the
/// only label is `outcome` in {Completed, Failed}.
pub struct WorkflowMetrics {
    pub terminal_total: IntCounterVec,

    pub terminal_duration: HistogramVec,
}

impl WorkflowMetrics {
    pub fn new() -> Self {
        WorkflowMetrics {
            terminal_total: register_int_counter_vec!(
                opts!(
                    "workflowexecution_reconciler_total",
                    "WorkflowExecutions that entered a terminal phase."
                ),
                &["outcome"]
            )
            .unwrap(),
            terminal_duration: register_histogram_vec!(
                histogram_opts!(
                    "workflowexecution_reconciler_duration_seconds",
                    "Wall-clock duration of terminal WorkflowExecutions."
                ),
                &["outcome"]
            )
            .unwrap(),
        }
    }

    /// Records a terminal transition. Callers only invoke this on the
    /// reconcile that performs the transition, so each resource is
    /// counted exactly once.
    pub fn observe_terminal(&self, outcome: &str, duration_secs: Option<f64>) {
        self.terminal_total.with_label_values(&[outcome]).inc();
        if let Some(secs) = duration_secs {
            self.terminal_duration
                .with_label_values(&[outcome])
                .observe(secs);
        }
    }
}
