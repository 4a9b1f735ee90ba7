use clap::Parser;

/// Workflow catalog endpoint. Resolves a `workflowId@version` pair to
/// its declared secret/configMap dependencies.
#[derive(Parser, Debug, Clone)]
pub struct CatalogArgs {
    #[arg(long, env = "CATALOG_URL", required = true)]
    pub catalog_url: String,

    /// Read timeout for catalog queries, in seconds.
    #[arg(long, env = "CATALOG_TIMEOUT_SECS", default_value_t = 5)]
    pub catalog_timeout_secs: u64,
}

/// Audit collector endpoint. Lifecycle records are buffered and flushed
/// to `POST {audit_url}/audit/batch`.
#[derive(Parser, Debug, Clone)]
pub struct AuditArgs {
    #[arg(long, env = "AUDIT_URL", required = true)]
    pub audit_url: String,

    /// Write timeout for audit batch flushes, in seconds.
    #[arg(long, env = "AUDIT_TIMEOUT_SECS", default_value_t = 10)]
    pub audit_timeout_secs: u64,

    /// Capacity of the in-memory audit queue. Producers block briefly
    /// when the queue is full.
    #[arg(long, env = "AUDIT_BUFFER_SIZE", default_value_t = 256)]
    pub audit_buffer_size: usize,

    /// Seconds between periodic flushes of a partially filled batch.
    #[arg(long, env = "AUDIT_FLUSH_INTERVAL_SECS", default_value_t = 5)]
    pub audit_flush_interval_secs: u64,

    /// Maximum records per flush request.
    #[arg(long, env = "AUDIT_BATCH_SIZE", default_value_t = 64)]
    pub audit_batch_size: usize,
}

/// Where and how backend execution resources are created.
#[derive(Parser, Debug, Clone)]
pub struct ExecutionArgs {
    /// Namespace that holds every backend execution resource, distinct
    /// from the namespaces WorkflowExecutions live in.
    #[arg(long, env = "EXECUTION_NAMESPACE", default_value = "kubernaut-workflows")]
    pub execution_namespace: String,

    /// Service account backends run under. Workflows run with elevated
    /// privileges, so this is never taken from the spec.
    #[arg(
        long,
        env = "SERVICE_ACCOUNT_NAME",
        default_value = "kubernaut-workflow-runner"
    )]
    pub service_account_name: String,

    /// Minimum elapsed time after a terminal completion before another
    /// execution may run against the same target, e.g. "5m".
    #[arg(long, env = "COOLDOWN_PERIOD", default_value = "5m")]
    pub cooldown_period: String,

    /// How often a live backend is polled for status, e.g. "10s".
    #[arg(long, env = "BACKEND_POLL_INTERVAL", default_value = "10s")]
    pub backend_poll_interval: String,

    /// Default execution timeout applied when the spec does not carry
    /// one, e.g. "10m".
    #[arg(long, env = "DEFAULT_EXECUTION_TIMEOUT", default_value = "10m")]
    pub default_timeout: String,
}
