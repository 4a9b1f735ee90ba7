#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Invalid user input: {0}")]
    UserInput(String),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("Parse duration: {source}")]
    ParseDuration {
        #[from]
        source: parse_duration::parse::Error,
    },

    /// Transient failure talking to the workflow catalog. Requeued with
    /// back-off; never marks the resource terminal.
    #[error("Catalog request failed: {source}")]
    Catalog { source: reqwest::Error },

    #[error("Audit pipeline error: {0}")]
    Audit(String),
}
