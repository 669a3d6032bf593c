use snafu::Snafu;

/// Common error type for the backup service.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
#[allow(missing_docs)]
pub enum SvcError {
    #[snafu(display("Invalid configuration: {}", reason))]
    InvalidConfig { reason: String },
    #[snafu(display("Kubernetes client error: {}", source))]
    Kube { source: kube::Error },
    #[snafu(display("API discovery failed: {}", reason))]
    Discovery { reason: String },
    #[snafu(display("Kubernetes API circuit is open, '{}' not attempted", operation))]
    ApiCircuitOpen { operation: String },
    #[snafu(display("Object store error: {}", source))]
    Store { source: ostor::StoreError },
    #[snafu(display(
        "Failed to list '{}' in '{}': {}",
        resource,
        namespace,
        reason
    ))]
    ListResource {
        resource: String,
        namespace: String,
        reason: String,
    },
    #[snafu(display("Resource '{}' failed YAML validation: {}", name, reason))]
    InvalidResource { name: String, reason: String },
    #[snafu(display(
        "Resource '{}' exceeds the size limit ({} > {} bytes)",
        name,
        size,
        limit
    ))]
    ResourceTooLarge { name: String, size: usize, limit: u64 },
    #[snafu(display("Namespace whitelist is empty"))]
    EmptyWhitelist,
    #[snafu(display("Backup run exceeded the global deadline"))]
    RunTimeout,
    #[snafu(display("Operation '{}' cancelled by the run context", operation))]
    Cancelled { operation: String },
}

impl SvcError {
    /// Whether the error is a circuit fail-fast sentinel from either
    /// failure domain.
    pub fn is_circuit_open(&self) -> bool {
        match self {
            SvcError::ApiCircuitOpen { .. } => true,
            SvcError::Store { source } => source.is_circuit_open(),
            _ => false,
        }
    }
}

impl From<kube::Error> for SvcError {
    fn from(source: kube::Error) -> Self {
        Self::Kube { source }
    }
}

impl From<ostor::StoreError> for SvcError {
    fn from(source: ostor::StoreError) -> Self {
        Self::Store { source }
    }
}
