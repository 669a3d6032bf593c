use snafu::Snafu;

/// Errors raised by the object store gateway.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
#[allow(missing_docs)]
pub enum StoreError {
    #[snafu(display("Invalid object store endpoint '{}'", endpoint))]
    Endpoint { endpoint: String },
    #[snafu(display("Failed to upload object '{}': {}", key, source))]
    Put {
        key: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[snafu(display("Failed to list objects under '{}': {}", prefix, source))]
    List {
        prefix: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[snafu(display("Failed to delete object '{}': {}", key, source))]
    Delete {
        key: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[snafu(display("Timed out after {}s during '{}'", seconds, operation))]
    Timeout { operation: String, seconds: u64 },
    #[snafu(display("Object store circuit is open, '{}' not attempted", operation))]
    CircuitOpen { operation: String },
    #[snafu(display("Operation '{}' cancelled by the run context", operation))]
    Cancelled { operation: String },
    #[snafu(display(
        "No usable bucket: primary '{}' and fallbacks {:?} all failed",
        primary,
        fallbacks
    ))]
    NoUsableBucket {
        primary: String,
        fallbacks: Vec<String>,
    },
}

impl StoreError {
    /// Whether the error is the fail-fast circuit sentinel.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, StoreError::CircuitOpen { .. })
    }
}
