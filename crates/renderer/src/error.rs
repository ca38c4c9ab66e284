use thiserror::Error;

/// Failures reported by a render device or context.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no usable adapter: {0}")]
    Adapter(String),
    #[error("device request failed: {0}")]
    Device(String),
    #[error("allocation of '{label}' failed: {reason}")]
    AllocationFailed { label: String, reason: String },
    #[error("invalid view: {0}")]
    InvalidView(String),
    #[error("unknown {kind} handle {id}")]
    UnknownResource { kind: &'static str, id: u64 },
    #[error("program '{label}' failed: {reason}")]
    Program { label: String, reason: String },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("submission failed: {0}")]
    Submit(String),
}

impl GpuError {
    pub(crate) fn allocation(label: &str, reason: impl Into<String>) -> Self {
        GpuError::AllocationFailed {
            label: label.to_owned(),
            reason: reason.into(),
        }
    }
}
