//! Errors raised on the noise sampling path.

/// Errors from kernel setup, device allocation and read-back
#[derive(thiserror::Error, Debug)]
pub enum SamplerError {
    #[error("No suitable GPU adapter found")]
    Adapter,

    #[error("Failed to request device: {0}")]
    Device(String),

    #[error("Failed to parse kernel source: {0}")]
    ShaderParse(String),

    #[error("Kernel entry point '{0}' not found")]
    KernelNotFound(String),

    #[error("Failed to allocate {label} ({bytes} bytes)")]
    Allocation { label: &'static str, bytes: u64 },

    #[error("Readback error: {0}")]
    Readback(String),
}

impl SamplerError {
    pub fn allocation(label: &'static str, bytes: u64) -> Self {
        SamplerError::Allocation { label, bytes }
    }
}

/// Result type alias for sampling operations
pub type SamplerResult<T> = Result<T, SamplerError>;
