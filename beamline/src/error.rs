//! Error types for beamline
//!
//! Precondition violations (bad logits shape, unsupported beam counts,
//! appending past `max_length`) are assertion failures and never show up
//! here. Everything a device call can fail with is an [`Error`], propagated
//! with `?` up to the decode-loop driver, which applies [`fatal`].

use thiserror::Error;

/// Result type alias using beamline's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for beamline operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("device error: {0}")]
    Device(String),

    #[error("invalid search configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// The single abort policy for unrecoverable errors.
///
/// Device failures are not retried and there is no partial-result path:
/// the error string is logged and the current thread panics, unwinding the
/// generation run.
pub fn fatal(err: &Error) -> ! {
    tracing::error!(error = %err, "aborting generation");
    panic!("beamline: {err}");
}

// ---------------------------------------------------------------------------
// Optional From impls for cudarc error types (enabled by `cuda-errors` feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "cuda-errors")]
impl From<cudarc::driver::DriverError> for Error {
    fn from(e: cudarc::driver::DriverError) -> Self {
        Self::Device(e.to_string())
    }
}
