//! Error types for the gcloud-backed compute provider.

use crate::command::CommandError;
use crate::provider::SpecError;
use thiserror::Error;

/// Errors raised by the gcloud provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GcloudError {
    /// Raised when an instance spec fails validation.
    #[error("invalid instance spec: {0}")]
    Validation(String),
    /// Raised when the provider rejects a create request, most commonly
    /// because the requested accelerator has no capacity or quota in the
    /// chosen location.
    #[error("create rejected in {location} for instance {name}: {detail}")]
    ProvisionRejected {
        /// Instance name used in the request.
        name: String,
        /// Location the request targeted.
        location: String,
        /// Rejection detail reported by the provider.
        detail: String,
    },
    /// Raised when JSON output from the CLI cannot be parsed.
    #[error("failed to parse {operation} output: {message}")]
    Parse {
        /// Operation whose output failed to parse (for example `describe`).
        operation: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when the instance does not become reachable before the
    /// readiness timeout elapses.
    #[error("instance {name} in zone {zone} not ready after {waited_secs}s")]
    ReadinessTimeout {
        /// Instance name being waited on.
        name: String,
        /// Zone the instance was placed in.
        zone: String,
        /// Seconds waited before giving up.
        waited_secs: u64,
    },
    /// Raised when a delete request fails for a reason other than the
    /// instance already being gone.
    #[error("failed to delete instance {name} in zone {zone}: {detail}")]
    ReapFailed {
        /// Instance name the delete targeted.
        name: String,
        /// Zone the delete targeted.
        zone: String,
        /// Failure detail reported by the provider.
        detail: String,
    },
    /// Raised when the CLI itself cannot be executed.
    #[error(transparent)]
    Runner(#[from] CommandError),
}

impl From<SpecError> for GcloudError {
    fn from(value: SpecError) -> Self {
        match value {
            SpecError::Validation(field) => Self::Validation(field),
        }
    }
}
