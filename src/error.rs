//! Error types for the batch console

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Student not found: {0}")]
    StudentNotFound(String),

    #[error("VM template not found: {0}")]
    TemplateNotFound(String),

    #[error("Batch {0} has no VM configuration")]
    VmConfigMissing(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid state: workflow is {current}, expected {expected}")]
    InvalidState { current: String, expected: String },

    #[error("Batch {0} cannot be activated until both parties approve it")]
    NotActivatable(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    #[error("Approval failed: {0}")]
    Approval(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No async runtime available: {0}")]
    Runtime(String),

    #[error("Console has been shut down")]
    ShutDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Missing or malformed operator input; the transition was refused.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::VmConfigMissing(_))
    }

    /// A workflow action invoked from the wrong state.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::InvalidState { .. } | Error::NotActivatable(_) | Error::ShutDown
        )
    }

    pub(crate) fn invalid_state(current: impl ToString, expected: impl Into<String>) -> Self {
        Error::InvalidState {
            current: current.to_string(),
            expected: expected.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Validation("email is required".into()).is_validation());
        assert!(Error::VmConfigMissing("batch-1".into()).is_validation());
        assert!(Error::invalid_state("Provisioning", "NotProvisioned").is_precondition());
        assert!(Error::NotActivatable("batch-1".into()).is_precondition());
        assert!(!Error::BatchNotFound("batch-1".into()).is_precondition());
    }

    #[test]
    fn test_invalid_state_message() {
        let err = Error::invalid_state("Cloning", "Provisioned");
        assert_eq!(
            err.to_string(),
            "Invalid state: workflow is Cloning, expected Provisioned"
        );
    }
}
