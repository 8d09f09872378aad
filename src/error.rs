//! Error kinds returned by the Network Control Plane, the Local Mirror and the Reconciler.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    /// The provider answered with an error; its message is passed through.
    #[error("{0}")]
    ControlPlaneCallFailed(String),

    /// The provider reports a missing resource group or network.
    #[error("{0}")]
    ResourceNotFound(String),

    /// Local persistence failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl ProvisionError {
    /// Prefix a provider failure message with the operation context.
    ///
    /// Only [`ProvisionError::ControlPlaneCallFailed`] and
    /// [`ProvisionError::ResourceNotFound`] are rewritten, the other kinds already carry
    /// their own prefix.
    pub fn context(self, prefix: &str) -> ProvisionError {
        match self {
            ProvisionError::ControlPlaneCallFailed(msg) => {
                ProvisionError::ControlPlaneCallFailed(format!("{prefix}: {msg}"))
            }
            ProvisionError::ResourceNotFound(msg) => {
                ProvisionError::ResourceNotFound(format!("{prefix}: {msg}"))
            }
            other => other,
        }
    }
}

impl From<sqlx::Error> for ProvisionError {
    fn from(e: sqlx::Error) -> Self {
        ProvisionError::StorageError(e.to_string())
    }
}

impl From<reqwest::Error> for ProvisionError {
    fn from(e: reqwest::Error) -> Self {
        ProvisionError::Unexpected(e.to_string())
    }
}

impl From<azure_core::Error> for ProvisionError {
    fn from(e: azure_core::Error) -> Self {
        ProvisionError::Unexpected(format!("credential error: {e}"))
    }
}
