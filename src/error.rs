//! Error types for stackbed
//!
//! Errors are structured with fields to aid debugging when a provisioning
//! run fails halfway through a layer chain. Each variant carries the
//! context needed to find the offending stack or configuration entry.

use thiserror::Error;

/// Main error type for stackbed operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The provider rejected or failed a stack create request
    #[error("provisioning error for stack {stack} in {region}: {message}")]
    Provisioning {
        /// Name of the stack being created
        stack: String,
        /// Region the create was submitted to
        region: String,
        /// Description of what failed
        message: String,
    },

    /// Secret generation or storage failed
    #[error("secret store error in {region}: {message}")]
    SecretStore {
        /// Region of the secret store
        region: String,
        /// Description of what failed
        message: String,
    },

    /// AMI resolution failed
    #[error("image lookup error in {region}: {message}")]
    ImageLookup {
        /// Region the image was looked up in
        region: String,
        /// Description of what failed
        message: String,
    },

    /// Inconsistent or malformed network topology configuration
    #[error("topology error: {0}")]
    Topology(String),

    /// Run configuration violates a documented precondition
    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a provisioning error for the given stack
    pub fn provisioning(
        stack: impl Into<String>,
        region: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provisioning {
            stack: stack.into(),
            region: region.into(),
            message: msg.into(),
        }
    }

    /// Create a secret store error with the given message
    pub fn secret_store(region: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SecretStore {
            region: region.into(),
            message: msg.into(),
        }
    }

    /// Create an image lookup error with the given message
    pub fn image_lookup(region: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ImageLookup {
            region: region.into(),
            message: msg.into(),
        }
    }

    /// Create a topology error with the given message
    pub fn topology(msg: impl Into<String>) -> Self {
        Self::Topology(msg.into())
    }

    /// Create an invalid-configuration error with the given message
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}
