//! Error types for script generation, SSH execution and key rotation.
//!
//! Errors fall into the classes reported by [`ProvisionError::kind`]:
//! validation errors are raised before any device interaction, transport and
//! post-deploy validation errors are retryable, and credential errors are
//! never retryable because repeating the operation cannot fix a wrong key.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of a [`ProvisionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Transport,
    Credential,
    DeployValidation,
    Persistence,
    Busy,
}

/// Failures while resolving the credential an executor session uses.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// The router record carries neither an SSH key nor a password.
    #[error("router {router_id} has no SSH key or password configured")]
    NotConfigured { router_id: String },

    /// The stored value exists but does not decrypt with the current app key.
    ///
    /// This usually means the application key was changed after the
    /// credential was stored. The credential has to be re-entered.
    #[error(
        "failed to decrypt router {field} for {router_id}: app key mismatch, re-enter the credential or restore the original app key"
    )]
    KeyMismatch { router_id: String, field: String },

    /// The stored value is not in the `enc:v1:` envelope format.
    #[error("stored {field} for {router_id} is not a valid encrypted value: {reason}")]
    Malformed {
        router_id: String,
        field: String,
        reason: String,
    },

    /// The session already zeroed its credential.
    #[error("credential for {router_id} was destroyed on disconnect")]
    Destroyed { router_id: String },

    /// The vault itself could not be initialised.
    #[error("credential vault: {0}")]
    Vault(String),
}

/// Errors that can occur while provisioning a RouterOS device.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The interface list passed to a generator was empty.
    #[error("at least one interface is required")]
    NoInterfaces,

    /// An interface name contains characters RouterOS object names cannot carry.
    #[error("invalid interface name '{0}'")]
    InvalidInterface(String),

    /// Router identifiers are embedded in object names and must be plain tokens.
    #[error("invalid router id '{0}'")]
    InvalidRouterId(String),

    /// The IP pool string failed validation.
    #[error("invalid IP pool '{pool}': {reason}")]
    InvalidIpPool { pool: String, reason: String },

    /// A required generator option is missing.
    #[error("missing required option '{0}'")]
    MissingOption(&'static str),

    /// A generator option is present but unusable.
    #[error("invalid option '{name}': {reason}")]
    InvalidOption { name: &'static str, reason: String },

    /// The requested service layout would mix hotspot and PPPoE traffic.
    #[error("invalid service layout: {0}")]
    ServiceLayout(String),

    /// Nothing was selected for generation.
    #[error("no service selected")]
    NoServiceSelected,

    /// A generated or saved script failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Tenant scoped operation invoked without a tenant.
    #[error("tenant context is required but not set")]
    TenantRequired,

    /// Credential resolution failed.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// SSH connection could not be established or authenticated.
    #[error("connect to {router_id} ({host}) failed: {reason}")]
    Connect {
        router_id: String,
        host: String,
        reason: String,
    },

    /// An operation did not finish within the bounded session timeout.
    #[error("{operation} on {router_id} timed out after {seconds}s")]
    Timeout {
        router_id: String,
        operation: String,
        seconds: u64,
    },

    /// A command could not be run or the device reported an error.
    #[error("command on {router_id} failed: {command}: {reason}")]
    CommandFailed {
        router_id: String,
        command: String,
        reason: String,
    },

    /// The executor session was used after disconnect.
    #[error("session for {0} is closed")]
    SessionClosed(String),

    /// The device did not reach the expected state after deployment.
    #[error("deployment validation failed on {router_id}: {reason}")]
    DeployValidation { router_id: String, reason: String },

    /// Every retry attempt failed.
    #[error("deployment to {router_id} failed after {attempts} attempts: {reason}")]
    DeployFailed {
        router_id: String,
        attempts: u32,
        reason: String,
    },

    /// The uploaded public key was not listed by the device.
    #[error("public key for {0} was not found on the device after import")]
    KeyVerification(String),

    /// The new key could not authenticate; the old key is left in place.
    #[error("new SSH key for {router_id} failed authentication: {reason}")]
    KeyAuthentication { router_id: String, reason: String },

    /// `initialize_key` was called for a router that already has a key.
    #[error("router {0} already has an SSH key, use rotation instead")]
    KeyAlreadyInitialized(String),

    #[error("router {0} not found")]
    RouterNotFound(String),

    #[error("no saved {config_type} configuration for router {router_id}")]
    ConfigNotFound {
        router_id: String,
        config_type: String,
    },

    /// Another provisioning operation holds the router lock.
    #[error("router {0} is busy with another provisioning operation")]
    RouterBusy(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    /// An error occurred in the async-ssh2-tokio library.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Key generation or parsing failed.
    #[error("ssh key error: {0}")]
    SshKeyError(#[from] russh::keys::ssh_key::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ProvisionError {
    /// Returns the taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoInterfaces
            | Self::InvalidInterface(_)
            | Self::InvalidRouterId(_)
            | Self::InvalidIpPool { .. }
            | Self::MissingOption(_)
            | Self::InvalidOption { .. }
            | Self::ServiceLayout(_)
            | Self::NoServiceSelected
            | Self::InvalidConfiguration(_)
            | Self::TenantRequired
            | Self::KeyAlreadyInitialized(_)
            | Self::JsonError(_) => ErrorKind::Validation,
            Self::Credential(_) | Self::SshKeyError(_) => ErrorKind::Credential,
            Self::DeployValidation { .. } | Self::KeyVerification(_) => {
                ErrorKind::DeployValidation
            }
            Self::RouterNotFound(_) | Self::ConfigNotFound { .. } | Self::Persistence(_) => {
                ErrorKind::Persistence
            }
            Self::RouterBusy(_) => ErrorKind::Busy,
            Self::Connect { .. }
            | Self::Timeout { .. }
            | Self::CommandFailed { .. }
            | Self::SessionClosed(_)
            | Self::DeployFailed { .. }
            | Self::KeyAuthentication { .. }
            | Self::Ssh2Error(_)
            | Self::RusshError(_) => ErrorKind::Transport,
        }
    }

    /// Whether repeating the operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SessionClosed(_) | Self::DeployFailed { .. } => false,
            _ => matches!(
                self.kind(),
                ErrorKind::Transport | ErrorKind::DeployValidation | ErrorKind::Busy
            ),
        }
    }

    pub(crate) fn invalid_option(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            name,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_mismatch_is_not_retryable() {
        let err = ProvisionError::from(CredentialError::KeyMismatch {
            router_id: "R1".to_string(),
            field: "ssh key".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::Credential);
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("app key mismatch"));
    }

    #[test]
    fn transport_and_validation_after_deploy_are_retryable() {
        let connect = ProvisionError::Connect {
            router_id: "R1".to_string(),
            host: "10.0.0.1".to_string(),
            reason: "refused".to_string(),
        };
        let validation = ProvisionError::DeployValidation {
            router_id: "R1".to_string(),
            reason: "bridge missing".to_string(),
        };
        assert!(connect.is_retryable());
        assert!(validation.is_retryable());
        assert!(!ProvisionError::NoInterfaces.is_retryable());
    }
}
