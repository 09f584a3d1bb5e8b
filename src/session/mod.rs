//! SSH sessions against RouterOS devices.
//!
//! An [`SshExecutor`] owns one authenticated session for one router. The
//! credential is decrypted once, when the executor is built, and zeroed when it
//! disconnects or is dropped. Commands run strictly one at a time.
//!
//! # Main Components
//!
//! - [`SshExecutor`] - session state machine, single commands, batches, file upload
//! - [`RetryPolicy`] / [`BatchOutcome`] - the deployment retry primitive and its result
//! - [`DeployValidator`] / [`ExpectedObjects`] - post-deploy checks run on the live session
//! - [`Connector`] / [`Transport`] - the seam between the executor and the wire
//! - [`RouterOsConnector`] - production transport over `async-ssh2-tokio`
//! - [`ConnectionSecurityOptions`] - SSH algorithm tiers and host key policy

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use log::{debug, error, info, trace, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use russh::Preferred;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{self, Settings};
use crate::credential::{CredentialVault, DecryptedCredential};
use crate::error::{CredentialError, ProvisionError};
use crate::model::Router;
use crate::script::{ObjectRef, escape};

pub use executor::SshExecutor;
pub use retry::{BatchOutcome, DeployValidator, ExpectedObjects, RetryPolicy};
pub use security::{ConnectionSecurityOptions, SecurityLevel};
pub use ssh::{RouterOsConnector, SshSession};

/// Boxed future used where a trait must stay object safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Output of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: u32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }
}

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub router_id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Bound on connect and on every command.
    pub timeout: Duration,
}

impl SshTarget {
    pub fn for_router(router: &Router, timeout: Duration) -> Self {
        Self {
            router_id: router.id.clone(),
            host: router.ssh_host().to_string(),
            port: router.ssh_port(),
            username: router.username.clone(),
            timeout: timeout.min(config::MAX_SSH_TIMEOUT),
        }
    }
}

/// Lifecycle of an [`SshExecutor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Connected,
    Executing,
    Idle,
    Disconnected,
}

/// An open, authenticated command channel.
pub trait Transport: Send {
    fn exec(&mut self, command: &str) -> impl Future<Output = Result<CommandOutput, ProvisionError>> + Send;

    fn is_connected(&self) -> bool;

    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens [`Transport`]s.
pub trait Connector: Send + Sync {
    type Transport: Transport;

    fn connect(
        &self,
        target: &SshTarget,
        credential: &DecryptedCredential,
    ) -> impl Future<Output = Result<Self::Transport, ProvisionError>> + Send;
}

/// Device output that means the command failed even with a zero exit status.
static DEVICE_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)(^|\n)\s*(failure:|expected end of command|input does not match any value|bad command name|syntax error|no such item|invalid value)",
    )
    .expect("valid device error regex")
});

/// First matching device error line, if any.
pub fn device_error(output: &str) -> Option<String> {
    let found = DEVICE_ERROR.find(output)?;
    let rest = &output[found.start()..];
    let line = rest.trim_start().lines().next().unwrap_or_default();
    Some(line.trim().to_string())
}

/// Shortens a command for logs and error messages.
pub(crate) fn preview(command: &str) -> String {
    const MAX: usize = 80;
    if command.chars().count() <= MAX {
        command.to_string()
    } else {
        let head: String = command.chars().take(MAX).collect();
        format!("{head}...")
    }
}

mod executor;
mod retry;
mod security;
mod ssh;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routeros_errors_are_detected_in_output() {
        assert!(device_error("failure: already have such name").is_some());
        assert_eq!(
            device_error("Script Error: x\nexpected end of command (line 1 column 5)").as_deref(),
            Some("expected end of command (line 1 column 5)")
        );
        assert!(device_error("  bad command name foo").is_some());
        assert!(device_error("name: R1").is_none());
    }

    #[test]
    fn target_prefers_vpn_and_maps_api_ports() {
        let mut router = Router::new("R1", "192.168.1.10/24", "rosprov");
        router.vpn_ip = Some("10.8.0.5".to_string());
        router.ssh_port = Some(8728);
        let target = SshTarget::for_router(&router, Duration::from_secs(120));
        assert_eq!(target.host, "10.8.0.5");
        assert_eq!(target.port, 22);
        assert_eq!(target.timeout, config::MAX_SSH_TIMEOUT);
    }

    #[test]
    fn long_commands_are_truncated_in_previews() {
        let long = "x".repeat(200);
        assert_eq!(preview(&long).len(), 83);
        assert_eq!(preview("/system identity print"), "/system identity print");
    }
}
