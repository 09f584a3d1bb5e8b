//! SSH key lifecycle for managed routers.
//!
//! Rotation order is fixed: generate, install with the current credential,
//! log in with the new key, and only then retire old keys and persist. A
//! failure before the login check leaves both the device and the stored
//! credential untouched.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use log::{error, info, warn};
use russh::keys::ssh_key::LineEnding;
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::{Algorithm, HashAlg, PrivateKey};
use schemars::JsonSchema;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::{KEY_ROTATION_DAYS, KEY_WARNING_DAYS, Settings};
use crate::credential::CredentialVault;
use crate::error::{CredentialError, ProvisionError};
use crate::model::Router;
use crate::orchestrator::RouterLocks;
use crate::script::{Selector, escape};
use crate::session::{Connector, SshExecutor};
use crate::store::RouterStore;

/// A freshly generated or derived key pair.
pub struct KeyPair {
    /// OpenSSH public key line, comment included.
    pub public_key: String,
    /// OpenSSH private key.
    pub private_key: SecretString,
    /// `SHA256:...` fingerprint.
    pub fingerprint: String,
    /// Key comment; RouterOS shows it as the key owner.
    pub comment: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("fingerprint", &self.fingerprint)
            .field("comment", &self.comment)
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    fn from_private(key: &mut PrivateKey, comment: String) -> Result<Self, ProvisionError> {
        key.set_comment(comment.clone());
        let private_key = key.to_openssh(LineEnding::LF)?;
        Ok(Self {
            public_key: key.public_key().to_openssh()?,
            private_key: SecretString::new(private_key.as_str().into()),
            fingerprint: key.fingerprint(HashAlg::Sha256).to_string(),
            comment,
        })
    }
}

/// Result of a rotation or first-time key install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RotationResult {
    pub router_id: String,
    pub fingerprint: String,
    pub at: DateTime<Utc>,
    /// Whether superseded keys were removed from the device.
    pub old_keys_removed: bool,
    /// Router whose key was reused under the one-key-per-tenant policy.
    pub shared_from: Option<String>,
}

/// Age of the router's current key in whole days, `None` without a key.
pub fn key_age_days(router: &Router, now: DateTime<Utc>) -> Option<i64> {
    router.ssh_key.as_ref()?;
    router.key_reference_time().map(|at| (now - at).num_days())
}

/// The key is at least [`KEY_ROTATION_DAYS`] old.
pub fn needs_rotation(router: &Router, now: DateTime<Utc>) -> bool {
    key_age(router, now).is_some_and(|age| age >= TimeDelta::days(KEY_ROTATION_DAYS))
}

/// The key is inside the warning window before rotation is due.
pub fn approaching_rotation(router: &Router, now: DateTime<Utc>) -> bool {
    key_age(router, now).is_some_and(|age| {
        age >= TimeDelta::days(KEY_WARNING_DAYS) && age < TimeDelta::days(KEY_ROTATION_DAYS)
    })
}

fn key_age(router: &Router, now: DateTime<Utc>) -> Option<TimeDelta> {
    if router.is_deleted() || router.ssh_key.is_none() {
        return None;
    }
    router.key_reference_time().map(|at| now - at)
}

fn key_file_name(router_id: &str) -> String {
    format!("rosprov_key_{router_id}.pub")
}

/// Generates, installs, verifies and rotates router SSH keys.
pub struct KeyRotationService<C: Connector, S: RouterStore> {
    connector: Arc<C>,
    store: Arc<S>,
    vault: Arc<CredentialVault>,
    settings: Settings,
    locks: RouterLocks,
}

impl<C: Connector, S: RouterStore> KeyRotationService<C, S> {
    pub fn new(
        connector: Arc<C>,
        store: Arc<S>,
        vault: Arc<CredentialVault>,
        settings: Settings,
        locks: RouterLocks,
    ) -> Self {
        Self {
            connector,
            store,
            vault,
            settings,
            locks,
        }
    }

    /// A new Ed25519 pair with comment `rosprov-<router_id>-<unix time>`.
    pub fn generate_key_pair(&self, router: &Router) -> Result<KeyPair, ProvisionError> {
        let mut key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)?;
        let pair = KeyPair::from_private(&mut key, key_comment(&router.id))?;
        info!(router_id = router.id.as_str(), fingerprint = pair.fingerprint.as_str(); "generated ssh key pair");
        Ok(pair)
    }

    /// Installs `pair`'s public key for the router user, connecting with the
    /// router's current credential, and checks the device lists it.
    pub async fn upload_public_key_to_router(&self, router: &Router, pair: &KeyPair) -> Result<(), ProvisionError> {
        let mut executor = SshExecutor::new(router, &self.vault, self.connector.clone(), &self.settings)?;
        let result = install_public_key(&mut executor, router, pair).await;
        executor.disconnect().await;
        match &result {
            Ok(()) => info!(router_id = router.id.as_str(), operation = "upload_key", success = true; "public key installed"),
            Err(e) => error!(router_id = router.id.as_str(), operation = "upload_key", success = false; "public key install failed: {e}"),
        }
        result
    }

    /// Logs in with only `private_key` and runs a harmless command.
    pub async fn test_key_authentication(
        &self,
        router: &Router,
        private_key: &SecretString,
    ) -> Result<(), ProvisionError> {
        let mut executor = self.new_key_executor(router, private_key)?;
        let result = executor.exec("/system identity print").await;
        executor.disconnect().await;
        let fail = |reason: String| ProvisionError::KeyAuthentication {
            router_id: router.id.clone(),
            reason,
        };
        match result {
            Ok(output) if !output.stdout.trim().is_empty() => {
                info!(router_id = router.id.as_str(), operation = "test_key", success = true; "new key authenticated");
                Ok(())
            }
            Ok(_) => Err(fail("no response from router".to_string())),
            Err(e) => Err(fail(e.to_string())),
        }
    }

    /// Removes the user's keys other than the one owned by `keep_comment`,
    /// logging in with the new key.
    pub async fn remove_old_keys(
        &self,
        router: &Router,
        private_key: &SecretString,
        keep_comment: &str,
    ) -> Result<(), ProvisionError> {
        let mut executor = self.new_key_executor(router, private_key)?;
        let selector = Selector::eq("user", &router.username).and_ne("key-owner", keep_comment);
        let result = executor
            .exec(&format!("/user ssh-keys remove {}", selector.render_find()))
            .await;
        executor.disconnect().await;
        result.map(|_| ())
    }

    /// Replaces the router's key. Serialized with deployments on the router lock.
    pub async fn rotate_key(&self, router_id: &str) -> Result<RotationResult, ProvisionError> {
        let _guard = self.locks.acquire(router_id, self.settings.lock_wait()).await?;
        let router = self.store.router(router_id).await?;
        if router.ssh_key.is_none() {
            return Err(ProvisionError::from(CredentialError::NotConfigured {
                router_id: router.id.clone(),
            }));
        }

        let pair = self.generate_key_pair(&router)?;
        self.upload_public_key_to_router(&router, &pair).await?;
        // the old key stays on the device and in storage until this passes
        self.test_key_authentication(&router, &pair.private_key).await?;

        // stored before the old key goes, so a failed write leaves it usable
        let at = Utc::now();
        let encrypted = self.vault.encrypt(pair.private_key.expose_secret())?;
        self.store.update_ssh_key(&router.id, encrypted, at).await?;

        let old_keys_removed = match self.remove_old_keys(&router, &pair.private_key, &pair.comment).await {
            Ok(()) => true,
            Err(e) => {
                warn!(router_id = router.id.as_str(), operation = "remove_old_keys"; "old key removal failed: {e}");
                false
            }
        };

        info!(
            router_id = router.id.as_str(),
            operation = "rotate_key",
            success = true;
            "ssh key rotated, fingerprint {}",
            pair.fingerprint
        );
        Ok(RotationResult {
            router_id: router.id,
            fingerprint: pair.fingerprint,
            at,
            old_keys_removed,
            shared_from: None,
        })
    }

    /// First key for a router; reuses a key already held by another router of
    /// the same tenant.
    pub async fn initialize_key(&self, router_id: &str) -> Result<RotationResult, ProvisionError> {
        let _guard = self.locks.acquire(router_id, self.settings.lock_wait()).await?;
        let router = self.store.router(router_id).await?;
        if router.ssh_key.is_some() {
            return Err(ProvisionError::KeyAlreadyInitialized(router.id));
        }

        // keys are only shared inside a tenant
        let peers = match router.tenant_id.as_deref() {
            Some(tenant) => self.store.routers(Some(tenant)).await?,
            None => Vec::new(),
        };
        let shared = peers.iter().find(|r| r.id != router.id && r.ssh_key.is_some());
        let (pair, shared_from) = match shared {
            Some(source) => {
                let stored = source.ssh_key.as_ref().ok_or_else(|| CredentialError::NotConfigured {
                    router_id: source.id.clone(),
                })?;
                let pem = self.vault.decrypt(stored, &source.id, "ssh key")?;
                let mut key = PrivateKey::from_openssh(pem.expose_secret())?;
                info!(router_id = router.id.as_str(), source = source.id.as_str(); "reusing tenant ssh key");
                (KeyPair::from_private(&mut key, key_comment(&router.id))?, Some(source.id.clone()))
            }
            None => (self.generate_key_pair(&router)?, None),
        };

        self.upload_public_key_to_router(&router, &pair).await?;
        self.test_key_authentication(&router, &pair.private_key).await?;

        let at = Utc::now();
        let encrypted = self.vault.encrypt(pair.private_key.expose_secret())?;
        self.store.initialize_ssh_key(&router.id, encrypted, at).await?;
        info!(router_id = router.id.as_str(), operation = "initialize_key", success = true; "ssh key initialized");
        Ok(RotationResult {
            router_id: router.id,
            fingerprint: pair.fingerprint,
            at,
            old_keys_removed: false,
            shared_from,
        })
    }

    /// Routers whose key is due for rotation at `now`.
    pub async fn routers_needing_rotation(&self, now: DateTime<Utc>) -> Result<Vec<Router>, ProvisionError> {
        let routers: Vec<Router> = self
            .store
            .routers(None)
            .await?
            .into_iter()
            .filter(|r| needs_rotation(r, now))
            .collect();
        info!(operation = "rotation_due", count = routers.len(); "routers needing key rotation");
        Ok(routers)
    }

    /// Routers inside the warning window at `now`.
    pub async fn routers_approaching_rotation(&self, now: DateTime<Utc>) -> Result<Vec<Router>, ProvisionError> {
        let routers: Vec<Router> = self
            .store
            .routers(None)
            .await?
            .into_iter()
            .filter(|r| approaching_rotation(r, now))
            .collect();
        info!(operation = "rotation_warning", count = routers.len(); "routers approaching key rotation");
        Ok(routers)
    }

    /// Executor for a throwaway copy of `router` that carries only `private_key`.
    fn new_key_executor(&self, router: &Router, private_key: &SecretString) -> Result<SshExecutor<C>, ProvisionError> {
        let mut probe = router.clone();
        probe.ssh_key = Some(self.vault.encrypt(private_key.expose_secret())?);
        probe.password = None;
        SshExecutor::new(&probe, &self.vault, self.connector.clone(), &self.settings)
    }
}

fn key_comment(router_id: &str) -> String {
    format!("rosprov-{router_id}-{}", Utc::now().timestamp())
}

async fn install_public_key<C: Connector>(
    executor: &mut SshExecutor<C>,
    router: &Router,
    pair: &KeyPair,
) -> Result<(), ProvisionError> {
    let file = key_file_name(&router.id);
    executor.upload_file(&file, &pair.public_key).await?;
    let imported = executor
        .exec(&format!(
            "/user ssh-keys import public-key-file=\"{}\" user=\"{}\"",
            escape(&file),
            escape(&router.username)
        ))
        .await;
    executor.delete_file(&file).await;
    imported?;

    let listed = Selector::eq("user", &router.username).and_eq("key-owner", &pair.comment);
    let output = executor
        .exec(&format!("/user ssh-keys print count-only where {}", listed.conditions()))
        .await?;
    if output.stdout.trim().parse::<u32>().unwrap_or(0) == 0 {
        return Err(ProvisionError::KeyVerification(format!(
            "key {} not listed for {} on {}",
            pair.comment, router.username, router.id
        )));
    }
    Ok(())
}
