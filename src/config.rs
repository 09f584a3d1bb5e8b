//! SSH algorithm tables and provisioning settings.
//!
//! RouterOS 6.x only speaks a narrow set of SSH algorithms (group14-sha1 key
//! exchange, ssh-rsa host keys, aes-ctr/cbc ciphers), while RouterOS 7.x adds
//! curve25519 and ed25519. The tables below are grouped into the three tiers
//! used by [`ConnectionSecurityOptions`](crate::session::ConnectionSecurityOptions).
//!
//! [`Settings`] carries the runtime knobs of the provisioning services. It can
//! be built from defaults, JSON, or `ROSPROV_*` environment variables.

use std::time::Duration;

use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, compression, kex, mac};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;
use crate::session::{RetryPolicy, SecurityLevel};

/// Upper bound for any single SSH connect or command.
pub const MAX_SSH_TIMEOUT: Duration = Duration::from_secs(30);

/// Default SSH port used when the stored port is unset or an API port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// RouterOS API ports that are sometimes stored in place of the SSH port.
pub const ROUTEROS_API_PORTS: &[u16] = &[8728, 8729, 8720];

/// Days after which an SSH key is due for rotation.
pub const KEY_ROTATION_DAYS: i64 = 90;

/// Days after which an SSH key enters the rotation warning window.
pub const KEY_WARNING_DAYS: i64 = 80;

/// PPPoE MTU/MRU used when the options leave them unset.
pub const DEFAULT_PPPOE_MTU: u16 = 1480;

/// PPPoE keepalive timeout in seconds.
pub const DEFAULT_PPPOE_KEEPALIVE: u32 = 10;

/// Hotspot HTTP/HTTPS ports that inbound web traffic is redirected to.
pub const HOTSPOT_HTTP_PORT: u16 = 64872;
pub const HOTSPOT_HTTPS_PORT: u16 = 64875;

pub const RADIUS_AUTH_PORT: u16 = 1812;
pub const RADIUS_ACCT_PORT: u16 = 1813;

/// Modern key exchange only.
pub const SECURE_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::DH_G16_SHA512,
    kex::DH_G14_SHA256,
];

/// Adds group14-sha1, which every RouterOS 6.x release offers.
pub const BALANCED_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::DH_G14_SHA256,
    kex::DH_GEX_SHA256,
    kex::DH_G14_SHA1,
];

pub const LEGACY_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::DH_G14_SHA256,
    kex::DH_GEX_SHA256,
    kex::DH_G14_SHA1,
    kex::DH_GEX_SHA1,
    kex::DH_G1_SHA1,
];

pub const SECURE_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
];

pub const BALANCED_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_128_CBC,
];

pub const LEGACY_CIPHERS: &[cipher::Name] = &[
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
    cipher::AES_256_CBC,
    cipher::AES_192_CBC,
    cipher::AES_128_CBC,
];

pub const SECURE_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
];

pub const BALANCED_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1,
];

pub const LEGACY_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1,
    mac::HMAC_SHA1_ETM,
];

pub const DEFAULT_COMPRESSION_ALGORITHMS: &[compression::Name] = &[compression::NONE];

pub const SECURE_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
];

pub const BALANCED_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
];

/// RouterOS 6.x host keys are ssh-rsa (SHA-1) and occasionally DSA.
pub const LEGACY_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
    Algorithm::Dsa,
];

/// Runtime settings shared by the executor, rotation and orchestration services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Settings {
    /// SSH connect and per-command timeout in seconds; capped at 30.
    pub ssh_timeout_secs: u64,
    /// SSH algorithm policy.
    pub security_level: SecurityLevel,
    /// Known-hosts file for host key verification. `None` disables the check.
    pub known_hosts_file: Option<String>,
    /// Attempts made by the deployment retry primitive.
    pub max_retries: u32,
    /// Base backoff in seconds; attempt `n` waits `base * 2^(n-1)`.
    pub retry_base_delay_secs: u64,
    /// Scripts with more commands than this are deployed through `/import`.
    pub inline_command_limit: usize,
    /// Maximum bytes appended to a remote file per command.
    pub upload_chunk_bytes: usize,
    /// How long a deployment waits for the router lock, in seconds.
    pub lock_wait_secs: u64,
    /// Network allowed to reach management services.
    pub management_network: String,
    /// VPN overlay subnet the platform manages routers through.
    pub vpn_subnet: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ssh_timeout_secs: MAX_SSH_TIMEOUT.as_secs(),
            security_level: SecurityLevel::Balanced,
            known_hosts_file: None,
            max_retries: 3,
            retry_base_delay_secs: 2,
            inline_command_limit: 200,
            upload_chunk_bytes: 3000,
            lock_wait_secs: 30,
            management_network: "192.168.56.0/24".to_string(),
            vpn_subnet: "10.0.0.0/8".to_string(),
        }
    }
}

impl Settings {
    /// Parses settings from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ProvisionError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Builds settings from `ROSPROV_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, ProvisionError> {
        let mut settings = Self::default();
        if let Some(v) = env_parse("ROSPROV_SSH_TIMEOUT_SECS")? {
            settings.ssh_timeout_secs = v;
        }
        if let Some(v) = env_parse("ROSPROV_MAX_RETRIES")? {
            settings.max_retries = v;
        }
        if let Some(v) = env_parse("ROSPROV_RETRY_BASE_DELAY_SECS")? {
            settings.retry_base_delay_secs = v;
        }
        if let Some(v) = env_parse("ROSPROV_INLINE_COMMAND_LIMIT")? {
            settings.inline_command_limit = v;
        }
        if let Some(v) = env_parse("ROSPROV_UPLOAD_CHUNK_BYTES")? {
            settings.upload_chunk_bytes = v;
        }
        if let Some(v) = env_parse("ROSPROV_LOCK_WAIT_SECS")? {
            settings.lock_wait_secs = v;
        }
        if let Ok(level) = std::env::var("ROSPROV_SECURITY_LEVEL") {
            settings.security_level = match level.to_ascii_lowercase().as_str() {
                "secure" => SecurityLevel::Secure,
                "balanced" => SecurityLevel::Balanced,
                "legacy" | "legacy_compatible" => SecurityLevel::LegacyCompatible,
                other => {
                    return Err(ProvisionError::invalid_option(
                        "ROSPROV_SECURITY_LEVEL",
                        format!("unknown level '{other}'"),
                    ));
                }
            };
        }
        if let Ok(path) = std::env::var("ROSPROV_KNOWN_HOSTS") {
            settings.known_hosts_file = Some(path);
        }
        if let Ok(network) = std::env::var("ROSPROV_MANAGEMENT_NETWORK") {
            settings.management_network = network;
        }
        if let Ok(subnet) = std::env::var("ROSPROV_VPN_SUBNET") {
            settings.vpn_subnet = subnet;
        }
        Ok(settings)
    }

    /// Effective SSH timeout, never above [`MAX_SSH_TIMEOUT`].
    pub fn ssh_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_timeout_secs.max(1)).min(MAX_SSH_TIMEOUT)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.max(1),
            base_delay: Duration::from_secs(self.retry_base_delay_secs),
        }
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ProvisionError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ProvisionError::invalid_option(name, format!("cannot parse '{raw}'"))),
        Err(_) => Ok(None),
    }
}
