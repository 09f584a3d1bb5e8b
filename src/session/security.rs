use super::*;

use russh::keys::Algorithm;
use russh::{cipher, kex, mac};

/// Which RouterOS generations a connection must be able to negotiate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    /// Modern algorithms only; RouterOS 7.x.
    Secure,
    /// Adds the group14-sha1 and ssh-rsa fallbacks RouterOS 6.x needs.
    Balanced,
    /// Old 6.x releases with DSA host keys and CBC ciphers.
    LegacyCompatible,
}

type AlgorithmTables = (
    &'static [kex::Name],
    &'static [Algorithm],
    &'static [cipher::Name],
    &'static [mac::Name],
);

impl SecurityLevel {
    fn tables(self) -> AlgorithmTables {
        match self {
            Self::Secure => (
                config::SECURE_KEX_ORDER,
                config::SECURE_KEY_TYPES,
                config::SECURE_CIPHERS,
                config::SECURE_MAC_ALGORITHMS,
            ),
            Self::Balanced => (
                config::BALANCED_KEX_ORDER,
                config::BALANCED_KEY_TYPES,
                config::BALANCED_CIPHERS,
                config::BALANCED_MAC_ALGORITHMS,
            ),
            Self::LegacyCompatible => (
                config::LEGACY_KEX_ORDER,
                config::LEGACY_KEY_TYPES,
                config::LEGACY_CIPHERS,
                config::LEGACY_MAC_ALGORITHMS,
            ),
        }
    }
}

/// Algorithm level plus host key policy for one router connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSecurityOptions {
    pub level: SecurityLevel,
    pub server_check: ServerCheckMethod,
}

impl Default for ConnectionSecurityOptions {
    fn default() -> Self {
        Self::balanced()
    }
}

impl ConnectionSecurityOptions {
    /// RouterOS 7.x only, host keys checked against `~/.ssh/known_hosts`.
    pub fn secure_default() -> Self {
        Self {
            level: SecurityLevel::Secure,
            server_check: ServerCheckMethod::DefaultKnownHostsFile,
        }
    }

    /// Works against both RouterOS 6.x and 7.x.
    pub fn balanced() -> Self {
        Self {
            level: SecurityLevel::Balanced,
            server_check: ServerCheckMethod::NoCheck,
        }
    }

    pub fn legacy_compatible() -> Self {
        Self {
            level: SecurityLevel::LegacyCompatible,
            server_check: ServerCheckMethod::NoCheck,
        }
    }

    /// Level and host key policy taken from [`Settings`].
    ///
    /// Routers are reached over the VPN overlay and re-keyed on rotation, so
    /// host keys are only pinned when a known-hosts file is configured.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            level: settings.security_level,
            server_check: match &settings.known_hosts_file {
                Some(path) => ServerCheckMethod::KnownHostsFile(path.clone()),
                None => ServerCheckMethod::NoCheck,
            },
        }
    }

    pub(super) fn preferred(&self) -> Preferred {
        let (kex, key, cipher, mac) = self.level.tables();
        Preferred {
            kex: Cow::Borrowed(kex),
            key: Cow::Borrowed(key),
            cipher: Cow::Borrowed(cipher),
            mac: Cow::Borrowed(mac),
            compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionSecurityOptions, SecurityLevel, Settings};
    use async_ssh2_tokio::ServerCheckMethod;
    use russh::keys::Algorithm;
    use russh::{cipher, kex, mac};

    #[test]
    fn default_profile_reaches_routeros6() {
        let options = ConnectionSecurityOptions::default();
        assert_eq!(options.level, SecurityLevel::Balanced);
        let preferred = options.preferred();
        assert!(preferred.kex.contains(&kex::DH_G14_SHA1));
        assert!(preferred.key.contains(&Algorithm::Rsa { hash: None }));
    }

    #[test]
    fn known_hosts_file_enables_host_check() {
        let settings = Settings {
            known_hosts_file: Some("/etc/rosprov/known_hosts".to_string()),
            security_level: SecurityLevel::Secure,
            ..Settings::default()
        };
        let options = ConnectionSecurityOptions::from_settings(&settings);
        assert_eq!(options.level, SecurityLevel::Secure);
        assert!(matches!(
            options.server_check,
            ServerCheckMethod::KnownHostsFile(ref path) if path == "/etc/rosprov/known_hosts"
        ));
    }

    #[test]
    fn secure_profile_excludes_weak_algorithms() {
        let preferred = ConnectionSecurityOptions::secure_default().preferred();

        assert!(preferred.kex.iter().all(|alg| *alg != kex::DH_G1_SHA1));
        assert!(preferred.kex.iter().all(|alg| *alg != kex::DH_G14_SHA1));
        assert!(preferred.cipher.iter().all(|alg| *alg != cipher::AES_128_CBC));
        assert!(preferred.mac.iter().all(|alg| *alg != mac::HMAC_SHA1));
    }

    #[test]
    fn no_profile_offers_null_algorithms() {
        for options in [
            ConnectionSecurityOptions::secure_default(),
            ConnectionSecurityOptions::balanced(),
            ConnectionSecurityOptions::legacy_compatible(),
        ] {
            let preferred = options.preferred();
            assert!(preferred.kex.iter().all(|alg| *alg != kex::NONE));
            assert!(preferred.cipher.iter().all(|alg| *alg != cipher::NONE));
            assert!(preferred.mac.iter().all(|alg| *alg != mac::NONE));
        }
    }
}
