use super::*;

use crate::credential::CredentialVault;
use crate::error::CredentialError;
use crate::model::SnmpCredentials;
use crate::script::{Statement, Target};

const MIN_V3_PASSWORD: usize = 8;
const AUTH_PROTOCOLS: &[&str] = &["MD5", "SHA1"];
const PRIV_PROTOCOLS: &[&str] = &["DES", "AES"];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SnmpVersion {
    #[default]
    V2c,
    V3,
}

/// SNMP access for the monitoring pipeline.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SnmpOptions {
    pub version: SnmpVersion,
    /// v2c community, or the v3 user name.
    pub community: String,
    /// Source networks allowed to poll.
    pub allowed_network: String,
    pub contact: Option<String>,
    pub location: Option<String>,
    pub trap_target: Option<String>,
    pub auth_protocol: String,
    pub auth_password: Option<String>,
    pub priv_protocol: String,
    pub priv_password: Option<String>,
}

impl Default for SnmpOptions {
    fn default() -> Self {
        Self {
            version: SnmpVersion::V2c,
            community: "rosprov".to_string(),
            allowed_network: "10.0.0.0/8".to_string(),
            contact: None,
            location: None,
            trap_target: None,
            auth_protocol: "SHA1".to_string(),
            auth_password: None,
            priv_protocol: "AES".to_string(),
            priv_password: None,
        }
    }
}

impl fmt::Debug for SnmpOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnmpOptions")
            .field("version", &self.version)
            .field("community", &self.community)
            .field("allowed_network", &self.allowed_network)
            .field("trap_target", &self.trap_target)
            .finish_non_exhaustive()
    }
}

impl SnmpOptions {
    /// Credentials to keep on the router record; v3 passwords are encrypted.
    pub fn credentials(&self, vault: &CredentialVault) -> Result<SnmpCredentials, CredentialError> {
        Ok(match self.version {
            SnmpVersion::V2c => SnmpCredentials::V2c {
                community: self.community.clone(),
            },
            SnmpVersion::V3 => SnmpCredentials::V3 {
                user: self.community.clone(),
                auth_protocol: self.auth_protocol.clone(),
                auth_password: vault.encrypt(self.auth_password.as_deref().unwrap_or_default())?,
                priv_protocol: self.priv_protocol.clone(),
                priv_password: vault.encrypt(self.priv_password.as_deref().unwrap_or_default())?,
            },
        })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SnmpGenerator;

impl SnmpGenerator {
    pub fn generate(&self, router_id: &str, options: &SnmpOptions) -> Result<Script, ProvisionError> {
        let router_id = checked_router_id(router_id)?;
        let name = options.community.trim();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || "._-".contains(c)) {
            return Err(ProvisionError::invalid_option(
                "community",
                format!("'{name}' must be non-empty and alphanumeric"),
            ));
        }
        let allowed = options.allowed_network.trim();
        let (addr, prefix) = allowed.split_once('/').unwrap_or((allowed, "32"));
        if addr.parse::<Ipv4Addr>().is_err() || !prefix.parse::<u8>().is_ok_and(|p| p <= 32) {
            return Err(ProvisionError::invalid_option(
                "allowed_network",
                format!("'{allowed}' is not an IPv4 network"),
            ));
        }
        let trap_target = match options.trap_target.as_deref().map(str::trim) {
            Some(t) => Some(t.parse::<Ipv4Addr>().map_err(|_| {
                ProvisionError::invalid_option("trap_target", format!("'{t}' is not an IPv4 address"))
            })?),
            None => None,
        };

        let mut script = Script::new("SNMP monitoring", router_id);
        emit_log(&mut script, format!("rosprov: configuring snmp on {router_id}"));
        script.section("Communities");
        // the factory `public` community stays readable from anywhere otherwise
        script.attempt(Statement::Set {
            path: "/snmp community",
            target: Target::Find(Selector::eq("default", "yes")),
            props: Props::new().set("disabled", "yes"),
        });

        let community = Props::new().set("name", name).set("addresses", allowed);
        let community = match options.version {
            SnmpVersion::V2c => community
                .set("read-access", "yes")
                .set("write-access", "no")
                .set("security", "none"),
            SnmpVersion::V3 => {
                let auth_protocol = checked_choice(&options.auth_protocol, AUTH_PROTOCOLS, "auth_protocol")?;
                let priv_protocol = checked_choice(&options.priv_protocol, PRIV_PROTOCOLS, "priv_protocol")?;
                let auth = checked_v3_password(options.auth_password.as_deref(), "auth_password")?;
                let privacy = checked_v3_password(options.priv_password.as_deref(), "priv_password")?;
                community
                    .set("read-access", "yes")
                    .set("write-access", "no")
                    .set("security", "private")
                    .set("authentication-protocol", auth_protocol)
                    .quoted("authentication-password", auth)
                    .set("encryption-protocol", priv_protocol)
                    .quoted("encryption-password", privacy)
            }
        };
        script.replace("/snmp community", community);

        script.section("Agent");
        let trap_version = match options.version {
            SnmpVersion::V2c => "2",
            SnmpVersion::V3 => "3",
        };
        script.set(
            "/snmp",
            Target::Menu,
            Props::new()
                .set("enabled", "yes")
                .quoted("contact", options.contact.as_deref().unwrap_or_default())
                .quoted("location", options.location.as_deref().unwrap_or_default())
                .set("trap-community", name)
                .set("trap-version", trap_version)
                .set_opt("trap-target", trap_target.map(|t| t.to_string())),
        );
        emit_log(&mut script, format!("rosprov: snmp on {router_id} configured"));
        Ok(script)
    }
}

fn checked_choice<'a>(raw: &'a str, allowed: &[&str], name: &'static str) -> Result<&'a str, ProvisionError> {
    if allowed.contains(&raw) {
        Ok(raw)
    } else {
        Err(ProvisionError::invalid_option(
            name,
            format!("'{raw}' must be one of {}", allowed.join(", ")),
        ))
    }
}

fn checked_v3_password<'a>(raw: Option<&'a str>, name: &'static str) -> Result<&'a str, ProvisionError> {
    match raw {
        Some(pw) if pw.chars().count() >= MIN_V3_PASSWORD => Ok(pw),
        Some(_) => Err(ProvisionError::invalid_option(
            name,
            format!("must be at least {MIN_V3_PASSWORD} characters"),
        )),
        None => Err(ProvisionError::MissingOption(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v3() -> SnmpOptions {
        SnmpOptions {
            version: SnmpVersion::V3,
            community: "monitor".to_string(),
            auth_password: Some("auth-pass-1".to_string()),
            priv_password: Some("priv-pass-1".to_string()),
            ..SnmpOptions::default()
        }
    }

    #[test]
    fn v2c_is_read_only_from_allowed_network() {
        let commands = SnmpGenerator.generate("R1", &SnmpOptions::default()).expect("script").commands();
        assert!(commands.contains(
            &"/snmp community add name=rosprov addresses=10.0.0.0/8 read-access=yes write-access=no security=none"
                .to_string()
        ));
        assert!(commands.iter().any(|c| c.starts_with("/snmp set enabled=yes")));
    }

    #[test]
    fn v3_requires_long_passwords() {
        let mut options = v3();
        options.priv_password = Some("short".to_string());
        assert!(SnmpGenerator.generate("R1", &options).is_err());
        options.priv_password = None;
        assert!(matches!(
            SnmpGenerator.generate("R1", &options),
            Err(ProvisionError::MissingOption("priv_password"))
        ));
    }

    #[test]
    fn v3_sets_private_security() {
        let text = SnmpGenerator.generate("R1", &v3()).expect("script").render();
        assert!(text.contains("security=private authentication-protocol=SHA1"));
        assert!(text.contains("encryption-protocol=AES encryption-password=\"priv-pass-1\""));
        assert!(text.contains("trap-version=3"));
    }

    #[test]
    fn v3_credentials_are_encrypted() {
        let vault = CredentialVault::new([7u8; 32]);
        let creds = v3().credentials(&vault).expect("credentials");
        let SnmpCredentials::V3 { auth_password, .. } = creds else {
            panic!("expected v3");
        };
        assert!(!auth_password.as_str().contains("auth-pass-1"));
        assert!(!format!("{:?}", v3()).contains("auth-pass-1"));
    }
}
