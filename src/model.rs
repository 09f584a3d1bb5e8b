//! Records exchanged with the persistence layer.
//!
//! These types mirror the rows the platform stores for each router. The
//! crate never talks to a database itself; see [`crate::store::RouterStore`].

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_SSH_PORT, ROUTEROS_API_PORTS};
use crate::credential::EncryptedSecret;
use crate::error::ProvisionError;
use crate::pool::IpPool;

/// Provisioning progress of a router. Stages only move forward.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStage {
    #[default]
    Pending,
    ConnectivityVerified,
    Configured,
    Hardened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Hotspot,
    Pppoe,
    Hybrid,
    None,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hotspot => "hotspot",
            Self::Pppoe => "pppoe",
            Self::Hybrid => "hybrid",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    #[default]
    Pending,
    Deploying,
    Deployed,
    Failed,
}

/// Kind of script persisted for a router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConfigType {
    Service,
    Hardening,
    Snmp,
}

impl ConfigType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Hardening => "hardening",
            Self::Snmp => "snmp",
        }
    }
}

/// SNMP access written to the device and kept on the router record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "version", rename_all = "snake_case")]
pub enum SnmpCredentials {
    V2c {
        community: String,
    },
    V3 {
        user: String,
        auth_protocol: String,
        auth_password: EncryptedSecret,
        priv_protocol: String,
        priv_password: EncryptedSecret,
    },
}

/// A managed RouterOS device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Router {
    pub id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub name: String,
    pub management_ip: String,
    /// Address on the VPN overlay; preferred for SSH when present.
    #[serde(default)]
    pub vpn_ip: Option<String>,
    #[serde(default)]
    pub ssh_port: Option<u16>,
    pub username: String,
    #[serde(default)]
    pub password: Option<EncryptedSecret>,
    #[serde(default)]
    pub ssh_key: Option<EncryptedSecret>,
    #[serde(default)]
    pub ssh_key_created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ssh_key_rotated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub stage: ProvisioningStage,
    #[serde(default)]
    pub snmp: Option<SnmpCredentials>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Router {
    pub fn new(
        id: impl Into<String>,
        management_ip: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            tenant_id: None,
            management_ip: management_ip.into(),
            vpn_ip: None,
            ssh_port: None,
            username: username.into(),
            password: None,
            ssh_key: None,
            ssh_key_created_at: None,
            ssh_key_rotated_at: None,
            interfaces: Vec::new(),
            stage: ProvisioningStage::Pending,
            snmp: None,
            deleted_at: None,
        }
    }

    /// Host used for SSH: the VPN address if set, else the management IP,
    /// without any CIDR suffix.
    pub fn ssh_host(&self) -> &str {
        let raw = self
            .vpn_ip
            .as_deref()
            .filter(|ip| !ip.trim().is_empty())
            .unwrap_or(&self.management_ip);
        raw.split('/').next().unwrap_or(raw).trim()
    }

    /// SSH port; RouterOS API ports and unset values map to 22.
    pub fn ssh_port(&self) -> u16 {
        match self.ssh_port {
            Some(port) if port != 0 && !ROUTEROS_API_PORTS.contains(&port) => port,
            _ => DEFAULT_SSH_PORT,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Timestamp the current key's age is measured from.
    pub fn key_reference_time(&self) -> Option<DateTime<Utc>> {
        self.ssh_key_rotated_at.or(self.ssh_key_created_at)
    }

    /// Moves the stage forward; earlier stages are ignored.
    pub fn advance_stage(&mut self, stage: ProvisioningStage) -> bool {
        if stage > self.stage {
            self.stage = stage;
            true
        } else {
            false
        }
    }
}

/// A service deployed on a set of router interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RouterService {
    pub id: String,
    pub router_id: String,
    pub service_type: ServiceType,
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub ip_pool_id: Option<String>,
    #[serde(default)]
    pub vlan_id: Option<u16>,
    #[serde(default)]
    pub vlan_required: bool,
    #[serde(default)]
    pub radius_profile: Option<String>,
    #[serde(default)]
    pub status: DeploymentStatus,
}

/// Address block carved out for one tenant and one service type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TenantIpPool {
    pub id: String,
    pub tenant_id: String,
    pub service_type: ServiceType,
    pub network_cidr: String,
    pub gateway_ip: String,
    pub range_start: String,
    pub range_end: String,
    #[serde(default)]
    pub dns_primary: Option<String>,
    #[serde(default)]
    pub dns_secondary: Option<String>,
    pub total_ips: u32,
    #[serde(default)]
    pub allocated_ips: u32,
}

impl TenantIpPool {
    pub fn available_ips(&self) -> u32 {
        self.total_ips.saturating_sub(self.allocated_ips)
    }

    /// The pool range in `start-end` form, validated.
    pub fn range(&self) -> Result<IpPool, ProvisionError> {
        format!("{}-{}", self.range_start, self.range_end).parse()
    }

    /// Pools are never shared across service types.
    pub fn ensure_serves(&self, service: ServiceType) -> Result<(), ProvisionError> {
        if self.service_type == service {
            Ok(())
        } else {
            Err(ProvisionError::invalid_option(
                "ip_pool",
                format!(
                    "pool {} belongs to {} and cannot serve {}",
                    self.id,
                    self.service_type.as_str(),
                    service.as_str()
                ),
            ))
        }
    }

    pub fn dns_servers(&self) -> Vec<String> {
        self.dns_primary
            .iter()
            .chain(self.dns_secondary.iter())
            .cloned()
            .collect()
    }
}

/// VLAN assignment recorded for a deployed service that needs traffic separation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ServiceVlan {
    pub router_service_id: String,
    pub vlan_id: u16,
    pub parent_interface: String,
    pub service_type: ServiceType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssh_target_prefers_vpn_and_maps_api_ports() {
        let mut router = Router::new("R1", "192.168.1.10", "admin");
        router.ssh_port = Some(8728);
        assert_eq!(router.ssh_host(), "192.168.1.10");
        assert_eq!(router.ssh_port(), 22);

        router.vpn_ip = Some("10.8.0.5/32".to_string());
        router.ssh_port = Some(2222);
        assert_eq!(router.ssh_host(), "10.8.0.5");
        assert_eq!(router.ssh_port(), 2222);
    }

    #[test]
    fn stage_never_moves_backwards() {
        let mut router = Router::new("R1", "192.168.1.10", "admin");
        assert!(router.advance_stage(ProvisioningStage::Configured));
        assert!(!router.advance_stage(ProvisioningStage::ConnectivityVerified));
        assert_eq!(router.stage, ProvisioningStage::Configured);
    }

    #[test]
    fn pool_rejects_other_service_types() {
        let pool = TenantIpPool {
            id: "p1".to_string(),
            tenant_id: "t1".to_string(),
            service_type: ServiceType::Hotspot,
            network_cidr: "192.168.88.0/24".to_string(),
            gateway_ip: "192.168.88.1".to_string(),
            range_start: "192.168.88.10".to_string(),
            range_end: "192.168.88.254".to_string(),
            dns_primary: Some("8.8.8.8".to_string()),
            dns_secondary: None,
            total_ips: 245,
            allocated_ips: 45,
        };
        assert_eq!(pool.available_ips(), 200);
        assert!(pool.ensure_serves(ServiceType::Hotspot).is_ok());
        assert!(pool.ensure_serves(ServiceType::Pppoe).is_err());
        assert_eq!(pool.range().expect("range").to_string(), "192.168.88.10-192.168.88.254");
    }
}
