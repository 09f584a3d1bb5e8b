//! RouterOS configuration generators.
//!
//! Each topology implements [`ConfigGenerator`]: given interfaces, a router id
//! and a [`ServiceOptions`] bag it returns a [`Script`] or a validation error.
//! Generators are pure; they never touch a device and never return a partial
//! script.
//!
//! # Main Components
//!
//! - [`HotspotGenerator`] - captive portal on a shared bridge
//! - [`PppoeGenerator`] - PPPoE server on a shared bridge, optional VLAN
//! - [`HybridGenerator`] - hotspot and PPPoE on two VLANs of one parent interface
//! - [`HardeningGenerator`] - management lockdown, firewall, logging, DNS
//! - [`SnmpGenerator`] - SNMP v2c/v3 access for the monitoring pipeline
//! - [`Topology`] - tagged union dispatching to the service generators

use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;

use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{RADIUS_ACCT_PORT, RADIUS_AUTH_PORT};
use crate::error::ProvisionError;
use crate::model::{ServiceType, ServiceVlan};
use crate::pool::IpPool;
use crate::script::{LogLevel, Props, Script, Selector, object_name, validate_interface, validate_router_id};

pub use hardening::{HardeningGenerator, HardeningOptions, SecurityRating, SecurityScore, security_score};
pub use hotspot::HotspotGenerator;
pub use hybrid::HybridGenerator;
pub use pppoe::PppoeGenerator;
pub use snmp::{SnmpGenerator, SnmpOptions, SnmpVersion};

mod hardening;
mod hotspot;
mod hybrid;
mod pppoe;
mod snmp;

const DEFAULT_DNS: &[&str] = &["8.8.8.8", "1.1.1.1"];
const DEFAULT_WAN: &str = "ether1";

/// Tenant scope a generator call runs in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TenantContext {
    pub tenant_id: Option<String>,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
        }
    }

    /// The tenant id, or an error for operations that must be tenant scoped.
    pub fn require(&self) -> Result<&str, ProvisionError> {
        self.tenant_id.as_deref().ok_or(ProvisionError::TenantRequired)
    }
}

/// RADIUS server every service delegates AAA to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RadiusEndpoint {
    pub address: String,
    pub secret: String,
    #[serde(default)]
    pub auth_port: Option<u16>,
    #[serde(default)]
    pub accounting_port: Option<u16>,
}

impl fmt::Debug for RadiusEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RadiusEndpoint")
            .field("address", &self.address)
            .field("secret", &"..")
            .finish()
    }
}

/// VLAN ids and pools for the hybrid topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HybridOptions {
    pub hotspot_vlan: u16,
    pub pppoe_vlan: u16,
    pub hotspot_pool: String,
    pub pppoe_pool: String,
    #[serde(default)]
    pub hotspot_gateway: Option<String>,
    #[serde(default)]
    pub pppoe_gateway: Option<String>,
}

/// Named options accepted by the service generators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ServiceOptions {
    /// `start-end` range inside one /24.
    pub ip_pool: Option<String>,
    pub gateway: Option<String>,
    pub dns_servers: Vec<String>,
    pub radius: Option<RadiusEndpoint>,
    /// RouterOS rate limit, e.g. `10M/10M`.
    pub rate_limit: Option<String>,
    /// Captive portal the hotspot login page redirects to.
    pub portal_url: Option<String>,
    /// Upstream interface for NAT, `ether1` when unset.
    pub wan_interface: Option<String>,
    pub vlan_required: bool,
    pub vlan_id: Option<u16>,
    pub lease_time: Option<String>,
    pub mtu: Option<u16>,
    pub mru: Option<u16>,
    pub keepalive_timeout: Option<u32>,
    /// PPPoE authentication protocols, comma separated.
    pub auth_methods: Option<String>,
    pub service_name: Option<String>,
    pub max_sessions: Option<u32>,
    pub hybrid: Option<HybridOptions>,
    /// Disambiguates object names when a router runs several services of one type.
    pub service_index: Option<usize>,
}

impl ServiceOptions {
    /// Options with only the RADIUS endpoint set.
    pub fn with_radius(address: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            radius: Some(RadiusEndpoint {
                address: address.into(),
                secret: secret.into(),
                auth_port: None,
                accounting_port: None,
            }),
            ..Self::default()
        }
    }
}

/// Capability shared by every service topology.
pub trait ConfigGenerator {
    fn generate_config(
        &self,
        tenant: &TenantContext,
        interfaces: &[String],
        router_id: &str,
        options: &ServiceOptions,
    ) -> Result<Script, ProvisionError>;
}

/// The service topologies a router can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Hotspot(HotspotGenerator),
    Pppoe(PppoeGenerator),
    Hybrid(HybridGenerator),
}

impl Topology {
    /// Generator for `service`; `None` for [`ServiceType::None`].
    pub fn for_service(service: ServiceType) -> Option<Self> {
        match service {
            ServiceType::Hotspot => Some(Self::Hotspot(HotspotGenerator)),
            ServiceType::Pppoe => Some(Self::Pppoe(PppoeGenerator)),
            ServiceType::Hybrid => Some(Self::Hybrid(HybridGenerator)),
            ServiceType::None => None,
        }
    }

    pub fn service_type(&self) -> ServiceType {
        match self {
            Self::Hotspot(_) => ServiceType::Hotspot,
            Self::Pppoe(_) => ServiceType::Pppoe,
            Self::Hybrid(_) => ServiceType::Hybrid,
        }
    }
}

impl ConfigGenerator for Topology {
    fn generate_config(
        &self,
        tenant: &TenantContext,
        interfaces: &[String],
        router_id: &str,
        options: &ServiceOptions,
    ) -> Result<Script, ProvisionError> {
        let started = std::time::Instant::now();
        let result = match self {
            Self::Hotspot(g) => g.generate_config(tenant, interfaces, router_id, options),
            Self::Pppoe(g) => g.generate_config(tenant, interfaces, router_id, options),
            Self::Hybrid(g) => g.generate_config(tenant, interfaces, router_id, options),
        };
        debug!(
            router_id = router_id,
            operation = self.service_type().as_str(),
            duration_ms = started.elapsed().as_millis() as u64,
            success = result.is_ok();
            "generated service configuration"
        );
        result
    }
}

/// One service requested for a router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ServicePlan {
    pub service_type: ServiceType,
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub options: ServiceOptions,
    /// Row id of the matching `RouterService`, if any.
    #[serde(default)]
    pub service_id: Option<String>,
}

/// Rejects plans whose interfaces overlap.
///
/// Hotspot and PPPoE sharing a port must be expressed as one hybrid plan so
/// the two are VLAN separated.
pub fn check_service_layout(plans: &[ServicePlan]) -> Result<(), ProvisionError> {
    let mut owners: HashMap<&str, ServiceType> = HashMap::new();
    for plan in plans {
        // compare the names the generators will emit, once per plan
        let mut seen: Vec<&str> = Vec::with_capacity(plan.interfaces.len());
        for raw in &plan.interfaces {
            let iface = validate_interface(raw.trim())?;
            if seen.contains(&iface) {
                continue;
            }
            seen.push(iface);
            if let Some(previous) = owners.insert(iface, plan.service_type) {
                let mixed = matches!(
                    (previous, plan.service_type),
                    (ServiceType::Hotspot, ServiceType::Pppoe)
                        | (ServiceType::Pppoe, ServiceType::Hotspot)
                );
                return Err(ProvisionError::ServiceLayout(if mixed {
                    format!(
                        "hotspot and pppoe both use {iface}; shared interfaces require a hybrid service with VLAN separation"
                    )
                } else {
                    format!(
                        "{iface} is assigned to more than one {} service",
                        plan.service_type.as_str()
                    )
                }));
            }
        }
    }
    Ok(())
}

/// VLAN rows a generated plan implies for its `RouterService`.
///
/// Hybrid plans yield one row per side on the parent interface. Hotspot and
/// PPPoE yield a row only when `vlan_required` put the sub-interface on
/// their bridge.
pub fn service_vlans(
    service_id: &str,
    service_type: ServiceType,
    interfaces: &[String],
    router_id: &str,
    options: &ServiceOptions,
) -> Vec<ServiceVlan> {
    let row = |vlan_id: u16, parent_interface: String, service_type: ServiceType| ServiceVlan {
        router_service_id: service_id.to_string(),
        vlan_id,
        parent_interface,
        service_type,
    };
    match service_type {
        ServiceType::Hybrid => {
            let (Some(hybrid), Some(parent)) = (options.hybrid.as_ref(), interfaces.first()) else {
                return Vec::new();
            };
            let parent = parent.trim().to_string();
            vec![
                row(hybrid.hotspot_vlan, parent.clone(), ServiceType::Hotspot),
                row(hybrid.pppoe_vlan, parent, ServiceType::Pppoe),
            ]
        }
        ServiceType::Hotspot | ServiceType::Pppoe => match (options.vlan_required, options.vlan_id) {
            (true, Some(vlan_id)) => {
                let bridge = Names::new(service_type.as_str(), router_id, options.service_index).of("br");
                vec![row(vlan_id, bridge, service_type)]
            }
            _ => Vec::new(),
        },
        ServiceType::None => Vec::new(),
    }
}

/// Deterministic object names for one service instance.
#[derive(Debug, Clone)]
pub(crate) struct Names {
    kind: &'static str,
    router_id: String,
    index: Option<usize>,
}

impl Names {
    pub(crate) fn new(kind: &'static str, router_id: &str, index: Option<usize>) -> Self {
        Self {
            kind,
            router_id: router_id.to_string(),
            index,
        }
    }

    /// `<role>-<kind>-<router_id>[-<index>]`
    pub(crate) fn of(&self, role: &str) -> String {
        object_name(&format!("{role}-{}", self.kind), &self.router_id, self.index)
    }

    /// Comment tag marking rules owned by this service instance.
    pub(crate) fn tag(&self, what: &str) -> String {
        format!("{}:{what}", self.tag_prefix())
    }

    pub(crate) fn tag_prefix(&self) -> String {
        format!("rosprov:{}", object_name(self.kind, &self.router_id, self.index))
    }
}

pub(crate) fn checked_interfaces(interfaces: &[String]) -> Result<Vec<String>, ProvisionError> {
    if interfaces.is_empty() {
        return Err(ProvisionError::NoInterfaces);
    }
    let mut out: Vec<String> = Vec::with_capacity(interfaces.len());
    for iface in interfaces {
        let name = validate_interface(iface.trim())?;
        if !out.iter().any(|i| i == name) {
            out.push(name.to_string());
        }
    }
    Ok(out)
}

pub(crate) fn checked_router_id(router_id: &str) -> Result<&str, ProvisionError> {
    validate_router_id(router_id)
}

pub(crate) fn checked_pool(raw: Option<&str>, default: &str) -> Result<IpPool, ProvisionError> {
    raw.unwrap_or(default).parse()
}

pub(crate) fn checked_radius(options: &ServiceOptions) -> Result<&RadiusEndpoint, ProvisionError> {
    let radius = options.radius.as_ref().ok_or(ProvisionError::MissingOption("radius"))?;
    radius.address.trim().parse::<Ipv4Addr>().map_err(|_| {
        ProvisionError::invalid_option("radius", format!("'{}' is not an IPv4 address", radius.address))
    })?;
    if radius.secret.is_empty() {
        return Err(ProvisionError::invalid_option("radius", "secret must not be empty"));
    }
    Ok(radius)
}

pub(crate) fn checked_dns(options: &ServiceOptions) -> Result<String, ProvisionError> {
    let servers: Vec<&str> = if options.dns_servers.is_empty() {
        DEFAULT_DNS.to_vec()
    } else {
        options.dns_servers.iter().map(|s| s.trim()).collect()
    };
    for server in &servers {
        server.parse::<Ipv4Addr>().map_err(|_| {
            ProvisionError::invalid_option("dns_servers", format!("'{server}' is not an IPv4 address"))
        })?;
    }
    Ok(servers.join(","))
}

pub(crate) fn checked_wan(options: &ServiceOptions) -> Result<String, ProvisionError> {
    let wan = options.wan_interface.as_deref().unwrap_or(DEFAULT_WAN);
    Ok(validate_interface(wan)?.to_string())
}

pub(crate) fn checked_vlan(id: u16, name: &'static str) -> Result<u16, ProvisionError> {
    if (1..=4094).contains(&id) {
        Ok(id)
    } else {
        Err(ProvisionError::invalid_option(name, format!("{id} is outside 1-4094")))
    }
}

/// VLAN id when the options demand separation, `None` otherwise.
pub(crate) fn optional_vlan(options: &ServiceOptions) -> Result<Option<u16>, ProvisionError> {
    if !options.vlan_required {
        return Ok(None);
    }
    let id = options.vlan_id.ok_or(ProvisionError::MissingOption("vlan_id"))?;
    checked_vlan(id, "vlan_id").map(Some)
}

pub(crate) fn checked_rate_limit(options: &ServiceOptions) -> Result<Option<&str>, ProvisionError> {
    match options.rate_limit.as_deref() {
        Some(rate) if rate.is_empty() || rate.contains(char::is_whitespace) => Err(
            ProvisionError::invalid_option("rate_limit", format!("'{rate}' is not a rate limit")),
        ),
        other => Ok(other),
    }
}

/// Creates `bridge` and moves every interface into it.
pub(crate) fn emit_bridge(script: &mut Script, bridge: &str, interfaces: &[String], comment: &str) {
    script.section("Bridge");
    script.replace(
        "/interface bridge",
        Props::new().set("name", bridge).quoted("comment", comment),
    );
    for iface in interfaces {
        // an interface can belong to one bridge only
        script.replace_by(
            "/interface bridge port",
            "interface",
            Props::new().set("interface", iface).set("bridge", bridge),
        );
    }
}

pub(crate) fn emit_vlan(script: &mut Script, name: &str, vlan_id: u16, parent: &str, comment: &str) {
    script.replace(
        "/interface vlan",
        Props::new()
            .set("name", name)
            .set("vlan-id", vlan_id.to_string())
            .set("interface", parent)
            .quoted("comment", comment),
    );
}

pub(crate) fn emit_gateway_address(script: &mut Script, gateway: Ipv4Addr, interface: &str, comment: &str) {
    script.replace_by(
        "/ip address",
        "interface",
        Props::new()
            .set("address", format!("{gateway}/24"))
            .set("interface", interface)
            .quoted("comment", comment),
    );
}

pub(crate) fn emit_pool(script: &mut Script, name: &str, pool: &IpPool) {
    script.replace(
        "/ip pool",
        Props::new().set("name", name).set("ranges", pool.to_string()),
    );
}

/// RADIUS client entry for one RouterOS service (`hotspot`, `ppp`).
pub(crate) fn emit_radius(script: &mut Script, service: &str, radius: &RadiusEndpoint, tag: &str) {
    script.replace_by(
        "/radius",
        "comment",
        Props::new()
            .set("service", service)
            .set("address", radius.address.trim())
            .quoted("secret", &radius.secret)
            .set("authentication-port", radius.auth_port.unwrap_or(RADIUS_AUTH_PORT).to_string())
            .set("accounting-port", radius.accounting_port.unwrap_or(RADIUS_ACCT_PORT).to_string())
            .set("timeout", "3s")
            .quoted("comment", tag),
    );
}

pub(crate) fn emit_log(script: &mut Script, message: String) {
    script.log(LogLevel::Info, message);
}

/// Removes every item under `path` whose comment carries `prefix`.
///
/// Tags only contain router id characters, so the prefix needs no escaping.
pub(crate) fn sweep_tagged(script: &mut Script, path: &'static str, prefix: &str) {
    script.sweep(path, Selector::matches("comment", format!("^{prefix}:")));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(service_type: ServiceType, interfaces: &[&str]) -> ServicePlan {
        ServicePlan {
            service_type,
            interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
            options: ServiceOptions::default(),
            service_id: None,
        }
    }

    #[test]
    fn disjoint_services_are_accepted() {
        let plans = [
            plan(ServiceType::Hotspot, &["ether2", "ether3"]),
            plan(ServiceType::Pppoe, &["ether4"]),
        ];
        assert!(check_service_layout(&plans).is_ok());
    }

    #[test]
    fn shared_interface_between_hotspot_and_pppoe_needs_hybrid() {
        let plans = [
            plan(ServiceType::Hotspot, &["ether2"]),
            plan(ServiceType::Pppoe, &["ether2"]),
        ];
        let err = check_service_layout(&plans).expect_err("must be rejected");
        assert!(matches!(err, ProvisionError::ServiceLayout(ref msg) if msg.contains("hybrid")));
    }

    #[test]
    fn padded_names_still_collide() {
        let plans = [
            plan(ServiceType::Hotspot, &["ether2"]),
            plan(ServiceType::Pppoe, &[" ether2 "]),
        ];
        let err = check_service_layout(&plans).expect_err("same port after trimming");
        assert!(matches!(err, ProvisionError::ServiceLayout(ref msg) if msg.contains("ether2")));
    }

    #[test]
    fn repeated_port_within_one_plan_is_not_a_conflict() {
        let plans = [plan(ServiceType::Pppoe, &["ether2", "ether2 "])];
        assert!(check_service_layout(&plans).is_ok());
    }

    #[test]
    fn names_follow_role_kind_router_index() {
        let names = Names::new("pppoe", "R1", None);
        assert_eq!(names.of("br"), "br-pppoe-R1");
        assert_eq!(names.of("pool"), "pool-pppoe-R1");
        assert_eq!(names.tag("nat"), "rosprov:pppoe-R1:nat");
        assert_eq!(Names::new("hotspot", "R1", Some(2)).of("br"), "br-hotspot-R1-2");
    }

    #[test]
    fn tenant_context_is_required_when_asked() {
        assert!(matches!(
            TenantContext::default().require(),
            Err(ProvisionError::TenantRequired)
        ));
        assert_eq!(TenantContext::new("t1").require().expect("tenant"), "t1");
    }

    #[test]
    fn options_parse_from_json_bag() {
        let options: ServiceOptions = serde_json::from_str(
            r#"{"ip_pool":"192.168.89.10-192.168.89.254","radius":{"address":"10.8.0.1","secret":"s"},"mtu":1492}"#,
        )
        .expect("parse");
        assert_eq!(options.mtu, Some(1492));
        assert!(!options.vlan_required);
        assert!(!format!("{options:?}").contains("\"s\""));
    }
}
