use super::*;

use crate::config::{DEFAULT_PPPOE_KEEPALIVE, DEFAULT_PPPOE_MTU};
use crate::script::Target;

const DEFAULT_PPPOE_POOL: &str = "192.168.89.10-192.168.89.254";
const DEFAULT_AUTH: &str = "pap,chap,mschap1,mschap2";
const KNOWN_AUTH: &[&str] = &["pap", "chap", "mschap1", "mschap2"];

/// PPPoE access server on a bridge of the selected interfaces; subscribers
/// authenticate against RADIUS.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PppoeGenerator;

/// PPPoE server tuning shared with the hybrid topology.
pub(super) struct PppoeTuning {
    pub auth: String,
    pub mtu: u16,
    pub mru: u16,
    pub keepalive: u32,
    pub max_sessions: u32,
}

impl PppoeTuning {
    pub(super) fn from_options(options: &ServiceOptions) -> Result<Self, ProvisionError> {
        let auth = match options.auth_methods.as_deref() {
            Some(raw) => {
                let methods: Vec<&str> = raw.split(',').map(str::trim).filter(|m| !m.is_empty()).collect();
                if methods.is_empty() || methods.iter().any(|m| !KNOWN_AUTH.contains(m)) {
                    return Err(ProvisionError::invalid_option(
                        "auth_methods",
                        format!("'{raw}' must list pap, chap, mschap1 or mschap2"),
                    ));
                }
                methods.join(",")
            }
            None => DEFAULT_AUTH.to_string(),
        };
        let mtu = options.mtu.unwrap_or(DEFAULT_PPPOE_MTU);
        let mru = options.mru.unwrap_or(mtu);
        for (name, value) in [("mtu", mtu), ("mru", mru)] {
            if !(576..=1500).contains(&value) {
                return Err(ProvisionError::invalid_option(name, format!("{value} is outside 576-1500")));
            }
        }
        Ok(Self {
            auth,
            mtu,
            mru,
            keepalive: options.keepalive_timeout.unwrap_or(DEFAULT_PPPOE_KEEPALIVE),
            max_sessions: options.max_sessions.unwrap_or(0),
        })
    }
}

/// Everything the PPPoE section needs once the access interface exists.
pub(super) struct PppoeAccess<'a> {
    pub names: &'a Names,
    pub access_interface: &'a str,
    pub pool: IpPool,
    pub gateway: Ipv4Addr,
    pub dns: &'a str,
    pub radius: &'a RadiusEndpoint,
    pub rate_limit: Option<&'a str>,
    pub service_name: String,
    pub tuning: PppoeTuning,
}

impl ConfigGenerator for PppoeGenerator {
    fn generate_config(
        &self,
        tenant: &TenantContext,
        interfaces: &[String],
        router_id: &str,
        options: &ServiceOptions,
    ) -> Result<Script, ProvisionError> {
        let router_id = checked_router_id(router_id)?;
        let interfaces = checked_interfaces(interfaces)?;
        let radius = checked_radius(options)?;
        let pool = checked_pool(options.ip_pool.as_deref(), DEFAULT_PPPOE_POOL)?;
        let gateway = pool.gateway_for(options.gateway.as_deref())?;
        let dns = checked_dns(options)?;
        let vlan = optional_vlan(options)?;
        let rate_limit = checked_rate_limit(options)?;
        let wan = checked_wan(options)?;
        let tuning = PppoeTuning::from_options(options)?;

        let names = Names::new("pppoe", router_id, options.service_index);
        let service_name = service_name(tenant, &names, options)?;
        let bridge = names.of("br");
        let mut script = Script::new("PPPoE configuration", router_id);
        emit_log(&mut script, format!("rosprov: applying pppoe for {router_id}"));

        emit_bridge(&mut script, &bridge, &interfaces, "PPPoE bridge");
        let access = match vlan {
            Some(id) => {
                let name = names.of("vlan");
                emit_vlan(&mut script, &name, id, &bridge, "PPPoE VLAN");
                name
            }
            None => bridge,
        };

        emit_pppoe_access(
            &mut script,
            &PppoeAccess {
                names: &names,
                access_interface: &access,
                pool,
                gateway,
                dns: &dns,
                radius,
                rate_limit,
                service_name,
                tuning,
            },
        );

        script.section("NAT");
        sweep_tagged(&mut script, "/ip firewall nat", &names.tag_prefix());
        script.add(
            "/ip firewall nat",
            Props::new()
                .set("chain", "srcnat")
                .set("src-address", pool.network_cidr())
                .set("out-interface", &wan)
                .set("action", "masquerade")
                .quoted("comment", names.tag("masquerade")),
        );

        emit_log(&mut script, format!("rosprov: pppoe for {router_id} applied"));
        Ok(script)
    }
}

/// Pool, PPP profile, RADIUS and the PPPoE server on `access.access_interface`.
pub(super) fn emit_pppoe_access(script: &mut Script, access: &PppoeAccess<'_>) {
    let names = access.names;
    let pool_name = names.of("pool");
    let profile = names.of("profile");

    script.section("Addressing");
    emit_gateway_address(script, access.gateway, access.access_interface, &names.tag("gateway"));
    emit_pool(script, &pool_name, &access.pool);

    script.section("PPP profile");
    script.replace(
        "/ppp profile",
        Props::new()
            .set("name", &profile)
            .set("local-address", access.gateway.to_string())
            .set("remote-address", &pool_name)
            .set("dns-server", access.dns)
            .set("change-tcp-mss", "yes")
            .set("only-one", "yes")
            .set_opt("rate-limit", access.rate_limit),
    );
    script.set(
        "/ppp aaa",
        Target::Menu,
        Props::new()
            .set("use-radius", "yes")
            .set("accounting", "yes")
            .set("interim-update", "5m"),
    );
    // AAA comes from RADIUS only
    script.sweep("/ppp secret", Selector::eq("profile", &profile));

    script.section("RADIUS");
    emit_radius(script, "ppp", access.radius, &names.tag("radius"));

    script.section("PPPoE server");
    script.replace(
        "/interface pppoe-server server",
        Props::new()
            .set("service-name", &access.service_name)
            .set("interface", access.access_interface)
            .set("default-profile", &profile)
            .set("authentication", &access.tuning.auth)
            .set("max-mtu", access.tuning.mtu.to_string())
            .set("max-mru", access.tuning.mru.to_string())
            .set("keepalive-timeout", access.tuning.keepalive.to_string())
            .set("one-session-per-host", "yes")
            .set("max-sessions", access.tuning.max_sessions.to_string())
            .set("disabled", "no"),
    );
}

/// Explicit option, else `pppoe-<tenant>`, else the router scoped name.
pub(super) fn service_name(
    tenant: &TenantContext,
    names: &Names,
    options: &ServiceOptions,
) -> Result<String, ProvisionError> {
    let name = match (&options.service_name, &tenant.tenant_id) {
        (Some(explicit), _) => explicit.trim().to_string(),
        (None, Some(tenant_id)) if options.service_index.is_none() => format!("pppoe-{tenant_id}"),
        _ => names.of("svc"),
    };
    validate_interface(&name)
        .map(str::to_string)
        .map_err(|_| ProvisionError::invalid_option("service_name", format!("'{name}' is not a valid name")))
}
