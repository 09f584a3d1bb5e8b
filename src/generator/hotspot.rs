use super::*;

use crate::config::{HOTSPOT_HTTPS_PORT, HOTSPOT_HTTP_PORT};
use crate::script::{Statement, Target};

const DEFAULT_HOTSPOT_POOL: &str = "192.168.88.10-192.168.88.254";

/// Captive portal: every selected interface joins one bridge that carries a
/// single hotspot server authenticating against RADIUS.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HotspotGenerator;

/// Everything the hotspot section needs once the access interface exists.
pub(super) struct HotspotAccess<'a> {
    pub names: &'a Names,
    pub access_interface: &'a str,
    pub pool: IpPool,
    pub gateway: Ipv4Addr,
    pub dns: &'a str,
    pub radius: &'a RadiusEndpoint,
    pub rate_limit: Option<&'a str>,
    pub portal_host: Option<String>,
    pub portal_url: Option<&'a str>,
    pub lease_time: &'a str,
}

impl ConfigGenerator for HotspotGenerator {
    fn generate_config(
        &self,
        _tenant: &TenantContext,
        interfaces: &[String],
        router_id: &str,
        options: &ServiceOptions,
    ) -> Result<Script, ProvisionError> {
        let router_id = checked_router_id(router_id)?;
        let interfaces = checked_interfaces(interfaces)?;
        let radius = checked_radius(options)?;
        let pool = checked_pool(options.ip_pool.as_deref(), DEFAULT_HOTSPOT_POOL)?;
        let gateway = pool.gateway_for(options.gateway.as_deref())?;
        let dns = checked_dns(options)?;
        let vlan = optional_vlan(options)?;
        let rate_limit = checked_rate_limit(options)?;
        let portal_host = portal_host(options.portal_url.as_deref())?;

        let names = Names::new("hotspot", router_id, options.service_index);
        let bridge = names.of("br");
        let mut script = Script::new("Hotspot configuration", router_id);
        emit_log(&mut script, format!("rosprov: applying hotspot for {router_id}"));

        emit_bridge(&mut script, &bridge, &interfaces, "Hotspot bridge");
        let access = match vlan {
            Some(id) => {
                let name = names.of("vlan");
                emit_vlan(&mut script, &name, id, &bridge, "Hotspot VLAN");
                name
            }
            None => bridge,
        };

        emit_hotspot_access(
            &mut script,
            &HotspotAccess {
                names: &names,
                access_interface: &access,
                pool,
                gateway,
                dns: &dns,
                radius,
                rate_limit,
                portal_host,
                portal_url: options.portal_url.as_deref(),
                lease_time: options.lease_time.as_deref().unwrap_or("1h"),
            },
        );
        emit_hotspot_firewall(&mut script, &names, &access, &pool);

        emit_log(&mut script, format!("rosprov: hotspot for {router_id} applied"));
        Ok(script)
    }
}

/// Addressing, DHCP, hotspot server and RADIUS on `access.access_interface`.
pub(super) fn emit_hotspot_access(script: &mut Script, access: &HotspotAccess<'_>) {
    let names = access.names;
    let iface = access.access_interface;
    let pool_name = names.of("pool");
    let server = names.of("server");
    let profile = names.of("profile");

    script.section("Addressing");
    emit_gateway_address(script, access.gateway, iface, &names.tag("gateway"));
    emit_pool(script, &pool_name, &access.pool);

    script.section("DHCP");
    script.replace(
        "/ip dhcp-server",
        Props::new()
            .set("name", names.of("dhcp"))
            .set("interface", iface)
            .set("address-pool", &pool_name)
            .set("lease-time", access.lease_time)
            .set("disabled", "no"),
    );
    script.replace_by(
        "/ip dhcp-server network",
        "comment",
        Props::new()
            .set("address", access.pool.network_cidr())
            .set("gateway", access.gateway.to_string())
            .set("dns-server", access.dns)
            .quoted("comment", names.tag("dhcp-network")),
    );

    script.section("Hotspot");
    script.replace(
        "/ip hotspot profile",
        Props::new()
            .set("name", &profile)
            .set("hotspot-address", access.gateway.to_string())
            .set("html-directory", "hotspot")
            .set("login-by", "http-chap,http-pap,mac-cookie")
            .set("use-radius", "yes")
            .set("radius-accounting", "yes")
            .set("radius-interim-update", "5m")
            .set_opt("rate-limit", access.rate_limit),
    );
    script.replace(
        "/ip hotspot user profile",
        Props::new()
            .set("name", names.of("users"))
            .set("shared-users", "1")
            .set("keepalive-timeout", "2m")
            .set_opt("rate-limit", access.rate_limit),
    );
    script.replace(
        "/ip hotspot",
        Props::new()
            .set("name", &server)
            .set("interface", iface)
            .set("address-pool", &pool_name)
            .set("profile", &profile)
            .set("addresses-per-mac", "2")
            .set("idle-timeout", "5m")
            .set("keepalive-timeout", "2m")
            .set("disabled", "no"),
    );
    // AAA comes from RADIUS only
    script.sweep("/ip hotspot user", Selector::eq("server", &server));

    script.section("RADIUS");
    emit_radius(script, "hotspot", access.radius, &names.tag("radius"));

    if let Some(host) = &access.portal_host {
        script.section("Walled garden");
        script.replace_by(
            "/ip hotspot walled-garden",
            "comment",
            Props::new()
                .set("server", &server)
                .set("dst-host", host)
                .set("action", "allow")
                .quoted("comment", names.tag("portal")),
        );
        if let Some(url) = access.portal_url {
            script.attempt(Statement::Set {
                path: "/file",
                target: Target::Item("hotspot/login.html".to_string()),
                props: Props::new().quoted("contents", login_redirect_page(url)),
            });
        }
    }
}

/// Filter and NAT rules for a hotspot access interface.
fn emit_hotspot_firewall(script: &mut Script, names: &Names, access: &str, pool: &IpPool) {
    let prefix = names.tag_prefix();
    let network = pool.network_cidr();

    script.section("Firewall");
    sweep_tagged(script, "/ip firewall filter", &prefix);
    script.add(
        "/ip firewall filter",
        Props::new()
            .set("chain", "input")
            .set("in-interface", access)
            .set("protocol", "udp")
            .set("dst-port", "53,67")
            .set("action", "accept")
            .quoted("comment", names.tag("allow-dns-dhcp")),
    );
    script.add(
        "/ip firewall filter",
        Props::new()
            .set("chain", "input")
            .set("in-interface", access)
            .set("protocol", "tcp")
            .set("dst-port", format!("{HOTSPOT_HTTP_PORT},{HOTSPOT_HTTPS_PORT}"))
            .set("action", "accept")
            .quoted("comment", names.tag("allow-portal")),
    );
    script.add(
        "/ip firewall filter",
        Props::new()
            .set("chain", "forward")
            .set("in-interface", access)
            .not("out-interface", access)
            .set("action", "accept")
            .quoted("comment", names.tag("allow-upstream")),
    );

    script.section("NAT");
    sweep_tagged(script, "/ip firewall nat", &prefix);
    script.add(
        "/ip firewall nat",
        Props::new()
            .set("chain", "srcnat")
            .set("src-address", &network)
            .not("out-interface", access)
            .set("action", "masquerade")
            .quoted("comment", names.tag("masquerade")),
    );
    for (port, to_port, what) in [
        (80, HOTSPOT_HTTP_PORT, "redirect-http"),
        (443, HOTSPOT_HTTPS_PORT, "redirect-https"),
    ] {
        script.add(
            "/ip firewall nat",
            Props::new()
                .set("chain", "dstnat")
                .set("in-interface", access)
                .set("protocol", "tcp")
                .set("dst-port", port.to_string())
                .not("hotspot", "auth")
                .set("action", "redirect")
                .set("to-ports", to_port.to_string())
                .quoted("comment", names.tag(what)),
        );
    }
}

/// Host part of the portal URL, validated.
pub(super) fn portal_host(portal_url: Option<&str>) -> Result<Option<String>, ProvisionError> {
    let Some(raw) = portal_url else {
        return Ok(None);
    };
    let parsed = url::Url::parse(raw.trim())
        .map_err(|e| ProvisionError::invalid_option("portal_url", format!("'{raw}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ProvisionError::invalid_option(
            "portal_url",
            format!("'{raw}' must be http or https"),
        ));
    }
    parsed
        .host_str()
        .map(|h| Some(h.to_string()))
        .ok_or_else(|| ProvisionError::invalid_option("portal_url", format!("'{raw}' has no host")))
}

fn login_redirect_page(portal_url: &str) -> String {
    let separator = if portal_url.contains('?') { '&' } else { '?' };
    format!(
        "<html><head><meta http-equiv=\"refresh\" content=\"0; url={portal_url}{separator}mac=$(mac-esc)&ip=$(ip)&link-login=$(link-login-only-esc)\"></head><body></body></html>"
    )
}
