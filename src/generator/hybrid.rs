use super::*;

use super::hotspot::{HotspotAccess, emit_hotspot_access, portal_host};
use super::pppoe::{PppoeAccess, PppoeTuning, emit_pppoe_access, service_name};
use crate::config::{HOTSPOT_HTTPS_PORT, HOTSPOT_HTTP_PORT};

/// Hotspot and PPPoE on one parent interface, split into two 802.1Q
/// sub-interfaces with forwarding between them dropped in both directions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HybridGenerator;

impl ConfigGenerator for HybridGenerator {
    fn generate_config(
        &self,
        tenant: &TenantContext,
        interfaces: &[String],
        router_id: &str,
        options: &ServiceOptions,
    ) -> Result<Script, ProvisionError> {
        let router_id = checked_router_id(router_id)?;
        let interfaces = checked_interfaces(interfaces)?;
        let [parent] = interfaces.as_slice() else {
            return Err(ProvisionError::ServiceLayout(format!(
                "hybrid needs exactly one parent interface, got {}",
                interfaces.len()
            )));
        };
        let hybrid = options.hybrid.as_ref().ok_or(ProvisionError::MissingOption("hybrid"))?;
        let hs_vlan = checked_vlan(hybrid.hotspot_vlan, "hybrid.hotspot_vlan")?;
        let ppp_vlan = checked_vlan(hybrid.pppoe_vlan, "hybrid.pppoe_vlan")?;
        if hs_vlan == ppp_vlan {
            return Err(ProvisionError::invalid_option(
                "hybrid",
                format!("hotspot and pppoe VLAN ids must differ, both are {hs_vlan}"),
            ));
        }
        let hs_pool: IpPool = hybrid.hotspot_pool.parse()?;
        let ppp_pool: IpPool = hybrid.pppoe_pool.parse()?;
        if hs_pool.network() == ppp_pool.network() {
            return Err(ProvisionError::invalid_option(
                "hybrid",
                format!("hotspot and pppoe pools share {}", hs_pool.network_cidr()),
            ));
        }
        let hs_gateway = hs_pool.gateway_for(hybrid.hotspot_gateway.as_deref())?;
        let ppp_gateway = ppp_pool.gateway_for(hybrid.pppoe_gateway.as_deref())?;
        let radius = checked_radius(options)?;
        let dns = checked_dns(options)?;
        let wan = checked_wan(options)?;
        let rate_limit = checked_rate_limit(options)?;
        let portal = portal_host(options.portal_url.as_deref())?;
        let tuning = PppoeTuning::from_options(options)?;

        let index = options.service_index;
        let names = Names::new("hybrid", router_id, index);
        let hs_names = Names::new("hybrid-hotspot", router_id, index);
        let ppp_names = Names::new("hybrid-pppoe", router_id, index);
        let hs_iface = hs_names.of("vlan");
        let ppp_iface = ppp_names.of("vlan");

        let mut script = Script::new("Hybrid hotspot and PPPoE configuration", router_id);
        emit_log(&mut script, format!("rosprov: applying hybrid services for {router_id}"));

        script.section("VLANs");
        emit_vlan(&mut script, &hs_iface, hs_vlan, parent, "Hotspot VLAN");
        emit_vlan(&mut script, &ppp_iface, ppp_vlan, parent, "PPPoE VLAN");

        emit_hotspot_access(
            &mut script,
            &HotspotAccess {
                names: &hs_names,
                access_interface: &hs_iface,
                pool: hs_pool,
                gateway: hs_gateway,
                dns: &dns,
                radius,
                rate_limit,
                portal_host: portal,
                portal_url: options.portal_url.as_deref(),
                lease_time: options.lease_time.as_deref().unwrap_or("1h"),
            },
        );
        emit_pppoe_access(
            &mut script,
            &PppoeAccess {
                names: &ppp_names,
                access_interface: &ppp_iface,
                pool: ppp_pool,
                gateway: ppp_gateway,
                dns: &dns,
                radius,
                rate_limit,
                service_name: service_name(tenant, &ppp_names, options)?,
                tuning,
            },
        );

        emit_isolation_firewall(
            &mut script,
            &names,
            (hs_iface.as_str(), &hs_pool),
            (ppp_iface.as_str(), &ppp_pool),
            &wan,
        );

        emit_log(&mut script, format!("rosprov: hybrid services for {router_id} applied"));
        Ok(script)
    }
}

/// Cross-VLAN drops first, then the per-VLAN accepts toward WAN.
fn emit_isolation_firewall(
    script: &mut Script,
    names: &Names,
    (hs_iface, hs_pool): (&str, &IpPool),
    (ppp_iface, ppp_pool): (&str, &IpPool),
    wan: &str,
) {
    let filter = "/ip firewall filter";
    let hs_net = hs_pool.network_cidr();
    let ppp_net = ppp_pool.network_cidr();

    script.section("VLAN isolation");
    sweep_tagged(script, filter, &names.tag_prefix());
    for (from, to, what) in [
        (hs_iface, ppp_iface, "drop-hotspot-to-pppoe"),
        (ppp_iface, hs_iface, "drop-pppoe-to-hotspot"),
    ] {
        script.add(
            filter,
            Props::new()
                .set("chain", "forward")
                .set("in-interface", from)
                .set("out-interface", to)
                .set("action", "drop")
                .quoted("comment", names.tag(what)),
        );
    }
    // PPPoE sessions arrive on dynamic interfaces, so drop by subnet as well
    for (src, dst, what) in [
        (&hs_net, &ppp_net, "drop-hotspot-net-to-pppoe-net"),
        (&ppp_net, &hs_net, "drop-pppoe-net-to-hotspot-net"),
    ] {
        script.add(
            filter,
            Props::new()
                .set("chain", "forward")
                .set("src-address", src)
                .set("dst-address", dst)
                .set("action", "drop")
                .quoted("comment", names.tag(what)),
        );
    }
    script.add(
        filter,
        Props::new()
            .set("chain", "forward")
            .set("connection-state", "established,related")
            .set("action", "accept")
            .quoted("comment", names.tag("accept-established")),
    );
    script.add(
        filter,
        Props::new()
            .set("chain", "forward")
            .set("in-interface", hs_iface)
            .set("out-interface", wan)
            .set("action", "accept")
            .quoted("comment", names.tag("hotspot-to-wan")),
    );
    script.add(
        filter,
        Props::new()
            .set("chain", "forward")
            .set("src-address", &ppp_net)
            .set("out-interface", wan)
            .set("action", "accept")
            .quoted("comment", names.tag("pppoe-to-wan")),
    );
    script.add(
        filter,
        Props::new()
            .set("chain", "input")
            .set("in-interface", hs_iface)
            .set("protocol", "tcp")
            .set("dst-port", format!("{HOTSPOT_HTTP_PORT},{HOTSPOT_HTTPS_PORT}"))
            .set("action", "accept")
            .quoted("comment", names.tag("hotspot-portal")),
    );

    script.section("NAT");
    sweep_tagged(script, "/ip firewall nat", &names.tag_prefix());
    for (net, what) in [(&hs_net, "masquerade-hotspot"), (&ppp_net, "masquerade-pppoe")] {
        script.add(
            "/ip firewall nat",
            Props::new()
                .set("chain", "srcnat")
                .set("src-address", net)
                .set("out-interface", wan)
                .set("action", "masquerade")
                .quoted("comment", names.tag(what)),
        );
    }
    for (port, to_port, what) in [
        (80, HOTSPOT_HTTP_PORT, "redirect-http"),
        (443, HOTSPOT_HTTPS_PORT, "redirect-https"),
    ] {
        script.add(
            "/ip firewall nat",
            Props::new()
                .set("chain", "dstnat")
                .set("in-interface", hs_iface)
                .set("protocol", "tcp")
                .set("dst-port", port.to_string())
                .not("hotspot", "auth")
                .set("action", "redirect")
                .set("to-ports", to_port.to_string())
                .quoted("comment", names.tag(what)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(hs: u16, ppp: u16) -> ServiceOptions {
        ServiceOptions {
            hybrid: Some(HybridOptions {
                hotspot_vlan: hs,
                pppoe_vlan: ppp,
                hotspot_pool: "10.10.0.10-10.10.0.254".to_string(),
                pppoe_pool: "10.20.0.10-10.20.0.254".to_string(),
                hotspot_gateway: None,
                pppoe_gateway: None,
            }),
            ..ServiceOptions::with_radius("10.8.0.1", "secret")
        }
    }

    #[test]
    fn portal_ports_open_only_on_the_hotspot_vlan() {
        let commands = HybridGenerator
            .generate_config(&TenantContext::default(), &["ether2".to_string()], "R1", &options(10, 20))
            .expect("script")
            .commands();
        let portal: Vec<&String> = commands.iter().filter(|c| c.contains("dst-port=64872,64875")).collect();
        assert_eq!(portal.len(), 1);
        assert!(portal[0].contains("chain=input in-interface=vlan-hybrid-hotspot-R1"));
    }

    #[test]
    fn requires_exactly_one_parent() {
        let err = HybridGenerator
            .generate_config(
                &TenantContext::default(),
                &["ether2".to_string(), "ether3".to_string()],
                "R1",
                &options(10, 20),
            )
            .expect_err("two parents");
        assert!(matches!(err, ProvisionError::ServiceLayout(_)));
    }

    #[test]
    fn vlan_ids_must_differ_and_be_in_range() {
        let parent = ["ether2".to_string()];
        let ctx = TenantContext::default();
        assert!(HybridGenerator.generate_config(&ctx, &parent, "R1", &options(10, 10)).is_err());
        assert!(HybridGenerator.generate_config(&ctx, &parent, "R1", &options(0, 10)).is_err());
        assert!(HybridGenerator.generate_config(&ctx, &parent, "R1", &options(10, 4095)).is_err());
    }

    #[test]
    fn pools_must_not_share_a_subnet() {
        let mut opts = options(10, 20);
        if let Some(h) = opts.hybrid.as_mut() {
            h.pppoe_pool = "10.10.0.100-10.10.0.200".to_string();
        }
        let err = HybridGenerator
            .generate_config(&TenantContext::default(), &["ether2".to_string()], "R1", &opts)
            .expect_err("shared subnet");
        assert!(matches!(err, ProvisionError::InvalidOption { name: "hybrid", .. }));
    }

    #[test]
    fn sub_interfaces_hang_off_the_parent() {
        let script = HybridGenerator
            .generate_config(&TenantContext::default(), &["ether5".to_string()], "R1", &options(30, 40))
            .expect("script");
        let commands = script.commands();
        assert!(commands.contains(
            &"/interface vlan add name=vlan-hybrid-hotspot-R1 vlan-id=30 interface=ether5 comment=\"Hotspot VLAN\"".to_string()
        ));
        assert!(commands.contains(
            &"/interface vlan add name=vlan-hybrid-pppoe-R1 vlan-id=40 interface=ether5 comment=\"PPPoE VLAN\"".to_string()
        ));
        assert!(!commands.iter().any(|c| c.starts_with("/interface bridge add")));
    }
}
