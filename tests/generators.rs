use pretty_assertions::assert_eq;
use rosprov::error::ProvisionError;
use rosprov::generator::{
    ConfigGenerator, HotspotGenerator, HybridGenerator, HybridOptions, PppoeGenerator, ServiceOptions, TenantContext,
};
use rosprov::pool::IpPool;
use rosprov::script::{Script, Statement, escape, unescape};

fn ifaces(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn radius() -> ServiceOptions {
    ServiceOptions::with_radius("10.8.0.1", "radius-secret")
}

/// Every named object is added once and removed once, removal first.
fn assert_paired(script: &Script) {
    let statements = script.statements();
    for object in script.created_objects() {
        let adds: Vec<usize> = statements
            .iter()
            .enumerate()
            .filter(|(_, s)| match s {
                Statement::Add { path, .. } => {
                    *path == object.path && s.identity().is_some_and(|(_, name)| name == object.name)
                }
                _ => false,
            })
            .map(|(i, _)| i)
            .collect();
        let removes: Vec<usize> = statements
            .iter()
            .enumerate()
            .filter(|(_, s)| match s {
                Statement::Remove { path, selector } => {
                    *path == object.path && selector.value_of(&object.key) == Some(object.name.as_str())
                }
                _ => false,
            })
            .map(|(i, _)| i)
            .collect();
        assert_eq!(adds.len(), 1, "{} {} added {} times", object.path, object.name, adds.len());
        assert_eq!(removes.len(), 1, "{} {} removed {} times", object.path, object.name, removes.len());
        assert!(removes[0] < adds[0], "{} {} removed after add", object.path, object.name);
    }
}

#[test]
fn hotspot_and_pppoe_pair_every_named_object() {
    let interface_sets = [
        vec!["ether2"],
        vec!["ether2", "ether3"],
        vec!["ether2", "ether3", "wlan1", "sfp-sfpplus1"],
    ];
    for set in interface_sets {
        let interfaces = ifaces(&set);
        let hotspot = HotspotGenerator
            .generate_config(&TenantContext::default(), &interfaces, "R7", &radius())
            .expect("hotspot");
        let pppoe = PppoeGenerator
            .generate_config(&TenantContext::new("acme"), &interfaces, "R7", &radius())
            .expect("pppoe");

        assert_paired(&hotspot);
        assert_paired(&pppoe);

        let names: Vec<String> = hotspot.created_objects().into_iter().map(|o| o.name).collect();
        for expected in ["br-hotspot-R7", "pool-hotspot-R7", "dhcp-hotspot-R7", "server-hotspot-R7"] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
        let names: Vec<String> = pppoe.created_objects().into_iter().map(|o| o.name).collect();
        for expected in ["br-pppoe-R7", "pool-pppoe-R7", "profile-pppoe-R7", "pppoe-acme"] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }
}

#[test]
fn pppoe_for_r1_builds_one_bridge_pool_profile_and_server() {
    let options = ServiceOptions {
        ip_pool: Some("192.168.89.10-192.168.89.254".to_string()),
        ..radius()
    };
    let script = PppoeGenerator
        .generate_config(&TenantContext::default(), &ifaces(&["ether2", "ether3"]), "R1", &options)
        .expect("script");
    let commands = script.commands();
    let starting = |prefix: &str| -> Vec<String> {
        commands.iter().filter(|c| c.starts_with(prefix)).cloned().collect()
    };

    assert_eq!(
        starting("/interface bridge add"),
        vec!["/interface bridge add name=br-pppoe-R1 comment=\"PPPoE bridge\"".to_string()]
    );
    assert_eq!(
        starting("/interface bridge port add"),
        vec![
            "/interface bridge port add interface=ether2 bridge=br-pppoe-R1".to_string(),
            "/interface bridge port add interface=ether3 bridge=br-pppoe-R1".to_string(),
        ]
    );
    assert_eq!(
        starting("/ip pool add"),
        vec!["/ip pool add name=pool-pppoe-R1 ranges=192.168.89.10-192.168.89.254".to_string()]
    );
    assert_eq!(starting("/ppp profile add").len(), 1);

    let servers = starting("/interface pppoe-server server add");
    assert_eq!(servers.len(), 1);
    assert!(servers[0].contains("interface=br-pppoe-R1"));
    assert!(servers[0].contains("default-profile=profile-pppoe-R1"));

    assert!(!commands.iter().any(|c| c.contains("/interface vlan")));
    assert_paired(&script);
}

#[test]
fn hybrid_drops_cross_vlan_traffic_before_any_wan_accept() {
    for (hs, ppp) in [(10, 20), (20, 10), (1, 4094), (4094, 1), (100, 101)] {
        let options = ServiceOptions {
            hybrid: Some(HybridOptions {
                hotspot_vlan: hs,
                pppoe_vlan: ppp,
                hotspot_pool: "10.10.0.10-10.10.0.254".to_string(),
                pppoe_pool: "10.20.0.10-10.20.0.254".to_string(),
                hotspot_gateway: None,
                pppoe_gateway: None,
            }),
            ..radius()
        };
        let commands = HybridGenerator
            .generate_config(&TenantContext::default(), &ifaces(&["ether4"]), "R2", &options)
            .expect("hybrid")
            .commands();
        let hs_iface = "vlan-hybrid-hotspot-R2";
        let ppp_iface = "vlan-hybrid-pppoe-R2";
        let position = |needle: &str| {
            commands
                .iter()
                .position(|c| c.starts_with("/ip firewall filter add") && c.contains(needle))
                .unwrap_or_else(|| panic!("no rule matching {needle}"))
        };

        let drop_a = position(&format!("in-interface={hs_iface} out-interface={ppp_iface} action=drop"));
        let drop_b = position(&format!("in-interface={ppp_iface} out-interface={hs_iface} action=drop"));
        let first_wan_accept = commands
            .iter()
            .position(|c| {
                c.starts_with("/ip firewall filter add") && c.contains("out-interface=ether1") && c.contains("action=accept")
            })
            .expect("wan accept");
        assert!(drop_a < first_wan_accept, "vlans {hs}/{ppp}");
        assert!(drop_b < first_wan_accept, "vlans {hs}/{ppp}");
    }
}

#[test]
fn pool_ranges_must_stay_inside_one_subnet() {
    assert!("192.168.88.10-192.168.88.254".parse::<IpPool>().is_ok());
    for bad in ["192.168.88.10-192.168.89.5", "192.168.88.200-192.168.88.50"] {
        assert!(
            matches!(bad.parse::<IpPool>(), Err(ProvisionError::InvalidIpPool { .. })),
            "{bad} accepted"
        );
    }
}

#[test]
fn invalid_inputs_never_produce_a_script() {
    let ctx = TenantContext::default();
    assert!(matches!(
        HotspotGenerator.generate_config(&ctx, &[], "R1", &radius()),
        Err(ProvisionError::NoInterfaces)
    ));
    assert!(matches!(
        PppoeGenerator.generate_config(&ctx, &ifaces(&["ether2; /system reboot"]), "R1", &radius()),
        Err(ProvisionError::InvalidInterface(_))
    ));
    assert!(matches!(
        PppoeGenerator.generate_config(&ctx, &ifaces(&["ether2"]), "R1", &ServiceOptions::default()),
        Err(ProvisionError::MissingOption("radius"))
    ));
}

#[test]
fn radius_secret_cannot_break_out_of_its_string() {
    let secret = "s3cr\"et\\\n/system reset-configuration";
    let script = PppoeGenerator
        .generate_config(
            &TenantContext::default(),
            &ifaces(&["ether2"]),
            "R1",
            &ServiceOptions::with_radius("10.8.0.1", secret),
        )
        .expect("script");
    let radius = script
        .commands()
        .into_iter()
        .find(|c| c.starts_with("/radius add"))
        .expect("radius entry");
    assert!(radius.contains(&format!("secret=\"{}\"", escape(secret))));
    assert!(!radius.contains('\n'));
    assert_eq!(unescape(&escape(secret)).expect("unescape"), secret);
}

#[test]
fn pool_from_first_host_gets_a_gateway_above_the_range() {
    let options = ServiceOptions {
        ip_pool: Some("192.168.89.1-192.168.89.100".to_string()),
        ..radius()
    };
    let commands = PppoeGenerator
        .generate_config(&TenantContext::default(), &ifaces(&["ether2"]), "R1", &options)
        .expect("script")
        .commands();
    assert!(
        commands
            .iter()
            .any(|c| c.starts_with("/ip address add") && c.contains("address=192.168.89.101/24")),
        "{commands:#?}"
    );
}
