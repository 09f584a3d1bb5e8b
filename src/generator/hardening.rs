use super::*;

use crate::model::Router;
use crate::script::{Statement, Target};

const BOGONS: &[&str] = &[
    "0.0.0.0/8",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/3",
];

const CAPTIVE_PORTAL_HOSTS: &[&str] = &[
    "*.googleapis.com",
    "*.gstatic.com",
    "*.cloudflare.com",
    "*.cloudfront.net",
];

const MGMT_LIST: &str = "rosprov-mgmt";
const BOGON_LIST: &str = "rosprov-bogons";
const SSH_BLACKLIST: &str = "rosprov-ssh-blacklist";
const PORT_SCANNERS: &str = "rosprov-port-scanners";
const SYN_FLOODERS: &str = "rosprov-syn-flood";
const SYSLOG_ACTION: &str = "rosprovremote";
const MAX_SSH_STAGES: u32 = 10;

/// Knobs for [`HardeningGenerator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct HardeningOptions {
    pub management_network: String,
    pub vpn_subnet: String,
    /// Extra addresses allowed to reach SSH.
    pub allowed_ssh_ips: Vec<String>,
    pub wan_interface: String,
    /// Concurrent SSH sessions per source before new ones are dropped.
    pub max_ssh_sessions: u32,
    /// New SSH connections per minute before a source climbs the blacklist stages.
    pub ssh_rate_limit: u32,
    pub enable_api_ssl: bool,
    pub dns_servers: Vec<String>,
    pub ntp_servers: Vec<String>,
    pub syslog_host: Option<String>,
    /// Captive portal host; enables the walled-garden defaults.
    pub portal_host: Option<String>,
    /// Ends the input chain with a drop rule.
    pub drop_unmatched_input: bool,
    pub daily_backup: bool,
}

impl Default for HardeningOptions {
    fn default() -> Self {
        Self {
            management_network: "192.168.56.0/24".to_string(),
            vpn_subnet: "10.0.0.0/8".to_string(),
            allowed_ssh_ips: Vec::new(),
            wan_interface: "ether1".to_string(),
            max_ssh_sessions: 5,
            ssh_rate_limit: 3,
            enable_api_ssl: false,
            dns_servers: vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()],
            ntp_servers: vec!["pool.ntp.org".to_string()],
            syslog_host: None,
            portal_host: None,
            drop_unmatched_input: true,
            daily_backup: true,
        }
    }
}

/// Locks down management services and installs a defensive firewall.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HardeningGenerator;

impl HardeningGenerator {
    pub fn generate(&self, router: &Router, options: &HardeningOptions) -> Result<Script, ProvisionError> {
        let router_id = checked_router_id(&router.id)?;
        let wan = validate_interface(&options.wan_interface)?;
        let mut trusted = vec![
            checked_cidr(&options.management_network, "management_network")?,
            checked_cidr(&options.vpn_subnet, "vpn_subnet")?,
        ];
        for ip in &options.allowed_ssh_ips {
            trusted.push(checked_cidr(ip, "allowed_ssh_ips")?);
        }
        for dns in &options.dns_servers {
            dns.parse::<Ipv4Addr>().map_err(|_| {
                ProvisionError::invalid_option("dns_servers", format!("'{dns}' is not an IPv4 address"))
            })?;
        }
        if options.max_ssh_sessions == 0 {
            return Err(ProvisionError::invalid_option("max_ssh_sessions", "must be positive"));
        }
        if !(1..=MAX_SSH_STAGES).contains(&options.ssh_rate_limit) {
            return Err(ProvisionError::invalid_option(
                "ssh_rate_limit",
                format!("{} is outside 1-{MAX_SSH_STAGES}", options.ssh_rate_limit),
            ));
        }

        let names = Names::new("harden", router_id, None);
        let prefix = names.tag_prefix();
        let mut script = Script::new("Router hardening", router_id);
        emit_log(&mut script, format!("rosprov: hardening {router_id}"));

        emit_services(&mut script, options, &trusted);
        emit_address_lists(&mut script, &names, &trusted);
        emit_input_chain(&mut script, &names, options, wan);
        emit_forward_chain(&mut script, &names, wan);

        script.section("User security");
        script.ensure(
            "/user",
            Selector::eq("name", &router.username),
            Props::new()
                .set("name", &router.username)
                .set("group", "full")
                .set("disabled", "no"),
        );

        emit_system(&mut script, options);
        emit_logging(&mut script, options)?;
        if options.daily_backup {
            emit_backup(&mut script, router_id);
        }
        if let Some(host) = &options.portal_host {
            emit_walled_garden(&mut script, &names, host)?;
        }

        emit_log(&mut script, format!("rosprov: hardening {router_id} applied ({prefix})"));
        Ok(script)
    }
}

fn checked_cidr(raw: &str, name: &'static str) -> Result<String, ProvisionError> {
    let raw = raw.trim();
    let (addr, prefix) = raw.split_once('/').unwrap_or((raw, "32"));
    let ok = addr.parse::<Ipv4Addr>().is_ok() && prefix.parse::<u8>().is_ok_and(|p| p <= 32);
    if ok {
        Ok(raw.to_string())
    } else {
        Err(ProvisionError::invalid_option(name, format!("'{raw}' is not an IPv4 address or CIDR")))
    }
}

fn emit_services(script: &mut Script, options: &HardeningOptions, trusted: &[String]) {
    script.section("Management services");
    for service in ["telnet", "ftp", "www", "api"] {
        script.set(
            "/ip service",
            Target::Item(service.to_string()),
            Props::new().set("disabled", "yes"),
        );
    }
    let api_ssl = if options.enable_api_ssl {
        Props::new().set("disabled", "no").set("address", trusted.join(","))
    } else {
        Props::new().set("disabled", "yes")
    };
    script.set("/ip service", Target::Item("api-ssl".to_string()), api_ssl);
    for service in ["ssh", "winbox"] {
        script.set(
            "/ip service",
            Target::Item(service.to_string()),
            Props::new().set("disabled", "no").set("address", trusted.join(",")),
        );
    }
    script.attempt(Statement::Set {
        path: "/ip ssh",
        target: Target::Menu,
        props: Props::new().set("strong-crypto", "yes"),
    });
}

fn emit_address_lists(script: &mut Script, names: &Names, trusted: &[String]) {
    script.section("Address lists");
    sweep_tagged(script, "/ip firewall address-list", &names.tag_prefix());
    for address in trusted {
        script.add(
            "/ip firewall address-list",
            Props::new()
                .set("list", MGMT_LIST)
                .set("address", address)
                .quoted("comment", names.tag("mgmt")),
        );
    }
    for bogon in BOGONS {
        script.add(
            "/ip firewall address-list",
            Props::new()
                .set("list", BOGON_LIST)
                .set("address", bogon)
                .quoted("comment", names.tag("bogon")),
        );
    }
}

/// Builds a tagged filter rule.
fn rule(names: &Names, chain: &str, what: &str) -> Props {
    Props::new().set("chain", chain).quoted("comment", names.tag(what))
}

fn emit_input_chain(script: &mut Script, names: &Names, options: &HardeningOptions, wan: &str) {
    let filter = "/ip firewall filter";
    script.section("Input chain");
    sweep_tagged(script, filter, &names.tag_prefix());

    let mut rules: Vec<Props> = vec![
        rule(names, "input", "accept-established")
            .set("connection-state", "established,related")
            .set("action", "accept"),
        rule(names, "input", "drop-invalid")
            .set("connection-state", "invalid")
            .set("action", "drop"),
    ];
    for list in [SSH_BLACKLIST, PORT_SCANNERS, SYN_FLOODERS] {
        rules.push(
            rule(names, "input", &format!("drop-{list}"))
                .set("src-address-list", list)
                .set("action", "drop"),
        );
    }
    rules.push(
        rule(names, "input", "drop-bogons")
            .set("in-interface", wan)
            .set("src-address-list", BOGON_LIST)
            .set("action", "drop"),
    );
    rules.push(
        rule(names, "input", "detect-port-scan")
            .set("protocol", "tcp")
            .set("psd", "21,3s,3,1")
            .set("action", "add-src-to-address-list")
            .set("address-list", PORT_SCANNERS)
            .set("address-list-timeout", "2w"),
    );
    rules.push(
        rule(names, "input", "detect-syn-flood")
            .set("protocol", "tcp")
            .set("tcp-flags", "syn")
            .set("connection-state", "new")
            .set("connection-limit", "100,32")
            .set("action", "add-src-to-address-list")
            .set("address-list", SYN_FLOODERS)
            .set("address-list-timeout", "1d"),
    );
    rules.push(
        rule(names, "input", "limit-ssh-sessions")
            .set("protocol", "tcp")
            .set("dst-port", "22")
            .set("connection-limit", format!("{},32", options.max_ssh_sessions))
            .set("action", "drop"),
    );
    // stage1 -> ... -> stageN -> blacklist, trusted sources exempt
    let stages = options.ssh_rate_limit as usize;
    for n in (1..=stages).rev() {
        let to = if n == stages {
            SSH_BLACKLIST.to_string()
        } else {
            format!("rosprov-ssh-stage{}", n + 1)
        };
        let timeout = if n == stages { "1w" } else { "1m" };
        rules.push(
            rule(names, "input", &format!("ssh-stage{n}"))
                .set("protocol", "tcp")
                .set("dst-port", "22")
                .set("connection-state", "new")
                .set("src-address-list", format!("rosprov-ssh-stage{n}"))
                .set("action", "add-src-to-address-list")
                .set("address-list", to)
                .set("address-list-timeout", timeout),
        );
    }
    rules.push(
        rule(names, "input", "ssh-new")
            .set("protocol", "tcp")
            .set("dst-port", "22")
            .set("connection-state", "new")
            .not("src-address-list", MGMT_LIST)
            .set("action", "add-src-to-address-list")
            .set("address-list", "rosprov-ssh-stage1")
            .set("address-list-timeout", "1m"),
    );
    rules.push(
        rule(names, "input", "accept-mgmt")
            .set("protocol", "tcp")
            .set("dst-port", "22,8291")
            .set("src-address-list", MGMT_LIST)
            .set("action", "accept"),
    );
    rules.push(
        rule(names, "input", "accept-radius")
            .set("protocol", "udp")
            .set("dst-port", "1812,1813,3799")
            .set("src-address", &options.vpn_subnet)
            .set("action", "accept"),
    );
    rules.push(
        rule(names, "input", "drop-wan-dns")
            .set("in-interface", wan)
            .set("protocol", "udp")
            .set("dst-port", "53")
            .set("action", "drop"),
    );
    rules.push(
        rule(names, "input", "accept-lan-dns-dhcp")
            .not("in-interface", wan)
            .set("protocol", "udp")
            .set("dst-port", "53,67")
            .set("action", "accept"),
    );
    rules.push(
        rule(names, "input", "accept-hotspot-web")
            .not("in-interface", wan)
            .set("protocol", "tcp")
            .set("dst-port", "80,64872-64875")
            .set("action", "accept"),
    );
    rules.push(
        rule(names, "input", "accept-wireguard")
            .set("protocol", "udp")
            .set("dst-port", "51820")
            .set("action", "accept"),
    );
    rules.push(
        rule(names, "input", "accept-icmp")
            .set("protocol", "icmp")
            .set("limit", "50,5:packet")
            .set("action", "accept"),
    );
    if options.drop_unmatched_input {
        rules.push(rule(names, "input", "drop-all").set("action", "drop"));
    }
    for props in rules {
        script.add(filter, props);
    }
}

fn emit_forward_chain(script: &mut Script, names: &Names, wan: &str) {
    script.section("Forward chain");
    let rules = [
        rule(names, "forward", "fwd-accept-established")
            .set("connection-state", "established,related")
            .set("action", "accept"),
        rule(names, "forward", "fwd-drop-invalid")
            .set("connection-state", "invalid")
            .set("action", "drop"),
        rule(names, "forward", "fwd-drop-fin-scan")
            .set("protocol", "tcp")
            .set("tcp-flags", "fin,!syn,!rst,!psh,!ack,!urg")
            .set("action", "drop"),
        rule(names, "forward", "fwd-drop-xmas-scan")
            .set("protocol", "tcp")
            .set("tcp-flags", "fin,psh,urg,!syn,!rst,!ack")
            .set("action", "drop"),
        rule(names, "forward", "fwd-drop-null-scan")
            .set("protocol", "tcp")
            .set("tcp-flags", "!fin,!syn,!rst,!psh,!ack,!urg")
            .set("action", "drop"),
        rule(names, "forward", "fwd-drop-bogons")
            .set("in-interface", wan)
            .set("src-address-list", BOGON_LIST)
            .set("action", "drop"),
    ];
    for props in rules {
        script.add("/ip firewall filter", props);
    }
}

fn emit_system(script: &mut Script, options: &HardeningOptions) {
    script.section("System services");
    let menus: [(&'static str, Props); 7] = [
        ("/tool bandwidth-server", Props::new().set("enabled", "no")),
        ("/tool mac-server", Props::new().set("allowed-interface-list", "none")),
        ("/tool mac-server mac-winbox", Props::new().set("allowed-interface-list", "none")),
        ("/tool mac-server ping", Props::new().set("enabled", "no")),
        ("/ip neighbor discovery-settings", Props::new().set("discover-interface-list", "none")),
        ("/ip settings", Props::new().set("tcp-syncookies", "yes").set("rp-filter", "loose")),
        ("/ip cloud", Props::new().set("ddns-enabled", "no").set("update-time", "no")),
    ];
    // menus differ between RouterOS 6 and 7
    for (path, props) in menus {
        script.attempt(Statement::Set {
            path,
            target: Target::Menu,
            props,
        });
    }
    for path in ["/ip proxy", "/ip socks", "/ip upnp"] {
        script.set(path, Target::Menu, Props::new().set("enabled", "no"));
    }
    if !options.ntp_servers.is_empty() {
        script.attempt(Statement::Set {
            path: "/system ntp client",
            target: Target::Menu,
            props: Props::new()
                .set("enabled", "yes")
                .set("servers", options.ntp_servers.join(",")),
        });
    }

    script.section("DNS");
    script.set(
        "/ip dns",
        Target::Menu,
        Props::new()
            .set("servers", options.dns_servers.join(","))
            .set("allow-remote-requests", "yes")
            .set("cache-size", "4096KiB"),
    );
}

fn emit_logging(script: &mut Script, options: &HardeningOptions) -> Result<(), ProvisionError> {
    let Some(host) = &options.syslog_host else {
        return Ok(());
    };
    let host = host.trim();
    host.parse::<Ipv4Addr>().map_err(|_| {
        ProvisionError::invalid_option("syslog_host", format!("'{host}' is not an IPv4 address"))
    })?;

    script.section("Remote logging");
    // rules reference the action, so they go first
    script.sweep("/system logging", Selector::eq("action", SYSLOG_ACTION));
    script.replace(
        "/system logging action",
        Props::new()
            .set("name", SYSLOG_ACTION)
            .set("target", "remote")
            .set("remote", host)
            .set("remote-port", "514"),
    );
    for topics in ["critical", "error", "warning", "system,info", "account"] {
        script.add(
            "/system logging",
            Props::new().set("topics", topics).set("action", SYSLOG_ACTION),
        );
    }
    Ok(())
}

fn emit_backup(script: &mut Script, router_id: &str) {
    script.section("Backups");
    let script_name = format!("rosprov-backup-{router_id}");
    // scheduler references the script by name
    script.sweep("/system scheduler", Selector::eq("name", format!("rosprov-daily-{router_id}")));
    script.replace(
        "/system script",
        Props::new()
            .set("name", &script_name)
            .set("policy", "read,write,policy,test,sensitive")
            .quoted(
                "source",
                format!("/system backup save name=rosprov-daily-{router_id}; /export file=rosprov-daily-{router_id}"),
            ),
    );
    script.add(
        "/system scheduler",
        Props::new()
            .set("name", format!("rosprov-daily-{router_id}"))
            .set("interval", "1d")
            .set("start-time", "03:00:00")
            .set("on-event", &script_name),
    );
}

fn emit_walled_garden(script: &mut Script, names: &Names, portal_host: &str) -> Result<(), ProvisionError> {
    let host = portal_host.trim();
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(ProvisionError::invalid_option("portal_host", format!("'{host}' is not a host")));
    }
    script.section("Walled garden");
    sweep_tagged(script, "/ip hotspot walled-garden", &names.tag_prefix());
    sweep_tagged(script, "/ip hotspot walled-garden ip", &names.tag_prefix());
    for dst in std::iter::once(host).chain(CAPTIVE_PORTAL_HOSTS.iter().copied()) {
        script.add(
            "/ip hotspot walled-garden",
            Props::new()
                .set("dst-host", dst)
                .set("action", "allow")
                .quoted("comment", names.tag("walled-garden")),
        );
    }
    for dns in ["8.8.8.8", "8.8.4.4", "1.1.1.1"] {
        script.add(
            "/ip hotspot walled-garden ip",
            Props::new()
                .set("dst-address", dns)
                .set("action", "accept")
                .quoted("comment", names.tag("walled-garden-dns")),
        );
    }
    Ok(())
}

/// Overall grade of a [`SecurityScore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityRating {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl SecurityRating {
    fn from_score(score: u32) -> Self {
        match score {
            95.. => Self::Excellent,
            85.. => Self::Good,
            70.. => Self::Fair,
            _ => Self::Poor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScoreCheck {
    pub name: String,
    pub points: u32,
    pub max_points: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SecurityScore {
    pub score: u32,
    pub max_score: u32,
    pub rating: SecurityRating,
    pub checks: Vec<ScoreCheck>,
}

/// Groups an `/export` by menu path, joining `\` continued lines.
fn export_sections(export: &str) -> HashMap<String, Vec<String>> {
    let mut sections: HashMap<String, Vec<String>> = HashMap::new();
    let mut current = String::new();
    let mut pending = String::new();
    for raw in export.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(head) = line.strip_suffix('\\') {
            pending.push_str(head.trim_end());
            pending.push(' ');
            continue;
        }
        let full = if pending.is_empty() {
            line.to_string()
        } else {
            let joined = format!("{pending}{line}");
            pending.clear();
            joined
        };
        if full.starts_with('/') && !full.contains('=') {
            current = full;
            sections.entry(current.clone()).or_default();
        } else {
            sections.entry(current.clone()).or_default().push(full);
        }
    }
    sections
}

/// Grades a device `/export` on eight hardening checks worth 100 points.
pub fn security_score(export: &str) -> SecurityScore {
    let sections = export_sections(export);
    let lines = |path: &str| sections.get(path).map(Vec::as_slice).unwrap_or(&[]);
    let any = |path: &str, needle: &str| lines(path).iter().any(|l| l.contains(needle));
    let service_line = |service: &str, needle: &str| {
        lines("/ip service")
            .iter()
            .any(|l| l.starts_with(&format!("set {service} ")) && l.contains(needle))
    };
    let any_section = |prefixes: &[&str], needle: &str| {
        sections
            .iter()
            .filter(|(path, _)| prefixes.iter().any(|p| path.starts_with(p)))
            .any(|(_, ls)| ls.iter().any(|l| l.contains(needle)))
    };

    let firewall = {
        let drop = any("/ip firewall filter", "action=drop");
        let established = any("/ip firewall filter", "connection-state=established");
        match (drop, established) {
            (true, true) => 20,
            (true, false) | (false, true) => 10,
            _ => 0,
        }
    };
    let management = service_line("telnet", "disabled=yes")
        && (service_line("ssh", "address=") || service_line("winbox", "address="));

    let checks = vec![
        ("ftp_disabled", if service_line("ftp", "disabled=yes") { 10 } else { 0 }, 10),
        ("radius", if lines("/radius").iter().any(|l| l.starts_with("add ")) { 15 } else { 0 }, 15),
        ("firewall", firewall, 20),
        ("nat", if any("/ip firewall nat", "action=masquerade") { 10 } else { 0 }, 10),
        ("dns", if any("/ip dns", "servers=") { 5 } else { 0 }, 5),
        (
            "session_management",
            if any_section(&["/ip hotspot", "/interface pppoe-server"], "keepalive-timeout=")
                || any_section(&["/ip hotspot"], "idle-timeout=")
            {
                10
            } else {
                0
            },
            10,
        ),
        (
            "rate_limit",
            if any_section(&["/ip hotspot", "/ppp profile", "/queue"], "rate-limit=")
                || any_section(&["/queue"], "max-limit=")
            {
                10
            } else {
                0
            },
            10,
        ),
        ("management_protection", if management { 20 } else { 0 }, 20),
    ];
    let checks: Vec<ScoreCheck> = checks
        .into_iter()
        .map(|(name, points, max_points)| ScoreCheck {
            name: name.to_string(),
            points,
            max_points,
        })
        .collect();
    let score = checks.iter().map(|c| c.points).sum();
    SecurityScore {
        score,
        max_score: checks.iter().map(|c| c.max_points).sum(),
        rating: SecurityRating::from_score(score),
        checks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        Router::new("R1", "192.168.1.10", "rosprov")
    }

    #[test]
    fn input_chain_accepts_management_before_final_drop() {
        let script = HardeningGenerator
            .generate(&router(), &HardeningOptions::default())
            .expect("script");
        let commands = script.commands();
        let position = |needle: &str| {
            commands
                .iter()
                .position(|c| c.contains(needle))
                .unwrap_or_else(|| panic!("missing {needle}"))
        };
        assert!(position(":accept-mgmt\"") < position(":drop-all\""));
        assert!(position(":accept-established\"") < position(":drop-invalid\""));
        assert!(commands.contains(&"/ip service set telnet disabled=yes".to_string()));
        assert!(commands.contains(
            &"/ip service set ssh disabled=no address=192.168.56.0/24,10.0.0.0/8".to_string()
        ));
    }

    #[test]
    fn invalid_network_is_rejected() {
        let options = HardeningOptions {
            management_network: "192.168.56.0/40".to_string(),
            ..HardeningOptions::default()
        };
        assert!(HardeningGenerator.generate(&router(), &options).is_err());
    }

    #[test]
    fn syslog_rules_are_swept_before_action_is_replaced() {
        let options = HardeningOptions {
            syslog_host: Some("10.0.0.9".to_string()),
            ..HardeningOptions::default()
        };
        let commands = HardeningGenerator.generate(&router(), &options).expect("script").commands();
        let sweep = commands
            .iter()
            .position(|c| c.contains("/system logging remove [find where action="))
            .expect("sweep");
        let action = commands
            .iter()
            .position(|c| c.starts_with("/system logging action add"))
            .expect("action");
        assert!(sweep < action);
    }

    #[test]
    fn walled_garden_defaults_follow_portal() {
        let options = HardeningOptions {
            portal_host: Some("portal.example.net".to_string()),
            ..HardeningOptions::default()
        };
        let text = HardeningGenerator.generate(&router(), &options).expect("script").render();
        assert!(text.contains("dst-host=portal.example.net action=allow"));
        assert!(text.contains("dst-host=*.gstatic.com action=allow"));
        assert!(text.contains("/ip hotspot walled-garden ip add dst-address=8.8.8.8 action=accept"));
    }

    #[test]
    fn hardened_export_scores_excellent() {
        let export = r#"
# may/01/2026 10:00:00 by RouterOS 7.14
/ip hotspot profile
add hotspot-address=192.168.88.1 name=hs rate-limit=10M/10M
/ip hotspot
add idle-timeout=5m keepalive-timeout=2m name=hs-server
/ip firewall filter
add action=accept chain=input connection-state=established,related
add action=drop chain=input comment="drop all"
/ip firewall nat
add action=masquerade chain=srcnat out-interface=ether1
/ip dns
set allow-remote-requests=yes servers=1.1.1.1
/ip service
set telnet disabled=yes
set ftp disabled=yes
set ssh address=10.0.0.0/8 \
    disabled=no
/radius
add address=10.8.0.1 service=hotspot
"#;
        let score = security_score(export);
        assert_eq!(score.score, 100);
        assert_eq!(score.max_score, 100);
        assert_eq!(score.rating, SecurityRating::Excellent);
    }

    #[test]
    fn factory_export_scores_poor() {
        let export = "/ip service\nset telnet disabled=no\n/ip firewall filter\nadd action=drop chain=input\n";
        let score = security_score(export);
        assert_eq!(score.score, 10);
        assert_eq!(score.rating, SecurityRating::Poor);
    }
}
