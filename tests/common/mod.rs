//! In-memory RouterOS device behind the `Connector`/`Transport` seam.
//!
//! It understands the subset of the CLI the crate emits: `add`, guarded
//! `remove`, `print count-only where ...`, chunked `/file` writes, `/import`,
//! and `/user ssh-keys import`. Everything else succeeds silently.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use once_cell::sync::Lazy;
use regex::Regex;
use rosprov::credential::{AuthKind, CredentialVault, DecryptedCredential};
use rosprov::error::ProvisionError;
use rosprov::model::Router;
use rosprov::script::{commands_from_text, unescape};
use rosprov::session::{CommandOutput, Connector, SshTarget, Transport};
use russh::keys::PrivateKey;

static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).expect("quoted regex"));
static CONDITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([A-Za-z0-9-]+)(!=|=|~)"((?:[^"\\]|\\.)*)""#).expect("condition regex"));

pub const PASSWORD: &str = "router-pass";

/// One configured item: menu path plus its properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub path: String,
    pub props: HashMap<String, String>,
}

impl Item {
    fn prop(&self, key: &str) -> &str {
        self.props.get(key).map(String::as_str).unwrap_or_default()
    }
}

#[derive(Default)]
pub struct DeviceState {
    pub password: Option<String>,
    pub items: Vec<Item>,
    pub files: HashMap<String, String>,
    pub log: Vec<String>,
    pub logins: Vec<AuthKind>,
    pub failed_logins: u32,
    pub identity: String,
    pub export: String,
    /// Key logins fail for keys whose owner starts with this prefix.
    pub refuse_owner_prefix: Option<String>,
    pub failing_connects: u32,
    faults: Vec<(String, u32)>,
    severs: Vec<String>,
}

/// Fake device shared between the test and every session it opens.
#[derive(Clone)]
pub struct FakeDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        let state = DeviceState {
            password: Some(PASSWORD.to_string()),
            identity: "MikroTik".to_string(),
            ..DeviceState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().expect("device state")
    }

    /// Commands containing `needle` print a RouterOS failure `times` times.
    pub fn fail_on(&self, needle: &str, times: u32) {
        self.state().faults.push((needle.to_string(), times));
    }

    /// The next command containing `needle` kills the session.
    pub fn sever_on(&self, needle: &str) {
        self.state().severs.push(needle.to_string());
    }

    pub fn fail_connects(&self, times: u32) {
        self.state().failing_connects = times;
    }

    pub fn install_key(&self, user: &str, key: &PrivateKey, owner: &str) {
        let public = key.public_key().to_openssh().expect("public key");
        let blob = public.split_whitespace().nth(1).unwrap_or_default().to_string();
        self.state().items.push(ssh_key_item(user, owner, &blob));
    }

    pub fn commands(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn logins(&self) -> Vec<AuthKind> {
        self.state().logins.clone()
    }

    /// Owners of the keys installed for `user`.
    pub fn key_owners(&self, user: &str) -> Vec<String> {
        self.state()
            .items
            .iter()
            .filter(|i| i.path == "/user ssh-keys" && i.prop("user") == user)
            .map(|i| i.prop("key-owner").to_string())
            .collect()
    }

    pub fn count(&self, path: &str, key: &str, value: &str) -> usize {
        self.state()
            .items
            .iter()
            .filter(|i| i.path == path && i.prop(key) == value)
            .count()
    }
}

fn ssh_key_item(user: &str, owner: &str, blob: &str) -> Item {
    Item {
        path: "/user ssh-keys".to_string(),
        props: HashMap::from([
            ("user".to_string(), user.to_string()),
            ("key-owner".to_string(), owner.to_string()),
            ("key".to_string(), blob.to_string()),
        ]),
    }
}

pub struct FakeSession {
    state: Arc<Mutex<DeviceState>>,
    user: String,
    open: bool,
}

impl Connector for FakeDevice {
    type Transport = FakeSession;

    async fn connect(
        &self,
        target: &SshTarget,
        credential: &DecryptedCredential,
    ) -> Result<FakeSession, ProvisionError> {
        let mut state = self.state();
        let refused = |reason: &str| ProvisionError::Connect {
            router_id: target.router_id.clone(),
            host: format!("{}:{}", target.host, target.port),
            reason: reason.to_string(),
        };
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(refused("connection refused"));
        }
        let accepted = match credential {
            DecryptedCredential::Password(_) => state.password.as_deref() == Some(credential.expose()),
            DecryptedCredential::PrivateKey(_) => {
                let blob = PrivateKey::from_openssh(credential.expose())
                    .ok()
                    .and_then(|k| k.public_key().to_openssh().ok())
                    .and_then(|line| line.split_whitespace().nth(1).map(str::to_string));
                let refused_owner = |owner: &str| {
                    state
                        .refuse_owner_prefix
                        .as_deref()
                        .is_some_and(|prefix| owner.starts_with(prefix))
                };
                blob.is_some_and(|blob| {
                    state.items.iter().any(|i| {
                        i.path == "/user ssh-keys"
                            && i.prop("user") == target.username
                            && i.prop("key") == blob
                            && !refused_owner(i.prop("key-owner"))
                    })
                })
            }
        };
        if !accepted {
            state.failed_logins += 1;
            return Err(refused("authentication failed"));
        }
        state.logins.push(credential.kind());
        Ok(FakeSession {
            state: self.state.clone(),
            user: target.username.clone(),
            open: true,
        })
    }
}

impl Transport for FakeSession {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput, ProvisionError> {
        if !self.open {
            return Err(ProvisionError::SessionClosed("fake".to_string()));
        }
        let mut state = self.state.lock().expect("device state");
        state.log.push(command.to_string());
        if let Some(pos) = state.severs.iter().position(|n| command.contains(n.as_str())) {
            state.severs.remove(pos);
            self.open = false;
            return Err(ProvisionError::SessionClosed("connection reset".to_string()));
        }
        let stdout = match run(&mut state, &self.user, command) {
            Ok(out) => out,
            Err(reason) => format!("failure: {reason}\n"),
        };
        Ok(CommandOutput::ok(stdout))
    }

    fn is_connected(&self) -> bool {
        self.open
    }

    async fn close(&mut self) {
        self.open = false;
    }
}

fn run(state: &mut DeviceState, user: &str, command: &str) -> Result<String, String> {
    let command = command.trim();
    if let Some(fault) = state.faults.iter_mut().find(|f| f.1 > 0 && command.contains(f.0.as_str())) {
        fault.1 -= 1;
        return Err("injected fault".to_string());
    }

    if let Some(inner) = command.strip_prefix(":do { ").and_then(|c| c.strip_suffix(" } on-error={}")) {
        let _ = run(state, user, inner);
        return Ok(String::new());
    }
    if command.starts_with(':') {
        return Ok(String::new());
    }
    if command == "/system identity print" {
        return Ok(format!("  name: {}\n", state.identity));
    }
    if command == "/export" {
        return Ok(state.export.clone());
    }
    if let Some(rest) = command.strip_prefix("/import file-name=") {
        let name = first_quoted(rest).ok_or("missing file name")?;
        let content = state.files.get(&name).cloned().ok_or("no such file")?;
        for line in commands_from_text(&content) {
            run(state, user, &line)?;
        }
        return Ok("Script file loaded and executed successfully\n".to_string());
    }
    if let Some(rest) = command.strip_prefix("/file add ") {
        let name = first_quoted(rest).ok_or("missing file name")?;
        state.files.insert(name, String::new());
        return Ok(String::new());
    }
    if command.starts_with("/file set [find where name=") {
        let name = first_quoted(command).ok_or("missing file name")?;
        let start = command.rfind(". \"").ok_or("missing chunk")? + 3;
        let chunk = command[start..].strip_suffix("\")").ok_or("missing chunk end")?;
        let chunk = unescape(chunk).map_err(|e| e.to_string())?;
        state.files.get_mut(&name).ok_or("no such item")?.push_str(&chunk);
        return Ok(String::new());
    }
    if let Some(rest) = command.strip_prefix("/user ssh-keys import ") {
        let values = all_quoted(rest);
        let [file, owner_user] = values.as_slice() else {
            return Err("expected file and user".to_string());
        };
        let content = state.files.get(file).cloned().ok_or("no such file")?;
        let mut parts = content.split_whitespace();
        let (_, blob) = (parts.next(), parts.next().ok_or("bad key file")?);
        let comment = parts.collect::<Vec<_>>().join(" ");
        state.items.push(ssh_key_item(owner_user, &comment, blob));
        return Ok(String::new());
    }
    if let Some((path, conds)) = command.split_once(" print count-only where ") {
        let count = state.items.iter().filter(|i| i.path == path && matches_all(i, conds)).count();
        return Ok(format!("{count}\n"));
    }
    if let Some(selector) = command.strip_prefix("/file remove ") {
        let name = first_quoted(selector).ok_or("missing file name")?;
        state.files.remove(&name);
        return Ok(String::new());
    }
    if let Some((path, selector)) = command.split_once(" remove ") {
        let path = path.to_string();
        let conds = selector.to_string();
        state.items.retain(|i| !(i.path == path && matches_all(i, &conds)));
        return Ok(String::new());
    }
    if let Some((path, props)) = command.split_once(" add ") {
        state.items.push(Item {
            path: path.to_string(),
            props: parse_props(props),
        });
        return Ok(String::new());
    }
    Ok(String::new())
}

fn first_quoted(text: &str) -> Option<String> {
    all_quoted(text).into_iter().next()
}

fn all_quoted(text: &str) -> Vec<String> {
    QUOTED
        .captures_iter(text)
        .filter_map(|c| unescape(&c[1]).ok())
        .collect()
}

fn matches_all(item: &Item, conds: &str) -> bool {
    CONDITION.captures_iter(conds).all(|c| {
        let actual = item.prop(&c[1]);
        let expected = unescape(&c[3]).unwrap_or_default();
        match &c[2] {
            "=" => actual == expected,
            "!=" => actual != expected,
            _ => Regex::new(&expected).is_ok_and(|re| re.is_match(actual)),
        }
    })
}

fn parse_props(text: &str) -> HashMap<String, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' if quoted => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ' ' if !quoted => tokens.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    tokens.push(current);
    tokens
        .into_iter()
        .filter_map(|t| {
            let (k, v) = t.split_once('=')?;
            let v = match v.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
                Some(inner) => unescape(inner).unwrap_or_else(|_| inner.to_string()),
                None => v.to_string(),
            };
            Some((k.to_string(), v))
        })
        .collect()
}

pub fn vault() -> Arc<CredentialVault> {
    Arc::new(CredentialVault::new([7u8; 32]))
}

/// Router `id` that logs in with [`PASSWORD`].
pub fn password_router(vault: &CredentialVault, id: &str) -> Router {
    let mut router = Router::new(id, "192.168.88.1", "rosprov");
    router.password = Some(vault.encrypt(PASSWORD).expect("encrypt"));
    router
}
