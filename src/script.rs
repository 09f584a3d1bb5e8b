//! Typed RouterOS script builder.
//!
//! Generators never concatenate command strings. They push [`Statement`]
//! values onto a [`Script`], which renders them to text at the end. Every
//! statement renders to exactly one line, so a rendered script can be pushed
//! inline (one command per line) or uploaded and `/import`ed unchanged.
//!
//! The idempotency primitive is [`Script::replace`]: a guarded
//! "find and remove" for the object's identity followed by the `add`. Running
//! the same script twice converges on the same device state.

use std::fmt::Write as _;

use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;

/// Values that can be written without quotes.
static BARE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._:/,+@*-]+$").expect("valid bare token regex"));

static INTERFACE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._-]{1,64}$").expect("valid interface regex"));

static ROUTER_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,48}$").expect("valid router id regex"));

/// Escapes a value for use inside a RouterOS double-quoted string.
///
/// Quotes, backslashes, `$` (variable expansion) and `?` (console help) are
/// backslash escaped; line breaks and tabs become `\r`, `\n`, `\t`; any other
/// control character becomes a `\XX` hex escape.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\$"),
            '?' => out.push_str("\\?"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() && (c as u32) < 0x100 => {
                let _ = write!(out, "\\{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Reverses [`escape`] the way the RouterOS parser reads a quoted string.
pub fn unescape(value: &str) -> Result<String, ProvisionError> {
    let invalid = |reason: &str| ProvisionError::InvalidConfiguration(format!("{reason} in '{value}'"));
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            if c == '"' {
                return Err(invalid("unescaped quote"));
            }
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(h1) if h1.is_ascii_hexdigit() && h1.is_ascii_uppercase() || h1.is_ascii_digit() => {
                let h2 = chars.next().ok_or_else(|| invalid("truncated hex escape"))?;
                let code = u32::from_str_radix(&format!("{h1}{h2}"), 16)
                    .map_err(|_| invalid("bad hex escape"))?;
                out.push(char::from_u32(code).ok_or_else(|| invalid("bad hex escape"))?);
            }
            Some(other) => out.push(other),
            None => return Err(invalid("dangling backslash")),
        }
    }
    Ok(out)
}

/// Always quotes.
pub fn quote(value: &str) -> String {
    format!("\"{}\"", escape(value))
}

/// Renders a property value, quoting only when needed.
pub fn value(raw: &str) -> String {
    if BARE_TOKEN.is_match(raw) {
        raw.to_string()
    } else {
        quote(raw)
    }
}

/// Checks an interface name before it is embedded in a script.
pub fn validate_interface(name: &str) -> Result<&str, ProvisionError> {
    if INTERFACE_NAME.is_match(name) {
        Ok(name)
    } else {
        Err(ProvisionError::InvalidInterface(name.to_string()))
    }
}

pub fn validate_router_id(id: &str) -> Result<&str, ProvisionError> {
    if ROUTER_ID.is_match(id) {
        Ok(id)
    } else {
        Err(ProvisionError::InvalidRouterId(id.to_string()))
    }
}

/// Deterministic object name: `<role>-<router_id>[-<index>]`.
pub fn object_name(role: &str, router_id: &str, index: Option<usize>) -> String {
    match index {
        Some(i) => format!("{role}-{router_id}-{i}"),
        None => format!("{role}-{router_id}"),
    }
}

/// One `key=value` argument list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Props(Vec<(String, String)>);

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `key=value`, quoting the value if needed.
    pub fn set(mut self, key: &str, raw: impl AsRef<str>) -> Self {
        self.0.push((key.to_string(), value(raw.as_ref())));
        self
    }

    /// Adds `key=value` only when `raw` is present.
    pub fn set_opt(self, key: &str, raw: Option<impl AsRef<str>>) -> Self {
        match raw {
            Some(raw) => self.set(key, raw),
            None => self,
        }
    }

    /// Adds `key="value"`, always quoted.
    pub fn quoted(mut self, key: &str, raw: impl AsRef<str>) -> Self {
        self.0.push((key.to_string(), quote(raw.as_ref())));
        self
    }

    /// Adds `key=!value` (RouterOS negation).
    pub fn not(mut self, key: &str, raw: impl AsRef<str>) -> Self {
        self.0.push((key.to_string(), format!("!{}", value(raw.as_ref()))));
        self
    }

    /// Unquoted value of `key`, if it was set.
    pub fn get(&self, key: &str) -> Option<String> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| strip_quotes(v))
    }

    fn render(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn strip_quotes(v: &str) -> String {
    match v.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => unescape(inner).unwrap_or_else(|_| inner.to_string()),
        None => v.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Cond {
    Eq(String, String),
    Ne(String, String),
    Matches(String, String),
}

/// A `[find ...]` expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector(Vec<Cond>);

impl Selector {
    /// Matches every item of the menu.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(key: &str, raw: impl AsRef<str>) -> Self {
        Self::all().and_eq(key, raw)
    }

    /// Regex match, `key~"pattern"`.
    pub fn matches(key: &str, pattern: impl AsRef<str>) -> Self {
        Self(vec![Cond::Matches(key.to_string(), pattern.as_ref().to_string())])
    }

    pub fn and_eq(mut self, key: &str, raw: impl AsRef<str>) -> Self {
        self.0.push(Cond::Eq(key.to_string(), raw.as_ref().to_string()));
        self
    }

    pub fn and_ne(mut self, key: &str, raw: impl AsRef<str>) -> Self {
        self.0.push(Cond::Ne(key.to_string(), raw.as_ref().to_string()));
        self
    }

    /// The value this selector requires for `key`, if it is an equality.
    pub fn value_of(&self, key: &str) -> Option<&str> {
        self.0.iter().find_map(|c| match c {
            Cond::Eq(k, v) if k == key => Some(v.as_str()),
            _ => None,
        })
    }

    /// Renders `[<path> find ...]` when `path` is set, `[find ...]` otherwise.
    fn render(&self, path: Option<&str>) -> String {
        let prefix = match path {
            Some(path) => format!("[{path} find"),
            None => "[find".to_string(),
        };
        if self.0.is_empty() {
            return format!("{prefix}]");
        }
        format!("{prefix} where {}]", self.conditions())
    }

    /// `[find where ...]` for use after a menu path.
    pub fn render_find(&self) -> String {
        self.render(None)
    }

    /// The `where` clause body, e.g. `user="admin" and key-owner!="x"`.
    pub fn conditions(&self) -> String {
        self.0
            .iter()
            .map(|c| match c {
                Cond::Eq(k, v) => format!("{k}={}", quote(v)),
                Cond::Ne(k, v) => format!("{k}!={}", quote(v)),
                Cond::Matches(k, p) => format!("{k}~{}", quote(p)),
            })
            .collect::<Vec<_>>()
            .join(" and ")
    }
}

/// What a `set` statement targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Menus without items, e.g. `/ip dns set ...`.
    Menu,
    /// A named built-in item, e.g. `/ip service set telnet ...`.
    Item(String),
    Find(Selector),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// A single RouterOS statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Comment(String),
    Blank,
    Log { level: LogLevel, message: String },
    /// Guarded removal; absence of the object is not an error.
    Remove {
        path: &'static str,
        selector: Selector,
    },
    Add { path: &'static str, props: Props },
    Set {
        path: &'static str,
        target: Target,
        props: Props,
    },
    /// Adds the item when `selector` finds nothing, otherwise updates it.
    Ensure {
        path: &'static str,
        selector: Selector,
        props: Props,
    },
    /// Runs the inner statement, ignoring any error it raises.
    Attempt(Box<Statement>),
}

impl Statement {
    /// Renders the statement as one script line.
    pub fn render(&self) -> String {
        match self {
            Self::Comment(text) => format!("# {}", text.replace(['\r', '\n'], " ")),
            Self::Blank => String::new(),
            Self::Log { level, message } => format!(":log {} {}", level.as_str(), quote(message)),
            Self::Remove { path, selector } => {
                format!(":do {{ {path} remove {} }} on-error={{}}", selector.render(None))
            }
            Self::Add { path, props } => format!("{path} add {}", props.render()),
            Self::Set {
                path,
                target,
                props,
            } => {
                let target = match target {
                    Target::Menu => String::new(),
                    Target::Item(item) => format!("{} ", value(item)),
                    Target::Find(selector) => format!("{} ", selector.render(None)),
                };
                format!("{path} set {target}{}", props.render())
            }
            Self::Ensure {
                path,
                selector,
                props,
            } => format!(
                ":if ([:len {}] = 0) do={{ {path} add {} }} else={{ {path} set {} {} }}",
                selector.render(Some(path)),
                props.render(),
                selector.render(None),
                props.render()
            ),
            Self::Attempt(inner) => format!(":do {{ {} }} on-error={{}}", inner.render()),
        }
    }

    /// Whether the statement is sent to the device.
    pub fn is_command(&self) -> bool {
        !matches!(self, Self::Comment(_) | Self::Blank)
    }

    /// `(key, name)` identifying the object an `add` creates.
    pub fn identity(&self) -> Option<(&'static str, String)> {
        match self {
            Self::Add { props, .. } => IDENTITY_KEYS
                .iter()
                .find_map(|key| props.get(key).map(|name| (*key, name))),
            _ => None,
        }
    }
}

const IDENTITY_KEYS: &[&str] = &["name", "service-name"];

/// A named object a script creates, used to verify a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ObjectRef {
    pub path: String,
    pub key: String,
    pub name: String,
}

impl ObjectRef {
    /// Command printing how many items match this object on the device.
    pub fn count_command(&self) -> String {
        format!("{} print count-only where {}={}", self.path, self.key, quote(&self.name))
    }
}

/// An ordered list of statements for one router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    title: String,
    router_id: String,
    statements: Vec<Statement>,
}

impl Script {
    pub fn new(title: impl Into<String>, router_id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            router_id: router_id.into(),
            statements: Vec::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn router_id(&self) -> &str {
        &self.router_id
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn push(&mut self, statement: Statement) -> &mut Self {
        self.statements.push(statement);
        self
    }

    pub fn comment(&mut self, text: impl Into<String>) -> &mut Self {
        self.push(Statement::Comment(text.into()))
    }

    /// Starts a titled section.
    pub fn section(&mut self, name: &str) -> &mut Self {
        self.push(Statement::Blank);
        self.push(Statement::Comment(format!("--- {name} ---")))
    }

    pub fn log(&mut self, level: LogLevel, message: impl Into<String>) -> &mut Self {
        self.push(Statement::Log {
            level,
            message: message.into(),
        })
    }

    /// Removes whatever `selector` finds, ignoring absence.
    pub fn sweep(&mut self, path: &'static str, selector: Selector) -> &mut Self {
        self.push(Statement::Remove { path, selector })
    }

    pub fn add(&mut self, path: &'static str, props: Props) -> &mut Self {
        self.push(Statement::Add { path, props })
    }

    /// Removes the object identified by `name`/`service-name` (or, failing
    /// that, `comment`) and adds it again.
    pub fn replace(&mut self, path: &'static str, props: Props) -> &mut Self {
        let key = IDENTITY_KEYS
            .iter()
            .copied()
            .find(|key| props.get(key).is_some())
            .unwrap_or("comment");
        self.replace_by(path, key, props)
    }

    /// Removes the object whose `key` equals the value in `props`, then adds it.
    pub fn replace_by(&mut self, path: &'static str, key: &str, props: Props) -> &mut Self {
        let selector = match props.get(key) {
            Some(v) => Selector::eq(key, v),
            None => Selector::eq(key, ""),
        };
        self.sweep(path, selector);
        self.add(path, props)
    }

    pub fn set(&mut self, path: &'static str, target: Target, props: Props) -> &mut Self {
        self.push(Statement::Set {
            path,
            target,
            props,
        })
    }

    pub fn ensure(&mut self, path: &'static str, selector: Selector, props: Props) -> &mut Self {
        self.push(Statement::Ensure {
            path,
            selector,
            props,
        })
    }

    /// Wraps `statement` so a device error does not stop the script.
    pub fn attempt(&mut self, statement: Statement) -> &mut Self {
        self.push(Statement::Attempt(Box::new(statement)))
    }

    /// Appends another script's statements.
    pub fn extend(&mut self, other: Script) -> &mut Self {
        self.push(Statement::Blank);
        self.push(Statement::Comment(format!("=== {} ===", other.title)));
        self.statements.extend(other.statements);
        self
    }

    /// Executable lines, in order.
    pub fn commands(&self) -> Vec<String> {
        self.statements
            .iter()
            .filter(|s| s.is_command())
            .map(Statement::render)
            .collect()
    }

    /// Objects the script creates by name.
    pub fn created_objects(&self) -> Vec<ObjectRef> {
        self.statements
            .iter()
            .filter_map(|s| match s {
                Statement::Add { path, .. } => s.identity().map(|(key, name)| ObjectRef {
                    path: path.to_string(),
                    key: key.to_string(),
                    name,
                }),
                _ => None,
            })
            .collect()
    }

    /// Full script text with header.
    pub fn render(&self) -> String {
        let rule = "# ".to_string() + &"=".repeat(48);
        let mut out = String::new();
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "# {}", self.title);
        let _ = writeln!(out, "# Router: {}", self.router_id);
        let _ = writeln!(out, "{rule}");
        for statement in &self.statements {
            let _ = writeln!(out, "{}", statement.render());
        }
        let _ = writeln!(out, "# end of {}", self.title);
        out
    }
}

/// Executable lines of a rendered script: everything except blanks and comments.
pub fn commands_from_text(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
