//! Console commands and CVars.
//!
//! Every command and CVar carries [`ConsoleFlags`]. Before anything runs,
//! the console checks them against the [`ConsolePolicy`] and the
//! [`CommandSource`] of the request:
//!
//! | Flag        | Denied when                                            |
//! |-------------|--------------------------------------------------------|
//! | `DEV_ONLY`  | shipping build                                         |
//! | `CHEAT`     | remote source, or shipping build without cheats        |
//! | `READ_ONLY` | any write not coming from [`CommandSource::Config`]    |
//!
//! CVars flagged `ARCHIVE` are saved to and restored from a TOML file.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::Path;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ConsoleFlags: u32 {
        /// Unavailable in shipping builds.
        const DEV_ONLY = 1 << 0;
        /// Changes gameplay; never accepted from remote sources.
        const CHEAT = 1 << 1;
        /// Persisted by [`Console::save_archive`].
        const ARCHIVE = 1 << 2;
        /// Only configuration may write it.
        const READ_ONLY = 1 << 3;
    }
}

/// Where a console request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandSource {
    LocalConsole,
    Remote,
    Config,
}

/// Build-wide console restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConsolePolicy {
    pub shipping_build: bool,
    pub allow_cheats: bool,
}

/// Typed CVar value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CVarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl CVarValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Parses `text` as a value of the same type as `self`.
    pub fn parse_like(&self, text: &str) -> Option<CVarValue> {
        match self {
            Self::Bool(_) => match text.to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => Some(Self::Bool(true)),
                "0" | "false" | "off" | "no" => Some(Self::Bool(false)),
                _ => None,
            },
            Self::Int(_) => text.parse().ok().map(Self::Int),
            Self::Float(_) => text.parse().ok().map(Self::Float),
            Self::String(_) => Some(Self::String(text.to_string())),
        }
    }

    /// Converts `other` to the type of `self`; ints widen to floats.
    fn coerce_like(&self, other: CVarValue) -> Option<CVarValue> {
        match (self, other) {
            (Self::Bool(_), v @ Self::Bool(_))
            | (Self::Int(_), v @ Self::Int(_))
            | (Self::Float(_), v @ Self::Float(_))
            | (Self::String(_), v @ Self::String(_)) => Some(v),
            (Self::Float(_), Self::Int(v)) => Some(Self::Float(v as f64)),
            _ => None,
        }
    }
}

impl fmt::Display for CVarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "\"{v}\""),
        }
    }
}

/// Declaration of a CVar passed to [`Console::register_cvar`].
#[derive(Debug, Clone, PartialEq)]
pub struct CVarDefinition {
    pub name: String,
    pub help: String,
    pub default: CVarValue,
    pub flags: ConsoleFlags,
    /// Inclusive numeric range; ignored for bool and string values.
    pub range: Option<(f64, f64)>,
}

impl CVarDefinition {
    pub fn new(name: impl Into<String>, default: CVarValue) -> Self {
        Self {
            name: name.into(),
            help: String::new(),
            default,
            flags: ConsoleFlags::empty(),
            range: None,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn with_flags(mut self, flags: ConsoleFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    fn clamp(&self, value: CVarValue) -> CVarValue {
        let Some((min, max)) = self.range else {
            return value;
        };
        match value {
            CVarValue::Int(v) => CVarValue::Int(v.clamp(min.ceil() as i64, max.floor() as i64)),
            CVarValue::Float(v) => CVarValue::Float(v.clamp(min, max)),
            other => other,
        }
    }
}

/// Handler of a console command; receives the arguments after the name.
pub type CommandHandler = Box<dyn Fn(&[&str]) -> Result<String, String> + Send + Sync>;

struct Command {
    help: String,
    flags: ConsoleFlags,
    handler: CommandHandler,
}

struct CVar {
    definition: CVarDefinition,
    value: CVarValue,
}

/// Registry of commands and CVars with execution history.
pub struct Console {
    policy: ConsolePolicy,
    commands: BTreeMap<String, Command>,
    cvars: BTreeMap<String, CVar>,
    history: VecDeque<String>,
    history_limit: usize,
}

impl Default for Console {
    fn default() -> Self {
        Self::new(ConsolePolicy::default())
    }
}

impl Console {
    pub const DEFAULT_HISTORY: usize = 64;

    pub fn new(policy: ConsolePolicy) -> Self {
        Self {
            policy,
            commands: BTreeMap::new(),
            cvars: BTreeMap::new(),
            history: VecDeque::new(),
            history_limit: Self::DEFAULT_HISTORY,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn policy(&self) -> ConsolePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: ConsolePolicy) {
        self.policy = policy;
    }

    pub fn register_command(
        &mut self,
        name: impl Into<String>,
        help: impl Into<String>,
        flags: ConsoleFlags,
        handler: impl Fn(&[&str]) -> Result<String, String> + Send + Sync + 'static,
    ) -> Result<(), EngineError> {
        let name = name.into();
        self.check_name_free(&name)?;
        log::debug!("Console: registered command '{name}'");
        self.commands.insert(
            name,
            Command {
                help: help.into(),
                flags,
                handler: Box::new(handler),
            },
        );
        Ok(())
    }

    pub fn register_cvar(&mut self, definition: CVarDefinition) -> Result<(), EngineError> {
        self.check_name_free(&definition.name)?;
        let value = definition.clamp(definition.default.clone());
        log::debug!("Console: registered cvar '{}' = {value}", definition.name);
        self.cvars.insert(definition.name.clone(), CVar { definition, value });
        Ok(())
    }

    fn check_name_free(&self, name: &str) -> Result<(), EngineError> {
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(EngineError::InvalidArgument(format!("invalid console name '{name}'")));
        }
        if self.commands.contains_key(name) || self.cvars.contains_key(name) {
            return Err(EngineError::InvalidArgument(format!("'{name}' is already registered")));
        }
        Ok(())
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn cvar(&self, name: &str) -> Option<&CVarValue> {
        self.cvars.get(name).map(|c| &c.value)
    }

    pub fn cvar_float(&self, name: &str) -> Option<f64> {
        self.cvar(name).and_then(CVarValue::as_float)
    }

    pub fn cvar_bool(&self, name: &str) -> Option<bool> {
        self.cvar(name).and_then(CVarValue::as_bool)
    }

    /// Help text of a command or CVar.
    pub fn help(&self, name: &str) -> Option<&str> {
        self.commands
            .get(name)
            .map(|c| c.help.as_str())
            .or_else(|| self.cvars.get(name).map(|c| c.definition.help.as_str()))
    }

    /// Registered names starting with `prefix`, sorted.
    pub fn complete(&self, prefix: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .commands
            .keys()
            .chain(self.cvars.keys())
            .filter(|n| n.starts_with(prefix))
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    /// Executed lines, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    /// Writes a CVar, returning the value stored after clamping.
    pub fn set_cvar(&mut self, name: &str, value: CVarValue, source: CommandSource) -> Result<CVarValue, EngineError> {
        let policy = self.policy;
        let cvar = self
            .cvars
            .get_mut(name)
            .ok_or_else(|| EngineError::NotFound(format!("cvar '{name}'")))?;
        check_policy(policy, name, cvar.definition.flags, source)?;
        if cvar.definition.flags.contains(ConsoleFlags::READ_ONLY) && source != CommandSource::Config {
            return Err(EngineError::Denied(format!("cvar '{name}' is read-only")));
        }
        let expected = cvar.value.type_name();
        let given = value.type_name();
        let value = cvar.value.coerce_like(value).ok_or_else(|| {
            EngineError::InvalidArgument(format!("cvar '{name}' expects {expected}, got {given}"))
        })?;
        cvar.value = cvar.definition.clamp(value);
        log::debug!("Console: {name} = {} ({source:?})", cvar.value);
        Ok(cvar.value.clone())
    }

    /// Runs one console line: `command args...`, `cvar` or `cvar value`.
    pub fn execute(&mut self, line: &str, source: CommandSource) -> Result<String, EngineError> {
        let tokens = tokenize(line);
        let Some((&name, args)) = tokens.split_first() else {
            return Err(EngineError::InvalidArgument("empty console line".to_string()));
        };
        self.record_history(line);

        if let Some(command) = self.commands.get(name) {
            check_policy(self.policy, name, command.flags, source)?;
            return (command.handler)(args).map_err(|msg| {
                log::warn!("Console: command '{name}' failed: {msg}");
                EngineError::InvalidArgument(format!("{name}: {msg}"))
            });
        }

        let Some(cvar) = self.cvars.get(name) else {
            return Err(EngineError::NotFound(format!("command or cvar '{name}'")));
        };
        match args {
            [] => {
                check_policy(self.policy, name, cvar.definition.flags, source)?;
                Ok(format!("{name} = {}", cvar.value))
            }
            [text] => {
                let value = cvar.value.parse_like(text).ok_or_else(|| {
                    EngineError::InvalidArgument(format!(
                        "cvar '{name}' expects {}, got '{text}'",
                        cvar.value.type_name()
                    ))
                })?;
                let stored = self.set_cvar(name, value, source)?;
                Ok(format!("{name} = {stored}"))
            }
            _ => Err(EngineError::InvalidArgument(format!(
                "cvar '{name}' takes one value, got {}",
                args.len()
            ))),
        }
    }

    fn record_history(&mut self, line: &str) {
        if self.history_limit == 0 {
            return;
        }
        if self.history.len() == self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(line.trim().to_string());
    }

    /// Writes every `ARCHIVE` CVar to a TOML file. Returns the count saved.
    pub fn save_archive(&self, path: impl AsRef<Path>) -> Result<usize, EngineError> {
        let path = path.as_ref();
        let archived: BTreeMap<&str, &CVarValue> = self
            .cvars
            .iter()
            .filter(|(_, c)| c.definition.flags.contains(ConsoleFlags::ARCHIVE))
            .map(|(name, c)| (name.as_str(), &c.value))
            .collect();
        let text = toml::to_string(&archived).map_err(|e| EngineError::Config(e.to_string()))?;
        std::fs::write(path, text)
            .map_err(|e| EngineError::Io(format!("failed to write {}: {e}", path.display())))?;
        log::info!("Console: archived {} cvars to {}", archived.len(), path.display());
        Ok(archived.len())
    }

    /// Restores archived CVars from a TOML file. Returns the count applied.
    ///
    /// Unknown names and values of the wrong type are skipped with a warning.
    pub fn load_archive(&mut self, path: impl AsRef<Path>) -> Result<usize, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Io(format!("failed to read {}: {e}", path.display())))?;
        let values: BTreeMap<String, CVarValue> =
            toml::from_str(&text).map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        let mut applied = 0;
        for (name, value) in values {
            let archived = self
                .cvars
                .get(&name)
                .is_some_and(|c| c.definition.flags.contains(ConsoleFlags::ARCHIVE));
            if !archived {
                log::warn!("Console: skipping unknown archived cvar '{name}'");
                continue;
            }
            match self.set_cvar(&name, value, CommandSource::Config) {
                Ok(_) => applied += 1,
                Err(err) => log::warn!("Console: skipping archived cvar '{name}': {err}"),
            }
        }
        log::info!("Console: restored {applied} cvars from {}", path.display());
        Ok(applied)
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("policy", &self.policy)
            .field("commands", &self.commands.keys().collect::<Vec<_>>())
            .field("cvars", &self.cvars.len())
            .field("history", &self.history.len())
            .finish()
    }
}

fn check_policy(policy: ConsolePolicy, name: &str, flags: ConsoleFlags, source: CommandSource) -> Result<(), EngineError> {
    if flags.contains(ConsoleFlags::DEV_ONLY) && policy.shipping_build {
        return Err(EngineError::Denied(format!("'{name}' is not available in shipping builds")));
    }
    if flags.contains(ConsoleFlags::CHEAT) {
        if source == CommandSource::Remote {
            return Err(EngineError::Denied(format!("cheat '{name}' refused from remote source")));
        }
        if policy.shipping_build && !policy.allow_cheats {
            return Err(EngineError::Denied(format!("cheats are disabled; '{name}' refused")));
        }
    }
    Ok(())
}

/// Splits on whitespace; double quotes group words.
fn tokenize(line: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = line.trim();
    while !rest.is_empty() {
        if let Some(quoted) = rest.strip_prefix('"') {
            let end = quoted.find('"').unwrap_or(quoted.len());
            tokens.push(&quoted[..end]);
            rest = quoted.get(end + 1..).unwrap_or("").trim_start();
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            tokens.push(&rest[..end]);
            rest = rest[end..].trim_start();
        }
    }
    tokens
}

static_assertions::assert_impl_all!(Console: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    fn console(shipping_build: bool) -> Console {
        let mut console = Console::new(ConsolePolicy {
            shipping_build,
            allow_cheats: false,
        });
        console
            .register_command("echo", "prints its arguments", ConsoleFlags::empty(), |args| Ok(args.join(" ")))
            .unwrap();
        console
            .register_command("god", "toggles invulnerability", ConsoleFlags::CHEAT, |_| Ok("god on".into()))
            .unwrap();
        console
            .register_cvar(
                CVarDefinition::new("r.exposure_bias", CVarValue::Float(0.0))
                    .with_flags(ConsoleFlags::ARCHIVE)
                    .with_range(-4.0, 4.0),
            )
            .unwrap();
        console
            .register_cvar(CVarDefinition::new("sys.version", CVarValue::String("1".into())).with_flags(ConsoleFlags::READ_ONLY))
            .unwrap();
        console
    }

    #[test]
    fn test_tokenize_respects_quotes() {
        assert_eq!(tokenize(r#"  say "hello world"  now "#), ["say", "hello world", "now"]);
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_cvar_set_parses_and_clamps() {
        let mut console = console(false);
        assert_eq!(
            console.execute("r.exposure_bias 9", CommandSource::LocalConsole).unwrap(),
            "r.exposure_bias = 4"
        );
        assert_eq!(console.cvar_float("r.exposure_bias"), Some(4.0));
        let err = console.execute("r.exposure_bias bright", CommandSource::LocalConsole).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }

    #[test]
    fn test_read_only_only_accepts_config() {
        let mut console = console(false);
        let err = console.execute("sys.version 2", CommandSource::LocalConsole).unwrap_err();
        assert!(matches!(err, EngineError::Denied(_)));
        console
            .set_cvar("sys.version", CVarValue::String("2".into()), CommandSource::Config)
            .unwrap();
        assert_eq!(console.cvar("sys.version").and_then(CVarValue::as_str), Some("2"));
    }

    #[test]
    fn test_cheats_are_refused_remotely_and_in_shipping() {
        let mut dev = console(false);
        assert!(dev.execute("god", CommandSource::LocalConsole).is_ok());
        assert!(matches!(dev.execute("god", CommandSource::Remote), Err(EngineError::Denied(_))));

        let mut shipping = console(true);
        assert!(matches!(
            shipping.execute("god", CommandSource::LocalConsole),
            Err(EngineError::Denied(_))
        ));
        shipping.set_policy(ConsolePolicy {
            shipping_build: true,
            allow_cheats: true,
        });
        assert!(shipping.execute("god", CommandSource::LocalConsole).is_ok());
    }

    #[test]
    fn test_unknown_names_and_duplicates() {
        let mut console = console(false);
        assert!(matches!(
            console.execute("nope", CommandSource::LocalConsole),
            Err(EngineError::NotFound(_))
        ));
        assert!(console.register_command("echo", "", ConsoleFlags::empty(), |_| Ok(String::new())).is_err());
        assert!(console.register_cvar(CVarDefinition::new("god", CVarValue::Bool(false))).is_err());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut console = console(false).with_history_limit(2);
        for word in ["a", "b", "c"] {
            console.execute(&format!("echo {word}"), CommandSource::LocalConsole).unwrap();
        }
        assert_eq!(console.history().collect::<Vec<_>>(), ["echo b", "echo c"]);
        assert_eq!(console.complete("r."), ["r.exposure_bias"]);
    }
}
