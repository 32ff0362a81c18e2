use std::collections::BTreeMap;

use crate::evaluator::FunctionRef;
use crate::value::Value;
use crate::version::VersionPredicate;

/// Instancing scope of an app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// One child host per player
    #[default]
    Player,
    /// A single shared host
    Global,
}

/// What an app needs before it may load
#[derive(Debug, Clone)]
pub enum Requirements {
    /// Dependency id to version predicate
    Versions(BTreeMap<String, VersionPredicate>),
    /// Zero-argument callback; a truthy result aborts the load with that
    /// result as the reason
    Callback(FunctionRef),
}

/// Typed form of the map returned by `__config`
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub scope: Scope,
    pub stay_loaded: bool,
    pub strict: bool,
    /// Higher runs first when several apps handle one event
    pub event_priority: f64,
    pub requires: Option<Requirements>,
    /// Only honoured for apps loaded from a store source
    pub resources: Option<Value>,
    pub libraries: Option<Value>,
    /// Custom argument type specs
    pub arguments: Option<Value>,
    /// Presence selects declarative command mode
    pub commands: Option<Value>,
    pub command_permission: Option<Value>,
    pub allow_command_conflicts: bool,
    pub legacy_command_type_support: bool,
    /// Keys the host does not interpret
    pub extra: BTreeMap<String, Value>,
}

fn default_stay_loaded() -> bool {
    true
}

fn default_event_priority() -> f64 {
    0.0
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scope: Scope::default(),
            stay_loaded: default_stay_loaded(),
            strict: false,
            event_priority: default_event_priority(),
            requires: None,
            resources: None,
            libraries: None,
            arguments: None,
            commands: None,
            command_permission: None,
            allow_command_conflicts: false,
            legacy_command_type_support: false,
            extra: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Parse a config map. Missing keys keep their defaults.
    pub fn from_map(map: &BTreeMap<String, Value>) -> Result<Self, String> {
        let mut config = AppConfig::default();
        for (key, value) in map {
            match key.as_str() {
                "scope" => {
                    config.scope = if value.display_string().eq_ignore_ascii_case("player") {
                        Scope::Player
                    } else {
                        Scope::Global
                    };
                }
                "stay_loaded" => config.stay_loaded = value.truthy(),
                "strict" => config.strict = value.truthy(),
                "event_priority" => {
                    config.event_priority = value
                        .as_number()
                        .ok_or_else(|| format!("event_priority should be a number, got {}", value.type_tag()))?;
                }
                "requires" => config.requires = parse_requirements(value)?,
                "resources" => config.resources = Some(value.clone()),
                "libraries" => config.libraries = Some(value.clone()),
                "arguments" => config.arguments = Some(value.clone()),
                "commands" => config.commands = Some(value.clone()),
                "command_permission" => config.command_permission = Some(value.clone()),
                "allow_command_conflicts" => config.allow_command_conflicts = value.truthy(),
                "legacy_command_type_support" => config.legacy_command_type_support = value.truthy(),
                _ => {
                    config.extra.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(config)
    }

    pub fn is_per_user(&self) -> bool {
        self.scope == Scope::Player
    }
}

fn parse_requirements(value: &Value) -> Result<Option<Requirements>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Function(f) => Ok(Some(Requirements::Callback(f.clone()))),
        Value::Map(map) => {
            let mut versions = BTreeMap::new();
            for (id, predicate) in map {
                let predicate = VersionPredicate::parse(&predicate.display_string())
                    .map_err(|e| format!("requirement on '{}': {}", id, e))?;
                versions.insert(id.clone(), predicate);
            }
            Ok(Some(Requirements::Versions(versions)))
        }
        other => Err(format!(
            "`requires` should be a map of dependencies or a function, got {}",
            other.type_tag()
        )),
    }
}
