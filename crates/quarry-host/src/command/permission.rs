use std::fmt;
use std::sync::Arc;

use super::CommandBuildError;
use crate::evaluator::FunctionRef;
use crate::principal::Principal;
use crate::value::Value;

/// Externally supplied check run before any app-level rule
pub type CommandValidator = Arc<dyn Fn(&dyn Principal) -> bool + Send + Sync>;

pub fn allow_all() -> CommandValidator {
    Arc::new(|_: &dyn Principal| true)
}

/// The `command_permission` setting of an app
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionRule {
    All,
    /// Permission level 1-4
    Level(u8),
    /// Same as level 2
    Ops,
    /// Anything that is not a player
    Server,
    Players,
    /// One-argument callback given the player, or null
    Callback(FunctionRef),
}

impl PermissionRule {
    pub fn from_config(value: Option<&Value>) -> Result<Self, CommandBuildError> {
        let Some(value) = value else {
            return Ok(PermissionRule::All);
        };
        match value {
            Value::Number(n) => {
                if n.fract() == 0.0 && (1.0..=4.0).contains(n) {
                    Ok(PermissionRule::Level(*n as u8))
                } else {
                    Err(CommandBuildError::InvalidPermission(format!(
                        "level should be between 1 and 4, got {}",
                        value.display_string()
                    )))
                }
            }
            Value::Function(f) => {
                if f.arity() != 1 || f.varargs.is_some() {
                    return Err(CommandBuildError::InvalidPermission(format!(
                        "callback {} should take exactly one argument",
                        f.pretty_name()
                    )));
                }
                Ok(PermissionRule::Callback(f.clone()))
            }
            Value::Str(s) => match s.to_ascii_lowercase().as_str() {
                "all" => Ok(PermissionRule::All),
                "ops" => Ok(PermissionRule::Ops),
                "server" => Ok(PermissionRule::Server),
                "players" => Ok(PermissionRule::Players),
                other => Err(CommandBuildError::InvalidPermission(format!(
                    "unknown role '{}'",
                    other
                ))),
            },
            other => Err(CommandBuildError::InvalidPermission(format!(
                "unsupported {}",
                other.type_tag()
            ))),
        }
    }

    /// Decide without running script code. `None` for callbacks.
    pub fn check(&self, principal: &dyn Principal) -> Option<bool> {
        match self {
            PermissionRule::All => Some(true),
            PermissionRule::Level(level) => Some(principal.has_permission(*level)),
            PermissionRule::Ops => Some(principal.has_permission(2)),
            PermissionRule::Server => Some(!principal.is_player()),
            PermissionRule::Players => Some(principal.is_player()),
            PermissionRule::Callback(_) => None,
        }
    }
}

/// Top-level gate of a command tree
///
/// Safe to query from any thread; callback rules are resolved by the host
/// through the normal invocation path.
#[derive(Clone)]
pub struct PermissionGate {
    validator: CommandValidator,
    rule: PermissionRule,
}

impl PermissionGate {
    pub fn new(validator: CommandValidator, rule: PermissionRule) -> Self {
        Self { validator, rule }
    }

    pub fn rule(&self) -> &PermissionRule {
        &self.rule
    }

    /// The validator and any static rule. `None` means the callback decides.
    pub fn precheck(&self, principal: &dyn Principal) -> Option<bool> {
        if !(self.validator)(principal) {
            return Some(false);
        }
        self.rule.check(principal)
    }
}

impl fmt::Debug for PermissionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionGate")
            .field("rule", &self.rule)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingPrincipal;

    #[test]
    fn test_default_allows_everyone() {
        let gate = PermissionGate::new(allow_all(), PermissionRule::from_config(None).unwrap());
        assert_eq!(gate.precheck(&RecordingPrincipal::player("alex")), Some(true));
        assert_eq!(gate.precheck(&RecordingPrincipal::server()), Some(true));
    }

    #[test]
    fn test_roles_and_levels() {
        let player = RecordingPrincipal::player("alex").with_level(2);
        let server = RecordingPrincipal::server();

        let ops = PermissionRule::from_config(Some(&Value::str("ops"))).unwrap();
        assert_eq!(ops.check(&player), Some(true));

        let level = PermissionRule::from_config(Some(&Value::Number(3.0))).unwrap();
        assert_eq!(level, PermissionRule::Level(3));
        assert_eq!(level.check(&player), Some(false));

        let servers = PermissionRule::from_config(Some(&Value::str("server"))).unwrap();
        assert_eq!(servers.check(&player), Some(false));
        assert_eq!(servers.check(&server), Some(true));

        let players = PermissionRule::from_config(Some(&Value::str("players"))).unwrap();
        assert_eq!(players.check(&player), Some(true));
    }

    #[test]
    fn test_invalid_rules() {
        assert!(PermissionRule::from_config(Some(&Value::Number(5.0))).is_err());
        assert!(PermissionRule::from_config(Some(&Value::Number(1.5))).is_err());
        assert!(PermissionRule::from_config(Some(&Value::str("admins"))).is_err());
        assert!(PermissionRule::from_config(Some(&Value::Bool(true))).is_err());
    }

    #[test]
    fn test_validator_runs_first() {
        let gate = PermissionGate::new(Arc::new(|_: &dyn Principal| false), PermissionRule::All);
        assert_eq!(gate.precheck(&RecordingPrincipal::player("alex")), Some(false));
    }

    #[test]
    fn test_gate_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PermissionGate>();
    }
}
