//! Command trees synthesized from app config
//!
//! Declarative apps list `path spec -> function` pairs under `commands`;
//! older apps expose every public function through a single legacy root.

mod argument;
mod permission;
mod surface;
mod synth;
mod token;
mod tree;

pub use argument::{ArgReader, ArgumentError, ArgumentRegistry, ArgumentType, BuiltinType, CustomArgument};
pub use permission::{allow_all, CommandValidator, PermissionGate, PermissionRule};
pub use surface::{CommandRegistration, CommandSurface};
pub use synth::{synthesize, CommandSpecEntry, FunctionSpec};
pub use token::{compare_paths, parse_spec, spec_from_signature, CommandToken};
pub use tree::{CommandAction, CommandNode, CommandTree, DispatchError, Route};

use thiserror::Error;

/// Name of the greedy text argument on legacy function literals
pub const LEGACY_ARGS: &str = "args...";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandBuildError {
    #[error("invalid command path '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("function {function} takes {expected} arguments but command '{spec}' provides {found}")]
    Arity {
        spec: String,
        function: String,
        expected: usize,
        found: usize,
    },

    #[error("Conflicting commands: '{first}' and '{second}' use different argument names at the same position")]
    Conflict { first: String, second: String },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("invalid function spec: {0}")]
    InvalidFunctionSpec(String),

    #[error("{0}")]
    InvalidConfig(String),

    #[error("invalid command permission: {0}")]
    InvalidPermission(String),

    #[error("invalid argument type '{name}': {reason}")]
    InvalidArgumentType { name: String, reason: String },

    #[error("command path '{0}' is declared twice")]
    DuplicatePath(String),
}
