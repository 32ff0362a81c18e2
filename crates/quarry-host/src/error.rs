use thiserror::Error;

use crate::command::{CommandBuildError, DispatchError};
use crate::evaluator::{EvalError, EvalErrorKind};
use crate::legacy::LegacyTokenError;

/// Errors crossing a host entry point
#[derive(Debug, Error)]
pub enum HostError {
    #[error("failed to load app '{app}': {reason}")]
    Load { app: String, reason: String },

    /// The table lists each parameter against the argument it received
    #[error("stored function {function} takes {expected} arguments, not {found}:\n{table}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
        table: String,
    },

    #[error("function {function} is not part of app '{app}'")]
    Integrity { function: String, app: String },

    #[error("callback {function} cannot take {found} arguments")]
    InvalidCallback { function: String, found: usize },

    #[error("apps are paused")]
    Paused,

    #[error("{0}")]
    Evaluation(EvalError),

    #[error("{0}")]
    Recursion(EvalError),

    #[error("couldn't find function '{function}' in app '{app}'")]
    UnknownFunction { function: String, app: String },

    #[error("app '{app}' needs a player to run commands")]
    NoPlayerContext { app: String },

    #[error("no app named '{0}' is loaded")]
    UnknownApp(String),

    #[error("invalid app config: {0}")]
    Config(String),

    #[error(transparent)]
    LegacyArguments(#[from] LegacyTokenError),

    #[error(transparent)]
    CommandBuild(#[from] CommandBuildError),

    #[error("persistence failure for '{app}': {source:#}")]
    Persistence {
        app: String,
        #[source]
        source: anyhow::Error,
    },
}

impl HostError {
    /// Classify an evaluator failure
    pub fn from_eval(err: EvalError) -> Self {
        match err.kind {
            EvalErrorKind::StackOverflow => HostError::Recursion(err),
            _ => HostError::Evaluation(err),
        }
    }

    /// The evaluator failure behind this error, if any
    pub fn eval_error(&self) -> Option<&EvalError> {
        match self {
            HostError::Evaluation(err) | HostError::Recursion(err) => Some(err),
            _ => None,
        }
    }

    /// Report headline for this error, falling back to `default`
    pub fn intro<'a>(&self, default: &'a str) -> &'a str {
        match self {
            HostError::Recursion(_) => "Recursion went too deep",
            HostError::Evaluation(err) if err.kind == EvalErrorKind::Arithmetic => {
                "Arithmetic failed"
            }
            _ => default,
        }
    }
}

/// Errors from running a command line through the registry
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("you do not have permission to run /{0}")]
    PermissionDenied(String),

    #[error("commands can only run on the simulation thread")]
    OffThread,

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Host(#[from] HostError),
}

pub type Result<T, E = HostError> = std::result::Result<T, E>;
