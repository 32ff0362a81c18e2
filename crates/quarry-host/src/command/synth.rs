use std::cmp::Ordering;

use super::argument::ArgumentRegistry;
use super::token::{compare_paths, render_path, CommandToken};
use super::tree::{CommandAction, CommandNode};
use super::CommandBuildError;
use crate::evaluator::FunctionRef;
use crate::value::Value;

/// Target of a command path: a function plus trailing pre-bound arguments
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    pub function: FunctionRef,
    pub prebound: Vec<Value>,
}

impl FunctionSpec {
    /// Accepts a function name, a function value, or a list whose head is
    /// either and whose tail is pre-bound
    pub fn from_config(
        value: &Value,
        lookup: impl Fn(&str) -> Option<FunctionRef>,
    ) -> Result<Self, CommandBuildError> {
        let resolve = |head: &Value| -> Result<FunctionRef, CommandBuildError> {
            match head {
                Value::Str(name) => {
                    lookup(name).ok_or_else(|| CommandBuildError::UnknownFunction(name.clone()))
                }
                Value::Function(f) => Ok(f.clone()),
                other => Err(CommandBuildError::InvalidFunctionSpec(format!(
                    "expected a function or its name, got {}",
                    other.type_tag()
                ))),
            }
        };
        match value {
            Value::List(items) => {
                let (head, rest) = items.split_first().ok_or_else(|| {
                    CommandBuildError::InvalidFunctionSpec("empty list".to_string())
                })?;
                Ok(FunctionSpec {
                    function: resolve(head)?,
                    prebound: rest.to_vec(),
                })
            }
            other => Ok(FunctionSpec {
                function: resolve(other)?,
                prebound: Vec::new(),
            }),
        }
    }
}

/// One declared command
#[derive(Debug, Clone)]
pub struct CommandSpecEntry {
    pub spec: String,
    pub path: Vec<CommandToken>,
    pub target: FunctionSpec,
}

impl CommandSpecEntry {
    pub fn argument_count(&self) -> usize {
        self.path.iter().filter(|t| t.is_argument()).count()
    }

    fn check_arity(&self) -> Result<(), CommandBuildError> {
        let function = &self.target.function;
        let found = self.argument_count() + self.target.prebound.len();
        if found != function.arity() {
            return Err(CommandBuildError::Arity {
                spec: self.spec.clone(),
                function: function.pretty_name(),
                expected: function.arity(),
                found,
            });
        }
        Ok(())
    }
}

/// Two adjacent entries conflict when they share a prefix and then diverge
/// at a position where both have arguments with different names
fn conflict_between(a: &[CommandToken], b: &[CommandToken]) -> bool {
    for (x, y) in a.iter().zip(b) {
        if x.is_argument() && y.is_argument() && x.surface() != y.surface() {
            return true;
        }
        if x != y {
            return false;
        }
    }
    false
}

/// Build the dispatch trie for declared commands. The whole set is rejected
/// on the first problem.
pub fn synthesize(
    mut entries: Vec<CommandSpecEntry>,
    types: &ArgumentRegistry,
    allow_conflicts: bool,
) -> Result<CommandNode, CommandBuildError> {
    for entry in &entries {
        entry.check_arity()?;
    }

    entries.sort_by(|a, b| match compare_paths(&a.path, &b.path) {
        Ordering::Equal => a.spec.cmp(&b.spec),
        other => other,
    });

    if !allow_conflicts {
        for pair in entries.windows(2) {
            if conflict_between(&pair[0].path, &pair[1].path) {
                return Err(CommandBuildError::Conflict {
                    first: render_path(&pair[0].path),
                    second: render_path(&pair[1].path),
                });
            }
        }
    }

    let mut root = CommandNode::new();
    for entry in entries {
        root.insert(
            &entry.path,
            types,
            CommandAction::Invoke {
                function: entry.target.function,
                prebound: entry.target.prebound,
            },
        )?;
    }
    Ok(root)
}
