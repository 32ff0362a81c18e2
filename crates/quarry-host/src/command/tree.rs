use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use super::argument::{ArgReader, ArgumentError, ArgumentRegistry, ArgumentType};
use super::permission::PermissionGate;
use super::token::{render_path, CommandToken};
use super::CommandBuildError;
use crate::evaluator::FunctionRef;
use crate::value::Value;

/// What a command path runs when it matches
#[derive(Debug, Clone)]
pub enum CommandAction {
    /// Call `function` with the captured arguments, then `prebound`
    Invoke {
        function: FunctionRef,
        prebound: Vec<Value>,
    },
    /// Call a function by name through the legacy text protocol; any capture
    /// is the argument text
    Legacy { function: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("unknown or incomplete command: '{0}'")]
    Unknown(String),

    #[error(transparent)]
    Argument(#[from] ArgumentError),
}

/// A successful match
#[derive(Debug)]
pub struct Route<'t> {
    pub action: &'t CommandAction,
    /// In path order
    pub captures: Vec<(String, Value)>,
}

impl Route<'_> {
    pub fn values(&self) -> Vec<Value> {
        self.captures.iter().map(|(_, value)| value.clone()).collect()
    }
}

#[derive(Debug, Clone)]
struct ArgumentChild {
    name: String,
    kind: Arc<dyn ArgumentType>,
    node: CommandNode,
}

/// One level of the dispatch trie
#[derive(Debug, Clone, Default)]
pub struct CommandNode {
    literals: BTreeMap<String, CommandNode>,
    arguments: Vec<ArgumentChild>,
    action: Option<CommandAction>,
}

impl CommandNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn literal(&mut self, name: &str) -> &mut CommandNode {
        self.literals.entry(name.to_string()).or_default()
    }

    /// Child for argument `name`, reused if it already exists
    pub fn argument(&mut self, name: &str, kind: Arc<dyn ArgumentType>) -> &mut CommandNode {
        let index = match self.arguments.iter().position(|child| child.name == name) {
            Some(index) => index,
            None => {
                self.arguments.push(ArgumentChild {
                    name: name.to_string(),
                    kind,
                    node: CommandNode::new(),
                });
                self.arguments.len() - 1
            }
        };
        &mut self.arguments[index].node
    }

    pub fn action(&self) -> Option<&CommandAction> {
        self.action.as_ref()
    }

    /// Set the action. Returns `false` if one was already set.
    pub fn set_action(&mut self, action: CommandAction) -> bool {
        if self.action.is_some() {
            return false;
        }
        self.action = Some(action);
        true
    }

    /// Add `path` below this node, resolving argument types by name
    pub fn insert(
        &mut self,
        path: &[CommandToken],
        types: &ArgumentRegistry,
        action: CommandAction,
    ) -> Result<(), CommandBuildError> {
        let mut node = self;
        for token in path {
            node = match token {
                CommandToken::Literal(name) => node.literal(name),
                CommandToken::Argument(name) => node.argument(name, types.resolve(name)),
            };
        }
        if node.set_action(action) {
            Ok(())
        } else {
            Err(CommandBuildError::DuplicatePath(render_path(path)))
        }
    }

    /// Match `input` against the trie. Literals are tried before arguments;
    /// a failed branch backtracks.
    pub fn route(&self, input: &str) -> Result<Route<'_>, DispatchError> {
        let mut captures = Vec::new();
        let mut last_error = None;
        match self.route_from(ArgReader::new(input), &mut captures, &mut last_error) {
            Some(action) => Ok(Route { action, captures }),
            None => Err(last_error
                .map(DispatchError::Argument)
                .unwrap_or_else(|| DispatchError::Unknown(input.trim().to_string()))),
        }
    }

    fn route_from(
        &self,
        mut reader: ArgReader<'_>,
        captures: &mut Vec<(String, Value)>,
        last_error: &mut Option<ArgumentError>,
    ) -> Option<&CommandAction> {
        reader.skip_whitespace();
        if reader.at_end() {
            if self.action.is_none() {
                if let Some(child) = self.arguments.first() {
                    if let Err(e) = child.kind.parse(&child.name, &mut reader.clone()) {
                        *last_error = Some(e);
                    }
                }
            }
            return self.action.as_ref();
        }

        if let Some(child) = self.literals.get(reader.peek_word()) {
            let mut next = reader.clone();
            next.read_word();
            if let Some(action) = child.route_from(next, captures, last_error) {
                return Some(action);
            }
        }

        for child in &self.arguments {
            let mut next = reader.clone();
            match child.kind.parse(&child.name, &mut next) {
                Ok(value) if next.at_boundary() => {
                    let mark = captures.len();
                    captures.push((child.name.clone(), value));
                    if let Some(action) = child.node.route_from(next, captures, last_error) {
                        return Some(action);
                    }
                    captures.truncate(mark);
                }
                Ok(_) => {}
                Err(e) => *last_error = Some(e),
            }
        }
        None
    }

    /// Every runnable path below this node, e.g. `add <x>`
    pub fn usage(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_usage(String::new(), &mut out);
        out
    }

    fn collect_usage(&self, prefix: String, out: &mut Vec<String>) {
        if self.action.is_some() {
            out.push(prefix.trim().to_string());
        }
        for (name, child) in &self.literals {
            child.collect_usage(format!("{} {}", prefix, name), out);
        }
        for child in &self.arguments {
            child
                .node
                .collect_usage(format!("{} <{}>", prefix, child.name), out);
        }
    }
}

/// A complete command registered under an app's name
#[derive(Debug, Clone)]
pub struct CommandTree {
    root: String,
    gate: PermissionGate,
    node: CommandNode,
}

impl CommandTree {
    pub fn new(root: impl Into<String>, gate: PermissionGate, node: CommandNode) -> Self {
        Self {
            root: root.into(),
            gate,
            node,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn gate(&self) -> &PermissionGate {
        &self.gate
    }

    pub fn node(&self) -> &CommandNode {
        &self.node
    }

    /// Route the text after the root literal
    pub fn route(&self, input: &str) -> Result<Route<'_>, DispatchError> {
        self.node.route(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::parse_spec;

    fn legacy(name: &str) -> CommandAction {
        CommandAction::Legacy {
            function: name.to_string(),
        }
    }

    fn legacy_name(action: &CommandAction) -> &str {
        match action {
            CommandAction::Legacy { function } => function,
            CommandAction::Invoke { .. } => panic!("expected a legacy action"),
        }
    }

    fn tree(specs: &[(&str, &str)]) -> CommandNode {
        let types = ArgumentRegistry::new();
        let mut root = CommandNode::new();
        for (spec, name) in specs {
            root.insert(&parse_spec(spec).unwrap(), &types, legacy(name))
                .unwrap();
        }
        root
    }

    #[test]
    fn test_literals_and_captures() {
        let root = tree(&[("", "root"), ("add <item_int>", "add"), ("list", "list")]);

        let route = root.route("").unwrap();
        assert_eq!(legacy_name(route.action), "root");

        let route = root.route("add 5").unwrap();
        assert_eq!(legacy_name(route.action), "add");
        assert_eq!(route.values(), vec![Value::Number(5.0)]);

        assert!(matches!(root.route("list extra"), Err(DispatchError::Unknown(_))));
    }

    #[test]
    fn test_argument_errors_surface() {
        let root = tree(&[("add <item_int>", "add")]);
        assert!(matches!(
            root.route("add five"),
            Err(DispatchError::Argument(ArgumentError::Invalid { .. }))
        ));
        assert!(matches!(
            root.route("add"),
            Err(DispatchError::Argument(ArgumentError::Missing { .. }))
        ));
    }

    #[test]
    fn test_backtracks_from_literal_to_argument() {
        let root = tree(&[("set mode <speed_int>", "mode"), ("set <a> <b>", "pair")]);

        let route = root.route("set mode 3").unwrap();
        assert_eq!(legacy_name(route.action), "mode");

        // "fast" is no int, so the literal branch fails and <a> <b> takes over
        let route = root.route("set mode fast").unwrap();
        assert_eq!(legacy_name(route.action), "pair");
        assert_eq!(route.values(), vec![Value::str("mode"), Value::str("fast")]);
    }

    #[test]
    fn test_duplicate_path_rejected() {
        let types = ArgumentRegistry::new();
        let mut root = CommandNode::new();
        let path = parse_spec("a <x>").unwrap();
        root.insert(&path, &types, legacy("one")).unwrap();
        assert_eq!(
            root.insert(&path, &types, legacy("two")),
            Err(CommandBuildError::DuplicatePath("a <x>".to_string()))
        );
    }

    #[test]
    fn test_usage() {
        let root = tree(&[("", "root"), ("add <x>", "add"), ("list", "list")]);
        assert_eq!(root.usage(), vec!["", "add <x>", "list"]);
    }
}
