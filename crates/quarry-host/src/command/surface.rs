use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use super::tree::CommandTree;

/// Outcome of asking an app for its command tree
#[derive(Debug)]
pub enum CommandRegistration {
    Registered(CommandTree),
    /// The app declares no commands
    NotDeclared,
    /// Declared, but the tree could not be built or registered
    Rejected(String),
}

/// Every command root known to the process
///
/// Reserved roots belong to the host application itself and can never be
/// claimed by an app.
#[derive(Debug, Default)]
pub struct CommandSurface {
    reserved: BTreeSet<String>,
    trees: BTreeMap<String, CommandTree>,
}

impl CommandSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reserved<I, S>(roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reserved: roots.into_iter().map(Into::into).collect(),
            trees: BTreeMap::new(),
        }
    }

    pub fn reserve(&mut self, root: impl Into<String>) {
        self.reserved.insert(root.into());
    }

    pub fn is_reserved(&self, root: &str) -> bool {
        self.reserved.contains(root)
    }

    /// Register a tree, replacing a previous tree of the same root. Fails on
    /// reserved roots.
    pub fn register(&mut self, tree: CommandTree) -> Result<(), String> {
        let root = tree.root().to_string();
        if self.is_reserved(&root) {
            warn!(target: "apphost", "Refusing to register command /{}: name is reserved", root);
            return Err(format!("a command named '{}' already exists", root));
        }
        debug!(target: "apphost", "Registered command /{}", root);
        self.trees.insert(root, tree);
        Ok(())
    }

    pub fn unregister(&mut self, root: &str) -> Option<CommandTree> {
        self.trees.remove(root)
    }

    pub fn get(&self, root: &str) -> Option<&CommandTree> {
        self.trees.get(root)
    }

    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.trees.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{allow_all, CommandNode, PermissionGate, PermissionRule};

    fn tree(root: &str) -> CommandTree {
        CommandTree::new(
            root,
            PermissionGate::new(allow_all(), PermissionRule::All),
            CommandNode::new(),
        )
    }

    #[test]
    fn test_reserved_roots_are_refused() {
        let mut surface = CommandSurface::with_reserved(["help", "stop"]);
        assert!(surface.register(tree("help")).is_err());
        assert!(surface.get("help").is_none());
        assert!(surface.register(tree("notes")).is_ok());
        assert_eq!(surface.roots().collect::<Vec<_>>(), vec!["notes"]);
    }

    #[test]
    fn test_unregister() {
        let mut surface = CommandSurface::new();
        surface.register(tree("notes")).unwrap();
        assert!(surface.unregister("notes").is_some());
        assert!(surface.unregister("notes").is_none());
    }
}
