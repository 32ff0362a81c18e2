use std::collections::BTreeSet;

use crate::EventKind;

/// Functions whose names start with this prefix are framework hooks, not
/// user-callable commands
pub const RESERVED_PREFIX: &str = "__";

/// A framework-recognized function, identified by its reserved name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Hook {
    /// `__config`, re-run every time it is (re)defined
    Config,
    /// `__on_start`, run once when a per-player host is created
    Start,
    /// `__on_close`, run when a host closes
    Close,
    /// `__command`, the single-entry legacy command handler
    Command,
    /// `__on_<event>`, a built-in event subscription
    Event(EventKind),
}

impl Hook {
    /// Classify a function name. Returns `None` for ordinary functions and
    /// for `__on_` names that do not match any known event.
    pub fn from_function_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(RESERVED_PREFIX)?;
        match rest {
            "config" => Some(Hook::Config),
            "command" => Some(Hook::Command),
            "on_start" => Some(Hook::Start),
            "on_close" => Some(Hook::Close),
            _ => rest
                .strip_prefix("on_")
                .and_then(EventKind::from_name)
                .map(Hook::Event),
        }
    }

    /// The function name that implements this hook
    pub fn function_name(&self) -> String {
        match self {
            Hook::Config => "__config".to_string(),
            Hook::Start => "__on_start".to_string(),
            Hook::Close => "__on_close".to_string(),
            Hook::Command => "__command".to_string(),
            Hook::Event(kind) => format!("__on_{}", kind.name()),
        }
    }
}

/// The set of hooks a host currently has registered
///
/// Populated by explicit registration calls as functions are defined, and
/// emptied again as they are removed.
#[derive(Debug, Clone, Default)]
pub struct HookTable {
    hooks: BTreeSet<Hook>,
}

impl HookTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook. Returns `true` if it was not registered before.
    pub fn register(&mut self, hook: Hook) -> bool {
        let added = self.hooks.insert(hook);
        tracing::debug!(target: "apphost", "Registered hook {} (new: {})", hook.function_name(), added);
        added
    }

    /// Remove a hook. Returns `true` if it was registered.
    pub fn unregister(&mut self, hook: Hook) -> bool {
        self.hooks.remove(&hook)
    }

    pub fn contains(&self, hook: Hook) -> bool {
        self.hooks.contains(&hook)
    }

    /// Registered event subscriptions
    pub fn events(&self) -> impl Iterator<Item = EventKind> + '_ {
        self.hooks.iter().filter_map(|hook| match hook {
            Hook::Event(kind) => Some(*kind),
            _ => None,
        })
    }

    /// Copy every event subscription into `child`. Lifecycle hooks stay put.
    pub fn transfer_events_to(&self, child: &mut HookTable) -> usize {
        let mut moved = 0;
        for kind in self.events() {
            if child.hooks.insert(Hook::Event(kind)) {
                moved += 1;
            }
        }
        moved
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}
