use std::collections::BTreeMap;
use std::sync::Arc;

use quarry_events::{DispatchGate, EventKind, Hook};
use tracing::{debug, error, info};

use crate::command::{allow_all, CommandAction, CommandRegistration, CommandSurface, CommandValidator, PermissionRule};
use crate::environment::{HostEnvironment, StoreSource};
use crate::error::{CommandError, HostError, Result};
use crate::evaluator::{Application, Evaluator};
use crate::host::{Host, HostServices, PauseFlag};
use crate::persistence::BlobStore;
use crate::principal::{can_synchronously_execute, PrincipalRef};
use crate::value::Value;

/// Everything needed to load one app
pub struct LoadRequest {
    pub name: String,
    pub source: String,
    /// Receives load errors and command registration problems
    pub operator: PrincipalRef,
    pub validator: Option<CommandValidator>,
    /// Set when the app was installed from a distributable source
    pub store_source: Option<Arc<dyn StoreSource>>,
}

impl LoadRequest {
    pub fn new(name: impl Into<String>, source: impl Into<String>, operator: PrincipalRef) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            operator,
            validator: None,
            store_source: None,
        }
    }

    pub fn with_validator(mut self, validator: CommandValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn from_store(mut self, source: Arc<dyn StoreSource>) -> Self {
        self.store_source = Some(source);
        self
    }
}

fn valid_app_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Directory of loaded apps, their commands and the pause flag
pub struct AppRegistry {
    services: HostServices,
    apps: BTreeMap<String, Host>,
    commands: CommandSurface,
}

impl AppRegistry {
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        environment: Arc<dyn HostEnvironment>,
        store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            services: HostServices::new(evaluator, environment, store),
            apps: BTreeMap::new(),
            commands: CommandSurface::new(),
        }
    }

    /// Ticks between the first unsaved write and the flush
    pub fn with_save_debounce(mut self, ticks: u32) -> Self {
        self.services.save_debounce_ticks = ticks;
        self
    }

    /// Command roots owned by the surrounding application
    pub fn with_reserved_commands<I, S>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for root in roots {
            self.commands.reserve(root);
        }
        self
    }

    pub fn pause_flag(&self) -> PauseFlag {
        self.services.paused.clone()
    }

    pub fn set_paused(&self, paused: bool) {
        self.services.paused.set(paused);
        info!(target: "apphost", "Apps {}", if paused { "paused" } else { "resumed" });
    }

    pub fn is_paused(&self) -> bool {
        self.services.paused.is_set()
    }

    pub fn dispatch_gate(&self) -> DispatchGate {
        self.services.gate.clone()
    }

    pub fn commands(&self) -> &CommandSurface {
        &self.commands
    }

    pub fn app(&self, name: &str) -> Option<&Host> {
        self.apps.get(name)
    }

    pub fn app_mut(&mut self, name: &str) -> Option<&mut Host> {
        self.apps.get_mut(name)
    }

    pub fn app_names(&self) -> impl Iterator<Item = &str> {
        self.apps.keys().map(String::as_str)
    }

    /// Compile and start an app, replacing a loaded app of the same name.
    /// Failures are also sent to the request's operator.
    pub fn load_app(&mut self, request: LoadRequest) -> Result<()> {
        let operator = Arc::clone(&request.operator);
        let name = request.name.clone();
        let result = self.try_load(request);
        if let Err(err) = &result {
            error!(target: "apphost", "Failed to load app '{}': {}", name, err);
            operator.send_message(&format!("Failed to load app '{}': {}", name, err));
        }
        result
    }

    fn try_load(&mut self, request: LoadRequest) -> Result<()> {
        let LoadRequest {
            name,
            source,
            operator,
            validator,
            store_source,
        } = request;

        if !valid_app_name(&name) {
            return Err(HostError::Load {
                app: name,
                reason: "app names may only contain letters, digits, '_' and '-'".to_string(),
            });
        }
        if self.apps.contains_key(&name) {
            debug!(target: "apphost", "Reloading app '{}'", name);
            self.unload_app(&name);
        }

        let unit = self
            .services
            .evaluator
            .compile(&name, &source)
            .map_err(|e| HostError::Load {
                app: name.clone(),
                reason: e.to_string(),
            })?;
        let app = Arc::new(Application::new(name.clone(), source, unit));
        let mut host = Host::load(
            app,
            self.services.clone(),
            validator.unwrap_or_else(allow_all),
            Arc::clone(&operator),
            store_source,
        )?;

        match host.build_commands(&self.commands, operator.as_ref()) {
            CommandRegistration::Registered(tree) => {
                if let Err(message) = self.commands.register(tree) {
                    operator.send_message(&message);
                }
            }
            CommandRegistration::NotDeclared => {
                debug!(target: "apphost", "App '{}' declares no commands", name);
            }
            CommandRegistration::Rejected(_) => {}
        }

        self.apps.insert(name, host);
        Ok(())
    }

    /// Close an app and drop its command. Returns `false` if it was not
    /// loaded.
    pub fn unload_app(&mut self, name: &str) -> bool {
        let Some(mut host) = self.apps.remove(name) else {
            return false;
        };
        self.commands.unregister(name);
        host.close();
        info!(target: "apphost", "Unloaded app '{}'", name);
        true
    }

    /// Run a command line such as `/notes add hello`. Returns the integer
    /// status of the command.
    pub fn execute_command(&mut self, principal: PrincipalRef, line: &str) -> Result<i32, CommandError> {
        if !can_synchronously_execute(principal.as_ref()) {
            return Err(CommandError::OffThread);
        }
        let line = line.trim().trim_start_matches('/');
        let (root, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

        let tree = self
            .commands
            .get(root)
            .ok_or_else(|| CommandError::UnknownCommand(root.to_string()))?;
        let host = self
            .apps
            .get_mut(root)
            .ok_or_else(|| CommandError::UnknownCommand(root.to_string()))?;
        if self.services.paused.is_set() {
            return Err(HostError::Paused.into());
        }

        let allowed = match tree.gate().precheck(principal.as_ref()) {
            Some(allowed) => allowed,
            None => match tree.gate().rule() {
                PermissionRule::Callback(function) => {
                    let target = if principal.is_player() {
                        host.retrieve_for_user(principal.name())?
                    } else {
                        &mut *host
                    };
                    target.check_permission_callback(&principal, function)
                }
                _ => false,
            },
        };
        if !allowed {
            return Err(CommandError::PermissionDenied(root.to_string()));
        }

        let route = tree.route(rest)?;
        let args = route.values();
        let target = host.retrieve_own_for_execution(&principal)?;
        let result = match route.action {
            CommandAction::Invoke { function, prebound } => {
                let mut args = args;
                args.extend(prebound.iter().cloned());
                target.handle_command(Arc::clone(&principal), function, args)
            }
            CommandAction::Legacy { function } => {
                let text = args.first().map(Value::display_string).unwrap_or_default();
                let value = target.handle_command_legacy(Arc::clone(&principal), function, &[], &text);
                if !value.is_null() {
                    principal.send_message(&value.display_string());
                }
                value
            }
        };
        Ok(result.as_status())
    }

    /// Deliver a built-in event to every subscribed app, highest
    /// `event_priority` first. Player events go to that player's host in
    /// per-player apps; other events go to every existing player host.
    /// Returns the number of hooks that ran.
    pub fn dispatch_event(&mut self, kind: EventKind, player: Option<&str>, args: &[Value]) -> usize {
        if !self.services.gate.is_enabled() {
            debug!(target: "apphost", "Suppressed {} event during a command", kind);
            return 0;
        }
        if self.services.paused.is_set() {
            return 0;
        }

        let hook = Hook::Event(kind);
        let mut order: Vec<(f64, String)> = self
            .apps
            .iter()
            .filter(|(_, host)| subscribes(host, hook))
            .map(|(name, host)| (host.config().event_priority, name.clone()))
            .collect();
        order.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let function = hook.function_name();
        let mut ran = 0;
        for (_, name) in order {
            let Some(host) = self.apps.get_mut(&name) else {
                continue;
            };
            if !host.is_per_user() {
                ran += usize::from(host.call_event(&function, args));
                continue;
            }
            match player {
                Some(player) if kind.is_player_event() => {
                    // A new child inherits the parent's subscriptions
                    if host.child(player).is_none() && !host.hooks().contains(hook) {
                        continue;
                    }
                    match host.retrieve_for_user(player) {
                        Ok(child) if child.hooks().contains(hook) => {
                            ran += usize::from(child.call_event(&function, args))
                        }
                        Ok(_) => {}
                        Err(err) => error!(target: "apphost", "No host for {} in app '{}': {}", player, name, err),
                    }
                }
                _ => {
                    for child in host.children_mut().filter(|child| child.hooks().contains(hook)) {
                        ran += usize::from(child.call_event(&function, args));
                    }
                }
            }
        }
        ran
    }

    /// One simulation tick: advance every app's save debounce
    pub fn tick(&mut self) {
        for host in self.apps.values_mut() {
            host.tick();
        }
    }

    /// Unload every app
    pub fn close_all(&mut self) {
        let names: Vec<String> = self.apps.keys().cloned().collect();
        for name in names {
            self.unload_app(&name);
        }
    }

    /// Apps that asked to be loaded again on the next start
    pub fn stay_loaded_apps(&self) -> Vec<String> {
        self.apps
            .iter()
            .filter(|(_, host)| host.persistence_required())
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Whether `host` or, for per-player apps, any of its children listens for
/// `hook`
fn subscribes(host: &Host, hook: Hook) -> bool {
    if host.hooks().contains(hook) {
        return true;
    }
    host.is_per_user() && host.children().any(|child| child.hooks().contains(hook))
}

impl Drop for AppRegistry {
    fn drop(&mut self) {
        self.close_all();
    }
}
