use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use quarry_events::{DispatchGate, Hook, HookTable};
use tracing::{debug, info, warn};

use crate::command::{
    parse_spec, spec_from_signature, synthesize, ArgumentRegistry, BuiltinType, CommandAction,
    CommandBuildError, CommandNode, CommandRegistration, CommandSpecEntry, CommandSurface,
    CommandTree, CommandValidator, CustomArgument, FunctionSpec, PermissionGate, PermissionRule,
    LEGACY_ARGS,
};
use crate::config::{AppConfig, Requirements};
use crate::context::ExecutionContext;
use crate::diagnostics::ErrorReporter;
use crate::environment::{marker_tag, HostEnvironment, StoreSource};
use crate::error::{HostError, Result};
use crate::evaluator::{AppId, Application, EvalError, Evaluator, FunctionRef};
use crate::persistence::{lock_state, Blob, BlobRef, BlobStore, PersistentState, SharedState};
use crate::principal::{Principal, PrincipalRef};
use crate::timer::DEFAULT_SAVE_DEBOUNCE_TICKS;
use crate::value::Value;

/// Process-wide switch that suspends every invocation entry point
#[derive(Debug, Clone, Default)]
pub struct PauseFlag(Arc<AtomicBool>);

impl PauseFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, paused: bool) {
        self.0.store(paused, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Collaborators shared by every host in the process
#[derive(Clone)]
pub struct HostServices {
    pub evaluator: Arc<dyn Evaluator>,
    pub environment: Arc<dyn HostEnvironment>,
    pub store: Arc<dyn BlobStore>,
    pub paused: PauseFlag,
    pub gate: DispatchGate,
    pub save_debounce_ticks: u32,
}

impl HostServices {
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        environment: Arc<dyn HostEnvironment>,
        store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            evaluator,
            environment,
            store,
            paused: PauseFlag::new(),
            gate: DispatchGate::new(),
            save_debounce_ticks: DEFAULT_SAVE_DEBOUNCE_TICKS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Loading,
    Active,
    Closing,
    Closed,
}

/// Runtime instance of one app in one scope
///
/// A global host owns the app's persistent state and, for per-player apps,
/// one child host per player. Children share the parent's state handle and
/// keep their own functions and variables.
pub struct Host {
    pub(crate) app: Arc<Application>,
    pub(crate) services: HostServices,
    user: Option<String>,
    state: HostState,
    config: AppConfig,
    per_user: bool,
    strict: bool,
    persistence_required: bool,
    argument_types: ArgumentRegistry,
    validator: CommandValidator,
    persistence: SharedState,
    pub(crate) reporter: ErrorReporter,
    hooks: HookTable,
    functions: BTreeMap<String, FunctionRef>,
    pub(crate) globals: BTreeMap<String, Value>,
    pub(crate) modules: BTreeSet<AppId>,
    children: BTreeMap<String, Host>,
    has_command: bool,
    store_source: Option<Arc<dyn StoreSource>>,
    load_error: Option<HostError>,
}

impl Host {
    /// Create the global host for `app` and run its top-level code. Errors
    /// during that run are reported to `operator` and the half-loaded host
    /// is closed before returning.
    pub fn load(
        app: Arc<Application>,
        services: HostServices,
        validator: CommandValidator,
        operator: PrincipalRef,
        store_source: Option<Arc<dyn StoreSource>>,
    ) -> Result<Host> {
        let persistence = PersistentState::load(
            app.name(),
            Arc::clone(&services.store),
            services.save_debounce_ticks,
        )
        .shared();
        let config = AppConfig::default();
        let mut reporter = ErrorReporter::new();
        reporter.attach(Arc::clone(&operator));

        let mut host = Host {
            modules: BTreeSet::from([app.id()]),
            app,
            services,
            user: None,
            state: HostState::Loading,
            per_user: config.is_per_user(),
            strict: config.strict,
            persistence_required: config.stay_loaded,
            config,
            argument_types: ArgumentRegistry::new(),
            validator,
            persistence,
            reporter,
            hooks: HookTable::new(),
            functions: BTreeMap::new(),
            globals: BTreeMap::new(),
            children: BTreeMap::new(),
            has_command: false,
            store_source,
            load_error: None,
        };

        let result = host.run_top_level(operator);
        host.store_source = None;
        if let Some(err) = host.load_error.take() {
            host.close();
            return Err(err);
        }
        if let Err(err) = result {
            host.report("Error while evaluating expression", &err);
            host.close();
            return Err(HostError::Load {
                app: host.name().to_string(),
                reason: err.to_string(),
            });
        }

        host.state = HostState::Active;
        info!(target: "apphost", "Loaded app '{}' ({})", host.name(), host.app.id());
        Ok(host)
    }

    fn run_top_level(&mut self, principal: PrincipalRef) -> Result<Value> {
        let evaluator = Arc::clone(&self.services.evaluator);
        let app = Arc::clone(&self.app);
        let origin = principal.origin();
        let mut ctx = ExecutionContext::new(self, principal, origin);
        evaluator
            .run_top_level(&mut ctx, &app)
            .map_err(HostError::from_eval)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }

    pub fn name(&self) -> &str {
        self.app.name()
    }

    /// The player this host belongs to; `None` for the global host
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn is_child(&self) -> bool {
        self.user.is_some()
    }

    pub fn state(&self) -> HostState {
        self.state
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn is_per_user(&self) -> bool {
        self.per_user
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn persistence_required(&self) -> bool {
        self.persistence_required
    }

    pub fn has_command(&self) -> bool {
        self.has_command
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    pub fn function(&self, name: &str) -> Option<FunctionRef> {
        self.functions.get(name).cloned()
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub fn child(&self, user: &str) -> Option<&Host> {
        self.children.get(user)
    }

    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    pub fn children(&self) -> impl Iterator<Item = &Host> {
        self.children.values()
    }

    pub(crate) fn children_mut(&mut self) -> impl Iterator<Item = &mut Host> {
        self.children.values_mut()
    }

    pub fn child_mut(&mut self, user: &str) -> Option<&mut Host> {
        self.children.get_mut(user)
    }

    pub fn argument_types(&self) -> &ArgumentRegistry {
        &self.argument_types
    }

    pub fn is_paused(&self) -> bool {
        self.services.paused.is_set()
    }

    /// Whether a blob write is waiting for its debounce window
    pub fn save_pending(&self) -> bool {
        lock_state(&self.persistence).is_pending()
    }

    /// Make a library's functions callable from this host
    pub fn import_module(&mut self, module: &Application) {
        if self.modules.insert(module.id()) {
            debug!(target: "apphost", "App '{}' imported '{}'", self.name(), module.name());
        }
    }

    /// Principal this host's callbacks run as: its player if online,
    /// otherwise the server
    pub fn user_principal(&self) -> PrincipalRef {
        let environment = &self.services.environment;
        self.user
            .as_deref()
            .and_then(|user| environment.player(user))
            .unwrap_or_else(|| environment.server_principal())
    }

    pub(crate) fn report(&self, intro: &str, err: &HostError) {
        self.reporter
            .report(intro, self.app.name(), self.app.source(), err);
    }

    // ------------------------------------------------------------------------
    // Definitions and config
    // ------------------------------------------------------------------------

    /// Register a function defined by running code. Reserved names become
    /// hooks; defining `__config` re-reads the config.
    pub fn define_function(&mut self, function: FunctionRef) -> std::result::Result<(), EvalError> {
        let name = function.name.clone();
        let main = function.app == self.app.id();
        self.functions.insert(name.clone(), function);
        if !main {
            return Ok(());
        }
        let Some(hook) = Hook::from_function_name(&name) else {
            return Ok(());
        };

        match hook {
            Hook::Config if self.is_child() => {}
            Hook::Config => {
                self.hooks.register(hook);
                if let Err(err) = self.read_config() {
                    let message = err.to_string();
                    if self.state == HostState::Loading {
                        self.load_error = Some(err);
                    }
                    return Err(EvalError::expression(format!(
                        "Invalid app config (via '__config()' function): {}",
                        message
                    )));
                }
            }
            // Children get their event subscriptions from the parent
            Hook::Event(_) if self.is_child() => {}
            _ => {
                self.hooks.register(hook);
            }
        }
        Ok(())
    }

    /// Remove a function and any hook it provided
    pub fn remove_function(&mut self, name: &str) -> Option<FunctionRef> {
        let removed = self.functions.remove(name)?;
        if let Some(hook) = Hook::from_function_name(name) {
            self.hooks.unregister(hook);
        }
        Some(removed)
    }

    /// Run `__config` and apply the result. On failure the previous config
    /// stays in place.
    fn read_config(&mut self) -> Result<()> {
        let Some(function) = self.function(&Hook::Config.function_name()) else {
            return Ok(());
        };
        let returned = self.call_now(&function, Vec::new());
        let Value::Map(map) = returned else {
            return Err(HostError::Config(format!(
                "__config should return a map, got {}",
                returned.type_tag()
            )));
        };
        let config = AppConfig::from_map(&map).map_err(HostError::Config)?;
        self.check_requirements(&config)?;
        self.install_store_assets(&config)?;

        self.per_user = config.is_per_user();
        self.strict = config.strict;
        self.persistence_required = config.stay_loaded;
        self.config = config;
        debug!(target: "apphost", "Applied config of app '{}' (per user: {})", self.name(), self.per_user);
        Ok(())
    }

    fn check_requirements(&mut self, config: &AppConfig) -> Result<()> {
        match &config.requires {
            None => Ok(()),
            Some(Requirements::Callback(function)) => {
                let verdict = self.call_now(function, Vec::new());
                if verdict.truthy() {
                    return Err(HostError::Load {
                        app: self.name().to_string(),
                        reason: verdict.display_string(),
                    });
                }
                Ok(())
            }
            Some(Requirements::Versions(versions)) => {
                let failed = |reason: String| HostError::Load {
                    app: self.name().to_string(),
                    reason,
                };
                for (id, predicate) in versions {
                    match self.services.environment.version_of(id) {
                        Some(version) if predicate.matches(&version) => {}
                        Some(version) => {
                            return Err(failed(format!(
                                "requires {} {}, found {}",
                                id, predicate, version
                            )))
                        }
                        None => {
                            return Err(failed(format!(
                                "requires {} {}, which is not installed",
                                id, predicate
                            )))
                        }
                    }
                }
                Ok(())
            }
        }
    }

    fn install_store_assets(&self, config: &AppConfig) -> Result<()> {
        let Some(source) = &self.store_source else {
            return Ok(());
        };
        let list = |key: &str, value: &Option<Value>| -> Result<Vec<Value>> {
            match value {
                None => Ok(Vec::new()),
                Some(Value::List(items)) => Ok(items.clone()),
                Some(other) => Err(HostError::Config(format!(
                    "`{}` should be a list, got {}",
                    key,
                    other.type_tag()
                ))),
            }
        };
        let store_failure = |err: anyhow::Error| HostError::Load {
            app: self.name().to_string(),
            reason: format!("{:#}", err),
        };
        for resource in list("resources", &config.resources)? {
            source
                .add_resource(self.name(), &resource)
                .map_err(store_failure)?;
        }
        for library in list("libraries", &config.libraries)? {
            source
                .add_library(self.name(), &library)
                .map_err(store_failure)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Children
    // ------------------------------------------------------------------------

    /// The host serving `user`: a child for per-player apps, created on
    /// first request, or this host otherwise
    pub fn retrieve_for_user(&mut self, user: &str) -> Result<&mut Host> {
        if !self.per_user || self.is_child() {
            return Ok(self);
        }
        if !self.children.contains_key(user) {
            let child = self.spawn_child(user);
            self.children.insert(user.to_string(), child);
        }
        let app = self.name().to_string();
        self.children
            .get_mut(user)
            .ok_or(HostError::UnknownApp(app))
    }

    /// The host a command from `principal` runs in. Per-player apps need a
    /// player.
    pub fn retrieve_own_for_execution(&mut self, principal: &PrincipalRef) -> Result<&mut Host> {
        if !self.per_user {
            if !self.reporter.reaches_sink() {
                self.reporter.attach(Arc::clone(principal));
            }
            return Ok(self);
        }
        if !principal.is_player() {
            return Err(HostError::NoPlayerContext {
                app: self.name().to_string(),
            });
        }
        let host = self.retrieve_for_user(principal.name())?;
        if !host.reporter.reaches_sink() {
            host.reporter.attach(Arc::clone(principal));
        }
        Ok(host)
    }

    fn spawn_child(&mut self, user: &str) -> Host {
        let mut child = Host {
            app: Arc::clone(&self.app),
            services: self.services.clone(),
            user: Some(user.to_string()),
            state: HostState::Loading,
            config: self.config.clone(),
            per_user: self.per_user,
            strict: self.strict,
            persistence_required: self.persistence_required,
            argument_types: self.argument_types.clone(),
            validator: Arc::clone(&self.validator),
            persistence: Arc::clone(&self.persistence),
            reporter: ErrorReporter::new(),
            hooks: HookTable::new(),
            functions: BTreeMap::new(),
            globals: BTreeMap::new(),
            modules: self.modules.clone(),
            children: BTreeMap::new(),
            has_command: self.has_command,
            store_source: None,
            load_error: None,
        };

        let principal = child.user_principal();
        if let Err(err) = child.run_top_level(principal) {
            child.report("Error while evaluating expression", &err);
        }
        let transferred = self.hooks.transfer_events_to(&mut child.hooks);
        child.state = HostState::Active;
        debug!(target: "apphost", "Created host of app '{}' for {} ({} event hooks)", self.name(), user, transferred);

        if let Some(start) = child.function(&Hook::Start.function_name()) {
            child.call_now(&start, Vec::new());
        }
        child
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Close children, run `__on_close` where it applies, then clean up
    /// markers and flush state for a global host
    pub fn close(&mut self) {
        if matches!(self.state, HostState::Closing | HostState::Closed) {
            return;
        }
        self.state = HostState::Closing;

        for (_, mut child) in std::mem::take(&mut self.children) {
            child.close();
        }

        let runs_close_hook = self.is_child() || !self.per_user;
        if runs_close_hook && self.hooks.contains(Hook::Close) {
            if let Some(close) = self.function(&Hook::Close.function_name()) {
                self.call_now(&close, Vec::new());
            }
        }

        if !self.is_child() {
            let removed = self
                .services
                .environment
                .remove_markers(&marker_tag(self.name()));
            if removed > 0 {
                debug!(target: "apphost", "Removed {} markers of app '{}'", removed, self.name());
            }
            lock_state(&self.persistence).close();
        }

        self.reporter.detach();
        self.state = HostState::Closed;
        debug!(target: "apphost", "Closed host of app '{}' (user: {:?})", self.name(), self.user);
    }

    /// Advance the save debounce
    pub fn tick(&mut self) {
        if !self.is_child() {
            lock_state(&self.persistence).tick();
        }
    }

    // ------------------------------------------------------------------------
    // State blobs
    // ------------------------------------------------------------------------

    pub fn read_blob(&self, blob: &BlobRef) -> Result<Option<Value>> {
        match blob {
            BlobRef::Own => Ok(lock_state(&self.persistence).read().map(Blob::to_value)),
            BlobRef::Shared(name) => self
                .services
                .store
                .load_shared(name)
                .map(|stored| stored.map(|b| b.to_value()))
                .map_err(|source| self.persistence_error(source)),
        }
    }

    /// Replace a blob. The app's own blob is flushed on the debounce
    /// schedule; shared blobs are written immediately.
    pub fn write_blob(&mut self, blob: &BlobRef, value: &Value) -> Result<()> {
        let stored = Blob::from_value(value).map_err(|source| self.persistence_error(source))?;
        match blob {
            BlobRef::Own => {
                lock_state(&self.persistence).write(stored);
                Ok(())
            }
            BlobRef::Shared(name) => self
                .services
                .store
                .save_shared(name, &stored)
                .map_err(|source| self.persistence_error(source)),
        }
    }

    fn persistence_error(&self, source: anyhow::Error) -> HostError {
        HostError::Persistence {
            app: self.name().to_string(),
            source,
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    /// Build this app's command tree. Problems are reported to `operator`
    /// and never abort the load.
    pub fn build_commands(
        &mut self,
        surface: &CommandSurface,
        operator: &dyn Principal,
    ) -> CommandRegistration {
        let name = self.name().to_string();
        let notify = |message: String| {
            warn!(target: "apphost", "App '{}': {}", name, message);
            operator.send_message(&message);
            CommandRegistration::Rejected(message)
        };

        match ArgumentRegistry::from_config(self.config.arguments.as_ref()) {
            Ok(types) => self.argument_types = types,
            Err(e) => return notify(format!("Error when setting up custom argument types: {}", e)),
        }

        let declarative = self.config.commands.is_some();
        if !declarative && !self.hooks.contains(Hook::Command) {
            return CommandRegistration::NotDeclared;
        }
        if surface.is_reserved(&name) {
            return notify(format!("A command named '{}' already exists", name));
        }

        let built = match &self.config.commands {
            Some(commands) => self.declarative_tree(commands),
            None => self.legacy_tree(),
        };
        match built {
            Ok(tree) => {
                self.has_command = true;
                CommandRegistration::Registered(tree)
            }
            Err(e) => notify(format!("Failed to build command system: {}", e)),
        }
    }

    fn permission_gate(&self) -> std::result::Result<PermissionGate, CommandBuildError> {
        let rule = PermissionRule::from_config(self.config.command_permission.as_ref())?;
        Ok(PermissionGate::new(Arc::clone(&self.validator), rule))
    }

    fn declarative_tree(&self, commands: &Value) -> std::result::Result<CommandTree, CommandBuildError> {
        let Value::Map(specs) = commands else {
            return Err(CommandBuildError::InvalidConfig(
                "'commands' element in config should be a map".to_string(),
            ));
        };
        let mut entries = Vec::with_capacity(specs.len());
        for (spec, target) in specs {
            entries.push(CommandSpecEntry {
                spec: spec.clone(),
                path: parse_spec(spec)?,
                target: FunctionSpec::from_config(target, |name| self.function(name))?,
            });
        }
        let node = synthesize(entries, &self.argument_types, self.config.allow_command_conflicts)?;
        Ok(CommandTree::new(self.name(), self.permission_gate()?, node))
    }

    /// The root runs `__command`; each public function of the app becomes a
    /// sub-command
    fn legacy_tree(&self) -> std::result::Result<CommandTree, CommandBuildError> {
        let mut root = CommandNode::new();
        root.set_action(CommandAction::Legacy {
            function: Hook::Command.function_name(),
        });

        let public = self
            .functions
            .iter()
            .filter(|(name, f)| !name.starts_with('_') && f.app == self.app.id());
        for (name, function) in public {
            if self.config.legacy_command_type_support {
                let path = parse_spec(&spec_from_signature(name, &function.params))?;
                root.insert(
                    &path,
                    &self.argument_types,
                    CommandAction::Invoke {
                        function: function.clone(),
                        prebound: Vec::new(),
                    },
                )?;
            } else {
                let literal = root.literal(name);
                literal.set_action(CommandAction::Legacy {
                    function: name.clone(),
                });
                literal
                    .argument(LEGACY_ARGS, Arc::new(CustomArgument::plain(BuiltinType::Text)))
                    .set_action(CommandAction::Legacy {
                        function: name.clone(),
                    });
            }
        }
        Ok(CommandTree::new(self.name(), self.permission_gate()?, root))
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("app", &self.app.name())
            .field("user", &self.user)
            .field("state", &self.state)
            .field("per_user", &self.per_user)
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}
