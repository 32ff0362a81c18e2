//! In-memory collaborators for exercising hosts without a real evaluator,
//! world or disk.
//!
//! Apps are described as [`Program`]s: global values, functions backed by
//! Rust closures, and top-level statements. [`ScriptedEvaluator`] "compiles"
//! an app by looking up its program by name.
//!
//! ```
//! use std::sync::Arc;
//! use quarry_host::testing::{MemoryBlobStore, Program, RecordingPrincipal, ScriptedEvaluator, TestEnvironment};
//! use quarry_host::{AppRegistry, LoadRequest, Value};
//!
//! let evaluator = Arc::new(ScriptedEvaluator::new());
//! evaluator.define_app(
//!     "hello",
//!     Program::new().function("__command", &[], |_, _| Ok(Value::str("hi"))),
//! );
//! let env = Arc::new(TestEnvironment::new());
//! let mut registry = AppRegistry::new(evaluator, env.clone(), Arc::new(MemoryBlobStore::new()));
//! registry.load_app(LoadRequest::new("hello", "", env.server())).unwrap();
//!
//! let alex = env.add_player("alex");
//! assert_eq!(registry.execute_command(alex.clone(), "/hello").unwrap(), 1);
//! assert_eq!(alex.messages(), vec!["hi".to_string()]);
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;

use crate::context::{ExecutionContext, Origin};
use crate::environment::{DependencyResolver, HostEnvironment};
use crate::evaluator::{
    Application, CompiledUnit, EvalError, Evaluator, FunctionDef, FunctionRef, Token,
};
use crate::persistence::{Blob, BlobStore};
use crate::principal::{Principal, PrincipalKind, PrincipalRef};
use crate::value::Value;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Body of a scripted function or top-level statement
pub type NativeFn =
    Arc<dyn Fn(&mut ExecutionContext<'_>, Vec<Value>) -> Result<Value, EvalError> + Send + Sync>;

#[derive(Clone)]
struct NativeDef {
    name: String,
    params: Vec<String>,
    varargs: Option<String>,
    token: Option<Token>,
    body: NativeFn,
}

/// Scripted stand-in for an app's source
#[derive(Clone, Default)]
pub struct Program {
    globals: Vec<(String, Value)>,
    functions: Vec<NativeDef>,
    statements: Vec<NativeFn>,
    top_level_error: Option<EvalError>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.globals.push((name.to_string(), value.into()));
        self
    }

    /// Define a function. Definitions run in the order they are added.
    pub fn function<F>(mut self, name: &str, params: &[&str], body: F) -> Self
    where
        F: Fn(&mut ExecutionContext<'_>, Vec<Value>) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.functions.push(NativeDef {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            varargs: None,
            token: None,
            body: Arc::new(body),
        });
        self
    }

    /// Define a function taking `rest...` after its fixed parameters
    pub fn varargs<F>(mut self, name: &str, params: &[&str], rest: &str, body: F) -> Self
    where
        F: Fn(&mut ExecutionContext<'_>, Vec<Value>) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self = self.function(name, params, body);
        if let Some(def) = self.functions.last_mut() {
            def.varargs = Some(rest.to_string());
        }
        self
    }

    /// Code run after every definition
    pub fn statement<F>(mut self, body: F) -> Self
    where
        F: Fn(&mut ExecutionContext<'_>, Vec<Value>) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.statements.push(Arc::new(body));
        self
    }

    /// Make the top-level run fail after definitions and statements
    pub fn fail_with(mut self, err: EvalError) -> Self {
        self.top_level_error = Some(err);
        self
    }
}

/// One recorded function call
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub app: String,
    pub function: String,
    pub user: Option<String>,
    pub args: Vec<Value>,
}

/// Evaluator whose apps are [`Program`]s registered up front
#[derive(Default)]
pub struct ScriptedEvaluator {
    programs: Mutex<BTreeMap<String, Program>>,
    calls: Mutex<Vec<CallRecord>>,
}

impl ScriptedEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_app(&self, name: &str, program: Program) {
        lock(&self.programs).insert(name.to_string(), program);
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, function: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.function == function)
            .count()
    }
}

impl Evaluator for ScriptedEvaluator {
    fn compile(&self, name: &str, _source: &str) -> Result<CompiledUnit, EvalError> {
        lock(&self.programs)
            .get(name)
            .cloned()
            .map(CompiledUnit::new)
            .ok_or_else(|| EvalError::expression(format!("no program for app '{}'", name)))
    }

    fn run_top_level(
        &self,
        ctx: &mut ExecutionContext<'_>,
        app: &Application,
    ) -> Result<Value, EvalError> {
        let program = app
            .unit()
            .downcast_ref::<Program>()
            .ok_or_else(|| EvalError::expression("not a scripted program"))?;

        for (name, value) in &program.globals {
            ctx.host_mut().set_global(name.clone(), value.clone());
        }
        for def in &program.functions {
            ctx.define_function(FunctionRef::new(FunctionDef {
                name: def.name.clone(),
                params: def.params.clone(),
                varargs: def.varargs.clone(),
                app: app.id(),
                app_name: app.name().to_string(),
                token: def.token,
                body: Arc::new(Arc::clone(&def.body)),
            }))?;
        }
        for statement in &program.statements {
            statement(&mut *ctx, Vec::new())?;
        }
        match &program.top_level_error {
            Some(err) => Err(err.clone()),
            None => Ok(Value::Null),
        }
    }

    fn execute(
        &self,
        ctx: &mut ExecutionContext<'_>,
        function: &FunctionRef,
        args: Vec<Value>,
    ) -> Result<Value, EvalError> {
        let body = function
            .body
            .downcast_ref::<NativeFn>()
            .ok_or_else(|| EvalError::expression(format!("{} has no native body", function.name)))?;

        lock(&self.calls).push(CallRecord {
            app: function.app_name.clone(),
            function: function.name.clone(),
            user: ctx.host().user().map(str::to_string),
            args: args.clone(),
        });

        let fixed = function.params.len().min(args.len());
        for (param, arg) in function.params.iter().zip(&args) {
            ctx.set_variable(param.clone(), arg.clone());
        }
        if let Some(rest) = &function.varargs {
            ctx.set_variable(rest.clone(), Value::List(args[fixed..].to_vec()));
        }
        body(ctx, args)
    }
}

/// A bare function reference for tests that never execute it
pub fn function(name: &str, params: &[&str]) -> FunctionRef {
    let app = Application::new("test", "", CompiledUnit::new(()));
    FunctionRef::new(FunctionDef {
        name: name.to_string(),
        params: params.iter().map(|p| p.to_string()).collect(),
        varargs: None,
        app: app.id(),
        app_name: app.name().to_string(),
        token: None,
        body: Arc::new(()),
    })
}

/// Principal that keeps every message it receives
pub struct RecordingPrincipal {
    name: String,
    kind: PrincipalKind,
    level: u8,
    origin: Origin,
    simulation_thread: bool,
    messages: Mutex<Vec<String>>,
}

impl RecordingPrincipal {
    pub fn player(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: PrincipalKind::Player,
            level: 0,
            origin: Origin::ZERO,
            simulation_thread: true,
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn server() -> Self {
        Self {
            name: "Server".to_string(),
            kind: PrincipalKind::Server,
            level: 4,
            ..Self::player("")
        }
    }

    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level;
        self
    }

    pub fn at(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// Pretend to call in from another thread
    pub fn off_thread(mut self) -> Self {
        self.simulation_thread = false;
        self
    }

    pub fn messages(&self) -> Vec<String> {
        lock(&self.messages).clone()
    }

    pub fn clear(&self) {
        lock(&self.messages).clear();
    }
}

impl Principal for RecordingPrincipal {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PrincipalKind {
        self.kind
    }

    fn has_permission(&self, level: u8) -> bool {
        self.level >= level
    }

    fn send_message(&self, message: &str) {
        lock(&self.messages).push(message.to_string());
    }

    fn origin(&self) -> Origin {
        self.origin
    }

    fn on_simulation_thread(&self) -> bool {
        self.simulation_thread
    }
}

/// World with a server, players added on demand and a marker log
pub struct TestEnvironment {
    server: Arc<RecordingPrincipal>,
    players: Mutex<BTreeMap<String, Arc<RecordingPrincipal>>>,
    versions: BTreeMap<String, String>,
    removed_markers: Mutex<Vec<String>>,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            server: Arc::new(RecordingPrincipal::server()),
            players: Mutex::new(BTreeMap::new()),
            versions: BTreeMap::new(),
            removed_markers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_version(mut self, id: &str, version: &str) -> Self {
        self.versions.insert(id.to_string(), version.to_string());
        self
    }

    pub fn server(&self) -> Arc<RecordingPrincipal> {
        Arc::clone(&self.server)
    }

    /// Bring a player online
    pub fn add_player(&self, name: &str) -> Arc<RecordingPrincipal> {
        Arc::clone(
            lock(&self.players)
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(RecordingPrincipal::player(name))),
        )
    }

    /// Marker tags removed so far, in order
    pub fn removed_markers(&self) -> Vec<String> {
        lock(&self.removed_markers).clone()
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyResolver for TestEnvironment {
    fn version_of(&self, id: &str) -> Option<String> {
        self.versions.get(id).cloned()
    }
}

impl HostEnvironment for TestEnvironment {
    fn server_principal(&self) -> PrincipalRef {
        self.server.clone()
    }

    fn player(&self, name: &str) -> Option<PrincipalRef> {
        lock(&self.players)
            .get(name)
            .map(|p| Arc::clone(p) as PrincipalRef)
    }

    fn remove_markers(&self, tag: &str) -> usize {
        lock(&self.removed_markers).push(tag.to_string());
        1
    }
}

/// Blob store that counts saves
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Blob>>,
    shared: Mutex<BTreeMap<String, Blob>>,
    saves: Mutex<BTreeMap<String, usize>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self, app: &str) -> usize {
        lock(&self.saves).get(app).copied().unwrap_or(0)
    }

    pub fn stored(&self, app: &str) -> Option<Blob> {
        lock(&self.blobs).get(app).cloned()
    }

    pub fn stored_shared(&self, name: &str) -> Option<Blob> {
        lock(&self.shared).get(name).cloned()
    }
}

impl BlobStore for MemoryBlobStore {
    fn load(&self, app: &str) -> Result<Option<Blob>> {
        Ok(self.stored(app))
    }

    fn save(&self, app: &str, blob: &Blob) -> Result<()> {
        lock(&self.blobs).insert(app.to_string(), blob.clone());
        *lock(&self.saves).entry(app.to_string()).or_insert(0) += 1;
        Ok(())
    }

    fn load_shared(&self, name: &str) -> Result<Option<Blob>> {
        Ok(self.stored_shared(name))
    }

    fn save_shared(&self, name: &str, blob: &Blob) -> Result<()> {
        lock(&self.shared).insert(name.to_string(), blob.clone());
        Ok(())
    }
}

/// Shared byte buffer a log subscriber can write into, e.g.
/// `fmt().with_writer(move || capture.clone())`
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&lock(&self.0)).into_owned()
    }
}

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        lock(&self.0).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
