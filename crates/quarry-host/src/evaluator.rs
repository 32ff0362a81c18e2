//! Seams to the expression evaluator
//!
//! The host never parses or evaluates script text itself. It hands compiled
//! units and function references to an [`Evaluator`] and gets [`Value`]s or
//! [`EvalError`]s back.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::value::Value;

static NEXT_APP_ID: AtomicU64 = AtomicU64::new(1);

/// Unique id handed out to every compiled application
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AppId(u64);

impl AppId {
    fn next() -> Self {
        AppId(NEXT_APP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Evaluator-owned compiled form. The host only stores and passes it back.
#[derive(Clone)]
pub struct CompiledUnit(Arc<dyn Any + Send + Sync>);

impl CompiledUnit {
    pub fn new<T: Any + Send + Sync>(unit: T) -> Self {
        CompiledUnit(Arc::new(unit))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompiledUnit(..)")
    }
}

/// An immutable compiled app, shared by every host derived from it
#[derive(Debug)]
pub struct Application {
    id: AppId,
    name: String,
    source: String,
    unit: CompiledUnit,
}

impl Application {
    pub fn new(name: impl Into<String>, source: impl Into<String>, unit: CompiledUnit) -> Self {
        Self {
            id: AppId::next(),
            name: name.into(),
            source: source.into(),
            unit,
        }
    }

    pub fn id(&self) -> AppId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn unit(&self) -> &CompiledUnit {
        &self.unit
    }
}

/// Location of a token in an app's source. All fields are zero-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Token {
    pub line: usize,
    pub column: usize,
    pub position: usize,
}

impl Token {
    pub fn new(line: usize, column: usize, position: usize) -> Self {
        Self { line, column, position }
    }
}

/// Metadata of a script-defined function
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub varargs: Option<String>,
    pub app: AppId,
    pub app_name: String,
    pub token: Option<Token>,
    /// Evaluator-owned body
    pub body: Arc<dyn Any + Send + Sync>,
}

impl fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("varargs", &self.varargs)
            .field("app", &self.app)
            .field("app_name", &self.app_name)
            .finish_non_exhaustive()
    }
}

/// Shared handle to a function. Equality is identity.
#[derive(Debug, Clone)]
pub struct FunctionRef(Arc<FunctionDef>);

impl FunctionRef {
    pub fn new(def: FunctionDef) -> Self {
        FunctionRef(Arc::new(def))
    }

    pub fn arity(&self) -> usize {
        self.0.params.len()
    }

    /// `name(a, b)` or `name(a, rest...)`
    pub fn pretty_name(&self) -> String {
        let mut params = self.0.params.clone();
        if let Some(varargs) = &self.0.varargs {
            params.push(format!("{}...", varargs));
        }
        format!("{}({})", self.0.name, params.join(", "))
    }
}

impl Deref for FunctionRef {
    type Target = FunctionDef;

    fn deref(&self) -> &FunctionDef {
        &self.0
    }
}

impl PartialEq for FunctionRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Category of an evaluation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    Expression,
    Arithmetic,
    StackOverflow,
}

/// A failure raised by the evaluator while running script code
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
    pub token: Option<Token>,
    /// Local variables live at the failure point
    pub locals: BTreeMap<String, Value>,
    /// Innermost frame first
    pub stack: Vec<String>,
}

impl EvalError {
    fn new(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            token: None,
            locals: BTreeMap::new(),
            stack: Vec::new(),
        }
    }

    pub fn expression(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Expression, message)
    }

    pub fn arithmetic(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Arithmetic, message)
    }

    pub fn stack_overflow() -> Self {
        Self::new(EvalErrorKind::StackOverflow, "stack depth exceeded")
    }

    pub fn at(mut self, token: Token) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_local(mut self, name: impl Into<String>, value: Value) -> Self {
        self.locals.insert(name.into(), value);
        self
    }

    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EvalError {}

/// The external expression evaluator
pub trait Evaluator: Send + Sync {
    /// Compile app source into an opaque unit
    fn compile(&self, name: &str, source: &str) -> Result<CompiledUnit, EvalError>;

    /// Evaluate an app's top-level form. Function definitions go through
    /// [`ExecutionContext::define_function`].
    fn run_top_level(
        &self,
        ctx: &mut ExecutionContext<'_>,
        app: &Application,
    ) -> Result<Value, EvalError>;

    /// Run a function body with already-checked arguments
    fn execute(
        &self,
        ctx: &mut ExecutionContext<'_>,
        function: &FunctionRef,
        args: Vec<Value>,
    ) -> Result<Value, EvalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, params: &[&str], varargs: Option<&str>) -> FunctionRef {
        FunctionRef::new(FunctionDef {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            varargs: varargs.map(str::to_string),
            app: AppId(0),
            app_name: "test".to_string(),
            token: None,
            body: Arc::new(()),
        })
    }

    #[test]
    fn test_app_ids_are_unique() {
        let a = Application::new("a", "", CompiledUnit::new(()));
        let b = Application::new("a", "", CompiledUnit::new(()));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_pretty_name() {
        assert_eq!(def("f", &["a", "b"], None).pretty_name(), "f(a, b)");
        assert_eq!(def("g", &["a"], Some("rest")).pretty_name(), "g(a, rest...)");
    }

    #[test]
    fn test_function_equality_is_identity() {
        let f = def("f", &[], None);
        let same = f.clone();
        let lookalike = def("f", &[], None);
        assert_eq!(f, same);
        assert_ne!(f, lookalike);
    }

    #[test]
    fn test_error_builder() {
        let err = EvalError::arithmetic("division by zero")
            .at(Token::new(1, 4, 10))
            .with_local("a", Value::Number(0.0))
            .with_frame("f(a)");
        assert_eq!(err.kind, EvalErrorKind::Arithmetic);
        assert_eq!(err.token, Some(Token::new(1, 4, 10)));
        assert_eq!(err.locals.len(), 1);
        assert_eq!(err.to_string(), "division by zero");
    }
}
