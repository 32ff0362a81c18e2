use std::collections::BTreeMap;

use crate::evaluator::{EvalError, FunctionRef};
use crate::host::Host;
use crate::principal::PrincipalRef;
use crate::value::Value;

/// Block position an invocation originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Origin {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl Origin {
    pub const ZERO: Origin = Origin { x: 0, y: 0, z: 0 };

    pub fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }
}

/// State of a single invocation, handed to the evaluator
///
/// Lives only for the duration of one call.
pub struct ExecutionContext<'h> {
    host: &'h mut Host,
    principal: PrincipalRef,
    origin: Origin,
    /// Local variables the evaluator keeps live
    pub variables: BTreeMap<String, Value>,
}

impl<'h> ExecutionContext<'h> {
    pub fn new(host: &'h mut Host, principal: PrincipalRef, origin: Origin) -> Self {
        Self {
            host,
            principal,
            origin,
            variables: BTreeMap::new(),
        }
    }

    pub fn host(&self) -> &Host {
        self.host
    }

    pub fn host_mut(&mut self) -> &mut Host {
        self.host
    }

    pub fn principal(&self) -> &PrincipalRef {
        &self.principal
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    /// Register a function defined by the running code
    pub fn define_function(&mut self, function: FunctionRef) -> Result<(), EvalError> {
        self.host.define_function(function)
    }
}
