//! Calling convention between hosts and script functions
//!
//! Every way into script code ends up in [`Host::run_function`] after the
//! arity and integrity checks for that entry point.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::{ExecutionContext, Origin};
use crate::error::{HostError, Result};
use crate::evaluator::FunctionRef;
use crate::host::Host;
use crate::legacy;
use crate::principal::PrincipalRef;
use crate::value::Value;

const COMMAND_INTRO: &str = "Error while running custom command";
const CALLBACK_INTRO: &str = "Callback failed";

/// `param => arg` rows, `??` where either side is missing
pub fn arity_table(params: &[String], args: &[String]) -> String {
    let rows = params.len().max(args.len());
    (0..rows)
        .map(|i| {
            format!(
                "{} => {}",
                params.get(i).map_or("??", String::as_str),
                args.get(i).map_or("??", String::as_str)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn check_arity(function: &FunctionRef, args: &[Value]) -> Result<()> {
    if args.len() == function.arity() {
        return Ok(());
    }
    let shown: Vec<String> = args.iter().map(Value::display_string).collect();
    Err(HostError::Arity {
        function: function.name.clone(),
        expected: function.arity(),
        found: args.len(),
        table: arity_table(&function.params, &shown),
    })
}

impl Host {
    /// Direct call with evaluated arguments
    pub fn call(
        &mut self,
        principal: PrincipalRef,
        origin: Origin,
        function: &FunctionRef,
        args: Vec<Value>,
    ) -> Result<Value> {
        if self.is_paused() {
            return Err(HostError::Paused);
        }
        check_arity(function, &args)?;
        self.check_integrity(function)?;
        self.run_function(principal, origin, function, args)
    }

    /// Call from a command. Event dispatch is suppressed for the duration;
    /// failures are reported and yield null.
    pub fn handle_command(
        &mut self,
        principal: PrincipalRef,
        function: &FunctionRef,
        args: Vec<Value>,
    ) -> Value {
        let gate = self.services.gate.clone();
        let _suppressed = gate.suppress();
        let origin = principal.origin();
        match self.call(principal, origin, function, args) {
            Ok(value) => value,
            Err(err) => {
                self.report(COMMAND_INTRO, &err);
                Value::Null
            }
        }
    }

    /// Call `name` with `coords` followed by arguments parsed from free
    /// text. Nothing runs if the text contains anything but literals and
    /// global variable names.
    pub fn call_legacy(
        &mut self,
        principal: PrincipalRef,
        name: &str,
        coords: &[i64],
        text: &str,
    ) -> Result<Value> {
        if self.is_paused() {
            return Err(HostError::Paused);
        }
        let function = self.function(name).ok_or_else(|| HostError::UnknownFunction {
            function: name.to_string(),
            app: self.name().to_string(),
        })?;

        let mut args: Vec<Value> = coords.iter().map(|c| Value::Number(*c as f64)).collect();
        args.extend(legacy::parse_arguments(text, |var| self.globals.get(var).cloned())?);
        check_arity(&function, &args)?;
        self.check_integrity(&function)?;

        let gate = self.services.gate.clone();
        let _suppressed = gate.suppress();
        let origin = principal.origin();
        self.run_function(principal, origin, &function, args)
    }

    /// [`Host::call_legacy`] for commands: failures are reported and yield
    /// null
    pub fn handle_command_legacy(
        &mut self,
        principal: PrincipalRef,
        name: &str,
        coords: &[i64],
        text: &str,
    ) -> Value {
        match self.call_legacy(principal, name, coords, text) {
            Ok(value) => value,
            Err(err) => {
                self.report(COMMAND_INTRO, &err);
                Value::Null
            }
        }
    }

    /// Call a callback: event hooks, requirement checks, permission
    /// predicates. A no-op while paused. Argument shape is checked before
    /// anything runs; evaluation failures are reported and yield null.
    pub fn call_udf(
        &mut self,
        principal: PrincipalRef,
        origin: Origin,
        function: &FunctionRef,
        args: Vec<Value>,
    ) -> Result<Value> {
        if self.is_paused() {
            return Ok(Value::Null);
        }
        let fits = match function.varargs {
            Some(_) => args.len() >= function.arity(),
            None => args.len() == function.arity(),
        };
        if !fits {
            return Err(HostError::InvalidCallback {
                function: function.pretty_name(),
                found: args.len(),
            });
        }
        self.check_integrity(function)?;

        match self.run_function(principal, origin, function, args) {
            Ok(value) => Ok(value),
            Err(err) => {
                self.report(CALLBACK_INTRO, &err);
                Ok(Value::Null)
            }
        }
    }

    /// Run a callback right away as this host's own player, or the server,
    /// with event dispatch suppressed
    pub fn call_now(&mut self, function: &FunctionRef, args: Vec<Value>) -> Value {
        let principal = self.user_principal();
        let origin = principal.origin();
        let gate = self.services.gate.clone();
        let _suppressed = gate.suppress();
        match self.call_udf(principal, origin, function, args) {
            Ok(value) => value,
            Err(err) => {
                self.report(CALLBACK_INTRO, &err);
                Value::Null
            }
        }
    }

    /// Run an event hook by name with this host's principal. Returns
    /// whether the hook ran.
    pub fn call_event(&mut self, name: &str, args: &[Value]) -> bool {
        let Some(function) = self.function(name) else {
            return false;
        };
        let principal = self.user_principal();
        let origin = principal.origin();
        match self.call_udf(principal, origin, &function, args.to_vec()) {
            Ok(_) => true,
            Err(err) => {
                warn!(target: "apphost", "Skipped {} in app '{}': {}", name, self.name(), err);
                false
            }
        }
    }

    /// Evaluate a callback permission rule for `principal`
    pub fn check_permission_callback(&mut self, principal: &PrincipalRef, function: &FunctionRef) -> bool {
        let subject = if principal.is_player() {
            Value::Player(principal.name().to_string())
        } else {
            Value::Null
        };
        self.handle_command(Arc::clone(principal), function, vec![subject])
            .truthy()
    }

    fn check_integrity(&self, function: &FunctionRef) -> Result<()> {
        if self.modules.contains(&function.app) {
            return Ok(());
        }
        Err(HostError::Integrity {
            function: function.pretty_name(),
            app: self.name().to_string(),
        })
    }

    fn run_function(
        &mut self,
        principal: PrincipalRef,
        origin: Origin,
        function: &FunctionRef,
        args: Vec<Value>,
    ) -> Result<Value> {
        debug!(target: "apphost", "Calling {} in app '{}'", function.name, self.name());
        let evaluator = Arc::clone(&self.services.evaluator);
        let mut ctx = ExecutionContext::new(self, principal, origin);
        evaluator
            .execute(&mut ctx, function, args)
            .map_err(|mut err| {
                if err.locals.is_empty() {
                    err.locals = std::mem::take(&mut ctx.variables);
                }
                HostError::from_eval(err)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_table_pads_missing_arguments() {
        assert_eq!(
            arity_table(&strings(&["a", "b"]), &strings(&["1"])),
            "a => 1\nb => ??"
        );
    }

    #[test]
    fn test_table_pads_missing_params() {
        assert_eq!(
            arity_table(&strings(&["a"]), &strings(&["1", "2"])),
            "a => 1\n?? => 2"
        );
    }

    #[test]
    fn test_table_empty() {
        assert_eq!(arity_table(&[], &[]), "");
    }
}
