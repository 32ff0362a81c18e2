use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::evaluator::FunctionRef;

/// Status returned for commands whose function produced nothing numeric
pub const DEFAULT_STATUS: i32 = 1;

/// Nesting depth past which a value is assumed to be self-referential and
/// rendering gives up
pub const MAX_RENDER_DEPTH: usize = 64;

/// A value crossing the boundary between the host and the evaluator
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Function(FunctionRef),
    /// A player, by name
    Player(String),
}

/// Rendering a value for display failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("value nests deeper than {0} levels")]
    TooDeep(usize),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Runtime type tag, as shown in diagnostics
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Function(_) => "function",
            Value::Player(_) => "player",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Script truthiness
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Function(_) | Value::Player(_) => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// Coerce a command result to an integer status code
    pub fn as_status(&self) -> i32 {
        match self {
            Value::Number(n) if n.is_finite() => {
                n.trunc().clamp(i32::MIN as f64, i32::MAX as f64) as i32
            }
            Value::Bool(b) => i32::from(*b),
            _ => DEFAULT_STATUS,
        }
    }

    /// Plain string form, used when a value is echoed back as text
    pub fn display_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.clone(),
            Value::Player(name) => name.clone(),
            Value::Function(f) => f.pretty_name(),
            Value::List(_) | Value::Map(_) => self
                .pretty()
                .unwrap_or_else(|_| format!("<{}>", self.type_tag())),
        }
    }

    /// Pretty-print for diagnostics. Fails on pathologically nested values
    /// instead of overflowing the stack.
    pub fn pretty(&self) -> Result<String, RenderError> {
        let mut out = String::new();
        self.render(&mut out, 0)?;
        Ok(out)
    }

    fn render(&self, out: &mut String, depth: usize) -> Result<(), RenderError> {
        if depth > MAX_RENDER_DEPTH {
            return Err(RenderError::TooDeep(MAX_RENDER_DEPTH));
        }
        match self {
            Value::Str(s) if depth > 0 => {
                let _ = write!(out, "'{}'", s);
            }
            Value::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.render(out, depth + 1)?;
                }
                out.push(']');
            }
            Value::Map(map) => {
                out.push('{');
                for (i, (key, value)) in map.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{}: ", key);
                    value.render(out, depth + 1)?;
                }
                out.push('}');
            }
            other => out.push_str(&other.display_string()),
        }
        Ok(())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_coercion() {
        assert_eq!(Value::Number(3.0).as_status(), 3);
        assert_eq!(Value::Number(-2.7).as_status(), -2);
        assert_eq!(Value::Bool(false).as_status(), 0);
        assert_eq!(Value::Null.as_status(), DEFAULT_STATUS);
        assert_eq!(Value::str("7").as_status(), DEFAULT_STATUS);
        assert_eq!(Value::Number(f64::NAN).as_status(), DEFAULT_STATUS);
    }

    #[test]
    fn test_display_of_numbers() {
        assert_eq!(Value::Number(5.0).display_string(), "5");
        assert_eq!(Value::Number(-0.5).display_string(), "-0.5");
    }

    #[test]
    fn test_pretty_nested() {
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), Value::List(vec![1i64.into(), "x".into()]));
        map.insert("a".to_string(), Value::Null);
        assert_eq!(Value::Map(map).pretty().unwrap(), "{a: null, b: [1, 'x']}");
        assert_eq!(Value::str("top").pretty().unwrap(), "top");
    }

    #[test]
    fn test_pretty_gives_up_on_deep_nesting() {
        let mut value = Value::Null;
        for _ in 0..(MAX_RENDER_DEPTH + 5) {
            value = Value::List(vec![value]);
        }
        assert_eq!(value.pretty(), Err(RenderError::TooDeep(MAX_RENDER_DEPTH)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.truthy());
        assert!(!Value::Number(0.0).truthy());
        assert!(Value::str("no").truthy());
        assert!(!Value::str("").truthy());
        assert!(Value::Player("alex".into()).truthy());
    }
}
