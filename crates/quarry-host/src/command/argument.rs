use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::CommandBuildError;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    #[error("expected {expected} for <{argument}>")]
    Missing {
        argument: String,
        expected: &'static str,
    },

    #[error("invalid value '{input}' for <{argument}>: {reason}")]
    Invalid {
        argument: String,
        input: String,
        reason: String,
    },
}

/// Cursor over the remaining command input
#[derive(Debug, Clone)]
pub struct ArgReader<'a> {
    input: &'a str,
    cursor: usize,
}

impl<'a> ArgReader<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, cursor: 0 }
    }

    pub fn remaining(&self) -> &'a str {
        &self.input[self.cursor..]
    }

    pub fn at_end(&self) -> bool {
        self.remaining().is_empty()
    }

    pub fn at_boundary(&self) -> bool {
        self.remaining().chars().next().map_or(true, char::is_whitespace)
    }

    pub fn skip_whitespace(&mut self) {
        let rest = self.remaining();
        self.cursor += rest.len() - rest.trim_start().len();
    }

    /// Next whitespace-delimited word, without consuming it
    pub fn peek_word(&self) -> &'a str {
        let rest = self.remaining();
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        &rest[..end]
    }

    pub fn read_word(&mut self) -> &'a str {
        let word = self.peek_word();
        self.cursor += word.len();
        word
    }

    /// A quoted string, or a bare word
    pub fn read_string(&mut self) -> Option<String> {
        let rest = self.remaining();
        let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'');
        let Some(quote) = quote else {
            let word = self.read_word();
            return (!word.is_empty()).then(|| word.to_string());
        };
        let mut value = String::new();
        let mut escaped = false;
        for (at, c) in rest.char_indices().skip(1) {
            if escaped {
                value.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                self.cursor += at + c.len_utf8();
                return Some(value);
            } else {
                value.push(c);
            }
        }
        None
    }

    /// Everything left, consumed
    pub fn read_rest(&mut self) -> &'a str {
        let rest = self.remaining();
        self.cursor = self.input.len();
        rest
    }
}

/// Parses one captured argument
pub trait ArgumentType: Send + Sync + fmt::Debug {
    fn parse(&self, argument: &str, reader: &mut ArgReader<'_>) -> Result<Value, ArgumentError>;

    /// Completion candidates, if the type has a closed set
    fn suggestions(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Base types custom arguments build on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinType {
    Int,
    Float,
    Bool,
    /// A quoted string or a single word
    Str,
    /// The rest of the input
    Text,
    /// A single unquoted word
    Term,
    Player,
}

impl BuiltinType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int" => Some(BuiltinType::Int),
            "float" => Some(BuiltinType::Float),
            "bool" => Some(BuiltinType::Bool),
            "string" => Some(BuiltinType::Str),
            "text" => Some(BuiltinType::Text),
            "term" => Some(BuiltinType::Term),
            "player" => Some(BuiltinType::Player),
            _ => None,
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            BuiltinType::Int => "an integer",
            BuiltinType::Float => "a number",
            BuiltinType::Bool => "true or false",
            BuiltinType::Str => "a string",
            BuiltinType::Text => "some text",
            BuiltinType::Term => "a word",
            BuiltinType::Player => "a player name",
        }
    }
}

/// A built-in type with optional bounds and an enumerated option set
#[derive(Debug, Clone, PartialEq)]
pub struct CustomArgument {
    pub base: BuiltinType,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub options: Vec<String>,
    pub case_sensitive: bool,
}

impl CustomArgument {
    pub fn plain(base: BuiltinType) -> Self {
        Self {
            base,
            min: None,
            max: None,
            options: Vec::new(),
            case_sensitive: true,
        }
    }

    fn from_spec(name: &str, spec: &Value) -> Result<Self, CommandBuildError> {
        let invalid = |reason: String| CommandBuildError::InvalidArgumentType {
            name: name.to_string(),
            reason,
        };
        let Value::Map(spec) = spec else {
            return Err(invalid(format!("spec should be a map, got {}", spec.type_tag())));
        };
        let type_name = spec
            .get("type")
            .map(Value::display_string)
            .unwrap_or_else(|| "string".to_string());
        let base = BuiltinType::from_name(&type_name)
            .ok_or_else(|| invalid(format!("unknown base type '{}'", type_name)))?;

        let mut argument = CustomArgument::plain(base);
        for (key, value) in spec {
            match key.as_str() {
                "type" => {}
                "min" | "max" => {
                    let bound = value
                        .as_number()
                        .ok_or_else(|| invalid(format!("'{}' should be a number", key)))?;
                    if key == "min" {
                        argument.min = Some(bound);
                    } else {
                        argument.max = Some(bound);
                    }
                }
                "options" => match value {
                    Value::List(items) => {
                        argument.options = items.iter().map(Value::display_string).collect();
                    }
                    _ => return Err(invalid("'options' should be a list".to_string())),
                },
                "case_sensitive" => argument.case_sensitive = value.truthy(),
                other => return Err(invalid(format!("unknown key '{}'", other))),
            }
        }
        Ok(argument)
    }

    fn check_bounds(&self, argument: &str, input: &str, n: f64) -> Result<(), ArgumentError> {
        let out_of_range = |reason: String| ArgumentError::Invalid {
            argument: argument.to_string(),
            input: input.to_string(),
            reason,
        };
        if let Some(min) = self.min {
            if n < min {
                return Err(out_of_range(format!("must not be less than {}", min)));
            }
        }
        if let Some(max) = self.max {
            if n > max {
                return Err(out_of_range(format!("must not be more than {}", max)));
            }
        }
        Ok(())
    }

    fn check_options(&self, argument: &str, input: String) -> Result<String, ArgumentError> {
        if self.options.is_empty() {
            return Ok(input);
        }
        let found = self.options.iter().find(|option| {
            if self.case_sensitive {
                **option == input
            } else {
                option.eq_ignore_ascii_case(&input)
            }
        });
        match found {
            Some(option) => Ok(option.clone()),
            None => Err(ArgumentError::Invalid {
                argument: argument.to_string(),
                input,
                reason: format!("expected one of {}", self.options.join(", ")),
            }),
        }
    }
}

impl ArgumentType for CustomArgument {
    fn parse(&self, argument: &str, reader: &mut ArgReader<'_>) -> Result<Value, ArgumentError> {
        let missing = || ArgumentError::Missing {
            argument: argument.to_string(),
            expected: self.base.expected(),
        };
        let invalid = |input: &str, reason: &str| ArgumentError::Invalid {
            argument: argument.to_string(),
            input: input.to_string(),
            reason: reason.to_string(),
        };

        match self.base {
            BuiltinType::Int | BuiltinType::Float => {
                let word = reader.read_word();
                if word.is_empty() {
                    return Err(missing());
                }
                let n = if self.base == BuiltinType::Int {
                    word.parse::<i64>()
                        .map(|n| n as f64)
                        .map_err(|_| invalid(word, self.base.expected()))?
                } else {
                    word.parse::<f64>()
                        .ok()
                        .filter(|n| n.is_finite())
                        .ok_or_else(|| invalid(word, self.base.expected()))?
                };
                self.check_bounds(argument, word, n)?;
                Ok(Value::Number(n))
            }
            BuiltinType::Bool => {
                let word = reader.read_word();
                match word.to_ascii_lowercase().as_str() {
                    "" => Err(missing()),
                    "true" => Ok(Value::Bool(true)),
                    "false" => Ok(Value::Bool(false)),
                    _ => Err(invalid(word, self.base.expected())),
                }
            }
            BuiltinType::Str => {
                let text = reader.read_string().ok_or_else(missing)?;
                Ok(Value::Str(self.check_options(argument, text)?))
            }
            BuiltinType::Term | BuiltinType::Player => {
                let word = reader.read_word();
                if word.is_empty() {
                    return Err(missing());
                }
                if self.base == BuiltinType::Player {
                    return Ok(Value::Player(word.to_string()));
                }
                Ok(Value::Str(self.check_options(argument, word.to_string())?))
            }
            BuiltinType::Text => {
                let text = reader.read_rest().trim_end();
                if text.is_empty() {
                    return Err(missing());
                }
                Ok(Value::Str(self.check_options(argument, text.to_string())?))
            }
        }
    }

    fn suggestions(&self) -> Vec<String> {
        match self.base {
            BuiltinType::Bool => vec!["true".to_string(), "false".to_string()],
            _ => self.options.clone(),
        }
    }
}

/// Resolves an argument name to its type
#[derive(Debug, Clone, Default)]
pub struct ArgumentRegistry {
    custom: BTreeMap<String, Arc<dyn ArgumentType>>,
}

impl ArgumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `arguments` config value
    pub fn from_config(arguments: Option<&Value>) -> Result<Self, CommandBuildError> {
        let mut registry = Self::new();
        let Some(arguments) = arguments else {
            return Ok(registry);
        };
        let Value::Map(specs) = arguments else {
            return Err(CommandBuildError::InvalidConfig(
                "'arguments' element in config should be a map".to_string(),
            ));
        };
        for (name, spec) in specs {
            registry.register(name, Arc::new(CustomArgument::from_spec(name, spec)?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, name: &str, argument: Arc<dyn ArgumentType>) {
        self.custom.insert(name.to_string(), argument);
    }

    /// Exact custom or built-in name first, then the part after the last
    /// `_` (so `<count_int>` is an int), then a plain string
    pub fn resolve(&self, name: &str) -> Arc<dyn ArgumentType> {
        self.lookup(name)
            .or_else(|| {
                name.rsplit_once('_')
                    .and_then(|(_, suffix)| self.lookup(suffix))
            })
            .unwrap_or_else(|| Arc::new(CustomArgument::plain(BuiltinType::Str)))
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn ArgumentType>> {
        if let Some(custom) = self.custom.get(name) {
            return Some(Arc::clone(custom));
        }
        BuiltinType::from_name(name)
            .map(|base| Arc::new(CustomArgument::plain(base)) as Arc<dyn ArgumentType>)
    }

    pub fn len(&self) -> usize {
        self.custom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.custom.is_empty()
    }
}
