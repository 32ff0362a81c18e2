use std::cmp::Ordering;
use std::fmt;

use super::CommandBuildError;

/// One element of a command path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandToken {
    /// Matched exactly
    Literal(String),
    /// Captured by an argument type and passed to the target function
    Argument(String),
}

impl CommandToken {
    /// The name, without angle brackets
    pub fn surface(&self) -> &str {
        match self {
            CommandToken::Literal(s) | CommandToken::Argument(s) => s,
        }
    }

    pub fn is_argument(&self) -> bool {
        matches!(self, CommandToken::Argument(_))
    }
}

impl fmt::Display for CommandToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandToken::Literal(s) => f.write_str(s),
            CommandToken::Argument(s) => write!(f, "<{}>", s),
        }
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+'))
}

/// Tokenize a path spec such as `add <x> to <list>`
pub fn parse_spec(spec: &str) -> Result<Vec<CommandToken>, CommandBuildError> {
    let invalid = |reason: String| CommandBuildError::InvalidSpec {
        spec: spec.to_string(),
        reason,
    };

    let mut tokens = Vec::new();
    for word in spec.split_whitespace() {
        let token = if let Some(inner) = word.strip_prefix('<') {
            let name = inner
                .strip_suffix('>')
                .ok_or_else(|| invalid(format!("unterminated argument '{}'", word)))?;
            if !valid_name(name) {
                return Err(invalid(format!("bad argument name '{}'", name)));
            }
            if tokens
                .iter()
                .any(|t: &CommandToken| t.is_argument() && t.surface() == name)
            {
                return Err(invalid(format!("argument '{}' appears twice", name)));
            }
            CommandToken::Argument(name.to_string())
        } else {
            if !valid_name(word) {
                return Err(invalid(format!("bad literal '{}'", word)));
            }
            CommandToken::Literal(word.to_string())
        };
        tokens.push(token);
    }
    Ok(tokens)
}

/// `name <p1> <p2>`
pub fn spec_from_signature(name: &str, params: &[String]) -> String {
    std::iter::once(name.to_string())
        .chain(params.iter().map(|p| format!("<{}>", p)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Element-wise by surface; on a pure prefix the shorter path sorts first
pub fn compare_paths(a: &[CommandToken], b: &[CommandToken]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ordering = x.surface().cmp(y.surface());
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

pub(crate) fn render_path(path: &[CommandToken]) -> String {
    path.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
}
