//! Free-form argument text for legacy calls
//!
//! Only literals and global variable names are accepted. Everything else is
//! rejected before any function runs.

use thiserror::Error;
use tracing::debug;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LegacyTokenError {
    #[error("operators, like {0} are not allowed in invoke")]
    Operator(String),

    #[error("passing functions like {0}() to invoke is not allowed")]
    Function(String),

    #[error("{0} is not allowed in invoke")]
    NotAllowed(String),

    #[error("{0} seems like a number but it is not a number. Use quotes to ensure its a string")]
    NotANumber(String),

    #[error("unterminated string starting with {0}")]
    UnterminatedString(char),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LegacyToken {
    Number(String),
    Hex(String),
    Str(String),
    Variable(String),
    Function(String),
    Operator(String),
    Punctuation(char),
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '+' | '-' | '*' | '/' | '%' | '^' | '&' | '|' | '!' | '<' | '>' | '=' | '~' | '?' | ':' | '.')
}

/// Split `text` into tokens without interpreting them
pub fn tokenize(text: &str) -> Result<Vec<LegacyToken>, LegacyTokenError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let starts_number =
            c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()));

        if starts_number {
            let start = i;
            let hex = c == '0' && matches!(chars.get(i + 1), Some('x' | 'X'));
            if hex {
                i += 2;
            }
            while i < chars.len() {
                let ch = chars[i];
                let exponent_sign = !hex
                    && matches!(ch, '+' | '-')
                    && matches!(chars.get(i - 1), Some('e' | 'E'));
                if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' || exponent_sign {
                    i += 1;
                } else {
                    break;
                }
            }
            let literal: String = chars[start..i].iter().collect();
            tokens.push(if hex {
                LegacyToken::Hex(literal)
            } else {
                LegacyToken::Number(literal)
            });
        } else if c == '"' || c == '\'' {
            let quote = c;
            let mut value = String::new();
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                match chars[i] {
                    '\\' if i + 1 < chars.len() => {
                        value.push(match chars[i + 1] {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                        i += 2;
                    }
                    ch if ch == quote => {
                        closed = true;
                        i += 1;
                        break;
                    }
                    ch => {
                        value.push(ch);
                        i += 1;
                    }
                }
            }
            if !closed {
                return Err(LegacyTokenError::UnterminatedString(quote));
            }
            tokens.push(LegacyToken::Str(value));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let name: String = chars[start..i].iter().collect();
            let mut lookahead = i;
            while lookahead < chars.len() && chars[lookahead].is_whitespace() {
                lookahead += 1;
            }
            tokens.push(if chars.get(lookahead) == Some(&'(') {
                LegacyToken::Function(name)
            } else {
                LegacyToken::Variable(name)
            });
        } else if is_operator_char(c) {
            let start = i;
            while i < chars.len() && is_operator_char(chars[i]) {
                i += 1;
            }
            tokens.push(LegacyToken::Operator(chars[start..i].iter().collect()));
        } else {
            tokens.push(LegacyToken::Punctuation(c));
            i += 1;
        }
    }
    Ok(tokens)
}

/// Turn argument text into values. `lookup` resolves global variables;
/// unknown names are dropped. A `-` directly before a number negates it.
pub fn parse_arguments(
    text: &str,
    lookup: impl Fn(&str) -> Option<Value>,
) -> Result<Vec<Value>, LegacyTokenError> {
    let mut values = Vec::new();
    let mut negative = false;

    for token in tokenize(text)? {
        match token {
            LegacyToken::Variable(name) => match lookup(&name) {
                Some(value) => values.push(value),
                None => debug!(target: "apphost", "Skipping unknown variable '{}' in legacy arguments", name),
            },
            LegacyToken::Str(s) => {
                values.push(Value::Str(s));
                negative = false;
            }
            LegacyToken::Number(literal) => {
                let number: f64 = literal
                    .replace('_', "")
                    .parse()
                    .map_err(|_| LegacyTokenError::NotANumber(literal.clone()))?;
                values.push(Value::Number(if negative { -number } else { number }));
                negative = false;
            }
            LegacyToken::Hex(literal) => {
                let digits = literal[2..].replace('_', "");
                let number = parse_hex(&digits)
                    .ok_or_else(|| LegacyTokenError::NotANumber(literal.clone()))?;
                values.push(Value::Number(if negative { -number } else { number }));
                negative = false;
            }
            LegacyToken::Operator(op) if op == "-" && !negative => negative = true,
            LegacyToken::Operator(op) => return Err(LegacyTokenError::Operator(op)),
            LegacyToken::Function(name) => return Err(LegacyTokenError::Function(name)),
            LegacyToken::Punctuation(c) => return Err(LegacyTokenError::NotAllowed(c.to_string())),
        }
    }
    Ok(values)
}

/// Hex digits as a number. Values wider than 64 bits lose precision
/// instead of failing.
fn parse_hex(digits: &str) -> Option<f64> {
    match u64::from_str_radix(digits, 16) {
        Ok(n) => Some(n as f64),
        Err(_) if !digits.is_empty() => digits
            .chars()
            .try_fold(0.0, |acc: f64, c| c.to_digit(16).map(|d| acc * 16.0 + f64::from(d))),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn globals(name: &str) -> Option<Value> {
        match name {
            "myvar" => Some(Value::Number(3.0)),
            _ => None,
        }
    }

    #[test]
    fn test_mixed_arguments() {
        let values = parse_arguments(r#"-5 "hello" myvar"#, globals).unwrap();
        assert_eq!(values, vec![Value::Number(-5.0), Value::str("hello"), Value::Number(3.0)]);
    }

    #[test]
    fn test_hex_wider_than_u64() {
        let values = parse_arguments("0xff 0x1_0000_0000_0000_0000 -0x10000000000000000", globals).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Number(255.0),
                Value::Number(18446744073709551616.0),
                Value::Number(-18446744073709551616.0),
            ]
        );
        assert!(parse_hex("").is_none());
        assert!(parse_hex("fg").is_none());
    }

    #[test]
    fn test_operators_rejected() {
        assert_eq!(
            parse_arguments("a+b", globals),
            Err(LegacyTokenError::Operator("+".into()))
        );
        assert_eq!(
            parse_arguments("1 -- 2", globals),
            Err(LegacyTokenError::Operator("--".into()))
        );
    }

    #[test]
    fn test_nested_calls_rejected() {
        assert_eq!(
            parse_arguments("1 sqrt(4)", globals),
            Err(LegacyTokenError::Function("sqrt".into()))
        );
    }

    #[test]
    fn test_punctuation_rejected() {
        assert_eq!(
            parse_arguments("1, 2", globals),
            Err(LegacyTokenError::NotAllowed(",".into()))
        );
    }

    #[test]
    fn test_bad_number() {
        assert_eq!(
            parse_arguments("12abc", globals),
            Err(LegacyTokenError::NotANumber("12abc".into()))
        );
    }

    #[test]
    fn test_hex_and_floats() {
        let values = parse_arguments("0x1F -0x10 1.5e2 .5", globals).unwrap();
        assert_eq!(
            values,
            vec![
                Value::Number(31.0),
                Value::Number(-16.0),
                Value::Number(150.0),
                Value::Number(0.5)
            ]
        );
    }

    #[test]
    fn test_unknown_variables_skipped_and_keep_sign() {
        let values = parse_arguments("- nothing 4", globals).unwrap();
        assert_eq!(values, vec![Value::Number(-4.0)]);
    }

    #[test]
    fn test_strings_reset_sign() {
        let values = parse_arguments(r#"- 'a b' 2"#, globals).unwrap();
        assert_eq!(values, vec![Value::str("a b"), Value::Number(2.0)]);
    }

    #[test]
    fn test_unterminated_string() {
        assert_eq!(
            parse_arguments("'open", globals),
            Err(LegacyTokenError::UnterminatedString('\''))
        );
    }
}
