//! Built-in functions available to scripts.
//!
//! Method-call syntax desugars to these: `text.upper()` is `upper(text)`.
//! There is no way to reach the host from a script beyond this table.

use serde_json::{Map, Value};

use super::eval::{as_number, contains, float_value, normalize_index, type_name, Num};
use super::ScriptError;

/// Compiled regex size cap for `matches`.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Names callable from scripts.
pub const BUILTINS: [&str; 19] = [
    "bool", "contains", "endswith", "float", "get", "int", "join", "keys", "len", "lower",
    "matches", "replace", "split", "startswith", "str", "strip", "type", "upper", "values",
];

pub(crate) fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

pub(crate) fn call(name: &str, args: Vec<Value>) -> Result<Value, ScriptError> {
    match name {
        "len" => {
            let [value] = exact::<1>(name, args)?;
            let len = match &value {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => {
                    return Err(ScriptError::runtime(format!(
                        "object of type '{}' has no len()",
                        type_name(other)
                    )))
                }
            };
            Ok(Value::from(len))
        }
        "str" => {
            let [value] = exact::<1>(name, args)?;
            Ok(Value::String(display(&value)))
        }
        "int" => {
            let [value] = exact::<1>(name, args)?;
            to_int(&value)
        }
        "float" => {
            let [value] = exact::<1>(name, args)?;
            to_float(&value)
        }
        "bool" => {
            let [value] = exact::<1>(name, args)?;
            Ok(Value::Bool(super::eval::truthy(&value)))
        }
        "type" => {
            let [value] = exact::<1>(name, args)?;
            Ok(Value::String(type_name(&value).to_string()))
        }
        "upper" => {
            let [text] = exact::<1>(name, args)?;
            Ok(Value::String(text_arg(name, &text)?.to_uppercase()))
        }
        "lower" => {
            let [text] = exact::<1>(name, args)?;
            Ok(Value::String(text_arg(name, &text)?.to_lowercase()))
        }
        "strip" => {
            let [text] = exact::<1>(name, args)?;
            Ok(Value::String(text_arg(name, &text)?.trim().to_string()))
        }
        "contains" => {
            let [container, item] = exact::<2>(name, args)?;
            contains(&container, &item).map(Value::Bool)
        }
        "startswith" => {
            let [text, prefix] = exact::<2>(name, args)?;
            Ok(Value::Bool(
                text_arg(name, &text)?.starts_with(text_arg(name, &prefix)?),
            ))
        }
        "endswith" => {
            let [text, suffix] = exact::<2>(name, args)?;
            Ok(Value::Bool(
                text_arg(name, &text)?.ends_with(text_arg(name, &suffix)?),
            ))
        }
        "get" => get(args),
        "keys" => {
            let [value] = exact::<1>(name, args)?;
            let map = object_arg(name, value)?;
            Ok(Value::Array(map.into_iter().map(|(k, _)| Value::String(k)).collect()))
        }
        "values" => {
            let [value] = exact::<1>(name, args)?;
            let map = object_arg(name, value)?;
            Ok(Value::Array(map.into_iter().map(|(_, v)| v).collect()))
        }
        "matches" => {
            let [text, pattern] = exact::<2>(name, args)?;
            let regex = regex::RegexBuilder::new(text_arg(name, &pattern)?)
                .size_limit(REGEX_SIZE_LIMIT)
                .build()
                .map_err(|e| ScriptError::runtime(format!("invalid pattern: {e}")))?;
            Ok(Value::Bool(regex.is_match(text_arg(name, &text)?)))
        }
        "replace" => {
            let [text, old, new] = exact::<3>(name, args)?;
            let old = text_arg(name, &old)?;
            if old.is_empty() {
                return Err(ScriptError::runtime("replace() pattern must not be empty"));
            }
            Ok(Value::String(
                text_arg(name, &text)?.replace(old, text_arg(name, &new)?),
            ))
        }
        "split" => split(args),
        "join" => {
            let [separator, items] = exact::<2>(name, args)?;
            let separator = text_arg(name, &separator)?;
            let Value::Array(items) = items else {
                return Err(ScriptError::runtime("join() expects a list"));
            };
            let parts: Vec<String> = items.iter().map(display).collect();
            Ok(Value::String(parts.join(separator)))
        }
        _ => Err(ScriptError::runtime(format!("name '{name}' is not defined"))),
    }
}

/// Python-flavoured rendering used by `str()` and `join()`.
pub(crate) fn display(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn get(args: Vec<Value>) -> Result<Value, ScriptError> {
    if !(2..=3).contains(&args.len()) {
        return Err(arity("get", "2 or 3", args.len()));
    }
    let mut args = args.into_iter();
    let container = args.next().unwrap_or(Value::Null);
    let key = args.next().unwrap_or(Value::Null);
    let default = args.next().unwrap_or(Value::Null);
    match container {
        Value::Object(mut map) => Ok(key
            .as_str()
            .and_then(|k| map.remove(k))
            .unwrap_or(default)),
        Value::Array(mut items) => match normalize_index(&key, items.len()) {
            Ok(index) => Ok(items.swap_remove(index)),
            Err(_) => Ok(default),
        },
        other => Err(ScriptError::runtime(format!(
            "get() expects a dict or list, not {}",
            type_name(&other)
        ))),
    }
}

fn split(args: Vec<Value>) -> Result<Value, ScriptError> {
    let parts: Vec<Value> = match args.as_slice() {
        [text] => text_arg("split", text)?
            .split_whitespace()
            .map(|p| Value::String(p.to_string()))
            .collect(),
        [text, separator] => {
            let separator = text_arg("split", separator)?;
            if separator.is_empty() {
                return Err(ScriptError::runtime("split() separator must not be empty"));
            }
            text_arg("split", text)?
                .split(separator)
                .map(|p| Value::String(p.to_string()))
                .collect()
        }
        _ => return Err(arity("split", "1 or 2", args.len())),
    };
    Ok(Value::Array(parts))
}

fn to_int(value: &Value) -> Result<Value, ScriptError> {
    match value {
        Value::Bool(b) => Ok(Value::from(i64::from(*b))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| ScriptError::runtime(format!("invalid literal for int(): '{s}'"))),
        _ => match as_number(value) {
            Some(Num::Int(i)) => Ok(Value::from(i)),
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            Some(Num::Float(f)) if f.is_finite() && f.abs() < i64::MAX as f64 => {
                Ok(Value::from(f.trunc() as i64))
            }
            _ => Err(ScriptError::runtime(format!(
                "int() cannot convert {}",
                type_name(value)
            ))),
        },
    }
}

fn to_float(value: &Value) -> Result<Value, ScriptError> {
    match value {
        Value::Bool(b) => float_value(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ScriptError::runtime(format!("could not convert string to float: '{s}'")))
            .and_then(float_value),
        _ => match as_number(value) {
            #[allow(clippy::cast_precision_loss)]
            Some(Num::Int(i)) => float_value(i as f64),
            Some(Num::Float(f)) => float_value(f),
            None => Err(ScriptError::runtime(format!(
                "float() cannot convert {}",
                type_name(value)
            ))),
        },
    }
}

fn text_arg<'v>(function: &str, value: &'v Value) -> Result<&'v str, ScriptError> {
    value.as_str().ok_or_else(|| {
        ScriptError::runtime(format!(
            "{function}() expects str, not {}",
            type_name(value)
        ))
    })
}

fn object_arg(function: &str, value: Value) -> Result<Map<String, Value>, ScriptError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ScriptError::runtime(format!(
            "{function}() expects dict, not {}",
            type_name(&other)
        ))),
    }
}

fn exact<const N: usize>(function: &str, args: Vec<Value>) -> Result<[Value; N], ScriptError> {
    let count = args.len();
    <[Value; N]>::try_from(args).map_err(|_| arity(function, &N.to_string(), count))
}

fn arity(function: &str, expected: &str, got: usize) -> ScriptError {
    ScriptError::runtime(format!(
        "{function}() takes {expected} argument(s) ({got} given)"
    ))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn string_helpers() {
        assert_eq!(call("upper", vec![json!("adt")]).unwrap(), json!("ADT"));
        assert_eq!(call("strip", vec![json!("  x ")]).unwrap(), json!("x"));
        assert_eq!(
            call("split", vec![json!("a|b|c"), json!("|")]).unwrap(),
            json!(["a", "b", "c"])
        );
        assert_eq!(
            call("join", vec![json!("-"), json!(["a", 1, true])]).unwrap(),
            json!("a-1-True")
        );
    }

    #[test]
    fn get_falls_back_to_default() {
        let msg = json!({"a": 1});
        assert_eq!(call("get", vec![msg.clone(), json!("a")]).unwrap(), json!(1));
        assert_eq!(call("get", vec![msg.clone(), json!("b")]).unwrap(), Value::Null);
        assert_eq!(call("get", vec![msg, json!("b"), json!(0)]).unwrap(), json!(0));
        assert_eq!(call("get", vec![json!([1, 2]), json!(-1)]).unwrap(), json!(2));
    }

    #[test]
    fn conversions() {
        assert_eq!(call("int", vec![json!(" 42 ")]).unwrap(), json!(42));
        assert_eq!(call("int", vec![json!(3.9)]).unwrap(), json!(3));
        assert_eq!(call("float", vec![json!(2)]).unwrap(), json!(2.0));
        assert_eq!(call("str", vec![Value::Null]).unwrap(), json!("None"));
        assert!(call("int", vec![json!("x")]).is_err());
    }

    #[test]
    fn matches_uses_regex() {
        assert_eq!(
            call("matches", vec![json!("ADT^A01"), json!(r"^ADT\^A0\d$")]).unwrap(),
            json!(true)
        );
        assert!(call("matches", vec![json!("x"), json!("(")]).is_err());
    }

    #[test]
    fn arity_and_unknown_names_are_errors() {
        assert!(call("len", vec![]).is_err());
        assert!(call("open", vec![json!("/etc/passwd")]).is_err());
        assert!(is_builtin("len"));
        assert!(!is_builtin("eval"));
    }
}
