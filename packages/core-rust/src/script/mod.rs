//! Capability-limited script engine for filter and transformer stages.
//!
//! [`ExpressionEngine`] evaluates a small Python-flavoured statement language
//! directly over `serde_json::Value`. Scripts see only the bindings handed to
//! them and the functions in [`builtins::BUILTINS`]; there is no access to the
//! filesystem, network, processes, or environment.

mod ast;
pub mod builtins;
mod eval;
mod lexer;
mod parser;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::traits::ScriptEngine;
use ast::{Expr, Stmt};

/// Variable holding the message under processing.
pub const MESSAGE_VAR: &str = "message";
/// Variable a filter sets to `True` to let the message through.
pub const PASSED_VAR: &str = "_passed";
/// Variable a transformer sets to its output message.
pub const TRANSFORMED_VAR: &str = "_transformed";

/// Variable name to value mapping passed into and out of a script run.
pub type Bindings = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure raised while checking or running a script.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("{message}")]
    Runtime { message: String },

    #[error("script timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("script exceeded {limit} limit of {max}")]
    LimitExceeded { limit: &'static str, max: u64 },
}

impl ScriptError {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Resource bounds applied to every script run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptLimits {
    /// Evaluation steps (statements plus expression nodes).
    pub max_steps: u64,
    /// Wall-clock budget checked from inside the evaluator.
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// Largest value weight a script may build or store: one per node plus
    /// the bytes of every string and object key, counted through nesting.
    pub max_value_len: usize,
    /// Largest accepted script source, in bytes.
    pub max_script_len: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_steps: 100_000,
            timeout: Duration::from_secs(1),
            max_value_len: 1 << 20,
            max_script_len: 64 * 1024,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// ExpressionEngine
// ---------------------------------------------------------------------------

/// The built-in [`ScriptEngine`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpressionEngine;

impl ExpressionEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn compile(script: &str, max_len: usize) -> Result<Vec<Stmt>, ScriptError> {
        if script.len() > max_len {
            return Err(ScriptError::LimitExceeded {
                limit: "script length",
                max: max_len as u64,
            });
        }
        let program = parser::parse(script)?;
        if let Some(name) = first_unknown_call(&program) {
            return Err(ScriptError::runtime(format!("name '{name}' is not defined")));
        }
        Ok(program)
    }
}

impl ScriptEngine for ExpressionEngine {
    fn name(&self) -> &'static str {
        "expression"
    }

    fn check(&self, script: &str) -> Result<(), ScriptError> {
        Self::compile(script, ScriptLimits::default().max_script_len).map(drop)
    }

    fn run(
        &self,
        script: &str,
        bindings: Bindings,
        limits: &ScriptLimits,
    ) -> Result<Bindings, ScriptError> {
        let program = Self::compile(script, limits.max_script_len)?;
        eval::Interpreter::new(bindings, limits).run(&program)
    }
}

/// Finds the first call to a function that is not a builtin.
fn first_unknown_call(program: &[Stmt]) -> Option<String> {
    fn in_expr(expr: &Expr) -> Option<String> {
        match expr {
            Expr::Literal(_) | Expr::Name(_) => None,
            Expr::Call { name, args } => {
                if builtins::is_builtin(name) {
                    args.iter().find_map(in_expr)
                } else {
                    Some(name.clone())
                }
            }
            Expr::List(items) => items.iter().find_map(in_expr),
            Expr::Dict(entries) => entries
                .iter()
                .find_map(|(k, v)| in_expr(k).or_else(|| in_expr(v))),
            Expr::Field(inner, _) | Expr::Neg(inner) | Expr::Not(inner) => in_expr(inner),
            Expr::Index(a, b) | Expr::And(a, b) | Expr::Or(a, b) | Expr::Binary(_, a, b) => {
                in_expr(a).or_else(|| in_expr(b))
            }
            Expr::Compare(first, rest) => {
                in_expr(first).or_else(|| rest.iter().find_map(|(_, e)| in_expr(e)))
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => in_expr(condition)
                .or_else(|| in_expr(then))
                .or_else(|| in_expr(otherwise)),
        }
    }

    fn in_stmt(stmt: &Stmt) -> Option<String> {
        match stmt {
            Stmt::Pass => None,
            Stmt::Expr(expr) => in_expr(expr),
            Stmt::Assign { target, value } => target
                .path
                .iter()
                .find_map(in_expr)
                .or_else(|| in_expr(value)),
            Stmt::Delete { target } => target.path.iter().find_map(in_expr),
            Stmt::If {
                branches,
                otherwise,
            } => branches
                .iter()
                .find_map(|(c, body)| in_expr(c).or_else(|| body.iter().find_map(in_stmt)))
                .or_else(|| otherwise.iter().find_map(in_stmt)),
            Stmt::For { iterable, body, .. } => {
                in_expr(iterable).or_else(|| body.iter().find_map(in_stmt))
            }
        }
    }

    program.iter().find_map(in_stmt)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn run(script: &str, message: Value) -> Result<Bindings, ScriptError> {
        let mut bindings = Bindings::new();
        bindings.insert(MESSAGE_VAR.to_string(), message);
        ExpressionEngine.run(script, bindings, &ScriptLimits::default())
    }

    #[test]
    fn inline_if_else_filter() {
        let script = "if 'x' in message: _passed=True else: _passed=False";
        let out = run(script, json!({"x": 1})).unwrap();
        assert_eq!(out[PASSED_VAR], json!(true));
        let out = run(script, json!({"y": 1})).unwrap();
        assert_eq!(out[PASSED_VAR], json!(false));
    }

    #[test]
    fn transformer_builds_new_message() {
        let script = "\
out = {'id': message['id'], 'kind': upper(message.kind)}
if len(message['tags']) > 1:
    out['first'] = message['tags'][0]
_transformed = out
";
        let out = run(script, json!({"id": 7, "kind": "adt", "tags": ["a", "b"]})).unwrap();
        assert_eq!(
            out[TRANSFORMED_VAR],
            json!({"id": 7, "kind": "ADT", "first": "a"})
        );
    }

    #[test]
    fn nested_assignment_and_delete_mutate_message() {
        let script = "message['patient']['name'] = 'Doe'\ndel message['secret']";
        let out = run(
            script,
            json!({"patient": {"name": "x"}, "secret": 1, "keep": true}),
        )
        .unwrap();
        assert_eq!(out[MESSAGE_VAR], json!({"patient": {"name": "Doe"}, "keep": true}));
    }

    #[test]
    fn for_loop_and_arithmetic() {
        let script = "total = 0\nfor n in message['values']:\n    total = total + n * 2\n_transformed = total % 7";
        let out = run(script, json!({"values": [1, 2, 3]})).unwrap();
        assert_eq!(out[TRANSFORMED_VAR], json!(5));
    }

    #[test]
    fn python_semantics() {
        let out = run(
            "a = -7 % 3\nb = 7 / 2\nc = 1 == 1.0\nd = None or 'x'\ne = 0 and 1\nf = 'ab' * 2\ng = message[-1]",
            json!([1, 2, 3]),
        )
        .unwrap();
        assert_eq!(out["a"], json!(2));
        assert_eq!(out["b"], json!(3.5));
        assert_eq!(out["c"], json!(true));
        assert_eq!(out["d"], json!("x"));
        assert_eq!(out["e"], json!(0));
        assert_eq!(out["f"], json!("abab"));
        assert_eq!(out["g"], json!(3));
    }

    #[test]
    fn missing_key_is_runtime_error() {
        let err = run("_passed = message['nope'] == 1", json!({})).unwrap_err();
        assert!(matches!(err, ScriptError::Runtime { .. }));
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn undefined_function_rejected_by_check() {
        let err = ExpressionEngine.check("_passed = open('/etc/passwd')").unwrap_err();
        assert_eq!(err.to_string(), "name 'open' is not defined");
        assert!(ExpressionEngine.check("_passed = len(message) > 0").is_ok());
    }

    #[test]
    fn syntax_errors_carry_line_numbers() {
        let err = ExpressionEngine.check("x = 1\ny = (2").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { .. }), "got {err:?}");
    }

    #[test]
    fn step_budget_stops_runaway_loops() {
        let limits = ScriptLimits {
            max_steps: 500,
            ..ScriptLimits::default()
        };
        let mut bindings = Bindings::new();
        bindings.insert(MESSAGE_VAR.to_string(), json!(0));
        let script = "for a in 'xxxxxxxxxx':\n    for b in 'xxxxxxxxxx':\n        for c in 'xxxxxxxxxx':\n            message = message + 1";
        let err = ExpressionEngine.run(script, bindings, &limits).unwrap_err();
        assert_eq!(
            err,
            ScriptError::LimitExceeded {
                limit: "steps",
                max: 500
            }
        );
    }

    #[test]
    fn value_size_limit_blocks_huge_strings() {
        let limits = ScriptLimits {
            max_value_len: 1_000,
            ..ScriptLimits::default()
        };
        let err = ExpressionEngine
            .run("x = 'a' * 5000", Bindings::new(), &limits)
            .unwrap_err();
        assert!(matches!(err, ScriptError::LimitExceeded { limit: "value size", .. }));
    }

    #[test]
    fn value_size_counts_nested_elements() {
        let limits = ScriptLimits {
            max_value_len: 1_000,
            ..ScriptLimits::default()
        };
        let script = "a = [1]\nfor i in 'xxxxxxxxxxxxxxxxxx':\n    a = [a, a]\n_transformed = a";
        let err = ExpressionEngine
            .run(script, Bindings::new(), &limits)
            .unwrap_err();
        assert!(matches!(err, ScriptError::LimitExceeded { limit: "value size", .. }));

        let err = ExpressionEngine
            .run("x = [[1, 2, 3, 4, 5, 6, 7, 8, 9]] * 200", Bindings::new(), &limits)
            .unwrap_err();
        assert!(matches!(err, ScriptError::LimitExceeded { limit: "value size", .. }));
    }

    #[test]
    fn value_size_rechecked_after_subscript_store() {
        let limits = ScriptLimits {
            max_value_len: 10,
            ..ScriptLimits::default()
        };
        let err = ExpressionEngine
            .run(
                "a = [1, 2, 3, 4, 5]\nb = [1, 2, 3, 4, 5]\na[0] = b",
                Bindings::new(),
                &limits,
            )
            .unwrap_err();
        assert!(matches!(err, ScriptError::LimitExceeded { limit: "value size", max: 10 }));

        let limits = ScriptLimits {
            max_value_len: 1_000,
            ..ScriptLimits::default()
        };
        let err = ExpressionEngine
            .run(
                "a = [0, 0]\nfor i in 'xxxxxxxxxxxxxxxxxxxx':\n    a[0] = a",
                Bindings::new(),
                &limits,
            )
            .unwrap_err();
        assert!(matches!(err, ScriptError::LimitExceeded { limit: "value size", .. }));
    }

    #[test]
    fn reads_from_large_message_do_not_copy_it() {
        let items: Vec<Value> = (0..200_000).map(Value::from).collect();
        let ticks: Vec<Value> = (0..2_000).map(Value::from).collect();
        let script = "\
n = 0
for t in message['ticks']:
    if message['items'][t] == t and not message.flag:
        n = n + 1
_transformed = n
";
        let out = run(script, json!({"items": items, "ticks": ticks, "flag": false})).unwrap();
        assert_eq!(out[TRANSFORMED_VAR], json!(2_000));
    }

    #[test]
    fn field_on_scalar_and_missing_name_are_runtime_errors() {
        let err = run("x = message.kind.code", json!({"kind": 3})).unwrap_err();
        assert_eq!(err.to_string(), "'int' value has no field 'code'");
        let err = run("if nothing: x = 1", json!({})).unwrap_err();
        assert_eq!(err.to_string(), "name 'nothing' is not defined");
    }

    #[test]
    fn script_length_limit() {
        let limits = ScriptLimits {
            max_script_len: 10,
            ..ScriptLimits::default()
        };
        let err = ExpressionEngine
            .run("x = 1 + 2 + 3 + 4", Bindings::new(), &limits)
            .unwrap_err();
        assert!(matches!(err, ScriptError::LimitExceeded { limit: "script length", .. }));
    }

    #[test]
    fn limits_serialize_timeout_as_millis() {
        let value = serde_json::to_value(ScriptLimits::default()).unwrap();
        assert_eq!(value["timeout"], json!(1000));
        assert_eq!(value["maxSteps"], json!(100_000));
    }

    proptest! {
        #[test]
        fn integer_addition_matches_rust(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000) {
            let out = run(&format!("_transformed = {a} + {b}"), Value::Null).unwrap();
            prop_assert_eq!(&out[TRANSFORMED_VAR], &json!(a + b));
        }

        #[test]
        fn membership_agrees_with_object_keys(key in "[a-z]{1,6}", present in any::<bool>()) {
            let message = if present { json!({ key.clone(): 1 }) } else { json!({}) };
            let script = format!("if '{key}' in message: _passed = True else: _passed = False");
            let out = run(&script, message).unwrap();
            prop_assert_eq!(&out[PASSED_VAR], &json!(present));
        }

        #[test]
        fn arbitrary_source_never_panics(source in "\\PC{0,40}") {
            let _ = ExpressionEngine.check(&source);
        }
    }
}
