//! Tree-walking evaluator over `serde_json::Value`.
//!
//! Every statement and expression node costs one step. The step budget and
//! the wall-clock deadline are both checked as evaluation proceeds, so a
//! script cannot run unbounded even with loops over large inputs.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::time::Instant;

use serde_json::{Map, Number, Value};

use super::ast::{BinOp, CmpOp, Expr, Stmt, Target};
use super::builtins;
use super::{Bindings, ScriptError, ScriptLimits};

/// How often (in steps) the deadline is consulted.
const DEADLINE_CHECK_INTERVAL: u64 = 64;

/// One hop of a read path: `[key]` or `.field`.
enum Step {
    Key(Value),
    Field(String),
}

impl Step {
    /// Reads the child this step selects, borrowing where the value allows.
    fn apply<'v>(&self, value: &'v Value) -> Result<Cow<'v, Value>, ScriptError> {
        match (self, value) {
            (Self::Field(field), Value::Object(map)) => map
                .get(field)
                .map(Cow::Borrowed)
                .ok_or_else(|| ScriptError::runtime(format!("key '{field}' not found"))),
            (Self::Field(field), other) => Err(ScriptError::runtime(format!(
                "'{}' value has no field '{field}'",
                type_name(other)
            ))),
            (Self::Key(key), Value::Object(map)) => {
                let name = object_key(key)?;
                map.get(name)
                    .map(Cow::Borrowed)
                    .ok_or_else(|| ScriptError::runtime(format!("key '{name}' not found")))
            }
            (Self::Key(key), Value::Array(items)) => {
                let index = normalize_index(key, items.len())?;
                Ok(Cow::Borrowed(&items[index]))
            }
            (Self::Key(key), Value::String(text)) => {
                let chars: Vec<char> = text.chars().collect();
                let index = normalize_index(key, chars.len())?;
                Ok(Cow::Owned(Value::String(chars[index].to_string())))
            }
            (Self::Key(_), other) => Err(not_subscriptable(other)),
        }
    }
}

pub(crate) struct Interpreter<'a> {
    scope: Bindings,
    limits: &'a ScriptLimits,
    steps: u64,
    started: Instant,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(scope: Bindings, limits: &'a ScriptLimits) -> Self {
        Self {
            scope,
            limits,
            steps: 0,
            started: Instant::now(),
        }
    }

    pub(crate) fn run(mut self, program: &[Stmt]) -> Result<Bindings, ScriptError> {
        self.block(program)?;
        Ok(self.scope)
    }

    fn tick(&mut self) -> Result<(), ScriptError> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(ScriptError::LimitExceeded {
                limit: "steps",
                max: self.limits.max_steps,
            });
        }
        if self.steps % DEADLINE_CHECK_INTERVAL == 0 && self.started.elapsed() >= self.limits.timeout
        {
            return Err(ScriptError::timeout(self.limits.timeout));
        }
        Ok(())
    }

    // -- statements ---------------------------------------------------------

    fn block(&mut self, stmts: &[Stmt]) -> Result<(), ScriptError> {
        for stmt in stmts {
            self.exec(stmt)?;
        }
        Ok(())
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<(), ScriptError> {
        self.tick()?;
        match stmt {
            Stmt::Pass => Ok(()),
            Stmt::Expr(expr) => self.eval(expr).map(drop),
            Stmt::Assign { target, value } => {
                let value = self.eval(value)?;
                self.assign(target, value)
            }
            Stmt::Delete { target } => self.delete(target),
            Stmt::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if self.with_value(condition, |v| Ok(truthy(v)))? {
                        return self.block(body);
                    }
                }
                self.block(otherwise)
            }
            Stmt::For {
                var,
                iterable,
                body,
            } => {
                let items = self.with_value(iterable, iteration_items)?;
                for item in items {
                    self.scope.insert(var.clone(), item);
                    self.block(body)?;
                }
                Ok(())
            }
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), ScriptError> {
        self.check_size(&value)?;
        let keys = self.eval_path(target)?;
        let Some((last, parents)) = keys.split_last() else {
            self.scope.insert(target.root.clone(), value);
            return Ok(());
        };
        let mut slot = self.root_mut(&target.root)?;
        for key in parents {
            slot = child_mut(slot, key)?;
        }
        match slot {
            Value::Object(map) => {
                let key = object_key(last)?;
                map.insert(key.to_string(), value);
            }
            Value::Array(items) => {
                let index = normalize_index(last, items.len())?;
                items[index] = value;
            }
            other => return Err(not_subscriptable(other)),
        }
        // Storing into a container can grow it past the limit (`a[0] = a`).
        match self.scope.get(&target.root) {
            Some(root) => self.check_size(root),
            None => Ok(()),
        }
    }

    fn delete(&mut self, target: &Target) -> Result<(), ScriptError> {
        let keys = self.eval_path(target)?;
        let Some((last, parents)) = keys.split_last() else {
            return Err(ScriptError::runtime("del requires a subscript or field"));
        };
        let mut slot = self.root_mut(&target.root)?;
        for key in parents {
            slot = child_mut(slot, key)?;
        }
        match slot {
            Value::Object(map) => {
                let key = object_key(last)?;
                map.remove(key)
                    .map(drop)
                    .ok_or_else(|| ScriptError::runtime(format!("key '{key}' not found")))
            }
            Value::Array(items) => {
                let index = normalize_index(last, items.len())?;
                items.remove(index);
                Ok(())
            }
            other => Err(not_subscriptable(other)),
        }
    }

    fn eval_path(&mut self, target: &Target) -> Result<Vec<Value>, ScriptError> {
        target.path.iter().map(|key| self.eval(key)).collect()
    }

    fn root_mut(&mut self, name: &str) -> Result<&mut Value, ScriptError> {
        self.scope
            .get_mut(name)
            .ok_or_else(|| ScriptError::runtime(format!("name '{name}' is not defined")))
    }

    // -- expressions --------------------------------------------------------

    /// Resolves `name[k]...` / `name.f...` chains to their root and steps.
    ///
    /// Returns `None` without evaluating anything when the chain does not
    /// start at a variable.
    fn place<'e>(&mut self, expr: &'e Expr) -> Result<Option<(&'e str, Vec<Step>)>, ScriptError> {
        match expr {
            Expr::Name(name) => {
                self.tick()?;
                Ok(Some((name.as_str(), Vec::new())))
            }
            Expr::Index(base, key) => {
                let Some((root, mut steps)) = self.place(base)? else {
                    return Ok(None);
                };
                self.tick()?;
                steps.push(Step::Key(self.eval(key)?));
                Ok(Some((root, steps)))
            }
            Expr::Field(base, field) => {
                let Some((root, mut steps)) = self.place(base)? else {
                    return Ok(None);
                };
                self.tick()?;
                steps.push(Step::Field(field.clone()));
                Ok(Some((root, steps)))
            }
            _ => Ok(None),
        }
    }

    /// Reads a place without cloning anything above the selected value.
    fn read(&self, root: &str, steps: &[Step]) -> Result<Cow<'_, Value>, ScriptError> {
        let mut current = self
            .scope
            .get(root)
            .map(Cow::Borrowed)
            .ok_or_else(|| ScriptError::runtime(format!("name '{root}' is not defined")))?;
        for step in steps {
            current = match current {
                Cow::Borrowed(value) => step.apply(value)?,
                Cow::Owned(value) => Cow::Owned(step.apply(&value)?.into_owned()),
            };
        }
        Ok(current)
    }

    /// Evaluates `expr` for a read-only consumer, borrowing variables in place.
    fn with_value<R>(
        &mut self,
        expr: &Expr,
        consume: impl FnOnce(&Value) -> Result<R, ScriptError>,
    ) -> Result<R, ScriptError> {
        if let Some((root, steps)) = self.place(expr)? {
            let value = self.read(root, &steps)?;
            return consume(&*value);
        }
        let value = self.eval(expr)?;
        consume(&value)
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        if let Some((root, steps)) = self.place(expr)? {
            return self.read(root, &steps).map(Cow::into_owned);
        }
        self.tick()?;
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => self.read(name, &[]).map(Cow::into_owned),
            Expr::List(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<Vec<_>, _>>()?;
                self.sized(Value::Array(values))
            }
            Expr::Dict(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    let key = self.eval(key)?;
                    let key = object_key(&key)?.to_string();
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                self.sized(Value::Object(map))
            }
            Expr::Index(base, key) => {
                let base = self.eval(base)?;
                let step = Step::Key(self.eval(key)?);
                step.apply(&base).map(Cow::into_owned)
            }
            Expr::Field(base, field) => {
                let base = self.eval(base)?;
                Step::Field(field.clone())
                    .apply(&base)
                    .map(Cow::into_owned)
            }
            Expr::Call { name, args } => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let value = builtins::call(name, args)?;
                self.sized(value)
            }
            Expr::Neg(inner) => match as_number(&self.eval(inner)?) {
                Some(Num::Int(i)) => i
                    .checked_neg()
                    .map(Value::from)
                    .ok_or_else(|| ScriptError::runtime("integer overflow")),
                Some(Num::Float(f)) => float_value(-f),
                None => Err(ScriptError::runtime("bad operand type for unary -")),
            },
            Expr::Not(inner) => self.with_value(inner, |v| Ok(Value::Bool(!truthy(v)))),
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if truthy(&left) {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if truthy(&left) {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                let value = binary(*op, left, right, self.limits.max_value_len)?;
                self.sized(value)
            }
            Expr::Compare(first, rest) => {
                let mut left = self.eval(first)?;
                for (position, (op, operand)) in rest.iter().enumerate() {
                    if position + 1 == rest.len() {
                        let holds = self.with_value(operand, |right| compare(*op, &left, right))?;
                        return Ok(Value::Bool(holds));
                    }
                    let right = self.eval(operand)?;
                    if !compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                if self.with_value(condition, |v| Ok(truthy(v)))? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    fn sized(&self, value: Value) -> Result<Value, ScriptError> {
        self.check_size(&value)?;
        Ok(value)
    }

    fn check_size(&self, value: &Value) -> Result<(), ScriptError> {
        if weight(value, self.limits.max_value_len) > self.limits.max_value_len {
            return Err(ScriptError::LimitExceeded {
                limit: "value size",
                max: self.limits.max_value_len as u64,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

/// Total weight of a value: one per node plus the bytes of every string and
/// object key, however deeply nested. Counting stops once `limit` is passed.
pub(crate) fn weight(value: &Value, limit: usize) -> usize {
    let mut total = 0usize;
    let mut pending = vec![value];
    while let Some(value) = pending.pop() {
        total += 1;
        match value {
            Value::String(text) => total += text.len(),
            Value::Array(items) => pending.extend(items),
            Value::Object(map) => {
                for (key, child) in map {
                    total += key.len();
                    pending.push(child);
                }
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => {}
        }
        if total > limit {
            break;
        }
    }
    total
}

fn iteration_items(value: &Value) -> Result<Vec<Value>, ScriptError> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::Object(map) => Ok(map.keys().cloned().map(Value::String).collect()),
        Value::String(text) => Ok(text.chars().map(|c| Value::String(c.to_string())).collect()),
        other => Err(ScriptError::runtime(format!(
            "'{}' value is not iterable",
            type_name(other)
        ))),
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    #[allow(clippy::cast_precision_loss)]
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

pub(crate) fn as_number(value: &Value) -> Option<Num> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(Num::Int)
            .or_else(|| n.as_f64().map(Num::Float)),
        _ => None,
    }
}

pub(crate) fn float_value(f: f64) -> Result<Value, ScriptError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ScriptError::runtime("arithmetic produced a non-finite number"))
}

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "None",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Equality with numeric coercion (`1 == 1.0`).
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => match (as_number(left), as_number(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
            (Some(a), Some(b)) => (a.as_f64() - b.as_f64()).abs() < f64::EPSILON,
            _ => false,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => left == right,
    }
}

pub(crate) fn contains(container: &Value, item: &Value) -> Result<bool, ScriptError> {
    match container {
        Value::String(text) => match item {
            Value::String(needle) => Ok(text.contains(needle.as_str())),
            other => Err(ScriptError::runtime(format!(
                "'in <str>' requires str as left operand, not {}",
                type_name(other)
            ))),
        },
        Value::Array(items) => Ok(items.iter().any(|candidate| values_equal(candidate, item))),
        Value::Object(map) => Ok(item.as_str().is_some_and(|key| map.contains_key(key))),
        other => Err(ScriptError::runtime(format!(
            "argument of type '{}' is not iterable",
            type_name(other)
        ))),
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, ScriptError> {
    let ordering = match op {
        CmpOp::Eq => return Ok(values_equal(left, right)),
        CmpOp::Ne => return Ok(!values_equal(left, right)),
        CmpOp::In => return contains(right, left),
        CmpOp::NotIn => return contains(right, left).map(|found| !found),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => order(left, right)?,
    };
    Ok(match op {
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    })
}

fn order(left: &Value, right: &Value) -> Result<Ordering, ScriptError> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => match (as_number(left), as_number(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => Ok(a.cmp(&b)),
            (Some(a), Some(b)) => a
                .as_f64()
                .partial_cmp(&b.as_f64())
                .ok_or_else(|| ScriptError::runtime("cannot order NaN")),
            _ => Err(ScriptError::runtime(format!(
                "'<' not supported between '{}' and '{}'",
                type_name(left),
                type_name(right)
            ))),
        },
    }
}

fn binary(op: BinOp, left: Value, right: Value, max_len: usize) -> Result<Value, ScriptError> {
    match (op, left, right) {
        (BinOp::Add, Value::String(mut a), Value::String(b)) => {
            a.push_str(&b);
            Ok(Value::String(a))
        }
        (BinOp::Add, Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (BinOp::Mul, Value::String(s), count) | (BinOp::Mul, count, Value::String(s)) => {
            let times = repeat_count(&count, s.len(), max_len)?;
            Ok(Value::String(s.repeat(times)))
        }
        (BinOp::Mul, Value::Array(items), count) | (BinOp::Mul, count, Value::Array(items)) => {
            let unit: usize = items.iter().map(|item| weight(item, max_len)).sum();
            let times = repeat_count(&count, unit.max(1), max_len)?;
            let mut out = Vec::with_capacity(items.len() * times);
            for _ in 0..times {
                out.extend(items.iter().cloned());
            }
            Ok(Value::Array(out))
        }
        (op, left, right) => match (as_number(&left), as_number(&right)) {
            (Some(a), Some(b)) => arithmetic(op, a, b),
            _ => Err(ScriptError::runtime(format!(
                "unsupported operand types for {op:?}: '{}' and '{}'",
                type_name(&left),
                type_name(&right)
            ))),
        },
    }
}

/// Validates a repetition count before allocating the result.
fn repeat_count(count: &Value, unit: usize, max_len: usize) -> Result<usize, ScriptError> {
    let Some(Num::Int(n)) = as_number(count) else {
        return Err(ScriptError::runtime("can only repeat by an integer"));
    };
    let times = usize::try_from(n.max(0)).unwrap_or(0);
    if unit.saturating_mul(times) > max_len {
        return Err(ScriptError::LimitExceeded {
            limit: "value size",
            max: max_len as u64,
        });
    }
    Ok(times)
}

fn arithmetic(op: BinOp, a: Num, b: Num) -> Result<Value, ScriptError> {
    let overflow = || ScriptError::runtime("integer overflow");
    match (a, b) {
        (Num::Int(a), Num::Int(b)) => match op {
            BinOp::Add => a.checked_add(b).map(Value::from).ok_or_else(overflow),
            BinOp::Sub => a.checked_sub(b).map(Value::from).ok_or_else(overflow),
            BinOp::Mul => a.checked_mul(b).map(Value::from).ok_or_else(overflow),
            BinOp::Div => {
                if b == 0 {
                    return Err(ScriptError::runtime("division by zero"));
                }
                float_value(Num::Int(a).as_f64() / Num::Int(b).as_f64())
            }
            BinOp::Mod => {
                if b == 0 {
                    return Err(ScriptError::runtime("modulo by zero"));
                }
                let mut r = a.checked_rem(b).ok_or_else(overflow)?;
                if r != 0 && (r < 0) != (b < 0) {
                    r += b;
                }
                Ok(Value::from(r))
            }
            BinOp::Pow => match u32::try_from(b) {
                Ok(exp) => a.checked_pow(exp).map(Value::from).ok_or_else(overflow),
                Err(_) => float_value(Num::Int(a).as_f64().powf(Num::Int(b).as_f64())),
            },
        },
        (a, b) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            match op {
                BinOp::Add => float_value(a + b),
                BinOp::Sub => float_value(a - b),
                BinOp::Mul => float_value(a * b),
                BinOp::Div if b == 0.0 => Err(ScriptError::runtime("division by zero")),
                BinOp::Div => float_value(a / b),
                BinOp::Mod if b == 0.0 => Err(ScriptError::runtime("modulo by zero")),
                BinOp::Mod => {
                    let mut r = a % b;
                    if r != 0.0 && (r < 0.0) != (b < 0.0) {
                        r += b;
                    }
                    float_value(r)
                }
                BinOp::Pow => float_value(a.powf(b)),
            }
        }
    }
}

fn object_key(key: &Value) -> Result<&str, ScriptError> {
    key.as_str()
        .ok_or_else(|| ScriptError::runtime(format!("dict keys must be str, not {}", type_name(key))))
}

pub(crate) fn normalize_index(key: &Value, len: usize) -> Result<usize, ScriptError> {
    let Some(raw) = key.as_i64() else {
        return Err(ScriptError::runtime(format!(
            "indices must be integers, not {}",
            type_name(key)
        )));
    };
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if raw < 0 { raw + len_i } else { raw };
    usize::try_from(resolved)
        .ok()
        .filter(|i| *i < len)
        .ok_or_else(|| ScriptError::runtime(format!("index {raw} out of range")))
}

fn not_subscriptable(value: &Value) -> ScriptError {
    ScriptError::runtime(format!("'{}' value is not subscriptable", type_name(value)))
}

fn child_mut<'v>(slot: &'v mut Value, key: &Value) -> Result<&'v mut Value, ScriptError> {
    match slot {
        Value::Object(map) => {
            let key = object_key(key)?;
            map.get_mut(key)
                .ok_or_else(|| ScriptError::runtime(format!("key '{key}' not found")))
        }
        Value::Array(items) => {
            let index = normalize_index(key, items.len())?;
            Ok(&mut items[index])
        }
        other => Err(not_subscriptable(other)),
    }
}
