//! 表达式求值：短路逻辑、数字字符串强制转换、深度保护。
use std::cmp::Ordering;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::error::EvalError;
use super::functions::{Function, FunctionRegistry};
use super::parser::MAX_DEPTH;
use super::value::{Bindings, Value};

impl Expr {
    pub fn evaluate(
        &self,
        bindings: &Bindings,
        functions: &FunctionRegistry,
    ) -> Result<Value, EvalError> {
        Evaluator::new(bindings, functions).eval(self, 0)
    }

    /// Evaluates and requires a boolean result.
    pub fn evaluate_bool(
        &self,
        bindings: &Bindings,
        functions: &FunctionRegistry,
    ) -> Result<bool, EvalError> {
        let value = self.evaluate(bindings, functions)?;
        value.as_bool().ok_or_else(|| {
            EvalError::type_mismatch(
                "condition",
                format!("expected bool, found {}", value.type_name()),
            )
        })
    }
}

pub struct Evaluator<'a> {
    bindings: &'a Bindings,
    functions: &'a FunctionRegistry,
}

impl<'a> Evaluator<'a> {
    pub fn new(bindings: &'a Bindings, functions: &'a FunctionRegistry) -> Self {
        Self {
            bindings,
            functions,
        }
    }

    fn eval(&self, expr: &Expr, depth: usize) -> Result<Value, EvalError> {
        if depth >= MAX_DEPTH {
            return Err(EvalError::DepthExceeded(MAX_DEPTH));
        }
        let next = depth + 1;
        match expr {
            Expr::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => {
                if !self.eval_bool(lhs, "&&", next)? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval_bool(rhs, "&&", next)?))
            }
            Expr::Binary {
                op: BinaryOp::Or,
                lhs,
                rhs,
            } => {
                if self.eval_bool(lhs, "||", next)? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval_bool(rhs, "||", next)?))
            }
            Expr::Binary { op, lhs, rhs } => {
                let left = self.eval(lhs, next)?;
                let right = self.eval(rhs, next)?;
                apply_binary(*op, &left, &right)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, next)?;
                apply_unary(*op, &value)
            }
            Expr::Ident(name) => self
                .bindings
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::UnknownIdentifier(name.clone())),
            Expr::Int(value) => Ok(Value::Int(*value)),
            Expr::Str(text) => Ok(Value::Str(text.clone())),
            Expr::Bool(value) => Ok(Value::Bool(*value)),
            Expr::Index { target, index } => {
                let target = self.eval(target, next)?;
                let index = self.eval(index, next)?;
                index_value(&target, &index)
            }
            Expr::Field { target, field } => {
                let target = self.eval(target, next)?;
                field_value(&target, field)
            }
            Expr::Call { name, args } => self.call(name, args, next),
        }
    }

    fn eval_bool(&self, expr: &Expr, op: &'static str, depth: usize) -> Result<bool, EvalError> {
        let value = self.eval(expr, depth)?;
        value.as_bool().ok_or_else(|| {
            EvalError::type_mismatch(op, format!("expected bool, found {}", value.type_name()))
        })
    }

    fn call(&self, name: &str, args: &[Expr], depth: usize) -> Result<Value, EvalError> {
        match self.functions.get(name) {
            None => Err(EvalError::UnknownFunction(name.to_string())),
            Some(Function::Aggregate(f)) => {
                if args.len() != 1 {
                    return Err(EvalError::Arity {
                        name: name.to_string(),
                        expected: 1,
                        found: args.len(),
                    });
                }
                let prefix = match &args[0] {
                    Expr::Ident(prefix) | Expr::Str(prefix) => prefix.clone(),
                    other => {
                        let value = self.eval(other, depth)?;
                        value.as_key().ok_or_else(|| {
                            EvalError::type_mismatch(
                                "aggregate",
                                format!("`{name}` expects a place prefix"),
                            )
                        })?
                    }
                };
                f(&prefix)
            }
            Some(Function::Native(f)) => {
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg, depth))
                    .collect::<Result<Vec<_>, _>>()?;
                f(&values)
            }
        }
    }
}

fn int_operands(op: BinaryOp, left: &Value, right: &Value) -> Result<(i64, i64), EvalError> {
    match (left.as_int(), right.as_int()) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ => Err(EvalError::type_mismatch(
            op.symbol(),
            format!(
                "expected integers, found {} and {}",
                left.type_name(),
                right.type_name()
            ),
        )),
    }
}

fn values_equal(left: &Value, right: &Value) -> Result<bool, EvalError> {
    if let (Some(l), Some(r)) = (left.as_int(), right.as_int()) {
        return Ok(l == r);
    }
    match (left, right) {
        (Value::Bool(l), Value::Bool(r)) => Ok(l == r),
        (Value::Str(l), Value::Str(r)) => Ok(l == r),
        (Value::List(_), Value::List(_)) | (Value::Map(_), Value::Map(_)) => Ok(left == right),
        _ => Err(EvalError::type_mismatch(
            "==",
            format!(
                "cannot compare {} with {}",
                left.type_name(),
                right.type_name()
            ),
        )),
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Ordering, EvalError> {
    if let (Some(l), Some(r)) = (left.as_int(), right.as_int()) {
        return Ok(l.cmp(&r));
    }
    match (left, right) {
        (Value::Str(l), Value::Str(r)) => Ok(l.cmp(r)),
        _ => Err(EvalError::type_mismatch(
            op.symbol(),
            format!(
                "cannot order {} and {}",
                left.type_name(),
                right.type_name()
            ),
        )),
    }
}

fn apply_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let overflow = || EvalError::Overflow { op: op.symbol() };
    let value = match op {
        BinaryOp::Eq => Value::Bool(values_equal(left, right)?),
        BinaryOp::Ne => Value::Bool(!values_equal(left, right)?),
        BinaryOp::Lt => Value::Bool(compare(op, left, right)? == Ordering::Less),
        BinaryOp::Le => Value::Bool(compare(op, left, right)? != Ordering::Greater),
        BinaryOp::Gt => Value::Bool(compare(op, left, right)? == Ordering::Greater),
        BinaryOp::Ge => Value::Bool(compare(op, left, right)? != Ordering::Less),
        BinaryOp::Add => match (left, right) {
            (Value::Str(l), Value::Str(r)) if left.as_int().is_none() || right.as_int().is_none() => {
                Value::Str(format!("{l}{r}"))
            }
            _ => {
                let (l, r) = int_operands(op, left, right)?;
                Value::Int(l.checked_add(r).ok_or_else(overflow)?)
            }
        },
        BinaryOp::Sub => {
            let (l, r) = int_operands(op, left, right)?;
            Value::Int(l.checked_sub(r).ok_or_else(overflow)?)
        }
        BinaryOp::Mul => {
            let (l, r) = int_operands(op, left, right)?;
            Value::Int(l.checked_mul(r).ok_or_else(overflow)?)
        }
        BinaryOp::Div | BinaryOp::Rem => {
            let (l, r) = int_operands(op, left, right)?;
            if r == 0 {
                return Err(EvalError::DivisionByZero { op: op.symbol() });
            }
            let result = if op == BinaryOp::Div {
                l.checked_div(r)
            } else {
                l.checked_rem(r)
            };
            Value::Int(result.ok_or_else(overflow)?)
        }
        BinaryOp::And | BinaryOp::Or => {
            // handled with short-circuiting in `Evaluator::eval`
            let (Some(l), Some(r)) = (left.as_bool(), right.as_bool()) else {
                return Err(EvalError::type_mismatch(op.symbol(), "expected booleans"));
            };
            Value::Bool(if op == BinaryOp::And { l && r } else { l || r })
        }
    };
    Ok(value)
}

fn apply_unary(op: UnaryOp, value: &Value) -> Result<Value, EvalError> {
    match op {
        UnaryOp::Not => value.as_bool().map(|b| Value::Bool(!b)).ok_or_else(|| {
            EvalError::type_mismatch("!", format!("expected bool, found {}", value.type_name()))
        }),
        UnaryOp::Neg => {
            let int = value.as_int().ok_or_else(|| {
                EvalError::type_mismatch("-", format!("expected int, found {}", value.type_name()))
            })?;
            int.checked_neg()
                .map(Value::Int)
                .ok_or(EvalError::Overflow { op: "-" })
        }
    }
}

/// Missing map keys read as `0`, the default of an untouched mapping entry.
fn index_value(target: &Value, index: &Value) -> Result<Value, EvalError> {
    match target {
        Value::Map(entries) => {
            let key = index.as_key().ok_or_else(|| {
                EvalError::type_mismatch("[]", format!("cannot index with {}", index.type_name()))
            })?;
            Ok(entries.get(&key).cloned().unwrap_or_default())
        }
        Value::List(items) => {
            let position = index.as_int().ok_or_else(|| {
                EvalError::type_mismatch("[]", format!("list index must be int, found {}", index.type_name()))
            })?;
            usize::try_from(position)
                .ok()
                .and_then(|idx| items.get(idx))
                .cloned()
                .ok_or(EvalError::IndexOutOfBounds {
                    index: position,
                    len: items.len(),
                })
        }
        other => Err(EvalError::type_mismatch(
            "[]",
            format!("cannot index into {}", other.type_name()),
        )),
    }
}

fn field_value(target: &Value, field: &str) -> Result<Value, EvalError> {
    match target {
        Value::Map(entries) => Ok(entries.get(field).cloned().unwrap_or_default()),
        other => Err(EvalError::type_mismatch(
            ".",
            format!("cannot access field `{field}` on {}", other.type_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    use super::*;
    use crate::expr::parse;

    fn eval(source: &str, bindings: &Bindings) -> Result<Value, EvalError> {
        parse(source)
            .unwrap()
            .evaluate(bindings, &FunctionRegistry::with_builtins())
    }

    fn bindings(entries: &[(&str, Value)]) -> Bindings {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn arithmetic_follows_precedence() {
        let env = Bindings::new();
        assert_eq!(eval("2 + 3 * 4 - 10 / 3", &env).unwrap(), Value::Int(11));
        assert_eq!(eval("-7 % 3", &env).unwrap(), Value::Int(-1));
        assert_eq!(eval("(2 + 3) * 4", &env).unwrap(), Value::Int(20));
    }

    #[test]
    fn division_and_modulo_by_zero_are_errors() {
        let env = Bindings::new();
        assert_eq!(
            eval("1 / 0", &env),
            Err(EvalError::DivisionByZero { op: "/" })
        );
        assert_eq!(
            eval("1 % (2 - 2)", &env),
            Err(EvalError::DivisionByZero { op: "%" })
        );
    }

    #[test]
    fn overflow_is_reported() {
        let env = bindings(&[("big", Value::Int(i64::MAX))]);
        assert_eq!(eval("big + 1", &env), Err(EvalError::Overflow { op: "+" }));
    }

    #[test]
    fn numeric_strings_match_integers() {
        let as_string = bindings(&[("amount", Value::from("1000")), ("limit", Value::from("999"))]);
        let as_int = bindings(&[("amount", Value::Int(1000)), ("limit", Value::Int(999))]);
        for source in ["amount > limit", "amount - limit", "amount * 2 == 2000", "amount % 7"] {
            assert_eq!(eval(source, &as_string), eval(source, &as_int), "{source}");
        }
    }

    #[test]
    fn nested_map_access() {
        let env = bindings(&[
            (
                "allowances",
                Value::map([("alice", Value::map([("bob", Value::from("25"))]))]),
            ),
            ("owner", Value::from("alice")),
            ("spender", Value::from("bob")),
        ]);
        assert_eq!(
            eval("allowances[owner][spender] >= 25", &env).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(eval("allowances.alice.bob", &env).unwrap(), Value::from("25"));
        assert_eq!(eval("allowances[owner][\"carol\"]", &env).unwrap(), Value::Int(0));
    }

    #[test]
    fn list_index_out_of_bounds() {
        let env = bindings(&[("xs", Value::List(vec![Value::Int(1)]))]);
        assert_eq!(eval("xs[0]", &env).unwrap(), Value::Int(1));
        assert_eq!(
            eval("xs[3]", &env),
            Err(EvalError::IndexOutOfBounds { index: 3, len: 1 })
        );
    }

    #[test]
    fn unknown_names_are_errors() {
        let env = Bindings::new();
        assert_eq!(
            eval("missing > 0", &env),
            Err(EvalError::UnknownIdentifier("missing".into()))
        );
        assert_eq!(
            eval("nope(1)", &env),
            Err(EvalError::UnknownFunction("nope".into()))
        );
    }

    #[test]
    fn caller_is_an_ordinary_identifier() {
        let env = bindings(&[("caller", Value::from("0xabc")), ("owner", Value::from("0xabc"))]);
        assert_eq!(eval("caller == owner", &env).unwrap(), Value::Bool(true));
    }

    #[test]
    fn address_builtin_compares_with_strings() {
        let env = bindings(&[("to", Value::from("0x00000000000000000000000000000000000000ff"))]);
        assert_eq!(eval("to != address(0)", &env).unwrap(), Value::Bool(true));
    }

    #[test]
    fn logical_operators_short_circuit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = FunctionRegistry::new();
        let counter = Arc::clone(&calls);
        registry.register("touch", move |_| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(Value::Bool(true))
        });
        let env = Bindings::new();

        for source in ["false && touch()", "true || touch()"] {
            parse(source).unwrap().evaluate(&env, &registry).unwrap();
        }
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 0);

        for source in ["true && touch()", "false || touch()"] {
            parse(source).unwrap().evaluate(&env, &registry).unwrap();
        }
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 2);
    }

    #[test]
    fn logical_operands_must_be_boolean() {
        let env = Bindings::new();
        assert!(matches!(
            eval("1 && true", &env),
            Err(EvalError::TypeMismatch { op: "&&", .. })
        ));
    }

    #[test]
    fn deep_programmatic_trees_are_rejected() {
        let mut expr = Expr::Bool(true);
        for _ in 0..250 {
            expr = Expr::unary(UnaryOp::Not, expr);
        }
        assert_eq!(
            expr.evaluate(&Bindings::new(), &FunctionRegistry::new()),
            Err(EvalError::DepthExceeded(MAX_DEPTH))
        );
    }

    #[test]
    fn string_concatenation() {
        let env = bindings(&[("a", Value::from("foo"))]);
        assert_eq!(eval("a + \"bar\"", &env).unwrap(), Value::from("foobar"));
    }
}
