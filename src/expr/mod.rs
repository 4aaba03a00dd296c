//! # 守卫/不变量表达式语言
//!
//! 语法（优先级由低到高）：`||`、`&&`、`== != < <= > >=`、`+ -`、`* / %`、
//! 一元 `! -`、后缀 `a[b]`、`a.b`、`f(a, ...)`。
//!
//! ```rust
//! use tokennet::expr::{self, Bindings, FunctionRegistry, Value};
//!
//! let mut bindings = Bindings::new();
//! bindings.insert("amount".into(), Value::from("1000"));
//! let functions = FunctionRegistry::with_builtins();
//! let value = expr::evaluate("amount >= 10 * 100", &bindings, &functions).unwrap();
//! assert_eq!(value, Value::Bool(true));
//! assert_eq!(expr::evaluate("  ", &bindings, &functions).unwrap(), Value::Bool(true));
//! ```

pub mod aggregate;
pub mod ast;
pub mod clauses;
pub mod error;
pub mod eval;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod value;

pub use aggregate::aggregates;
pub use ast::{BinaryOp, Expr, UnaryOp};
pub use error::{EvalError, ExprError, ParseError};
pub use functions::{Function, FunctionRegistry};
pub use parser::{MAX_DEPTH, parse};
pub use value::{Bindings, Value};

/// Parse-and-evaluate. Empty or whitespace-only input is an always-passing guard.
pub fn evaluate(
    source: &str,
    bindings: &Bindings,
    functions: &FunctionRegistry,
) -> Result<Value, ExprError> {
    compile(source)?
        .evaluate(bindings, functions)
        .map_err(ExprError::from)
}

/// A guard parsed once and evaluated against many binding sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledExpr {
    source: String,
    ast: Option<Expr>,
}

pub fn compile(source: &str) -> Result<CompiledExpr, ParseError> {
    let ast = if source.trim().is_empty() {
        None
    } else {
        Some(parse(source)?)
    };
    Ok(CompiledExpr {
        source: source.to_string(),
        ast,
    })
}

impl CompiledExpr {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> Option<&Expr> {
        self.ast.as_ref()
    }

    pub fn evaluate(
        &self,
        bindings: &Bindings,
        functions: &FunctionRegistry,
    ) -> Result<Value, EvalError> {
        match &self.ast {
            Some(ast) => ast.evaluate(bindings, functions),
            None => Ok(Value::Bool(true)),
        }
    }

    pub fn evaluate_bool(
        &self,
        bindings: &Bindings,
        functions: &FunctionRegistry,
    ) -> Result<bool, EvalError> {
        match &self.ast {
            Some(ast) => ast.evaluate_bool(bindings, functions),
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_guard_passes_with_any_bindings() {
        let mut bindings = Bindings::new();
        bindings.insert("x".into(), Value::Int(-1));
        for source in ["", "   ", "\n\t"] {
            assert_eq!(
                evaluate(source, &bindings, &FunctionRegistry::new()).unwrap(),
                Value::Bool(true)
            );
            assert_eq!(
                evaluate(source, &Bindings::new(), &FunctionRegistry::with_builtins()).unwrap(),
                Value::Bool(true)
            );
        }
    }

    #[test]
    fn compiled_matches_one_shot() {
        let mut bindings = Bindings::new();
        bindings.insert("a".into(), Value::Int(7));
        bindings.insert("b".into(), Value::from("3"));
        let functions = FunctionRegistry::with_builtins();
        for source in [
            "a + b * 2",
            "a % b == 1 && !(a < b)",
            "a / (b - 3)",
            "address(a)",
            "unknown + 1",
        ] {
            let compiled = compile(source).unwrap();
            assert_eq!(
                compiled
                    .evaluate(&bindings, &functions)
                    .map_err(ExprError::from),
                evaluate(source, &bindings, &functions),
                "{source}"
            );
        }
    }

    #[test]
    fn compiled_guard_reuses_its_tree() {
        let guard = compile("x > 10").unwrap();
        let functions = FunctionRegistry::new();
        let results = (0..20)
            .map(|x| {
                let mut bindings = Bindings::new();
                bindings.insert("x".into(), Value::Int(x));
                guard.evaluate_bool(&bindings, &functions).unwrap()
            })
            .filter(|passed| *passed)
            .count();
        assert_eq!(results, 9);
    }

    #[test]
    fn one_shot_surfaces_parse_errors() {
        assert!(matches!(
            evaluate("a +", &Bindings::new(), &FunctionRegistry::new()),
            Err(ExprError::Parse(_))
        ));
    }

    #[test]
    fn pathological_nesting_fails_cleanly() {
        let source = format!("{}1{}", "(".repeat(210), ")".repeat(210));
        assert_eq!(
            evaluate(&source, &Bindings::new(), &FunctionRegistry::new()),
            Err(ExprError::Parse(ParseError::DepthExceeded(MAX_DEPTH)))
        );
    }
}
