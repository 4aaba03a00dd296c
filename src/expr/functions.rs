//! 可注入的函数表：守卫中的 `f(a, b)` 调用经由此表分派，不存在进程级全局注册表。
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::error::EvalError;
use super::value::Value;

pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync;

/// Aggregates receive the raw place-id prefix written as their single argument.
pub type AggregateFn = dyn Fn(&str) -> Result<Value, EvalError> + Send + Sync;

#[derive(Clone)]
pub enum Function {
    Native(Arc<NativeFn>),
    Aggregate(Arc<AggregateFn>),
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Native(_) => write!(f, "Native(..)"),
            Function::Aggregate(_) => write!(f, "Aggregate(..)"),
        }
    }
}

#[derive(Clone, Default, Debug)]
pub struct FunctionRegistry {
    functions: HashMap<String, Function>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `address(n)`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("address", address);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.functions
            .insert(name.into(), Function::Native(Arc::new(f)));
        self
    }

    pub fn register_aggregate<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&str) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.functions
            .insert(name.into(), Function::Aggregate(Arc::new(f)));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Entries of `other` override entries with the same name.
    pub fn merged(&self, other: &FunctionRegistry) -> FunctionRegistry {
        let mut merged = self.clone();
        for (name, function) in &other.functions {
            merged.functions.insert(name.clone(), function.clone());
        }
        merged
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

pub fn expect_arity(name: &str, args: &[Value], expected: usize) -> Result<(), EvalError> {
    if args.len() != expected {
        return Err(EvalError::Arity {
            name: name.to_string(),
            expected,
            found: args.len(),
        });
    }
    Ok(())
}

/// `address(n)`: the 20-byte account address whose numeric value is `n`.
fn address(args: &[Value]) -> Result<Value, EvalError> {
    expect_arity("address", args, 1)?;
    let value = args[0]
        .as_int()
        .ok_or_else(|| EvalError::type_mismatch("address", "expected an integer argument"))?;
    if value < 0 {
        return Err(EvalError::Function {
            name: "address".to_string(),
            message: format!("negative address {value}"),
        });
    }
    Ok(Value::Str(format!("0x{value:040x}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_zero_is_the_null_account() {
        let registry = FunctionRegistry::with_builtins();
        let Some(Function::Native(f)) = registry.get("address") else {
            panic!("address must be native");
        };
        assert_eq!(
            f(&[Value::Int(0)]).unwrap(),
            Value::from("0x0000000000000000000000000000000000000000")
        );
        assert!(matches!(f(&[]), Err(EvalError::Arity { .. })));
    }

    #[test]
    fn merged_prefers_the_override() {
        let mut base = FunctionRegistry::new();
        base.register("f", |_| Ok(Value::Int(1)));
        let mut extra = FunctionRegistry::new();
        extra.register("f", |_| Ok(Value::Int(2)));
        let merged = base.merged(&extra);
        let Some(Function::Native(f)) = merged.get("f") else {
            panic!("f must be native");
        };
        assert_eq!(f(&[]).unwrap(), Value::Int(2));
    }
}
