//! 绑定到某一标识快照的聚合函数：`sum`、`count`、`tokens`、`min`、`max`。
//!
//! 前缀匹配规则：库所 id 与前缀完全相同，或以前缀开头。
use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::EvalError;
use super::functions::FunctionRegistry;
use super::value::{Value, checked_total};

pub const AGGREGATES: [&str; 5] = ["sum", "count", "tokens", "min", "max"];

fn matching<'a>(
    places: &'a BTreeMap<String, Value>,
    prefix: &'a str,
) -> impl Iterator<Item = &'a Value> + 'a {
    places
        .iter()
        .filter(move |(id, _)| id.starts_with(prefix))
        .map(|(_, value)| value)
}

fn non_zero_entries(value: &Value) -> usize {
    match value {
        Value::Map(entries) => entries.values().filter(|v| v.numeric_total() != Ok(0)).count(),
        Value::List(items) => items.iter().filter(|v| v.numeric_total() != Ok(0)).count(),
        scalar => usize::from(scalar.numeric_total() != Ok(0)),
    }
}

/// Registry holding the five aggregates over `places` (place id → current value).
pub fn aggregates(places: BTreeMap<String, Value>) -> FunctionRegistry {
    let places = Arc::new(places);
    let mut registry = FunctionRegistry::new();

    let snapshot = Arc::clone(&places);
    registry.register_aggregate("sum", move |prefix| {
        checked_total(matching(&snapshot, prefix)).map(Value::Int)
    });

    let snapshot = Arc::clone(&places);
    registry.register_aggregate("count", move |prefix| {
        let count = matching(&snapshot, prefix).map(non_zero_entries).sum::<usize>();
        Ok(Value::Int(count as i64))
    });

    let snapshot = Arc::clone(&places);
    registry.register_aggregate("tokens", move |id| {
        snapshot
            .get(id)
            .ok_or_else(|| EvalError::UnknownIdentifier(id.to_string()))?
            .numeric_total()
            .map(Value::Int)
    });

    let snapshot = Arc::clone(&places);
    registry.register_aggregate("min", move |prefix| {
        let totals = matching(&snapshot, prefix)
            .map(Value::numeric_total)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Int(totals.into_iter().min().unwrap_or(0)))
    });

    let snapshot = places;
    registry.register_aggregate("max", move |prefix| {
        let totals = matching(&snapshot, prefix)
            .map(Value::numeric_total)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Int(totals.into_iter().max().unwrap_or(0)))
    });

    registry
}
