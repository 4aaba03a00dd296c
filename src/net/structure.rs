//! 静态结构元素：库所、变迁、弧与守恒约束。
use std::fmt;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::expr::{Expr, ParseError, Value, parse};
use crate::net::ids::{PlaceId, TransitionId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceKind {
    /// Holds a non-negative integer count.
    #[default]
    Token,
    /// Holds a structured value (e.g. a balance map) addressed through keyed arcs.
    Data,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Place {
    pub id: String,
    #[serde(default)]
    pub kind: PlaceKind,
    #[serde(default)]
    pub initial: Value,
    #[serde(default)]
    pub exported: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<i64>,
}

impl Place {
    pub fn token(id: impl Into<String>, initial: i64) -> Self {
        Self {
            id: id.into(),
            kind: PlaceKind::Token,
            initial: Value::Int(initial),
            exported: false,
            capacity: None,
        }
    }

    pub fn data(id: impl Into<String>, initial: Value) -> Self {
        Self {
            id: id.into(),
            kind: PlaceKind::Data,
            initial,
            exported: false,
            capacity: None,
        }
    }

    pub fn exported(mut self) -> Self {
        self.exported = true;
        self
    }

    pub fn with_capacity(mut self, capacity: i64) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn is_token(&self) -> bool {
        self.kind == PlaceKind::Token
    }

    /// Initial count; data places and non-numeric initial values count as zero.
    pub fn initial_tokens(&self) -> i64 {
        match self.kind {
            PlaceKind::Token => self.initial.as_int().unwrap_or(0),
            PlaceKind::Data => 0,
        }
    }
}

fn default_rate() -> f64 {
    1.0
}

/// Parsed guard, cached on first use.
type GuardCache = OnceCell<Result<Option<Expr>, ParseError>>;

#[derive(Clone, Serialize, Deserialize)]
pub struct Transition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    /// Mass-action rate used by the continuous relaxation.
    #[serde(default = "default_rate")]
    pub rate: f64,
    #[serde(skip)]
    compiled: GuardCache,
}

impl Transition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            guard: None,
            rate: default_rate(),
            compiled: GuardCache::new(),
        }
    }

    pub fn with_guard(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self.compiled = GuardCache::new();
        self
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// The guard's syntax tree, parsed lazily; `None` when the transition is unguarded.
    pub fn guard_expr(&self) -> Result<Option<&Expr>, ParseError> {
        let cached = self.compiled.get_or_init(|| match self.guard.as_deref() {
            Some(source) if !source.trim().is_empty() => parse(source).map(Some),
            _ => Ok(None),
        });
        match cached {
            Ok(expr) => Ok(expr.as_ref()),
            Err(err) => Err(err.clone()),
        }
    }
}

impl PartialEq for Transition {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.guard == other.guard && self.rate == other.rate
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("id", &self.id)
            .field("guard", &self.guard)
            .field("rate", &self.rate)
            .finish()
    }
}

/// Arc as written in a model document: endpoints by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Arc {
    pub source: String,
    pub target: String,
    /// Map access path, e.g. `["from"]` for `balances[from]`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    /// Name of the binding carrying the moved amount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Arc {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            keys: Vec::new(),
            value: None,
        }
    }

    pub fn keyed<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn is_keyed(&self) -> bool {
        !self.keys.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArcDirection {
    PlaceToTransition,
    TransitionToPlace,
}

/// Arc with endpoints resolved against a validated model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowArc {
    pub place: PlaceId,
    pub transition: TransitionId,
    pub direction: ArcDirection,
    pub keyed: bool,
}

impl FlowArc {
    pub fn is_input(&self) -> bool {
        self.direction == ArcDirection::PlaceToTransition
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invariant {
    pub id: String,
    /// E.g. `sum(balances) == totalSupply`.
    pub expression: String,
}

impl Invariant {
    pub fn new(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            expression: expression.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_is_parsed_once_and_cached() {
        let transition = Transition::new("transfer").with_guard("balances[from] >= amount");
        let first = transition.guard_expr().unwrap().unwrap() as *const Expr;
        let second = transition.guard_expr().unwrap().unwrap() as *const Expr;
        assert_eq!(first, second);
    }

    #[test]
    fn blank_guard_is_absent() {
        assert_eq!(Transition::new("t").guard_expr().unwrap(), None);
        assert_eq!(Transition::new("t").with_guard("  ").guard_expr().unwrap(), None);
    }

    #[test]
    fn malformed_guard_reports_parse_error() {
        let transition = Transition::new("t").with_guard("a >=");
        assert!(transition.guard_expr().is_err());
        assert!(transition.guard_expr().is_err());
    }

    #[test]
    fn place_defaults_from_json() {
        let place: Place = serde_json::from_str(r#"{"id": "P1", "initial": 5}"#).unwrap();
        assert_eq!(place, Place::token("P1", 5));
        let transition: Transition = serde_json::from_str(r#"{"id": "t"}"#).unwrap();
        assert_eq!(transition.rate, 1.0);
    }
}
