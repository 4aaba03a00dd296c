//! 发生语义：可激发判定、事务式发射、守卫求值与不变量复核。
//!
//! 后继标识总是在副本上计算，只有在容量、守卫与全部不变量检查通过后才提交；
//! 任意失败都不会改变当前标识。
use thiserror::Error;

use crate::expr::{
    Bindings, CompiledExpr, EvalError, ExprError, FunctionRegistry, ParseError, Value, aggregates,
    compile,
};
use crate::net::{Arc, Model, TransitionId};

use super::marking::Marking;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FireError {
    #[error("unknown transition `{0}`")]
    UnknownTransition(String),
    #[error("transition `{0}` is not enabled under the current marking")]
    NotEnabled(String),
    #[error("capacity exceeded at place `{place}`: {after} > {capacity}")]
    CapacityExceeded {
        place: String,
        after: i64,
        capacity: i64,
    },
    #[error("token count overflows at place `{place}`")]
    TokenOverflow { place: String },
    #[error("guard of `{transition}` does not parse: {source}")]
    GuardParse {
        transition: String,
        source: ParseError,
    },
    #[error("guard of `{transition}` cannot be evaluated: {source}")]
    GuardEvaluation {
        transition: String,
        source: EvalError,
    },
    #[error("guard of `{transition}` is not satisfied: {guard}")]
    GuardNotSatisfied { transition: String, guard: String },
    #[error("keyed arc of `{transition}` cannot be applied: {source}")]
    KeyedTransfer {
        transition: String,
        source: EvalError,
    },
    #[error("invariant `{invariant}` violated after firing: {expression}")]
    InvariantViolated {
        invariant: String,
        expression: String,
    },
    #[error("invariant `{invariant}` cannot be evaluated: {source}")]
    InvariantEvaluation {
        invariant: String,
        source: ExprError,
    },
}

/// Result of evaluating one invariant against a marking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantOutcome {
    pub id: String,
    pub expression: String,
    pub result: Result<bool, ExprError>,
}

impl InvariantOutcome {
    pub fn holds(&self) -> bool {
        matches!(self.result, Ok(true))
    }
}

/// Execution context owning one marking of a shared model.
#[derive(Debug, Clone)]
pub struct Execution<'m> {
    model: &'m Model,
    marking: Marking,
    sequence: u64,
    history: Vec<TransitionId>,
    check_invariants: bool,
    invariants: Vec<Result<CompiledExpr, ParseError>>,
}

impl<'m> Execution<'m> {
    pub fn new(model: &'m Model) -> Self {
        let invariants = model
            .invariants()
            .iter()
            .map(|invariant| compile(&invariant.expression))
            .collect();
        Self {
            model,
            marking: Marking::initial(model),
            sequence: 0,
            history: Vec::new(),
            check_invariants: true,
            invariants,
        }
    }

    /// Turns the post-fire invariant check on or off (on by default).
    pub fn with_invariant_checking(mut self, enabled: bool) -> Self {
        self.check_invariants = enabled;
        self
    }

    pub fn model(&self) -> &'m Model {
        self.model
    }

    pub fn marking(&self) -> &Marking {
        &self.marking
    }

    /// Number of successful firings since construction or the last reset.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn history(&self) -> &[TransitionId] {
        &self.history
    }

    pub fn history_ids(&self) -> Vec<&'m str> {
        let model = self.model;
        self.history
            .iter()
            .map(|&t| model.transitions()[t].id.as_str())
            .collect()
    }

    pub fn reset(&mut self) {
        self.marking = Marking::initial(self.model);
        self.sequence = 0;
        self.history.clear();
    }

    /// Unknown transitions are never enabled.
    pub fn enabled(&self, transition: &str) -> bool {
        self.model
            .transition_id(transition)
            .is_some_and(|t| self.is_enabled_in(&self.marking, t))
    }

    pub fn enabled_transitions(&self) -> Vec<TransitionId> {
        self.model
            .transitions()
            .indices()
            .filter(|&t| self.is_enabled_in(&self.marking, t))
            .collect()
    }

    pub fn fire(&mut self, transition: &str) -> Result<(), FireError> {
        let t = self.lookup(transition)?;
        let next = self.successor(&self.marking, t)?;
        self.commit(t, next);
        Ok(())
    }

    pub fn fire_with_bindings(
        &mut self,
        transition: &str,
        bindings: &Bindings,
    ) -> Result<(), FireError> {
        self.fire_with_guard_functions(transition, bindings, &FunctionRegistry::new())
    }

    /// Evaluates the guard with `bindings` layered over the place values and
    /// `functions` layered over the builtins and marking aggregates, then fires.
    /// Keyed arcs move the amount bound by their value binding.
    pub fn fire_with_guard_functions(
        &mut self,
        transition: &str,
        bindings: &Bindings,
        functions: &FunctionRegistry,
    ) -> Result<(), FireError> {
        let t = self.lookup(transition)?;
        let model = self.model;
        let definition = &model.transitions()[t];

        let guard = definition
            .guard_expr()
            .map_err(|source| FireError::GuardParse {
                transition: definition.id.clone(),
                source,
            })?;
        if let Some(guard) = guard {
            let scope = self.binding_scope(&self.marking, bindings);
            let registry = self.function_scope(&self.marking).merged(functions);
            let passed = guard.evaluate_bool(&scope, &registry).map_err(|source| {
                FireError::GuardEvaluation {
                    transition: definition.id.clone(),
                    source,
                }
            })?;
            if !passed {
                log::debug!("guard of `{}` rejected firing", definition.id);
                return Err(FireError::GuardNotSatisfied {
                    transition: definition.id.clone(),
                    guard: definition.guard.clone().unwrap_or_default(),
                });
            }
        }

        let mut next = self.apply_token_flow(&self.marking, t)?;
        self.apply_keyed_arcs(&mut next, t, bindings)?;
        self.check_successor(&next)?;
        self.commit(t, next);
        Ok(())
    }

    pub fn check_invariants(&self) -> Vec<InvariantOutcome> {
        self.evaluate_invariants(&self.marking)
    }

    pub(crate) fn lookup(&self, transition: &str) -> Result<TransitionId, FireError> {
        self.model
            .transition_id(transition)
            .ok_or_else(|| FireError::UnknownTransition(transition.to_string()))
    }

    pub(crate) fn is_enabled_in(&self, marking: &Marking, transition: TransitionId) -> bool {
        self.model
            .unkeyed_pre()
            .column(transition)
            .all(|(place, weight)| marking.tokens(place) >= *weight as i64)
    }

    /// Raw successor of `marking` under `transition`, invariants included; guards are not consulted.
    pub(crate) fn successor(
        &self,
        marking: &Marking,
        transition: TransitionId,
    ) -> Result<Marking, FireError> {
        let next = self.apply_token_flow(marking, transition)?;
        self.check_successor(&next)?;
        Ok(next)
    }

    fn apply_token_flow(
        &self,
        marking: &Marking,
        transition: TransitionId,
    ) -> Result<Marking, FireError> {
        if !self.is_enabled_in(marking, transition) {
            return Err(FireError::NotEnabled(
                self.model.transitions()[transition].id.clone(),
            ));
        }

        let mut next = marking.clone();
        for (place, weight) in self.model.unkeyed_pre().column(transition) {
            if *weight > 0 {
                *next.tokens_mut(place) -= *weight as i64;
            }
        }
        for (place, weight) in self.model.unkeyed_post().column(transition) {
            if *weight == 0 {
                continue;
            }
            let tokens = next.tokens_mut(place);
            let after = i64::try_from(*weight)
                .ok()
                .and_then(|weight| tokens.checked_add(weight))
                .ok_or_else(|| FireError::TokenOverflow {
                    place: self.model.places()[place].id.clone(),
                })?;
            if let Some(capacity) = self.model.places()[place].capacity {
                if after > capacity {
                    return Err(FireError::CapacityExceeded {
                        place: self.model.places()[place].id.clone(),
                        after,
                        capacity,
                    });
                }
            }
            *tokens = after;
        }
        Ok(next)
    }

    fn apply_keyed_arcs(
        &self,
        next: &mut Marking,
        transition: TransitionId,
        bindings: &Bindings,
    ) -> Result<(), FireError> {
        let definition = &self.model.transitions()[transition];
        let keyed = self
            .model
            .flows()
            .iter()
            .zip(self.model.arcs())
            .filter(|(flow, _)| flow.keyed && flow.transition == transition);

        for (flow, arc) in keyed {
            let Some(value) = next.data_mut(flow.place) else {
                return Err(FireError::KeyedTransfer {
                    transition: definition.id.clone(),
                    source: EvalError::type_mismatch(
                        "index",
                        format!("`{}` holds no data", self.model.places()[flow.place].id),
                    ),
                });
            };
            let delta = transfer_amount(arc, bindings)
                .and_then(|amount| {
                    if flow.is_input() {
                        amount.checked_neg().ok_or(EvalError::Overflow { op: "-" })
                    } else {
                        Ok(amount)
                    }
                })
                .and_then(|delta| adjust_entry(value, &arc.keys, bindings, delta))
                .map_err(|source| FireError::KeyedTransfer {
                    transition: definition.id.clone(),
                    source,
                })?;
            log::debug!(
                "`{}` moved {} through {}[{}]",
                definition.id,
                delta,
                self.model.places()[flow.place].id,
                arc.keys.join("][")
            );
        }
        Ok(())
    }

    fn check_successor(&self, next: &Marking) -> Result<(), FireError> {
        if !self.check_invariants {
            return Ok(());
        }
        for outcome in self.evaluate_invariants(next) {
            match outcome.result {
                Ok(true) => {}
                Ok(false) => {
                    return Err(FireError::InvariantViolated {
                        invariant: outcome.id,
                        expression: outcome.expression,
                    });
                }
                Err(source) => {
                    return Err(FireError::InvariantEvaluation {
                        invariant: outcome.id,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    fn commit(&mut self, transition: TransitionId, next: Marking) {
        self.marking = next;
        self.sequence += 1;
        self.history.push(transition);
        log::debug!(
            "#{} fired `{}` -> {}",
            self.sequence,
            self.model.transitions()[transition].id,
            self.marking.display(self.model)
        );
    }

    fn evaluate_invariants(&self, marking: &Marking) -> Vec<InvariantOutcome> {
        if self.invariants.is_empty() {
            return Vec::new();
        }
        let scope = self.binding_scope(marking, &Bindings::new());
        let registry = self.function_scope(marking);
        self.model
            .invariants()
            .iter()
            .zip(&self.invariants)
            .map(|(invariant, compiled)| {
                let result = match compiled {
                    Ok(expr) => expr
                        .evaluate_bool(&scope, &registry)
                        .map_err(ExprError::from),
                    Err(err) => Err(ExprError::from(err.clone())),
                };
                InvariantOutcome {
                    id: invariant.id.clone(),
                    expression: invariant.expression.clone(),
                    result,
                }
            })
            .collect()
    }

    fn binding_scope(&self, marking: &Marking, overrides: &Bindings) -> Bindings {
        let mut scope: Bindings = marking.to_values(self.model).into_iter().collect();
        scope.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        scope
    }

    fn function_scope(&self, marking: &Marking) -> FunctionRegistry {
        FunctionRegistry::with_builtins().merged(&aggregates(marking.to_values(self.model)))
    }
}

fn transfer_amount(arc: &Arc, bindings: &Bindings) -> Result<i64, EvalError> {
    let Some(name) = arc.value.as_deref() else {
        return Ok(1);
    };
    let value = bindings
        .get(name)
        .ok_or_else(|| EvalError::UnknownIdentifier(name.to_string()))?;
    value.as_int().ok_or_else(|| {
        EvalError::type_mismatch("transfer", format!("expected int, found {}", value.type_name()))
    })
}

/// Adds `delta` to the entry at `keys`; each key names a binding, or is used literally when unbound.
fn adjust_entry(
    target: &mut Value,
    keys: &[String],
    bindings: &Bindings,
    delta: i64,
) -> Result<i64, EvalError> {
    let Some((first, rest)) = keys.split_first() else {
        let current = target.as_int().unwrap_or(0);
        *target = Value::Int(
            current
                .checked_add(delta)
                .ok_or(EvalError::Overflow { op: "+" })?,
        );
        return Ok(delta);
    };

    let key = match bindings.get(first) {
        Some(bound) => bound.as_key().ok_or_else(|| {
            EvalError::type_mismatch("index", format!("cannot use {} as a key", bound.type_name()))
        })?,
        None => first.clone(),
    };
    match target {
        Value::Map(entries) => {
            let slot = entries.entry(key).or_insert_with(|| {
                if rest.is_empty() {
                    Value::Int(0)
                } else {
                    Value::Map(Default::default())
                }
            });
            adjust_entry(slot, rest, bindings, delta)
        }
        other => Err(EvalError::type_mismatch(
            "index",
            format!("cannot index into {}", other.type_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{ModelBuilder, Place, Transition};

    fn cycle() -> Model {
        ModelBuilder::new("cycle")
            .place(Place::token("P1", 5))
            .place(Place::token("P2", 0))
            .transition(Transition::new("forward"))
            .transition(Transition::new("back"))
            .flow("P1", "forward")
            .flow("forward", "P2")
            .flow("P2", "back")
            .flow("back", "P1")
            .invariant("conservation", "P1 + P2 == 5")
            .build()
            .unwrap()
    }

    fn token() -> Model {
        ModelBuilder::new("token")
            .place(Place::data("balances", Value::map([("alice", 100.into())])))
            .place(Place::token("totalSupply", 100))
            .transition(
                Transition::new("transfer").with_guard("balances[from] >= amount && amount > 0"),
            )
            .arc(
                Arc::new("balances", "transfer")
                    .keyed(["from"])
                    .with_value("amount"),
            )
            .arc(
                Arc::new("transfer", "balances")
                    .keyed(["to"])
                    .with_value("amount"),
            )
            .invariant("supply", "sum(balances) == totalSupply")
            .build()
            .unwrap()
    }

    fn bindings<const N: usize>(entries: [(&str, Value); N]) -> Bindings {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn firing_moves_tokens_and_records_history() {
        let model = cycle();
        let mut exec = Execution::new(&model);
        let p1 = model.place_id("P1").unwrap();
        let p2 = model.place_id("P2").unwrap();

        assert!(exec.enabled("forward"));
        assert!(!exec.enabled("back"));
        assert!(!exec.enabled("missing"));

        exec.fire("forward").unwrap();
        exec.fire("forward").unwrap();
        exec.fire("back").unwrap();
        assert_eq!(exec.marking().tokens(p1), 4);
        assert_eq!(exec.marking().tokens(p2), 1);
        assert_eq!(exec.sequence(), 3);
        assert_eq!(exec.history_ids(), vec!["forward", "forward", "back"]);
        assert!(exec.check_invariants().iter().all(InvariantOutcome::holds));

        exec.reset();
        assert_eq!(exec.marking().tokens(p1), 5);
        assert!(exec.history().is_empty());
        assert_eq!(exec.sequence(), 0);
    }

    #[test]
    fn unknown_and_disabled_transitions_are_rejected() {
        let model = cycle();
        let mut exec = Execution::new(&model);
        assert_eq!(
            exec.fire("nope"),
            Err(FireError::UnknownTransition("nope".into()))
        );
        assert_eq!(exec.fire("back"), Err(FireError::NotEnabled("back".into())));
        assert_eq!(exec.sequence(), 0);
    }

    #[test]
    fn invariant_violation_leaves_marking_untouched() {
        let model = ModelBuilder::new("leaky")
            .place(Place::token("P1", 5))
            .place(Place::token("P2", 0))
            .transition(Transition::new("leak"))
            .flow("P1", "leak")
            .invariant("conservation", "P1 + P2 == 5")
            .build()
            .unwrap();
        let mut exec = Execution::new(&model);
        let before = exec.marking().clone();

        let err = exec.fire("leak").unwrap_err();
        assert!(matches!(err, FireError::InvariantViolated { ref invariant, .. } if invariant == "conservation"));
        assert_eq!(exec.marking(), &before);
        assert_eq!(exec.sequence(), 0);

        let mut unchecked = Execution::new(&model).with_invariant_checking(false);
        unchecked.fire("leak").unwrap();
        assert_eq!(unchecked.marking().total_tokens(), 4);
        assert!(!unchecked.check_invariants()[0].holds());
    }

    #[test]
    fn invariant_evaluation_errors_are_distinguished() {
        let model = ModelBuilder::new("m")
            .place(Place::token("P1", 1))
            .transition(Transition::new("t"))
            .flow("P1", "t")
            .flow("t", "P1")
            .invariant("broken", "ghost == 1")
            .build()
            .unwrap();
        let mut exec = Execution::new(&model);
        match exec.fire("t") {
            Err(FireError::InvariantEvaluation { invariant, source }) => {
                assert_eq!(invariant, "broken");
                assert_eq!(
                    source,
                    ExprError::Eval(EvalError::UnknownIdentifier("ghost".into()))
                );
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(exec.sequence(), 0);
    }

    #[test]
    fn capacity_is_respected() {
        let model = ModelBuilder::new("m")
            .place(Place::token("src", 3))
            .place(Place::token("dst", 1).with_capacity(1))
            .transition(Transition::new("move"))
            .flow("src", "move")
            .flow("move", "dst")
            .build()
            .unwrap();
        let mut exec = Execution::new(&model);
        assert_eq!(
            exec.fire("move"),
            Err(FireError::CapacityExceeded {
                place: "dst".into(),
                after: 2,
                capacity: 1
            })
        );
        assert_eq!(exec.marking().total_tokens(), 4);
    }

    #[test]
    fn token_overflow_is_reported() {
        let model = ModelBuilder::new("m")
            .place(Place::token("src", 1))
            .place(Place::token("dst", i64::MAX))
            .transition(Transition::new("move"))
            .flow("src", "move")
            .flow("move", "dst")
            .build()
            .unwrap();
        let mut exec = Execution::new(&model);
        assert_eq!(
            exec.fire("move"),
            Err(FireError::TokenOverflow { place: "dst".into() })
        );
        assert_eq!(exec.sequence(), 0);
    }

    #[test]
    fn invariant_sum_overflow_is_an_evaluation_error() {
        let model = ModelBuilder::new("ledger")
            .place(Place::data("bal", Value::map([("a", Value::Int(i64::MAX))])))
            .place(Place::token("P", 1))
            .transition(Transition::new("credit"))
            .flow("P", "credit")
            .arc(Arc::new("credit", "bal").keyed(["b"]))
            .invariant("bounded", "sum(bal) >= 0")
            .build()
            .unwrap();
        let mut exec = Execution::new(&model);
        let before = exec.marking().clone();
        match exec.fire_with_bindings("credit", &Bindings::new()) {
            Err(FireError::InvariantEvaluation { invariant, source }) => {
                assert_eq!(invariant, "bounded");
                assert_eq!(source, ExprError::Eval(EvalError::Overflow { op: "sum" }));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(exec.marking(), &before);
    }

    #[test]
    fn guarded_transfer_moves_balances() {
        let model = token();
        let mut exec = Execution::new(&model);
        let balances = model.place_id("balances").unwrap();

        exec.fire_with_bindings(
            "transfer",
            &bindings([("from", "alice".into()), ("to", "bob".into()), ("amount", 30.into())]),
        )
        .unwrap();
        assert_eq!(
            exec.marking().data(balances),
            Some(&Value::map([("alice", 70.into()), ("bob", 30.into())]))
        );
        assert!(exec.check_invariants()[0].holds());
    }

    #[test]
    fn guard_failures_do_not_mutate() {
        let model = token();
        let mut exec = Execution::new(&model);
        let before = exec.marking().clone();

        let err = exec
            .fire_with_bindings(
                "transfer",
                &bindings([("from", "bob".into()), ("to", "alice".into()), ("amount", 1.into())]),
            )
            .unwrap_err();
        assert!(matches!(err, FireError::GuardNotSatisfied { .. }));

        let err = exec
            .fire_with_bindings("transfer", &bindings([("from", "alice".into())]))
            .unwrap_err();
        assert_eq!(
            err,
            FireError::GuardEvaluation {
                transition: "transfer".into(),
                source: EvalError::UnknownIdentifier("amount".into()),
            }
        );
        assert_eq!(exec.marking(), &before);
        assert_eq!(exec.sequence(), 0);
    }

    #[test]
    fn guard_parse_and_type_errors() {
        let model = ModelBuilder::new("m")
            .place(Place::token("P", 1))
            .transition(Transition::new("bad").with_guard("P >="))
            .transition(Transition::new("numeric").with_guard("P + 1"))
            .flow("P", "bad")
            .flow("P", "numeric")
            .build()
            .unwrap();
        let mut exec = Execution::new(&model);
        assert!(matches!(
            exec.fire_with_bindings("bad", &Bindings::new()),
            Err(FireError::GuardParse { .. })
        ));
        assert!(matches!(
            exec.fire_with_bindings("numeric", &Bindings::new()),
            Err(FireError::GuardEvaluation {
                source: EvalError::TypeMismatch { .. },
                ..
            })
        ));
    }

    #[test]
    fn guard_functions_are_injected() {
        let model = ModelBuilder::new("m")
            .place(Place::token("P", 1))
            .place(Place::token("Q", 0))
            .transition(Transition::new("t").with_guard("allowed(caller)"))
            .flow("P", "t")
            .flow("t", "Q")
            .build()
            .unwrap();
        let mut functions = FunctionRegistry::new();
        functions.register("allowed", |args| {
            Ok(Value::Bool(args.first().and_then(Value::as_str) == Some("owner")))
        });

        let mut exec = Execution::new(&model);
        let stranger = bindings([("caller", "mallory".into())]);
        assert!(matches!(
            exec.fire_with_guard_functions("t", &stranger, &functions),
            Err(FireError::GuardNotSatisfied { .. })
        ));
        let owner = bindings([("caller", "owner".into())]);
        exec.fire_with_guard_functions("t", &owner, &functions).unwrap();
        assert_eq!(exec.history_ids(), vec!["t"]);
    }
}
