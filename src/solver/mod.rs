//! # 连续松弛
//!
//! 把模型视为质量作用动力学系统：每个变迁的通量为
//! `flux(t) = rate(t) · Π_{p ∈ •t} x_p^{Pre[p,t]}`，库所的导数为
//! `dx_p/dt = Σ_t (Post[p,t] - Pre[p,t]) · flux(t)`。
//!
//! 积分器通过 [`ContinuousSolver`] 注入；[`Rk4Solver`] 是随库提供的定步长参考实现。

pub mod rk4;

use thiserror::Error;

use crate::net::{Idx, Model, PlaceId};

pub use rk4::Rk4Solver;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("invalid time span [{start}, {end}]")]
    InvalidTimeSpan { start: f64, end: f64 },
    #[error("invalid step size {0}")]
    InvalidStep(f64),
    #[error("state became non-finite at t = {time}")]
    NonFiniteState { time: f64 },
}

/// One mass-action reaction; `inputs`/`outputs` hold place indices, repeated per unit of stoichiometry.
#[derive(Debug, Clone, PartialEq)]
pub struct Reaction {
    pub id: String,
    pub rate: f64,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
}

impl Reaction {
    pub fn flux(&self, state: &[f64]) -> f64 {
        self.inputs
            .iter()
            .fold(self.rate, |acc, &place| acc * state[place])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OdeProblem {
    pub places: Vec<String>,
    pub initial: Vec<f64>,
    pub reactions: Vec<Reaction>,
    pub start: f64,
    pub end: f64,
}

impl OdeProblem {
    /// Mass-action relaxation of `model` over `[0, time_span]`; every arc counts with unit weight.
    pub fn from_model(model: &Model, time_span: f64) -> Self {
        let places = model.places().iter().map(|p| p.id.clone()).collect();
        let initial = model
            .places()
            .iter()
            .map(|p| p.initial_tokens() as f64)
            .collect();

        let reactions = model
            .transitions()
            .iter_enumerated()
            .map(|(transition, definition)| Reaction {
                id: definition.id.clone(),
                rate: definition.rate,
                inputs: stoichiometry(model.pre().column(transition)),
                outputs: stoichiometry(model.post().column(transition)),
            })
            .collect();

        Self {
            places,
            initial,
            reactions,
            start: 0.0,
            end: time_span,
        }
    }

    pub fn dimension(&self) -> usize {
        self.places.len()
    }

    /// Right-hand side `dx/dt` at `state`.
    pub fn derivative(&self, state: &[f64], out: &mut [f64]) {
        out.iter_mut().for_each(|v| *v = 0.0);
        for reaction in &self.reactions {
            let flux = reaction.flux(state);
            if flux == 0.0 {
                continue;
            }
            for &place in &reaction.inputs {
                out[place] -= flux;
            }
            for &place in &reaction.outputs {
                out[place] += flux;
            }
        }
    }
}

fn stoichiometry<'a>(column: impl Iterator<Item = (PlaceId, &'a u64)>) -> Vec<usize> {
    column
        .flat_map(|(place, weight)| std::iter::repeat_n(place.index(), *weight as usize))
        .collect()
}

/// Complete trajectory returned by a solver; `states[i]` is the state at `times[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    places: Vec<String>,
    times: Vec<f64>,
    states: Vec<Vec<f64>>,
}

impl Solution {
    pub fn new(places: Vec<String>, times: Vec<f64>, states: Vec<Vec<f64>>) -> Self {
        debug_assert_eq!(times.len(), states.len());
        Self {
            places,
            times,
            states,
        }
    }

    pub fn places(&self) -> &[String] {
        &self.places
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn place_index(&self, place: &str) -> Option<usize> {
        self.places.iter().position(|p| p == place)
    }

    pub fn state_at(&self, index: usize) -> Option<&[f64]> {
        self.states.get(index).map(Vec::as_slice)
    }

    pub fn final_state(&self) -> &[f64] {
        self.states.last().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn final_value(&self, place: &str) -> Option<f64> {
        let idx = self.place_index(place)?;
        self.final_state().get(idx).copied()
    }

    pub fn series(&self, place: &str) -> Option<Vec<f64>> {
        let idx = self.place_index(place)?;
        Some(self.states.iter().map(|state| state[idx]).collect())
    }

    /// Value of `place` at `time`, linearly interpolated and clamped to the solved span.
    pub fn value_at(&self, place: &str, time: f64) -> Option<f64> {
        let idx = self.place_index(place)?;
        if time.is_nan() {
            return None;
        }
        let (first, last) = (*self.times.first()?, *self.times.last()?);
        if time <= first {
            return Some(self.states[0][idx]);
        }
        if time >= last {
            return Some(self.states[self.states.len() - 1][idx]);
        }
        let upper = self.times.partition_point(|&t| t < time);
        let (t0, t1) = (self.times[upper - 1], self.times[upper]);
        let (x0, x1) = (self.states[upper - 1][idx], self.states[upper][idx]);
        if t1 == t0 {
            return Some(x1);
        }
        Some(x0 + (x1 - x0) * (time - t0) / (t1 - t0))
    }

    /// Sum over all places at every time point.
    pub fn total_mass(&self) -> Vec<f64> {
        self.states.iter().map(|state| state.iter().sum()).collect()
    }
}

/// Integrator seam; implementations must be shareable across the sensitivity workers.
pub trait ContinuousSolver: Sync {
    fn solve(&self, problem: &OdeProblem) -> Result<Solution, SolveError>;
}
