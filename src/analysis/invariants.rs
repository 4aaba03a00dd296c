//! P-不变量：启发式发现与结构化证明。
//!
//! 加权和 `w · M` 对所有可达标识恒定，当且仅当对每个变迁 `t` 有 `w · C[:, t] = 0`。
//! 发现过程把守恒变迁的输入、输出库所并入同一连通分量（并查集），
//! 每个规模不小于 2 的分量给出一个系数全为 1 的候选，它不是完整的不变量基
//! （完整基见 [`super::basis`]）。
use std::collections::BTreeMap;
use std::fmt;

use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};

use crate::net::Model;

use super::matrix::IncidenceMatrix;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceInvariant {
    /// Place id → signed coefficient; zero coefficients are omitted.
    pub weights: BTreeMap<String, i64>,
    /// Constant weighted sum, taken from the initial marking.
    pub value: i64,
    pub verified: bool,
}

impl PlaceInvariant {
    /// Candidate with `value` computed from the model's initial tokens and `verified` left false.
    pub fn from_weights(model: &Model, weights: BTreeMap<String, i64>) -> Self {
        let value = saturate(
            weights
                .iter()
                .map(|(place, weight)| {
                    i128::from(*weight).saturating_mul(i128::from(
                        model.place(place).map(|p| p.initial_tokens()).unwrap_or(0),
                    ))
                })
                .fold(0i128, i128::saturating_add),
        );
        Self {
            weights,
            value,
            verified: false,
        }
    }

    pub fn places(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }

    /// Guard-language form, e.g. `P1 + P2 == 5`; usable as a model invariant.
    pub fn to_expression(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PlaceInvariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (place, &weight) in &self.weights {
            let magnitude = weight.unsigned_abs();
            if first {
                if weight < 0 {
                    write!(f, "-")?;
                }
            } else if weight < 0 {
                write!(f, " - ")?;
            } else {
                write!(f, " + ")?;
            }
            if magnitude == 1 {
                write!(f, "{place}")?;
            } else {
                write!(f, "{magnitude} * {place}")?;
            }
            first = false;
        }
        if first {
            write!(f, "0")?;
        }
        write!(f, " == {}", self.value)
    }
}

/// A transition whose column is not annihilated by the candidate's weights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvariantViolation {
    pub transition: String,
    /// `w · C[:, t]`: how much firing the transition changes the weighted sum.
    pub effect: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvariantCheck {
    pub holds: bool,
    /// Places with non-zero weight that the model does not contain.
    pub unknown_places: Vec<String>,
    pub violations: Vec<InvariantViolation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuralAnalysis {
    pub conservative: Vec<String>,
    pub non_conservative: Vec<String>,
    pub invariants: Vec<PlaceInvariant>,
}

impl StructuralAnalysis {
    pub fn is_conservative(&self, transition: &str) -> bool {
        self.conservative.iter().any(|t| t == transition)
    }
}

/// `weights · C[:, t] == 0` for every transition; weights on unknown places make the proof fail.
pub fn structurally_verify(invariant: &PlaceInvariant, matrix: &IncidenceMatrix) -> bool {
    verify_invariant(invariant, matrix).holds
}

pub fn verify_invariant(invariant: &PlaceInvariant, matrix: &IncidenceMatrix) -> InvariantCheck {
    let mut rows = Vec::with_capacity(invariant.weights.len());
    let mut unknown_places = Vec::new();
    for (place, &weight) in &invariant.weights {
        if weight == 0 {
            continue;
        }
        match matrix.place_index(place) {
            Some(row) => rows.push((row, weight)),
            None => unknown_places.push(place.clone()),
        }
    }

    let violations: Vec<_> = matrix
        .transitions()
        .iter()
        .enumerate()
        .filter_map(|(col, transition)| {
            let effect: i128 = rows
                .iter()
                .map(|&(row, weight)| i128::from(weight) * i128::from(matrix.get(row, col)))
                .fold(0, i128::saturating_add);
            (effect != 0).then(|| InvariantViolation {
                transition: transition.clone(),
                effect: saturate(effect),
            })
        })
        .collect();

    InvariantCheck {
        holds: unknown_places.is_empty() && violations.is_empty(),
        unknown_places,
        violations,
    }
}

/// Weighted sums are accumulated in `i128` and clamped back.
fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value > 0 { i64::MAX } else { i64::MIN })
}

pub fn discover_invariants(model: &Model, matrix: &IncidenceMatrix) -> Vec<PlaceInvariant> {
    let place_count = matrix.places().len();
    let mut components = UnionFind::<usize>::new(place_count);
    let mut touched = vec![false; place_count];

    for (transition_id, transition) in model.transitions().iter_enumerated() {
        let Some(col) = matrix.transition_index(&transition.id) else {
            continue;
        };
        if !matrix.is_conservative(col) {
            continue;
        }
        let partners: Vec<usize> = model
            .input_places(transition_id)
            .chain(model.output_places(transition_id))
            .filter_map(|place| matrix.place_index(&model.places()[place].id))
            .collect();
        for &place in &partners {
            touched[place] = true;
        }
        for pair in partners.windows(2) {
            components.union(pair[0], pair[1]);
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (place, label) in components.into_labeling().into_iter().enumerate() {
        if touched[place] {
            groups.entry(label).or_default().push(place);
        }
    }

    let mut invariants: Vec<PlaceInvariant> = groups
        .into_values()
        .filter(|members| members.len() >= 2)
        .map(|members| {
            let weights = members
                .into_iter()
                .map(|row| (matrix.places()[row].clone(), 1))
                .collect();
            let mut invariant = PlaceInvariant::from_weights(model, weights);
            invariant.verified = structurally_verify(&invariant, matrix);
            if !invariant.verified {
                log::warn!("candidate invariant `{}` is not structurally provable", invariant);
            }
            invariant
        })
        .collect();
    invariants.sort_by(|a, b| a.weights.keys().cmp(b.weights.keys()));
    invariants
}

pub fn analyze(model: &Model) -> StructuralAnalysis {
    let matrix = IncidenceMatrix::build(model);
    analyze_matrix(model, &matrix)
}

pub fn analyze_matrix(model: &Model, matrix: &IncidenceMatrix) -> StructuralAnalysis {
    let (conservative, non_conservative): (Vec<_>, Vec<_>) = matrix
        .transitions()
        .iter()
        .enumerate()
        .partition(|(col, _)| matrix.is_conservative(*col));
    let invariants = discover_invariants(model, matrix);

    log::info!(
        "model `{}`: {} conservative / {} non-conservative transitions, {} invariant(s)",
        model.name(),
        conservative.len(),
        non_conservative.len(),
        invariants.len()
    );

    StructuralAnalysis {
        conservative: conservative.into_iter().map(|(_, t)| t.clone()).collect(),
        non_conservative: non_conservative
            .into_iter()
            .map(|(_, t)| t.clone())
            .collect(),
        invariants,
    }
}
