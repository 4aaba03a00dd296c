//! 结构签名：与标签无关的指纹，用于廉价的等价判定（不求解完整的图同构问题）。
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::net::Model;

/// `(inputs, outputs, initial)` of one place: arcs in, arcs out, initial tokens.
pub type PlaceProfile = (usize, usize, i64);
/// `(inputs, outputs, initial)` of one transition; `initial` sums the initial tokens of its input places.
pub type TransitionProfile = (usize, usize, i64);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub place_count: usize,
    pub transition_count: usize,
    pub arc_count: usize,
    pub total_initial_tokens: i64,
    /// Sorted.
    pub place_profiles: Vec<PlaceProfile>,
    /// Sorted.
    pub transition_profiles: Vec<TransitionProfile>,
}

impl Signature {
    pub fn of(model: &Model) -> Self {
        let mut place_profiles: Vec<PlaceProfile> = model
            .places()
            .iter_enumerated()
            .map(|(place, definition)| {
                let inputs = model.post().row(place).iter().sum::<u64>() as usize;
                let outputs = model.pre().row(place).iter().sum::<u64>() as usize;
                (inputs, outputs, definition.initial_tokens())
            })
            .collect();
        place_profiles.sort_unstable();

        let mut transition_profiles: Vec<TransitionProfile> = model
            .transitions()
            .indices()
            .map(|transition| {
                let inputs = model.pre().column_total(transition) as usize;
                let outputs = model.post().column_total(transition) as usize;
                let initial = model
                    .pre()
                    .column(transition)
                    .map(|(place, weight)| {
                        i64::try_from(*weight)
                            .unwrap_or(i64::MAX)
                            .saturating_mul(model.places()[place].initial_tokens())
                    })
                    .fold(0i64, i64::saturating_add);
                (inputs, outputs, initial)
            })
            .collect();
        transition_profiles.sort_unstable();

        Self {
            place_count: model.places().len(),
            transition_count: model.transitions().len(),
            arc_count: model.arcs().len(),
            total_initial_tokens: model.total_initial_tokens(),
            place_profiles,
            transition_profiles,
        }
    }

    /// Every component in which `self` and `other` differ; empty means equivalent.
    pub fn differences(&self, other: &Signature) -> Vec<SignatureDifference> {
        let mut differences = Vec::new();
        let mut count = |component, left: usize, right: usize| {
            if left != right {
                differences.push(SignatureDifference::Count {
                    component,
                    left,
                    right,
                });
            }
        };
        count(Component::Places, self.place_count, other.place_count);
        count(
            Component::Transitions,
            self.transition_count,
            other.transition_count,
        );
        count(Component::Arcs, self.arc_count, other.arc_count);

        if self.total_initial_tokens != other.total_initial_tokens {
            differences.push(SignatureDifference::TotalInitialTokens {
                left: self.total_initial_tokens,
                right: other.total_initial_tokens,
            });
        }
        if self.place_profiles != other.place_profiles {
            differences.push(SignatureDifference::PlaceProfiles {
                mismatched: mismatched(&self.place_profiles, &other.place_profiles),
            });
        }
        if self.transition_profiles != other.transition_profiles {
            differences.push(SignatureDifference::TransitionProfiles {
                mismatched: mismatched(&self.transition_profiles, &other.transition_profiles),
            });
        }
        differences
    }
}

fn mismatched<T: PartialEq>(left: &[T], right: &[T]) -> usize {
    let paired = left.iter().zip(right).filter(|(l, r)| l != r).count();
    paired + left.len().abs_diff(right.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Places,
    Transitions,
    Arcs,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Component::Places => "place",
            Component::Transitions => "transition",
            Component::Arcs => "arc",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignatureDifference {
    Count {
        component: Component,
        left: usize,
        right: usize,
    },
    TotalInitialTokens {
        left: i64,
        right: i64,
    },
    /// Number of sorted profile positions that disagree.
    PlaceProfiles {
        mismatched: usize,
    },
    TransitionProfiles {
        mismatched: usize,
    },
}

impl fmt::Display for SignatureDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureDifference::Count {
                component,
                left,
                right,
            } => write!(f, "{component} count differs: {left} vs {right}"),
            SignatureDifference::TotalInitialTokens { left, right } => {
                write!(f, "total initial tokens differ: {left} vs {right}")
            }
            SignatureDifference::PlaceProfiles { mismatched } => {
                write!(f, "{mismatched} place profile(s) differ")
            }
            SignatureDifference::TransitionProfiles { mismatched } => {
                write!(f, "{mismatched} transition profile(s) differ")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquivalenceReport {
    pub left: Signature,
    pub right: Signature,
    pub equivalent: bool,
    pub differences: Vec<SignatureDifference>,
}

pub fn compare(left: &Model, right: &Model) -> EquivalenceReport {
    let left_signature = Signature::of(left);
    let right_signature = Signature::of(right);
    let differences = left_signature.differences(&right_signature);
    log::info!(
        "signature comparison `{}` vs `{}`: {} difference(s)",
        left.name(),
        right.name(),
        differences.len()
    );
    EquivalenceReport {
        equivalent: differences.is_empty(),
        left: left_signature,
        right: right_signature,
        differences,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{ModelBuilder, Place, Transition};

    fn cycle(p: [&str; 2], t: [&str; 2], initial: i64) -> Model {
        ModelBuilder::new("cycle")
            .place(Place::token(p[0], initial))
            .place(Place::token(p[1], 0))
            .transition(Transition::new(t[0]))
            .transition(Transition::new(t[1]))
            .flow(p[0], t[0])
            .flow(t[0], p[1])
            .flow(p[1], t[1])
            .flow(t[1], p[0])
            .build()
            .unwrap()
    }

    #[test]
    fn relabeling_preserves_signature() {
        let a = cycle(["P1", "P2"], ["forward", "back"], 5);
        let b = cycle(["idle", "busy"], ["start", "stop"], 5);
        assert_eq!(Signature::of(&a), Signature::of(&b));
        let report = compare(&a, &b);
        assert!(report.equivalent);
        assert!(report.differences.is_empty());
    }

    #[test]
    fn differing_initial_tokens_are_listed() {
        let a = cycle(["P1", "P2"], ["forward", "back"], 5);
        let b = cycle(["P1", "P2"], ["forward", "back"], 3);
        let report = compare(&a, &b);
        assert!(!report.equivalent);
        assert!(report
            .differences
            .contains(&SignatureDifference::TotalInitialTokens { left: 5, right: 3 }));
        assert!(report
            .differences
            .iter()
            .all(|d| !matches!(d, SignatureDifference::Count { .. })));
    }

    #[test]
    fn structural_changes_show_up_as_counts() {
        let a = cycle(["P1", "P2"], ["forward", "back"], 5);
        let b = a.without_transition("back").unwrap();
        let differences = Signature::of(&a).differences(&Signature::of(&b));
        assert!(differences.contains(&SignatureDifference::Count {
            component: Component::Transitions,
            left: 2,
            right: 1
        }));
        assert!(differences.contains(&SignatureDifference::Count {
            component: Component::Arcs,
            left: 4,
            right: 2
        }));
        assert_eq!(
            differences[0].to_string(),
            "transition count differs: 2 vs 1"
        );
    }
}
