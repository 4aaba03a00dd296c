//! 见证同构：给定显式的库所/变迁双射，逐项验证而不做搜索。
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::net::Model;

/// Explicit correspondence from the ids of one model to the ids of another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness {
    #[serde(default)]
    pub places: BTreeMap<String, String>,
    #[serde(default)]
    pub transitions: BTreeMap<String, String>,
}

impl Witness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.places.insert(from.into(), to.into());
        self
    }

    pub fn transition(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.transitions.insert(from.into(), to.into());
        self
    }

    fn map<'a>(&'a self, id: &'a str) -> Option<&'a str> {
        self.places
            .get(id)
            .or_else(|| self.transitions.get(id))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IsomorphismViolation {
    Unmapped {
        element: &'static str,
        id: String,
    },
    UnknownSource {
        element: &'static str,
        id: String,
    },
    UnknownTarget {
        element: &'static str,
        id: String,
    },
    NotInjective {
        element: &'static str,
        target: String,
        sources: Vec<String>,
    },
    SizeMismatch {
        element: &'static str,
        left: usize,
        right: usize,
    },
    MissingArc {
        source_id: String,
        target_id: String,
    },
    InitialMismatch {
        place: String,
        left: i64,
        right: i64,
    },
}

impl fmt::Display for IsomorphismViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsomorphismViolation::Unmapped { element, id } => {
                write!(f, "{element} `{id}` is not mapped")
            }
            IsomorphismViolation::UnknownSource { element, id } => {
                write!(f, "mapping names unknown source {element} `{id}`")
            }
            IsomorphismViolation::UnknownTarget { element, id } => {
                write!(f, "mapping targets unknown {element} `{id}`")
            }
            IsomorphismViolation::NotInjective {
                element,
                target,
                sources,
            } => write!(
                f,
                "{element} `{target}` is the image of {}",
                sources.join(", ")
            ),
            IsomorphismViolation::SizeMismatch {
                element,
                left,
                right,
            } => write!(f, "{element} counts differ: {left} vs {right}"),
            IsomorphismViolation::MissingArc {
                source_id,
                target_id,
            } => write!(f, "mapped arc {source_id} -> {target_id} does not exist"),
            IsomorphismViolation::InitialMismatch { place, left, right } => {
                write!(f, "initial tokens of `{place}` differ: {left} vs {right}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IsomorphismReport {
    pub isomorphic: bool,
    pub violations: Vec<IsomorphismViolation>,
}

/// Checks that `witness` is a total, injective, arc- and marking-preserving map from `left` onto `right`.
pub fn verify_witness(left: &Model, right: &Model, witness: &Witness) -> IsomorphismReport {
    let mut violations = Vec::new();

    let place_ids = left.places().iter().map(|p| p.id.as_str());
    check_mapping(
        "place",
        place_ids,
        &witness.places,
        |id| left.place(id).is_some(),
        |id| right.place(id).is_some(),
        &mut violations,
    );
    let transition_ids = left.transitions().iter().map(|t| t.id.as_str());
    check_mapping(
        "transition",
        transition_ids,
        &witness.transitions,
        |id| left.transition(id).is_some(),
        |id| right.transition(id).is_some(),
        &mut violations,
    );

    for (element, l, r) in [
        ("place", left.places().len(), right.places().len()),
        (
            "transition",
            left.transitions().len(),
            right.transitions().len(),
        ),
        ("arc", left.arcs().len(), right.arcs().len()),
    ] {
        if l != r {
            violations.push(IsomorphismViolation::SizeMismatch {
                element,
                left: l,
                right: r,
            });
        }
    }

    // arcs are compared as a multiset of (source, target) pairs
    let mut available: HashMap<(&str, &str), usize> = HashMap::new();
    for arc in right.arcs() {
        *available
            .entry((arc.source.as_str(), arc.target.as_str()))
            .or_default() += 1;
    }
    for arc in left.arcs() {
        let (Some(source), Some(target)) = (witness.map(&arc.source), witness.map(&arc.target))
        else {
            continue;
        };
        match available.get_mut(&(source, target)) {
            Some(count) if *count > 0 => *count -= 1,
            _ => violations.push(IsomorphismViolation::MissingArc {
                source_id: source.to_string(),
                target_id: target.to_string(),
            }),
        }
    }

    for place in left.places() {
        let Some(image) = witness.places.get(&place.id).and_then(|id| right.place(id)) else {
            continue;
        };
        if place.initial != image.initial {
            violations.push(IsomorphismViolation::InitialMismatch {
                place: place.id.clone(),
                left: place.initial_tokens(),
                right: image.initial_tokens(),
            });
        }
    }

    if !violations.is_empty() {
        log::debug!(
            "witness `{}` -> `{}` rejected with {} violation(s)",
            left.name(),
            right.name(),
            violations.len()
        );
    }
    IsomorphismReport {
        isomorphic: violations.is_empty(),
        violations,
    }
}

fn check_mapping<'a>(
    element: &'static str,
    ids: impl Iterator<Item = &'a str>,
    mapping: &BTreeMap<String, String>,
    source_exists: impl Fn(&str) -> bool,
    target_exists: impl Fn(&str) -> bool,
    violations: &mut Vec<IsomorphismViolation>,
) {
    for id in ids {
        if !mapping.contains_key(id) {
            violations.push(IsomorphismViolation::Unmapped {
                element,
                id: id.to_string(),
            });
        }
    }

    let mut preimages: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (from, to) in mapping {
        if !source_exists(from) {
            violations.push(IsomorphismViolation::UnknownSource {
                element,
                id: from.clone(),
            });
        }
        if !target_exists(to) {
            violations.push(IsomorphismViolation::UnknownTarget {
                element,
                id: to.clone(),
            });
        }
        preimages.entry(to.as_str()).or_default().push(from.clone());
    }
    for (target, sources) in preimages {
        if sources.len() > 1 {
            violations.push(IsomorphismViolation::NotInjective {
                element,
                target: target.to_string(),
                sources,
            });
        }
    }
}
