//! 敏感性分析：逐个删除库所/变迁/弧、缩放速率、扰动初始标识，
//! 重新求解连续松弛并按影响大小分级。各元素的求解通过 rayon 并行执行。
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::net::Model;
use crate::solver::{ContinuousSolver, OdeProblem, Solution};

use super::behavior::{BehaviorError, solve_model};

/// Impacts closer than this belong to the same symmetry group.
pub const SYMMETRY_EPSILON: f64 = 1e-9;

/// How a perturbed trajectory is compared with the baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactMetric {
    /// Largest per-place difference at the sample times.
    Pointwise,
    /// Largest difference of summed tokens over the shared places.
    #[default]
    TokenMass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Place,
    Transition,
    Arc,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ElementKind::Place => "place",
            ElementKind::Transition => "transition",
            ElementKind::Arc => "arc",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactCategory {
    Critical,
    Important,
    Moderate,
    Peripheral,
}

impl ImpactCategory {
    pub fn classify(impact: f64, config: &AnalysisConfig) -> Self {
        if !impact.is_finite() || impact > config.divergence_limit {
            ImpactCategory::Critical
        } else if impact >= config.important_threshold {
            ImpactCategory::Important
        } else if impact >= config.moderate_threshold {
            ImpactCategory::Moderate
        } else {
            ImpactCategory::Peripheral
        }
    }
}

impl fmt::Display for ImpactCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImpactCategory::Critical => "critical",
            ImpactCategory::Important => "important",
            ImpactCategory::Moderate => "moderate",
            ImpactCategory::Peripheral => "peripheral",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementImpact {
    pub kind: ElementKind,
    pub id: String,
    /// `f64::INFINITY` when the perturbed model could not be solved.
    pub impact: f64,
    pub category: ImpactCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymmetryGroup {
    pub kind: ElementKind,
    pub impact: f64,
    pub elements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityReport {
    pub model: String,
    pub metric: ImpactMetric,
    pub elements: Vec<ElementImpact>,
    pub symmetry_groups: Vec<SymmetryGroup>,
}

impl SensitivityReport {
    pub fn get(&self, kind: ElementKind, id: &str) -> Option<&ElementImpact> {
        self.elements.iter().find(|e| e.kind == kind && e.id == id)
    }

    pub fn by_category(&self, category: ImpactCategory) -> impl Iterator<Item = &ElementImpact> {
        self.elements.iter().filter(move |e| e.category == category)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSensitivity {
    pub transition: String,
    /// Impact of switching the transition off.
    pub zero_impact: f64,
    /// Largest final-state difference between the half-rate and double-rate runs, over 1.5.
    pub scaled_difference: f64,
    pub sensitivity: f64,
    pub category: ImpactCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkingSensitivity {
    pub place: String,
    pub emptied: f64,
    pub doubled: f64,
    pub incremented: f64,
    pub impact: f64,
    pub category: ImpactCategory,
}

/// Difference between two trajectories under `metric`, restricted to places present in both.
pub fn impact(
    baseline: &Solution,
    perturbed: &Solution,
    metric: ImpactMetric,
    times: &[f64],
) -> f64 {
    let shared: Vec<&String> = baseline
        .places()
        .iter()
        .filter(|p| perturbed.place_index(p).is_some())
        .collect();

    let mut worst: f64 = 0.0;
    for &time in times {
        match metric {
            ImpactMetric::Pointwise => {
                for place in &shared {
                    let (Some(a), Some(b)) =
                        (baseline.value_at(place, time), perturbed.value_at(place, time))
                    else {
                        continue;
                    };
                    let diff = (a - b).abs();
                    if diff.is_nan() {
                        return f64::INFINITY;
                    }
                    worst = worst.max(diff);
                }
            }
            ImpactMetric::TokenMass => {
                let mass = |solution: &Solution| -> f64 {
                    shared
                        .iter()
                        .filter_map(|place| solution.value_at(place, time))
                        .sum()
                };
                let diff = (mass(baseline) - mass(perturbed)).abs();
                if diff.is_nan() {
                    return f64::INFINITY;
                }
                worst = worst.max(diff);
            }
        }
    }
    worst
}

/// Transitions that consumed tokens in `original` but have outputs and no inputs in `perturbed`.
fn orphaned_producers(original: &Model, perturbed: &Model) -> Vec<String> {
    perturbed
        .transitions()
        .iter_enumerated()
        .filter(|(transition, definition)| {
            perturbed.input_places(*transition).next().is_none()
                && perturbed.output_places(*transition).next().is_some()
                && original
                    .transition_id(&definition.id)
                    .is_some_and(|before| original.input_places(before).next().is_some())
        })
        .map(|(_, definition)| definition.id.clone())
        .collect()
}

struct Perturbation {
    kind: ElementKind,
    id: String,
    model: Result<Model, String>,
}

fn assess(
    original: &Model,
    baseline: &Solution,
    perturbation: Perturbation,
    solver: &dyn ContinuousSolver,
    config: &AnalysisConfig,
    times: &[f64],
) -> ElementImpact {
    let Perturbation { kind, id, model } = perturbation;
    let critical = |impact: f64, reason: String| ElementImpact {
        kind,
        id: id.clone(),
        impact,
        category: ImpactCategory::Critical,
        reason: Some(reason),
    };

    let perturbed = match model {
        Ok(model) => model,
        Err(reason) => return critical(f64::INFINITY, reason),
    };
    if perturbed.places().is_empty() {
        return critical(f64::INFINITY, "no places remain".into());
    }
    if perturbed.transitions().is_empty() {
        return critical(f64::INFINITY, "no transitions remain".into());
    }

    let solution = match solver.solve(&OdeProblem::from_model(&perturbed, config.time_span)) {
        Ok(solution) => solution,
        Err(err) => return critical(f64::INFINITY, format!("solver failed: {err}")),
    };
    let value = impact(baseline, &solution, config.metric, times);

    let orphans = orphaned_producers(original, &perturbed);
    if !orphans.is_empty() {
        return critical(
            value,
            format!("unbounded producer(s): {}", orphans.join(", ")),
        );
    }

    let category = ImpactCategory::classify(value, config);
    let reason = (category == ImpactCategory::Critical).then(|| {
        if value.is_finite() {
            format!("impact {value} exceeds divergence limit")
        } else {
            "trajectory diverged".to_string()
        }
    });
    ElementImpact {
        kind,
        id,
        impact: value,
        category,
        reason,
    }
}

/// Indices of at most `cap` arcs out of `total`, taken at an even stride.
fn sampled_arcs(total: usize, cap: Option<usize>) -> Vec<usize> {
    match cap {
        Some(cap) if cap < total => (0..cap).map(|i| i * total / cap).collect(),
        _ => (0..total).collect(),
    }
}

fn symmetry_groups(elements: &[ElementImpact]) -> Vec<SymmetryGroup> {
    let mut finite: Vec<&ElementImpact> =
        elements.iter().filter(|e| e.impact.is_finite()).collect();
    finite.sort_by(|a, b| a.kind.cmp(&b.kind).then(a.impact.total_cmp(&b.impact)));

    let mut groups = Vec::new();
    let mut start = 0;
    while start < finite.len() {
        let anchor = finite[start];
        let end = finite[start..]
            .iter()
            .position(|e| e.kind != anchor.kind || e.impact - anchor.impact > SYMMETRY_EPSILON)
            .map_or(finite.len(), |offset| start + offset);
        if end - start > 1 {
            let mut members: Vec<String> = finite[start..end].iter().map(|e| e.id.clone()).collect();
            members.sort();
            groups.push(SymmetryGroup {
                kind: anchor.kind,
                impact: anchor.impact,
                elements: members,
            });
        }
        start = end;
    }
    groups
}

/// Removes every place, transition and (possibly sampled) arc in turn and grades the effect.
///
/// Fails only when the unperturbed model itself cannot be solved.
pub fn deletion_sensitivity(
    model: &Model,
    solver: &dyn ContinuousSolver,
    config: &AnalysisConfig,
) -> Result<SensitivityReport, BehaviorError> {
    let baseline = solve_model(model, solver, config.time_span)?;
    let times = config.sample_times();

    let mut perturbations: Vec<Perturbation> = Vec::new();
    for place in model.places() {
        perturbations.push(Perturbation {
            kind: ElementKind::Place,
            id: place.id.clone(),
            model: model.without_place(&place.id).map_err(|e| e.to_string()),
        });
    }
    for transition in model.transitions() {
        perturbations.push(Perturbation {
            kind: ElementKind::Transition,
            id: transition.id.clone(),
            model: model
                .without_transition(&transition.id)
                .map_err(|e| e.to_string()),
        });
    }
    for index in sampled_arcs(model.arcs().len(), config.max_arcs) {
        perturbations.push(Perturbation {
            kind: ElementKind::Arc,
            id: model.arc_label(index),
            model: model.without_arc(index).map_err(|e| e.to_string()),
        });
    }

    let elements: Vec<ElementImpact> = perturbations
        .into_par_iter()
        .map(|perturbation| assess(model, &baseline, perturbation, solver, config, &times))
        .collect();
    let symmetry_groups = symmetry_groups(&elements);

    log::info!(
        "deletion sensitivity of `{}`: {} element(s), {} critical, {} symmetry group(s)",
        model.name(),
        elements.len(),
        elements
            .iter()
            .filter(|e| e.category == ImpactCategory::Critical)
            .count(),
        symmetry_groups.len()
    );
    Ok(SensitivityReport {
        model: model.name().to_string(),
        metric: config.metric,
        elements,
        symmetry_groups,
    })
}

/// Scales each transition's rate by 0, 0.5 and 2.
pub fn rate_sensitivity(
    model: &Model,
    solver: &dyn ContinuousSolver,
    config: &AnalysisConfig,
) -> Result<Vec<RateSensitivity>, BehaviorError> {
    let baseline = solve_model(model, solver, config.time_span)?;
    let times = config.sample_times();

    let results = model
        .transitions()
        .iter()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|transition| {
            let scaled = |factor: f64| -> Option<Solution> {
                let perturbed = model.with_rate(&transition.id, transition.rate * factor).ok()?;
                match solve_model(&perturbed, solver, config.time_span) {
                    Ok(solution) => Some(solution),
                    Err(err) => {
                        log::warn!("rate perturbation of `{}` failed: {}", transition.id, err);
                        None
                    }
                }
            };

            let zero_impact = scaled(0.0)
                .map_or(f64::INFINITY, |s| impact(&baseline, &s, config.metric, &times));
            let scaled_difference = match (scaled(0.5), scaled(2.0)) {
                (Some(half), Some(double)) => {
                    let worst = half
                        .final_state()
                        .iter()
                        .zip(double.final_state())
                        .map(|(a, b)| (a - b).abs())
                        .fold(0.0_f64, f64::max);
                    worst / 1.5
                }
                _ => f64::INFINITY,
            };
            let sensitivity = scaled_difference.max(zero_impact);
            RateSensitivity {
                transition: transition.id.clone(),
                zero_impact,
                scaled_difference,
                sensitivity,
                category: ImpactCategory::classify(sensitivity, config),
            }
        })
        .collect();
    Ok(results)
}

/// Sets each token place's initial count to 0, twice its value and one more.
pub fn marking_sensitivity(
    model: &Model,
    solver: &dyn ContinuousSolver,
    config: &AnalysisConfig,
) -> Result<Vec<MarkingSensitivity>, BehaviorError> {
    let baseline = solve_model(model, solver, config.time_span)?;
    let times = config.sample_times();

    let results = model
        .places()
        .iter()
        .filter(|place| place.is_token())
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|place| {
            let initial = place.initial_tokens();
            let perturb = |tokens: i64| -> f64 {
                model
                    .with_initial_tokens(&place.id, tokens)
                    .ok()
                    .and_then(|perturbed| solve_model(&perturbed, solver, config.time_span).ok())
                    .map_or(f64::INFINITY, |s| impact(&baseline, &s, config.metric, &times))
            };
            let emptied = perturb(0);
            let doubled = perturb(initial.saturating_mul(2));
            let incremented = perturb(initial.saturating_add(1));
            let impact = emptied.max(doubled).max(incremented);
            MarkingSensitivity {
                place: place.id.clone(),
                emptied,
                doubled,
                incremented,
                impact,
                category: ImpactCategory::classify(impact, config),
            }
        })
        .collect();
    Ok(results)
}
