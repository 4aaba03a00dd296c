//! 行为层：连续轨迹指纹、跨模型库所映射发现与行为等价判定。
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AnalysisConfig;
use crate::net::Model;
use crate::solver::{ContinuousSolver, OdeProblem, Solution, SolveError};

pub const FINGERPRINT_SAMPLES: usize = 10;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BehaviorError {
    #[error("continuous solve of `{model}` failed: {source}")]
    Solve { model: String, source: SolveError },
    #[error("model `{model}` has no place `{place}`")]
    UnknownPlace { model: String, place: String },
}

pub fn solve_model(
    model: &Model,
    solver: &dyn ContinuousSolver,
    time_span: f64,
) -> Result<Solution, BehaviorError> {
    solver
        .solve(&OdeProblem::from_model(model, time_span))
        .map_err(|source| BehaviorError::Solve {
            model: model.name().to_string(),
            source,
        })
}

/// Summary of one place's trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub initial: f64,
    pub final_value: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub samples: [f64; FINGERPRINT_SAMPLES],
}

impl Fingerprint {
    pub fn of(series: &[f64]) -> Self {
        let Some((&initial, &final_value)) = series.first().zip(series.last()) else {
            return Self {
                initial: 0.0,
                final_value: 0.0,
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                samples: [0.0; FINGERPRINT_SAMPLES],
            };
        };
        let min = series.iter().copied().fold(f64::INFINITY, f64::min);
        let max = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = series.iter().sum::<f64>() / series.len() as f64;
        let last = series.len() - 1;
        let samples = std::array::from_fn(|i| series[i * last / (FINGERPRINT_SAMPLES - 1)]);
        Self {
            initial,
            final_value,
            min,
            max,
            mean,
            samples,
        }
    }

    /// Sum of absolute component differences.
    pub fn distance(&self, other: &Fingerprint) -> f64 {
        let scalars = [
            (self.initial, other.initial),
            (self.final_value, other.final_value),
            (self.min, other.min),
            (self.max, other.max),
            (self.mean, other.mean),
        ];
        scalars
            .into_iter()
            .chain(self.samples.iter().copied().zip(other.samples.iter().copied()))
            .map(|(a, b)| (a - b).abs())
            .sum()
    }
}

pub fn fingerprints(solution: &Solution) -> BTreeMap<String, Fingerprint> {
    solution
        .places()
        .iter()
        .filter_map(|place| {
            let series = solution.series(place)?;
            Some((place.clone(), Fingerprint::of(&series)))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Unique,
    /// Several candidates lie within tolerance of the best distance.
    Ambiguous,
    /// The best distance exceeds the configured maximum.
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceMatch {
    pub place: String,
    pub candidates: Vec<String>,
    pub distance: f64,
    pub status: MatchStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingReport {
    pub matches: Vec<PlaceMatch>,
}

impl MappingReport {
    /// Places of the left model with exactly one candidate.
    pub fn unique(&self) -> BTreeMap<String, String> {
        self.matches
            .iter()
            .filter(|m| m.status == MatchStatus::Unique)
            .map(|m| (m.place.clone(), m.candidates[0].clone()))
            .collect()
    }

    pub fn ambiguous(&self) -> impl Iterator<Item = &PlaceMatch> {
        self.matches
            .iter()
            .filter(|m| m.status == MatchStatus::Ambiguous)
    }
}

/// For each place of `left`, the places of `right` with minimal fingerprint distance.
pub fn discover_mapping(
    left: &Model,
    right: &Model,
    solver: &dyn ContinuousSolver,
    config: &AnalysisConfig,
) -> Result<MappingReport, BehaviorError> {
    let left_prints = fingerprints(&solve_model(left, solver, config.time_span)?);
    let right_prints = fingerprints(&solve_model(right, solver, config.time_span)?);

    let matches = left_prints
        .iter()
        .map(|(place, print)| {
            let scored: Vec<(&String, f64)> = right_prints
                .iter()
                .map(|(candidate, other)| (candidate, print.distance(other)))
                .collect();
            let best = scored
                .iter()
                .map(|(_, d)| *d)
                .fold(f64::INFINITY, f64::min);
            let candidates: Vec<String> = scored
                .iter()
                .filter(|(_, d)| *d - best <= config.tolerance)
                .map(|(c, _)| (*c).clone())
                .collect();

            let status = if candidates.is_empty()
                || config.max_mapping_distance.is_some_and(|limit| best > limit)
            {
                MatchStatus::Unmatched
            } else if candidates.len() > 1 {
                MatchStatus::Ambiguous
            } else {
                MatchStatus::Unique
            };
            PlaceMatch {
                place: place.clone(),
                candidates,
                distance: best,
                status,
            }
        })
        .collect::<Vec<_>>();

    log::info!(
        "mapping `{}` -> `{}`: {} unique, {} ambiguous, {} unmatched",
        left.name(),
        right.name(),
        matches.iter().filter(|m| m.status == MatchStatus::Unique).count(),
        matches.iter().filter(|m| m.status == MatchStatus::Ambiguous).count(),
        matches.iter().filter(|m| m.status == MatchStatus::Unmatched).count(),
    );
    Ok(MappingReport { matches })
}

/// Where two trajectories are compared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparePoints {
    Final,
    Times(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorViolation {
    pub place: String,
    pub mapped: String,
    pub time: f64,
    pub left: f64,
    pub right: f64,
    pub difference: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorReport {
    pub equivalent: bool,
    pub max_difference: f64,
    pub violations: Vec<BehaviorViolation>,
}

/// Solves both models over the shared span and compares mapped places within `config.tolerance`.
pub fn behavioral_equivalence(
    left: &Model,
    right: &Model,
    mapping: &BTreeMap<String, String>,
    solver: &dyn ContinuousSolver,
    config: &AnalysisConfig,
    points: &ComparePoints,
) -> Result<BehaviorReport, BehaviorError> {
    for (place, mapped) in mapping {
        if left.place(place).is_none() {
            return Err(BehaviorError::UnknownPlace {
                model: left.name().to_string(),
                place: place.clone(),
            });
        }
        if right.place(mapped).is_none() {
            return Err(BehaviorError::UnknownPlace {
                model: right.name().to_string(),
                place: mapped.clone(),
            });
        }
    }

    let left_solution = solve_model(left, solver, config.time_span)?;
    let right_solution = solve_model(right, solver, config.time_span)?;
    let times = match points {
        ComparePoints::Final => vec![config.time_span],
        ComparePoints::Times(times) => times.clone(),
    };

    let mut max_difference: f64 = 0.0;
    let mut violations = Vec::new();
    for (place, mapped) in mapping {
        for &time in &times {
            let (Some(l), Some(r)) = (
                left_solution.value_at(place, time),
                right_solution.value_at(mapped, time),
            ) else {
                continue;
            };
            let difference = (l - r).abs();
            max_difference = max_difference.max(difference);
            if difference > config.tolerance {
                violations.push(BehaviorViolation {
                    place: place.clone(),
                    mapped: mapped.clone(),
                    time,
                    left: l,
                    right: r,
                    difference,
                });
            }
        }
    }

    Ok(BehaviorReport {
        equivalent: violations.is_empty(),
        max_difference,
        violations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{ModelBuilder, Place, Transition};
    use crate::solver::Rk4Solver;

    fn config() -> AnalysisConfig {
        AnalysisConfig {
            time_span: 2.0,
            step: 0.01,
            ..AnalysisConfig::default()
        }
    }

    fn cycle(p: [&str; 2], t: [&str; 2], initial: i64, rate: f64) -> Model {
        ModelBuilder::new(p[0])
            .place(Place::token(p[0], initial))
            .place(Place::token(p[1], 0))
            .transition(Transition::new(t[0]).with_rate(rate))
            .transition(Transition::new(t[1]))
            .flow(p[0], t[0])
            .flow(t[0], p[1])
            .flow(p[1], t[1])
            .flow(t[1], p[0])
            .build()
            .unwrap()
    }

    #[test]
    fn fingerprint_samples_span_the_series() {
        let series: Vec<f64> = (0..=18).map(f64::from).collect();
        let print = Fingerprint::of(&series);
        assert_eq!(print.initial, 0.0);
        assert_eq!(print.final_value, 18.0);
        assert_eq!(print.mean, 9.0);
        assert_eq!(print.samples[0], 0.0);
        assert_eq!(print.samples[1], 2.0);
        assert_eq!(print.samples[9], 18.0);
        assert_eq!(print.distance(&print), 0.0);

        let shifted: Vec<f64> = series.iter().map(|v| v + 1.0).collect();
        assert_eq!(print.distance(&Fingerprint::of(&shifted)), 15.0);
    }

    #[test]
    fn mapping_follows_behavior_not_names() {
        let solver = Rk4Solver::new(0.01);
        let a = cycle(["P1", "P2"], ["forward", "back"], 5, 2.0);
        let b = cycle(["idle", "busy"], ["start", "stop"], 5, 2.0);
        let report = discover_mapping(&a, &b, &solver, &config()).unwrap();
        let unique = report.unique();
        assert_eq!(unique.get("P1").map(String::as_str), Some("idle"));
        assert_eq!(unique.get("P2").map(String::as_str), Some("busy"));
    }

    #[test]
    fn symmetric_places_are_ambiguous() {
        let solver = Rk4Solver::new(0.01);
        let a = ModelBuilder::new("cells")
            .place(Place::token("cell0", 0))
            .place(Place::token("cell1", 0))
            .build()
            .unwrap();
        let report = discover_mapping(&a, &a, &solver, &config()).unwrap();
        assert_eq!(report.ambiguous().count(), 2);
        assert!(report.unique().is_empty());

        let strict = AnalysisConfig {
            max_mapping_distance: Some(0.5),
            ..config()
        };
        let b = ModelBuilder::new("far")
            .place(Place::token("x", 100))
            .build()
            .unwrap();
        let report = discover_mapping(&a, &b, &solver, &strict).unwrap();
        assert!(report
            .matches
            .iter()
            .all(|m| m.status == MatchStatus::Unmatched));
    }

    #[test]
    fn equivalence_under_mapping_and_violations() {
        let solver = Rk4Solver::new(0.01);
        let a = cycle(["P1", "P2"], ["forward", "back"], 5, 1.0);
        let b = cycle(["idle", "busy"], ["start", "stop"], 5, 1.0);
        let mapping: BTreeMap<String, String> = [("P1", "idle"), ("P2", "busy")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let same = behavioral_equivalence(&a, &b, &mapping, &solver, &config(), &ComparePoints::Final)
            .unwrap();
        assert!(same.equivalent);
        assert_eq!(same.max_difference, 0.0);

        let faster = cycle(["idle", "busy"], ["start", "stop"], 5, 3.0);
        let points = ComparePoints::Times(vec![0.0, 1.0, 2.0]);
        let differs =
            behavioral_equivalence(&a, &faster, &mapping, &solver, &config(), &points).unwrap();
        assert!(!differs.equivalent);
        assert!(differs.max_difference > 0.1);
        assert!(differs.violations.iter().all(|v| v.time > 0.0));
        assert_eq!(differs.violations.len(), 4);

        let mut bad = mapping.clone();
        bad.insert("P1".into(), "ghost".into());
        assert!(matches!(
            behavioral_equivalence(&a, &b, &bad, &solver, &config(), &ComparePoints::Final),
            Err(BehaviorError::UnknownPlace { place, .. }) if place == "ghost"
        ));
    }
}
