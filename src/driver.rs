//! 命令行驱动：加载模型与配置，按子命令执行分析并输出报告。
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use log::{debug, info};

use crate::analysis::{
    self, ComparePoints, IncidenceMatrix, Witness, behavioral_equivalence, deletion_sensitivity,
    discover_mapping, invariant_basis, marking_sensitivity, rate_sensitivity, verify_witness,
};
use crate::config::AnalysisConfig;
use crate::exec::{Execution, Marking};
use crate::expr::{self, Bindings, FunctionRegistry, Value};
use crate::net::{Model, io};
use crate::options::{Options, Task};
use crate::report::{
    AnalysisReport, ComparisonReport, DeclaredInvariant, ReachabilityReport, SensitivitySummary,
};
use crate::solver::Rk4Solver;

pub struct AnalysisDriver {
    options: Options,
    config: AnalysisConfig,
}

impl AnalysisDriver {
    pub fn new(options: Options) -> Result<Self> {
        let config = match &options.config {
            Some(path) => AnalysisConfig::load_from_file(path)?,
            None => AnalysisConfig::default(),
        };
        debug!("analysis config: {:?}", config);
        Ok(Self { options, config })
    }

    pub fn with_config(options: Options, config: AnalysisConfig) -> Self {
        Self { options, config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Runs the selected task and returns the text that goes to stdout.
    pub fn run(&self) -> Result<String> {
        match &self.options.task {
            Task::Analyze { model, dot } => {
                let model = load(model)?;
                let report = analyze_model(&model);
                if let Some(dot) = dot {
                    fs::write(dot, model.to_dot())
                        .with_context(|| format!("Failed to write DOT file: {:?}", dot))?;
                    info!("DOT rendering written to {:?}", dot);
                }
                self.emit(&report, |path| report.save_to_file(path))
            }
            Task::Compare {
                left,
                right,
                witness,
                behavior,
            } => {
                let left = load(left)?;
                let right = load(right)?;
                let witness = witness
                    .as_ref()
                    .map(|path| load_witness(path))
                    .transpose()?;
                let report =
                    compare_models(&left, &right, witness.as_ref(), *behavior, &self.config)?;
                self.emit(&report, |path| report.save_to_file(path))
            }
            Task::Sensitivity { model, metric } => {
                let model = load(model)?;
                let mut config = self.config.clone();
                if let Some(metric) = metric {
                    config.metric = *metric;
                }
                let summary = sensitivity_summary(&model, &config)?;
                self.emit(&summary, |path| summary.save_to_file(path))
            }
            Task::Reach {
                model,
                target,
                max_steps,
            } => {
                let model = load(model)?;
                let max_steps = max_steps.unwrap_or(self.config.max_reach_steps);
                let report = reachability(&model, target, max_steps)?;
                self.emit(&report, |path| report.save_to_file(path))
            }
            Task::Eval {
                expression,
                bindings,
            } => {
                let value = evaluate(expression, bindings)?;
                if let Some(path) = &self.options.output {
                    let json = serde_json::to_string_pretty(&value)?;
                    fs::write(path, json)
                        .with_context(|| format!("Failed to write output file: {:?}", path))?;
                }
                Ok(value.to_string())
            }
        }
    }

    fn emit<R: std::fmt::Display>(
        &self,
        report: &R,
        save: impl FnOnce(&Path) -> std::io::Result<()>,
    ) -> Result<String> {
        if let Some(path) = &self.options.output {
            save(path).with_context(|| format!("Failed to write report: {:?}", path))?;
            info!("report written to {:?} (and .json)", path);
        }
        Ok(report.to_string())
    }
}

fn load(path: &Path) -> Result<Model> {
    let model =
        io::read_model(path).with_context(|| format!("Failed to load model: {:?}", path))?;
    debug!(
        "loaded `{}`: {} places, {} transitions, {} arcs",
        model.name(),
        model.places().len(),
        model.transitions().len(),
        model.arcs().len()
    );
    Ok(model)
}

fn load_witness(path: &Path) -> Result<Witness> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read witness: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse witness: {:?}", path))
}

pub fn analyze_model(model: &Model) -> AnalysisReport {
    let start_time = Instant::now();
    let matrix = IncidenceMatrix::build(model);
    let structural = analysis::analyze_matrix(model, &matrix);
    let basis = invariant_basis(model, &matrix);
    let declared = Execution::new(model)
        .check_invariants()
        .into_iter()
        .map(DeclaredInvariant::from)
        .collect();
    model.log_diagnostics();

    AnalysisReport {
        model: model.name().to_string(),
        version: model.version().to_string(),
        diagnostics: model.diagnose(),
        matrix,
        structural,
        basis,
        declared,
        analysis_time: start_time.elapsed(),
    }
}

pub fn compare_models(
    left: &Model,
    right: &Model,
    witness: Option<&Witness>,
    behavior: bool,
    config: &AnalysisConfig,
) -> Result<ComparisonReport> {
    let start_time = Instant::now();
    let signature = analysis::compare(left, right);
    let isomorphism = witness.map(|witness| verify_witness(left, right, witness));

    let (mapping, behavior) = if behavior {
        let solver = Rk4Solver::new(config.step);
        let mapping = discover_mapping(left, right, &solver, config)?;
        let unique: BTreeMap<String, String> = mapping.unique();
        let report = behavioral_equivalence(
            left,
            right,
            &unique,
            &solver,
            config,
            &ComparePoints::Times(config.sample_times()),
        )?;
        (Some(mapping), Some(report))
    } else {
        (None, None)
    };

    Ok(ComparisonReport {
        left: left.name().to_string(),
        right: right.name().to_string(),
        signature,
        isomorphism,
        mapping,
        behavior,
        analysis_time: start_time.elapsed(),
    })
}

pub fn sensitivity_summary(model: &Model, config: &AnalysisConfig) -> Result<SensitivitySummary> {
    let start_time = Instant::now();
    let solver = Rk4Solver::new(config.step);
    let deletion = deletion_sensitivity(model, &solver, config)?;
    let rates = rate_sensitivity(model, &solver, config)?;
    let markings = marking_sensitivity(model, &solver, config)?;
    Ok(SensitivitySummary {
        deletion,
        rates,
        markings,
        analysis_time: start_time.elapsed(),
    })
}

/// Searches from the initial marking for the marking obtained by overriding `target` counts.
pub fn reachability(
    model: &Model,
    target: &[(String, i64)],
    max_steps: usize,
) -> Result<ReachabilityReport> {
    let start_time = Instant::now();
    let mut goal = Marking::initial(model);
    for (place, count) in target {
        let id = model
            .place_id(place)
            .with_context(|| format!("Unknown place in target: `{}`", place))?;
        if !model.places()[id].is_token() {
            bail!("`{}` is a data place and cannot be targeted by count", place);
        }
        goal = goal.with_tokens(id, *count);
    }

    let exec = Execution::new(model);
    let (path, stats) = exec.search(&goal, max_steps);
    info!(
        "reachability of `{}`: {} marking(s) explored, reached = {}",
        model.name(),
        stats.explored,
        path.is_some()
    );
    Ok(ReachabilityReport {
        model: model.name().to_string(),
        target: goal.display(model).to_string(),
        max_steps,
        path: path.map(|path| {
            path.into_iter()
                .map(|t| model.transitions()[t].id.clone())
                .collect()
        }),
        explored: stats.explored,
        rejected: stats.rejected,
        truncated: stats.truncated,
        analysis_time: start_time.elapsed(),
    })
}

pub fn evaluate(expression: &str, bindings: &[(String, String)]) -> Result<Value> {
    let bindings: Bindings = bindings
        .iter()
        .map(|(name, value)| (name.clone(), Value::from(value.as_str())))
        .collect();
    let value = expr::evaluate(expression, &bindings, &FunctionRegistry::with_builtins())
        .with_context(|| format!("Failed to evaluate `{}`", expression))?;
    Ok(value)
}
