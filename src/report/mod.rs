//! 分析报告：文本形式供终端阅读，`save_to_file` 同时写出 `<path>.json`。
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use crate::analysis::{
    BehaviorReport, EquivalenceReport, ImpactCategory, IncidenceMatrix, IsomorphismReport,
    MappingReport, MarkingSensitivity, MatchStatus, PlaceInvariant, RateSensitivity,
    SensitivityReport, StructuralAnalysis,
};
use crate::exec::InvariantOutcome;
use crate::net::DiagnosticReport;

/// Declared invariant evaluated against the initial marking.
#[derive(Debug, Clone, Serialize)]
pub struct DeclaredInvariant {
    pub id: String,
    pub expression: String,
    pub holds: bool,
    pub error: Option<String>,
}

impl From<InvariantOutcome> for DeclaredInvariant {
    fn from(outcome: InvariantOutcome) -> Self {
        let holds = outcome.holds();
        Self {
            id: outcome.id,
            expression: outcome.expression,
            holds,
            error: outcome.result.err().map(|e| e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub model: String,
    pub version: String,
    pub matrix: IncidenceMatrix,
    pub structural: StructuralAnalysis,
    pub basis: Vec<PlaceInvariant>,
    pub declared: Vec<DeclaredInvariant>,
    pub diagnostics: DiagnosticReport,
    pub analysis_time: Duration,
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "结构分析报告")?;
        writeln!(f, "模型: {} ({})", self.model, self.version)?;
        writeln!(f, "分析时间: {:?}", self.analysis_time)?;
        writeln!(
            f,
            "库所数: {}, 变迁数: {}",
            self.diagnostics.total_places, self.diagnostics.total_transitions
        )?;

        writeln!(f, "\n关联矩阵:")?;
        write!(f, "{}", self.matrix)?;

        writeln!(f, "\n守恒变迁: {}", self.structural.conservative.join(", "))?;
        writeln!(
            f,
            "非守恒变迁: {}",
            self.structural.non_conservative.join(", ")
        )?;

        if !self.structural.invariants.is_empty() {
            writeln!(f, "\n发现的不变量:")?;
            for (i, invariant) in self.structural.invariants.iter().enumerate() {
                writeln!(
                    f,
                    "  #{} {} [{}]",
                    i + 1,
                    invariant,
                    if invariant.verified { "已证明" } else { "未证明" }
                )?;
            }
        }

        if !self.basis.is_empty() {
            writeln!(f, "\n不变量基:")?;
            for invariant in &self.basis {
                writeln!(f, "  {}", invariant)?;
            }
        }

        if !self.declared.is_empty() {
            writeln!(f, "\n声明的不变量 (初始标识):")?;
            for invariant in &self.declared {
                match &invariant.error {
                    Some(error) => writeln!(f, "  {}: 错误 {}", invariant.id, error)?,
                    None => writeln!(
                        f,
                        "  {}: {} => {}",
                        invariant.id, invariant.expression, invariant.holds
                    )?,
                }
            }
        }

        if self.diagnostics.has_issues() {
            writeln!(f, "\n诊断:")?;
            for place in &self.diagnostics.isolated_places {
                writeln!(f, "  孤立库所: {}", place)?;
            }
            for transition in &self.diagnostics.isolated_transitions {
                writeln!(f, "  孤立变迁: {}", transition)?;
            }
            for warning in &self.diagnostics.warnings {
                writeln!(f, "  警告: {}", warning)?;
            }
        }

        Ok(())
    }
}

impl AnalysisReport {
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        save(self, path.as_ref())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub left: String,
    pub right: String,
    pub signature: EquivalenceReport,
    pub isomorphism: Option<IsomorphismReport>,
    pub mapping: Option<MappingReport>,
    pub behavior: Option<BehaviorReport>,
    pub analysis_time: Duration,
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "模型比较报告")?;
        writeln!(f, "模型: {} / {}", self.left, self.right)?;
        writeln!(f, "分析时间: {:?}", self.analysis_time)?;
        writeln!(f, "签名等价: {}", self.signature.equivalent)?;
        for difference in &self.signature.differences {
            writeln!(f, "  {}", difference)?;
        }

        if let Some(isomorphism) = &self.isomorphism {
            writeln!(f, "\n见证同构: {}", isomorphism.isomorphic)?;
            for violation in &isomorphism.violations {
                writeln!(f, "  {}", violation)?;
            }
        }

        if let Some(mapping) = &self.mapping {
            writeln!(f, "\n库所映射:")?;
            for m in &mapping.matches {
                let status = match m.status {
                    MatchStatus::Unique => "唯一",
                    MatchStatus::Ambiguous => "歧义",
                    MatchStatus::Unmatched => "未匹配",
                };
                writeln!(
                    f,
                    "  {} -> [{}] 距离 {:.6} ({})",
                    m.place,
                    m.candidates.join(", "),
                    m.distance,
                    status
                )?;
            }
        }

        if let Some(behavior) = &self.behavior {
            writeln!(f, "\n行为等价: {}", behavior.equivalent)?;
            writeln!(f, "最大差异: {:.6}", behavior.max_difference)?;
            for v in &behavior.violations {
                writeln!(
                    f,
                    "  t = {:.3}: {} = {:.6}, {} = {:.6}",
                    v.time, v.place, v.left, v.mapped, v.right
                )?;
            }
        }

        Ok(())
    }
}

impl ComparisonReport {
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        save(self, path.as_ref())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SensitivitySummary {
    pub deletion: SensitivityReport,
    pub rates: Vec<RateSensitivity>,
    pub markings: Vec<MarkingSensitivity>,
    pub analysis_time: Duration,
}

impl fmt::Display for SensitivitySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "敏感性分析报告")?;
        writeln!(f, "模型: {}", self.deletion.model)?;
        writeln!(f, "影响度量: {:?}", self.deletion.metric)?;
        writeln!(f, "分析时间: {:?}", self.analysis_time)?;

        for category in [
            ImpactCategory::Critical,
            ImpactCategory::Important,
            ImpactCategory::Moderate,
            ImpactCategory::Peripheral,
        ] {
            let elements: Vec<_> = self.deletion.by_category(category).collect();
            if elements.is_empty() {
                continue;
            }
            writeln!(f, "\n{} ({}):", category, elements.len())?;
            for element in elements {
                write!(f, "  {} {}: {:.6}", element.kind, element.id, element.impact)?;
                if let Some(reason) = &element.reason {
                    write!(f, " ({})", reason)?;
                }
                writeln!(f)?;
            }
        }

        if !self.deletion.symmetry_groups.is_empty() {
            writeln!(f, "\n对称组:")?;
            for group in &self.deletion.symmetry_groups {
                writeln!(
                    f,
                    "  {} [{}] 影响 {:.6}",
                    group.kind,
                    group.elements.join(", "),
                    group.impact
                )?;
            }
        }

        if !self.rates.is_empty() {
            writeln!(f, "\n速率敏感性:")?;
            for rate in &self.rates {
                writeln!(
                    f,
                    "  {}: {:.6} ({})",
                    rate.transition, rate.sensitivity, rate.category
                )?;
            }
        }

        if !self.markings.is_empty() {
            writeln!(f, "\n初始标识敏感性:")?;
            for marking in &self.markings {
                writeln!(
                    f,
                    "  {}: {:.6} ({})",
                    marking.place, marking.impact, marking.category
                )?;
            }
        }

        Ok(())
    }
}

impl SensitivitySummary {
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        save(self, path.as_ref())
    }
}

/// 有界可达性搜索的结果
#[derive(Debug, Clone, Serialize)]
pub struct ReachabilityReport {
    pub model: String,
    pub target: String,
    pub max_steps: usize,
    /// Transition ids of the shortest firing sequence found.
    pub path: Option<Vec<String>>,
    pub explored: usize,
    pub rejected: usize,
    pub truncated: bool,
    pub analysis_time: Duration,
}

impl fmt::Display for ReachabilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "可达性分析报告")?;
        writeln!(f, "模型: {}", self.model)?;
        writeln!(f, "目标标识: {}", self.target)?;
        writeln!(f, "分析时间: {:?}", self.analysis_time)?;
        match &self.path {
            Some(path) if path.is_empty() => writeln!(f, "可达: 初始标识即为目标")?,
            Some(path) => writeln!(f, "可达: {} 步 [{}]", path.len(), path.join(", "))?,
            None if self.truncated => {
                writeln!(f, "在 {} 步内不可达 (搜索被截断)", self.max_steps)?
            }
            None => writeln!(f, "不可达")?,
        }
        writeln!(
            f,
            "已探索标识: {}, 被拒绝的发射: {}",
            self.explored, self.rejected
        )
    }
}

impl ReachabilityReport {
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> io::Result<()> {
        save(self, path.as_ref())
    }
}

fn save<R: fmt::Display + Serialize>(report: &R, path: &Path) -> io::Result<()> {
    fs::write(path, format!("{}\n", report))?;

    let mut json_path = path.as_os_str().to_owned();
    json_path.push(".json");
    let json = serde_json::to_string_pretty(report).map_err(io::Error::other)?;
    fs::write(json_path, json)?;

    Ok(())
}
