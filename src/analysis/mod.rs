//! # 分析
//!
//! * 结构层：关联矩阵、P-不变量的发现/证明/精确基、结构签名与见证同构。
//! * 行为层：把模型松弛为质量作用常微分方程，经 [`crate::solver::ContinuousSolver`]
//!   求解后比较轨迹，并对元素删除、速率缩放与初始标识扰动做敏感性分级。
//!
//! ```rust
//! use tokennet::analysis;
//! use tokennet::net::*;
//!
//! let model = ModelBuilder::new("cycle")
//!     .place(Place::token("P1", 5))
//!     .place(Place::token("P2", 0))
//!     .transition(Transition::new("forward"))
//!     .transition(Transition::new("back"))
//!     .flow("P1", "forward")
//!     .flow("forward", "P2")
//!     .flow("P2", "back")
//!     .flow("back", "P1")
//!     .build()
//!     .unwrap();
//!
//! let structural = analysis::analyze(&model);
//! assert_eq!(structural.invariants[0].to_string(), "P1 + P2 == 5");
//! assert!(structural.invariants[0].verified);
//! ```

pub mod basis;
pub mod behavior;
pub mod invariants;
pub mod isomorphism;
pub mod matrix;
pub mod sensitivity;
pub mod signature;

pub use basis::invariant_basis;
pub use behavior::{
    BehaviorError, BehaviorReport, BehaviorViolation, ComparePoints, Fingerprint, MappingReport,
    MatchStatus, PlaceMatch, behavioral_equivalence, discover_mapping, solve_model,
};
pub use invariants::{
    InvariantCheck, InvariantViolation, PlaceInvariant, StructuralAnalysis, analyze,
    analyze_matrix, discover_invariants, structurally_verify, verify_invariant,
};
pub use isomorphism::{IsomorphismReport, IsomorphismViolation, Witness, verify_witness};
pub use matrix::IncidenceMatrix;
pub use sensitivity::{
    ElementImpact, ElementKind, ImpactCategory, ImpactMetric, MarkingSensitivity,
    RateSensitivity, SensitivityReport, SymmetryGroup, deletion_sensitivity, marking_sensitivity,
    rate_sensitivity,
};
pub use signature::{EquivalenceReport, Signature, SignatureDifference, compare};
