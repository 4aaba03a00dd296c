//! # 标识与发射
//!
//! [`Execution`] 持有某个共享 [`Model`](crate::net::Model) 的一份标识：
//!
//! * 变迁 `t` **可激发** 当且仅当其每条无键输入弧的源库所令牌数不小于该库所的无键弧数；
//!   带键弧（映射访问）不参与计数判定，其前置条件由守卫表达。
//! * **发射** 在副本上计算后继标识 `M' = M + C[:, t]`，检查容量与全部不变量后才提交。
//! * 有界可达性搜索复用同一后继计算。
//!
//! ```rust
//! use tokennet::exec::Execution;
//! use tokennet::net::*;
//!
//! let model = ModelBuilder::new("cycle")
//!     .place(Place::token("P1", 1))
//!     .place(Place::token("P2", 0))
//!     .transition(Transition::new("forward"))
//!     .flow("P1", "forward")
//!     .flow("forward", "P2")
//!     .invariant("conservation", "P1 + P2 == 1")
//!     .build()
//!     .unwrap();
//!
//! let mut exec = Execution::new(&model);
//! exec.fire("forward").unwrap();
//! assert!(!exec.enabled("forward"));
//! assert_eq!(exec.history_ids(), vec!["forward"]);
//! ```

pub mod firing;
pub mod marking;
pub mod reachability;

pub use firing::{Execution, FireError, InvariantOutcome};
pub use marking::{Marking, MarkingDisplay};
pub use reachability::SearchStats;
