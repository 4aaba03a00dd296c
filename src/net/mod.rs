//! # 令牌流网络模型
//!
//! 模型由库所集合 `P`、变迁集合 `T`、弧以及守恒约束组成。每条弧连接一个库所与
//! 一个变迁，方向决定它属于输入映射 `Pre` 还是输出映射 `Post`；二者之差
//! `C = Post - Pre` 即效应矩阵。
//!
//! * 令牌库所保存非负整数计数；数据库所保存结构化值（如余额映射），
//!   通过带键弧（`balances[from]`）按键访问。
//! * 变迁可附带守卫表达式，由 [`crate::expr`] 解析并缓存。
//! * [`Model`] 在构建时完成校验，之后不可变；分析通过派生副本进行删除或扰动。
//!
//! ## 示例
//!
//! ```rust
//! use tokennet::net::*;
//!
//! let model = ModelBuilder::new("cycle")
//!     .place(Place::token("P1", 5))
//!     .place(Place::token("P2", 0))
//!     .transition(Transition::new("forward"))
//!     .flow("P1", "forward")
//!     .flow("forward", "P2")
//!     .build()
//!     .unwrap();
//!
//! let forward = model.transition_id("forward").unwrap();
//! let p2 = model.place_id("P2").unwrap();
//! assert_eq!(*model.post().get(p2, forward), 1);
//! assert_eq!(model.total_initial_tokens(), 5);
//! ```

pub mod builder;
pub mod ids;
pub mod incidence;
pub mod index_vec;
pub mod io;
pub mod model;
pub mod structure;

pub use builder::ModelBuilder;
pub use ids::{PlaceId, TransitionId};
pub use incidence::Incidence;
pub use index_vec::{Idx, IndexVec};
pub use model::{DiagnosticReport, Model, ModelDocument, ModelError};
pub use structure::{Arc, ArcDirection, FlowArc, Invariant, Place, PlaceKind, Transition};
