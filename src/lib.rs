//! # tokennet
//!
//! 带守卫与数据库所的令牌流网络：表达式语言、模型、发射语义、
//! 结构分析（P-不变量、签名、同构见证）以及基于连续松弛的行为与敏感性分析。

pub mod analysis;
pub mod config;
pub mod driver;
pub mod exec;
pub mod expr;
pub mod net;
pub mod options;
pub mod report;
pub mod solver;
