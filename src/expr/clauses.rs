//! 守卫分解：把顶层 `&&` 拆成若干前置条件，并为每个条件推断失败信息，供代码生成器使用。
use super::ast::{BinaryOp, Expr};

/// 调用者标识符，代码生成器将其映射为运行时的发送者。
pub const CALLER: &str = "caller";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precondition {
    pub clause: Expr,
    pub message: String,
}

pub fn split_conjuncts(expr: &Expr) -> Vec<&Expr> {
    let mut clauses = Vec::new();
    let mut pending = vec![expr];
    while let Some(current) = pending.pop() {
        match current {
            Expr::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => {
                pending.push(rhs);
                pending.push(lhs);
            }
            other => clauses.push(other),
        }
    }
    clauses
}

pub fn preconditions(expr: &Expr) -> Vec<Precondition> {
    split_conjuncts(expr)
        .into_iter()
        .map(|clause| Precondition {
            clause: clause.clone(),
            message: failure_message(clause),
        })
        .collect()
}

fn is_zero_address(expr: &Expr) -> bool {
    matches!(expr, Expr::Call { name, args } if name == "address" && args == &[Expr::Int(0)])
}

pub fn failure_message(clause: &Expr) -> String {
    if let Expr::Binary { op, lhs, rhs } = clause {
        let root = lhs.root_ident().unwrap_or_default().to_ascii_lowercase();
        match op {
            BinaryOp::Ge | BinaryOp::Gt if root.contains("allowance") => {
                return "insufficient allowance".to_string();
            }
            BinaryOp::Ge | BinaryOp::Gt if root.contains("balance") => {
                return "insufficient balance".to_string();
            }
            BinaryOp::Eq if references_caller(lhs) || references_caller(rhs) => {
                return "unauthorized".to_string();
            }
            BinaryOp::Ne if is_zero_address(lhs) || is_zero_address(rhs) => {
                return "invalid address".to_string();
            }
            _ => {}
        }
    }
    format!("precondition failed: {clause}")
}

pub fn references_caller(expr: &Expr) -> bool {
    match expr {
        Expr::Ident(name) => name == CALLER,
        Expr::Binary { lhs, rhs, .. } => references_caller(lhs) || references_caller(rhs),
        Expr::Unary { operand, .. } => references_caller(operand),
        Expr::Index { target, index } => references_caller(target) || references_caller(index),
        Expr::Field { target, .. } => references_caller(target),
        Expr::Call { args, .. } => args.iter().any(references_caller),
        Expr::Int(_) | Expr::Str(_) | Expr::Bool(_) => false,
    }
}
