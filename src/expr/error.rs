use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unexpected character {ch:?} at offset {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("unterminated string starting at offset {pos}")]
    UnterminatedString { pos: usize },
    #[error("invalid integer literal {text:?} at offset {pos}")]
    InvalidNumber { text: String, pos: usize },
    #[error("unexpected token `{found}` at offset {pos}, expected {expected}")]
    UnexpectedToken {
        found: String,
        pos: usize,
        expected: &'static str,
    },
    #[error("unexpected end of expression, expected {expected}")]
    UnexpectedEnd { expected: &'static str },
    #[error("only named functions can be called (offset {pos})")]
    NotCallable { pos: usize },
    #[error("expression nesting exceeds the maximum depth of {0}")]
    DepthExceeded(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("division by zero in `{op}`")]
    DivisionByZero { op: &'static str },
    #[error("integer overflow in `{op}`")]
    Overflow { op: &'static str },
    #[error("type mismatch in `{op}`: {detail}")]
    TypeMismatch { op: &'static str, detail: String },
    #[error("index {index} out of bounds for list of length {len}")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("function `{name}` expects {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("function `{name}` failed: {message}")]
    Function { name: String, message: String },
    #[error("expression nesting exceeds the maximum depth of {0}")]
    DepthExceeded(usize),
}

impl EvalError {
    pub fn type_mismatch(op: &'static str, detail: impl Into<String>) -> Self {
        EvalError::TypeMismatch {
            op,
            detail: detail.into(),
        }
    }
}

/// Failure of a one-shot parse-and-evaluate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("evaluation error: {0}")]
    Eval(#[from] EvalError),
}
