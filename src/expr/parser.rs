//! 优先级爬升语法分析：`||` < `&&` < 比较 < 加减 < 乘除模 < 一元 < 后缀.
use super::ast::{BinaryOp, Expr, UnaryOp};
use super::error::ParseError;
use super::lexer::{Token, TokenKind, tokenize};

/// Deepest expression tree accepted by the parser and the evaluator.
pub const MAX_DEPTH: usize = 128;

pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.expression()?;
    if let Some(token) = parser.peek() {
        return Err(ParseError::UnexpectedToken {
            found: token.kind.to_string(),
            pos: token.pos,
            expected: "end of expression",
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|token| &token.kind)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// A subtree of `height` built at the current depth must stay within `MAX_DEPTH`.
    fn fits(&self, height: usize) -> Result<(), ParseError> {
        if self.depth + height > MAX_DEPTH {
            return Err(ParseError::DepthExceeded(MAX_DEPTH));
        }
        Ok(())
    }

    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        self.fits(1)?;
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn expect(&mut self, kind: TokenKind, expected: &'static str) -> Result<Token, ParseError> {
        match self.advance() {
            Some(token) if token.kind == kind => Ok(token),
            Some(token) => Err(ParseError::UnexpectedToken {
                found: token.kind.to_string(),
                pos: token.pos,
                expected,
            }),
            None => Err(ParseError::UnexpectedEnd { expected }),
        }
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.nested(|parser| parser.binary(1))
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        let op = match self.peek_kind()? {
            TokenKind::OrOr => BinaryOp::Or,
            TokenKind::AndAnd => BinaryOp::And,
            TokenKind::EqEq => BinaryOp::Eq,
            TokenKind::NotEq => BinaryOp::Ne,
            TokenKind::Lt => BinaryOp::Lt,
            TokenKind::Le => BinaryOp::Le,
            TokenKind::Gt => BinaryOp::Gt,
            TokenKind::Ge => BinaryOp::Ge,
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Minus => BinaryOp::Sub,
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Rem,
            _ => return None,
        };
        Some(op)
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        let mut height = lhs.height();
        while let Some(op) = self.peek_binary_op() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.nested(|parser| parser.binary(prec + 1))?;
            height = height.max(rhs.height()) + 1;
            self.fits(height)?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_kind() {
            Some(TokenKind::Bang) => UnaryOp::Not,
            Some(TokenKind::Minus) => UnaryOp::Neg,
            _ => return self.postfix(),
        };
        self.advance();
        let operand = self.nested(|parser| parser.unary())?;
        Ok(Expr::unary(op, operand))
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        let mut height = expr.height();
        loop {
            match self.peek_kind() {
                Some(TokenKind::LBracket) => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(TokenKind::RBracket, "`]`")?;
                    height = height.max(index.height()) + 1;
                    expr = Expr::Index {
                        target: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Some(TokenKind::Dot) => {
                    self.advance();
                    let field = match self.advance() {
                        Some(Token {
                            kind: TokenKind::Ident(name),
                            ..
                        }) => name,
                        Some(token) => {
                            return Err(ParseError::UnexpectedToken {
                                found: token.kind.to_string(),
                                pos: token.pos,
                                expected: "field name",
                            });
                        }
                        None => {
                            return Err(ParseError::UnexpectedEnd {
                                expected: "field name",
                            });
                        }
                    };
                    expr = Expr::Field {
                        target: Box::new(expr),
                        field,
                    };
                    height += 1;
                }
                Some(TokenKind::LParen) => {
                    let pos = self.peek().map(|token| token.pos).unwrap_or_default();
                    let Expr::Ident(name) = expr else {
                        return Err(ParseError::NotCallable { pos });
                    };
                    self.advance();
                    let args = self.arguments()?;
                    height = args.iter().map(Expr::height).max().unwrap_or(0) + 1;
                    expr = Expr::Call { name, args };
                }
                _ => break,
            }
            self.fits(height)?;
        }
        Ok(expr)
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if matches!(self.peek_kind(), Some(TokenKind::RParen)) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            match self.advance() {
                Some(Token {
                    kind: TokenKind::Comma,
                    ..
                }) => continue,
                Some(Token {
                    kind: TokenKind::RParen,
                    ..
                }) => break,
                Some(token) => {
                    return Err(ParseError::UnexpectedToken {
                        found: token.kind.to_string(),
                        pos: token.pos,
                        expected: "`,` or `)`",
                    });
                }
                None => return Err(ParseError::UnexpectedEnd { expected: "`)`" }),
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let Some(token) = self.advance() else {
            return Err(ParseError::UnexpectedEnd {
                expected: "expression",
            });
        };
        match token.kind {
            TokenKind::Int(value) => Ok(Expr::Int(value)),
            TokenKind::Str(text) => Ok(Expr::Str(text)),
            TokenKind::True => Ok(Expr::Bool(true)),
            TokenKind::False => Ok(Expr::Bool(false)),
            TokenKind::Ident(name) => Ok(Expr::Ident(name)),
            TokenKind::LParen => {
                let inner = self.expression()?;
                self.expect(TokenKind::RParen, "`)`")?;
                Ok(inner)
            }
            other => Err(ParseError::UnexpectedToken {
                found: other.to_string(),
                pos: token.pos,
                expected: "expression",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Expr {
        Expr::ident(name)
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse("a + b * c").unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Add,
                ident("a"),
                Expr::binary(BinaryOp::Mul, ident("b"), ident("c"))
            )
        );
    }

    #[test]
    fn binary_operators_are_left_associative() {
        let expr = parse("a - b - c").unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Sub,
                Expr::binary(BinaryOp::Sub, ident("a"), ident("b")),
                ident("c")
            )
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse("a || b && c").unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Or,
                ident("a"),
                Expr::binary(BinaryOp::And, ident("b"), ident("c"))
            )
        );
    }

    #[test]
    fn unary_binds_tighter_than_binary() {
        let expr = parse("-a * b").unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Mul,
                Expr::unary(UnaryOp::Neg, ident("a")),
                ident("b")
            )
        );
    }

    #[test]
    fn postfix_chains() {
        let expr = parse("allowances[owner][spender].amount").unwrap();
        assert_eq!(expr.to_string(), "allowances[owner][spender].amount");
        assert_eq!(expr.root_ident(), Some("allowances"));
    }

    #[test]
    fn calls_take_argument_lists() {
        let expr = parse("f() + g(1, x)").unwrap();
        assert_eq!(
            expr,
            Expr::binary(
                BinaryOp::Add,
                Expr::Call {
                    name: "f".into(),
                    args: vec![]
                },
                Expr::Call {
                    name: "g".into(),
                    args: vec![Expr::Int(1), ident("x")]
                }
            )
        );
    }

    #[test]
    fn only_identifiers_are_callable() {
        assert!(matches!(
            parse("a.b(1)"),
            Err(ParseError::NotCallable { .. })
        ));
    }

    #[test]
    fn display_round_trips() {
        let source = "!(a.b[\"k\"] >= 10) || sum(balances) % 3 == -1";
        let expr = parse(source).unwrap();
        assert_eq!(parse(&expr.to_string()).unwrap(), expr);
    }

    #[test]
    fn reports_trailing_tokens() {
        let err = parse("a b").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedToken { pos: 2, .. }));
    }

    #[test]
    fn reports_missing_operand() {
        assert_eq!(
            parse("a +"),
            Err(ParseError::UnexpectedEnd {
                expected: "expression"
            })
        );
        assert!(matches!(parse("(a"), Err(ParseError::UnexpectedEnd { .. })));
    }

    #[test]
    fn rejects_deep_parentheses() {
        let source = format!("{}x{}", "(".repeat(250), ")".repeat(250));
        assert_eq!(parse(&source), Err(ParseError::DepthExceeded(MAX_DEPTH)));
    }

    #[test]
    fn rejects_deep_unary_chains() {
        let source = format!("{}true", "!".repeat(300));
        assert_eq!(parse(&source), Err(ParseError::DepthExceeded(MAX_DEPTH)));
    }

    #[test]
    fn rejects_long_left_chains() {
        let source = vec!["1"; 220].join(" + ");
        assert_eq!(parse(&source), Err(ParseError::DepthExceeded(MAX_DEPTH)));
    }

    #[test]
    fn chain_depth_includes_the_left_operand() {
        use crate::expr::{Bindings, FunctionRegistry, Value};

        let deep = format!("{}1{}", "-".repeat(100), " + 1".repeat(50));
        assert_eq!(parse(&deep), Err(ParseError::DepthExceeded(MAX_DEPTH)));

        let fits = format!("{}1{}", "-".repeat(60), " + 1".repeat(60));
        let expr = parse(&fits).unwrap();
        assert_eq!(
            expr.evaluate(&Bindings::new(), &FunctionRegistry::new()),
            Ok(Value::Int(61))
        );
    }

    #[test]
    fn accepts_moderate_nesting() {
        let source = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        assert_eq!(parse(&source).unwrap(), Expr::Int(1));
    }
}
