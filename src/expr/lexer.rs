//! 守卫表达式词法分析，基于 nom 组合子.
use std::fmt;

use nom::IResult;
use nom::Parser;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{anychar, char, digit1, one_of};
use nom::combinator::{map, recognize, value};
use nom::multi::fold_many0;
use nom::sequence::{pair, preceded, terminated};

use super::error::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Int(i64),
    Str(String),
    Ident(String),
    True,
    False,
    OrOr,
    AndAnd,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Int(value) => write!(f, "{value}"),
            TokenKind::Str(text) => write!(f, "{text:?}"),
            TokenKind::Ident(name) => write!(f, "{name}"),
            TokenKind::True => write!(f, "true"),
            TokenKind::False => write!(f, "false"),
            TokenKind::OrOr => write!(f, "||"),
            TokenKind::AndAnd => write!(f, "&&"),
            TokenKind::EqEq => write!(f, "=="),
            TokenKind::NotEq => write!(f, "!="),
            TokenKind::Lt => write!(f, "<"),
            TokenKind::Le => write!(f, "<="),
            TokenKind::Gt => write!(f, ">"),
            TokenKind::Ge => write!(f, ">="),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Percent => write!(f, "%"),
            TokenKind::Bang => write!(f, "!"),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::LBracket => write!(f, "["),
            TokenKind::RBracket => write!(f, "]"),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Comma => write!(f, ","),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character.
    pub pos: usize,
}

enum Lexeme<'a> {
    Number(&'a str),
    Word(&'a str),
    Str(String),
    Symbol(TokenKind),
}

enum Fragment<'a> {
    Literal(&'a str),
    Escaped(char),
}

/// Splits `input` into tokens; offsets are byte positions into `input`.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut rest = skip_whitespace(input);
    while !rest.is_empty() {
        let pos = input.len() - rest.len();
        let (next, lexeme) = lexeme(rest).map_err(|_| lex_error(rest, pos))?;
        let kind = match lexeme {
            Lexeme::Number(text) => {
                text.parse::<i64>()
                    .map(TokenKind::Int)
                    .map_err(|_| ParseError::InvalidNumber {
                        text: text.to_string(),
                        pos,
                    })?
            }
            Lexeme::Word("true") => TokenKind::True,
            Lexeme::Word("false") => TokenKind::False,
            Lexeme::Word(name) => TokenKind::Ident(name.to_string()),
            Lexeme::Str(text) => TokenKind::Str(text),
            Lexeme::Symbol(kind) => kind,
        };
        tokens.push(Token { kind, pos });
        rest = skip_whitespace(next);
    }
    Ok(tokens)
}

fn lex_error(rest: &str, pos: usize) -> ParseError {
    match rest.chars().next() {
        Some('"' | '\'') => ParseError::UnterminatedString { pos },
        Some(ch) => ParseError::UnexpectedChar { ch, pos },
        None => ParseError::UnexpectedEnd {
            expected: "token",
        },
    }
}

fn skip_whitespace(input: &str) -> &str {
    let spaces: IResult<&str, &str> = take_while(char::is_whitespace).parse(input);
    spaces.map_or(input, |(rest, _)| rest)
}

fn lexeme(input: &str) -> IResult<&str, Lexeme<'_>> {
    alt((
        map(digit1, Lexeme::Number),
        map(word, Lexeme::Word),
        map(quoted, Lexeme::Str),
        map(symbol, Lexeme::Symbol),
    ))
    .parse(input)
}

fn word(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|ch: char| ch == '_' || ch.is_alphabetic()),
        take_while(|ch: char| ch == '_' || ch.is_alphanumeric()),
    ))
    .parse(input)
}

/// Single- or double-quoted string; `\n`, `\t` and escaped quotes are decoded, other escapes kept.
fn quoted(input: &str) -> IResult<&str, String> {
    let (rest, quote) = one_of("\"'").parse(input)?;
    let fragment = alt((
        map(
            take_while1(move |ch: char| ch != quote && ch != '\\'),
            Fragment::Literal,
        ),
        map(preceded(char('\\'), anychar), Fragment::Escaped),
    ));
    let body = fold_many0(fragment, String::new, |mut text, fragment| {
        match fragment {
            Fragment::Literal(part) => text.push_str(part),
            Fragment::Escaped('n') => text.push('\n'),
            Fragment::Escaped('t') => text.push('\t'),
            Fragment::Escaped(ch @ ('\\' | '"' | '\'')) => text.push(ch),
            Fragment::Escaped(other) => {
                text.push('\\');
                text.push(other);
            }
        }
        text
    });
    terminated(body, char(quote)).parse(rest)
}

fn symbol(input: &str) -> IResult<&str, TokenKind> {
    let double = alt((
        value(TokenKind::OrOr, tag("||")),
        value(TokenKind::AndAnd, tag("&&")),
        value(TokenKind::EqEq, tag("==")),
        value(TokenKind::NotEq, tag("!=")),
        value(TokenKind::Le, tag("<=")),
        value(TokenKind::Ge, tag(">=")),
    ));
    let single = alt((
        value(TokenKind::Lt, char('<')),
        value(TokenKind::Gt, char('>')),
        value(TokenKind::Bang, char('!')),
        value(TokenKind::Plus, char('+')),
        value(TokenKind::Minus, char('-')),
        value(TokenKind::Star, char('*')),
        value(TokenKind::Slash, char('/')),
        value(TokenKind::Percent, char('%')),
        value(TokenKind::LParen, char('(')),
        value(TokenKind::RParen, char(')')),
        value(TokenKind::LBracket, char('[')),
        value(TokenKind::RBracket, char(']')),
        value(TokenKind::Dot, char('.')),
        value(TokenKind::Comma, char(',')),
    ));
    alt((double, single)).parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn lexes_operators_and_literals() {
        assert_eq!(
            kinds("balances[caller] >= 10 && !paused"),
            vec![
                TokenKind::Ident("balances".into()),
                TokenKind::LBracket,
                TokenKind::Ident("caller".into()),
                TokenKind::RBracket,
                TokenKind::Ge,
                TokenKind::Int(10),
                TokenKind::AndAnd,
                TokenKind::Bang,
                TokenKind::Ident("paused".into()),
            ]
        );
    }

    #[test]
    fn lexes_escaped_strings() {
        assert_eq!(
            kinds(r#"'it\'s' "a\"b""#),
            vec![TokenKind::Str("it's".into()), TokenKind::Str("a\"b".into())]
        );
    }

    #[test]
    fn keeps_byte_offsets_and_unicode_identifiers() {
        let tokens = tokenize("  größe\t>= 'é' ").unwrap();
        let offsets: Vec<_> = tokens.iter().map(|token| token.pos).collect();
        assert_eq!(offsets, vec![2, 10, 13]);
        assert_eq!(tokens[0].kind, TokenKind::Ident("größe".into()));
        assert_eq!(tokens[2].kind, TokenKind::Str("é".into()));
        assert_eq!(tokenize(" \n ").unwrap(), vec![]);
    }

    #[test]
    fn unknown_escapes_are_kept() {
        assert_eq!(kinds(r#""a\qb""#), vec![TokenKind::Str("a\\qb".into())]);
        assert_eq!(
            tokenize(r#""abc\"#),
            Err(ParseError::UnterminatedString { pos: 0 })
        );
    }

    #[test]
    fn rejects_stray_characters() {
        let err = tokenize("a & b").unwrap_err();
        assert_eq!(err, ParseError::UnexpectedChar { ch: '&', pos: 2 });
    }

    #[test]
    fn rejects_out_of_range_numbers() {
        let err = tokenize("99999999999999999999").unwrap_err();
        assert!(matches!(err, ParseError::InvalidNumber { .. }));
    }

    #[test]
    fn unterminated_string_reports_start() {
        let err = tokenize("x == 'abc").unwrap_err();
        assert_eq!(err, ParseError::UnterminatedString { pos: 5 });
    }
}
