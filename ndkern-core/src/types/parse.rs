//! Parser for type expressions and function prototypes.
//!
//! ```text
//! proto   := '(' [type (',' type)*] ')' '->' type
//! type    := INT '*' type | 'Fixed' '*' type | NAME '*' type
//!          | '...' '*' type | NAME '...' '*' type | dtype
//! dtype   := '?' dtype | '{' '...' '}' | '{' [field (',' field)*] '}'
//!          | name [ '[' arg (',' arg)* ']' ]
//! field   := name ':' type
//! arg     := type | INT | STRING
//! ```
//!
//! Capitalised names are type variables; `Any`, `Fixed`, `FixedString` and `FixedBytes` are
//! reserved.

use super::builtin::builtin_by_name;
use super::{
    AnyType, Convert, DType, EllipsisDim, Encoding, FixedBytes, FixedDim, FixedString, FuncProto,
    KindPattern, OptionType, PointerType, StructPattern, StructType, SymbolicDim, TypeId, TypeVar,
    TypeVarDim, View,
};
use crate::assign::ErrorMode;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Int(usize),
    Str(String),
    Star,
    Question,
    Ellipsis,
    Arrow,
    Comma,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    End,
}

fn error(pos: usize, msg: impl Into<String>) -> Error {
    Error::TypeParse {
        pos,
        msg: msg.into(),
    }
}

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        let tok = match c {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
                continue;
            }
            b'*' => Token::Star,
            b'?' => Token::Question,
            b',' => Token::Comma,
            b':' => Token::Colon,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b'{' => Token::LBrace,
            b'}' => Token::RBrace,
            b'-' if bytes.get(i + 1) == Some(&b'>') => {
                i += 1;
                Token::Arrow
            }
            b'.' if src[i..].starts_with("...") => {
                i += 2;
                Token::Ellipsis
            }
            b'\'' | b'"' => {
                let end = src[i + 1..]
                    .find(c as char)
                    .ok_or_else(|| error(start, "unterminated string"))?;
                let s = src[i + 1..i + 1 + end].to_string();
                i += end + 1;
                Token::Str(s)
            }
            b'0'..=b'9' => {
                let len = bytes[i..].iter().take_while(|b| b.is_ascii_digit()).count();
                let n = src[i..i + len]
                    .parse()
                    .map_err(|_| error(start, "integer out of range"))?;
                i += len - 1;
                Token::Int(n)
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let len = bytes[i..]
                    .iter()
                    .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
                    .count();
                let name = src[i..i + len].to_string();
                i += len - 1;
                Token::Name(name)
            }
            _ => {
                let ch = src[i..].chars().next().unwrap_or('?');
                return Err(error(start, format!("unexpected character {ch:?}")));
            }
        };
        out.push((start, tok));
        i += 1;
    }
    out.push((src.len(), Token::End));
    Ok(out)
}

fn is_typevar_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && !matches!(name, "Any" | "Fixed" | "FixedString" | "FixedBytes")
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    cur: usize,
}

/// A bracketed argument: a type, an integer or a quoted string.
enum Arg {
    Type(DType),
    Int(usize),
    Str(String),
}

impl Parser {
    fn new(src: &str) -> Result<Self> {
        Ok(Self {
            tokens: tokenize(src)?,
            cur: 0,
        })
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.cur].1
    }

    fn peek_at(&self, n: usize) -> &Token {
        let i = (self.cur + n).min(self.tokens.len() - 1);
        &self.tokens[i].1
    }

    fn pos(&self) -> usize {
        self.tokens[self.cur].0
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.cur].1.clone();
        if self.cur + 1 < self.tokens.len() {
            self.cur += 1;
        }
        tok
    }

    fn expect(&mut self, want: Token, what: &str) -> Result<()> {
        if *self.peek() == want {
            self.bump();
            Ok(())
        } else {
            Err(error(self.pos(), format!("expected {what}, found {:?}", self.peek())))
        }
    }

    fn finish(&self) -> Result<()> {
        match self.peek() {
            Token::End => Ok(()),
            tok => Err(error(self.pos(), format!("unexpected trailing {tok:?}"))),
        }
    }

    fn parse_type(&mut self) -> Result<DType> {
        match (self.peek().clone(), self.peek_at(1).clone()) {
            (Token::Int(n), Token::Star) => {
                self.bump();
                self.bump();
                Ok(FixedDim::make(n, self.parse_type()?))
            }
            (Token::Ellipsis, _) => {
                self.bump();
                self.expect(Token::Star, "`*` after `...`")?;
                Ok(EllipsisDim::make(None, self.parse_type()?))
            }
            (Token::Name(name), Token::Star) if name == "Fixed" => {
                self.bump();
                self.bump();
                Ok(SymbolicDim::make(self.parse_type()?))
            }
            (Token::Name(name), Token::Star) if is_typevar_name(&name) => {
                self.bump();
                self.bump();
                Ok(TypeVarDim::make(name, self.parse_type()?))
            }
            (Token::Name(name), Token::Ellipsis) if is_typevar_name(&name) => {
                self.bump();
                self.bump();
                self.expect(Token::Star, "`*` after an ellipsis")?;
                Ok(EllipsisDim::make(Some(name), self.parse_type()?))
            }
            _ => self.parse_dtype(),
        }
    }

    fn parse_dtype(&mut self) -> Result<DType> {
        let pos = self.pos();
        match self.bump() {
            Token::Question => OptionType::make(self.parse_dtype()?),
            Token::LBrace => self.parse_struct(),
            Token::Name(name) => self.parse_named(pos, &name),
            tok => Err(error(pos, format!("expected a type, found {tok:?}"))),
        }
    }

    fn parse_struct(&mut self) -> Result<DType> {
        if *self.peek() == Token::Ellipsis {
            self.bump();
            self.expect(Token::RBrace, "`}`")?;
            return Ok(StructPattern::make());
        }
        let mut fields = Vec::new();
        if *self.peek() != Token::RBrace {
            loop {
                let pos = self.pos();
                let Token::Name(name) = self.bump() else {
                    return Err(error(pos, "expected a field name"));
                };
                self.expect(Token::Colon, "`:`")?;
                fields.push((name, self.parse_type()?));
                if *self.peek() != Token::Comma {
                    break;
                }
                self.bump();
            }
        }
        self.expect(Token::RBrace, "`}`")?;
        StructType::make(fields)
    }

    fn parse_args(&mut self) -> Result<Vec<(usize, Arg)>> {
        let mut args = Vec::new();
        if *self.peek() != Token::LBracket {
            return Ok(args);
        }
        self.bump();
        loop {
            let pos = self.pos();
            let arg = match (self.peek().clone(), self.peek_at(1)) {
                (Token::Int(n), tok) if *tok != Token::Star => {
                    self.bump();
                    Arg::Int(n)
                }
                (Token::Str(s), _) => {
                    self.bump();
                    Arg::Str(s)
                }
                _ => Arg::Type(self.parse_type()?),
            };
            args.push((pos, arg));
            if *self.peek() != Token::Comma {
                break;
            }
            self.bump();
        }
        self.expect(Token::RBracket, "`]`")?;
        Ok(args)
    }

    fn parse_named(&mut self, pos: usize, name: &str) -> Result<DType> {
        if let Some(id) = builtin_by_name(name) {
            return Ok(DType::Builtin(id));
        }
        match name {
            "Any" => return Ok(AnyType::make()),
            "FixedString" => return Ok(KindPattern::make(TypeId::FixedString)),
            "FixedBytes" => return Ok(KindPattern::make(TypeId::FixedBytes)),
            _ if is_typevar_name(name) => return Ok(TypeVar::make(name)),
            _ => {}
        }
        let args = self.parse_args()?;
        let nargs = args.len();
        let arity = |n: std::ops::RangeInclusive<usize>| -> Result<()> {
            if n.contains(&nargs) {
                Ok(())
            } else {
                Err(error(pos, format!("wrong number of arguments to `{name}`")))
            }
        };
        let mut it = args.into_iter();
        match name {
            "fixed_bytes" => {
                arity(2..=2)?;
                let size = int_arg(it.next())?;
                let align = int_arg(it.next())?;
                FixedBytes::make(size, align)
            }
            "fixed_string" => {
                arity(1..=2)?;
                let len = int_arg(it.next())?;
                let encoding = match it.next() {
                    None => Encoding::Utf8,
                    Some((p, Arg::Str(s))) => {
                        Encoding::from_name(&s).ok_or_else(|| error(p, format!("unknown encoding {s:?}")))?
                    }
                    Some((p, _)) => return Err(error(p, "expected an encoding string")),
                };
                Ok(FixedString::make(len, encoding))
            }
            "pointer" => {
                arity(1..=1)?;
                PointerType::make(type_arg(it.next())?)
            }
            "unaligned" => {
                arity(1..=1)?;
                View::unaligned(type_arg(it.next())?)
            }
            "view" => {
                arity(2..=2)?;
                let value = type_arg(it.next())?;
                View::make(value, type_arg(it.next())?)
            }
            "convert" => {
                arity(2..=3)?;
                let value = type_arg(it.next())?;
                let operand = type_arg(it.next())?;
                let mode = match it.next() {
                    None => ErrorMode::default(),
                    Some((p, Arg::Str(s))) => s.parse().map_err(|_| error(p, format!("unknown error mode {s:?}")))?,
                    Some((p, _)) => return Err(error(p, "expected an error mode string")),
                };
                Ok(Convert::make(value, operand, mode))
            }
            _ => Err(error(pos, format!("unknown type name `{name}`"))),
        }
    }
}

fn int_arg(arg: Option<(usize, Arg)>) -> Result<usize> {
    match arg {
        Some((_, Arg::Int(n))) => Ok(n),
        Some((p, _)) => Err(error(p, "expected an integer")),
        None => Err(error(0, "missing argument")),
    }
}

fn type_arg(arg: Option<(usize, Arg)>) -> Result<DType> {
    match arg {
        Some((_, Arg::Type(tp))) => Ok(tp),
        Some((p, _)) => Err(error(p, "expected a type")),
        None => Err(error(0, "missing argument")),
    }
}

/// Parses a type expression such as `3 * {x: int32, y: ?float64}`.
pub fn parse_type(src: &str) -> Result<DType> {
    let mut p = Parser::new(src)?;
    let tp = p.parse_type()?;
    p.finish()?;
    Ok(tp)
}

/// Parses a prototype such as `(... * T, ... * T) -> ... * int32`.
pub fn parse_proto(src: &str) -> Result<FuncProto> {
    let mut p = Parser::new(src)?;
    p.expect(Token::LParen, "`(`")?;
    let mut args = Vec::new();
    if *p.peek() != Token::RParen {
        loop {
            args.push(p.parse_type()?);
            if *p.peek() != Token::Comma {
                break;
            }
            p.bump();
        }
    }
    p.expect(Token::RParen, "`)`")?;
    p.expect(Token::Arrow, "`->`")?;
    let ret = p.parse_type()?;
    p.finish()?;
    Ok(FuncProto::new(args, ret))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printed_types_parse_back() -> anyhow::Result<()> {
        for src in [
            "int32",
            "3 * ?int32",
            "{x: int32, y: float64}",
            "pointer[float64]",
            "fixed_string[16, 'utf8']",
            "fixed_bytes[8, 4]",
            "2 * 3 * {a: ?int8, b: fixed_string[4, 'ascii']}",
            "view[uint64, float64]",
            "convert[float32, int64, 'inexact']",
            "unaligned[complex128]",
            "Any",
            "... * T",
            "Dims... * 3 * float32",
            "N * M * float64",
            "Fixed * int16",
            "{...}",
            "FixedString",
        ] {
            let tp = parse_type(src)?;
            assert_eq!(tp.to_string(), src);
            assert_eq!(parse_type(&tp.to_string())?, tp);
        }
        Ok(())
    }

    #[test]
    fn defaults_and_whitespace() -> anyhow::Result<()> {
        assert_eq!(parse_type(" fixed_string[ 5 ] ")?.to_string(), "fixed_string[5, 'utf8']");
        assert_eq!(parse_type("convert[int8, int16, 'fractional']")?.to_string(), "convert[int8, int16]");
        assert_eq!(parse_type("unaligned[uint8]")?, DType::UINT8);
        Ok(())
    }

    #[test]
    fn prototypes() -> anyhow::Result<()> {
        for src in [
            "(Any, Any) -> Any",
            "(FixedString, FixedString) -> int32",
            "(... * T, ... * T) -> ... * int32",
            "() -> int8",
        ] {
            assert_eq!(parse_proto(src)?.to_string(), src);
        }
        Ok(())
    }

    #[test]
    fn errors_report_positions() {
        match parse_type("3 * flot32") {
            Err(Error::TypeParse { pos, .. }) => assert_eq!(pos, 4),
            other => panic!("unexpected {other:?}"),
        }
        match parse_type("{x: int32,, y: int8}") {
            Err(Error::TypeParse { pos, .. }) => assert_eq!(pos, 10),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(parse_type("int32 int8"), Err(Error::TypeParse { pos: 6, .. })));
        assert!(matches!(parse_type("fixed_string[4, 'ebcdic']"), Err(Error::TypeParse { .. })));
        assert!(matches!(parse_proto("(int32) int32"), Err(Error::TypeParse { .. })));
        assert!(parse_type("fixed_bytes[6, 4]").is_err());
        assert!(parse_type("'abc").is_err());
    }
}
