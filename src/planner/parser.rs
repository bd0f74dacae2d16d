//! Textual filter and ordering parser
//!
//! Grammar (keywords are case-insensitive):
//!
//! ```text
//! filter    := or
//! or        := and (("||" | OR) and)*
//! and       := unary (("&&" | AND) unary)*
//! unary     := ("!" | NOT) unary | "(" or ")" | predicate
//! predicate := operand MEMBER OF ident
//!            | ident cmp operand
//!            | ident IN ( "(" literal ("," literal)* ")" | param )
//!            | ident LIKE operand [ESCAPE string]
//!            | ident ".startsWith(" operand ")"
//! operand   := term (("+" | "-") term)*
//! term      := factor (("*" | "/") factor)*
//! factor    := "-" factor | literal | param | CURRENT_TIMESTAMP | "(" operand ")"
//! ordering  := ident [ASC | DESC] ("," ident [ASC | DESC])*
//! ```

use super::ast::{BinaryOp, CompareOp, Expr, Operand, SortDirection, SortSpec};
use super::errors::MisuseError;
use crate::model::Value;

/// Parses a textual filter expression
pub fn parse_filter(input: &str) -> Result<Expr, MisuseError> {
    let mut parser = Parser::new(input)?;
    let expr = parser.parse_or()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parses an ordering clause such as `isbn asc, title desc`
pub fn parse_ordering(input: &str) -> Result<Vec<SortSpec>, MisuseError> {
    let mut parser = Parser::new(input)?;
    let mut sorts = Vec::new();
    if parser.at_end() {
        return Ok(sorts);
    }
    loop {
        let property = parser.expect_ident()?;
        let direction = if parser.eat_keyword("asc") || parser.eat_keyword("ascending") {
            SortDirection::Asc
        } else if parser.eat_keyword("desc") || parser.eat_keyword("descending") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        sorts.push(SortSpec { property, direction });
        if !parser.eat_symbol(",") {
            break;
        }
    }
    parser.expect_end()?;
    Ok(sorts)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Param(String),
    Symbol(&'static str),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => format!("identifier '{}'", s),
            Token::Str(s) => format!("string {:?}", s),
            Token::Int(i) => format!("number {}", i),
            Token::Float(x) => format!("number {}", x),
            Token::Param(p) => format!("parameter ':{}'", p),
            Token::Symbol(s) => format!("'{}'", s),
        }
    }
}

const SYMBOLS: [&str; 17] = [
    "==", "!=", "<>", "<=", ">=", "&&", "||", "<", ">", "=", "!", "(", ")", ",", "+", "-", "*",
];

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, MisuseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }
        let start = pos;

        if c == b'\'' || c == b'"' {
            let (text, end) = read_string(input, pos)?;
            tokens.push((start, Token::Str(text)));
            pos = end;
        } else if c.is_ascii_digit() {
            while pos < bytes.len() && (bytes[pos].is_ascii_digit() || bytes[pos] == b'.') {
                pos += 1;
            }
            let text = &input[start..pos];
            let token = if text.contains('.') {
                text.parse::<f64>().map(Token::Float).map_err(|_| {
                    MisuseError::parse(start, format!("invalid number '{}'", text))
                })?
            } else {
                text.parse::<i64>().map(Token::Int).map_err(|_| {
                    MisuseError::parse(start, format!("invalid number '{}'", text))
                })?
            };
            tokens.push((start, token));
        } else if c == b':' {
            pos += 1;
            while pos < bytes.len() && is_ident_byte(bytes[pos]) {
                pos += 1;
            }
            if pos == start + 1 {
                return Err(MisuseError::parse(start, "expected parameter name after ':'"));
            }
            tokens.push((start, Token::Param(input[start + 1..pos].to_string())));
        } else if c.is_ascii_alphabetic() || c == b'_' {
            while pos < bytes.len() && (is_ident_byte(bytes[pos]) || bytes[pos] == b'.') {
                pos += 1;
            }
            tokens.push((start, Token::Ident(input[start..pos].to_string())));
        } else if c == b'/' {
            pos += 1;
            tokens.push((start, Token::Symbol("/")));
        } else {
            let rest = &input[pos..];
            let symbol = SYMBOLS
                .iter()
                .find(|s| rest.starts_with(*s))
                .ok_or_else(|| {
                    MisuseError::parse(start, format!("unexpected character {:?}", c as char))
                })?;
            pos += symbol.len();
            tokens.push((start, Token::Symbol(*symbol)));
        }
    }

    Ok(tokens)
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn read_string(input: &str, start: usize) -> Result<(String, usize), MisuseError> {
    let mut chars = input[start..].char_indices();
    let quote = match chars.next() {
        Some((_, q)) => q,
        None => return Err(MisuseError::parse(start, "expected string")),
    };
    let mut out = String::new();
    let mut escaped = false;
    for (offset, ch) in chars {
        if escaped {
            out.push(match ch {
                'n' => '\n',
                't' => '\t',
                other => other,
            });
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == quote {
            return Ok((out, start + offset + ch.len_utf8()));
        } else {
            out.push(ch);
        }
    }
    Err(MisuseError::parse(start, "unterminated string"))
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    index: usize,
    len: usize,
}

impl Parser {
    fn new(input: &str) -> Result<Self, MisuseError> {
        Ok(Self {
            tokens: tokenize(input)?,
            index: 0,
            len: input.len(),
        })
    }

    fn at_end(&self) -> bool {
        self.index >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|(_, t)| t)
    }

    fn peek_at(&self, ahead: usize) -> Option<&Token> {
        self.tokens.get(self.index + ahead).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.index).map(|(p, _)| *p).unwrap_or(self.len)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).map(|(_, t)| t.clone());
        self.index += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> MisuseError {
        MisuseError::parse(self.position(), message)
    }

    fn unexpected(&self, wanted: &str) -> MisuseError {
        match self.peek() {
            Some(token) => self.error(format!("expected {}, found {}", wanted, token.describe())),
            None => self.error(format!("expected {}, found end of input", wanted)),
        }
    }

    fn expect_end(&self) -> Result<(), MisuseError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.unexpected("end of input"))
        }
    }

    fn is_keyword(&self, ahead: usize, keyword: &str) -> bool {
        matches!(self.peek_at(ahead), Some(Token::Ident(s)) if s.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(0, keyword) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(s)) if *s == symbol) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<(), MisuseError> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", symbol)))
        }
    }

    fn expect_ident(&mut self) -> Result<String, MisuseError> {
        match self.peek() {
            Some(Token::Ident(name)) if !is_reserved(name) => {
                let name = name.clone();
                self.index += 1;
                Ok(name)
            }
            _ => Err(self.unexpected("property name")),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, MisuseError> {
        let mut items = vec![self.parse_and()?];
        while self.eat_symbol("||") || self.eat_keyword("or") {
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Expr::Or(items) })
    }

    fn parse_and(&mut self) -> Result<Expr, MisuseError> {
        let mut items = vec![self.parse_unary()?];
        while self.eat_symbol("&&") || self.eat_keyword("and") {
            items.push(self.parse_unary()?);
        }
        Ok(if items.len() == 1 { items.remove(0) } else { Expr::And(items) })
    }

    fn parse_unary(&mut self) -> Result<Expr, MisuseError> {
        if self.eat_symbol("!") || self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        if matches!(self.peek(), Some(Token::Symbol("("))) {
            self.index += 1;
            let inner = self.parse_or()?;
            self.expect_symbol(")")?;
            return Ok(inner);
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr, MisuseError> {
        match self.peek() {
            Some(Token::Ident(name)) if !is_reserved(name) => self.parse_property_predicate(),
            Some(_) => {
                let operand = self.parse_operand()?;
                if self.eat_keyword("member") {
                    if !self.eat_keyword("of") {
                        return Err(self.unexpected("OF"));
                    }
                    let property = self.expect_ident()?;
                    Ok(Expr::MemberOf { operand, property })
                } else {
                    Err(self.unexpected("MEMBER OF"))
                }
            }
            None => Err(self.unexpected("predicate")),
        }
    }

    fn parse_property_predicate(&mut self) -> Result<Expr, MisuseError> {
        let name = self.expect_ident()?;

        if let Some(property) = name.strip_suffix(".startsWith") {
            self.expect_symbol("(")?;
            let prefix = self.parse_operand()?;
            self.expect_symbol(")")?;
            return Ok(Expr::StartsWith {
                property: property.to_string(),
                prefix,
            });
        }

        if self.eat_keyword("in") {
            let operand = self.parse_in_operand()?;
            return Ok(Expr::In {
                property: name,
                operand,
            });
        }

        if self.eat_keyword("like") {
            let pattern = self.parse_operand()?;
            let escape = if self.eat_keyword("escape") {
                match self.advance() {
                    Some(Token::Str(s)) if s.chars().count() == 1 => s.chars().next(),
                    _ => return Err(self.error("ESCAPE expects a single-character string")),
                }
            } else {
                None
            };
            return Ok(Expr::Like {
                property: name,
                pattern,
                escape,
            });
        }

        let op = match self.advance() {
            Some(Token::Symbol("==")) | Some(Token::Symbol("=")) => CompareOp::Eq,
            Some(Token::Symbol("!=")) | Some(Token::Symbol("<>")) => CompareOp::Ne,
            Some(Token::Symbol("<")) => CompareOp::Lt,
            Some(Token::Symbol("<=")) => CompareOp::Le,
            Some(Token::Symbol(">")) => CompareOp::Gt,
            Some(Token::Symbol(">=")) => CompareOp::Ge,
            _ => {
                self.index -= 1;
                return Err(self.unexpected("comparison operator"));
            }
        };
        let operand = self.parse_operand()?;
        Ok(Expr::Compare {
            property: name,
            op,
            operand,
        })
    }

    fn parse_in_operand(&mut self) -> Result<Operand, MisuseError> {
        if let Some(Token::Param(name)) = self.peek() {
            let name = name.clone();
            self.index += 1;
            return Ok(Operand::Param(name));
        }
        self.expect_symbol("(")?;
        let mut values = Vec::new();
        if !self.eat_symbol(")") {
            loop {
                values.push(self.parse_literal_value()?);
                if self.eat_symbol(")") {
                    break;
                }
                self.expect_symbol(",")?;
            }
        }
        Ok(Operand::Literal(Value::List(values)))
    }

    fn parse_literal_value(&mut self) -> Result<Value, MisuseError> {
        let negative = self.eat_symbol("-");
        let value = match self.advance() {
            Some(Token::Int(i)) => Value::Int(if negative { -i } else { i }),
            Some(Token::Float(x)) => Value::Float(if negative { -x } else { x }),
            Some(Token::Str(s)) if !negative => Value::Text(s),
            Some(Token::Ident(word)) if !negative => match keyword_literal(&word) {
                Some(v) => v,
                None => {
                    self.index -= 1;
                    return Err(self.unexpected("literal"));
                }
            },
            _ => {
                self.index -= 1;
                return Err(self.unexpected("literal"));
            }
        };
        Ok(value)
    }

    fn parse_operand(&mut self) -> Result<Operand, MisuseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = if self.eat_symbol("+") {
                BinaryOp::Add
            } else if self.eat_symbol("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.parse_term()?;
            left = Operand::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Operand, MisuseError> {
        let mut left = self.parse_factor()?;
        loop {
            let op = if self.eat_symbol("*") {
                BinaryOp::Mul
            } else if self.eat_symbol("/") {
                BinaryOp::Div
            } else {
                break;
            };
            let right = self.parse_factor()?;
            left = Operand::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> Result<Operand, MisuseError> {
        if self.eat_symbol("-") {
            return Ok(Operand::Negate(Box::new(self.parse_factor()?)));
        }
        if self.eat_symbol("(") {
            let inner = self.parse_operand()?;
            self.expect_symbol(")")?;
            return Ok(inner);
        }
        match self.peek() {
            Some(Token::Param(name)) => {
                let name = name.clone();
                self.index += 1;
                Ok(Operand::Param(name))
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("current_timestamp") => {
                self.index += 1;
                Ok(Operand::CurrentTimestamp)
            }
            _ => Ok(Operand::Literal(self.parse_literal_value()?)),
        }
    }
}

fn keyword_literal(word: &str) -> Option<Value> {
    if word.eq_ignore_ascii_case("true") {
        Some(Value::Bool(true))
    } else if word.eq_ignore_ascii_case("false") {
        Some(Value::Bool(false))
    } else if word.eq_ignore_ascii_case("null") {
        Some(Value::Null)
    } else {
        None
    }
}

fn is_reserved(word: &str) -> bool {
    const RESERVED: [&str; 12] = [
        "and",
        "or",
        "not",
        "in",
        "like",
        "escape",
        "member",
        "of",
        "true",
        "false",
        "null",
        "current_timestamp",
    ];
    RESERVED.iter().any(|r| word.eq_ignore_ascii_case(r))
}
