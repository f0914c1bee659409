use super::{CompareOp, Literal, Predicate};
use crate::error::{InvalidRequest, Result};

const KEYWORDS: [&str; 9] = [
    "AND", "OR", "NOT", "LIKE", "IS", "NULL", "IN", "TRUE", "FALSE",
];

/// Deepest admitted nesting of parentheses and `NOT`.
const MAX_DEPTH: usize = 128;
/// Most comparison terms admitted in one filter; bounds `AND`/`OR` chains.
const MAX_TERMS: usize = 1024;

pub(super) fn is_keyword(word: &str) -> bool {
    KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),
    QuotedIdent(String),
    Str(String),
    Integer(i64),
    Floating(f64),
    Op(CompareOp),
    LParen,
    RParen,
    Comma,
}

#[derive(Clone, Debug)]
struct Spanned {
    token: Token,
    position: usize,
}

fn syntax_error(position: usize, message: impl Into<String>) -> crate::error::Error {
    InvalidRequest::FilterSyntax {
        position,
        message: message.into(),
    }
    .into()
}

fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        let token = match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
                continue;
            }
            b'(' => {
                i += 1;
                Token::LParen
            }
            b')' => {
                i += 1;
                Token::RParen
            }
            b',' => {
                i += 1;
                Token::Comma
            }
            b'=' => {
                i += 1;
                Token::Op(CompareOp::Eq)
            }
            b'<' => match bytes.get(i + 1) {
                Some(b'=') => {
                    i += 2;
                    Token::Op(CompareOp::Le)
                }
                Some(b'>') => {
                    i += 2;
                    Token::Op(CompareOp::Ne)
                }
                _ => {
                    i += 1;
                    Token::Op(CompareOp::Lt)
                }
            },
            b'>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    i += 2;
                    Token::Op(CompareOp::Ge)
                } else {
                    i += 1;
                    Token::Op(CompareOp::Gt)
                }
            }
            b'!' if bytes.get(i + 1) == Some(&b'=') => {
                i += 2;
                Token::Op(CompareOp::Ne)
            }
            b'\'' => {
                let (text, next) = read_quoted(input, i, b'\'')?;
                i = next;
                Token::Str(text)
            }
            b'"' => {
                let (text, next) = read_quoted(input, i, b'"')?;
                if text.is_empty() {
                    return Err(syntax_error(start, "empty quoted identifier"));
                }
                i = next;
                Token::QuotedIdent(text)
            }
            b'0'..=b'9' | b'.' | b'-' | b'+' => {
                let (token, next) = read_number(input, i)?;
                i = next;
                token
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let end = bytes[i..]
                    .iter()
                    .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_' || *b == b'$'))
                    .map_or(bytes.len(), |n| i + n);
                let word = input[i..end].to_string();
                i = end;
                Token::Word(word)
            }
            _ => {
                let ch = input[i..].chars().next().unwrap_or('?');
                return Err(syntax_error(start, format!("unexpected character '{ch}'")));
            }
        };
        tokens.push(Spanned {
            token,
            position: start,
        });
    }

    Ok(tokens)
}

/// Read a `quote`-delimited run starting at `start`, where a doubled quote
/// stands for one quote character.
fn read_quoted(input: &str, start: usize, quote: u8) -> Result<(String, usize)> {
    let bytes = input.as_bytes();
    let mut text = String::new();
    let mut i = start + 1;
    let mut run_start = i;
    loop {
        match bytes.get(i) {
            None => return Err(syntax_error(start, "unterminated quoted text")),
            Some(&b) if b == quote => {
                text.push_str(&input[run_start..i]);
                if bytes.get(i + 1) == Some(&quote) {
                    text.push(quote as char);
                    i += 2;
                    run_start = i;
                } else {
                    return Ok((text, i + 1));
                }
            }
            Some(_) => i += 1,
        }
    }
}

fn read_number(input: &str, start: usize) -> Result<(Token, usize)> {
    let bytes = input.as_bytes();
    let mut i = start;
    if matches!(bytes.get(i), Some(b'-' | b'+')) {
        i += 1;
    }
    let digits_start = i;
    let mut is_float = false;
    while let Some(&b) = bytes.get(i) {
        match b {
            b'0'..=b'9' => i += 1,
            b'.' if !is_float => {
                is_float = true;
                i += 1;
            }
            _ => break,
        }
    }
    if !bytes[digits_start..i].iter().any(u8::is_ascii_digit) {
        return Err(syntax_error(start, "malformed number"));
    }
    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'-' | b'+')) {
            j += 1;
        }
        let exponent_start = j;
        while matches!(bytes.get(j), Some(b'0'..=b'9')) {
            j += 1;
        }
        if j == exponent_start {
            return Err(syntax_error(start, "malformed exponent"));
        }
        is_float = true;
        i = j;
    }
    if matches!(bytes.get(i), Some(b) if b.is_ascii_alphabetic() || *b == b'_') {
        return Err(syntax_error(i, "malformed number"));
    }

    let text = &input[start..i];
    let token = if is_float {
        text.parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(Token::Floating)
            .ok_or_else(|| syntax_error(start, format!("malformed number '{text}'")))?
    } else {
        text.parse::<i64>()
            .map(Token::Integer)
            .map_err(|_| syntax_error(start, format!("integer out of range '{text}'")))?
    };
    Ok((token, i))
}

struct Parser {
    tokens: Vec<Spanned>,
    cursor: usize,
    end: usize,
    depth: usize,
    terms: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor).map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.cursor)
            .map_or(self.end, |s| s.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).map(|s| s.token.clone());
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(syntax_error(self.position(), format!("expected {keyword}")))
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<()> {
        if self.peek() == Some(&expected) {
            self.cursor += 1;
            Ok(())
        } else {
            Err(syntax_error(self.position(), format!("expected {what}")))
        }
    }

    fn nested<T>(
        &mut self,
        position: usize,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        if self.depth >= MAX_DEPTH {
            return Err(syntax_error(position, "filter nested too deeply"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn or_expr(&mut self) -> Result<Predicate> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("OR") {
            let right = self.and_expr()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Predicate> {
        let mut left = self.not_expr()?;
        while self.eat_keyword("AND") {
            let right = self.not_expr()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not_expr(&mut self) -> Result<Predicate> {
        let position = self.position();
        if self.eat_keyword("NOT") {
            let inner = self.nested(position, Self::not_expr)?;
            return Ok(Predicate::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Predicate> {
        let position = self.position();
        if self.peek() == Some(&Token::LParen) {
            self.cursor += 1;
            let inner = self.nested(position, Self::or_expr)?;
            self.expect(Token::RParen, "')'")?;
            return Ok(inner);
        }
        self.predicate()
    }

    fn property(&mut self) -> Result<String> {
        let position = self.position();
        match self.advance() {
            Some(Token::QuotedIdent(name)) => Ok(name),
            Some(Token::Word(word)) if !is_keyword(&word) => Ok(word),
            Some(_) => Err(syntax_error(position, "expected property name")),
            None => Err(syntax_error(position, "unexpected end of filter")),
        }
    }

    fn literal(&mut self) -> Result<Literal> {
        let position = self.position();
        match self.advance() {
            Some(Token::Integer(i)) => Ok(Literal::Integer(i)),
            Some(Token::Floating(f)) => Ok(Literal::Floating(f)),
            Some(Token::Str(s)) => Ok(Literal::String(s)),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("TRUE") => Ok(Literal::Boolean(true)),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("FALSE") => Ok(Literal::Boolean(false)),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("NULL") => Ok(Literal::Null),
            Some(_) => Err(syntax_error(position, "expected literal")),
            None => Err(syntax_error(position, "unexpected end of filter")),
        }
    }

    fn predicate(&mut self) -> Result<Predicate> {
        if self.terms >= MAX_TERMS {
            return Err(syntax_error(self.position(), "filter has too many terms"));
        }
        self.terms += 1;
        let property = self.property()?;

        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.cursor += 1;
            let literal = self.literal()?;
            return Ok(Predicate::Compare {
                property,
                op,
                literal,
            });
        }

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Predicate::IsNull { property, negated });
        }

        let negated = self.eat_keyword("NOT");
        let predicate = if self.eat_keyword("LIKE") {
            let position = self.position();
            match self.literal()? {
                literal @ Literal::String(_) => Predicate::Compare {
                    property,
                    op: CompareOp::Like,
                    literal,
                },
                _ => return Err(syntax_error(position, "LIKE expects a string literal")),
            }
        } else if self.eat_keyword("IN") {
            self.expect(Token::LParen, "'('")?;
            let mut literals = vec![self.literal()?];
            while self.peek() == Some(&Token::Comma) {
                self.cursor += 1;
                literals.push(self.literal()?);
            }
            self.expect(Token::RParen, "')'")?;
            Predicate::In { property, literals }
        } else {
            return Err(syntax_error(self.position(), "expected comparison operator"));
        };

        if negated {
            Ok(Predicate::Not(Box::new(predicate)))
        } else {
            Ok(predicate)
        }
    }
}

/// Parse filter text into a predicate tree.
///
/// Precedence is `NOT` over `AND` over `OR`; both binary connectives are left
/// associative. Error positions are byte offsets into `input`.
pub fn parse(input: &str) -> Result<Predicate> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(syntax_error(0, "empty filter"));
    }
    let mut parser = Parser {
        tokens,
        cursor: 0,
        end: input.len(),
        depth: 0,
        terms: 0,
    };
    let predicate = parser.or_expr()?;
    if parser.cursor < parser.tokens.len() {
        return Err(syntax_error(parser.position(), "unexpected trailing input"));
    }
    Ok(predicate)
}
