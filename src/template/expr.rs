//! Directive Expression Evaluator
//!
//! Evaluates the conditions of `@property(expr)` blocks against the current
//! [`PropertySet`]. Grammar (loosest binding first):
//!
//! ```text
//! expr    := and ('||' and)*
//! and     := cmp ('&&' cmp)*
//! cmp     := unary (('<' | '<=' | '==' | '!=' | '>=' | '>') unary)?
//! unary   := '!' unary | primary
//! primary := integer | property-name | '(' expr ')'
//! ```
//!
//! A bare property name evaluates to its value; undefined properties are 0.
//! The result of a comparison or boolean operator is 1 or 0; truthiness is
//! "nonzero".

use crate::id::IdString;
use crate::properties::PropertySet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    Int(i32),
    Ident(IdString),
    LParen,
    RParen,
    Not,
    And,
    Or,
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn next_token(&mut self) -> Result<Option<Token>, String> {
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if self.pos >= bytes.len() {
            return Ok(None);
        }

        let rest = &self.src[self.pos..];
        let two = rest.get(..2).unwrap_or("");
        let tok = match two {
            "&&" => Some((Token::And, 2)),
            "||" => Some((Token::Or, 2)),
            "<=" => Some((Token::Le, 2)),
            ">=" => Some((Token::Ge, 2)),
            "==" => Some((Token::Eq, 2)),
            "!=" => Some((Token::Ne, 2)),
            _ => None,
        };
        if let Some((tok, len)) = tok {
            self.pos += len;
            return Ok(Some(tok));
        }

        let c = bytes[self.pos];
        let tok = match c {
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b'!' => Some(Token::Not),
            b'<' => Some(Token::Lt),
            b'>' => Some(Token::Gt),
            _ => None,
        };
        if let Some(tok) = tok {
            self.pos += 1;
            return Ok(Some(tok));
        }

        if c.is_ascii_digit() {
            let start = self.pos;
            while self.pos < bytes.len() && bytes[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
            let value: i32 = self.src[start..self.pos]
                .parse()
                .map_err(|_| format!("integer literal out of range: '{}'", &self.src[start..self.pos]))?;
            return Ok(Some(Token::Int(value)));
        }

        if c.is_ascii_alphabetic() || c == b'_' {
            let start = self.pos;
            while self.pos < bytes.len()
                && (bytes[self.pos].is_ascii_alphanumeric() || bytes[self.pos] == b'_')
            {
                self.pos += 1;
            }
            return Ok(Some(Token::Ident(IdString::new(&self.src[start..self.pos]))));
        }

        Err(format!("unexpected character '{}' in expression", c as char))
    }
}

struct Parser<'p> {
    tokens: Vec<Token>,
    pos: usize,
    props: &'p PropertySet,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.peek();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn expr(&mut self) -> Result<i32, String> {
        let mut lhs = self.and()?;
        while self.peek() == Some(Token::Or) {
            self.bump();
            let rhs = self.and()?;
            lhs = i32::from(lhs != 0 || rhs != 0);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<i32, String> {
        let mut lhs = self.cmp()?;
        while self.peek() == Some(Token::And) {
            self.bump();
            let rhs = self.cmp()?;
            lhs = i32::from(lhs != 0 && rhs != 0);
        }
        Ok(lhs)
    }

    fn cmp(&mut self) -> Result<i32, String> {
        let lhs = self.unary()?;
        let op = match self.peek() {
            Some(
                tok @ (Token::Lt | Token::Le | Token::Eq | Token::Ne | Token::Ge | Token::Gt),
            ) => {
                self.bump();
                tok
            }
            _ => return Ok(lhs),
        };
        let rhs = self.unary()?;
        let result = match op {
            Token::Lt => lhs < rhs,
            Token::Le => lhs <= rhs,
            Token::Eq => lhs == rhs,
            Token::Ne => lhs != rhs,
            Token::Ge => lhs >= rhs,
            Token::Gt => lhs > rhs,
            _ => unreachable!(),
        };
        Ok(i32::from(result))
    }

    fn unary(&mut self) -> Result<i32, String> {
        if self.peek() == Some(Token::Not) {
            self.bump();
            let value = self.unary()?;
            return Ok(i32::from(value == 0));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<i32, String> {
        match self.bump() {
            Some(Token::Int(value)) => Ok(value),
            Some(Token::Ident(id)) => Ok(self.props.get(id)),
            Some(Token::LParen) => {
                let value = self.expr()?;
                if self.bump() != Some(Token::RParen) {
                    return Err("expected ')'".to_string());
                }
                Ok(value)
            }
            Some(tok) => Err(format!("unexpected token {tok:?} in expression")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// Evaluate `src` against `props`. Returns the integer result; truthiness
/// is nonzero. Errors carry a message only — the caller attaches file/line.
pub fn evaluate(src: &str, props: &PropertySet) -> Result<i32, String> {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();
    while let Some(tok) = lexer.next_token()? {
        tokens.push(tok);
    }
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        props,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err("trailing tokens in expression".to_string());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, i32)]) -> PropertySet {
        let mut set = PropertySet::new();
        for &(name, value) in pairs {
            set.set(IdString::new(name), value);
        }
        set
    }

    #[test]
    fn test_bare_property_truthiness() {
        let set = props(&[("alpha_test", 1)]);
        assert_eq!(evaluate("alpha_test", &set).unwrap(), 1);
        assert_eq!(evaluate("undefined_prop", &set).unwrap(), 0);
    }

    #[test]
    fn test_comparisons() {
        let set = props(&[("uv_count", 2)]);
        assert_eq!(evaluate("uv_count >= 1", &set).unwrap(), 1);
        assert_eq!(evaluate("uv_count < 2", &set).unwrap(), 0);
        assert_eq!(evaluate("uv_count == 2", &set).unwrap(), 1);
        assert_eq!(evaluate("uv_count != 2", &set).unwrap(), 0);
    }

    #[test]
    fn test_boolean_operators() {
        let set = props(&[("colour", 1), ("uv_count", 2)]);
        assert_eq!(evaluate("colour && uv_count", &set).unwrap(), 1);
        assert_eq!(evaluate("colour && skeleton", &set).unwrap(), 0);
        assert_eq!(evaluate("skeleton || colour", &set).unwrap(), 1);
        assert_eq!(evaluate("!skeleton", &set).unwrap(), 1);
        assert_eq!(evaluate("!colour", &set).unwrap(), 0);
    }

    #[test]
    fn test_parenthesization() {
        let set = props(&[("a", 1), ("b", 0), ("c", 1)]);
        assert_eq!(evaluate("a && (b || c)", &set).unwrap(), 1);
        assert_eq!(evaluate("(a && b) || !c", &set).unwrap(), 0);
    }

    #[test]
    fn test_syntax_errors() {
        let set = PropertySet::new();
        assert!(evaluate("", &set).is_err());
        assert!(evaluate("(a", &set).is_err());
        assert!(evaluate("a b", &set).is_err());
        assert!(evaluate("a @ b", &set).is_err());
    }
}
