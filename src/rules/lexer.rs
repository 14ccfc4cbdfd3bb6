//! Tokenizer for rule expressions.

use crate::error::{RuleError, RuleResult};
use crate::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum TokenKind {
    Number(Value),
    String(String),
    Identifier(String),
    Punct(&'static str),
    Eof,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

/// Longest first, so `>>>` wins over `>>` and `>`.
const PUNCTUATION: [&str; 31] = [
    ">>>", "===", "!==", "==", "!=", "<=", ">=", "<<", ">>", "&&", "||", "<", ">", "+", "-", "*",
    "/", "%", "!", "~", "|", "^", "&", "(", ")", "[", "]", ".", ",", "?", ":",
];

struct Lexer<'a> {
    input: &'a str,
    cursor: usize,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.input[self.cursor..].chars().next()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.input[self.cursor..].chars().nth(ahead)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.cursor += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn next_token(&mut self) -> RuleResult<Token> {
        self.skip_whitespace();
        let offset = self.cursor;
        let c = match self.peek() {
            Some(c) => c,
            None => {
                return Ok(Token {
                    kind: TokenKind::Eof,
                    offset,
                })
            }
        };

        let kind = if c.is_ascii_digit()
            || (c == '.' && self.peek_at(1).is_some_and(|n| n.is_ascii_digit()))
        {
            self.number(offset)?
        } else if c == '"' || c == '\'' {
            self.string(offset)?
        } else if is_identifier_start(c) {
            let start = self.cursor;
            while self.peek().is_some_and(is_identifier_part) {
                self.bump();
            }
            TokenKind::Identifier(self.input[start..self.cursor].to_string())
        } else {
            let rest = &self.input[self.cursor..];
            let punct = *PUNCTUATION
                .iter()
                .find(|p| rest.starts_with(**p))
                .ok_or_else(|| RuleError::parse(format!("unexpected character `{c}`"), offset))?;
            self.cursor += punct.len();
            TokenKind::Punct(punct)
        };

        Ok(Token { kind, offset })
    }

    fn number(&mut self, offset: usize) -> RuleResult<TokenKind> {
        let start = self.cursor;
        let mut float = false;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') {
            float = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            float = true;
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(RuleError::parse("expected exponent", self.cursor));
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if self.peek().is_some_and(is_identifier_start) {
            return Err(RuleError::parse("identifier directly after number", self.cursor));
        }

        let text = &self.input[start..self.cursor];
        if !float {
            if let Ok(n) = text.parse::<i64>() {
                return Ok(TokenKind::Number(Value::Int64(n)));
            }
        }
        text.parse::<f64>()
            .map(|d| TokenKind::Number(Value::Double(d)))
            .map_err(|_| RuleError::parse(format!("invalid number `{text}`"), offset))
    }

    fn string(&mut self, offset: usize) -> RuleResult<TokenKind> {
        let quote = self.bump().unwrap_or('"');
        let mut out = String::new();
        loop {
            let c = self
                .bump()
                .ok_or_else(|| RuleError::parse("unterminated string", offset))?;
            if c == quote {
                break;
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let escaped = self
                .bump()
                .ok_or_else(|| RuleError::parse("unterminated string", offset))?;
            out.push(match escaped {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                'b' => '\u{8}',
                'f' => '\u{c}',
                'v' => '\u{b}',
                other => other,
            });
        }
        Ok(TokenKind::String(out))
    }
}

fn is_identifier_start(c: char) -> bool {
    c == '$' || c == '_' || c.is_alphabetic()
}

fn is_identifier_part(c: char) -> bool {
    is_identifier_start(c) || c.is_ascii_digit()
}

/// Split rule text into tokens, ending with `Eof`.
pub(crate) fn tokenize(input: &str) -> RuleResult<Vec<Token>> {
    let mut lexer = Lexer { input, cursor: 0 };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}
