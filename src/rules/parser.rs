//! Precedence-climbing parser producing [`Expr`] trees.

use super::ast::{BinaryOp, Expr, LogicalOp, UnaryOp};
use super::lexer::{tokenize, Token, TokenKind};
use crate::error::{RuleError, RuleResult};
use crate::value::Value;

/// Parse rule text into an expression tree.
pub fn parse(source: &str) -> RuleResult<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, cursor: 0 };
    if parser.peek_kind() == &TokenKind::Eof {
        return Err(RuleError::parse("empty rule", 0));
    }
    let expr = parser.expression()?;
    match parser.peek() {
        Token {
            kind: TokenKind::Eof,
            ..
        } => Ok(expr),
        token => Err(RuleError::parse(
            format!("unexpected {}", describe(&token.kind)),
            token.offset,
        )),
    }
}

enum Infix {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

impl Infix {
    fn precedence(&self) -> u8 {
        match self {
            Infix::Binary(op) => op.precedence(),
            Infix::Logical(op) => op.precedence(),
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Number(_) => "number".to_string(),
        TokenKind::String(_) => "string".to_string(),
        TokenKind::Identifier(name) => format!("identifier `{name}`"),
        TokenKind::Punct(p) => format!("`{p}`"),
        TokenKind::Eof => "end of rule".to_string(),
    }
}

impl Parser {
    fn peek(&self) -> &Token {
        // tokenize always ends with Eof, and the cursor never moves past it
        &self.tokens[self.cursor.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.cursor += 1;
        }
        token
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek_kind(), TokenKind::Punct(p) if *p == punct) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> RuleResult<()> {
        if self.eat(punct) {
            return Ok(());
        }
        let token = self.peek();
        Err(RuleError::parse(
            format!("expected `{punct}`, found {}", describe(&token.kind)),
            token.offset,
        ))
    }

    fn expression(&mut self) -> RuleResult<Expr> {
        let test = self.binary(0)?;
        if !self.eat("?") {
            return Ok(test);
        }
        let consequent = self.expression()?;
        self.expect(":")?;
        let alternate = self.expression()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn peek_infix(&self) -> RuleResult<Option<Infix>> {
        let token = self.peek();
        let symbol = match &token.kind {
            TokenKind::Punct(p) => *p,
            _ => return Ok(None),
        };
        Ok(match symbol {
            "&&" => Some(Infix::Logical(LogicalOp::And)),
            "||" => Some(Infix::Logical(LogicalOp::Or)),
            "===" | "!==" => {
                return Err(RuleError::parse(
                    format!("operator `{symbol}` is not supported, use `==` / `!=`"),
                    token.offset,
                ))
            }
            other => BinaryOp::from_symbol(other).map(Infix::Binary),
        })
    }

    fn binary(&mut self, min_precedence: u8) -> RuleResult<Expr> {
        let mut left = self.unary()?;
        while let Some(infix) = self.peek_infix()? {
            let precedence = infix.precedence();
            if precedence <= min_precedence {
                break;
            }
            self.advance();
            let right = self.binary(precedence)?;
            left = match infix {
                Infix::Binary(operator) => Expr::Binary {
                    operator,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Infix::Logical(operator) => Expr::Logical {
                    operator,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> RuleResult<Expr> {
        let operator = match self.peek_kind() {
            TokenKind::Punct("-") => UnaryOp::Neg,
            TokenKind::Punct("+") => UnaryOp::Plus,
            TokenKind::Punct("!") => UnaryOp::Not,
            TokenKind::Punct("~") => UnaryOp::BitNot,
            _ => return self.postfix(),
        };
        self.advance();
        let argument = self.unary()?;
        Ok(Expr::Unary {
            operator,
            argument: Box::new(argument),
        })
    }

    fn postfix(&mut self) -> RuleResult<Expr> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(".") {
                let token = self.advance();
                let name = match token.kind {
                    TokenKind::Identifier(name) => name,
                    other => {
                        return Err(RuleError::parse(
                            format!("expected member name, found {}", describe(&other)),
                            token.offset,
                        ))
                    }
                };
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Box::new(Expr::Identifier(name)),
                    computed: false,
                };
            } else if self.eat("[") {
                let property = self.expression()?;
                self.expect("]")?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Box::new(property),
                    computed: true,
                };
            } else if self.eat("(") {
                let arguments = self.list(")")?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    arguments,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Comma-separated expressions up to `close`, which is consumed.
    fn list(&mut self, close: &str) -> RuleResult<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression()?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(",")?;
        }
    }

    fn primary(&mut self) -> RuleResult<Expr> {
        let token = self.advance();
        match token.kind {
            TokenKind::Number(value) => Ok(Expr::Literal(value)),
            TokenKind::String(s) => Ok(Expr::Literal(Value::String(s))),
            TokenKind::Identifier(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                "this" => Expr::This,
                _ => Expr::Identifier(name),
            }),
            TokenKind::Punct("(") => {
                let inner = self.expression()?;
                self.expect(")")?;
                Ok(inner)
            }
            TokenKind::Punct("[") => Ok(Expr::Array(self.list("]")?)),
            other => Err(RuleError::parse(
                format!("unexpected {}", describe(&other)),
                token.offset,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Identifier(name.to_string()))
    }

    fn member(object: Box<Expr>, name: &str) -> Box<Expr> {
        Box::new(Expr::Member {
            object,
            property: ident(name),
            computed: false,
        })
    }

    #[test]
    fn test_precedence() {
        let expr = parse("a || b && c == 1 + 2 * 3").unwrap();
        let Expr::Logical { operator, right, .. } = expr else {
            panic!("expected logical")
        };
        assert_eq!(operator, LogicalOp::Or);
        let Expr::Logical { operator, right, .. } = *right else {
            panic!("expected logical")
        };
        assert_eq!(operator, LogicalOp::And);
        let Expr::Binary { operator, right, .. } = *right else {
            panic!("expected binary")
        };
        assert_eq!(operator, BinaryOp::Eq);
        let Expr::Binary { operator, right, .. } = *right else {
            panic!("expected binary")
        };
        assert_eq!(operator, BinaryOp::Add);
        assert!(matches!(
            *right,
            Expr::Binary {
                operator: BinaryOp::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_left_associative() {
        let expr = parse("10 - 4 - 3").unwrap();
        let Expr::Binary { left, right, .. } = expr else {
            panic!("expected binary")
        };
        assert!(matches!(*left, Expr::Binary { .. }));
        assert_eq!(*right, Expr::Literal(Value::Int64(3)));
    }

    #[test]
    fn test_member_chain_and_call() {
        let expr = parse("compound.owner.id == request.user._id").unwrap();
        let Expr::Binary { left, right, .. } = expr else {
            panic!("expected binary")
        };
        assert_eq!(left, member(member(ident("compound"), "owner"), "id"));
        assert_eq!(right, member(member(ident("request"), "user"), "_id"));

        let expr = parse("contains(request.user.roles, 'admin')").unwrap();
        let Expr::Call { callee, arguments } = expr else {
            panic!("expected call")
        };
        assert_eq!(callee, ident("contains"));
        assert_eq!(arguments.len(), 2);
    }

    #[test]
    fn test_computed_member_and_array() {
        let expr = parse(r#"compound["user" + "name"] in_list [1, 2]"#);
        assert!(expr.is_err());

        let expr = parse(r#"compound["user" + "name"]"#).unwrap();
        assert!(matches!(expr, Expr::Member { computed: true, .. }));

        let expr = parse("[1, 'a', true]").unwrap();
        assert!(matches!(expr, Expr::Array(ref items) if items.len() == 3));
    }

    #[test]
    fn test_conditional_and_unary() {
        let expr = parse("!a ? -1 : +b").unwrap();
        let Expr::Conditional { test, consequent, alternate } = expr else {
            panic!("expected conditional")
        };
        assert!(matches!(*test, Expr::Unary { operator: UnaryOp::Not, .. }));
        assert!(matches!(*consequent, Expr::Unary { operator: UnaryOp::Neg, .. }));
        assert!(matches!(*alternate, Expr::Unary { operator: UnaryOp::Plus, .. }));
    }

    #[test]
    fn test_multiline_rule() {
        let rule = "\ncompound.a == 1\n  && compound.b.c > 2\n";
        assert!(parse(rule).is_ok());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse(""), Err(RuleError::Parse { .. })));
        assert!(matches!(parse("a ==="), Err(RuleError::Parse { .. })));
        assert!(matches!(parse("(a"), Err(RuleError::Parse { .. })));
        assert!(matches!(parse("a b"), Err(RuleError::Parse { offset: 2, .. })));
        assert!(matches!(parse("a."), Err(RuleError::Parse { .. })));
        assert!(matches!(parse("a ? b"), Err(RuleError::Parse { .. })));
    }
}
