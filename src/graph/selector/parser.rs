//! Pratt parser producing the selector syntax tree.

use super::lexer::{tokenize, Spanned, Token};
use super::CompileError;

/// Literal constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

impl BinOp {
    /// `(left, right)` binding power. Relations bind tighter than `&&`,
    /// which binds tighter than `||`.
    fn binding_power(self) -> (u8, u8) {
        match self {
            BinOp::Or => (1, 2),
            BinOp::And => (3, 4),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::In => (5, 6),
        }
    }

    fn from_token(token: &Token) -> Option<Self> {
        Some(match token {
            Token::OrOr => BinOp::Or,
            Token::AndAnd => BinOp::And,
            Token::EqEq => BinOp::Eq,
            Token::NotEq => BinOp::Ne,
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
            Token::In => BinOp::In,
            _ => return None,
        })
    }

    pub(crate) fn symbol(self) -> &'static str {
        match self {
            BinOp::Or => "||",
            BinOp::And => "&&",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::In => "in",
        }
    }
}

const PREFIX_BP: u8 = 7;

/// Quantifier macros over a list (or the keys of a map).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Quantifier {
    Exists,
    All,
}

/// Selector syntax tree.
#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Literal),
    Ident(String),
    List(Vec<Expr>),
    /// `operand.field`
    Select(Box<Expr>, String),
    /// `has(operand.field)`
    Has(Box<Expr>, String),
    /// `operand[index]`
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// Global `name(args)` or receiver-style `target.name(args)`.
    Call {
        name: String,
        target: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    /// `range.exists(var, predicate)` / `range.all(var, predicate)`
    Comprehension {
        quantifier: Quantifier,
        range: Box<Expr>,
        var: String,
        predicate: Box<Expr>,
    },
    /// `target.matches("literal")` with the pattern compiled up front.
    Matches(Box<Expr>, regex_lite::Regex),
}

pub(crate) struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    pub(crate) fn new(text: &str) -> Result<Self, CompileError> {
        Ok(Self {
            tokens: tokenize(text)?,
            pos: 0,
        })
    }

    /// Parse a complete expression; trailing tokens are an error.
    pub(crate) fn parse(mut self) -> Result<Expr, CompileError> {
        let expr = self.parse_expr()?;
        if !self.at(&Token::Eof) {
            return Err(self.unexpected("end of input"));
        }
        Ok(expr)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn position(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].pos
    }

    fn at(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.at(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), CompileError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, CompileError> {
        match self.peek().clone() {
            Token::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        CompileError::Syntax {
            position: self.position(),
            message: format!("expected {expected}, found {}", self.peek().describe()),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_expr_bp(0)
    }

    fn parse_expr_bp(&mut self, min_bp: u8) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_unary()?;

        loop {
            let Some(op) = BinOp::from_token(self.peek()) else {
                break;
            };
            let (l_bp, r_bp) = op.binding_power();
            if l_bp < min_bp {
                break;
            }
            self.advance();
            let rhs = self.parse_expr_bp(r_bp)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => {
                let primary = self.parse_primary()?;
                return self.parse_postfix(primary);
            }
        };
        self.advance();
        let operand = self.parse_expr_bp(PREFIX_BP)?;
        Ok(match (op, operand) {
            (UnaryOp::Neg, Expr::Literal(Literal::Int(n))) => Expr::Literal(Literal::Int(-n)),
            (op, operand) => Expr::Unary(op, Box::new(operand)),
        })
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr, CompileError> {
        loop {
            if self.eat(&Token::Dot) {
                let field = self.expect_ident("field or method name")?;
                if self.at(&Token::LParen) {
                    expr = self.parse_method(expr, field)?;
                } else {
                    expr = Expr::Select(Box::new(expr), field);
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.parse_expr()?;
                self.expect(&Token::RBracket, "`]`")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_method(&mut self, target: Expr, name: String) -> Result<Expr, CompileError> {
        let start = self.position();
        let args = self.parse_args()?;
        let quantifier = match name.as_str() {
            "exists" => Some(Quantifier::Exists),
            "all" => Some(Quantifier::All),
            _ => None,
        };
        let Some(quantifier) = quantifier else {
            return Ok(Expr::Call {
                name,
                target: Some(Box::new(target)),
                args,
            });
        };

        let mut args = args.into_iter();
        match (args.next(), args.next(), args.next()) {
            (Some(Expr::Ident(var)), Some(predicate), None) => Ok(Expr::Comprehension {
                quantifier,
                range: Box::new(target),
                var,
                predicate: Box::new(predicate),
            }),
            _ => Err(CompileError::Syntax {
                position: start,
                message: format!("{name} takes a variable name and a predicate"),
            }),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, CompileError> {
        self.expect(&Token::LParen, "`(`")?;
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(&Token::Comma, "`,` or `)`")?;
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let start = self.position();
        match self.peek().clone() {
            Token::Int(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Int(n)))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::Str(s)))
            }
            Token::True => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            Token::Null => {
                self.advance();
                Ok(Expr::Literal(Literal::Null))
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(inner)
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.parse_expr()?);
                        if self.eat(&Token::RBracket) {
                            break;
                        }
                        self.expect(&Token::Comma, "`,` or `]`")?;
                    }
                }
                Ok(Expr::List(items))
            }
            Token::Ident(name) => {
                self.advance();
                if !self.at(&Token::LParen) {
                    return Ok(Expr::Ident(name));
                }
                let args = self.parse_args()?;
                if name != "has" {
                    return Ok(Expr::Call {
                        name,
                        target: None,
                        args,
                    });
                }
                let mut args = args.into_iter();
                match (args.next(), args.next()) {
                    (Some(Expr::Select(operand, field)), None) => Ok(Expr::Has(operand, field)),
                    _ => Err(CompileError::Syntax {
                        position: start,
                        message: "has() takes a single field selection".to_string(),
                    }),
                }
            }
            _ => Err(self.unexpected("expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Expr {
        Parser::new(text).unwrap().parse().unwrap()
    }

    #[test]
    fn test_precedence() {
        let expr = parse("a || b && c == 1");
        let Expr::Binary(BinOp::Or, lhs, rhs) = expr else {
            panic!("expected ||");
        };
        assert!(matches!(*lhs, Expr::Ident(ref n) if n == "a"));
        let Expr::Binary(BinOp::And, _, rhs) = *rhs else {
            panic!("expected &&");
        };
        assert!(matches!(*rhs, Expr::Binary(BinOp::Eq, _, _)));
    }

    #[test]
    fn test_not_binds_tighter_than_and() {
        let expr = parse("!a && b");
        assert!(matches!(expr, Expr::Binary(BinOp::And, ref lhs, _) if matches!(**lhs, Expr::Unary(UnaryOp::Not, _))));
    }

    #[test]
    fn test_postfix_chain() {
        let expr = parse("entry.tags['channel'].exists(c, c.startsWith('stable'))");
        let Expr::Comprehension { quantifier, range, var, predicate } = expr else {
            panic!("expected comprehension");
        };
        assert_eq!(quantifier, Quantifier::Exists);
        assert_eq!(var, "c");
        assert!(matches!(*range, Expr::Index(_, _)));
        assert!(matches!(*predicate, Expr::Call { ref name, target: Some(_), .. } if name == "startsWith"));
    }

    #[test]
    fn test_has_and_negative_literal() {
        assert!(matches!(parse("has(entry.node)"), Expr::Has(_, ref f) if f == "node"));
        assert!(matches!(parse("-3"), Expr::Literal(Literal::Int(-3))));
    }

    #[test]
    fn test_syntax_errors() {
        for (text, position) in [("a &&", 4), ("(a", 2), ("a b", 2), ("has(a)", 0), ("[1, 2", 5)] {
            let err = Parser::new(text).unwrap().parse().unwrap_err();
            assert!(
                matches!(err, CompileError::Syntax { position: p, .. } if p == position),
                "{text}: {err:?}"
            );
        }
    }
}
