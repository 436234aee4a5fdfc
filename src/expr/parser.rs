use super::ast::{BinaryOp, Expr};
use super::lexer::{LexError, Lexer, Token};
use super::value::EvalValue;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError(pub String);

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError(e.0)
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "expression parse error: {}", self.0)
    }
}

impl std::error::Error for ParseError {}

/// Recursive-descent, single-pass parser matching the precedence table in
/// spec.md §4.A (low to high): `||`, `&&`, equality, relational, primary.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn new(source: &str) -> Self {
        // Tokenization failures surface as a parse error at `parse_expr`,
        // not here, so construction itself never fails.
        let tokens = Lexer::new(source).tokenize().unwrap_or(vec![Token::Eof]);
        Self { tokens, pos: 0 }
    }

    pub fn parse_expr(mut self) -> Result<Expr, ParseError> {
        if self.tokens.len() == 1 && self.tokens[0] == Token::Eof {
            // Empty/missing `when` is treated as `true` by the caller; here
            // an empty string is still a valid (if useless) expression.
            return Ok(Expr::Literal(EvalValue::Bool(true)));
        }
        let expr = self.parse_or()?;
        self.expect(Token::Eof)?;
        Ok(expr)
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        let tok = self.advance();
        if tok == expected {
            Ok(())
        } else {
            Err(ParseError(format!("expected {:?}, found {:?}", expected, tok)))
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while *self.peek() == Token::Or {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinaryOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_equality()?;
        while *self.peek() == Token::And {
            self.advance();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary {
                op: BinaryOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinaryOp::Eq,
                Token::Ne => BinaryOp::Ne,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_primary()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinaryOp::Lt,
                Token::Le => BinaryOp::Le,
                Token::Gt => BinaryOp::Gt,
                Token::Ge => BinaryOp::Ge,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_primary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.advance() {
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::True => Ok(Expr::Literal(EvalValue::Bool(true))),
            Token::False => Ok(Expr::Literal(EvalValue::Bool(false))),
            Token::Null => Ok(Expr::Literal(EvalValue::Null)),
            Token::Int(i) => Ok(Expr::Literal(EvalValue::Int(i))),
            Token::Float(f) => Ok(Expr::Literal(EvalValue::Float(f))),
            Token::Str(s) => Ok(Expr::Literal(EvalValue::Str(s))),
            Token::Ident(root) => self.parse_path(root),
            other => Err(ParseError(format!("unexpected token {:?}", other))),
        }
    }

    fn parse_path(&mut self, root: String) -> Result<Expr, ParseError> {
        let mut segments = Vec::new();
        while *self.peek() == Token::Dot {
            self.advance();
            match self.advance() {
                Token::Ident(seg) => segments.push(seg),
                other => return Err(ParseError(format!("expected field name, found {:?}", other))),
            }
        }
        Ok(Expr::Path { root, segments })
    }
}
