use super::ast::*;
use super::error::CompileError;
use super::lexer::{self, SpannedToken, Token};
use super::types::Type;

/// Parse a token stream into a script of schema definitions.
pub fn parse(tokens: Vec<SpannedToken>) -> Result<Script, CompileError> {
    let mut parser = Parser::new(tokens);
    parser.parse_script()
}

/// Parsed method signature: `(T, T) -> T`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSet {
    pub params: Vec<Type>,
    pub returns: Type,
}

impl std::fmt::Display for TypeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let params: Vec<String> = self.params.iter().map(Type::verbose_type_name).collect();
        write!(f, "({}) -> {}", params.join(", "), self.returns)
    }
}

/// Parse a type-set signature. Shares the `type` production with `parse`.
pub fn parse_type_set(tokens: Vec<SpannedToken>) -> Result<TypeSet, CompileError> {
    let mut parser = Parser::new(tokens);
    let set = parser.parse_type_set()?;
    parser.expect(&Token::Eof)?;
    Ok(set)
}

/// Lex and parse a type-set string such as `"(string) -> number"`.
pub fn parse_type_set_str(text: &str) -> Result<TypeSet, CompileError> {
    parse_type_set(lexer::lex("<type hint>", text)?)
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl Parser {
    fn new(mut tokens: Vec<SpannedToken>) -> Self {
        if !matches!(tokens.last().map(|t| &t.token), Some(Token::Eof)) {
            let end = tokens.last().map_or(0, |t| t.span.end);
            tokens.push(SpannedToken {
                token: Token::Eof,
                span: Span::new(end, end),
            });
        }
        Self { tokens, pos: 0 }
    }

    fn parse_script(&mut self) -> Result<Script, CompileError> {
        let mut schemas = Vec::new();
        self.skip_terminators();
        while !self.at_eof() {
            schemas.push(self.parse_schema_def()?);
            self.skip_terminators();
        }
        Ok(Script { schemas })
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).map_or(&Token::Eof, |t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .map_or(&Token::Eof, |t| &t.token)
    }

    fn span(&self) -> Span {
        self.tokens.get(self.pos).map_or(Span::new(0, 0), |t| t.span)
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn advance(&mut self) -> Span {
        let span = self.span();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        span
    }

    fn expect(&mut self, expected: &Token) -> Result<Span, CompileError> {
        if self.peek() == expected {
            Ok(self.advance())
        } else {
            Err(CompileError::parse(
                format!("Expected {expected:?}, got {:?}", self.peek()),
                self.span(),
            ))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span), CompileError> {
        if let Token::Ident(name) = self.peek().clone() {
            Ok((name, self.advance()))
        } else {
            Err(CompileError::parse(
                format!("Expected identifier, got {:?}", self.peek()),
                self.span(),
            ))
        }
    }

    fn skip_terminators(&mut self) {
        while matches!(self.peek(), Token::Semicolon) {
            self.advance();
        }
    }

    // ── Schemas & types ───────────────────────────────────────────

    fn parse_schema_def(&mut self) -> Result<SchemaDef, CompileError> {
        let start = self.expect(&Token::Schema)?;
        let (name, _) = self.expect_ident()?;
        self.expect(&Token::LParen)?;

        let mut params = Vec::new();
        if !matches!(self.peek(), Token::RParen) {
            loop {
                let (pname, pspan) = self.expect_ident()?;
                self.expect(&Token::Colon)?;
                let ty = self.parse_type()?;
                if params.iter().any(|p: &Param| p.name == pname) {
                    return Err(CompileError::parse(
                        format!("Duplicate parameter `{pname}`"),
                        pspan,
                    ));
                }
                params.push(Param {
                    name: pname,
                    ty,
                    span: pspan,
                });
                if matches!(self.peek(), Token::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;
        self.expect(&Token::Arrow)?;
        let returns = self.parse_type()?;
        let (body, end_span) = self.parse_block()?;

        Ok(SchemaDef {
            name,
            params,
            returns,
            body,
            span: start.merge(end_span),
        })
    }

    /// `type := IDENT ['[' type (',' type)* ']']`
    fn parse_type(&mut self) -> Result<Type, CompileError> {
        let (name, span) = self.expect_ident()?;
        let mut args = Vec::new();
        let mut end = span;
        if matches!(self.peek(), Token::LBracket) {
            self.advance();
            args.push(self.parse_type()?);
            while matches!(self.peek(), Token::Comma) {
                self.advance();
                args.push(self.parse_type()?);
            }
            end = self.expect(&Token::RBracket)?;
        }
        Type::from_name(&name, args).map_err(|msg| CompileError::parse(msg, span.merge(end)))
    }

    /// `'(' [type (',' type)*] ')' '->' type`
    fn parse_type_set(&mut self) -> Result<TypeSet, CompileError> {
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if !matches!(self.peek(), Token::RParen) {
            params.push(self.parse_type()?);
            while matches!(self.peek(), Token::Comma) {
                self.advance();
                params.push(self.parse_type()?);
            }
        }
        self.expect(&Token::RParen)?;
        self.expect(&Token::Arrow)?;
        let returns = self.parse_type()?;
        Ok(TypeSet { params, returns })
    }

    // ── Statements ────────────────────────────────────────────────

    /// Parse `{ stmt* }`, returning the statements and the closing brace span.
    fn parse_block(&mut self) -> Result<(Vec<Stmt>, Span), CompileError> {
        self.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        self.skip_terminators();
        while !matches!(self.peek(), Token::RBrace | Token::Eof) {
            stmts.push(self.parse_stmt()?);
            self.skip_terminators();
        }
        let end = self.expect(&Token::RBrace)?;
        Ok((stmts, end))
    }

    fn parse_stmt(&mut self) -> Result<Stmt, CompileError> {
        match self.peek() {
            Token::Local => {
                let start = self.advance();
                let (name, _) = self.expect_ident()?;
                let ty = if matches!(self.peek(), Token::Colon) {
                    self.advance();
                    Some(self.parse_type()?)
                } else {
                    None
                };
                self.expect(&Token::Eq)?;
                let value = self.parse_expr()?;
                let span = start.merge(value.span);
                Ok(Stmt::Local {
                    name,
                    ty,
                    value,
                    span,
                })
            }
            Token::Ident(_) if matches!(self.peek_at(1), Token::Eq) => {
                let (name, start) = self.expect_ident()?;
                self.advance();
                let value = self.parse_expr()?;
                let span = start.merge(value.span);
                Ok(Stmt::Assign { name, value, span })
            }
            Token::If => self.parse_if(),
            Token::Repeat => {
                let start = self.advance();
                let count = self.parse_expr()?;
                let (body, end) = self.parse_block()?;
                Ok(Stmt::Repeat {
                    count,
                    body,
                    span: start.merge(end),
                })
            }
            Token::Foreach => {
                let start = self.advance();
                let (var, _) = self.expect_ident()?;
                self.expect(&Token::In)?;
                let iterable = self.parse_expr()?;
                let (body, end) = self.parse_block()?;
                Ok(Stmt::Foreach {
                    var,
                    iterable,
                    body,
                    span: start.merge(end),
                })
            }
            _ => Ok(Stmt::Expr(self.parse_expr()?)),
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, CompileError> {
        let start = self.expect(&Token::If)?;
        let condition = self.parse_expr()?;
        let (then_body, mut end) = self.parse_block()?;

        let else_body = if matches!(self.peek(), Token::Else) {
            self.advance();
            if matches!(self.peek(), Token::If) {
                let nested = self.parse_if()?;
                end = nested.span();
                Some(vec![nested])
            } else {
                let (body, else_end) = self.parse_block()?;
                end = else_end;
                Some(body)
            }
        } else {
            None
        };

        Ok(Stmt::If {
            condition,
            then_body,
            else_body,
            span: start.merge(end),
        })
    }

    // ── Expression parsing (precedence climbing) ──────────────────

    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_equality()
    }

    fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        let span = left.span.merge(right.span);
        Expr {
            kind: ExprKind::BinOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        }
    }

    fn parse_equality(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_relational()?;
        while matches!(self.peek(), Token::EqEq) {
            self.advance();
            let right = self.parse_relational()?;
            left = Self::binary(BinOp::Eq, left, right);
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinOp::Lt,
                Token::Gt => BinOp::Gt,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Self::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        if matches!(self.peek(), Token::Minus) {
            let start = self.advance();
            let operand = self.parse_unary()?;
            let span = start.merge(operand.span);
            return Ok(Expr::new(ExprKind::Neg(Box::new(operand)), span));
        }
        self.parse_primary()
    }

    fn parse_args(&mut self, close: &Token) -> Result<(Vec<Expr>, Span), CompileError> {
        let mut args = Vec::new();
        if self.peek() != close {
            args.push(self.parse_expr()?);
            while matches!(self.peek(), Token::Comma) {
                self.advance();
                args.push(self.parse_expr()?);
            }
        }
        let end = self.expect(close)?;
        Ok((args, end))
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let span = self.span();
        match self.peek().clone() {
            Token::Number(v) => {
                self.advance();
                Ok(Expr::new(ExprKind::Number(v), span))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::new(ExprKind::Str(s), span))
            }
            Token::Text(s) => {
                self.advance();
                Ok(Expr::new(ExprKind::Text(s), span))
            }
            Token::Ident(name) => {
                self.advance();
                if matches!(self.peek(), Token::LParen) {
                    self.advance();
                    let (args, end) = self.parse_args(&Token::RParen)?;
                    return Ok(Expr::new(
                        ExprKind::Call(LateCall::new(name, args)),
                        span.merge(end),
                    ));
                }
                Ok(Expr::new(ExprKind::Ident(name), span))
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::LBracket => {
                self.advance();
                let (items, end) = self.parse_args(&Token::RBracket)?;
                Ok(Expr::new(ExprKind::List(items), span.merge(end)))
            }
            _ => Err(CompileError::parse(
                format!("Unexpected token: {:?}", self.peek()),
                span,
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dsl::error::ErrorKind;
    use crate::dsl::lexer::lex;

    fn parse_str(s: &str) -> Script {
        parse(lex("test", s).unwrap()).unwrap()
    }

    fn parse_err(s: &str) -> CompileError {
        parse(lex("test", s).unwrap()).unwrap_err()
    }

    fn body_expr(s: &str) -> Expr {
        let script = parse_str(&format!("schema t() -> any {{ {s} }}"));
        match script.schemas.into_iter().next().unwrap().body.into_iter().next() {
            Some(Stmt::Expr(e)) => e,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn parse_schema_header() {
        let script = parse_str("schema greet(name: string, times: number) -> list[string] { }");
        let schema = &script.schemas[0];
        assert_eq!(schema.name, "greet");
        assert_eq!(schema.params.len(), 2);
        assert_eq!(schema.params[0].name, "name");
        assert_eq!(schema.params[0].ty, Type::String);
        assert_eq!(schema.params[1].ty, Type::Number);
        assert_eq!(schema.returns, Type::list_of(Type::String));
        assert!(schema.body.is_empty());
    }

    #[test]
    fn parse_multiple_schemas() {
        let script = parse_str(
            "schema a() -> void { }\nschema b(m: dict[string, number]) -> number { 1 }",
        );
        assert_eq!(script.schemas.len(), 2);
        assert_eq!(
            script.schemas[1].params[0].ty,
            Type::dict_of(Type::String, Type::Number)
        );
    }

    #[test]
    fn parse_statements() {
        let script = parse_str(
            "schema s(xs: list[number]) -> number {
                local total: number = 0;
                foreach x in xs { total = total + x }
                repeat 2 { total = total * 2 }
                if total > 10 { total = 10 } else if total < 0 { total = 0 } else { print(total) }
                total
            }",
        );
        let body = &script.schemas[0].body;
        assert!(matches!(&body[0], Stmt::Local { name, ty: Some(Type::Number), .. } if name == "total"));
        assert!(matches!(&body[1], Stmt::Foreach { var, .. } if var == "x"));
        assert!(matches!(&body[2], Stmt::Repeat { .. }));
        match &body[3] {
            Stmt::If {
                else_body: Some(else_body),
                ..
            } => assert!(matches!(else_body[0], Stmt::If { .. })),
            other => panic!("expected if/else, got {other:?}"),
        }
        assert!(matches!(&body[4], Stmt::Expr(Expr { kind: ExprKind::Ident(n), .. }) if n == "total"));
    }

    #[test]
    fn precedence_and_associativity() {
        // 1 + 2 * 3 - 4  =>  ((1 + (2 * 3)) - 4)
        let expr = body_expr("1 + 2 * 3 - 4");
        let ExprKind::BinOp { op: BinOp::Sub, left, .. } = expr.kind else {
            panic!("expected subtraction at the root");
        };
        let ExprKind::BinOp { op: BinOp::Add, right, .. } = left.kind else {
            panic!("expected addition on the left");
        };
        assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Mul, .. }));
    }

    #[test]
    fn equality_binds_looser_than_relational() {
        let expr = body_expr("a < b == c > d");
        let ExprKind::BinOp { op: BinOp::Eq, left, right } = expr.kind else {
            panic!("expected equality at the root");
        };
        assert!(matches!(left.kind, ExprKind::BinOp { op: BinOp::Lt, .. }));
        assert!(matches!(right.kind, ExprKind::BinOp { op: BinOp::Gt, .. }));
    }

    #[test]
    fn calls_and_lists() {
        let expr = body_expr("join([\"a\", 'b'], \",\")");
        let ExprKind::Call(call) = &expr.kind else {
            panic!("expected call");
        };
        assert_eq!(call.name, "join");
        assert_eq!(call.args.len(), 2);
        assert!(matches!(&call.args[0].kind, ExprKind::List(items) if items.len() == 2));
        assert!(call.resolved().is_none());
    }

    #[test]
    fn call_span_covers_closing_paren() {
        let src = "schema t() -> any { foo(1, 2) }";
        let expr = body_expr("foo(1, 2)");
        assert_eq!(&src[expr.span.start..expr.span.end], "foo(1, 2)");
    }

    #[test]
    fn parsing_is_deterministic() {
        let src = "schema s(a: number) -> boolean { local b = [a, -a]; a * 2 < 5 == (1 > 0) }";
        assert_eq!(parse_str(src), parse_str(src));
    }

    #[test]
    fn parse_type_set_signatures() {
        let set = parse_type_set_str("(string, list[number]) -> dict[string, any]").unwrap();
        assert_eq!(set.params, vec![Type::String, Type::list_of(Type::Number)]);
        assert_eq!(set.returns, Type::dict_of(Type::String, Type::Any));
        assert_eq!(set.to_string(), "(string, list[number]) -> dict[string, any]");

        let empty = parse_type_set_str("() -> number").unwrap();
        assert!(empty.params.is_empty());
    }

    #[test]
    fn malformed_type_set_is_a_parse_error() {
        assert_eq!(parse_type_set_str("(string -> number").unwrap_err().kind, ErrorKind::Parse);
        assert_eq!(parse_type_set_str("(string) -> number extra").unwrap_err().kind, ErrorKind::Parse);
        assert_eq!(parse_type_set_str("(strin) -> number").unwrap_err().kind, ErrorKind::Parse);
    }

    #[test]
    fn errors_fail_fast_with_span() {
        let err = parse_err("schema a( -> void { }");
        assert_eq!(err.kind, ErrorKind::Parse);
        assert_eq!(err.span, Span::new(10, 12));

        let err = parse_err("schema a() -> void { local = 3 }");
        assert_eq!(err.kind, ErrorKind::Parse);

        let err = parse_err("schema a(x: number, x: string) -> void { }");
        assert!(err.message.contains("Duplicate parameter"));
    }

    #[test]
    fn unknown_type_is_a_parse_error() {
        let err = parse_err("schema a(x: integer) -> void { }");
        assert_eq!(err.kind, ErrorKind::Parse);
        assert_eq!(err.span, Span::new(12, 19));
    }
}
