use std::sync::Arc;

use super::ast::{BinaryOp, Expr, ExprKind, FnDecl, Lit, Stmt, StmtKind, UnaryOp};
use super::error::ScriptError;
use super::lexer::{Token, TokenKind, lex};

/// Nesting limit for blocks and expressions, keeps recursion bounded on
/// hostile input.
const MAX_NESTING: usize = 128;

pub(crate) fn parse_program(src: &str) -> Result<Vec<Stmt>, ScriptError> {
    let tokens = lex(src)?;
    let mut p = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let mut stmts = Vec::new();
    while p.peek().kind != TokenKind::Eof {
        stmts.push(p.parse_stmt()?);
    }
    Ok(stmts)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn bump(&mut self) -> Token {
        let t = self.tokens[self.pos].clone();
        if t.kind != TokenKind::Eof {
            self.pos += 1;
        }
        t
    }

    fn line(&self) -> usize {
        self.peek().line
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(self.line(), message)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), ScriptError> {
        if self.peek().kind == kind {
            self.bump();
            Ok(())
        } else {
            Err(self.error(format!(
                "expected {kind} {what}, found {}",
                self.peek().kind
            )))
        }
    }

    fn consume(&mut self, kind: TokenKind) -> bool {
        if self.peek().kind == kind {
            self.bump();
            true
        } else {
            false
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, ScriptError> {
        match self.peek().kind.clone() {
            TokenKind::Ident(name) => {
                self.bump();
                Ok(name)
            }
            other => Err(self.error(format!("expected {what}, found {other}"))),
        }
    }

    fn enter(&mut self) -> Result<(), ScriptError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("code is nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // ── Statements ────────────────────────────────────────

    fn parse_stmt(&mut self) -> Result<Stmt, ScriptError> {
        let line = self.line();
        let kind = match self.peek().kind {
            TokenKind::Fn => self.parse_fn()?,
            TokenKind::Let => {
                self.bump();
                let name = self.ident("variable name after 'let'")?;
                self.expect(TokenKind::Assign, "after variable name")?;
                let value = self.parse_expr()?;
                self.expect(TokenKind::Semi, "after let statement")?;
                StmtKind::Let { name, value }
            }
            TokenKind::If => self.parse_if()?,
            TokenKind::While => {
                self.bump();
                let cond = self.parse_expr()?;
                let body = self.parse_block()?;
                StmtKind::While { cond, body }
            }
            TokenKind::For => {
                self.bump();
                let var = self.ident("loop variable after 'for'")?;
                self.expect(TokenKind::In, "after loop variable")?;
                let iter = self.parse_expr()?;
                let body = self.parse_block()?;
                StmtKind::For { var, iter, body }
            }
            TokenKind::Return => {
                self.bump();
                let value = if self.peek().kind == TokenKind::Semi {
                    None
                } else {
                    Some(self.parse_expr()?)
                };
                self.expect(TokenKind::Semi, "after return statement")?;
                StmtKind::Return(value)
            }
            TokenKind::Break => {
                self.bump();
                self.expect(TokenKind::Semi, "after 'break'")?;
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.bump();
                self.expect(TokenKind::Semi, "after 'continue'")?;
                StmtKind::Continue
            }
            _ => {
                let expr = self.parse_expr()?;
                if self.consume(TokenKind::Assign) {
                    let value = self.parse_expr()?;
                    self.expect(TokenKind::Semi, "after assignment")?;
                    StmtKind::Assign {
                        target: expr,
                        value,
                    }
                } else {
                    self.expect(TokenKind::Semi, "after expression")?;
                    StmtKind::Expr(expr)
                }
            }
        };
        Ok(Stmt { kind, line })
    }

    fn parse_fn(&mut self) -> Result<StmtKind, ScriptError> {
        let line = self.line();
        self.bump();
        let name = self.ident("function name after 'fn'")?;
        self.expect(TokenKind::LParen, "after function name")?;
        let mut params = Vec::new();
        if !self.consume(TokenKind::RParen) {
            loop {
                params.push(self.ident("parameter name")?);
                if self.consume(TokenKind::Comma) {
                    if self.consume(TokenKind::RParen) {
                        break;
                    }
                    continue;
                }
                self.expect(TokenKind::RParen, "after parameters")?;
                break;
            }
        }
        let body = self.parse_block()?;
        Ok(StmtKind::Fn(Arc::new(FnDecl {
            name,
            params,
            body,
            line,
        })))
    }

    fn parse_if(&mut self) -> Result<StmtKind, ScriptError> {
        self.bump();
        let cond = self.parse_expr()?;
        let then_branch = self.parse_block()?;
        let else_branch = if self.consume(TokenKind::Else) {
            if self.peek().kind == TokenKind::If {
                let line = self.line();
                self.enter()?;
                let nested = self.parse_if();
                self.leave();
                Some(vec![Stmt {
                    kind: nested?,
                    line,
                }])
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        Ok(StmtKind::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect(TokenKind::LBrace, "to open block")?;
        self.enter()?;
        let mut stmts = Vec::new();
        while self.peek().kind != TokenKind::RBrace {
            if self.peek().kind == TokenKind::Eof {
                return Err(self.error("unexpected end of input, expected '}'"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.leave();
        self.bump();
        Ok(stmts)
    }

    // ── Expressions ───────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, ScriptError> {
        self.enter()?;
        let e = self.parse_or();
        self.leave();
        e
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        let line = left.line;
        Expr {
            kind: ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            line,
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ScriptError> {
        let mut e = self.parse_and()?;
        while self.consume(TokenKind::OrOr) {
            let r = self.parse_and()?;
            e = Self::binary(BinaryOp::Or, e, r);
        }
        Ok(e)
    }

    fn parse_and(&mut self) -> Result<Expr, ScriptError> {
        let mut e = self.parse_equality()?;
        while self.consume(TokenKind::AndAnd) {
            let r = self.parse_equality()?;
            e = Self::binary(BinaryOp::And, e, r);
        }
        Ok(e)
    }

    fn parse_equality(&mut self) -> Result<Expr, ScriptError> {
        let mut e = self.parse_comparison()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::Ne => BinaryOp::Ne,
                _ => break,
            };
            self.bump();
            let r = self.parse_comparison()?;
            e = Self::binary(op, e, r);
        }
        Ok(e)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ScriptError> {
        let mut e = self.parse_term()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Lt => BinaryOp::Lt,
                TokenKind::Le => BinaryOp::Le,
                TokenKind::Gt => BinaryOp::Gt,
                TokenKind::Ge => BinaryOp::Ge,
                _ => break,
            };
            self.bump();
            let r = self.parse_term()?;
            e = Self::binary(op, e, r);
        }
        Ok(e)
    }

    fn parse_term(&mut self) -> Result<Expr, ScriptError> {
        let mut e = self.parse_factor()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.bump();
            let r = self.parse_factor()?;
            e = Self::binary(op, e, r);
        }
        Ok(e)
    }

    fn parse_factor(&mut self) -> Result<Expr, ScriptError> {
        let mut e = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                TokenKind::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.bump();
            let r = self.parse_unary()?;
            e = Self::binary(op, e, r);
        }
        Ok(e)
    }

    fn parse_unary(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        self.bump();
        self.enter()?;
        let inner = self.parse_unary();
        self.leave();
        Ok(Expr {
            kind: ExprKind::Unary {
                op,
                expr: Box::new(inner?),
            },
            line,
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, ScriptError> {
        let mut e = self.parse_primary()?;

        loop {
            let line = self.line();
            if self.consume(TokenKind::Dot) {
                let name = self.ident("field name after '.'")?;
                e = Expr {
                    kind: ExprKind::Field {
                        base: Box::new(e),
                        name,
                    },
                    line,
                };
                continue;
            }

            if self.consume(TokenKind::LBracket) {
                let index = self.parse_expr()?;
                self.expect(TokenKind::RBracket, "after index")?;
                e = Expr {
                    kind: ExprKind::Index {
                        base: Box::new(e),
                        index: Box::new(index),
                    },
                    line,
                };
                continue;
            }

            if self.consume(TokenKind::LParen) {
                let args = self.parse_list(TokenKind::RParen, "after arguments")?;
                e = Expr {
                    kind: ExprKind::Call {
                        callee: Box::new(e),
                        args,
                    },
                    line,
                };
                continue;
            }

            break;
        }

        Ok(e)
    }

    /// Comma-separated expressions up to `close`; a trailing comma is allowed.
    fn parse_list(&mut self, close: TokenKind, what: &str) -> Result<Vec<Expr>, ScriptError> {
        let mut items = Vec::new();
        if self.consume(close.clone()) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            if self.consume(TokenKind::Comma) {
                if self.consume(close.clone()) {
                    return Ok(items);
                }
                continue;
            }
            self.expect(close, what)?;
            return Ok(items);
        }
    }

    fn parse_map(&mut self) -> Result<Vec<(String, Expr)>, ScriptError> {
        let mut entries = Vec::new();
        if self.consume(TokenKind::RBrace) {
            return Ok(entries);
        }
        loop {
            let key = match self.peek().kind.clone() {
                TokenKind::Str(s) | TokenKind::Ident(s) => {
                    self.bump();
                    s
                }
                other => {
                    return Err(self.error(format!("expected map key, found {other}")));
                }
            };
            self.expect(TokenKind::Colon, "after map key")?;
            entries.push((key, self.parse_expr()?));
            if self.consume(TokenKind::Comma) {
                if self.consume(TokenKind::RBrace) {
                    return Ok(entries);
                }
                continue;
            }
            self.expect(TokenKind::RBrace, "after map entries")?;
            return Ok(entries);
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ScriptError> {
        let line = self.line();
        let t = self.bump();
        let kind = match t.kind {
            TokenKind::Number(v) => ExprKind::Lit(Lit::Num(v)),
            TokenKind::Str(s) => ExprKind::Lit(Lit::Str(s)),
            TokenKind::True => ExprKind::Lit(Lit::Bool(true)),
            TokenKind::False => ExprKind::Lit(Lit::Bool(false)),
            TokenKind::Null => ExprKind::Lit(Lit::Null),
            TokenKind::Ident(name) => ExprKind::Var(name),
            TokenKind::LParen => {
                let e = self.parse_expr()?;
                self.expect(TokenKind::RParen, "to close parenthesis")?;
                return Ok(e);
            }
            TokenKind::LBracket => {
                ExprKind::List(self.parse_list(TokenKind::RBracket, "after list items")?)
            }
            TokenKind::LBrace => ExprKind::Map(self.parse_map()?),
            other => {
                return Err(ScriptError::syntax(
                    t.line,
                    format!("unexpected {other}"),
                ));
            }
        };
        Ok(Expr { kind, line })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_expr(src: &str) -> Expr {
        let stmts = parse_program(src).unwrap();
        match &stmts[0].kind {
            StmtKind::Expr(e) => e.clone(),
            other => panic!("unexpected stmt: {other:?}"),
        }
    }

    #[test]
    fn test_arithmetic_precedence() {
        let e = first_expr("1 + 2 * 3;");
        match e.kind {
            ExprKind::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(
                right.kind,
                ExprKind::Binary {
                    op: BinaryOp::Mul,
                    ..
                }
            )),
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn test_method_call_on_field() {
        let e = first_expr("conn.generate_stream(tl);");
        match e.kind {
            ExprKind::Call { callee, args } => {
                assert_eq!(args.len(), 1);
                match callee.kind {
                    ExprKind::Field { name, .. } => assert_eq!(name, "generate_stream"),
                    other => panic!("unexpected callee: {other:?}"),
                }
            }
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn test_function_declaration() {
        let stmts = parse_program("fn render(conn, params,) {\n  return 1;\n}").unwrap();
        assert_eq!(stmts.len(), 1);
        match &stmts[0].kind {
            StmtKind::Fn(decl) => {
                assert_eq!(decl.name, "render");
                assert_eq!(decl.params, vec!["conn", "params"]);
                assert_eq!(decl.body.len(), 1);
                assert_eq!(decl.body[0].line, 2);
            }
            other => panic!("unexpected stmt: {other:?}"),
        }
    }

    #[test]
    fn test_map_and_list_literals() {
        let e = first_expr(r#"{"a": [1, 2,], b: {},};"#);
        match e.kind {
            ExprKind::Map(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].0, "a");
                assert_eq!(entries[1].0, "b");
            }
            other => panic!("unexpected ast: {other:?}"),
        }
    }

    #[test]
    fn test_else_if_chain() {
        let stmts =
            parse_program("if a { x = 1; } else if b { x = 2; } else { x = 3; }").unwrap();
        match &stmts[0].kind {
            StmtKind::If { else_branch, .. } => {
                let nested = else_branch.as_ref().unwrap();
                assert!(matches!(nested[0].kind, StmtKind::If { .. }));
            }
            other => panic!("unexpected stmt: {other:?}"),
        }
    }

    #[test]
    fn test_missing_semicolon_reports_line() {
        let err = parse_program("let a = 1;\nlet b = 2\nlet c = 3;").unwrap_err();
        assert_eq!(err.line(), Some(3));
        assert!(err.to_string().contains("expected ';'"));
    }

    #[test]
    fn test_unclosed_block() {
        let err = parse_program("fn render(c, p) {\n  return 1;\n").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax { .. }));
        assert!(err.to_string().contains("expected '}'"));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let src = format!("{}1{};", "(".repeat(500), ")".repeat(500));
        let err = parse_program(&src).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"));
    }
}
