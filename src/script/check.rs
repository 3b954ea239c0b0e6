//! Structural checks run after parsing and before any code executes.

use std::collections::HashSet;

use super::ast::{Expr, ExprKind, Stmt, StmtKind};
use super::error::ScriptError;

pub(crate) fn check_program(stmts: &[Stmt]) -> Result<(), ScriptError> {
    let mut fn_names = HashSet::new();
    for stmt in stmts {
        if let StmtKind::Fn(decl) = &stmt.kind {
            if !fn_names.insert(decl.name.as_str()) {
                return Err(ScriptError::compile(
                    stmt.line,
                    format!("function '{}' is defined more than once", decl.name),
                ));
            }
            let mut seen = HashSet::new();
            for p in &decl.params {
                if !seen.insert(p.as_str()) {
                    return Err(ScriptError::compile(
                        stmt.line,
                        format!("duplicate parameter '{p}' in function '{}'", decl.name),
                    ));
                }
            }
            check_block(
                &decl.body,
                Ctx {
                    in_fn: true,
                    in_loop: false,
                },
            )?;
        } else {
            check_stmt(
                stmt,
                Ctx {
                    in_fn: false,
                    in_loop: false,
                },
            )?;
        }
    }
    Ok(())
}

#[derive(Clone, Copy)]
struct Ctx {
    in_fn: bool,
    in_loop: bool,
}

fn check_block(stmts: &[Stmt], ctx: Ctx) -> Result<(), ScriptError> {
    stmts.iter().try_for_each(|s| check_stmt(s, ctx))
}

fn check_stmt(stmt: &Stmt, ctx: Ctx) -> Result<(), ScriptError> {
    match &stmt.kind {
        StmtKind::Fn(decl) => Err(ScriptError::compile(
            stmt.line,
            format!(
                "function '{}' must be declared at the top level",
                decl.name
            ),
        )),
        StmtKind::Let { .. } | StmtKind::Expr(_) => Ok(()),
        StmtKind::Assign { target, .. } => {
            if is_place(target) {
                Ok(())
            } else {
                Err(ScriptError::compile(stmt.line, "invalid assignment target"))
            }
        }
        StmtKind::If {
            then_branch,
            else_branch,
            ..
        } => {
            check_block(then_branch, ctx)?;
            if let Some(else_branch) = else_branch {
                check_block(else_branch, ctx)?;
            }
            Ok(())
        }
        StmtKind::While { body, .. } | StmtKind::For { body, .. } => check_block(
            body,
            Ctx {
                in_loop: true,
                ..ctx
            },
        ),
        StmtKind::Return(_) if !ctx.in_fn => Err(ScriptError::compile(
            stmt.line,
            "'return' outside of a function",
        )),
        StmtKind::Break | StmtKind::Continue if !ctx.in_loop => Err(ScriptError::compile(
            stmt.line,
            "'break' or 'continue' outside of a loop",
        )),
        StmtKind::Return(_) | StmtKind::Break | StmtKind::Continue => Ok(()),
    }
}

/// A variable, or a field/index chain rooted at one.
fn is_place(expr: &Expr) -> bool {
    match &expr.kind {
        ExprKind::Var(_) => true,
        ExprKind::Field { base, .. } | ExprKind::Index { base, .. } => is_place(base),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::parse_program;

    fn check(src: &str) -> Result<(), ScriptError> {
        check_program(&parse_program(src).unwrap())
    }

    #[test]
    fn test_accepts_valid_program() {
        check(
            "let base = 2;\nfn helper(x) { return x * base; }\n\
             fn render(c, p) { for i in range(3) { if i == 1 { continue; } } return helper(1); }",
        )
        .unwrap();
    }

    #[test]
    fn test_nested_function_rejected() {
        let err = check("fn render(c, p) {\n  fn inner() { return 1; }\n}").unwrap_err();
        assert_eq!(err.line(), Some(2));
        assert!(matches!(err, ScriptError::Compile { .. }));
    }

    #[test]
    fn test_duplicate_function_rejected() {
        let err = check("fn a() {}\nfn a() {}").unwrap_err();
        assert!(err.to_string().contains("defined more than once"));
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let err = check("fn render(c, c) {}").unwrap_err();
        assert!(err.to_string().contains("duplicate parameter 'c'"));
    }

    #[test]
    fn test_return_at_top_level_rejected() {
        assert!(check("return 1;").is_err());
    }

    #[test]
    fn test_break_outside_loop_rejected() {
        assert!(check("fn f() { break; }").is_err());
        assert!(check("fn f() { while true { if true { break; } } }").is_ok());
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = check("fn f(a) { f(a) = 1; }").unwrap_err();
        assert!(err.to_string().contains("invalid assignment target"));
        assert!(check("fn f(a) { a.b[0].c = 1; }").is_ok());
    }
}
