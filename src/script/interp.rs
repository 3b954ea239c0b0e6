//! Tree-walking evaluator for reel script.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::{Interrupt, Limits};
use super::ast::{BinaryOp, Expr, ExprKind, FnDecl, Lit, Stmt, StmtKind, UnaryOp};
use super::builtins;
use super::error::ScriptError;
use super::value::Value;

/// Lexical scopes of one activation. The top level starts with no scopes,
/// so its `let`s land in the globals.
#[derive(Default)]
struct Frame {
    scopes: Vec<HashMap<String, Value>>,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

enum Seg {
    Field(String),
    Index(Value),
}

pub(crate) struct Interp {
    pub(crate) globals: BTreeMap<String, Value>,
    top: Frame,
    calls: Vec<Frame>,
    interrupt: Interrupt,
    limits: Limits,
}

impl Interp {
    pub(crate) fn new(
        globals: BTreeMap<String, Value>,
        interrupt: Interrupt,
        limits: Limits,
    ) -> Self {
        Self {
            globals,
            top: Frame::default(),
            calls: Vec::new(),
            interrupt,
            limits,
        }
    }

    /// Hoists every function declaration, then runs the remaining
    /// top-level statements in order.
    pub(crate) fn run_top_level(&mut self, stmts: &[Stmt]) -> Result<(), ScriptError> {
        for stmt in stmts {
            if let StmtKind::Fn(decl) = &stmt.kind {
                self.globals
                    .insert(decl.name.clone(), Value::Func(decl.clone()));
            }
        }
        for stmt in stmts {
            if matches!(stmt.kind, StmtKind::Fn(_)) {
                continue;
            }
            if !matches!(self.exec_stmt(stmt)?, Flow::Normal) {
                return Err(ScriptError::runtime(
                    stmt.line,
                    "control flow statement outside of a function or loop",
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn call(&mut self, decl: Arc<FnDecl>, args: Vec<Value>) -> Result<Value, ScriptError> {
        let line = decl.line;
        self.call_function(decl, args, line)
    }

    /// Rejects values over the size or nesting limits.
    fn checked(&self, value: Value, line: usize) -> Result<Value, ScriptError> {
        value
            .check_size(&self.limits)
            .map_err(|m| ScriptError::runtime(line, m))?;
        Ok(value)
    }

    fn check_interrupt(&self) -> Result<(), ScriptError> {
        if self.interrupt.is_tripped() {
            Err(ScriptError::Interrupted)
        } else {
            Ok(())
        }
    }

    // ── Variables ─────────────────────────────────────────

    fn lookup(&self, name: &str) -> Option<&Value> {
        let frame = self.calls.last().unwrap_or(&self.top);
        frame
            .scopes
            .iter()
            .rev()
            .find_map(|s| s.get(name))
            .or_else(|| self.globals.get(name))
    }

    fn declare(&mut self, name: &str, value: Value) {
        let scopes = match self.calls.last_mut() {
            Some(frame) => &mut frame.scopes,
            None => &mut self.top.scopes,
        };
        match scopes.last_mut() {
            Some(scope) => {
                scope.insert(name.to_string(), value);
            }
            None => {
                self.globals.insert(name.to_string(), value);
            }
        }
    }

    fn var_mut(&mut self, name: &str, line: usize) -> Result<&mut Value, ScriptError> {
        let in_call = !self.calls.is_empty();
        let frame = match self.calls.last_mut() {
            Some(frame) => frame,
            None => &mut self.top,
        };
        if let Some(v) = frame.scopes.iter_mut().rev().find_map(|s| s.get_mut(name)) {
            return Ok(v);
        }
        if in_call && self.globals.contains_key(name) {
            return Err(ScriptError::runtime(
                line,
                format!("cannot assign to global '{name}' inside a function"),
            ));
        }
        self.globals
            .get_mut(name)
            .ok_or_else(|| ScriptError::runtime(line, format!("undefined variable '{name}'")))
    }

    // ── Statements ────────────────────────────────────────

    fn exec_stmts(&mut self, stmts: &[Stmt]) -> Result<Flow, ScriptError> {
        for stmt in stmts {
            let flow = self.exec_stmt(stmt)?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_block(
        &mut self,
        stmts: &[Stmt],
        scope: HashMap<String, Value>,
    ) -> Result<Flow, ScriptError> {
        self.current_scopes().push(scope);
        let result = self.exec_stmts(stmts);
        self.current_scopes().pop();
        result
    }

    fn current_scopes(&mut self) -> &mut Vec<HashMap<String, Value>> {
        match self.calls.last_mut() {
            Some(frame) => &mut frame.scopes,
            None => &mut self.top.scopes,
        }
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        self.check_interrupt()?;
        match &stmt.kind {
            // Hoisted by `run_top_level`; nested declarations never pass the checker.
            StmtKind::Fn(_) => Ok(Flow::Normal),
            StmtKind::Let { name, value } => {
                let v = self.eval(value)?;
                self.declare(name, v);
                Ok(Flow::Normal)
            }
            StmtKind::Assign { target, value } => {
                let v = self.eval(value)?;
                self.assign(target, v)?;
                Ok(Flow::Normal)
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval_bool(cond, "if condition")? {
                    self.exec_block(then_branch, HashMap::new())
                } else if let Some(else_branch) = else_branch {
                    self.exec_block(else_branch, HashMap::new())
                } else {
                    Ok(Flow::Normal)
                }
            }
            StmtKind::While { cond, body } => {
                loop {
                    self.check_interrupt()?;
                    if !self.eval_bool(cond, "while condition")? {
                        break;
                    }
                    match self.exec_block(body, HashMap::new())? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::For { var, iter, body } => {
                let items = match self.eval(iter)? {
                    Value::List(items) => items,
                    Value::Map(map) => map.into_keys().map(Value::Str).collect(),
                    other => {
                        return Err(ScriptError::runtime(
                            iter.line,
                            format!("cannot iterate over {}", other.type_name()),
                        ));
                    }
                };
                for item in items {
                    self.check_interrupt()?;
                    let scope = HashMap::from([(var.clone(), item)]);
                    match self.exec_block(body, scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(e)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(v))
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Expr(e) => {
                self.eval(e)?;
                Ok(Flow::Normal)
            }
        }
    }

    fn assign(&mut self, target: &Expr, value: Value) -> Result<(), ScriptError> {
        let line = target.line;
        let mut path = Vec::new();
        let root = self.collect_place(target, &mut path)?;
        let last = path.len();
        let mut slot = self.var_mut(root, line)?;
        for (i, seg) in path.into_iter().enumerate() {
            slot = step_mut(slot, seg, i + 1 == last, line)?;
        }
        *slot = value;
        if last > 0 {
            // Storing into a container can grow it past the limits.
            let limits = self.limits;
            self.var_mut(root, line)?
                .check_size(&limits)
                .map_err(|m| ScriptError::runtime(line, m))?;
        }
        Ok(())
    }

    /// Flattens `a.b[i].c` into its root name and path, evaluating indices
    /// left to right.
    fn collect_place<'e>(
        &mut self,
        expr: &'e Expr,
        path: &mut Vec<Seg>,
    ) -> Result<&'e str, ScriptError> {
        match &expr.kind {
            ExprKind::Var(name) => Ok(name),
            ExprKind::Field { base, name } => {
                let root = self.collect_place(base, path)?;
                path.push(Seg::Field(name.clone()));
                Ok(root)
            }
            ExprKind::Index { base, index } => {
                let root = self.collect_place(base, path)?;
                let idx = self.eval(index)?;
                path.push(Seg::Index(idx));
                Ok(root)
            }
            _ => Err(ScriptError::runtime(expr.line, "invalid assignment target")),
        }
    }

    // ── Expressions ───────────────────────────────────────

    fn eval_bool(&mut self, expr: &Expr, what: &str) -> Result<bool, ScriptError> {
        match self.eval(expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(ScriptError::runtime(
                expr.line,
                format!("{what} must be a bool, got {}", other.type_name()),
            )),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        let line = expr.line;
        match &expr.kind {
            ExprKind::Lit(lit) => Ok(match lit {
                Lit::Null => Value::Null,
                Lit::Bool(b) => Value::Bool(*b),
                Lit::Num(n) => Value::Num(*n),
                Lit::Str(s) => Value::Str(s.clone()),
            }),
            ExprKind::Var(name) => self.lookup(name).cloned().ok_or_else(|| {
                let message = if builtins::lookup(name).is_some() {
                    format!("built-in '{name}' must be called directly")
                } else {
                    format!("undefined variable '{name}'")
                };
                ScriptError::runtime(line, message)
            }),
            ExprKind::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item)?);
                }
                self.checked(Value::List(out), line)
            }
            ExprKind::Map(entries) => {
                let mut out = BTreeMap::new();
                for (k, v) in entries {
                    let v = self.eval(v)?;
                    out.insert(k.clone(), v);
                }
                self.checked(Value::Map(out), line)
            }
            ExprKind::Unary { op, expr: inner } => {
                let v = self.eval(inner)?;
                match (op, v) {
                    (UnaryOp::Neg, Value::Num(n)) => Ok(Value::Num(-n)),
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, other) => Err(ScriptError::runtime(
                        line,
                        format!("cannot negate {}", other.type_name()),
                    )),
                    (UnaryOp::Not, other) => Err(ScriptError::runtime(
                        line,
                        format!("'!' expects a bool, got {}", other.type_name()),
                    )),
                }
            }
            ExprKind::Binary {
                op: op @ (BinaryOp::And | BinaryOp::Or),
                left,
                right,
            } => {
                let what = format!("operand of '{}'", op.symbol());
                let l = self.eval_bool(left, &what)?;
                // Short-circuit: `false && x` and `true || x` skip `x`.
                if (*op == BinaryOp::And) != l {
                    return Ok(Value::Bool(l));
                }
                Ok(Value::Bool(self.eval_bool(right, &what)?))
            }
            ExprKind::Binary { op, left, right } => {
                let a = self.eval(left)?;
                let b = self.eval(right)?;
                let v = binary(*op, a, b).map_err(|m| ScriptError::runtime(line, m))?;
                self.checked(v, line)
            }
            ExprKind::Field { base, name } => {
                let b = self.eval(base)?;
                read_field(b, name).map_err(|m| ScriptError::runtime(line, m))
            }
            ExprKind::Index { base, index } => {
                let b = self.eval(base)?;
                let i = self.eval(index)?;
                read_index(b, i).map_err(|m| ScriptError::runtime(line, m))
            }
            ExprKind::Call { callee, args } => self.eval_call(callee, args, line),
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, ScriptError> {
        args.iter().map(|a| self.eval(a)).collect()
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], line: usize) -> Result<Value, ScriptError> {
        self.check_interrupt()?;
        match &callee.kind {
            ExprKind::Var(name) if self.lookup(name).is_none() => {
                let Some(f) = builtins::lookup(name) else {
                    return Err(ScriptError::runtime(
                        line,
                        format!("undefined function '{name}'"),
                    ));
                };
                let args = self.eval_args(args)?;
                let v = f(args, &self.limits).map_err(|m| ScriptError::runtime(line, m))?;
                return self.checked(v, line);
            }
            ExprKind::Field { base, name } => {
                let target = self.eval(base)?;
                if let Value::Host(host) = target {
                    let args = self.eval_args(args)?;
                    return host.call_method(name, args).map_err(|e| {
                        ScriptError::runtime(line, format!("{}.{name}(): {e:#}", host.type_name()))
                    });
                }
                let f = read_field(target, name).map_err(|m| ScriptError::runtime(line, m))?;
                let args = self.eval_args(args)?;
                return self.call_value(f, args, line);
            }
            _ => {}
        }
        let f = self.eval(callee)?;
        let args = self.eval_args(args)?;
        self.call_value(f, args, line)
    }

    fn call_value(&mut self, f: Value, args: Vec<Value>, line: usize) -> Result<Value, ScriptError> {
        match f {
            Value::Func(decl) => self.call_function(decl, args, line),
            other => Err(ScriptError::runtime(
                line,
                format!("value of type {} is not callable", other.type_name()),
            )),
        }
    }

    fn call_function(
        &mut self,
        decl: Arc<FnDecl>,
        args: Vec<Value>,
        line: usize,
    ) -> Result<Value, ScriptError> {
        if args.len() != decl.params.len() {
            return Err(ScriptError::runtime(
                line,
                format!(
                    "function '{}' expects {} argument(s), got {}",
                    decl.name,
                    decl.params.len(),
                    args.len()
                ),
            ));
        }
        if self.calls.len() >= self.limits.max_call_depth {
            return Err(ScriptError::runtime(
                line,
                format!("maximum call depth of {} exceeded", self.limits.max_call_depth),
            ));
        }
        let scope: HashMap<String, Value> = decl.params.iter().cloned().zip(args).collect();
        self.calls.push(Frame {
            scopes: vec![scope],
        });
        let result = self.exec_stmts(&decl.body);
        self.calls.pop();
        match result? {
            Flow::Return(v) => Ok(v),
            Flow::Normal | Flow::Break | Flow::Continue => Ok(Value::Null),
        }
    }
}

fn binary(op: BinaryOp, a: Value, b: Value) -> Result<Value, String> {
    use Value::{Bool, List, Num, Str};
    Ok(match (op, a, b) {
        (BinaryOp::Eq, a, b) => Bool(a == b),
        (BinaryOp::Ne, a, b) => Bool(a != b),
        (BinaryOp::Add, Num(x), Num(y)) => Num(x + y),
        (BinaryOp::Add, Str(x), Str(y)) => Str(x + &y),
        (BinaryOp::Add, List(mut x), List(y)) => {
            x.extend(y);
            List(x)
        }
        (BinaryOp::Sub, Num(x), Num(y)) => Num(x - y),
        (BinaryOp::Mul, Num(x), Num(y)) => Num(x * y),
        (BinaryOp::Div, Num(_), Num(y)) if y == 0.0 => return Err("division by zero".into()),
        (BinaryOp::Div, Num(x), Num(y)) => Num(x / y),
        (BinaryOp::Mod, Num(_), Num(y)) if y == 0.0 => return Err("modulo by zero".into()),
        (BinaryOp::Mod, Num(x), Num(y)) => Num(x % y),
        (op @ (BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge), a, b) => {
            let ord = match (&a, &b) {
                (Num(x), Num(y)) => x.partial_cmp(y),
                (Str(x), Str(y)) => Some(x.cmp(y)),
                _ => None,
            };
            let Some(ord) = ord else {
                return Err(format!(
                    "cannot compare {} and {} with '{}'",
                    a.type_name(),
                    b.type_name(),
                    op.symbol()
                ));
            };
            Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            })
        }
        (op, a, b) => {
            return Err(format!(
                "cannot apply '{}' to {} and {}",
                op.symbol(),
                a.type_name(),
                b.type_name()
            ));
        }
    })
}

fn read_field(base: Value, name: &str) -> Result<Value, String> {
    match base {
        Value::Map(mut map) => map
            .remove(name)
            .ok_or_else(|| format!("map has no key '{name}'")),
        Value::Host(host) => Err(format!(
            "'{name}' on {} must be called as a method",
            host.type_name()
        )),
        other => Err(format!(
            "cannot read field '{name}' of {}",
            other.type_name()
        )),
    }
}

fn list_index(i: f64, len: usize) -> Result<usize, String> {
    if i.fract() != 0.0 || i < 0.0 || i >= len as f64 {
        return Err(format!("list index {i} out of range (length {len})"));
    }
    Ok(i as usize)
}

fn read_index(base: Value, index: Value) -> Result<Value, String> {
    match (base, index) {
        (Value::List(mut items), Value::Num(i)) => {
            let i = list_index(i, items.len())?;
            Ok(items.swap_remove(i))
        }
        (Value::Map(mut map), Value::Str(k)) => map
            .remove(&k)
            .ok_or_else(|| format!("map has no key '{k}'")),
        (Value::Str(s), Value::Num(i)) => {
            let len = s.chars().count();
            let i = list_index(i, len)?;
            Ok(Value::Str(s.chars().nth(i).map(String::from).unwrap_or_default()))
        }
        (b, i) => Err(format!(
            "cannot index {} with {}",
            b.type_name(),
            i.type_name()
        )),
    }
}

fn step_mut(slot: &mut Value, seg: Seg, last: bool, line: usize) -> Result<&mut Value, ScriptError> {
    let type_name = slot.type_name().to_string();
    match (slot, seg) {
        (Value::Map(map), Seg::Field(key) | Seg::Index(Value::Str(key))) => {
            if last {
                Ok(map.entry(key).or_insert(Value::Null))
            } else {
                map.get_mut(&key)
                    .ok_or_else(|| ScriptError::runtime(line, format!("map has no key '{key}'")))
            }
        }
        (Value::List(items), Seg::Index(Value::Num(i))) => {
            let i = list_index(i, items.len()).map_err(|m| ScriptError::runtime(line, m))?;
            Ok(&mut items[i])
        }
        (_, Seg::Field(key)) => Err(ScriptError::runtime(
            line,
            format!("cannot set field '{key}' on {type_name}"),
        )),
        (_, Seg::Index(i)) => Err(ScriptError::runtime(
            line,
            format!("cannot index {type_name} with {}", i.type_name()),
        )),
    }
}
