//! Reel script: the small sandboxed language templates are written in.
//!
//! A script is compiled once ([`compile`]), its top level is run to build a
//! [`Namespace`], and then a function from that namespace is called. Scripts
//! have no ambient authority: no file, network, clock or environment access.
//! Everything outside the interpreter is reached through [`HostObject`]
//! values passed in as arguments.
//!
//! ```text
//! fn render(conn, params) {
//!     let clip = conn.video(params.video_id);
//!     return conn.generate_stream({"tracks": [clip]});
//! }
//! ```

mod ast;
mod builtins;
mod check;
mod error;
mod interp;
mod lexer;
mod parser;
mod value;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub use ast::FnDecl;
pub(crate) use builtins::map_of;
pub use error::ScriptError;
pub use value::{HostObject, Value};

use ast::Stmt;
use interp::Interp;

/// Default nesting limit for function calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

/// Default bound on the size of any single value, see [`Limits`].
pub const DEFAULT_MAX_VALUE_SIZE: usize = 1_000_000;

/// Default nesting limit for lists and maps.
pub const DEFAULT_MAX_VALUE_DEPTH: usize = 64;

/// Cooperative cancellation flag polled by the interpreter before every
/// statement, loop iteration and call.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Resource bounds for one script run.
///
/// Value size is measured in units: a string costs one unit per byte, and
/// every other value, list, map and map key costs at least one. Strings,
/// lists and maps built by a script are checked as they are created, so a
/// runaway loop fails with a runtime error instead of exhausting memory.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_call_depth: usize,
    pub max_value_size: usize,
    pub max_value_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            max_value_depth: DEFAULT_MAX_VALUE_DEPTH,
        }
    }
}

/// A parsed and checked script, ready to run.
#[derive(Debug)]
pub struct Program {
    stmts: Vec<Stmt>,
}

/// Parses and checks `src`. Returns [`ScriptError::Syntax`] or
/// [`ScriptError::Compile`]; never runs any code.
pub fn compile(src: &str) -> Result<Program, ScriptError> {
    let stmts = parser::parse_program(src)?;
    check::check_program(&stmts)?;
    Ok(Program { stmts })
}

impl Program {
    /// Runs the top level and returns the resulting globals.
    pub fn run(&self, interrupt: &Interrupt, limits: Limits) -> Result<Namespace, ScriptError> {
        let mut interp = Interp::new(BTreeMap::new(), interrupt.clone(), limits);
        interp.run_top_level(&self.stmts)?;
        Ok(Namespace {
            globals: interp.globals,
            limits,
        })
    }
}

/// Globals left behind by a script's top level.
pub struct Namespace {
    globals: BTreeMap<String, Value>,
    limits: Limits,
}

impl Namespace {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Returns the function bound to `name`, if that global is a function.
    pub fn function(&self, name: &str) -> Option<Arc<FnDecl>> {
        match self.get(name) {
            Some(Value::Func(decl)) => Some(decl.clone()),
            _ => None,
        }
    }

    /// Calls `func` against these globals. The namespace is consumed, so no
    /// call observes another call's side effects.
    pub fn call(
        self,
        func: Arc<FnDecl>,
        args: Vec<Value>,
        interrupt: &Interrupt,
    ) -> Result<Value, ScriptError> {
        let mut interp = Interp::new(self.globals, interrupt.clone(), self.limits);
        interp.call(func, args)
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("globals", &self.globals.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval_render(src: &str, params: serde_json::Value) -> Result<Value, ScriptError> {
        eval_render_with(src, params, Limits::default())
    }

    fn eval_render_with(
        src: &str,
        params: serde_json::Value,
        limits: Limits,
    ) -> Result<Value, ScriptError> {
        let interrupt = Interrupt::new();
        let ns = compile(src)?.run(&interrupt, limits)?;
        let Some(Value::Func(render)) = ns.get("render").cloned() else {
            panic!("render not defined");
        };
        ns.call(render, vec![Value::Null, Value::from_json(&params)], &interrupt)
    }

    fn run_ok(src: &str, params: serde_json::Value) -> serde_json::Value {
        eval_render(src, params).unwrap().to_json().unwrap()
    }

    #[test]
    fn test_arithmetic_and_strings() {
        let out = run_ok(
            "fn render(conn, p) { return {\"sum\": 1 + 2 * 3, \"s\": \"a\" + str(p.n), \"m\": 7 % 3}; }",
            json!({"n": 4}),
        );
        assert_eq!(out, json!({"sum": 7, "s": "a4", "m": 1}));
    }

    #[test]
    fn test_top_level_globals_visible_in_functions() {
        let out = run_ok(
            "let WIDTH = 1280;\nfn half(x) { return x / 2; }\nfn render(c, p) { return half(WIDTH); }",
            json!({}),
        );
        assert_eq!(out, json!(640));
    }

    #[test]
    fn test_functions_are_hoisted() {
        let out = run_ok(
            "fn render(c, p) { return later(); }\nfn later() { return \"ok\"; }",
            json!({}),
        );
        assert_eq!(out, json!("ok"));
    }

    #[test]
    fn test_loops_and_nested_assignment() {
        let src = r#"
fn render(c, p) {
    let tl = {"tracks": [{"clips": []}]};
    for i in range(3) {
        if i == 1 { continue; }
        tl.tracks[0].clips = push(tl.tracks[0].clips, {"start": i * 2});
    }
    let n = 0;
    while true {
        n = n + 1;
        if n >= 5 { break; }
    }
    tl.count = n;
    return tl;
}
"#;
        let out = run_ok(src, json!({}));
        assert_eq!(
            out,
            json!({"tracks": [{"clips": [{"start": 0}, {"start": 4}]}], "count": 5})
        );
    }

    #[test]
    fn test_lists_are_values_not_references() {
        let src = "fn render(c, p) { let a = [1]; let b = a; b[0] = 2; return [a, b]; }";
        assert_eq!(run_ok(src, json!({})), json!([[1], [2]]));
    }

    #[test]
    fn test_short_circuit() {
        let src = "fn render(c, p) { return has(p, \"x\") && p.x > 1; }";
        assert_eq!(run_ok(src, json!({})), json!(false));
        assert_eq!(run_ok(src, json!({"x": 3})), json!(true));
    }

    #[test]
    fn test_division_by_zero() {
        let err = eval_render("fn render(c, p) {\n  return 1 / 0;\n}", json!({})).unwrap_err();
        assert_eq!(err, ScriptError::runtime(2, "division by zero"));
    }

    #[test]
    fn test_missing_key_message() {
        let err = eval_render("fn render(c, p) { return p.video_id; }", json!({})).unwrap_err();
        assert_eq!(err.to_string(), "line 1: map has no key 'video_id'");
    }

    #[test]
    fn test_condition_must_be_bool() {
        let err = eval_render("fn render(c, p) { if 1 { return 1; } }", json!({})).unwrap_err();
        assert!(err.to_string().contains("if condition must be a bool"));
    }

    #[test]
    fn test_cannot_assign_global_inside_function() {
        let err = eval_render("let g = 1;\nfn render(c, p) { g = 2; }", json!({})).unwrap_err();
        assert!(err.to_string().contains("cannot assign to global 'g'"));
    }

    #[test]
    fn test_unbounded_recursion_stops() {
        let err = eval_render("fn f(n) { return f(n + 1); }\nfn render(c, p) { return f(0); }", json!({}))
            .unwrap_err();
        assert!(err.to_string().contains("maximum call depth of 64 exceeded"));
    }

    #[test]
    fn test_string_doubling_hits_size_limit() {
        let src = "fn render(c, p) {\n  let s = \"ab\";\n  while true {\n    s = s + s;\n  }\n}";
        let err = eval_render(src, json!({})).unwrap_err();
        assert_eq!(
            err,
            ScriptError::runtime(4, "value exceeds the size limit of 1000000")
        );
    }

    #[test]
    fn test_list_doubling_hits_size_limit() {
        let src = "fn render(c, p) { let l = [1]; while true { l = [l, l]; } }";
        let err = eval_render(src, json!({})).unwrap_err();
        assert!(err.to_string().contains("size limit"), "{err}");

        let src = "fn render(c, p) { let l = [1]; while true { l = l + l; } }";
        let err = eval_render(src, json!({})).unwrap_err();
        assert!(err.to_string().contains("size limit"), "{err}");

        let src = "fn render(c, p) { let l = []; while true { l = push(l, \"xxxxxxxx\"); } }";
        let limits = Limits {
            max_value_size: 1_000,
            ..Limits::default()
        };
        let err = eval_render_with(src, json!({}), limits).unwrap_err();
        assert!(err.to_string().contains("size limit of 1000"), "{err}");
    }

    #[test]
    fn test_deep_nesting_hits_depth_limit() {
        let src = "fn render(c, p) { let l = []; while true { l = [l]; } }";
        let err = eval_render(src, json!({})).unwrap_err();
        assert!(err.to_string().contains("nested deeper than 64 levels"), "{err}");

        let src = "fn render(c, p) { let m = {}; while true { m.inner = m; } }";
        let err = eval_render(src, json!({})).unwrap_err();
        assert!(err.to_string().contains("nested deeper than 64 levels"), "{err}");
    }

    #[test]
    fn test_growing_map_through_index_assignment() {
        let src = r#"
fn render(c, p) {
    let m = {};
    for i in range(1000) {
        m[str(i)] = "0123456789";
    }
    return len(m);
}
"#;
        let limits = Limits {
            max_value_size: 2_000,
            ..Limits::default()
        };
        let err = eval_render_with(src, json!({}), limits).unwrap_err();
        assert_eq!(err.to_string(), "line 5: value exceeds the size limit of 2000");
        assert_eq!(run_ok(src, json!({})), json!(1000));
    }

    #[test]
    fn test_fail_builtin_surfaces_message() {
        let err = eval_render("fn render(c, p) { fail(\"bad clip\"); }", json!({})).unwrap_err();
        assert_eq!(err.to_string(), "line 1: bad clip");
    }

    #[test]
    fn test_function_without_return_yields_null() {
        assert_eq!(run_ok("fn render(c, p) { let x = 1; }", json!({})), json!(null));
    }

    #[test]
    fn test_tripped_interrupt_stops_loop() {
        let interrupt = Interrupt::new();
        interrupt.trip();
        let err = compile("while true {}")
            .unwrap()
            .run(&interrupt, Limits::default())
            .unwrap_err();
        assert_eq!(err, ScriptError::Interrupted);
    }

    #[test]
    fn test_interrupt_from_other_thread() {
        let interrupt = Interrupt::new();
        let flag = interrupt.clone();
        let handle = std::thread::spawn(move || {
            compile("let i = 0; while true { i = i + 1; }")
                .unwrap()
                .run(&flag, Limits::default())
        });
        std::thread::sleep(std::time::Duration::from_millis(50));
        interrupt.trip();
        let result = handle.join().unwrap();
        assert_eq!(result.unwrap_err(), ScriptError::Interrupted);
    }

    struct Echo;

    impl HostObject for Echo {
        fn type_name(&self) -> &str {
            "echo"
        }

        fn call_method(&self, method: &str, args: Vec<Value>) -> anyhow::Result<Value> {
            match method {
                "twice" => match args.as_slice() {
                    [Value::Num(n)] => Ok(Value::Num(n * 2.0)),
                    _ => anyhow::bail!("expects one number"),
                },
                other => anyhow::bail!("unknown method '{other}'"),
            }
        }
    }

    #[test]
    fn test_host_object_methods() {
        let interrupt = Interrupt::new();
        let ns = compile("fn render(c, p) { return c.twice(21); }")
            .unwrap()
            .run(&interrupt, Limits::default())
            .unwrap();
        let host = Value::Host(Arc::new(Echo));
        let Some(Value::Func(render)) = ns.get("render").cloned() else {
            panic!("render not defined");
        };
        let out = ns.call(render, vec![host.clone(), Value::Null], &interrupt).unwrap();
        assert_eq!(out, Value::Num(42.0));

        let ns = compile("fn bad(c) { return c.nope(); }")
            .unwrap()
            .run(&interrupt, Limits::default())
            .unwrap();
        let Some(Value::Func(bad)) = ns.get("bad").cloned() else {
            panic!("bad not defined");
        };
        let err = ns.call(bad, vec![host], &interrupt).unwrap_err();
        assert_eq!(err.to_string(), "line 1: echo.nope(): unknown method 'nope'");
    }
}
