use std::rc::Rc;

use tracing::{debug, trace};

use crate::Error;
use crate::MAX_EVAL_DEPTH;
use crate::ast::{Procedure, Value, ValueMap};
use crate::builtinops::{Arity, get_builtin_ops, get_special_forms};

pub mod environment;
pub mod intooperation;

pub use environment::Environment;
pub use intooperation::{BoolIter, IntIter, NumIter, StringIter, ValueIter};

/// Stack space kept free before growing (ori_stack uses the same figures).
const RED_ZONE: usize = 100 * 1024;

/// Size of each newly allocated stack segment.
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Outcome of one evaluation step.
///
/// Forms whose last action is to evaluate a sub-expression return `TailCall` with a
/// borrow of that sub-expression instead of recursing, and procedure calls return
/// `Apply`. The loop in [`eval`] keeps stepping until it gets `Done`, so tail-recursive
/// procedures run at a constant native stack depth without copying their bodies.
pub enum Trampoline<'a> {
    Done(Value),
    TailCall(&'a Value, Environment),
    /// Run the procedure's body in the given scope, which already binds its parameters
    Apply(Rc<Procedure>, Environment),
}

/// Where a run of tail steps ended: a value, or a procedure body still to run.
enum Settled {
    Value(Value),
    Body(Rc<Procedure>, Environment),
}

/// Evaluate an expression in `env` (public API)
pub fn eval(expr: &Value, env: &Environment) -> Result<Value, Error> {
    eval_with_depth_tracking(expr, env, 0)
}

/// Evaluate an expression with depth tracking to prevent stack overflow
///
/// `depth` counts non-tail nesting only. The native stack is grown on demand, so the
/// depth limit rather than the host stack decides when deep recursion fails.
fn eval_with_depth_tracking(expr: &Value, env: &Environment, depth: usize) -> Result<Value, Error> {
    if depth >= MAX_EVAL_DEPTH {
        debug!(limit = MAX_EVAL_DEPTH, "evaluation depth limit reached");
        return Err(Error::DepthExceeded(MAX_EVAL_DEPTH));
    }

    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, || {
        let mut settled = settle(eval_step(expr, env, depth)?, depth)?;
        loop {
            match settled {
                Settled::Value(value) => return Ok(value),
                Settled::Body(proc, scope) => {
                    trace!(
                        procedure = proc.name.as_deref().unwrap_or("<anonymous>"),
                        depth,
                        "applying procedure"
                    );
                    settled = settle(eval_body(&proc.body, &scope, depth)?, depth)?;
                }
            }
        }
    })
}

/// Follow tail calls that borrow from the same expression tree until a value or a
/// procedure application comes out.
fn settle(mut step: Trampoline<'_>, depth: usize) -> Result<Settled, Error> {
    loop {
        step = match step {
            Trampoline::Done(value) => return Ok(Settled::Value(value)),
            Trampoline::Apply(proc, scope) => return Ok(Settled::Body(proc, scope)),
            Trampoline::TailCall(next, next_env) => {
                trace!(depth, expr = %next, "tail call");
                eval_step(next, &next_env, depth)?
            }
        };
    }
}

/// Evaluate one expression, stopping at the first tail position.
fn eval_step<'a>(
    expr: &'a Value,
    env: &Environment,
    depth: usize,
) -> Result<Trampoline<'a>, Error> {
    match expr {
        // Self-evaluating forms
        Value::Integer(_)
        | Value::Float(_)
        | Value::String(_)
        | Value::Char(_)
        | Value::Bool(_)
        | Value::Nil
        | Value::Keyword(_)
        | Value::Procedure(_)
        | Value::Primitive(_)
        | Value::SpecialForm(_)
        | Value::Native(_) => Ok(Trampoline::Done(expr.clone())),

        // Variable lookup
        Value::Symbol(name) => env.find(name).map(Trampoline::Done),

        // Collections keep their shape; their contents are evaluated
        Value::Vector(items) => Ok(Trampoline::Done(Value::Vector(eval_args(
            items, env, depth,
        )?))),
        Value::Map(map) => {
            let mut evaluated = ValueMap::new();
            for (key, value) in map.iter() {
                let key = eval_with_depth_tracking(key, env, depth + 1)?;
                let value = eval_with_depth_tracking(value, env, depth + 1)?;
                evaluated.insert(key, value);
            }
            Ok(Trampoline::Done(Value::Map(evaluated)))
        }

        // The empty list evaluates to itself
        Value::List(items) if items.is_empty() => Ok(Trampoline::Done(expr.clone())),

        // Application
        Value::List(items) => eval_list(items, env, depth).map_err(|err| add_context(err, expr)),
    }
}

/// Helper function to add expression context to errors
fn add_context(error: Error, expr: &Value) -> Error {
    let context = format!("while evaluating: {expr}");
    match error {
        Error::EvalError(msg) => Error::EvalError(format!("{msg}\n  Context: {context}")),
        Error::TypeError(msg) => Error::TypeError(format!("{msg}\n  Context: {context}")),
        Error::ArityError {
            expected,
            got,
            expression: None,
        } => Error::arity_error_with_expr(expected, got, expr.to_string()),
        // Unbound symbols, host errors and depth errors carry their own context
        other => other,
    }
}

/// Helper function to evaluate a list of argument expressions with depth tracking
fn eval_args(args: &[Value], env: &Environment, depth: usize) -> Result<Vec<Value>, Error> {
    args.iter()
        .map(|arg| eval_with_depth_tracking(arg, env, depth + 1))
        .collect()
}

/// Evaluate a non-empty list: a special form gets the raw tail, anything else is applied
/// to the evaluated tail.
fn eval_list<'a>(
    items: &'a [Value],
    env: &Environment,
    depth: usize,
) -> Result<Trampoline<'a>, Error> {
    let Some((head, arg_exprs)) = items.split_first() else {
        return Ok(Trampoline::Done(Value::List(Vec::new())));
    };

    let callee = eval_with_depth_tracking(head, env, depth + 1)?;

    if let Value::SpecialForm(form) = &callee {
        form.arity.validate(arg_exprs.len())?;
        return (form.func)(arg_exprs, env, depth);
    }

    let args = eval_args(arg_exprs, env, depth)?;
    apply(&callee, args)
}

/// Apply an evaluated callee to evaluated arguments.
fn apply(callee: &Value, args: Vec<Value>) -> Result<Trampoline<'static>, Error> {
    match callee {
        Value::Primitive(op) => op.call(args).map(Trampoline::Done),
        Value::Native(native) => native.call(args).map(Trampoline::Done),
        Value::Procedure(proc) => {
            Arity::Exact(proc.params.len()).validate(args.len())?;

            // Parameters are bound in a child of the captured scope, not the caller's
            let scope = proc.env.child();
            for (param, arg) in proc.params.iter().zip(args) {
                scope.define(param.clone(), arg);
            }
            Ok(Trampoline::Apply(Rc::clone(proc), scope))
        }
        Value::Map(_) => lookup_path(callee, &args).map(Trampoline::Done),
        other => Err(Error::InvalidApplication(format!(
            "{} is not callable: {other}",
            other.type_name()
        ))),
    }
}

/// `({:a {:b 1}} :a :b)` looks each key up in the result of the previous lookup.
fn lookup_path(map: &Value, keys: &[Value]) -> Result<Value, Error> {
    if keys.is_empty() {
        return Err(Error::arity_error(Arity::AtLeast(1), 0));
    }

    let mut current = map;
    for key in keys {
        let Value::Map(entries) = current else {
            return Err(Error::InvalidApplication(format!(
                "cannot look up {key} in {}: {current}",
                current.type_name()
            )));
        };
        current = entries
            .get(key)
            .ok_or_else(|| Error::EvalError(format!("Key not found: {key}")))?;
    }
    Ok(current.clone())
}

/// Evaluate all forms but the last for effect; the last is returned in tail position.
fn eval_body<'a>(
    body: &'a [Value],
    env: &Environment,
    depth: usize,
) -> Result<Trampoline<'a>, Error> {
    match body.split_last() {
        None => Ok(Trampoline::Done(Value::Nil)),
        Some((last, init)) => {
            for expr in init {
                eval_with_depth_tracking(expr, env, depth + 1)?;
            }
            Ok(Trampoline::TailCall(last, env.clone()))
        }
    }
}

/// Evaluate quote special form
pub(crate) fn eval_quote<'a>(
    args: &'a [Value],
    _env: &Environment,
    _depth: usize,
) -> Result<Trampoline<'a>, Error> {
    match args {
        [expr] => Ok(Trampoline::Done(expr.clone())),
        _ => Err(Error::arity_error(Arity::Exact(1), args.len())),
    }
}

/// Evaluate do special form
pub(crate) fn eval_do<'a>(
    args: &'a [Value],
    env: &Environment,
    depth: usize,
) -> Result<Trampoline<'a>, Error> {
    eval_body(args, env, depth)
}

/// Evaluate def special form: binds in the current scope and returns the symbol
pub(crate) fn eval_def<'a>(
    args: &'a [Value],
    env: &Environment,
    depth: usize,
) -> Result<Trampoline<'a>, Error> {
    match args {
        [Value::Symbol(name), expr] => {
            let value = eval_with_depth_tracking(expr, env, depth + 1)?;
            debug!(name = %name, kind = value.type_name(), "def");
            env.define(name.clone(), value);
            Ok(Trampoline::Done(Value::Symbol(name.clone())))
        }
        [other, _] => Err(Error::TypeError(format!(
            "def requires a symbol, got {} {other}",
            other.type_name()
        ))),
        _ => Err(Error::arity_error(Arity::Exact(2), args.len())),
    }
}

/// Parameter vector of `fn`/`defn`: symbols only, no repeats.
fn parse_params(form: &str, params: &Value) -> Result<Vec<String>, Error> {
    let Value::Vector(items) = params else {
        return Err(Error::TypeError(format!(
            "{form} parameters must be a vector, got {} {params}",
            params.type_name()
        )));
    };

    let mut names: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Symbol(name) => {
                if names.contains(name) {
                    return Err(Error::EvalError(format!("Duplicate parameter name: {name}")));
                }
                names.push(name.clone());
            }
            other => {
                return Err(Error::TypeError(format!(
                    "{form} parameters must be symbols, got {} {other}",
                    other.type_name()
                )));
            }
        }
    }
    Ok(names)
}

fn make_procedure(
    form: &str,
    name: Option<String>,
    params: &Value,
    body: &[Value],
    env: &Environment,
) -> Result<Value, Error> {
    Ok(Value::Procedure(Rc::new(Procedure {
        name,
        params: parse_params(form, params)?,
        body: body.to_vec(),
        env: env.clone(),
    })))
}

/// Evaluate fn special form
pub(crate) fn eval_fn<'a>(
    args: &'a [Value],
    env: &Environment,
    _depth: usize,
) -> Result<Trampoline<'a>, Error> {
    match args {
        [params, body @ ..] => make_procedure("fn", None, params, body, env).map(Trampoline::Done),
        [] => Err(Error::arity_error(Arity::AtLeast(1), 0)),
    }
}

/// Evaluate defn special form, `(def name (fn params body...))` with the name recorded
pub(crate) fn eval_defn<'a>(
    args: &'a [Value],
    env: &Environment,
    _depth: usize,
) -> Result<Trampoline<'a>, Error> {
    match args {
        [Value::Symbol(name), params, body @ ..] => {
            let procedure = make_procedure("defn", Some(name.clone()), params, body, env)?;
            debug!(name = %name, "defn");
            env.define(name.clone(), procedure);
            Ok(Trampoline::Done(Value::Symbol(name.clone())))
        }
        [other, _, ..] => Err(Error::TypeError(format!(
            "defn requires a symbol, got {} {other}",
            other.type_name()
        ))),
        _ => Err(Error::arity_error(Arity::AtLeast(2), args.len())),
    }
}

/// Evaluate if special form; a missing else branch yields nil
pub(crate) fn eval_if<'a>(
    args: &'a [Value],
    env: &Environment,
    depth: usize,
) -> Result<Trampoline<'a>, Error> {
    let (condition_expr, then_expr, else_expr) = match args {
        [c, t] => (c, t, None),
        [c, t, e] => (c, t, Some(e)),
        _ => return Err(Error::arity_error(Arity::Range(2, 3), args.len())),
    };

    let condition = eval_with_depth_tracking(condition_expr, env, depth + 1)?;
    let branch = if condition.is_truthy() {
        Some(then_expr)
    } else {
        else_expr
    };
    Ok(match branch {
        Some(expr) => Trampoline::TailCall(expr, env.clone()),
        None => Trampoline::Done(Value::Nil),
    })
}

/// Evaluate cond special form
///
/// Clauses are tried in order. An `:else` test is remembered and used only if no other
/// test matches, wherever it appears.
pub(crate) fn eval_cond<'a>(
    args: &'a [Value],
    env: &Environment,
    depth: usize,
) -> Result<Trampoline<'a>, Error> {
    if args.len() % 2 != 0 {
        return Err(Error::arity_error(Arity::Even, args.len()));
    }

    let mut else_branch = None;
    for clause in args.chunks_exact(2) {
        let [test, expr] = clause else { continue };
        if matches!(test, Value::Keyword(k) if k == "else") {
            else_branch.get_or_insert(expr);
            continue;
        }
        if eval_with_depth_tracking(test, env, depth + 1)?.is_truthy() {
            return Ok(Trampoline::TailCall(expr, env.clone()));
        }
    }

    Ok(match else_branch {
        Some(expr) => Trampoline::TailCall(expr, env.clone()),
        None => Trampoline::Done(Value::Nil),
    })
}

// `and` stops at the first falsy value and `or` at the first truthy one, returning it.
// The last expression is in tail position.
macro_rules! logic_op {
    ($name:ident, $stop_when_truthy:literal, $empty:expr) => {
        pub(crate) fn $name<'a>(
            args: &'a [Value],
            env: &Environment,
            depth: usize,
        ) -> Result<Trampoline<'a>, Error> {
            let Some((last, init)) = args.split_last() else {
                return Ok(Trampoline::Done($empty));
            };
            for arg in init {
                let value = eval_with_depth_tracking(arg, env, depth + 1)?;
                if value.is_truthy() == $stop_when_truthy {
                    return Ok(Trampoline::Done(value));
                }
            }
            Ok(Trampoline::TailCall(last, env.clone()))
        }
    };
}

logic_op!(eval_and, false, Value::Bool(true));
logic_op!(eval_or, true, Value::Nil);

/// Create a global environment with the primitives and special forms bound
pub fn create_global_env() -> Environment {
    let env = Environment::new();

    for op in get_builtin_ops() {
        env.define(op.id, Value::Primitive(op));
    }
    for form in get_special_forms() {
        env.define(form.id, Value::SpecialForm(form));
    }

    env
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{kw, map, nil, sym, val, vector};
    use crate::native::{Signature, ValueType};
    use crate::reader::read_str;

    /// Test result variants for comprehensive testing
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),           // Evaluation should succeed with this value
        SpecificError(&'static str), // Evaluation should fail with error containing this string
        Error,                       // Evaluation should fail (any error)
    }
    use TestResult::{Error, EvalResult, SpecificError};

    /// Test environment containing test cases that share state
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    /// Run tests in isolated environments with shared state
    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let env = create_global_env();
            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &env, &test_id);
            }
        }
    }

    /// Execute a single test case with detailed error reporting
    fn execute_test_case(input: &str, expected: &TestResult, env: &Environment, test_id: &str) {
        let expr = match read_str(input) {
            Ok(expr) => expr,
            Err(parse_err) => {
                panic!("{test_id}: unexpected parse error for '{input}': {parse_err:?}");
            }
        };

        match (eval(&expr, env), expected) {
            (Ok(actual), EvalResult(expected_val)) => {
                assert_eq!(
                    actual, *expected_val,
                    "{test_id}: '{input}' expected {expected_val}, got {actual}"
                );
            }
            (Err(_), Error) => {}
            (Err(e), SpecificError(expected_text)) => {
                let error_msg = format!("{e}");
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id}: error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Ok(actual), Error) => {
                panic!("{test_id}: '{input}' expected error, got {actual:?}");
            }
            (Ok(actual), SpecificError(expected_text)) => {
                panic!(
                    "{test_id}: '{input}' expected error containing '{expected_text}', got {actual:?}"
                );
            }
            (Err(err), EvalResult(expected_val)) => {
                panic!("{test_id}: '{input}' expected {expected_val:?}, got error {err:?}");
            }
        }
    }

    /// Simplified test runner: every case gets a fresh global environment
    fn run_comprehensive_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let env = create_global_env();
            let test_id = format!("#{}", i + 1);
            execute_test_case(input, expected, &env, &test_id);
        }
    }

    fn eval_str(input: &str, env: &Environment) -> Result<Value, crate::Error> {
        eval(&read_str(input).unwrap(), env)
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_comprehensive_operations_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING FORMS ===
            ("42", success(42)),
            ("-271", success(-271)),
            ("9223372036854775807", success(i64::MAX)),
            ("2.5", success(2.5)),
            ("true", success(true)),
            ("false", success(false)),
            ("nil", EvalResult(nil())),
            ("\"hello world\"", success("hello world")),
            ("\\a", success('a')),
            (":key", EvalResult(kw("key"))),
            ("()", EvalResult(Value::List(vec![]))),
            // === ARITHMETIC ===
            ("(+ 1 2)", success(3)),
            ("(+ 5 (* 2 3))", success(11)),
            ("(* -3 6)", success(-18)),
            ("(/ (- (+ 515 (* 87 311)) 302) 27)", success(1010)),
            ("(+ 1 2.0)", success(3.0)),
            ("(* 2 0.5)", success(1.0)),
            ("(- 10)", success(-10)),
            ("(/ 4.0)", success(0.25)),
            ("(+)", success(0)),
            ("(*)", success(1)),
            ("(-)", SpecificError("ArityError")),
            ("(/ 1 0)", SpecificError("Division by zero")),
            ("(+ 9223372036854775807 1)", SpecificError("overflow")),
            ("(+ 1 \"2\")", SpecificError("expected number")),
            // === COMPARISON AND EQUALITY ===
            ("(< 1)", success(true)),
            ("(< 1 2 3)", success(true)),
            ("(< 1 3 2)", success(false)),
            ("(>= 10 9 8 8.0 -1 -2.5)", success(true)),
            ("(= 1 1)", success(true)),
            ("(= 1 1.1)", success(false)),
            ("(= 1 1.0)", success(false)),
            ("(= {1 2 3 4} {3 4 1 2})", success(true)),
            ("(= {1 2 3 4} {1 2})", success(false)),
            ("(= [1 2] (list 1 2))", success(false)),
            ("(= \"a\" \"a\" \"a\")", success(true)),
            ("(= :a (quote a))", success(false)),
            // === COLLECTIONS ===
            ("(list 1 2 (+ 1 2))", success([1, 2, 3])),
            ("[1 2 (+ 1 2)]", EvalResult(vector([1, 2, 3]))),
            ("[]", EvalResult(vector::<Value>([]))),
            ("{:a (+ 7 8)}", EvalResult(map([(kw("a"), val(15))]))),
            ("{(+ 1 1) [(* 2 2)]}", EvalResult(map([(val(2), vector([4]))]))),
            ("(first [1 2])", success(1)),
            ("(rest (list 1 2 3))", success([2, 3])),
            ("(cons 0 [1])", success([0, 1])),
            ("(count {:a 1 :b 2})", success(2)),
            ("(str \"a\" 1 :b)", success("a1:b")),
            // === QUOTE ===
            ("(quote x)", EvalResult(sym("x"))),
            ("(quote (+ 1 2))", EvalResult(val(vec![sym("+"), val(1), val(2)]))),
            ("(quote)", SpecificError("ArityError")),
            // === MAPS AS FUNCTIONS ===
            ("({ :a \"blah\", :b 42} :b)", success(42)),
            ("({:a {:b {:c 3}}} :a :b :c)", success(3)),
            ("({[1 2] :vec} [1 2])", EvalResult(kw("vec"))),
            ("({:a 1} :missing)", SpecificError("Key not found: :missing")),
            ("({:a 1} :a :b)", SpecificError("cannot look up :b in integer")),
            ("({:a 1})", SpecificError("ArityError")),
            // === CONDITIONALS ===
            ("(if true 1 2)", success(1)),
            ("(if false 1 2)", success(2)),
            ("(if false 1)", EvalResult(nil())),
            ("(if nil 1 2)", success(2)),
            ("(if \"blah\" 1 2)", success(1)),
            ("(if 0 1 2)", success(1)),
            ("(if [] 1 2)", success(1)),
            ("(if)", SpecificError("ArityError")),
            ("(if true)", SpecificError("ArityError")),
            ("(if true 1 2 3)", SpecificError("expected 2 to 3 arguments, got 4")),
            ("(cond false 1 true 2)", success(2)),
            ("(cond :else 0 false 1 true 2)", success(2)),
            ("(cond :else 0 false 1)", success(0)),
            ("(cond false 1)", EvalResult(nil())),
            ("(cond)", EvalResult(nil())),
            ("(cond true)", SpecificError("an even number of")),
            // === DO / AND / OR ===
            ("(do)", EvalResult(nil())),
            ("(do 1 2 3)", success(3)),
            ("(do (def x 10) x)", success(10)),
            ("(and)", success(true)),
            ("(and 1 2 3)", success(3)),
            ("(and 1 false undefined-symbol)", success(false)),
            ("(and 1 nil 3)", EvalResult(nil())),
            ("(or)", EvalResult(nil())),
            ("(or false nil 7)", success(7)),
            ("(or 1 undefined-symbol)", success(1)),
            ("(or false)", success(false)),
            ("(not (or false nil))", success(true)),
            // === DEF ===
            ("(def x 10)", EvalResult(sym("x"))),
            ("(def)", SpecificError("ArityError")),
            ("(def x)", SpecificError("ArityError")),
            ("(def \"x\" 1)", SpecificError("def requires a symbol")),
            ("(def x undefined-symbol)", SpecificError("undefined-symbol")),
            // === PROCEDURES ===
            ("((fn [x] (* x x)) 7)", success(49)),
            ("((fn [] 1))", success(1)),
            ("((fn []))", EvalResult(nil())),
            ("(((fn [x] (fn [y] (+ x y))) 10) 7)", success(17)),
            ("((fn [a b] (list b a)) 1 2)", success([2, 1])),
            ("((fn [x] x))", SpecificError("expected 1 arguments, got 0")),
            ("((fn [x] x) 1 2)", SpecificError("ArityError")),
            ("(fn (x) x)", SpecificError("parameters must be a vector")),
            ("(fn [x 1] x)", SpecificError("parameters must be symbols")),
            ("(fn [x x] x)", SpecificError("Duplicate parameter name: x")),
            ("(fn)", SpecificError("ArityError")),
            ("((fn [op a b c] (op a b c)) > 9 6 2)", success(true)),
            ("((fn [f] (f true 1 2)) if)", success(1)),
            // === APPLICATION ERRORS ===
            ("(abc 1 2 3)", SpecificError("Unable to resolve symbol: abc")),
            ("(1 2 3)", SpecificError("integer is not callable")),
            ("(\"f\")", SpecificError("Invalid procedure")),
            ("([1 2] 0)", SpecificError("vector is not callable")),
            // === PRINTED FORMS OF CALLABLES ===
            ("(str +)", success("#<primitive +>")),
            ("(str if)", success("#<special-form if>")),
            ("(str (fn [] 1))", success("#<fn>")),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_definitions_share_environment() {
        let test_environments = vec![
            TestEnvironment(vec![
                ("(def x 10)", EvalResult(sym("x"))),
                ("x", success(10)),
                ("(def y (+ x 5))", EvalResult(sym("y"))),
                ("y", success(15)),
                ("(def x 1)", EvalResult(sym("x"))),
                ("(+ x y)", success(16)),
            ]),
            TestEnvironment(vec![
                // x from the previous environment is not visible here
                ("x", SpecificError("Unable to resolve symbol: x")),
                ("(defn square [n] (* n n))", EvalResult(sym("square"))),
                ("(square 12)", success(144)),
                ("(str square)", success("#<fn square>")),
                ("(defn noop [])", EvalResult(sym("noop"))),
                ("(noop)", EvalResult(nil())),
                ("(defn \"bad\" [] 1)", SpecificError("defn requires a symbol")),
                ("(defn bad)", SpecificError("ArityError")),
            ]),
            TestEnvironment(vec![
                // Lexical scoping: the free variable resolves where the procedure was defined
                ("(def n 1)", EvalResult(sym("n"))),
                ("(defn get-n [] n)", EvalResult(sym("get-n"))),
                ("((fn [n] (get-n)) 99)", success(1)),
                // Parameters shadow globals only inside the call
                ("((fn [n] n) 5)", success(5)),
                ("n", success(1)),
                // def inside a procedure binds in the call's own scope
                ("(defn set-local [] (def n 2) n)", EvalResult(sym("set-local"))),
                ("(set-local)", success(2)),
                ("n", success(1)),
            ]),
            TestEnvironment(vec![
                // Primitive names can be shadowed
                ("(def + -)", EvalResult(sym("+"))),
                ("(+ 5 3)", success(2)),
            ]),
            TestEnvironment(vec![
                (
                    "(def nested {:nmap {:na 42 :nb 43}})",
                    EvalResult(sym("nested")),
                ),
                ("(nested :nmap :nb)", success(43)),
            ]),
        ];

        run_tests_in_environment(test_environments);
    }

    #[test]
    fn test_fibonacci_naive_and_iterative() {
        let env = create_global_env();
        eval_str(
            "(defn fib [n] (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2)))))",
            &env,
        )
        .unwrap();
        assert_eq!(eval_str("(fib 10)", &env).unwrap(), val(55));

        eval_str(
            "(defn fib-iter [n]
               (defn step [curr next n]
                 (if (= n 0) curr (step next (+ curr next) (- n 1))))
               (step 0 1 n))",
            &env,
        )
        .unwrap();
        assert_eq!(eval_str("(fib-iter 10)", &env).unwrap(), val(55));
        assert_eq!(eval_str("(fib-iter 90)", &env).unwrap(), val(2880067194370816120_i64));
    }

    #[test]
    fn test_tail_calls_run_in_constant_depth() {
        let env = create_global_env();
        eval_str(
            "(defn loop [n acc] (if (= n 0) acc (loop (- n 1) (+ acc 1))))",
            &env,
        )
        .unwrap();
        // Far beyond MAX_EVAL_DEPTH; only works if the self call is a tail call
        assert_eq!(eval_str("(loop 100000 0)", &env).unwrap(), val(100000));

        // Tail positions of cond, do, and, or also trampoline
        eval_str(
            "(defn count-down [n]
               (cond (= n 0) :done
                     :else (do (and true (or false (count-down (- n 1)))))))",
            &env,
        )
        .unwrap();
        assert_eq!(eval_str("(count-down 50000)", &env).unwrap(), kw("done"));
    }

    #[test]
    fn test_deep_non_tail_recursion_is_reported() {
        let env = create_global_env();
        eval_str(
            "(defn depth [n] (if (= n 0) 0 (+ 1 (depth (- n 1)))))",
            &env,
        )
        .unwrap();
        assert_eq!(eval_str("(depth 1000)", &env).unwrap(), val(1000));
        assert_eq!(
            eval_str("(depth 100000)", &env).unwrap_err(),
            crate::Error::DepthExceeded(MAX_EVAL_DEPTH)
        );
        // The environment is still usable afterwards
        assert_eq!(eval_str("(depth 10)", &env).unwrap(), val(10));
    }

    #[test]
    fn test_arity_error_names_the_expression() {
        let env = create_global_env();
        let err = eval_str("(if true 1 2 3)", &env).unwrap_err();
        assert_eq!(
            err,
            crate::Error::arity_error_with_expr(
                Arity::Range(2, 3),
                4,
                "(if true 1 2 3)".to_owned()
            )
        );
    }

    #[test]
    fn test_errors_carry_context() {
        let env = create_global_env();
        let err = eval_str("(+ 1 (/ 1 0))", &env).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Division by zero"), "{msg}");
        assert!(msg.contains("while evaluating: (/ 1 0)"), "{msg}");
        assert!(msg.contains("while evaluating: (+ 1 (/ 1 0))"), "{msg}");
    }

    #[test]
    fn test_register_builtin_operation_add() {
        fn add(a: i64, b: i64) -> i64 {
            a + b
        }
        let env = create_global_env();
        env.register_builtin_operation::<_, (i64, i64), i64>("add2", add);
        assert_eq!(eval_str("(add2 7 5)", &env).unwrap(), val(12));
        assert_eq!(eval_str("(str add2)", &env).unwrap(), val("#<native add2>"));
    }

    #[test]
    fn test_register_builtin_operation_zero_arg() {
        let env = create_global_env();
        env.register_builtin_operation::<_, (), i64>("forty-two", || 42);
        assert_eq!(eval_str("(forty-two)", &env).unwrap(), val(42));
        assert!(matches!(
            eval_str("(forty-two 1)", &env),
            Err(crate::Error::ArityError { .. })
        ));
    }

    #[test]
    fn test_native_bridge_multiple_results_and_errors() {
        fn testfunc(i: i64, s: String) -> (i64, String) {
            (i, s)
        }
        fn testvar(i: i64, rest: StringIter<'_>) -> (i64, Vec<String>) {
            (i, rest.map(str::to_owned).collect())
        }
        fn testerr(fail: bool) -> Result<(), String> {
            if fail {
                Err("error value".to_owned())
            } else {
                Ok(())
            }
        }

        let env = create_global_env();
        env.register_builtin_operation::<_, (i64, String), (i64, String)>("testfunc", testfunc);
        env.register_variadic_builtin_operation::<_, (i64, StringIter<'static>), (i64, Vec<String>)>(
            "testvar", testvar,
        );
        env.register_builtin_operation::<_, (bool,), ()>("testerr", testerr);

        let test_cases = vec![
            ("(testfunc 1 \"a\")", success((1, "a"))),
            ("(testfunc 1)", SpecificError("expected 2 arguments, got 1")),
            ("(testfunc \"a\" 1)", SpecificError("argument 1 must be integer")),
            ("(testvar 1)", EvalResult(val((val(1), Value::List(vec![]))))),
            ("(testvar 1 \"a\" \"b\")", success((1, ["a", "b"]))),
            ("(testvar 1 \"a\" 2)", SpecificError("argument 3 must be string")),
            ("(testvar)", SpecificError("expected at least 1 arguments, got 0")),
            ("(testerr false)", EvalResult(nil())),
            ("(testerr true)", SpecificError("Host function error: testerr: error value")),
        ];
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            execute_test_case(input, expected, &env, &format!("native #{}", i + 1));
        }
    }

    #[test]
    fn test_register_variadic_numeric_rest() {
        fn weighted_sum(weight: i64, nums: IntIter<'_>) -> i64 {
            weight * nums.sum::<i64>()
        }

        let env = create_global_env();
        env.register_variadic_builtin_operation::<_, (i64, IntIter<'static>), i64>(
            "weighted-sum",
            weighted_sum,
        );
        assert_eq!(eval_str("(weighted-sum 2 1 2 3)", &env).unwrap(), val(12));
        assert_eq!(eval_str("(weighted-sum 2)", &env).unwrap(), val(0));
    }

    #[test]
    fn test_register_builtin_operation_list_iterator_param() {
        fn sum_list(nums: NumIter<'_>) -> f64 {
            nums.map(crate::builtinops::Number::as_f64).sum()
        }

        let env = create_global_env();
        env.register_builtin_operation::<_, (NumIter<'static>,), f64>("sum-list", sum_list);
        assert_eq!(eval_str("(sum-list [1 2.5])", &env).unwrap(), val(3.5));
        assert_eq!(eval_str("(sum-list (list 1 2))", &env).unwrap(), val(3.0));
        assert!(eval_str("(sum-list 1)", &env).is_err());
    }

    #[test]
    fn test_register_builtin_function_raw() {
        fn keyword_name(args: &[Value]) -> Result<Value, crate::Error> {
            match args {
                [Value::Keyword(k)] => Ok(val(k.as_str())),
                _ => Err(crate::Error::TypeError("expected a keyword".into())),
            }
        }

        let env = create_global_env();
        env.register_builtin_function(
            "keyword-name",
            Signature::fixed(vec![ValueType::Keyword]),
            keyword_name,
        );
        assert_eq!(eval_str("(keyword-name :abc)", &env).unwrap(), val("abc"));
        assert!(eval_str("(keyword-name \"abc\")", &env).is_err());
    }

    #[test]
    fn test_natives_can_be_passed_around() {
        fn inc(n: i64) -> i64 {
            n + 1
        }

        let env = create_global_env();
        env.register_builtin_operation::<_, (i64,), i64>("inc", inc);
        assert_eq!(
            eval_str("((fn [f x] (f (f x))) inc 1)", &env).unwrap(),
            val(3)
        );
    }

    #[test]
    fn test_tail_positions_borrow_their_expressions() {
        let env = create_global_env();
        eval_str("(defn spin [n] (if (= n 0) :done (spin (- n 1))))", &env).unwrap();

        // The branch handed to the loop is the one inside the source tree
        let expr = read_str("(if true (spin 3) :never)").unwrap();
        let Value::List(items) = &expr else {
            panic!("expected a list");
        };
        let Trampoline::TailCall(next, _) = eval_step(&expr, &env, 0).unwrap() else {
            panic!("expected a tail call");
        };
        assert!(std::ptr::eq(next, &items[2]));

        // Calling a procedure hands back the procedure itself with a fresh scope
        let Value::Procedure(spin) = env.find("spin").unwrap() else {
            panic!("expected a procedure");
        };
        let Trampoline::Apply(proc, scope) = eval_step(next, &env, 0).unwrap() else {
            panic!("expected a procedure application");
        };
        assert!(Rc::ptr_eq(&proc, &spin));
        assert_eq!(scope.find("n").unwrap(), val(3));
        assert!(!scope.ptr_eq(&env));

        assert_eq!(eval_str("(spin 200000)", &env).unwrap(), kw("done"));
    }
}
