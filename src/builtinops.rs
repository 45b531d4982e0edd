//! Built-in operations registry.
//!
//! This module holds the two fixed tables every global environment is seeded with:
//!
//! - **Primitives** evaluate all arguments before application (`+`, `=`, `list`, `first`)
//! - **Special forms** receive their arguments unevaluated together with the calling
//!   environment and decide what to evaluate themselves (`if`, `def`, `fn`, `cond`)
//!
//! Both are ordinary bindings in the root scope, so user code may shadow them.
//!
//! ```text
//! (+ 1 2.5)              ; => 3.5, an integer mixed with a float promotes to float
//! (< 1 2 3)              ; => true, comparisons chain across all arguments
//! (= [1 2] [1 2])        ; => true, structural equality
//! (str "n=" 1 \x)        ; => "n=1x"
//! ```
//!
//! ## Numeric policy
//!
//! - Integer arithmetic is checked: overflow is an error rather than wrapping
//! - Integer division truncates, and dividing an integer by integer zero is an error
//! - Any float operand makes the operation a float operation with IEEE semantics
//! - `(- x)` negates and `(/ x)` inverts; `(+)` is 0 and `(*)` is 1
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with typed parameters (`i64`, `Number`, `&str`, `Value`,
//!    or one of the iterator types for rest arguments)
//! 2. **Add it to BUILTIN_OPS** with its identifier and arity, wrapped by `fixed` or `variadic`
//! 3. **Add tests** covering edge cases and error conditions

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::Error;
use crate::ast::Value;
use crate::equality::{equals, same_type};
use crate::evaluator::intooperation::{
    IntoOperation, IntoVariadicOperation, NumIter, OperationFn, ValueIter,
};
use crate::evaluator::{
    Environment, Trampoline, eval_and, eval_cond, eval_def, eval_defn, eval_do, eval_fn, eval_if,
    eval_or, eval_quote,
};

/// Number of arguments an operation accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Inclusive bounds
    Range(usize, usize),
    /// Any even count, including zero
    Even,
    Any,
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Range(min, max) => (min..=max).contains(&count),
            Arity::Even => count % 2 == 0,
            Arity::Any => true,
        }
    }

    pub fn validate(self, count: usize) -> Result<(), Error> {
        if self.accepts(count) {
            Ok(())
        } else {
            Err(Error::arity_error(self, count))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
            Arity::Even => write!(f, "an even number of"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// A numeric argument: integer or float.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, Copy)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "addition",
            ArithOp::Sub => "subtraction",
            ArithOp::Mul => "multiplication",
            ArithOp::Div => "division",
        }
    }
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(n) => n,
        }
    }

    fn apply(self, op: ArithOp, rhs: Number) -> Result<Number, Error> {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => {
                let result = match op {
                    ArithOp::Add => a.checked_add(b),
                    ArithOp::Sub => a.checked_sub(b),
                    ArithOp::Mul => a.checked_mul(b),
                    ArithOp::Div if b == 0 => {
                        return Err(Error::EvalError("Division by zero".into()));
                    }
                    ArithOp::Div => a.checked_div(b),
                };
                result.map(Number::Int).ok_or_else(|| {
                    Error::EvalError(format!("Integer overflow in {}", op.name()))
                })
            }
            (lhs, rhs) => {
                let (a, b) = (lhs.as_f64(), rhs.as_f64());
                Ok(Number::Float(match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => a / b,
                }))
            }
        }
    }

    fn compare(self, rhs: Number) -> Option<Ordering> {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
            (lhs, rhs) => lhs.as_f64().partial_cmp(&rhs.as_f64()),
        }
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(n) => Value::Integer(n),
            Number::Float(n) => Value::Float(n),
        }
    }
}

/// Definition of a primitive: a built-in function over evaluated arguments
pub struct BuiltinOp {
    pub id: &'static str,
    /// Erased implementation; typed Rust functions are adapted through `intooperation`
    pub func: Arc<OperationFn>,
    pub arity: Arity,
}

impl BuiltinOp {
    /// Check the argument count, then apply.
    pub fn call(&self, args: Vec<Value>) -> Result<Value, Error> {
        self.arity.validate(args.len())?;
        (self.func)(args)
    }
}

impl fmt::Debug for BuiltinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinOp")
            .field("id", &self.id)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Special forms take the unevaluated argument forms, the calling environment and the
/// current evaluation depth, and either produce a value or name the expression to
/// continue with in tail position.
pub type SpecialFormFn =
    for<'a> fn(&'a [Value], &Environment, usize) -> Result<Trampoline<'a>, Error>;

/// Definition of a special form
#[derive(Debug)]
pub struct SpecialForm {
    pub id: &'static str,
    pub func: SpecialFormFn,
    pub arity: Arity,
}

//
// Primitive implementations
//

fn builtin_add(mut args: NumIter<'_>) -> Result<Number, Error> {
    args.try_fold(Number::Int(0), |acc, n| acc.apply(ArithOp::Add, n))
}

fn builtin_mul(mut args: NumIter<'_>) -> Result<Number, Error> {
    args.try_fold(Number::Int(1), |acc, n| acc.apply(ArithOp::Mul, n))
}

// A single argument is applied to the operation's identity: (- x) is 0 - x, (/ x) is 1 / x.
macro_rules! left_fold_op {
    ($name:ident, $op:expr, $identity:expr) => {
        fn $name(first: Number, rest: NumIter<'_>) -> Result<Number, Error> {
            let mut iter = rest.peekable();
            if iter.peek().is_none() {
                return $identity.apply($op, first);
            }
            iter.try_fold(first, |acc, n| acc.apply($op, n))
        }
    };
}

left_fold_op!(builtin_sub, ArithOp::Sub, Number::Int(0));
left_fold_op!(builtin_div, ArithOp::Div, Number::Int(1));

// Chained comparisons: every adjacent pair must satisfy the relation. All arguments are
// type-checked by `NumIter` before the first comparison, then the fold stops early.
macro_rules! numeric_comparison {
    ($name:ident, $($ordering:pat_param)|+) => {
        fn $name(first: Number, rest: NumIter<'_>) -> bool {
            let mut prev = first;
            for current in rest {
                if !matches!(prev.compare(current), Some($($ordering)|+)) {
                    return false;
                }
                prev = current;
            }
            true
        }
    };
}

numeric_comparison!(builtin_lt, Ordering::Less);
numeric_comparison!(builtin_le, Ordering::Less | Ordering::Equal);
numeric_comparison!(builtin_gt, Ordering::Greater);
numeric_comparison!(builtin_ge, Ordering::Greater | Ordering::Equal);

/// Every argument must have the first argument's type and equal content.
fn builtin_equal(first: Value, mut rest: ValueIter<'_>) -> bool {
    rest.all(|v| same_type(&first, v) && equals(&first, v))
}

fn builtin_list(args: ValueIter<'_>) -> Value {
    Value::List(args.cloned().collect())
}

fn builtin_not(value: Value) -> bool {
    !value.is_truthy()
}

/// Elements of a list, vector or nil; anything else is a type error.
fn sequence_items(op: &str, value: Value) -> Result<Vec<Value>, Error> {
    match value {
        Value::List(items) | Value::Vector(items) => Ok(items),
        Value::Nil => Ok(Vec::new()),
        other => Err(Error::TypeError(format!(
            "{op}: expected list or vector, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_first(seq: Value) -> Result<Value, Error> {
    Ok(sequence_items("first", seq)?
        .into_iter()
        .next()
        .unwrap_or(Value::Nil))
}

fn builtin_rest(seq: Value) -> Result<Value, Error> {
    Ok(Value::List(
        sequence_items("rest", seq)?.into_iter().skip(1).collect(),
    ))
}

fn builtin_cons(item: Value, seq: Value) -> Result<Value, Error> {
    let mut items = sequence_items("cons", seq)?;
    items.insert(0, item);
    Ok(Value::List(items))
}

fn builtin_count(value: Value) -> Result<i64, Error> {
    let len = match &value {
        Value::List(items) | Value::Vector(items) => items.len(),
        Value::Map(map) => map.len(),
        Value::String(s) => s.chars().count(),
        Value::Nil => 0,
        other => {
            return Err(Error::TypeError(format!(
                "count: not supported on {}",
                other.type_name()
            )));
        }
    };
    i64::try_from(len).map_err(|_| Error::EvalError("count: length out of range".into()))
}

fn builtin_str(args: ValueIter<'_>) -> String {
    let mut out = String::new();
    for arg in args {
        match arg {
            Value::String(s) => out.push_str(s),
            Value::Char(c) => out.push(*c),
            Value::Nil => {}
            other => out.push_str(&other.to_string()),
        }
    }
    out
}

fn fixed<Args, R, F: IntoOperation<Args, R>>(f: F) -> Arc<OperationFn> {
    f.into_operation()
}

fn variadic<Args, R, F: IntoVariadicOperation<Args, R>>(f: F) -> Arc<OperationFn> {
    f.into_variadic_operation()
}

/// Global registry of primitives, built lazily because the typed adapters allocate.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    vec![
        BuiltinOp {
            id: "+",
            func: variadic::<(NumIter<'static>,), Number, _>(builtin_add),
            arity: Arity::Any,
        },
        BuiltinOp {
            id: "-",
            func: variadic::<(Number, NumIter<'static>), Number, _>(builtin_sub),
            arity: Arity::AtLeast(1),
        },
        BuiltinOp {
            id: "*",
            func: variadic::<(NumIter<'static>,), Number, _>(builtin_mul),
            arity: Arity::Any,
        },
        BuiltinOp {
            id: "/",
            func: variadic::<(Number, NumIter<'static>), Number, _>(builtin_div),
            arity: Arity::AtLeast(1),
        },
        BuiltinOp {
            id: "<",
            func: variadic::<(Number, NumIter<'static>), bool, _>(builtin_lt),
            arity: Arity::AtLeast(1),
        },
        BuiltinOp {
            id: "<=",
            func: variadic::<(Number, NumIter<'static>), bool, _>(builtin_le),
            arity: Arity::AtLeast(1),
        },
        BuiltinOp {
            id: ">",
            func: variadic::<(Number, NumIter<'static>), bool, _>(builtin_gt),
            arity: Arity::AtLeast(1),
        },
        BuiltinOp {
            id: ">=",
            func: variadic::<(Number, NumIter<'static>), bool, _>(builtin_ge),
            arity: Arity::AtLeast(1),
        },
        BuiltinOp {
            id: "=",
            func: variadic::<(Value, ValueIter<'static>), bool, _>(builtin_equal),
            arity: Arity::AtLeast(1),
        },
        BuiltinOp {
            id: "list",
            func: variadic::<(ValueIter<'static>,), Value, _>(builtin_list),
            arity: Arity::Any,
        },
        BuiltinOp {
            id: "not",
            func: fixed::<(Value,), bool, _>(builtin_not),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "first",
            func: fixed::<(Value,), Value, _>(builtin_first),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "rest",
            func: fixed::<(Value,), Value, _>(builtin_rest),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "cons",
            func: fixed::<(Value, Value), Value, _>(builtin_cons),
            arity: Arity::Exact(2),
        },
        BuiltinOp {
            id: "count",
            func: fixed::<(Value,), i64, _>(builtin_count),
            arity: Arity::Exact(1),
        },
        BuiltinOp {
            id: "str",
            func: variadic::<(ValueIter<'static>,), String, _>(builtin_str),
            arity: Arity::Any,
        },
    ]
});

static SPECIAL_FORMS: [SpecialForm; 9] = [
    SpecialForm {
        id: "quote",
        func: eval_quote,
        arity: Arity::Exact(1),
    },
    SpecialForm {
        id: "do",
        func: eval_do,
        arity: Arity::Any,
    },
    SpecialForm {
        id: "def",
        func: eval_def,
        arity: Arity::Exact(2),
    },
    SpecialForm {
        id: "fn",
        func: eval_fn,
        arity: Arity::AtLeast(1),
    },
    SpecialForm {
        id: "defn",
        func: eval_defn,
        arity: Arity::AtLeast(2),
    },
    SpecialForm {
        id: "if",
        func: eval_if,
        arity: Arity::Range(2, 3),
    },
    SpecialForm {
        id: "cond",
        func: eval_cond,
        arity: Arity::Even,
    },
    SpecialForm {
        id: "and",
        func: eval_and,
        arity: Arity::Any,
    },
    SpecialForm {
        id: "or",
        func: eval_or,
        arity: Arity::Any,
    },
];

/// Lazy static map from id to BuiltinOp (private - use find_builtin_op)
static BUILTIN_BY_ID: LazyLock<HashMap<&'static str, &'static BuiltinOp>> = LazyLock::new(|| {
    let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
    ops.iter().map(|op| (op.id, op)).collect()
});

pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

pub fn get_special_forms() -> &'static [SpecialForm] {
    &SPECIAL_FORMS
}

pub fn find_builtin_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_ID.get(id).copied()
}

pub fn find_special_form(id: &str) -> Option<&'static SpecialForm> {
    SPECIAL_FORMS.iter().find(|form| form.id == id)
}
