//! Structural equality over [`Value`]s.
//!
//! Two values are equal when they are the same kind and hold equal content:
//! lists and vectors compare element-wise in order, maps compare as sets of
//! key/value pairs, and scalars compare by type and value. An integer never equals
//! a float of the same magnitude, and a symbol never equals a keyword or string
//! spelled the same way. Callables compare by identity.

use std::mem;
use std::rc::Rc;

use crate::ast::{Value, ValueMap};

/// Deep structural equality. Total: never fails, whatever the operands.
pub fn equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::List(xs), Value::List(ys)) | (Value::Vector(xs), Value::Vector(ys)) => {
            sequences_equal(xs, ys)
        }
        (Value::Map(x), Value::Map(y)) => maps_equal(x, y),
        (Value::Integer(x), Value::Integer(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::String(x), Value::String(y))
        | (Value::Symbol(x), Value::Symbol(y))
        | (Value::Keyword(x), Value::Keyword(y)) => x == y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Nil, Value::Nil) => true,
        (Value::Procedure(x), Value::Procedure(y)) => Rc::ptr_eq(x, y),
        (Value::Native(x), Value::Native(y)) => Rc::ptr_eq(x, y),
        (Value::Primitive(x), Value::Primitive(y)) => x.id == y.id,
        (Value::SpecialForm(x), Value::SpecialForm(y)) => x.id == y.id,
        _ => false,
    }
}

fn sequences_equal(xs: &[Value], ys: &[Value]) -> bool {
    xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| equals(x, y))
}

/// Maps are equal when they have the same size and every pair of `x` has a matching
/// pair in `y`. Keys within a map are unique under [`equals`], so this is a bijection.
fn maps_equal(x: &ValueMap, y: &ValueMap) -> bool {
    x.len() == y.len()
        && x
            .iter()
            .all(|(k, v)| y.get(k).is_some_and(|other| equals(v, other)))
}

/// True when both values are the same variant, regardless of content.
pub fn same_type(a: &Value, b: &Value) -> bool {
    mem::discriminant(a) == mem::discriminant(b)
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        equals(self, other)
    }
}

impl PartialEq for ValueMap {
    fn eq(&self, other: &Self) -> bool {
        maps_equal(self, other)
    }
}
