//! This module defines the core value type shared by the reader and the evaluator.
//! The main enum, [`Value`], covers every datum the interpreter manipulates: scalars,
//! symbols and keywords, the three collection kinds, and the four callable kinds
//! (user procedures, primitives, special forms and host natives). Ergonomic helper
//! functions such as [`val`], [`sym`], [`kw`] and [`nil`] are provided for convenient
//! construction in both code and tests, and conversion traits for common Rust types make
//! it easy to build values from literals, arrays, tuples and vectors.
//!
//! The [`Display`](std::fmt::Display) implementation is the canonical printed form:
//! strings and characters are quoted, floats always carry a fractional part, and callables
//! print as `#<kind name>`.

use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::builtinops::{BuiltinOp, SpecialForm};
use crate::evaluator::Environment;
use crate::native::NativeFn;

/// Type alias for integer values in the interpreter
pub type IntegerType = i64;

/// Core value type of the interpreter
///
/// List, Vector and Map are distinct kinds: a list and a vector holding the same
/// elements are never equal, and they evaluate differently.
///
/// To build values, use the helper functions:
/// - `val(42)` for scalars, `sym("name")` for symbols, `kw("key")` for keywords
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone)]
pub enum Value {
    Integer(IntegerType),
    Float(f64),
    String(String),
    Char(char),
    Bool(bool),
    /// Absence of a value; distinct from the empty list
    Nil,
    Symbol(String),
    /// Self-evaluating tag, stored without the leading `:`
    Keyword(String),
    List(Vec<Value>),
    Vector(Vec<Value>),
    Map(ValueMap),
    /// User-defined closure created by `fn` or `defn`
    Procedure(Rc<Procedure>),
    /// Built-in function receiving evaluated arguments
    Primitive(&'static BuiltinOp),
    /// Built-in form receiving unevaluated arguments and the calling environment
    SpecialForm(&'static SpecialForm),
    /// Host function registered through the native bridge
    Native(Rc<NativeFn>),
}

/// A user-defined procedure: parameter names, body forms and the captured environment.
pub struct Procedure {
    /// Set by `defn`; anonymous procedures have no name
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Value>,
    pub env: Environment,
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // env is skipped; it may hold this procedure
        f.debug_struct("Procedure")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

/// Association of values to values, looked up by structural equality.
///
/// Keys need not be hashable, so lookup is a linear scan using
/// [`equals`](crate::equality::equals). Insertion order is preserved for printing.
#[derive(Clone, Default)]
pub struct ValueMap {
    entries: Vec<(Value, Value)>,
}

impl ValueMap {
    pub fn new() -> Self {
        ValueMap {
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| crate::equality::equals(k, key))
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    /// Insert a pair, replacing and returning the previous value for an equal key.
    pub fn insert(&mut self, key: Value, value: Value) -> Option<Value> {
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| crate::equality::equals(k, &key))
        {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl FromIterator<(Value, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (Value, Value)>>(iter: I) -> Self {
        let mut map = ValueMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl IntoIterator for ValueMap {
    type Item = (Value, Value);
    type IntoIter = std::vec::IntoIter<(Value, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl fmt::Debug for ValueMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::Float(n) => write!(f, "Float({n:?})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Char(c) => write!(f, "Char({c:?})"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Nil => write!(f, "Nil"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Keyword(s) => write!(f, "Keyword({s})"),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Vector(items) => f.debug_tuple("Vector").field(items).finish(),
            Value::Map(map) => f.debug_tuple("Map").field(map).finish(),
            Value::Procedure(proc) => write!(f, "{proc:?}"),
            Value::Primitive(op) => write!(f, "Primitive({})", op.id),
            Value::SpecialForm(form) => write!(f, "SpecialForm({})", form.id),
            Value::Native(native) => write!(f, "Native({})", native.name()),
        }
    }
}

impl Value {
    /// `false` and `nil` are falsy; everything else (including `0`, `""` and `()`) is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false) | Value::Nil)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Name of this value's kind as used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Char(_) => "char",
            Value::Bool(_) => "boolean",
            Value::Nil => "nil",
            Value::Symbol(_) => "symbol",
            Value::Keyword(_) => "keyword",
            Value::List(_) => "list",
            Value::Vector(_) => "vector",
            Value::Map(_) => "map",
            Value::Procedure(_) => "procedure",
            Value::Primitive(_) => "primitive",
            Value::SpecialForm(_) => "special-form",
            Value::Native(_) => "native",
        }
    }

    /// Elements of a list or vector
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Vector(items) => Some(items),
            _ => None,
        }
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Char(c)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<f32> for Value {
    fn from(n: f32) -> Self {
        Value::Float(f64::from(n))
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Integer(IntegerType::from(n))
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(IntegerType);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

/// Unit maps to nil, so host functions with no result return nothing to the caller.
impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Value::Nil, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::List(arr.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(slice: &[T]) -> Self {
        Value::List(slice.iter().cloned().map(Into::into).collect())
    }
}

// Multiple results from a host function come back as a list
impl<A: Into<Value>, B: Into<Value>> From<(A, B)> for Value {
    fn from((a, b): (A, B)) -> Self {
        Value::List(vec![a.into(), b.into()])
    }
}

impl<A: Into<Value>, B: Into<Value>, C: Into<Value>> From<(A, B, C)> for Value {
    fn from((a, b, c): (A, B, C)) -> Self {
        Value::List(vec![a.into(), b.into(), c.into()])
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Value::Map(map)
    }
}

// Fallible conversions from `Value` back into Rust types.

macro_rules! impl_try_from_value {
    ($target:ty, $expected:literal, $pattern:pat => $result:expr) => {
        impl TryFrom<Value> for $target {
            type Error = Error;

            fn try_from(value: Value) -> Result<Self, Error> {
                match value {
                    $pattern => Ok($result),
                    other => Err(Error::TypeError(format!(
                        concat!("expected ", $expected, ", got {}"),
                        other.type_name()
                    ))),
                }
            }
        }
    };
}

impl_try_from_value!(IntegerType, "integer", Value::Integer(n) => n);
impl_try_from_value!(f64, "float", Value::Float(n) => n);
impl_try_from_value!(bool, "boolean", Value::Bool(b) => b);
impl_try_from_value!(char, "char", Value::Char(c) => c);
impl_try_from_value!(String, "string", Value::String(s) => s);

/// Helper function for creating symbols - works great in mixed lists!
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating keywords; the name is given without the leading `:`
pub fn kw<S: AsRef<str>>(name: S) -> Value {
    Value::Keyword(name.as_ref().to_owned())
}

/// Helper function for creating Values from anything convertible
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

pub fn nil() -> Value {
    Value::Nil
}

/// Helper for vectors, which have no `From` conversion of their own (`Vec<T>` becomes a list)
pub fn vector<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Value {
    Value::Vector(items.into_iter().map(Into::into).collect())
}

/// Helper for map values built from key/value pairs
pub fn map<K: Into<Value>, V: Into<Value>>(pairs: impl IntoIterator<Item = (K, V)>) -> Value {
    Value::Map(
        pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
    )
}

fn write_escaped_str(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "\"")?;
    for ch in s.chars() {
        match ch {
            '"' => write!(f, "\\\"")?,
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            '\u{8}' => write!(f, "\\b")?,
            '\u{c}' => write!(f, "\\f")?,
            c => write!(f, "{c}")?,
        }
    }
    write!(f, "\"")
}

fn write_float(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    let text = n.to_string();
    if text.contains(['.', 'e', 'i', 'N']) {
        write!(f, "{text}")
    } else {
        write!(f, "{text}.0")
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{n}"),
            Value::Float(n) => write_float(f, *n),
            Value::String(s) => write_escaped_str(f, s),
            Value::Char(c) => write!(f, "{c:?}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Nil => write!(f, "nil"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Keyword(s) => write!(f, ":{s}"),
            Value::List(items) => {
                write!(f, "(")?;
                write_joined(f, items)?;
                write!(f, ")")
            }
            Value::Vector(items) => {
                write!(f, "[")?;
                write_joined(f, items)?;
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} {v}")?;
                }
                write!(f, "}}")
            }
            Value::Procedure(proc) => match &proc.name {
                Some(name) => write!(f, "#<fn {name}>"),
                None => write!(f, "#<fn>"),
            },
            Value::Primitive(op) => write!(f, "#<primitive {}>", op.id),
            Value::SpecialForm(form) => write!(f, "#<special-form {}>", form.id),
            Value::Native(native) => write!(f, "#<native {}>", native.name()),
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod helper_function_tests {
    use super::*;

    #[test]
    fn test_helper_functions_data_driven() {
        // Test cases as (Value, Value) tuples: (helper_result, expected_value)
        let test_cases = vec![
            (val(42), Value::Integer(42)),
            (val(-17), Value::Integer(-17)),
            (val(4294967295u32), Value::Integer(4294967295)),
            (val(-128i8), Value::Integer(-128)),
            (val(IntegerType::MIN), Value::Integer(IntegerType::MIN)),
            (val(2.5), Value::Float(2.5)),
            (val(true), Value::Bool(true)),
            (val('x'), Value::Char('x')),
            (val("hello"), Value::String("hello".to_owned())),
            (val(()), Value::Nil),
            (val(None::<i64>), Value::Nil),
            (val(Some(3)), Value::Integer(3)),
            (sym("foo-bar?"), Value::Symbol("foo-bar?".to_owned())),
            (kw("a"), Value::Keyword("a".to_owned())),
            (nil(), Value::Nil),
            (
                val([1, 2, 3]),
                Value::List(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]),
            ),
            (
                vector([1, 2]),
                Value::Vector(vec![Value::Integer(1), Value::Integer(2)]),
            ),
            (
                val((1, "s")),
                Value::List(vec![Value::Integer(1), Value::String("s".to_owned())]),
            ),
            (
                val(vec![sym("operation"), val(42), val("result"), val(true)]),
                Value::List(vec![
                    Value::Symbol("operation".to_owned()),
                    Value::Integer(42),
                    Value::String("result".to_owned()),
                    Value::Bool(true),
                ]),
            ),
        ];

        for (i, (actual, expected)) in test_cases.iter().enumerate() {
            assert_eq!(
                actual,
                expected,
                "Test case {} failed:\n  Expected: {:?}\n  Got: {:?}",
                i + 1,
                expected,
                actual
            );
        }
    }

    #[test]
    fn test_display_canonical_forms() {
        let test_cases = vec![
            (val(42), "42"),
            (val(-3), "-3"),
            (val(2.0), "2.0"),
            (val(0.5), "0.5"),
            (val(f64::INFINITY), "inf"),
            (val("a\"b\n"), "\"a\\\"b\\n\""),
            (val('c'), "'c'"),
            (val('\n'), "'\\n'"),
            (nil(), "nil"),
            (val(false), "false"),
            (sym("x"), "x"),
            (kw("key"), ":key"),
            (val([1, 2]), "(1 2)"),
            (Value::List(vec![]), "()"),
            (vector([val(1), vector([2])]), "[1 [2]]"),
            (map([(kw("a"), 1), (kw("b"), 2)]), "{:a 1, :b 2}"),
            (map(Vec::<(Value, Value)>::new()), "{}"),
        ];

        for (value, expected) in test_cases {
            assert_eq!(value.to_string(), expected, "printing {value:?}");
        }
    }

    #[test]
    fn test_truthiness() {
        let truthy = [val(0), val(""), val([0; 0]), vector::<Value>([]), val(true), kw("k")];
        for v in truthy {
            assert!(v.is_truthy(), "{v} should be truthy");
        }
        assert!(!nil().is_truthy());
        assert!(!val(false).is_truthy());
    }

    #[test]
    fn test_value_map_replaces_equal_keys() {
        let mut m = ValueMap::new();
        assert_eq!(m.insert(val(1), val("one")), None);
        assert_eq!(m.insert(val(1.0), val("float one")), None);
        assert_eq!(m.insert(val(1), val("uno")), Some(val("one")));
        assert_eq!(m.len(), 2);
        assert_eq!(m.get(&val(1)).unwrap(), &val("uno"));
        assert!(!m.contains_key(&val("1")));
    }

    #[test]
    fn test_try_from_value() {
        assert_eq!(i64::try_from(val(7)).unwrap(), 7);
        assert_eq!(String::try_from(val("s")).unwrap(), "s");
        let err = i64::try_from(val("7")).unwrap_err();
        assert_eq!(err, Error::TypeError("expected integer, got string".into()));
    }
}
