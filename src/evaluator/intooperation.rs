use crate::Error;
use crate::ast::Value;
use crate::builtinops::{Arity, Number};
use crate::native::{IntoError, Signature, ValueType};
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::sync::Arc;

// NOTE: This module is plumbing for the evaluator and the native bridge.
// It defines the adapter layer that turns strongly-typed Rust functions
// into the erased `OperationFn` used at runtime, and derives the
// call-time `Signature` of each adapted function from its Rust types.
//
// External users should interact with `Environment` and the registration
// APIs in `evaluator/environment.rs`; the traits here are public only so
// that those APIs can name them in their bounds.

/// Canonical erased builtin function type used by the evaluator.
///
/// Builtins receive ownership of their argument vector, enabling
/// implementations that consume or rearrange arguments if desired.
pub type OperationFn = dyn Fn(Vec<Value>) -> Result<Value, Error> + Send + Sync;

// =====================================================================
// Fixed-parameter conversion
// =====================================================================

/// Core trait used by the adapters to turn `Value` arguments into
/// strongly-typed parameters.
///
/// The associated `Param<'a>` type is the parameter type as seen by
/// the function for a given lifetime of the local `Value` slots used
/// during argument conversion.
pub trait FromParam {
    type Param<'a>;

    /// Runtime type accepted for this parameter, checked before the call
    const VALUE_TYPE: ValueType;

    /// Convert a single argument into this parameter type.
    ///
    /// Implementations may either borrow from the provided `Value`
    /// (for `&str` and the borrowed iterators), or consume it by value.
    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error>;
}

fn type_mismatch(expected: ValueType, found: &Value) -> Error {
    Error::TypeError(format!("expected {expected}, got {}", found.type_name()))
}

impl FromParam for Value {
    type Param<'a> = Value;
    const VALUE_TYPE: ValueType = ValueType::Any;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        // Move the `Value` out so that functions can consume owned payloads
        // (such as strings or lists) without cloning.
        Ok(std::mem::replace(value, Value::Nil))
    }
}

// By-value scalars obtained through the `TryFrom<Value>` impls in `ast.rs`.
macro_rules! impl_from_param_via_try_from {
    ($target:ty, $value_type:expr) => {
        impl FromParam for $target {
            type Param<'a> = $target;
            const VALUE_TYPE: ValueType = $value_type;

            fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
                <$target>::try_from(std::mem::replace(value, Value::Nil))
            }
        }
    };
}

impl_from_param_via_try_from!(i64, ValueType::Integer);
impl_from_param_via_try_from!(f64, ValueType::Float);
impl_from_param_via_try_from!(bool, ValueType::Bool);
impl_from_param_via_try_from!(char, ValueType::Char);
impl_from_param_via_try_from!(String, ValueType::String);

// Either numeric kind; take `Number` where integers should be accepted as floats.
impl FromParam for Number {
    type Param<'a> = Number;
    const VALUE_TYPE: ValueType = ValueType::Number;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        match value {
            Value::Integer(n) => Ok(Number::Int(*n)),
            Value::Float(n) => Ok(Number::Float(*n)),
            other => Err(type_mismatch(ValueType::Number, other)),
        }
    }
}

impl FromParam for &str {
    type Param<'a> = &'a str;
    const VALUE_TYPE: ValueType = ValueType::String;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        match value {
            Value::String(s) => Ok(s.as_str()),
            other => Err(type_mismatch(ValueType::String, other)),
        }
    }
}

// A list or vector argument viewed through a typed iterator.
impl<'b, K> FromParam for TypedValueIter<'b, K>
where
    K: ValueElementKind,
{
    type Param<'a> = TypedValueIter<'a, K>;
    const VALUE_TYPE: ValueType = ValueType::Sequence;

    fn from_arg<'a>(value: &'a mut Value) -> Result<Self::Param<'a>, Error> {
        match value {
            Value::List(items) | Value::Vector(items) => TypedValueIter::<K>::new(items.as_slice()),
            other => Err(type_mismatch(ValueType::Sequence, other)),
        }
    }
}

// =====================================================================
// Generic typed iterator built on top of the standard slice iterator
// =====================================================================

/// Marker trait describing how to view a `Value` slice as a typed
/// iterator. Every element is validated up front against
/// `ELEMENT_TYPE`, so `project` never sees a value of the wrong kind.
#[doc(hidden)]
pub trait ValueElementKind {
    type Item<'a>;

    const ELEMENT_TYPE: ValueType;

    fn project<'a>(v: &'a Value) -> Self::Item<'a>;

    fn precheck(slice: &[Value]) -> Result<(), Error> {
        match slice.iter().find(|v| !Self::ELEMENT_TYPE.admits(v)) {
            Some(bad) => Err(type_mismatch(Self::ELEMENT_TYPE, bad)),
            None => Ok(()),
        }
    }
}

/// Generic iterator over a slice of `Value`s, parameterized by a
/// [`ValueElementKind`] that determines the element type and
/// validation.
#[doc(hidden)]
pub struct TypedValueIter<'a, K: ValueElementKind> {
    inner: std::slice::Iter<'a, Value>,
    _marker: PhantomData<K>,
}

impl<'a, K> TypedValueIter<'a, K>
where
    K: ValueElementKind,
{
    pub(crate) fn new(values: &'a [Value]) -> Result<Self, Error> {
        K::precheck(values)?;
        Ok(TypedValueIter {
            inner: values.iter(),
            _marker: PhantomData,
        })
    }
}

impl<'a, K> Iterator for TypedValueIter<'a, K>
where
    K: ValueElementKind,
{
    type Item = K::Item<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let v = self.inner.next()?;
        Some(K::project(v))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<'a, K> ExactSizeIterator for TypedValueIter<'a, K> where K: ValueElementKind {}
impl<'a, K> FusedIterator for TypedValueIter<'a, K> where K: ValueElementKind {}

// Concrete element kinds and their iterator aliases

#[doc(hidden)]
pub struct ValueKind;

impl ValueElementKind for ValueKind {
    type Item<'a> = &'a Value;
    const ELEMENT_TYPE: ValueType = ValueType::Any;

    fn project<'a>(v: &'a Value) -> Self::Item<'a> {
        v
    }
}

macro_rules! element_kind {
    ($kind:ident, $item:ty, $element_type:expr, $($pattern:pat => $result:expr),+) => {
        #[doc(hidden)]
        pub struct $kind;

        impl ValueElementKind for $kind {
            type Item<'a> = $item;
            const ELEMENT_TYPE: ValueType = $element_type;

            fn project<'a>(v: &'a Value) -> Self::Item<'a> {
                match v {
                    $($pattern => $result,)+
                    _ => {
                        debug_assert!(false, concat!(stringify!($kind), "::project saw wrong type after precheck"));
                        unreachable!(concat!(stringify!($kind), " invariant violated"))
                    }
                }
            }
        }
    };
}

element_kind!(NumberKind, Number, ValueType::Number,
    Value::Integer(n) => Number::Int(*n),
    Value::Float(n) => Number::Float(*n));
element_kind!(IntegerKind, i64, ValueType::Integer, Value::Integer(n) => *n);
element_kind!(BoolKind, bool, ValueType::Bool, Value::Bool(b) => *b);

#[doc(hidden)]
pub struct StringKind;

impl ValueElementKind for StringKind {
    type Item<'a> = &'a str;
    const ELEMENT_TYPE: ValueType = ValueType::String;

    fn project<'a>(v: &'a Value) -> Self::Item<'a> {
        if let Value::String(s) = v {
            s.as_str()
        } else {
            debug_assert!(false, "StringKind::project saw non-string after precheck");
            unreachable!("StringKind invariant violated")
        }
    }
}

/// Borrowed iterator over a sequence of `Value` references.
pub type ValueIter<'a> = TypedValueIter<'a, ValueKind>;

/// Borrowed iterator over numeric elements, integers and floats alike.
pub type NumIter<'a> = TypedValueIter<'a, NumberKind>;

/// Borrowed iterator over integer elements.
pub type IntIter<'a> = TypedValueIter<'a, IntegerKind>;

/// Borrowed iterator over boolean elements.
pub type BoolIter<'a> = TypedValueIter<'a, BoolKind>;

/// Borrowed iterator over string elements, yielding `&str`.
pub type StringIter<'a> = TypedValueIter<'a, StringKind>;

// =====================================================================
// Rest-parameter support for variadic operations
// =====================================================================

/// Core trait used to construct rest-parameter values from the tail of
/// the argument list.
pub trait FromRest {
    type Param<'a>;

    /// Runtime type every rest argument must have
    const ELEMENT_TYPE: ValueType;

    fn from_rest<'a>(slice: &'a [Value]) -> Result<Self::Param<'a>, Error>;
}

impl<K> FromRest for TypedValueIter<'static, K>
where
    K: ValueElementKind,
{
    type Param<'a> = TypedValueIter<'a, K>;
    const ELEMENT_TYPE: ValueType = K::ELEMENT_TYPE;

    fn from_rest<'a>(slice: &'a [Value]) -> Result<Self::Param<'a>, Error> {
        TypedValueIter::<K>::new(slice)
    }
}

// =====================================================================
// Return-type adaptation
// =====================================================================

/// Normalize both plain values and `Result`-returning functions into `Result<T, Error>`.
pub trait IntoResult<T> {
    fn into_result(self) -> Result<T, Error>;
}

impl<T> IntoResult<T> for T {
    fn into_result(self) -> Result<T, Error> {
        Ok(self)
    }
}

impl<T, E> IntoResult<T> for Result<T, E>
where
    E: IntoError,
{
    fn into_result(self) -> Result<T, Error> {
        self.map_err(IntoError::into_error)
    }
}

/// Convert a strongly-typed Rust function or closure into the erased
/// [`OperationFn`], parameterized by an argument tuple type.
pub trait IntoOperation<Args, R> {
    fn into_operation(self) -> Arc<OperationFn>;

    /// Parameter types derived from `Args`
    fn signature() -> Signature
    where
        Self: Sized;
}

/// Trait for functions whose Rust signature ends in a rest parameter,
/// expressed using the iterator types defined in this module
/// (`ValueIter<'a>`, `NumIter<'a>`, `IntIter<'a>`, `BoolIter<'a>` or
/// `StringIter<'a>`), optionally after a fixed prefix of `FromParam`
/// parameters.
pub trait IntoVariadicOperation<Args, R> {
    fn into_variadic_operation(self) -> Arc<OperationFn>;

    fn signature() -> Signature
    where
        Self: Sized;
}

// =====================================================================
// Variadic adapters using iterator-based rest parameters
// =====================================================================

impl<F, FR, R, I> IntoVariadicOperation<(I,), R> for F
where
    I: FromRest,
    F: for<'a> Fn(<I as FromRest>::Param<'a>) -> FR + Send + Sync + 'static,
    FR: IntoResult<R> + 'static,
    R: Into<Value> + 'static,
{
    fn into_variadic_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Value>| {
            let rest_param: <I as FromRest>::Param<'_> = <I as FromRest>::from_rest(&args[..])?;
            let result: FR = (self)(rest_param);
            let value: R = result.into_result()?;
            Ok(value.into())
        })
    }

    fn signature() -> Signature {
        Signature::variadic(vec![], I::ELEMENT_TYPE)
    }
}

/// Helper macro to implement `IntoVariadicOperation` for functions with
/// a fixed prefix of `FromParam` parameters followed by a single rest
/// parameter.
macro_rules! impl_into_variadic_operation_for_prefix_and_rest {
    ($prefix:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, FR, R, I, $( $A ),+> IntoVariadicOperation<( $( $A, )+ I, ), R> for F
        where
            I: FromRest,
            $( $A: FromParam, )+
            F: for<'a> Fn(
                    $( <$A as FromParam>::Param<'a> ),+,
                    <I as FromRest>::Param<'a>,
                ) -> FR
                + Send
                + Sync
                + 'static,
            FR: IntoResult<R> + 'static,
            R: Into<Value> + 'static,
        {
            fn into_variadic_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Value>| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        &mut [ $( ref mut $v ),+, ref mut rest @ .. ] => {
                            $(
                                let $p: <$A as FromParam>::Param<'_> =
                                    <$A as FromParam>::from_arg($v)?;
                            )+

                            let rest_param: <I as FromRest>::Param<'_> =
                                <I as FromRest>::from_rest(&*rest)?;

                            let result: FR = (self)( $( $p ),+, rest_param );
                            let value: R = result.into_result()?;
                            Ok(value.into())
                        }
                        _ => Err(Error::arity_error(Arity::AtLeast($prefix), len)),
                    }
                })
            }

            fn signature() -> Signature {
                Signature::variadic(vec![ $( $A::VALUE_TYPE ),+ ], I::ELEMENT_TYPE)
            }
        }
    };
}

impl_into_variadic_operation_for_prefix_and_rest!(1, v0, p0: A1);
impl_into_variadic_operation_for_prefix_and_rest!(2, v0, p0: A1, v1, p1: A2);
impl_into_variadic_operation_for_prefix_and_rest!(3, v0, p0: A1, v1, p1: A2, v2, p2: A3);
impl_into_variadic_operation_for_prefix_and_rest!(4, v0, p0: A1, v1, p1: A2, v2, p2: A3, v3, p3: A4);
impl_into_variadic_operation_for_prefix_and_rest!(5, v0, p0: A1, v1, p1: A2, v2, p2: A3, v3, p3: A4, v4, p4: A5);

// =====================================================================
// Fixed-arity adapters
// =====================================================================

/// Helper macro to implement `IntoOperation` for functions of various
/// arities.
///
/// It performs arity checking up front, then destructures the owned
/// `Vec<Value>` into local `Value` slots so that `FromParam` can either
/// borrow from or consume each argument as needed before invoking the
/// function.
macro_rules! impl_into_operation_for_arity {
    ($arity:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, FR, R, $( $A ),+> IntoOperation<( $( $A, )+ ), R> for F
        where
            F: for<'a> Fn( $( <$A as FromParam>::Param<'a> ),+ ) -> FR
                + Send
                + Sync
                + 'static,
            FR: IntoResult<R> + 'static,
            R: Into<Value> + 'static,
            $( $A: FromParam, )+
        {
            fn into_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Value>| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        &mut [ $( ref mut $v ),+ ] => {
                            $(
                                let $p: <$A as FromParam>::Param<'_> =
                                    <$A as FromParam>::from_arg($v)?;
                            )+

                            let result: FR = (self)( $( $p ),+ );
                            let value: R = result.into_result()?;
                            Ok(value.into())
                        }
                        _ => Err(Error::arity_error(Arity::Exact($arity), len)),
                    }
                })
            }

            fn signature() -> Signature {
                Signature::fixed(vec![ $( $A::VALUE_TYPE ),+ ])
            }
        }
    };
}

// 0-arg functions / closures
impl<F, FR, R> IntoOperation<(), R> for F
where
    F: Fn() -> FR + Send + Sync + 'static,
    FR: IntoResult<R> + 'static,
    R: Into<Value> + 'static,
{
    fn into_operation(self) -> Arc<OperationFn> {
        Arc::new(move |args: Vec<Value>| {
            if !args.is_empty() {
                return Err(Error::arity_error(Arity::Exact(0), args.len()));
            }

            let result: FR = (self)();
            let value: R = result.into_result()?;
            Ok(value.into())
        })
    }

    fn signature() -> Signature {
        Signature::fixed(vec![])
    }
}

impl_into_operation_for_arity!(1, v0, p0: A1);
impl_into_operation_for_arity!(2, v0, p0: A1, v1, p1: A2);
impl_into_operation_for_arity!(3, v0, p0: A1, v1, p1: A2, v2, p2: A3);
impl_into_operation_for_arity!(4, v0, p0: A1, v1, p1: A2, v2, p2: A3, v3, p3: A4);
impl_into_operation_for_arity!(5, v0, p0: A1, v1, p1: A2, v2, p2: A3, v3, p3: A4, v4, p4: A5);
impl_into_operation_for_arity!(6, v0, p0: A1, v1, p1: A2, v2, p2: A3, v3, p3: A4, v4, p4: A5, v5, p5: A6);
