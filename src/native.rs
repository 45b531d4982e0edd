//! Host functions callable from evaluated code.
//!
//! A [`NativeFn`] pairs a type-erased Rust closure with a [`Signature`]: the declared
//! type of each fixed parameter and, for variadic functions, the type every trailing
//! argument must have. The signature is checked on every call before the host function
//! runs, so a mismatch is reported as an arity or type error instead of reaching host code.
//!
//! Signatures are normally derived from the Rust parameter types by the registration
//! APIs on [`Environment`](crate::evaluator::Environment); [`NativeFn::from_raw`] takes
//! an explicit one for functions that work on raw values.

use std::fmt;
use std::sync::Arc;

use crate::Error;
use crate::ast::Value;
use crate::builtinops::Arity;
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};

/// Runtime type a native parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Any,
    Integer,
    Float,
    /// Integer or float
    Number,
    String,
    Char,
    Bool,
    Symbol,
    Keyword,
    /// List or vector
    Sequence,
    Map,
}

impl ValueType {
    pub fn admits(self, value: &Value) -> bool {
        match self {
            ValueType::Any => true,
            ValueType::Integer => matches!(value, Value::Integer(_)),
            ValueType::Float => matches!(value, Value::Float(_)),
            ValueType::Number => matches!(value, Value::Integer(_) | Value::Float(_)),
            ValueType::String => matches!(value, Value::String(_)),
            ValueType::Char => matches!(value, Value::Char(_)),
            ValueType::Bool => matches!(value, Value::Bool(_)),
            ValueType::Symbol => matches!(value, Value::Symbol(_)),
            ValueType::Keyword => matches!(value, Value::Keyword(_)),
            ValueType::Sequence => matches!(value, Value::List(_) | Value::Vector(_)),
            ValueType::Map => matches!(value, Value::Map(_)),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Any => "any value",
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Char => "char",
            ValueType::Bool => "boolean",
            ValueType::Symbol => "symbol",
            ValueType::Keyword => "keyword",
            ValueType::Sequence => "list or vector",
            ValueType::Map => "map",
        };
        f.write_str(name)
    }
}

/// Declared parameter types of a native function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<ValueType>,
    /// Element type of trailing arguments; `None` for fixed arity
    pub rest: Option<ValueType>,
}

impl Signature {
    pub fn fixed(params: Vec<ValueType>) -> Self {
        Signature { params, rest: None }
    }

    pub fn variadic(params: Vec<ValueType>, rest: ValueType) -> Self {
        Signature {
            params,
            rest: Some(rest),
        }
    }

    /// Exact for fixed signatures; at least the fixed prefix for variadic ones.
    pub fn arity(&self) -> Arity {
        match self.rest {
            Some(_) => Arity::AtLeast(self.params.len()),
            None => Arity::Exact(self.params.len()),
        }
    }

    /// Validate argument count, then each argument's type in order.
    pub fn check(&self, args: &[Value]) -> Result<(), Error> {
        self.arity().validate(args.len())?;
        for (i, arg) in args.iter().enumerate() {
            let expected = self
                .params
                .get(i)
                .copied()
                .or(self.rest)
                .unwrap_or(ValueType::Any);
            if !expected.admits(arg) {
                return Err(Error::TypeError(format!(
                    "argument {} must be {expected}, got {} {arg}",
                    i + 1,
                    arg.type_name()
                )));
            }
        }
        Ok(())
    }
}

/// A registered host function.
pub struct NativeFn {
    name: String,
    signature: Signature,
    func: Arc<OperationFn>,
}

impl NativeFn {
    /// Wrap a fixed-arity typed Rust function; the signature follows its parameter types.
    pub fn new<F, Args, R>(name: impl Into<String>, func: F) -> Self
    where
        F: IntoOperation<Args, R>,
    {
        NativeFn {
            name: name.into(),
            signature: F::signature(),
            func: func.into_operation(),
        }
    }

    /// Wrap a typed Rust function whose last parameter is a rest iterator.
    pub fn variadic<F, Args, R>(name: impl Into<String>, func: F) -> Self
    where
        F: IntoVariadicOperation<Args, R>,
    {
        NativeFn {
            name: name.into(),
            signature: F::signature(),
            func: func.into_variadic_operation(),
        }
    }

    /// Wrap a function over raw values with an explicit signature.
    pub fn from_raw(
        name: impl Into<String>,
        signature: Signature,
        func: fn(&[Value]) -> Result<Value, Error>,
    ) -> Self {
        NativeFn {
            name: name.into(),
            signature,
            func: Arc::new(move |args: Vec<Value>| func(&args)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Check the arguments against the signature and invoke the host function.
    ///
    /// Host-level failures come back as [`Error::HostError`] prefixed with this
    /// function's name.
    pub fn call(&self, args: Vec<Value>) -> Result<Value, Error> {
        self.signature.check(&args).map_err(|err| match err {
            Error::TypeError(msg) => Error::TypeError(format!("{}: {msg}", self.name)),
            other => other,
        })?;
        tracing::trace!(native = %self.name, argc = args.len(), "calling native function");
        (self.func)(args).map_err(|err| match err {
            Error::HostError(msg) => Error::HostError(format!("{}: {msg}", self.name)),
            other => other,
        })
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFn")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Conversion of a host function's error value into an interpreter [`Error`].
///
/// Interpreter errors pass through unchanged; anything else becomes a
/// [`Error::HostError`] carrying its message.
pub trait IntoError {
    fn into_error(self) -> Error;
}

impl IntoError for Error {
    fn into_error(self) -> Error {
        self
    }
}

impl IntoError for String {
    fn into_error(self) -> Error {
        Error::HostError(self)
    }
}

impl IntoError for &str {
    fn into_error(self) -> Error {
        Error::HostError(self.to_owned())
    }
}

impl IntoError for Box<dyn std::error::Error + Send + Sync> {
    fn into_error(self) -> Error {
        Error::HostError(self.to_string())
    }
}

macro_rules! impl_into_error_via_display {
    ($($err:ty),+) => {
        $(
            impl IntoError for $err {
                fn into_error(self) -> Error {
                    Error::HostError(self.to_string())
                }
            }
        )+
    };
}

impl_into_error_via_display!(
    std::io::Error,
    std::fmt::Error,
    std::num::ParseIntError,
    std::num::ParseFloatError,
    std::num::TryFromIntError
);
