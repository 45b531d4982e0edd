use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::Error;
use crate::ast::Value;
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation};
use crate::native::{NativeFn, Signature};

struct Scope {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<Environment>,
}

/// Environment for variable bindings
///
/// A chain of scopes. Cloning an `Environment` is cheap and yields a handle to the same
/// scope: a procedure's captured environment and the scope it was defined in are one
/// and the same, so later definitions are visible to it.
#[derive(Clone)]
pub struct Environment {
    scope: Rc<Scope>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// An empty root scope. See [`create_global_env`](crate::evaluator::create_global_env)
    /// for one seeded with the primitives and special forms.
    pub fn new() -> Self {
        Environment {
            scope: Rc::new(Scope {
                bindings: RefCell::new(HashMap::new()),
                parent: None,
            }),
        }
    }

    /// A new empty scope whose lookups fall back to `self`.
    pub fn child(&self) -> Self {
        Environment {
            scope: Rc::new(Scope {
                bindings: RefCell::new(HashMap::new()),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Bind `name` in this scope, shadowing any binding in a parent. Never touches parents.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.scope.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Look `name` up in this scope, then each parent outward.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut env = self;
        loop {
            if let Some(value) = env.scope.bindings.borrow().get(name) {
                return Some(value.clone());
            }
            env = env.scope.parent.as_ref()?;
        }
    }

    /// Like [`get`](Self::get), but an unbound name is an error.
    pub fn find(&self, name: &str) -> Result<Value, Error> {
        self.get(name)
            .ok_or_else(|| Error::UnboundVariable(name.to_owned()))
    }

    /// True if `name` is bound in this scope itself, ignoring parents.
    pub fn is_defined_locally(&self, name: &str) -> bool {
        self.scope.bindings.borrow().contains_key(name)
    }

    pub fn parent(&self) -> Option<&Environment> {
        self.scope.parent.as_ref()
    }

    /// True if both handles refer to the same scope.
    pub fn ptr_eq(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.scope, &other.scope)
    }

    /// Get all bindings in this environment and its parents
    /// Returns a Vec of (name, value) pairs sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings = HashMap::new();

        // Start with parent bindings (so they can be overridden by local bindings)
        if let Some(parent) = &self.scope.parent {
            bindings.extend(parent.get_all_bindings());
        }

        for (name, value) in self.scope.bindings.borrow().iter() {
            bindings.insert(name.clone(), value.clone());
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Bind a native function under its own name.
    pub fn register_native(&self, native: NativeFn) {
        tracing::debug!(
            name = native.name(),
            arity = %native.signature().arity(),
            "registering native function"
        );
        self.define(native.name().to_owned(), Value::Native(Rc::new(native)));
    }

    /// Register a strongly-typed Rust function using automatic argument extraction and
    /// result conversion.
    ///
    /// ```
    /// use lispcore::{create_global_env, eval, read_str};
    ///
    /// fn safe_div(a: i64, b: i64) -> Result<i64, &'static str> {
    ///     if b == 0 { Err("division by zero") } else { Ok(a / b) }
    /// }
    ///
    /// let env = create_global_env();
    /// env.register_builtin_operation::<_, (i64, i64), i64>("safe-div", safe_div);
    ///
    /// let ok = eval(&read_str("(safe-div 6 3)").unwrap(), &env).unwrap();
    /// assert_eq!(ok, 2.into());
    /// let err = eval(&read_str("(safe-div 1 0)").unwrap(), &env).unwrap_err();
    /// assert!(err.to_string().contains("safe-div: division by zero"));
    /// ```
    ///
    /// Supported parameter types:
    /// - `i64`, `f64` (floats only), [`Number`](crate::builtinops::Number) (either kind)
    /// - `bool`, `char`, `String`, `&str`
    /// - `Value` (owned access to the raw argument)
    /// - `ValueIter<'_>`, `NumIter<'_>`, `IntIter<'_>`, `BoolIter<'_>`, `StringIter<'_>`
    ///   (iterate over the elements of a list or vector argument)
    ///
    /// Supported return types:
    /// - any type `R` where `R: Into<Value>`: `Value`, `i64`, `f64`, `bool`, `String`,
    ///   `()` (nil), `Option<T>`, `Vec<T>` and tuples (lists)
    /// - `Result<R, E>` where `E:` [`IntoError`](crate::native::IntoError)
    ///
    /// Arity and argument types are checked against the Rust signature on every call.
    /// An `Err` returned by the function surfaces as [`Error::HostError`] prefixed with
    /// `name`.
    pub fn register_builtin_operation<F, Args, R>(&self, name: &str, func: F)
    where
        F: IntoOperation<Args, R> + 'static,
    {
        self.register_native(NativeFn::new(name, func));
    }

    /// Register a function whose last parameter collects the remaining arguments.
    ///
    /// The rest parameter is one of the iterator types from
    /// [`intooperation`](crate::evaluator::intooperation), optionally after a fixed
    /// prefix of ordinary parameters:
    /// - rest of all arguments as values: `fn(ValueIter<'_>) -> R`
    /// - numeric tail: `fn(NumIter<'_>) -> R`
    /// - fixed prefix plus string tail: `fn(i64, StringIter<'_>) -> R`
    ///
    /// The function accepts at least as many arguments as its fixed prefix, and every
    /// trailing argument must match the rest element type.
    pub fn register_variadic_builtin_operation<F, Args, R>(&self, name: &str, func: F)
    where
        F: IntoVariadicOperation<Args, R> + 'static,
    {
        self.register_native(NativeFn::variadic(name, func));
    }

    /// Register a function over raw values, checked against an explicit signature.
    ///
    /// This is the low-level API; prefer the typed registrations for new code.
    pub fn register_builtin_function(
        &self,
        name: &str,
        signature: Signature,
        func: fn(&[Value]) -> Result<Value, Error>,
    ) {
        self.register_native(NativeFn::from_raw(name, signature, func));
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only names are shown: bound procedures may refer back to this scope.
        let mut names: Vec<String> = self.scope.bindings.borrow().keys().cloned().collect();
        names.sort();
        f.debug_struct("Environment")
            .field("bindings", &names)
            .field("parent", &self.scope.parent)
            .finish()
    }
}
