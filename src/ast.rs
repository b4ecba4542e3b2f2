//! This module defines the core value type of the interpreter. [`Value`] covers every Mal
//! datum: `nil`, booleans, integers, symbols, keywords, strings, lists, vectors, hash-maps,
//! atoms, user-defined functions (closures and macros) and builtin functions. Collections
//! are reference counted so that evaluating and passing values around is cheap; attaching
//! metadata always produces a shallow copy and never mutates a shared value.
//!
//! Ergonomic helpers such as [`val`], [`sym`] and [`nil`] are provided for building values
//! in tests, and conversion traits cover common Rust types.

use crate::Error;
use crate::evaluator::Environment;
use crate::evaluator::intooperation::OperationFn;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;

/// Type alias for number values in interpreter
pub type NumberType = i64;

/// Hash-map storage (see [`Value::to_map_key`])
pub type Map = IndexMap<MapKey, Value>;

/// Optional metadata attached to collections and functions
pub type Meta = Option<Rc<Value>>;

/// A hash-map key. Strings and keywords with the same name are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    String(String),
    Keyword(String),
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        MapKey::String(s.to_owned())
    }
}

/// A user-defined function created by `fn*`.
///
/// Lambdas are immutable: turning one into a macro or attaching metadata builds a new
/// `Lambda` sharing the same parameters, body and captured environment.
#[derive(Clone)]
pub struct Lambda {
    pub params: Rc<[String]>,
    pub body: Value,
    pub env: Environment,
    pub is_macro: bool,
    pub meta: Meta,
}

impl Lambda {
    pub(crate) fn to_macro(&self) -> Lambda {
        Lambda {
            is_macro: true,
            ..self.clone()
        }
    }

    /// Create the call frame for an invocation: a child of the captured environment
    /// binding the parameters to `args`.
    pub(crate) fn bind_arguments(&self, args: Vec<Value>) -> Result<Environment, Error> {
        Environment::with_bindings(Some(&self.env), &self.params, args)
    }
}

/// Core value type in interpreter
///
/// To build values in tests, use the helper functions:
/// - `val(42)`, `val("text")`, `val(true)` for scalars
/// - `val([1, 2, 3])` for homogeneous lists, `val(vec![sym("op"), val(42)])` for mixed ones
/// - `sym("name")`, `kw("name")`, `nil()`
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    /// Numbers (integers only)
    Number(NumberType),
    Symbol(String),
    /// Keyword name, without the leading colon
    Keyword(String),
    String(String),
    List(Rc<Vec<Value>>, Meta),
    Vector(Rc<Vec<Value>>, Meta),
    HashMap(Rc<Map>, Meta),
    /// Mutable reference cell
    Atom(Rc<RefCell<Value>>),
    /// User-defined functions and macros
    Function(Rc<Lambda>),
    /// Host functions. Uses id string for equality comparison instead of function pointer
    BuiltinFunction {
        id: Rc<str>,
        func: Rc<OperationFn>,
        meta: Meta,
    },
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(items), None)
    }

    pub fn vector(items: Vec<Value>) -> Self {
        Value::Vector(Rc::new(items), None)
    }

    pub fn hash_map(map: Map) -> Self {
        Value::HashMap(Rc::new(map), None)
    }

    pub fn atom(value: Value) -> Self {
        Value::Atom(Rc::new(RefCell::new(value)))
    }

    pub fn symbol(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }

    pub fn builtin(id: &str, func: Rc<OperationFn>) -> Self {
        Value::BuiltinFunction {
            id: Rc::from(id),
            func,
            meta: None,
        }
    }

    /// Only `nil` and `false` are falsy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Elements of a list or vector, with `nil` standing in for the empty sequence
    pub fn as_sequence(&self) -> Result<&[Value], Error> {
        match self {
            Value::List(items, _) | Value::Vector(items, _) => Ok(items.as_slice()),
            Value::Nil => Ok(&[]),
            other => Err(Error::TypeError(format!(
                "expected list or vector, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::BuiltinFunction { .. })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Symbol(_) => "symbol",
            Value::Keyword(_) => "keyword",
            Value::String(_) => "string",
            Value::List(..) => "list",
            Value::Vector(..) => "vector",
            Value::HashMap(..) => "hash-map",
            Value::Atom(_) => "atom",
            Value::Function(lambda) if lambda.is_macro => "macro",
            Value::Function(_) => "function",
            Value::BuiltinFunction { .. } => "builtin-function",
        }
    }

    /// Convert a string or keyword into a hash-map key.
    pub fn to_map_key(&self) -> Result<MapKey, Error> {
        match self {
            Value::String(s) => Ok(MapKey::String(s.clone())),
            Value::Keyword(k) => Ok(MapKey::Keyword(k.clone())),
            other => Err(Error::TypeError(format!(
                "hash-map keys must be strings or keywords, got {}",
                other.type_name()
            ))),
        }
    }

    /// Inverse of [`Value::to_map_key`]
    pub fn from_map_key(key: &MapKey) -> Value {
        match key {
            MapKey::String(s) => Value::String(s.clone()),
            MapKey::Keyword(k) => Value::Keyword(k.clone()),
        }
    }

    pub fn meta(&self) -> Result<Value, Error> {
        let meta = match self {
            Value::List(_, meta) | Value::Vector(_, meta) | Value::HashMap(_, meta) => meta,
            Value::Function(lambda) => &lambda.meta,
            Value::BuiltinFunction { meta, .. } => meta,
            other => {
                return Err(Error::TypeError(format!(
                    "meta not supported on {}",
                    other.type_name()
                )));
            }
        };
        Ok(meta.as_deref().cloned().unwrap_or(Value::Nil))
    }

    /// Shallow copy of `self` carrying `meta`; the original is left untouched
    pub fn with_meta(&self, meta: Value) -> Result<Value, Error> {
        let meta = Some(Rc::new(meta));
        Ok(match self {
            Value::List(items, _) => Value::List(Rc::clone(items), meta),
            Value::Vector(items, _) => Value::Vector(Rc::clone(items), meta),
            Value::HashMap(map, _) => Value::HashMap(Rc::clone(map), meta),
            Value::Function(lambda) => Value::Function(Rc::new(Lambda {
                meta,
                ..Lambda::clone(lambda)
            })),
            Value::BuiltinFunction { id, func, .. } => Value::BuiltinFunction {
                id: Rc::clone(id),
                func: Rc::clone(func),
                meta,
            },
            other => {
                return Err(Error::TypeError(format!(
                    "with-meta not supported on {}",
                    other.type_name()
                )));
            }
        })
    }
}

thread_local! {
    static OPEN_ATOMS: RefCell<Vec<*const RefCell<Value>>> = const { RefCell::new(Vec::new()) };
}

/// Marks an atom's contents as being formatted for as long as it is alive.
///
/// An atom can hold itself, directly or through a collection, so formatting code enters
/// each atom through this guard and prints a placeholder when it is already open.
pub(crate) struct OpenAtom(*const RefCell<Value>);

impl OpenAtom {
    /// `None` when `cell` is already being formatted further up the stack
    pub(crate) fn enter(cell: &Rc<RefCell<Value>>) -> Option<Self> {
        let ptr = Rc::as_ptr(cell);
        OPEN_ATOMS.with_borrow_mut(|open| {
            if open.contains(&ptr) {
                None
            } else {
                open.push(ptr);
                Some(OpenAtom(ptr))
            }
        })
    }
}

impl Drop for OpenAtom {
    fn drop(&mut self) {
        OPEN_ATOMS.with_borrow_mut(|open| {
            if let Some(pos) = open.iter().rposition(|ptr| *ptr == self.0) {
                open.remove(pos);
            }
        });
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn write_items(
            f: &mut std::fmt::Formatter<'_>,
            name: &str,
            items: &[Value],
        ) -> std::fmt::Result {
            write!(f, "{name}(")?;
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{v:?}")?;
            }
            write!(f, ")")
        }

        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::Keyword(k) => write!(f, "Keyword({k})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::List(items, _) => write_items(f, "List", items),
            Value::Vector(items, _) => write_items(f, "Vector", items),
            Value::HashMap(map, _) => {
                write!(f, "HashMap(")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?} => {v:?}", Value::from_map_key(k))?;
                }
                write!(f, ")")
            }
            Value::Atom(cell) => match OpenAtom::enter(cell) {
                Some(_open) => write!(f, "Atom({:?})", cell.borrow()),
                None => write!(f, "Atom(..)"),
            },
            Value::Function(lambda) => write!(
                f,
                "Function(params={:?}, body={:?}, macro={})",
                lambda.params, lambda.body, lambda.is_macro
            ),
            Value::BuiltinFunction { id, .. } => write!(f, "BuiltinFunction({id})"),
        }
    }
}

/// Values display in their readable printed form
impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        crate::printer::write_value(f, self, true)
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

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(option: Option<T>) -> Self {
        option.map_or(Value::Nil, Into::into)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Number(n as NumberType)
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(NumberType); // Special case - no casting
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(slice: &[T]) -> Self {
        Value::list(slice.iter().cloned().map(Into::into).collect())
    }
}

// Fallible conversions from `Value` back into primitive Rust types.

impl std::convert::TryInto<NumberType> for Value {
    type Error = Error;

    fn try_into(self) -> Result<NumberType, Error> {
        if let Value::Number(n) = self {
            Ok(n)
        } else {
            Err(Error::TypeError(format!(
                "expected number, got {}",
                self.type_name()
            )))
        }
    }
}

/// Helper function for creating symbols
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper function for creating keywords, given the name without its colon
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn kw<S: AsRef<str>>(name: S) -> Value {
    Value::Keyword(name.as_ref().to_owned())
}

/// Helper function for creating Values - works great in mixed lists!
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn nil() -> Value {
    Value::Nil
}

/// Helper function for creating vectors from anything convertible to values
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn vector<T: Into<Value>, I: IntoIterator<Item = T>>(items: I) -> Value {
    Value::vector(items.into_iter().map(Into::into).collect())
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            // Lists and vectors are interchangeable for equality
            (
                Value::List(a, _) | Value::Vector(a, _),
                Value::List(b, _) | Value::Vector(b, _),
            ) => a == b,
            // IndexMap equality ignores insertion order
            (Value::HashMap(a, _), Value::HashMap(b, _)) => a == b,
            (Value::Atom(a), Value::Atom(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::BuiltinFunction { id: id1, .. }, Value::BuiltinFunction { id: id2, .. }) => {
                id1 == id2
            }
            _ => false,
        }
    }
}
