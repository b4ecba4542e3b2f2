//! Typed builtin adapters.
//!
//! Builtins are written as ordinary Rust functions over typed parameters, e.g.
//! `fn nth(seq: ValueIter<'_>, index: i64) -> Result<Value, Error>`. The traits here turn
//! such a function into the erased [`OperationFn`] stored in `Value::BuiltinFunction`:
//! each argument slot is converted through [`Param`], a trailing rest parameter through
//! [`Rest`], and the return value is normalized through [`IntoReturn`].
//!
//! Type errors raised during conversion name the 1-based position of the offending
//! argument. Registration itself goes through `Environment` or the table in
//! `builtinops.rs`.

use crate::ast::{NumberType, Value};
use crate::{Arity, Error};
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::rc::Rc;

/// Erased builtin signature used by the evaluator.
///
/// Builtins own their argument vector. Values are `Rc`-based, so builtins are neither
/// `Send` nor `Sync`.
pub type OperationFn = dyn Fn(Vec<Value>) -> Result<Value, Error>;

fn expected(what: &str, got: &Value) -> Error {
    Error::TypeError(format!("expected {what}, got {}", got.type_name()))
}

fn at_position(err: Error, position: usize) -> Error {
    match err {
        Error::TypeError(message) => Error::TypeError(format!("{message} (argument {position})")),
        other => other,
    }
}

/// A type a builtin may declare for one argument slot.
///
/// `Output<'a>` is what the builtin actually receives; it may borrow from the argument
/// slot (`&str`, sequence views) or take the value out of it.
pub trait Param {
    type Output<'a>;

    fn extract(arg: &mut Value) -> Result<Self::Output<'_>, Error>;
}

impl Param for Value {
    type Output<'a> = Value;

    fn extract(arg: &mut Value) -> Result<Value, Error> {
        Ok(std::mem::replace(arg, Value::Nil))
    }
}

impl Param for NumberType {
    type Output<'a> = NumberType;

    fn extract(arg: &mut Value) -> Result<NumberType, Error> {
        std::mem::replace(arg, Value::Nil).try_into()
    }
}

impl Param for &str {
    type Output<'a> = &'a str;

    fn extract(arg: &mut Value) -> Result<&str, Error> {
        match arg {
            Value::String(s) => Ok(s.as_str()),
            other => Err(expected("string", other)),
        }
    }
}

// A single list, vector or nil argument viewed as a sequence
impl<K: Element> Param for Seq<'static, K> {
    type Output<'a> = Seq<'a, K>;

    fn extract(arg: &mut Value) -> Result<Seq<'_, K>, Error> {
        Seq::check(arg.as_sequence()?).map_err(|(_, err)| err)
    }
}

/// How [`Seq`] views each element
#[doc(hidden)]
pub trait Element {
    type Item<'a>;

    /// Element type name used in error messages
    const EXPECTED: &'static str;

    fn view(value: &Value) -> Option<Self::Item<'_>>;
}

#[doc(hidden)]
pub struct AnyValue;

impl Element for AnyValue {
    type Item<'a> = &'a Value;

    const EXPECTED: &'static str = "value";

    fn view(value: &Value) -> Option<&Value> {
        Some(value)
    }
}

#[doc(hidden)]
pub struct Integer;

impl Element for Integer {
    type Item<'a> = NumberType;

    const EXPECTED: &'static str = "number";

    fn view(value: &Value) -> Option<NumberType> {
        match value {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Borrowed view over a run of values whose elements were all checked on construction.
///
/// Used both for sequence arguments and for the rest arguments of variadic builtins.
pub struct Seq<'a, K> {
    items: std::slice::Iter<'a, Value>,
    kind: PhantomData<K>,
}

impl<'a, K: Element> Seq<'a, K> {
    /// Fails with the offset of the first element `K` does not accept
    fn check(items: &'a [Value]) -> Result<Self, (usize, Error)> {
        match items.iter().position(|item| K::view(item).is_none()) {
            Some(offset) => Err((offset, expected(K::EXPECTED, &items[offset]))),
            None => Ok(Seq {
                items: items.iter(),
                kind: PhantomData,
            }),
        }
    }

    /// The elements not yet consumed, as raw values
    pub fn as_slice(&self) -> &'a [Value] {
        self.items.as_slice()
    }
}

impl<'a, K: Element> Iterator for Seq<'a, K> {
    type Item = K::Item<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.items.next().and_then(K::view)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl<K: Element> ExactSizeIterator for Seq<'_, K> {}
impl<K: Element> FusedIterator for Seq<'_, K> {}

/// Any value, borrowed
pub type ValueIter<'a> = Seq<'a, AnyValue>;

/// Integers only
pub type NumIter<'a> = Seq<'a, Integer>;

/// The trailing parameter of a variadic builtin, built from every remaining argument
pub trait Rest {
    type Output<'a>;

    /// `first_position` is the argument position of `args[0]`
    fn from_rest_args(args: &[Value], first_position: usize) -> Result<Self::Output<'_>, Error>;
}

impl<K: Element> Rest for Seq<'static, K> {
    type Output<'a> = Seq<'a, K>;

    fn from_rest_args(args: &[Value], first_position: usize) -> Result<Seq<'_, K>, Error> {
        Seq::check(args).map_err(|(offset, err)| at_position(err, first_position + offset))
    }
}

/// Normalizes builtin return types to `Result<Value, Error>`
pub trait IntoReturn {
    fn into_return(self) -> Result<Value, Error>;
}

impl<T: Into<Value>> IntoReturn for Result<T, Error> {
    fn into_return(self) -> Result<Value, Error> {
        self.map(Into::into)
    }
}

impl<T: Into<Value>> IntoReturn for T {
    fn into_return(self) -> Result<Value, Error> {
        Ok(self.into())
    }
}

/// A Rust function with one [`Param`] per argument. `Args` is the tuple of parameter types.
pub trait IntoOperation<Args> {
    fn into_operation(self) -> Rc<OperationFn>;
}

/// A Rust function whose last parameter is a [`Rest`], after zero to three [`Param`]s
pub trait IntoVariadicOperation<Args> {
    fn into_variadic_operation(self) -> Rc<OperationFn>;
}

impl<Func, Ret> IntoOperation<()> for Func
where
    Func: Fn() -> Ret + 'static,
    Ret: IntoReturn,
{
    fn into_operation(self) -> Rc<OperationFn> {
        Rc::new(move |args: Vec<Value>| {
            Arity::Exact(0).validate(args.len())?;
            (self)().into_return()
        })
    }
}

impl<Func, Ret, Tail> IntoVariadicOperation<(Tail,)> for Func
where
    Tail: Rest,
    Func: for<'a> Fn(<Tail as Rest>::Output<'a>) -> Ret + 'static,
    Ret: IntoReturn,
{
    fn into_variadic_operation(self) -> Rc<OperationFn> {
        Rc::new(move |args: Vec<Value>| {
            let tail = <Tail as Rest>::from_rest_args(&args, 1)?;
            (self)(tail).into_return()
        })
    }
}

/// Fixed and variadic adapters for `$count` leading parameters. The argument
/// vector is split into disjoint slots so each parameter may borrow its own.
macro_rules! impl_adapters {
    ($count:literal; $( $slot:ident : $P:ident @ $position:literal ),+) => {
        impl<Func, Ret, $( $P ),+> IntoOperation<( $( $P, )+ )> for Func
        where
            $( $P: Param, )+
            Func: for<'a> Fn( $( <$P as Param>::Output<'a> ),+ ) -> Ret + 'static,
            Ret: IntoReturn,
        {
            fn into_operation(self) -> Rc<OperationFn> {
                Rc::new(move |mut args: Vec<Value>| {
                    let got = args.len();
                    let [ $( $slot ),+ ] = args.as_mut_slice() else {
                        return Err(Error::arity_error(Arity::Exact($count), got));
                    };
                    $(
                        let $slot = <$P as Param>::extract($slot)
                            .map_err(|err| at_position(err, $position))?;
                    )+
                    (self)( $( $slot ),+ ).into_return()
                })
            }
        }

        impl<Func, Ret, Tail, $( $P ),+> IntoVariadicOperation<( $( $P, )+ Tail, )> for Func
        where
            $( $P: Param, )+
            Tail: Rest,
            Func: for<'a> Fn( $( <$P as Param>::Output<'a>, )+ <Tail as Rest>::Output<'a> ) -> Ret
                + 'static,
            Ret: IntoReturn,
        {
            fn into_variadic_operation(self) -> Rc<OperationFn> {
                Rc::new(move |mut args: Vec<Value>| {
                    let got = args.len();
                    let [ $( $slot, )+ tail @ .. ] = args.as_mut_slice() else {
                        return Err(Error::arity_error(Arity::AtLeast($count), got));
                    };
                    $(
                        let $slot = <$P as Param>::extract($slot)
                            .map_err(|err| at_position(err, $position))?;
                    )+
                    let tail = <Tail as Rest>::from_rest_args(tail, $count + 1)?;
                    (self)( $( $slot, )+ tail ).into_return()
                })
            }
        }
    };
}

impl_adapters!(1; a0: P0 @ 1);
impl_adapters!(2; a0: P0 @ 1, a1: P1 @ 2);
impl_adapters!(3; a0: P0 @ 1, a1: P1 @ 2, a2: P2 @ 3);
