//! Built-in function registry.
//!
//! Every builtin is an ordinary Rust function with a typed signature; the adapter
//! layer in [`crate::evaluator::intooperation`] converts arguments and checks
//! arity before the function runs. The table is rebuilt for each global
//! environment because values are `Rc`-based and cannot live in a shared static.
//!
//! ## Conventions
//!
//! - Arithmetic is on 64-bit integers and reports overflow instead of wrapping.
//! - `nil` is accepted wherever a sequence is expected and behaves as `()`.
//! - Hash-map keys must be strings or keywords.
//! - Functions taking callbacks (`apply`, `map`, `swap!`) call back into the
//!   evaluator through [`crate::evaluator::apply`].
//!
//! Special forms are handled directly by the evaluator and are not in this registry.

use crate::ast::{Map, NumberType, Value};
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};
use crate::evaluator::{NumIter, ValueIter, apply};
use crate::printer::pr_str;
use crate::reader::read_str;
use crate::{Arity, Error};
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Definition of a built-in operation
#[derive(Clone)]
pub struct BuiltinOp {
    /// The Mal identifier for this operation
    pub id: &'static str,
    pub func: Rc<OperationFn>,
    /// Expected number of arguments
    pub arity: Arity,
}

impl std::fmt::Debug for BuiltinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BuiltinOp({}, {:?})", self.id, self.arity)
    }
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

fn type_error(op: &str, expected: &str, got: &Value) -> Error {
    Error::TypeError(format!(
        "'{op}' expected {expected}, got {}",
        got.type_name()
    ))
}

//
// Builtin Function Implementations
//

// Macro to generate numeric comparison functions
macro_rules! numeric_comparison {
    ($name:ident, $op:tt) => {
        fn $name(first: NumberType, rest: NumIter<'_>) -> bool {
            // All adjacent pairs must satisfy the comparison
            let mut prev = first;
            for current in rest {
                if !(prev $op current) {
                    return false;
                }
                prev = current;
            }
            true
        }
    };
}

numeric_comparison!(builtin_lt, <);
numeric_comparison!(builtin_gt, >);
numeric_comparison!(builtin_le, <=);
numeric_comparison!(builtin_ge, >=);

fn overflow(operation: &str) -> Error {
    Error::EvalError(format!("Integer overflow in {operation}"))
}

fn builtin_add(args: NumIter<'_>) -> Result<NumberType, Error> {
    let mut sum: NumberType = 0;
    for arg in args {
        sum = sum.checked_add(arg).ok_or_else(|| overflow("addition"))?;
    }
    Ok(sum)
}

fn builtin_sub(first: NumberType, rest: NumIter<'_>) -> Result<NumberType, Error> {
    let mut iter = rest.peekable();

    if iter.peek().is_none() {
        return first.checked_neg().ok_or_else(|| overflow("negation"));
    }

    let mut result = first;
    for n in iter {
        result = result.checked_sub(n).ok_or_else(|| overflow("subtraction"))?;
    }
    Ok(result)
}

fn builtin_mul(first: NumberType, rest: NumIter<'_>) -> Result<NumberType, Error> {
    let mut product = first;
    for n in rest {
        product = product
            .checked_mul(n)
            .ok_or_else(|| overflow("multiplication"))?;
    }
    Ok(product)
}

fn builtin_div(first: NumberType, rest: NumIter<'_>) -> Result<NumberType, Error> {
    let mut quotient = first;
    for n in rest {
        if n == 0 {
            return Err(Error::EvalError("Division by zero".into()));
        }
        quotient = quotient.checked_div(n).ok_or_else(|| overflow("division"))?;
    }
    Ok(quotient)
}

fn builtin_equal(first: Value, rest: ValueIter<'_>) -> bool {
    let mut prev = &first;
    for current in rest {
        if prev != current {
            return false;
        }
        prev = current;
    }
    true
}

fn join_printed(args: ValueIter<'_>, readably: bool, separator: &str) -> String {
    args.map(|value| pr_str(value, readably))
        .collect::<Vec<_>>()
        .join(separator)
}

fn builtin_pr_str(args: ValueIter<'_>) -> String {
    join_printed(args, true, " ")
}

fn builtin_str(args: ValueIter<'_>) -> String {
    join_printed(args, false, "")
}

fn builtin_prn(args: ValueIter<'_>) -> Value {
    println!("{}", join_printed(args, true, " "));
    Value::Nil
}

fn builtin_println(args: ValueIter<'_>) -> Value {
    println!("{}", join_printed(args, false, " "));
    Value::Nil
}

fn builtin_list(args: ValueIter<'_>) -> Value {
    Value::list(args.cloned().collect())
}

fn builtin_vector(args: ValueIter<'_>) -> Value {
    Value::vector(args.cloned().collect())
}

fn insert_pairs(map: &mut Map, pairs: &[Value]) -> Result<(), Error> {
    if pairs.len() % 2 != 0 {
        return Err(Error::odd_hash_map());
    }
    for pair in pairs.chunks_exact(2) {
        map.insert(pair[0].to_map_key()?, pair[1].clone());
    }
    Ok(())
}

fn builtin_hash_map(args: ValueIter<'_>) -> Result<Value, Error> {
    let mut map = Map::new();
    insert_pairs(&mut map, args.as_slice())?;
    Ok(Value::hash_map(map))
}

fn builtin_is_list(value: Value) -> bool {
    matches!(value, Value::List(..))
}

fn builtin_is_vector(value: Value) -> bool {
    matches!(value, Value::Vector(..))
}

fn builtin_is_map(value: Value) -> bool {
    matches!(value, Value::HashMap(..))
}

fn builtin_is_sequential(value: Value) -> bool {
    matches!(value, Value::List(..) | Value::Vector(..))
}

fn builtin_is_empty(value: Value) -> Result<bool, Error> {
    match &value {
        Value::Nil => Ok(true),
        Value::List(items, _) | Value::Vector(items, _) => Ok(items.is_empty()),
        Value::HashMap(map, _) => Ok(map.is_empty()),
        Value::String(s) => Ok(s.is_empty()),
        other => Err(type_error("empty?", "a collection or string", other)),
    }
}

fn builtin_count(value: Value) -> Result<NumberType, Error> {
    let count = match &value {
        Value::Nil => 0,
        Value::List(items, _) | Value::Vector(items, _) => items.len(),
        Value::HashMap(map, _) => map.len(),
        Value::String(s) => s.chars().count(),
        other => return Err(type_error("count", "a collection or string", other)),
    };
    Ok(count as NumberType)
}

fn builtin_cons(first: Value, rest: ValueIter<'_>) -> Value {
    let mut items = Vec::with_capacity(rest.len() + 1);
    items.push(first);
    items.extend(rest.cloned());
    Value::list(items)
}

fn builtin_concat(seqs: ValueIter<'_>) -> Result<Value, Error> {
    let mut items = Vec::new();
    for seq in seqs {
        items.extend_from_slice(seq.as_sequence()?);
    }
    Ok(Value::list(items))
}

fn builtin_vec(seq: ValueIter<'_>) -> Value {
    Value::vector(seq.cloned().collect())
}

fn builtin_nth(seq: ValueIter<'_>, index: NumberType) -> Result<Value, Error> {
    let items = seq.as_slice();
    usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i))
        .cloned()
        .ok_or(Error::IndexOutOfRange {
            index,
            length: items.len(),
        })
}

fn builtin_first(mut seq: ValueIter<'_>) -> Value {
    seq.next().cloned().unwrap_or(Value::Nil)
}

fn builtin_rest(seq: ValueIter<'_>) -> Value {
    Value::list(seq.skip(1).cloned().collect())
}

/// `(apply f a b [c d])` calls `(f a b c d)`
fn builtin_apply(f: Value, args: ValueIter<'_>) -> Result<Value, Error> {
    let Some((last, init)) = args.as_slice().split_last() else {
        return Err(Error::arity_error(Arity::AtLeast(2), 1));
    };
    let mut call_args = init.to_vec();
    call_args.extend_from_slice(last.as_sequence()?);
    apply(&f, call_args)
}

fn builtin_map(f: Value, seq: ValueIter<'_>) -> Result<Value, Error> {
    if !f.is_callable() {
        return Err(type_error("map", "a function", &f));
    }
    seq.map(|item| apply(&f, vec![item.clone()]))
        .collect::<Result<Vec<_>, Error>>()
        .map(Value::list)
}

/// Lists grow at the front, vectors at the back
fn builtin_conj(coll: Value, items: ValueIter<'_>) -> Result<Value, Error> {
    match coll {
        Value::List(list, _) => {
            let mut result: Vec<Value> = items.as_slice().iter().rev().cloned().collect();
            result.extend(list.iter().cloned());
            Ok(Value::list(result))
        }
        Value::Nil => Ok(Value::list(items.as_slice().iter().rev().cloned().collect())),
        Value::Vector(vector, _) => {
            let mut result = Rc::unwrap_or_clone(vector);
            result.extend(items.cloned());
            Ok(Value::vector(result))
        }
        other => Err(type_error("conj", "a list or vector", &other)),
    }
}

fn builtin_seq(value: Value) -> Result<Value, Error> {
    match &value {
        Value::Nil => Ok(Value::Nil),
        Value::List(items, _) | Value::Vector(items, _) if items.is_empty() => Ok(Value::Nil),
        Value::List(items, _) | Value::Vector(items, _) => Ok(Value::List(Rc::clone(items), None)),
        Value::String(s) if s.is_empty() => Ok(Value::Nil),
        Value::String(s) => Ok(Value::list(
            s.chars().map(|c| Value::String(c.to_string())).collect(),
        )),
        other => Err(type_error("seq", "a sequence or string", other)),
    }
}

fn builtin_symbol(name: &str) -> Value {
    Value::symbol(name)
}

fn builtin_is_symbol(value: Value) -> bool {
    matches!(value, Value::Symbol(_))
}

fn builtin_keyword(value: Value) -> Result<Value, Error> {
    match value {
        Value::String(name) => Ok(Value::Keyword(name)),
        keyword @ Value::Keyword(_) => Ok(keyword),
        other => Err(type_error("keyword", "a string or keyword", &other)),
    }
}

fn builtin_is_keyword(value: Value) -> bool {
    matches!(value, Value::Keyword(_))
}

fn builtin_assoc(map: Value, pairs: ValueIter<'_>) -> Result<Value, Error> {
    let Value::HashMap(map, meta) = map else {
        return Err(type_error("assoc", "a hash-map", &map));
    };
    let mut map = Rc::unwrap_or_clone(map);
    insert_pairs(&mut map, pairs.as_slice())?;
    Ok(Value::HashMap(Rc::new(map), meta))
}

fn builtin_dissoc(map: Value, keys: ValueIter<'_>) -> Result<Value, Error> {
    let Value::HashMap(map, meta) = map else {
        return Err(type_error("dissoc", "a hash-map", &map));
    };
    let mut map = Rc::unwrap_or_clone(map);
    for key in keys {
        map.shift_remove(&key.to_map_key()?);
    }
    Ok(Value::HashMap(Rc::new(map), meta))
}

fn builtin_get(map: Value, key: Value) -> Result<Value, Error> {
    match &map {
        Value::Nil => Ok(Value::Nil),
        Value::HashMap(map, _) => Ok(map.get(&key.to_map_key()?).cloned().unwrap_or(Value::Nil)),
        other => Err(type_error("get", "a hash-map", other)),
    }
}

fn builtin_contains(map: Value, key: Value) -> Result<bool, Error> {
    match &map {
        Value::Nil => Ok(false),
        Value::HashMap(map, _) => Ok(map.contains_key(&key.to_map_key()?)),
        other => Err(type_error("contains?", "a hash-map", other)),
    }
}

fn builtin_keys(map: Value) -> Result<Value, Error> {
    match &map {
        Value::HashMap(map, _) => Ok(Value::list(
            map.keys().map(Value::from_map_key).collect(),
        )),
        other => Err(type_error("keys", "a hash-map", other)),
    }
}

fn builtin_vals(map: Value) -> Result<Value, Error> {
    match &map {
        Value::HashMap(map, _) => Ok(Value::list(map.values().cloned().collect())),
        other => Err(type_error("vals", "a hash-map", other)),
    }
}

fn builtin_atom(value: Value) -> Value {
    Value::atom(value)
}

fn builtin_is_atom(value: Value) -> bool {
    matches!(value, Value::Atom(_))
}

fn builtin_deref(atom: Value) -> Result<Value, Error> {
    match &atom {
        Value::Atom(cell) => Ok(cell.borrow().clone()),
        other => Err(type_error("deref", "an atom", other)),
    }
}

fn builtin_reset(atom: Value, value: Value) -> Result<Value, Error> {
    let Value::Atom(cell) = &atom else {
        return Err(type_error("reset!", "an atom", &atom));
    };
    cell.replace(value.clone());
    Ok(value)
}

/// `(swap! a f x y)` sets `a` to `(f @a x y)`
fn builtin_swap(atom: Value, f: Value, args: ValueIter<'_>) -> Result<Value, Error> {
    let Value::Atom(cell) = &atom else {
        return Err(type_error("swap!", "an atom", &atom));
    };
    let mut call_args = Vec::with_capacity(args.len() + 1);
    // The cell is not borrowed while `f` runs, so `f` may read the atom itself
    call_args.push(cell.borrow().clone());
    call_args.extend(args.cloned());

    let new_value = apply(&f, call_args)?;
    cell.replace(new_value.clone());
    Ok(new_value)
}

fn builtin_meta(value: Value) -> Result<Value, Error> {
    value.meta()
}

fn builtin_with_meta(value: Value, meta: Value) -> Result<Value, Error> {
    value.with_meta(meta)
}

fn builtin_is_nil(value: Value) -> bool {
    value.is_nil()
}

fn builtin_is_true(value: Value) -> bool {
    matches!(value, Value::Bool(true))
}

fn builtin_is_false(value: Value) -> bool {
    matches!(value, Value::Bool(false))
}

fn builtin_is_string(value: Value) -> bool {
    matches!(value, Value::String(_))
}

fn builtin_is_number(value: Value) -> bool {
    matches!(value, Value::Number(_))
}

fn builtin_is_fn(value: Value) -> bool {
    match value {
        Value::Function(lambda) => !lambda.is_macro,
        Value::BuiltinFunction { .. } => true,
        _ => false,
    }
}

fn builtin_is_macro(value: Value) -> bool {
    matches!(value, Value::Function(lambda) if lambda.is_macro)
}

fn builtin_throw(value: Value) -> Result<Value, Error> {
    Err(Error::Thrown(value))
}

fn builtin_read_string(source: &str) -> Result<Option<Value>, Error> {
    read_str(source)
}

fn builtin_slurp(path: &str) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|e| Error::Io(format!("{path}: {e}")))
}

fn builtin_time_ms() -> Result<NumberType, Error> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::EvalError(format!("time-ms: {e}")))?;
    NumberType::try_from(elapsed.as_millis()).map_err(|_| overflow("time-ms"))
}

fn builtin_readline(prompt: &str) -> Result<Option<String>, Error> {
    crate::readline::read_line(prompt)
}

/// All built-in operations, in registration order.
///
/// The builtin implementations above are wired through the same adapter layer
/// used for custom builtin registration on [`crate::evaluator::Environment`].
pub fn builtin_ops() -> Vec<BuiltinOp> {
    fn builtin_fixed<Args, F>(id: &'static str, arity: usize, f: F) -> BuiltinOp
    where
        F: IntoOperation<Args>,
    {
        BuiltinOp {
            id,
            func: <F as IntoOperation<Args>>::into_operation(f),
            arity: Arity::Exact(arity),
        }
    }

    fn builtin_variadic<Args, F>(id: &'static str, arity: Arity, f: F) -> BuiltinOp
    where
        F: IntoVariadicOperation<Args>,
    {
        let inner = <F as IntoVariadicOperation<Args>>::into_variadic_operation(f);
        BuiltinOp {
            id,
            func: Rc::new(move |args: Vec<Value>| {
                arity.validate(args.len())?;
                inner(args)
            }),
            arity,
        }
    }

    type Nums = NumIter<'static>;
    type Values = ValueIter<'static>;

    vec![
        // Arithmetic
        builtin_variadic::<(Nums,), _>("+", Arity::AtLeast(0), builtin_add),
        builtin_variadic::<(NumberType, Nums), _>("-", Arity::AtLeast(1), builtin_sub),
        builtin_variadic::<(NumberType, Nums), _>("*", Arity::AtLeast(1), builtin_mul),
        builtin_variadic::<(NumberType, Nums), _>("/", Arity::AtLeast(2), builtin_div),
        // Comparison
        builtin_variadic::<(NumberType, Nums), _>("<", Arity::AtLeast(2), builtin_lt),
        builtin_variadic::<(NumberType, Nums), _>("<=", Arity::AtLeast(2), builtin_le),
        builtin_variadic::<(NumberType, Nums), _>(">", Arity::AtLeast(2), builtin_gt),
        builtin_variadic::<(NumberType, Nums), _>(">=", Arity::AtLeast(2), builtin_ge),
        builtin_variadic::<(Value, Values), _>("=", Arity::AtLeast(1), builtin_equal),
        // Printing
        builtin_variadic::<(Values,), _>("pr-str", Arity::Any, builtin_pr_str),
        builtin_variadic::<(Values,), _>("str", Arity::Any, builtin_str),
        builtin_variadic::<(Values,), _>("prn", Arity::Any, builtin_prn),
        builtin_variadic::<(Values,), _>("println", Arity::Any, builtin_println),
        // Collections
        builtin_variadic::<(Values,), _>("list", Arity::Any, builtin_list),
        builtin_fixed::<(Value,), _>("list?", 1, builtin_is_list),
        builtin_variadic::<(Values,), _>("vector", Arity::Any, builtin_vector),
        builtin_fixed::<(Value,), _>("vector?", 1, builtin_is_vector),
        builtin_variadic::<(Values,), _>("hash-map", Arity::Any, builtin_hash_map),
        builtin_fixed::<(Value,), _>("map?", 1, builtin_is_map),
        builtin_fixed::<(Value,), _>("sequential?", 1, builtin_is_sequential),
        builtin_fixed::<(Value,), _>("empty?", 1, builtin_is_empty),
        builtin_fixed::<(Value,), _>("count", 1, builtin_count),
        // Sequences
        builtin_fixed::<(Value, Values), _>("cons", 2, builtin_cons),
        builtin_variadic::<(Values,), _>("concat", Arity::Any, builtin_concat),
        builtin_fixed::<(Values,), _>("vec", 1, builtin_vec),
        builtin_fixed::<(Values, NumberType), _>("nth", 2, builtin_nth),
        builtin_fixed::<(Values,), _>("first", 1, builtin_first),
        builtin_fixed::<(Values,), _>("rest", 1, builtin_rest),
        builtin_variadic::<(Value, Values), _>("apply", Arity::AtLeast(2), builtin_apply),
        builtin_fixed::<(Value, Values), _>("map", 2, builtin_map),
        builtin_variadic::<(Value, Values), _>("conj", Arity::AtLeast(1), builtin_conj),
        builtin_fixed::<(Value,), _>("seq", 1, builtin_seq),
        // Symbols and keywords
        builtin_fixed::<(&str,), _>("symbol", 1, builtin_symbol),
        builtin_fixed::<(Value,), _>("symbol?", 1, builtin_is_symbol),
        builtin_fixed::<(Value,), _>("keyword", 1, builtin_keyword),
        builtin_fixed::<(Value,), _>("keyword?", 1, builtin_is_keyword),
        // Hash-maps
        builtin_variadic::<(Value, Values), _>("assoc", Arity::AtLeast(1), builtin_assoc),
        builtin_variadic::<(Value, Values), _>("dissoc", Arity::AtLeast(1), builtin_dissoc),
        builtin_fixed::<(Value, Value), _>("get", 2, builtin_get),
        builtin_fixed::<(Value, Value), _>("contains?", 2, builtin_contains),
        builtin_fixed::<(Value,), _>("keys", 1, builtin_keys),
        builtin_fixed::<(Value,), _>("vals", 1, builtin_vals),
        // Atoms
        builtin_fixed::<(Value,), _>("atom", 1, builtin_atom),
        builtin_fixed::<(Value,), _>("atom?", 1, builtin_is_atom),
        builtin_fixed::<(Value,), _>("deref", 1, builtin_deref),
        builtin_fixed::<(Value, Value), _>("reset!", 2, builtin_reset),
        builtin_variadic::<(Value, Value, Values), _>("swap!", Arity::AtLeast(2), builtin_swap),
        // Metadata
        builtin_fixed::<(Value,), _>("meta", 1, builtin_meta),
        builtin_fixed::<(Value, Value), _>("with-meta", 2, builtin_with_meta),
        // Type predicates
        builtin_fixed::<(Value,), _>("nil?", 1, builtin_is_nil),
        builtin_fixed::<(Value,), _>("true?", 1, builtin_is_true),
        builtin_fixed::<(Value,), _>("false?", 1, builtin_is_false),
        builtin_fixed::<(Value,), _>("string?", 1, builtin_is_string),
        builtin_fixed::<(Value,), _>("number?", 1, builtin_is_number),
        builtin_fixed::<(Value,), _>("fn?", 1, builtin_is_fn),
        builtin_fixed::<(Value,), _>("macro?", 1, builtin_is_macro),
        // Reflection, errors and host access
        builtin_fixed::<(Value,), _>("throw", 1, builtin_throw),
        builtin_fixed::<(&str,), _>("read-string", 1, builtin_read_string),
        builtin_fixed::<(&str,), _>("slurp", 1, builtin_slurp),
        builtin_fixed::<(), _>("time-ms", 0, builtin_time_ms),
        builtin_fixed::<(&str,), _>("readline", 1, builtin_readline),
    ]
}
