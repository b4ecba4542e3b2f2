//! Rendering of values back to text.
//!
//! In readable mode strings are quoted with `"`, `\` and newlines escaped, so that the
//! reader accepts the output again. Raw mode emits string contents unchanged.

use crate::ast::{OpenAtom, Value};
use std::fmt::{self, Write};

pub fn pr_str(value: &Value, print_readably: bool) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write_value(&mut out, value, print_readably);
    out
}

pub(crate) fn write_value<W: Write>(out: &mut W, value: &Value, readably: bool) -> fmt::Result {
    match value {
        Value::Nil => out.write_str("nil"),
        Value::Bool(b) => write!(out, "{b}"),
        Value::Number(n) => write!(out, "{n}"),
        Value::Symbol(s) => out.write_str(s),
        Value::Keyword(k) => write!(out, ":{k}"),
        Value::String(s) if readably => write_escaped(out, s),
        Value::String(s) => out.write_str(s),
        Value::List(items, _) => write_sequence(out, '(', items, ')', readably),
        Value::Vector(items, _) => write_sequence(out, '[', items, ']', readably),
        Value::HashMap(map, _) => {
            out.write_char('{')?;
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.write_char(' ')?;
                }
                write_value(out, &Value::from_map_key(key), readably)?;
                out.write_char(' ')?;
                write_value(out, item, readably)?;
            }
            out.write_char('}')
        }
        Value::Atom(cell) => {
            let Some(_open) = OpenAtom::enter(cell) else {
                return out.write_str("(atom ...)");
            };
            out.write_str("(atom ")?;
            write_value(out, &cell.borrow(), readably)?;
            out.write_char(')')
        }
        Value::Function(_) => out.write_str("#<function>"),
        Value::BuiltinFunction { id, .. } => write!(out, "#<builtin-function:{id}>"),
    }
}

fn write_sequence<W: Write>(
    out: &mut W,
    open: char,
    items: &[Value],
    close: char,
    readably: bool,
) -> fmt::Result {
    out.write_char(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.write_char(' ')?;
        }
        write_value(out, item, readably)?;
    }
    out.write_char(close)
}

fn write_escaped<W: Write>(out: &mut W, s: &str) -> fmt::Result {
    out.write_char('"')?;
    for ch in s.chars() {
        match ch {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            '\n' => out.write_str("\\n")?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')
}
