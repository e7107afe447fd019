// Copyright 2014 Nick Fitzgerald
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The core printer: writes a `Value` back to text (§4.8).
//!
//! `write_value` is the `fmt::Display`-compatible entry point `value.rs`
//! defers to; `write_to` is the byte-callback-oriented form matching §6's
//! writer-callback contract, used once a real writer (stdout, a file) is
//! wired up rather than an in-memory `fmt::Formatter`.

use std::fmt;

use crate::value::Value;

/// Pairs whose car is identical to this are frame sentinels and print as
/// `[env frame]` rather than being walked, since a frame holds the live,
/// potentially-unrooted upvalue chain and is not meant to be read back.
/// Matched structurally (by symbol *name*) rather than by identity, since
/// the printer has no `Reserved` context of its own to compare against.
fn is_frame_sentinel(v: &Value) -> bool {
    matches!(v, Value::Symbol(_)) && matches!(v.as_symbol_name().as_deref(), Ok("[frame]"))
}

pub fn write_value(v: Value, f: &mut fmt::Formatter) -> fmt::Result {
    write_quoted(v, f, true)
}

/// The byte-callback-oriented form of `write_value` (§6's `write(context,
/// value, writer_cb, user, quote_strings)`): renders through `fmt::Display`
/// into a scratch buffer, then feeds the bytes to `sink` one at a time, for
/// callers driving a real writer (stdout, a file) rather than an in-memory
/// `fmt::Formatter`.
pub fn write_to(v: Value, sink: &mut dyn FnMut(u8), quote_strings: bool) {
    let rendered = if quote_strings { format!("{v}") } else { UnquotedDisplay(v).to_string() };
    for b in rendered.into_bytes() {
        sink(b);
    }
}

struct UnquotedDisplay(Value);

impl fmt::Display for UnquotedDisplay {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_quoted(self.0, f, false)
    }
}

fn write_quoted(v: Value, f: &mut fmt::Formatter, quote_strings: bool) -> fmt::Result {
    match v {
        Value::Fixnum(n) => write!(f, "{n}"),
        Value::Number(p) => write!(f, "{}", format_float(*p)),
        Value::Boolean(true) => write!(f, "true"),
        Value::Boolean(false) => write!(f, "false"),
        Value::Nil => write!(f, "nil"),
        Value::Str(p) => {
            if quote_strings {
                write!(f, "\"")?;
                for c in p.chars() {
                    if c == '"' {
                        write!(f, "\\\"")?;
                    } else {
                        write!(f, "{c}")?;
                    }
                }
                write!(f, "\"")
            } else {
                write!(f, "{}", *p)
            }
        }
        Value::Symbol(_) => write!(f, "{}", v.as_symbol_name().unwrap_or_default()),
        Value::Pair(p) => {
            if is_frame_sentinel(&p.car) {
                return write!(f, "[env frame]");
            }
            write!(f, "(")?;
            write_quoted(p.car, f, quote_strings)?;
            write_tail(p.cdr, f, quote_strings)?;
            write!(f, ")")
        }
        Value::Func(_) => write!(f, "[func {:#x}]", addr_of(v)),
        Value::Macro(_) => write!(f, "[macro {:#x}]", addr_of(v)),
        Value::Prim(p) => write!(f, "[primitive {p:?}]"),
        Value::CFunc(_) => write!(f, "[cfunc {:#x}]", addr_of(v)),
        Value::Ptr(_) => write!(f, "[ptr {:#x}]", addr_of(v)),
    }
}

fn write_tail(tail: Value, f: &mut fmt::Formatter, quote_strings: bool) -> fmt::Result {
    match tail {
        Value::Nil => Ok(()),
        Value::Pair(p) => {
            write!(f, " ")?;
            write_quoted(p.car, f, quote_strings)?;
            write_tail(p.cdr, f, quote_strings)
        }
        other => {
            write!(f, " . ")?;
            write_quoted(other, f, quote_strings)
        }
    }
}

/// A short, non-scientific-by-default float format roughly matching the
/// reference printer's `%.7g`-equivalent rendering.
fn format_float(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.1}")
    } else {
        let s = format!("{n:.7}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// A stable-enough address to print for boxed cells with no readable
/// surface form, purely for the `[<typename> <address>]` fallback.
fn addr_of(v: Value) -> usize {
    match v {
        Value::Func(p) | Value::Macro(p) => &*p as *const _ as usize,
        Value::CFunc(p) => &*p as *const _ as usize,
        Value::Ptr(p) => &*p as *const _ as usize,
        _ => 0,
    }
}
