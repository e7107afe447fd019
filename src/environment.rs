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

//! Environment and binding: symbol-to-value lookup across closure frames
//! and globals (§4.4).
//!
//! Two shapes share one lookup path, both built entirely out of ordinary
//! cons cells (no separate `Activation`/index-resolution machinery):
//!
//! * An **association list**: a chain of `(symbol . value)` binding cells,
//!   used for the empty top-level environment and temporary extensions.
//! * A **closure frame**: a pair tagged with the reserved frame symbol in
//!   its car, whose cdr is `(locals . upvals)`. Each of `locals`/`upvals` is
//!   itself an association list. `upvals` entries are binding cells shared
//!   by reference with the defining scope, which is what gives closures
//!   true lexical reference semantics (mutating a captured variable through
//!   one closure is visible through every other reference to it).
//!
//! A symbol's own cell (`name . global-value`) doubles as its global
//! binding cell: both alist cells and symbol cells have the value in their
//! `cdr`, so `get_bound` can return either uniformly and callers never need
//! to care which kind they got back.

use crate::error::Result;
use crate::heap::Heap;
use crate::value::{self, Value};

/// Find the binding cell for `sym` in `env`, falling back to `sym`'s own
/// global cell if it is bound nowhere more locally. The returned value
/// always responds to `.cdr()`/`.set_cdr()` as the binding's value slot.
pub fn get_bound(env: Value, sym: Value, frame_sym: Value) -> Result<Value> {
    match env {
        Value::Pair(p) if p.car.is_identical(&frame_sym) => {
            let locals = p.cdr.car()?;
            let upvals = p.cdr.cdr()?;
            if let Some(cell) = search_alist(locals, sym)? {
                return Ok(cell);
            }
            if let Some(cell) = search_alist(upvals, sym)? {
                return Ok(cell);
            }
            Ok(sym)
        }
        Value::Nil => Ok(sym),
        alist => Ok(search_alist(alist, sym)?.unwrap_or(sym)),
    }
}

/// Linear scan of an association list (a chain of `(symbol . value)`
/// binding cells) for `sym`, compared by identity.
fn search_alist(mut list: Value, sym: Value) -> Result<Option<Value>> {
    loop {
        match list {
            Value::Pair(p) => {
                let cell = p.car;
                if cell.car()?.is_identical(&sym) {
                    return Ok(Some(cell));
                }
                list = p.cdr;
            }
            _ => return Ok(None),
        }
    }
}

/// Bind `params` (a possibly-dotted list of symbols) to `args` (the
/// evaluated argument list), returning the resulting `locals` alist. A
/// dotted tail name receives whatever of `args` remains.
pub fn argstoenv(heap: &mut Heap, params: Value, args: Value) -> Result<Value> {
    let mut locals = Value::Nil;
    let mut params = params;
    let mut args = args;
    loop {
        match params {
            Value::Nil => break,
            Value::Symbol(_) => {
                let cell = value::cons(heap, params, args)?;
                locals = value::cons(heap, cell, locals)?;
                break;
            }
            Value::Pair(p) => {
                let (arg_val, rest_args) = match args {
                    Value::Pair(ap) => (ap.car, ap.cdr),
                    _ => return Err(crate::error::Error::TooFewArguments),
                };
                let cell = value::cons(heap, p.car, arg_val)?;
                locals = value::cons(heap, cell, locals)?;
                params = p.cdr;
                args = rest_args;
            }
            other => {
                return Err(crate::error::Error::TypeMismatch {
                    expected: "parameter list",
                    got: other.type_name(),
                })
            }
        }
    }
    Ok(locals)
}

/// Resolve each name in `free_vars` against `def_env` and collect the
/// *same* binding cells (not copies) into a new `upvals` alist.
pub fn build_upvals(
    heap: &mut Heap,
    frame_sym: Value,
    free_vars: Value,
    def_env: Value,
) -> Result<Value> {
    let (vars, _) = value::list_elements(free_vars)?;
    let mut upvals = Value::Nil;
    for sym in vars.into_iter().rev() {
        let cell = get_bound(def_env, sym, frame_sym)?;
        upvals = value::cons(heap, cell, upvals)?;
    }
    Ok(upvals)
}

/// Build a new closure-frame environment `(frame-sym . (locals . upvals))`.
pub fn make_frame(heap: &mut Heap, frame_sym: Value, locals: Value, upvals: Value) -> Result<Value> {
    let inner = value::cons(heap, locals, upvals)?;
    value::cons(heap, frame_sym, inner)
}

/// Introduce a new `letrec`-style binding into `env`, mutating a frame's
/// locals in place (or, when `env` is the top-level `Nil` environment,
/// assigning `sym`'s global slot directly). Returns the binding cell so the
/// caller can store the evaluated value into it afterward.
pub fn let_bind(heap: &mut Heap, frame_sym: Value, env: Value, sym: Value) -> Result<Value> {
    match env {
        Value::Pair(p) if p.car.is_identical(&frame_sym) => {
            let cell = value::cons(heap, sym, Value::Nil)?;
            let locals = p.cdr.car()?;
            let new_locals = value::cons(heap, cell, locals)?;
            p.cdr.set_car(new_locals)?;
            Ok(cell)
        }
        _ => Ok(sym),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{Heap, HeapConfig};

    fn new_symbol(heap: &mut Heap, name: &str) -> Value {
        Value::Symbol(heap.intern(name).unwrap())
    }

    #[test]
    fn global_fallback_is_the_symbol_itself() {
        let mut heap = Heap::new(HeapConfig::default());
        let frame_sym = new_symbol(&mut heap, "[frame]");
        let x = new_symbol(&mut heap, "x");
        let cell = get_bound(Value::Nil, x, frame_sym).unwrap();
        assert!(cell.is_identical(&x));
    }

    #[test]
    fn locals_shadow_globals_and_upvals() {
        let mut heap = Heap::new(HeapConfig::default());
        let frame_sym = new_symbol(&mut heap, "[frame]");
        let x = new_symbol(&mut heap, "x");

        let outer_cell = value::cons(&mut heap, x, Value::Fixnum(1)).unwrap();
        let upvals = value::cons(&mut heap, outer_cell, Value::Nil).unwrap();
        let locals = Value::Nil;
        let frame = make_frame(&mut heap, frame_sym, locals, upvals).unwrap();

        let cell = get_bound(frame, x, frame_sym).unwrap();
        assert_eq!(cell.cdr().unwrap().as_f64().unwrap(), 1.0);

        let bound = let_bind(&mut heap, frame_sym, frame, x).unwrap();
        bound.set_cdr(Value::Fixnum(2)).unwrap();
        let cell = get_bound(frame, x, frame_sym).unwrap();
        assert_eq!(cell.cdr().unwrap().as_f64().unwrap(), 2.0);
    }

    #[test]
    fn dotted_params_bind_rest_to_tail_symbol() {
        let mut heap = Heap::new(HeapConfig::default());
        let a = new_symbol(&mut heap, "a");
        let rest = new_symbol(&mut heap, "rest");
        let params = value::cons(&mut heap, a, rest).unwrap();
        let args = value::list(&mut heap, &[Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3)]).unwrap();
        let locals = argstoenv(&mut heap, params, args).unwrap();

        let frame_sym = new_symbol(&mut heap, "[frame]");
        let cell = search_alist(locals, rest).unwrap().unwrap();
        let (items, _) = value::list_elements(cell.cdr().unwrap()).unwrap();
        assert_eq!(items.len(), 2);
        let _ = frame_sym;
    }
}
