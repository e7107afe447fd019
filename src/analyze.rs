//! Free-variable analysis (§4.5): before a `fn`/`mac` closure is built, its
//! body is analyzed against the definition-time `bound` set (its
//! parameters) to produce the list of free names it must capture as
//! upvalues.
//!
//! This is a pure walk over already-built cons trees — it never allocates —
//! so it takes `Value`s by copy and returns a plain `Vec<Value>` of
//! deduplicated free symbols, in the order first encountered.

use crate::error::Result;
use crate::value::Value;

/// The handful of head symbols the analyzer (and evaluator) must recognize
/// by identity. Interned once per context and threaded through rather than
/// looked up by name on every call.
#[derive(Clone, Copy)]
pub struct Specials {
    pub quote: Value,
    pub do_: Value,
    pub let_: Value,
    pub fn_: Value,
    pub mac: Value,
}

fn contains(list: &[Value], v: &Value) -> bool {
    list.iter().any(|x| x.is_identical(v))
}

pub fn analyze(specials: &Specials, expr: Value, bound: &[Value]) -> Result<Vec<Value>> {
    let mut free = vec![];
    walk(specials, expr, bound, &mut free)?;
    Ok(free)
}

fn walk(specials: &Specials, expr: Value, bound: &[Value], free: &mut Vec<Value>) -> Result<()> {
    match expr {
        Value::Symbol(_) => {
            if !contains(bound, &expr) && !contains(free, &expr) {
                free.push(expr);
            }
            Ok(())
        }
        Value::Pair(p) => {
            let op = p.car;
            if matches!(op, Value::Symbol(_)) {
                if op.is_identical(&specials.quote) {
                    return Ok(());
                }
                if op.is_identical(&specials.do_) {
                    return walk_do(specials, p.cdr, bound, free);
                }
                if op.is_identical(&specials.fn_) || op.is_identical(&specials.mac) {
                    return walk_fn(specials, p.cdr, bound, free);
                }
            }
            walk(specials, op, bound, free)?;
            walk_args(specials, p.cdr, bound, free)
        }
        _ => Ok(()),
    }
}

fn walk_args(specials: &Specials, mut args: Value, bound: &[Value], free: &mut Vec<Value>) -> Result<()> {
    loop {
        match args {
            Value::Pair(p) => {
                walk(specials, p.car, bound, free)?;
                args = p.cdr;
            }
            Value::Nil => return Ok(()),
            other => return walk(specials, other, bound, free),
        }
    }
}

/// `(do stmt1 stmt2 ...)`: a `(let name expr)` statement analyzes `expr`
/// under the bound set so far, then extends it with `name` for the
/// remaining statements.
fn walk_do(specials: &Specials, mut stmts: Value, bound: &[Value], free: &mut Vec<Value>) -> Result<()> {
    let mut local_bound: Vec<Value> = bound.to_vec();
    loop {
        match stmts {
            Value::Pair(p) => {
                let stmt = p.car;
                match let_statement_parts(specials, stmt)? {
                    Some((name, init)) => {
                        walk(specials, init, &local_bound, free)?;
                        local_bound.push(name);
                    }
                    None => walk(specials, stmt, &local_bound, free)?,
                }
                stmts = p.cdr;
            }
            _ => return Ok(()),
        }
    }
}

/// If `stmt` is shaped like `(let name expr)`, return `(name, expr)`.
fn let_statement_parts(specials: &Specials, stmt: Value) -> Result<Option<(Value, Value)>> {
    let Value::Pair(p) = stmt else { return Ok(None) };
    if !matches!(p.car, Value::Symbol(_)) || !p.car.is_identical(&specials.let_) {
        return Ok(None);
    }
    let name = p.cdr.car()?;
    let init = p.cdr.cdr()?.car()?;
    Ok(Some((name, init)))
}

/// `(fn params body...)` / `(mac params body...)`: compute the inner free
/// set against `bound = params`, then re-analyze each inner-free name as an
/// expression in the *outer* bound set, so names bound by the outer scope
/// don't propagate further out.
fn walk_fn(specials: &Specials, rest: Value, outer_bound: &[Value], outer_free: &mut Vec<Value>) -> Result<()> {
    let params = rest.car()?;
    let body = rest.cdr()?;
    let inner_bound = param_symbols(params)?;
    let inner_free = analyze(specials, body, &inner_bound)?;
    for name in inner_free {
        walk(specials, name, outer_bound, outer_free)?;
    }
    Ok(())
}

/// Flatten a (possibly dotted) parameter list into its symbols.
pub fn param_symbols(mut params: Value) -> Result<Vec<Value>> {
    let mut out = vec![];
    loop {
        match params {
            Value::Nil => return Ok(out),
            Value::Symbol(_) => {
                out.push(params);
                return Ok(out);
            }
            Value::Pair(p) => {
                out.push(p.car);
                params = p.cdr;
            }
            other => {
                return Err(crate::error::Error::TypeMismatch {
                    expected: "parameter list",
                    got: other.type_name(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{Heap, HeapConfig};
    use crate::value;

    fn specials(heap: &mut Heap) -> Specials {
        Specials {
            quote: Value::Symbol(heap.intern("quote").unwrap()),
            do_: Value::Symbol(heap.intern("do").unwrap()),
            let_: Value::Symbol(heap.intern("let").unwrap()),
            fn_: Value::Symbol(heap.intern("fn").unwrap()),
            mac: Value::Symbol(heap.intern("mac").unwrap()),
        }
    }

    #[test]
    fn bound_param_is_not_free() {
        let mut heap = Heap::new(HeapConfig::default());
        let sp = specials(&mut heap);
        let n = Value::Symbol(heap.intern("n").unwrap());
        let free = analyze(&sp, n, &[n]).unwrap();
        assert!(free.is_empty());
    }

    #[test]
    fn unbound_symbol_is_free() {
        let mut heap = Heap::new(HeapConfig::default());
        let sp = specials(&mut heap);
        let n = Value::Symbol(heap.intern("n").unwrap());
        let free = analyze(&sp, n, &[]).unwrap();
        assert_eq!(free.len(), 1);
        assert!(free[0].is_identical(&n));
    }

    #[test]
    fn quote_is_skipped() {
        let mut heap = Heap::new(HeapConfig::default());
        let sp = specials(&mut heap);
        let n = Value::Symbol(heap.intern("n").unwrap());
        let quoted = value::cons(&mut heap, sp.quote, value::cons(&mut heap, n, Value::Nil).unwrap()).unwrap();
        let free = analyze(&sp, quoted, &[]).unwrap();
        assert!(free.is_empty());
    }

    #[test]
    fn monotone_adding_to_bound_never_enlarges_free_set() {
        let mut heap = Heap::new(HeapConfig::default());
        let sp = specials(&mut heap);
        let n = Value::Symbol(heap.intern("n").unwrap());
        let m = Value::Symbol(heap.intern("m").unwrap());
        let expr = value::cons(&mut heap, n, value::cons(&mut heap, m, Value::Nil).unwrap()).unwrap();
        let free_empty_bound = analyze(&sp, expr, &[]).unwrap();
        let free_with_n_bound = analyze(&sp, expr, &[n]).unwrap();
        assert!(free_with_n_bound.len() <= free_empty_bound.len());
    }

    #[test]
    fn nested_fn_does_not_leak_inner_params_outward() {
        let mut heap = Heap::new(HeapConfig::default());
        let sp = specials(&mut heap);
        let x = Value::Symbol(heap.intern("x").unwrap());
        // (fn (x) x) — x is bound inside, must not appear free outside.
        let params = value::cons(&mut heap, x, Value::Nil).unwrap();
        let body = value::cons(&mut heap, x, Value::Nil).unwrap();
        let rest = value::cons(&mut heap, params, body).unwrap();
        let fn_form = value::cons(&mut heap, sp.fn_, rest).unwrap();
        let free = analyze(&sp, fn_form, &[]).unwrap();
        assert!(free.is_empty());
    }
}
