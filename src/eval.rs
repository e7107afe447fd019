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

//! The evaluator (§4.6): special forms, function/macro/host-function
//! application, and early return.
//!
//! `return` is implemented as the reference implementation's own sentinel
//! rather than as a Rust-level control-flow effect: evaluating `(return v)`
//! produces an ordinary pair `(return-sym . v)`, `do` and `while` stop their
//! sequencing loop the moment a statement's result is such a pair and
//! propagate it unchanged, and only function application unwraps it back to
//! its payload. A `return` outside of any function body therefore bubbles
//! all the way out unchanged, exactly matching the source's observable
//! behavior (Design Notes, "Coroutine-like early return").

use tracing::trace_span;

use crate::analyze::{self, Specials};
use crate::environment;
use crate::error::{Error, Result};
use crate::heap::{CFuncPtr, Heap};
use crate::value::{self, Value};

/// Ordinal ids for every special form the evaluator recognizes (§4.6's
/// primitive table, minus `print`, which is a host-registered `cfunc`
/// rather than a core primitive — see §4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Quote,
    If,
    And,
    Or,
    Do,
    While,
    Let,
    Assign,
    Fn,
    Mac,
    Return,
    Cons,
    Car,
    Cdr,
    SetCar,
    SetCdr,
    List,
    Not,
    Is,
    Atom,
    Lt,
    Le,
    Add,
    Sub,
    Mul,
    Div,
    Module,
    Export,
    Import,
    Get,
}

impl Primitive {
    /// Every primitive paired with the name its global symbol is bound
    /// under, for a context's one-time bootstrap.
    pub const ALL: &'static [(&'static str, Primitive)] = &[
        ("quote", Primitive::Quote),
        ("if", Primitive::If),
        ("and", Primitive::And),
        ("or", Primitive::Or),
        ("do", Primitive::Do),
        ("while", Primitive::While),
        ("let", Primitive::Let),
        ("=", Primitive::Assign),
        ("fn", Primitive::Fn),
        ("mac", Primitive::Mac),
        ("return", Primitive::Return),
        ("cons", Primitive::Cons),
        ("car", Primitive::Car),
        ("cdr", Primitive::Cdr),
        ("setcar", Primitive::SetCar),
        ("setcdr", Primitive::SetCdr),
        ("list", Primitive::List),
        ("not", Primitive::Not),
        ("is", Primitive::Is),
        ("atom", Primitive::Atom),
        ("<", Primitive::Lt),
        ("<=", Primitive::Le),
        ("+", Primitive::Add),
        ("-", Primitive::Sub),
        ("*", Primitive::Mul),
        ("/", Primitive::Div),
        ("module", Primitive::Module),
        ("export", Primitive::Export),
        ("import", Primitive::Import),
        ("get", Primitive::Get),
    ];

    fn label(&self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(_, p)| p == self)
            .map(|(name, _)| *name)
            .unwrap_or("?")
    }
}

/// The handful of reserved, identity-compared symbols a context sets up
/// once (Design Notes, "Global mutable state") and threads through every
/// `eval` call rather than reaching for module statics.
#[derive(Clone, Copy)]
pub struct Reserved {
    pub specials: Specials,
    pub frame_sym: Value,
    pub return_sym: Value,
}

pub fn eval(heap: &mut Heap, reserved: &Reserved, expr: Value, env: Value) -> Result<Value> {
    match expr {
        Value::Symbol(_) => {
            let cell = environment::get_bound(env, expr, reserved.frame_sym)?;
            cell.cdr()
        }
        Value::Pair(_) => eval_call(heap, reserved, expr, env),
        other => Ok(other),
    }
}

fn eval_call(heap: &mut Heap, reserved: &Reserved, expr: Value, env: Value) -> Result<Value> {
    heap.push_call(expr);
    let result = eval_call_inner(heap, reserved, expr, env);
    heap.pop_call();
    result
}

fn eval_call_inner(heap: &mut Heap, reserved: &Reserved, expr: Value, env: Value) -> Result<Value> {
    let op_expr = expr.car()?;
    let args = expr.cdr()?;
    let op = eval(heap, reserved, op_expr, env)?;
    match op {
        Value::Prim(p) => {
            let _span = trace_span!("eval", form = p.label()).entered();
            eval_primitive(heap, reserved, p, args, env)
        }
        Value::Func(_) => {
            let _span = trace_span!("eval", callee = "func").entered();
            apply_func(heap, reserved, op, args, env)
        }
        Value::Macro(_) => {
            let _span = trace_span!("eval", callee = "macro").entered();
            apply_macro(heap, reserved, op, expr, env)
        }
        Value::CFunc(cf) => {
            let _span = trace_span!("eval", callee = "cfunc").entered();
            apply_cfunc(heap, reserved, cf, args, env)
        }
        _ => Err(Error::NotCallable),
    }
}

fn is_return_sentinel(reserved: &Reserved, v: Value) -> bool {
    matches!(v, Value::Pair(p) if p.car.is_identical(&reserved.return_sym))
}

fn unwrap_return(reserved: &Reserved, v: Value) -> Result<Value> {
    if is_return_sentinel(reserved, v) {
        v.cdr()
    } else {
        Ok(v)
    }
}

fn eval_args(heap: &mut Heap, reserved: &Reserved, mut args: Value, env: Value) -> Result<Vec<Value>> {
    let mut out = vec![];
    loop {
        match args {
            Value::Nil => return Ok(out),
            Value::Pair(p) => {
                out.push(eval(heap, reserved, p.car, env)?);
                args = p.cdr;
            }
            _ => return Err(Error::DottedArgumentList),
        }
    }
}

/// A closure cell's payload, shaped `(def-env . (free-vars . (params . body)))`.
fn closure_parts(v: Value) -> Result<(Value, Value, Value, Value)> {
    let rest = v.cdr()?;
    let def_env = rest.car()?;
    let rest = rest.cdr()?;
    let free_vars = rest.car()?;
    let rest = rest.cdr()?;
    let params = rest.car()?;
    let body = rest.cdr()?;
    Ok((def_env, free_vars, params, body))
}

fn apply_func(heap: &mut Heap, reserved: &Reserved, func: Value, arg_exprs: Value, call_env: Value) -> Result<Value> {
    let (def_env, free_vars, params, body) = closure_parts(func)?;
    let evaluated = eval_args(heap, reserved, arg_exprs, call_env)?;
    let args_list = value::list(heap, &evaluated)?;
    let upvals = environment::build_upvals(heap, reserved.frame_sym, free_vars, def_env)?;
    let locals = environment::argstoenv(heap, params, args_list)?;
    let frame = environment::make_frame(heap, reserved.frame_sym, locals, upvals)?;
    let result = eval(heap, reserved, body, frame)?;
    unwrap_return(reserved, result)
}

/// Unevaluated argument expressions are bound directly to the macro's
/// parameters, the expansion is evaluated, and the *call cell itself* is
/// overwritten with the resulting form before being re-evaluated in place
/// (§4.6's "Macro application").
fn apply_macro(heap: &mut Heap, reserved: &Reserved, mac: Value, call_cell: Value, call_env: Value) -> Result<Value> {
    let (def_env, free_vars, params, body) = closure_parts(mac)?;
    let arg_exprs = call_cell.cdr()?;
    let upvals = environment::build_upvals(heap, reserved.frame_sym, free_vars, def_env)?;
    let locals = environment::argstoenv(heap, params, arg_exprs)?;
    let frame = environment::make_frame(heap, reserved.frame_sym, locals, upvals)?;
    let new_form = eval(heap, reserved, body, frame)?;
    match new_form {
        Value::Pair(np) => {
            call_cell.set_car(np.car)?;
            call_cell.set_cdr(np.cdr)?;
        }
        other => {
            call_cell.set_car(Value::Prim(Primitive::Quote))?;
            let wrapped = value::cons(heap, other, Value::Nil)?;
            call_cell.set_cdr(wrapped)?;
        }
    }
    eval(heap, reserved, call_cell, call_env)
}

fn apply_cfunc(heap: &mut Heap, reserved: &Reserved, cf: CFuncPtr, arg_exprs: Value, env: Value) -> Result<Value> {
    let evaluated = eval_args(heap, reserved, arg_exprs, env)?;
    let args_list = value::list(heap, &evaluated)?;
    let f = cf.0.ok_or(Error::NotCallable)?;
    f(heap, args_list)
}

fn eval_primitive(heap: &mut Heap, reserved: &Reserved, prim: Primitive, args: Value, env: Value) -> Result<Value> {
    use Primitive::*;
    match prim {
        Quote => args.car(),
        If => eval_if(heap, reserved, args, env),
        And => eval_and(heap, reserved, args, env),
        Or => eval_or(heap, reserved, args, env),
        Do => eval_do(heap, reserved, args, env),
        While => eval_while(heap, reserved, args, env),
        Let => eval_let(heap, reserved, args, env),
        Assign => eval_assign(heap, reserved, args, env),
        Fn => build_closure(heap, reserved, args, env, false),
        Mac => build_closure(heap, reserved, args, env, true),
        Return => {
            let v = match args {
                Value::Nil => Value::Nil,
                _ => eval(heap, reserved, args.car()?, env)?,
            };
            value::cons(heap, reserved.return_sym, v)
        }
        Cons => {
            let (a, b) = two_args(heap, reserved, args, env)?;
            value::cons(heap, a, b)
        }
        Car => eval(heap, reserved, args.car()?, env)?.car(),
        Cdr => eval(heap, reserved, args.car()?, env)?.cdr(),
        SetCar => {
            let (p, v) = two_args(heap, reserved, args, env)?;
            p.set_car(v)?;
            Ok(v)
        }
        SetCdr => {
            let (p, v) = two_args(heap, reserved, args, env)?;
            p.set_cdr(v)?;
            Ok(v)
        }
        List => {
            let vals = eval_args(heap, reserved, args, env)?;
            value::list(heap, &vals)
        }
        Not => {
            let v = eval(heap, reserved, args.car()?, env)?;
            Ok(Value::Boolean(!v.is_truthy()))
        }
        Is => {
            let (a, b) = two_args(heap, reserved, args, env)?;
            Ok(Value::Boolean(value::is_equal(&a, &b)))
        }
        Atom => {
            let v = eval(heap, reserved, args.car()?, env)?;
            Ok(Value::Boolean(!v.is_pair()))
        }
        Lt => {
            let (a, b) = two_args(heap, reserved, args, env)?;
            Ok(Value::Boolean(a.as_f64()? < b.as_f64()?))
        }
        Le => {
            let (a, b) = two_args(heap, reserved, args, env)?;
            Ok(Value::Boolean(a.as_f64()? <= b.as_f64()?))
        }
        Add => {
            let ns = eval_numbers(heap, reserved, args, env)?;
            value::make_number(heap, ns.iter().sum())
        }
        Mul => {
            let ns = eval_numbers(heap, reserved, args, env)?;
            value::make_number(heap, ns.iter().product())
        }
        Sub => eval_sub(heap, reserved, args, env),
        Div => eval_div(heap, reserved, args, env),
        Module => eval_module(heap, reserved, args, env),
        Export => eval_export(heap, reserved, args, env),
        Import => Ok(Value::Nil),
        Get => eval_get(heap, reserved, args, env),
    }
}

fn two_args(heap: &mut Heap, reserved: &Reserved, args: Value, env: Value) -> Result<(Value, Value)> {
    let a = eval(heap, reserved, args.car()?, env)?;
    let b = eval(heap, reserved, args.cdr()?.car()?, env)?;
    Ok((a, b))
}

fn eval_numbers(heap: &mut Heap, reserved: &Reserved, args: Value, env: Value) -> Result<Vec<f64>> {
    eval_args(heap, reserved, args, env)?
        .into_iter()
        .map(|v| v.as_f64())
        .collect()
}

/// `-` with zero args is 0; one arg negates; more is a left fold (§4.6,
/// §8 boundary behaviors).
fn eval_sub(heap: &mut Heap, reserved: &Reserved, args: Value, env: Value) -> Result<Value> {
    let ns = eval_numbers(heap, reserved, args, env)?;
    let result = match ns.as_slice() {
        [] => 0.0,
        [x] => -x,
        [first, rest @ ..] => rest.iter().fold(*first, |acc, n| acc - n),
    };
    value::make_number(heap, result)
}

fn eval_div(heap: &mut Heap, reserved: &Reserved, args: Value, env: Value) -> Result<Value> {
    let ns = eval_numbers(heap, reserved, args, env)?;
    let result = match ns.as_slice() {
        [] => 1.0,
        [x] => {
            if *x == 0.0 {
                return Err(Error::DivisionByZero);
            }
            1.0 / x
        }
        [first, rest @ ..] => {
            let mut acc = *first;
            for n in rest {
                if *n == 0.0 {
                    return Err(Error::DivisionByZero);
                }
                acc /= n;
            }
            acc
        }
    };
    value::make_number(heap, result)
}

fn eval_if(heap: &mut Heap, reserved: &Reserved, args: Value, env: Value) -> Result<Value> {
    let mut cur = args;
    loop {
        match cur {
            Value::Nil => return Ok(Value::Nil),
            Value::Pair(p) => match p.cdr {
                Value::Nil => {
                    let cond = eval(heap, reserved, p.car, env)?;
                    return if cond.is_truthy() { Ok(cond) } else { Ok(Value::Nil) };
                }
                Value::Pair(p2) => {
                    let cond = eval(heap, reserved, p.car, env)?;
                    if cond.is_truthy() {
                        return eval(heap, reserved, p2.car, env);
                    }
                    cur = p2.cdr;
                }
                _ => return Err(Error::DottedArgumentList),
            },
            _ => return Err(Error::DottedArgumentList),
        }
    }
}

fn eval_and(heap: &mut Heap, reserved: &Reserved, args: Value, env: Value) -> Result<Value> {
    let mut cur = args;
    let mut last = Value::Boolean(true);
    loop {
        match cur {
            Value::Nil => return Ok(last),
            Value::Pair(p) => {
                last = eval(heap, reserved, p.car, env)?;
                if !last.is_truthy() {
                    return Ok(last);
                }
                cur = p.cdr;
            }
            _ => return Err(Error::DottedArgumentList),
        }
    }
}

fn eval_or(heap: &mut Heap, reserved: &Reserved, args: Value, env: Value) -> Result<Value> {
    let mut cur = args;
    let mut last = Value::Boolean(false);
    loop {
        match cur {
            Value::Nil => return Ok(last),
            Value::Pair(p) => {
                last = eval(heap, reserved, p.car, env)?;
                if last.is_truthy() {
                    return Ok(last);
                }
                cur = p.cdr;
            }
            _ => return Err(Error::DottedArgumentList),
        }
    }
}

fn eval_do(heap: &mut Heap, reserved: &Reserved, args: Value, env: Value) -> Result<Value> {
    let mut cur = args;
    let mut result = Value::Nil;
    loop {
        match cur {
            Value::Nil => return Ok(result),
            Value::Pair(p) => {
                result = eval(heap, reserved, p.car, env)?;
                if is_return_sentinel(reserved, result) {
                    return Ok(result);
                }
                cur = p.cdr;
            }
            _ => return Err(Error::DottedArgumentList),
        }
    }
}

fn eval_while(heap: &mut Heap, reserved: &Reserved, args: Value, env: Value) -> Result<Value> {
    let cond_expr = args.car()?;
    let body = args.cdr()?;
    loop {
        let cond = eval(heap, reserved, cond_expr, env)?;
        if !cond.is_truthy() {
            return Ok(Value::Nil);
        }
        let result = eval_do(heap, reserved, body, env)?;
        if is_return_sentinel(reserved, result) {
            return Ok(result);
        }
    }
}

/// Letrec semantics in a frame; top-level (non-frame) `env` falls back to
/// `environment::let_bind`'s global-slot assignment (§9's resolved open
/// question on top-level `let`).
fn eval_let(heap: &mut Heap, reserved: &Reserved, args: Value, env: Value) -> Result<Value> {
    let sym = args.car()?;
    let expr = args.cdr()?.car()?;
    let cell = environment::let_bind(heap, reserved.frame_sym, env, sym)?;
    let value = eval(heap, reserved, expr, env)?;
    cell.set_cdr(value)?;
    Ok(value)
}

fn eval_assign(heap: &mut Heap, reserved: &Reserved, args: Value, env: Value) -> Result<Value> {
    let sym = args.car()?;
    let expr = args.cdr()?.car()?;
    let value = eval(heap, reserved, expr, env)?;
    let cell = environment::get_bound(env, sym, reserved.frame_sym)?;
    cell.set_cdr(value)?;
    Ok(value)
}

fn build_closure(heap: &mut Heap, reserved: &Reserved, args: Value, env: Value, is_macro: bool) -> Result<Value> {
    let params = args.car()?;
    let body = args.cdr()?.car()?;
    let bound = analyze::param_symbols(params)?;
    let free_vars = analyze::analyze(&reserved.specials, body, &bound)?;
    let free_list = value::list(heap, &free_vars)?;
    let tail = value::cons(heap, params, body)?;
    let inner = value::cons(heap, free_list, tail)?;
    let content = value::cons(heap, env, inner)?;
    let wrapper = value::cons(heap, Value::Nil, content)?;
    let ptr = match wrapper {
        Value::Pair(p) => p,
        _ => unreachable!("value::cons always returns a Pair"),
    };
    Ok(if is_macro { Value::Macro(ptr) } else { Value::Func(ptr) })
}

fn eval_module(heap: &mut Heap, reserved: &Reserved, args: Value, env: Value) -> Result<Value> {
    let name_val = eval(heap, reserved, args.car()?, env)?;
    let body = args.cdr()?;
    heap.push_module(Value::Nil);
    let eval_result = eval_do(heap, reserved, body, env);
    let exports = heap.pop_module().unwrap_or(Value::Nil);
    eval_result?;
    let name_cell = match name_val {
        Value::Str(s) => heap.intern(&s)?,
        Value::Symbol(p) => p,
        other => {
            return Err(Error::TypeMismatch { expected: "string", got: other.type_name() })
        }
    };
    Value::Symbol(name_cell).set_cdr(exports)?;
    Ok(exports)
}

fn eval_export(heap: &mut Heap, reserved: &Reserved, args: Value, env: Value) -> Result<Value> {
    if !heap.in_module() {
        return Err(Error::ExportOutsideModule);
    }
    let decl = args.car()?;
    let result = eval(heap, reserved, decl, env)?;
    let name_sym = decl.cdr()?.car()?;
    let cell = value::cons(heap, name_sym, result)?;
    let top = heap.pop_module().unwrap_or(Value::Nil);
    let new_top = value::cons(heap, cell, top)?;
    heap.push_module(new_top);
    Ok(result)
}

/// `get obj sym` reuses the environment's own lookup routine verbatim,
/// treating `obj` as an association list (§9's resolved open question).
fn eval_get(heap: &mut Heap, reserved: &Reserved, args: Value, env: Value) -> Result<Value> {
    let obj = eval(heap, reserved, args.car()?, env)?;
    let sym = eval(heap, reserved, args.cdr()?.car()?, env)?;
    environment::get_bound(obj, sym, reserved.frame_sym)?.cdr()
}

/// Bind every primitive operator and special form to its global symbol and
/// build the reserved symbols an evaluator needs, in a fresh heap. This is
/// the one piece of bootstrapping every embedding of this language needs
/// before it can evaluate anything, so it lives here rather than being
/// duplicated by each caller (the embedding context, and this module's own
/// and the surface compiler's tests).
pub fn bootstrap(heap: &mut Heap) -> Reserved {
    for (name, prim) in Primitive::ALL {
        let sym = Value::Symbol(heap.intern(name).unwrap());
        sym.set_cdr(Value::Prim(*prim)).unwrap();
    }
    let specials = Specials {
        quote: Value::Symbol(heap.intern("quote").unwrap()),
        do_: Value::Symbol(heap.intern("do").unwrap()),
        let_: Value::Symbol(heap.intern("let").unwrap()),
        fn_: Value::Symbol(heap.intern("fn").unwrap()),
        mac: Value::Symbol(heap.intern("mac").unwrap()),
    };
    let frame_sym = Value::Symbol(heap.intern("[frame]").unwrap());
    let return_sym = Value::Symbol(heap.intern("[return]").unwrap());
    Reserved { specials, frame_sym, return_sym }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;

    fn new_context() -> (Heap, Reserved) {
        let mut heap = Heap::new(HeapConfig::default());
        let reserved = bootstrap(&mut heap);
        (heap, reserved)
    }

    /// Build `((quote func) (quote arg)...)`, a call expression for an
    /// already-evaluated function/macro value and already-evaluated
    /// argument values.
    fn call_value(heap: &mut Heap, reserved: &Reserved, func: Value, args: &[Value]) -> Result<Value> {
        let mut parts = vec![value::list(heap, &[reserved.specials.quote, func])?];
        for a in args {
            parts.push(value::list(heap, &[reserved.specials.quote, *a])?);
        }
        let call_expr = value::list(heap, &parts)?;
        eval(heap, reserved, call_expr, Value::Nil)
    }

    #[test]
    fn quote_returns_unevaluated() {
        let (mut heap, reserved) = new_context();
        let sym = Value::Symbol(heap.intern("x").unwrap());
        let quoted = value::list(&mut heap, &[reserved.specials.quote, sym]).unwrap();
        let result = eval(&mut heap, &reserved, quoted, Value::Nil).unwrap();
        assert!(result.is_identical(&sym));
    }

    #[test]
    fn arithmetic_matches_boundary_behaviors() {
        let (mut heap, reserved) = new_context();
        let plus = Value::Symbol(heap.intern("+").unwrap());
        let expr = value::list(&mut heap, &[plus, Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3)]).unwrap();
        assert_eq!(eval(&mut heap, &reserved, expr, Value::Nil).unwrap().as_f64().unwrap(), 6.0);

        let minus = Value::Symbol(heap.intern("-").unwrap());
        let expr = value::list(&mut heap, &[minus]).unwrap();
        assert_eq!(eval(&mut heap, &reserved, expr, Value::Nil).unwrap().as_f64().unwrap(), 0.0);
        let expr = value::list(&mut heap, &[minus, Value::Fixnum(5)]).unwrap();
        assert_eq!(eval(&mut heap, &reserved, expr, Value::Nil).unwrap().as_f64().unwrap(), -5.0);
        let expr =
            value::list(&mut heap, &[minus, Value::Fixnum(10), Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3)])
                .unwrap();
        assert_eq!(eval(&mut heap, &reserved, expr, Value::Nil).unwrap().as_f64().unwrap(), 4.0);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let (mut heap, reserved) = new_context();
        let slash = Value::Symbol(heap.intern("/").unwrap());
        let expr = value::list(&mut heap, &[slash, Value::Fixnum(1), Value::Fixnum(0)]).unwrap();
        assert_eq!(eval(&mut heap, &reserved, expr, Value::Nil), Err(Error::DivisionByZero));
    }

    #[test]
    fn if_falls_through_to_trailing_else() {
        let (mut heap, reserved) = new_context();
        let if_sym = Value::Symbol(heap.intern("if").unwrap());
        let expr = value::list(&mut heap, &[if_sym, Value::Boolean(false), Value::Fixnum(1), Value::Fixnum(9)]).unwrap();
        let result = eval(&mut heap, &reserved, expr, Value::Nil).unwrap();
        assert_eq!(result.as_f64().unwrap(), 9.0);
    }

    #[test]
    fn if_falls_through_to_a_falsy_trailing_else_as_nil() {
        let (mut heap, reserved) = new_context();
        let if_sym = Value::Symbol(heap.intern("if").unwrap());
        let expr =
            value::list(&mut heap, &[if_sym, Value::Boolean(false), Value::Fixnum(1), Value::Boolean(false)]).unwrap();
        let result = eval(&mut heap, &reserved, expr, Value::Nil).unwrap();
        assert_eq!(result, Value::Nil);
    }

    #[test]
    fn do_early_return_bubbles_out_unchanged_at_top_level() {
        let (mut heap, reserved) = new_context();
        let do_sym = reserved.specials.do_;
        let return_sym = Value::Symbol(heap.intern("return").unwrap());
        let return_form = value::list(&mut heap, &[return_sym, Value::Fixnum(7)]).unwrap();
        let expr = value::list(&mut heap, &[do_sym, return_form, Value::Fixnum(9)]).unwrap();
        let result = eval(&mut heap, &reserved, expr, Value::Nil).unwrap();
        assert!(is_return_sentinel(&reserved, result));
        assert_eq!(result.cdr().unwrap().as_f64().unwrap(), 7.0);
    }

    #[test]
    fn closures_share_mutable_upvalues_across_calls() {
        let (mut heap, reserved) = new_context();
        let n_sym = Value::Symbol(heap.intern("n").unwrap());
        let plus_sym = Value::Symbol(heap.intern("+").unwrap());
        let assign_sym = Value::Symbol(heap.intern("=").unwrap());
        let return_sym = Value::Symbol(heap.intern("return").unwrap());

        let plus_form = value::list(&mut heap, &[plus_sym, n_sym, Value::Fixnum(1)]).unwrap();
        let assign_form = value::list(&mut heap, &[assign_sym, n_sym, plus_form]).unwrap();
        let return_form = value::list(&mut heap, &[return_sym, n_sym]).unwrap();
        let inner_body = value::list(&mut heap, &[reserved.specials.do_, assign_form, return_form]).unwrap();
        let inner_fn = value::list(&mut heap, &[reserved.specials.fn_, Value::Nil, inner_body]).unwrap();

        let let_form = value::list(&mut heap, &[reserved.specials.let_, n_sym, Value::Fixnum(0)]).unwrap();
        let outer_body = value::list(&mut heap, &[reserved.specials.do_, let_form, inner_fn]).unwrap();
        let outer_fn = value::list(&mut heap, &[reserved.specials.fn_, Value::Nil, outer_body]).unwrap();

        let make_counter = eval(&mut heap, &reserved, outer_fn, Value::Nil).unwrap();
        let counter = call_value(&mut heap, &reserved, make_counter, &[]).unwrap();
        assert_eq!(call_value(&mut heap, &reserved, counter, &[]).unwrap().as_f64().unwrap(), 1.0);
        assert_eq!(call_value(&mut heap, &reserved, counter, &[]).unwrap().as_f64().unwrap(), 2.0);
        assert_eq!(call_value(&mut heap, &reserved, counter, &[]).unwrap().as_f64().unwrap(), 3.0);
    }

    #[test]
    fn dotted_params_bind_rest_and_too_few_args_errors() {
        let (mut heap, reserved) = new_context();
        let a_sym = Value::Symbol(heap.intern("a").unwrap());
        let rest_sym = Value::Symbol(heap.intern("rest").unwrap());
        let params = value::cons(&mut heap, a_sym, rest_sym).unwrap();
        let fn_form = value::list(&mut heap, &[reserved.specials.fn_, params, rest_sym]).unwrap();
        let f = eval(&mut heap, &reserved, fn_form, Value::Nil).unwrap();

        let result = call_value(&mut heap, &reserved, f, &[Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3)]).unwrap();
        let (items, _) = value::list_elements(result).unwrap();
        assert_eq!(items.len(), 2);

        let result = call_value(&mut heap, &reserved, f, &[Value::Fixnum(1)]).unwrap();
        assert!(result.is_nil());

        assert_eq!(call_value(&mut heap, &reserved, f, &[]), Err(Error::TooFewArguments));
    }

    #[test]
    fn macro_rewrites_call_site_in_place_and_reuses_expansion() {
        let (mut heap, reserved) = new_context();
        let list_sym = Value::Symbol(heap.intern("list").unwrap());
        let assign_sym = Value::Symbol(heap.intern("=").unwrap());
        let a_sym = Value::Symbol(heap.intern("a").unwrap());
        let b_sym = Value::Symbol(heap.intern("b").unwrap());
        let tmp_sym = Value::Symbol(heap.intern("tmp").unwrap());

        let quoted = |heap: &mut Heap, v: Value| value::list(heap, &[reserved.specials.quote, v]).unwrap();

        let let_tmp_a =
            value::list(&mut heap, &[list_sym, quoted(&mut heap, reserved.specials.let_), quoted(&mut heap, tmp_sym), a_sym])
                .unwrap();
        let assign_a_b =
            value::list(&mut heap, &[list_sym, quoted(&mut heap, assign_sym), a_sym, b_sym]).unwrap();
        let assign_b_tmp =
            value::list(&mut heap, &[list_sym, quoted(&mut heap, assign_sym), b_sym, quoted(&mut heap, tmp_sym)])
                .unwrap();
        let mac_body =
            value::list(&mut heap, &[list_sym, quoted(&mut heap, reserved.specials.do_), let_tmp_a, assign_a_b, assign_b_tmp])
                .unwrap();
        let params = value::list(&mut heap, &[a_sym, b_sym]).unwrap();
        let mac_form = value::list(&mut heap, &[reserved.specials.mac, params, mac_body]).unwrap();
        let swap = eval(&mut heap, &reserved, mac_form, Value::Nil).unwrap();

        let x_sym = Value::Symbol(heap.intern("x").unwrap());
        let y_sym = Value::Symbol(heap.intern("y").unwrap());
        let let1 = value::list(&mut heap, &[reserved.specials.let_, x_sym, Value::Fixnum(1)]).unwrap();
        let let2 = value::list(&mut heap, &[reserved.specials.let_, y_sym, Value::Fixnum(2)]).unwrap();
        eval(&mut heap, &reserved, let1, Value::Nil).unwrap();
        eval(&mut heap, &reserved, let2, Value::Nil).unwrap();

        let swap_quoted = quoted(&mut heap, swap);
        let call_expr = value::list(&mut heap, &[swap_quoted, x_sym, y_sym]).unwrap();
        eval(&mut heap, &reserved, call_expr, Value::Nil).unwrap();
        assert_eq!(eval(&mut heap, &reserved, x_sym, Value::Nil).unwrap().as_f64().unwrap(), 2.0);
        assert_eq!(eval(&mut heap, &reserved, y_sym, Value::Nil).unwrap().as_f64().unwrap(), 1.0);

        // re-invoking the same call cell re-uses the expanded `do` form.
        eval(&mut heap, &reserved, call_expr, Value::Nil).unwrap();
        assert_eq!(eval(&mut heap, &reserved, x_sym, Value::Nil).unwrap().as_f64().unwrap(), 1.0);
        assert_eq!(eval(&mut heap, &reserved, y_sym, Value::Nil).unwrap().as_f64().unwrap(), 2.0);
    }

    #[test]
    fn module_export_builds_an_alist_and_get_looks_it_up() {
        let (mut heap, reserved) = new_context();
        let module_sym = Value::Symbol(heap.intern("module").unwrap());
        let export_sym = Value::Symbol(heap.intern("export").unwrap());
        let answer_sym = Value::Symbol(heap.intern("answer").unwrap());
        let name = value::new_string(&mut heap, "m".to_string()).unwrap();

        let let_answer = value::list(&mut heap, &[reserved.specials.let_, answer_sym, Value::Fixnum(42)]).unwrap();
        let export_form = value::list(&mut heap, &[export_sym, let_answer]).unwrap();
        let module_form = value::list(&mut heap, &[module_sym, name, export_form]).unwrap();
        eval(&mut heap, &reserved, module_form, Value::Nil).unwrap();

        let get_sym = Value::Symbol(heap.intern("get").unwrap());
        let m_sym = Value::Symbol(heap.intern("m").unwrap());
        let get_form = value::list(
            &mut heap,
            &[get_sym, m_sym, value::list(&mut heap, &[reserved.specials.quote, answer_sym]).unwrap()],
        )
        .unwrap();
        let result = eval(&mut heap, &reserved, get_form, Value::Nil).unwrap();
        assert_eq!(result.as_f64().unwrap(), 42.0);
    }

    #[test]
    fn export_outside_module_is_an_error() {
        let (mut heap, reserved) = new_context();
        let export_sym = Value::Symbol(heap.intern("export").unwrap());
        let x_sym = Value::Symbol(heap.intern("x").unwrap());
        let let_x = value::list(&mut heap, &[reserved.specials.let_, x_sym, Value::Fixnum(1)]).unwrap();
        let export_form = value::list(&mut heap, &[export_sym, let_x]).unwrap();
        assert_eq!(eval(&mut heap, &reserved, export_form, Value::Nil), Err(Error::ExportOutsideModule));
    }
}
