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

//! A small embeddable language: mark-sweep GC, S-expression core, and an
//! optional C-like surface syntax that desugars to it (§1–§2).
//!
//! [`Context`] is the one thing an embedder needs: it owns the heap, the
//! reserved symbols the evaluator depends on, and the hooks a host can
//! install for its own `PTR` cells and for fatal-error reporting.

pub mod analyze;
pub mod environment;
pub mod error;
pub mod eval;
pub mod heap;
pub mod host;
pub mod print;
pub mod read;
pub mod surface;
pub mod value;

use std::ffi::c_void;
use std::fmt;

use error::{Error, Result};
use eval::Reserved;
use heap::{Heap, HeapConfig, ToGcThing};
use host::Handlers;
use value::Value;

/// One interpreter instance: a heap, its reserved symbols, and the hooks an
/// embedder has installed. Every value produced by one context is only
/// meaningful to that same context -- there is no cross-context sharing of
/// arena pointers (Design Notes, "Global mutable state").
pub struct Context {
    heap: Heap,
    reserved: Reserved,
    pub handlers: Handlers,
    root_env: Value,
}

impl Context {
    /// Initialize a fresh context with the given arena/GC tuning.
    pub fn with_config(config: HeapConfig) -> Context {
        let mut heap = Heap::new(config);
        let reserved = eval::bootstrap(&mut heap);
        host::register(&mut heap, "print", builtin_print).expect("registering print");
        host::register(&mut heap, "println", builtin_println).expect("registering println");
        Context { heap, reserved, handlers: Handlers::default(), root_env: Value::Nil }
    }

    /// Initialize a fresh context with default arena sizes (§4.14).
    pub fn new() -> Context {
        Context::with_config(HeapConfig::default())
    }

    // -- reading / evaluating / writing --------------------------------

    /// Parse one S-expression off `next_byte`, a zero-argument byte
    /// producer returning `0` at EOF (§6's reader-callback contract).
    /// Returns `Ok(None)` at EOF.
    pub fn read(&mut self, next_byte: &mut dyn FnMut() -> u8) -> Result<Option<Value>> {
        let mut reader = read::Reader::new(next_byte);
        reader.read(&mut self.heap)
    }

    pub fn eval(&mut self, expr: Value) -> Result<Value> {
        eval::eval(&mut self.heap, &self.reserved, expr, self.root_env)
    }

    /// Read one core-syntax S-expression from `source` and evaluate it, for
    /// callers that already have a whole core form in memory rather than a
    /// streaming byte source (e.g. driving `mac`/dotted-parameter forms the
    /// surface syntax cannot express). Errors if `source` holds no form.
    pub fn eval_str(&mut self, source: &str) -> Result<Value> {
        let form = read::read_one(&mut self.heap, source)?
            .ok_or_else(|| Error::Custom("no form to evaluate".to_string()))?;
        self.eval(form)
    }

    /// Compile a surface-syntax program to a core form without evaluating
    /// it, or `Ok(None)` if the source held no top-level forms.
    pub fn compile(&mut self, source: &str) -> Result<Option<Value>> {
        surface::compile(&mut self.heap, source)
    }

    /// Compile and evaluate a surface-syntax program in one step.
    pub fn do_string(&mut self, source: &str) -> Result<Value> {
        surface::do_string(&mut self.heap, &self.reserved, source, self.root_env)
    }

    /// Write `v` to `f`, matching `fmt::Display`'s contract (the writer-
    /// callback form of §6's `write` is `write_value`'s `fmt::Formatter`
    /// path applied to stdout/a file by the caller).
    pub fn write(&self, v: Value, f: &mut fmt::Formatter) -> fmt::Result {
        print::write_value(v, f)
    }

    /// The byte-callback form of `write` (§6): feeds `v`'s printed
    /// representation to `sink` one byte at a time, for a caller driving a
    /// real writer (stdout, a file) rather than an in-memory formatter.
    pub fn write_to(&self, v: Value, sink: &mut dyn FnMut(u8), quote_strings: bool) {
        print::write_to(v, sink, quote_strings)
    }

    pub fn to_string(&self, v: Value) -> String {
        format!("{v}")
    }

    // -- construction ----------------------------------------------------

    pub fn cons(&mut self, car: Value, cdr: Value) -> Result<Value> {
        value::cons(&mut self.heap, car, cdr)
    }

    pub fn boolean(&self, b: bool) -> Value {
        Value::Boolean(b)
    }

    pub fn nil(&self) -> Value {
        Value::Nil
    }

    /// Build a fixnum directly, bypassing `make_number`'s range check.
    pub fn number(&self, n: i32) -> Value {
        Value::Fixnum(n)
    }

    /// Fixnum if `n` round-trips through `i32`, a boxed number otherwise.
    pub fn make_number(&mut self, n: f64) -> Result<Value> {
        value::make_number(&mut self.heap, n)
    }

    pub fn string(&mut self, s: &str) -> Result<Value> {
        value::new_string(&mut self.heap, s.to_string())
    }

    pub fn symbol(&mut self, name: &str) -> Result<Value> {
        Ok(Value::Symbol(self.heap.intern(name)?))
    }

    pub fn c_func(&mut self, f: host::CFunc) -> Result<Value> {
        Ok(Value::CFunc(self.heap.allocate_cfunc(f)?))
    }

    pub fn ptr(&mut self, raw: *mut c_void) -> Result<Value> {
        host::make_ptr(&mut self.heap, raw)
    }

    pub fn list(&mut self, items: &[Value]) -> Result<Value> {
        value::list(&mut self.heap, items)
    }

    // -- inspection --------------------------------------------------------

    pub fn type_name(&self, v: Value) -> &'static str {
        v.type_name()
    }

    pub fn is_nil(&self, v: Value) -> bool {
        v.is_nil()
    }

    pub fn car(&self, v: Value) -> Result<Value> {
        v.car()
    }

    pub fn cdr(&self, v: Value) -> Result<Value> {
        v.cdr()
    }

    pub fn to_number(&self, v: Value) -> Result<f64> {
        v.as_f64()
    }

    pub fn to_ptr(&self, v: Value) -> Option<*mut c_void> {
        host::to_ptr(v)
    }

    /// Bind `name`'s global slot to `v` directly (the embedding API's
    /// `set`, distinct from the evaluator's own `let`/`=`).
    pub fn set(&mut self, name: &str, v: Value) -> Result<()> {
        let sym = Value::Symbol(self.heap.intern(name)?);
        sym.set_cdr(v)
    }

    pub fn next_arg(&self, args: &mut Value) -> Result<Value> {
        host::next_arg(args)
    }

    // -- root discipline --------------------------------------------------

    pub fn save_gc(&self) -> usize {
        self.heap.save_gc()
    }

    pub fn push_gc(&mut self, v: Value) -> Result<()> {
        self.heap.push_gc(v.to_gc_thing())
    }

    pub fn restore_gc(&mut self, depth: usize) {
        self.heap.restore_gc(depth)
    }

    pub fn mark(&mut self, v: Value) -> Result<()> {
        self.push_gc(v)
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    // -- failure -----------------------------------------------------------

    /// The single error entry point (§7): snapshot and clear the call
    /// trail, hand it to the installed handler, and if the handler
    /// returns, print the message and trail and terminate the process.
    /// Every runtime `Result::Err` this context produces is meant to reach
    /// this method exactly once, at the top of whatever drives the
    /// context (a REPL, a file runner, a host's own call site) -- it is
    /// never invoked from inside `eval`/`read`/`surface` themselves, which
    /// only ever propagate errors with `?`.
    pub fn fail(&mut self, err: Error) -> ! {
        let trail = self.heap.snapshot_calltrail();
        if let Some(handler) = self.handlers.on_error.as_mut() {
            handler(&err, &trail);
        }
        eprintln!("error: {err}");
        for frame in trail.iter().take(16) {
            eprintln!("  in {frame}");
        }
        std::process::exit(1);
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::new()
    }
}

fn builtin_print(_heap: &mut Heap, args: Value) -> Result<Value> {
    let mut args = args;
    let mut first = true;
    while let Ok(v) = host::next_arg(&mut args) {
        if !first {
            print!(" ");
        }
        first = false;
        print!("{v}");
    }
    Ok(Value::Nil)
}

fn builtin_println(heap: &mut Heap, args: Value) -> Result<Value> {
    builtin_print(heap, args)?;
    println!();
    Ok(Value::Nil)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_precedence_end_to_end() {
        let mut ctx = Context::new();
        let result = ctx.do_string("let x = 1 + 2 * 3; x;").unwrap();
        assert_eq!(ctx.to_number(result).unwrap(), 7.0);
    }

    #[test]
    fn closure_counter_mutates_across_calls() {
        let mut ctx = Context::new();
        let src = "fn make_counter() { let n = 0; fn() { n = n + 1; return n; } } let c = make_counter(); c(); c(); c();";
        let result = ctx.do_string(src).unwrap();
        assert_eq!(ctx.to_number(result).unwrap(), 3.0);
    }

    #[test]
    fn recursive_fibonacci() {
        let mut ctx = Context::new();
        let src = "fn fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } fib(10);";
        let result = ctx.do_string(src).unwrap();
        assert_eq!(ctx.to_number(result).unwrap(), 55.0);
    }

    #[test]
    fn module_export_and_get() {
        let mut ctx = Context::new();
        let src = "module \"m\" { export let answer = 42; export fn twice(x) { return x * 2; } } m.answer;";
        let result = ctx.do_string(src).unwrap();
        assert_eq!(ctx.to_number(result).unwrap(), 42.0);

        let result = ctx.do_string("m.twice(21);").unwrap();
        assert_eq!(ctx.to_number(result).unwrap(), 42.0);
    }

    #[test]
    fn early_return_escapes_a_while_loop() {
        let mut ctx = Context::new();
        let src = "fn f() { while (true) { return 7; } return 9; } f();";
        let result = ctx.do_string(src).unwrap();
        assert_eq!(ctx.to_number(result).unwrap(), 7.0);
    }

    #[test]
    fn unbound_global_reads_as_nil() {
        let mut ctx = Context::new();
        let v = ctx.do_string("never_bound_anywhere;").unwrap();
        assert!(ctx.is_nil(v));
    }

    #[test]
    fn set_binds_a_global_outside_the_evaluator() {
        let mut ctx = Context::new();
        let v = ctx.number(99);
        ctx.set("answer", v).unwrap();
        let result = ctx.do_string("answer;").unwrap();
        assert_eq!(ctx.to_number(result).unwrap(), 99.0);
    }
}
