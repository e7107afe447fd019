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

//! Host extension points: foreign function registration and the GC hooks a
//! host can install for its own `PTR` cells (§4.2, §6).
//!
//! Host functions are the one genuinely open extension point in an
//! otherwise closed evaluator dispatch (Design Notes, "Dynamic dispatch"),
//! so they are represented as a plain function pointer rather than a trait
//! object — a `CFUNC` cell is exactly as cheap to mark/sweep as any other
//! arena slot.

use std::ffi::c_void;

use crate::error::{Error, Result};
use crate::heap::Heap;
use crate::value::Value;

/// A host-registered function: receives the already-evaluated argument
/// list as an ordinary core list and returns a value.
pub type CFunc = fn(&mut Heap, Value) -> Result<Value>;

/// The hooks an embedder may install on a context (§6's `handlers`).
///
/// `on_error` is invoked exactly once per failure, at the single error
/// entry point (§7); `on_mark`/`on_gc` let a host that stashes external
/// resources behind `PTR` cells keep them in step with this context's GC
/// cycles.
#[derive(Default)]
pub struct Handlers {
    pub on_error: Option<Box<dyn FnMut(&Error, &[Value])>>,
    pub on_mark: Option<Box<dyn Fn(*mut c_void)>>,
    pub on_gc: Option<Box<dyn FnMut(*mut c_void)>>,
}

/// Register `f` as a host function bound to `name` in `heap`'s globals,
/// allocating its `CFUNC` cell and wiring up the symbol's global slot.
pub fn register(heap: &mut Heap, name: &str, f: CFunc) -> Result<()> {
    let ptr = heap.allocate_cfunc(f)?;
    let sym = Value::Symbol(heap.intern(name)?);
    sym.set_cdr(Value::CFunc(ptr))
}

/// Extract the next argument from an argument list, erroring on too-few
/// arguments or a dotted tail (§6's `next_arg`).
pub fn next_arg(args: &mut Value) -> Result<Value> {
    match *args {
        Value::Pair(p) => {
            *args = p.cdr;
            Ok(p.car)
        }
        Value::Nil => Err(Error::TooFewArguments),
        other => Err(Error::TypeMismatch { expected: "argument list", got: other.type_name() }),
    }
}

/// Wrap a raw host pointer as a `PTR` value.
pub fn make_ptr(heap: &mut Heap, raw: *mut c_void) -> Result<Value> {
    Ok(Value::Ptr(heap.allocate_ptr(raw)?))
}

/// Recover a `PTR` value's raw pointer, or `None` if it was never set (or
/// `v` is not a `PTR` value).
pub fn to_ptr(v: Value) -> Option<*mut c_void> {
    match v {
        Value::Ptr(p) => p.0,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;

    fn double(heap: &mut Heap, args: Value) -> Result<Value> {
        let mut args = args;
        let n = next_arg(&mut args)?;
        crate::value::make_number(heap, n.as_f64()? * 2.0)
    }

    #[test]
    fn register_binds_a_callable_global() {
        let mut heap = Heap::new(HeapConfig::default());
        register(&mut heap, "double", double).unwrap();
        let sym = Value::Symbol(heap.intern("double").unwrap());
        let bound = sym.cdr().unwrap();
        assert!(matches!(bound, Value::CFunc(_)));
    }

    #[test]
    fn next_arg_errors_on_too_few() {
        let mut args = Value::Nil;
        assert_eq!(next_arg(&mut args), Err(Error::TooFewArguments));
    }

    #[test]
    fn ptr_round_trips_through_the_heap() {
        let mut heap = Heap::new(HeapConfig::default());
        let mut sentinel = 0u8;
        let raw = &mut sentinel as *mut u8 as *mut c_void;
        let v = make_ptr(&mut heap, raw).unwrap();
        assert_eq!(to_ptr(v), Some(raw));
    }
}
