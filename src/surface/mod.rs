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

//! The optional C-like surface syntax (§4.9, §6): `compile` turns source
//! text into a core form without evaluating it, `do_string` compiles and
//! evaluates in one step.

mod lexer;
mod parser;

use crate::eval::{self, Reserved};
use crate::heap::Heap;
use crate::value::Value;

/// Compile `source` to a single core `Value`, or `Ok(None)` if it held no
/// top-level forms (an empty or all-comment program). A syntax error comes
/// back as `Err(Error::Syntax(_))` carrying the parser's own `[line N]
/// Error at '...': msg` diagnostic (§4.9), not a generic message.
pub fn compile(heap: &mut Heap, source: &str) -> crate::error::Result<Option<Value>> {
    parser::compile(heap, source)
}

/// Compile and evaluate `source` in one step, in the root environment.
pub fn do_string(
    heap: &mut Heap,
    reserved: &Reserved,
    source: &str,
    env: Value,
) -> crate::error::Result<Value> {
    match compile(heap, source)? {
        Some(form) => eval::eval(heap, reserved, form, env),
        None => Ok(Value::Nil),
    }
}
