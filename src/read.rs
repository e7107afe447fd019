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

//! The core reader: parses S-expression text into `Value`s over a
//! caller-supplied byte callback (§4.7, §6's reader-callback contract).
//!
//! The callback is a zero-argument byte producer returning `b'\0'` at EOF,
//! matching the embedding API exactly; `Reader` adds one byte of lookahead
//! on top of it.

use crate::error::{Error, Result};
use crate::heap::{Heap, ToGcThing};
use crate::value::{self, Value};

/// A source position. This implementation does not track full spans
/// (Section 1 scope); `unknown()` is the placeholder every reader-produced
/// value carries today.
#[derive(Debug, Clone, Copy, Default)]
pub struct Location {
    pub line: u32,
}

impl Location {
    pub fn unknown() -> Location {
        Location { line: 0 }
    }
}

/// A bare token longer than this is a "symbol too long" error, matching
/// the reference implementation's fixed-size scratch buffer (§4.7).
const MAX_TOKEN_LEN: usize = 63;

fn is_delimiter(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b'(' | b')' | b'"' | b'\'')
}

enum Token {
    Eof,
    Open,
    Close,
    Quote,
    Str(String),
    Bare(String),
}

/// One-character-lookahead reader over a caller-supplied byte callback.
pub struct Reader<'a> {
    next_byte: &'a mut dyn FnMut() -> u8,
    peeked: Option<u8>,
}

impl<'a> Reader<'a> {
    pub fn new(next_byte: &'a mut dyn FnMut() -> u8) -> Reader<'a> {
        Reader { next_byte, peeked: None }
    }

    fn peek(&mut self) -> u8 {
        if self.peeked.is_none() {
            self.peeked = Some((self.next_byte)());
        }
        self.peeked.unwrap()
    }

    fn advance(&mut self) -> u8 {
        let b = self.peek();
        self.peeked = None;
        b
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), b' ' | b'\t' | b'\n' | b'\r') {
            self.advance();
        }
    }

    /// Parse one S-expression, or `Ok(None)` at EOF.
    pub fn read(&mut self, heap: &mut Heap) -> Result<Option<Value>> {
        match self.next_token()? {
            Token::Eof => Ok(None),
            tok => Ok(Some(self.read_from_token(heap, tok)?)),
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_ws();
        match self.peek() {
            0 => Ok(Token::Eof),
            b'(' => {
                self.advance();
                Ok(Token::Open)
            }
            b')' => {
                self.advance();
                Ok(Token::Close)
            }
            b'\'' => {
                self.advance();
                Ok(Token::Quote)
            }
            b'"' => {
                self.advance();
                Ok(Token::Str(self.read_string_body()?))
            }
            _ => Ok(Token::Bare(self.read_bare_token()?)),
        }
    }

    fn read_bare_token(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        loop {
            let b = self.peek();
            if b == 0 || is_delimiter(b) {
                break;
            }
            if buf.len() >= MAX_TOKEN_LEN {
                return Err(Error::Custom("symbol too long".to_string()));
            }
            buf.push(self.advance());
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn read_string_body(&mut self) -> Result<String> {
        let mut buf = Vec::new();
        loop {
            match self.advance() {
                0 => return Err(Error::Custom("unclosed string".to_string())),
                b'"' => break,
                b'\\' => {
                    let escaped = match self.advance() {
                        b'n' => b'\n',
                        b'r' => b'\r',
                        b't' => b'\t',
                        other => other,
                    };
                    buf.push(escaped);
                }
                other => buf.push(other),
            }
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn read_from_token(&mut self, heap: &mut Heap, tok: Token) -> Result<Value> {
        match tok {
            Token::Eof => Err(Error::Custom("unexpected eof".to_string())),
            Token::Close => Err(Error::Custom("stray ')'".to_string())),
            Token::Open => self.read_list(heap),
            Token::Quote => {
                let inner_tok = self.next_token()?;
                let quoted = self.read_from_token(heap, inner_tok)?;
                let quote_sym = Value::Symbol(heap.intern("quote")?);
                let tail = value::cons(heap, quoted, Value::Nil)?;
                value::cons(heap, quote_sym, tail)
            }
            Token::Str(s) => value::new_string(heap, s),
            Token::Bare(s) => bare_to_value(heap, &s),
        }
    }

    /// Read the elements of a list after its opening `(` has been
    /// consumed, handling a lone `.` token as the dotted-pair marker.
    ///
    /// Only the elements collected so far stay rooted between iterations --
    /// each element's own transient sub-allocations are unrooted again as
    /// soon as it's read, the same save/restore-per-element discipline the
    /// surface parser's `block` uses, so one long flat list literal doesn't
    /// run the root stack up any faster than its element count demands.
    fn read_list(&mut self, heap: &mut Heap) -> Result<Value> {
        let mut items: Vec<Value> = vec![];
        loop {
            match self.next_token()? {
                Token::Eof => return Err(Error::Custom("unclosed list".to_string())),
                Token::Close => return finish_list(heap, items, Value::Nil),
                Token::Bare(s) if s == "." => {
                    let tail_tok = self.next_token()?;
                    let depth = heap.save_gc();
                    let tail = self.read_from_token(heap, tail_tok)?;
                    heap.restore_gc(depth);
                    heap.push_gc(tail.to_gc_thing())?;
                    return match self.next_token()? {
                        Token::Close => finish_list(heap, items, tail),
                        _ => Err(Error::Custom("expect ')' after dotted pair".to_string())),
                    };
                }
                other => {
                    let depth = heap.save_gc();
                    let item = self.read_from_token(heap, other)?;
                    heap.restore_gc(depth);
                    heap.push_gc(item.to_gc_thing())?;
                    items.push(item);
                }
            }
        }
    }
}

/// Fold a flat `items` list plus its (possibly dotted) `tail` into cons
/// cells, innermost first.
fn finish_list(heap: &mut Heap, items: Vec<Value>, tail: Value) -> Result<Value> {
    let mut result = tail;
    for item in items.into_iter().rev() {
        result = value::cons(heap, item, result)?;
    }
    Ok(result)
}

fn bare_to_value(heap: &mut Heap, s: &str) -> Result<Value> {
    match s {
        "nil" => Ok(Value::Nil),
        "true" => Ok(Value::Boolean(true)),
        "false" => Ok(Value::Boolean(false)),
        _ => match s.parse::<f64>() {
            Ok(n) => value::make_number(heap, n),
            Err(_) => Ok(Value::Symbol(heap.intern(s)?)),
        },
    }
}

/// Parse one value from a plain `&str` in one shot, for callers (tests,
/// `Context::eval_str`) that already have the whole source in memory
/// rather than a streaming byte source.
pub fn read_one(heap: &mut Heap, source: &str) -> Result<Option<Value>> {
    let bytes = source.as_bytes();
    let mut pos = 0usize;
    let mut next_byte = move || {
        let b = bytes.get(pos).copied().unwrap_or(0);
        pos += 1;
        b
    };
    let mut reader = Reader::new(&mut next_byte);
    reader.read(heap)
}

/// Parse every value in a `&str`, left to right.
pub fn read_all(heap: &mut Heap, source: &str) -> Result<Vec<Value>> {
    let bytes = source.as_bytes();
    let mut pos = 0usize;
    let mut next_byte = move || {
        let b = bytes.get(pos).copied().unwrap_or(0);
        pos += 1;
        b
    };
    let mut reader = Reader::new(&mut next_byte);
    let mut out = vec![];
    while let Some(v) = reader.read(heap)? {
        out.push(v);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;

    #[test]
    fn reads_fixnums_and_symbols() {
        let mut heap = Heap::new(HeapConfig::default());
        let v = read_one(&mut heap, "42").unwrap().unwrap();
        assert_eq!(v.as_f64().unwrap(), 42.0);
        let v = read_one(&mut heap, "foo").unwrap().unwrap();
        assert!(matches!(v, Value::Symbol(_)));
    }

    #[test]
    fn reads_booleans_and_nil() {
        let mut heap = Heap::new(HeapConfig::default());
        assert!(matches!(read_one(&mut heap, "true").unwrap().unwrap(), Value::Boolean(true)));
        assert!(matches!(read_one(&mut heap, "false").unwrap().unwrap(), Value::Boolean(false)));
        assert!(read_one(&mut heap, "nil").unwrap().unwrap().is_nil());
    }

    #[test]
    fn reads_a_proper_list() {
        let mut heap = Heap::new(HeapConfig::default());
        let v = read_one(&mut heap, "(1 2 3)").unwrap().unwrap();
        let (items, tail) = value::list_elements(v).unwrap();
        assert_eq!(items.len(), 3);
        assert!(tail.is_nil());
    }

    #[test]
    fn reads_a_dotted_pair() {
        let mut heap = Heap::new(HeapConfig::default());
        let v = read_one(&mut heap, "(1 . 2)").unwrap().unwrap();
        assert_eq!(v.car().unwrap().as_f64().unwrap(), 1.0);
        assert_eq!(v.cdr().unwrap().as_f64().unwrap(), 2.0);
    }

    #[test]
    fn quote_prefix_desugars() {
        let mut heap = Heap::new(HeapConfig::default());
        let v = read_one(&mut heap, "'x").unwrap().unwrap();
        let (items, _) = value::list_elements(v).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_symbol_name().unwrap(), "quote");
    }

    #[test]
    fn reads_escaped_strings() {
        let mut heap = Heap::new(HeapConfig::default());
        let v = read_one(&mut heap, "\"a\\nb\"").unwrap().unwrap();
        assert_eq!(v.as_str().unwrap(), "a\nb");
    }

    #[test]
    fn stray_close_paren_is_an_error() {
        let mut heap = Heap::new(HeapConfig::default());
        assert!(read_one(&mut heap, ")").is_err());
    }

    #[test]
    fn unclosed_list_is_an_error() {
        let mut heap = Heap::new(HeapConfig::default());
        assert!(read_one(&mut heap, "(1 2").is_err());
    }

    #[test]
    fn symbol_over_63_bytes_is_an_error() {
        let mut heap = Heap::new(HeapConfig::default());
        let long = "a".repeat(64);
        assert!(read_one(&mut heap, &long).is_err());
    }

    #[test]
    fn reads_multiple_top_level_forms() {
        let mut heap = Heap::new(HeapConfig::default());
        let forms = read_all(&mut heap, "1 2 3").unwrap();
        assert_eq!(forms.len(), 3);
    }

    #[test]
    fn reading_a_long_flat_list_does_not_overflow_the_root_stack() {
        // Each element's own transient allocations must be unrooted again as
        // soon as it's read -- if `read_list` kept every one of them rooted
        // for the rest of the read, a list well short of the bounded root
        // stack's capacity would already overflow it.
        let mut heap = Heap::new(HeapConfig::default());
        let mut src = String::from("(");
        for i in 0..500 {
            src.push_str(&i.to_string());
            src.push(' ');
        }
        src.push(')');
        let v = read_one(&mut heap, &src).unwrap().unwrap();
        assert_eq!(value::len(v), 500);
    }
}
