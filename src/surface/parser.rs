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

//! A Pratt parser for the C-like surface syntax, desugaring straight down
//! to core `Value` forms (§4.9). Every declaration and statement becomes
//! the same list shapes the core evaluator already understands -- `let`,
//! `fn`, `if`, `while`, `do`, `module`, `export`, `import`, `return` -- so
//! nothing downstream of this module needs to know the surface syntax
//! ever existed.
//!
//! String literals are unescaped with the same `\n \r \t` rules the core
//! reader applies to its own strings, even though the original surface
//! grammar this is grounded on left string literals raw. Two escaping
//! rules for the same quoted-string syntax would be a trap for anyone
//! embedding strings in generated or `module`-wrapped source; one rule,
//! reused from the reader, is simpler and is what a host author would
//! expect.

use crate::error::{Error, Result};
use crate::heap::{Heap, ToGcThing};
use crate::value::{self, Value};

use super::lexer::{Lexer, Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

fn precedence_of(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::LParen | TokenKind::Dot => Precedence::Call,
        TokenKind::Minus | TokenKind::Plus => Precedence::Term,
        TokenKind::Slash | TokenKind::Star => Precedence::Factor,
        TokenKind::BangEqual | TokenKind::EqualEqual => Precedence::Equality,
        TokenKind::Equal => Precedence::Assignment,
        TokenKind::Greater | TokenKind::GreaterEqual | TokenKind::Less | TokenKind::LessEqual => {
            Precedence::Comparison
        }
        TokenKind::And => Precedence::And,
        TokenKind::Or => Precedence::Or,
        _ => Precedence::None,
    }
}

/// Parses a complete surface program into a core `(do decl1 decl2 ...)`
/// form (or the degenerate `nil`/single-form shortcuts), mirroring
/// `fex_compile`'s driving loop.
pub struct Parser<'h> {
    heap: &'h mut Heap,
    lexer: Lexer,
    previous: Token,
    current: Token,
    had_error: bool,
    panic_mode: bool,
    /// The first diagnostic raised during this parse, in the literal
    /// `[line N] Error at '...': msg` format (§4.9). Only the first is kept,
    /// matching `panic_mode`'s one-report-per-error-region discipline.
    diagnostic: Option<String>,
}

impl<'h> Parser<'h> {
    pub fn new(heap: &'h mut Heap, source: &str) -> Parser<'h> {
        let mut lexer = Lexer::new(source);
        let current = lexer.scan();
        let previous = current.clone();
        Parser { heap, lexer, previous, current, had_error: false, panic_mode: false, diagnostic: None }
    }

    fn advance(&mut self) {
        self.previous = std::mem::replace(&mut self.current, self.lexer.scan());
        if self.current.kind == TokenKind::Error {
            let msg = self.current.text.clone();
            self.error_at_current(&msg);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, msg: &str) -> Result<()> {
        if self.current.kind == kind {
            self.advance();
            return Ok(());
        }
        self.error_at_current(msg);
        Err(Error::Syntax(self.diagnostic.clone().unwrap_or_else(|| msg.to_string())))
    }

    fn error_at_current(&mut self, msg: &str) {
        let tok = self.current.clone();
        self.error_at(&tok, msg);
    }

    fn error(&mut self, msg: &str) {
        let tok = self.previous.clone();
        self.error_at(&tok, msg);
    }

    fn error_at(&mut self, tok: &Token, msg: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let where_ = if tok.kind == TokenKind::Eof {
            "at end".to_string()
        } else {
            format!("at '{}'", tok.text)
        };
        tracing::error!(line = tok.line, %where_, %msg, "surface syntax error");
        // The tracing event above is a structured log line, invisible unless
        // a subscriber is configured to show it; the diagnostic text itself
        // is the result a caller (and ultimately a user) actually sees, so
        // it travels back through `compile`'s `Result`, not the trace.
        if self.diagnostic.is_none() {
            self.diagnostic = Some(format!("[line {}] Error {}: {}", tok.line, where_, msg));
        }
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Fn | TokenKind::Let | TokenKind::If | TokenKind::While | TokenKind::Return => return,
                _ => self.advance(),
            }
        }
    }

    // -- expression parsing --------------------------------------------

    fn parse_precedence(&mut self, min: Precedence) -> Result<Value> {
        self.advance();
        let mut left = self.prefix(self.previous.kind)?;
        while min <= precedence_of(self.current.kind) {
            self.advance();
            left = self.infix(self.previous.kind, left)?;
        }
        Ok(left)
    }

    fn expression(&mut self) -> Result<Value> {
        self.parse_precedence(Precedence::Assignment)
    }

    fn prefix(&mut self, kind: TokenKind) -> Result<Value> {
        match kind {
            TokenKind::LParen => {
                let inner = self.expression()?;
                self.consume(TokenKind::RParen, "expect ')' after expression")?;
                Ok(inner)
            }
            TokenKind::LBracket => self.parse_list_literal(),
            TokenKind::Minus => {
                let operand = self.parse_precedence(Precedence::Unary)?;
                self.make_unary("-", operand)
            }
            TokenKind::Bang => {
                let operand = self.parse_precedence(Precedence::Unary)?;
                self.make_unary("not", operand)
            }
            TokenKind::Identifier => self.symbol_from(&self.previous.text.clone()),
            TokenKind::String => self.parse_string(),
            TokenKind::Number => self.parse_number(),
            TokenKind::True => Ok(Value::Boolean(true)),
            TokenKind::False => Ok(Value::Boolean(false)),
            TokenKind::Nil => Ok(Value::Nil),
            TokenKind::Fn => self.fn_expression(),
            _ => {
                self.error("expect expression");
                Ok(Value::Nil)
            }
        }
    }

    fn infix(&mut self, kind: TokenKind, left: Value) -> Result<Value> {
        match kind {
            TokenKind::LParen => self.call_expression(left),
            TokenKind::Dot => {
                self.consume(TokenKind::Identifier, "expect property name after '.'")?;
                let property = self.symbol_from(&self.previous.text.clone())?;
                let quoted_property = self.make_unary("quote", property)?;
                self.make_binary("get", left, quoted_property)
            }
            TokenKind::Plus => self.binary_op("+", left, Precedence::Term),
            TokenKind::Minus => self.binary_op("-", left, Precedence::Term),
            TokenKind::Star => self.binary_op("*", left, Precedence::Factor),
            TokenKind::Slash => self.binary_op("/", left, Precedence::Factor),
            TokenKind::EqualEqual => self.binary_op("is", left, Precedence::Equality),
            TokenKind::BangEqual => {
                let right = self.parse_precedence(Precedence::Equality.next())?;
                let is_form = self.make_binary("is", left, right)?;
                self.make_unary("not", is_form)
            }
            TokenKind::Less => self.binary_op("<", left, Precedence::Comparison),
            TokenKind::LessEqual => self.binary_op("<=", left, Precedence::Comparison),
            TokenKind::Greater => {
                let right = self.parse_precedence(Precedence::Comparison.next())?;
                self.make_binary("<", right, left)
            }
            TokenKind::GreaterEqual => {
                let right = self.parse_precedence(Precedence::Comparison.next())?;
                self.make_binary("<=", right, left)
            }
            TokenKind::And => {
                let right = self.parse_precedence(Precedence::And.next())?;
                self.make_binary("and", left, right)
            }
            TokenKind::Or => {
                let right = self.parse_precedence(Precedence::Or.next())?;
                self.make_binary("or", left, right)
            }
            TokenKind::Equal => {
                if !matches!(left, Value::Symbol(_)) {
                    self.error("Invalid assignment target");
                }
                let value = self.parse_precedence(Precedence::Assignment)?;
                self.make_binary("=", left, value)
            }
            _ => {
                self.error("expect infix operator");
                Ok(left)
            }
        }
    }

    fn binary_op(&mut self, op: &str, left: Value, prec: Precedence) -> Result<Value> {
        let right = self.parse_precedence(prec.next())?;
        self.make_binary(op, left, right)
    }

    fn symbol_from(&mut self, name: &str) -> Result<Value> {
        Ok(Value::Symbol(self.heap.intern(name)?))
    }

    fn parse_string(&mut self) -> Result<Value> {
        let raw = self.previous.text.clone();
        let body = &raw[1..raw.len() - 1];
        value::new_string(self.heap, unescape(body))
    }

    fn parse_number(&mut self) -> Result<Value> {
        let text = self.previous.text.clone();
        if !text.contains('.') {
            if let Ok(n) = text.parse::<i32>() {
                return Ok(Value::Fixnum(n));
            }
        }
        match text.parse::<f64>() {
            Ok(n) => value::make_number(self.heap, n),
            Err(_) => {
                let tok = self.previous.clone();
                self.error_at(&tok, &format!("invalid number literal '{text}'"));
                Err(Error::Syntax(self.diagnostic.clone().unwrap_or_default()))
            }
        }
    }

    fn make_unary(&mut self, op: &str, operand: Value) -> Result<Value> {
        let depth = self.heap.save_gc();
        self.heap.push_gc(operand.to_gc_thing())?;
        let op_sym = self.symbol_from(op)?;
        let result = value::list(self.heap, &[op_sym, operand]);
        self.heap.restore_gc(depth);
        let result = result?;
        self.heap.push_gc(result.to_gc_thing())?;
        Ok(result)
    }

    fn make_binary(&mut self, op: &str, left: Value, right: Value) -> Result<Value> {
        let depth = self.heap.save_gc();
        self.heap.push_gc(left.to_gc_thing())?;
        self.heap.push_gc(right.to_gc_thing())?;
        let op_sym = self.symbol_from(op)?;
        let result = value::list(self.heap, &[op_sym, left, right]);
        self.heap.restore_gc(depth);
        let result = result?;
        self.heap.push_gc(result.to_gc_thing())?;
        Ok(result)
    }

    fn call_expression(&mut self, callee: Value) -> Result<Value> {
        let mut items = vec![callee];
        if !self.check(TokenKind::RParen) {
            loop {
                let depth = self.heap.save_gc();
                let arg = self.expression()?;
                self.heap.restore_gc(depth);
                self.heap.push_gc(arg.to_gc_thing())?;
                items.push(arg);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expect ')' after arguments")?;
        value::list(self.heap, &items)
    }

    fn parse_list_literal(&mut self) -> Result<Value> {
        let mut items = vec![self.symbol_from("list")?];
        if !self.check(TokenKind::RBracket) {
            loop {
                let depth = self.heap.save_gc();
                let elem = self.expression()?;
                self.heap.restore_gc(depth);
                self.heap.push_gc(elem.to_gc_thing())?;
                items.push(elem);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RBracket, "expect ']' after list elements")?;
        value::list(self.heap, &items)
    }

    fn fn_expression(&mut self) -> Result<Value> {
        self.consume(TokenKind::LParen, "expect '(' after 'fn'")?;
        let mut params = vec![];
        if !self.check(TokenKind::RParen) {
            loop {
                self.consume(TokenKind::Identifier, "expect parameter name")?;
                params.push(self.symbol_from(&self.previous.text.clone())?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expect ')' after parameters")?;
        self.consume(TokenKind::LBrace, "expect '{' before function body")?;
        let body = self.block()?;
        let param_list = value::list(self.heap, &params)?;
        let fn_sym = self.symbol_from("fn")?;
        value::list(self.heap, &[fn_sym, param_list, body])
    }

    // -- statement / declaration parsing --------------------------------

    fn block(&mut self) -> Result<Value> {
        let mut stmts = vec![];
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            let depth = self.heap.save_gc();
            let stmt = self.declaration()?;
            self.heap.restore_gc(depth);
            self.heap.push_gc(stmt.to_gc_thing())?;
            stmts.push(stmt);
        }
        self.consume(TokenKind::RBrace, "expect '}' after block")?;
        self.wrap_do(stmts)
    }

    fn wrap_do(&mut self, stmts: Vec<Value>) -> Result<Value> {
        match stmts.len() {
            0 => Ok(Value::Nil),
            1 => Ok(stmts[0]),
            _ => {
                let mut items = vec![self.symbol_from("do")?];
                items.extend(stmts);
                value::list(self.heap, &items)
            }
        }
    }

    fn declaration(&mut self) -> Result<Value> {
        let result = self.declaration_inner();
        if self.panic_mode {
            self.synchronize();
        }
        result
    }

    fn declaration_inner(&mut self) -> Result<Value> {
        if self.matches(TokenKind::Module) {
            return self.module_declaration();
        }
        if self.matches(TokenKind::Import) {
            return self.import_declaration();
        }
        let is_export = self.matches(TokenKind::Export);
        if self.matches(TokenKind::Let) {
            return self.var_declaration(is_export);
        }
        if self.matches(TokenKind::Fn) && self.check(TokenKind::Identifier) {
            return self.fn_declaration(is_export);
        }
        if is_export {
            self.error("Only 'let' and 'fn' declarations can be exported");
            return Ok(Value::Nil);
        }
        self.statement()
    }

    fn maybe_export(&mut self, is_export: bool, form: Value) -> Result<Value> {
        if !is_export {
            return Ok(form);
        }
        let export_sym = self.symbol_from("export")?;
        value::list(self.heap, &[export_sym, form])
    }

    fn var_declaration(&mut self, is_export: bool) -> Result<Value> {
        self.consume(TokenKind::Identifier, "expect variable name")?;
        let name = self.symbol_from(&self.previous.text.clone())?;
        let value = if self.matches(TokenKind::Equal) { self.expression()? } else { Value::Nil };
        self.consume(TokenKind::Semicolon, "expect ';' after variable declaration")?;
        let let_sym = self.symbol_from("let")?;
        let form = value::list(self.heap, &[let_sym, name, value])?;
        self.maybe_export(is_export, form)
    }

    fn fn_declaration(&mut self, is_export: bool) -> Result<Value> {
        self.consume(TokenKind::Identifier, "expect function name")?;
        let name = self.symbol_from(&self.previous.text.clone())?;
        self.consume(TokenKind::LParen, "expect '(' after function name")?;
        let mut params = vec![];
        if !self.check(TokenKind::RParen) {
            loop {
                self.consume(TokenKind::Identifier, "expect parameter name")?;
                params.push(self.symbol_from(&self.previous.text.clone())?);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expect ')' after parameters")?;
        self.consume(TokenKind::LBrace, "expect '{' before function body")?;
        let body = self.block()?;
        let param_list = value::list(self.heap, &params)?;
        let fn_sym = self.symbol_from("fn")?;
        let func = value::list(self.heap, &[fn_sym, param_list, body])?;
        let let_sym = self.symbol_from("let")?;
        let form = value::list(self.heap, &[let_sym, name, func])?;
        self.maybe_export(is_export, form)
    }

    fn module_declaration(&mut self) -> Result<Value> {
        self.consume(TokenKind::String, "expect module name string")?;
        let raw = self.previous.text.clone();
        // The module name is embedded as a self-evaluating string literal
        // (not a bare symbol), since `eval_module` evaluates this operand
        // normally and a bare symbol would be looked up as a variable.
        let name = value::new_string(self.heap, unescape(&raw[1..raw.len() - 1]))?;
        self.consume(TokenKind::LBrace, "expect '{' after module name")?;
        let body = self.block()?;
        let module_sym = self.symbol_from("module")?;
        value::list(self.heap, &[module_sym, name, body])
    }

    fn import_declaration(&mut self) -> Result<Value> {
        self.consume(TokenKind::Identifier, "expect module name after 'import'")?;
        let name = self.symbol_from(&self.previous.text.clone())?;
        self.consume(TokenKind::Semicolon, "expect ';' after import")?;
        let import_sym = self.symbol_from("import")?;
        value::list(self.heap, &[import_sym, name])
    }

    fn statement(&mut self) -> Result<Value> {
        if self.matches(TokenKind::Return) {
            return self.return_statement();
        }
        if self.matches(TokenKind::If) {
            return self.if_statement();
        }
        if self.matches(TokenKind::While) {
            return self.while_statement();
        }
        if self.matches(TokenKind::LBrace) {
            return self.block();
        }
        self.expr_statement()
    }

    fn return_statement(&mut self) -> Result<Value> {
        let value = if self.check(TokenKind::Semicolon) { Value::Nil } else { self.expression()? };
        self.consume(TokenKind::Semicolon, "expect ';' after return value")?;
        let return_sym = self.symbol_from("return")?;
        value::list(self.heap, &[return_sym, value])
    }

    fn if_statement(&mut self) -> Result<Value> {
        self.consume(TokenKind::LParen, "expect '(' after 'if'")?;
        let cond = self.expression()?;
        self.consume(TokenKind::RParen, "expect ')' after condition")?;
        let then_branch = self.statement()?;
        let else_branch = if self.matches(TokenKind::Else) { self.statement()? } else { Value::Nil };
        let if_sym = self.symbol_from("if")?;
        value::list(self.heap, &[if_sym, cond, then_branch, else_branch])
    }

    fn while_statement(&mut self) -> Result<Value> {
        self.consume(TokenKind::LParen, "expect '(' after 'while'")?;
        let cond = self.expression()?;
        self.consume(TokenKind::RParen, "expect ')' after condition")?;
        let body = self.statement()?;
        let while_sym = self.symbol_from("while")?;
        value::list(self.heap, &[while_sym, cond, body])
    }

    fn expr_statement(&mut self) -> Result<Value> {
        let expr = self.expression()?;
        self.consume(TokenKind::Semicolon, "expect ';' after expression")?;
        Ok(expr)
    }

    /// Drive a full program to completion, mirroring `fex_compile`'s loop:
    /// collapse to `nil`/single-form shortcuts, otherwise wrap every
    /// top-level declaration in `(do ...)`. Root-stack depth is saved and
    /// restored around each declaration so a long program does not run the
    /// bounded root stack out, since every allocation along the way
    /// auto-pushes itself onto it.
    pub fn compile(&mut self) -> Result<Option<Value>> {
        let mut decls = vec![];
        while !self.check(TokenKind::Eof) {
            let depth = self.heap.save_gc();
            let decl = self.declaration()?;
            self.heap.restore_gc(depth);
            self.heap.push_gc(decl.to_gc_thing())?;
            decls.push(decl);
        }
        if self.had_error {
            let msg = self.diagnostic.clone().unwrap_or_else(|| "syntax error".to_string());
            return Err(Error::Syntax(msg));
        }
        Ok(Some(self.wrap_do(decls)?))
    }
}

fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse `source` into a single core form, or `Ok(None)` for a legitimately
/// empty program. A syntax error comes back as `Err(Error::Syntax(_))`
/// carrying the parser's literal `[line N] Error at '...': msg` text
/// (`fex_compile` returns `NULL` for this case; propagating the diagnostic
/// through `Result` instead of discarding it is this evaluator's equivalent).
pub fn compile(heap: &mut Heap, source: &str) -> Result<Option<Value>> {
    let mut parser = Parser::new(heap, source);
    parser.compile()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::HeapConfig;

    fn compiles_to(source: &str) -> String {
        let mut heap = Heap::new(HeapConfig::default());
        let form = compile(&mut heap, source).unwrap().unwrap();
        format!("{form}")
    }

    #[test]
    fn var_declaration_desugars_to_let() {
        assert_eq!(compiles_to("let x = 1;"), "(let x 1)");
    }

    #[test]
    fn fn_declaration_desugars_to_let_of_fn() {
        assert_eq!(compiles_to("fn add(a, b) { return a + b; }"), "(let add (fn (a b) (return (+ a b))))");
    }

    #[test]
    fn if_else_desugars() {
        assert_eq!(compiles_to("if (x) 1; else 2;"), "(if x 1 2)");
    }

    #[test]
    fn comparison_flips_are_desugared_to_lt_and_le() {
        assert_eq!(compiles_to("a > b;"), "(< b a)");
        assert_eq!(compiles_to("a >= b;"), "(<= b a)");
    }

    #[test]
    fn not_equal_desugars_to_not_is() {
        assert_eq!(compiles_to("a != b;"), "(not (is a b))");
    }

    #[test]
    fn property_access_desugars_to_get_of_a_quoted_name() {
        assert_eq!(compiles_to("m.answer;"), "(get m (quote answer))");
    }

    #[test]
    fn call_desugars_to_list_application() {
        assert_eq!(compiles_to("f(1, 2);"), "(f 1 2)");
    }

    #[test]
    fn list_literal_desugars_to_list_primitive() {
        assert_eq!(compiles_to("[1, 2, 3];"), "(list 1 2 3)");
    }

    #[test]
    fn module_and_export_desugar() {
        assert_eq!(
            compiles_to("module \"m\" { export let answer = 42; }"),
            "(module \"m\" (export (let answer 42)))"
        );
    }

    #[test]
    fn assignment_to_non_symbol_is_a_parse_error() {
        let mut heap = Heap::new(HeapConfig::default());
        match compile(&mut heap, "1 = 2;") {
            Err(Error::Syntax(msg)) => assert!(msg.contains("Invalid assignment target")),
            other => panic!("expected a syntax error, got {other:?}"),
        }
    }

    #[test]
    fn syntax_error_reports_the_offending_line_and_token() {
        let mut heap = Heap::new(HeapConfig::default());
        match compile(&mut heap, "let = 1;") {
            Err(Error::Syntax(msg)) => {
                assert!(msg.starts_with("[line 1]"), "{msg}");
                assert!(msg.contains("expect"), "{msg}");
            }
            other => panic!("expected a syntax error, got {other:?}"),
        }
    }

    #[test]
    fn string_literals_are_unescaped_like_the_reader() {
        let mut heap = Heap::new(HeapConfig::default());
        let form = compile(&mut heap, "\"a\\nb\";").unwrap().unwrap();
        assert_eq!(form.as_str().unwrap(), "a\nb");
    }

    #[test]
    fn while_loop_desugars() {
        assert_eq!(compiles_to("while (x) { f(); }"), "(while x (f))");
    }
}
