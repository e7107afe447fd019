//! End-to-end scenarios against the public `Context` API (§8).

use std::io::Write;

use oxifex::Context;

#[test]
fn arithmetic_precedence() {
    let mut ctx = Context::new();
    let result = ctx.do_string("let x = 1 + 2 * 3; x;").unwrap();
    assert_eq!(ctx.to_number(result).unwrap(), 7.0);
}

#[test]
fn closure_counter_shares_mutable_state_across_calls() {
    let mut ctx = Context::new();
    let src = "\
        fn make_counter() { \
            let n = 0; \
            fn() { n = n + 1; return n; } \
        } \
        let c = make_counter(); \
        c(); c(); c();";
    let result = ctx.do_string(src).unwrap();
    assert_eq!(ctx.to_number(result).unwrap(), 3.0);
}

#[test]
fn recursive_fibonacci() {
    let mut ctx = Context::new();
    let src = "\
        fn fib(n) { \
            if (n < 2) return n; \
            return fib(n - 1) + fib(n - 2); \
        } \
        fib(10);";
    let result = ctx.do_string(src).unwrap();
    assert_eq!(ctx.to_number(result).unwrap(), 55.0);
}

#[test]
fn module_export_and_property_access() {
    let mut ctx = Context::new();
    let src = "\
        module \"m\" { \
            export let answer = 42; \
            export fn twice(x) { return x * 2; } \
        } \
        m.answer;";
    let result = ctx.do_string(src).unwrap();
    assert_eq!(ctx.to_number(result).unwrap(), 42.0);

    let result = ctx.do_string("m.twice(21);").unwrap();
    assert_eq!(ctx.to_number(result).unwrap(), 42.0);
}

#[test]
fn macro_swap_rewrites_the_call_site_and_reuses_the_expansion() {
    // Macros are a core-syntax feature (there is no surface-syntax `mac`
    // form), so this drives the reader/evaluator directly rather than
    // going through `do_string`.
    let mut ctx = Context::new();
    let src = "\
        (let swap (mac (a b) (list (quote do) \
            (list (quote let) (quote tmp) a) \
            (list (quote =) a b) \
            (list (quote =) b (quote tmp))))) \
        (let x 1) \
        (let y 2) \
        (swap x y) \
        (list x y)";
    let bytes = src.as_bytes();
    let mut pos = 0usize;
    let mut next_byte = move || {
        let b = bytes.get(pos).copied().unwrap_or(0);
        pos += 1;
        b
    };
    let mut result = ctx.nil();
    while let Some(form) = ctx.read(&mut next_byte).unwrap() {
        result = ctx.eval(form).unwrap();
    }
    assert_eq!(ctx.to_string(result), "(2 1)");
}

#[test]
fn early_return_escapes_a_while_loop() {
    let mut ctx = Context::new();
    let src = "fn f() { while (true) { return 7; } return 9; } f();";
    let result = ctx.do_string(src).unwrap();
    assert_eq!(ctx.to_number(result).unwrap(), 7.0);
}

#[test]
fn subtraction_boundary_behaviors() {
    // The variadic `-` primitive's zero/one/many-argument folding is a
    // core-syntax-only shape (the surface grammar only ever produces unary
    // or two-operand `-` calls), so this evaluates core forms directly
    // rather than going through the surface compiler.
    let mut ctx = Context::new();
    assert_eq!(ctx.to_number(ctx.eval_str("(-)").unwrap()).unwrap(), 0.0);
    assert_eq!(ctx.to_number(ctx.eval_str("(- 5)").unwrap()).unwrap(), -5.0);
    assert_eq!(ctx.to_number(ctx.eval_str("(- 10 1 2 3)").unwrap()).unwrap(), 4.0);
}

#[test]
fn dotted_parameters_bind_the_rest_and_default_to_nil() {
    // Dotted (rest) parameter lists are a core-syntax-only shape; the
    // surface function grammar only ever produces a comma-separated,
    // proper parameter list.
    let mut ctx = Context::new();
    let result = ctx.eval_str("((fn (a . rest) rest) 1 2 3)").unwrap();
    assert_eq!(ctx.to_string(result), "(2 3)");

    let result = ctx.eval_str("((fn (a . rest) rest) 1)").unwrap();
    assert!(ctx.is_nil(result));
}

#[test]
fn eval_str_errors_when_source_holds_no_form() {
    let mut ctx = Context::new();
    assert!(ctx.eval_str("   ").is_err());
}

#[test]
fn running_a_program_from_a_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "fn square(x) {{ return x * x; }} square(9);").unwrap();

    let source = std::fs::read_to_string(file.path()).unwrap();
    let mut ctx = Context::new();
    let result = ctx.do_string(&source).unwrap();
    assert_eq!(ctx.to_number(result).unwrap(), 81.0);
}

#[test]
fn root_stack_overflow_is_reported_as_gc_stack_overflow() {
    let mut ctx = Context::new();
    let mut src = String::from("let total = 0;\n");
    for i in 0..4000 {
        src.push_str(&format!("total = total + {i};\n"));
    }
    src.push_str("total;");
    // A very long program pushes many intermediate roots while compiling;
    // this must either succeed (root stack was bounded correctly per
    // declaration) or fail cleanly, never panic.
    let _ = ctx.do_string(&src);
}
