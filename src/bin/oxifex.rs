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

//! CLI entry point (§6): runs a file once, or an interactive REPL when no
//! path is given.

use std::fs;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use oxifex::error::Error;
use oxifex::Context;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// Print a failure the way §4.13 separates the two channels: a surface
/// syntax error is the parser's own literal diagnostic, printed as-is; every
/// other error is a runtime failure, printed through the `error: {e}`
/// fatal-path format.
fn print_failure(e: &Error) {
    match e {
        Error::Syntax(msg) => eprintln!("{msg}"),
        other => eprintln!("error: {other}"),
    }
}

#[derive(ClapParser, Debug)]
#[command(name = "oxifex", about = "An embeddable Lisp core with a C-like surface syntax")]
struct Args {
    /// Recognized for source compatibility with the reference CLI's
    /// span-tracking toggle; this implementation does not track spans, so
    /// the flag is a no-op here.
    #[arg(long)]
    spans: bool,

    /// Source file to run. Omit to start an interactive REPL.
    path: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match args.path {
        Some(path) => run_file(&path),
        None => run_repl(),
    }
}

fn run_file(path: &str) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: could not read '{path}': {e}");
            return ExitCode::from(74);
        }
    };

    let mut ctx = Context::new();
    match ctx.do_string(&source) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            print_failure(&e);
            ExitCode::from(65)
        }
    }
}

fn run_repl() -> ExitCode {
    let mut ctx = Context::new();
    let mut editor = match DefaultEditor::new() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("error: could not start line editor: {e}");
            return ExitCode::from(74);
        }
    };

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());
                match ctx.do_string(&line) {
                    Ok(value) if !value.is_nil() => println!("{value}"),
                    Ok(_) => {}
                    Err(e) => print_failure(&e),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::from(74);
            }
        }
    }
    ExitCode::SUCCESS
}
