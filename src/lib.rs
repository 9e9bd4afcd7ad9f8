// Droy Language Interpreter Library
//
// Lexer, recovering parser and tree-walking evaluator for Droy, a small
// dynamically typed scripting and markup language, with diagnostics
// rendered through ariadne.

// Public modules
pub mod ast;
pub mod builtins;
pub mod error;
pub mod evaluator;
pub mod lexer;
pub mod module;
pub mod operators;
pub mod parser;
pub mod repl;
pub mod runner;
pub mod scope;
mod stack;
pub mod value;

// Re-export commonly used items
pub use ast::{Expr, Program, Stmt};
pub use error::{DroyError, ErrorKind, RuntimeErrorKind, Span};
pub use evaluator::{ControlFlow, Evaluator, EvaluatorConfig, StateFlags};
pub use lexer::{tokenize, Lexer, Token, TokenType};
pub use parser::{parse, Parser};
pub use scope::Scope;
pub use value::Value;

// Re-export main functions
pub use repl::start as start_repl;
pub use runner::run as run_source;

/// Tokenize source text. Never fails; problems come back as diagnostics.
pub fn lex(source: &str) -> (Vec<Token>, Vec<DroyError>) {
    tokenize(source)
}

/// A fresh interpreter with default configuration and all natives installed.
pub fn create_interpreter() -> Evaluator {
    Evaluator::new()
}

/// Run a parsed program and return its exit code. Runtime errors are
/// printed to stderr without source context.
pub fn run(evaluator: &mut Evaluator, program: &Program) -> i32 {
    match evaluator.run(program) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("Runtime error: {}", error);
            runner::EXIT_RUNTIME_ERROR
        }
    }
}

/// Evaluate a single top-level statement, as a REPL does.
pub fn eval_one(evaluator: &mut Evaluator, stmt: &Stmt) -> Result<Value, DroyError> {
    evaluator.eval_one(stmt)
}
