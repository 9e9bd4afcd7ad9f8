use crate::error::report_all;
use crate::evaluator::{Evaluator, EvaluatorConfig};
use crate::lexer::tokenize;
use crate::parser::parse;
use tracing::debug;

/// Lex or parse diagnostics stopped the program before it ran.
pub const EXIT_DATA_ERROR: i32 = 65;
/// A runtime error unwound to the program root.
pub const EXIT_RUNTIME_ERROR: i32 = 70;

/// Run a whole source file with a fresh evaluator and return the process
/// exit code.
pub fn run(source: &str, filename: Option<&str>, config: EvaluatorConfig) -> i32 {
    let mut evaluator = Evaluator::with_config(config);
    run_with(&mut evaluator, source, filename)
}

/// Lex, parse and run `source` on an existing evaluator. All lex and parse
/// diagnostics are reported before giving up; nothing runs if any exist.
pub fn run_with(evaluator: &mut Evaluator, source: &str, filename: Option<&str>) -> i32 {
    let (tokens, mut errors) = tokenize(source);
    debug!(tokens = tokens.len(), "lexed source");
    let (program, parse_errors) = parse(tokens);
    errors.extend(parse_errors);

    if !errors.is_empty() {
        report_all(&errors, source, filename);
        return EXIT_DATA_ERROR;
    }
    debug!(statements = program.statements.len(), "parsed program");

    match evaluator.run(&program) {
        Ok(code) => code,
        Err(error) => {
            error.report(source, filename);
            EXIT_RUNTIME_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exit_code(source: &str) -> i32 {
        let mut evaluator = Evaluator::new().capture_output();
        run_with(&mut evaluator, source, Some("test.droy"))
    }

    #[test]
    fn exit_codes() {
        assert_eq!(exit_code("set x = 1"), 0);
        assert_eq!(exit_code("set = 1"), EXIT_DATA_ERROR);
        assert_eq!(exit_code("\"unterminated"), EXIT_DATA_ERROR);
        assert_eq!(exit_code("em missing"), EXIT_RUNTIME_ERROR);
        assert_eq!(exit_code("exit(4)"), 4);
    }

    #[test]
    fn nothing_runs_when_parsing_fails() {
        let mut evaluator = Evaluator::new().capture_output();
        run_with(&mut evaluator, "em \"before\"\nset = broken", None);
        assert_eq!(evaluator.output(), "");
    }
}
