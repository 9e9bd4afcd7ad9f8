use crate::ast::{Expr, Stmt};
use crate::evaluator::{Evaluator, EvaluatorConfig};
use crate::lexer::tokenize;
use crate::parser::parse;
use crate::value::Value;
use std::io::{self, BufRead, Write};

/// Interactive loop. One evaluator lives for the whole session, so
/// bindings persist between lines.
pub fn start(config: EvaluatorConfig) {
    println!("Droy Interpreter v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'exit' or press Ctrl+D to quit");
    println!();

    let mut evaluator = Evaluator::with_config(config);
    let stdin = io::stdin();

    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            break;
        }

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => {
                // EOF (Ctrl+D or end of piped input)
                println!();
                break;
            }
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "exit" || line == "quit" {
                    println!("Goodbye!");
                    break;
                }

                if let Some(code) = eval_line(line, &mut evaluator) {
                    std::process::exit(code);
                }
            }
            Err(error) => {
                eprintln!("Error reading input: {}", error);
                break;
            }
        }
    }
}

/// Evaluate one line. Returns an exit code if the line called `exit()`.
pub fn eval_line(source: &str, evaluator: &mut Evaluator) -> Option<i32> {
    let (tokens, mut errors) = tokenize(source);
    let (program, parse_errors) = parse(tokens);
    errors.extend(parse_errors);
    if !errors.is_empty() {
        for error in &errors {
            error.report(source, None);
        }
        return None;
    }

    for statement in &program.statements {
        match evaluator.eval_one(statement) {
            Ok(value) => {
                if let Some(shown) = echo(statement, &value) {
                    println!("{}", shown);
                }
            }
            Err(error) => {
                if let Some(code) = error.exit_code() {
                    return Some(code);
                }
                error.report(source, None);
                return None;
            }
        }
    }
    None
}

/// What the REPL prints after a statement: the value of a bare expression,
/// unless it is an assignment or a `null` result.
fn echo(statement: &Stmt, value: &Value) -> Option<String> {
    match statement {
        Stmt::Expression { expr, .. } if !matches!(expr, Expr::Assign { .. }) => match value {
            Value::Null => None,
            Value::String(s) => Some(format!("\"{}\"", s)),
            other => Some(other.to_string()),
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement(source: &str) -> Stmt {
        let (tokens, _) = tokenize(source);
        let (mut program, errors) = parse(tokens);
        assert!(errors.is_empty());
        program.statements.remove(0)
    }

    #[test]
    fn echoes_expressions_but_not_assignments() {
        assert_eq!(echo(&statement("1 + 2"), &Value::Number(3.0)), Some("3".to_string()));
        assert_eq!(echo(&statement("\"hi\""), &Value::string("hi")), Some("\"hi\"".to_string()));
        assert_eq!(echo(&statement("x = 1"), &Value::Number(1.0)), None);
        assert_eq!(echo(&statement("set x = 1"), &Value::Null), None);
    }

    #[test]
    fn state_persists_between_lines() {
        let mut evaluator = Evaluator::new().capture_output();
        assert_eq!(eval_line("set x = 20", &mut evaluator), None);
        assert_eq!(eval_line("em x + 1", &mut evaluator), None);
        assert_eq!(evaluator.output(), "21\n");
        assert_eq!(eval_line("exit(2)", &mut evaluator), Some(2));
    }
}
