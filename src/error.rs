use ariadne::{Color, Fmt, Label, Report, ReportKind, Source};
use thiserror::Error;

/// Half-open range of character offsets into the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn single(pos: usize) -> Self {
        Self {
            start: pos,
            end: pos + 1,
        }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(&self, other: &Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RuntimeErrorKind {
    #[error("undefined variable")]
    UndefinedVariable,
    #[error("const reassignment")]
    ConstReassignment,
    #[error("invalid call target")]
    InvalidCallTarget,
    #[error("break or continue outside of loop")]
    BreakOrContinueOutsideLoop,
    #[error("recursion limit exceeded")]
    RecursionLimitExceeded,
    #[error("division by zero")]
    DivisionByZero,
    #[error("type mismatch")]
    TypeMismatch,
    #[error("index out of bounds")]
    IndexOutOfBounds,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("import failed")]
    ImportFailed,
    #[error("i/o error")]
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    LexError,
    ParseError,
    RuntimeError(RuntimeErrorKind),
    /// Not a failure: `exit(code)` unwinding to the program root.
    Exit(i32),
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DroyError {
    pub kind: ErrorKind,
    pub span: Span,
    pub message: String,
    pub help: Option<String>,
}

impl DroyError {
    pub fn new(kind: ErrorKind, span: Span, message: String) -> Self {
        Self {
            kind,
            span,
            message,
            help: None,
        }
    }

    pub fn new_with_help(kind: ErrorKind, span: Span, message: String, help: String) -> Self {
        Self {
            kind,
            span,
            message,
            help: Some(help),
        }
    }

    pub fn lex_error(span: Span, message: String) -> Self {
        Self::new(ErrorKind::LexError, span, message)
    }

    pub fn parse_error(span: Span, message: String) -> Self {
        Self::new(ErrorKind::ParseError, span, message)
    }

    pub fn parse_error_with_help(span: Span, message: String, help: String) -> Self {
        Self::new_with_help(ErrorKind::ParseError, span, message, help)
    }

    pub fn runtime_error(kind: RuntimeErrorKind, span: Span, message: String) -> Self {
        Self::new(ErrorKind::RuntimeError(kind), span, message)
    }

    pub fn runtime_error_with_help(
        kind: RuntimeErrorKind,
        span: Span,
        message: String,
        help: String,
    ) -> Self {
        Self::new_with_help(ErrorKind::RuntimeError(kind), span, message, help)
    }

    pub fn exit(code: i32) -> Self {
        Self::new(ErrorKind::Exit(code), Span::default(), format!("exit({})", code))
    }

    /// The requested exit code, if this is an `exit(code)` unwind.
    pub fn exit_code(&self) -> Option<i32> {
        match self.kind {
            ErrorKind::Exit(code) => Some(code),
            _ => None,
        }
    }

    /// The runtime error kind, if this is a runtime error.
    pub fn runtime_kind(&self) -> Option<RuntimeErrorKind> {
        match self.kind {
            ErrorKind::RuntimeError(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn is_runtime(&self) -> bool {
        self.runtime_kind().is_some()
    }

    /// 1-based line and column of the span start within `source`.
    pub fn location(&self, source: &str) -> (usize, usize) {
        let mut line = 1;
        let mut column = 1;
        for c in source.chars().take(self.span.start) {
            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }
        (line, column)
    }

    pub fn report(&self, source: &str, filename: Option<&str>) {
        let filename = filename.unwrap_or("<repl>");

        let color = match self.kind {
            ErrorKind::LexError => Color::Red,
            ErrorKind::ParseError => Color::Yellow,
            ErrorKind::RuntimeError(_) => Color::Magenta,
            ErrorKind::Exit(_) => return,
        };

        let kind_str = match self.kind {
            ErrorKind::LexError => "Lexical Error".to_string(),
            ErrorKind::ParseError => "Parse Error".to_string(),
            ErrorKind::RuntimeError(kind) => format!("Runtime Error ({})", kind),
            ErrorKind::Exit(_) => return,
        };

        let (line, column) = self.location(source);
        // Clamp so an error at EOF still points inside the source.
        let len = source.chars().count();
        let start = self.span.start.min(len);
        let end = self.span.end.clamp(start, len.max(start));

        let mut report_builder = Report::build(ReportKind::Error, filename, start)
            .with_message(format!(
                "{}: {} at {}:{}:{}",
                kind_str.fg(color),
                self.message,
                filename,
                line,
                column
            ))
            .with_label(
                Label::new((filename, start..end))
                    .with_message(&self.message)
                    .with_color(color),
            );

        if let Some(ref help_text) = self.help {
            report_builder =
                report_builder.with_note(format!("{}: {}", "help".fg(Color::Cyan), help_text));
        }

        if report_builder
            .finish()
            .eprint((filename, Source::from(source)))
            .is_err()
        {
            eprintln!("{}:{}:{}: {}", filename, line, column, self.message);
        }
    }
}

/// Report a batch of diagnostics against the same source.
pub fn report_all(errors: &[DroyError], source: &str, filename: Option<&str>) {
    for error in errors {
        error.report(source, filename);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_counts_lines_and_columns() {
        let source = "set a = 1\nset b = ?";
        let error = DroyError::parse_error(Span::single(18), "oops".to_string());
        assert_eq!(error.location(source), (2, 9));
    }

    #[test]
    fn runtime_kind_is_exposed() {
        let error = DroyError::runtime_error(
            RuntimeErrorKind::ConstReassignment,
            Span::default(),
            "Cannot reassign const 'x'".to_string(),
        );
        assert_eq!(error.runtime_kind(), Some(RuntimeErrorKind::ConstReassignment));
        assert!(DroyError::lex_error(Span::default(), "x".into()).runtime_kind().is_none());
    }
}
