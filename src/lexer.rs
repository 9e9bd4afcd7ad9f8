use crate::error::{DroyError, Span};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    // Single-character tokens
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Colon,
    Dot,
    Semicolon,
    Question,

    // Operators
    Plus,
    PlusPlus,
    PlusEqual,
    Minus,
    MinusMinus,
    MinusEqual,
    Star,
    StarStar,
    StarEqual,
    Slash,
    SlashEqual,
    Percent,
    PercentEqual,
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    GreaterGreater,
    Less,
    LessEqual,
    LessLess,
    Ampersand,
    AmpersandAmpersand,
    Pipe,
    PipePipe,
    Caret,
    Tilde,
    Arrow,
    FatArrow,

    // Literals
    Identifier,
    String,
    Number,
    SpecialVariable,

    // Shorthand aliases
    ShortSet,
    ShortRet,
    ShortEm,

    // System commands
    Command,

    // Keywords
    Set,
    Const,
    Ret,
    Em,
    Text,
    Fe,
    Else,
    While,
    For,
    In,
    Break,
    Continue,
    Function,
    True,
    False,
    Null,
    Class,
    Link,
    ALink,
    YoexLinks,
    Block,
    Sty,
    Pkg,
    Media,
    Import,
    Export,
    As,

    // Special
    Error,
    Eof,
}

/// Decoded payload of a literal token.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Number(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    /// Exact source text of the token.
    pub lexeme: String,
    pub literal: Option<Literal>,
    pub span: Span,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn new(token_type: TokenType, lexeme: String, span: Span, line: usize, column: usize) -> Self {
        Self {
            token_type,
            lexeme,
            literal: None,
            span,
            line,
            column,
        }
    }

    /// Identifier-like name carried by the token: the decoded name for
    /// identifiers, commands and special variables, the lexeme otherwise.
    pub fn name(&self) -> &str {
        match &self.literal {
            Some(Literal::Str(s)) if self.token_type != TokenType::String => s,
            _ => &self.lexeme,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{} {:?} {:?}",
            self.line, self.column, self.token_type, self.lexeme
        )
    }
}

/// The closed set of `*/name` system commands.
pub const COMMANDS: [&str; 4] = ["employment", "Running", "pressure", "lock"];

fn keywords() -> HashMap<&'static str, TokenType> {
    let mut keywords = HashMap::new();
    keywords.insert("set", TokenType::Set);
    keywords.insert("const", TokenType::Const);
    keywords.insert("ret", TokenType::Ret);
    keywords.insert("return", TokenType::Ret);
    keywords.insert("em", TokenType::Em);
    keywords.insert("text", TokenType::Text);
    keywords.insert("txt", TokenType::Text);
    keywords.insert("t", TokenType::Text);
    keywords.insert("fe", TokenType::Fe);
    keywords.insert("if", TokenType::Fe);
    keywords.insert("else", TokenType::Else);
    keywords.insert("while", TokenType::While);
    keywords.insert("for", TokenType::For);
    keywords.insert("in", TokenType::In);
    keywords.insert("break", TokenType::Break);
    keywords.insert("continue", TokenType::Continue);
    keywords.insert("f", TokenType::Function);
    keywords.insert("fn", TokenType::Function);
    keywords.insert("function", TokenType::Function);
    keywords.insert("true", TokenType::True);
    keywords.insert("false", TokenType::False);
    keywords.insert("null", TokenType::Null);
    keywords.insert("class", TokenType::Class);
    keywords.insert("link", TokenType::Link);
    keywords.insert("block", TokenType::Block);
    keywords.insert("sty", TokenType::Sty);
    keywords.insert("pkg", TokenType::Pkg);
    keywords.insert("media", TokenType::Media);
    keywords.insert("import", TokenType::Import);
    keywords.insert("use", TokenType::Import);
    keywords.insert("require", TokenType::Import);
    keywords.insert("export", TokenType::Export);
    keywords.insert("as", TokenType::As);
    keywords
}

/// Scan `source` into tokens, collecting lexical diagnostics instead of
/// stopping at the first one.
pub fn tokenize(source: &str) -> (Vec<Token>, Vec<DroyError>) {
    let mut lexer = Lexer::new(source.to_string());
    let tokens = lexer.scan_tokens();
    (tokens, lexer.take_errors())
}

pub struct Lexer {
    source: Vec<char>,
    tokens: Vec<Token>,
    errors: Vec<DroyError>,
    start: usize,
    current: usize,
    line: usize,
    column: usize,
    start_line: usize,
    start_column: usize,
    keywords: HashMap<&'static str, TokenType>,
}

impl Lexer {
    pub fn new(source: String) -> Self {
        Self {
            source: source.chars().collect(),
            tokens: Vec::new(),
            errors: Vec::new(),
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_line: 1,
            start_column: 1,
            keywords: keywords(),
        }
    }

    /// Scan the whole source. Always ends with an `Eof` token; problems are
    /// recorded as diagnostics (see [`Lexer::errors`]).
    pub fn scan_tokens(&mut self) -> Vec<Token> {
        while !self.is_at_end() {
            self.start = self.current;
            self.start_line = self.line;
            self.start_column = self.column;
            self.scan_token();
        }

        self.tokens.push(Token::new(
            TokenType::Eof,
            "".to_string(),
            Span::new(self.current, self.current),
            self.line,
            self.column,
        ));

        std::mem::take(&mut self.tokens)
    }

    pub fn errors(&self) -> &[DroyError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<DroyError> {
        std::mem::take(&mut self.errors)
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn scan_token(&mut self) {
        let c = self.advance();

        match c {
            '(' => self.add_token(TokenType::LeftParen),
            ')' => self.add_token(TokenType::RightParen),
            '{' => self.add_token(TokenType::LeftBrace),
            '}' => self.add_token(TokenType::RightBrace),
            '[' => self.add_token(TokenType::LeftBracket),
            ']' => self.add_token(TokenType::RightBracket),
            ',' => self.add_token(TokenType::Comma),
            ':' => self.add_token(TokenType::Colon),
            ';' => self.add_token(TokenType::Semicolon),
            '?' => self.add_token(TokenType::Question),
            '^' => self.add_token(TokenType::Caret),
            '.' => self.add_token(TokenType::Dot),
            '+' => {
                let token_type = if self.match_char('+') {
                    TokenType::PlusPlus
                } else if self.match_char('=') {
                    TokenType::PlusEqual
                } else {
                    TokenType::Plus
                };
                self.add_token(token_type);
            }
            '-' => {
                let token_type = if self.match_char('-') {
                    TokenType::MinusMinus
                } else if self.match_char('=') {
                    TokenType::MinusEqual
                } else if self.match_char('>') {
                    TokenType::Arrow
                } else {
                    TokenType::Minus
                };
                self.add_token(token_type);
            }
            '*' => {
                if self.peek() == '/' && is_ident_start(self.peek_next()) {
                    self.command();
                    return;
                }
                let token_type = if self.match_char('*') {
                    TokenType::StarStar
                } else if self.match_char('=') {
                    TokenType::StarEqual
                } else {
                    TokenType::Star
                };
                self.add_token(token_type);
            }
            '%' => {
                let token_type = if self.match_char('=') {
                    TokenType::PercentEqual
                } else {
                    TokenType::Percent
                };
                self.add_token(token_type);
            }
            '!' => {
                let token_type = if self.match_char('=') {
                    TokenType::BangEqual
                } else {
                    TokenType::Bang
                };
                self.add_token(token_type);
            }
            '=' => {
                let token_type = if self.match_char('=') {
                    TokenType::EqualEqual
                } else if self.match_char('>') {
                    TokenType::FatArrow
                } else {
                    TokenType::Equal
                };
                self.add_token(token_type);
            }
            '<' => {
                let token_type = if self.match_char('=') {
                    TokenType::LessEqual
                } else if self.match_char('<') {
                    TokenType::LessLess
                } else {
                    TokenType::Less
                };
                self.add_token(token_type);
            }
            '>' => {
                let token_type = if self.match_char('=') {
                    TokenType::GreaterEqual
                } else if self.match_char('>') {
                    TokenType::GreaterGreater
                } else {
                    TokenType::Greater
                };
                self.add_token(token_type);
            }
            '&' => {
                let token_type = if self.match_char('&') {
                    TokenType::AmpersandAmpersand
                } else {
                    TokenType::Ampersand
                };
                self.add_token(token_type);
            }
            '|' => {
                let token_type = if self.match_char('|') {
                    TokenType::PipePipe
                } else {
                    TokenType::Pipe
                };
                self.add_token(token_type);
            }
            '~' => self.tilde(),
            '@' => self.special_variable(),
            '/' => {
                if self.match_char('/') {
                    // Comment goes until end of line
                    while self.peek() != '\n' && !self.is_at_end() {
                        self.advance();
                    }
                } else if self.match_char('*') {
                    self.block_comment();
                } else if self.match_char('=') {
                    self.add_token(TokenType::SlashEqual);
                } else {
                    self.add_token(TokenType::Slash);
                }
            }
            ' ' | '\r' | '\t' | '\n' => {
                // Line tracking happens in advance()
            }
            '"' | '\'' => self.string(c),
            c if c.is_ascii_digit() => self.number(),
            c if is_ident_start(c) => self.identifier(),
            _ => {
                self.error(format!("Unexpected character: '{}'", c));
                self.add_token(TokenType::Error);
            }
        }
    }

    fn advance(&mut self) -> char {
        if self.is_at_end() {
            return '\0';
        }
        let c = self.source[self.current];
        self.current += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        c
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.peek() != expected {
            false
        } else {
            self.advance();
            true
        }
    }

    fn peek(&self) -> char {
        self.source.get(self.current).copied().unwrap_or('\0')
    }

    fn peek_next(&self) -> char {
        self.source.get(self.current + 1).copied().unwrap_or('\0')
    }

    fn peek_at(&self, offset: usize) -> char {
        self.source.get(self.current + offset).copied().unwrap_or('\0')
    }

    fn error(&mut self, message: String) {
        self.errors
            .push(DroyError::lex_error(Span::new(self.start, self.current), message));
    }

    /// Block comments nest: every `/*` needs its own `*/`.
    fn block_comment(&mut self) {
        let mut depth = 1;
        while depth > 0 {
            if self.is_at_end() {
                self.error("Unterminated block comment".to_string());
                return;
            }
            if self.peek() == '/' && self.peek_next() == '*' {
                self.advance();
                self.advance();
                depth += 1;
            } else if self.peek() == '*' && self.peek_next() == '/' {
                self.advance();
                self.advance();
                depth -= 1;
            } else {
                self.advance();
            }
        }
    }

    fn string(&mut self, quote: char) {
        let mut value = String::new();

        while self.peek() != quote && !self.is_at_end() {
            let c = self.advance();
            if c != '\\' {
                value.push(c);
                continue;
            }
            match self.advance() {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                '0' => value.push('\0'),
                'x' => {
                    let hex: String = [self.peek(), self.peek_next()].iter().collect();
                    match u8::from_str_radix(&hex, 16) {
                        Ok(byte) => {
                            self.advance();
                            self.advance();
                            value.push(byte as char);
                        }
                        Err(_) => {
                            self.error(format!("Invalid hex escape '\\x{}'", hex));
                        }
                    }
                }
                '\0' if self.is_at_end() => break,
                other => value.push(other),
            }
        }

        if self.is_at_end() {
            self.error("Unterminated string".to_string());
            self.add_token(TokenType::Error);
            return;
        }

        // Consume the closing quote
        self.advance();
        self.add_literal_token(TokenType::String, Literal::Str(value));
    }

    fn number(&mut self) {
        let first = self.source[self.start];

        if first == '0' && matches!(self.peek(), 'x' | 'X' | 'b' | 'B' | 'o' | 'O') {
            let radix = match self.advance() {
                'x' | 'X' => 16,
                'b' | 'B' => 2,
                _ => 8,
            };
            self.radix_number(radix, self.current);
            return;
        }

        if first == '0' && self.peek().is_ascii_digit() {
            // C-style leading-zero octal
            self.radix_number(8, self.start + 1);
            return;
        }

        while self.peek().is_ascii_digit() {
            self.advance();
        }

        // Look for fractional part
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        // Exponent
        if matches!(self.peek(), 'e' | 'E') {
            let sign = matches!(self.peek_next(), '+' | '-');
            let digit_at = if sign { 2 } else { 1 };
            if self.peek_at(digit_at).is_ascii_digit() {
                for _ in 0..digit_at {
                    self.advance();
                }
                while self.peek().is_ascii_digit() {
                    self.advance();
                }
            }
        }

        let digits: String = self.source[self.start..self.current].iter().collect();

        // Optional f/l suffix, ignored for the value
        if matches!(self.peek(), 'f' | 'F' | 'l' | 'L') && !is_ident_char(self.peek_next()) {
            self.advance();
        }

        match digits.parse::<f64>() {
            Ok(value) => self.add_literal_token(TokenType::Number, Literal::Number(value)),
            Err(_) => {
                self.error(format!("Invalid number: {}", digits));
                self.add_token(TokenType::Error);
            }
        }
    }

    fn radix_number(&mut self, radix: u32, digits_start: usize) {
        while self.peek().is_digit(radix) || self.peek() == '_' {
            self.advance();
        }
        // Trailing digits that don't belong to the radix make the literal invalid
        while self.peek().is_ascii_alphanumeric() && !matches!(self.peek(), 'l' | 'L') {
            self.advance();
        }
        let digits: String = self.source[digits_start..self.current]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if matches!(self.peek(), 'l' | 'L') {
            self.advance();
        }

        match i64::from_str_radix(&digits, radix) {
            Ok(value) => self.add_literal_token(TokenType::Number, Literal::Number(value as f64)),
            Err(_) => {
                let text: String = self.source[self.start..self.current].iter().collect();
                self.error(format!("Invalid number: {}", text));
                self.add_token(TokenType::Error);
            }
        }
    }

    fn identifier(&mut self) {
        while is_ident_char(self.peek()) {
            self.advance();
        }

        let text: String = self.source[self.start..self.current].iter().collect();

        // Hyphenated link prefixes are single keywords.
        if text == "a" && self.lookahead_is("-link") {
            self.skip(5);
            self.add_token(TokenType::ALink);
            return;
        }
        if text == "yoex" && self.lookahead_is("--links") {
            self.skip(7);
            self.add_token(TokenType::YoexLinks);
            return;
        }

        let token_type = self
            .keywords
            .get(text.as_str())
            .copied()
            .unwrap_or(TokenType::Identifier);

        self.add_token(token_type);
    }

    fn lookahead_is(&self, expected: &str) -> bool {
        let n = expected.chars().count();
        expected.chars().enumerate().all(|(i, c)| self.peek_at(i) == c) && !is_ident_char(self.peek_at(n))
    }

    fn skip(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    /// `~s`, `~r`, `~e` shorthands, otherwise bitwise not.
    fn tilde(&mut self) {
        let shorthand = match self.peek() {
            's' => Some(TokenType::ShortSet),
            'r' => Some(TokenType::ShortRet),
            'e' => Some(TokenType::ShortEm),
            _ => None,
        };
        match shorthand {
            Some(token_type) if !is_ident_char(self.peek_next()) => {
                self.advance();
                self.add_token(token_type);
            }
            _ => self.add_token(TokenType::Tilde),
        }
    }

    fn special_variable(&mut self) {
        if !is_ident_start(self.peek()) {
            self.error("Expected a name after '@'".to_string());
            self.add_token(TokenType::Error);
            return;
        }
        while is_ident_char(self.peek()) {
            self.advance();
        }
        let name: String = self.source[self.start + 1..self.current].iter().collect();
        self.add_literal_token(TokenType::SpecialVariable, Literal::Str(name));
    }

    /// `*/name`: a system command if `name` is in the command table,
    /// a plain identifier otherwise.
    fn command(&mut self) {
        self.advance(); // '/'
        while is_ident_char(self.peek()) {
            self.advance();
        }
        let name: String = self.source[self.start + 2..self.current].iter().collect();
        let token_type = if COMMANDS.contains(&name.as_str()) {
            TokenType::Command
        } else {
            TokenType::Identifier
        };
        self.add_literal_token(token_type, Literal::Str(name));
    }

    fn add_token(&mut self, token_type: TokenType) {
        let text: String = self.source[self.start..self.current].iter().collect();
        self.tokens.push(Token::new(
            token_type,
            text,
            Span::new(self.start, self.current),
            self.start_line,
            self.start_column,
        ));
    }

    fn add_literal_token(&mut self, token_type: TokenType, literal: Literal) {
        self.add_token(token_type);
        if let Some(token) = self.tokens.last_mut() {
            token.literal = Some(literal);
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenType> {
        let (tokens, errors) = tokenize(source);
        assert!(errors.is_empty(), "unexpected lex errors: {:?}", errors);
        tokens.into_iter().map(|t| t.token_type).collect()
    }

    #[test]
    fn shorthand_tokens() {
        assert_eq!(
            kinds("~s x = 1 ~r x ~e x ~y"),
            vec![
                TokenType::ShortSet,
                TokenType::Identifier,
                TokenType::Equal,
                TokenType::Number,
                TokenType::ShortRet,
                TokenType::Identifier,
                TokenType::ShortEm,
                TokenType::Identifier,
                TokenType::Tilde,
                TokenType::Identifier,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn commands_and_unknown_commands() {
        let (tokens, _) = tokenize("*/employment */bogus");
        assert_eq!(tokens[0].token_type, TokenType::Command);
        assert_eq!(tokens[0].name(), "employment");
        assert_eq!(tokens[1].token_type, TokenType::Identifier);
        assert_eq!(tokens[1].name(), "bogus");
    }

    #[test]
    fn numeric_literals() {
        let (tokens, errors) = tokenize("42 0x1F 017 0b101 1.5e2 3f 2.5l");
        assert!(errors.is_empty());
        let values: Vec<f64> = tokens
            .iter()
            .filter_map(|t| match t.literal {
                Some(Literal::Number(n)) => Some(n),
                _ => None,
            })
            .collect();
        assert_eq!(values, vec![42.0, 31.0, 15.0, 5.0, 150.0, 3.0, 2.5]);
    }

    #[test]
    fn string_escapes_are_decoded() {
        let (tokens, _) = tokenize(r#""a\tb\n\x41\"""#);
        assert_eq!(tokens[0].literal, Some(Literal::Str("a\tb\nA\"".to_string())));
        assert_eq!(tokens[0].lexeme, r#""a\tb\n\x41\"""#);
    }

    #[test]
    fn unterminated_string_is_a_diagnostic() {
        let (tokens, errors) = tokenize("set s = \"abc");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("Unterminated string"));
        assert_eq!(tokens[tokens.len() - 2].token_type, TokenType::Error);
        assert_eq!(tokens.last().map(|t| t.token_type), Some(TokenType::Eof));
    }

    #[test]
    fn unknown_characters_do_not_stop_scanning() {
        let (tokens, errors) = tokenize("set a = 1 $ set b = 2");
        assert_eq!(errors.len(), 1);
        let sets = tokens.iter().filter(|t| t.token_type == TokenType::Set).count();
        assert_eq!(sets, 2);
    }

    #[test]
    fn comments_are_discarded_and_nest() {
        assert_eq!(
            kinds("a // line\n/* outer /* inner */ still */ b"),
            vec![TokenType::Identifier, TokenType::Identifier, TokenType::Eof]
        );
    }

    #[test]
    fn compound_operators() {
        assert_eq!(
            kinds("+= == <= && ** -> => ++ << >>"),
            vec![
                TokenType::PlusEqual,
                TokenType::EqualEqual,
                TokenType::LessEqual,
                TokenType::AmpersandAmpersand,
                TokenType::StarStar,
                TokenType::Arrow,
                TokenType::FatArrow,
                TokenType::PlusPlus,
                TokenType::LessLess,
                TokenType::GreaterGreater,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn special_variables_and_link_prefixes() {
        let (tokens, _) = tokenize("@si a-link yoex--links a - b");
        assert_eq!(tokens[0].token_type, TokenType::SpecialVariable);
        assert_eq!(tokens[0].name(), "si");
        assert_eq!(tokens[1].token_type, TokenType::ALink);
        assert_eq!(tokens[2].token_type, TokenType::YoexLinks);
        assert_eq!(tokens[3].token_type, TokenType::Identifier);
        assert_eq!(tokens[4].token_type, TokenType::Minus);
    }

    #[test]
    fn positions_track_lines_and_columns() {
        let (tokens, _) = tokenize("set a = 1\n  em a");
        let em = tokens.iter().find(|t| t.token_type == TokenType::Em).map(|t| (t.line, t.column));
        assert_eq!(em, Some((2, 3)));
    }

    #[test]
    fn relexing_joined_lexemes_is_stable() {
        let source = "f add(a, b) { ret a + b }\nset x = add(1, 2.5) * 3 ** 2\nfe (x >= 10 && !false) { ~e \"big\\n\" } else { em @si }\n*/lock";
        let (tokens, errors) = tokenize(source);
        assert!(errors.is_empty());
        let joined = tokens
            .iter()
            .map(|t| t.lexeme.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let (relexed, errors) = tokenize(&joined);
        assert!(errors.is_empty());
        let original: Vec<TokenType> = tokens.iter().map(|t| t.token_type).collect();
        let again: Vec<TokenType> = relexed.iter().map(|t| t.token_type).collect();
        assert_eq!(original, again);
    }
}
