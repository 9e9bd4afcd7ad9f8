use crate::ast::{
    AssignOp, BinaryOp, Expr, FunctionDecl, ImportDecl, LogicalOp, Program, Stmt, UnaryOp,
};
use crate::error::{DroyError, Span};
use crate::lexer::{Literal, Token, TokenType};
use crate::stack::ensure_sufficient_stack;
use std::rc::Rc;

/// Parse a token stream, returning the program together with every
/// diagnostic found. A malformed statement is skipped, not fatal.
pub fn parse(tokens: Vec<Token>) -> (Program, Vec<DroyError>) {
    let mut parser = Parser::new(tokens);
    let program = parser.parse();
    (program, parser.take_errors())
}

type ParseResult<T> = Result<T, DroyError>;

/// Deepest syntax tree the parser builds. Parenthesised groups, nested
/// statements, prefix operators and every link of an operator chain count.
pub const MAX_NESTING_DEPTH: usize = 2000;

const STATEMENT_STARTERS: [TokenType; 26] = [
    TokenType::Set,
    TokenType::ShortSet,
    TokenType::Const,
    TokenType::Ret,
    TokenType::ShortRet,
    TokenType::Em,
    TokenType::ShortEm,
    TokenType::Text,
    TokenType::Fe,
    TokenType::While,
    TokenType::For,
    TokenType::Break,
    TokenType::Continue,
    TokenType::Function,
    TokenType::Link,
    TokenType::ALink,
    TokenType::YoexLinks,
    TokenType::Block,
    TokenType::Sty,
    TokenType::Pkg,
    TokenType::Media,
    TokenType::Command,
    TokenType::Import,
    TokenType::Export,
    TokenType::Class,
    TokenType::Else,
];

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    errors: Vec<DroyError>,
    imports: Vec<ImportDecl>,
    exports: Vec<String>,
    depth: usize,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map(|t| t.token_type) != Some(TokenType::Eof) {
            let end = tokens.last().map(|t| t.span.end).unwrap_or(0);
            let (line, column) = tokens.last().map(|t| (t.line, t.column)).unwrap_or((1, 1));
            tokens.push(Token::new(TokenType::Eof, String::new(), Span::new(end, end), line, column));
        }
        Self {
            tokens,
            current: 0,
            errors: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            depth: 0,
        }
    }

    pub fn parse(&mut self) -> Program {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            if let Some(stmt) = self.declaration_or_recover() {
                statements.push(stmt);
            }
        }

        Program {
            statements,
            imports: std::mem::take(&mut self.imports),
            exports: std::mem::take(&mut self.exports),
        }
    }

    pub fn errors(&self) -> &[DroyError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<DroyError> {
        std::mem::take(&mut self.errors)
    }

    /// Parse one statement; on failure record the diagnostic and skip to
    /// the next statement boundary.
    fn declaration_or_recover(&mut self) -> Option<Stmt> {
        let start = self.current;
        match self.declaration() {
            Ok(stmt) => Some(stmt),
            Err(error) => {
                self.errors.push(error);
                self.synchronize(start);
                None
            }
        }
    }

    fn synchronize(&mut self, statement_start: usize) {
        if self.current == statement_start {
            self.advance();
        }

        while !self.is_at_end() {
            if self.previous().token_type == TokenType::Semicolon {
                return;
            }
            if self.peek().line > self.previous().line {
                return;
            }
            if self.check(&TokenType::RightBrace) || STATEMENT_STARTERS.contains(&self.peek().token_type)
            {
                return;
            }
            self.advance();
        }
    }

    fn declaration(&mut self) -> ParseResult<Stmt> {
        let stmt = self.statement()?;
        self.match_types(&[TokenType::Semicolon]);
        Ok(stmt)
    }

    /// Run one level of recursive descent, failing once the tree would
    /// grow past `MAX_NESTING_DEPTH`.
    fn nested<T>(&mut self, parse: fn(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        let depth = self.depth;
        self.deepen()?;
        let result = ensure_sufficient_stack(|| parse(self));
        self.depth = depth;
        result
    }

    fn deepen(&mut self) -> ParseResult<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(DroyError::parse_error_with_help(
                self.error_span(),
                "Nesting too deep".to_string(),
                format!(
                    "At most {} levels of nesting are supported. Break the expression up with 'set'.",
                    MAX_NESTING_DEPTH
                ),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        self.nested(Self::statement_kind)
    }

    fn statement_kind(&mut self) -> ParseResult<Stmt> {
        match self.peek().token_type {
            TokenType::LeftBrace => {
                let start = self.advance().span.start;
                let statements = self.block()?;
                Ok(Stmt::Block {
                    statements,
                    span: Span::new(start, self.previous().span.end),
                })
            }
            TokenType::Set | TokenType::ShortSet | TokenType::Const => self.var_declaration(),
            TokenType::Ret | TokenType::ShortRet => self.return_statement(),
            TokenType::Em | TokenType::ShortEm => self.emit_statement(),
            TokenType::Text => self.text_statement(),
            TokenType::Fe => self.if_statement(),
            TokenType::While => self.while_statement(),
            TokenType::For => self.for_statement(),
            TokenType::Break => {
                let span = self.advance().span;
                Ok(Stmt::Break { span })
            }
            TokenType::Continue => {
                let span = self.advance().span;
                Ok(Stmt::Continue { span })
            }
            TokenType::Function if self.peek_next_type() == TokenType::Identifier => {
                let start = self.advance().span.start;
                let decl = self.function_body(start, true)?;
                Ok(Stmt::Function {
                    span: decl.span,
                    decl: Rc::new(decl),
                })
            }
            TokenType::Link | TokenType::ALink | TokenType::YoexLinks => self.link_statement(),
            TokenType::Block => self.block_definition(),
            TokenType::Sty => self.style_statement(),
            TokenType::Pkg => {
                let start = self.advance().span.start;
                let name = self.expression_after("pkg")?;
                Ok(Stmt::Pkg {
                    span: Span::new(start, name.span().end),
                    name,
                })
            }
            TokenType::Media => {
                let start = self.advance().span.start;
                let source = self.expression_after("media")?;
                Ok(Stmt::Media {
                    span: Span::new(start, source.span().end),
                    source,
                })
            }
            TokenType::Command => self.command_statement(),
            TokenType::Import => self.import_statement(),
            TokenType::Export => self.export_statement(),
            TokenType::Class => {
                let token = self.peek().clone();
                Err(DroyError::parse_error_with_help(
                    token.span,
                    "Class declarations are not supported".to_string(),
                    "Use objects and functions instead: set point = {x: 1, y: 2}".to_string(),
                ))
            }
            TokenType::Else => {
                let token = self.peek().clone();
                Err(DroyError::parse_error_with_help(
                    token.span,
                    "Unexpected 'else' without a matching 'fe'".to_string(),
                    "'else' must directly follow the body of an 'fe (condition) { ... }' statement.".to_string(),
                ))
            }
            _ => self.expression_statement(),
        }
    }

    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut statements = Vec::new();

        while !self.check(&TokenType::RightBrace) && !self.is_at_end() {
            if let Some(stmt) = self.declaration_or_recover() {
                statements.push(stmt);
            }
        }

        self.consume_with_help(
            TokenType::RightBrace,
            "Expected '}' after block",
            "Block statements must be closed with '}' after the opening '{'.".to_string(),
        )?;
        Ok(statements)
    }

    fn braced_block(&mut self, context: &str) -> ParseResult<Vec<Stmt>> {
        self.consume_with_help(
            TokenType::LeftBrace,
            &format!("Expected '{{' before {} body", context),
            format!("The body of a {} is written inside braces: {{ ... }}", context),
        )?;
        self.block()
    }

    fn var_declaration(&mut self) -> ParseResult<Stmt> {
        let start = self.peek().span.start;
        let (stmt, _) = self.var_declaration_core(start)?;
        Ok(stmt)
    }

    /// `set [const] name [: type] = expr`, `const name = expr`, and the
    /// `~s` shorthand. `set @var = expr` assigns the special variable.
    fn var_declaration_core(&mut self, start: usize) -> ParseResult<(Stmt, String)> {
        let mut is_const = self.advance().token_type == TokenType::Const;
        if self.match_types(&[TokenType::Const]) {
            is_const = true;
        }

        if self.check(&TokenType::SpecialVariable) && !is_const {
            let token = self.advance().clone();
            let target = Expr::SpecialVariable {
                name: token.name().to_string(),
                span: token.span,
            };
            self.consume(TokenType::Equal, "Expected '=' after special variable")?;
            let value = self.expression_after("=")?;
            let span = Span::new(start, value.span().end);
            let name = token.name().to_string();
            return Ok((
                Stmt::Expression {
                    expr: Expr::Assign {
                        target: Box::new(target),
                        operator: AssignOp::Assign,
                        value: Box::new(value),
                        span,
                    },
                    span,
                },
                name,
            ));
        }

        let name_token = self
            .consume_with_help(
                TokenType::Identifier,
                "Expected variable name",
                "Declarations look like: set name = value".to_string(),
            )?
            .clone();

        let type_hint = if self.match_types(&[TokenType::Colon]) {
            Some(self.type_name()?)
        } else {
            None
        };

        let init = if self.match_types(&[TokenType::Equal]) {
            self.expression_after("=")?
        } else if is_const {
            return Err(DroyError::parse_error_with_help(
                self.error_span(),
                format!("Missing initializer for const '{}'", name_token.lexeme),
                "Constants must be given a value: const name = value".to_string(),
            ));
        } else {
            Expr::Null {
                span: name_token.span,
            }
        };

        let span = Span::new(start, self.previous().span.end);
        Ok((
            Stmt::VarDecl {
                name: name_token.lexeme.clone(),
                init,
                is_const,
                type_hint,
                span,
            },
            name_token.lexeme,
        ))
    }

    fn type_name(&mut self) -> ParseResult<String> {
        let token = self.peek().clone();
        if is_word(&token) {
            self.advance();
            Ok(token.lexeme)
        } else {
            Err(DroyError::parse_error(
                token.span,
                format!("Expected type name, found '{}'", token.lexeme),
            ))
        }
    }

    fn return_statement(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance().clone();
        let value = if self.ends_statement(&keyword) {
            None
        } else {
            Some(self.expression()?)
        };
        Ok(Stmt::Return {
            value,
            span: Span::new(keyword.span.start, self.previous().span.end),
        })
    }

    /// A value-less statement ends at `;`, `}`, end of input or a line break.
    fn ends_statement(&self, keyword: &Token) -> bool {
        self.check(&TokenType::Semicolon)
            || self.check(&TokenType::RightBrace)
            || self.is_at_end()
            || self.peek().line > keyword.line
    }

    fn emit_statement(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance().clone();
        let value = self.expression_after(&keyword.lexeme)?;
        Ok(Stmt::Emit {
            span: Span::new(keyword.span.start, value.span().end),
            value,
        })
    }

    fn text_statement(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance().clone();
        let value = self.expression_after(&keyword.lexeme)?;
        Ok(Stmt::Text {
            span: Span::new(keyword.span.start, value.span().end),
            value,
        })
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.advance().span.start;

        self.consume_with_help(
            TokenType::LeftParen,
            "Expected '(' after 'fe'",
            "Conditionals require parentheses around the condition: fe (condition) { ... }".to_string(),
        )?;
        let condition = self.expression()?;
        self.consume_with_help(
            TokenType::RightParen,
            "Expected ')' after condition",
            "Conditions must be enclosed in parentheses: fe (condition) { ... }".to_string(),
        )?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_types(&[TokenType::Else]) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };

        let end_span = if let Some(ref else_stmt) = else_branch {
            else_stmt.span().end
        } else {
            then_branch.span().end
        };

        Ok(Stmt::If {
            condition,
            then_branch,
            else_branch,
            span: Span::new(start_span, end_span),
        })
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.advance().span.start;

        self.consume(TokenType::LeftParen, "Expected '(' after 'while'")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expected ')' after while condition")?;

        let body = Box::new(self.statement()?);
        let end_span = body.span().end;

        Ok(Stmt::While {
            condition,
            body,
            span: Span::new(start_span, end_span),
        })
    }

    fn for_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.advance().span.start;

        // Bare `for x in items { ... }`
        if self.check(&TokenType::Identifier) && self.peek_next_type() == TokenType::In {
            return self.for_in_rest(start_span, false);
        }

        self.consume(TokenType::LeftParen, "Expected '(' after 'for'")?;

        if self.check(&TokenType::Identifier) && self.peek_next_type() == TokenType::In {
            return self.for_in_rest(start_span, true);
        }

        let initializer = if self.match_types(&[TokenType::Semicolon]) {
            None
        } else {
            let init = if matches!(
                self.peek().token_type,
                TokenType::Set | TokenType::ShortSet | TokenType::Const
            ) {
                let start = self.peek().span.start;
                self.var_declaration_core(start)?.0
            } else {
                let expr = self.expression()?;
                Stmt::Expression {
                    span: *expr.span(),
                    expr,
                }
            };
            self.consume(TokenType::Semicolon, "Expected ';' after loop initializer")?;
            Some(Box::new(init))
        };

        let condition = if !self.check(&TokenType::Semicolon) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenType::Semicolon, "Expected ';' after loop condition")?;

        let increment = if !self.check(&TokenType::RightParen) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(TokenType::RightParen, "Expected ')' after for clauses")?;

        let body = Box::new(self.statement()?);
        let end_span = body.span().end;

        Ok(Stmt::For {
            initializer,
            condition,
            increment,
            body,
            span: Span::new(start_span, end_span),
        })
    }

    fn for_in_rest(&mut self, start_span: usize, parenthesized: bool) -> ParseResult<Stmt> {
        let variable = self.advance().lexeme.clone();
        self.advance(); // 'in'
        let iterable = self.expression_after("in")?;
        if parenthesized {
            self.consume(TokenType::RightParen, "Expected ')' after for-in clause")?;
        }
        let body = Box::new(self.statement()?);
        let end_span = body.span().end;
        Ok(Stmt::ForIn {
            variable,
            iterable,
            body,
            span: Span::new(start_span, end_span),
        })
    }

    /// After the `f` keyword: `[name](params) [-> type] { body }`.
    fn function_body(&mut self, start: usize, named: bool) -> ParseResult<FunctionDecl> {
        let name = if named || self.check(&TokenType::Identifier) {
            Some(
                self.consume(TokenType::Identifier, "Expected function name")?
                    .lexeme
                    .clone(),
            )
        } else {
            None
        };

        self.consume_with_help(
            TokenType::LeftParen,
            "Expected '(' after function name",
            "Functions are declared like: f name(a, b) { ... }".to_string(),
        )?;
        let mut params = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                let param = self
                    .consume(TokenType::Identifier, "Expected parameter name")?
                    .lexeme
                    .clone();
                if params.contains(&param) {
                    return Err(DroyError::parse_error(
                        self.previous().span,
                        format!("Duplicate parameter '{}'", param),
                    ));
                }
                params.push(param);
                if self.match_types(&[TokenType::Colon]) {
                    self.type_name()?;
                }
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expected ')' after parameters")?;

        if self.match_types(&[TokenType::Arrow]) {
            self.type_name()?;
        }

        let body = self.braced_block("function")?;
        Ok(FunctionDecl {
            name,
            params,
            body,
            span: Span::new(start, self.previous().span.end),
        })
    }

    fn block_definition(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span.start;
        let name = self
            .consume_with_help(
                TokenType::Identifier,
                "Expected block name after 'block'",
                "Named blocks look like: block header { ... }".to_string(),
            )?
            .lexeme
            .clone();
        let body = self.braced_block("block")?;
        let span = Span::new(start, self.previous().span.end);
        Ok(Stmt::BlockDef {
            decl: Rc::new(FunctionDecl {
                name: Some(name),
                params: Vec::new(),
                body,
                span,
            }),
            span,
        })
    }

    /// `link id: <expr> api: <expr>`, optionally prefixed with `a-link` or
    /// `yoex--links` for the extended form.
    fn link_statement(&mut self) -> ParseResult<Stmt> {
        let first = self.advance().clone();
        let extended = first.token_type != TokenType::Link;
        if extended {
            self.match_types(&[TokenType::Link]);
        }

        let mut id = None;
        let mut api = None;
        while self.check(&TokenType::Identifier) && self.peek_next_type() == TokenType::Colon {
            let field = self.advance().clone();
            self.advance(); // ':'
            let value = self.ternary()?;
            match field.lexeme.as_str() {
                "id" => id = Some(value),
                "api" => api = Some(value),
                other => {
                    return Err(DroyError::parse_error_with_help(
                        field.span,
                        format!("Unknown link field '{}'", other),
                        "Links accept the fields 'id' and 'api'.".to_string(),
                    ))
                }
            }
        }

        match (id, api) {
            (Some(id), Some(api)) => Ok(Stmt::Link {
                id,
                api,
                extended,
                span: Span::new(first.span.start, self.previous().span.end),
            }),
            _ => Err(DroyError::parse_error_with_help(
                Span::new(first.span.start, self.previous().span.end),
                "Link requires both 'id' and 'api'".to_string(),
                "Write links as: link id: \"name\" api: \"https://...\"".to_string(),
            )),
        }
    }

    /// `sty [name] { key: value, other-key: value }`
    fn style_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span.start;
        let name = if self.check(&TokenType::Identifier) {
            Some(self.advance().lexeme.clone())
        } else {
            None
        };
        self.consume(TokenType::LeftBrace, "Expected '{' after 'sty'")?;

        let mut properties = Vec::new();
        while !self.check(&TokenType::RightBrace) && !self.is_at_end() {
            let key = self.style_key()?;
            self.consume(TokenType::Colon, "Expected ':' after style property")?;
            let value = self.ternary()?;
            properties.push((key, value));
            while self.match_types(&[TokenType::Comma, TokenType::Semicolon]) {}
        }
        self.consume(TokenType::RightBrace, "Expected '}' after style properties")?;

        Ok(Stmt::Style {
            name,
            properties,
            span: Span::new(start, self.previous().span.end),
        })
    }

    /// Style keys may be hyphenated (`font-size`).
    fn style_key(&mut self) -> ParseResult<String> {
        let token = self.peek().clone();
        let mut key = match token.token_type {
            TokenType::String => match token.literal {
                Some(Literal::Str(ref s)) => s.clone(),
                _ => token.lexeme.clone(),
            },
            _ if is_word(&token) => token.lexeme.clone(),
            _ => {
                return Err(DroyError::parse_error(
                    token.span,
                    format!("Expected style property name, found '{}'", token.lexeme),
                ))
            }
        };
        self.advance();
        while self.check(&TokenType::Minus) && is_word(&self.tokens[self.current + 1]) {
            self.advance();
            key.push('-');
            key.push_str(&self.advance().lexeme.clone());
        }
        Ok(key)
    }

    fn command_statement(&mut self) -> ParseResult<Stmt> {
        let token = self.advance().clone();
        let mut args = Vec::new();
        if self.check(&TokenType::LeftParen) && self.peek().line == token.line {
            self.advance();
            args = self.arguments()?;
        }
        Ok(Stmt::Command {
            name: token.name().to_string(),
            args,
            span: Span::new(token.span.start, self.previous().span.end),
        })
    }

    fn import_statement(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance().clone();
        let path_token = self.peek().clone();
        let path = match (&path_token.token_type, &path_token.literal) {
            (TokenType::String, Some(Literal::Str(s))) => s.clone(),
            (TokenType::Identifier, _) => path_token.lexeme.clone(),
            _ => {
                return Err(DroyError::parse_error_with_help(
                    path_token.span,
                    format!("Expected module path after '{}'", keyword.lexeme),
                    "Imports look like: import \"lib/math.droy\" as math".to_string(),
                ))
            }
        };
        self.advance();

        let alias = if self.match_types(&[TokenType::As]) {
            Some(
                self.consume(TokenType::Identifier, "Expected alias name after 'as'")?
                    .lexeme
                    .clone(),
            )
        } else {
            None
        };

        let decl = ImportDecl {
            path,
            alias,
            span: Span::new(keyword.span.start, self.previous().span.end),
        };
        self.imports.push(decl.clone());
        Ok(Stmt::Import { decl })
    }

    fn export_statement(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance().clone();
        let decl = self.statement()?;
        let name = match decl.declared_name() {
            Some(name) => name.to_string(),
            None => {
                return Err(DroyError::parse_error_with_help(
                    *decl.span(),
                    "Only declarations can be exported".to_string(),
                    "Export a variable, function or block: export set answer = 42".to_string(),
                ))
            }
        };
        self.exports.push(name);
        Ok(Stmt::Export {
            span: Span::new(keyword.span.start, decl.span().end),
            decl: Box::new(decl),
        })
    }

    fn expression_statement(&mut self) -> ParseResult<Stmt> {
        let start_span = self.peek().span.start;
        let expr = self.expression()?;
        let end_span = self.previous().span.end;

        Ok(Stmt::Expression {
            expr,
            span: Span::new(start_span, end_span),
        })
    }

    pub fn expression(&mut self) -> ParseResult<Expr> {
        self.nested(Self::assignment)
    }

    /// Parse an expression that must follow `after`, with a targeted message
    /// when nothing expression-like comes next.
    fn expression_after(&mut self, after: &str) -> ParseResult<Expr> {
        self.require_operand(after)?;
        self.expression()
    }

    fn require_operand(&self, after: &str) -> ParseResult<()> {
        if can_start_expression(self.peek().token_type) {
            Ok(())
        } else {
            Err(DroyError::parse_error_with_help(
                self.error_span(),
                format!("Expected expression after '{}'", after),
                format!("'{}' must be followed by a value or expression.", after),
            ))
        }
    }

    fn assignment(&mut self) -> ParseResult<Expr> {
        let expr = self.ternary()?;

        let operator = match self.peek().token_type {
            TokenType::Equal => AssignOp::Assign,
            TokenType::PlusEqual => AssignOp::Add,
            TokenType::MinusEqual => AssignOp::Subtract,
            TokenType::StarEqual => AssignOp::Multiply,
            TokenType::SlashEqual => AssignOp::Divide,
            TokenType::PercentEqual => AssignOp::Modulo,
            _ => return Ok(expr),
        };
        let equals = self.advance().clone();

        if !expr.is_assignable() {
            return Err(DroyError::parse_error_with_help(
                equals.span,
                "Invalid assignment target".to_string(),
                "Only variables, special variables, fields and indexes can be assigned to. Examples: 'x = 10', 'obj.key = 1', 'arr[0] = 2'".to_string(),
            ));
        }

        self.require_operand(&equals.lexeme)?;
        let value = self.nested(Self::assignment)?;
        let span = Span::new(expr.span().start, value.span().end);
        Ok(Expr::Assign {
            target: Box::new(expr),
            operator,
            value: Box::new(value),
            span,
        })
    }

    fn ternary(&mut self) -> ParseResult<Expr> {
        let condition = self.or()?;

        if self.match_types(&[TokenType::Question]) {
            self.require_operand("?")?;
            let then_expr = self.expression()?;
            self.consume_with_help(
                TokenType::Colon,
                "Expected ':' in conditional expression",
                "Conditional expressions look like: cond ? a : b".to_string(),
            )?;
            self.require_operand(":")?;
            let else_expr = self.nested(Self::ternary)?;
            let span = Span::new(condition.span().start, else_expr.span().end);
            return Ok(Expr::Ternary {
                condition: Box::new(condition),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
                span,
            });
        }

        Ok(condition)
    }

    fn or(&mut self) -> ParseResult<Expr> {
        let depth = self.depth;
        let mut expr = self.and()?;

        while self.match_types(&[TokenType::PipePipe]) {
            self.deepen()?;
            let start = expr.span().start;
            self.require_operand("||")?;
            let right = self.and()?;
            let end = right.span().end;

            expr = Expr::Logical {
                left: Box::new(expr),
                operator: LogicalOp::Or,
                right: Box::new(right),
                span: Span::new(start, end),
            };
        }

        self.depth = depth;
        Ok(expr)
    }

    fn and(&mut self) -> ParseResult<Expr> {
        let depth = self.depth;
        let mut expr = self.equality()?;

        while self.match_types(&[TokenType::AmpersandAmpersand]) {
            self.deepen()?;
            let start = expr.span().start;
            self.require_operand("&&")?;
            let right = self.equality()?;
            let end = right.span().end;

            expr = Expr::Logical {
                left: Box::new(expr),
                operator: LogicalOp::And,
                right: Box::new(right),
                span: Span::new(start, end),
            };
        }

        self.depth = depth;
        Ok(expr)
    }

    /// One left-associative binary precedence level.
    fn binary_level(
        &mut self,
        operators: &[(TokenType, BinaryOp)],
        operand: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let depth = self.depth;
        let mut expr = operand(self)?;

        while let Some(&(_, operator)) = operators
            .iter()
            .find(|(token_type, _)| self.check(token_type))
        {
            self.deepen()?;
            let operator_token = self.advance().clone();
            self.require_operand(&operator_token.lexeme)?;
            let right = operand(self)?;
            let span = Span::new(expr.span().start, right.span().end);

            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
                span,
            };
        }

        self.depth = depth;
        Ok(expr)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                (TokenType::EqualEqual, BinaryOp::Equal),
                (TokenType::BangEqual, BinaryOp::NotEqual),
            ],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                (TokenType::Greater, BinaryOp::Greater),
                (TokenType::GreaterEqual, BinaryOp::GreaterEqual),
                (TokenType::Less, BinaryOp::Less),
                (TokenType::LessEqual, BinaryOp::LessEqual),
            ],
            Self::bit_or,
        )
    }

    fn bit_or(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[(TokenType::Pipe, BinaryOp::BitOr)], Self::bit_xor)
    }

    fn bit_xor(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[(TokenType::Caret, BinaryOp::BitXor)], Self::bit_and)
    }

    fn bit_and(&mut self) -> ParseResult<Expr> {
        self.binary_level(&[(TokenType::Ampersand, BinaryOp::BitAnd)], Self::shift)
    }

    fn shift(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                (TokenType::LessLess, BinaryOp::ShiftLeft),
                (TokenType::GreaterGreater, BinaryOp::ShiftRight),
            ],
            Self::term,
        )
    }

    fn term(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                (TokenType::Plus, BinaryOp::Add),
                (TokenType::Minus, BinaryOp::Subtract),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        self.binary_level(
            &[
                (TokenType::Star, BinaryOp::Multiply),
                (TokenType::Slash, BinaryOp::Divide),
                (TokenType::Percent, BinaryOp::Modulo),
            ],
            Self::power,
        )
    }

    /// `**` is right-associative and binds looser than prefix operators.
    fn power(&mut self) -> ParseResult<Expr> {
        let base = self.unary()?;

        if self.match_types(&[TokenType::StarStar]) {
            self.require_operand("**")?;
            let exponent = self.nested(Self::power)?;
            let span = Span::new(base.span().start, exponent.span().end);
            return Ok(Expr::Binary {
                left: Box::new(base),
                operator: BinaryOp::Power,
                right: Box::new(exponent),
                span,
            });
        }

        Ok(base)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let operator = match self.peek().token_type {
            TokenType::Bang => UnaryOp::Not,
            TokenType::Minus => UnaryOp::Negate,
            TokenType::Plus => UnaryOp::Plus,
            TokenType::Tilde => UnaryOp::BitNot,
            TokenType::PlusPlus => UnaryOp::Increment,
            TokenType::MinusMinus => UnaryOp::Decrement,
            _ => return self.call(),
        };
        let operator_token = self.advance().clone();
        self.require_operand(&operator_token.lexeme)?;
        let operand = self.nested(Self::unary)?;

        if matches!(operator, UnaryOp::Increment | UnaryOp::Decrement) && !operand.is_assignable() {
            return Err(DroyError::parse_error_with_help(
                operator_token.span,
                format!("Invalid operand for '{}'", operator_token.lexeme),
                "Increment and decrement only apply to variables, fields and indexes.".to_string(),
            ));
        }

        let span = Span::new(operator_token.span.start, operand.span().end);
        Ok(Expr::Unary {
            operator,
            operand: Box::new(operand),
            prefix: true,
            span,
        })
    }

    /// Postfix chain: calls, member access, indexing, `++`/`--`. Calls,
    /// indexes and postfix updates must start on the same line.
    fn call(&mut self) -> ParseResult<Expr> {
        let depth = self.depth;
        let mut expr = self.primary()?;

        loop {
            let same_line = self.peek().line == self.previous().line;
            if same_line && self.match_types(&[TokenType::LeftParen]) {
                expr = self.finish_call(expr)?;
            } else if self.match_types(&[TokenType::Dot]) {
                let property_token = self.peek().clone();
                if !is_word(&property_token) {
                    return Err(DroyError::parse_error(
                        self.error_span(),
                        "Expected property name after '.'".to_string(),
                    ));
                }
                self.advance();

                let span = Span::new(expr.span().start, property_token.span.end);
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Box::new(Expr::String {
                        value: property_token.lexeme,
                        span: property_token.span,
                    }),
                    computed: false,
                    span,
                };
            } else if same_line && self.match_types(&[TokenType::LeftBracket]) {
                self.require_operand("[")?;
                let index = self.expression()?;
                let end = self.consume_with_help(
                    TokenType::RightBracket,
                    "Expected ']' after index",
                    "Index expressions look like: items[0] or obj[\"key\"]".to_string(),
                )?;
                let span = Span::new(expr.span().start, end.span.end);
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Box::new(index),
                    computed: true,
                    span,
                };
            } else if same_line
                && expr.is_assignable()
                && matches!(
                    self.peek().token_type,
                    TokenType::PlusPlus | TokenType::MinusMinus
                )
            {
                let operator = if self.advance().token_type == TokenType::PlusPlus {
                    UnaryOp::Increment
                } else {
                    UnaryOp::Decrement
                };
                let span = Span::new(expr.span().start, self.previous().span.end);
                expr = Expr::Unary {
                    operator,
                    operand: Box::new(expr),
                    prefix: false,
                    span,
                };
            } else {
                break;
            }
            self.deepen()?;
        }

        self.depth = depth;
        Ok(expr)
    }

    fn finish_call(&mut self, callee: Expr) -> ParseResult<Expr> {
        let start_span = callee.span().start;
        let args = self.arguments()?;
        Ok(Expr::Call {
            callee: Box::new(callee),
            args,
            span: Span::new(start_span, self.previous().span.end),
        })
    }

    /// Comma-separated arguments up to and including the closing `)`.
    fn arguments(&mut self) -> ParseResult<Vec<Expr>> {
        let mut args = Vec::new();

        if !self.check(&TokenType::RightParen) {
            loop {
                if self.is_at_end() {
                    return Err(DroyError::parse_error_with_help(
                        self.error_span(),
                        "Unexpected end of input in function call".to_string(),
                        "Function calls must be closed with ')' after the arguments. Example: func(arg1, arg2)".to_string(),
                    ));
                }
                if self.check(&TokenType::RightParen) {
                    return Err(DroyError::parse_error_with_help(
                        self.peek().span,
                        "Trailing ',' in argument list".to_string(),
                        "Remove the comma after the last argument. Example: func(arg1, arg2)".to_string(),
                    ));
                }
                if !can_start_expression(self.peek().token_type) {
                    return Err(DroyError::parse_error_with_help(
                        self.peek().span,
                        "Expected ')' to close function call".to_string(),
                        "Function calls must be closed with ')' after the arguments. Example: func(arg1, arg2)".to_string(),
                    ));
                }

                args.push(self.expression()?);

                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }

        self.consume_with_help(
            TokenType::RightParen,
            "Expected ')' after arguments",
            "Function calls must be closed with ')' after the arguments. Example: func(arg1, arg2)".to_string(),
        )?;
        Ok(args)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        if self.is_at_end() {
            return Err(DroyError::parse_error_with_help(
                self.error_span(),
                "Unexpected end of input".to_string(),
                "Expected an expression here. Check for unmatched parentheses, brackets, or incomplete statements.".to_string(),
            ));
        }

        let token = self.advance().clone();

        match token.token_type {
            TokenType::False => Ok(Expr::Boolean {
                value: false,
                span: token.span,
            }),
            TokenType::True => Ok(Expr::Boolean {
                value: true,
                span: token.span,
            }),
            TokenType::Null => Ok(Expr::Null { span: token.span }),
            TokenType::Number => match token.literal {
                Some(Literal::Number(value)) => Ok(Expr::Number {
                    value,
                    span: token.span,
                }),
                _ => Err(DroyError::parse_error(token.span, "Invalid number".to_string())),
            },
            TokenType::String => match token.literal {
                Some(Literal::Str(value)) => Ok(Expr::String {
                    value,
                    span: token.span,
                }),
                _ => Err(DroyError::parse_error(token.span, "Invalid string".to_string())),
            },
            TokenType::Identifier => Ok(Expr::Variable {
                name: token.name().to_string(),
                span: token.span,
            }),
            TokenType::SpecialVariable => Ok(Expr::SpecialVariable {
                name: token.name().to_string(),
                span: token.span,
            }),
            TokenType::LeftParen => {
                let start_span = token.span;

                if self.check(&TokenType::RightParen) {
                    return Err(DroyError::parse_error_with_help(
                        Span::new(start_span.start, self.peek().span.end),
                        "Empty parentheses are not allowed".to_string(),
                        "Parentheses must contain an expression. Use 'null' for a null value: (null)".to_string(),
                    ));
                }

                self.require_operand("(")?;
                let expr = self.expression()?;
                self.consume_with_help(
                    TokenType::RightParen,
                    "Expected ')' after expression",
                    "Every opening parenthesis '(' must have a matching closing parenthesis ')'.".to_string(),
                )?;
                Ok(expr)
            }
            TokenType::LeftBracket => self.array_literal(token.span),
            TokenType::LeftBrace => self.object_literal(token.span),
            TokenType::Function => {
                let decl = self.function_body(token.span.start, false)?;
                Ok(Expr::Function {
                    span: decl.span,
                    decl: Rc::new(decl),
                })
            }
            _ => {
                let help_msg = match token.token_type {
                    TokenType::RightParen => "Found ')' without matching '('. Check for unbalanced parentheses.",
                    TokenType::RightBrace => "Found '}' without matching '{'. Check for unbalanced braces.",
                    TokenType::RightBracket => "Found ']' without matching '['. Check for unbalanced brackets.",
                    TokenType::Error => "This text could not be read as a token.",
                    TokenType::Eof => "Reached end of input while expecting an expression.",
                    _ => "Expected a literal value, variable, or parenthesized expression here.",
                };

                Err(DroyError::parse_error_with_help(
                    token.span,
                    format!("Expected expression, found '{}'", token.lexeme),
                    help_msg.to_string(),
                ))
            }
        }
    }

    fn array_literal(&mut self, start_span: Span) -> ParseResult<Expr> {
        let mut elements = Vec::new();

        if !self.check(&TokenType::RightBracket) {
            loop {
                self.require_operand(if elements.is_empty() { "[" } else { "," })?;
                elements.push(self.expression()?);
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }

        let end_token = self.consume_with_help(
            TokenType::RightBracket,
            "Expected ']' after array elements",
            "Array literals must be closed with ']' after the opening '['. Example: [1, 2, 3]".to_string(),
        )?;
        Ok(Expr::Array {
            elements,
            span: Span::new(start_span.start, end_token.span.end),
        })
    }

    fn object_literal(&mut self, start_span: Span) -> ParseResult<Expr> {
        let mut entries = Vec::new();

        while !self.check(&TokenType::RightBrace) && !self.is_at_end() {
            let key_token = self.advance().clone();
            let key = match (&key_token.token_type, &key_token.literal) {
                (TokenType::String, Some(Literal::Str(s))) => s.clone(),
                (TokenType::Number, Some(Literal::Number(n))) => crate::value::format_number(*n),
                _ if is_word(&key_token) => key_token.lexeme.clone(),
                _ => {
                    return Err(DroyError::parse_error_with_help(
                        key_token.span,
                        format!("Expected object key, found '{}'", key_token.lexeme),
                        "Object keys are names, strings or numbers. Example: {name: \"Droy\", \"two words\": 2}".to_string(),
                    ))
                }
            };
            self.consume_with_help(
                TokenType::Colon,
                "Expected ':' after object key",
                "Object entries require a colon ':' between key and value. Example: {\"key\": \"value\"}".to_string(),
            )?;
            self.require_operand(":")?;
            let value = self.expression()?;
            entries.push((key, value));

            if !self.match_types(&[TokenType::Comma]) {
                break;
            }
        }

        let end_token = self.consume_with_help(
            TokenType::RightBrace,
            "Expected '}' after object entries",
            "Object literals must be closed with '}' after the opening '{'. Example: {\"key\": \"value\"}".to_string(),
        )?;
        Ok(Expr::Object {
            entries,
            span: Span::new(start_span.start, end_token.span.end),
        })
    }

    fn match_types(&mut self, types: &[TokenType]) -> bool {
        for token_type in types {
            if self.check(token_type) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn check(&self, token_type: &TokenType) -> bool {
        if self.is_at_end() {
            false
        } else {
            &self.peek().token_type == token_type
        }
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        self.peek().token_type == TokenType::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn peek_next_type(&self) -> TokenType {
        self.tokens
            .get(self.current + 1)
            .map(|t| t.token_type)
            .unwrap_or(TokenType::Eof)
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    /// Where to point a "missing token" diagnostic: the end of the last
    /// real token at EOF, the unexpected token otherwise.
    fn error_span(&self) -> Span {
        if self.is_at_end() && self.current > 0 {
            Span::single(self.tokens[self.current - 1].span.end)
        } else {
            self.peek().span
        }
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> ParseResult<&Token> {
        if self.check(&token_type) {
            Ok(self.advance())
        } else {
            Err(DroyError::parse_error(self.error_span(), message.to_string()))
        }
    }

    fn consume_with_help(
        &mut self,
        token_type: TokenType,
        message: &str,
        help: String,
    ) -> ParseResult<&Token> {
        if self.check(&token_type) {
            Ok(self.advance())
        } else {
            Err(DroyError::parse_error_with_help(
                self.error_span(),
                message.to_string(),
                help,
            ))
        }
    }
}

/// Identifiers and keywords both count as words for property names,
/// object keys and type hints.
fn is_word(token: &Token) -> bool {
    token.token_type == TokenType::Identifier
        || (token.token_type != TokenType::String
            && token.token_type != TokenType::SpecialVariable
            && token.token_type != TokenType::Command
            && token
                .lexeme
                .chars()
                .next()
                .map(|c| c.is_alphabetic() || c == '_')
                .unwrap_or(false))
}

fn can_start_expression(token_type: TokenType) -> bool {
    matches!(
        token_type,
        TokenType::Number
            | TokenType::String
            | TokenType::True
            | TokenType::False
            | TokenType::Null
            | TokenType::Identifier
            | TokenType::SpecialVariable
            | TokenType::LeftParen
            | TokenType::LeftBracket
            | TokenType::LeftBrace
            | TokenType::Function
            | TokenType::Minus
            | TokenType::Plus
            | TokenType::Bang
            | TokenType::Tilde
            | TokenType::PlusPlus
            | TokenType::MinusMinus
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use pretty_assertions::assert_eq;

    fn parse_source(source: &str) -> (Program, Vec<DroyError>) {
        let (tokens, lex_errors) = tokenize(source);
        assert!(lex_errors.is_empty(), "lex errors: {:?}", lex_errors);
        parse(tokens)
    }

    fn parse_ok(source: &str) -> Program {
        let (program, errors) = parse_source(source);
        assert!(errors.is_empty(), "parse errors: {:?}", errors);
        program
    }

    fn single_expr(source: &str) -> Expr {
        let program = parse_ok(source);
        match program.statements.into_iter().next() {
            Some(Stmt::Expression { expr, .. }) => expr,
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    fn binary_op(expr: &Expr) -> BinaryOp {
        match expr {
            Expr::Binary { operator, .. } => *operator,
            other => panic!("expected binary expression, got {:?}", other),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        match single_expr("1 + 2 * 3") {
            Expr::Binary { operator, right, .. } => {
                assert_eq!(operator, BinaryOp::Add);
                assert_eq!(binary_op(&right), BinaryOp::Multiply);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn power_is_right_associative() {
        match single_expr("2 ** 3 ** 2") {
            Expr::Binary { operator, left, right, .. } => {
                assert_eq!(operator, BinaryOp::Power);
                assert!(matches!(*left, Expr::Number { value, .. } if value == 2.0));
                assert_eq!(binary_op(&right), BinaryOp::Power);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unary_binds_tighter_than_power() {
        match single_expr("-2 ** 2") {
            Expr::Binary { operator, left, .. } => {
                assert_eq!(operator, BinaryOp::Power);
                assert!(matches!(*left, Expr::Unary { operator: UnaryOp::Negate, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn precedence_ladder_from_bitwise_to_logical() {
        // a || b && c == d < e | f ^ g & h << i
        let expr = single_expr("a || b && c == d < e | f ^ g & h << i");
        let Expr::Logical { operator: LogicalOp::Or, right, .. } = expr else {
            panic!("expected ||");
        };
        let Expr::Logical { operator: LogicalOp::And, right, .. } = *right else {
            panic!("expected &&");
        };
        assert_eq!(binary_op(&right), BinaryOp::Equal);
        let Expr::Binary { right, .. } = *right else { unreachable!() };
        assert_eq!(binary_op(&right), BinaryOp::Less);
        let Expr::Binary { right, .. } = *right else { unreachable!() };
        assert_eq!(binary_op(&right), BinaryOp::BitOr);
        let Expr::Binary { right, .. } = *right else { unreachable!() };
        assert_eq!(binary_op(&right), BinaryOp::BitXor);
        let Expr::Binary { right, .. } = *right else { unreachable!() };
        assert_eq!(binary_op(&right), BinaryOp::BitAnd);
        let Expr::Binary { right, .. } = *right else { unreachable!() };
        assert_eq!(binary_op(&right), BinaryOp::ShiftLeft);
    }

    #[test]
    fn assignment_is_right_associative_and_lowest() {
        match single_expr("a = b = 1 ? 2 : 3") {
            Expr::Assign { value, .. } => match *value {
                Expr::Assign { value, .. } => assert!(matches!(*value, Expr::Ternary { .. })),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn shorthand_forms_match_canonical_forms() {
        let long = parse_ok("set x = 1\nret x\nem x");
        let short = parse_ok("~s x = 1\n~r x\n~e x");
        let kinds = |p: &Program| {
            p.statements
                .iter()
                .map(|s| std::mem::discriminant(s))
                .collect::<Vec<_>>()
        };
        assert_eq!(kinds(&long), kinds(&short));
    }

    #[test]
    fn var_decl_with_const_and_type_hint() {
        let program = parse_ok("const limit: number = 10");
        match &program.statements[0] {
            Stmt::VarDecl { name, is_const, type_hint, .. } => {
                assert_eq!(name, "limit");
                assert!(*is_const);
                assert_eq!(type_hint.as_deref(), Some("number"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn recovers_after_malformed_statement() {
        let (program, errors) = parse_source("set a = 1\nset b = * 2\nset c = 3");
        assert_eq!(errors.len(), 1);
        let names: Vec<&str> = program
            .statements
            .iter()
            .filter_map(|s| s.declared_name())
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn recovers_inside_blocks() {
        let (program, errors) = parse_source("fe (true) {\n  set x = )\n  em 1\n}\nem 2");
        assert_eq!(errors.len(), 1);
        assert_eq!(program.statements.len(), 2);
    }

    #[test]
    fn collects_all_errors_in_one_pass() {
        let (_, errors) = parse_source("set = 1; em ; set ok = 2; (1 + 2");
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn droy_compatibility_statements() {
        let program = parse_ok(
            "link id: \"home\" api: \"https://x\"\n\
             a-link id: \"ext\" api: \"y\"\n\
             block header { em \"hi\" }\n\
             sty main { color: \"red\", font-size: 12 }\n\
             pkg \"ui\"\n\
             media \"intro.mp4\"\n\
             */employment\n\
             */lock",
        );
        assert!(matches!(program.statements[0], Stmt::Link { extended: false, .. }));
        assert!(matches!(program.statements[1], Stmt::Link { extended: true, .. }));
        assert!(matches!(program.statements[2], Stmt::BlockDef { .. }));
        match &program.statements[3] {
            Stmt::Style { name, properties, .. } => {
                assert_eq!(name.as_deref(), Some("main"));
                let keys: Vec<&str> = properties.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, vec!["color", "font-size"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(program.statements[4], Stmt::Pkg { .. }));
        assert!(matches!(program.statements[5], Stmt::Media { .. }));
        assert!(matches!(&program.statements[6], Stmt::Command { name, .. } if name == "employment"));
        assert!(matches!(&program.statements[7], Stmt::Command { name, .. } if name == "lock"));
    }

    #[test]
    fn imports_and_exports_are_collected() {
        let program = parse_ok("import \"lib/math\" as m\nuse \"util\"\nexport set answer = 42\nexport f twice(x) { ret x * 2 }");
        assert_eq!(program.imports.len(), 2);
        assert_eq!(program.imports[0].alias.as_deref(), Some("m"));
        assert_eq!(program.imports[1].path, "util");
        assert_eq!(program.exports, vec!["answer".to_string(), "twice".to_string()]);
    }

    #[test]
    fn for_forms() {
        let program = parse_ok("for (set i = 0; i < 3; i++) { em i }\nfor (x in [1, 2]) { em x }\nfor y in \"ab\" { em y }");
        assert!(matches!(program.statements[0], Stmt::For { .. }));
        assert!(matches!(&program.statements[1], Stmt::ForIn { variable, .. } if variable == "x"));
        assert!(matches!(&program.statements[2], Stmt::ForIn { variable, .. } if variable == "y"));
    }

    #[test]
    fn call_does_not_continue_across_lines() {
        let program = parse_ok("set a = b\n(c)");
        assert_eq!(program.statements.len(), 2);
    }

    #[test]
    fn ret_without_value_before_closing_brace() {
        let program = parse_ok("f stop() { ret }");
        match &program.statements[0] {
            Stmt::Function { decl, .. } => {
                assert!(matches!(decl.body[0], Stmt::Return { value: None, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn class_is_rejected() {
        let (_, errors) = parse_source("class Foo { }");
        assert!(!errors.is_empty());
        assert!(errors[0].message.contains("not supported"));
    }

    fn nested_parens(levels: usize) -> String {
        format!("{}1{}", "(".repeat(levels), ")".repeat(levels))
    }

    fn plus_chain(terms: usize) -> String {
        let mut source = String::from("0");
        source.push_str(&"+1".repeat(terms - 1));
        source
    }

    #[test]
    fn deep_nesting_within_the_limit_parses() {
        assert!(matches!(
            single_expr(&nested_parens(1500)),
            Expr::Number { value, .. } if value == 1.0
        ));
        assert_eq!(binary_op(&single_expr(&plus_chain(1500))), BinaryOp::Add);
    }

    #[test]
    fn nesting_past_the_limit_is_a_diagnostic() {
        let source = format!("em {}
set after = 2", nested_parens(5000));
        let (program, errors) = parse_source(&source);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Nesting too deep");
        let names: Vec<&str> = program
            .statements
            .iter()
            .filter_map(|s| s.declared_name())
            .collect();
        assert_eq!(names, vec!["after"]);

        let (_, errors) = parse_source(&format!("em {}", plus_chain(20_000)));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Nesting too deep");
    }

    #[test]
    fn nesting_depth_resets_between_statements() {
        let line = format!("em {}
", plus_chain(1500));
        let program = parse_ok(&line.repeat(4));
        assert_eq!(program.statements.len(), 4);
    }
}
