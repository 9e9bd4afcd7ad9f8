use crate::ast::{AssignOp, Expr, FunctionDecl, LogicalOp, Program, Stmt, UnaryOp};
use crate::builtins;
use crate::error::{DroyError, RuntimeErrorKind, Span};
use crate::module::ModuleLoader;
use crate::operators;
use crate::scope::{Scope, ScopeError};
use crate::stack::ensure_sufficient_stack;
use crate::value::{format_number, Function, ObjectMap, Value};
use std::collections::{HashMap, VecDeque};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// The predefined `@` variables. They always resolve.
pub const SPECIAL_VARIABLES: [&str; 8] = ["si", "ui", "yui", "pop", "abc", "argc", "argv", "env"];

/// Outcome of executing one statement. Errors travel on the `Err` side.
#[derive(Debug, Clone)]
pub enum ControlFlow {
    Value(Value),
    Return(Value),
    Break(Span),
    Continue(Span),
}

pub type EvalResult = Result<ControlFlow, DroyError>;

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub recursion_limit: usize,
    /// Turn division by zero and mismatched arithmetic into `null` plus a warning.
    pub lenient_arithmetic: bool,
    pub base_dir: PathBuf,
    pub argv: Vec<String>,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 1000,
            lenient_arithmetic: false,
            base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            argv: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateFlags {
    pub running: bool,
    pub locked: bool,
    pub pressure: bool,
    pub employment: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkEntry {
    pub id: String,
    pub api: String,
    pub extended: bool,
}

#[derive(Debug, Clone)]
pub struct StyleEntry {
    pub name: Option<String>,
    pub properties: Value,
}

enum Output {
    Stdout,
    Buffer(String),
}

/// Assignment target, resolved once for compound assignment and `++`/`--`.
enum Place {
    Variable(String, Span),
    Special(String),
    Member(Value, Value, Span),
}

pub struct Evaluator {
    builtins: Scope,
    globals: Scope,
    pub(crate) environment: Scope,
    specials: HashMap<String, Value>,
    flags: StateFlags,
    links: Vec<LinkEntry>,
    packages: Vec<String>,
    media: Vec<Value>,
    styles: Vec<StyleEntry>,
    pub(crate) config: EvaluatorConfig,
    call_depth: usize,
    output: Output,
    input: Option<VecDeque<String>>,
    diagnostics: Vec<DroyError>,
    pub(crate) modules: ModuleLoader,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_config(EvaluatorConfig::default())
    }

    pub fn with_config(config: EvaluatorConfig) -> Self {
        let builtins = Scope::new();
        builtins::register(&builtins);
        let globals = builtins.child();

        Self {
            specials: default_specials(&config.argv),
            builtins,
            environment: globals.clone(),
            globals,
            flags: StateFlags::default(),
            links: Vec::new(),
            packages: Vec::new(),
            media: Vec::new(),
            styles: Vec::new(),
            config,
            call_depth: 0,
            output: Output::Stdout,
            input: None,
            diagnostics: Vec::new(),
            modules: ModuleLoader::new(),
        }
    }

    pub fn capture_output(mut self) -> Self {
        self.output = Output::Buffer(String::new());
        self
    }

    pub fn with_input<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input = Some(lines.into_iter().map(Into::into).collect());
        self
    }

    pub fn output(&self) -> &str {
        match &self.output {
            Output::Buffer(buffer) => buffer,
            Output::Stdout => "",
        }
    }

    pub fn take_output(&mut self) -> String {
        match &mut self.output {
            Output::Buffer(buffer) => std::mem::take(buffer),
            Output::Stdout => String::new(),
        }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    pub fn flags(&self) -> StateFlags {
        self.flags
    }

    pub fn links(&self) -> &[LinkEntry] {
        &self.links
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn media(&self) -> &[Value] {
        &self.media
    }

    pub fn styles(&self) -> &[StyleEntry] {
        &self.styles
    }

    pub fn diagnostics(&self) -> &[DroyError] {
        &self.diagnostics
    }

    pub fn special(&self, name: &str) -> Option<Value> {
        self.specials.get(name).cloned()
    }

    pub fn globals(&self) -> &Scope {
        &self.globals
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.environment.get(name).ok()
    }

    /// Run a whole program in the global frame. A top-level `ret` ends the
    /// program early with its value.
    pub fn evaluate_program(&mut self, program: &Program) -> Result<Value, DroyError> {
        for statement in &program.statements {
            match self.execute_statement(statement)? {
                ControlFlow::Value(_) => {}
                ControlFlow::Return(value) => return Ok(value),
                ControlFlow::Break(span) | ControlFlow::Continue(span) => {
                    return Err(outside_loop(span))
                }
            }
        }
        Ok(Value::Null)
    }

    /// Run a program and map the outcome to a process exit code. Runtime
    /// errors are returned for the caller to report.
    pub fn run(&mut self, program: &Program) -> Result<i32, DroyError> {
        match self.evaluate_program(program) {
            Ok(_) => Ok(0),
            Err(error) => match error.exit_code() {
                Some(code) => Ok(code),
                None => Err(error),
            },
        }
    }

    pub fn eval_one(&mut self, stmt: &Stmt) -> Result<Value, DroyError> {
        match self.execute_statement(stmt)? {
            ControlFlow::Value(value) | ControlFlow::Return(value) => Ok(value),
            ControlFlow::Break(span) | ControlFlow::Continue(span) => Err(outside_loop(span)),
        }
    }

    pub fn execute_statement(&mut self, stmt: &Stmt) -> EvalResult {
        ensure_sufficient_stack(|| self.execute_statement_inner(stmt))
    }

    fn execute_statement_inner(&mut self, stmt: &Stmt) -> EvalResult {
        match stmt {
            Stmt::Expression { expr, .. } => Ok(ControlFlow::Value(self.evaluate_expression(expr)?)),
            Stmt::Block { statements, .. } => {
                let scope = self.environment.child();
                self.execute_block(statements, scope)
            }
            Stmt::VarDecl {
                name,
                init,
                is_const,
                span,
                ..
            } => {
                let value = self.evaluate_expression(init)?;
                self.declare(name, value, *is_const, *span)?;
                Ok(unit())
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                ..
            } => {
                if self.evaluate_expression(condition)?.is_truthy() {
                    self.execute_statement(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.execute_statement(else_branch)
                } else {
                    Ok(unit())
                }
            }
            Stmt::While { condition, body, .. } => {
                while self.evaluate_expression(condition)?.is_truthy() {
                    match self.execute_statement(body)? {
                        ControlFlow::Break(_) => break,
                        ControlFlow::Return(value) => return Ok(ControlFlow::Return(value)),
                        ControlFlow::Value(_) | ControlFlow::Continue(_) => {}
                    }
                }
                Ok(unit())
            }
            Stmt::For {
                initializer,
                condition,
                increment,
                body,
                ..
            } => {
                let loop_scope = self.environment.child();
                let previous = std::mem::replace(&mut self.environment, loop_scope);
                let result = self.run_for(
                    initializer.as_deref(),
                    condition.as_ref(),
                    increment.as_ref(),
                    body,
                );
                self.environment = previous;
                result
            }
            Stmt::ForIn {
                variable,
                iterable,
                body,
                span,
            } => {
                let iterable = self.evaluate_expression(iterable)?;
                for item in iteration_items(&iterable, *span)? {
                    let scope = self.environment.child();
                    scope.define(variable, item, false);
                    let previous = std::mem::replace(&mut self.environment, scope);
                    let outcome = self.execute_statement(body);
                    self.environment = previous;
                    match outcome? {
                        ControlFlow::Break(_) => break,
                        ControlFlow::Return(value) => return Ok(ControlFlow::Return(value)),
                        ControlFlow::Value(_) | ControlFlow::Continue(_) => {}
                    }
                }
                Ok(unit())
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate_expression(expr)?,
                    None => Value::Null,
                };
                Ok(ControlFlow::Return(value))
            }
            Stmt::Break { span } => Ok(ControlFlow::Break(*span)),
            Stmt::Continue { span } => Ok(ControlFlow::Continue(*span)),
            Stmt::Function { decl, span } | Stmt::BlockDef { decl, span } => {
                let function = self.make_closure(decl);
                if let Some(name) = &decl.name {
                    self.define_local(name, function, false, *span)?;
                }
                Ok(unit())
            }
            Stmt::Emit { value, span } | Stmt::Text { value, span } => {
                let value = self.evaluate_expression(value)?;
                self.write_output(&format!("{}\n", value), *span)?;
                Ok(unit())
            }
            Stmt::Link {
                id, api, extended, ..
            } => {
                let id = self.evaluate_expression(id)?.to_string();
                let api = self.evaluate_expression(api)?.to_string();
                debug!(%id, %api, extended, "registered link");
                self.links.push(LinkEntry {
                    id,
                    api,
                    extended: *extended,
                });
                Ok(unit())
            }
            Stmt::Command { name, args, span } => {
                self.toggle_flag(name, args.len(), *span)?;
                Ok(unit())
            }
            Stmt::Pkg { name, .. } => {
                let name = self.evaluate_expression(name)?.to_string();
                debug!(package = %name, "registered package");
                self.packages.push(name);
                Ok(unit())
            }
            Stmt::Media { source, .. } => {
                let source = self.evaluate_expression(source)?;
                debug!(media = %source, "registered media");
                self.media.push(source);
                Ok(unit())
            }
            Stmt::Style {
                name,
                properties,
                span,
            } => {
                let mut map = ObjectMap::new();
                for (key, expr) in properties {
                    let value = self.evaluate_expression(expr)?;
                    map.insert(key.clone(), value);
                }
                let properties = Value::object(map);
                if let Some(name) = name {
                    self.declare(name, properties.clone(), false, *span)?;
                }
                self.styles.push(StyleEntry {
                    name: name.clone(),
                    properties,
                });
                Ok(unit())
            }
            Stmt::Import { decl } => {
                self.import_module(decl)?;
                Ok(unit())
            }
            Stmt::Export { decl, .. } => {
                let outcome = self.execute_statement(decl)?;
                if let Some(name) = decl.declared_name() {
                    self.environment.mark_exported(name);
                }
                Ok(outcome)
            }
        }
    }

    /// Run `statements` with `scope` as the current frame, restoring the
    /// previous frame afterwards even when an error unwinds.
    pub fn execute_block(&mut self, statements: &[Stmt], scope: Scope) -> EvalResult {
        let previous = std::mem::replace(&mut self.environment, scope);
        let result = self.run_statements(statements);
        self.environment = previous;
        result
    }

    pub(crate) fn run_statements(&mut self, statements: &[Stmt]) -> EvalResult {
        for statement in statements {
            match self.execute_statement(statement)? {
                ControlFlow::Value(_) => {}
                other => return Ok(other),
            }
        }
        Ok(unit())
    }

    fn run_for(
        &mut self,
        initializer: Option<&Stmt>,
        condition: Option<&Expr>,
        increment: Option<&Expr>,
        body: &Stmt,
    ) -> EvalResult {
        match initializer {
            // The loop variable always belongs to the loop frame.
            Some(Stmt::VarDecl {
                name,
                init,
                is_const,
                ..
            }) => {
                let value = self.evaluate_expression(init)?;
                self.environment.define(name, value, *is_const);
            }
            Some(other) => {
                self.execute_statement(other)?;
            }
            None => {}
        }

        loop {
            if let Some(condition) = condition {
                if !self.evaluate_expression(condition)?.is_truthy() {
                    break;
                }
            }

            match self.execute_statement(body)? {
                ControlFlow::Break(_) => break,
                ControlFlow::Return(value) => return Ok(ControlFlow::Return(value)),
                ControlFlow::Value(_) | ControlFlow::Continue(_) => {}
            }

            if let Some(increment) = increment {
                self.evaluate_expression(increment)?;
            }
        }
        Ok(unit())
    }

    /// `set`: assign the nearest existing binding, or create one in the
    /// current frame. `const` always creates.
    pub(crate) fn declare(
        &mut self,
        name: &str,
        value: Value,
        is_const: bool,
        span: Span,
    ) -> Result<(), DroyError> {
        // Inside a module, `set` only reuses bindings from the module's own frames.
        let exists = match self.modules.current_frame() {
            Some(frame) => self.environment.contains_within(name, frame),
            None => self.environment.contains(name),
        };
        if is_const || !exists {
            self.define_local(name, value, is_const, span)
        } else {
            self.environment
                .assign(name, value)
                .map_err(|error| scope_error(error, span))
        }
    }

    pub(crate) fn define_local(
        &mut self,
        name: &str,
        value: Value,
        is_const: bool,
        span: Span,
    ) -> Result<(), DroyError> {
        if self.environment.contains_local(name) && self.environment.is_const(name) {
            return Err(scope_error(ScopeError::ConstReassignment(name.to_string()), span));
        }
        self.environment.define(name, value, is_const);
        Ok(())
    }

    fn toggle_flag(&mut self, name: &str, arg_count: usize, span: Span) -> Result<(), DroyError> {
        let flag = match name {
            "employment" => &mut self.flags.employment,
            "Running" => &mut self.flags.running,
            "pressure" => &mut self.flags.pressure,
            "lock" => &mut self.flags.locked,
            other => {
                return Err(DroyError::runtime_error(
                    RuntimeErrorKind::InvalidArgument,
                    span,
                    format!("Unknown command '*/{}'", other),
                ))
            }
        };
        *flag = !*flag;
        debug!(command = name, enabled = *flag, ignored_args = arg_count, "toggled state flag");
        Ok(())
    }

    pub fn evaluate_expression(&mut self, expr: &Expr) -> Result<Value, DroyError> {
        ensure_sufficient_stack(|| self.evaluate_expression_inner(expr))
    }

    fn evaluate_expression_inner(&mut self, expr: &Expr) -> Result<Value, DroyError> {
        match expr {
            Expr::Number { value, .. } => Ok(Value::Number(*value)),
            Expr::String { value, .. } => Ok(Value::String(value.clone())),
            Expr::Boolean { value, .. } => Ok(Value::Boolean(*value)),
            Expr::Null { .. } => Ok(Value::Null),
            Expr::Variable { name, span } => self
                .environment
                .get(name)
                .map_err(|error| scope_error(error, *span)),
            Expr::SpecialVariable { name, span } => self.read_special(name, *span),
            Expr::Assign {
                target,
                operator,
                value,
                span,
            } => self.evaluate_assignment(target, *operator, value, *span),
            Expr::Binary {
                left,
                operator,
                right,
                span,
            } => {
                let left = self.evaluate_expression(left)?;
                let right = self.evaluate_expression(right)?;
                let result = operators::binary(*operator, &left, &right, *span);
                self.arithmetic(result)
            }
            Expr::Unary {
                operator: operator @ (UnaryOp::Increment | UnaryOp::Decrement),
                operand,
                prefix,
                span,
            } => self.evaluate_update(*operator, operand, *prefix, *span),
            Expr::Unary {
                operator,
                operand,
                span,
                ..
            } => {
                let operand = self.evaluate_expression(operand)?;
                let result = operators::unary(*operator, &operand, *span);
                self.arithmetic(result)
            }
            Expr::Logical {
                left,
                operator,
                right,
                ..
            } => {
                let left = self.evaluate_expression(left)?;
                let decided = match operator {
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::And => !left.is_truthy(),
                };
                if decided {
                    Ok(left)
                } else {
                    self.evaluate_expression(right)
                }
            }
            Expr::Call { callee, args, span } => self.evaluate_call(callee, args, *span),
            Expr::Member {
                object,
                property,
                span,
                ..
            } => {
                let object = self.evaluate_expression(object)?;
                let key = self.evaluate_expression(property)?;
                get_member(&object, &key, *span)
            }
            Expr::Array { elements, .. } => {
                let items = self.evaluate_arguments(elements)?;
                Ok(Value::array(items))
            }
            Expr::Object { entries, .. } => {
                let mut map = ObjectMap::new();
                for (key, expr) in entries {
                    let value = self.evaluate_expression(expr)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::object(map))
            }
            Expr::Ternary {
                condition,
                then_expr,
                else_expr,
                ..
            } => {
                if self.evaluate_expression(condition)?.is_truthy() {
                    self.evaluate_expression(then_expr)
                } else {
                    self.evaluate_expression(else_expr)
                }
            }
            Expr::Function { decl, .. } => Ok(self.make_closure(decl)),
        }
    }

    fn evaluate_arguments(&mut self, args: &[Expr]) -> Result<Vec<Value>, DroyError> {
        args.iter().map(|arg| self.evaluate_expression(arg)).collect()
    }

    /// Under `lenient_arithmetic`, arithmetic failures become `null` and are
    /// kept as diagnostics.
    fn arithmetic(&mut self, result: Result<Value, DroyError>) -> Result<Value, DroyError> {
        match result {
            Err(error)
                if self.config.lenient_arithmetic
                    && matches!(
                        error.runtime_kind(),
                        Some(RuntimeErrorKind::DivisionByZero | RuntimeErrorKind::TypeMismatch)
                    ) =>
            {
                warn!(error = %error.message, "arithmetic error evaluated to null");
                self.diagnostics.push(error);
                Ok(Value::Null)
            }
            other => other,
        }
    }

    fn evaluate_assignment(
        &mut self,
        target: &Expr,
        operator: AssignOp,
        value: &Expr,
        span: Span,
    ) -> Result<Value, DroyError> {
        let place = self.resolve_place(target)?;
        let new_value = match operator.binary_op() {
            Some(op) => {
                let current = self.read_place(&place, span)?;
                let rhs = self.evaluate_expression(value)?;
                let result = operators::binary(op, &current, &rhs, span);
                self.arithmetic(result)?
            }
            None => self.evaluate_expression(value)?,
        };
        self.write_place(&place, new_value.clone(), span)?;
        Ok(new_value)
    }

    /// `++`/`--`: prefix yields the updated value, postfix the original.
    fn evaluate_update(
        &mut self,
        operator: UnaryOp,
        operand: &Expr,
        prefix: bool,
        span: Span,
    ) -> Result<Value, DroyError> {
        let place = self.resolve_place(operand)?;
        let old_value = self.read_place(&place, span)?;
        let result = operators::unary(operator, &old_value, span);
        let new_value = self.arithmetic(result)?;
        self.write_place(&place, new_value.clone(), span)?;
        Ok(if prefix { new_value } else { old_value })
    }

    fn resolve_place(&mut self, target: &Expr) -> Result<Place, DroyError> {
        match target {
            Expr::Variable { name, span } => Ok(Place::Variable(name.clone(), *span)),
            Expr::SpecialVariable { name, .. } => Ok(Place::Special(name.clone())),
            Expr::Member {
                object,
                property,
                span,
                ..
            } => {
                let object = self.evaluate_expression(object)?;
                let key = self.evaluate_expression(property)?;
                Ok(Place::Member(object, key, *span))
            }
            other => Err(DroyError::runtime_error(
                RuntimeErrorKind::TypeMismatch,
                *other.span(),
                "Invalid assignment target".to_string(),
            )),
        }
    }

    fn read_place(&self, place: &Place, span: Span) -> Result<Value, DroyError> {
        match place {
            Place::Variable(name, name_span) => self
                .environment
                .get(name)
                .map_err(|error| scope_error(error, *name_span)),
            Place::Special(name) => self.read_special(name, span),
            Place::Member(object, key, member_span) => get_member(object, key, *member_span),
        }
    }

    fn write_place(&mut self, place: &Place, value: Value, span: Span) -> Result<(), DroyError> {
        match place {
            Place::Variable(name, _) => self
                .environment
                .assign(name, value)
                .map_err(|error| scope_error(error, span)),
            Place::Special(name) => {
                self.specials.insert(name.clone(), value);
                Ok(())
            }
            Place::Member(object, key, member_span) => set_member(object, key, value, *member_span),
        }
    }

    fn read_special(&self, name: &str, span: Span) -> Result<Value, DroyError> {
        self.specials.get(name).cloned().ok_or_else(|| {
            DroyError::runtime_error_with_help(
                RuntimeErrorKind::UndefinedVariable,
                span,
                format!("Undefined special variable '@{}'", name),
                format!("Assign it first: @{} = ...", name),
            )
        })
    }

    fn evaluate_call(&mut self, callee: &Expr, args: &[Expr], span: Span) -> Result<Value, DroyError> {
        if let Expr::Member {
            object, property, ..
        } = callee
        {
            let receiver = self.evaluate_expression(object)?;
            let key = self.evaluate_expression(property)?;
            // Scalars have no fields, so every method on them is sugar.
            let method = match receiver {
                Value::Array(_) | Value::Object(_) | Value::String(_) => {
                    get_member(&receiver, &key, span)?
                }
                _ => Value::Null,
            };
            if method.is_callable() {
                let args = self.evaluate_arguments(args)?;
                return self.call_value(method, args, span);
            }

            // `recv.name(args)` falls back to the native `name(recv, args)`.
            let name = property_key(&key);
            if let Ok(native @ Value::Native(_)) = self.builtins.get(&name) {
                let mut call_args = vec![receiver];
                call_args.extend(self.evaluate_arguments(args)?);
                return self.call_value(native, call_args, span);
            }
            return Err(DroyError::runtime_error(
                RuntimeErrorKind::InvalidCallTarget,
                span,
                format!("'{}' is not a method of {}", name, receiver.type_name()),
            ));
        }

        let callee = self.evaluate_expression(callee)?;
        let args = self.evaluate_arguments(args)?;
        self.call_value(callee, args, span)
    }

    pub fn call_value(&mut self, callee: Value, args: Vec<Value>, span: Span) -> Result<Value, DroyError> {
        match callee {
            Value::Function(function) => self.call_function(&function, args, span),
            Value::Native(native) => {
                let too_few = args.len() < native.min_args;
                let too_many = native.max_args.map_or(false, |max| args.len() > max);
                if too_few || too_many {
                    let expected = match native.max_args {
                        Some(max) if max == native.min_args => format!("{}", max),
                        Some(max) => format!("{} to {}", native.min_args, max),
                        None => format!("at least {}", native.min_args),
                    };
                    return Err(DroyError::runtime_error(
                        RuntimeErrorKind::InvalidArgument,
                        span,
                        format!(
                            "'{}' expects {} argument(s), got {}",
                            native.name,
                            expected,
                            args.len()
                        ),
                    ));
                }
                trace!(native = native.name, args = args.len(), "calling native");
                (native.func)(self, args, span)
            }
            other => Err(DroyError::runtime_error_with_help(
                RuntimeErrorKind::InvalidCallTarget,
                span,
                format!("Cannot call a value of type {}", other.type_name()),
                "Only functions and blocks can be called".to_string(),
            )),
        }
    }

    fn call_function(&mut self, function: &Function, args: Vec<Value>, span: Span) -> Result<Value, DroyError> {
        if self.call_depth >= self.config.recursion_limit {
            return Err(DroyError::runtime_error_with_help(
                RuntimeErrorKind::RecursionLimitExceeded,
                span,
                format!(
                    "Recursion limit of {} exceeded calling '{}'",
                    self.config.recursion_limit,
                    function.name()
                ),
                "Check the base case of the recursive function".to_string(),
            ));
        }
        trace!(function = function.name(), depth = self.call_depth, "calling function");

        // Missing arguments stay unbound; extra ones are dropped.
        let frame = function.closure.child();
        for (param, arg) in function.decl.params.iter().zip(args) {
            frame.define(param, arg, false);
        }

        self.call_depth += 1;
        let outcome = ensure_sufficient_stack(|| self.execute_block(&function.decl.body, frame));
        self.call_depth -= 1;

        match outcome? {
            ControlFlow::Return(value) => Ok(value),
            ControlFlow::Value(_) => Ok(Value::Null),
            ControlFlow::Break(span) | ControlFlow::Continue(span) => Err(outside_loop(span)),
        }
    }

    fn make_closure(&self, decl: &Rc<FunctionDecl>) -> Value {
        Value::Function(Rc::new(Function {
            decl: Rc::clone(decl),
            closure: self.environment.clone(),
        }))
    }

    pub(crate) fn write_output(&mut self, text: &str, span: Span) -> Result<(), DroyError> {
        match &mut self.output {
            Output::Buffer(buffer) => {
                buffer.push_str(text);
                Ok(())
            }
            Output::Stdout => {
                let mut stdout = io::stdout().lock();
                stdout
                    .write_all(text.as_bytes())
                    .and_then(|_| stdout.flush())
                    .map_err(|error| io_error(span, "Cannot write to stdout", &error))
            }
        }
    }

    pub(crate) fn read_input(&mut self, span: Span) -> Result<Option<String>, DroyError> {
        if let Some(queue) = &mut self.input {
            return Ok(queue.pop_front());
        }
        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|error| io_error(span, "Cannot read from stdin", &error))?;
        if read == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\n', '\r']).len();
        line.truncate(trimmed);
        Ok(Some(line))
    }
}

fn unit() -> ControlFlow {
    ControlFlow::Value(Value::Null)
}

fn default_specials(argv: &[String]) -> HashMap<String, Value> {
    let env: ObjectMap = std::env::vars()
        .map(|(key, value)| (key, Value::String(value)))
        .collect();
    let mut specials = HashMap::new();
    for name in ["si", "ui", "yui", "abc"] {
        specials.insert(name.to_string(), Value::string(""));
    }
    specials.insert("pop".to_string(), Value::Number(0.0));
    specials.insert("argc".to_string(), Value::Number(argv.len() as f64));
    specials.insert(
        "argv".to_string(),
        Value::array(argv.iter().cloned().map(Value::String).collect()),
    );
    specials.insert("env".to_string(), Value::object(env));
    specials
}

fn iteration_items(iterable: &Value, span: Span) -> Result<Vec<Value>, DroyError> {
    match iterable {
        Value::Array(items) => Ok(items.borrow().clone()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        Value::Object(map) => Ok(map.borrow().keys().cloned().map(Value::String).collect()),
        other => Err(DroyError::runtime_error(
            RuntimeErrorKind::TypeMismatch,
            span,
            format!("Cannot iterate over {}", other.type_name()),
        )),
    }
}

pub(crate) fn property_key(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => format_number(*n),
        other => other.to_string(),
    }
}

fn array_index(n: f64) -> Option<usize> {
    if n >= 0.0 && n.fract() == 0.0 {
        Some(n as usize)
    } else {
        None
    }
}

fn get_member(object: &Value, key: &Value, span: Span) -> Result<Value, DroyError> {
    match (object, key) {
        (Value::Array(items), Value::Number(n)) => Ok(array_index(*n)
            .and_then(|i| items.borrow().get(i).cloned())
            .unwrap_or(Value::Null)),
        (Value::Array(items), Value::String(k)) if k == "length" => {
            Ok(Value::Number(items.borrow().len() as f64))
        }
        (Value::String(s), Value::Number(n)) => Ok(array_index(*n)
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null)),
        (Value::String(s), Value::String(k)) if k == "length" => {
            Ok(Value::Number(s.chars().count() as f64))
        }
        (Value::Object(map), key) => {
            let key = property_key(key);
            let map = map.borrow();
            Ok(match map.get(&key) {
                Some(value) => value.clone(),
                None if key == "length" => Value::Number(map.len() as f64),
                None => Value::Null,
            })
        }
        (Value::Array(_) | Value::String(_), _) => Ok(Value::Null),
        (other, key) => Err(DroyError::runtime_error(
            RuntimeErrorKind::TypeMismatch,
            span,
            format!(
                "Cannot read property '{}' of {}",
                property_key(key),
                other.type_name()
            ),
        )),
    }
}

fn set_member(object: &Value, key: &Value, value: Value, span: Span) -> Result<(), DroyError> {
    match object {
        Value::Array(items) => {
            let index = match key {
                Value::Number(n) => *n,
                other => {
                    return Err(DroyError::runtime_error(
                        RuntimeErrorKind::TypeMismatch,
                        span,
                        format!("Array index must be a number, got {}", other.type_name()),
                    ))
                }
            };
            let mut items = items.borrow_mut();
            let len = items.len();
            match array_index(index).filter(|&i| i < len) {
                Some(i) => {
                    items[i] = value;
                    Ok(())
                }
                None => Err(DroyError::runtime_error_with_help(
                    RuntimeErrorKind::IndexOutOfBounds,
                    span,
                    format!("Index {} out of bounds for array of length {}", format_number(index), len),
                    "Use push(array, value) to append".to_string(),
                )),
            }
        }
        Value::Object(map) => {
            map.borrow_mut().insert(property_key(key), value);
            Ok(())
        }
        other => Err(DroyError::runtime_error(
            RuntimeErrorKind::TypeMismatch,
            span,
            format!(
                "Cannot set property '{}' on {}",
                property_key(key),
                other.type_name()
            ),
        )),
    }
}

fn scope_error(error: ScopeError, span: Span) -> DroyError {
    match &error {
        ScopeError::Undefined(name) => DroyError::runtime_error_with_help(
            RuntimeErrorKind::UndefinedVariable,
            span,
            error.to_string(),
            format!("Declare it first: set {} = ...", name),
        ),
        ScopeError::ConstReassignment(_) => DroyError::runtime_error(
            RuntimeErrorKind::ConstReassignment,
            span,
            error.to_string(),
        ),
    }
}

fn outside_loop(span: Span) -> DroyError {
    DroyError::runtime_error(
        RuntimeErrorKind::BreakOrContinueOutsideLoop,
        span,
        "'break' or 'continue' outside of a loop".to_string(),
    )
}

pub(crate) fn io_error(span: Span, context: &str, error: &io::Error) -> DroyError {
    DroyError::runtime_error(RuntimeErrorKind::Io, span, format!("{}: {}", context, error))
}
