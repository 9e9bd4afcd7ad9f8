//! `import` / `use` / `require`.
//!
//! A module is lexed, parsed and run once per evaluator in a fresh frame
//! chained to the globals. Top-level `set` in a module binds in that frame
//! even when a global of the same name exists. Exports are cached by
//! canonical path, so re-importing only re-binds them.

use crate::ast::ImportDecl;
use crate::error::{DroyError, RuntimeErrorKind, Span};
use crate::evaluator::{ControlFlow, Evaluator};
use crate::lexer::tokenize;
use crate::parser::parse;
use crate::scope::Scope;
use crate::value::{ObjectMap, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const MODULE_EXTENSION: &str = "droy";

type Exports = Vec<(String, Value)>;

#[derive(Debug, Default)]
pub struct ModuleLoader {
    cache: HashMap<PathBuf, Exports>,
    /// Modules currently executing with their top-level frames, innermost last.
    loading: Vec<(PathBuf, Scope)>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self, path: &Path) -> bool {
        self.cache.contains_key(path)
    }

    pub fn loaded_count(&self) -> usize {
        self.cache.len()
    }

    /// Directory relative imports resolve against: the importing module's
    /// directory, or `base_dir` at the top level.
    fn current_dir(&self, base_dir: &Path) -> PathBuf {
        self.loading
            .last()
            .and_then(|(path, _)| path.parent())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| base_dir.to_path_buf())
    }

    /// Top-level frame of the innermost module being loaded.
    pub(crate) fn current_frame(&self) -> Option<&Scope> {
        self.loading.last().map(|(_, frame)| frame)
    }
}

/// `dir/path`, with `.droy` appended when `path` has no extension.
pub fn resolve_path(dir: &Path, path: &str) -> PathBuf {
    let mut resolved = dir.join(path);
    if resolved.extension().is_none() {
        resolved.set_extension(MODULE_EXTENSION);
    }
    resolved
}

fn import_failed(span: Span, message: String) -> DroyError {
    DroyError::runtime_error(RuntimeErrorKind::ImportFailed, span, message)
}

impl Evaluator {
    pub fn modules(&self) -> &ModuleLoader {
        &self.modules
    }

    pub(crate) fn import_module(&mut self, decl: &ImportDecl) -> Result<(), DroyError> {
        let dir = self.modules.current_dir(&self.config.base_dir);
        let path = resolve_path(&dir, &decl.path);
        let canonical = path.canonicalize().map_err(|error| {
            import_failed(
                decl.span,
                format!("Cannot find module '{}' at {}: {}", decl.path, path.display(), error),
            )
        })?;

        let exports = match self.modules.cache.get(&canonical) {
            Some(exports) => exports.clone(),
            None => {
                let exports = self.load_module(&canonical, decl)?;
                self.modules.cache.insert(canonical, exports.clone());
                exports
            }
        };
        self.bind_imports(decl, exports)
    }

    fn load_module(&mut self, path: &Path, decl: &ImportDecl) -> Result<Exports, DroyError> {
        if self.modules.loading.iter().any(|(loading, _)| loading == path) {
            return Err(import_failed(
                decl.span,
                format!("Circular import of '{}'", path.display()),
            ));
        }

        let source = fs::read_to_string(path).map_err(|error| {
            import_failed(decl.span, format!("Cannot read module '{}': {}", path.display(), error))
        })?;
        debug!(path = %path.display(), "loading module");

        let (tokens, mut errors) = tokenize(&source);
        let (program, parse_errors) = parse(tokens);
        errors.extend(parse_errors);
        if let Some(first) = errors.first() {
            let (line, column) = first.location(&source);
            return Err(import_failed(
                decl.span,
                format!(
                    "Module '{}' has {} error(s); first at {}:{}: {}",
                    path.display(),
                    errors.len(),
                    line,
                    column,
                    first.message
                ),
            ));
        }

        let scope = self.globals().child();
        let previous = std::mem::replace(&mut self.environment, scope.clone());
        self.modules.loading.push((path.to_path_buf(), scope.clone()));
        let result = self.run_statements(&program.statements);
        self.modules.loading.pop();
        self.environment = previous;

        match result {
            Ok(ControlFlow::Value(_) | ControlFlow::Return(_)) => {}
            Ok(ControlFlow::Break(_) | ControlFlow::Continue(_)) => {
                return Err(import_failed(
                    decl.span,
                    format!("'break' or 'continue' outside of a loop in module '{}'", path.display()),
                ))
            }
            Err(error) if error.exit_code().is_some() => return Err(error),
            // Errors already wrapped by a nested import keep their message.
            Err(error) if error.runtime_kind() == Some(RuntimeErrorKind::ImportFailed) => {
                return Err(import_failed(decl.span, error.message))
            }
            Err(error) => {
                let (line, column) = error.location(&source);
                return Err(import_failed(
                    decl.span,
                    format!("Error in module '{}' at {}:{}: {}", path.display(), line, column, error.message),
                ));
            }
        }

        let exports: Exports = if program.exports.is_empty() {
            scope
                .local_bindings()
                .into_iter()
                .map(|(name, binding)| (name, binding.value))
                .collect()
        } else {
            scope.exported()
        };
        debug!(path = %path.display(), exports = exports.len(), "module loaded");
        Ok(exports)
    }

    fn bind_imports(&mut self, decl: &ImportDecl, exports: Exports) -> Result<(), DroyError> {
        match &decl.alias {
            Some(alias) => {
                let namespace: ObjectMap = exports.into_iter().collect();
                self.define_local(alias, Value::object(namespace), false, decl.span)
            }
            None => {
                for (name, value) in exports {
                    self.define_local(&name, value, false, decl.span)?;
                }
                Ok(())
            }
        }
    }
}
