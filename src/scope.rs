//! Lexical scope chain.
//!
//! A [`Scope`] is a shared handle to one frame of bindings plus a link to
//! its parent. Links only ever point toward the global frame, so the chain
//! is acyclic. Function values keep the scope they were defined in, and
//! their call frames are parented there, which gives closures.

use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("Undefined variable '{0}'")]
    Undefined(String),
    #[error("Cannot reassign const '{0}'")]
    ConstReassignment(String),
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub is_const: bool,
    pub is_exported: bool,
}

#[derive(Default)]
struct Frame {
    bindings: HashMap<String, Binding>,
    /// Definition order, for exports and module namespaces.
    order: Vec<String>,
    parent: Option<Scope>,
}

#[derive(Clone, Default)]
pub struct Scope(Rc<RefCell<Frame>>);

impl Scope {
    /// A root frame with no parent.
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh frame whose parent is `self`.
    pub fn child(&self) -> Scope {
        Scope(Rc::new(RefCell::new(Frame {
            parent: Some(self.clone()),
            ..Frame::default()
        })))
    }

    pub fn parent(&self) -> Option<Scope> {
        self.0.borrow().parent.clone()
    }

    /// Insert into this frame, shadowing any outer binding of the same name.
    pub fn define(&self, name: &str, value: Value, is_const: bool) {
        let mut frame = self.0.borrow_mut();
        let binding = Binding {
            value,
            is_const,
            is_exported: false,
        };
        if frame.bindings.insert(name.to_string(), binding).is_none() {
            frame.order.push(name.to_string());
        }
    }

    /// Walk outward to the first binding of `name`.
    pub fn get(&self, name: &str) -> Result<Value, ScopeError> {
        let mut scope = self.clone();
        loop {
            let parent = {
                let frame = scope.0.borrow();
                if let Some(binding) = frame.bindings.get(name) {
                    return Ok(binding.value.clone());
                }
                frame.parent.clone()
            };
            match parent {
                Some(parent) => scope = parent,
                None => return Err(ScopeError::Undefined(name.to_string())),
            }
        }
    }

    /// Mutate the nearest existing binding of `name`; never creates one.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), ScopeError> {
        let mut scope = self.clone();
        loop {
            let parent = {
                let mut frame = scope.0.borrow_mut();
                if let Some(binding) = frame.bindings.get_mut(name) {
                    if binding.is_const {
                        return Err(ScopeError::ConstReassignment(name.to_string()));
                    }
                    binding.value = value;
                    return Ok(());
                }
                frame.parent.clone()
            };
            match parent {
                Some(parent) => scope = parent,
                None => return Err(ScopeError::Undefined(name.to_string())),
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.0.borrow().bindings.contains_key(name)
    }

    /// Like `contains`, but the search ends at `boundary` when the chain
    /// passes through it.
    pub fn contains_within(&self, name: &str, boundary: &Scope) -> bool {
        let mut scope = self.clone();
        loop {
            if scope.contains_local(name) {
                return true;
            }
            if scope.ptr_eq(boundary) {
                return false;
            }
            match scope.parent() {
                Some(parent) => scope = parent,
                None => return false,
            }
        }
    }

    /// Whether the nearest binding of `name` is const.
    pub fn is_const(&self, name: &str) -> bool {
        let mut scope = self.clone();
        loop {
            let parent = {
                let frame = scope.0.borrow();
                if let Some(binding) = frame.bindings.get(name) {
                    return binding.is_const;
                }
                frame.parent.clone()
            };
            match parent {
                Some(parent) => scope = parent,
                None => return false,
            }
        }
    }

    /// Flag a binding of this frame as exported. Returns false if absent.
    pub fn mark_exported(&self, name: &str) -> bool {
        match self.0.borrow_mut().bindings.get_mut(name) {
            Some(binding) => {
                binding.is_exported = true;
                true
            }
            None => false,
        }
    }

    /// This frame's bindings in definition order.
    pub fn local_bindings(&self) -> Vec<(String, Binding)> {
        let frame = self.0.borrow();
        frame
            .order
            .iter()
            .filter_map(|name| frame.bindings.get(name).map(|b| (name.clone(), b.clone())))
            .collect()
    }

    /// This frame's exported bindings in definition order.
    pub fn exported(&self) -> Vec<(String, Value)> {
        self.local_bindings()
            .into_iter()
            .filter(|(_, binding)| binding.is_exported)
            .map(|(name, binding)| (name, binding.value))
            .collect()
    }

    /// Number of frames from here to the root, inclusive.
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut scope = self.parent();
        while let Some(s) = scope {
            depth += 1;
            scope = s.parent();
        }
        depth
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Scope {
    // Names only: values may hold closures that point back into this chain.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let frame = self.0.borrow();
        f.debug_struct("Scope")
            .field("names", &frame.order)
            .field("has_parent", &frame.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_outward() {
        let global = Scope::new();
        global.define("x", Value::Number(1.0), false);
        let inner = global.child().child();
        assert_eq!(inner.get("x"), Ok(Value::Number(1.0)));
        assert_eq!(inner.depth(), 3);
    }

    #[test]
    fn define_shadows_without_touching_outer() {
        let global = Scope::new();
        global.define("x", Value::Number(1.0), false);
        let inner = global.child();
        inner.define("x", Value::Number(2.0), false);
        assert_eq!(inner.get("x"), Ok(Value::Number(2.0)));
        assert_eq!(global.get("x"), Ok(Value::Number(1.0)));
    }

    #[test]
    fn assign_mutates_nearest_existing_binding() {
        let global = Scope::new();
        global.define("x", Value::Number(1.0), false);
        let inner = global.child();
        inner.assign("x", Value::Number(5.0)).unwrap();
        assert_eq!(global.get("x"), Ok(Value::Number(5.0)));
        assert!(!inner.contains_local("x"));
    }

    #[test]
    fn assign_never_creates() {
        let scope = Scope::new();
        assert_eq!(
            scope.assign("missing", Value::Null),
            Err(ScopeError::Undefined("missing".to_string()))
        );
        assert!(!scope.contains("missing"));
    }

    #[test]
    fn const_bindings_reject_assignment() {
        let global = Scope::new();
        global.define("pi", Value::Number(3.14), true);
        let inner = global.child();
        assert_eq!(
            inner.assign("pi", Value::Number(3.0)),
            Err(ScopeError::ConstReassignment("pi".to_string()))
        );
        assert!(inner.is_const("pi"));
    }

    #[test]
    fn bindings_vanish_with_their_frame() {
        let global = Scope::new();
        {
            let block = global.child();
            block.define("tmp", Value::Boolean(true), false);
            assert!(block.contains("tmp"));
        }
        assert!(!global.contains("tmp"));
    }

    #[test]
    fn contains_within_stops_at_the_boundary() {
        let global = Scope::new();
        global.define("shared", Value::Number(1.0), false);
        let module = global.child();
        module.define("own", Value::Number(2.0), false);
        let inner = module.child();
        assert!(inner.contains_within("own", &module));
        assert!(!inner.contains_within("shared", &module));
        assert!(inner.contains("shared"));

        let unrelated = global.child();
        assert!(unrelated.contains_within("shared", &module));
    }

    #[test]
    fn exports_follow_definition_order() {
        let module = Scope::new();
        module.define("b", Value::Number(2.0), false);
        module.define("a", Value::Number(1.0), false);
        module.define("hidden", Value::Null, false);
        assert!(module.mark_exported("a"));
        assert!(module.mark_exported("b"));
        assert!(!module.mark_exported("nope"));
        let names: Vec<String> = module.exported().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b".to_string(), "a".to_string()]);
    }
}
