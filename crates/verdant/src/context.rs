//! Processing context: variable bindings with a scope stack.
//!
//! Lookups search the innermost scope outward and fall back to the root
//! bindings. A scope may shadow any outer name; popping the scope makes the
//! outer value visible again.

use crate::error::{EngineError, Result};
use crate::value::Value;
use std::cell::OnceCell;
use std::collections::HashMap;
use std::fmt;

type Producer = Box<dyn Fn() -> Value + Send>;

// Reserved binding names. They are not identifiers, so expressions cannot
// name them directly.
const SELECTION: &str = "#object";
const INLINING: &str = "#inline";


/// A bound value, either realized or computed on first access.
enum Binding {
    Value(Value),
    Lazy {
        producer: Producer,
        realized: OnceCell<Value>,
    },
}

impl Binding {
    fn get(&self) -> &Value {
        match self {
            Binding::Value(value) => value,
            Binding::Lazy { producer, realized } => realized.get_or_init(|| producer()),
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Value(value) => value.fmt(f),
            Binding::Lazy { realized, .. } => match realized.get() {
                Some(value) => value.fmt(f),
                None => f.write_str("<lazy>"),
            },
        }
    }
}

/// Variable bindings for one template invocation.
#[derive(Debug, Default)]
pub struct Context {
    root: HashMap<String, Binding>,
    scopes: Vec<HashMap<String, Binding>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context whose root bindings are the entries of an object.
    pub fn from_value(root_data: Value) -> Result<Self> {
        match root_data {
            Value::Object(obj) => Ok(Self {
                root: obj
                    .into_iter()
                    .map(|(k, v)| (k, Binding::Value(v)))
                    .collect(),
                scopes: Vec::new(),
            }),
            Value::Null => Ok(Self::new()),
            other => Err(EngineError::type_error(format!(
                "root data must be an object, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn from_json(data: serde_json::Value) -> Result<Self> {
        Self::from_value(Value::from_json(data))
    }

    /// Bind a root variable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.root.insert(name.into(), Binding::Value(value.into()));
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Bind a variable in the innermost scope whose value is produced on
    /// first lookup. The producer runs at most once.
    pub fn bind_lazy(
        &mut self,
        name: impl Into<String>,
        producer: impl Fn() -> Value + Send + 'static,
    ) {
        let binding = Binding::Lazy {
            producer: Box::new(producer),
            realized: OnceCell::new(),
        };
        self.innermost().insert(name.into(), binding);
    }

    /// Bind a variable in the innermost scope, shadowing outer bindings.
    pub fn set_local(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.innermost()
            .insert(name.into(), Binding::Value(value.into()));
    }

    /// Look a name up from the innermost scope outward.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.root.get(name))
            .map(Binding::get)
    }

    /// Mutable access to the innermost binding of `name`. A lazy binding is
    /// realized first.
    pub fn lookup_mut(&mut self, name: &str) -> Option<&mut Value> {
        let binding = match self.scopes.iter_mut().rev().find_map(|scope| scope.get_mut(name)) {
            Some(binding) => binding,
            None => self.root.get_mut(name)?,
        };
        match binding {
            Binding::Value(value) => Some(value),
            Binding::Lazy { producer, realized } => {
                realized.get_or_init(|| producer());
                realized.get_mut()
            }
        }
    }

    /// Set the object `*{...}` expressions resolve against, for the
    /// innermost scope.
    pub fn set_selection(&mut self, target: Value) {
        self.set_local(SELECTION, target);
    }

    pub fn selection(&self) -> Option<&Value> {
        self.lookup(SELECTION)
    }

    /// Turn `[[...]]` / `[(...)]` text inlining on or off for the innermost
    /// scope.
    pub fn set_inlining(&mut self, enabled: bool) {
        self.set_local(INLINING, enabled);
    }

    pub fn inlining(&self) -> bool {
        self.lookup(INLINING).is_some_and(Value::is_truthy)
    }

    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Number of local scopes currently pushed.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    fn innermost(&mut self) -> &mut HashMap<String, Binding> {
        match self.scopes.last_mut() {
            Some(scope) => scope,
            None => &mut self.root,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn create_test_context() -> Context {
        Context::from_json(json!({"name": "Alice", "user": {"email": "alice@example.com"}}))
            .unwrap()
    }

    #[test]
    fn test_lookup_root() {
        let ctx = create_test_context();
        assert_eq!(ctx.lookup("name"), Some(&Value::from("Alice")));
        assert!(ctx.lookup("user").and_then(|u| u.get("email")).is_some());
        assert_eq!(ctx.lookup("unknown"), None);
    }

    #[test]
    fn test_scope_stack() {
        let mut ctx = create_test_context();
        ctx.push_scope();
        ctx.set_local("item", 42i64);
        assert_eq!(ctx.lookup("item"), Some(&Value::Integer(42)));

        ctx.pop_scope();
        assert_eq!(ctx.lookup("item"), None);
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn test_shadowing_restored_on_pop() {
        let mut ctx = create_test_context();
        ctx.push_scope();
        ctx.set_local("name", "Bob");
        ctx.push_scope();
        assert_eq!(ctx.lookup("name"), Some(&Value::from("Bob")));
        ctx.pop_scope();
        ctx.pop_scope();
        assert_eq!(ctx.lookup("name"), Some(&Value::from("Alice")));
    }

    #[test]
    fn test_lazy_binding_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut ctx = Context::new();
        ctx.bind_lazy("expensive", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Value::Integer(7)
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctx.lookup("expensive"), Some(&Value::Integer(7)));
        assert_eq!(ctx.lookup("expensive"), Some(&Value::Integer(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lookup_mut_updates_outer_scope() {
        let mut ctx = create_test_context();
        ctx.push_scope();
        ctx.set_local("seen", false);
        ctx.push_scope();
        if let Some(seen) = ctx.lookup_mut("seen") {
            *seen = Value::Bool(true);
        }
        ctx.pop_scope();
        assert_eq!(ctx.lookup("seen"), Some(&Value::Bool(true)));
        assert!(ctx.lookup_mut("missing").is_none());
    }

    #[test]
    fn test_selection_and_inlining_are_scoped() {
        let mut ctx = create_test_context();
        assert_eq!(ctx.selection(), None);
        assert!(!ctx.inlining());

        ctx.push_scope();
        ctx.set_selection(Value::from("target"));
        ctx.set_inlining(true);
        assert_eq!(ctx.selection(), Some(&Value::from("target")));
        assert!(ctx.inlining());

        ctx.pop_scope();
        assert_eq!(ctx.selection(), None);
        assert!(!ctx.inlining());
    }

    #[test]
    fn test_root_must_be_object() {
        assert!(matches!(
            Context::from_json(json!([1, 2])),
            Err(EngineError::TypeError { .. })
        ));
        assert!(Context::from_json(json!(null)).is_ok());
    }
}
