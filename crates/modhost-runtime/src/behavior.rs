//! Execution behaviors
//!
//! A module's `execute()` body is host code registered under a name. Type
//! definitions refer to it through their `execute` attribute.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::object::{Object, ObjectRef, Value};

/// Name of the built-in behavior that renders an instance's object graph.
pub const DESCRIBE_BEHAVIOR: &str = "describe";

/// Outcome of a behavior run
pub type BehaviorResult = Result<String, Box<dyn std::error::Error + Send + Sync>>;

/// Host code run by `execute()`.
pub trait Behavior: Send + Sync {
    fn execute(&self, instance: &ObjectRef) -> BehaviorResult;
}

impl<F> Behavior for F
where
    F: Fn(&ObjectRef) -> BehaviorResult + Send + Sync,
{
    fn execute(&self, instance: &ObjectRef) -> BehaviorResult {
        self(instance)
    }
}

/// Renders the object graph reachable from an instance.
pub struct Describe;

impl Behavior for Describe {
    fn execute(&self, instance: &ObjectRef) -> BehaviorResult {
        Ok(describe(instance))
    }
}

/// Render an instance and its dependencies, one field per line.
///
/// A back-reference to an instance already on the current path is printed
/// as `<cycle Type>`.
pub fn describe(instance: &ObjectRef) -> String {
    let mut out = String::new();
    let mut path: Vec<ObjectRef> = Vec::new();
    render(instance, 0, &mut path, &mut out);
    out
}

fn render(instance: &ObjectRef, depth: usize, path: &mut Vec<ObjectRef>, out: &mut String) {
    let _ = writeln!(out, "{} {{", instance.type_name());
    path.push(instance.clone());
    let indent = "  ".repeat(depth + 1);
    for (name, value) in instance.fields() {
        let _ = write!(out, "{}{}: ", indent, name);
        match value {
            Value::Object(dep) if path.iter().any(|seen| Object::same(seen, &dep)) => {
                let _ = writeln!(out, "<cycle {}>", dep.type_name());
            }
            Value::Object(dep) => render(&dep, depth + 1, path, out),
            other => {
                let _ = writeln!(out, "{:?}", other);
            }
        }
    }
    path.pop();
    let _ = writeln!(out, "{}}}", "  ".repeat(depth));
}

/// Named behaviors available to modules.
pub struct BehaviorRegistry {
    behaviors: RwLock<HashMap<String, Arc<dyn Behavior>>>,
}

impl Default for BehaviorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BehaviorRegistry {
    /// Create a registry holding the built-in `describe` behavior
    pub fn new() -> Self {
        let registry = Self {
            behaviors: RwLock::new(HashMap::new()),
        };
        registry.register(DESCRIBE_BEHAVIOR, Describe);
        registry
    }

    /// Register or replace a behavior
    pub fn register<B: Behavior + 'static>(&self, name: &str, behavior: B) {
        self.behaviors
            .write()
            .insert(name.to_string(), Arc::new(behavior));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Behavior>> {
        self.behaviors.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.behaviors.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.behaviors.read().keys().cloned().collect();
        names.sort();
        names
    }
}
