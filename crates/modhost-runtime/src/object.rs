//! Runtime instances
//!
//! An [`Object`] is an instance of a [`TypeDefinition`]: a field table of
//! [`Value`]s plus the initialization flag the injection controller uses to
//! make `initialize` idempotent. Identity is the identity of the shared
//! handle ([`ObjectRef`]).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use modhost_kernel::{BOOL_TYPE, INT_TYPE, Literal, STRING_TYPE};
use parking_lot::RwLock;

use crate::realm::TypeDefinition;

/// Shared handle to an instance
pub type ObjectRef = Arc<Object>;

/// A field value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Object(ObjectRef),
}

impl Value {
    /// Type label used in diagnostics
    pub fn type_label(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(_) => BOOL_TYPE.to_string(),
            Value::Int(_) => INT_TYPE.to_string(),
            Value::Str(_) => STRING_TYPE.to_string(),
            Value::Object(obj) => obj.type_name().to_string(),
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Zero value of a declared field type
    pub fn zero_of(field_type: &str) -> Self {
        match field_type {
            INT_TYPE => Value::Int(0),
            BOOL_TYPE => Value::Bool(false),
            STRING_TYPE => Value::Str(String::new()),
            _ => Value::Null,
        }
    }
}

impl From<&Literal> for Value {
    fn from(literal: &Literal) -> Self {
        match literal {
            Literal::Bool(v) => Value::Bool(*v),
            Literal::Int(v) => Value::Int(*v),
            Literal::Str(v) => Value::Str(v.clone()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Str(v) => write!(f, "{:?}", v),
            // Objects may form cycles, print the handle only.
            Value::Object(obj) => write!(f, "<{}@{:p}>", obj.type_name(), Arc::as_ptr(obj)),
        }
    }
}

/// A runtime instance.
pub struct Object {
    ty: Arc<TypeDefinition>,
    fields: RwLock<BTreeMap<String, Value>>,
    initialized: AtomicBool,
}

impl Object {
    /// Create an instance with a prepared field table
    pub fn new(ty: Arc<TypeDefinition>, fields: BTreeMap<String, Value>) -> ObjectRef {
        Arc::new(Self {
            ty,
            fields: RwLock::new(fields),
            initialized: AtomicBool::new(false),
        })
    }

    /// The defining type
    pub fn type_definition(&self) -> &Arc<TypeDefinition> {
        &self.ty
    }

    pub fn type_name(&self) -> &str {
        self.ty.name()
    }

    /// Read a field
    pub fn get(&self, field: &str) -> Option<Value> {
        self.fields.read().get(field).cloned()
    }

    /// Write a field, returning the previous value
    pub fn set(&self, field: &str, value: Value) -> Option<Value> {
        self.fields.write().insert(field.to_string(), value)
    }

    /// Whether the instance has a field of that name
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.read().contains_key(field)
    }

    /// Snapshot of all fields in name order
    pub fn fields(&self) -> Vec<(String, Value)> {
        self.fields
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Dependency referenced by an object-valued field
    pub fn dependency(&self, field: &str) -> Option<ObjectRef> {
        self.get(field).and_then(|v| v.as_object().cloned())
    }

    /// Whether `initialize` has been entered for this instance
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Mark the instance as initialized.
    ///
    /// Returns `true` for the first caller only.
    pub fn begin_initialization(&self) -> bool {
        !self.initialized.swap(true, Ordering::AcqRel)
    }

    /// Clear the flag after a failed initialization so it can be retried
    pub fn abandon_initialization(&self) {
        self.initialized.store(false, Ordering::Release);
    }

    /// Whether two handles refer to the same instance
    pub fn same(a: &ObjectRef, b: &ObjectRef) -> bool {
        Arc::ptr_eq(a, b)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Object");
        s.field("type", &self.type_name());
        if let Some(fields) = self.fields.try_read() {
            for (name, value) in fields.iter() {
                s.field(name, value);
            }
        }
        s.finish()
    }
}
