//! Type definition format
//!
//! A module package stores one definition per type as a TOML document under
//! `path/to/Name.type`. The definition is what a realm resolves a type name
//! to, and what the instrumentation stage rewrites before it is defined.
//!
//! ```toml
//! name = "demo.Greeter"
//! extends = "demo.Base"
//! implements = ["demo.Service"]
//! execute = "describe"
//!
//! [component]
//! scope = "prototype"
//!
//! [[field]]
//! name = "id"
//! type = "int"
//! id = true
//!
//! [[field]]
//! name = "store"
//! type = "demo.Store"
//! inject = { required = true }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::RealmError;

/// Suffix of type definition entries inside a package.
pub const TYPE_SUFFIX: &str = ".type";

/// Built-in field type for integers.
pub const INT_TYPE: &str = "int";
/// Built-in field type for booleans.
pub const BOOL_TYPE: &str = "bool";
/// Built-in field type for strings.
pub const STRING_TYPE: &str = "string";

/// Whether a field type name denotes a built-in value type.
pub fn is_builtin_type(name: &str) -> bool {
    matches!(name, INT_TYPE | BOOL_TYPE | STRING_TYPE)
}

/// Convert an archive entry path (`a/b/C.type`) to a type name (`a.b.C`).
pub fn type_name_of_entry(entry: &str) -> Option<String> {
    let stem = entry.strip_suffix(TYPE_SUFFIX)?;
    if stem.is_empty() || stem.ends_with('/') {
        return None;
    }
    Some(stem.replace('/', "."))
}

/// Convert a type name (`a.b.C`) to its archive entry path (`a/b/C.type`).
pub fn entry_of_type_name(name: &str) -> String {
    format!("{}{}", name.replace('.', "/"), TYPE_SUFFIX)
}

/// Kind of a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    /// Concrete, instantiable type
    #[default]
    Class,
    /// Abstract base type, never instantiated directly
    Abstract,
    /// Pure contract
    Interface,
}

/// Component scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// One shared instance per process
    Singleton,
    /// A new instance per resolution
    #[default]
    Prototype,
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Singleton => write!(f, "singleton"),
            Scope::Prototype => write!(f, "prototype"),
        }
    }
}

/// How new instances of a type are constructed.
///
/// Written by the instrumentation stage; plain definitions use `Direct`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Construction {
    /// The default constructor runs without interception.
    #[default]
    Direct,
    /// The default constructor hands the new instance to the injection
    /// controller as its final step.
    InjectOnCreate,
    /// Instances are obtained through the generated singleton accessor.
    SingletonAccessor,
}

/// Component declaration attached to a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComponentDecl {
    #[serde(default)]
    pub scope: Scope,
}

fn default_true() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Injection declaration on a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectDecl {
    /// Fail when the dependency cannot be resolved
    #[serde(default = "default_true")]
    pub required: bool,
    /// Explicit concrete type overriding the declared field type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concrete: Option<String>,
}

impl Default for InjectDecl {
    fn default() -> Self {
        Self {
            required: true,
            concrete: None,
        }
    }
}

/// Literal initial value of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Str(String),
}

/// A declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    /// Marks the identifier field
    #[serde(default, skip_serializing_if = "is_false")]
    pub id: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Literal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inject: Option<InjectDecl>,
}

impl FieldDecl {
    /// Create a plain field
    pub fn new(name: &str, ty: &str) -> Self {
        Self {
            name: name.to_string(),
            ty: ty.to_string(),
            id: false,
            default: None,
            inject: None,
        }
    }

    /// Create the identifier field
    pub fn identifier(name: &str) -> Self {
        Self {
            id: true,
            ..Self::new(name, INT_TYPE)
        }
    }

    /// Create an injected field
    pub fn injected(name: &str, ty: &str, required: bool) -> Self {
        Self {
            inject: Some(InjectDecl {
                required,
                concrete: None,
            }),
            ..Self::new(name, ty)
        }
    }

    /// Override the concrete type of an injected field
    pub fn with_concrete(mut self, concrete: &str) -> Self {
        let inject = self.inject.get_or_insert_with(InjectDecl::default);
        inject.concrete = Some(concrete.to_string());
        self
    }

    /// Set the literal initial value
    pub fn with_default(mut self, value: Literal) -> Self {
        self.default = Some(value);
        self
    }

    fn looks_like_identifier(&self) -> bool {
        self.ty == INT_TYPE && (self.name == "id" || self.name.ends_with("_id"))
    }
}

/// A complete type definition.
///
/// Simple values come before tables so the definition serializes back to
/// valid TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    #[serde(default)]
    pub kind: TypeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub implements: Vec<String>,
    /// Whether an accessible default constructor exists
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub constructor: bool,
    /// Hand-written singleton accessor, replaced during instrumentation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessor: Option<String>,
    /// Behavior implementing `execute()`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execute: Option<String>,
    #[serde(default)]
    pub construction: Construction,
    /// Identifier field chosen by instrumentation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<ComponentDecl>,
    #[serde(default, rename = "field", skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldDecl>,
}

impl TypeDescriptor {
    /// Create a concrete, non-component type
    pub fn class(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: TypeKind::Class,
            extends: None,
            implements: Vec::new(),
            constructor: true,
            accessor: None,
            execute: None,
            construction: Construction::Direct,
            identifier: None,
            component: None,
            fields: Vec::new(),
        }
    }

    /// Create a contract type
    pub fn interface(name: &str) -> Self {
        Self {
            kind: TypeKind::Interface,
            ..Self::class(name)
        }
    }

    /// Create an abstract base type
    pub fn abstract_class(name: &str) -> Self {
        Self {
            kind: TypeKind::Abstract,
            ..Self::class(name)
        }
    }

    /// Declare the type as a component
    pub fn with_component(mut self, scope: Scope) -> Self {
        self.component = Some(ComponentDecl { scope });
        self
    }

    /// Set the super type
    pub fn with_extends(mut self, parent: &str) -> Self {
        self.extends = Some(parent.to_string());
        self
    }

    /// Add an implemented contract
    pub fn with_implements(mut self, contract: &str) -> Self {
        self.implements.push(contract.to_string());
        self
    }

    /// Add a field
    pub fn with_field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }

    /// Set the execute behavior
    pub fn with_execute(mut self, behavior: &str) -> Self {
        self.execute = Some(behavior.to_string());
        self
    }

    /// Declare a hand-written singleton accessor
    pub fn with_accessor(mut self, accessor: &str) -> Self {
        self.accessor = Some(accessor.to_string());
        self
    }

    /// Remove the default constructor
    pub fn without_constructor(mut self) -> Self {
        self.constructor = false;
        self
    }

    /// Parse a definition and check it names the requested type
    pub fn from_bytes(expected: &str, bytes: &[u8]) -> Result<Self, RealmError> {
        let text = std::str::from_utf8(bytes).map_err(|e| RealmError::Definition {
            name: expected.to_string(),
            reason: e.to_string(),
        })?;
        let descriptor: TypeDescriptor =
            toml::from_str(text).map_err(|e| RealmError::Definition {
                name: expected.to_string(),
                reason: e.to_string(),
            })?;
        if descriptor.name != expected {
            return Err(RealmError::Definition {
                name: expected.to_string(),
                reason: format!("definition declares {}", descriptor.name),
            });
        }
        Ok(descriptor)
    }

    /// Serialize the definition
    pub fn to_bytes(&self) -> Result<Vec<u8>, RealmError> {
        toml::to_string(self)
            .map(String::into_bytes)
            .map_err(|e| RealmError::Definition {
                name: self.name.clone(),
                reason: e.to_string(),
            })
    }

    /// Whether the type may not be instantiated directly
    pub fn is_abstract(&self) -> bool {
        self.kind != TypeKind::Class
    }

    pub fn is_component(&self) -> bool {
        self.component.is_some()
    }

    /// Component scope, if the type is a component
    pub fn scope(&self) -> Option<Scope> {
        self.component.map(|c| c.scope)
    }

    /// Look up a field declared on this type
    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields explicitly marked as identifier
    pub fn marked_identifiers(&self) -> Vec<&FieldDecl> {
        self.fields.iter().filter(|f| f.id).collect()
    }

    /// Fields eligible as identifier on this type alone.
    ///
    /// Marked fields win; without marks, integer fields named `id` or
    /// ending in `_id` are candidates.
    pub fn identifier_candidates(&self) -> Vec<String> {
        let marked = self.marked_identifiers();
        let fields: Vec<&FieldDecl> = if marked.is_empty() {
            self.fields
                .iter()
                .filter(|f| f.inject.is_none() && f.looks_like_identifier())
                .collect()
        } else {
            marked
        };
        fields.into_iter().map(|f| f.name.clone()).collect()
    }

    /// Fields carrying an injection declaration
    pub fn injected_fields(&self) -> impl Iterator<Item = (&FieldDecl, &InjectDecl)> {
        self.fields
            .iter()
            .filter_map(|f| f.inject.as_ref().map(|inject| (f, inject)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_name_conversion() {
        assert_eq!(
            type_name_of_entry("demo/store/Cache.type").as_deref(),
            Some("demo.store.Cache")
        );
        assert_eq!(type_name_of_entry("Top.type").as_deref(), Some("Top"));
        assert_eq!(type_name_of_entry("META-INF/MANIFEST.MF"), None);
        assert_eq!(type_name_of_entry("demo/.type"), None);
        assert_eq!(entry_of_type_name("demo.store.Cache"), "demo/store/Cache.type");
    }

    #[test]
    fn test_parse_definition() {
        let text = r#"
name = "demo.Greeter"
extends = "demo.Base"
implements = ["demo.Service"]
execute = "describe"

[component]
scope = "singleton"

[[field]]
name = "id"
type = "int"
id = true

[[field]]
name = "store"
type = "demo.Store"
inject = { required = false, concrete = "demo.MemoryStore" }

[[field]]
name = "greeting"
type = "string"
default = "hello"
"#;
        let desc = TypeDescriptor::from_bytes("demo.Greeter", text.as_bytes()).unwrap();
        assert_eq!(desc.kind, TypeKind::Class);
        assert_eq!(desc.scope(), Some(Scope::Singleton));
        assert_eq!(desc.extends.as_deref(), Some("demo.Base"));
        assert!(desc.constructor);
        assert_eq!(desc.construction, Construction::Direct);
        assert_eq!(desc.identifier_candidates(), vec!["id".to_string()]);

        let (field, inject) = desc.injected_fields().next().unwrap();
        assert_eq!(field.name, "store");
        assert!(!inject.required);
        assert_eq!(inject.concrete.as_deref(), Some("demo.MemoryStore"));
        assert_eq!(
            desc.field("greeting").unwrap().default,
            Some(Literal::Str("hello".to_string()))
        );
    }

    #[test]
    fn test_name_mismatch_is_rejected() {
        let bytes = TypeDescriptor::class("demo.Other").to_bytes().unwrap();
        let err = TypeDescriptor::from_bytes("demo.Expected", &bytes).unwrap_err();
        assert!(matches!(err, RealmError::Definition { .. }));
    }

    #[test]
    fn test_serialized_form_parses_back() {
        let desc = TypeDescriptor::class("demo.A")
            .with_component(Scope::Prototype)
            .with_extends("demo.Base")
            .with_field(FieldDecl::identifier("id"))
            .with_field(FieldDecl::injected("d", "demo.D", true).with_concrete("demo.DImpl"))
            .with_field(FieldDecl::new("flag", BOOL_TYPE).with_default(Literal::Bool(true)));

        let bytes = desc.to_bytes().unwrap();
        assert_eq!(TypeDescriptor::from_bytes("demo.A", &bytes).unwrap(), desc);
    }

    #[test]
    fn test_identifier_heuristics() {
        let unmarked = TypeDescriptor::class("demo.A")
            .with_field(FieldDecl::new("id", INT_TYPE))
            .with_field(FieldDecl::new("name", STRING_TYPE));
        assert_eq!(unmarked.identifier_candidates(), vec!["id".to_string()]);

        let two = TypeDescriptor::class("demo.B")
            .with_field(FieldDecl::new("id", INT_TYPE))
            .with_field(FieldDecl::new("owner_id", INT_TYPE));
        assert_eq!(two.identifier_candidates().len(), 2);

        // An explicit mark settles the choice.
        let marked = TypeDescriptor::class("demo.C")
            .with_field(FieldDecl::identifier("serial"))
            .with_field(FieldDecl::new("owner_id", INT_TYPE));
        assert_eq!(marked.identifier_candidates(), vec!["serial".to_string()]);

        // String fields never qualify.
        let text_id = TypeDescriptor::class("demo.D").with_field(FieldDecl::new("id", STRING_TYPE));
        assert!(text_id.identifier_candidates().is_empty());
    }

    #[test]
    fn test_kinds() {
        assert!(!TypeDescriptor::class("a.A").is_abstract());
        assert!(TypeDescriptor::interface("a.I").is_abstract());
        assert!(TypeDescriptor::abstract_class("a.B").is_abstract());
        assert!(is_builtin_type("int"));
        assert!(!is_builtin_type("demo.Store"));
    }
}
