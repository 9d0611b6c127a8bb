use std::sync::Arc;

use modhost_kernel::{InjectError, Scope};

use crate::realm::TypeDefinition;

/// One injected field of a component.
#[derive(Debug, Clone)]
pub struct InjectionPoint {
    /// Type that declares the field; its realm resolves the target
    pub declaring: Arc<TypeDefinition>,
    pub field: String,
    /// Declared field type
    pub field_type: String,
    pub required: bool,
    /// Explicit concrete type overriding the declared one
    pub concrete: Option<String>,
}

impl InjectionPoint {
    /// Type name the dependency is resolved from
    pub fn target(&self) -> &str {
        self.concrete.as_deref().unwrap_or(&self.field_type)
    }
}

/// Cached injection plan of one component type.
#[derive(Debug)]
pub struct ComponentFactory {
    definition: Arc<TypeDefinition>,
    scope: Scope,
    identifier: String,
    points: Vec<InjectionPoint>,
}

impl ComponentFactory {
    /// Validate a component type and gather its injection points.
    ///
    /// The identifier field is checked on the concrete type only. Points
    /// come from the type itself, then from every component ancestor,
    /// nearest first; a field declared lower in the chain shadows one of
    /// the same name above it.
    pub fn build(definition: &Arc<TypeDefinition>) -> Result<Self, InjectError> {
        let descriptor = definition.descriptor();
        let scope = descriptor
            .scope()
            .ok_or_else(|| InjectError::NotAComponent(definition.name().to_string()))?;

        let mut candidates = match &descriptor.identifier {
            Some(field) => vec![field.clone()],
            None => descriptor.identifier_candidates(),
        };
        let identifier = match candidates.len() {
            0 => {
                return Err(InjectError::MissingIdentifierField(
                    definition.name().to_string(),
                ));
            }
            1 => candidates.remove(0),
            _ => {
                return Err(InjectError::AmbiguousIdentifierField {
                    type_name: definition.name().to_string(),
                    fields: candidates,
                });
            }
        };

        let mut points: Vec<InjectionPoint> = Vec::new();
        let chain = std::iter::once(definition.clone()).chain(
            definition
                .ancestors()?
                .into_iter()
                .filter(|ty| ty.descriptor().is_component()),
        );
        for declaring in chain {
            for (field, inject) in declaring.descriptor().injected_fields() {
                if points.iter().any(|p| p.field == field.name) {
                    continue;
                }
                points.push(InjectionPoint {
                    declaring: declaring.clone(),
                    field: field.name.clone(),
                    field_type: field.ty.clone(),
                    required: inject.required,
                    concrete: inject.concrete.clone(),
                });
            }
        }

        Ok(Self {
            definition: definition.clone(),
            scope,
            identifier,
            points,
        })
    }

    pub fn definition(&self) -> &Arc<TypeDefinition> {
        &self.definition
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Name of the identifier field
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn points(&self) -> &[InjectionPoint] {
        &self.points
    }
}
