//! The compiled, immutable type registry.
//!
//! A `TypeRegistry` is produced once per model version by
//! [`compile`](super::compile) and then shared read-only (behind `Arc`)
//! by every query evaluated against that version.

use std::collections::HashMap;
use std::sync::Arc;

use ulid::Ulid;

use crate::error::{DomainError, DomainResult};

use super::expression::CompiledRelation;
use super::types::{Subject, Tuple};

/// A compiled type with its relations in declaration order.
#[derive(Debug)]
pub struct CompiledType {
    /// The type name.
    pub name: String,
    relations: Vec<Arc<CompiledRelation>>,
    index: HashMap<String, usize>,
}

impl CompiledType {
    pub(crate) fn new(name: String, relations: Vec<Arc<CompiledRelation>>) -> Self {
        let index = relations
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();
        Self {
            name,
            relations,
            index,
        }
    }

    /// Looks up a relation by name.
    pub fn relation(&self, name: &str) -> Option<&Arc<CompiledRelation>> {
        self.index.get(name).map(|&i| &self.relations[i])
    }

    /// Relations in declaration order.
    pub fn relations(&self) -> impl Iterator<Item = &Arc<CompiledRelation>> {
        self.relations.iter()
    }
}

/// Immutable registry of compiled types for one model version.
///
/// # Thread Safety
///
/// The registry is never mutated after compilation, so it can be shared
/// across tasks without synchronization.
#[derive(Debug)]
pub struct TypeRegistry {
    model_id: String,
    schema_version: String,
    types: HashMap<String, Arc<CompiledType>>,
    order: Vec<String>,
}

impl TypeRegistry {
    pub(crate) fn new(schema_version: String, types: Vec<CompiledType>) -> Self {
        let order = types.iter().map(|t| t.name.clone()).collect();
        let types = types
            .into_iter()
            .map(|t| (t.name.clone(), Arc::new(t)))
            .collect();
        Self {
            model_id: Ulid::new().to_string(),
            schema_version,
            types,
            order,
        }
    }

    /// Unique id of this model version.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Schema version declared by the model description.
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Type names in declaration order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Gets a type by name.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::TypeNotFound` if the type is not declared.
    pub fn get_type(&self, type_name: &str) -> DomainResult<&Arc<CompiledType>> {
        self.types
            .get(type_name)
            .ok_or_else(|| DomainError::TypeNotFound {
                type_name: type_name.to_string(),
            })
    }

    /// Gets a compiled relation.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::TypeNotFound` if the type does not exist.
    /// Returns `DomainError::RelationNotFound` if the relation does not exist on the type.
    pub fn get_relation(
        &self,
        type_name: &str,
        relation: &str,
    ) -> DomainResult<Arc<CompiledRelation>> {
        self.get_type(type_name)?
            .relation(relation)
            .cloned()
            .ok_or_else(|| DomainError::RelationNotFound {
                type_name: type_name.to_string(),
                relation: relation.to_string(),
            })
    }

    /// Checks if a type exists.
    pub fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Checks if a relation exists on a type.
    pub fn has_relation(&self, type_name: &str, relation: &str) -> bool {
        self.types
            .get(type_name)
            .is_some_and(|t| t.relation(relation).is_some())
    }

    /// Validates a tuple against the registry.
    ///
    /// Checks that the object type and relation exist and that the subject
    /// is one of the relation's allowed subject types.
    pub fn validate_tuple(&self, tuple: &Tuple) -> DomainResult<()> {
        let relation = self.get_relation(&tuple.object.object_type, &tuple.relation)?;
        if !relation.admits(&tuple.subject) {
            return Err(DomainError::InvalidSubjectFormat {
                value: format!(
                    "{} is not an allowed subject of {}#{}",
                    tuple.subject, relation.type_name, relation.name
                ),
            });
        }
        Ok(())
    }

    /// Validates that a requesting subject is well formed for this model.
    pub(crate) fn validate_subject(&self, subject: &Subject) -> DomainResult<()> {
        if subject.is_wildcard() {
            return Err(DomainError::InvalidSubjectFormat {
                value: subject.to_string(),
            });
        }
        if let Subject::Userset { object, relation } = subject {
            self.get_relation(&object.object_type, relation)?;
        } else {
            self.get_type(subject.subject_type())?;
        }
        Ok(())
    }
}
