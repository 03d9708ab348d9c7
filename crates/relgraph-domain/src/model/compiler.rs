//! Model compiler.
//!
//! Turns a [`ModelDescription`] into a [`TypeRegistry`]. Validation runs in
//! declaration order and stops at the first error, so a model either
//! compiles completely or not at all:
//! - Types and relations are unique
//! - All referenced types and relations exist
//! - Tuple-to-userset rewrites point at a directly assignable tupleset
//!   whose subject types define the computed relation
//! - Computed relations on one type form no cycle

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::error::{CompileError, CompileResult};

use super::expression::{CompiledRelation, Expression};
use super::registry::{CompiledType, TypeRegistry};
use super::types::{ModelDescription, RelationDefinition, TypeConstraint, TypeDefinition, Userset};

/// Compiles a model description into an immutable type registry.
///
/// # Errors
///
/// Returns the first [`CompileError`] found, naming the offending
/// declaration.
pub fn compile(model: &ModelDescription) -> CompileResult<TypeRegistry> {
    let compiler = ModelCompiler::new(model)?;
    let mut types = Vec::with_capacity(model.type_definitions.len());

    for type_def in &model.type_definitions {
        types.push(compiler.compile_type(type_def)?);
    }

    let registry = TypeRegistry::new(model.schema_version.clone(), types);
    debug!(
        model_id = registry.model_id(),
        types = model.type_definitions.len(),
        "compiled model"
    );
    Ok(registry)
}

struct ModelCompiler<'a> {
    /// Relation definitions per declared type.
    relations: HashMap<&'a str, HashMap<&'a str, &'a RelationDefinition>>,
}

impl<'a> ModelCompiler<'a> {
    fn new(model: &'a ModelDescription) -> CompileResult<Self> {
        let mut relations: HashMap<&str, HashMap<&str, &RelationDefinition>> = HashMap::new();

        for type_def in &model.type_definitions {
            if relations.contains_key(type_def.type_name.as_str()) {
                return Err(CompileError::DuplicateType {
                    type_name: type_def.type_name.clone(),
                });
            }
            let mut by_name = HashMap::new();
            for relation_def in &type_def.relations {
                if by_name
                    .insert(relation_def.name.as_str(), relation_def)
                    .is_some()
                {
                    return Err(CompileError::DuplicateRelation {
                        type_name: type_def.type_name.clone(),
                        relation: relation_def.name.clone(),
                    });
                }
            }
            relations.insert(type_def.type_name.as_str(), by_name);
        }

        Ok(Self { relations })
    }

    fn relation(&self, type_name: &str, relation: &str) -> Option<&'a RelationDefinition> {
        self.relations
            .get(type_name)
            .and_then(|rels| rels.get(relation).copied())
    }

    fn compile_type(&self, type_def: &TypeDefinition) -> CompileResult<CompiledType> {
        let mut compiled = Vec::with_capacity(type_def.relations.len());
        for relation_def in &type_def.relations {
            compiled.push(Arc::new(self.compile_relation(type_def, relation_def)?));
        }

        if let Some((relation, cycle)) = detect_computed_cycle(type_def) {
            return Err(CompileError::InvalidRewrite {
                type_name: type_def.type_name.clone(),
                relation,
                reason: format!("computed relation cycle: {}", cycle.join(" -> ")),
            });
        }

        Ok(CompiledType::new(type_def.type_name.clone(), compiled))
    }

    fn compile_relation(
        &self,
        type_def: &TypeDefinition,
        relation_def: &RelationDefinition,
    ) -> CompileResult<CompiledRelation> {
        let site = Site {
            type_name: &type_def.type_name,
            relation: &relation_def.name,
        };

        for constraint in &relation_def.type_constraints {
            self.validate_type_constraint(&site, constraint)?;
        }

        let rewrite = relation_def.rewrite.as_ref().unwrap_or(&Userset::This);
        let directly_assignable = rewrite.contains_this();

        if directly_assignable && relation_def.type_constraints.is_empty() {
            return Err(site.invalid("direct assignment declares no allowed subject types"));
        }
        if !directly_assignable && !relation_def.type_constraints.is_empty() {
            return Err(site.invalid("allowed subject types declared on a relation that is not directly assignable"));
        }

        let expression = self.compile_userset(&site, &relation_def.type_constraints, rewrite)?;

        Ok(CompiledRelation {
            type_name: type_def.type_name.clone(),
            name: relation_def.name.clone(),
            allowed: relation_def.type_constraints.clone(),
            expression,
        })
    }

    fn validate_type_constraint(
        &self,
        site: &Site<'_>,
        constraint: &TypeConstraint,
    ) -> CompileResult<()> {
        if !self.relations.contains_key(constraint.type_name.as_str()) {
            return Err(CompileError::UndefinedType {
                type_name: site.type_name.to_string(),
                relation: site.relation.to_string(),
                referenced_type: constraint.type_name.clone(),
            });
        }
        if let Some(relation) = &constraint.relation {
            if constraint.wildcard {
                return Err(site.invalid(format!("wildcard constraint '{}' cannot name a relation", constraint)));
            }
            if self.relation(&constraint.type_name, relation).is_none() {
                return Err(CompileError::UndefinedRelation {
                    type_name: site.type_name.to_string(),
                    relation: site.relation.to_string(),
                    referenced_type: constraint.type_name.clone(),
                    referenced_relation: relation.clone(),
                });
            }
        }
        Ok(())
    }

    fn compile_userset(
        &self,
        site: &Site<'_>,
        allowed: &[TypeConstraint],
        userset: &Userset,
    ) -> CompileResult<Expression> {
        match userset {
            Userset::This => Ok(Expression::Direct {
                allowed: allowed.to_vec(),
            }),
            Userset::ComputedUserset { relation } => {
                if self.relation(site.type_name, relation).is_none() {
                    return Err(site.undefined_relation(site.type_name, relation));
                }
                Ok(Expression::ComputedRelation {
                    relation: relation.clone(),
                })
            }
            Userset::TupleToUserset {
                tupleset,
                computed_userset,
            } => self.compile_tuple_to_userset(site, tupleset, computed_userset),
            Userset::Union { children } => {
                if children.is_empty() {
                    return Err(site.invalid("union has no children"));
                }
                Ok(Expression::Union(self.compile_children(site, allowed, children)?))
            }
            Userset::Intersection { children } => {
                if children.is_empty() {
                    return Err(site.invalid("intersection has no children"));
                }
                Ok(Expression::Intersection(
                    self.compile_children(site, allowed, children)?,
                ))
            }
            Userset::Exclusion { base, subtract } => Ok(Expression::Exclusion {
                base: Box::new(self.compile_userset(site, allowed, base)?),
                subtract: Box::new(self.compile_userset(site, allowed, subtract)?),
            }),
        }
    }

    fn compile_children(
        &self,
        site: &Site<'_>,
        allowed: &[TypeConstraint],
        children: &[Userset],
    ) -> CompileResult<Vec<Expression>> {
        children
            .iter()
            .map(|child| self.compile_userset(site, allowed, child))
            .collect()
    }

    fn compile_tuple_to_userset(
        &self,
        site: &Site<'_>,
        tupleset: &str,
        computed: &str,
    ) -> CompileResult<Expression> {
        let tupleset_def = self
            .relation(site.type_name, tupleset)
            .ok_or_else(|| site.undefined_relation(site.type_name, tupleset))?;

        if !matches!(tupleset_def.rewrite, None | Some(Userset::This)) {
            return Err(site.invalid(format!(
                "tupleset relation '{}' must be directly assignable",
                tupleset
            )));
        }

        let mut target_types: Vec<String> = Vec::new();
        for constraint in &tupleset_def.type_constraints {
            if constraint.relation.is_some() || constraint.wildcard {
                return Err(site.invalid(format!(
                    "tupleset relation '{}' may only reference concrete objects, found '{}'",
                    tupleset, constraint
                )));
            }
            if self.relation(&constraint.type_name, computed).is_some()
                && !target_types.contains(&constraint.type_name)
            {
                target_types.push(constraint.type_name.clone());
            }
        }

        if target_types.is_empty() {
            return Err(site.invalid(format!(
                "no type reachable through '{}' defines relation '{}'",
                tupleset, computed
            )));
        }

        Ok(Expression::TupleToUserset {
            tupleset: tupleset.to_string(),
            computed_relation: computed.to_string(),
            target_types,
        })
    }
}

/// The declaration being compiled, for error reporting.
struct Site<'a> {
    type_name: &'a str,
    relation: &'a str,
}

impl Site<'_> {
    fn invalid(&self, reason: impl Into<String>) -> CompileError {
        CompileError::InvalidRewrite {
            type_name: self.type_name.to_string(),
            relation: self.relation.to_string(),
            reason: reason.into(),
        }
    }

    fn undefined_relation(&self, referenced_type: &str, referenced_relation: &str) -> CompileError {
        CompileError::UndefinedRelation {
            type_name: self.type_name.to_string(),
            relation: self.relation.to_string(),
            referenced_type: referenced_type.to_string(),
            referenced_relation: referenced_relation.to_string(),
        }
    }
}

/// Finds a cycle among computed-relation edges of one type.
///
/// Returns the first relation on the cycle and the cycle path, which starts
/// and ends with that relation.
fn detect_computed_cycle(type_def: &TypeDefinition) -> Option<(String, Vec<String>)> {
    let graph: HashMap<&str, Vec<&str>> = type_def
        .relations
        .iter()
        .map(|rel| {
            let mut refs = Vec::new();
            if let Some(rewrite) = &rel.rewrite {
                collect_computed_relations(rewrite, &mut refs);
            }
            (rel.name.as_str(), refs)
        })
        .collect();

    let mut visited = HashSet::new();
    for rel in &type_def.relations {
        let mut stack = Vec::new();
        if dfs_cycle(rel.name.as_str(), &graph, &mut visited, &mut stack) {
            // The stack may lead into the cycle from outside it.
            let repeated = *stack.last()?;
            let start = stack.iter().position(|node| *node == repeated)?;
            let path = stack[start..].iter().map(|node| node.to_string()).collect();
            return Some((repeated.to_string(), path));
        }
    }
    None
}

fn collect_computed_relations<'a>(userset: &'a Userset, refs: &mut Vec<&'a str>) {
    match userset {
        Userset::ComputedUserset { relation } => refs.push(relation),
        // Tuple-to-userset moves to a different object through stored tuples.
        Userset::This | Userset::TupleToUserset { .. } => {}
        Userset::Union { children } | Userset::Intersection { children } => {
            for child in children {
                collect_computed_relations(child, refs);
            }
        }
        Userset::Exclusion { base, subtract } => {
            collect_computed_relations(base, refs);
            collect_computed_relations(subtract, refs);
        }
    }
}

fn dfs_cycle<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
) -> bool {
    if stack.contains(&node) {
        stack.push(node);
        return true;
    }
    if !visited.insert(node) {
        return false;
    }
    stack.push(node);
    for &next in graph.get(node).map(Vec::as_slice).unwrap_or_default() {
        if dfs_cycle(next, graph, visited, stack) {
            return true;
        }
    }
    stack.pop();
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Expression;

    /// The document/domain/user sample model.
    fn sample_model() -> ModelDescription {
        ModelDescription::with_types(
            "1.1",
            vec![
                TypeDefinition::new("user", vec![]),
                TypeDefinition::new(
                    "domain",
                    vec![RelationDefinition::direct(
                        "member",
                        vec![TypeConstraint::direct("user")],
                    )],
                ),
                TypeDefinition::new(
                    "document",
                    vec![
                        RelationDefinition::direct(
                            "viewer",
                            vec![
                                TypeConstraint::userset("domain", "member"),
                                TypeConstraint::direct("user"),
                            ],
                        ),
                        RelationDefinition::direct(
                            "commenter",
                            vec![
                                TypeConstraint::userset("domain", "member"),
                                TypeConstraint::direct("user"),
                            ],
                        ),
                        RelationDefinition::direct(
                            "editor",
                            vec![
                                TypeConstraint::userset("domain", "member"),
                                TypeConstraint::direct("user"),
                            ],
                        ),
                        RelationDefinition::direct("owner", vec![TypeConstraint::direct("user")]),
                    ],
                ),
            ],
        )
    }

    fn folder_model(parent_constraints: Vec<TypeConstraint>, ttu_relation: &str) -> ModelDescription {
        ModelDescription::with_types(
            "1.1",
            vec![
                TypeDefinition::new("user", vec![]),
                TypeDefinition::new(
                    "folder",
                    vec![
                        RelationDefinition::direct("parent", parent_constraints),
                        RelationDefinition::rewritten(
                            "viewer",
                            vec![TypeConstraint::direct("user")],
                            Userset::Union {
                                children: vec![
                                    Userset::This,
                                    Userset::tuple_to_userset("parent", ttu_relation),
                                ],
                            },
                        ),
                    ],
                ),
            ],
        )
    }

    #[test]
    fn test_compiles_sample_model() {
        let registry = compile(&sample_model()).unwrap();
        let viewer = registry.get_relation("document", "viewer").unwrap();
        assert!(matches!(viewer.expression, Expression::Direct { ref allowed } if allowed.len() == 2));
    }

    #[test]
    fn test_compiles_recursive_tuple_to_userset() {
        let registry =
            compile(&folder_model(vec![TypeConstraint::direct("folder")], "viewer")).unwrap();
        let viewer = registry.get_relation("folder", "viewer").unwrap();
        match &viewer.expression {
            Expression::Union(children) => match &children[1] {
                Expression::TupleToUserset { target_types, .. } => {
                    assert_eq!(target_types, &vec!["folder".to_string()]);
                }
                other => panic!("unexpected child {:?}", other),
            },
            other => panic!("unexpected expression {:?}", other),
        }
    }

    #[test]
    fn test_rejects_undefined_type_in_constraint() {
        let mut model = sample_model();
        model.type_definitions[2].relations[0]
            .type_constraints
            .push(TypeConstraint::direct("group"));
        assert_eq!(
            compile(&model).unwrap_err(),
            CompileError::UndefinedType {
                type_name: "document".to_string(),
                relation: "viewer".to_string(),
                referenced_type: "group".to_string(),
            }
        );
    }

    #[test]
    fn test_rejects_undefined_userset_relation_in_constraint() {
        let mut model = sample_model();
        model.type_definitions[2].relations[3]
            .type_constraints
            .push(TypeConstraint::userset("domain", "admin"));
        assert!(matches!(
            compile(&model).unwrap_err(),
            CompileError::UndefinedRelation { relation, referenced_relation, .. }
                if relation == "owner" && referenced_relation == "admin"
        ));
    }

    #[test]
    fn test_rejects_undefined_computed_relation() {
        let mut model = sample_model();
        model.type_definitions[2].relations.push(RelationDefinition::rewritten(
            "can_read",
            vec![],
            Userset::computed("reader"),
        ));
        assert!(matches!(
            compile(&model).unwrap_err(),
            CompileError::UndefinedRelation { relation, referenced_relation, .. }
                if relation == "can_read" && referenced_relation == "reader"
        ));
    }

    #[test]
    fn test_rejects_undefined_tupleset() {
        let model = ModelDescription::with_types(
            "1.1",
            vec![
                TypeDefinition::new("user", vec![]),
                TypeDefinition::new(
                    "doc",
                    vec![RelationDefinition::rewritten(
                        "viewer",
                        vec![],
                        Userset::tuple_to_userset("parent", "viewer"),
                    )],
                ),
            ],
        );
        assert!(matches!(
            compile(&model).unwrap_err(),
            CompileError::UndefinedRelation { referenced_relation, .. } if referenced_relation == "parent"
        ));
    }

    #[test]
    fn test_rejects_tupleset_whose_targets_lack_computed_relation() {
        let err = compile(&folder_model(vec![TypeConstraint::direct("user")], "viewer")).unwrap_err();
        assert!(matches!(err, CompileError::InvalidRewrite { ref reason, .. } if reason.contains("no type reachable")));
    }

    #[test]
    fn test_rejects_userset_tupleset_constraints() {
        let err = compile(&folder_model(
            vec![TypeConstraint::userset("folder", "viewer")],
            "viewer",
        ))
        .unwrap_err();
        assert!(matches!(err, CompileError::InvalidRewrite { .. }));
    }

    #[test]
    fn test_rejects_computed_relation_cycle() {
        let model = ModelDescription::with_types(
            "1.1",
            vec![
                TypeDefinition::new("user", vec![]),
                TypeDefinition::new(
                    "doc",
                    vec![
                        RelationDefinition::rewritten("a", vec![], Userset::computed("b")),
                        RelationDefinition::rewritten(
                            "b",
                            vec![TypeConstraint::direct("user")],
                            Userset::Union {
                                children: vec![Userset::This, Userset::computed("a")],
                            },
                        ),
                    ],
                ),
            ],
        );
        let err = compile(&model).unwrap_err();
        assert!(
            matches!(err, CompileError::InvalidRewrite { ref reason, .. } if reason.contains("a -> b -> a")),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_cycle_path_starts_on_the_cycle() {
        let model = ModelDescription::with_types(
            "1.1",
            vec![
                TypeDefinition::new("user", vec![]),
                TypeDefinition::new(
                    "doc",
                    vec![
                        RelationDefinition::rewritten("a", vec![], Userset::computed("b")),
                        RelationDefinition::rewritten("b", vec![], Userset::computed("c")),
                        RelationDefinition::rewritten(
                            "c",
                            vec![TypeConstraint::direct("user")],
                            Userset::Union {
                                children: vec![Userset::This, Userset::computed("b")],
                            },
                        ),
                    ],
                ),
            ],
        );
        let err = compile(&model).unwrap_err();
        match err {
            CompileError::InvalidRewrite {
                ref relation,
                ref reason,
                ..
            } => {
                assert_eq!(relation, "b");
                assert!(reason.contains("b -> c -> b"), "unexpected reason: {reason}");
                assert!(!reason.contains("a ->"), "unexpected reason: {reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_duplicates() {
        let mut model = sample_model();
        model.type_definitions.push(TypeDefinition::new("user", vec![]));
        assert!(matches!(
            compile(&model).unwrap_err(),
            CompileError::DuplicateType { type_name } if type_name == "user"
        ));

        let mut model = sample_model();
        model.type_definitions[1]
            .relations
            .push(RelationDefinition::direct("member", vec![TypeConstraint::direct("user")]));
        assert!(matches!(
            compile(&model).unwrap_err(),
            CompileError::DuplicateRelation { .. }
        ));
    }

    #[test]
    fn test_rejects_direct_relation_without_allowed_types() {
        let mut model = sample_model();
        model.type_definitions[1]
            .relations
            .push(RelationDefinition::direct("admin", vec![]));
        assert!(matches!(
            compile(&model).unwrap_err(),
            CompileError::InvalidRewrite { relation, .. } if relation == "admin"
        ));
    }

    #[test]
    fn test_rejects_empty_union() {
        let mut model = sample_model();
        model.type_definitions[2].relations.push(RelationDefinition::rewritten(
            "nobody",
            vec![],
            Userset::Union { children: vec![] },
        ));
        assert!(matches!(
            compile(&model).unwrap_err(),
            CompileError::InvalidRewrite { reason, .. } if reason.contains("union")
        ));
    }
}
