//! Compiled relation expressions.
//!
//! The compiler lowers each `(type, relation)` rewrite into an
//! [`Expression`] tree whose references are already resolved, so the
//! evaluator never re-validates the model on the query path.

use super::types::{Subject, TypeConstraint};

/// A compiled userset expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Tuples stored against the object/relation itself.
    Direct { allowed: Vec<TypeConstraint> },
    /// Another relation on the same object.
    ComputedRelation { relation: String },
    /// `computed_relation` on each object reached through `tupleset`.
    ///
    /// `target_types` lists the tupleset's subject types that define
    /// `computed_relation`; reads are filtered to them.
    TupleToUserset {
        tupleset: String,
        computed_relation: String,
        target_types: Vec<String>,
    },
    /// Any child.
    Union(Vec<Expression>),
    /// All children.
    Intersection(Vec<Expression>),
    /// Base and not subtract.
    Exclusion {
        base: Box<Expression>,
        subtract: Box<Expression>,
    },
}

impl Expression {
    /// Short label for evaluation traces.
    pub fn kind(&self) -> &'static str {
        match self {
            Expression::Direct { .. } => "direct",
            Expression::ComputedRelation { .. } => "computed",
            Expression::TupleToUserset { .. } => "tuple_to_userset",
            Expression::Union(_) => "union",
            Expression::Intersection(_) => "intersection",
            Expression::Exclusion { .. } => "exclusion",
        }
    }
}

/// A compiled relation on a type.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRelation {
    /// The owning type.
    pub type_name: String,
    /// The relation name.
    pub name: String,
    /// Subject types allowed on stored tuples for this relation.
    pub allowed: Vec<TypeConstraint>,
    /// How the relation's userset is computed.
    pub expression: Expression,
}

impl CompiledRelation {
    /// Whether a stored subject is allowed on this relation.
    pub fn admits(&self, subject: &Subject) -> bool {
        self.allowed.iter().any(|c| c.admits(subject))
    }

    /// Whether the relation is plain direct assignment of concrete subjects,
    /// with no userset indirection. Such relations can be answered from a
    /// reverse index alone.
    pub fn is_concrete_direct(&self) -> bool {
        matches!(self.expression, Expression::Direct { .. })
            && self.allowed.iter().all(|c| c.relation.is_none())
    }
}
