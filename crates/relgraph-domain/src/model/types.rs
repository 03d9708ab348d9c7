//! Core type definitions: model description, objects, subjects, snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque point-in-time token for tuple reads.
///
/// Snapshots are store revisions: a read at snapshot `n` observes exactly
/// the writes committed at revisions `<= n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Snapshot(u64);

impl Snapshot {
    /// Snapshot of an empty store.
    pub const ZERO: Snapshot = Snapshot(0);

    /// Creates a snapshot token for a store revision.
    pub const fn new(revision: u64) -> Self {
        Self(revision)
    }

    /// Returns the store revision of this snapshot.
    pub const fn revision(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An object identifier (e.g., "document:readme").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    /// The type portion (e.g., "document").
    pub object_type: String,
    /// The ID portion (e.g., "readme").
    pub object_id: String,
}

impl ObjectRef {
    /// Creates a new object reference from type and ID.
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }

    /// Parses an object from "type:id" format.
    pub fn parse(value: &str) -> Result<Self, &'static str> {
        let (object_type, object_id) = value
            .split_once(':')
            .ok_or("object must be in 'type:id' format")?;
        if object_type.is_empty() || object_id.is_empty() {
            return Err("object type and id cannot be empty");
        }
        if object_id.contains('#') || object_id.contains(':') {
            return Err("object id cannot contain ':' or '#'");
        }
        if object_id == "*" {
            return Err("object id cannot be a wildcard");
        }
        Ok(Self::new(object_type, object_id))
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// The subject of a tuple or check: a concrete object, a userset, or a wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Subject {
    /// A concrete subject (e.g., "user:alice").
    Object(ObjectRef),
    /// Everyone holding `relation` on `object` (e.g., "domain:acme#member").
    Userset { object: ObjectRef, relation: String },
    /// Every concrete subject of a type (e.g., "user:*").
    Wildcard { subject_type: String },
}

impl Subject {
    /// Creates a concrete subject.
    pub fn object(subject_type: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Subject::Object(ObjectRef::new(subject_type, subject_id))
    }

    /// Creates a userset subject.
    pub fn userset(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Subject::Userset {
            object: ObjectRef::new(object_type, object_id),
            relation: relation.into(),
        }
    }

    /// Creates a typed wildcard subject.
    pub fn wildcard(subject_type: impl Into<String>) -> Self {
        Subject::Wildcard {
            subject_type: subject_type.into(),
        }
    }

    /// Parses "type:id", "type:id#relation" or "type:*".
    pub fn parse(value: &str) -> Result<Self, &'static str> {
        if let Some((object, relation)) = value.split_once('#') {
            if relation.is_empty() {
                return Err("userset relation cannot be empty");
            }
            let object = ObjectRef::parse(object)?;
            return Ok(Subject::Userset {
                object,
                relation: relation.to_string(),
            });
        }
        if let Some(subject_type) = value.strip_suffix(":*") {
            if subject_type.is_empty() || subject_type.contains(':') {
                return Err("wildcard must be in 'type:*' format");
            }
            return Ok(Subject::wildcard(subject_type));
        }
        ObjectRef::parse(value).map(Subject::Object)
    }

    /// Returns the type of this subject.
    pub fn subject_type(&self) -> &str {
        match self {
            Subject::Object(object) => &object.object_type,
            Subject::Userset { object, .. } => &object.object_type,
            Subject::Wildcard { subject_type } => subject_type,
        }
    }

    /// Returns the relation of a userset subject.
    pub fn userset_relation(&self) -> Option<&str> {
        match self {
            Subject::Userset { relation, .. } => Some(relation),
            _ => None,
        }
    }

    /// Whether this is a typed wildcard.
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Subject::Wildcard { .. })
    }

    /// Whether a stored subject grants the relation to `requested` directly,
    /// without expanding any userset.
    ///
    /// A stored wildcard grants every concrete subject of its type. Wildcards
    /// are never accepted on the requesting side.
    pub fn grants(&self, requested: &Subject) -> bool {
        if requested.is_wildcard() {
            return false;
        }
        match self {
            Subject::Wildcard { subject_type } => {
                matches!(requested, Subject::Object(object) if &object.object_type == subject_type)
            }
            _ => self == requested,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Object(object) => write!(f, "{}", object),
            Subject::Userset { object, relation } => write!(f, "{}#{}", object, relation),
            Subject::Wildcard { subject_type } => write!(f, "{}:*", subject_type),
        }
    }
}

/// A relationship fact `(object, relation, subject)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tuple {
    /// The object of the relationship.
    pub object: ObjectRef,
    /// The relation between subject and object.
    pub relation: String,
    /// The subject of the relationship.
    pub subject: Subject,
}

impl Tuple {
    /// Creates a new Tuple.
    pub fn new(object: ObjectRef, relation: impl Into<String>, subject: Subject) -> Self {
        Self {
            object,
            relation: relation.into(),
            subject,
        }
    }

    /// Parses a tuple from its text parts, e.g.
    /// `("document:doc1", "viewer", "domain:acme#member")`.
    pub fn parse(object: &str, relation: &str, subject: &str) -> Result<Self, &'static str> {
        if relation.is_empty() {
            return Err("relation cannot be empty");
        }
        Ok(Self {
            object: ObjectRef::parse(object)?,
            relation: relation.to_string(),
            subject: Subject::parse(subject)?,
        })
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.object, self.relation, self.subject)
    }
}

/// A structured model description, as produced by an external schema parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    /// Schema version (e.g., "1.1").
    pub schema_version: String,
    /// Type definitions in declaration order.
    pub type_definitions: Vec<TypeDefinition>,
}

impl ModelDescription {
    /// Creates an empty model description.
    pub fn new(schema_version: impl Into<String>) -> Self {
        Self {
            schema_version: schema_version.into(),
            type_definitions: Vec::new(),
        }
    }

    /// Creates a model description with type definitions.
    pub fn with_types(
        schema_version: impl Into<String>,
        type_definitions: Vec<TypeDefinition>,
    ) -> Self {
        Self {
            schema_version: schema_version.into(),
            type_definitions,
        }
    }
}

/// A type declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// The type name (e.g., "document").
    #[serde(rename = "type")]
    pub type_name: String,
    /// Relations in declaration order.
    #[serde(default)]
    pub relations: Vec<RelationDefinition>,
}

impl TypeDefinition {
    /// Creates a type definition.
    pub fn new(type_name: impl Into<String>, relations: Vec<RelationDefinition>) -> Self {
        Self {
            type_name: type_name.into(),
            relations,
        }
    }
}

/// A relation declaration on a type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDefinition {
    /// The relation name.
    pub name: String,
    /// Subject types allowed on directly stored tuples.
    #[serde(default)]
    pub type_constraints: Vec<TypeConstraint>,
    /// Rewrite expression; `None` means direct assignment only.
    #[serde(default)]
    pub rewrite: Option<Userset>,
}

impl RelationDefinition {
    /// A directly assignable relation.
    pub fn direct(name: impl Into<String>, type_constraints: Vec<TypeConstraint>) -> Self {
        Self {
            name: name.into(),
            type_constraints,
            rewrite: None,
        }
    }

    /// A relation with a rewrite expression.
    pub fn rewritten(
        name: impl Into<String>,
        type_constraints: Vec<TypeConstraint>,
        rewrite: Userset,
    ) -> Self {
        Self {
            name: name.into(),
            type_constraints,
            rewrite: Some(rewrite),
        }
    }
}

/// An allowed subject type: `user`, `domain#member`, or `user:*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeConstraint {
    /// The subject type.
    pub type_name: String,
    /// Relation for userset subjects (e.g., "member" in "domain#member").
    #[serde(default)]
    pub relation: Option<String>,
    /// Whether the constraint admits the typed wildcard.
    #[serde(default)]
    pub wildcard: bool,
}

impl TypeConstraint {
    /// Concrete subjects of a type.
    pub fn direct(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: None,
            wildcard: false,
        }
    }

    /// Userset subjects `type:id#relation`.
    pub fn userset(type_name: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: Some(relation.into()),
            wildcard: false,
        }
    }

    /// The typed wildcard `type:*`.
    pub fn wildcard(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            relation: None,
            wildcard: true,
        }
    }

    /// Parses "user", "domain#member" or "user:*".
    pub fn parse(value: &str) -> Result<Self, &'static str> {
        if value.is_empty() {
            return Err("type constraint cannot be empty");
        }
        if let Some(type_name) = value.strip_suffix(":*") {
            return Ok(Self::wildcard(type_name));
        }
        match value.split_once('#') {
            Some((type_name, relation)) if !type_name.is_empty() && !relation.is_empty() => {
                Ok(Self::userset(type_name, relation))
            }
            Some(_) => Err("type constraint must be in 'type#relation' format"),
            None => Ok(Self::direct(value)),
        }
    }

    /// Whether a stored subject is admitted by this constraint.
    pub fn admits(&self, subject: &Subject) -> bool {
        match subject {
            Subject::Object(object) => {
                !self.wildcard && self.relation.is_none() && object.object_type == self.type_name
            }
            Subject::Userset { object, relation } => {
                object.object_type == self.type_name && self.relation.as_deref() == Some(relation)
            }
            Subject::Wildcard { subject_type } => self.wildcard && *subject_type == self.type_name,
        }
    }
}

impl fmt::Display for TypeConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.relation, self.wildcard) {
            (_, true) => write!(f, "{}:*", self.type_name),
            (Some(relation), false) => write!(f, "{}#{}", self.type_name, relation),
            (None, false) => write!(f, "{}", self.type_name),
        }
    }
}

/// A rewrite expression as written in the model description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Userset {
    /// Direct assignment (this).
    This,
    /// Another relation on the same object.
    ComputedUserset { relation: String },
    /// A relation on objects reached through the tupleset relation.
    TupleToUserset {
        tupleset: String,
        computed_userset: String,
    },
    /// Union of child expressions.
    Union { children: Vec<Userset> },
    /// Intersection of child expressions.
    Intersection { children: Vec<Userset> },
    /// Base minus subtract.
    Exclusion {
        base: Box<Userset>,
        subtract: Box<Userset>,
    },
}

impl Userset {
    /// `ComputedUserset` shorthand.
    pub fn computed(relation: impl Into<String>) -> Self {
        Userset::ComputedUserset {
            relation: relation.into(),
        }
    }

    /// `TupleToUserset` shorthand.
    pub fn tuple_to_userset(tupleset: impl Into<String>, computed: impl Into<String>) -> Self {
        Userset::TupleToUserset {
            tupleset: tupleset.into(),
            computed_userset: computed.into(),
        }
    }

    /// `Exclusion` shorthand.
    pub fn exclusion(base: Userset, subtract: Userset) -> Self {
        Userset::Exclusion {
            base: Box::new(base),
            subtract: Box::new(subtract),
        }
    }

    /// Whether the expression contains direct assignment anywhere.
    pub fn contains_this(&self) -> bool {
        match self {
            Userset::This => true,
            Userset::ComputedUserset { .. } | Userset::TupleToUserset { .. } => false,
            Userset::Union { children } | Userset::Intersection { children } => {
                children.iter().any(Userset::contains_this)
            }
            Userset::Exclusion { base, subtract } => base.contains_this() || subtract.contains_this(),
        }
    }
}
