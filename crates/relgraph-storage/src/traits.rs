//! TupleStore trait definition.

use std::fmt;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

/// Wildcard user id: `user:*` stands for every user.
pub const WILDCARD_ID: &str = "*";

/// Filter for reading tuples.
///
/// Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleFilter {
    /// Filter by object type.
    pub object_type: Option<String>,
    /// Filter by object ID.
    pub object_id: Option<String>,
    /// Filter by relation.
    pub relation: Option<String>,
    /// Filter by exact user, in "type:id" or "type:id#relation" format.
    pub user: Option<String>,
    /// Keep only concrete users of these types (no usersets, no wildcards).
    pub user_types: Option<Vec<String>>,
}

impl TupleFilter {
    /// Filter for every tuple on `(object, relation)`.
    pub fn object_relation(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            object_type: Some(object_type.into()),
            object_id: Some(object_id.into()),
            relation: Some(relation.into()),
            ..Self::default()
        }
    }

    /// Restricts the filter to concrete users of `types`.
    pub fn with_user_types(mut self, types: Vec<String>) -> Self {
        self.user_types = Some(types);
        self
    }

    /// Restricts the filter to one exact user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub(crate) fn matches(&self, tuple: &StoredTuple) -> bool {
        self.object_type
            .as_ref()
            .map_or(true, |ot| &tuple.object_type == ot)
            && self
                .object_id
                .as_ref()
                .map_or(true, |oi| &tuple.object_id == oi)
            && self.relation.as_ref().map_or(true, |r| &tuple.relation == r)
            && self.user.as_ref().map_or(true, |u| tuple.user() == *u)
            && self.user_types.as_ref().map_or(true, |types| {
                tuple.user_relation.is_none()
                    && tuple.user_id != WILDCARD_ID
                    && types.contains(&tuple.user_type)
            })
    }
}

/// A stored tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoredTuple {
    pub object_type: String,
    pub object_id: String,
    pub relation: String,
    pub user_type: String,
    pub user_id: String,
    pub user_relation: Option<String>,
}

impl StoredTuple {
    /// Creates a tuple with a concrete or wildcard user.
    pub fn new(
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        relation: impl Into<String>,
        user_type: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
            relation: relation.into(),
            user_type: user_type.into(),
            user_id: user_id.into(),
            user_relation: None,
        }
    }

    /// Sets the userset relation of the user (`type:id#relation`).
    pub fn with_user_relation(mut self, relation: impl Into<String>) -> Self {
        self.user_relation = Some(relation.into());
        self
    }

    /// The user in text form.
    pub fn user(&self) -> String {
        match &self.user_relation {
            Some(relation) => format!("{}:{}#{}", self.user_type, self.user_id, relation),
            None => format!("{}:{}", self.user_type, self.user_id),
        }
    }

    pub(crate) fn not_found(&self) -> StorageError {
        StorageError::TupleNotFound {
            object_type: self.object_type.clone(),
            object_id: self.object_id.clone(),
            relation: self.relation.clone(),
            user: self.user(),
        }
    }

    pub(crate) fn duplicate(&self) -> StorageError {
        StorageError::DuplicateTuple {
            object_type: self.object_type.clone(),
            object_id: self.object_id.clone(),
            relation: self.relation.clone(),
            user: self.user(),
        }
    }
}

impl fmt::Display for StoredTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}@{}",
            self.object_type,
            self.object_id,
            self.relation,
            self.user()
        )
    }
}

/// Snapshot-versioned tuple storage.
///
/// Every committed write batch gets the next revision. A read at revision
/// `r` sees exactly the batches committed at revisions `<= r`.
///
/// Implementations must be thread-safe (Send + Sync) and support
/// async operations.
#[async_trait]
pub trait TupleStore: Send + Sync + 'static {
    /// Atomically applies a batch of inserts and deletes.
    ///
    /// Deletes are applied before inserts. Inserting a live tuple or
    /// deleting a missing one fails the whole batch. Returns the revision
    /// the batch was committed at.
    async fn write(&self, writes: Vec<StoredTuple>, deletes: Vec<StoredTuple>) -> StorageResult<u64>;

    /// Reads tuples matching the filter, as of `revision`, in sorted order.
    async fn read(&self, filter: &TupleFilter, revision: u64) -> StorageResult<Vec<StoredTuple>>;

    /// Ids of `object_type` objects holding at least one tuple at `revision`.
    async fn list_object_ids(&self, object_type: &str, revision: u64) -> StorageResult<Vec<String>>;

    /// Latest committed revision.
    async fn head(&self) -> StorageResult<u64>;

    /// Drops history only needed by reads older than `before`.
    ///
    /// Afterwards reads below `before` fail with `SnapshotExpired`.
    /// Returns the number of tuple versions dropped.
    async fn compact(&self, before: u64) -> StorageResult<usize>;
}

/// Validates a type or relation name.
pub fn validate_name(kind: &str, value: &str) -> StorageResult<()> {
    if value.is_empty() {
        return Err(StorageError::InvalidInput {
            message: format!("{} cannot be empty", kind),
        });
    }
    if value.contains(&[':', '#', '@', '*'][..]) || value.chars().any(char::is_whitespace) {
        return Err(StorageError::InvalidInput {
            message: format!("{} '{}' contains reserved characters", kind, value),
        });
    }
    Ok(())
}

/// Validates that every field of a tuple is well formed.
pub fn validate_tuple(tuple: &StoredTuple) -> StorageResult<()> {
    validate_name("object type", &tuple.object_type)?;
    validate_name("relation", &tuple.relation)?;
    validate_name("user type", &tuple.user_type)?;
    if let Some(relation) = &tuple.user_relation {
        validate_name("user relation", relation)?;
    }

    for (kind, id) in [("object id", &tuple.object_id), ("user id", &tuple.user_id)] {
        if id.is_empty() || id.contains(&['#', '@'][..]) {
            return Err(StorageError::InvalidInput {
                message: format!("{} '{}' is empty or contains reserved characters", kind, id),
            });
        }
    }
    if tuple.object_id == WILDCARD_ID {
        return Err(StorageError::InvalidInput {
            message: "object id cannot be a wildcard".to_string(),
        });
    }
    if tuple.user_id == WILDCARD_ID && tuple.user_relation.is_some() {
        return Err(StorageError::InvalidInput {
            message: "a wildcard user cannot carry a relation".to_string(),
        });
    }
    Ok(())
}
