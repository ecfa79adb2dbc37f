use std::time::Duration;
use thiserror::Error;

/// Malformed query input, reported before anything is executed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("unknown class '{0}'")]
    UnknownClass(String),

    #[error("class '{class}' has no property '{property}'")]
    UnknownProperty { class: String, property: String },

    #[error("unknown relationship '{0}'")]
    UnknownRelationship(String),

    #[error("relationship '{relationship}' does not connect to class '{class}'")]
    RelationshipMismatch { relationship: String, class: String },

    #[error("class '{0}' is not mapped to a table")]
    UnmappedClass(String),

    #[error("class '{0}' has no shadow-cache table")]
    UnmappedCacheClass(String),

    #[error("property '{property}' of class '{class}' cannot be used in a filter")]
    UnfilterableProperty { class: String, property: String },

    #[error("property '{property}' lives on base class '{base}'; the query must be polymorphic")]
    PolymorphismRequired { property: String, base: String },

    #[error("composite criteria with {children} children needs {expected} operators, got {operators}")]
    MalformedComposite {
        children: usize,
        expected: usize,
        operators: usize,
    },

    #[error("invalid spatial polygon: {0}")]
    InvalidPolygon(String),

    #[error("class '{0}' has no spatial property to filter on")]
    NoSpatialProperty(String),

    #[error("{0}")]
    Unsupported(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

/// Failures talking to the relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Uniqueness constraint hit; the shadow cache treats this as
    /// "already cached by a concurrent writer".
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cannot decode column {index} of type {type_name}")]
    Decode { index: usize, type_name: String },

    #[error("stream '{0}' returned no row")]
    MissingStream(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        match self {
            StoreError::UniqueViolation(_) => true,
            StoreError::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

/// Failures at the remote provider boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("request '{label}' timed out after {after:?}")]
    Timeout { label: String, after: Duration },

    #[error("request '{label}' failed: {message}")]
    Transport { label: String, message: String },

    #[error("all {} provider requests failed", .0.len())]
    AllFailed(Vec<FetchError>),
}

impl FetchError {
    pub fn transport(label: impl Into<String>, message: impl Into<String>) -> Self {
        FetchError::Transport {
            label: label.into(),
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}
