//! Fixtures shared by the unit tests.

use crate::error::StoreError;
use crate::model::{
    ClassMapping, PrimitiveType, PropertyDef, RelationshipDirection, RelationshipEnds, Schema, SchemaClass,
    SqlStatement,
};
use crate::store::{DbRow, SqlExecutor};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Entities with footprints, their data sources, and the relationship between
/// them. `SpatialEntityBase` is mapped to its own table so polymorphic
/// selection has something to join.
pub(crate) fn catalog_schema() -> Schema {
    let base = SchemaClass::new(
        "SpatialEntityBase",
        vec![PropertyDef::new("Name", PrimitiveType::String)],
        ClassMapping {
            table: Some("SpatialEntityBases".to_string()),
            ..ClassMapping::default()
        },
    );

    let entity = SchemaClass::new(
        "SpatialEntity",
        vec![
            PropertyDef::spatial("Footprint"),
            PropertyDef::new("Resolution", PrimitiveType::String),
            PropertyDef::new("Date", PrimitiveType::DateTime),
            PropertyDef::new("Thumbnail", PrimitiveType::Stream).with_column("ThumbnailData"),
        ],
        ClassMapping {
            table: Some("SpatialEntities".to_string()),
            cache_table: Some("SpatialEntityCache".to_string()),
            aspects: vec!["Metadata".to_string(), "DataSource".to_string()],
            ..ClassMapping::default()
        },
    )
    .with_base("SpatialEntityBase");

    let source = SchemaClass::new(
        "SpatialDataSource",
        vec![
            PropertyDef::new("MainURL", PrimitiveType::String),
            PropertyDef::new("DataSourceType", PrimitiveType::String),
            PropertyDef::new("FileSize", PrimitiveType::Long),
        ],
        ClassMapping {
            table: Some("SpatialDataSources".to_string()),
            cache_table: Some("SpatialDataSourceCache".to_string()),
            ..ClassMapping::default()
        },
    );

    let mut has_source = SchemaClass::new("SpatialEntityHasDataSource", Vec::new(), ClassMapping::default());
    has_source.relationship = Some(RelationshipEnds {
        source: "SpatialEntity".to_string(),
        target: "SpatialDataSource".to_string(),
        container_key: "Id".to_string(),
        contained_key: "SpatialEntityId".to_string(),
        direction: RelationshipDirection::Forward,
    });

    Schema::new("catalog", vec![base, entity, source, has_source]).expect("catalog schema is valid")
}

/// In-memory executor: records every statement and answers reads from a queue
/// of canned result sets.
#[derive(Default)]
pub(crate) struct ScriptedExecutor {
    results: Mutex<VecDeque<Vec<DbRow>>>,
    pub(crate) statements: Mutex<Vec<SqlStatement>>,
    fail_unique: bool,
}

impl ScriptedExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn returning(results: Vec<Vec<DbRow>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            ..Self::default()
        }
    }

    /// Every `execute` reports a uniqueness violation.
    pub(crate) fn failing_unique() -> Self {
        Self {
            fail_unique: true,
            ..Self::default()
        }
    }

    pub(crate) fn recorded(&self) -> Vec<SqlStatement> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlExecutor for ScriptedExecutor {
    async fn fetch_rows(&self, statement: &SqlStatement) -> Result<Vec<DbRow>, StoreError> {
        self.statements.lock().unwrap().push(statement.clone());
        Ok(self.results.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn execute(&self, statement: &SqlStatement) -> Result<u64, StoreError> {
        self.statements.lock().unwrap().push(statement.clone());
        if self.fail_unique {
            return Err(StoreError::UniqueViolation("duplicate key".to_string()));
        }
        Ok(1)
    }
}
