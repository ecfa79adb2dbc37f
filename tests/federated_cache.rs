use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use spatial_catalog_db::cache::{CacheManager, CachePolicy};
use spatial_catalog_db::logic::{Complement, InstanceModifier, Overrider, ReconcileContext};
use spatial_catalog_db::provider::{fetch_categories, DataProvider, DatasetCategory, PointerExtractor, RawRecord, RecordAdapter};
use spatial_catalog_db::query::{compile, PostgresDialect, QuerySettings, SqlDialect};
use spatial_catalog_db::store::{DbQuerier, DbRow, SqlExecutor};
use spatial_catalog_db::{
    CriteriaNode, FetchError, Id, Instance, PropertySelection, Query, Schema, SpatialPolygon, SqlStatement, StoreError,
    Value,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SCHEMA: &str = r#"{
    "name": "catalog",
    "classes": [
        {
            "name": "SpatialEntity",
            "properties": [
                {"name": "Name", "type": "string"},
                {"name": "Footprint", "type": "string", "is_spatial": true},
                {"name": "Resolution", "type": "string"}
            ],
            "mapping": {
                "table": "SpatialEntities",
                "cache_table": "SpatialEntityCache",
                "aspects": ["Metadata"]
            }
        }
    ]
}"#;

/// Answers selects by the table they read from and records every statement.
#[derive(Default)]
struct TableExecutor {
    tables: Mutex<HashMap<String, Vec<DbRow>>>,
    log: Mutex<Vec<SqlStatement>>,
}

impl TableExecutor {
    fn with_rows(table: &str, rows: Vec<DbRow>) -> Self {
        let executor = Self::default();
        executor.tables.lock().unwrap().insert(table.to_string(), rows);
        executor
    }

    fn statements(&self) -> Vec<SqlStatement> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlExecutor for TableExecutor {
    async fn fetch_rows(&self, statement: &SqlStatement) -> Result<Vec<DbRow>, StoreError> {
        self.log.lock().unwrap().push(statement.clone());
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .iter()
            .find(|(table, _)| statement.sql.contains(&format!("FROM {} ", table)))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn execute(&self, statement: &SqlStatement) -> Result<u64, StoreError> {
        self.log.lock().unwrap().push(statement.clone());
        Ok(1)
    }
}

struct CatalogProvider;

#[async_trait]
impl DataProvider for CatalogProvider {
    fn source(&self) -> &str {
        "sciencebase"
    }

    async fn fetch_by_ids(&self, ids: &[Id]) -> Result<Vec<RawRecord>, FetchError> {
        Ok(ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "title": format!("Orthoimagery 1m {}", id),
                    "bbox": "SRID=4326;POLYGON((0 0, 2 0, 2 2, 0 0))"
                })
            })
            .collect())
    }

    async fn fetch_by_spatial_query(
        &self,
        _polygon_wkt: &str,
        criteria: Option<&CriteriaNode>,
    ) -> Result<Vec<RawRecord>, FetchError> {
        match criteria {
            Some(CriteriaNode::InstanceIdComparison { id }) if id == "offline" => {
                Err(FetchError::transport("sciencebase", "503 Service Unavailable"))
            }
            _ => Ok(vec![json!({"id": "a"}), json!({"id": "b"})]),
        }
    }

    async fn fetch_single(&self, id: &str) -> Result<Option<RawRecord>, FetchError> {
        Ok(self.fetch_by_ids(&[id.to_string()]).await?.pop())
    }
}

fn schema() -> Arc<Schema> {
    Arc::new(Schema::from_json(SCHEMA).unwrap())
}

fn cached_row(id: &str, resolution: &str, metadata_complete: bool) -> DbRow {
    let created = Utc::now() - ChronoDuration::days(2);
    vec![
        Value::string(id),
        Value::string(format!("cached {}", id)),
        Value::string("POLYGON((0 0, 1 0, 1 1, 0 0))"),
        Value::Int(4326),
        Value::string(resolution),
        Value::DateTime(created),
        Value::Bool(metadata_complete),
        Value::DateTime(created),
    ]
}

#[tokio::test]
async fn test_fetch_through_writes_back_incomplete_rows() {
    let executor = Arc::new(TableExecutor::with_rows(
        "SpatialEntityCache",
        vec![cached_row("e1", "1m", true), cached_row("e2", "1m", false)],
    ));
    let mut cache = CacheManager::new(
        executor.clone(),
        schema(),
        Arc::new(PostgresDialect),
        "sciencebase",
        CachePolicy::default(),
        4326,
    );
    let adapter = RecordAdapter::new("SpatialEntity", "/id")
        .footprint("Footprint", "/bbox", 4326)
        .with_extractor(Arc::new(PointerExtractor::default()));

    let ids: Vec<Id> = vec!["e3".to_string(), "e1".to_string(), "e2".to_string()];
    let instances = cache
        .fetch_through(&ids, "SpatialEntity", &CatalogProvider, &adapter, Duration::from_secs(5))
        .await
        .unwrap();

    let names: Vec<_> = instances.iter().map(|i| i.get_str("Name").unwrap()).collect();
    assert_eq!(names, vec!["Orthoimagery 1m e3", "cached e1", "Orthoimagery 1m e2"]);
    assert!(instances.iter().all(|i| i.is_complete()));
    assert_eq!(
        instances[0].get_str("Footprint"),
        Some("SRID=4326;POLYGON((0 0, 2 0, 2 2, 0 0))")
    );

    let writes: Vec<_> = executor
        .statements()
        .into_iter()
        .skip(1)
        .map(|s| s.sql)
        .collect();
    assert_eq!(writes.len(), 4);
    assert!(writes[0].starts_with("DELETE FROM SpatialEntityCache"));
    assert!(writes[1].contains("ST_GeomFromText('POLYGON((0 0, 2 0, 2 2, 0 0))', 4326)"), "{}", writes[1]);
    assert!(writes[1].contains("MetadataComplete, MetadataDateCreated"), "{}", writes[1]);
}

#[tokio::test]
async fn test_polygon_lookup_reads_cache_geometry() {
    let executor = Arc::new(TableExecutor::with_rows("SpatialEntityCache", vec![cached_row("e1", "1m", true)]));
    let cache = CacheManager::new(
        executor.clone(),
        schema(),
        Arc::new(PostgresDialect),
        "sciencebase",
        CachePolicy::from_days(7),
        4326,
    );
    let polygon = SpatialPolygon::new(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)], 4326).unwrap();

    let instances = cache
        .query_instances_from_cache_by_polygon(&polygon, "SpatialEntity", &PropertySelection::All, None)
        .await
        .unwrap();

    assert_eq!(instances.len(), 1);
    assert!(instances[0].is_complete());
    let sql = &executor.statements()[0].sql;
    assert!(sql.contains("ST_Intersects"), "{}", sql);
    assert!(sql.contains("tab0.Source = $1"), "{}", sql);
}

#[tokio::test]
async fn test_primary_results_reconciled_from_secondary_cache() {
    let primary_rows = vec![vec![
        Value::string("e1"),
        Value::string("County lidar"),
        Value::Null,
        Value::Null,
        Value::string("1m"),
    ]];
    let executor = Arc::new(TableExecutor::with_rows("SpatialEntities", primary_rows));
    executor
        .tables
        .lock()
        .unwrap()
        .insert("SpatialEntityCache".to_string(), vec![cached_row("e1", "0.5m", true)]);

    let schema = schema();
    let dialect: Arc<dyn SqlDialect> = Arc::new(PostgresDialect);
    let compiled = compile(
        &Query::new("SpatialEntity"),
        &QuerySettings::default(),
        dialect.as_ref(),
        None,
        &schema,
        false,
    )
    .unwrap();
    let primary: Vec<Instance> = DbQuerier::new(executor.as_ref(), dialect.as_ref())
        .execute_compiled(&compiled)
        .await
        .unwrap();

    let context = ReconcileContext {
        schema: schema.clone(),
        dialect: dialect.clone(),
        policy: CachePolicy::default(),
        default_srid: 4326,
    };

    let mut complemented = primary.clone();
    Complement::new(context.clone())
        .modify(&mut complemented, "usgs", executor.clone())
        .await
        .unwrap();
    assert_eq!(complemented[0].get_str("Name"), Some("County lidar, cached e1"));
    assert_eq!(complemented[0].get_str("Resolution"), Some("1m, 0.5m"));
    assert_eq!(
        complemented[0].get_str("Footprint"),
        Some("SRID=4326;POLYGON((0 0, 1 0, 1 1, 0 0))")
    );

    let mut overridden = primary;
    Overrider::new(context)
        .modify(&mut overridden, "usgs", executor)
        .await
        .unwrap();
    assert_eq!(overridden[0].get_str("Name"), Some("cached e1"));
    assert_eq!(overridden[0].get_str("Resolution"), Some("0.5m"));
}

#[tokio::test]
async fn test_category_fanout_tolerates_one_failure() {
    let categories = vec![
        DatasetCategory::new("elevation"),
        DatasetCategory::new("imagery"),
        DatasetCategory::new("broken").with_criteria(CriteriaNode::id("offline")),
    ];

    let records = fetch_categories(
        &CatalogProvider,
        "POLYGON((0 0, 1 0, 1 1, 0 0))",
        &categories,
        Duration::from_secs(1),
    )
    .await
    .unwrap();
    assert_eq!(records.len(), 4);

    let only_broken = vec![DatasetCategory::new("broken").with_criteria(CriteriaNode::id("offline"))];
    let err = fetch_categories(&CatalogProvider, "POLYGON((0 0, 1 0, 1 1, 0 0))", &only_broken, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::AllFailed(ref failures) if failures.len() == 1));
}
